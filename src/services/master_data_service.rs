//! Reference data served from JSON files.
//!
//! Files are read on every request so they can be edited without a restart.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;

pub const BANKS: &str = "banks.json";
pub const BILLING_STATUSES: &str = "billing_status.json";
pub const PROVINCES: &str = "provinces.json";
pub const CITIES: &str = "cities.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bank {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct City {
    pub id: String,
    pub province_id: String,
    pub name: String,
}

async fn read_json<T: serde::de::DeserializeOwned>(dir: &str, file: &str) -> Result<T, AppError> {
    let path = Path::new(dir).join(file);
    let bytes = tokio::fs::read(&path).await.map_err(|e| {
        AppError::Internal(format!("cannot read master data {}: {e}", path.display()))
    })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        AppError::Internal(format!("invalid master data {}: {e}", path.display()))
    })
}

pub async fn banks(dir: &str) -> Result<Vec<Bank>, AppError> {
    read_json(dir, BANKS).await
}

/// `true` when `code` names a bank in the master data (case-insensitive).
pub async fn bank_exists(dir: &str, code: &str) -> Result<bool, AppError> {
    Ok(banks(dir)
        .await?
        .iter()
        .any(|bank| bank.code.eq_ignore_ascii_case(code)))
}

pub async fn billing_statuses(dir: &str) -> Result<Value, AppError> {
    read_json(dir, BILLING_STATUSES).await
}

pub async fn provinces(dir: &str) -> Result<Value, AppError> {
    read_json(dir, PROVINCES).await
}

pub async fn cities_of_province(dir: &str, province_id: &str) -> Result<Vec<City>, AppError> {
    let cities: Vec<City> = read_json(dir, CITIES).await?;
    Ok(cities
        .into_iter()
        .filter(|city| city.province_id == province_id)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir() -> String {
        crate::config::test_config().master_data_dir
    }

    #[tokio::test]
    async fn bundled_banks_include_bca() {
        let banks = banks(&dir()).await.unwrap();
        assert!(!banks.is_empty());
        assert!(bank_exists(&dir(), "bca").await.unwrap());
        assert!(!bank_exists(&dir(), "NOPE").await.unwrap());
    }

    #[tokio::test]
    async fn cities_are_filtered_by_province() {
        let cities = cities_of_province(&dir(), "31").await.unwrap();
        assert!(!cities.is_empty());
        assert!(cities.iter().all(|c| c.province_id == "31"));
    }

    #[tokio::test]
    async fn missing_directory_is_an_internal_error() {
        let err = banks("/nonexistent/master").await.unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
    }
}
