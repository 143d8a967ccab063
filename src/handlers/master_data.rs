//! Read-only reference data served from JSON files in `MASTER_DATA_DIR`.

use axum::{
    Json,
    extract::{Path, State},
};
use serde_json::Value;

use crate::{
    error::AppError,
    services::master_data_service::{self, Bank, City},
    state::AppState,
};

pub async fn banks(State(state): State<AppState>) -> Result<Json<Vec<Bank>>, AppError> {
    Ok(Json(
        master_data_service::banks(&state.config.master_data_dir).await?,
    ))
}

pub async fn billing_statuses(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    Ok(Json(
        master_data_service::billing_statuses(&state.config.master_data_dir).await?,
    ))
}

pub async fn provinces(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    Ok(Json(
        master_data_service::provinces(&state.config.master_data_dir).await?,
    ))
}

pub async fn cities(
    State(state): State<AppState>,
    Path(province_id): Path<String>,
) -> Result<Json<Vec<City>>, AppError> {
    Ok(Json(
        master_data_service::cities_of_province(&state.config.master_data_dir, &province_id)
            .await?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::lazy_state;

    #[tokio::test]
    async fn serves_banks_from_files() {
        let Json(banks) = banks(State(lazy_state())).await.unwrap();
        assert!(banks.iter().any(|b| b.code == "BCA"));
    }

    #[tokio::test]
    async fn cities_are_filtered_by_province() {
        let Json(cities) = cities(State(lazy_state()), Path("31".to_string()))
            .await
            .unwrap();
        assert!(!cities.is_empty());
        assert!(cities.iter().all(|c| c.province_id == "31"));
    }
}
