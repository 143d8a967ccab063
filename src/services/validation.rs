//! Small input normalizers shared by the services.

use crate::error::AppError;

/// Trimmed, non-empty string or `InvalidRequest` naming the field.
pub fn required(value: &str, field: &str) -> Result<String, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::invalid(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

/// Trim an optional value; blank becomes `None`.
pub fn optional_trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Codes are upper-cased and limited to letters, digits, `-` and `_`.
pub fn normalize_code(value: &str, field: &str) -> Result<String, AppError> {
    let code = required(value, field)?.to_ascii_uppercase();
    if code.len() > 32 {
        return Err(AppError::invalid(format!("{field} must be at most 32 characters")));
    }
    if !code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(AppError::invalid(format!(
            "{field} may only contain letters, digits, '-' and '_'"
        )));
    }
    Ok(code)
}

/// Lower-cased email with a minimal shape check.
pub fn normalize_email(value: &str) -> Result<String, AppError> {
    let email = value.trim().to_ascii_lowercase();
    let valid = email.split_once('@').is_some_and(|(local, domain)| {
        !local.is_empty()
            && domain.contains('.')
            && !domain.starts_with('.')
            && !domain.ends_with('.')
    });
    if !valid || email.contains(char::is_whitespace) {
        return Err(AppError::invalid(format!("'{value}' is not a valid email address")));
    }
    Ok(email)
}

/// Gender codes as used on Indonesian school records: `L` or `P`.
pub fn normalize_gender(value: Option<String>) -> Result<Option<String>, AppError> {
    match optional_trimmed(value).map(|g| g.to_ascii_uppercase()) {
        None => Ok(None),
        Some(g) if g == "L" || g == "P" => Ok(Some(g)),
        Some(other) => Err(AppError::invalid(format!(
            "gender must be 'L' or 'P', got '{other}'"
        ))),
    }
}

/// Digits only, optional leading `+`, 8 to 15 digits.
pub fn normalize_phone(value: &str) -> Result<String, AppError> {
    let compact: String = value
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    let digits = compact.strip_prefix('+').unwrap_or(&compact);
    if !(8..=15).contains(&digits.len()) || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::invalid(format!("'{value}' is not a valid phone number")));
    }
    Ok(compact)
}
