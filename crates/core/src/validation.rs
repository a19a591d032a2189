#![allow(missing_docs)]

//! Client-side field checks run before anything is sent.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use thiserror::Error;

/// Minimum accepted password length.
pub const MIN_PASSWORD_LEN: usize = 6;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));
static PRICE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").expect("valid price regex"));

/// A field failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    Required(&'static str),
    #[error("invalid email address")]
    InvalidEmail,
    #[error("password must be at least {MIN_PASSWORD_LEN} characters")]
    PasswordTooShort,
    #[error("full name must contain first name and last name separated by space")]
    FullNameTokens,
    #[error("price must be a number")]
    PriceNotNumeric,
    #[error("price must be greater than 0")]
    PriceNotPositive,
    #[error("main photo is required")]
    MissingMainPhoto,
    #[error("{0} is not a valid URL")]
    InvalidUrl(String),
}

/// Require a non-blank value and return it trimmed.
pub fn required(field: &'static str, value: &str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Required(field));
    }
    Ok(trimmed.to_string())
}

pub fn validate_email(email: &str) -> Result<String, ValidationError> {
    let email = required("email", email)?;
    if !EMAIL_RE.is_match(&email) {
        return Err(ValidationError::InvalidEmail);
    }
    Ok(email)
}

pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    if password.is_empty() {
        return Err(ValidationError::Required("password"));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::PasswordTooShort);
    }
    Ok(())
}

/// At least two whitespace-separated tokens.
pub fn validate_full_name(full_name: &str) -> Result<String, ValidationError> {
    let full_name = required("full name", full_name)?;
    if full_name.split_whitespace().count() < 2 {
        return Err(ValidationError::FullNameTokens);
    }
    Ok(full_name)
}

/// Parse a price typed as text. Only digits are accepted and the value must
/// be positive.
pub fn parse_price(price: &str) -> Result<u64, ValidationError> {
    let price = required("price", price)?;
    if !PRICE_RE.is_match(&price) {
        return Err(ValidationError::PriceNotNumeric);
    }
    let value: u64 = price
        .parse()
        .map_err(|_| ValidationError::PriceNotNumeric)?;
    if value == 0 {
        return Err(ValidationError::PriceNotPositive);
    }
    Ok(value)
}

/// Accept only absolute http(s) URLs for photos.
pub fn validate_photo_url(url: &str) -> Result<String, ValidationError> {
    let trimmed = url.trim();
    match Url::parse(trimmed) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(trimmed.to_string()),
        _ => Err(ValidationError::InvalidUrl(trimmed.to_string())),
    }
}
