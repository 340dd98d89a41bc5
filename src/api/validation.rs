//! Input validation for API requests.
//!
//! This module provides validation functions for API request data,
//! ensuring all inputs meet the required format and constraints.
//!
//! For collecting multiple validation errors and returning them as an ApiError,
//! use the `ValidationErrorBuilder` from the `error` module.

use chrono::{Datelike, Duration, Local, NaiveDate};
use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use std::str::FromStr;

/// Calendar dates are exchanged in this format everywhere.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

lazy_static! {
    /// Regex for validating email addresses
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9][-a-zA-Z0-9]*(\.[a-zA-Z0-9][-a-zA-Z0-9]*)+$"
    ).unwrap();

    /// Allowed character set for transaction titles: alphanumeric, whitespace,
    /// common punctuation, and Latin-1 accented letters
    static ref TITLE_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9\s\-_.(),!?'À-ſ]+$"
    ).unwrap();

    /// Patterns that indicate script or SQL injection attempts in free text
    static ref INJECTION_REGEX: Regex = Regex::new(
        r"(?i)(<script|javascript:|vbscript:|data:text/html|on\w+\s*=|--|/\*|\*/|\bunion\b|\bselect\b|\binsert\b|\bdelete\b|\bdrop\b)"
    ).unwrap();

    /// Uploaded photo filenames: a single path component with an image extension
    static ref PHOTO_FILENAME_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9][a-zA-Z0-9_-]*\.(jpg|jpeg|png|gif|webp)$"
    ).unwrap();
}

/// Validate a display name (user or category)
pub fn validate_name(name: &str) -> Result<(), String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Name is required".to_string());
    }

    if name.len() < 2 {
        return Err("Name must be between 2 and 100 characters".to_string());
    }

    if name.len() > 100 {
        return Err("Name must be between 2 and 100 characters".to_string());
    }

    Ok(())
}

/// Validate an email address
pub fn validate_email(email: &str) -> Result<(), String> {
    let email = email.trim();
    if email.is_empty() {
        return Err("Email is required".to_string());
    }

    if email.len() > 100 {
        return Err("Email must not exceed 100 characters".to_string());
    }

    if !EMAIL_REGEX.is_match(email) {
        return Err("Please provide a valid email".to_string());
    }

    Ok(())
}

/// Normalize an email for storage and comparison. Uniqueness is
/// case-insensitive.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Validate password strength
pub fn validate_password_strength(password: &str) -> Result<(), String> {
    if password.len() < 8 {
        return Err("Password must be at least 8 characters long".to_string());
    }

    let has_uppercase = password.chars().any(|c| c.is_uppercase());
    let has_lowercase = password.chars().any(|c| c.is_lowercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_symbol = password.chars().any(|c| !c.is_alphanumeric());

    if !has_uppercase || !has_lowercase || !has_digit || !has_symbol {
        return Err(
            "Password must contain at least one uppercase letter, one lowercase letter, one digit, and one symbol"
                .to_string(),
        );
    }

    Ok(())
}

/// Validate a transaction title
pub fn validate_title(title: &str) -> Result<(), String> {
    let title = title.trim();
    if title.is_empty() {
        return Err("Title is required".to_string());
    }

    if title.len() < 2 || title.len() > 255 {
        return Err("Title must be between 2 and 255 characters".to_string());
    }

    if INJECTION_REGEX.is_match(title) {
        return Err("Title contains invalid characters".to_string());
    }

    if !TITLE_REGEX.is_match(title) {
        return Err("Title contains forbidden characters".to_string());
    }

    Ok(())
}

/// Validate an optional free-text description
pub fn validate_description(description: &Option<String>) -> Result<(), String> {
    if let Some(d) = description {
        if d.len() > 500 {
            return Err("Description must not exceed 500 characters".to_string());
        }

        if INJECTION_REGEX.is_match(d) {
            return Err("Description contains potentially harmful content".to_string());
        }
    }

    Ok(())
}

/// Parse a raw amount string into a Decimal, rejecting exponential notation
/// and sub-cent precision. Range checks live in `validate_amount`.
pub fn parse_amount(raw: &str) -> Result<Decimal, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("Amount is required".to_string());
    }

    if raw.contains('e') || raw.contains('E') {
        return Err("Scientific notation not allowed".to_string());
    }

    let decimal_places = raw.split('.').nth(1).map(str::len).unwrap_or(0);
    if decimal_places > 2 {
        return Err("Maximum 2 decimal places allowed".to_string());
    }

    Decimal::from_str(raw).map_err(|_| "Amount must be a valid number".to_string())
}

/// Serde helper: accept an amount as a JSON number or string, going through
/// `parse_amount` so exponential notation and excess precision are rejected
/// before any handler logic runs.
pub fn deserialize_amount<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let raw = match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        _ => return Err(serde::de::Error::custom("Amount must be a number")),
    };
    parse_amount(&raw).map_err(serde::de::Error::custom)
}

/// Validate an amount's range: strictly positive, bounded above
pub fn validate_amount(amount: Decimal) -> Result<(), String> {
    if amount <= Decimal::ZERO {
        return Err("Amount must be greater than zero".to_string());
    }

    if amount > Decimal::new(99_999_999_999, 2) {
        return Err("Amount must not exceed 999,999,999.99".to_string());
    }

    Ok(())
}

/// Parse a calendar date in YYYY-MM-DD format
pub fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|_| "Date must be in YYYY-MM-DD format".to_string())
}

/// Validate a transaction date: well-formed and within [1900-01-01, today + 1 year]
pub fn validate_transaction_date(raw: &str) -> Result<NaiveDate, String> {
    let date = parse_date(raw)?;

    let min = NaiveDate::from_ymd_opt(1900, 1, 1).unwrap();
    let max = Local::now().date_naive() + Duration::days(365);

    if date < min || date > max {
        return Err("Transaction date must be between 1900-01-01 and one year from today".to_string());
    }

    Ok(date)
}

/// Validate a report month
pub fn validate_month(month: u32) -> Result<(), String> {
    if !(1..=12).contains(&month) {
        return Err("Month must be between 1 and 12".to_string());
    }
    Ok(())
}

/// Validate a report year
pub fn validate_year(year: i32) -> Result<(), String> {
    let max = Local::now().year() + 10;
    if year < 1900 || year > max {
        return Err("Invalid year".to_string());
    }
    Ok(())
}

/// Validate a search term: at least 2 characters after trimming
pub fn validate_search_term(term: &str) -> Result<&str, String> {
    let trimmed = term.trim();
    if trimmed.chars().count() < 2 {
        return Err("Search term must be at least 2 characters long".to_string());
    }
    Ok(trimmed)
}

/// Validate an uploaded photo filename: a single path component, image
/// extension only. Anything else never reaches the filesystem.
pub fn validate_photo_filename(filename: &str) -> Result<(), String> {
    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        return Err("Invalid photo filename".to_string());
    }

    if filename.len() > 255 || !PHOTO_FILENAME_REGEX.is_match(filename) {
        return Err("Invalid photo filename".to_string());
    }

    Ok(())
}

/// Validate a photo URL (optional field)
pub fn validate_photo_url(url: &Option<String>) -> Result<(), String> {
    if let Some(u) = url {
        if u.len() > 512 {
            return Err("Photo URL is too long (max 512 characters)".to_string());
        }
    }
    Ok(())
}

/// Escape SQL LIKE wildcards in user-supplied search input.
pub fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("Groceries").is_ok());
        assert!(validate_name("Ab").is_ok());

        assert!(validate_name("").is_err());
        assert!(validate_name("A").is_err());
        assert!(validate_name(&"x".repeat(101)).is_err());
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("user@example.com").is_ok());
        assert!(validate_email("first.last+tag@sub.example.co").is_ok());

        assert!(validate_email("").is_err());
        assert!(validate_email("not-an-email").is_err());
        assert!(validate_email("missing@tld").is_err());
    }

    #[test]
    fn test_normalize_email_lowercases() {
        assert_eq!(normalize_email("  User@Example.COM "), "user@example.com");
    }

    #[test]
    fn test_validate_password_strength() {
        assert!(validate_password_strength("Str0ng!pass").is_ok());

        assert!(validate_password_strength("short1!").is_err());
        assert!(validate_password_strength("alllowercase1!").is_err());
        assert!(validate_password_strength("ALLUPPERCASE1!").is_err());
        assert!(validate_password_strength("NoDigits!!").is_err());
        assert!(validate_password_strength("NoSymbols123").is_err());
    }

    #[test]
    fn test_validate_title() {
        assert!(validate_title("Monthly rent").is_ok());
        assert!(validate_title("Lunch (work), again!").is_ok());

        assert!(validate_title("").is_err());
        assert!(validate_title("A").is_err());
        assert!(validate_title("<script>alert(1)</script>").is_err());
        assert!(validate_title("x; DROP TABLE transactions --").is_err());
        assert!(validate_title(&"x".repeat(256)).is_err());
    }

    #[test]
    fn test_validate_description() {
        assert!(validate_description(&None).is_ok());
        assert!(validate_description(&Some("weekly shop".to_string())).is_ok());

        assert!(validate_description(&Some("x".repeat(501))).is_err());
        assert!(validate_description(&Some("<script>bad".to_string())).is_err());
        assert!(validate_description(&Some("javascript:alert(1)".to_string())).is_err());
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("10.50").unwrap(), Decimal::new(1050, 2));
        assert_eq!(parse_amount("5000000").unwrap(), Decimal::from(5_000_000));

        assert!(parse_amount("").is_err());
        assert!(parse_amount("1e5").is_err());
        assert!(parse_amount("1E5").is_err());
        assert!(parse_amount("10.505").is_err());
        assert!(parse_amount("abc").is_err());
    }

    #[test]
    fn test_validate_amount_range() {
        assert!(validate_amount(Decimal::new(1, 2)).is_ok());
        assert!(validate_amount(Decimal::new(99_999_999_999, 2)).is_ok());

        assert!(validate_amount(Decimal::ZERO).is_err());
        assert!(validate_amount(Decimal::new(-100, 2)).is_err());
        assert!(validate_amount(Decimal::from(1_000_000_000)).is_err());
    }

    #[test]
    fn test_validate_transaction_date() {
        assert!(validate_transaction_date("2024-01-15").is_ok());
        let tomorrow = (Local::now().date_naive() + Duration::days(1))
            .format(DATE_FORMAT)
            .to_string();
        assert!(validate_transaction_date(&tomorrow).is_ok());

        assert!(validate_transaction_date("2024-13-01").is_err());
        assert!(validate_transaction_date("not-a-date").is_err());
        assert!(validate_transaction_date("1899-12-31").is_err());
        let far_future = (Local::now().date_naive() + Duration::days(400))
            .format(DATE_FORMAT)
            .to_string();
        assert!(validate_transaction_date(&far_future).is_err());
    }

    #[test]
    fn test_validate_month_year() {
        assert!(validate_month(1).is_ok());
        assert!(validate_month(12).is_ok());
        assert!(validate_month(0).is_err());
        assert!(validate_month(13).is_err());

        assert!(validate_year(2024).is_ok());
        assert!(validate_year(1899).is_err());
        assert!(validate_year(Local::now().year() + 11).is_err());
    }

    #[test]
    fn test_validate_search_term() {
        assert_eq!(validate_search_term("ab").unwrap(), "ab");
        assert_eq!(validate_search_term("  rent  ").unwrap(), "rent");

        assert!(validate_search_term("a").is_err());
        assert!(validate_search_term(" a ").is_err());
        assert!(validate_search_term("").is_err());
    }

    #[test]
    fn test_validate_photo_filename() {
        assert!(validate_photo_filename("avatar-1.png").is_ok());
        assert!(validate_photo_filename("photo_2024.jpeg").is_ok());

        assert!(validate_photo_filename("../etc/passwd").is_err());
        assert!(validate_photo_filename("a/b.png").is_err());
        assert!(validate_photo_filename("script.sh").is_err());
        assert!(validate_photo_filename(".hidden.png").is_err());
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off"), "50\\%\\_off");
        assert_eq!(escape_like("plain"), "plain");
    }
}
