use thiserror::Error;

pub const MAX_MESSAGE_LEN: usize = 2000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} is required")]
    Missing { field: &'static str },
    #[error("value is too short (min {min}, got {got})")]
    TooShort { min: usize, got: usize },
    #[error("value is too long (max {max}, got {got})")]
    TooLong { max: usize, got: usize },
    #[error("invalid characters")]
    InvalidCharacters,
    #[error("invalid format")]
    InvalidFormat,
}

/// Trim a required text field, rejecting absent or blank input.
pub fn required<'a>(value: Option<&'a str>, field: &'static str) -> Result<&'a str, ValidationError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ValidationError::Missing { field }),
    }
}

pub fn validate_username(name: &str) -> Result<(), ValidationError> {
    let len = name.len();
    if len < 2 {
        return Err(ValidationError::TooShort { min: 2, got: len });
    }
    if len > 32 {
        return Err(ValidationError::TooLong { max: 32, got: len });
    }
    if !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.') {
        return Err(ValidationError::InvalidCharacters);
    }
    Ok(())
}

pub fn validate_group_name(name: &str) -> Result<(), ValidationError> {
    let len = name.chars().count();
    if len < 1 {
        return Err(ValidationError::TooShort { min: 1, got: len });
    }
    if len > 100 {
        return Err(ValidationError::TooLong { max: 100, got: len });
    }
    Ok(())
}

/// Message text must survive trimming and stay under the size cap.
pub fn validate_message_content(content: &str) -> Result<(), ValidationError> {
    let len = content.trim().chars().count();
    if len < 1 {
        return Err(ValidationError::TooShort { min: 1, got: len });
    }
    if len > MAX_MESSAGE_LEN {
        return Err(ValidationError::TooLong { max: MAX_MESSAGE_LEN, got: len });
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    if email.len() > 255 {
        return Err(ValidationError::TooLong { max: 255, got: email.len() });
    }
    let parts: Vec<&str> = email.splitn(2, '@').collect();
    if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
        return Err(ValidationError::InvalidFormat);
    }
    if !parts[1].contains('.') {
        return Err(ValidationError::InvalidFormat);
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    let len = password.len();
    if len < 8 {
        return Err(ValidationError::TooShort { min: 8, got: len });
    }
    if len > 128 {
        return Err(ValidationError::TooLong { max: 128, got: len });
    }
    Ok(())
}
