use thiserror::Error;

/// Upper bound on chat message length, in characters.
pub const MAX_MESSAGE_CHARS: usize = 4000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} is required")]
    Missing { field: &'static str },
    #[error("{field} is too short (min {min}, got {got})")]
    TooShort {
        field: &'static str,
        min: usize,
        got: usize,
    },
    #[error("{field} is too long (max {max}, got {got})")]
    TooLong {
        field: &'static str,
        max: usize,
        got: usize,
    },
    #[error("{field} has an invalid format")]
    InvalidFormat { field: &'static str },
}

pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    let len = name.trim().chars().count();
    if len == 0 {
        return Err(ValidationError::Missing { field: "name" });
    }
    if len > 64 {
        return Err(ValidationError::TooLong {
            field: "name",
            max: 64,
            got: len,
        });
    }
    Ok(())
}

/// Message content must contain something other than whitespace.
pub fn validate_message_content(content: &str) -> Result<(), ValidationError> {
    if content.trim().is_empty() {
        return Err(ValidationError::Missing { field: "content" });
    }
    let len = content.chars().count();
    if len > MAX_MESSAGE_CHARS {
        return Err(ValidationError::TooLong {
            field: "content",
            max: MAX_MESSAGE_CHARS,
            got: len,
        });
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    if email.is_empty() {
        return Err(ValidationError::Missing { field: "email" });
    }
    if email.len() > 255 {
        return Err(ValidationError::TooLong {
            field: "email",
            max: 255,
            got: email.len(),
        });
    }
    let Some((local, domain)) = email.split_once('@') else {
        return Err(ValidationError::InvalidFormat { field: "email" });
    };
    if local.is_empty() || domain.is_empty() || !domain.contains('.') {
        return Err(ValidationError::InvalidFormat { field: "email" });
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    let len = password.len();
    if len < 8 {
        return Err(ValidationError::TooShort {
            field: "password",
            min: 8,
            got: len,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_content_is_missing() {
        assert_eq!(
            validate_message_content("   \n"),
            Err(ValidationError::Missing { field: "content" })
        );
        assert!(validate_message_content("hi").is_ok());
    }

    #[test]
    fn oversized_content_is_rejected() {
        let long = "x".repeat(MAX_MESSAGE_CHARS + 1);
        assert!(matches!(
            validate_message_content(&long),
            Err(ValidationError::TooLong { .. })
        ));
    }

    #[test]
    fn email_shapes() {
        assert!(validate_email("a@b.io").is_ok());
        assert!(validate_email("nope").is_err());
        assert!(validate_email("@b.io").is_err());
        assert!(validate_email("a@localhost").is_err());
    }

    #[test]
    fn password_length() {
        assert!(validate_password("short").is_err());
        assert!(validate_password("long-enough").is_ok());
    }
}
