//! Local input validation, checked before any network call.

use chatsync_types::MessageId;
use thiserror::Error;

/// Minimum password length for registration.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Minimum email length.
pub const MIN_EMAIL_LEN: usize = 5;

/// Input rejected locally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Message or post text is blank
    #[error("message text is empty")]
    EmptyMessage,

    /// Channel name is blank
    #[error("channel name is empty")]
    EmptyChannelName,

    /// Email has no `@`
    #[error("email must contain '@'")]
    InvalidEmail,

    /// Email shorter than [`MIN_EMAIL_LEN`]
    #[error("email must be at least 5 characters")]
    EmailTooShort,

    /// Password shorter than the required minimum
    #[error("password must be at least {min} characters")]
    PasswordTooShort {
        /// Required minimum length.
        min: usize,
    },

    /// Login without a password
    #[error("password is required")]
    MissingPassword,

    /// Reaction without an emoji
    #[error("emoji is empty")]
    EmptyEmoji,

    /// Message is not in the active channel's list
    #[error("unknown message: {0}")]
    UnknownMessage(MessageId),

    /// Channel is not known locally
    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    /// No channel is active
    #[error("no active channel")]
    NoActiveChannel,
}

/// Check message text. Whitespace-only text counts as empty.
pub fn message_text(text: &str) -> Result<(), ValidationError> {
    if text.trim().is_empty() {
        return Err(ValidationError::EmptyMessage);
    }
    Ok(())
}

/// Check and normalize a channel name (trimmed).
pub fn channel_name(name: &str) -> Result<String, ValidationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::EmptyChannelName);
    }
    Ok(name.to_string())
}

fn email(email: &str) -> Result<(), ValidationError> {
    if !email.contains('@') {
        return Err(ValidationError::InvalidEmail);
    }
    if email.chars().count() < MIN_EMAIL_LEN {
        return Err(ValidationError::EmailTooShort);
    }
    Ok(())
}

/// Check login input.
pub fn login_credentials(address: &str, password: &str) -> Result<(), ValidationError> {
    email(address)?;
    if password.is_empty() {
        return Err(ValidationError::MissingPassword);
    }
    Ok(())
}

/// Check registration input.
pub fn register_credentials(address: &str, password: &str) -> Result<(), ValidationError> {
    email(address)?;
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::PasswordTooShort {
            min: MIN_PASSWORD_LEN,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_message_rejected() {
        assert_eq!(message_text("  \n"), Err(ValidationError::EmptyMessage));
        assert!(message_text("hi").is_ok());
    }

    #[test]
    fn channel_name_is_trimmed() {
        assert_eq!(channel_name("  ops "), Ok("ops".to_string()));
        assert_eq!(channel_name("   "), Err(ValidationError::EmptyChannelName));
    }

    #[test]
    fn email_rules() {
        assert_eq!(
            login_credentials("alice.example.com", "pw"),
            Err(ValidationError::InvalidEmail)
        );
        assert_eq!(
            login_credentials("a@b", "pw"),
            Err(ValidationError::EmailTooShort)
        );
        assert!(login_credentials("a@b.c", "pw").is_ok());
    }

    #[test]
    fn login_needs_any_password() {
        assert_eq!(
            login_credentials("alice@example.com", ""),
            Err(ValidationError::MissingPassword)
        );
        assert!(login_credentials("alice@example.com", "x").is_ok());
    }

    #[test]
    fn register_needs_long_password() {
        assert_eq!(
            register_credentials("alice@example.com", "12345"),
            Err(ValidationError::PasswordTooShort { min: 6 })
        );
        assert!(register_credentials("alice@example.com", "123456").is_ok());
    }

    #[test]
    fn error_display() {
        let err = ValidationError::PasswordTooShort { min: 6 };
        assert_eq!(err.to_string(), "password must be at least 6 characters");
        assert_eq!(
            ValidationError::EmailTooShort.to_string(),
            "email must be at least 5 characters"
        );
    }
}
