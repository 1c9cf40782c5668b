use std::fmt;
use thiserror::Error;

/// Fixed user-facing messages, keyed by failure kind.
pub mod messages {
    pub const NETWORK: &str = "Network error. Please check your connection.";
    pub const INVALID_CREDENTIALS: &str = "Invalid email or password.";
    pub const USER_NOT_FOUND: &str = "User not found.";
    pub const EMAIL_IN_USE: &str = "This email is already registered.";
    pub const WEAK_PASSWORD: &str = "Password should be at least 6 characters.";
    pub const REQUIRES_RECENT_LOGIN: &str = "Please login again to perform this action.";
    pub const PERMISSION_DENIED: &str =
        "Permission denied. You may not have access to perform this action.";
    pub const ITEM_NOT_FOUND: &str = "Item not found.";
    pub const ITEM_UNAUTHORIZED: &str = "You can only modify your own items.";
    pub const UPLOAD_FAILED: &str = "Failed to upload image. Please try again.";
    pub const UNAUTHENTICATED: &str = "You must be logged in to perform this action.";
    pub const UNKNOWN: &str = "An unexpected error occurred. Please try again.";
    pub const REQUIRED: &str = "This field is required.";
}

/// An error reported by one of the remote collaborators (identity service,
/// document store or blob store).
///
/// `code` follows the backend's convention: `unavailable`,
/// `permission-denied`, `not-found`, `already-exists`, `auth/wrong-password`
/// and so on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct RemoteError {
    pub code: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(codes::UNAVAILABLE, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(codes::PERMISSION_DENIED, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(codes::NOT_FOUND, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(codes::ALREADY_EXISTS, message)
    }

    /// Transport-level failure: the service could not be reached at all.
    pub fn is_network(&self) -> bool {
        self.code == codes::UNAVAILABLE || self.code == codes::AUTH_NETWORK
    }

    pub fn is_permission_denied(&self) -> bool {
        self.code == codes::PERMISSION_DENIED || self.code == codes::STORAGE_UNAUTHORIZED
    }

    /// Credential problems that login reports as a plain `false`.
    pub fn is_credential_rejection(&self) -> bool {
        matches!(
            self.code.as_str(),
            codes::AUTH_USER_NOT_FOUND
                | codes::AUTH_WRONG_PASSWORD
                | codes::AUTH_INVALID_CREDENTIAL
                | codes::AUTH_INVALID_EMAIL
                | codes::AUTH_USER_DISABLED
                | codes::AUTH_TOO_MANY_REQUESTS
        )
    }
}

/// Error codes shared by the adapters and the in-memory services.
pub mod codes {
    pub const UNAVAILABLE: &str = "unavailable";
    pub const PERMISSION_DENIED: &str = "permission-denied";
    pub const NOT_FOUND: &str = "not-found";
    pub const ALREADY_EXISTS: &str = "already-exists";
    pub const INVALID_ARGUMENT: &str = "invalid-argument";
    pub const UNAUTHENTICATED: &str = "unauthenticated";
    pub const UNKNOWN: &str = "unknown";

    pub const AUTH_USER_NOT_FOUND: &str = "auth/user-not-found";
    pub const AUTH_WRONG_PASSWORD: &str = "auth/wrong-password";
    pub const AUTH_INVALID_CREDENTIAL: &str = "auth/invalid-credential";
    pub const AUTH_INVALID_EMAIL: &str = "auth/invalid-email";
    pub const AUTH_USER_DISABLED: &str = "auth/user-disabled";
    pub const AUTH_TOO_MANY_REQUESTS: &str = "auth/too-many-requests";
    pub const AUTH_EMAIL_IN_USE: &str = "auth/email-already-in-use";
    pub const AUTH_WEAK_PASSWORD: &str = "auth/weak-password";
    pub const AUTH_REQUIRES_RECENT_LOGIN: &str = "auth/requires-recent-login";
    pub const AUTH_NETWORK: &str = "auth/network-request-failed";
    pub const AUTH_NO_SESSION: &str = "auth/no-current-user";

    pub const STORAGE_UNAUTHORIZED: &str = "storage/unauthorized";
    pub const STORAGE_CANCELED: &str = "storage/canceled";
    pub const STORAGE_UNKNOWN: &str = "storage/unknown";
    pub const STORAGE_OBJECT_NOT_FOUND: &str = "storage/object-not-found";
}

/// The error type returned by every session and repository operation.
///
/// Validation, authentication and ownership failures are produced locally
/// before any network call. Remote failures are classified by their code.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LostFoundError {
    /// A field is missing or malformed
    #[error("Validation error: {0}")]
    Validation(String),

    /// No signed-in user for a mutation
    #[error("Not signed in")]
    Unauthenticated,

    /// The signed-in user does not own the record
    #[error("Not the owner of item {0}")]
    Unauthorized(String),

    /// The item is not present in the local mirror
    #[error("Item not found: {0}")]
    NotFound(String),

    /// Network or service outage
    #[error("Remote service unavailable: {0}")]
    RemoteUnavailable(String),

    /// Rejected by server-side rules
    #[error("Remote permission denied: {0}")]
    RemotePermissionDenied(String),

    /// Conflicts and anything else reported by the backend
    #[error("Remote error: {code} - {message}")]
    Remote { code: String, message: String },

    /// Image could not be read or processed
    #[error("Image error: {0}")]
    Image(String),

    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LostFoundError {
    /// Classifies a remote failure into the local taxonomy.
    pub fn from_remote(err: RemoteError) -> Self {
        if err.is_network() {
            LostFoundError::RemoteUnavailable(err.message)
        } else if err.is_permission_denied() {
            LostFoundError::RemotePermissionDenied(err.message)
        } else {
            LostFoundError::Remote {
                code: err.code,
                message: err.message,
            }
        }
    }

    /// The backend code behind a remote failure, if any.
    pub fn remote_code(&self) -> Option<&str> {
        match self {
            LostFoundError::Remote { code, .. } => Some(code),
            LostFoundError::RemoteUnavailable(_) => Some(codes::UNAVAILABLE),
            LostFoundError::RemotePermissionDenied(_) => Some(codes::PERMISSION_DENIED),
            _ => None,
        }
    }

    pub fn is_network_error(&self) -> bool {
        matches!(self, LostFoundError::RemoteUnavailable(_))
    }

    pub fn is_permission_error(&self) -> bool {
        matches!(
            self,
            LostFoundError::RemotePermissionDenied(_) | LostFoundError::Unauthorized(_)
        )
    }

    /// Human-readable text for display, taken from the fixed message table.
    pub fn user_message(&self) -> String {
        match self {
            LostFoundError::Validation(msg) => msg.clone(),
            LostFoundError::Unauthenticated => messages::UNAUTHENTICATED.to_string(),
            LostFoundError::Unauthorized(_) => messages::ITEM_UNAUTHORIZED.to_string(),
            LostFoundError::NotFound(_) => messages::ITEM_NOT_FOUND.to_string(),
            LostFoundError::RemoteUnavailable(_) => messages::NETWORK.to_string(),
            LostFoundError::RemotePermissionDenied(_) => messages::PERMISSION_DENIED.to_string(),
            LostFoundError::Image(_) => messages::UPLOAD_FAILED.to_string(),
            LostFoundError::Config(_) => messages::UNKNOWN.to_string(),
            LostFoundError::Remote { code, message } => match code.as_str() {
                codes::AUTH_USER_NOT_FOUND => messages::USER_NOT_FOUND.to_string(),
                codes::AUTH_WRONG_PASSWORD | codes::AUTH_INVALID_CREDENTIAL => {
                    messages::INVALID_CREDENTIALS.to_string()
                }
                codes::AUTH_EMAIL_IN_USE => messages::EMAIL_IN_USE.to_string(),
                codes::AUTH_WEAK_PASSWORD => messages::WEAK_PASSWORD.to_string(),
                codes::AUTH_REQUIRES_RECENT_LOGIN => messages::REQUIRES_RECENT_LOGIN.to_string(),
                codes::STORAGE_CANCELED => "Upload was canceled.".to_string(),
                codes::STORAGE_UNKNOWN => messages::UPLOAD_FAILED.to_string(),
                _ if !message.is_empty() => message.clone(),
                _ => messages::UNKNOWN.to_string(),
            },
        }
    }
}

impl From<RemoteError> for LostFoundError {
    fn from(err: RemoteError) -> Self {
        LostFoundError::from_remote(err)
    }
}

impl From<serde_json::Error> for LostFoundError {
    fn from(err: serde_json::Error) -> Self {
        LostFoundError::Remote {
            code: codes::INVALID_ARGUMENT.to_string(),
            message: err.to_string(),
        }
    }
}

// Utility functions for error handling
pub fn validation_error<T: fmt::Display>(message: T) -> LostFoundError {
    LostFoundError::Validation(message.to_string())
}

pub fn config_error<T: fmt::Display>(message: T) -> LostFoundError {
    LostFoundError::Config(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_errors_are_classified_by_code() {
        assert_eq!(
            LostFoundError::from_remote(RemoteError::unavailable("offline")),
            LostFoundError::RemoteUnavailable("offline".to_string())
        );
        assert_eq!(
            LostFoundError::from_remote(RemoteError::new(codes::AUTH_NETWORK, "dns")),
            LostFoundError::RemoteUnavailable("dns".to_string())
        );
        assert_eq!(
            LostFoundError::from_remote(RemoteError::permission_denied("rules")),
            LostFoundError::RemotePermissionDenied("rules".to_string())
        );
        assert_eq!(
            LostFoundError::from_remote(RemoteError::already_exists("dup")),
            LostFoundError::Remote {
                code: codes::ALREADY_EXISTS.to_string(),
                message: "dup".to_string()
            }
        );
    }

    #[test]
    fn test_user_messages_come_from_the_table() {
        let wrong_password: LostFoundError =
            RemoteError::new(codes::AUTH_WRONG_PASSWORD, "INVALID_PASSWORD").into();
        assert_eq!(wrong_password.user_message(), messages::INVALID_CREDENTIALS);

        let in_use: LostFoundError = RemoteError::new(codes::AUTH_EMAIL_IN_USE, "EMAIL_EXISTS").into();
        assert_eq!(in_use.user_message(), messages::EMAIL_IN_USE);

        assert_eq!(
            LostFoundError::Unauthorized("item-1".into()).user_message(),
            messages::ITEM_UNAUTHORIZED
        );
        assert_eq!(
            LostFoundError::RemoteUnavailable("x".into()).user_message(),
            messages::NETWORK
        );
        assert_eq!(
            LostFoundError::Remote {
                code: codes::UNKNOWN.into(),
                message: String::new()
            }
            .user_message(),
            messages::UNKNOWN
        );
    }

    #[test]
    fn test_permission_errors() {
        assert!(LostFoundError::from_remote(RemoteError::permission_denied("rules")).is_permission_error());
        assert!(LostFoundError::Unauthorized("item-1".into()).is_permission_error());
        assert!(!LostFoundError::NotFound("item-1".into()).is_permission_error());
        assert!(!LostFoundError::RemoteUnavailable("x".into()).is_permission_error());
    }

    #[test]
    fn test_credential_rejections() {
        assert!(RemoteError::new(codes::AUTH_INVALID_CREDENTIAL, "").is_credential_rejection());
        assert!(RemoteError::new(codes::AUTH_USER_NOT_FOUND, "").is_credential_rejection());
        assert!(!RemoteError::new(codes::AUTH_NETWORK, "").is_credential_rejection());
        assert!(!RemoteError::unavailable("").is_credential_rejection());
    }
}
