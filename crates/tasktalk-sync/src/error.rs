use tasktalk_types::models::ModelError;

/// Identity-provider failures. `Display` is the user-facing text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("This email is already registered. Please sign in instead.")]
    EmailAlreadyInUse,
    #[error("Password should be at least 6 characters.")]
    WeakPassword,
    #[error("Please enter a valid email address.")]
    InvalidEmail,
    #[error("No account found with this email. Please sign up first.")]
    UserNotFound,
    #[error("Incorrect password. Please try again.")]
    WrongPassword,
    #[error("Old password is incorrect!")]
    ReauthenticationFailed,
    #[error("Your session has expired. Please sign in again.")]
    InvalidToken,
}

impl AuthError {
    /// Provider error code, stable across message wording changes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmailAlreadyInUse => "auth/email-already-in-use",
            Self::WeakPassword => "auth/weak-password",
            Self::InvalidEmail => "auth/invalid-email",
            Self::UserNotFound => "auth/user-not-found",
            Self::WrongPassword => "auth/wrong-password",
            Self::ReauthenticationFailed => "auth/invalid-credential",
            Self::InvalidToken => "auth/id-token-expired",
        }
    }

    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl From<ModelError> for SyncError {
    fn from(e: ModelError) -> Self {
        Self::Validation(e.to_string())
    }
}

impl SyncError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
