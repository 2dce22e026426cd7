use std::io;

use reqwest::StatusCode;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP {status}: {reason}")]
    Http { status: StatusCode, reason: String },
    #[error(transparent)]
    Network(#[from] reqwest::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("{}", .0.join("; "))]
    Validation(Vec<String>),
    #[error(transparent)]
    Auth(#[from] AuthFailure),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Config(String),
    #[error("an import is already running")]
    ImportInProgress,
    #[error("cancelled by user")]
    Cancelled,
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(vec![message.into()])
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Network(err) => err.status(),
            _ => None,
        }
    }

    /// Backend rejected the session; callers route this into the auth-failure path.
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self.status(),
            Some(StatusCode::UNAUTHORIZED) | Some(StatusCode::FORBIDDEN)
        ) || matches!(self, Self::Auth(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthFailure {
    #[error("no token provided")]
    MissingToken,
    #[error("invalid token format")]
    InvalidToken,
    #[error("token expired")]
    Expired,
    #[error("no refresh token available")]
    MissingRefreshToken,
    #[error("token refresh failed")]
    RefreshFailed,
    #[error("invalid state parameter")]
    StateMismatch,
    #[error("code verifier not found")]
    MissingVerifier,
    #[error("token exchange failed: {0}")]
    TokenExchange(String),
}
