use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use escrow_engine::EngineError;
use log::*;
use payment_providers::ProviderError;
use thiserror::Error;

const INTERNAL_ERROR_MESSAGE: &str = "An internal error occurred. Please try again later.";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("An error occurred on the backend of the server. {0}")]
    BackendError(String),
    #[error("Could not read request body: {0}")]
    InvalidRequestBody(String),
    #[error("Could not read request path: {0}")]
    InvalidRequestPath(String),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("Authentication Error. {0}")]
    AuthenticationError(#[from] AuthError),
    #[error("Webhook signature is invalid. {0}")]
    SignatureError(String),
    #[error("Insufficient Permissions. {0}")]
    InsufficientPermissions(String),
    #[error("{0}")]
    EngineError(#[from] EngineError),
    #[error("{0}")]
    ProviderError(#[from] ProviderError),
}

#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("No access token was provided.")]
    MissingToken,
    #[error("Access token is not in the correct format. {0}")]
    PoorlyFormattedToken(String),
    #[error("Access token is invalid. {0}")]
    ValidationError(String),
    #[error("Could not issue an access token. {0}")]
    CouldNotIssueToken(String),
}

/// The machine-readable error codes returned to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Unauthenticated,
    InvalidArgument,
    PermissionDenied,
    NotFound,
    FailedPrecondition,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::InvalidArgument => "invalid-argument",
            Self::PermissionDenied => "permission-denied",
            Self::NotFound => "not-found",
            Self::FailedPrecondition => "failed-precondition",
            Self::Internal => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::InvalidArgument => StatusCode::BAD_REQUEST,
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ServerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidRequestBody(_) | Self::InvalidRequestPath(_) => ErrorCode::InvalidArgument,
            Self::AuthenticationError(AuthError::CouldNotIssueToken(_)) => ErrorCode::Internal,
            Self::AuthenticationError(_) | Self::SignatureError(_) => ErrorCode::Unauthenticated,
            Self::InsufficientPermissions(_) => ErrorCode::PermissionDenied,
            Self::EngineError(e) => match e {
                EngineError::Validation(_) => ErrorCode::InvalidArgument,
                EngineError::PermissionDenied(_) => ErrorCode::PermissionDenied,
                EngineError::EscrowNotFound(_) |
                EngineError::BookingNotFound(_) |
                EngineError::PaymentNotFound(_) |
                EngineError::RefundNotFound(_) => ErrorCode::NotFound,
                EngineError::InvalidState { .. } |
                EngineError::FailedPrecondition(_) |
                EngineError::PaymentAlreadyExists(_) => ErrorCode::FailedPrecondition,
                EngineError::DatabaseError(_) => ErrorCode::Internal,
            },
            Self::ProviderError(e) => match e {
                ProviderError::UnknownMethod(_) | ProviderError::MalformedWebhook(_) => ErrorCode::InvalidArgument,
                ProviderError::NotConfigured(_) | ProviderError::Unsupported(_) => ErrorCode::FailedPrecondition,
                _ => ErrorCode::Internal,
            },
            Self::InitializeError(_) |
            Self::BackendError(_) |
            Self::IOError(_) |
            Self::ConfigurationError(_) => ErrorCode::Internal,
        }
    }

    /// The message shown to the client. Internal failures are logged in full and reported generically.
    pub fn public_message(&self) -> String {
        match self.code() {
            ErrorCode::Internal => INTERNAL_ERROR_MESSAGE.to_string(),
            _ => self.to_string(),
        }
    }
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        self.code().status_code()
    }

    fn error_response(&self) -> HttpResponse {
        let code = self.code();
        if code == ErrorCode::Internal {
            error!("💻️ Internal error while handling request. {self}");
        }
        HttpResponse::build(self.status_code()).insert_header(ContentType::json()).body(
            serde_json::json!({ "success": false, "code": code.as_str(), "error": self.public_message() }).to_string(),
        )
    }
}
