use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Operator configuration required by the delivery mode is absent
    #[error("{variable} manquant côté serveur.")]
    MissingConfig { variable: &'static str },

    /// Attachments exceed the configured ceiling
    #[error("Attachments exceed {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    /// The webhook answered with a non-success status
    #[error("Webhook responded with {status}")]
    Upstream { status: StatusCode, body: String },

    /// The request body is not a readable multipart form
    #[error("Failed to parse multipart data: {0}")]
    Multipart(#[from] multer::Error),

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },
}

/// Renders a byte count as whole mebibytes for the French size message.
fn mebibytes(bytes: u64) -> u64 {
    bytes / (1024 * 1024)
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::MissingConfig { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::Upstream { status, .. } => *status,
            Error::Multipart(e) => match e {
                multer::Error::StreamSizeExceeded { .. } | multer::Error::FieldSizeExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the plain-text body sent back to the submitting form
    pub fn user_message(&self) -> String {
        match self {
            Error::MissingConfig { .. } => self.to_string(),
            Error::PayloadTooLarge { limit } => {
                format!("Pièces jointes trop volumineuses (maximum {} Mo).", mebibytes(*limit))
            }
            Error::Upstream { body, .. } => {
                if body.is_empty() {
                    "Erreur Power Automate".to_string()
                } else {
                    body.clone()
                }
            }
            Error::Multipart(multer::Error::StreamSizeExceeded { limit }) => {
                format!("Requête trop volumineuse (maximum {} Mo).", mebibytes(*limit))
            }
            Error::Multipart(_) | Error::Internal { .. } => format!("Erreur serveur: {self:#}"),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Internal { .. } | Error::MissingConfig { .. } => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Upstream { status, .. } => {
                tracing::warn!(status = %status, "Webhook rejected submission");
            }
            Error::PayloadTooLarge { .. } | Error::Multipart(_) => {
                tracing::info!("Client error: {}", self);
            }
        }

        (self.status_code(), self.user_message()).into_response()
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
