use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Chat session is not running")]
    SessionUnavailable,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::SessionUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Failures reported by a [`MailSender`](crate::mailer::MailSender).
#[derive(Debug, Error)]
pub enum MailError {
    #[error("Mail relay request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Mail relay rejected the message ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid mail address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("Failed to build mail: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("SMTP delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}
