use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed event frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown event: {0}")]
    UnknownEvent(String),
}
