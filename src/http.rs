#![forbid(unsafe_code)]

//! Normalizes outbound call results into one shape so each stage can branch
//! on the status code while still seeing the error body for diagnostics.

use std::fmt;
use thiserror::Error;

/// Sent with every outbound call.
pub const USER_AGENT: &str = "Mozilla/5.0";

/// Why a stage could not produce its result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StageError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("unexpected http status {code} {message}")]
    Status { code: u16, message: String },
    #[error("malformed response: {0}")]
    Parse(String),
}

impl StageError {
    pub fn status(response: &HttpResponse) -> Self {
        Self::Status {
            code: response.code,
            message: response.message.clone(),
        }
    }
}

impl From<serde_json::Error> for StageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub code: u16,
    pub message: String,
    pub body: String,
}

impl fmt::Display for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "code: {}, message: {}, body: {}",
            self.code, self.message, self.body
        )
    }
}

/// Reads status, status text and body from an executed request. ureq hands
/// back statuses >= 400 as `Error::Status`; those carry the error body and are
/// returned like any other response. Only a request that never produced a
/// status is a transport failure.
pub fn read_response(
    result: Result<ureq::Response, ureq::Error>,
) -> Result<HttpResponse, StageError> {
    let response = match result {
        Ok(response) => response,
        Err(ureq::Error::Status(_, response)) => response,
        Err(ureq::Error::Transport(transport)) => {
            return Err(StageError::Transport(transport.to_string()));
        }
    };
    let code = response.status();
    let message = response.status_text().to_string();
    let body = response
        .into_string()
        .map_err(|err| StageError::Transport(format!("reading response body: {err}")))?;
    Ok(HttpResponse {
        code,
        message,
        body,
    })
}
