use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A rate-limited remote capability.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    Chat,
    Speech,
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Chat => "chat",
            Endpoint::Speech => "speech",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RateLimited,
    TransientNetwork,
    AuthFailure,
    MalformedRequest,
    /// The consumer of a streaming call went away.
    Cancelled,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::RateLimited | ErrorKind::TransientNetwork)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::RateLimited => "rate limited",
            ErrorKind::TransientNetwork => "transient network failure",
            ErrorKind::AuthFailure => "authentication failure",
            ErrorKind::MalformedRequest => "malformed request",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
#[error("{kind} during {} on {} endpoint (model {}): {message}",
    .operation.unwrap_or("request"),
    .endpoint.map(|e| e.as_str()).unwrap_or("unknown"),
    .model.as_deref().unwrap_or("-"))]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    pub endpoint: Option<Endpoint>,
    pub model: Option<String>,
    pub operation: Option<&'static str>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            endpoint: None,
            model: None,
            operation: None,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransientNetwork, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthFailure, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedRequest, message)
    }

    /// Fills in whatever call context the error does not carry yet.
    pub fn with_context(
        mut self,
        endpoint: Endpoint,
        model: &str,
        operation: &'static str,
    ) -> Self {
        self.endpoint.get_or_insert(endpoint);
        if self.model.is_none() {
            self.model = Some(model.to_string());
        }
        self.operation.get_or_insert(operation);
        self
    }

    /// Maps an HTTP status to the error kind it implies.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = format!("HTTP {}: {}", status, body);
        match status.as_u16() {
            429 => Self::rate_limited(message),
            401 | 403 => Self::auth(message),
            408 => Self::transient(message),
            s if s >= 500 => Self::transient(message),
            _ => Self::malformed(message),
        }
    }

    /// Maps a MiniMax `base_resp.status_code` to an error, `None` for success.
    pub fn from_base_resp(code: i64, msg: &str) -> Option<Self> {
        let message = format!("status {}: {}", code, msg);
        match code {
            0 => None,
            1002 | 1039 => Some(Self::rate_limited(message)),
            1004 | 1008 => Some(Self::auth(message)),
            1000 | 1001 | 1024 | 1033 => Some(Self::transient(message)),
            _ => Some(Self::malformed(message)),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return Self::from_status(status, &e.to_string());
        }
        if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
            Self::transient(e.to_string())
        } else if e.is_decode() {
            Self::malformed(format!("undecodable response: {}", e))
        } else {
            Self::transient(e.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("missing audio artifact for segment {index}: {}", .path.display())]
    MissingArtifact { index: usize, path: PathBuf },

    #[error("manifest has no entries to assemble")]
    EmptyManifest,

    #[error("audio format mismatch in {}: {reason}", .path.display())]
    FormatMismatch { path: PathBuf, reason: String },

    #[error("invalid audio in {}: {reason}", .path.display())]
    InvalidAudio { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        use reqwest::StatusCode;
        let kind = |status| ApiError::from_status(status, "").kind;
        assert_eq!(kind(StatusCode::TOO_MANY_REQUESTS), ErrorKind::RateLimited);
        assert_eq!(kind(StatusCode::UNAUTHORIZED), ErrorKind::AuthFailure);
        assert_eq!(kind(StatusCode::BAD_REQUEST), ErrorKind::MalformedRequest);
        assert_eq!(kind(StatusCode::BAD_GATEWAY), ErrorKind::TransientNetwork);
    }

    #[test]
    fn test_base_resp_classification() {
        assert!(ApiError::from_base_resp(0, "success").is_none());
        assert_eq!(ApiError::from_base_resp(1002, "rpm").unwrap().kind, ErrorKind::RateLimited);
        assert_eq!(ApiError::from_base_resp(1004, "auth").unwrap().kind, ErrorKind::AuthFailure);
        let kind = |code| ApiError::from_base_resp(code, "params").map(|e| e.kind);
        assert_eq!(kind(2013), Some(ErrorKind::MalformedRequest));
        assert_eq!(kind(1001), Some(ErrorKind::TransientNetwork));
    }

    #[test]
    fn test_context_is_kept_once_set() {
        let err = ApiError::transient("reset by peer")
            .with_context(Endpoint::Speech, "speech-02-hd", "synthesize")
            .with_context(Endpoint::Chat, "other", "other");
        assert_eq!(err.endpoint, Some(Endpoint::Speech));
        assert_eq!(err.model.as_deref(), Some("speech-02-hd"));
        let text = err.to_string();
        assert!(text.contains("synthesize"));
        assert!(text.contains("speech endpoint"));
        assert!(!ErrorKind::AuthFailure.is_retryable());
        assert!(ErrorKind::TransientNetwork.is_retryable());
    }
}
