//! Error taxonomy shared by every provider pipeline.
//!
//! Callers get exactly one of these per failed fetch. Record-level mapping
//! problems never show up here: the mapper skips the record and logs it.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum FeedError {
    /// Unknown logical column or out-of-range pagination input.
    /// Raised before any network call.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Network failure or non-success status from the provider.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The provider answered 2xx but the body could not be decoded
    /// (or exceeded the size cap).
    #[error("malformed upstream payload: {0}")]
    MalformedPayload(String),

    /// Caller deadline elapsed or the caller went away.
    #[error("request cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl FeedError {
    /// Stable machine-readable name, used in API error bodies and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            FeedError::InvalidQuery(_) => "invalid_query",
            FeedError::UpstreamUnavailable(_) => "upstream_unavailable",
            FeedError::MalformedPayload(_) => "malformed_upstream_payload",
            FeedError::Cancelled => "cancelled",
            FeedError::Internal(_) => "internal",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FeedError::Cancelled)
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        FeedError::UpstreamUnavailable(err.to_string())
    }

    pub(crate) fn from_decode(err: serde_json::Error) -> Self {
        FeedError::MalformedPayload(err.to_string())
    }
}

pub type FeedResult<T> = Result<T, FeedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_distinct() {
        let all = [
            FeedError::InvalidQuery("x".into()),
            FeedError::UpstreamUnavailable("x".into()),
            FeedError::MalformedPayload("x".into()),
            FeedError::Cancelled,
            FeedError::Internal("x".into()),
        ];
        let mut kinds: Vec<_> = all.iter().map(|e| e.kind()).collect();
        kinds.sort_unstable();
        kinds.dedup();
        assert_eq!(kinds.len(), all.len());
    }

    #[test]
    fn decode_errors_are_malformed_payloads() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        assert_eq!(FeedError::from_decode(err).kind(), "malformed_upstream_payload");
    }
}
