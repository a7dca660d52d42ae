use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("empty query")]
    EmptyQuery,

    #[error("invalid metrics URL {0:?}")]
    InvalidUrl(String),

    #[error("metrics request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("metrics API error ({status}): {message}")]
    Status { status: u16, message: String },

    #[error("query failed ({kind}): {message}")]
    Query { kind: String, message: String },

    #[error("invalid query, {expected} expected but got {found}: {query}")]
    UnexpectedResult {
        expected: &'static str,
        found: &'static str,
        query: String,
    },

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("malformed sample value {0:?}")]
    SampleValue(String),
}
