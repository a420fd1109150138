/// Errors surfaced by the chart query capability. A failed query marks the
/// rule with `DbError` and turns its value into NaN; it never aborts the
/// evaluation loop.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// The backing store replied with a non-success status code.
    #[error("health: chart query returned status {0}")]
    Status(u16),

    /// The backing store failed outright.
    #[error("health: chart query failed: {0}")]
    Backend(String),
}

/// Error text produced by the external expression evaluator.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct ExpressionError(pub String);

/// Errors loading the silencers ruleset file. The engine logs these and
/// continues with an empty ruleset.
#[derive(Debug, thiserror::Error)]
pub enum SilencersError {
    #[error("health: cannot read silencers file: {0}")]
    Io(#[from] std::io::Error),

    /// The file is empty or larger than the configured bound.
    #[error("health: silencers file size {size} is out of range [1, {max}]")]
    OutOfRange { size: u64, max: u64 },

    #[error("health: malformed silencers file: {0}")]
    Malformed(#[from] serde_json::Error),
}
