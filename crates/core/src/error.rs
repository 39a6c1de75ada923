/// Errors raised while decoding lifecycle values coming from configuration or storage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// A lifetime duration string could not be parsed.
    #[error("invalid lifetime duration '{value}': {reason}")]
    InvalidDuration { value: String, reason: String },

    /// A stored status code does not map to any known variant.
    #[error("unknown {kind} code {code}")]
    UnknownCode { kind: &'static str, code: i64 },
}
