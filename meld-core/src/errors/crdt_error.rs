/// Type-level validation rejections.
///
/// These fire before any state mutation or log append; a rejected
/// operation leaves the instance untouched.
#[derive(Debug, thiserror::Error)]
pub enum CrdtError {
    #[error("invalid operation for {kind}: {reason}")]
    InvalidOperation { kind: String, reason: String },

    #[error("invalid workflow transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("unknown vertex: {0}")]
    UnknownVertex(String),
}
