/// Registry-level errors: instance naming and snapshot framing.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("instance {name} already registered as {existing}, requested {requested}")]
    AlreadyRegistered {
        name: String,
        existing: String,
        requested: String,
    },

    #[error("unknown instance: {0}")]
    UnknownInstance(String),

    #[error("kind mismatch for {name}: expected {expected}, found {found}")]
    KindMismatch {
        name: String,
        expected: String,
        found: String,
    },

    #[error("malformed snapshot: {reason}")]
    SnapshotFormat { reason: String },

    #[error("unsupported snapshot schema version {found}, supported up to {supported}")]
    UnsupportedSchemaVersion { found: u32, supported: u32 },
}
