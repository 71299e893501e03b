use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unparseable date: '{0}'")]
    UnparseableDate(String),
    #[error("invalid numeric value: '{0}'")]
    InvalidNumeric(String),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("sync resource {0} has not expired")]
    NotExpired(Uuid),

    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("failed to discontinue order: {0}")]
    OrderDiscontinue(String),
    #[error("store lock poisoned")]
    LockPoisoned,

    #[error("failed to create storage directory: {0}")]
    StorageDirCreation(std::io::Error),
    #[error("failed to write record file: {0}")]
    FileWrite(std::io::Error),
    #[error("failed to read record file: {0}")]
    FileRead(std::io::Error),
    #[error("failed to delete record file: {0}")]
    FileDelete(std::io::Error),
    #[error("failed to serialize record: {0}")]
    Serialization(serde_json::Error),
    #[error("failed to deserialize record: {0}")]
    Deserialization(serde_json::Error),

    #[error("FHIR error: {0}")]
    Fhir(#[from] fhir::FhirError),
    #[error("invalid text: {0}")]
    Text(#[from] sync_types::TextError),
}

impl SyncError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        SyncError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
