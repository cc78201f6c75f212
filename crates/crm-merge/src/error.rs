use crm_store::StoreError;
use crm_types::{ContactId, TypeError};

/// Errors produced by the merge engine.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    /// Operator input was rejected before any write.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A value could not be parsed or did not fit its field.
    #[error(transparent)]
    Type(#[from] TypeError),

    /// The record store rejected a read or write.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The requested action is not allowed in the session's current state.
    #[error("cannot {action} while session is {status}")]
    InvalidState { action: &'static str, status: String },

    /// Another action on the same item is still in flight.
    #[error("item {0} is busy")]
    ItemBusy(String),

    /// A contact or collection item does not exist.
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    /// Another session already holds this duplicate.
    #[error("duplicate {0} is already claimed by another merge session")]
    DuplicateClaimed(ContactId),

    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),
}

impl MergeError {
    pub fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            id: id.into(),
        }
    }

    /// Whether the error was raised before touching the store.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Type(_))
    }
}

/// Result alias for merge operations.
pub type MergeResult<T> = Result<T, MergeError>;
