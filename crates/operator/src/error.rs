use fleet_kubehub::{ClientError, NamespaceError, SelectorError};
use fleet_store::StoreError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Selector(#[from] SelectorError),
    #[error(transparent)]
    Namespace(#[from] NamespaceError),
    #[error("invalid {kind} {key}: {message}")]
    Invalid { kind: &'static str, key: String, message: String },
}

impl Error {
    /// The object is gone; processing it again would not help.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Client(e) => e.is_not_found(),
            Error::Store(e) => e.is_not_found(),
            _ => false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Client(e) => e.is_retryable(),
            Error::Store(StoreError::NotSynced(_)) => true,
            Error::Store(StoreError::Client(e)) => e.is_retryable(),
            Error::Store(_) => false,
            Error::Selector(_) | Error::Namespace(_) | Error::Invalid { .. } => false,
        }
    }
}
