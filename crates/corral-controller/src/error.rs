use miette::Diagnostic;
use thiserror::Error;

/// Controller error type for reconciliation and cluster API operations
#[derive(Error, Debug, Diagnostic)]
pub enum ControllerError {
    /// Object not found in the cluster or cache
    #[error("{kind} not found: {key}")]
    #[diagnostic(
        code(corral::controller::not_found),
        help("The object may already have been deleted. Not-found results are treated as satisfied by the reconciler")
    )]
    NotFound {
        #[allow(unused)]
        kind: String,
        #[allow(unused)]
        key: String,
    },

    /// Object already exists
    #[error("{kind} already exists: {key}")]
    #[diagnostic(
        code(corral::controller::already_exists),
        help("A previous reconciliation created this object. It will be observed through the cache on the next event")
    )]
    AlreadyExists {
        #[allow(unused)]
        kind: String,
        #[allow(unused)]
        key: String,
    },

    /// Optimistic concurrency conflict on update
    #[error("Conflict updating {kind} {key}: the object has been modified")]
    #[diagnostic(
        code(corral::controller::conflict),
        help("The object was changed concurrently. The key is requeued with backoff and reconciled against the fresh copy")
    )]
    Conflict {
        #[allow(unused)]
        kind: String,
        #[allow(unused)]
        key: String,
    },

    /// API server returned an unexpected status
    #[error("API request {method} {path} failed with status {status}: {message}")]
    #[diagnostic(
        code(corral::controller::api_error),
        help("Check the API server logs and that the controller's service account may access this resource")
    )]
    ApiError {
        #[allow(unused)]
        method: String,
        #[allow(unused)]
        path: String,
        #[allow(unused)]
        status: u16,
        #[allow(unused)]
        message: String,
    },

    /// Could not reach the API server
    #[error("API transport error: {message}")]
    #[diagnostic(
        code(corral::controller::transport_error),
        help("Verify the API server URL is reachable from the controller")
    )]
    TransportError {
        #[allow(unused)]
        message: String,
    },

    /// Initial cache synchronization did not complete
    #[error("Cache for {cache} did not sync: {reason}")]
    #[diagnostic(
        code(corral::controller::cache_sync_failed),
        help("The informer must complete one full list before workers start. Check API connectivity")
    )]
    CacheSyncFailed {
        #[allow(unused)]
        cache: String,
        #[allow(unused)]
        reason: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(corral::controller::invalid_config), help("{suggestion}"))]
    InvalidConfig {
        #[allow(unused)]
        message: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// Sync handler panicked
    #[error("Sync handler panicked while processing {key}: {message}")]
    #[diagnostic(
        code(corral::controller::handler_panicked),
        help("This is a bug in the reconciler. The worker survived and the key was retried")
    )]
    HandlerPanicked {
        #[allow(unused)]
        key: String,
        #[allow(unused)]
        message: String,
    },

    /// Core library error
    #[error(transparent)]
    #[diagnostic(transparent)]
    CoreError(#[from] corral_core::CorralError),
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, ControllerError>;

impl ControllerError {
    pub fn not_found(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            key: key.into(),
        }
    }

    pub fn already_exists(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            key: key.into(),
        }
    }

    pub fn conflict(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            key: key.into(),
        }
    }

    pub fn api_error(
        method: impl Into<String>,
        path: impl Into<String>,
        status: u16,
        message: impl Into<String>,
    ) -> Self {
        Self::ApiError {
            method: method.into(),
            path: path.into(),
            status,
            message: message.into(),
        }
    }

    pub fn transport_error(message: impl Into<String>) -> Self {
        Self::TransportError {
            message: message.into(),
        }
    }

    pub fn cache_sync_failed(cache: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CacheSyncFailed {
            cache: cache.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn handler_panicked(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HandlerPanicked {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
