use tidemark_common::error::TidemarkError;

use crate::lifecycle::LifecycleError;

/// Failures that end a whole run rather than a single entity's walk.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    #[error("API rejected the credentials: {0}")]
    AuthFailure(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("daemon lifecycle: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(TidemarkError),

    #[error("signal handler setup: {0}")]
    Signal(#[from] std::io::Error),
}

impl From<TidemarkError> for HarvestError {
    fn from(e: TidemarkError) -> Self {
        match e {
            TidemarkError::StoreUnavailable(msg) => Self::StoreUnavailable(msg),
            TidemarkError::Config(msg) => Self::Config(msg),
            other => Self::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_store_stays_distinct_from_statement_errors() {
        let unavailable: HarvestError =
            TidemarkError::StoreUnavailable("connection reset".into()).into();
        assert!(matches!(unavailable, HarvestError::StoreUnavailable(_)));

        let statement: HarvestError = TidemarkError::Database("syntax".into()).into();
        assert!(matches!(statement, HarvestError::Store(_)));
    }
}
