use thiserror::Error;

#[derive(Debug, Error)]
pub enum TidemarkError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    /// The store could not be reached at all (connection refused, pool
    /// exhausted or closed). Callers treat this as run-global.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TidemarkError {
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

pub type TidemarkResult<T> = Result<T, TidemarkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = TidemarkError::Config("DATABASE_URL is required but not set".into());
        assert_eq!(
            err.to_string(),
            "configuration error: DATABASE_URL is required but not set"
        );
    }

    #[test]
    fn only_unavailable_is_flagged() {
        assert!(TidemarkError::StoreUnavailable("refused".into()).is_store_unavailable());
        assert!(!TidemarkError::Database("syntax".into()).is_store_unavailable());
    }
}
