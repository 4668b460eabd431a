use thiserror::Error;

use crate::validation::ValidationError;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    NotFound(&'static str),

    /// The object store failed or timed out.
    ///
    /// Only upload treats this as fatal, delete paths capture it instead.
    #[error("Object store error: {0}")]
    ObjectStore(String),

    #[error("Metadata repository error")]
    Repository(#[source] anyhow::Error),
}

impl LifecycleError {
    #[inline]
    pub fn repository(e: anyhow::Error) -> Self {
        Self::Repository(e)
    }

    #[inline]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::NotFound(_))
    }

    /// The internal detail for the error, this should only reach clients
    /// outside of production.
    pub fn detail(&self) -> String {
        match self {
            Self::Repository(e) => format!("{:#}", e),
            other => other.to_string(),
        }
    }
}

pub const IMAGE_NOT_FOUND: &str = "Image not found";
pub const ALBUM_NOT_FOUND: &str = "Album not found";
pub const OBJECT_MISSING: &str = "Image data is missing from storage";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_detail_includes_chain() {
        let err = LifecycleError::repository(anyhow::anyhow!("connection refused").context("insert failed"));
        assert_eq!(err.to_string(), "Metadata repository error");
        assert_eq!(err.detail(), "insert failed: connection refused");
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_client_errors() {
        assert!(LifecycleError::NotFound(IMAGE_NOT_FOUND).is_client_error());
        assert!(LifecycleError::from(ValidationError::TooManyTags).is_client_error());
        assert!(!LifecycleError::ObjectStore("timeout".into()).is_client_error());
    }
}
