use crate::errors::MutationError;

/// Optimistic concurrency check: the caller must be editing the version that is stored.
pub fn check_version(stored: u64, supplied: u64) -> Result<(), MutationError> {
    if stored == supplied {
        Ok(())
    } else {
        Err(MutationError::StaleWriteConflict {
            current: stored,
            supplied,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_versions_pass() {
        assert!(check_version(3, 3).is_ok());
    }

    #[test]
    fn test_older_and_newer_versions_are_stale() {
        let err = check_version(4, 3).unwrap_err();
        assert!(matches!(err, MutationError::StaleWriteConflict { current: 4, supplied: 3 }));
        assert!(check_version(4, 5).is_err());
    }
}
