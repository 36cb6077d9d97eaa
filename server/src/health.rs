//! Startup check that the configured storage credentials work.

use tracing::{error, warn};

use crate::notify::storage::{S3Storage, StorageError};

/// `HeadBucket` against the configured bucket. A rejection is returned as an
/// error only when `require` is set; otherwise it is logged and startup
/// continues.
pub async fn verify_credentials(storage: &S3Storage, require: bool) -> Result<(), StorageError> {
    enforce(storage.check_access().await, require, storage.bucket())
}

fn enforce(
    result: Result<(), StorageError>,
    require: bool,
    bucket: &str,
) -> Result<(), StorageError> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if require => {
            error!(error = %e, bucket, "storage credentials rejected");
            Err(e)
        }
        Err(e) => {
            warn!(error = %e, bucket, "storage credentials rejected; uploads will fail");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected() -> Result<(), StorageError> {
        Err(StorageError::HeadBucket("403 Forbidden".into()))
    }

    #[test]
    fn required_rejection_is_fatal() {
        assert!(matches!(
            enforce(rejected(), true, "fire-detector"),
            Err(StorageError::HeadBucket(_))
        ));
    }

    #[test]
    fn optional_rejection_is_tolerated() {
        assert!(enforce(rejected(), false, "fire-detector").is_ok());
    }

    #[test]
    fn success_passes() {
        assert!(enforce(Ok(()), true, "fire-detector").is_ok());
    }
}
