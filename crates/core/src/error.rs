//! Unified error types for tabdata.
//!
//! Storage problems never reach callers of the coordinator: backends log these
//! and report an absent payload instead. The variants exist so internal code
//! can use `?` and so logs carry a stable prefix.

use tokio_rusqlite::rusqlite;

/// Unified error type for the persisted record cache.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Key-value store operation failed.
    #[error("STORE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("STORE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// Key-value store was used after its profile was destroyed.
    #[error("STORE_ERROR: store for profile {0} is destroyed")]
    StoreDestroyed(String),

    /// File read, write or removal failed.
    #[error("IO_ERROR: {0}")]
    Io(#[from] std::io::Error),

    /// Payload could not be encoded or decoded.
    #[error("CODEC_ERROR: {0}")]
    Codec(String),

    /// Encryption or decryption failed.
    #[error("CIPHER_ERROR: {0}")]
    Cipher(String),

    /// Unknown record kind name.
    #[error("UNKNOWN_KIND: {0}")]
    UnknownKind(String),
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Codec(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Codec("unexpected end of input".to_string());
        assert!(err.to_string().contains("CODEC_ERROR"));
        assert!(err.to_string().contains("unexpected end of input"));
    }

    #[test]
    fn test_json_error_maps_to_codec() {
        let json_err = serde_json::from_slice::<serde_json::Value>(b"{\"a\":").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Codec(_)));
    }

    #[test]
    fn test_rusqlite_error_maps_to_database() {
        let err: Error = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, Error::Database(_)));
        assert!(err.to_string().starts_with("STORE_ERROR"));
    }
}
