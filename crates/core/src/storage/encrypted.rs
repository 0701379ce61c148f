//! Encrypting decorator over the file backend.
//!
//! Payloads are encrypted just before the file write and decrypted after the
//! read. A cipher failure on write turns into an absent payload, which the
//! file backend skips; on read it turns into an absent result.

use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use super::cipher::RecordCipher;
use super::file::FileBackend;
use super::{PayloadSupplier, RecordKey, SaveOutcome, StorageBackend};

pub const TAG: &str = "EFPTDS";

#[derive(Clone, Debug)]
pub struct EncryptedBackend {
    files: FileBackend,
    cipher: Arc<RecordCipher>,
}

impl EncryptedBackend {
    pub fn new(files: FileBackend, cipher: RecordCipher) -> Self {
        Self { files, cipher: Arc::new(cipher) }
    }

    /// Wrapped file backend.
    pub fn files(&self) -> &FileBackend {
        &self.files
    }
}

fn decrypt_payload(cipher: &RecordCipher, key: RecordKey, blob: Option<Vec<u8>>) -> Option<Vec<u8>> {
    let blob = blob?;
    match cipher.decrypt(&blob) {
        Ok(plain) => Some(plain),
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Decrypting record failed");
            None
        }
    }
}

impl StorageBackend for EncryptedBackend {
    fn save(&self, key: RecordKey, payload: PayloadSupplier) -> BoxFuture<'static, SaveOutcome> {
        let cipher = Arc::clone(&self.cipher);
        let encrypting: PayloadSupplier = Box::new(move || {
            let plain = payload()?;
            if plain.is_empty() {
                return None;
            }
            match cipher.encrypt(&plain) {
                Ok(blob) => Some(blob),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Encrypting record failed; not saved");
                    None
                }
            }
        });
        self.files.save_tagged(TAG, key, encrypting)
    }

    fn restore(&self, key: RecordKey) -> BoxFuture<'static, Option<Vec<u8>>> {
        let cipher = Arc::clone(&self.cipher);
        self.files
            .restore_tagged(TAG, key)
            .map(move |blob| decrypt_payload(&cipher, key, blob))
            .boxed()
    }

    fn restore_blocking(&self, key: RecordKey) -> Option<Vec<u8>> {
        decrypt_payload(&self.cipher, key, self.files.restore_blocking_tagged(TAG, key))
    }

    fn delete(&self, key: RecordKey) -> BoxFuture<'static, ()> {
        self.files.delete_tagged(TAG, key)
    }

    fn tag(&self) -> &'static str {
        TAG
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(dir: &std::path::Path) -> EncryptedBackend {
        EncryptedBackend::new(FileBackend::new(dir), RecordCipher::new(None))
    }

    #[tokio::test]
    async fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let key = RecordKey::new(1, "ECPTD");

        let outcome = backend.save(key, Box::new(|| Some(b"incognito tab".to_vec()))).await;
        assert_eq!(outcome, SaveOutcome::Written);
        assert_eq!(backend.restore(key).await, Some(b"incognito tab".to_vec()));
        assert_eq!(backend.restore_blocking(key), Some(b"incognito tab".to_vec()));
    }

    #[tokio::test]
    async fn test_file_holds_ciphertext() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let key = RecordKey::new(2, "ECPTD");

        backend.save(key, Box::new(|| Some(b"plaintext".to_vec()))).await;
        let on_disk = std::fs::read(backend.files().path_for(key)).unwrap();
        assert!(!on_disk.windows(b"plaintext".len()).any(|w| w == b"plaintext"));
    }

    #[tokio::test]
    async fn test_corrupted_file_restores_absent() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let key = RecordKey::new(3, "ECPTD");

        backend.save(key, Box::new(|| Some(b"data".to_vec()))).await;
        let path = backend.files().path_for(key);
        let mut blob = std::fs::read(&path).unwrap();
        blob[14] ^= 0x55;
        std::fs::write(&path, blob).unwrap();

        assert!(backend.restore(key).await.is_none());
    }

    #[tokio::test]
    async fn test_empty_payload_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let key = RecordKey::new(4, "ECPTD");

        assert_eq!(backend.save(key, Box::new(|| Some(Vec::new()))).await, SaveOutcome::Skipped);
        assert!(!backend.files().path_for(key).exists());
    }

    /// Collects formatted events written by a test subscriber.
    #[derive(Clone, Default)]
    struct Captured(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_metrics_report_encrypted_tag() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let captured = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer({
                let captured = captured.clone();
                move || captured.clone()
            })
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            assert!(backend.restore_blocking(RecordKey::new(6, "ECPTD")).is_none());
        });

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let tags: Vec<String> = output
            .lines()
            .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
            .filter(|event| event["target"] == crate::storage::metrics::METRICS_TARGET)
            .filter_map(|event| event["fields"]["backend"].as_str().map(str::to_string))
            .collect();
        assert_eq!(tags, [TAG]);
    }

    #[tokio::test]
    async fn test_delete() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let key = RecordKey::new(5, "ECPTD");

        backend.save(key, Box::new(|| Some(b"x".to_vec()))).await;
        backend.delete(key).await;
        assert!(backend.restore(key).await.is_none());
    }
}
