//! Namespaced entry CRUD operations.

use super::connection::KvStore;
use crate::Error;
use crate::storage::evaluate_payload;
use crate::storage::{PayloadSupplier, SaveOutcome};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

impl KvStore {
    /// Insert or replace an entry.
    ///
    /// The payload supplier runs on the connection thread. An absent or empty
    /// payload writes nothing and reports `Skipped`.
    pub async fn put_entry(&self, namespace: &str, key: &str, payload: PayloadSupplier) -> Result<SaveOutcome, Error> {
        let namespace = namespace.to_string();
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<SaveOutcome, Error> {
                let value = match evaluate_payload(payload) {
                    Ok(Some(value)) => value,
                    Ok(None) => return Ok(SaveOutcome::Skipped),
                    Err(()) => return Err(Error::Codec("payload supplier panicked".into())),
                };
                conn.execute(
                    "INSERT INTO entries (namespace, key, value, updated_at)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(namespace, key) DO UPDATE SET
                        value = excluded.value,
                        updated_at = excluded.updated_at",
                    params![namespace, key, value, chrono::Utc::now().to_rfc3339()],
                )?;
                Ok(SaveOutcome::Written)
            })
            .await
            .map_err(Error::from)
    }

    /// Get an entry's value.
    ///
    /// Returns None if the key doesn't exist in the namespace.
    pub async fn get_entry(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, Error> {
        let namespace = namespace.to_string();
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<Option<Vec<u8>>, Error> {
                let mut stmt = conn.prepare("SELECT value FROM entries WHERE namespace = ?1 AND key = ?2")?;

                match stmt.query_row(params![namespace, key], |row| row.get(0)) {
                    Ok(value) => Ok(Some(value)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Delete an entry.
    ///
    /// Returns the number of deleted entries (0 or 1).
    pub async fn delete_entry(&self, namespace: &str, key: &str) -> Result<u64, Error> {
        let namespace = namespace.to_string();
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute(
                    "DELETE FROM entries WHERE namespace = ?1 AND key = ?2",
                    params![namespace, key],
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}
