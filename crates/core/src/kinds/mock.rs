//! Minimal record kind for exercising the cache.

use serde::{Deserialize, Serialize};

use super::{decode_json, encode_json};
use crate::Error;
use crate::record::{Record, RecordData};
use crate::registry::RecordKind;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockData {
    pub field: i32,
    pub last_updated_ms: i64,
}

impl RecordData for MockData {
    const KIND: RecordKind = RecordKind::Mock;

    fn encode(&self) -> Result<Vec<u8>, Error> {
        encode_json(self)
    }

    fn decode(bytes: &[u8]) -> Result<Self, Error> {
        decode_json(bytes)
    }

    fn last_updated_ms(&self) -> i64 {
        self.last_updated_ms
    }

    fn set_last_updated_ms(&mut self, ms: i64) {
        self.last_updated_ms = ms;
    }
}

impl Record<MockData> {
    pub fn field(&self) -> i32 {
        self.with(|d| d.field)
    }

    pub fn set_field(&self, field: i32) {
        self.update(|d| d.field = field);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let data = MockData { field: -4, last_updated_ms: 12 };
        assert_eq!(MockData::decode(&data.encode().unwrap()).unwrap(), data);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(MockData::decode(b"\x00\x01").is_err());
    }
}
