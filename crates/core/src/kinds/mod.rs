//! Concrete record kinds.
//!
//! Every kind encodes to JSON. Setters live on `Record<Kind>` so each
//! mutation goes through [`Record::update`](crate::record::Record::update)
//! and is persisted.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::Error;
use crate::record::RecordData;

pub mod critical;
pub mod mock;
pub mod shopping;
pub mod store_hours;

pub use critical::{CriticalData, LaunchType, UserAgentType};
pub use mock::MockData;
pub use shopping::ShoppingData;
pub use store_hours::{OpenInterval, StoreHoursData};

pub(crate) fn encode_json<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    Ok(serde_json::to_vec(value)?)
}

pub(crate) fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Error> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Decode stored bytes of kind `D` and render them as JSON.
pub fn describe<D: RecordData + Serialize>(bytes: &[u8]) -> Result<serde_json::Value, Error> {
    let data = D::decode(bytes)?;
    Ok(serde_json::to_value(&data)?)
}
