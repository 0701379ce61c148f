//! Opening hours of the store a tab points at.

use chrono::Weekday;
use serde::{Deserialize, Serialize};

use super::{decode_json, encode_json};
use crate::Error;
use crate::record::{Record, RecordData};
use crate::registry::RecordKind;

/// One opening window within a day, in minutes after local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenInterval {
    pub weekday: Weekday,
    pub open_minute: u16,
    pub close_minute: u16,
}

impl OpenInterval {
    pub fn contains(&self, weekday: Weekday, minute: u16) -> bool {
        self.weekday == weekday && (self.open_minute..self.close_minute).contains(&minute)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreHoursData {
    pub open_hours: Vec<OpenInterval>,
    pub time_zone: Option<String>,
    pub last_updated_ms: i64,
}

impl StoreHoursData {
    pub fn is_open_at(&self, weekday: Weekday, minute: u16) -> bool {
        self.open_hours.iter().any(|interval| interval.contains(weekday, minute))
    }
}

impl RecordData for StoreHoursData {
    const KIND: RecordKind = RecordKind::StoreHours;

    fn encode(&self) -> Result<Vec<u8>, Error> {
        encode_json(self)
    }

    fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let data: Self = decode_json(bytes)?;
        if let Some(bad) = data.open_hours.iter().find(|i| i.open_minute > i.close_minute || i.close_minute > 24 * 60) {
            return Err(Error::Codec(format!("invalid opening interval {bad:?}")));
        }
        Ok(data)
    }

    fn last_updated_ms(&self) -> i64 {
        self.last_updated_ms
    }

    fn set_last_updated_ms(&mut self, ms: i64) {
        self.last_updated_ms = ms;
    }

    fn is_save_worthy(&self) -> bool {
        !self.open_hours.is_empty()
    }
}

impl Record<StoreHoursData> {
    pub fn is_open_at(&self, weekday: Weekday, minute: u16) -> bool {
        self.with(|d| d.is_open_at(weekday, minute))
    }

    pub fn set_open_hours(&self, open_hours: Vec<OpenInterval>, time_zone: Option<String>) {
        self.update(|d| {
            d.open_hours = open_hours;
            d.time_zone = time_zone;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weekdays_nine_to_five() -> StoreHoursData {
        let open_hours = [Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri]
            .into_iter()
            .map(|weekday| OpenInterval { weekday, open_minute: 9 * 60, close_minute: 17 * 60 })
            .collect();
        StoreHoursData { open_hours, time_zone: Some("Europe/Berlin".into()), last_updated_ms: 5 }
    }

    #[test]
    fn test_is_open_at() {
        let hours = weekdays_nine_to_five();
        assert!(hours.is_open_at(Weekday::Mon, 9 * 60));
        assert!(!hours.is_open_at(Weekday::Mon, 17 * 60));
        assert!(!hours.is_open_at(Weekday::Sat, 12 * 60));
    }

    #[test]
    fn test_round_trip() {
        let hours = weekdays_nine_to_five();
        assert_eq!(StoreHoursData::decode(&hours.encode().unwrap()).unwrap(), hours);
    }

    #[test]
    fn test_invalid_interval_is_corrupt() {
        let hours = StoreHoursData {
            open_hours: vec![OpenInterval { weekday: Weekday::Sun, open_minute: 600, close_minute: 60 }],
            ..Default::default()
        };
        let bytes = serde_json::to_vec(&hours).unwrap();
        assert!(StoreHoursData::decode(&bytes).is_err());
    }

    #[test]
    fn test_empty_hours_not_save_worthy() {
        assert!(!StoreHoursData::default().is_save_worthy());
        assert!(weekdays_nine_to_five().is_save_worthy());
    }
}
