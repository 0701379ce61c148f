//! Price tracking data for a tab showing a product page.

use serde::{Deserialize, Serialize};

use super::{decode_json, encode_json};
use crate::Error;
use crate::record::{Record, RecordData, UNKNOWN_TIMESTAMP};
use crate::registry::RecordKind;

/// Price value meaning "no price known".
pub const NO_PRICE_KNOWN: i64 = -1;

const MICROS_PER_UNIT: i64 = 1_000_000;

/// Smallest absolute drop, in currency units, that counts as a price drop.
const MIN_DROP_UNITS: i64 = 2;

/// Smallest relative drop, in percent, that counts as a price drop.
const MIN_DROP_PERCENT: i64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShoppingData {
    pub price_micros: i64,
    pub previous_price_micros: i64,
    pub currency_code: Option<String>,
    pub main_offer_id: Option<String>,
    pub last_updated_ms: i64,
}

impl Default for ShoppingData {
    fn default() -> Self {
        Self {
            price_micros: NO_PRICE_KNOWN,
            previous_price_micros: NO_PRICE_KNOWN,
            currency_code: None,
            main_offer_id: None,
            last_updated_ms: UNKNOWN_TIMESTAMP,
        }
    }
}

/// A price drop worth showing to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceDrop {
    pub price_micros: i64,
    pub previous_price_micros: i64,
}

impl ShoppingData {
    pub fn has_price(&self) -> bool {
        self.price_micros != NO_PRICE_KNOWN
    }

    /// Record a newly observed price, keeping the old one as previous.
    pub fn observe_price(&mut self, price_micros: i64) {
        if self.has_price() && self.price_micros != price_micros {
            self.previous_price_micros = self.price_micros;
        }
        self.price_micros = price_micros;
    }

    /// Drop from the previous price, if it is large enough to surface.
    pub fn price_drop(&self) -> Option<PriceDrop> {
        if !self.has_price() || self.previous_price_micros == NO_PRICE_KNOWN {
            return None;
        }
        // Widened so decoded extremes cannot overflow.
        let previous = i128::from(self.previous_price_micros);
        let drop = previous - i128::from(self.price_micros);
        if drop < i128::from(MIN_DROP_UNITS) * i128::from(MICROS_PER_UNIT) {
            return None;
        }
        if drop * 100 < previous * i128::from(MIN_DROP_PERCENT) {
            return None;
        }
        Some(PriceDrop { price_micros: self.price_micros, previous_price_micros: self.previous_price_micros })
    }
}

impl RecordData for ShoppingData {
    const KIND: RecordKind = RecordKind::Shopping;

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

    fn is_save_worthy(&self) -> bool {
        self.has_price()
    }
}

impl Record<ShoppingData> {
    pub fn price_micros(&self) -> i64 {
        self.with(|d| d.price_micros)
    }

    pub fn price_drop(&self) -> Option<PriceDrop> {
        self.with(ShoppingData::price_drop)
    }

    pub fn set_price_micros(&self, price_micros: i64) {
        self.update(|d| d.observe_price(price_micros));
    }

    pub fn set_currency_code(&self, currency_code: impl Into<String>) {
        let currency_code = currency_code.into();
        self.update(|d| d.currency_code = Some(currency_code));
    }

    pub fn set_main_offer_id(&self, offer_id: impl Into<String>) {
        let offer_id = offer_id.into();
        self.update(|d| d.main_offer_id = Some(offer_id));
    }
}
