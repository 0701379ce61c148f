//! State needed to restore a tab at startup.

use serde::{Deserialize, Serialize};

use super::{decode_json, encode_json};
use crate::Error;
use crate::record::{Record, RecordData};
use crate::registry::RecordKind;

/// Id meaning "no such tab".
pub const INVALID_TAB_ID: i32 = -1;

/// How the tab was opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchType {
    FromLink,
    FromExternalApp,
    FromChromeUi,
    FromRestore,
    FromLongpress,
    #[default]
    Unset,
}

/// User agent the tab requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserAgentType {
    Default,
    Mobile,
    Desktop,
    #[default]
    Unset,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticalData {
    pub parent_id: i32,
    pub root_id: i32,
    pub timestamp_millis: i64,
    /// Serialized navigation history.
    #[serde(with = "hex_bytes")]
    pub web_contents_state: Vec<u8>,
    pub content_state_version: i32,
    pub opener_app_id: Option<String>,
    pub theme_color: Option<u32>,
    pub launch_type: LaunchType,
    pub url: Option<String>,
    pub title: Option<String>,
    pub user_agent: UserAgentType,
    pub last_updated_ms: i64,
}

impl Default for CriticalData {
    fn default() -> Self {
        Self {
            parent_id: INVALID_TAB_ID,
            root_id: INVALID_TAB_ID,
            timestamp_millis: 0,
            web_contents_state: Vec::new(),
            content_state_version: 0,
            opener_app_id: None,
            theme_color: None,
            launch_type: LaunchType::default(),
            url: None,
            title: None,
            user_agent: UserAgentType::default(),
            last_updated_ms: 0,
        }
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

impl RecordData for CriticalData {
    const KIND: RecordKind = RecordKind::Critical;

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

impl Record<CriticalData> {
    pub fn url(&self) -> Option<String> {
        self.with(|d| d.url.clone())
    }

    pub fn set_url(&self, url: impl Into<String>) {
        let url = url.into();
        self.update(|d| d.url = Some(url));
    }

    pub fn set_title(&self, title: impl Into<String>) {
        let title = title.into();
        self.update(|d| d.title = Some(title));
    }

    pub fn set_parent_id(&self, parent_id: i32) {
        self.update(|d| d.parent_id = parent_id);
    }

    pub fn set_root_id(&self, root_id: i32) {
        self.update(|d| d.root_id = root_id);
    }

    pub fn set_timestamp_millis(&self, timestamp_millis: i64) {
        self.update(|d| d.timestamp_millis = timestamp_millis);
    }

    pub fn set_web_contents_state(&self, state: Vec<u8>, version: i32) {
        self.update(|d| {
            d.web_contents_state = state;
            d.content_state_version = version;
        });
    }

    pub fn set_opener_app_id(&self, app_id: Option<String>) {
        self.update(|d| d.opener_app_id = app_id);
    }

    pub fn set_theme_color(&self, color: Option<u32>) {
        self.update(|d| d.theme_color = color);
    }

    pub fn set_launch_type(&self, launch_type: LaunchType) {
        self.update(|d| d.launch_type = launch_type);
    }

    pub fn set_user_agent(&self, user_agent: UserAgentType) {
        self.update(|d| d.user_agent = user_agent);
    }
}
