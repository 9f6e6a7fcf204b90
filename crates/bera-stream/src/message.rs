//! Wire frames pushed to live subscribers.
//!
//! One JSON text frame per event:
//! `{"type":"log","data":{"appId":..,"source":..,"content":..,"timestamp":..}}`

use bera_state::{LogEvent, LogSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamMessage {
    Log(LogPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogPayload {
    pub app_id: String,
    pub source: LogSource,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&LogEvent> for StreamMessage {
    fn from(event: &LogEvent) -> Self {
        StreamMessage::Log(LogPayload {
            app_id: event.app_id.clone(),
            source: event.source,
            content: event.content.clone(),
            timestamp: event.timestamp,
        })
    }
}

impl StreamMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
