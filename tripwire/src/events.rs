use crate::codec::CacheKey;
use crate::trigger::TriggerKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerEvent {
    Applied(TriggerAppliedEvent),
    Failed(TriggerFailedEvent),
}

impl TriggerEvent {
    pub fn query(&self) -> &str {
        match self {
            TriggerEvent::Applied(e) => &e.query,
            TriggerEvent::Failed(e) => &e.query,
        }
    }

    pub fn mutation(&self) -> &str {
        match self {
            TriggerEvent::Applied(e) => &e.mutation,
            TriggerEvent::Failed(e) => &e.mutation,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerAppliedEvent {
    pub query: String,
    pub mutation: String,
    pub kind: TriggerKind,
    pub keys: Vec<CacheKey>,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerFailedEvent {
    pub query: String,
    pub mutation: String,
    pub kind: TriggerKind,
    pub error: String,
    pub timestamp: u64,
}

/// Helper to get current timestamp in seconds since UNIX epoch
pub fn now_timestamp() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
