use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::protocol::{SetpointId, SETPOINT_LEN};

/// Setpoints as last reported by the device.
///
/// `timestamp` is the time of the last report that actually changed a value, not the time of the
/// last report. Polls that return what we already know leave it alone.
#[derive(Debug, Clone, PartialEq)]
pub struct SetpointState {
    pub timestamp: u64,
    pub values: BTreeMap<SetpointId, f64>,
}

/// A single `SP<id>=<value>` report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetpointReport {
    pub timestamp: u64,
    pub id: SetpointId,
    pub value: f64,
}

/// Setpoints laid out like a sensor reading, for consumers outside the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetpointSnapshot {
    #[serde(rename = "time")]
    pub timestamp: u64,
    pub values: [f64; SETPOINT_LEN],
}

impl SetpointState {
    pub fn new(timestamp: u64) -> Self {
        Self {
            timestamp,
            values: BTreeMap::new(),
        }
    }

    pub fn get(&self, id: SetpointId) -> Option<f64> {
        self.values.get(&id).copied()
    }

    /// Fixed-length projection; positions without a reported value are 0.
    pub fn snapshot(&self) -> SetpointSnapshot {
        let mut values = [0.0; SETPOINT_LEN];
        for (id, value) in &self.values {
            values[id.index()] = *value;
        }
        SetpointSnapshot {
            timestamp: self.timestamp,
            values,
        }
    }
}

/// Merge a report into `old`. Returns `old` untouched, timestamp included, when the report does not
/// change any value.
pub fn merge(old: &SetpointState, incoming: SetpointReport) -> SetpointState {
    let mut candidate = old.values.clone();
    candidate.insert(incoming.id, incoming.value);

    if candidate == old.values {
        return old.clone();
    }

    SetpointState {
        timestamp: incoming.timestamp,
        values: candidate,
    }
}
