use bytes::{Bytes, BytesMut};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::framer::LINE_TERMINATOR;

// Sensor and setpoint positions as reported by the device.
pub const IDX_TEMPERATURE: usize = 0;
pub const IDX_CO2: usize = 2;
pub const IDX_O2: usize = 3;
pub const IDX_PRESSURE: usize = 4;
pub const IDX_RH: usize = 5;

pub const SENSOR_LEN: usize = 6;
pub const SETPOINT_LEN: usize = 6;

// A data-log line: six numeric fields, the second of which is always "00". Every field except the
// second may carry a single annotation character.
static DATA_LOG_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^([\d.]+)\S?\s+(00)\s+([\d.]+)\S?\s+",
        r"([\d.]+)\S?\s+([\d.]+)\S?\s+([\d.]+)\S?$"
    ))
    .expect("data-log pattern is valid")
});

static SETPOINT_REPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^SP([0234])=([\d.]+)\S?$").expect("setpoint pattern is valid"));

// DE0=7- is what the hardware actually echoes for DE=7.
static COMMAND_ECHO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:DE0?=7-|SP[0234])$").expect("echo pattern is valid"));

/// One of the four setpoints the device reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SetpointId {
    Temperature,
    Co2,
    O2,
    Pressure,
}

impl SetpointId {
    /// Poll order used on connect and by `poll_setpoints`.
    pub const ALL: [SetpointId; 4] = [
        SetpointId::Temperature,
        SetpointId::Co2,
        SetpointId::O2,
        SetpointId::Pressure,
    ];

    pub fn index(self) -> usize {
        match self {
            SetpointId::Temperature => IDX_TEMPERATURE,
            SetpointId::Co2 => IDX_CO2,
            SetpointId::O2 => IDX_O2,
            SetpointId::Pressure => IDX_PRESSURE,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|id| id.index() == usize::from(index))
    }
}

impl core::fmt::Display for SetpointId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.index())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    #[serde(rename = "time")]
    pub timestamp: u64,
    pub values: [f64; SENSOR_LEN],
}

impl SensorReading {
    pub fn temperature(&self) -> f64 {
        self.values[IDX_TEMPERATURE]
    }

    pub fn co2(&self) -> f64 {
        self.values[IDX_CO2]
    }

    pub fn o2(&self) -> f64 {
        self.values[IDX_O2]
    }

    pub fn pressure(&self) -> f64 {
        self.values[IDX_PRESSURE]
    }

    pub fn relative_humidity(&self) -> f64 {
        self.values[IDX_RH]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceMessage {
    SensorLine(SensorReading),
    SetpointReport { id: SetpointId, value: f64 },
    CommandEcho,
    Unrecognized,
}

impl DeviceMessage {
    /// Whether this message retires the command currently in flight.
    pub fn is_acknowledgement(&self) -> bool {
        matches!(
            self,
            DeviceMessage::SetpointReport { .. } | DeviceMessage::CommandEcho
        )
    }
}

/// Classify one trimmed line from the device.
///
/// Templates are tried in order (data-log line, setpoint report, command echo) against the whole
/// line. Numeric fields that match the shape but are not valid floats, such as `1.2.3`, make the
/// line unrecognized.
pub fn classify(text: &str, current_time: u64) -> DeviceMessage {
    if let Some(caps) = DATA_LOG_LINE.captures(text) {
        let mut values = [0.0; SENSOR_LEN];
        for (i, value) in values.iter_mut().enumerate() {
            match caps[i + 1].parse::<f64>() {
                Ok(v) => *value = v,
                Err(_) => return DeviceMessage::Unrecognized,
            }
        }
        return DeviceMessage::SensorLine(SensorReading {
            timestamp: current_time,
            values,
        });
    }

    if let Some(caps) = SETPOINT_REPORT.captures(text) {
        let id = caps[1]
            .parse::<u8>()
            .ok()
            .and_then(SetpointId::from_index);
        return match (id, caps[2].parse::<f64>()) {
            (Some(id), Ok(value)) => DeviceMessage::SetpointReport { id, value },
            _ => DeviceMessage::Unrecognized,
        };
    }

    if COMMAND_ECHO.is_match(text) {
        return DeviceMessage::CommandEcho;
    }

    DeviceMessage::Unrecognized
}

/// One line for the device, stored with its terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundCommand {
    line: String,
    bytes: Bytes,
}

impl OutboundCommand {
    pub fn new(line: impl Into<String>) -> Self {
        let line = line.into();
        let mut bytes = BytesMut::with_capacity(line.len() + LINE_TERMINATOR.len());
        bytes.extend_from_slice(line.as_bytes());
        bytes.extend_from_slice(LINE_TERMINATOR);
        Self {
            line,
            bytes: bytes.freeze(),
        }
    }

    /// `DE=7`: start emitting data-log lines.
    pub fn enable_logging() -> Self {
        Self::new("DE=7")
    }

    pub fn poll_setpoint(id: SetpointId) -> Self {
        Self::new(format!("SP{}", id))
    }

    /// `SP<id>=<value>`. The value is written in plain decimal and always carries a fractional
    /// part (`30.0`, not `30`), since the device cannot read exponents.
    pub fn write_setpoint(id: SetpointId, value: f64) -> Self {
        Self::new(format!("SP{}={}", id, decimal(value)))
    }

    /// The command text without terminator.
    pub fn line(&self) -> &str {
        &self.line
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

// `Display` for f64 never switches to exponent notation.
fn decimal(value: f64) -> String {
    let mut text = value.to_string();
    if !text.contains('.') {
        text.push_str(".0");
    }
    text
}

impl core::fmt::Display for OutboundCommand {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.line)
    }
}
