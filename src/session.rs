use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Span};

use crate::framer::LineFramer;
use crate::observer::{ObserverList, StatusObserver};
use crate::protocol::{classify, DeviceMessage, OutboundCommand, SensorReading, SetpointId};
use crate::queue::{CommandQueue, QueueStats};
use crate::setpoints::{merge, SetpointReport, SetpointSnapshot, SetpointState};
use crate::transport::Transport;

/// Point-in-time view of one device, as served to the API and to observers.
///
/// On the wire a device with no reading yet has `"sensors": {}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub name: String,
    #[serde(default, with = "optional_reading")]
    pub sensors: Option<SensorReading>,
    pub setpoints: SetpointSnapshot,
}

mod optional_reading {
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::protocol::SensorReading;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Wire {
        Reading(SensorReading),
        Empty {},
    }

    pub fn serialize<S: Serializer>(
        value: &Option<SensorReading>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(reading) => reading.serialize(serializer),
            None => serializer.serialize_map(Some(0))?.end(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<SensorReading>, D::Error> {
        Ok(match Option::<Wire>::deserialize(deserializer)? {
            Some(Wire::Reading(reading)) => Some(reading),
            Some(Wire::Empty {}) | None => None,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub lines_received: u32,
    pub sensor_updates: u32,
    pub setpoint_changes: u32,
    pub unrecognized_lines: u32,
    pub observer_failures: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum SessionError {
    #[error("unknown setpoint index {0}")]
    UnknownSetpoint(u8),
    #[error("setpoint value {0} is not a finite number")]
    InvalidValue(f64),
}

/// All protocol state for one connected device.
///
/// Owns the receive buffer, the latest sensor reading, the setpoint state and the command queue,
/// and is the only thing that writes to the transport. Every method runs to completion, so feeding
/// chunks one at a time from a single task is enough to keep the state consistent.
pub struct Session<T: Transport> {
    name: String,
    transport: T,
    framer: LineFramer,
    sensors: Option<SensorReading>,
    setpoints: SetpointState,
    queue: CommandQueue,
    observers: ObserverList,
    connected: bool,
    stats: SessionStats,
    span: Span,
}

impl<T: Transport> Session<T> {
    pub fn new(name: impl Into<String>, transport: T, current_time: u64) -> Self {
        let name = name.into();
        let span = info_span!("device", name = %name);
        Self {
            name,
            transport,
            framer: LineFramer::new(),
            sensors: None,
            setpoints: SetpointState::new(current_time),
            queue: CommandQueue::new(),
            observers: ObserverList::new(),
            connected: false,
            stats: SessionStats::default(),
            span,
        }
    }

    pub fn register_observer(&mut self, observer: Box<dyn StatusObserver>) {
        self.observers.register(observer);
    }

    /// Startup handshake: release RTS, turn on data logging, then ask for every setpoint.
    pub fn connection_made(&mut self) {
        let _enter = self.span.clone().entered();
        info!("Serial port connected");
        self.connected = true;

        self.transport.set_request_to_send(false);
        self.queue_command(OutboundCommand::enable_logging());
        self.poll_setpoints();
    }

    /// The link is gone. The session cannot recover from this; whoever owns it decides whether to
    /// reconnect or exit.
    pub fn connection_lost(&mut self, reason: Option<&std::io::Error>) {
        let _enter = self.span.clone().entered();
        match reason {
            Some(e) => error!("Serial port disconnected: {}", e),
            None => error!("Serial port disconnected"),
        }
        self.connected = false;
    }

    pub fn data_received(&mut self, data: &[u8]) {
        self.data_received_at(data, now_millis());
    }

    pub fn data_received_at(&mut self, data: &[u8], current_time: u64) {
        let _enter = self.span.clone().entered();

        let lines: Vec<String> = self.framer.feed(data).collect();
        for line in lines {
            self.handle_line(&line, current_time);
        }
    }

    pub fn write_setpoint(&mut self, index: u8, value: f64) -> Result<(), SessionError> {
        let id = SetpointId::from_index(index).ok_or(SessionError::UnknownSetpoint(index))?;
        if !value.is_finite() {
            return Err(SessionError::InvalidValue(value));
        }

        let _enter = self.span.clone().entered();
        self.queue_command(OutboundCommand::write_setpoint(id, value));
        Ok(())
    }

    pub fn poll_setpoints(&mut self) {
        let _enter = self.span.clone().entered();
        for id in SetpointId::ALL {
            self.queue_command(OutboundCommand::poll_setpoint(id));
        }
    }

    pub fn status(&self) -> DeviceStatus {
        DeviceStatus {
            name: self.name.clone(),
            sensors: self.sensors.clone(),
            setpoints: self.setpoints.snapshot(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn setpoints(&self) -> &SetpointState {
        &self.setpoints
    }

    pub fn pending_commands(&self) -> usize {
        self.queue.len()
    }

    pub fn in_flight(&self) -> Option<&OutboundCommand> {
        self.queue.in_flight()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn queue_command(&mut self, command: OutboundCommand) {
        self.queue.enqueue(command, &mut self.transport);
    }

    fn handle_line(&mut self, text: &str, current_time: u64) {
        debug!("Received text: {}", text);
        self.stats.lines_received = self.stats.lines_received.saturating_add(1);

        let message = classify(text, current_time);
        let acknowledges = message.is_acknowledgement();

        match message {
            DeviceMessage::SensorLine(reading) => {
                self.sensors = Some(reading);
                self.stats.sensor_updates = self.stats.sensor_updates.saturating_add(1);
                self.notify_observers();
            }
            DeviceMessage::SetpointReport { id, value } => {
                let merged = merge(
                    &self.setpoints,
                    SetpointReport {
                        timestamp: current_time,
                        id,
                        value,
                    },
                );
                if merged != self.setpoints {
                    info!("New setpoints: {:?}", merged.values);
                    self.setpoints = merged;
                    self.stats.setpoint_changes = self.stats.setpoint_changes.saturating_add(1);
                    self.notify_observers();
                }
            }
            DeviceMessage::CommandEcho => {}
            DeviceMessage::Unrecognized => {
                self.stats.unrecognized_lines = self.stats.unrecognized_lines.saturating_add(1);
                warn!("Could not recognize data from serial port, ignoring: {}", text);
            }
        }

        if acknowledges {
            self.queue.acknowledge(text, &mut self.transport);
        }
    }

    fn notify_observers(&mut self) {
        if self.observers.is_empty() {
            return;
        }
        let status = self.status();
        let failures = self.observers.notify(&status);
        self.stats.observer_failures = self
            .stats
            .observer_failures
            .saturating_add(failures as u32);
    }
}

impl<T: Transport> core::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("connected", &self.connected)
            .field("sensors", &self.sensors)
            .field("setpoints", &self.setpoints)
            .field("queue", &self.queue)
            .field("observers", &self.observers)
            .finish()
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
