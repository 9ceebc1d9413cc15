//! # Wabatar
//!
//! Monitoring and control for environmental life-support units attached over a serial line.
//!
//! The device speaks an ad-hoc, line-oriented text protocol: it streams six-value data-log lines,
//! reports setpoints as `SP<id>=<value>`, and echoes the commands it accepts. It also falls over if
//! it is sent more than one command at a time. This crate frames and classifies that stream, keeps
//! the outbound side to a single outstanding command, and hands the resulting state to pluggable
//! observers and to the network APIs.
//!
//! ## Quick Start
//!
//! ```rust
//! use wabatar::session::Session;
//! use wabatar::transport::RecordingTransport;
//!
//! let mut session = Session::new("avatar", RecordingTransport::new(), 0);
//! session.connection_made();
//!
//! // Only the first command of the handshake is on the wire.
//! assert_eq!(session.transport().written_lines(), vec!["DE=7"]);
//!
//! session.data_received_at(b"DE0=7-\r\nSP0=21.5\r\n", 1000);
//! assert_eq!(session.status().setpoints.values[0], 21.5);
//! ```
//!
//! ## Architecture
//!
//! - [`framer`] - `\r\n` line framing over the raw byte stream
//! - [`protocol`] - Message classification and outbound command formatting
//! - [`setpoints`] - Setpoint state and the change-gated merge
//! - [`queue`] - Single-outstanding-command queue
//! - [`session`] - Per-device state, handshake and status snapshots
//! - [`observer`] - Status observer contract
//! - [`transport`] - Write side of the serial link
//! - [`reactor`] - Tokio task driving one serial port
//! - [`api`] - Line-delimited JSON status/control server
//! - [`http`] - `/v1/status` and `/v1/setpoint` for the web dashboard
//! - [`datalog`] - CSV history of status notifications
//! - [`forwarder`] - Telemetry relay to a remote collector
//! - [`config`] - JSON configuration file

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::new_without_default)]

pub mod api;
pub mod config;
pub mod datalog;
pub mod forwarder;
pub mod framer;
pub mod http;
pub mod observer;
pub mod protocol;
pub mod queue;
pub mod reactor;
pub mod session;
pub mod setpoints;
pub mod transport;

// Re-export main public types for convenience
pub use config::Config;
pub use protocol::{DeviceMessage, OutboundCommand, SensorReading, SetpointId};
pub use session::{DeviceStatus, Session, SessionError};
pub use transport::{ChannelTransport, RecordingTransport, Transport};
