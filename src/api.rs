//! Status and control API.
//!
//! Clients connect over TCP and exchange one JSON document per line. `"Status"` returns a snapshot
//! of every device, sorted by name; `{"WriteSetpoint": {...}}` queues a setpoint write followed by
//! a fresh poll so the new value shows up once the device confirms it.
//!
//! The same operations are served over HTTP by [`crate::http`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

use crate::reactor::SharedSession;
use crate::session::{DeviceStatus, SessionError};
use crate::transport::Transport;

pub type DeviceRegistry<T> = BTreeMap<String, SharedSession<T>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ApiRequest {
    Status,
    WriteSetpoint { name: String, index: u8, value: f64 },
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApiResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statuses: Option<Vec<DeviceStatus>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ApiResponse {
    pub fn ok() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }

    pub fn statuses(statuses: Vec<DeviceStatus>) -> Self {
        Self {
            ok: true,
            statuses: Some(statuses),
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            statuses: None,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unknown device: {0}")]
    UnknownDevice(String),
    #[error("invalid setpoint: {0}")]
    Session(#[from] SessionError),
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] serde_json::Error),
}

pub async fn handle_request<T: Transport>(
    devices: &DeviceRegistry<T>,
    request: ApiRequest,
) -> Result<ApiResponse, ApiError> {
    match request {
        ApiRequest::Status => Ok(ApiResponse::statuses(collect_statuses(devices).await)),
        ApiRequest::WriteSetpoint { name, index, value } => {
            let session = devices
                .get(&name)
                .ok_or_else(|| ApiError::UnknownDevice(name.clone()))?;

            let mut session = session.lock().await;
            session.write_setpoint(index, value)?;
            session.poll_setpoints();
            info!("Setpoint {} on {} set to {}", index, name, value);
            Ok(ApiResponse::ok())
        }
    }
}

/// Every device's status, sorted by name.
pub async fn collect_statuses<T: Transport>(devices: &DeviceRegistry<T>) -> Vec<DeviceStatus> {
    let mut statuses = Vec::with_capacity(devices.len());
    for session in devices.values() {
        statuses.push(session.lock().await.status());
    }
    statuses
}

/// Parse and execute one request line. Failures become error responses.
pub async fn handle_line<T: Transport>(devices: &DeviceRegistry<T>, line: &str) -> ApiResponse {
    let result = match serde_json::from_str::<ApiRequest>(line) {
        Ok(request) => handle_request(devices, request).await,
        Err(e) => Err(ApiError::from(e)),
    };

    result.unwrap_or_else(|e| {
        warn!("Rejected API request: {}", e);
        ApiResponse::error(e.to_string())
    })
}

pub async fn serve<T>(listener: TcpListener, devices: Arc<DeviceRegistry<T>>) -> std::io::Result<()>
where
    T: Transport + Send + 'static,
{
    info!("API listening on {}", listener.local_addr()?);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("New client connected: {}", addr);
                let client_devices = Arc::clone(&devices);

                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, client_devices).await {
                        warn!("Client {} error: {}", addr, e);
                    }
                    info!("Client {} disconnected", addr);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_client<T: Transport>(
    stream: TcpStream,
    devices: Arc<DeviceRegistry<T>>,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);

    let mut line = String::new();
    loop {
        line.clear();
        if buf_reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = handle_line(&devices, trimmed).await;
        let response_json = serde_json::to_string(&response)?;
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }
}
