//! HTTP surface used by the web dashboard.
//!
//! - `GET /v1/status`: JSON array of every device's status, sorted by name.
//! - `POST /v1/setpoint`: body `{"name": .., "index": .., "value": ..}`; writes the setpoint and
//!   re-polls the device, answering `{"ok": true}`.
//!
//! `tiny_http` is blocking, so the server owns a plain thread and reaches the sessions through a
//! runtime [`Handle`].

use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tiny_http::{Header, Method, Request, Response, Server};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::api::{self, ApiError, ApiRequest, ApiResponse, DeviceRegistry};
use crate::transport::Transport;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("failed to bind HTTP server on {addr}: {message}")]
    Bind { addr: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetpointRequest {
    pub name: String,
    pub index: u8,
    pub value: f64,
}

pub struct HttpServer {
    server: Server,
}

impl HttpServer {
    pub fn bind(addr: &str) -> Result<Self, HttpError> {
        let server = Server::http(addr).map_err(|e| HttpError::Bind {
            addr: addr.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self { server })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    /// Serve until the listener shuts down. Must not be called from a runtime worker thread.
    pub fn run<T: Transport>(self, devices: Arc<DeviceRegistry<T>>, runtime: Handle) {
        if let Some(addr) = self.local_addr() {
            info!("HTTP API listening on {}", addr);
        }

        for request in self.server.incoming_requests() {
            respond(request, &devices, &runtime);
        }
    }
}

fn respond<T: Transport>(mut request: Request, devices: &DeviceRegistry<T>, runtime: &Handle) {
    let method = request.method().clone();
    let url = request.url().to_string();
    let path = url.split('?').next().unwrap_or_default();

    let (code, body) = match (&method, path) {
        (Method::Get, "/v1/status") => json(200, &runtime.block_on(api::collect_statuses(devices))),
        (Method::Post, "/v1/setpoint") => post_setpoint(&mut request, devices, runtime),
        _ => json(404, &ApiResponse::error(format!("no route for {} {}", method, path))),
    };
    debug!("{} {} -> {}", method, url, code);

    let mut response = Response::from_string(body).with_status_code(code);
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
        response.add_header(header);
    }
    if let Err(e) = request.respond(response) {
        warn!("Failed to answer {} {}: {}", method, url, e);
    }
}

fn post_setpoint<T: Transport>(
    request: &mut Request,
    devices: &DeviceRegistry<T>,
    runtime: &Handle,
) -> (u16, String) {
    let mut body = String::new();
    if let Err(e) = request.as_reader().read_to_string(&mut body) {
        return json(400, &ApiResponse::error(format!("failed to read body: {}", e)));
    }

    let setpoint: SetpointRequest = match serde_json::from_str(&body) {
        Ok(setpoint) => setpoint,
        Err(e) => return json(400, &ApiResponse::error(ApiError::from(e).to_string())),
    };

    let write = ApiRequest::WriteSetpoint {
        name: setpoint.name,
        index: setpoint.index,
        value: setpoint.value,
    };
    match runtime.block_on(api::handle_request(devices, write)) {
        Ok(response) => json(200, &response),
        Err(e) => {
            warn!("Rejected setpoint request: {}", e);
            let code = match e {
                ApiError::UnknownDevice(_) => 404,
                _ => 400,
            };
            json(code, &ApiResponse::error(e.to_string()))
        }
    }
}

fn json<B: Serialize + ?Sized>(code: u16, body: &B) -> (u16, String) {
    match serde_json::to_string(body) {
        Ok(text) => (code, text),
        Err(e) => (500, format!(r#"{{"ok":false,"message":"{}"}}"#, e)),
    }
}
