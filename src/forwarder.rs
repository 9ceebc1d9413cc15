use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, error, warn};

use crate::config::TelemetryConfig;
use crate::observer::{ObserverError, StatusObserver};
use crate::protocol::{IDX_CO2, IDX_O2, IDX_PRESSURE, IDX_RH, IDX_TEMPERATURE};
use crate::session::DeviceStatus;

#[derive(Debug, Error)]
pub enum ForwarderError {
    #[error("telemetry forwarder must be created inside a tokio runtime")]
    NoRuntime,
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwarderStats {
    pub sent: u64,
    pub failed: u64,
    pub skipped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    outstanding: AtomicUsize,
    sent: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

/// Relays every status notification to a remote collector as two HTTP GETs, one for the sensor
/// reading and one for the setpoints.
///
/// Requests run in the background. Once more than `max_outstanding` are in flight, notifications
/// are dropped (with a warning) until the backlog clears. Clones share the same backlog.
#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    url: String,
    app: String,
    max_outstanding: usize,
    counters: Arc<Counters>,
    runtime: Handle,
}

impl Forwarder {
    pub fn new(config: &TelemetryConfig) -> Result<Self, ForwarderError> {
        let runtime = Handle::try_current().map_err(|_| ForwarderError::NoRuntime)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            url: config.url.clone(),
            app: config.app.clone(),
            max_outstanding: config.max_outstanding,
            counters: Arc::new(Counters::default()),
            runtime,
        })
    }

    /// Queue both messages for `status`. Returns false if they were skipped for backpressure.
    pub fn emit(&self, status: &DeviceStatus) -> bool {
        if self.outstanding() > self.max_outstanding {
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            warn!("Skipping send to telemetry collector, too many queued");
            return false;
        }

        let sensor_values = status
            .sensors
            .as_ref()
            .map(|reading| reading.values.to_vec())
            .unwrap_or_default();
        self.send(telemetry_query(&self.app, "sensor", &status.name, &sensor_values));
        self.send(telemetry_query(
            &self.app,
            "setpoint",
            &status.name,
            &status.setpoints.values,
        ));
        true
    }

    pub fn outstanding(&self) -> usize {
        self.counters.outstanding.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> ForwarderStats {
        ForwarderStats {
            sent: self.counters.sent.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
        }
    }

    fn send(&self, query: Vec<(&'static str, String)>) {
        let request = self.client.get(self.url.as_str()).query(&query);
        let counters = Arc::clone(&self.counters);
        counters.outstanding.fetch_add(1, Ordering::Relaxed);

        self.runtime.spawn(async move {
            let result = request.send().await.and_then(|r| r.error_for_status());
            let outstanding = counters.outstanding.fetch_sub(1, Ordering::Relaxed) - 1;
            match result {
                Ok(response) => {
                    counters.sent.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        "Sent message to telemetry collector ({} outstanding): {}",
                        outstanding,
                        response.status()
                    );
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    error!("Failed to send message to telemetry collector: {}", e);
                }
            }
        });
    }
}

impl StatusObserver for Forwarder {
    fn on_status(&mut self, status: &DeviceStatus) -> Result<(), ObserverError> {
        self.emit(status);
        Ok(())
    }
}

/// Collector query for one message. Positions missing from `values` are sent as 0.
pub fn telemetry_query(
    app: &str,
    kind: &str,
    name: &str,
    values: &[f64],
) -> Vec<(&'static str, String)> {
    let at = |index: usize| values.get(index).copied().unwrap_or(0.0).to_string();
    vec![
        ("A", app.to_string()),
        ("D01", kind.to_string()),
        ("D02", name.to_string()),
        ("M01", at(IDX_TEMPERATURE)),
        ("M02", at(IDX_CO2)),
        ("M03", at(IDX_O2)),
        ("M04", at(IDX_PRESSURE)),
        ("M05", at(IDX_RH)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setpoints::SetpointSnapshot;

    fn config(max_outstanding: usize) -> TelemetryConfig {
        TelemetryConfig {
            // Nothing listens on the discard port, so requests fail fast.
            url: "http://127.0.0.1:9/ft.gif".to_string(),
            app: "FT-TEST".to_string(),
            max_outstanding,
            timeout_ms: 1000,
        }
    }

    fn status() -> DeviceStatus {
        DeviceStatus {
            name: "avatar".to_string(),
            sensors: None,
            setpoints: SetpointSnapshot {
                timestamp: 0,
                values: [21.5, 0.0, 0.5, 20.9, 1.2, 0.0],
            },
        }
    }

    #[test]
    fn test_query_maps_named_positions() {
        let query = telemetry_query("FT", "sensor", "avatar", &[25.0, 0.0, 0.5, 20.9, 1.2, 45.0]);
        assert_eq!(
            query,
            vec![
                ("A", "FT".to_string()),
                ("D01", "sensor".to_string()),
                ("D02", "avatar".to_string()),
                ("M01", "25".to_string()),
                ("M02", "0.5".to_string()),
                ("M03", "20.9".to_string()),
                ("M04", "1.2".to_string()),
                ("M05", "45".to_string()),
            ]
        );
    }

    #[test]
    fn test_query_defaults_missing_positions() {
        let query = telemetry_query("FT", "sensor", "avatar", &[]);
        assert!(query[3..].iter().all(|(_, v)| v == "0"));
    }

    #[test]
    fn test_requires_runtime() {
        assert!(matches!(
            Forwarder::new(&config(100)),
            Err(ForwarderError::NoRuntime)
        ));
    }

    #[tokio::test]
    async fn test_backpressure_skips_notifications() {
        let forwarder = Forwarder::new(&config(1)).unwrap();

        assert!(forwarder.emit(&status()));
        assert_eq!(forwarder.outstanding(), 2);

        assert!(!forwarder.emit(&status()));
        assert_eq!(forwarder.stats().skipped, 1);
        assert_eq!(forwarder.outstanding(), 2);
    }

    #[tokio::test]
    async fn test_stalled_collector_frees_slots_after_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept every connection and never answer.
        let collector = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let mut config = config(1);
        config.url = format!("http://{}/ft.gif", addr);
        config.timeout_ms = 200;
        let mut forwarder = Forwarder::new(&config).unwrap();

        assert!(forwarder.emit(&status()));
        assert!(!forwarder.emit(&status()));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while forwarder.outstanding() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(forwarder.outstanding(), 0);
        assert_eq!(forwarder.stats().failed, 2);

        // Slots are free again, so the observer path sends the next pair.
        forwarder.on_status(&status()).unwrap();
        assert_eq!(forwarder.outstanding(), 2);

        collector.abort();
    }

    #[tokio::test]
    async fn test_clones_share_backlog() {
        let forwarder = Forwarder::new(&config(1)).unwrap();
        let mut observer = forwarder.clone();

        observer.on_status(&status()).unwrap();

        assert_eq!(forwarder.outstanding(), 2);
        assert!(!forwarder.emit(&status()));
        assert_eq!(observer.stats().skipped, 1);
    }
}
