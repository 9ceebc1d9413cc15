use tracing::error;

use crate::session::DeviceStatus;

pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

/// Receives a status snapshot after every sensor update and every setpoint change.
///
/// Called inline while the session processes device input, so implementations must return quickly.
/// An `Err` is logged and does not stop delivery to the remaining observers.
pub trait StatusObserver: Send {
    fn on_status(&mut self, status: &DeviceStatus) -> Result<(), ObserverError>;
}

impl<F> StatusObserver for F
where
    F: FnMut(&DeviceStatus) -> Result<(), ObserverError> + Send,
{
    fn on_status(&mut self, status: &DeviceStatus) -> Result<(), ObserverError> {
        self(status)
    }
}

#[derive(Default)]
pub struct ObserverList {
    observers: Vec<Box<dyn StatusObserver>>,
}

impl ObserverList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, observer: Box<dyn StatusObserver>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Deliver `status` to every observer. Returns how many failed.
    pub fn notify(&mut self, status: &DeviceStatus) -> usize {
        let mut failures = 0;
        for (index, observer) in self.observers.iter_mut().enumerate() {
            if let Err(e) = observer.on_status(status) {
                failures += 1;
                error!("Error executing status observer #{}: {}", index, e);
            }
        }
        failures
    }
}

impl core::fmt::Debug for ObserverList {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ObserverList")
            .field("observers", &self.observers.len())
            .finish()
    }
}

/// Logs every snapshot at debug level.
pub struct LogObserver;

impl StatusObserver for LogObserver {
    fn on_status(&mut self, status: &DeviceStatus) -> Result<(), ObserverError> {
        tracing::debug!(device = %status.name, "Status: {:?}", status);
        Ok(())
    }
}
