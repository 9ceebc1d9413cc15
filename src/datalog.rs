use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::observer::{ObserverError, StatusObserver};
use crate::protocol::SENSOR_LEN;
use crate::session::DeviceStatus;

/// Appends one CSV row per status notification:
/// `name, sensor time, 6 sensor values, setpoint time, 6 setpoint values`.
///
/// Sensor columns are left empty until the device has sent its first data-log line. Rows are
/// flushed as they are written so the file stays current if the process dies.
pub struct DataLog<W: Write + Send> {
    writer: W,
}

impl DataLog<BufWriter<File>> {
    pub fn append(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write + Send> DataLog<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    pub fn write_row(&mut self, status: &DeviceStatus) -> std::io::Result<()> {
        writeln!(self.writer, "{}", format_row(status))?;
        self.writer.flush()
    }
}

impl<W: Write + Send> StatusObserver for DataLog<W> {
    fn on_status(&mut self, status: &DeviceStatus) -> Result<(), ObserverError> {
        self.write_row(status)?;
        Ok(())
    }
}

pub fn format_row(status: &DeviceStatus) -> String {
    let mut fields = Vec::with_capacity(2 + SENSOR_LEN + 1 + status.setpoints.values.len());
    fields.push(quote(&status.name));

    match &status.sensors {
        Some(reading) => {
            fields.push(reading.timestamp.to_string());
            fields.extend(reading.values.iter().map(f64::to_string));
        }
        None => fields.extend(std::iter::repeat(String::new()).take(1 + SENSOR_LEN)),
    }

    fields.push(status.setpoints.timestamp.to_string());
    fields.extend(status.setpoints.values.iter().map(f64::to_string));
    fields.join(",")
}

fn quote(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
