//! Run artifacts: the plain-text run log and the telemetry CSV.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use openhil_spec::TestSpecification;

/// Plain-text run log: test identity, device identity, one block per step.
pub(crate) struct RunLog {
    path: PathBuf,
    file: File,
}

impl RunLog {
    pub(crate) fn create(dir: &Path, test_id: &str) -> std::io::Result<Self> {
        let path = dir.join(format!("{test_id}.log"));
        let file = File::create(&path)?;
        Ok(Self { path, file })
    }

    pub(crate) fn line(&mut self, text: &str) -> std::io::Result<()> {
        writeln!(self.file, "{text}")
    }

    pub(crate) fn header(
        &mut self,
        spec: &TestSpecification,
        device_identity: &str,
    ) -> std::io::Result<()> {
        writeln!(self.file, "Test ID: {}", spec.id)?;
        writeln!(self.file, "Test name: {}", spec.name)?;
        writeln!(self.file, "Test description: {}", spec.description)?;
        writeln!(self.file, "\nDUT info: {device_identity}\n")
    }

    pub(crate) fn step_header(&mut self, number: usize, action: &str) -> std::io::Result<()> {
        writeln!(self.file, "Step {number}: {action}")
    }

    pub(crate) fn step_status(&mut self, passed: bool) -> std::io::Result<()> {
        writeln!(self.file, "Step status: {passed}")
    }

    pub(crate) fn test_status(&mut self, passed: bool) -> std::io::Result<()> {
        writeln!(self.file, "\nTest status: {passed}")
    }

    pub(crate) fn finish(mut self) -> std::io::Result<PathBuf> {
        self.file.flush()?;
        Ok(self.path)
    }
}

/// Logged-value cache: last telemetry value per logged signal, field order
/// fixed at first sight so CSV columns stay stable.
#[derive(Debug, Default)]
pub(crate) struct LoggedCache {
    order: Vec<String>,
    values: std::collections::HashMap<String, f64>,
}

impl LoggedCache {
    pub(crate) fn insert(&mut self, name: &str, value: f64) {
        if !self.values.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.values.insert(name.to_string(), value);
    }

    pub(crate) fn fields(&self) -> &[String] {
        &self.order
    }

    fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}

/// Append-only telemetry CSV. Rows are written as batches drain; the
/// header is only known once the run ends (field order is first-seen), so
/// [`TelemetryLog::finalize`] prefixes it by rewriting the file.
pub(crate) struct TelemetryLog {
    path: PathBuf,
    file: File,
}

impl TelemetryLog {
    pub(crate) fn create(dir: &Path, test_id: &str) -> std::io::Result<Self> {
        let path = dir.join(format!("{test_id}.csv"));
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&path)?;
        Ok(Self { path, file })
    }

    /// One row: wall-clock timestamp plus every cached field in order.
    pub(crate) fn append_row(&mut self, cache: &LoggedCache) -> std::io::Result<()> {
        let timestamp = chrono::Local::now().time().format("%H:%M:%S%.6f");
        let mut row = format!("{timestamp},");
        for field in cache.fields() {
            let value = cache.get(field).unwrap_or(0.0);
            row.push_str(&format!("{value},"));
        }
        writeln!(self.file, "{row}")
    }

    /// Prefix the header row derived from the final cache field order.
    pub(crate) fn finalize(mut self, cache: &LoggedCache) -> std::io::Result<PathBuf> {
        self.file.flush()?;
        self.file.seek(SeekFrom::Start(0))?;
        let mut body = String::new();
        self.file.read_to_string(&mut body)?;

        let mut caption = String::from("timestamp,");
        for field in cache.fields() {
            caption.push_str(field);
            caption.push(',');
        }
        caption.push('\n');

        self.file.seek(SeekFrom::Start(0))?;
        self.file.set_len(0)?;
        self.file.write_all(caption.as_bytes())?;
        self.file.write_all(body.as_bytes())?;
        self.file.flush()?;
        Ok(self.path)
    }
}
