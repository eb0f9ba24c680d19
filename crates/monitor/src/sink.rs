//! Append-only writer of scalar records.
//!
//! A sink owns a log directory and appends JSON lines to its
//! [`EVENTS_FILE`]. At most one sink may be open on a given directory
//! within the process: the open locations are kept in a global registry,
//! a location is released when its sink is closed (or dropped).
use crate::errors::{MonitorError, Result};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use web_time::{SystemTime, UNIX_EPOCH};

/// Name of the records file within the sink log directory
pub const EVENTS_FILE: &str = "events.jsonl";
/// Default number of records buffered before an automatic flush
pub const DEFAULT_MAX_QUEUE: usize = 10;

static OPEN_LOCATIONS: Mutex<BTreeSet<PathBuf>> = Mutex::new(BTreeSet::new());

/// A sink shared by several recording tasks
pub type SharedSink = Arc<Mutex<MetricSink>>;

/// One scalar value recorded at a given optimizer step
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScalarRecord {
    /// Global step of the record
    pub step: u64,
    /// Seconds since Unix epoch
    pub wall_time: f64,
    /// Name of the recorded quantity
    pub tag: String,
    /// Recorded value
    pub value: f64,
}

impl ScalarRecord {
    /// Constructor of a record stamped with the current time
    pub fn new(tag: &str, value: f64, step: u64) -> Self {
        let wall_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.);
        ScalarRecord {
            step,
            wall_time,
            tag: tag.to_string(),
            value,
        }
    }
}

/// Exclusive, append-only writer of [`ScalarRecord`]s
#[derive(Debug)]
pub struct MetricSink {
    location: PathBuf,
    writer: Option<BufWriter<File>>,
    max_queue: usize,
    queued: usize,
    written: u64,
}

impl MetricSink {
    /// Opens a sink on the `logdir` directory, created if needed.
    ///
    /// Fails with [`MonitorError::SinkInUse`] if a sink is already open there.
    pub fn open<P: AsRef<Path>>(logdir: P) -> Result<Self> {
        Self::open_with_queue(logdir, DEFAULT_MAX_QUEUE)
    }

    /// Opens a sink flushing automatically every `max_queue` records
    pub fn open_with_queue<P: AsRef<Path>>(logdir: P, max_queue: usize) -> Result<Self> {
        if max_queue == 0 {
            return Err(MonitorError::InvalidConfigError(
                "max_queue should be greater than 0".to_string(),
            ));
        }
        std::fs::create_dir_all(logdir.as_ref())?;
        let location = std::fs::canonicalize(logdir.as_ref())?;
        if !OPEN_LOCATIONS.lock()?.insert(location.clone()) {
            return Err(MonitorError::SinkInUse(location));
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(location.join(EVENTS_FILE));
        let file = match file {
            Ok(file) => file,
            Err(err) => {
                release(&location);
                return Err(err.into());
            }
        };
        info!("Metric sink opened at {:?}", location);
        Ok(MetricSink {
            location,
            writer: Some(BufWriter::new(file)),
            max_queue,
            queued: 0,
            written: 0,
        })
    }

    /// Whether a sink is currently open on `logdir`
    pub fn is_open_at<P: AsRef<Path>>(logdir: P) -> bool {
        match std::fs::canonicalize(logdir.as_ref()) {
            Ok(location) => OPEN_LOCATIONS
                .lock()
                .map(|open| open.contains(&location))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Canonical path of the sink log directory
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Whether the sink was closed
    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }

    /// Number of records written so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Appends a record
    pub fn write(&mut self, record: &ScalarRecord) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| MonitorError::SinkClosed(self.location.clone()))?;
        serde_json::to_writer(&mut *writer, record)?;
        writer.write_all(b"\n")?;
        self.written += 1;
        self.queued += 1;
        if self.queued >= self.max_queue {
            self.flush()?;
        }
        Ok(())
    }

    /// Appends a scalar value stamped with the current time
    pub fn write_scalar(&mut self, tag: &str, value: f64, step: u64) -> Result<()> {
        self.write(&ScalarRecord::new(tag, value, step))
    }

    /// Writes buffered records to the file
    pub fn flush(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        self.queued = 0;
        Ok(())
    }

    /// Flushes and releases the location. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            let res = writer.flush();
            release(&self.location);
            info!(
                "Metric sink closed at {:?} ({} records)",
                self.location, self.written
            );
            res?;
        }
        Ok(())
    }

    /// Wraps the sink in a handle shared by several tasks
    pub fn shared(self) -> SharedSink {
        Arc::new(Mutex::new(self))
    }
}

impl Drop for MetricSink {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            error!("Metric sink at {:?} closed with error: {}", self.location, err);
        }
    }
}

fn release(location: &Path) {
    let mut open = OPEN_LOCATIONS.lock().unwrap_or_else(|e| e.into_inner());
    open.remove(location);
}

/// Reads back the records written in `logdir`
pub fn read_records<P: AsRef<Path>>(logdir: P) -> Result<Vec<ScalarRecord>> {
    let file = File::open(logdir.as_ref().join(EVENTS_FILE))?;
    let mut records = vec![];
    for line in BufReader::new(file).lines() {
        let line = line?;
        if !line.trim().is_empty() {
            records.push(serde_json::from_str(&line)?);
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean(dir: &str) {
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_second_open_fails_until_close() {
        let dir = "target/test_sink_exclusive";
        clean(dir);
        let mut sink = MetricSink::open(dir).unwrap();
        assert!(MetricSink::is_open_at(dir));
        assert!(matches!(
            MetricSink::open(dir),
            Err(MonitorError::SinkInUse(_))
        ));
        // same location through another path spelling
        assert!(MetricSink::open(format!("{dir}/../test_sink_exclusive")).is_err());

        sink.close().unwrap();
        sink.close().unwrap();
        assert!(!MetricSink::is_open_at(dir));
        let mut reopened = MetricSink::open(dir).unwrap();
        reopened.close().unwrap();
    }

    #[test]
    fn test_drop_releases_location() {
        let dir = "target/test_sink_drop";
        clean(dir);
        {
            let _sink = MetricSink::open(dir).unwrap();
        }
        assert!(MetricSink::open(dir).is_ok());
    }

    #[test]
    fn test_records_appended_in_call_order() {
        let dir = "target/test_sink_order";
        clean(dir);
        let mut sink = MetricSink::open_with_queue(dir, 2).unwrap();
        sink.write_scalar("a", 1., 1).unwrap();
        sink.write_scalar("b", 2., 1).unwrap();
        sink.write_scalar("a", 3., 2).unwrap();
        sink.close().unwrap();
        assert!(matches!(
            sink.write_scalar("a", 4., 3),
            Err(MonitorError::SinkClosed(_))
        ));

        // appending to the existing file
        let mut sink = MetricSink::open(dir).unwrap();
        sink.write_scalar("c", 5., 3).unwrap();
        sink.close().unwrap();

        let records = read_records(dir).unwrap();
        let tags: Vec<(&str, f64, u64)> = records
            .iter()
            .map(|r| (r.tag.as_str(), r.value, r.step))
            .collect();
        assert_eq!(
            tags,
            vec![("a", 1., 1), ("b", 2., 1), ("a", 3., 2), ("c", 5., 3)]
        );
    }

    #[test]
    fn test_auto_flush_at_max_queue() {
        let dir = "target/test_sink_queue";
        clean(dir);
        let mut sink = MetricSink::open_with_queue(dir, 2).unwrap();
        sink.write_scalar("a", 1., 1).unwrap();
        assert_eq!(read_records(dir).unwrap().len(), 0);
        sink.write_scalar("a", 2., 2).unwrap();
        assert_eq!(read_records(dir).unwrap().len(), 2);
        assert!(MetricSink::open_with_queue("target/test_sink_queue_0", 0).is_err());
    }
}
