//! JSONL-backed append-only event log: the Audit Collector's storage
//! primitive. Every turn record and the run's final audit record are
//! appended here, keyed by a caller-assigned monotonic id.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use thiserror::Error;

/// A monotonic event identifier, assigned by the caller on append.
pub type EventId = u64;

/// Errors emitted by the event log.
#[derive(Debug, Error)]
pub enum EventLogError {
    /// Underlying filesystem operation failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    /// A record failed to serialize or deserialize.
    #[error("serialize: {0}")]
    Serde(#[from] serde_json::Error),
}

/// One record persisted to the log: an id, a timestamp, and an opaque
/// payload whose schema is defined by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord<T> {
    /// Monotonic event id assigned on append.
    pub id: EventId,
    /// Milliseconds since epoch, supplied by the caller's clock.
    pub ts_ms: u64,
    /// The record's payload.
    pub payload: T,
}

/// A simple JSONL-backed append-only event log.
#[derive(Debug, Clone)]
pub struct JsonlEventLog {
    path: String,
}

impl JsonlEventLog {
    /// Create or open a log at `path`, truncating it if it does not yet
    /// exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, EventLogError> {
        let p = path.as_ref();
        if !p.exists() {
            OpenOptions::new().create(true).write(true).truncate(true).open(p)?;
        }
        Ok(Self { path: p.to_string_lossy().into_owned() })
    }

    /// Append a payload under `id`/`ts_ms`. Returns the id, for symmetry
    /// with callers that assign ids from a counter and want it echoed back.
    pub fn append<T: Serialize>(
        &self,
        id: EventId,
        ts_ms: u64,
        payload: &T,
    ) -> Result<EventId, EventLogError> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        let rec = EventRecord { id, ts_ms, payload };
        let line = serde_json::to_string(&rec)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;
        Ok(id)
    }

    /// Read every record with id in `[start, end)`.
    pub fn read_range<T: for<'de> Deserialize<'de>>(
        &self,
        start: EventId,
        end: EventId,
    ) -> Result<Vec<EventRecord<T>>, EventLogError> {
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut out = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let rec: EventRecord<T> = serde_json::from_str(&line)?;
            if rec.id >= start && rec.id < end {
                out.push(rec);
            }
        }
        Ok(out)
    }

    /// Read every record in the log, in append order.
    pub fn read_all<T: for<'de> Deserialize<'de>>(&self) -> Result<Vec<EventRecord<T>>, EventLogError> {
        self.read_range(0, EventId::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_read_roundtrip() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let log = JsonlEventLog::open(tmp.path()).unwrap();
        let _ = log.append(1, 1, &"hello").unwrap();
        let got: Vec<EventRecord<String>> = log.read_range(1, 2).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].payload, "hello");
    }

    #[test]
    fn read_range_is_half_open() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let log = JsonlEventLog::open(tmp.path()).unwrap();
        log.append(1, 1, &1u32).unwrap();
        log.append(2, 2, &2u32).unwrap();
        log.append(3, 3, &3u32).unwrap();
        let got: Vec<EventRecord<u32>> = log.read_range(1, 3).unwrap();
        assert_eq!(got.iter().map(|r| r.payload).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn read_all_returns_append_order() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let log = JsonlEventLog::open(tmp.path()).unwrap();
        for i in 1..=5u64 {
            log.append(i, i, &i).unwrap();
        }
        let got: Vec<EventRecord<u64>> = log.read_all().unwrap();
        assert_eq!(got.iter().map(|r| r.payload).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn opening_an_existing_log_preserves_its_contents() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let log = JsonlEventLog::open(tmp.path()).unwrap();
        log.append(1, 1, &"first").unwrap();
        drop(log);

        let reopened = JsonlEventLog::open(tmp.path()).unwrap();
        let got: Vec<EventRecord<String>> = reopened.read_all().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].payload, "first");
    }
}
