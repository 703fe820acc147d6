//! # Snapshot Buffer
//!
//! A single slot holding the latest successfully fetched payload together
//! with the time it was captured.
//!
//! The slot stores an `Arc<BufferedSnapshot>` behind an [`ArcSwapOption`], so
//! `replace` is one atomic pointer swap. Readers get their own `Arc` to an
//! immutable value and can never observe a half-written snapshot: they see
//! either the previous one in full or the new one in full. There is no
//! history and no expiry; a snapshot stays current until it is replaced.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;

/// An immutable capture of the dataset.
///
/// Serializes as `{ "timestamp": "<RFC 3339, ms>", "data": <payload> }`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BufferedSnapshot {
    #[serde(rename = "timestamp", serialize_with = "rfc3339_millis")]
    captured_at: DateTime<Utc>,
    #[serde(rename = "data")]
    payload: Value,
}

impl BufferedSnapshot {
    /// Builds a snapshot with an explicit capture time.
    pub fn new(captured_at: DateTime<Utc>, payload: Value) -> Self {
        Self { captured_at, payload }
    }

    /// Builds a snapshot stamped with the current time.
    pub fn capture(payload: Value) -> Self {
        Self::new(Utc::now(), payload)
    }

    /// When the payload was captured.
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// The opaque upstream payload.
    pub fn payload(&self) -> &Value {
        &self.payload
    }
}

fn rfc3339_millis<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Single-slot store for the current snapshot.
#[derive(Debug, Default)]
pub struct Buffer {
    slot: ArcSwapOption<BufferedSnapshot>,
}

impl Buffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically installs `snapshot`, discarding the previous one.
    pub fn replace(&self, snapshot: Arc<BufferedSnapshot>) {
        self.slot.store(Some(snapshot));
    }

    /// The current snapshot, or `None` if no refresh has ever succeeded.
    pub fn read(&self) -> Option<Arc<BufferedSnapshot>> {
        self.slot.load_full()
    }

    /// Whether a snapshot has been installed.
    pub fn is_populated(&self) -> bool {
        self.slot.load().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn snapshot(n: i64) -> Arc<BufferedSnapshot> {
        let at = Utc.timestamp_opt(1_700_000_000 + n, 0).unwrap();
        Arc::new(BufferedSnapshot::new(at, json!({ "rows": [n], "n": n })))
    }

    #[test]
    fn empty_until_first_replace() {
        let buffer = Buffer::new();
        assert!(buffer.read().is_none());
        assert!(!buffer.is_populated());
    }

    #[test]
    fn read_returns_the_last_replace() {
        let buffer = Buffer::new();
        for n in 0..10 {
            buffer.replace(snapshot(n));
        }
        let current = buffer.read().unwrap();
        assert_eq!(current, snapshot(9));
        assert!(buffer.is_populated());
    }

    #[test]
    fn readers_keep_their_snapshot_after_a_replace() {
        let buffer = Buffer::new();
        buffer.replace(snapshot(1));
        let held = buffer.read().unwrap();
        buffer.replace(snapshot(2));
        assert_eq!(held.payload()["n"], 1);
        assert_eq!(buffer.read().unwrap().payload()["n"], 2);
    }

    #[test]
    fn serializes_as_timestamp_and_data() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let snap = BufferedSnapshot::new(at, json!({ "result": { "rows": [] } }));
        let wire = serde_json::to_value(&snap).unwrap();
        assert_eq!(
            wire,
            json!({
                "timestamp": "2025-03-01T12:00:00.000Z",
                "data": { "result": { "rows": [] } }
            })
        );
    }

    #[test]
    fn concurrent_readers_never_see_mixed_fields() {
        let buffer = Arc::new(Buffer::new());
        buffer.replace(snapshot(0));

        let writer = {
            let buffer = buffer.clone();
            std::thread::spawn(move || {
                for n in 1..=2_000 {
                    buffer.replace(snapshot(n));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let buffer = buffer.clone();
                std::thread::spawn(move || {
                    for _ in 0..2_000 {
                        let snap = buffer.read().unwrap();
                        let n = snap.payload()["n"].as_i64().unwrap();
                        assert_eq!(snap.captured_at().timestamp(), 1_700_000_000 + n);
                        assert_eq!(snap.payload()["rows"][0].as_i64().unwrap(), n);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(buffer.read().unwrap().payload()["n"], 2_000);
    }
}
