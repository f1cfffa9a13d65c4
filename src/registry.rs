/*!
 * Volatile registry of recently relayed files
 *
 * Entries older than the retention window are treated as absent by every
 * read, whether or not a sweep has physically removed them yet.
 */

use crate::link::LinkRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

/// Length of a file identifier in hex characters
pub const FILE_ID_LEN: usize = 16;

static NEXT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Short opaque identifier for a relayed file
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    /// Hash of `name`, a nanosecond timestamp and a process-wide sequence
    /// number, truncated. Two calls never hash the same input.
    pub fn generate(name: &str, at: DateTime<Utc>) -> Self {
        let nanos = at
            .timestamp_nanos_opt()
            .unwrap_or_else(|| at.timestamp_micros().saturating_mul(1000));
        let seq = NEXT_SEQ.fetch_add(1, Ordering::Relaxed);
        let digest = Sha256::digest(format!("{}_{}_{}", name, nanos, seq).as_bytes());
        let mut id = hex::encode(digest);
        id.truncate(FILE_ID_LEN);
        FileId(id)
    }

    /// Parse a user-supplied identifier
    pub fn from_hex(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.len() == FILE_ID_LEN && s.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(FileId(s.to_ascii_lowercase()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = now.checked_add_signed(by).unwrap_or(DateTime::<Utc>::MAX_UTC);
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("file {0} not found or expired; please upload it again")]
    NotFound(FileId),
}

/// Counters exposed for observability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Entries physically present, expired or not
    pub total: usize,
    /// Present entries with streamable media
    pub streamable: usize,
    /// Entries still within the retention window
    pub live: usize,
}

/// In-memory `FileId -> LinkRecord` map with time-based expiry
pub struct RelayRegistry {
    entries: Mutex<HashMap<FileId, LinkRecord>>,
    clock: Arc<dyn Clock>,
    retention: Duration,
}

impl RelayRegistry {
    pub fn new(retention: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            retention,
        }
    }

    pub fn with_system_clock(retention: Duration) -> Self {
        Self::new(retention, Arc::new(SystemClock))
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<FileId, LinkRecord>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_expired(&self, record: &LinkRecord, now: DateTime<Utc>) -> bool {
        match (now - record.created_at).to_std() {
            Ok(age) => age >= self.retention,
            // created in the future (clock adjusted backwards)
            Err(_) => false,
        }
    }

    /// Insert or replace the entry for `id`
    pub fn insert(&self, id: FileId, record: LinkRecord) {
        let replaced = self.entries().insert(id.clone(), record).is_some();
        tracing::debug!(file_id = %id, replaced, "registry insert");
    }

    /// Live entry for `id`; expired entries behave as absent
    pub fn lookup(&self, id: &FileId) -> Option<LinkRecord> {
        let now = self.clock.now();
        self.entries()
            .get(id)
            .filter(|record| !self.is_expired(record, now))
            .cloned()
    }

    pub fn resolve(&self, id: &FileId) -> Result<LinkRecord, RegistryError> {
        self.lookup(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))
    }

    /// Remove expired entries, returning how many were dropped
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, record| !self.is_expired(record, now));
        let removed = before - entries.len();
        if removed > 0 {
            tracing::info!(removed, remaining = entries.len(), "swept expired registry entries");
        }
        removed
    }

    pub fn stats(&self) -> RegistryStats {
        let now = self.clock.now();
        let entries = self.entries();
        RegistryStats {
            total: entries.len(),
            streamable: entries.values().filter(|r| r.is_streamable).count(),
            live: entries
                .values()
                .filter(|r| !self.is_expired(r, now))
                .count(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkSet;
    use crate::store::ObjectRef;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn record(name: &str, created_at: DateTime<Utc>) -> LinkRecord {
        let object = ObjectRef {
            key: name.to_string(),
            size: 1,
            content_id: None,
        };
        let links = LinkSet {
            primary_url: format!("https://example.com/{}", name),
            player_variants: BTreeMap::new(),
            is_streamable: crate::media::is_streamable(name),
        };
        LinkRecord::new(FileId::generate(name, created_at), name, &object, links, created_at)
    }

    fn registry(retention_secs: u64) -> (Arc<ManualClock>, RelayRegistry) {
        let clock = Arc::new(ManualClock::new(start()));
        let registry = RelayRegistry::new(Duration::from_secs(retention_secs), clock.clone());
        (clock, registry)
    }

    #[test]
    fn test_file_id_shape() {
        let id = FileId::generate("movie.mkv", start());
        assert_eq!(id.as_str().len(), FILE_ID_LEN);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(
            id,
            FileId::generate("movie.mkv", start() + chrono::Duration::nanoseconds(1))
        );
    }

    #[test]
    fn test_same_name_same_instant_ids_differ() {
        let ids: std::collections::HashSet<_> =
            (0..64).map(|_| FileId::generate("dup.bin", start())).collect();
        assert_eq!(ids.len(), 64);
    }

    #[test]
    fn test_file_id_parse() {
        assert!(FileId::from_hex("0123456789ABCDEF").is_some());
        assert!(FileId::from_hex("0123").is_none());
        assert!(FileId::from_hex("zzzzzzzzzzzzzzzz").is_none());
    }

    #[test]
    fn test_insert_then_lookup() {
        let (_clock, registry) = registry(7200);
        let rec = record("a.mp4", start());
        registry.insert(rec.file_id.clone(), rec.clone());
        assert_eq!(registry.lookup(&rec.file_id), Some(rec));
    }

    #[test]
    fn test_expired_entry_is_absent_before_sweep() {
        let (clock, registry) = registry(7200);
        let rec = record("a.mp4", start());
        registry.insert(rec.file_id.clone(), rec.clone());

        clock.advance(Duration::from_secs(7199));
        assert!(registry.lookup(&rec.file_id).is_some());

        clock.advance(Duration::from_secs(1));
        assert!(registry.lookup(&rec.file_id).is_none());
        assert!(matches!(
            registry.resolve(&rec.file_id),
            Err(RegistryError::NotFound(_))
        ));
        // still physically present
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let (clock, registry) = registry(100);
        let old = record("old.pdf", start());
        registry.insert(old.file_id.clone(), old.clone());

        clock.advance(Duration::from_secs(60));
        let fresh = record("fresh.mp4", clock.now());
        registry.insert(fresh.file_id.clone(), fresh.clone());

        clock.advance(Duration::from_secs(50));
        assert_eq!(registry.sweep(), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup(&fresh.file_id).is_some());
        assert_eq!(registry.sweep(), 0);
    }

    #[test]
    fn test_insert_overwrites() {
        let (_clock, registry) = registry(100);
        let id = FileId::from_hex("00000000000000aa").unwrap();
        registry.insert(id.clone(), record("a.pdf", start()));
        registry.insert(id.clone(), record("b.pdf", start()));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup(&id).unwrap().file_name, "b.pdf");
    }

    #[test]
    fn test_stats_is_read_only() {
        let (clock, registry) = registry(100);
        for name in ["a.mp4", "b.MKV", "c.pdf"] {
            let rec = record(name, clock.now());
            registry.insert(rec.file_id.clone(), rec);
        }
        clock.advance(Duration::from_secs(100));

        let stats = registry.stats();
        assert_eq!(
            stats,
            RegistryStats {
                total: 3,
                streamable: 2,
                live: 0
            }
        );
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_future_entries_are_live() {
        let (clock, registry) = registry(100);
        let rec = record("a.pdf", start() + chrono::Duration::seconds(30));
        registry.insert(rec.file_id.clone(), rec.clone());
        assert!(registry.lookup(&rec.file_id).is_some());
        clock.set(start() + chrono::Duration::seconds(130));
        assert!(registry.lookup(&rec.file_id).is_none());
    }

    #[test]
    fn test_concurrent_access() {
        let (_clock, registry) = registry(3600);
        let registry = Arc::new(registry);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let rec = record(&format!("f{}_{}.mp4", t, i), start());
                        registry.insert(rec.file_id.clone(), rec.clone());
                        assert!(registry.lookup(&rec.file_id).is_some());
                        registry.sweep();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.len(), 400);
    }
}
