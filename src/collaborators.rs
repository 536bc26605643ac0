//! External collaborators, modeled as traits. The keyspace core consumes
//! these narrow interfaces and never assumes anything about how they're
//! implemented — durability, replication topology and event delivery are
//! all out of scope for the core itself (see crate-level docs).

use bytes::Bytes;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

/// A single write-ahead-log entry: the argv of a command as it should be
/// replayed, scoped to a database id.
#[derive(Debug, Clone)]
pub struct Argv {
    pub db_id: u32,
    pub args: Vec<Bytes>,
}

impl Argv {
    pub fn new(db_id: u32, args: Vec<Bytes>) -> Self {
        Argv { db_id, args }
    }

    pub fn of(db_id: u32, parts: &[&[u8]]) -> Self {
        Argv {
            db_id,
            args: parts.iter().map(|p| Bytes::copy_from_slice(p)).collect(),
        }
    }
}

/// `wal.append(db_id, argv[])` — durably record a command after core success.
pub trait WalSink: Send + Sync {
    fn append(&self, entry: Argv);
}

/// `followers.feed(db_id, argv[])` — forward a command to subscribers.
pub trait FollowerFeed: Send + Sync {
    fn feed(&self, entry: Argv);
}

/// `keyspace_events.publish(kind, event_name, key, db_id)` — best-effort
/// notification, e.g. for `__keyspace@<db>__` style subscribers.
pub trait KeyspaceEvents: Send + Sync {
    fn publish(&self, kind: &str, event: &str, key: &Bytes, db_id: u32);
}

/// `mstime() -> int64` — the clock used for expiry.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Default no-op WAL: drops entries. Useful for tests and for the reference
/// binary before a real durability backend is wired in (durability is
/// explicitly delegated, not implemented, by this crate).
#[derive(Default)]
pub struct NullWal;
impl WalSink for NullWal {
    fn append(&self, _entry: Argv) {}
}

/// Records every entry it's given, for assertions in tests.
#[derive(Default)]
pub struct RecordingWal {
    pub entries: Mutex<Vec<Argv>>,
}
impl WalSink for RecordingWal {
    fn append(&self, entry: Argv) {
        self.entries.lock().unwrap().push(entry);
    }
}

#[derive(Default)]
pub struct NullFollowerFeed;
impl FollowerFeed for NullFollowerFeed {
    fn feed(&self, _entry: Argv) {}
}

#[derive(Default)]
pub struct RecordingFollowerFeed {
    pub entries: Mutex<Vec<Argv>>,
}
impl FollowerFeed for RecordingFollowerFeed {
    fn feed(&self, entry: Argv) {
        self.entries.lock().unwrap().push(entry);
    }
}

/// Logs keyspace events at debug level via `log`, matching the ambient
/// logging style used throughout the rest of the crate.
#[derive(Default)]
pub struct LoggingEvents;
impl KeyspaceEvents for LoggingEvents {
    fn publish(&self, kind: &str, event: &str, key: &Bytes, db_id: u32) {
        log::debug!(
            "keyspace event: db={} kind={} event={} key={}",
            db_id,
            kind,
            event,
            String::from_utf8_lossy(key)
        );
    }
}

/// Wall-clock `mstime()` backed by `SystemTime`.
#[derive(Default)]
pub struct SystemClock;
impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// A clock that can be pinned to an exact value, for deterministic tests of
/// expiry behavior.
pub struct FakeClock {
    now: AtomicI64,
}
impl FakeClock {
    pub fn new(start_ms: i64) -> Self {
        FakeClock {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: i64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}
impl Clock for FakeClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
