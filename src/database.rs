//! Primary key/value storage: one `Database` per database id, holding the
//! primary map, the expiry map, and the bucket table used by the migration
//! state machine.

use crate::bucket::{Bucket, Locked};
use crate::collaborators::{Argv, Clock, FollowerFeed, KeyspaceEvents, WalSink};
use crate::error::{CoreError, CoreResult};
use crate::hash::{bucket_of, BUCKET_COUNT};
use crate::object::{KeyEntry, KeyFlag, RudisString, Value};
use bytes::Bytes;
use rand::seq::IteratorRandom;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Alive,
    Expired,
}

/// Tells the command layer whether `set_expire_at` already propagated a
/// synthetic DEL itself (past deadline) or merely recorded a future one that
/// the caller still needs to propagate as PEXPIREAT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpireOutcome {
    Scheduled,
    DeletedImmediately,
}

/// Bundles everything a core mutation needs beyond the database it's
/// operating on: the collaborators consumed per §6, plus the flags that
/// change expiry/LRU behavior in specific modes.
///
/// Built fresh per command by `ServerState`; cheap to construct since it's
/// just borrowed trait objects and copied flags.
pub struct Ctx<'a> {
    pub db_id: u32,
    pub clock: &'a dyn Clock,
    pub wal: &'a dyn WalSink,
    pub followers: &'a dyn FollowerFeed,
    pub events: &'a dyn KeyspaceEvents,
    /// True on a follower instance: expiry is observed but never
    /// self-triggered; eviction happens only via a replicated `DEL`.
    pub is_follower: bool,
    /// True while loading a snapshot: replay owns expiry ordering.
    pub loading: bool,
    /// Set while executing inside a scripting session, to keep "now"
    /// constant for the duration of the script.
    pub frozen_now: Option<i64>,
    /// True while a snapshot or WAL-rewrite child is active: suppresses the
    /// LRU-clock bump on reads to preserve the forked child's COW pages.
    pub lru_gate_suppressed: bool,
}

impl<'a> Ctx<'a> {
    pub fn now(&self) -> i64 {
        self.frozen_now.unwrap_or_else(|| self.clock.now_ms())
    }

    fn del_argv(&self, key: &Bytes) -> Argv {
        Argv::of(self.db_id, &[b"DEL", key])
    }
}

pub struct Inner {
    pub id: u32,
    pub primary: HashMap<Bytes, KeyEntry>,
    pub expires: HashMap<Bytes, i64>,
    pub buckets: Vec<Bucket>,
    lru_clock: AtomicU64,
}

impl Inner {
    pub fn new(id: u32) -> Self {
        Inner {
            id,
            primary: HashMap::new(),
            expires: HashMap::new(),
            buckets: (0..BUCKET_COUNT).map(|_| Bucket::new()).collect(),
            lru_clock: AtomicU64::new(0),
        }
    }

    fn bucket_mut(&mut self, key: &Bytes) -> &mut Bucket {
        &mut self.buckets[bucket_of(key) as usize]
    }

    fn link(&mut self, key: &Bytes) {
        self.bucket_mut(key).members.insert(key.clone());
    }

    fn unlink(&mut self, key: &Bytes) {
        self.bucket_mut(key).members.remove(key);
    }

    /// Removes a key from both maps and its bucket's member list. Idempotent.
    fn delete_key(&mut self, key: &Bytes) -> bool {
        self.expires.remove(key);
        let removed = self.primary.remove(key).is_some();
        if removed {
            self.unlink(key);
        }
        removed
    }

    /// §4.3: lazy expiry check, called by every read/write path before
    /// touching a key.
    pub fn expire_if_needed(&mut self, key: &Bytes, ctx: &Ctx) -> Expiry {
        let Some(&deadline) = self.expires.get(key) else {
            return Expiry::Alive;
        };
        if ctx.loading {
            return Expiry::Alive;
        }
        if ctx.now() <= deadline {
            return Expiry::Alive;
        }
        if ctx.is_follower {
            // Followers never self-evict; they wait for the replicated DEL.
            return Expiry::Expired;
        }
        self.delete_key(key);
        ctx.wal.append(ctx.del_argv(key));
        ctx.followers.feed(ctx.del_argv(key));
        ctx.events.publish("g", "expired", key, ctx.db_id);
        Expiry::Expired
    }

    pub fn lookup_read(&mut self, key: &Bytes, ctx: &Ctx) -> Option<Arc<Value>> {
        if self.expire_if_needed(key, ctx) == Expiry::Expired {
            return None;
        }
        let tick = self.lru_clock.fetch_add(1, Ordering::Relaxed);
        if let Some(entry) = self.primary.get_mut(key) {
            if !ctx.lru_gate_suppressed {
                entry.lru = tick;
            }
            Some(entry.value.clone())
        } else {
            None
        }
    }

    pub fn lookup_write(&mut self, key: &Bytes, ctx: &Ctx) -> Option<&mut KeyEntry> {
        if self.expire_if_needed(key, ctx) == Expiry::Expired {
            return None;
        }
        self.primary.get_mut(key)
    }

    pub fn contains(&mut self, key: &Bytes, ctx: &Ctx) -> bool {
        self.expire_if_needed(key, ctx) == Expiry::Alive && self.primary.contains_key(key)
    }

    /// §4.2: upserts a key. SET is defined as "make the key persistent": any
    /// existing expiry on the key is dropped.
    pub fn set(&mut self, key: Bytes, value: Value) {
        self.expires.remove(&key);
        if self.primary.insert(key.clone(), KeyEntry::new(value)).is_none() {
            self.link(&key);
        }
    }

    pub fn delete(&mut self, key: &Bytes, ctx: &Ctx) -> bool {
        if self.expire_if_needed(key, ctx) == Expiry::Expired {
            return false;
        }
        self.delete_key(key)
    }

    pub fn flush(&mut self) {
        self.primary.clear();
        self.expires.clear();
        for bucket in &mut self.buckets {
            bucket.members.clear();
        }
    }

    pub fn set_expire_at(&mut self, key: &Bytes, deadline_ms: i64, ctx: &Ctx) -> CoreResult<ExpireOutcome> {
        if self.expire_if_needed(key, ctx) == Expiry::Expired || !self.primary.contains_key(key) {
            return Err(CoreError::KeyNotFound);
        }
        if deadline_ms <= ctx.now() {
            // A deadline already in the past triggers an immediate delete,
            // replicated as an explicit DEL for determinism rather than as
            // the EXPIRE that produced it. The caller must not additionally
            // propagate the expire command itself.
            self.delete_key(key);
            ctx.wal.append(ctx.del_argv(key));
            ctx.followers.feed(ctx.del_argv(key));
            ctx.events.publish("g", "expired", key, ctx.db_id);
            Ok(ExpireOutcome::DeletedImmediately)
        } else {
            self.expires.insert(key.clone(), deadline_ms);
            Ok(ExpireOutcome::Scheduled)
        }
    }

    pub fn persist(&mut self, key: &Bytes, ctx: &Ctx) -> CoreResult<bool> {
        if self.expire_if_needed(key, ctx) == Expiry::Expired || !self.primary.contains_key(key) {
            return Err(CoreError::KeyNotFound);
        }
        Ok(self.expires.remove(key).is_some())
    }

    /// `-2` absent, `-1` no expiry, else remaining milliseconds (never
    /// negative).
    pub fn pttl(&mut self, key: &Bytes, ctx: &Ctx) -> i64 {
        if self.expire_if_needed(key, ctx) == Expiry::Expired || !self.primary.contains_key(key) {
            return -2;
        }
        match self.expires.get(key) {
            None => -1,
            Some(&deadline) => (deadline - ctx.now()).max(0),
        }
    }

    pub fn rename(&mut self, src: &Bytes, dst: Bytes, nx: bool, ctx: &Ctx) -> CoreResult<bool> {
        if self.expire_if_needed(src, ctx) == Expiry::Expired || !self.primary.contains_key(src) {
            return Err(CoreError::KeyNotFound);
        }
        if src == &dst {
            return Err(CoreError::invalid_argument("source and destination objects are the same"));
        }
        let dst_alive = self.expire_if_needed(&dst, ctx) == Expiry::Alive && self.primary.contains_key(&dst);
        if dst_alive {
            if nx {
                return Ok(false);
            }
            self.delete_key(&dst);
        }
        let entry = self.primary.remove(src).expect("checked above");
        self.unlink(src);
        let expire = self.expires.remove(src);
        self.primary.insert(dst.clone(), entry);
        self.link(&dst);
        if let Some(deadline) = expire {
            self.expires.insert(dst, deadline);
        }
        Ok(true)
    }

    pub fn random_key(&mut self, ctx: &Ctx) -> Option<Bytes> {
        let mut tries = self.primary.len() + 1;
        loop {
            if tries == 0 {
                return None;
            }
            tries -= 1;
            let candidate = self.primary.keys().choose(&mut rand::thread_rng())?.clone();
            if self.expire_if_needed(&candidate, ctx) == Expiry::Alive {
                return Some(candidate);
            }
        }
    }

    /// Materializes a private, raw-encoded copy of a string value whenever
    /// it's shared (`refcount > 1`) or not already raw-encoded, per §4.2.
    pub fn unshare_string(&mut self, key: &Bytes) -> CoreResult<()> {
        let entry = self.primary.get_mut(key).ok_or(CoreError::KeyNotFound)?;
        let needs_copy = entry.refcount() > 1
            || !matches!(
                entry.value.as_string().map(|s| s.encoding()),
                Some(crate::object::StringEncoding::Raw)
            );
        if !needs_copy {
            return Ok(());
        }
        let current = entry
            .value
            .as_string()
            .ok_or(CoreError::WrongType)?
            .get()
            .clone();
        entry.value = Arc::new(Value::String(RudisString::from_bytes(current)));
        Ok(())
    }

    pub fn append_string(&mut self, key: &Bytes, data: &[u8]) -> CoreResult<usize> {
        if !self.primary.contains_key(key) {
            self.set(key.clone(), Value::String(RudisString::from_bytes(Bytes::copy_from_slice(data))));
            return Ok(data.len());
        }
        self.unshare_string(key)?;
        let entry = self.primary.get_mut(key).expect("just checked");
        let s = Arc::get_mut(&mut entry.value)
            .and_then(Value::as_string_mut)
            .ok_or(CoreError::WrongType)?;
        s.append(data);
        Ok(s.len())
    }

    pub fn scan(
        &mut self,
        cursor: u64,
        count: usize,
        pattern: Option<&Bytes>,
        ctx: &Ctx,
    ) -> (u64, Vec<Bytes>) {
        let keys: Vec<Bytes> = self.primary.keys().cloned().collect();
        let (next, matched) = crate::scan::step(
            keys.into_iter(),
            cursor,
            count,
            |_k| true,
            |k| pattern.map_or(true, |p| crate::glob::glob_match(p, k)),
        );
        // `step` can't call back into `self` (it would alias `self.primary`
        // while iterating it), so expiry is re-checked here against the
        // already-selected candidates before returning them.
        let mut out = Vec::with_capacity(matched.len());
        for k in matched {
            if self.expire_if_needed(&k, ctx) == Expiry::Alive {
                out.push(k);
            }
        }
        (next, out)
    }
}

/// Moves `key` from `self` into `dst`. Per §4.7, expiry is not transplanted
/// across databases (an explicit Open Question in the source spec, resolved
/// here as "drop it" — see DESIGN.md).
pub fn move_key(src: &mut Inner, dst: &mut Inner, key: &Bytes, ctx_src: &Ctx, ctx_dst: &Ctx) -> CoreResult<()> {
    if src.id == dst.id {
        return Err(CoreError::invalid_argument("source and destination databases are the same"));
    }
    if src.expire_if_needed(key, ctx_src) == Expiry::Expired || !src.primary.contains_key(key) {
        return Err(CoreError::KeyNotFound);
    }
    if dst.expire_if_needed(key, ctx_dst) == Expiry::Alive && dst.primary.contains_key(key) {
        return Err(CoreError::DuplicateTarget);
    }
    let entry = src.primary.remove(key).expect("checked above");
    src.unlink(key);
    src.expires.remove(key);
    dst.primary.insert(key.clone(), entry);
    dst.link(key);
    Ok(())
}

/// A database handle shared across connection tasks. The keyspace core
/// itself is single-threaded-cooperative (§5): the server binary runs a
/// current-thread executor and every command handler holds this lock only
/// across synchronous code, never across an `.await`, so the `std::sync`
/// mutex is never contended and never blocks the executor.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Mutex<Inner>>,
}

impl Database {
    pub fn new(id: u32) -> Self {
        Database {
            inner: Arc::new(Mutex::new(Inner::new(id))),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{FakeClock, NullFollowerFeed, NullWal, RecordingFollowerFeed, RecordingWal};
    use crate::object::RudisString;

    fn ctx<'a>(clock: &'a dyn Clock, wal: &'a dyn WalSink, followers: &'a dyn FollowerFeed) -> Ctx<'a> {
        Ctx {
            db_id: 0,
            clock,
            wal,
            followers,
            events: &crate::collaborators::LoggingEvents,
            is_follower: false,
            loading: false,
            frozen_now: None,
            lru_gate_suppressed: false,
        }
    }

    #[test]
    fn set_then_get_round_trip() {
        let mut inner = Inner::new(0);
        let clock = FakeClock::new(0);
        let c = ctx(&clock, &NullWal, &NullFollowerFeed);
        inner.set(Bytes::from_static(b"k"), Value::String(RudisString::from_bytes(Bytes::from_static(b"v"))));
        let got = inner.lookup_read(&Bytes::from_static(b"k"), &c).unwrap();
        assert_eq!(got.as_string().unwrap().get(), &Bytes::from_static(b"v"));
    }

    #[test]
    fn set_then_del_then_exists_is_false() {
        let mut inner = Inner::new(0);
        let clock = FakeClock::new(0);
        let c = ctx(&clock, &NullWal, &NullFollowerFeed);
        inner.set(Bytes::from_static(b"k"), Value::String(RudisString::from_bytes(Bytes::from_static(b"v"))));
        assert!(inner.delete(&Bytes::from_static(b"k"), &c));
        assert!(!inner.contains(&Bytes::from_static(b"k"), &c));
    }

    #[test]
    fn expire_then_persist_then_ttl_is_no_expiry() {
        let mut inner = Inner::new(0);
        let clock = FakeClock::new(1_000);
        let c = ctx(&clock, &NullWal, &NullFollowerFeed);
        inner.set(Bytes::from_static(b"k"), Value::String(RudisString::from_bytes(Bytes::from_static(b"v"))));
        assert_eq!(
            inner.set_expire_at(&Bytes::from_static(b"k"), 50_000, &c).unwrap(),
            ExpireOutcome::Scheduled
        );
        assert!(inner.persist(&Bytes::from_static(b"k"), &c).unwrap());
        assert_eq!(inner.pttl(&Bytes::from_static(b"k"), &c), -1);
    }

    /// §8 scenario 5: a key with a short PEXPIRE, once its deadline has
    /// passed, is evicted by the first touching command and produces
    /// exactly one synthetic DEL to the WAL and one to the follower feed.
    #[test]
    fn expiry_emits_exactly_one_del_to_wal_and_followers() {
        let mut inner = Inner::new(0);
        let clock = FakeClock::new(0);
        let wal = RecordingWal::default();
        let followers = RecordingFollowerFeed::default();
        let c = ctx(&clock, &wal, &followers);

        inner.set(Bytes::from_static(b"k"), Value::String(RudisString::from_bytes(Bytes::from_static(b"v"))));
        assert_eq!(
            inner.set_expire_at(&Bytes::from_static(b"k"), 10, &c).unwrap(),
            ExpireOutcome::Scheduled
        );
        clock.advance(20);

        assert_eq!(inner.lookup_read(&Bytes::from_static(b"k"), &c), None);
        assert_eq!(wal.entries.lock().unwrap().len(), 1);
        assert_eq!(followers.entries.lock().unwrap().len(), 1);
        assert_eq!(wal.entries.lock().unwrap()[0].args[0], Bytes::from_static(b"DEL"));

        // A second touch must not emit a second DEL: the key is already gone.
        assert_eq!(inner.lookup_read(&Bytes::from_static(b"k"), &c), None);
        assert_eq!(wal.entries.lock().unwrap().len(), 1);
        assert_eq!(followers.entries.lock().unwrap().len(), 1);
    }

    #[test]
    fn set_expire_at_in_the_past_deletes_immediately_and_does_not_double_report() {
        let mut inner = Inner::new(0);
        let clock = FakeClock::new(1_000);
        let wal = RecordingWal::default();
        let followers = RecordingFollowerFeed::default();
        let c = ctx(&clock, &wal, &followers);

        inner.set(Bytes::from_static(b"k"), Value::String(RudisString::from_bytes(Bytes::from_static(b"v"))));
        let outcome = inner.set_expire_at(&Bytes::from_static(b"k"), 500, &c).unwrap();
        assert_eq!(outcome, ExpireOutcome::DeletedImmediately);
        assert!(!inner.primary.contains_key(&Bytes::from_static(b"k")));
        assert_eq!(wal.entries.lock().unwrap().len(), 1);
        assert_eq!(followers.entries.lock().unwrap().len(), 1);
    }

    #[test]
    fn rename_transplants_value_and_expiry() {
        let mut inner = Inner::new(0);
        let clock = FakeClock::new(0);
        let c = ctx(&clock, &NullWal, &NullFollowerFeed);
        inner.set(Bytes::from_static(b"src"), Value::String(RudisString::from_bytes(Bytes::from_static(b"v"))));
        inner.set_expire_at(&Bytes::from_static(b"src"), 50_000, &c).unwrap();

        assert!(inner.rename(&Bytes::from_static(b"src"), Bytes::from_static(b"dst"), false, &c).unwrap());
        assert!(!inner.primary.contains_key(&Bytes::from_static(b"src")));
        assert_eq!(inner.pttl(&Bytes::from_static(b"dst"), &c), 50_000);
    }

    #[test]
    fn renamenx_refuses_when_destination_exists() {
        let mut inner = Inner::new(0);
        let clock = FakeClock::new(0);
        let c = ctx(&clock, &NullWal, &NullFollowerFeed);
        inner.set(Bytes::from_static(b"src"), Value::String(RudisString::from_bytes(Bytes::from_static(b"1"))));
        inner.set(Bytes::from_static(b"dst"), Value::String(RudisString::from_bytes(Bytes::from_static(b"2"))));
        assert!(!inner.rename(&Bytes::from_static(b"src"), Bytes::from_static(b"dst"), true, &c).unwrap());
    }

    #[test]
    fn move_key_refuses_same_database_and_existing_destination() {
        let mut src = Inner::new(0);
        let mut dst = Inner::new(1);
        let clock = FakeClock::new(0);
        let c = ctx(&clock, &NullWal, &NullFollowerFeed);
        src.set(Bytes::from_static(b"k"), Value::String(RudisString::from_bytes(Bytes::from_static(b"v"))));

        assert!(move_key(&mut src, &mut dst, &Bytes::from_static(b"k"), &c, &c).is_ok());
        assert!(!src.primary.contains_key(&Bytes::from_static(b"k")));
        assert!(dst.primary.contains_key(&Bytes::from_static(b"k")));

        dst.set(Bytes::from_static(b"other"), Value::String(RudisString::from_bytes(Bytes::from_static(b"v"))));
        src.set(Bytes::from_static(b"other"), Value::String(RudisString::from_bytes(Bytes::from_static(b"v"))));
        let err = move_key(&mut src, &mut dst, &Bytes::from_static(b"other"), &c, &c).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateTarget));
    }

    #[test]
    fn scan_to_completion_covers_all_keys() {
        let mut inner = Inner::new(0);
        let clock = FakeClock::new(0);
        let c = ctx(&clock, &NullWal, &NullFollowerFeed);
        let expected: std::collections::HashSet<Bytes> = (0..500)
            .map(|i| Bytes::from(format!("k{i}")))
            .collect();
        for k in &expected {
            inner.set(k.clone(), Value::String(RudisString::from_bytes(Bytes::from_static(b"v"))));
        }

        let mut collected = std::collections::HashSet::new();
        let mut cursor = 0u64;
        loop {
            let (next, batch) = inner.scan(cursor, 20, None, &c);
            collected.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        assert_eq!(collected, expected);
    }

    #[test]
    fn unshare_string_copies_shared_value_before_append() {
        let mut inner = Inner::new(0);
        inner.set(Bytes::from_static(b"k"), Value::String(RudisString::from_bytes(Bytes::from_static(b"v"))));
        let shared = inner.primary.get(&Bytes::from_static(b"k")).unwrap().value.clone();
        assert_eq!(Arc::strong_count(&shared), 2);

        let len = inner.append_string(&Bytes::from_static(b"k"), b"!").unwrap();
        assert_eq!(len, 2);
        // The old Arc the test is still holding must be untouched.
        assert_eq!(shared.as_string().unwrap().get(), &Bytes::from_static(b"v"));
    }
}
