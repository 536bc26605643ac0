//! The bucket migration state machine (component F) — the core contribution
//! of this crate. Operates on a single `Database`'s bucket table; the
//! server-wide `server_in_transfer` flag lives one layer up in
//! `ServerState` and is threaded through by the caller.

use crate::bucket::{BucketStatus, Direction, Locked, INIT_ID};
use crate::database::{Ctx, Inner};
use crate::error::{CoreError, CoreResult};
use crate::hash::BUCKET_COUNT;
use crate::object::KeyFlag;
use bytes::Bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransBeginReply {
    Ok,
    /// The single-bucket resumption case: a reconnecting coordinator adopts
    /// an in-progress transfer.
    Transfering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Locked,
    /// Idempotent re-lock of a key that was already `Transfering`.
    AlreadyLocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransEndKeyOutcome {
    Deleted,
    AbsentReleased,
}

fn check_range(start: u32, end: u32) -> CoreResult<()> {
    if start <= end && end < BUCKET_COUNT {
        Ok(())
    } else {
        Err(CoreError::invalid_argument(format!(
            "bucket range [{start}, {end}] out of bounds for B={BUCKET_COUNT}"
        )))
    }
}

/// `transbegin(direction, start, end)`. `other_owner_alive` lets the caller
/// (who holds the session registry) answer "is some other live session
/// still driving a transfer with this owner id" for the single-bucket
/// resumption path, without the migration state machine needing to know
/// about sessions at all.
pub fn transbegin(
    inner: &mut Inner,
    direction: Direction,
    start: u32,
    end: u32,
    session_id: u64,
    is_slave: bool,
    other_owner_alive: impl Fn(u64) -> bool,
) -> CoreResult<TransBeginReply> {
    check_range(start, end)?;
    let target_status = match direction {
        Direction::Out => BucketStatus::TransferOut,
        Direction::In => BucketStatus::TransferIn,
    };

    if start == end {
        let bucket = &inner.buckets[start as usize];
        if bucket.status == target_status && !other_owner_alive(bucket.owner_id) {
            let owner = if is_slave { INIT_ID } else { session_id };
            inner.buckets[start as usize].owner_id = owner;
            return Ok(TransBeginReply::Transfering);
        }
    }

    for h in start..=end {
        let status = inner.buckets[h as usize].status;
        let blocked = match direction {
            Direction::Out => matches!(
                status,
                BucketStatus::TransferIn | BucketStatus::TransferOut | BucketStatus::Transfered
            ),
            Direction::In => matches!(status, BucketStatus::TransferIn | BucketStatus::TransferOut),
        };
        if blocked {
            return Err(CoreError::bucket_state(format!(
                "bucket {h} is not available for transfer (status already committed)"
            )));
        }
    }

    let owner = if is_slave { INIT_ID } else { session_id };
    for h in start..=end {
        let bucket = &mut inner.buckets[h as usize];
        if bucket.status == BucketStatus::InUsing {
            bucket.status = target_status;
            bucket.owner_id = owner;
        }
    }
    Ok(TransBeginReply::Ok)
}

/// `transend(direction, start, end)`.
pub fn transend(inner: &mut Inner, direction: Direction, start: u32, end: u32) -> CoreResult<()> {
    check_range(start, end)?;
    for h in start..=end {
        let bucket = &inner.buckets[h as usize];
        match direction {
            Direction::Out => {
                if !matches!(bucket.status, BucketStatus::TransferOut | BucketStatus::Transfered) {
                    return Err(CoreError::bucket_state(format!(
                        "bucket {h} is not TRANSFER_OUT/TRANSFERED"
                    )));
                }
                if bucket.keys() != 0 {
                    return Err(CoreError::bucket_state(format!(
                        "bucket {h} still has {} undeleted key(s)",
                        bucket.keys()
                    )));
                }
            }
            Direction::In => {
                if bucket.status != BucketStatus::TransferIn {
                    return Err(CoreError::bucket_state(format!("bucket {h} is not TRANSFER_IN")));
                }
                for key in &bucket.members {
                    if inner.primary.get(key).map(|e| e.flag) != Some(KeyFlag::Normal) {
                        return Err(CoreError::bucket_state(format!(
                            "bucket {h} has a key not yet flagged NORMAL"
                        )));
                    }
                }
            }
        }
    }

    for h in start..=end {
        let bucket = &mut inner.buckets[h as usize];
        bucket.status = match direction {
            Direction::Out => BucketStatus::Transfered,
            Direction::In => BucketStatus::InUsing,
        };
        bucket.owner_id = INIT_ID;
    }
    Ok(())
}

/// `lockkey(k)`. Precondition: the key's bucket is not `IN_USING`.
pub fn lock_key(inner: &mut Inner, key: &Bytes) -> CoreResult<LockOutcome> {
    let bucket_id = crate::hash::bucket_of(key);
    if inner.buckets[bucket_id as usize].status == BucketStatus::InUsing {
        return Err(CoreError::bucket_state(format!(
            "bucket {bucket_id} is IN_USING, not under transfer"
        )));
    }

    if let Some(entry) = inner.primary.get(key) {
        match entry.flag {
            KeyFlag::Normal => {
                if let Locked::Present(other) | Locked::Absent(other) =
                    &inner.buckets[bucket_id as usize].locked
                {
                    return Err(CoreError::AlreadyLocked(other.clone()));
                }
                inner.primary.get_mut(key).unwrap().flag = KeyFlag::Transfering;
                inner.buckets[bucket_id as usize].locked = Locked::Present(key.clone());
                Ok(LockOutcome::Locked)
            }
            KeyFlag::Transfering => Ok(LockOutcome::AlreadyLocked),
            KeyFlag::Transfered => Err(CoreError::bucket_state(
                "key has already been transfered and cannot be locked",
            )),
        }
    } else {
        match &inner.buckets[bucket_id as usize].locked {
            Locked::None => {
                inner.buckets[bucket_id as usize].locked = Locked::Absent(key.clone());
                Ok(LockOutcome::Locked)
            }
            Locked::Present(other) | Locked::Absent(other) => {
                Err(CoreError::AlreadyLocked(other.clone()))
            }
        }
    }
}

/// `unlockkey(k)`. Restricted to `Transfering` entries or the bucket's
/// recorded absent lock; a `Transfered` entry has conceptually left and
/// cannot be unlocked.
pub fn unlock_key(inner: &mut Inner, key: &Bytes) -> CoreResult<()> {
    let bucket_id = crate::hash::bucket_of(key);
    let bucket = &mut inner.buckets[bucket_id as usize];
    match &bucket.locked {
        Locked::Present(k) if k == key => {
            bucket.locked = Locked::None;
            if let Some(entry) = inner.primary.get_mut(key) {
                if entry.flag == KeyFlag::Transfering {
                    entry.flag = KeyFlag::Normal;
                }
            }
            Ok(())
        }
        Locked::Absent(k) if k == key => {
            bucket.locked = Locked::None;
            Ok(())
        }
        _ => Err(CoreError::bucket_state(
            "key is neither the locked key nor the locked absent placeholder for its bucket",
        )),
    }
}

/// `transendkey(k)`: terminal step of a single-key transfer on the out side.
pub fn transend_key(inner: &mut Inner, key: &Bytes, ctx: &Ctx) -> CoreResult<TransEndKeyOutcome> {
    let bucket_id = crate::hash::bucket_of(key);

    if let Locked::Absent(k) = &inner.buckets[bucket_id as usize].locked {
        if k == key {
            inner.buckets[bucket_id as usize].locked = Locked::None;
            return Ok(TransEndKeyOutcome::AbsentReleased);
        }
    }

    let flag = inner.primary.get(key).map(|e| e.flag);
    if flag != Some(KeyFlag::Transfering) {
        return Err(CoreError::KeyNotFound);
    }

    inner.primary.get_mut(key).unwrap().flag = KeyFlag::Transfered;
    inner.buckets[bucket_id as usize].locked = Locked::None;

    ctx.wal.append(crate::collaborators::Argv::of(ctx.db_id, &[b"DEL", key]));
    ctx.followers
        .feed(crate::collaborators::Argv::of(ctx.db_id, &[b"DEL", key]));
    ctx.events.publish("g", "del", key, ctx.db_id);

    inner.expires.remove(key);
    inner.primary.remove(key);
    inner.buckets[bucket_id as usize].members.remove(key);

    Ok(TransEndKeyOutcome::Deleted)
}

/// `setbucketstatus(h, status)`, replay-only. Accepts a transition from
/// `IN_USING` to any legal migration state. Broadened per the open question
/// in the design notes: the reference only implements this direction, which
/// is enough to replay `transbegin`, `transend`, and `resetbuckets` as long
/// as the replay stream always passes through `IN_USING` between migrations
/// — true for this state machine's legal transition graph (§4.5). Returns
/// whether `server_in_transfer` should now be considered active.
pub fn set_bucket_status(inner: &mut Inner, h: u32, status: BucketStatus) -> CoreResult<bool> {
    if h >= BUCKET_COUNT {
        return Err(CoreError::invalid_argument(format!("bucket {h} out of range")));
    }
    let current = inner.buckets[h as usize].status;
    let legal = matches!(
        (current, status),
        (BucketStatus::InUsing, BucketStatus::TransferOut)
            | (BucketStatus::InUsing, BucketStatus::TransferIn)
            | (BucketStatus::TransferOut, BucketStatus::Transfered)
            | (BucketStatus::Transfered, BucketStatus::InUsing)
            | (BucketStatus::TransferIn, BucketStatus::InUsing)
    );
    if !legal {
        return Err(CoreError::bucket_state(format!(
            "transition {current:?} -> {status:?} is not a legal replay step"
        )));
    }
    inner.buckets[h as usize].status = status;
    Ok(status != BucketStatus::InUsing)
}

/// `resetbuckets(start, end)`. Requires every bucket in range to be
/// `Transfered` with zero keys. Returns whether, after the change, *all* `B`
/// buckets of this database are `IN_USING` (the caller uses this to decide
/// whether to clear `server_in_transfer`).
pub fn reset_buckets(inner: &mut Inner, start: u32, end: u32) -> CoreResult<bool> {
    check_range(start, end)?;
    for h in start..=end {
        let bucket = &inner.buckets[h as usize];
        if bucket.status != BucketStatus::Transfered {
            return Err(CoreError::bucket_state(format!("bucket {h} is not TRANSFERED")));
        }
        if bucket.keys() != 0 {
            return Err(CoreError::bucket_state(format!(
                "bucket {h} still has {} key(s)",
                bucket.keys()
            )));
        }
    }
    for h in start..=end {
        let bucket = &mut inner.buckets[h as usize];
        bucket.status = BucketStatus::InUsing;
        bucket.owner_id = INIT_ID;
    }
    let all_in_using = inner.buckets.iter().all(|b| b.status == BucketStatus::InUsing);
    Ok(all_in_using)
}

// --- Introspection (role gate: none) ---

pub fn key_status(inner: &Inner, key: &Bytes) -> CoreResult<KeyFlag> {
    inner.primary.get(key).map(|e| e.flag).ok_or(CoreError::KeyNotFound)
}

pub fn locking_keys(inner: &Inner) -> Vec<(u32, Bytes)> {
    inner
        .buckets
        .iter()
        .enumerate()
        .filter_map(|(h, b)| match &b.locked {
            Locked::Present(k) | Locked::Absent(k) => Some((h as u32, k.clone())),
            Locked::None => None,
        })
        .collect()
}

pub fn bucket_status(inner: &Inner, h: u32) -> CoreResult<BucketStatus> {
    inner
        .buckets
        .get(h as usize)
        .map(|b| b.status)
        .ok_or_else(|| CoreError::invalid_argument(format!("bucket {h} out of range")))
}

pub fn get_locking_key(inner: &Inner, h: u32) -> CoreResult<Locked> {
    inner
        .buckets
        .get(h as usize)
        .map(|b| b.locked.clone())
        .ok_or_else(|| CoreError::invalid_argument(format!("bucket {h} out of range")))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TransStat {
    pub in_transfer: bool,
    pub in_using: usize,
    pub transfer_in: usize,
    pub transfer_out: usize,
    pub transfered: usize,
}

pub fn trans_stat(inner: &Inner, server_in_transfer: bool) -> TransStat {
    let mut stat = TransStat {
        in_transfer: server_in_transfer,
        ..Default::default()
    };
    for bucket in &inner.buckets {
        match bucket.status {
            BucketStatus::InUsing => stat.in_using += 1,
            BucketStatus::TransferIn => stat.transfer_in += 1,
            BucketStatus::TransferOut => stat.transfer_out += 1,
            BucketStatus::Transfered => stat.transfered += 1,
        }
    }
    stat
}

/// `RCCASTRANSEND`: a dry-run check of whether `transend` would currently
/// succeed for `direction`/`start`/`end`, without mutating anything. Useful
/// for a coordinator polling readiness before committing.
#[derive(Debug, Clone, Default)]
pub struct CasTransEndReport {
    pub ready: bool,
    pub blocking_buckets: Vec<u32>,
}

pub fn check_transend(inner: &Inner, direction: Direction, start: u32, end: u32) -> CoreResult<CasTransEndReport> {
    check_range(start, end)?;
    let mut report = CasTransEndReport::default();
    for h in start..=end {
        let bucket = &inner.buckets[h as usize];
        let ok = match direction {
            Direction::Out => {
                matches!(bucket.status, BucketStatus::TransferOut | BucketStatus::Transfered)
                    && bucket.keys() == 0
            }
            Direction::In => {
                bucket.status == BucketStatus::TransferIn
                    && bucket
                        .members
                        .iter()
                        .all(|k| inner.primary.get(k).map(|e| e.flag) == Some(KeyFlag::Normal))
            }
        };
        if !ok {
            report.blocking_buckets.push(h);
        }
    }
    report.ready = report.blocking_buckets.is_empty();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{NullFollowerFeed, NullWal, SystemClock};
    use crate::object::Value;

    fn test_ctx(wal: &dyn crate::collaborators::WalSink, followers: &dyn crate::collaborators::FollowerFeed, clock: &dyn crate::collaborators::Clock) -> Ctx<'_> {
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

    fn put(inner: &mut Inner, key: &[u8]) {
        inner.set(
            Bytes::copy_from_slice(key),
            Value::String(crate::object::RudisString::from_bytes(Bytes::from_static(b"1"))),
        );
    }

    #[test]
    fn single_key_transfer_end_to_end() {
        let mut inner = Inner::new(0);
        put(&mut inner, b"alpha");
        let h = crate::hash::bucket_of(b"alpha");
        let (wal, followers, clock) = (NullWal, NullFollowerFeed, SystemClock);
        let ctx = test_ctx(&wal, &followers, &clock);

        transbegin(&mut inner, Direction::Out, h, h, 7, false, |_| false).unwrap();
        assert_eq!(inner.buckets[h as usize].status, BucketStatus::TransferOut);

        assert_eq!(
            lock_key(&mut inner, &Bytes::from_static(b"alpha")).unwrap(),
            LockOutcome::Locked
        );
        assert_eq!(key_status(&inner, &Bytes::from_static(b"alpha")).unwrap(), KeyFlag::Transfering);

        assert_eq!(
            transend_key(&mut inner, &Bytes::from_static(b"alpha"), &ctx).unwrap(),
            TransEndKeyOutcome::Deleted
        );
        assert!(!inner.primary.contains_key(&Bytes::from_static(b"alpha")));
        assert_eq!(inner.buckets[h as usize].keys(), 0);

        transend(&mut inner, Direction::Out, h, h).unwrap();
        assert_eq!(inner.buckets[h as usize].status, BucketStatus::Transfered);

        let all_in_using = reset_buckets(&mut inner, h, h).unwrap();
        assert_eq!(bucket_status(&inner, h).unwrap(), BucketStatus::InUsing);
        // every other bucket started IN_USING too, so resetting the last
        // migrating one brings the whole table back to IN_USING.
        assert!(all_in_using);
    }

    #[test]
    fn locking_absent_key_then_rejecting_second_lock() {
        let mut inner = Inner::new(0);
        let h = crate::hash::bucket_of(b"ghost");
        transbegin(&mut inner, Direction::Out, h, h, 1, false, |_| false).unwrap();

        assert_eq!(
            lock_key(&mut inner, &Bytes::from_static(b"ghost")).unwrap(),
            LockOutcome::Locked
        );

        // find some other key hashing to the same bucket.
        let other = (0u64..100_000)
            .map(|i| Bytes::from(format!("other{i}")))
            .find(|k| crate::hash::bucket_of(k) == h)
            .expect("collision exists within search space");

        let err = lock_key(&mut inner, &other).unwrap_err();
        match err {
            CoreError::AlreadyLocked(k) => assert_eq!(k, Bytes::from_static(b"ghost")),
            other => panic!("expected AlreadyLocked, got {other:?}"),
        }

        unlock_key(&mut inner, &Bytes::from_static(b"ghost")).unwrap();
        assert!(matches!(get_locking_key(&inner, h).unwrap(), Locked::None));
    }

    #[test]
    fn resume_after_coordinator_reconnect() {
        let mut inner = Inner::new(0);
        let h = 12345u32;

        // Session A begins a transfer, then its connection drops (the
        // caller stops reporting it as a live transferer).
        transbegin(&mut inner, Direction::Out, h, h, 100, false, |_| false).unwrap();
        assert_eq!(inner.buckets[h as usize].owner_id, 100);

        // Session B, a fresh TRANS_OUT client, resumes the same bucket.
        let reply = transbegin(&mut inner, Direction::Out, h, h, 200, false, |_id| false).unwrap();
        assert_eq!(reply, TransBeginReply::Transfering);
        assert_eq!(inner.buckets[h as usize].owner_id, 200);
    }

    #[test]
    fn resume_is_refused_while_original_owner_still_live() {
        let mut inner = Inner::new(0);
        let h = 999u32;
        transbegin(&mut inner, Direction::Out, h, h, 100, false, |_| false).unwrap();

        let err = transbegin(&mut inner, Direction::Out, h, h, 200, false, |id| id == 100).unwrap_err();
        assert!(matches!(err, CoreError::BucketStateViolation(_)));
    }

    #[test]
    fn transend_out_rejects_nonempty_bucket() {
        let mut inner = Inner::new(0);
        put(&mut inner, b"alpha");
        let h = crate::hash::bucket_of(b"alpha");
        transbegin(&mut inner, Direction::Out, h, h, 1, false, |_| false).unwrap();
        let err = transend(&mut inner, Direction::Out, h, h).unwrap_err();
        assert!(matches!(err, CoreError::BucketStateViolation(_)));
    }

    #[test]
    fn setbucketstatus_round_trip_matches_transbegin_transend() {
        let mut inner = Inner::new(0);
        let h = 42u32;
        assert!(set_bucket_status(&mut inner, h, BucketStatus::TransferOut).unwrap());
        assert!(set_bucket_status(&mut inner, h, BucketStatus::Transfered).unwrap());
        assert!(!set_bucket_status(&mut inner, h, BucketStatus::InUsing).unwrap());
        assert_eq!(bucket_status(&inner, h).unwrap(), BucketStatus::InUsing);
    }

    #[test]
    fn setbucketstatus_rejects_illegal_transition() {
        let mut inner = Inner::new(0);
        let err = set_bucket_status(&mut inner, 0, BucketStatus::Transfered).unwrap_err();
        assert!(matches!(err, CoreError::BucketStateViolation(_)));
    }

    #[test]
    fn server_in_transfer_iff_some_bucket_not_in_using() {
        let inner = Inner::new(0);
        assert!(inner.buckets.iter().all(|b| b.status == BucketStatus::InUsing));

        let mut inner = Inner::new(0);
        let h = 5u32;
        transbegin(&mut inner, Direction::In, h, h, 1, false, |_| false).unwrap();
        assert!(inner.buckets.iter().any(|b| b.status != BucketStatus::InUsing));
    }
}
