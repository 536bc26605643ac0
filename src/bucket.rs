//! Bucket control blocks and the single-key lock used during transfer.

use bytes::Bytes;
use std::collections::HashSet;

/// Sentinel meaning "no session currently owns this bucket."
pub const INIT_ID: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketStatus {
    InUsing,
    TransferIn,
    TransferOut,
    Transfered,
}

/// Direction a transfer command names, as distinct from the bucket status it
/// produces (`TransferOut`/`TransferIn`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

/// At most one key per bucket may be locked for single-key transfer at a
/// time (invariant 5 — never both variants populated). `Present` names a key
/// that already exists in the database; `Absent` reserves a name ahead of
/// its creation, as an owned copy (the reference implementation keeps a raw
/// pointer into the primary table plus a separately owned byte buffer for
/// the absent case; both collapse to owned `Bytes` here per the design note
/// on raw-pointer bookkeeping).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Locked {
    #[default]
    None,
    Present(Bytes),
    Absent(Bytes),
}

impl Locked {
    pub fn is_none(&self) -> bool {
        matches!(self, Locked::None)
    }
}

#[derive(Debug, Clone)]
pub struct Bucket {
    pub status: BucketStatus,
    pub members: HashSet<Bytes>,
    pub owner_id: u64,
    pub locked: Locked,
}

impl Bucket {
    pub fn new() -> Self {
        Bucket {
            status: BucketStatus::InUsing,
            members: HashSet::new(),
            owner_id: INIT_ID,
            locked: Locked::None,
        }
    }

    pub fn keys(&self) -> usize {
        self.members.len()
    }
}

impl Default for Bucket {
    fn default() -> Self {
        Bucket::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_bucket_is_in_using_and_unlocked() {
        let b = Bucket::new();
        assert_eq!(b.status, BucketStatus::InUsing);
        assert_eq!(b.owner_id, INIT_ID);
        assert!(b.locked.is_none());
        assert_eq!(b.keys(), 0);
    }

    #[test]
    fn keys_tracks_members_len() {
        let mut b = Bucket::new();
        b.members.insert(Bytes::from_static(b"a"));
        b.members.insert(Bytes::from_static(b"b"));
        assert_eq!(b.keys(), 2);
    }

    #[test]
    fn locked_present_and_absent_are_not_none() {
        assert!(!Locked::Present(Bytes::from_static(b"k")).is_none());
        assert!(!Locked::Absent(Bytes::from_static(b"k")).is_none());
        assert!(Locked::None.is_none());
    }
}
