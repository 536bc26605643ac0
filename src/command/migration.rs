//! Command-level bindings for the bucket migration protocol (component F).
//! Each struct here only parses arguments, checks the role gate from the
//! external interface table, and calls into [`crate::migration`]; all of the
//! actual state-machine logic lives there.

use super::CommandParser;
use crate::bucket::{BucketStatus, Direction, Locked};
use crate::client::Client;
use crate::error::{CoreError, CoreResult};
use crate::frame::Frame;
use crate::migration::{self, LockOutcome, TransBeginReply, TransEndKeyOutcome};
use crate::object::KeyFlag;
use crate::session::Role;
use crate::shared;
use bytes::Bytes;

fn require_role(role: Role, allowed: &[Role]) -> CoreResult<()> {
    if allowed.contains(&role) {
        Ok(())
    } else {
        Err(CoreError::wrong_role(format!(
            "role {role:?} is not permitted to issue this command"
        )))
    }
}

fn parse_direction(parser: &mut CommandParser) -> CoreResult<Direction> {
    let raw = parser.required_string("direction")?;
    if raw.eq_ignore_ascii_case(b"in") {
        Ok(Direction::In)
    } else if raw.eq_ignore_ascii_case(b"out") {
        Ok(Direction::Out)
    } else {
        Err(CoreError::invalid_argument("direction must be 'in' or 'out'"))
    }
}

fn parse_bucket_id(parser: &mut CommandParser, what: &str) -> CoreResult<u32> {
    let n = parser.required_integer(what)?;
    if n < 0 {
        return Err(CoreError::invalid_argument(format!("{what} must be non-negative")));
    }
    Ok(n as u32)
}

fn key_flag_code(flag: KeyFlag) -> i64 {
    match flag {
        KeyFlag::Normal => 0,
        KeyFlag::Transfering => 1,
        KeyFlag::Transfered => 2,
    }
}

fn direction_arg(direction: Direction) -> Bytes {
    match direction {
        Direction::In => Bytes::from_static(b"in"),
        Direction::Out => Bytes::from_static(b"out"),
    }
}

fn bucket_id_arg(id: u32) -> Bytes {
    Bytes::from(id.to_string())
}

fn bucket_status_code(status: BucketStatus) -> i64 {
    match status {
        BucketStatus::InUsing => 0,
        BucketStatus::TransferIn => 1,
        BucketStatus::TransferOut => 2,
        BucketStatus::Transfered => 3,
    }
}

#[derive(Debug, Clone)]
pub struct Gethashval {
    pub key: Bytes,
}

impl Gethashval {
    pub fn from(parser: &mut CommandParser) -> CoreResult<Self> {
        Ok(Self { key: parser.required_string("GETHASHVAL")? })
    }

    pub fn apply(self, _client: &mut Client) -> Frame {
        Frame::Integer(crate::hash::bucket_of(&self.key) as i64)
    }
}

/// `HASHKEYS h [pattern]` / `HASHKEYSSIZE h`, unified via `size_only`.
#[derive(Debug, Clone)]
pub struct Getbucketkeys {
    pub h: u32,
    pub pattern: Option<Bytes>,
    pub size_only: bool,
}

impl Getbucketkeys {
    pub fn from(parser: &mut CommandParser, size_only: bool) -> CoreResult<Self> {
        let h = parse_bucket_id(parser, "HASHKEYS")?;
        let pattern = if size_only { None } else { parser.next_string()? };
        Ok(Self { h, pattern, size_only })
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        let db = client.db().lock();
        let Some(bucket) = db.buckets.get(self.h as usize) else {
            return shared::error_frame(&CoreError::invalid_argument(format!("bucket {} out of range", self.h)));
        };
        if self.size_only {
            return Frame::Integer(bucket.keys() as i64);
        }
        let matched: Vec<Frame> = bucket
            .members
            .iter()
            .filter(|k| self.pattern.as_ref().map_or(true, |p| crate::glob::glob_match(p, k)))
            .cloned()
            .map(Frame::Bulk)
            .collect();
        Frame::Array(matched)
    }
}

#[derive(Debug, Clone)]
pub struct Rctransserver {
    pub direction: Direction,
}

impl Rctransserver {
    pub fn from(parser: &mut CommandParser) -> CoreResult<Self> {
        Ok(Self { direction: parse_direction(parser)? })
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        let role = match self.direction {
            Direction::In => Role::TransIn,
            Direction::Out => Role::TransOut,
        };
        client.session.role = role;
        client.state.sessions.set_role(client.session.id, role);
        shared::ok
    }
}

#[derive(Debug, Clone)]
pub struct Rclockkey {
    pub key: Bytes,
}

impl Rclockkey {
    pub fn from(parser: &mut CommandParser) -> CoreResult<Self> {
        Ok(Self { key: parser.required_string("RCLOCKKEY")? })
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        let mut db = client.db().lock();
        let result = migration::lock_key(&mut db, &self.key);
        drop(db);
        match result {
            Ok(LockOutcome::Locked) => {
                client.propagate(vec![Bytes::from_static(b"RCLOCKKEY"), self.key]);
                shared::ok
            }
            Ok(LockOutcome::AlreadyLocked) => Frame::Simple(Bytes::from_static(b"locked")),
            Err(e) => shared::error_frame(&e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rcunlockkey {
    pub key: Bytes,
}

impl Rcunlockkey {
    pub fn from(parser: &mut CommandParser) -> CoreResult<Self> {
        Ok(Self { key: parser.required_string("RCUNLOCKKEY")? })
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        let mut db = client.db().lock();
        let result = migration::unlock_key(&mut db, &self.key);
        drop(db);
        match result {
            Ok(()) => {
                client.propagate(vec![Bytes::from_static(b"RCUNLOCKKEY"), self.key]);
                shared::ok
            }
            Err(e) => shared::error_frame(&e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rctransendkey {
    pub key: Bytes,
}

impl Rctransendkey {
    pub fn from(parser: &mut CommandParser) -> CoreResult<Self> {
        Ok(Self { key: parser.required_string("RCTRANSENDKEY")? })
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        if let Err(e) = require_role(client.session.role, &[Role::TransOut, Role::TransSlave]) {
            return shared::error_frame(&e);
        }
        let ctx = client.ctx();
        let mut db = client.db().lock();
        match migration::transend_key(&mut db, &self.key, &ctx) {
            Ok(TransEndKeyOutcome::Deleted) | Ok(TransEndKeyOutcome::AbsentReleased) => shared::ok,
            Err(e) => shared::error_frame(&e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rctransbegin {
    pub direction: Direction,
    pub start: u32,
    pub end: u32,
}

impl Rctransbegin {
    pub fn from(parser: &mut CommandParser) -> CoreResult<Self> {
        let direction = parse_direction(parser)?;
        let start = parse_bucket_id(parser, "RCTRANSBEGIN start")?;
        let end = parse_bucket_id(parser, "RCTRANSBEGIN end")?;
        Ok(Self { direction, start, end })
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        let allowed = match self.direction {
            Direction::Out => [Role::TransOut, Role::TransSlave],
            Direction::In => [Role::TransIn, Role::TransSlave],
        };
        if let Err(e) = require_role(client.session.role, &allowed) {
            return shared::error_frame(&e);
        }
        let is_slave = client.session.role == Role::TransSlave;
        let session_id = client.session.id;
        let sessions = &client.state.sessions;
        let mut db = client.db().lock();
        let result = migration::transbegin(&mut db, self.direction, self.start, self.end, session_id, is_slave, |id| {
            sessions.is_live_transferer(id)
        });
        drop(db);
        let args = vec![
            Bytes::from_static(b"RCTRANSBEGIN"),
            direction_arg(self.direction),
            bucket_id_arg(self.start),
            bucket_id_arg(self.end),
        ];
        match result {
            Ok(TransBeginReply::Ok) => {
                client.state.server_in_transfer.store(true, std::sync::atomic::Ordering::Relaxed);
                client.propagate(args);
                shared::ok
            }
            Ok(TransBeginReply::Transfering) => {
                client.propagate(args);
                Frame::Simple(Bytes::from_static(b"transfering"))
            }
            Err(e) => shared::error_frame(&e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rctransend {
    pub direction: Direction,
    pub start: u32,
    pub end: u32,
}

impl Rctransend {
    pub fn from(parser: &mut CommandParser) -> CoreResult<Self> {
        let direction = parse_direction(parser)?;
        let start = parse_bucket_id(parser, "RCTRANSEND start")?;
        let end = parse_bucket_id(parser, "RCTRANSEND end")?;
        Ok(Self { direction, start, end })
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        let allowed = match self.direction {
            Direction::Out => [Role::TransOut, Role::TransSlave],
            Direction::In => [Role::TransIn, Role::TransSlave],
        };
        if let Err(e) = require_role(client.session.role, &allowed) {
            return shared::error_frame(&e);
        }
        let mut db = client.db().lock();
        let result = migration::transend(&mut db, self.direction, self.start, self.end);
        drop(db);
        match result {
            Ok(()) => {
                client.propagate(vec![
                    Bytes::from_static(b"RCTRANSEND"),
                    direction_arg(self.direction),
                    bucket_id_arg(self.start),
                    bucket_id_arg(self.end),
                ]);
                shared::ok
            }
            Err(e) => shared::error_frame(&e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rcresetbuckets {
    pub start: u32,
    pub end: u32,
}

impl Rcresetbuckets {
    pub fn from(parser: &mut CommandParser) -> CoreResult<Self> {
        let start = parse_bucket_id(parser, "RCRESETBUCKETS start")?;
        let end = parse_bucket_id(parser, "RCRESETBUCKETS end")?;
        Ok(Self { start, end })
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        if let Err(e) = require_role(client.session.role, &[Role::TransOut]) {
            return shared::error_frame(&e);
        }
        let mut db = client.db().lock();
        let result = migration::reset_buckets(&mut db, self.start, self.end);
        drop(db);
        match result {
            Ok(all_in_using) => {
                if all_in_using {
                    client.state.server_in_transfer.store(false, std::sync::atomic::Ordering::Relaxed);
                }
                client.propagate(vec![
                    Bytes::from_static(b"RCRESETBUCKETS"),
                    bucket_id_arg(self.start),
                    bucket_id_arg(self.end),
                ]);
                shared::ok
            }
            Err(e) => shared::error_frame(&e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rcsetbucketstatus {
    pub h: u32,
    pub status: BucketStatus,
}

impl Rcsetbucketstatus {
    pub fn from(parser: &mut CommandParser) -> CoreResult<Self> {
        let h = parse_bucket_id(parser, "RCSETBUCKETSTATUS")?;
        let raw = parser.required_integer("RCSETBUCKETSTATUS status")?;
        let status = match raw {
            0 => BucketStatus::InUsing,
            1 => BucketStatus::TransferIn,
            2 => BucketStatus::TransferOut,
            3 => BucketStatus::Transfered,
            _ => return Err(CoreError::invalid_argument("unknown bucket status code")),
        };
        Ok(Self { h, status })
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        if let Err(e) = require_role(client.session.role, &[Role::TransSlave]) {
            return shared::error_frame(&e);
        }
        let mut db = client.db().lock();
        match migration::set_bucket_status(&mut db, self.h, self.status) {
            Ok(active) => {
                if active {
                    client.state.server_in_transfer.store(true, std::sync::atomic::Ordering::Relaxed);
                }
                shared::ok
            }
            Err(e) => shared::error_frame(&e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rckeystatus {
    pub key: Bytes,
}

impl Rckeystatus {
    pub fn from(parser: &mut CommandParser) -> CoreResult<Self> {
        Ok(Self { key: parser.required_string("RCKEYSTATUS")? })
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        let db = client.db().lock();
        match migration::key_status(&db, &self.key) {
            Ok(flag) => Frame::Integer(key_flag_code(flag)),
            Err(e) => shared::error_frame(&e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rclockingkeys {}

impl Rclockingkeys {
    pub fn from(_parser: &mut CommandParser) -> CoreResult<Self> {
        Ok(Self {})
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        let db = client.db().lock();
        let pairs = migration::locking_keys(&db);
        Frame::Array(
            pairs
                .into_iter()
                .map(|(h, key)| Frame::Array(vec![Frame::Integer(h as i64), Frame::Bulk(key)]))
                .collect(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct Rcbucketstatus {
    pub h: u32,
}

impl Rcbucketstatus {
    pub fn from(parser: &mut CommandParser) -> CoreResult<Self> {
        Ok(Self { h: parse_bucket_id(parser, "RCBUCKETSTATUS")? })
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        let db = client.db().lock();
        match migration::bucket_status(&db, self.h) {
            Ok(status) => Frame::Integer(bucket_status_code(status)),
            Err(e) => shared::error_frame(&e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rcgetlockingkey {
    pub h: u32,
}

impl Rcgetlockingkey {
    pub fn from(parser: &mut CommandParser) -> CoreResult<Self> {
        Ok(Self { h: parse_bucket_id(parser, "RCGETLOCKINGKEY")? })
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        let db = client.db().lock();
        match migration::get_locking_key(&db, self.h) {
            Ok(Locked::None) => Frame::Null,
            Ok(Locked::Present(key)) => Frame::Array(vec![Frame::Simple(Bytes::from_static(b"present")), Frame::Bulk(key)]),
            Ok(Locked::Absent(key)) => Frame::Array(vec![Frame::Simple(Bytes::from_static(b"absent")), Frame::Bulk(key)]),
            Err(e) => shared::error_frame(&e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rctranstat {}

impl Rctranstat {
    pub fn from(_parser: &mut CommandParser) -> CoreResult<Self> {
        Ok(Self {})
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        let in_transfer = client.state.server_in_transfer.load(std::sync::atomic::Ordering::Relaxed);
        let db = client.db().lock();
        let stat = migration::trans_stat(&db, in_transfer);
        Frame::Array(vec![
            Frame::Integer(stat.in_transfer as i64),
            Frame::Integer(stat.in_using as i64),
            Frame::Integer(stat.transfer_in as i64),
            Frame::Integer(stat.transfer_out as i64),
            Frame::Integer(stat.transfered as i64),
        ])
    }
}

#[derive(Debug, Clone)]
pub struct Rccastransend {
    pub direction: Direction,
    pub start: u32,
    pub end: u32,
}

impl Rccastransend {
    pub fn from(parser: &mut CommandParser) -> CoreResult<Self> {
        let direction = parse_direction(parser)?;
        let start = parse_bucket_id(parser, "RCCASTRANSEND start")?;
        let end = parse_bucket_id(parser, "RCCASTRANSEND end")?;
        Ok(Self { direction, start, end })
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        let db = client.db().lock();
        match migration::check_transend(&db, self.direction, self.start, self.end) {
            Ok(report) => {
                let mut out = vec![Frame::Integer(report.ready as i64)];
                out.extend(report.blocking_buckets.into_iter().map(|h| Frame::Integer(h as i64)));
                Frame::Array(out)
            }
            Err(e) => shared::error_frame(&e),
        }
    }
}
