use super::CommandParser;
use crate::client::Client;
use crate::database::ExpireOutcome;
use crate::error::{CoreError, CoreResult};
use crate::frame::Frame;
use crate::shared;
use bytes::Bytes;

#[derive(Debug, Clone)]
pub struct Select {
    pub index: u32,
}

impl Select {
    pub fn from(parser: &mut CommandParser) -> CoreResult<Self> {
        let index = parser.required_integer("SELECT")?;
        if index < 0 {
            return Err(CoreError::invalid_argument("SELECT index is out of range"));
        }
        Ok(Self { index: index as u32 })
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        if self.index >= client.state.dbnum() {
            return shared::error_frame(&CoreError::invalid_argument("DB index is out of range"));
        }
        client.session.db_index = self.index;
        shared::ok
    }
}

#[derive(Debug, Clone)]
pub struct Exists {
    pub keys: Vec<Bytes>,
}

impl Exists {
    pub fn from(parser: &mut CommandParser) -> CoreResult<Self> {
        let mut keys = Vec::new();
        while let Some(key) = parser.next_string()? {
            keys.push(key);
        }
        if keys.is_empty() {
            return Err(CoreError::invalid_argument("EXISTS requires at least one key"));
        }
        Ok(Self { keys })
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        let ctx = client.ctx();
        let mut db = client.db().lock();
        let count = self.keys.iter().filter(|k| db.contains(k, &ctx)).count();
        Frame::Integer(count as i64)
    }
}

#[derive(Debug, Clone)]
pub struct Del {
    pub keys: Vec<Bytes>,
}

impl Del {
    pub fn from(parser: &mut CommandParser) -> CoreResult<Self> {
        let mut keys = Vec::new();
        while let Some(key) = parser.next_string()? {
            keys.push(key);
        }
        if keys.is_empty() {
            return Err(CoreError::invalid_argument("DEL requires at least one key"));
        }
        Ok(Self { keys })
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        let ctx = client.ctx();
        let mut deleted = Vec::new();
        {
            let mut db = client.db().lock();
            for key in &self.keys {
                if db.delete(key, &ctx) {
                    deleted.push(key.clone());
                }
            }
        }
        if !deleted.is_empty() {
            let mut args = vec![Bytes::from_static(b"DEL")];
            args.extend(deleted.iter().cloned());
            client.propagate(args);
        }
        Frame::Integer(deleted.len() as i64)
    }
}

#[derive(Debug, Clone)]
pub struct Type {
    pub key: Bytes,
}

impl Type {
    pub fn from(parser: &mut CommandParser) -> CoreResult<Self> {
        Ok(Self { key: parser.required_string("TYPE")? })
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        let ctx = client.ctx();
        let mut db = client.db().lock();
        match db.lookup_read(&self.key, &ctx) {
            Some(value) => Frame::Simple(Bytes::from_static(value.type_tag().as_bytes())),
            None => Frame::Simple(Bytes::from_static(b"none")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Randomkey {}

impl Randomkey {
    pub fn from(_parser: &mut CommandParser) -> CoreResult<Self> {
        Ok(Self {})
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        let ctx = client.ctx();
        let mut db = client.db().lock();
        match db.random_key(&ctx) {
            Some(key) => Frame::Bulk(key),
            None => Frame::Null,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Keys {
    pub pattern: Bytes,
}

impl Keys {
    pub fn from(parser: &mut CommandParser) -> CoreResult<Self> {
        Ok(Self { pattern: parser.required_string("KEYS")? })
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        let ctx = client.ctx();
        let mut db = client.db().lock();
        let candidates: Vec<Bytes> = db.primary.keys().cloned().collect();
        let matched: Vec<Frame> = candidates
            .into_iter()
            .filter(|k| db.contains(k, &ctx) && crate::glob::glob_match(&self.pattern, k))
            .map(Frame::Bulk)
            .collect();
        Frame::Array(matched)
    }
}

#[derive(Debug, Clone)]
pub struct Dbsize {}

impl Dbsize {
    pub fn from(_parser: &mut CommandParser) -> CoreResult<Self> {
        Ok(Self {})
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        let db = client.db().lock();
        Frame::Integer(db.primary.len() as i64)
    }
}

#[derive(Debug, Clone)]
pub struct Flushdb {}

impl Flushdb {
    pub fn from(_parser: &mut CommandParser) -> CoreResult<Self> {
        Ok(Self {})
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        client.db().lock().flush();
        client.propagate(vec![Bytes::from_static(b"FLUSHDB")]);
        shared::ok
    }
}

#[derive(Debug, Clone)]
pub struct Flushall {}

impl Flushall {
    pub fn from(_parser: &mut CommandParser) -> CoreResult<Self> {
        Ok(Self {})
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        for db in &client.state.databases {
            db.lock().flush();
        }
        client.propagate(vec![Bytes::from_static(b"FLUSHALL")]);
        shared::ok
    }
}

#[derive(Debug, Clone)]
pub struct Rename {
    pub key: Bytes,
    pub newkey: Bytes,
}

impl Rename {
    pub fn from(parser: &mut CommandParser) -> CoreResult<Self> {
        let key = parser.required_string("RENAME")?;
        let newkey = parser.required_string("RENAME")?;
        Ok(Self { key, newkey })
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        let ctx = client.ctx();
        let result = client.db().lock().rename(&self.key, self.newkey.clone(), false, &ctx);
        match result {
            Ok(_) => {
                client.propagate(vec![Bytes::from_static(b"RENAME"), self.key, self.newkey]);
                shared::ok
            }
            Err(e) => shared::error_frame(&e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Renamenx {
    pub key: Bytes,
    pub newkey: Bytes,
}

impl Renamenx {
    pub fn from(parser: &mut CommandParser) -> CoreResult<Self> {
        let key = parser.required_string("RENAMENX")?;
        let newkey = parser.required_string("RENAMENX")?;
        Ok(Self { key, newkey })
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        let ctx = client.ctx();
        let result = client.db().lock().rename(&self.key, self.newkey.clone(), true, &ctx);
        match result {
            Ok(true) => {
                client.propagate(vec![Bytes::from_static(b"RENAMENX"), self.key, self.newkey]);
                Frame::Integer(1)
            }
            Ok(false) => Frame::Integer(0),
            Err(e) => shared::error_frame(&e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Move {
    pub key: Bytes,
    pub dst_db: u32,
}

impl Move {
    pub fn from(parser: &mut CommandParser) -> CoreResult<Self> {
        let key = parser.required_string("MOVE")?;
        let dst_db = parser.required_integer("MOVE")?;
        if dst_db < 0 {
            return Err(CoreError::invalid_argument("MOVE destination db is out of range"));
        }
        Ok(Self { key, dst_db: dst_db as u32 })
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        if self.dst_db >= client.state.dbnum() {
            return shared::error_frame(&CoreError::invalid_argument("MOVE destination db is out of range"));
        }
        let src_id = client.session.db_index;
        let Some(src) = client.state.database(src_id) else {
            return shared::error_frame(&CoreError::invalid_argument("source db is out of range"));
        };
        let Some(dst) = client.state.database(self.dst_db) else {
            return shared::error_frame(&CoreError::invalid_argument("destination db is out of range"));
        };
        if src_id == self.dst_db {
            return shared::error_frame(&CoreError::invalid_argument("source and destination objects are the same"));
        }
        let ctx_src = client.state.ctx(src_id);
        let ctx_dst = client.state.ctx(self.dst_db);

        // Lock ordering by numeric id avoids deadlocking against a
        // concurrent MOVE running in the opposite direction.
        let result = if src_id < self.dst_db {
            let mut src_guard = src.lock();
            let mut dst_guard = dst.lock();
            crate::database::move_key(&mut src_guard, &mut dst_guard, &self.key, &ctx_src, &ctx_dst)
        } else {
            let mut dst_guard = dst.lock();
            let mut src_guard = src.lock();
            crate::database::move_key(&mut src_guard, &mut dst_guard, &self.key, &ctx_src, &ctx_dst)
        };

        match result {
            Ok(()) => {
                client.propagate(vec![
                    Bytes::from_static(b"MOVE"),
                    self.key,
                    Bytes::from(self.dst_db.to_string()),
                ]);
                Frame::Integer(1)
            }
            Err(e) => shared::error_frame(&e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Scan {
    pub cursor: u64,
    pub count: usize,
    pub pattern: Option<Bytes>,
}

impl Scan {
    pub fn from(parser: &mut CommandParser) -> CoreResult<Self> {
        let cursor_raw = parser.required_string("SCAN")?;
        let cursor = std::str::from_utf8(&cursor_raw)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| CoreError::invalid_argument("invalid cursor"))?;

        let mut count = 10usize;
        let mut pattern = None;
        while let Some(opt) = parser.next_string()? {
            let opt_up = opt.to_ascii_uppercase();
            if opt_up == b"COUNT" {
                let n = parser.required_integer("SCAN COUNT")?;
                if n <= 0 {
                    return Err(CoreError::invalid_argument("COUNT must be positive"));
                }
                count = n as usize;
            } else if opt_up == b"MATCH" {
                pattern = Some(parser.required_string("SCAN MATCH")?);
            } else {
                return Err(CoreError::syntax("unknown SCAN option"));
            }
        }
        Ok(Self { cursor, count, pattern })
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        let ctx = client.ctx();
        let mut db = client.db().lock();
        let (next, keys) = db.scan(self.cursor, self.count, self.pattern.as_ref(), &ctx);
        Frame::Array(vec![
            Frame::Bulk(Bytes::from(next.to_string())),
            Frame::Array(keys.into_iter().map(Frame::Bulk).collect()),
        ])
    }
}

/// Shared by EXPIRE/PEXPIRE: `amount` is relative to "now" at apply time,
/// scaled to milliseconds by `is_ms`.
#[derive(Debug, Clone)]
pub struct Pexpire {
    pub key: Bytes,
    pub amount: i64,
    pub is_ms: bool,
}

impl Pexpire {
    pub fn from_seconds(parser: &mut CommandParser, is_ms: bool) -> CoreResult<Self> {
        let key = parser.required_string("EXPIRE")?;
        let amount = parser.required_integer("EXPIRE")?;
        Ok(Self { key, amount, is_ms })
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        let ctx = client.ctx();
        let delta_ms = if self.is_ms { self.amount } else { self.amount * 1000 };
        let deadline = ctx.now() + delta_ms;
        let result = client.db().lock().set_expire_at(&self.key, deadline, &ctx);
        match result {
            Ok(ExpireOutcome::Scheduled) => {
                client.propagate(vec![
                    Bytes::from_static(b"PEXPIREAT"),
                    self.key,
                    Bytes::from(deadline.to_string()),
                ]);
                Frame::Integer(1)
            }
            // The DEL this produced was already propagated by the core.
            Ok(ExpireOutcome::DeletedImmediately) => Frame::Integer(1),
            Err(CoreError::KeyNotFound) => Frame::Integer(0),
            Err(e) => shared::error_frame(&e),
        }
    }
}

/// Shared by EXPIREAT/PEXPIREAT: `amount` is already an absolute timestamp,
/// scaled to milliseconds by `is_ms`.
#[derive(Debug, Clone)]
pub struct Pexpireat {
    pub key: Bytes,
    pub amount: i64,
    pub is_ms: bool,
}

impl Pexpireat {
    pub fn from_seconds(parser: &mut CommandParser, is_ms: bool) -> CoreResult<Self> {
        let key = parser.required_string("EXPIREAT")?;
        let amount = parser.required_integer("EXPIREAT")?;
        Ok(Self { key, amount, is_ms })
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        let ctx = client.ctx();
        let deadline = if self.is_ms { self.amount } else { self.amount * 1000 };
        let result = client.db().lock().set_expire_at(&self.key, deadline, &ctx);
        match result {
            Ok(ExpireOutcome::Scheduled) => {
                client.propagate(vec![
                    Bytes::from_static(b"PEXPIREAT"),
                    self.key,
                    Bytes::from(deadline.to_string()),
                ]);
                Frame::Integer(1)
            }
            Ok(ExpireOutcome::DeletedImmediately) => Frame::Integer(1),
            Err(CoreError::KeyNotFound) => Frame::Integer(0),
            Err(e) => shared::error_frame(&e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Ttl {
    pub key: Bytes,
}

impl Ttl {
    pub fn from(parser: &mut CommandParser) -> CoreResult<Self> {
        Ok(Self { key: parser.required_string("TTL")? })
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        let ctx = client.ctx();
        let ms = client.db().lock().pttl(&self.key, &ctx);
        let seconds = if ms < 0 { ms } else { (ms + 999) / 1000 };
        Frame::Integer(seconds)
    }
}

#[derive(Debug, Clone)]
pub struct Pttl {
    pub key: Bytes,
}

impl Pttl {
    pub fn from(parser: &mut CommandParser) -> CoreResult<Self> {
        Ok(Self { key: parser.required_string("PTTL")? })
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        let ctx = client.ctx();
        let ms = client.db().lock().pttl(&self.key, &ctx);
        Frame::Integer(ms)
    }
}

#[derive(Debug, Clone)]
pub struct Persist {
    pub key: Bytes,
}

impl Persist {
    pub fn from(parser: &mut CommandParser) -> CoreResult<Self> {
        Ok(Self { key: parser.required_string("PERSIST")? })
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        let ctx = client.ctx();
        match client.db().lock().persist(&self.key, &ctx) {
            Ok(true) => {
                client.propagate(vec![Bytes::from_static(b"PERSIST"), self.key]);
                Frame::Integer(1)
            }
            Ok(false) => Frame::Integer(0),
            Err(CoreError::KeyNotFound) => Frame::Integer(0),
            Err(e) => shared::error_frame(&e),
        }
    }
}
