mod db;
mod migration;
mod ping;
mod string;
mod unknown;

use crate::client::Client;
use crate::error::{CoreError, CoreResult};
use crate::frame::Frame;
use bytes::Bytes;
use std::vec;

use db::{
    Dbsize, Del, Exists, Flushall, Flushdb, Keys, Move, Persist, Pexpire, Pexpireat, Pttl,
    Randomkey, Rename, Renamenx, Scan, Select, Ttl, Type,
};
use migration::{
    Getbucketkeys, Gethashval, Rcbucketstatus, Rccastransend, Rcgetlockingkey, Rckeystatus,
    Rclockingkeys, Rclockkey, Rcresetbuckets, Rcsetbucketstatus, Rctransbegin, Rctransend,
    Rctransendkey, Rctransserver, Rctranstat, Rcunlockkey,
};
use ping::Ping;
use string::{Append, Get, Set, Strlen};
use unknown::Unknown;

/// Pulls positional arguments out of an already-parsed `Frame::Array`, the
/// same incremental style the reference dispatcher uses.
pub struct CommandParser {
    parts: vec::IntoIter<Frame>,
}

impl CommandParser {
    pub fn new(frame: Frame) -> CoreResult<CommandParser> {
        match frame {
            Frame::Array(parts) => Ok(CommandParser { parts: parts.into_iter() }),
            _ => Err(CoreError::syntax("expected a command array")),
        }
    }

    pub fn next(&mut self) -> Option<Frame> {
        self.parts.next()
    }

    pub fn remaining(&self) -> usize {
        self.parts.len()
    }

    pub fn has_next(&self) -> bool {
        self.remaining() > 0
    }

    pub fn next_string(&mut self) -> CoreResult<Option<Bytes>> {
        match self.next() {
            Some(Frame::Simple(s)) => Ok(Some(s)),
            Some(Frame::Bulk(b)) => Ok(Some(b)),
            Some(_) => Err(CoreError::syntax("expected a string argument")),
            None => Ok(None),
        }
    }

    pub fn required_string(&mut self, what: &str) -> CoreResult<Bytes> {
        self.next_string()?
            .ok_or_else(|| CoreError::invalid_argument(format!("{what} requires an argument")))
    }

    /// Accepts both a RESP integer and a numeric bulk/simple string — real
    /// clients send arguments as bulk strings even when they're numeric.
    pub fn next_integer(&mut self) -> CoreResult<Option<i64>> {
        match self.next() {
            Some(Frame::Integer(n)) => Ok(Some(n)),
            Some(Frame::Simple(s)) | Some(Frame::Bulk(s)) => std::str::from_utf8(&s)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .map(Some)
                .ok_or_else(|| CoreError::invalid_argument("expected an integer argument")),
            Some(_) => Err(CoreError::invalid_argument("expected an integer argument")),
            None => Ok(None),
        }
    }

    pub fn required_integer(&mut self, what: &str) -> CoreResult<i64> {
        self.next_integer()?
            .ok_or_else(|| CoreError::invalid_argument(format!("{what} requires an argument")))
    }
}

#[derive(Debug)]
pub enum Command {
    Ping(Ping),
    Select(Select),
    Exists(Exists),
    Del(Del),
    Type(Type),
    Randomkey(Randomkey),
    Keys(Keys),
    Dbsize(Dbsize),
    Flushdb(Flushdb),
    Flushall(Flushall),
    Rename(Rename),
    Renamenx(Renamenx),
    Move(Move),
    Scan(Scan),
    Pexpire(Pexpire),
    Pexpireat(Pexpireat),
    Ttl(Ttl),
    Pttl(Pttl),
    Persist(Persist),
    Get(Get),
    Set(Set),
    Append(Append),
    Strlen(Strlen),
    Gethashval(Gethashval),
    Getbucketkeys(Getbucketkeys),
    Rctransserver(Rctransserver),
    Rclockkey(Rclockkey),
    Rcunlockkey(Rcunlockkey),
    Rctransendkey(Rctransendkey),
    Rctransbegin(Rctransbegin),
    Rctransend(Rctransend),
    Rcresetbuckets(Rcresetbuckets),
    Rcsetbucketstatus(Rcsetbucketstatus),
    Rckeystatus(Rckeystatus),
    Rclockingkeys(Rclockingkeys),
    Rcbucketstatus(Rcbucketstatus),
    Rcgetlockingkey(Rcgetlockingkey),
    Rctranstat(Rctranstat),
    Rccastransend(Rccastransend),
    Unknown(Unknown),
}

impl Command {
    pub fn from_frame(frame: Frame) -> CoreResult<Command> {
        let mut parser = CommandParser::new(frame)?;
        let name = parser
            .next_string()?
            .ok_or_else(|| CoreError::syntax("empty command"))?;
        let name = String::from_utf8_lossy(&name).to_ascii_uppercase();

        Ok(match name.as_str() {
            "PING" => Command::Ping(Ping::from(&mut parser)?),
            "SELECT" => Command::Select(Select::from(&mut parser)?),
            "EXISTS" => Command::Exists(Exists::from(&mut parser)?),
            "DEL" => Command::Del(Del::from(&mut parser)?),
            "TYPE" => Command::Type(Type::from(&mut parser)?),
            "RANDOMKEY" => Command::Randomkey(Randomkey::from(&mut parser)?),
            "KEYS" => Command::Keys(Keys::from(&mut parser)?),
            "DBSIZE" => Command::Dbsize(Dbsize::from(&mut parser)?),
            "FLUSHDB" => Command::Flushdb(Flushdb::from(&mut parser)?),
            "FLUSHALL" => Command::Flushall(Flushall::from(&mut parser)?),
            "RENAME" => Command::Rename(Rename::from(&mut parser)?),
            "RENAMENX" => Command::Renamenx(Renamenx::from(&mut parser)?),
            "MOVE" => Command::Move(Move::from(&mut parser)?),
            "SCAN" => Command::Scan(Scan::from(&mut parser)?),
            "EXPIRE" => Command::Pexpire(Pexpire::from_seconds(&mut parser, false)?),
            "PEXPIRE" => Command::Pexpire(Pexpire::from_seconds(&mut parser, true)?),
            "EXPIREAT" => Command::Pexpireat(Pexpireat::from_seconds(&mut parser, false)?),
            "PEXPIREAT" => Command::Pexpireat(Pexpireat::from_seconds(&mut parser, true)?),
            "TTL" => Command::Ttl(Ttl::from(&mut parser)?),
            "PTTL" => Command::Pttl(Pttl::from(&mut parser)?),
            "PERSIST" => Command::Persist(Persist::from(&mut parser)?),
            "GET" => Command::Get(Get::from(&mut parser)?),
            "SET" => Command::Set(Set::from(&mut parser)?),
            "APPEND" => Command::Append(Append::from(&mut parser)?),
            "STRLEN" => Command::Strlen(Strlen::from(&mut parser)?),
            "GETHASHVAL" => Command::Gethashval(Gethashval::from(&mut parser)?),
            "HASHKEYS" => Command::Getbucketkeys(Getbucketkeys::from(&mut parser, false)?),
            "HASHKEYSSIZE" => Command::Getbucketkeys(Getbucketkeys::from(&mut parser, true)?),
            "RCTRANSSERVER" => Command::Rctransserver(Rctransserver::from(&mut parser)?),
            "RCLOCKKEY" => Command::Rclockkey(Rclockkey::from(&mut parser)?),
            "RCUNLOCKKEY" => Command::Rcunlockkey(Rcunlockkey::from(&mut parser)?),
            "RCTRANSENDKEY" => Command::Rctransendkey(Rctransendkey::from(&mut parser)?),
            "RCTRANSBEGIN" => Command::Rctransbegin(Rctransbegin::from(&mut parser)?),
            "RCTRANSEND" => Command::Rctransend(Rctransend::from(&mut parser)?),
            "RCRESETBUCKETS" => Command::Rcresetbuckets(Rcresetbuckets::from(&mut parser)?),
            "RCSETBUCKETSTATUS" => Command::Rcsetbucketstatus(Rcsetbucketstatus::from(&mut parser)?),
            "RCKEYSTATUS" => Command::Rckeystatus(Rckeystatus::from(&mut parser)?),
            "RCLOCKINGKEYS" => Command::Rclockingkeys(Rclockingkeys::from(&mut parser)?),
            "RCBUCKETSTATUS" => Command::Rcbucketstatus(Rcbucketstatus::from(&mut parser)?),
            "RCGETLOCKINGKEY" => Command::Rcgetlockingkey(Rcgetlockingkey::from(&mut parser)?),
            "RCTRANSTAT" => Command::Rctranstat(Rctranstat::from(&mut parser)?),
            "RCCASTRANSEND" => Command::Rccastransend(Rccastransend::from(&mut parser)?),
            other => Command::Unknown(Unknown::new(other.to_string())),
        })
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        match self {
            Command::Ping(c) => c.apply(client),
            Command::Select(c) => c.apply(client),
            Command::Exists(c) => c.apply(client),
            Command::Del(c) => c.apply(client),
            Command::Type(c) => c.apply(client),
            Command::Randomkey(c) => c.apply(client),
            Command::Keys(c) => c.apply(client),
            Command::Dbsize(c) => c.apply(client),
            Command::Flushdb(c) => c.apply(client),
            Command::Flushall(c) => c.apply(client),
            Command::Rename(c) => c.apply(client),
            Command::Renamenx(c) => c.apply(client),
            Command::Move(c) => c.apply(client),
            Command::Scan(c) => c.apply(client),
            Command::Pexpire(c) => c.apply(client),
            Command::Pexpireat(c) => c.apply(client),
            Command::Ttl(c) => c.apply(client),
            Command::Pttl(c) => c.apply(client),
            Command::Persist(c) => c.apply(client),
            Command::Get(c) => c.apply(client),
            Command::Set(c) => c.apply(client),
            Command::Append(c) => c.apply(client),
            Command::Strlen(c) => c.apply(client),
            Command::Gethashval(c) => c.apply(client),
            Command::Getbucketkeys(c) => c.apply(client),
            Command::Rctransserver(c) => c.apply(client),
            Command::Rclockkey(c) => c.apply(client),
            Command::Rcunlockkey(c) => c.apply(client),
            Command::Rctransendkey(c) => c.apply(client),
            Command::Rctransbegin(c) => c.apply(client),
            Command::Rctransend(c) => c.apply(client),
            Command::Rcresetbuckets(c) => c.apply(client),
            Command::Rcsetbucketstatus(c) => c.apply(client),
            Command::Rckeystatus(c) => c.apply(client),
            Command::Rclockingkeys(c) => c.apply(client),
            Command::Rcbucketstatus(c) => c.apply(client),
            Command::Rcgetlockingkey(c) => c.apply(client),
            Command::Rctranstat(c) => c.apply(client),
            Command::Rccastransend(c) => c.apply(client),
            Command::Unknown(c) => c.apply(client),
        }
    }
}
