use super::CommandParser;
use crate::client::Client;
use crate::error::{CoreError, CoreResult};
use crate::frame::Frame;
use crate::object::{RudisString, Value};
use crate::shared;
use bytes::Bytes;

/// Kept despite falling outside the migration command table: the
/// round-trip law `SET k v; GET k = v` (§8) has to hold for anything else in
/// this crate to be testable end to end.
#[derive(Debug, Clone)]
pub struct Get {
    pub key: Bytes,
}

impl Get {
    pub fn from(parser: &mut CommandParser) -> CoreResult<Self> {
        Ok(Self { key: parser.required_string("GET")? })
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        let ctx = client.ctx();
        let mut db = client.db().lock();
        match db.lookup_read(&self.key, &ctx) {
            Some(value) => match value.as_string() {
                Some(s) => Frame::Bulk(s.get().clone()),
                None => shared::error_frame(&CoreError::WrongType),
            },
            None => Frame::Null,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Set {
    pub key: Bytes,
    pub value: Bytes,
}

impl Set {
    pub fn from(parser: &mut CommandParser) -> CoreResult<Self> {
        let key = parser.required_string("SET")?;
        let value = parser.required_string("SET")?;
        Ok(Self { key, value })
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        client
            .db()
            .lock()
            .set(self.key.clone(), Value::String(RudisString::from_bytes(self.value.clone())));
        client.propagate(vec![Bytes::from_static(b"SET"), self.key, self.value]);
        shared::ok
    }
}

#[derive(Debug, Clone)]
pub struct Append {
    pub key: Bytes,
    pub value: Bytes,
}

impl Append {
    pub fn from(parser: &mut CommandParser) -> CoreResult<Self> {
        let key = parser.required_string("APPEND")?;
        let value = parser.required_string("APPEND")?;
        Ok(Self { key, value })
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        let result = client.db().lock().append_string(&self.key, &self.value);
        match result {
            Ok(len) => {
                client.propagate(vec![Bytes::from_static(b"APPEND"), self.key, self.value]);
                Frame::Integer(len as i64)
            }
            Err(e) => shared::error_frame(&e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Strlen {
    pub key: Bytes,
}

impl Strlen {
    pub fn from(parser: &mut CommandParser) -> CoreResult<Self> {
        Ok(Self { key: parser.required_string("STRLEN")? })
    }

    pub fn apply(self, client: &mut Client) -> Frame {
        let ctx = client.ctx();
        let mut db = client.db().lock();
        match db.lookup_read(&self.key, &ctx) {
            Some(value) => match value.as_string() {
                Some(s) => Frame::Integer(s.len() as i64),
                None => shared::error_frame(&CoreError::WrongType),
            },
            None => Frame::Integer(0),
        }
    }
}
