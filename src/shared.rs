#![allow(non_upper_case_globals)]

use crate::error::CoreError;
use crate::frame::Frame;
use bytes::Bytes;
use std::time::SystemTime;

pub const ok: Frame = Frame::Simple(Bytes::from_static(b"OK"));
pub const pong: Frame = Frame::Simple(Bytes::from_static(b"PONG"));
pub const null_bulk: Frame = Frame::Null;
pub const syntax_err: Frame = Frame::Error(Bytes::from_static(b"ERR syntax error"));

/// Renders a `CoreError` the way the dispatcher replies to clients: every
/// error kind except `Invariant` is surfaced with a descriptive message and
/// leaves the core state unchanged (§7). `Invariant` is fatal and handled
/// separately by the caller, never turned into a reply.
pub fn error_frame(e: &CoreError) -> Frame {
    Frame::Error(Bytes::from(e.to_string()))
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

pub fn gen_runid() -> String {
    use rand::distributions::Alphanumeric;
    use rand::{thread_rng, Rng};

    let mut rng = thread_rng();
    (&mut rng)
        .sample_iter(&Alphanumeric)
        .take(40)
        .map(char::from)
        .collect()
}

