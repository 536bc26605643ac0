use super::CommandParser;
use crate::client::Client;
use crate::error::CoreResult;
use crate::frame::Frame;
use crate::shared;

#[derive(Debug, Clone)]
pub struct Ping {}

impl Ping {
    pub fn from(_parser: &mut CommandParser) -> CoreResult<Self> {
        Ok(Self {})
    }

    pub fn apply(self, _client: &mut Client) -> Frame {
        shared::pong
    }
}
