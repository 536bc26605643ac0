use crate::client::Client;
use crate::frame::Frame;
use bytes::{Bytes, BytesMut};

/// Not a real command — the fallback for anything `Command::from_frame`
/// doesn't recognize.
#[derive(Debug, Clone)]
pub struct Unknown {
    command_name: String,
}

impl Unknown {
    pub fn new(command_name: String) -> Unknown {
        Unknown { command_name }
    }

    pub fn apply(self, _client: &mut Client) -> Frame {
        let mut response = BytesMut::new();
        response.extend_from_slice(b"ERR unknown command '");
        response.extend_from_slice(self.command_name.as_bytes());
        response.extend_from_slice(b"'");
        Frame::Error(Bytes::from(response))
    }
}
