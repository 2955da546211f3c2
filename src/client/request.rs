//! Outgoing request description

use crate::protocol::messages::common::SmbMessage;
use crate::protocol::smb2_constants::{Smb2Command, Smb2HeaderFlags};
use std::time::Duration;

/// A command body plus the header fields the caller controls. Message id,
/// credits and signature are filled in by the connection.
#[derive(Debug, Clone)]
pub struct Request {
    pub command: Smb2Command,
    pub body: Vec<u8>,
    pub session_id: u64,
    pub tree_id: u32,
    pub flags: Smb2HeaderFlags,
    /// Largest response payload the caller expects; drives the credit charge
    pub expected_response_size: usize,
    /// Overrides the configured request timeout
    pub timeout: Option<Duration>,
    /// Path announced to notification handlers when a CREATE is sent
    pub create_path: Option<String>,
}

impl Request {
    pub fn new(command: Smb2Command, body: Vec<u8>) -> Self {
        Self {
            command,
            body,
            session_id: 0,
            tree_id: 0,
            flags: Smb2HeaderFlags::empty(),
            expected_response_size: 0,
            timeout: None,
            create_path: None,
        }
    }

    pub fn from_message<M: SmbMessage>(command: Smb2Command, message: &M) -> Self {
        Self::new(command, message.serialize())
    }

    pub fn with_session(mut self, session_id: u64) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_tree(mut self, tree_id: u32) -> Self {
        self.tree_id = tree_id;
        self
    }

    pub fn with_flags(mut self, flags: Smb2HeaderFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn expecting(mut self, response_size: usize) -> Self {
        self.expected_response_size = response_size;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_create_path(mut self, path: impl Into<String>) -> Self {
        self.create_path = Some(path.into());
        self
    }
}
