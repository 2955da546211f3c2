//! Tree connects: requests scoped to one share

use super::connection::ConnectionInner;
use super::request::Request;
use crate::error::{Error, Result};
use crate::protocol::messages::common::{Smb2EmptyBody, SmbMessage};
use crate::protocol::messages::create::{Smb2CreateRequest, Smb2CreateResponse};
use crate::protocol::messages::oplock::Smb2OplockBreak;
use crate::protocol::messages::tree::Smb2TreeConnectResponse;
use crate::protocol::packet::Packet;
use crate::protocol::smb2_constants::{
    DesiredAccess, ShareCapabilities, ShareFlags, ShareType, Smb2Command,
};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeState {
    New,
    Connected,
    Disconnected,
}

pub struct TreeConnect {
    connection: Weak<ConnectionInner>,
    session_id: u64,
    tree_id: u32,
    path: String,
    share: Smb2TreeConnectResponse,
    state: Mutex<TreeState>,
}

impl TreeConnect {
    pub(crate) fn new(
        connection: Weak<ConnectionInner>,
        session_id: u64,
        tree_id: u32,
        path: String,
        share: Smb2TreeConnectResponse,
    ) -> Self {
        Self {
            connection,
            session_id,
            tree_id,
            path,
            share,
            state: Mutex::new(TreeState::Connected),
        }
    }

    pub fn tree_id(&self) -> u32 {
        self.tree_id
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn share_type(&self) -> ShareType {
        self.share.share_type
    }

    pub fn share_flags(&self) -> ShareFlags {
        self.share.share_flags
    }

    pub fn capabilities(&self) -> ShareCapabilities {
        self.share.capabilities
    }

    pub fn maximal_access(&self) -> DesiredAccess {
        self.share.maximal_access
    }

    pub fn state(&self) -> TreeState {
        *self.state.lock()
    }

    fn connection(&self) -> Result<Arc<ConnectionInner>> {
        let state = self.state();
        if state != TreeState::Connected {
            return Err(Error::InvalidState(format!("tree connect is {:?}", state)));
        }
        self.connection
            .upgrade()
            .ok_or_else(|| Error::TransportFailure("connection is gone".to_string()))
    }

    /// Send a request scoped to this share
    pub async fn request(&self, request: Request) -> Result<Packet> {
        let inner = self.connection()?;
        inner
            .request(request.with_session(self.session_id).with_tree(self.tree_id))
            .await
    }

    /// Send a CREATE. Handlers see the request when it is sent and the
    /// response when it arrives.
    pub async fn create(&self, create: &Smb2CreateRequest) -> Result<Smb2CreateResponse> {
        let request = Request::from_message(Smb2Command::Create, create)
            .with_create_path(create.name.clone());
        let packet = self.request(request).await?.into_result()?;
        Smb2CreateResponse::parse(packet.payload())
    }

    /// Acknowledge an oplock break with the level the client keeps
    pub async fn acknowledge_oplock_break(&self, acknowledgment: &Smb2OplockBreak) -> Result<()> {
        let request = Request::from_message(Smb2Command::OplockBreak, acknowledgment);
        self.request(request).await?.into_result()?;
        Ok(())
    }

    /// Leave the share. The session stays established.
    pub async fn disconnect(&self) -> Result<()> {
        let inner = self.connection()?;
        let outcome = inner
            .request(
                Request::from_message(Smb2Command::TreeDisconnect, &Smb2EmptyBody)
                    .with_session(self.session_id)
                    .with_tree(self.tree_id),
            )
            .await;
        *self.state.lock() = TreeState::Disconnected;
        outcome?.into_result()?;
        debug!("Disconnected from tree {} ({})", self.tree_id, self.path);
        Ok(())
    }
}

impl std::fmt::Debug for TreeConnect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeConnect")
            .field("tree_id", &self.tree_id)
            .field("path", &self.path)
            .field("share_type", &self.share.share_type)
            .field("state", &self.state())
            .finish()
    }
}
