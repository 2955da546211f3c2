//! Authenticated sessions
//!
//! A session holds a weak reference to its connection. Tearing the
//! connection down invalidates the session; requests then fail with the
//! connection's failure instead of hanging.

use super::connection::{Connection, ConnectionInner, ConnectionState, NegotiatedProperties};
use super::request::Request;
use super::tree::TreeConnect;
use crate::auth::Authenticator;
use crate::error::{Error, ExchangeFailure, NtStatus, Result};
use crate::protocol::messages::common::{Smb2EmptyBody, SmbMessage};
use crate::protocol::messages::session::{Smb2SessionSetupRequest, Smb2SessionSetupResponse};
use crate::protocol::messages::tree::{Smb2TreeConnectRequest, Smb2TreeConnectResponse};
use crate::protocol::packet::Packet;
use crate::protocol::preauth::PreauthHash;
use crate::protocol::signing::SigningContext;
use crate::protocol::smb2_constants::{SessionFlags, Smb2Capabilities, Smb2Command};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    Authenticating,
    Established,
    LoggedOff,
}

#[derive(Debug, Clone, Copy)]
struct SessionData {
    state: SessionState,
    session_id: u64,
    flags: SessionFlags,
    signing: bool,
    /// Session this one replaces after a reconnect
    previous_session_id: u64,
}

pub struct Session {
    connection: Weak<ConnectionInner>,
    data: Mutex<SessionData>,
}

impl Session {
    pub fn new(connection: &Connection) -> Self {
        Self {
            connection: Arc::downgrade(connection.inner()),
            data: Mutex::new(SessionData {
                state: SessionState::New,
                session_id: 0,
                flags: SessionFlags::empty(),
                signing: false,
                previous_session_id: 0,
            }),
        }
    }

    /// Create a session and run setup with `authenticator`
    pub async fn establish(
        connection: &Connection,
        authenticator: &mut dyn Authenticator,
    ) -> Result<Self> {
        let session = Self::new(connection);
        session.setup(authenticator).await?;
        Ok(session)
    }

    pub fn id(&self) -> u64 {
        self.data.lock().session_id
    }

    pub fn state(&self) -> SessionState {
        self.data.lock().state
    }

    pub fn flags(&self) -> SessionFlags {
        self.data.lock().flags
    }

    pub fn is_signing(&self) -> bool {
        self.data.lock().signing
    }

    /// Established and still backed by a live connection
    pub fn is_valid(&self) -> bool {
        self.state() == SessionState::Established
            && self
                .connection
                .upgrade()
                .map(|inner| inner.state() == ConnectionState::Negotiated)
                .unwrap_or(false)
    }

    fn connection(&self) -> Result<Arc<ConnectionInner>> {
        self.connection
            .upgrade()
            .ok_or_else(|| Error::TransportFailure("connection is gone".to_string()))
    }

    fn established_id(&self) -> Result<u64> {
        let data = self.data.lock();
        if data.state != SessionState::Established {
            return Err(Error::InvalidState(format!(
                "session is {:?}",
                data.state
            )));
        }
        Ok(data.session_id)
    }

    /// Run the SESSION_SETUP exchange until the server accepts or rejects
    /// the authenticator's tokens
    pub async fn setup(&self, authenticator: &mut dyn Authenticator) -> Result<()> {
        let inner = self.connection()?;
        {
            let mut data = self.data.lock();
            if data.state != SessionState::New {
                return Err(Error::InvalidState(format!(
                    "cannot set up a session in state {:?}",
                    data.state
                )));
            }
            data.state = SessionState::Authenticating;
        }

        match self.authenticate(&inner, authenticator).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("Session setup failed: {}", e);
                self.data.lock().state = SessionState::LoggedOff;
                Err(e)
            }
        }
    }

    async fn authenticate(
        &self,
        inner: &Arc<ConnectionInner>,
        authenticator: &mut dyn Authenticator,
    ) -> Result<()> {
        let negotiated = inner
            .negotiated()
            .ok_or_else(|| Error::InvalidState("connection is not negotiated".to_string()))?;
        let uses_preauth = negotiated.dialect.uses_preauth_integrity();
        let mut preauth = inner.preauth_snapshot();
        let previous_session_id = self.data.lock().previous_session_id;

        debug!(
            "Authenticating with {} over SMB {}",
            authenticator.mechanism(),
            negotiated.dialect
        );
        let mut token = authenticator.initial_token()?;
        let mut session_id = 0u64;

        loop {
            let mut setup = Smb2SessionSetupRequest::new(token);
            setup.security_mode = inner.config.security_mode();
            setup.capabilities = inner.config.capabilities & Smb2Capabilities::DFS;
            setup.previous_session_id = previous_session_id;

            let request = Request::from_message(Smb2Command::SessionSetup, &setup)
                .with_session(session_id);
            let outgoing = inner.prepare(&request).await?;
            if uses_preauth {
                preauth.update(&outgoing.bytes);
            }
            let response = inner.dispatch(outgoing).await?;
            let packet = inner
                .await_response(response, inner.config.request_timeout)
                .await?;

            session_id = packet.header().session_id;
            self.data.lock().session_id = session_id;

            match packet.status() {
                NtStatus::MoreProcessingRequired => {
                    if uses_preauth {
                        preauth.update(packet.raw());
                    }
                    let body = Smb2SessionSetupResponse::parse(packet.payload())?;
                    token = authenticator.next_token(&body.security_blob)?;
                }
                NtStatus::Success => {
                    let body = Smb2SessionSetupResponse::parse(packet.payload())?;
                    authenticator.complete(&body.security_blob)?;
                    let key = authenticator.session_key();
                    return self.finish(inner, &negotiated, &packet, &body, key, &preauth);
                }
                status => {
                    return Err(Error::AuthenticationFailed(format!(
                        "server returned {}",
                        status
                    )))
                }
            }
        }
    }

    /// Activate signing and verify the final response
    fn finish(
        &self,
        inner: &ConnectionInner,
        negotiated: &NegotiatedProperties,
        packet: &Packet,
        body: &Smb2SessionSetupResponse,
        session_key: Option<Vec<u8>>,
        preauth: &PreauthHash,
    ) -> Result<()> {
        let session_id = packet.header().session_id;
        let signing_required =
            inner.config.signing_required || negotiated.server_requires_signing();

        let context = if body.is_guest_or_null() {
            if inner.config.signing_required {
                return Err(Error::AuthenticationFailed(
                    "guest or anonymous session cannot sign".to_string(),
                ));
            }
            None
        } else if !inner.config.signing_enabled {
            None
        } else {
            match session_key {
                Some(key) => Some(SigningContext::for_dialect(
                    negotiated.dialect,
                    negotiated.signing_algorithm,
                    &key,
                    Some(&preauth.value()[..]),
                )?),
                None if signing_required => {
                    return Err(Error::AuthenticationFailed(
                        "signing is required but no session key was established".to_string(),
                    ))
                }
                None => None,
            }
        };

        if let Some(context) = &context {
            let header = packet.header();
            if header.is_signed() {
                if !context.verify(packet.raw())? {
                    inner.teardown(ExchangeFailure::Integrity(format!(
                        "session setup response for {:#x} failed verification",
                        session_id
                    )));
                    return Err(Error::IntegrityFailure(
                        "session setup response signature mismatch".to_string(),
                    ));
                }
            } else if negotiated.dialect.uses_preauth_integrity() || signing_required {
                return Err(Error::IntegrityFailure(
                    "final session setup response is not signed".to_string(),
                ));
            }
        }

        let signing = context.is_some();
        if let Some(context) = context {
            inner.install_signing(session_id, context);
        }

        let mut data = self.data.lock();
        data.state = SessionState::Established;
        data.flags = body.session_flags;
        data.signing = signing;
        info!(
            "Session {:#x} established (flags {:?}, signing {})",
            session_id, body.session_flags, signing
        );
        Ok(())
    }

    /// Send a request scoped to this session
    pub async fn request(&self, request: Request) -> Result<Packet> {
        let session_id = self.established_id()?;
        let inner = self.connection()?;
        inner.request(request.with_session(session_id)).await
    }

    /// Connect to a share by UNC path, e.g. `\\server\share`
    pub async fn tree_connect(&self, path: &str) -> Result<TreeConnect> {
        let session_id = self.established_id()?;
        let inner = self.connection()?;
        let request = Request::from_message(
            Smb2Command::TreeConnect,
            &Smb2TreeConnectRequest::new(path),
        )
        .with_session(session_id);

        let packet = inner.request(request).await?.into_result()?;
        let response = Smb2TreeConnectResponse::parse(packet.payload())?;
        let tree_id = packet.header().tree_id;
        info!(
            "Connected to {} as tree {} ({:?})",
            path, tree_id, response.share_type
        );
        Ok(TreeConnect::new(
            Arc::downgrade(&inner),
            session_id,
            tree_id,
            path.to_string(),
            response,
        ))
    }

    /// Cancel one of this session's outstanding requests
    pub async fn cancel(&self, message_id: u64) -> Result<bool> {
        let session_id = self.established_id()?;
        self.connection()?.cancel(session_id, message_id).await
    }

    /// End the session. The connection keeps serving other sessions.
    pub async fn logoff(&self) -> Result<()> {
        let session_id = self.established_id()?;
        let inner = self.connection()?;
        let outcome = inner
            .request(
                Request::from_message(Smb2Command::Logoff, &Smb2EmptyBody)
                    .with_session(session_id),
            )
            .await;

        inner.remove_signing(session_id);
        self.data.lock().state = SessionState::LoggedOff;
        outcome?.into_result()?;
        debug!("Session {:#x} logged off", session_id);
        Ok(())
    }

    /// Re-establish this session on a replacement connection, presenting the
    /// old id as `PreviousSessionId`. Requests in flight on the old
    /// connection are not retried. This session is invalidated whether or not
    /// the new setup succeeds.
    pub async fn reconnect(
        &self,
        connection: &Connection,
        authenticator: &mut dyn Authenticator,
    ) -> Result<Session> {
        let previous_session_id = self.id();
        if previous_session_id == 0 {
            return Err(Error::InvalidState(
                "session was never assigned an id".to_string(),
            ));
        }

        let session = Session::new(connection);
        session.data.lock().previous_session_id = previous_session_id;
        let outcome = session.setup(authenticator).await;

        self.invalidate();
        match outcome {
            Ok(()) => {
                info!(
                    "Session {:#x} re-established as {:#x}",
                    previous_session_id,
                    session.id()
                );
                Ok(session)
            }
            Err(e) => Err(e),
        }
    }

    fn invalidate(&self) {
        let session_id = {
            let mut data = self.data.lock();
            data.state = SessionState::LoggedOff;
            data.signing = false;
            data.session_id
        };
        if let Some(inner) = self.connection.upgrade() {
            inner.remove_signing(session_id);
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = *self.data.lock();
        f.debug_struct("Session")
            .field("id", &format_args!("{:#x}", data.session_id))
            .field("state", &data.state)
            .field("signing", &data.signing)
            .finish()
    }
}
