//! One SMB2 connection: negotiation, request dispatch and the receive loop
//!
//! Any number of tasks may send concurrently. Message ids come from the
//! credit window, raw writes are serialized by the writer mutex, and each
//! caller waits on its own correlation entry. A single receive loop per
//! connection decodes frames, checks signatures, returns credits and
//! resolves waiters. A transport, decode or integrity failure tears the
//! connection down and fails every outstanding exchange.

use super::config::ClientConfig;
use super::correlation::{CorrelationTable, Resolution, ResponseFuture};
use super::credits::{CreditGrant, CreditWindow};
use super::lock::CrossThreadLock;
use super::notify::{Notification, NotificationBus, NotificationHandler};
use super::request::Request;
use crate::error::{Error, ExchangeFailure, NtStatus, Result};
use crate::protocol::header::Smb2Header;
use crate::protocol::messages::common::{Smb2EmptyBody, SmbMessage};
use crate::protocol::messages::create::Smb2CreateResponse;
use crate::protocol::messages::negotiate::{
    NegotiateContext, Smb2NegotiateRequest, Smb2NegotiateResponse,
};
use crate::protocol::messages::oplock::BreakNotification;
use crate::protocol::packet::{chain_compound, frame, Packet};
use crate::protocol::preauth::PreauthHash;
use crate::protocol::signing::SigningContext;
use crate::protocol::smb2_constants::*;
use crate::transport::{PacketReader, PacketWriter, SmbTransport, TcpTransport};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use rand::RngCore;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Process id stamped on every request
const CLIENT_PROCESS_ID: u32 = 0xFEFF;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Created,
    Negotiating,
    Negotiated,
    Disconnected,
}

/// Parameters fixed by the negotiate exchange for the connection's lifetime
#[derive(Debug, Clone)]
pub struct NegotiatedProperties {
    pub dialect: Smb2Dialect,
    pub server_guid: Uuid,
    pub security_mode: SecurityMode,
    pub capabilities: Smb2Capabilities,
    pub max_transact_size: u32,
    pub max_read_size: u32,
    pub max_write_size: u32,
    pub signing_algorithm: SigningAlgorithmId,
    pub system_time: u64,
    pub security_blob: Vec<u8>,
}

impl NegotiatedProperties {
    pub fn server_requires_signing(&self) -> bool {
        self.security_mode.contains(SecurityMode::SIGNING_REQUIRED)
    }
}

/// A serialized request registered in the correlation table but not yet
/// written
pub(crate) struct Outgoing {
    pub bytes: Vec<u8>,
    pub response: ResponseFuture,
}

struct Staged {
    outgoing: Outgoing,
    grant: CreditGrant,
}

pub(crate) struct ConnectionInner {
    pub(crate) config: ClientConfig,
    remote_addr: Option<SocketAddr>,
    writer: AsyncMutex<Box<dyn PacketWriter>>,
    table: Arc<CorrelationTable>,
    credits: CreditWindow,
    /// Signing contexts by session id, swapped whole on rekey
    signing: RwLock<HashMap<u64, Arc<SigningContext>>>,
    negotiated: RwLock<Option<NegotiatedProperties>>,
    state: watch::Sender<ConnectionState>,
    /// Held from sending NEGOTIATE until the receive loop applies the response
    structural_lock: Arc<CrossThreadLock>,
    notifications: NotificationBus,
    /// Connection-level preauth hash over the negotiate exchange
    preauth: Mutex<PreauthHash>,
    failure: Mutex<Option<ExchangeFailure>>,
}

/// Cloneable handle to a connection
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Connect over direct TCP
    pub async fn connect(addr: SocketAddr, config: ClientConfig) -> Result<Self> {
        let mut transport = TcpTransport::new();
        transport.connect(addr).await?;
        Self::new(Box::new(transport), config)
    }

    /// Take ownership of a connected transport and start the receive loop.
    /// Must be called from within a tokio runtime.
    pub fn new(transport: Box<dyn SmbTransport>, config: ClientConfig) -> Result<Self> {
        config.validate()?;
        if !transport.is_connected() {
            return Err(Error::TransportFailure(
                "transport is not connected".to_string(),
            ));
        }
        let remote_addr = transport.remote_addr();
        let (reader, writer) = transport.into_split()?;

        let (state, _) = watch::channel(ConnectionState::Created);
        let inner = Arc::new(ConnectionInner {
            credits: CreditWindow::new(config.credit_backlog),
            config,
            remote_addr,
            writer: AsyncMutex::new(writer),
            table: CorrelationTable::new(),
            signing: RwLock::new(HashMap::new()),
            negotiated: RwLock::new(None),
            state,
            structural_lock: Arc::new(CrossThreadLock::new()),
            notifications: NotificationBus::start(),
            preauth: Mutex::new(PreauthHash::new()),
            failure: Mutex::new(None),
        });

        tokio::spawn(receive_loop(Arc::downgrade(&inner), reader));
        debug!("Connection created (peer {:?})", remote_addr);
        Ok(Self { inner })
    }

    pub(crate) fn inner(&self) -> &Arc<ConnectionInner> {
        &self.inner
    }

    /// Negotiate dialect, limits and signing policy with the server
    pub async fn negotiate(&self) -> Result<NegotiatedProperties> {
        let inner = &self.inner;
        inner
            .structural_lock
            .lock_async(inner.config.lock_timeout)
            .await?;

        let state = inner.state();
        if state != ConnectionState::Created {
            inner.structural_lock.unlock();
            return Err(Error::InvalidState(format!(
                "cannot negotiate a connection in state {:?}",
                state
            )));
        }
        inner.set_state(ConnectionState::Negotiating);

        let negotiate = inner.negotiate_request();
        let request = Request::from_message(Smb2Command::Negotiate, &negotiate);
        let outgoing = match inner.prepare(&request).await {
            Ok(outgoing) => outgoing,
            Err(e) => {
                inner.teardown(ExchangeFailure::Negotiation(e.to_string()));
                return Err(e);
            }
        };
        if negotiate.offers_smb311() {
            inner.preauth.lock().update(&outgoing.bytes);
        }
        debug!("Negotiating dialects {:?}", negotiate.dialects);

        let response = inner.dispatch(outgoing).await?;
        match tokio::time::timeout(inner.config.request_timeout, response).await {
            Ok(outcome) => {
                outcome?;
            }
            Err(_) => {
                inner.teardown(ExchangeFailure::Negotiation(
                    "no negotiate response".to_string(),
                ));
                return Err(Error::Timeout);
            }
        }

        inner
            .negotiated()
            .ok_or_else(|| Error::NegotiationFailed("negotiate response not applied".to_string()))
    }

    /// Send a request and return the future its response resolves
    pub async fn send(&self, request: Request) -> Result<ResponseFuture> {
        self.inner.send(request).await
    }

    /// Send a request and wait for its terminal response. A non-success
    /// status is a resolved packet, not an error.
    pub async fn request(&self, request: Request) -> Result<Packet> {
        self.inner.request(request).await
    }

    /// Send several requests in one compound frame. The returned futures
    /// are in request order.
    pub async fn send_compound(
        &self,
        requests: &[Request],
        related: bool,
    ) -> Result<Vec<ResponseFuture>> {
        self.inner.send_compound(requests, related).await
    }

    /// ECHO round trip
    pub async fn echo(&self) -> Result<()> {
        self.request(Request::from_message(Smb2Command::Echo, &Smb2EmptyBody))
            .await?
            .into_result()?;
        Ok(())
    }

    /// Ask the server to cancel an outstanding request. Returns false when
    /// the request is no longer pending. CANCEL takes no credits and gets no
    /// response of its own; the original request completes, usually with
    /// `STATUS_CANCELLED`.
    pub async fn cancel(&self, session_id: u64, message_id: u64) -> Result<bool> {
        self.inner.cancel(session_id, message_id).await
    }

    /// Register a handler for server-initiated notifications
    pub fn subscribe(&self, handler: Arc<dyn NotificationHandler>) {
        self.inner.notifications.subscribe(handler);
    }

    /// Close the connection. Outstanding exchanges fail; repeated calls are
    /// harmless.
    pub async fn disconnect(&self) -> Result<()> {
        self.inner.teardown(ExchangeFailure::Disconnected);
        self.inner.close_writer().await
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Resolves once the connection reaches `Disconnected`
    pub async fn wait_disconnected(&self) {
        let mut state = self.inner.state.subscribe();
        let _ = state
            .wait_for(|state| *state == ConnectionState::Disconnected)
            .await;
    }

    pub fn negotiated(&self) -> Option<NegotiatedProperties> {
        self.inner.negotiated()
    }

    /// Why the connection was torn down
    pub fn failure(&self) -> Option<ExchangeFailure> {
        self.inner.failure.lock().clone()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.remote_addr
    }

    /// Exchanges still waiting for a terminal response
    pub fn outstanding(&self) -> usize {
        self.inner.table.outstanding()
    }

    pub fn available_credits(&self) -> usize {
        self.inner.credits.available()
    }

    pub fn is_signing_active(&self, session_id: u64) -> bool {
        self.inner.signing_for(session_id).is_some()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("remote_addr", &self.inner.remote_addr)
            .field("state", &self.inner.state())
            .field("outstanding", &self.inner.table.outstanding())
            .finish()
    }
}

impl ConnectionInner {
    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected || *state == next {
                return false;
            }
            debug!("Connection state {:?} -> {:?}", state, next);
            *state = next;
            true
        });
    }

    pub(crate) fn negotiated(&self) -> Option<NegotiatedProperties> {
        self.negotiated.read().clone()
    }

    /// Copy of the connection preauth hash; sessions extend their own copy
    pub(crate) fn preauth_snapshot(&self) -> PreauthHash {
        self.preauth.lock().clone()
    }

    pub(crate) fn signing_for(&self, session_id: u64) -> Option<Arc<SigningContext>> {
        if session_id == 0 {
            return None;
        }
        self.signing.read().get(&session_id).cloned()
    }

    pub(crate) fn install_signing(&self, session_id: u64, context: SigningContext) {
        debug!(
            "Session {:#x} signing with {}",
            session_id,
            context.algorithm_name()
        );
        self.signing.write().insert(session_id, Arc::new(context));
    }

    pub(crate) fn remove_signing(&self, session_id: u64) {
        self.signing.write().remove(&session_id);
    }

    fn negotiate_request(&self) -> Smb2NegotiateRequest {
        let mut request = Smb2NegotiateRequest::new(self.config.dialects.clone());
        request.security_mode = self.config.security_mode();
        request.capabilities = self.config.capabilities;
        request.client_guid = self.config.client_guid;
        if request.offers_smb311() {
            let mut salt = vec![0u8; 32];
            rand::thread_rng().fill_bytes(&mut salt);
            request = request.with_contexts(vec![
                NegotiateContext::preauth_sha512(salt),
                NegotiateContext::SigningCapabilities {
                    algorithms: vec![SigningAlgorithmId::AesCmac],
                },
            ]);
        }
        request
    }

    fn ensure_ready(&self, command: Smb2Command) -> Result<()> {
        match (self.state(), command) {
            (ConnectionState::Disconnected, _) => Err(self.closed_error()),
            (ConnectionState::Negotiating, Smb2Command::Negotiate) => Ok(()),
            (ConnectionState::Negotiated, Smb2Command::Negotiate) => Err(Error::InvalidState(
                "connection is already negotiated".to_string(),
            )),
            (ConnectionState::Negotiated, _) => Ok(()),
            (state, command) => Err(Error::InvalidState(format!(
                "cannot send {:?} in state {:?}",
                command, state
            ))),
        }
    }

    fn closed_error(&self) -> Error {
        self.failure
            .lock()
            .clone()
            .map(Error::from)
            .unwrap_or_else(|| Error::TransportFailure("connection is closed".to_string()))
    }

    /// Reserve credits, assign the message id, serialize, sign and register
    pub(crate) async fn prepare(&self, request: &Request) -> Result<Outgoing> {
        let staged = self.stage(request).await?;
        let mut outgoing = staged.outgoing;
        if let Err(e) = self.sign_member(request, request.session_id, &mut outgoing.bytes) {
            self.credits.refund(&staged.grant);
            return Err(e);
        }
        Ok(outgoing)
    }

    /// Sign one serialized request unless it is a session setup or its
    /// session has no key yet
    fn sign_member(&self, request: &Request, session_id: u64, bytes: &mut [u8]) -> Result<()> {
        if request.command == Smb2Command::SessionSetup {
            return Ok(());
        }
        match self.signing_for(session_id) {
            Some(context) => context.sign(bytes),
            None => Ok(()),
        }
    }

    /// Everything `prepare` does except signing
    async fn stage(&self, request: &Request) -> Result<Staged> {
        self.ensure_ready(request.command)?;
        let grant = self
            .credits
            .reserve(request.body.len(), request.expected_response_size)
            .await?;

        let charge_field = match self.negotiated.read().as_ref() {
            Some(negotiated) if negotiated.dialect.uses_credit_charge() => grant.charge,
            _ => 0,
        };

        let mut header = Smb2Header::new(request.command);
        header.credit_charge = charge_field;
        header.credits = grant.request;
        header.flags = request.flags;
        header.message_id = grant.message_id;
        header.process_id = CLIENT_PROCESS_ID;
        header.tree_id = request.tree_id;
        header.session_id = request.session_id;

        let bytes = frame(&header, &request.body);
        let response = match self.table.register(grant.message_id, request.command) {
            Ok(response) => response,
            Err(e) => {
                self.credits.refund(&grant);
                return Err(e);
            }
        };

        if let Some(path) = &request.create_path {
            self.notifications.publish(Notification::AsyncCreateRequest {
                message_id: grant.message_id,
                path: path.clone(),
            });
        }

        trace!(
            "Prepared {:?} as message {} ({} bytes)",
            request.command,
            grant.message_id,
            bytes.len()
        );
        Ok(Staged {
            outgoing: Outgoing { bytes, response },
            grant,
        })
    }

    /// Chain several requests into one frame. Each member keeps its own
    /// message id and exchange; signatures are applied after chaining, over
    /// each member including its padding. Members of a related chain that
    /// carry the `u64::MAX` session id sign with the preceding session.
    pub(crate) async fn send_compound(
        &self,
        requests: &[Request],
        related: bool,
    ) -> Result<Vec<ResponseFuture>> {
        if requests.is_empty() {
            return Err(Error::InvalidParameter("empty compound".to_string()));
        }

        let mut staged: Vec<Staged> = Vec::with_capacity(requests.len());
        for request in requests {
            match self.stage(request).await {
                Ok(member) => staged.push(member),
                Err(e) => {
                    for member in &staged {
                        self.credits.refund(&member.grant);
                    }
                    return Err(e);
                }
            }
        }

        let members: Vec<Vec<u8>> = staged
            .iter()
            .map(|member| member.outgoing.bytes.clone())
            .collect();
        let mut bytes = chain_compound(&members, related)?;

        let mut offset = 0usize;
        let mut session_id = 0u64;
        let last = requests.len() - 1;
        for (index, (request, member)) in requests.iter().zip(&members).enumerate() {
            let span = if index == last {
                bytes.len() - offset
            } else {
                (member.len() + 7) & !7
            };
            if !(related && request.session_id == u64::MAX) {
                session_id = request.session_id;
            }
            if let Err(e) = self.sign_member(request, session_id, &mut bytes[offset..offset + span]) {
                for member in &staged {
                    self.credits.refund(&member.grant);
                }
                return Err(e);
            }
            offset += span;
        }

        debug!(
            "Sending compound of {} requests ({} bytes, related {})",
            requests.len(),
            bytes.len(),
            related
        );
        self.write(bytes).await?;
        Ok(staged
            .into_iter()
            .map(|member| member.outgoing.response)
            .collect())
    }

    /// Write a prepared request; the response future is returned only once
    /// the bytes are on the wire
    pub(crate) async fn dispatch(&self, outgoing: Outgoing) -> Result<ResponseFuture> {
        let Outgoing { bytes, response } = outgoing;
        self.write(bytes).await?;
        Ok(response)
    }

    async fn write(&self, bytes: Vec<u8>) -> Result<()> {
        let outcome = self.writer.lock().await.write_packet(Bytes::from(bytes)).await;
        if let Err(e) = outcome {
            error!("Transport write failed: {}", e);
            self.teardown(ExchangeFailure::Transport(e.to_string()));
            return Err(Error::TransportFailure(e.to_string()));
        }
        Ok(())
    }

    pub(crate) async fn send(&self, request: Request) -> Result<ResponseFuture> {
        let outgoing = self.prepare(&request).await?;
        self.dispatch(outgoing).await
    }

    pub(crate) async fn request(&self, request: Request) -> Result<Packet> {
        let timeout = request.timeout.unwrap_or(self.config.request_timeout);
        let response = self.send(request).await?;
        self.await_response(response, timeout).await
    }

    /// Wait for a response; on timeout the exchange is abandoned
    pub(crate) async fn await_response(
        &self,
        response: ResponseFuture,
        timeout: Duration,
    ) -> Result<Packet> {
        let message_id = response.message_id();
        match tokio::time::timeout(timeout, response).await {
            Ok(outcome) => outcome,
            Err(_) => {
                debug!("Message {} timed out after {:?}", message_id, timeout);
                Err(Error::Timeout)
            }
        }
    }

    pub(crate) async fn cancel(&self, session_id: u64, message_id: u64) -> Result<bool> {
        self.ensure_ready(Smb2Command::Cancel)?;
        if !self.table.is_pending(message_id) {
            return Ok(false);
        }

        let mut header = Smb2Header::new(Smb2Command::Cancel);
        header.credits = 0;
        header.message_id = message_id;
        header.session_id = session_id;
        header.process_id = CLIENT_PROCESS_ID;
        header.async_id = self.table.async_id(message_id);

        let mut bytes = frame(&header, &Smb2EmptyBody.serialize());
        if let Some(context) = self.signing_for(session_id) {
            context.sign(&mut bytes)?;
        }
        debug!(
            "Cancelling message {} (async id {:?})",
            message_id, header.async_id
        );
        self.write(bytes).await?;
        Ok(true)
    }

    /// Move to `Disconnected` and fail everything outstanding. Only the
    /// first failure is recorded.
    pub(crate) fn teardown(&self, failure: ExchangeFailure) {
        let first = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                return false;
            }
            *state = ConnectionState::Disconnected;
            true
        });
        if first {
            match &failure {
                ExchangeFailure::Disconnected => info!("Connection closed"),
                other => warn!("Connection torn down: {}", other),
            }
            *self.failure.lock() = Some(failure.clone());
        }
        self.table.fail_all(failure);
        self.credits.close();
        self.structural_lock.unlock();
    }

    async fn close_writer(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        if writer.is_connected() {
            writer.disconnect().await?;
        }
        Ok(())
    }

    fn handle_frame(&self, frame: Bytes) -> std::result::Result<(), ExchangeFailure> {
        let packets =
            Packet::decode_frame(frame).map_err(|e| ExchangeFailure::Decode(e.to_string()))?;
        for packet in packets {
            self.handle_packet(packet)?;
        }
        Ok(())
    }

    fn handle_packet(&self, packet: Packet) -> std::result::Result<(), ExchangeFailure> {
        let header = packet.header().clone();
        if !header.is_response() {
            return Err(ExchangeFailure::Decode(format!(
                "{:?} request received from server",
                header.command
            )));
        }
        trace!(
            "Received {:?} message {} status {}",
            header.command,
            header.message_id,
            header.status
        );

        if header.message_id == NOTIFICATION_MESSAGE_ID {
            return self.handle_notification(&packet);
        }

        if header.is_interim() {
            self.credits.grant(header.credits, header.credit_charge.max(1));
            if let Some(async_id) = header.async_id {
                self.table.resolve_interim(header.message_id, async_id);
            }
            return Ok(());
        }

        // Credits charged by a request that went async came back with its interim
        let charged = if self.table.finish_async(header.message_id) {
            0
        } else {
            header.credit_charge.max(1)
        };
        self.credits.grant(header.credits, charged);

        if header.command == Smb2Command::Negotiate
            && self.state() == ConnectionState::Negotiating
        {
            self.apply_negotiate(&packet)?;
        }

        self.check_signature(&packet)?;

        if header.command == Smb2Command::Create {
            let file_id = if header.status.is_success() {
                Smb2CreateResponse::parse(packet.payload())
                    .ok()
                    .map(|response| response.file_id)
            } else {
                None
            };
            self.notifications.publish(Notification::AsyncCreateResponse {
                message_id: header.message_id,
                status: header.status,
                file_id,
            });
        }

        if self.table.resolve(packet) == Resolution::Unknown {
            trace!("Response {} had no waiter", header.message_id);
        }
        Ok(())
    }

    fn handle_notification(&self, packet: &Packet) -> std::result::Result<(), ExchangeFailure> {
        if packet.command() != Smb2Command::OplockBreak {
            debug!(
                "Ignoring unsolicited {:?} notification",
                packet.command()
            );
            return Ok(());
        }
        let notification = BreakNotification::parse(packet.payload())
            .map_err(|e| ExchangeFailure::Decode(e.to_string()))?;
        self.notifications.publish(match notification {
            BreakNotification::Oplock(notification) => Notification::OplockBreak(notification),
            BreakNotification::Lease(notification) => Notification::LeaseBreak(notification),
        });
        Ok(())
    }

    /// Session setup responses are checked by the session itself, which
    /// only has the key once the final response is in hand.
    fn check_signature(&self, packet: &Packet) -> std::result::Result<(), ExchangeFailure> {
        let header = packet.header();
        if header.command == Smb2Command::SessionSetup {
            return Ok(());
        }
        let Some(context) = self.signing_for(header.session_id) else {
            return Ok(());
        };

        if !header.is_signed() {
            if header.status.is_error() {
                debug!(
                    "Accepting unsigned {} for message {}",
                    header.status, header.message_id
                );
                return Ok(());
            }
            return Err(ExchangeFailure::Integrity(format!(
                "unsigned {:?} response on signed session {:#x}",
                header.command, header.session_id
            )));
        }

        match context.verify(packet.raw()) {
            Ok(true) => Ok(()),
            Ok(false) => {
                error!(
                    "Signature mismatch on message {} ({:?})",
                    header.message_id, header.command
                );
                Err(ExchangeFailure::Integrity(format!(
                    "signature mismatch on message {}",
                    header.message_id
                )))
            }
            Err(e) => Err(ExchangeFailure::Integrity(e.to_string())),
        }
    }

    fn apply_negotiate(&self, packet: &Packet) -> std::result::Result<(), ExchangeFailure> {
        let negotiated = self
            .validate_negotiate(packet)
            .map_err(|e| ExchangeFailure::Negotiation(e.to_string()))?;

        if negotiated.dialect.uses_preauth_integrity() {
            self.preauth.lock().update(packet.raw());
        }
        let large_mtu = negotiated.dialect != Smb2Dialect::Smb202
            && negotiated.capabilities.contains(Smb2Capabilities::LARGE_MTU);
        self.credits.set_large_mtu(large_mtu);

        info!(
            "Negotiated SMB {} (signing {:?}, large MTU {}, max read {} write {})",
            negotiated.dialect,
            negotiated.signing_algorithm,
            large_mtu,
            negotiated.max_read_size,
            negotiated.max_write_size
        );
        *self.negotiated.write() = Some(negotiated);
        self.set_state(ConnectionState::Negotiated);
        self.structural_lock.unlock();
        Ok(())
    }

    fn validate_negotiate(&self, packet: &Packet) -> Result<NegotiatedProperties> {
        let status = packet.status();
        if status != NtStatus::Success {
            return Err(Error::NegotiationFailed(format!(
                "server returned {}",
                status
            )));
        }
        let response = Smb2NegotiateResponse::parse(packet.payload())?;
        let dialect = response.dialect_revision;
        if !self.config.dialects.contains(&dialect) {
            return Err(Error::NegotiationFailed(format!(
                "server selected dialect {} which was not offered",
                dialect
            )));
        }

        if dialect.uses_preauth_integrity() {
            match response.preauth_hash_algorithm() {
                Some(hash_algorithm::SHA512) => {}
                other => {
                    return Err(Error::NegotiationFailed(format!(
                        "unsupported preauth hash algorithm {:?}",
                        other
                    )))
                }
            }
        }

        let signing_algorithm = if dialect.is_smb3() {
            match response.signing_algorithm() {
                None | Some(SigningAlgorithmId::AesCmac) => SigningAlgorithmId::AesCmac,
                Some(other) => {
                    return Err(Error::NegotiationFailed(format!(
                        "server selected signing algorithm {:?} which was not offered",
                        other
                    )))
                }
            }
        } else {
            SigningAlgorithmId::HmacSha256
        };

        if self.config.signing_required
            && !response.security_mode.contains(SecurityMode::SIGNING_ENABLED)
        {
            return Err(Error::NegotiationFailed(
                "signing is required but the server does not support it".to_string(),
            ));
        }

        Ok(NegotiatedProperties {
            dialect,
            server_guid: response.server_guid,
            security_mode: response.security_mode,
            capabilities: response.capabilities,
            max_transact_size: response.max_transact_size,
            max_read_size: response.max_read_size,
            max_write_size: response.max_write_size,
            signing_algorithm,
            system_time: response.system_time,
            security_blob: response.security_blob,
        })
    }
}

/// Reads frames until the transport ends or the connection is dropped
async fn receive_loop(inner: Weak<ConnectionInner>, mut reader: Box<dyn PacketReader>) {
    loop {
        let frame = reader.read_packet().await;
        let Some(inner) = inner.upgrade() else {
            trace!("Connection dropped; receive loop exiting");
            return;
        };

        let failure = match frame {
            Ok(Some(frame)) => match inner.handle_frame(frame) {
                Ok(()) => continue,
                Err(failure) => failure,
            },
            Ok(None) => ExchangeFailure::Transport("end of stream".to_string()),
            Err(e) => ExchangeFailure::Transport(e.to_string()),
        };

        inner.teardown(failure);
        if let Err(e) = inner.close_writer().await {
            debug!("Closing writer after teardown: {}", e);
        }
        return;
    }
}
