//! Scripted SMB2 server for end-to-end tests
//!
//! Each test drives the server step by step: accept the negotiate, run the
//! session setup rounds, answer (or withhold) individual requests. The
//! server computes signatures and the 3.1.1 preauth hash independently of
//! the client, so a passing exchange means both sides agree on the bytes.

use super::loopback::ServerEnd;
use crate::auth::Authenticator;
use crate::error::{NtStatus, Result};
use crate::protocol::header::Smb2Header;
use crate::protocol::messages::common::SmbMessage;
use crate::protocol::messages::create::{Smb2CreateRequest, Smb2CreateResponse};
use crate::protocol::messages::negotiate::{
    NegotiateContext, Smb2NegotiateRequest, Smb2NegotiateResponse,
};
use crate::protocol::messages::oplock::{Smb2LeaseBreak, Smb2OplockBreak};
use crate::protocol::messages::session::{Smb2SessionSetupRequest, Smb2SessionSetupResponse};
use crate::protocol::messages::tree::{Smb2TreeConnectRequest, Smb2TreeConnectResponse};
use crate::protocol::messages::FileId;
use crate::protocol::packet::{frame, Packet};
use crate::protocol::preauth::PreauthHash;
use crate::protocol::signing::{HmacSha256Signer, SigningContext};
use crate::protocol::smb2_constants::*;

pub const TEST_SESSION_KEY: &[u8] = b"0123456789abcdef";
pub const TEST_SESSION_ID: u64 = 0x0000_4000_0000_0011;
pub const TEST_TREE_ID: u32 = 5;

pub struct MockServer {
    end: ServerEnd,
    pub dialect: Smb2Dialect,
    pub security_mode: SecurityMode,
    pub capabilities: Smb2Capabilities,
    /// Credits granted on every response
    pub grant: u16,
    pub session_id: u64,
    pub session_flags: SessionFlags,
    pub tree_id: u32,
    session_key: Option<Vec<u8>>,
    signing: Option<SigningContext>,
    preauth: PreauthHash,
}

impl MockServer {
    pub fn new(end: ServerEnd, dialect: Smb2Dialect) -> Self {
        Self {
            end,
            dialect,
            security_mode: SecurityMode::SIGNING_ENABLED,
            capabilities: Smb2Capabilities::LARGE_MTU,
            grant: 256,
            session_id: TEST_SESSION_ID,
            session_flags: SessionFlags::empty(),
            tree_id: TEST_TREE_ID,
            session_key: Some(TEST_SESSION_KEY.to_vec()),
            signing: None,
            preauth: PreauthHash::new(),
        }
    }

    pub fn without_session_key(mut self) -> Self {
        self.session_key = None;
        self
    }

    pub fn with_session_flags(mut self, flags: SessionFlags) -> Self {
        self.session_flags = flags;
        self
    }

    pub fn is_signing(&self) -> bool {
        self.signing.is_some()
    }

    /// Sign from now on with a key the client does not have
    pub fn corrupt_signing(&mut self) {
        self.signing = Some(SigningContext::new(Box::new(HmacSha256Signer::new(
            b"not the session key",
        ))));
    }

    pub async fn try_recv(&mut self) -> Result<Option<Packet>> {
        match self.end.reader.read_frame().await? {
            Some(frame) => Ok(Some(Packet::decode(frame)?)),
            None => Ok(None),
        }
    }

    pub async fn recv(&mut self) -> Packet {
        self.try_recv()
            .await
            .expect("server read failed")
            .expect("client closed the connection")
    }

    pub async fn recv_command(&mut self, command: Smb2Command) -> Packet {
        let packet = self.recv().await;
        assert_eq!(packet.command(), command, "unexpected request");
        packet
    }

    /// Read one frame and split it into its compound members
    pub async fn recv_compound(&mut self) -> Vec<Packet> {
        let frame = self
            .end
            .reader
            .read_frame()
            .await
            .expect("server read failed")
            .expect("client closed the connection");
        Packet::decode_frame(frame).expect("bad compound frame")
    }

    pub fn response_header(&self, request: &Packet, status: NtStatus) -> Smb2Header {
        let mut header = Smb2Header::new(request.command());
        header.status = status;
        header.flags = Smb2HeaderFlags::SERVER_TO_REDIR;
        header.credit_charge = request.header().credit_charge;
        header.credits = self.grant;
        header.message_id = request.message_id();
        header.process_id = request.header().process_id;
        header.tree_id = request.header().tree_id;
        header.session_id = request.header().session_id;
        header
    }

    /// Serialize a response, signing it when the session signs
    pub fn build(&self, header: &Smb2Header, body: &[u8]) -> Vec<u8> {
        let mut bytes = frame(header, body);
        if header.session_id != 0 && header.session_id == self.session_id {
            if let Some(signing) = &self.signing {
                signing.sign(&mut bytes).expect("server signing failed");
            }
        }
        bytes
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.end
            .writer
            .write_frame(bytes)
            .await
            .expect("server write failed");
    }

    pub async fn send(&mut self, header: &Smb2Header, body: &[u8]) {
        let bytes = self.build(header, body);
        self.send_raw(&bytes).await;
    }

    pub async fn reply(&mut self, request: &Packet, status: NtStatus, body: &[u8]) {
        let header = self.response_header(request, status);
        self.send(&header, body).await;
    }

    /// Echo the request body back as the response body
    pub async fn reflect(&mut self, request: &Packet) {
        let body = request.payload().to_vec();
        self.reply(request, NtStatus::Success, &body).await;
    }

    /// STATUS_PENDING in async form; the exchange stays open
    pub async fn interim(&mut self, request: &Packet, async_id: u64) {
        let mut header = self.response_header(request, NtStatus::Pending);
        header.async_id = Some(async_id);
        let bytes = frame(&header, &[9, 0, 0, 0, 0, 0, 0, 0, 0]);
        self.send_raw(&bytes).await;
    }

    /// Final response to a request that went async
    pub async fn complete_async(
        &mut self,
        request: &Packet,
        async_id: u64,
        status: NtStatus,
        body: &[u8],
    ) {
        let mut header = self.response_header(request, status);
        header.async_id = Some(async_id);
        header.credits = 0;
        self.send(&header, body).await;
    }

    pub async fn oplock_break(&mut self, notification: &Smb2OplockBreak) {
        self.notify(&notification.serialize()).await;
    }

    pub async fn lease_break(&mut self, notification: &Smb2LeaseBreak) {
        self.notify(&notification.serialize()).await;
    }

    async fn notify(&mut self, body: &[u8]) {
        let mut header = Smb2Header::new(Smb2Command::OplockBreak);
        header.flags = Smb2HeaderFlags::SERVER_TO_REDIR;
        header.credits = 0;
        header.message_id = NOTIFICATION_MESSAGE_ID;
        let bytes = frame(&header, body);
        self.send_raw(&bytes).await;
    }

    /// Check the signature on a request from the client
    pub fn verify_client(&self, request: &Packet) -> bool {
        match &self.signing {
            Some(signing) => {
                request.header().is_signed()
                    && signing.verify(request.raw()).expect("verification failed")
            }
            None => !request.header().is_signed(),
        }
    }

    pub async fn accept_negotiate(&mut self) -> Smb2NegotiateRequest {
        let request = self.recv_command(Smb2Command::Negotiate).await;
        let parsed = Smb2NegotiateRequest::parse(request.payload()).expect("bad negotiate");
        let preauth = self.dialect.uses_preauth_integrity();
        if preauth {
            self.preauth.update(request.raw());
        }

        let mut response = Smb2NegotiateResponse::new(self.dialect);
        response.security_mode = self.security_mode;
        response.capabilities = self.capabilities;
        if preauth {
            response.negotiate_contexts = vec![
                NegotiateContext::PreauthIntegrityCapabilities {
                    hash_algorithms: vec![hash_algorithm::SHA512],
                    salt: vec![0x5A; 32],
                },
                NegotiateContext::SigningCapabilities {
                    algorithms: vec![SigningAlgorithmId::AesCmac],
                },
            ];
        }

        let mut header = self.response_header(&request, NtStatus::Success);
        header.credit_charge = 0;
        let bytes = frame(&header, &response.serialize());
        if preauth {
            self.preauth.update(&bytes);
        }
        self.send_raw(&bytes).await;
        parsed
    }

    /// Answer `rounds` MORE_PROCESSING_REQUIRED legs, then accept. Returns
    /// every setup request received.
    pub async fn accept_session_setup(&mut self, rounds: usize) -> Vec<Smb2SessionSetupRequest> {
        let mut preauth = self.preauth.clone();
        let uses_preauth = self.dialect.uses_preauth_integrity();
        let mut requests = Vec::new();

        for round in 0..=rounds {
            let request = self.recv_command(Smb2Command::SessionSetup).await;
            requests.push(Smb2SessionSetupRequest::parse(request.payload()).expect("bad setup"));
            if uses_preauth {
                preauth.update(request.raw());
            }

            let mut header = self.response_header(&request, NtStatus::MoreProcessingRequired);
            header.session_id = self.session_id;

            if round < rounds {
                let body = Smb2SessionSetupResponse::new(SessionFlags::empty(), b"CHALLENGE".to_vec());
                let bytes = frame(&header, &body.serialize());
                if uses_preauth {
                    preauth.update(&bytes);
                }
                self.send_raw(&bytes).await;
                continue;
            }

            header.status = NtStatus::Success;
            let signs = !self
                .session_flags
                .intersects(SessionFlags::IS_GUEST | SessionFlags::IS_NULL);
            if let (true, Some(key)) = (signs, &self.session_key) {
                let algorithm = if self.dialect.is_smb3() {
                    SigningAlgorithmId::AesCmac
                } else {
                    SigningAlgorithmId::HmacSha256
                };
                self.signing = Some(
                    SigningContext::for_dialect(
                        self.dialect,
                        algorithm,
                        key,
                        Some(&preauth.value()[..]),
                    )
                    .expect("server key derivation failed"),
                );
            }
            let body = Smb2SessionSetupResponse::new(self.session_flags, b"DONE".to_vec());
            self.send(&header, &body.serialize()).await;
        }
        requests
    }

    /// Reject the next setup request with `status`
    pub async fn reject_session_setup(&mut self, status: NtStatus) -> Smb2SessionSetupRequest {
        let request = self.recv_command(Smb2Command::SessionSetup).await;
        let parsed = Smb2SessionSetupRequest::parse(request.payload()).expect("bad setup");
        self.reply(&request, status, &[9, 0, 0, 0, 0, 0, 0, 0, 0]).await;
        parsed
    }

    pub async fn accept_tree_connect(&mut self) -> String {
        let request = self.recv_command(Smb2Command::TreeConnect).await;
        assert!(self.verify_client(&request), "tree connect signature");
        let path = Smb2TreeConnectRequest::parse(request.payload())
            .expect("bad tree connect")
            .path;
        let mut header = self.response_header(&request, NtStatus::Success);
        header.tree_id = self.tree_id;
        let body = Smb2TreeConnectResponse::disk().serialize();
        self.send(&header, &body).await;
        path
    }

    /// Answer a CREATE with a fixed file id; returns the requested name
    pub async fn accept_create(&mut self, file_id: FileId, oplock_level: u8) -> String {
        let request = self.recv_command(Smb2Command::Create).await;
        let name = Smb2CreateRequest::parse(request.payload())
            .expect("bad create")
            .name;
        let body = Smb2CreateResponse::new(file_id, oplock_level).serialize();
        self.reply(&request, NtStatus::Success, &body).await;
        name
    }

    /// Answer an empty-bodied command such as LOGOFF or TREE_DISCONNECT
    pub async fn accept_empty(&mut self, command: Smb2Command) -> Packet {
        let request = self.recv_command(command).await;
        self.reply(&request, NtStatus::Success, &[4, 0, 0, 0]).await;
        request
    }

    /// Negotiate and establish a signed session in one step
    pub async fn handshake(&mut self, rounds: usize) {
        self.accept_negotiate().await;
        self.accept_session_setup(rounds).await;
    }
}

/// Authenticator with a fixed key and a scripted token exchange
#[derive(Debug, Clone)]
pub struct KeyedAuthenticator {
    key: Option<Vec<u8>>,
    pub challenges: usize,
    pub completed: bool,
}

impl KeyedAuthenticator {
    pub fn new(key: &[u8]) -> Self {
        Self {
            key: Some(key.to_vec()),
            challenges: 0,
            completed: false,
        }
    }
}

impl Authenticator for KeyedAuthenticator {
    fn mechanism(&self) -> &'static str {
        "test"
    }

    fn initial_token(&mut self) -> Result<Vec<u8>> {
        Ok(b"NEGOTIATE".to_vec())
    }

    fn next_token(&mut self, server_token: &[u8]) -> Result<Vec<u8>> {
        assert_eq!(server_token, b"CHALLENGE");
        self.challenges += 1;
        Ok(b"AUTHENTICATE".to_vec())
    }

    fn complete(&mut self, server_token: &[u8]) -> Result<()> {
        assert_eq!(server_token, b"DONE");
        self.completed = true;
        Ok(())
    }

    fn session_key(&self) -> Option<Vec<u8>> {
        self.key.clone()
    }
}
