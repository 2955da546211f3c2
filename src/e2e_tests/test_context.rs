//! Test context for end-to-end testing
//!
//! Wires a client connection to a [`MockServer`] over a loopback pipe and
//! brings both sides to a known state before a scenario starts.

use super::loopback::LoopbackTransport;
use super::mock_server::{KeyedAuthenticator, MockServer, TEST_SESSION_KEY};
use crate::client::{ClientConfig, Connection, Session};
use crate::protocol::smb2_constants::Smb2Dialect;
use std::time::Duration;

pub struct TestContext {
    pub connection: Connection,
    pub session: Option<Session>,
    server: Option<MockServer>,
}

impl TestContext {
    /// Connected but not negotiated
    pub fn new(config: ClientConfig, dialect: Smb2Dialect) -> Self {
        let (connection, end) = LoopbackTransport::connect(config).expect("loopback connect");
        Self {
            connection,
            session: None,
            server: Some(MockServer::new(end, dialect)),
        }
    }

    /// Negotiated at `dialect`
    pub async fn negotiated(dialect: Smb2Dialect) -> Self {
        let mut ctx = Self::new(ClientConfig::default(), dialect);
        let mut server = ctx.take_server();
        let script = tokio::spawn(async move {
            server.accept_negotiate().await;
            server
        });
        ctx.connection.negotiate().await.expect("negotiate");
        ctx.server = Some(script.await.expect("server script"));
        ctx
    }

    /// Negotiated with a signed session established after `rounds`
    /// challenge legs
    pub async fn established(dialect: Smb2Dialect, rounds: usize) -> Self {
        let mut ctx = Self::new(ClientConfig::default(), dialect);
        let mut server = ctx.take_server();
        let script = tokio::spawn(async move {
            server.handshake(rounds).await;
            server
        });
        ctx.connection.negotiate().await.expect("negotiate");
        let mut authenticator = KeyedAuthenticator::new(TEST_SESSION_KEY);
        let session = Session::establish(&ctx.connection, &mut authenticator)
            .await
            .expect("session setup");
        assert_eq!(authenticator.challenges, rounds);
        ctx.session = Some(session);
        ctx.server = Some(script.await.expect("server script"));
        ctx
    }

    /// Hand the server to a scenario script
    pub fn take_server(&mut self) -> MockServer {
        self.server.take().expect("server already taken")
    }

    pub fn session(&self) -> &Session {
        self.session.as_ref().expect("no session established")
    }
}

/// Poll `done` until it holds or about a second passes
pub async fn settle<F: Fn() -> bool>(done: F) {
    for _ in 0..200 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
