//! Negotiation, timeouts and wire-level failure handling

use super::test_context::{settle, TestContext};
use crate::client::{ClientConfig, ConnectionState, Request};
use crate::error::{Error, ExchangeFailure, NtStatus};
use crate::protocol::messages::negotiate::NegotiateContext;
use crate::protocol::smb2_constants::{
    hash_algorithm, SecurityMode, Smb2Command, Smb2Dialect,
};
use std::time::Duration;

fn echo() -> Request {
    Request::new(Smb2Command::Echo, vec![4, 0, 0, 0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_negotiate_311_offers_preauth_context() {
        let mut ctx = TestContext::new(ClientConfig::default(), Smb2Dialect::Smb311);
        let mut server = ctx.take_server();
        let script = tokio::spawn(async move {
            let request = server.accept_negotiate().await;
            (server, request)
        });

        let negotiated = ctx.connection.negotiate().await.unwrap();
        let (_server, request) = script.await.unwrap();

        assert_eq!(request.dialects, Smb2Dialect::ALL.to_vec());
        assert_eq!(request.client_guid, ctx.connection.config().client_guid);
        assert!(request.security_mode.contains(SecurityMode::SIGNING_ENABLED));
        match request.negotiate_contexts.first() {
            Some(NegotiateContext::PreauthIntegrityCapabilities {
                hash_algorithms,
                salt,
            }) => {
                assert_eq!(hash_algorithms, &vec![hash_algorithm::SHA512]);
                assert_eq!(salt.len(), 32);
            }
            other => panic!("expected preauth context first, got {:?}", other),
        }

        assert_eq!(negotiated.dialect, Smb2Dialect::Smb311);
        assert!(!negotiated.server_requires_signing());
        assert_eq!(ctx.connection.state(), ConnectionState::Negotiated);
        assert_eq!(
            ctx.connection.negotiated().map(|n| n.server_guid),
            Some(negotiated.server_guid)
        );
    }

    #[tokio::test]
    async fn test_negotiate_rejects_dialect_not_offered() {
        let config = ClientConfig::builder()
            .dialects([Smb2Dialect::Smb202, Smb2Dialect::Smb210])
            .build()
            .unwrap();
        let mut ctx = TestContext::new(config, Smb2Dialect::Smb302);
        let mut server = ctx.take_server();
        let script = tokio::spawn(async move {
            let request = server.accept_negotiate().await;
            (server, request)
        });

        let outcome = ctx.connection.negotiate().await;
        assert!(matches!(outcome, Err(Error::NegotiationFailed(_))));
        let (_server, request) = script.await.unwrap();
        assert!(request.negotiate_contexts.is_empty());

        assert_eq!(ctx.connection.state(), ConnectionState::Disconnected);
        assert!(matches!(
            ctx.connection.failure(),
            Some(ExchangeFailure::Negotiation(_))
        ));
        assert!(ctx.connection.negotiated().is_none());
    }

    #[tokio::test]
    async fn test_negotiate_fails_when_required_signing_unsupported() {
        let config = ClientConfig::builder().signing_required(true).build().unwrap();
        let mut ctx = TestContext::new(config, Smb2Dialect::Smb210);
        let mut server = ctx.take_server();
        server.security_mode = SecurityMode::empty();
        let script = tokio::spawn(async move {
            server.accept_negotiate().await;
            server
        });

        assert!(matches!(
            ctx.connection.negotiate().await,
            Err(Error::NegotiationFailed(_))
        ));
        script.await.unwrap();
        assert_eq!(ctx.connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_requests_refused_before_negotiate() {
        let ctx = TestContext::new(ClientConfig::default(), Smb2Dialect::Smb210);
        assert!(matches!(
            ctx.connection.send(echo()).await,
            Err(Error::InvalidState(_))
        ));
        assert_eq!(ctx.connection.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_second_negotiate_times_out_on_structural_lock() {
        let config = ClientConfig::builder()
            .lock_timeout(Duration::from_millis(50))
            .build()
            .unwrap();
        let mut ctx = TestContext::new(config, Smb2Dialect::Smb210);
        let mut server = ctx.take_server();

        let first = {
            let connection = ctx.connection.clone();
            tokio::spawn(async move { connection.negotiate().await })
        };
        settle(|| ctx.connection.state() == ConnectionState::Negotiating).await;
        assert_eq!(ctx.connection.state(), ConnectionState::Negotiating);

        // The server sits on the first negotiate, so the lock stays held
        assert!(matches!(
            ctx.connection.negotiate().await,
            Err(Error::TransportTimeout)
        ));

        server.accept_negotiate().await;
        let negotiated = first.await.unwrap().unwrap();
        assert_eq!(negotiated.dialect, Smb2Dialect::Smb210);

        assert!(matches!(
            ctx.connection.negotiate().await,
            Err(Error::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_request_timeout_abandons_exchange() {
        let mut ctx = TestContext::negotiated(Smb2Dialect::Smb302).await;
        let mut server = ctx.take_server();

        let outcome = ctx
            .connection
            .request(echo().with_timeout(Duration::from_millis(50)))
            .await;
        assert!(matches!(outcome, Err(Error::Timeout)));
        assert_eq!(ctx.connection.outstanding(), 0);

        // A late answer finds no waiter and is dropped
        let late = server.recv_command(Smb2Command::Echo).await;
        server.reflect(&late).await;

        let script = tokio::spawn(async move {
            let request = server.recv_command(Smb2Command::Echo).await;
            assert!(request.message_id() > late.message_id());
            server.reflect(&request).await;
            server
        });
        ctx.connection.echo().await.unwrap();
        let _server = script.await.unwrap();
        assert_eq!(ctx.connection.state(), ConnectionState::Negotiated);
    }

    #[tokio::test]
    async fn test_final_response_after_abandoned_async_grants_no_refund() {
        let mut ctx = TestContext::negotiated(Smb2Dialect::Smb302).await;
        let mut server = ctx.take_server();

        let waiting = {
            let connection = ctx.connection.clone();
            tokio::spawn(async move {
                connection
                    .request(
                        Request::new(Smb2Command::ChangeNotify, vec![32, 0, 0, 0])
                            .with_timeout(Duration::from_millis(100)),
                    )
                    .await
            })
        };
        let request = server.recv_command(Smb2Command::ChangeNotify).await;
        server.interim(&request, 0x77).await;

        assert!(matches!(waiting.await.unwrap(), Err(Error::Timeout)));
        assert_eq!(ctx.connection.outstanding(), 0);
        let before = ctx.connection.available_credits();

        // Echo costs one credit and the server now grants one back, so any
        // change in the window comes from the late async completion
        server.grant = 1;
        server
            .complete_async(&request, 0x77, NtStatus::Cancelled, &[9, 0, 0, 0, 0, 0, 0, 0, 0])
            .await;
        let script = tokio::spawn(async move {
            let echo = server.recv_command(Smb2Command::Echo).await;
            server.reflect(&echo).await;
            server
        });
        ctx.connection.echo().await.unwrap();
        let _server = script.await.unwrap();

        assert_eq!(ctx.connection.available_credits(), before);
        assert_eq!(ctx.connection.state(), ConnectionState::Negotiated);
    }

    #[tokio::test]
    async fn test_error_status_resolves_as_packet() {
        let mut ctx = TestContext::negotiated(Smb2Dialect::Smb210).await;
        let mut server = ctx.take_server();
        let script = tokio::spawn(async move {
            let request = server.recv_command(Smb2Command::Echo).await;
            server
                .reply(&request, NtStatus::AccessDenied, &[9, 0, 0, 0, 0, 0, 0, 0, 0])
                .await;
            server
        });

        let packet = ctx.connection.request(echo()).await.unwrap();
        assert_eq!(packet.status(), NtStatus::AccessDenied);
        assert!(packet.error_response().is_some());
        assert!(matches!(
            packet.into_result(),
            Err(Error::ProtocolStatus {
                status: NtStatus::AccessDenied,
                command: Smb2Command::Echo,
            })
        ));

        let _server = script.await.unwrap();
        assert_eq!(ctx.connection.state(), ConnectionState::Negotiated);
    }

    #[tokio::test]
    async fn test_undecodable_frame_tears_connection_down() {
        let mut ctx = TestContext::negotiated(Smb2Dialect::Smb300).await;
        let mut server = ctx.take_server();

        let pending = ctx.connection.send(echo()).await.unwrap();
        server.recv_command(Smb2Command::Echo).await;
        server.send_raw(b"this is not an SMB2 message at all, not even close").await;

        assert!(matches!(pending.await, Err(Error::DecodeFailure(_))));
        assert_eq!(ctx.connection.state(), ConnectionState::Disconnected);
        assert!(matches!(
            ctx.connection.failure(),
            Some(ExchangeFailure::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_local_disconnect_is_idempotent() {
        let mut ctx = TestContext::negotiated(Smb2Dialect::Smb210).await;
        let _server = ctx.take_server();

        let pending = ctx.connection.send(echo()).await.unwrap();
        ctx.connection.disconnect().await.unwrap();
        ctx.connection.disconnect().await.unwrap();

        assert!(matches!(pending.await, Err(Error::TransportFailure(_))));
        assert_eq!(ctx.connection.failure(), Some(ExchangeFailure::Disconnected));
        assert_eq!(ctx.connection.outstanding(), 0);
    }
}
