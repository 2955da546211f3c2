//! End-to-end scenarios: correlation, teardown and notifications

use super::mock_server::{KeyedAuthenticator, TEST_SESSION_ID, TEST_SESSION_KEY};
use super::test_context::{settle, TestContext};
use crate::client::{ConnectionState, NotificationHandler, Request, Session};
use crate::error::{Error, ExchangeFailure, NtStatus};
use crate::protocol::messages::create::Smb2CreateRequest;
use crate::protocol::messages::oplock::{Smb2LeaseBreak, Smb2OplockBreak};
use crate::protocol::messages::FileId;
use crate::protocol::smb2_constants::{oplock_level, Smb2Command, Smb2Dialect, Smb2HeaderFlags};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

fn tagged_echo(tag: u16) -> Request {
    let [lo, hi] = tag.to_le_bytes();
    Request::new(Smb2Command::Echo, vec![4, 0, lo, hi])
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<String>>,
}

impl NotificationHandler for Recorder {
    fn on_async_create_request(&self, message_id: u64, path: &str) {
        self.seen
            .lock()
            .push(format!("create-request {} {}", message_id, path));
    }

    fn on_async_create_response(&self, message_id: u64, status: NtStatus, file_id: Option<FileId>) {
        self.seen.lock().push(format!(
            "create-response {} {} {:?}",
            message_id,
            status,
            file_id.map(|id| id.volatile)
        ));
    }

    fn on_oplock_break(&self, notification: &Smb2OplockBreak) {
        self.seen.lock().push(format!(
            "oplock-break {} level {}",
            notification.file_id.volatile, notification.oplock_level
        ));
    }

    fn on_lease_break(&self, notification: &Smb2LeaseBreak) {
        self.seen
            .lock()
            .push(format!("lease-break {:x}", notification.new_lease_state));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_response_reaches_its_own_caller() {
        let mut ctx = TestContext::new(Default::default(), Smb2Dialect::Smb311);
        let mut server = ctx.take_server();
        let script = tokio::spawn(async move {
            server.handshake(1).await;
            let path = server.accept_tree_connect().await;
            for _ in 0..3 {
                let request = server.recv_command(Smb2Command::Echo).await;
                assert!(server.verify_client(&request));
                server.reflect(&request).await;
            }
            let seven = server.recv().await;
            let eight = server.recv().await;
            assert!(server.verify_client(&seven));
            assert!(server.verify_client(&eight));
            // Answer the later request first
            server.reply(&eight, NtStatus::Success, &[4, 0, 8, 0]).await;
            server.reply(&seven, NtStatus::Success, &[4, 0, 7, 0]).await;
            (server, path)
        });

        let negotiated = ctx.connection.negotiate().await.unwrap();
        assert_eq!(negotiated.dialect, Smb2Dialect::Smb311);

        let mut authenticator = KeyedAuthenticator::new(TEST_SESSION_KEY);
        let session = Session::establish(&ctx.connection, &mut authenticator)
            .await
            .unwrap();
        assert!(authenticator.completed);
        assert_eq!(session.id(), TEST_SESSION_ID);
        assert!(session.is_signing());

        let tree = session.tree_connect(r"\\server\share").await.unwrap();
        for tag in 4..7 {
            let packet = tree.request(tagged_echo(tag)).await.unwrap();
            assert_eq!(packet.message_id(), tag as u64);
        }

        let seven = ctx
            .connection
            .send(tagged_echo(7).with_session(session.id()).with_tree(tree.tree_id()))
            .await
            .unwrap();
        let eight = ctx
            .connection
            .send(tagged_echo(8).with_session(session.id()).with_tree(tree.tree_id()))
            .await
            .unwrap();
        assert_eq!(seven.message_id(), 7);
        assert_eq!(eight.message_id(), 8);

        let seven = seven.await.unwrap();
        let eight = eight.await.unwrap();
        assert_eq!(seven.status(), NtStatus::Success);
        assert_eq!(seven.payload()[2], 7);
        assert_eq!(eight.payload()[2], 8);

        let (_server, path) = script.await.unwrap();
        assert_eq!(path, r"\\server\share");
        assert_eq!(ctx.connection.outstanding(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_hundred_concurrent_requests_answered_in_reverse() {
        let mut ctx = TestContext::negotiated(Smb2Dialect::Smb210).await;
        let mut server = ctx.take_server();
        let script = tokio::spawn(async move {
            let mut requests = Vec::new();
            for _ in 0..100 {
                requests.push(server.recv_command(Smb2Command::Echo).await);
            }
            for request in requests.iter().rev() {
                server.reflect(request).await;
            }
            server
        });

        let mut callers = Vec::new();
        for tag in 0..100u16 {
            let connection = ctx.connection.clone();
            callers.push(tokio::spawn(async move {
                let packet = connection.request(tagged_echo(tag)).await.unwrap();
                (tag, packet)
            }));
        }

        let mut ids = std::collections::HashSet::new();
        for caller in callers {
            let (tag, packet) = caller.await.unwrap();
            let [lo, hi] = tag.to_le_bytes();
            assert_eq!(&packet.payload()[..], &[4, 0, lo, hi]);
            assert!(ids.insert(packet.message_id()));
        }
        assert_eq!(ids.len(), 100);
        let _server = script.await.unwrap();
        assert_eq!(ctx.connection.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_end_of_stream_fails_every_outstanding_request() {
        let mut ctx = TestContext::negotiated(Smb2Dialect::Smb302).await;
        let mut server = ctx.take_server();

        let mut pending = Vec::new();
        for tag in 0..3 {
            pending.push(ctx.connection.send(tagged_echo(tag)).await.unwrap());
        }
        for _ in 0..3 {
            server.recv_command(Smb2Command::Echo).await;
        }
        drop(server);

        for response in pending {
            let outcome = tokio::time::timeout(Duration::from_secs(2), response)
                .await
                .expect("caller left waiting");
            assert!(matches!(outcome, Err(Error::TransportFailure(_))));
        }
        tokio::time::timeout(Duration::from_secs(2), ctx.connection.wait_disconnected())
            .await
            .unwrap();
        assert_eq!(ctx.connection.state(), ConnectionState::Disconnected);
        assert!(matches!(
            ctx.connection.failure(),
            Some(ExchangeFailure::Transport(_))
        ));

        // Nothing registered after teardown is left hanging
        assert!(matches!(
            ctx.connection.send(tagged_echo(9)).await,
            Err(Error::TransportFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_signature_mismatch_tears_connection_down() {
        let mut ctx = TestContext::established(Smb2Dialect::Smb302, 0).await;
        let session_id = ctx.session().id();
        let mut server = ctx.take_server();
        assert!(server.is_signing());

        let first = ctx
            .connection
            .send(tagged_echo(1).with_session(session_id))
            .await
            .unwrap();
        let second = ctx
            .connection
            .send(tagged_echo(2).with_session(session_id))
            .await
            .unwrap();

        let request = server.recv_command(Smb2Command::Echo).await;
        assert!(server.verify_client(&request));
        server.recv_command(Smb2Command::Echo).await;
        server.corrupt_signing();
        server.reflect(&request).await;

        assert!(matches!(first.await, Err(Error::IntegrityFailure(_))));
        assert!(matches!(second.await, Err(Error::IntegrityFailure(_))));
        assert_eq!(ctx.connection.state(), ConnectionState::Disconnected);
        assert!(matches!(
            ctx.connection.failure(),
            Some(ExchangeFailure::Integrity(_))
        ));
        assert!(!ctx.session().is_valid());
    }

    #[tokio::test]
    async fn test_interim_response_keeps_exchange_open_until_final() {
        let mut ctx = TestContext::negotiated(Smb2Dialect::Smb210).await;
        let mut server = ctx.take_server();

        let mut response = ctx
            .connection
            .send(Request::new(Smb2Command::ChangeNotify, vec![32, 0, 0, 0]))
            .await
            .unwrap();
        let message_id = response.message_id();

        let request = server.recv_command(Smb2Command::ChangeNotify).await;
        server.interim(&request, 0x99).await;

        assert!(tokio::time::timeout(Duration::from_millis(50), &mut response)
            .await
            .is_err());
        assert_eq!(ctx.connection.outstanding(), 1);

        assert!(ctx.connection.cancel(0, message_id).await.unwrap());
        let cancel = server.recv_command(Smb2Command::Cancel).await;
        assert_eq!(cancel.message_id(), message_id);
        assert_eq!(cancel.header().async_id, Some(0x99));
        assert_eq!(cancel.header().credits, 0);

        server
            .complete_async(&request, 0x99, NtStatus::Cancelled, &[9, 0, 0, 0, 0, 0, 0, 0, 0])
            .await;
        let packet = response.await.unwrap();
        assert_eq!(packet.status(), NtStatus::Cancelled);
        assert!(matches!(
            packet.into_result(),
            Err(Error::ProtocolStatus {
                status: NtStatus::Cancelled,
                ..
            })
        ));

        assert!(!ctx.connection.cancel(0, message_id).await.unwrap());
        assert_eq!(ctx.connection.state(), ConnectionState::Negotiated);
    }

    #[tokio::test]
    async fn test_compound_members_signed_and_correlated_separately() {
        let mut ctx = TestContext::established(Smb2Dialect::Smb302, 0).await;
        let session_id = ctx.session().id();
        let mut server = ctx.take_server();
        let script = tokio::spawn(async move {
            let members = server.recv_compound().await;
            assert_eq!(members.len(), 3);
            for member in &members {
                assert!(server.verify_client(member));
            }
            assert_eq!(members[0].header().next_command, 72);
            assert!(!members[0]
                .header()
                .flags
                .contains(Smb2HeaderFlags::RELATED_OPERATIONS));
            assert!(members[1]
                .header()
                .flags
                .contains(Smb2HeaderFlags::RELATED_OPERATIONS));
            assert_eq!(members[2].header().next_command, 0);
            for member in members.iter().rev() {
                server.reply(member, NtStatus::Success, &[4, 0, 0, 0]).await;
            }
            let ids = members.iter().map(|m| m.message_id()).collect::<Vec<_>>();
            (server, ids)
        });

        let requests: Vec<Request> = (1..=3)
            .map(|tag| tagged_echo(tag).with_session(session_id))
            .collect();
        let responses = ctx.connection.send_compound(&requests, true).await.unwrap();
        let mut ids = Vec::new();
        for response in responses {
            let expected = response.message_id();
            let packet = response.await.unwrap();
            assert_eq!(packet.message_id(), expected);
            assert!(packet.header().is_signed());
            ids.push(expected);
        }
        let (_server, served) = script.await.unwrap();
        assert_eq!(served, ids);
        assert_eq!(ctx.connection.outstanding(), 0);
        assert!(matches!(
            ctx.connection.send_compound(&[], false).await,
            Err(Error::InvalidParameter(_))
        ));
    }

    #[tokio::test]
    async fn test_notifications_dispatched_in_arrival_order() {
        let mut ctx = TestContext::established(Smb2Dialect::Smb300, 1).await;
        let recorder = Arc::new(Recorder::default());
        ctx.connection.subscribe(recorder.clone());

        let mut server = ctx.take_server();
        let file_id = FileId::with_values(1, 2);
        let script = tokio::spawn(async move {
            server.accept_tree_connect().await;
            let name = server.accept_create(file_id, oplock_level::BATCH).await;
            server
                .oplock_break(&Smb2OplockBreak {
                    oplock_level: oplock_level::LEVEL_II,
                    file_id,
                })
                .await;
            server
                .lease_break(&Smb2LeaseBreak {
                    new_epoch: 2,
                    flags: 1,
                    lease_key: [7; 16],
                    current_lease_state: 0x7,
                    new_lease_state: 0x1,
                })
                .await;
            let ack = server.recv_command(Smb2Command::OplockBreak).await;
            assert!(server.verify_client(&ack));
            server.reflect(&ack).await;
            (server, name)
        });

        let tree = ctx
            .session()
            .tree_connect(r"\\server\docs")
            .await
            .unwrap();
        let created = tree
            .create(&Smb2CreateRequest::open(r"reports\q3.txt").with_oplock(oplock_level::BATCH))
            .await
            .unwrap();
        assert_eq!(created.file_id, file_id);
        assert_eq!(created.oplock_level, oplock_level::BATCH);

        settle(|| recorder.seen.lock().len() == 4).await;
        let seen = recorder.seen.lock().clone();
        assert_eq!(seen.len(), 4);
        assert!(seen[0].starts_with("create-request ") && seen[0].ends_with(r"reports\q3.txt"));
        assert!(seen[1].starts_with("create-response ") && seen[1].ends_with("Some(2)"));
        assert_eq!(seen[2], "oplock-break 2 level 1");
        assert_eq!(seen[3], "lease-break 1");

        tree.acknowledge_oplock_break(&Smb2OplockBreak {
            oplock_level: oplock_level::LEVEL_II,
            file_id,
        })
        .await
        .unwrap();
        let (_server, name) = script.await.unwrap();
        assert_eq!(name, r"reports\q3.txt");
        assert_eq!(ctx.connection.state(), ConnectionState::Negotiated);
    }
}
