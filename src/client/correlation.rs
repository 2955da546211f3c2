//! Message-ID correlation of requests and responses
//!
//! Each outstanding request owns a oneshot channel keyed by its message id.
//! The receive loop is the only resolver; the caller is the only consumer.
//! The table lock is held just long enough to insert or remove an entry, and
//! resolution sends into the channel without waiting for the caller.

use crate::error::{Error, ExchangeFailure, Result};
use crate::protocol::packet::Packet;
use crate::protocol::smb2_constants::Smb2Command;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::{debug, trace};

type Outcome = std::result::Result<Packet, ExchangeFailure>;

#[derive(Debug)]
struct PendingExchange {
    command: Smb2Command,
    sender: oneshot::Sender<Outcome>,
    /// Set once an interim response has been seen
    async_id: Option<u64>,
}

#[derive(Debug, Default)]
struct TableState {
    pending: HashMap<u64, PendingExchange>,
    /// Ids answered with an interim response whose final response is still
    /// due, whether or not a caller is still waiting for it
    went_async: HashSet<u64>,
    /// Set by `fail_all`; registrations after teardown fail immediately
    closed: Option<ExchangeFailure>,
}

/// Outcome of handing a response to the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The waiting caller received the packet
    Delivered,
    /// No exchange with this id: stale, duplicate or abandoned
    Unknown,
}

#[derive(Debug, Default)]
pub struct CorrelationTable {
    state: Mutex<TableState>,
}

impl CorrelationTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register an exchange and return the future its response resolves
    pub fn register(self: &Arc<Self>, message_id: u64, command: Smb2Command) -> Result<ResponseFuture> {
        let mut state = self.state.lock();
        if let Some(failure) = &state.closed {
            return Err(failure.clone().into());
        }
        if state.pending.contains_key(&message_id) {
            return Err(Error::DuplicateMessageId(message_id));
        }

        let (sender, receiver) = oneshot::channel();
        state.pending.insert(
            message_id,
            PendingExchange {
                command,
                sender,
                async_id: None,
            },
        );
        trace!("Registered message {} ({:?})", message_id, command);

        Ok(ResponseFuture {
            message_id,
            receiver,
            table: Arc::downgrade(self),
            finished: false,
        })
    }

    /// Deliver a terminal response to its caller
    pub fn resolve(&self, packet: Packet) -> Resolution {
        let message_id = packet.message_id();
        let exchange = self.state.lock().pending.remove(&message_id);

        match exchange {
            Some(exchange) => {
                if exchange.command != packet.command() {
                    debug!(
                        "Message {} registered as {:?} answered with {:?}",
                        message_id,
                        exchange.command,
                        packet.command()
                    );
                }
                if exchange.sender.send(Ok(packet)).is_err() {
                    // Caller went away between our removal and its own abandon
                    debug!("Caller for message {} is gone; response dropped", message_id);
                }
                Resolution::Delivered
            }
            None => {
                debug!("Discarding response for unknown message {}", message_id);
                Resolution::Unknown
            }
        }
    }

    /// Record an interim response; the exchange stays open for the final one
    pub fn resolve_interim(&self, message_id: u64, async_id: u64) -> Resolution {
        let mut state = self.state.lock();
        state.went_async.insert(message_id);
        match state.pending.get_mut(&message_id) {
            Some(exchange) => {
                trace!("Message {} went async as {}", message_id, async_id);
                exchange.async_id = Some(async_id);
                Resolution::Delivered
            }
            None => {
                debug!("Interim response for unknown message {}", message_id);
                Resolution::Unknown
            }
        }
    }

    /// Consume the interim marker for a final response. True when an interim
    /// response was seen for this id, even if its caller has since abandoned
    /// the exchange.
    pub fn finish_async(&self, message_id: u64) -> bool {
        self.state.lock().went_async.remove(&message_id)
    }

    /// Drop an exchange whose caller stopped waiting
    pub fn abandon(&self, message_id: u64) -> bool {
        let removed = self.state.lock().pending.remove(&message_id).is_some();
        if removed {
            trace!("Abandoned message {}", message_id);
        }
        removed
    }

    /// Fail every outstanding exchange and refuse new ones. Returns how many
    /// callers were failed. Later calls keep the first failure.
    pub fn fail_all(&self, failure: ExchangeFailure) -> usize {
        let drained: Vec<PendingExchange> = {
            let mut state = self.state.lock();
            if state.closed.is_none() {
                state.closed = Some(failure.clone());
            }
            state.went_async.clear();
            state.pending.drain().map(|(_, exchange)| exchange).collect()
        };

        let count = drained.len();
        for exchange in drained {
            let _ = exchange.sender.send(Err(failure.clone()));
        }
        if count > 0 {
            debug!("Failed {} outstanding exchanges: {}", count, failure);
        }
        count
    }

    /// AsyncId recorded from an interim response
    pub fn async_id(&self, message_id: u64) -> Option<u64> {
        self.state
            .lock()
            .pending
            .get(&message_id)
            .and_then(|exchange| exchange.async_id)
    }

    pub fn is_pending(&self, message_id: u64) -> bool {
        self.state.lock().pending.contains_key(&message_id)
    }

    pub fn outstanding(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed.is_some()
    }
}

/// Resolves with the response to one registered request.
///
/// Dropping it before resolution abandons the exchange, so a late response
/// is discarded as unknown.
#[derive(Debug)]
pub struct ResponseFuture {
    message_id: u64,
    receiver: oneshot::Receiver<Outcome>,
    table: Weak<CorrelationTable>,
    finished: bool,
}

impl ResponseFuture {
    pub fn message_id(&self) -> u64 {
        self.message_id
    }
}

impl Future for ResponseFuture {
    type Output = Result<Packet>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(outcome) => {
                this.finished = true;
                Poll::Ready(match outcome {
                    Ok(Ok(packet)) => Ok(packet),
                    Ok(Err(failure)) => Err(failure.into()),
                    Err(_) => Err(Error::TransportFailure(
                        "exchange dropped without a response".to_string(),
                    )),
                })
            }
        }
    }
}

impl Drop for ResponseFuture {
    fn drop(&mut self) {
        if !self.finished {
            if let Some(table) = self.table.upgrade() {
                table.abandon(self.message_id);
            }
        }
    }
}
