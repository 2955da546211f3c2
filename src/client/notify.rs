//! Server-initiated notifications
//!
//! The receive loop publishes into an unbounded channel and moves on. A
//! dispatcher task delivers each notification, in arrival order, to every
//! registered handler. A panicking handler is logged and skipped; it cannot
//! stall correlation or starve the other handlers.

use crate::error::NtStatus;
use crate::protocol::messages::common::FileId;
use crate::protocol::messages::oplock::{Smb2LeaseBreak, Smb2OplockBreak};
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, trace};

/// Notification kinds delivered to handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A CREATE request was sent; lets handlers tie later events to a path
    AsyncCreateRequest { message_id: u64, path: String },
    /// A CREATE response arrived
    AsyncCreateResponse {
        message_id: u64,
        status: NtStatus,
        file_id: Option<FileId>,
    },
    OplockBreak(Smb2OplockBreak),
    LeaseBreak(Smb2LeaseBreak),
}

/// Handler capability set. Every method defaults to doing nothing, so an
/// implementation overrides only what it needs.
pub trait NotificationHandler: Send + Sync + 'static {
    fn on_async_create_request(&self, _message_id: u64, _path: &str) {}

    fn on_async_create_response(
        &self,
        _message_id: u64,
        _status: NtStatus,
        _file_id: Option<FileId>,
    ) {
    }

    fn on_oplock_break(&self, _notification: &Smb2OplockBreak) {}

    fn on_lease_break(&self, _notification: &Smb2LeaseBreak) {}
}

fn deliver(handler: &dyn NotificationHandler, notification: &Notification) {
    match notification {
        Notification::AsyncCreateRequest { message_id, path } => {
            handler.on_async_create_request(*message_id, path)
        }
        Notification::AsyncCreateResponse {
            message_id,
            status,
            file_id,
        } => handler.on_async_create_response(*message_id, *status, *file_id),
        Notification::OplockBreak(notification) => handler.on_oplock_break(notification),
        Notification::LeaseBreak(notification) => handler.on_lease_break(notification),
    }
}

type HandlerList = Arc<RwLock<Vec<Arc<dyn NotificationHandler>>>>;

/// Per-connection event bus
pub struct NotificationBus {
    sender: mpsc::UnboundedSender<Notification>,
    handlers: HandlerList,
}

impl NotificationBus {
    /// Create the bus and spawn its dispatcher on the current runtime
    pub fn start() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handlers: HandlerList = Arc::new(RwLock::new(Vec::new()));
        tokio::spawn(dispatch(receiver, Arc::clone(&handlers)));
        Self { sender, handlers }
    }

    pub fn subscribe(&self, handler: Arc<dyn NotificationHandler>) {
        self.handlers.write().push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Queue a notification; never blocks
    pub fn publish(&self, notification: Notification) {
        trace!("Publishing {:?}", notification);
        if self.sender.send(notification).is_err() {
            trace!("Notification dispatcher has stopped");
        }
    }
}

impl std::fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationBus")
            .field("handlers", &self.handler_count())
            .finish()
    }
}

async fn dispatch(mut receiver: mpsc::UnboundedReceiver<Notification>, handlers: HandlerList) {
    while let Some(notification) = receiver.recv().await {
        let snapshot: Vec<Arc<dyn NotificationHandler>> = handlers.read().clone();
        for handler in snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| deliver(handler.as_ref(), &notification)));
            if outcome.is_err() {
                error!("Notification handler panicked on {:?}", notification);
            }
        }
    }
    trace!("Notification dispatcher finished");
}
