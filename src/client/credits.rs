//! Credit window and message-id assignment
//!
//! Available credits live in a semaphore. A request acquires (and forgets)
//! as many permits as it charges, takes that many consecutive message ids,
//! and every response puts the server's grant back.

use crate::error::{Error, Result};
use crate::protocol::smb2_constants::CREDIT_PAYLOAD_SIZE;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Semaphore;
use tracing::trace;

/// Credits and ids assigned to one outgoing request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditGrant {
    pub message_id: u64,
    pub charge: u16,
    pub request: u16,
}

#[derive(Debug)]
pub struct CreditWindow {
    available: Semaphore,
    next_message_id: AtomicU64,
    large_mtu: AtomicBool,
    backlog: u16,
}

impl CreditWindow {
    /// A fresh connection holds the single credit NEGOTIATE spends
    pub fn new(backlog: u16) -> Self {
        Self {
            available: Semaphore::new(1),
            next_message_id: AtomicU64::new(0),
            large_mtu: AtomicBool::new(false),
            backlog,
        }
    }

    pub fn set_large_mtu(&self, enabled: bool) {
        self.large_mtu.store(enabled, Ordering::SeqCst);
    }

    /// Credits a request of this size costs
    pub fn charge_for(&self, send_size: usize, expected_size: usize) -> u16 {
        if !self.large_mtu.load(Ordering::SeqCst) {
            return 1;
        }
        let size = send_size.max(expected_size).max(1);
        (1 + (size - 1) / CREDIT_PAYLOAD_SIZE).min(u16::MAX as usize) as u16
    }

    /// Wait for enough credits and assign message ids
    pub async fn reserve(&self, send_size: usize, expected_size: usize) -> Result<CreditGrant> {
        let charge = self.charge_for(send_size, expected_size);
        self.available
            .acquire_many(charge as u32)
            .await
            .map_err(|_| Error::TransportFailure("connection closed".to_string()))?
            .forget();

        let message_id = self
            .next_message_id
            .fetch_add(charge as u64, Ordering::SeqCst);

        let held = self.available.available_permits();
        let deficit = (self.backlog as usize).saturating_sub(held);
        let request = (charge as usize + deficit).min(u16::MAX as usize) as u16;

        trace!(
            "Message {} charged {} credits, requesting {} ({} held)",
            message_id,
            charge,
            request,
            held
        );
        Ok(CreditGrant {
            message_id,
            charge,
            request,
        })
    }

    /// Return credits granted by a response. A zero grant still gives back
    /// `charged`, or the window could starve.
    pub fn grant(&self, granted: u16, charged: u16) {
        let returned = if granted == 0 { charged } else { granted };
        if returned > 0 {
            self.available.add_permits(returned as usize);
        }
    }

    /// Give back credits reserved for a request that was never sent
    pub fn refund(&self, grant: &CreditGrant) {
        self.available.add_permits(grant.charge as usize);
    }

    /// Wake every waiter with a failure; no credits are handed out afterwards
    pub fn close(&self) {
        self.available.close();
    }

    pub fn available(&self) -> usize {
        self.available.available_permits()
    }

    pub fn is_large_mtu(&self) -> bool {
        self.large_mtu.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_charge_without_large_mtu() {
        let window = CreditWindow::new(16);
        assert_eq!(window.charge_for(1 << 20, 1 << 20), 1);
    }

    #[test]
    fn test_charge_with_large_mtu() {
        let window = CreditWindow::new(16);
        window.set_large_mtu(true);
        assert_eq!(window.charge_for(0, 0), 1);
        assert_eq!(window.charge_for(65536, 0), 1);
        assert_eq!(window.charge_for(65537, 0), 2);
        assert_eq!(window.charge_for(100, 256 * 1024), 4);
    }

    #[tokio::test]
    async fn test_message_ids_advance_by_charge() {
        let window = CreditWindow::new(8);
        window.set_large_mtu(true);
        window.grant(10, 1);

        let first = window.reserve(100, 0).await.unwrap();
        let second = window.reserve(3 * 65536, 0).await.unwrap();
        let third = window.reserve(10, 0).await.unwrap();
        assert_eq!(first.message_id, 0);
        assert_eq!(second.message_id, 1);
        assert_eq!(second.charge, 3);
        assert_eq!(third.message_id, 4);
    }

    #[tokio::test]
    async fn test_request_covers_backlog_deficit() {
        let window = CreditWindow::new(32);
        let grant = window.reserve(10, 10).await.unwrap();
        assert_eq!(grant.charge, 1);
        assert_eq!(grant.request, 33);
    }

    #[tokio::test]
    async fn test_reserve_waits_for_grant() {
        let window = Arc::new(CreditWindow::new(4));
        window.reserve(1, 1).await.unwrap();
        assert_eq!(window.available(), 0);

        let waiter = {
            let window = Arc::clone(&window);
            tokio::spawn(async move { window.reserve(1, 1).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        window.grant(1, 1);
        assert_eq!(waiter.await.unwrap().unwrap().message_id, 1);
    }

    #[tokio::test]
    async fn test_close_fails_waiters() {
        let window = Arc::new(CreditWindow::new(4));
        window.reserve(1, 1).await.unwrap();
        let waiter = {
            let window = Arc::clone(&window);
            tokio::spawn(async move { window.reserve(1, 1).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        window.close();
        assert!(matches!(
            waiter.await.unwrap(),
            Err(Error::TransportFailure(_))
        ));
    }

    #[test]
    fn test_zero_grant_returns_charge() {
        let window = CreditWindow::new(4);
        let before = window.available();
        window.grant(0, 2);
        assert_eq!(window.available(), before + 2);
        window.grant(0, 0);
        assert_eq!(window.available(), before + 2);
    }

    #[tokio::test]
    async fn test_refund_restores_window() {
        let window = CreditWindow::new(4);
        let grant = window.reserve(1, 1).await.unwrap();
        assert_eq!(window.available(), 0);
        window.refund(&grant);
        assert_eq!(window.available(), 1);
    }
}
