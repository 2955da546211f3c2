//! SMB2/3 client session engine in Rust
//!
//! Negotiation, session and tree-connect state machines, message signing,
//! credit accounting and message-id correlation over any ordered byte
//! stream.

#![allow(missing_docs)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod error;
pub mod protocol;
pub mod transport;

#[cfg(feature = "client")]
pub mod client;

#[cfg(all(test, feature = "client"))]
pub mod e2e_tests;

pub use error::{Error, Result};
