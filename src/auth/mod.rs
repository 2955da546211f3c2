//! Authentication boundary
//!
//! The session engine never interprets security blobs. It hands the
//! server's tokens to an [`Authenticator`], sends back whatever the
//! authenticator produces, and asks it for the session key once the server
//! reports success.

use crate::error::Result;

/// Authentication mechanism driven by the SESSION_SETUP loop
pub trait Authenticator: Send {
    /// Mechanism name for logs
    fn mechanism(&self) -> &'static str;

    /// Token for the first SESSION_SETUP request
    fn initial_token(&mut self) -> Result<Vec<u8>>;

    /// Token answering a STATUS_MORE_PROCESSING_REQUIRED response
    fn next_token(&mut self, server_token: &[u8]) -> Result<Vec<u8>>;

    /// Consume the token carried by the final successful response
    fn complete(&mut self, server_token: &[u8]) -> Result<()> {
        let _ = server_token;
        Ok(())
    }

    /// Key established by the exchange; `None` for anonymous sessions
    fn session_key(&self) -> Option<Vec<u8>>;
}

/// Null session: empty tokens, no session key
#[derive(Debug, Default, Clone, Copy)]
pub struct AnonymousAuthenticator;

impl Authenticator for AnonymousAuthenticator {
    fn mechanism(&self) -> &'static str {
        "anonymous"
    }

    fn initial_token(&mut self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn next_token(&mut self, _server_token: &[u8]) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn session_key(&self) -> Option<Vec<u8>> {
        None
    }
}
