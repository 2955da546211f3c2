//! Client configuration
//!
//! Every policy combination is checked when the configuration is built, so a
//! connection never discovers an impossible signing setup mid-handshake.

use crate::error::{Error, Result};
use crate::protocol::smb2_constants::{SecurityMode, Smb2Capabilities, Smb2Dialect};
use std::time::Duration;
use uuid::Uuid;

/// SMB client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Client GUID sent in NEGOTIATE
    pub client_guid: Uuid,
    /// Offered dialects
    pub dialects: Vec<Smb2Dialect>,
    /// Advertise signing support
    pub signing_enabled: bool,
    /// Require every session to sign
    pub signing_required: bool,
    /// Capabilities advertised in NEGOTIATE
    pub capabilities: Smb2Capabilities,
    /// Default wait for a response before the exchange is abandoned
    pub request_timeout: Duration,
    /// Wait for the structural lock before failing with `TransportTimeout`
    pub lock_timeout: Duration,
    /// Credits requested beyond each request's charge until this many are held
    pub credit_backlog: u16,
    /// Workstation name this client identifies itself by in logs and the CLI
    pub client_name: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_guid: Uuid::new_v4(),
            dialects: vec![
                Smb2Dialect::Smb202,
                Smb2Dialect::Smb210,
                Smb2Dialect::Smb300,
                Smb2Dialect::Smb302,
                Smb2Dialect::Smb311,
            ],
            signing_enabled: true,
            signing_required: false,
            capabilities: Smb2Capabilities::DFS | Smb2Capabilities::LARGE_MTU,
            request_timeout: Duration::from_secs(30),
            lock_timeout: Duration::from_secs(10),
            credit_backlog: 128,
            client_name: String::from("RUST-SMB-CLIENT"),
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Security mode advertised in NEGOTIATE and SESSION_SETUP
    pub fn security_mode(&self) -> SecurityMode {
        let mut mode = SecurityMode::empty();
        mode.set(SecurityMode::SIGNING_ENABLED, self.signing_enabled);
        mode.set(SecurityMode::SIGNING_REQUIRED, self.signing_required);
        mode
    }

    pub fn highest_dialect(&self) -> Option<Smb2Dialect> {
        self.dialects.iter().copied().max()
    }

    /// Check the invariants `ClientConfigBuilder::build` enforces
    pub fn validate(&self) -> Result<()> {
        if self.dialects.is_empty() {
            return Err(Error::InvalidConfiguration(
                "at least one dialect is required".to_string(),
            ));
        }
        for (index, dialect) in self.dialects.iter().enumerate() {
            if self.dialects[..index].contains(dialect) {
                return Err(Error::InvalidConfiguration(format!(
                    "dialect {} listed twice",
                    dialect
                )));
            }
        }
        if self.signing_required && !self.signing_enabled {
            return Err(Error::InvalidConfiguration(
                "signing cannot be required while disabled".to_string(),
            ));
        }
        if !self.signing_enabled && self.dialects.contains(&Smb2Dialect::Smb311) {
            return Err(Error::InvalidConfiguration(
                "SMB 3.1.1 mandates signing support; enable signing or drop the dialect"
                    .to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::InvalidConfiguration(
                "request timeout must be non-zero".to_string(),
            ));
        }
        if self.client_name.trim().is_empty() {
            return Err(Error::InvalidConfiguration(
                "client name must not be empty".to_string(),
            ));
        }
        if self.lock_timeout.is_zero() {
            return Err(Error::InvalidConfiguration(
                "lock timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`ClientConfig`]
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn client_guid(mut self, guid: Uuid) -> Self {
        self.config.client_guid = guid;
        self
    }

    pub fn dialects(mut self, dialects: impl IntoIterator<Item = Smb2Dialect>) -> Self {
        self.config.dialects = dialects.into_iter().collect();
        self
    }

    pub fn signing_enabled(mut self, enabled: bool) -> Self {
        self.config.signing_enabled = enabled;
        self
    }

    pub fn signing_required(mut self, required: bool) -> Self {
        self.config.signing_required = required;
        self
    }

    pub fn capabilities(mut self, capabilities: Smb2Capabilities) -> Self {
        self.config.capabilities = capabilities;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.config.lock_timeout = timeout;
        self
    }

    pub fn credit_backlog(mut self, credits: u16) -> Self {
        self.config.credit_backlog = credits;
        self
    }

    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.config.client_name = name.into();
        self
    }

    pub fn build(self) -> Result<ClientConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
