//! SMB2 command bodies the session engine sends or interprets

pub mod common;
pub mod create;
pub mod negotiate;
pub mod oplock;
pub mod session;
pub mod tree;

// Re-export commonly used types
pub use common::{ErrorResponse, FileId, Smb2EmptyBody, SmbMessage};
pub use create::{Smb2CreateRequest, Smb2CreateResponse};
pub use negotiate::{NegotiateContext, Smb2NegotiateRequest, Smb2NegotiateResponse};
pub use oplock::{BreakNotification, Smb2LeaseBreak, Smb2OplockBreak};
pub use session::{Smb2LogoffRequest, Smb2SessionSetupRequest, Smb2SessionSetupResponse};
pub use tree::{Smb2TreeConnectRequest, Smb2TreeConnectResponse, Smb2TreeDisconnectRequest};
