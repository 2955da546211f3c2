//! SMB2 wire protocol: codec, header, packets, signing and command bodies

pub mod buffer;
pub mod header;
pub mod messages;
pub mod packet;
pub mod preauth;
pub mod signing;
pub mod smb2_constants;

pub use buffer::{Buffer, Charset, Endian};
pub use header::Smb2Header;
pub use packet::Packet;
pub use signing::SigningContext;
