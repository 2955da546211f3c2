//! SMB2/3 protocol constants

use crate::error::Error;
use bitflags::bitflags;

/// SMB2 magic as bytes
pub const SMB2_MAGIC: [u8; 4] = [0xFE, b'S', b'M', b'B'];

/// SMB2 magic as u32
pub const SMB2_MAGIC_U32: u32 = 0x424D53FE;

/// SMB2 header size
pub const SMB2_HEADER_SIZE: usize = 64;

/// Message ID the server uses for oplock and lease break notifications
pub const NOTIFICATION_MESSAGE_ID: u64 = u64::MAX;

/// Fixed offsets inside the 64-byte header
pub mod header_offsets {
    pub const STRUCTURE_SIZE: usize = 4;
    pub const CREDIT_CHARGE: usize = 6;
    pub const STATUS: usize = 8;
    pub const COMMAND: usize = 12;
    pub const CREDITS: usize = 14;
    pub const FLAGS: usize = 16;
    pub const NEXT_COMMAND: usize = 20;
    pub const MESSAGE_ID: usize = 24;
    pub const ASYNC_ID: usize = 32;
    pub const SESSION_ID: usize = 40;
    pub const SIGNATURE: usize = 48;
    pub const SIGNATURE_LEN: usize = 16;
}

/// Structure sizes for SMB2 messages
pub mod structure_size {
    pub const HEADER: u16 = 64;
    pub const NEGOTIATE_REQUEST: u16 = 36;
    pub const NEGOTIATE_RESPONSE: u16 = 65;
    pub const SESSION_SETUP_REQUEST: u16 = 25;
    pub const SESSION_SETUP_RESPONSE: u16 = 9;
    pub const LOGOFF: u16 = 4;
    pub const TREE_CONNECT_REQUEST: u16 = 9;
    pub const TREE_CONNECT_RESPONSE: u16 = 16;
    pub const TREE_DISCONNECT: u16 = 4;
    pub const CREATE_REQUEST: u16 = 57;
    pub const CREATE_RESPONSE: u16 = 89;
    pub const ECHO: u16 = 4;
    pub const CANCEL: u16 = 4;
    pub const ERROR_RESPONSE: u16 = 9;
    pub const OPLOCK_BREAK_NOTIFICATION: u16 = 24;
    pub const OPLOCK_BREAK_ACK: u16 = 24;
    pub const LEASE_BREAK_NOTIFICATION: u16 = 44;
}

/// SMB2 Commands (opcodes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Smb2Command {
    Negotiate = 0x00,
    SessionSetup = 0x01,
    Logoff = 0x02,
    TreeConnect = 0x03,
    TreeDisconnect = 0x04,
    Create = 0x05,
    Close = 0x06,
    Flush = 0x07,
    Read = 0x08,
    Write = 0x09,
    Lock = 0x0A,
    Ioctl = 0x0B,
    Cancel = 0x0C,
    Echo = 0x0D,
    QueryDirectory = 0x0E,
    ChangeNotify = 0x0F,
    QueryInfo = 0x10,
    SetInfo = 0x11,
    OplockBreak = 0x12,
    ServerToClientNotification = 0x13,
}

impl TryFrom<u16> for Smb2Command {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Negotiate),
            0x01 => Ok(Self::SessionSetup),
            0x02 => Ok(Self::Logoff),
            0x03 => Ok(Self::TreeConnect),
            0x04 => Ok(Self::TreeDisconnect),
            0x05 => Ok(Self::Create),
            0x06 => Ok(Self::Close),
            0x07 => Ok(Self::Flush),
            0x08 => Ok(Self::Read),
            0x09 => Ok(Self::Write),
            0x0A => Ok(Self::Lock),
            0x0B => Ok(Self::Ioctl),
            0x0C => Ok(Self::Cancel),
            0x0D => Ok(Self::Echo),
            0x0E => Ok(Self::QueryDirectory),
            0x0F => Ok(Self::ChangeNotify),
            0x10 => Ok(Self::QueryInfo),
            0x11 => Ok(Self::SetInfo),
            0x12 => Ok(Self::OplockBreak),
            0x13 => Ok(Self::ServerToClientNotification),
            _ => Err(Error::DecodeFailure(format!(
                "Invalid SMB2 command: 0x{:04x}",
                value
            ))),
        }
    }
}

impl Smb2Command {
    pub fn from_u16(value: u16) -> crate::Result<Self> {
        value.try_into()
    }

    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

bitflags! {
    /// SMB2 header flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Smb2HeaderFlags: u32 {
        const SERVER_TO_REDIR = 0x00000001;
        const ASYNC_COMMAND = 0x00000002;
        const RELATED_OPERATIONS = 0x00000004;
        const SIGNED = 0x00000008;
        const PRIORITY_MASK = 0x00000070;
        const DFS_OPERATIONS = 0x10000000;
        const REPLAY_OPERATION = 0x20000000;
    }
}

bitflags! {
    /// SMB2 negotiate security mode
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SecurityMode: u16 {
        const SIGNING_ENABLED = 0x0001;
        const SIGNING_REQUIRED = 0x0002;
    }
}

bitflags! {
    /// SMB2 capabilities
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Smb2Capabilities: u32 {
        const DFS = 0x00000001;
        const LEASING = 0x00000002;
        const LARGE_MTU = 0x00000004;
        const MULTI_CHANNEL = 0x00000008;
        const PERSISTENT_HANDLES = 0x00000010;
        const DIRECTORY_LEASING = 0x00000020;
        const ENCRYPTION = 0x00000040;
    }
}

bitflags! {
    /// Session flags returned by SESSION_SETUP
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SessionFlags: u16 {
        const IS_GUEST = 0x0001;
        const IS_NULL = 0x0002;
        const ENCRYPT_DATA = 0x0004;
    }
}

bitflags! {
    /// Share flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ShareFlags: u32 {
        const DFS = 0x00000001;
        const DFS_ROOT = 0x00000002;
        const AUTO_CACHING = 0x00000010;
        const VDO_CACHING = 0x00000020;
        const NO_CACHING = 0x00000030;
        const RESTRICT_EXCLUSIVE_OPENS = 0x00000100;
        const FORCE_SHARED_DELETE = 0x00000200;
        const ALLOW_NAMESPACE_CACHING = 0x00000400;
        const ACCESS_BASED_DIRECTORY_ENUM = 0x00000800;
        const FORCE_LEVELII_OPLOCK = 0x00001000;
        const ENABLE_HASH_V1 = 0x00002000;
        const ENABLE_HASH_V2 = 0x00004000;
        const ENCRYPT_DATA = 0x00008000;
        const IDENTITY_REMOTING = 0x00040000;
        const COMPRESS_DATA = 0x00100000;
    }
}

bitflags! {
    /// Share capabilities
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ShareCapabilities: u32 {
        const DFS = 0x00000008;
        const CONTINUOUS_AVAILABILITY = 0x00000010;
        const SCALEOUT = 0x00000020;
        const CLUSTER = 0x00000040;
        const ASYMMETRIC = 0x00000080;
        const REDIRECT_TO_OWNER = 0x00000100;
    }
}

/// Share type returned by TREE_CONNECT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareType {
    Disk,
    Pipe,
    Print,
    Unknown(u8),
}

impl From<u8> for ShareType {
    fn from(value: u8) -> Self {
        match value {
            0x01 => ShareType::Disk,
            0x02 => ShareType::Pipe,
            0x03 => ShareType::Print,
            other => ShareType::Unknown(other),
        }
    }
}

/// SMB2 dialect versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum Smb2Dialect {
    Smb202 = 0x0202,
    Smb210 = 0x0210,
    Smb300 = 0x0300,
    Smb302 = 0x0302,
    Smb311 = 0x0311,
}

impl TryFrom<u16> for Smb2Dialect {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0202 => Ok(Self::Smb202),
            0x0210 => Ok(Self::Smb210),
            0x0300 => Ok(Self::Smb300),
            0x0302 => Ok(Self::Smb302),
            0x0311 => Ok(Self::Smb311),
            _ => Err(Error::NegotiationFailed(format!(
                "Unknown SMB2 dialect: 0x{:04x}",
                value
            ))),
        }
    }
}

impl Smb2Dialect {
    /// Every dialect the engine can speak, lowest first
    pub const ALL: [Smb2Dialect; 5] = [
        Smb2Dialect::Smb202,
        Smb2Dialect::Smb210,
        Smb2Dialect::Smb300,
        Smb2Dialect::Smb302,
        Smb2Dialect::Smb311,
    ];

    pub fn from_u16(value: u16) -> crate::Result<Self> {
        value.try_into()
    }

    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// SMB 3.x family: AES-CMAC signing with derived keys
    pub fn is_smb3(self) -> bool {
        self >= Smb2Dialect::Smb300
    }

    /// 3.1.1 requires negotiate contexts and preauth integrity
    pub fn uses_preauth_integrity(self) -> bool {
        self == Smb2Dialect::Smb311
    }

    /// 2.0.2 predates credit charges
    pub fn uses_credit_charge(self) -> bool {
        self != Smb2Dialect::Smb202
    }

    pub fn parse_name(name: &str) -> crate::Result<Self> {
        match name {
            "2.0.2" | "202" => Ok(Smb2Dialect::Smb202),
            "2.1" | "210" => Ok(Smb2Dialect::Smb210),
            "3.0" | "300" => Ok(Smb2Dialect::Smb300),
            "3.0.2" | "302" => Ok(Smb2Dialect::Smb302),
            "3.1.1" | "311" => Ok(Smb2Dialect::Smb311),
            _ => Err(Error::InvalidParameter(format!("unknown dialect {}", name))),
        }
    }
}

impl std::fmt::Display for Smb2Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Smb2Dialect::Smb202 => "2.0.2",
            Smb2Dialect::Smb210 => "2.1",
            Smb2Dialect::Smb300 => "3.0",
            Smb2Dialect::Smb302 => "3.0.2",
            Smb2Dialect::Smb311 => "3.1.1",
        };
        f.write_str(name)
    }
}

/// Negotiate context types (3.1.1)
pub mod negotiate_context_type {
    pub const PREAUTH_INTEGRITY_CAPABILITIES: u16 = 0x0001;
    pub const ENCRYPTION_CAPABILITIES: u16 = 0x0002;
    pub const SIGNING_CAPABILITIES: u16 = 0x0008;
}

/// Preauth integrity hash algorithm identifiers
pub mod hash_algorithm {
    pub const SHA512: u16 = 0x0001;
}

/// Signing algorithm identifiers carried in the signing capabilities context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SigningAlgorithmId {
    HmacSha256 = 0x0000,
    AesCmac = 0x0001,
    AesGmac = 0x0002,
}

impl TryFrom<u16> for SigningAlgorithmId {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0000 => Ok(Self::HmacSha256),
            0x0001 => Ok(Self::AesCmac),
            0x0002 => Ok(Self::AesGmac),
            _ => Err(Error::NegotiationFailed(format!(
                "Unknown signing algorithm: 0x{:04x}",
                value
            ))),
        }
    }
}

/// Oplock levels
pub mod oplock_level {
    pub const NONE: u8 = 0x00;
    pub const LEVEL_II: u8 = 0x01;
    pub const EXCLUSIVE: u8 = 0x08;
    pub const BATCH: u8 = 0x09;
    pub const LEASE: u8 = 0xFF;
}

/// Impersonation levels
pub mod impersonation_level {
    pub const ANONYMOUS: u32 = 0x00000000;
    pub const IDENTIFICATION: u32 = 0x00000001;
    pub const IMPERSONATION: u32 = 0x00000002;
    pub const DELEGATION: u32 = 0x00000003;
}

/// Create disposition values
pub mod create_disposition {
    pub const SUPERSEDE: u32 = 0x00000000;
    pub const OPEN: u32 = 0x00000001;
    pub const CREATE: u32 = 0x00000002;
    pub const OPEN_IF: u32 = 0x00000003;
    pub const OVERWRITE: u32 = 0x00000004;
    pub const OVERWRITE_IF: u32 = 0x00000005;
}

bitflags! {
    /// File access rights used by the CREATE envelope
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DesiredAccess: u32 {
        const FILE_READ_DATA = 0x00000001;
        const FILE_WRITE_DATA = 0x00000002;
        const FILE_READ_ATTRIBUTES = 0x00000080;
        const DELETE = 0x00010000;
        const READ_CONTROL = 0x00020000;
        const SYNCHRONIZE = 0x00100000;
        const MAXIMUM_ALLOWED = 0x02000000;
        const GENERIC_ALL = 0x10000000;
        const GENERIC_WRITE = 0x40000000;
        const GENERIC_READ = 0x80000000;
    }
}

bitflags! {
    /// File share access rights
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ShareAccess: u32 {
        const FILE_SHARE_READ = 0x00000001;
        const FILE_SHARE_WRITE = 0x00000002;
        const FILE_SHARE_DELETE = 0x00000004;
    }
}

/// Largest payload a single credit covers once LARGE_MTU is negotiated
pub const CREDIT_PAYLOAD_SIZE: usize = 65536;

/// Maximum direct-TCP frame body (24-bit length)
pub const MAX_DIRECT_TCP_FRAME: usize = 0x00FF_FFFF;
