//! Testing utilities and frameworks

pub mod loopback;
pub mod mock_server;
pub mod test_context;

// Test scenario modules
pub mod protocol_tests;
pub mod scenarios;

pub use loopback::LoopbackTransport;
pub use mock_server::MockServer;
pub use test_context::TestContext;
