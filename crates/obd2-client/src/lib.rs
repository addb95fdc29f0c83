//! A dual-transport OBD-II diagnostic client.
//!
//! Requests travel either over raw CAN frames (ISO 15765-2 single- and
//! multi-frame transport) or through an ELM327 AT-command adapter, behind
//! the same [`engine::Engine`] state machine. The engine is generic over
//! its transport, byte stream, and clock so it carries no heap allocation
//! on its request/response hot path.

pub mod broadcast;
pub mod config;
pub mod decode;
pub mod elm;
pub mod engine;
pub mod filter;
pub mod frame;
pub mod request;
pub mod transport;
pub mod types;

pub use config::EngineConfig;
pub use engine::Engine;
pub use request::{Request, Status};
pub use transport::{ByteStream, CanTransport, Clock};
pub use types::{CanId, Pid};

#[cfg(test)]
#[ctor::ctor]
fn setup_test_logging() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .with_ansi(true)
        .init();
}
