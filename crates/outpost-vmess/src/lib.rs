//! # outpost-vmess: VMess protocol client / VMess 协议客户端
//!
//! Legacy (alterId based) VMess over TCP, optionally wrapped in TLS and/or
//! WebSocket.
//!
//! 基于 alterId 的传统 VMess 协议客户端，可选叠加 TLS 与 WebSocket 传输层。
//!
//! Protocol flow / 协议流程:
//! 1. Client sends `HMAC-MD5(id, timestamp)` (16 bytes)
//! 2. Client sends the request header, AES-128-CFB encrypted with the command
//!    key of the chosen id
//! 3. Server answers with a 4 byte response header (read lazily on first read)
//! 4. Both directions carry length-prefixed body chunks, sealed with
//!    AES-128-GCM / ChaCha20-Poly1305 or left in the clear (`none`)
//!
//! Entry points: [`Client::new`] builds an immutable client from a [`Config`];
//! [`Client::connect`] runs the handshake over an already-dialed stream and
//! returns a [`VmessStream`].

use std::io;
use thiserror::Error;

pub mod addr;
pub mod chunk;
pub mod client;
pub mod header;
mod kdf;
pub mod security;
pub mod stream;
pub mod user;

#[cfg(any(test, feature = "e2e"))]
pub mod testsupport;

pub use addr::{AddrType, Destination, DomainName, DstAddr};
pub use client::{Client, Config, Network};
pub use security::Security;
pub use stream::VmessStream;

/// Protocol version byte of the request header.
pub const VERSION: u8 = 1;
/// Request option: chunked body stream.
pub const OPTION_CHUNK_STREAM: u8 = 1;
/// Request command: TCP.
pub const COMMAND_TCP: u8 = 1;
/// Largest payload carried by one body chunk.
pub const MAX_CHUNK_PAYLOAD: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum VmessError {
    #[error("invalid uuid: {0}")]
    InvalidUuid(String),

    #[error("unknown security type: {0}")]
    UnsupportedSecurity(String),

    #[error("unsupported network: {0}")]
    UnsupportedNetwork(String),

    #[error("invalid websocket header: {0}")]
    InvalidHeader(String),

    #[error("invalid server name: {0}")]
    InvalidServerName(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("tls config: {0}")]
    Tls(#[from] outpost_tls::TlsError),

    #[error("transport: {0}")]
    Transport(#[from] outpost_transport::DialError),

    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("malformed request header: {0}")]
    MalformedRequest(String),

    #[error("unexpected response header")]
    UnexpectedResponse,

    #[error("dynamic port is not supported")]
    DynamicPort,

    #[error("crypto: {0}")]
    Crypto(String),

    #[error("chunk payload of {0} bytes exceeds limit")]
    ChunkTooLarge(usize),
}

impl From<VmessError> for io::Error {
    fn from(err: VmessError) -> Self {
        match err {
            VmessError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

pub type Result<T, E = VmessError> = std::result::Result<T, E>;
