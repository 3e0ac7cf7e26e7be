//! # outpost-transport: Transport Layer / 传输层
//!
//! This crate owns everything between "I have a server address" and "I have a
//! byte stream the protocol client can write its header into":
//!
//! 这个 crate 负责从服务器地址到可供协议客户端写入请求头的字节流之间的一切：
//!
//! - `dialer`: the `Dialer` contract, `TcpDialer` (keep-alive)
//!   and `FnDialer` for injecting behaviour in tests
//!   / 拨号器契约、带保活的 TCP 拨号器、用于测试注入的闭包拨号器
//! - `tls`: TLS client layer over an existing stream (feature `transport_tls`)
//!   / 在现有流上叠加 TLS 客户端层
//! - `websocket`: WebSocket client layer and a server-side listener
//!   (feature `transport_ws`) / WebSocket 客户端层与服务端监听器
//! - `builder`: `TransportChain`, which applies layers in order over a raw
//!   connection / 按顺序在原始连接上叠加各层
//!
//! Layers never dial on their own. The raw connection is always opened by a
//! `Dialer`, so connect failures and handshake failures stay distinguishable
//! for the caller.
//!
//! 各层自身从不拨号；原始连接总是由 `Dialer` 建立，从而调用者可以区分连接失败与握手失败。

pub mod builder;
pub mod dialer;

/// TLS 传输层模块（需要 `transport_tls` feature）
#[cfg(feature = "transport_tls")]
pub mod tls;

/// WebSocket 传输层模块（需要 `transport_ws` feature）
#[cfg(feature = "transport_ws")]
pub mod websocket;

pub use builder::{StreamLayer, TransportChain};
pub use dialer::{
    AsyncReadWrite, DialError, Dialer, FnDialer, IoStream, TcpDialer, DEFAULT_KEEPALIVE,
};

#[cfg(feature = "transport_tls")]
pub use tls::TlsLayer;

#[cfg(feature = "transport_ws")]
pub use websocket::{WebSocketConfig, WebSocketLayer, WebSocketListener};
