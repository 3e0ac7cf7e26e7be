//! # 网络拨号器抽象模块
//!
//! 该模块定义了网络连接的核心抽象，包括：
//! - `DialError`: 拨号过程中可能出现的错误类型
//! - `Dialer` trait: 异步网络连接拨号器接口
//! - `TcpDialer`: 开启 TCP keep-alive 的基础拨号器
//! - `FnDialer`: 基于闭包的自定义拨号器
//! - `IoStream`: 统一的异步 IO 流类型别名

use async_trait::async_trait;
use socket2::{SockRef, TcpKeepalive};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{lookup_host, TcpStream};
use tracing::{debug, warn};

/// Keep-alive probe period applied to every raw TCP connection by default.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(30);

/// 拨号过程中可能出现的错误类型
#[derive(Debug, Error)]
pub enum DialError {
    /// IO 错误：底层网络 IO 操作失败
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// TLS 错误：TLS 握手或配置错误
    #[error("tls: {0}")]
    Tls(String),

    /// WebSocket 错误：升级握手或帧处理失败
    #[error("websocket: {0}")]
    WebSocket(String),

    /// 超时：在给定时间内未完成
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// 不支持的操作：当前拨号器不支持请求的操作
    #[error("not supported")]
    NotSupported,

    /// 其他错误
    #[error("other: {0}")]
    Other(String),
}

/// 异步读写 trait 标记
///
/// 所有同时实现 `AsyncRead + AsyncWrite + Unpin + Send` 的类型都会自动实现该 trait。
pub trait AsyncReadWrite: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send {}

impl<T> AsyncReadWrite for T where T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send {}

/// Boxed byte stream with a static lifetime.
///
/// 统一的异步 IO 流类型别名：TCP、TLS、WebSocket 以及协议流都以该类型传递。
pub type IoStream = Box<dyn AsyncReadWrite + 'static>;

/// 异步网络拨号器 trait
///
/// ## 使用示例
/// ```rust,no_run
/// use outpost_transport::{Dialer, TcpDialer};
///
/// async fn example() -> Result<(), Box<dyn std::error::Error>> {
///     let dialer = TcpDialer::default();
///     let _stream = dialer.connect("example.com", 443).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait Dialer: Send + Sync {
    /// 建立到指定主机和端口的连接
    async fn connect(&self, host: &str, port: u16) -> Result<IoStream, DialError>;
}

#[async_trait]
impl<D> Dialer for Box<D>
where
    D: Dialer + ?Sized,
{
    async fn connect(&self, host: &str, port: u16) -> Result<IoStream, DialError> {
        (**self).connect(host, port).await
    }
}

#[async_trait]
impl<D> Dialer for std::sync::Arc<D>
where
    D: Dialer + ?Sized,
{
    async fn connect(&self, host: &str, port: u16) -> Result<IoStream, DialError> {
        (**self).connect(host, port).await
    }
}

/// 基础 TCP 拨号器
///
/// 解析目标后按顺序尝试每个地址，返回第一个成功的连接。
/// 成功建立的连接会开启 keep-alive 探测；开启失败只记录警告，不影响连接。
/// 整体连接超时由调用方控制。
#[derive(Debug, Clone)]
pub struct TcpDialer {
    /// keep-alive 探测周期（`None` 表示不开启）
    pub keepalive: Option<Duration>,
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self {
            keepalive: Some(DEFAULT_KEEPALIVE),
        }
    }
}

impl TcpDialer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_keepalive(mut self, period: Option<Duration>) -> Self {
        self.keepalive = period;
        self
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn connect(&self, host: &str, port: u16) -> Result<IoStream, DialError> {
        let addrs: Vec<SocketAddr> = lookup_host((host, port)).await?.collect();
        if addrs.is_empty() {
            return Err(DialError::Other(format!("no addresses found for {host}")));
        }

        let mut last_error = DialError::Other("no addresses provided".into());
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    debug!(%addr, "tcp connected");
                    if let Some(period) = self.keepalive {
                        if let Err(e) = apply_keepalive(&stream, period) {
                            warn!(%addr, error = %e, "failed to enable tcp keep-alive");
                        }
                    }
                    return Ok(Box::new(stream));
                }
                Err(e) => {
                    debug!(%addr, error = %e, "tcp connect attempt failed");
                    last_error = e.into();
                }
            }
        }

        Err(last_error)
    }
}

/// Enable keep-alive probing on `stream` with the given idle time and interval.
pub fn apply_keepalive(stream: &TcpStream, period: Duration) -> std::io::Result<()> {
    let params = TcpKeepalive::new().with_time(period);
    #[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
    let params = params.with_interval(period);
    SockRef::from(stream).set_tcp_keepalive(&params)
}

/// 基于闭包的自定义拨号器
///
/// 主要用于测试中模拟各种网络行为（拒绝、挂起、内存管道等）。
///
/// ```rust,no_run
/// use outpost_transport::{DialError, FnDialer, IoStream};
/// use std::future::Future;
/// use std::pin::Pin;
///
/// let refusing = FnDialer::new(|_host: &str, _port: u16| {
///     Box::pin(async move { Err(DialError::NotSupported) })
///         as Pin<Box<dyn Future<Output = Result<IoStream, DialError>> + Send>>
/// });
/// ```
pub struct FnDialer<F> {
    inner: std::sync::Arc<F>,
}

impl<F> Clone for FnDialer<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<F> FnDialer<F> {
    pub fn new(f: F) -> Self {
        Self {
            inner: std::sync::Arc::new(f),
        }
    }
}

#[async_trait]
impl<F> Dialer for FnDialer<F>
where
    F: Send
        + Sync
        + Fn(
            &str,
            u16,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<IoStream, DialError>> + Send + 'static>,
        >,
{
    async fn connect(&self, host: &str, port: u16) -> Result<IoStream, DialError> {
        (self.inner)(host, port).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn default_dialer_enables_keepalive() {
        let d = TcpDialer::default();
        assert_eq!(d.keepalive, Some(DEFAULT_KEEPALIVE));

        let d = TcpDialer::new().with_keepalive(None);
        assert!(d.keepalive.is_none());
    }

    #[tokio::test]
    async fn tcp_dialer_connects_and_carries_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            s.read_exact(&mut buf).await.unwrap();
            s.write_all(&buf).await.unwrap();
        });

        let mut stream = TcpDialer::default().connect("127.0.0.1", port).await.unwrap();
        stream.write_all(b"ping").await.unwrap();
        let mut back = [0u8; 4];
        stream.read_exact(&mut back).await.unwrap();
        assert_eq!(&back, b"ping");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn keepalive_is_applied_to_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = TcpStream::connect(addr).await.unwrap();
        apply_keepalive(&stream, DEFAULT_KEEPALIVE).unwrap();
        assert!(SockRef::from(&stream).keepalive().unwrap());
    }

    #[tokio::test]
    async fn refused_connection_is_io_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = TcpDialer::default()
            .connect("127.0.0.1", port)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DialError::Io(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn fn_dialer_delegates_to_closure() {
        let dialer = FnDialer::new(|host: &str, port: u16| {
            let msg = format!("{host}:{port}");
            Box::pin(async move { Err(DialError::Other(msg)) })
                as std::pin::Pin<
                    Box<dyn std::future::Future<Output = Result<IoStream, DialError>> + Send>,
                >
        });
        match dialer.connect("example.test", 8443).await {
            Err(DialError::Other(msg)) => assert_eq!(msg, "example.test:8443"),
            other => panic!("unexpected: {:?}", other.err()),
        }
    }
}
