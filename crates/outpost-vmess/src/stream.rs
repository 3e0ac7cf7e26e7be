//! The client side of an established VMess connection.

use crate::chunk::{ChunkOpener, ChunkSealer};
use crate::header::{self, RequestHeader, RESPONSE_LEN};
use crate::kdf;
use crate::user::Id;
use crate::{VmessError, MAX_CHUNK_PAYLOAD};
use aes::Aes128;
use bytes::{Buf, BytesMut};
use cfb_mode::BufDecryptor;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

const READ_CHUNK: usize = 8 * 1024;

enum Response {
    /// Response header not seen yet.
    Pending {
        decryptor: Box<BufDecryptor<Aes128>>,
        resp_v: u8,
    },
    Verified,
}

/// VMess body stream over `S`.
///
/// The request header is written by [`VmessStream::handshake`]; the response
/// header is consumed on the first read.
pub struct VmessStream<S> {
    inner: S,
    sealer: ChunkSealer,
    pending: BytesMut,
    shutdown_queued: bool,
    opener: ChunkOpener,
    response: Response,
    raw: BytesMut,
    plain: BytesMut,
    eof: bool,
}

impl<S> VmessStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Send the request header for `request` authenticated as `id`, then
    /// return the stream ready for payload.
    pub async fn handshake(
        mut inner: S,
        id: &Id,
        request: RequestHeader,
    ) -> Result<Self, VmessError> {
        let sealed = request.seal(id, kdf::unix_now())?;
        inner.write_all(&sealed).await?;
        inner.flush().await?;
        tracing::debug!(
            dest = %request.destination,
            security = %request.security,
            "vmess request header sent"
        );

        let sealer = ChunkSealer::new(request.security, &request.body_key, &request.body_iv)?;
        let opener = ChunkOpener::new(
            request.security,
            &request.response_key(),
            &request.response_iv(),
        )?;
        let decryptor = kdf::cfb_decryptor(&request.response_key(), &request.response_iv());

        Ok(Self {
            inner,
            sealer,
            pending: BytesMut::new(),
            shutdown_queued: false,
            opener,
            response: Response::Pending {
                decryptor: Box::new(decryptor),
                resp_v: request.resp_v,
            },
            raw: BytesMut::with_capacity(READ_CHUNK),
            plain: BytesMut::new(),
            eof: false,
        })
    }

    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while !self.pending.is_empty() {
            let n = ready!(Pin::new(&mut self.inner).poll_write(cx, &self.pending))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.pending.advance(n);
        }
        Poll::Ready(Ok(()))
    }

    /// Decode whatever `raw` holds. Returns `true` when progress was made.
    fn decode(&mut self) -> Result<bool, VmessError> {
        if let Response::Pending { decryptor, resp_v } = &mut self.response {
            if self.raw.len() < RESPONSE_LEN {
                return Ok(false);
            }
            let mut head = [0u8; RESPONSE_LEN];
            head.copy_from_slice(&self.raw[..RESPONSE_LEN]);
            decryptor.decrypt(&mut head);
            header::check_response(*resp_v, &head)?;
            self.raw.advance(RESPONSE_LEN);
            self.response = Response::Verified;
            return Ok(true);
        }

        match self.opener.open(&mut self.raw)? {
            Some(payload) if payload.is_empty() => {
                self.eof = true;
                Ok(true)
            }
            Some(payload) => {
                self.plain.extend_from_slice(&payload);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl<S> AsyncRead for VmessStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.plain.is_empty() {
                let n = this.plain.len().min(buf.remaining());
                buf.put_slice(&this.plain[..n]);
                this.plain.advance(n);
                return Poll::Ready(Ok(()));
            }
            if this.eof {
                return Poll::Ready(Ok(()));
            }
            if this.decode()? {
                continue;
            }

            let mut scratch = [0u8; READ_CHUNK];
            let mut rb = ReadBuf::new(&mut scratch);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut rb))?;
            let filled = rb.filled();
            if filled.is_empty() {
                let clean = this.raw.is_empty() && matches!(this.response, Response::Verified);
                if clean {
                    this.eof = true;
                    continue;
                }
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "vmess: connection closed mid-frame",
                )));
            }
            this.raw.extend_from_slice(filled);
        }
    }
}

impl<S> AsyncWrite for VmessStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.shutdown_queued {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "vmess: write after shutdown",
            )));
        }
        ready!(this.poll_drain(cx))?;
        // An empty chunk would signal end of stream.
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let n = buf.len().min(MAX_CHUNK_PAYLOAD);
        this.sealer.seal(&buf[..n], &mut this.pending)?;
        if let Poll::Ready(Err(e)) = this.poll_drain(cx) {
            return Poll::Ready(Err(e));
        }
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.shutdown_queued {
            this.sealer.seal(&[], &mut this.pending)?;
            this.shutdown_queued = true;
        }
        ready!(this.poll_drain(cx))?;
        ready!(Pin::new(&mut this.inner).poll_flush(cx))?;
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::{Destination, DomainName, DstAddr};
    use crate::security::Security;
    use crate::user::User;
    use tokio::io::{AsyncReadExt, DuplexStream};

    struct Peer {
        io: DuplexStream,
        request: RequestHeader,
    }

    /// Read the client's request off `io` with full knowledge of the id and
    /// timestamp-independent parts, the way a server would after auth.
    async fn accept(mut io: DuplexStream, id: &Id) -> Peer {
        let mut auth = [0u8; header::AUTH_LEN];
        io.read_exact(&mut auth).await.unwrap();
        let now = kdf::unix_now();
        let ts = (now - 5..=now + 5)
            .find(|ts| kdf::auth(id.uuid(), *ts).unwrap() == auth)
            .unwrap();

        let mut dec = kdf::cfb_decryptor(id.cmd_key(), &kdf::hash_timestamp(ts));
        let mut plain = vec![0u8; header::FIXED_LEN];
        io.read_exact(&mut plain).await.unwrap();
        dec.decrypt(&mut plain);
        // domain destination: one length byte, then host, padding, checksum
        let mut len = [0u8; 1];
        io.read_exact(&mut len).await.unwrap();
        dec.decrypt(&mut len);
        let mut rest = vec![0u8; usize::from(len[0]) + usize::from(plain[35] >> 4) + 4];
        io.read_exact(&mut rest).await.unwrap();
        dec.decrypt(&mut rest);
        plain.push(len[0]);
        plain.extend_from_slice(&rest);

        Peer {
            io,
            request: RequestHeader::parse(&plain).unwrap(),
        }
    }

    fn destination() -> Destination {
        Destination::new(DstAddr::Domain(DomainName::new("example.org").unwrap()), 80)
    }

    #[tokio::test]
    async fn payload_round_trips_through_peer() {
        let user = User::parse("b831381d-6324-4d53-ad4f-8cda48b30811", 0).unwrap();
        let id = user.primary().clone();
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);

        let server_id = id.clone();
        let server = tokio::spawn(async move {
            let mut peer = accept(server_io, &server_id).await;
            let req = peer.request.clone();
            let mut opener =
                ChunkOpener::new(req.security, &req.body_key, &req.body_iv).unwrap();
            let mut sealer =
                ChunkSealer::new(req.security, &req.response_key(), &req.response_iv()).unwrap();

            let mut raw = BytesMut::new();
            let payload = loop {
                if let Some(p) = opener.open(&mut raw).unwrap() {
                    break p;
                }
                let mut tmp = [0u8; 1024];
                let n = peer.io.read(&mut tmp).await.unwrap();
                raw.extend_from_slice(&tmp[..n]);
            };

            let mut head = [req.resp_v, 0, 0, 0];
            kdf::cfb_encryptor(&req.response_key(), &req.response_iv()).encrypt(&mut head);
            let mut out = BytesMut::from(&head[..]);
            sealer.seal(&payload, &mut out).unwrap();
            sealer.seal(&[], &mut out).unwrap();
            peer.io.write_all(&out).await.unwrap();
            req
        });

        let request = RequestHeader::random(Security::Chacha20Poly1305, destination());
        let mut stream = VmessStream::handshake(client_io, &id, request).await.unwrap();
        stream.write_all(b"hello vmess").await.unwrap();
        stream.flush().await.unwrap();

        let mut echoed = Vec::new();
        stream.read_to_end(&mut echoed).await.unwrap();
        assert_eq!(echoed, b"hello vmess");

        let seen = server.await.unwrap();
        assert_eq!(seen.destination, destination());
        assert_eq!(seen.security, Security::Chacha20Poly1305);
    }

    #[tokio::test]
    async fn wrong_response_token_fails_first_read() {
        let user = User::parse("b831381d-6324-4d53-ad4f-8cda48b30811", 0).unwrap();
        let id = user.primary().clone();
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);

        let server_id = id.clone();
        tokio::spawn(async move {
            let mut peer = accept(server_io, &server_id).await;
            let req = peer.request.clone();
            let mut head = [req.resp_v.wrapping_add(1), 0, 0, 0];
            kdf::cfb_encryptor(&req.response_key(), &req.response_iv()).encrypt(&mut head);
            peer.io.write_all(&head).await.unwrap();
            peer.io
        });

        let request = RequestHeader::random(Security::None, destination());
        let mut stream = VmessStream::handshake(client_io, &id, request).await.unwrap();
        let mut buf = [0u8; 8];
        let err = stream.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert_eq!(err.to_string(), "unexpected response header");
    }

    #[tokio::test]
    async fn large_writes_are_split_into_chunks() {
        let user = User::parse("b831381d-6324-4d53-ad4f-8cda48b30811", 0).unwrap();
        let id = user.primary().clone();
        let (client_io, server_io) = tokio::io::duplex(256 * 1024);

        let request = RequestHeader::random(Security::Aes128Gcm, destination());
        let mut stream = VmessStream::handshake(client_io, &id, request).await.unwrap();
        let n = stream.write(&vec![1u8; MAX_CHUNK_PAYLOAD * 2]).await.unwrap();
        assert_eq!(n, MAX_CHUNK_PAYLOAD);
        drop(server_io);
    }
}
