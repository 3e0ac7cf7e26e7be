//! Body chunk framing.
//!
//! Every chunk is `len(u16 BE) ‖ data`. With an AEAD security `data` is the
//! sealed payload (payload + 16 byte tag) and the nonce is
//! `count(u16 BE) ‖ iv[2..12]`, `count` starting at zero per direction. A
//! chunk with an empty payload marks the end of the stream.

use crate::kdf::md5_sum;
use crate::security::Security;
use crate::{VmessError, MAX_CHUNK_PAYLOAD};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Nonce};
use bytes::{Buf, BufMut, BytesMut};
use chacha20poly1305::ChaCha20Poly1305;

const TAG_LEN: usize = 16;

enum BodyAead {
    None,
    Aes(Box<Aes128Gcm>),
    ChaCha(Box<ChaCha20Poly1305>),
}

impl BodyAead {
    fn new(security: Security, key: &[u8; 16]) -> Result<Self, VmessError> {
        Ok(match security {
            Security::None => Self::None,
            Security::Aes128Gcm => Self::Aes(Box::new(
                Aes128Gcm::new_from_slice(key)
                    .map_err(|e| VmessError::Crypto(format!("body key: {e}")))?,
            )),
            Security::Chacha20Poly1305 => {
                let mut full = [0u8; 32];
                full[..16].copy_from_slice(&md5_sum(key));
                let second = md5_sum(&full[..16]);
                full[16..].copy_from_slice(&second);
                Self::ChaCha(Box::new(
                    ChaCha20Poly1305::new_from_slice(&full)
                        .map_err(|e| VmessError::Crypto(format!("body key: {e}")))?,
                ))
            }
        })
    }
}

struct NonceSeq {
    iv: [u8; 16],
    count: u16,
}

impl NonceSeq {
    fn next(&mut self) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[..2].copy_from_slice(&self.count.to_be_bytes());
        nonce[2..].copy_from_slice(&self.iv[2..12]);
        self.count = self.count.wrapping_add(1);
        nonce
    }
}

/// Seals outgoing chunks for one direction.
pub struct ChunkSealer {
    aead: BodyAead,
    nonce: NonceSeq,
}

impl ChunkSealer {
    pub fn new(security: Security, key: &[u8; 16], iv: &[u8; 16]) -> Result<Self, VmessError> {
        Ok(Self {
            aead: BodyAead::new(security, key)?,
            nonce: NonceSeq { iv: *iv, count: 0 },
        })
    }

    /// Append one framed chunk carrying `payload` to `out`. An empty payload
    /// produces the end-of-stream chunk.
    pub fn seal(&mut self, payload: &[u8], out: &mut BytesMut) -> Result<(), VmessError> {
        if payload.len() > MAX_CHUNK_PAYLOAD {
            return Err(VmessError::ChunkTooLarge(payload.len()));
        }
        let sealed = match &self.aead {
            BodyAead::None => {
                out.reserve(2 + payload.len());
                out.put_u16(payload.len() as u16);
                out.put_slice(payload);
                return Ok(());
            }
            BodyAead::Aes(c) => c.encrypt(Nonce::from_slice(&self.nonce.next()), payload),
            BodyAead::ChaCha(c) => c.encrypt(
                chacha20poly1305::Nonce::from_slice(&self.nonce.next()),
                payload,
            ),
        }
        .map_err(|e| VmessError::Crypto(format!("seal: {e}")))?;

        out.reserve(2 + sealed.len());
        out.put_u16(sealed.len() as u16);
        out.put_slice(&sealed);
        Ok(())
    }
}

/// Opens incoming chunks for one direction.
pub struct ChunkOpener {
    aead: BodyAead,
    nonce: NonceSeq,
}

impl ChunkOpener {
    pub fn new(security: Security, key: &[u8; 16], iv: &[u8; 16]) -> Result<Self, VmessError> {
        Ok(Self {
            aead: BodyAead::new(security, key)?,
            nonce: NonceSeq { iv: *iv, count: 0 },
        })
    }

    /// Take one complete chunk off the front of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` does not hold a whole chunk yet, and
    /// `Ok(Some(empty))` for the end-of-stream chunk.
    pub fn open(&mut self, buf: &mut BytesMut) -> Result<Option<Vec<u8>>, VmessError> {
        if buf.len() < 2 {
            return Ok(None);
        }
        let len = usize::from(u16::from_be_bytes([buf[0], buf[1]]));
        if buf.len() < 2 + len {
            return Ok(None);
        }
        buf.advance(2);
        let data = buf.split_to(len);

        let payload = match &self.aead {
            BodyAead::None => data.to_vec(),
            aead => {
                if len < TAG_LEN {
                    return Err(VmessError::Crypto(format!(
                        "sealed chunk of {len} bytes is shorter than its tag"
                    )));
                }
                let nonce = self.nonce.next();
                match aead {
                    BodyAead::Aes(c) => c.decrypt(Nonce::from_slice(&nonce), data.as_ref()),
                    BodyAead::ChaCha(c) => {
                        c.decrypt(chacha20poly1305::Nonce::from_slice(&nonce), data.as_ref())
                    }
                    BodyAead::None => Ok(data.to_vec()),
                }
                .map_err(|e| VmessError::Crypto(format!("open: {e}")))?
            }
        };
        Ok(Some(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 16] = [0x11; 16];
    const IV: [u8; 16] = [0x22; 16];

    fn pair(security: Security) -> (ChunkSealer, ChunkOpener) {
        (
            ChunkSealer::new(security, &KEY, &IV).unwrap(),
            ChunkOpener::new(security, &KEY, &IV).unwrap(),
        )
    }

    #[test]
    fn none_security_is_plain_length_prefixed() {
        let (mut sealer, _) = pair(Security::None);
        let mut out = BytesMut::new();
        sealer.seal(b"abc", &mut out).unwrap();
        assert_eq!(&out[..], &[0, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn aead_chunks_open_in_sequence() {
        for security in [Security::Aes128Gcm, Security::Chacha20Poly1305] {
            let (mut sealer, mut opener) = pair(security);
            let mut wire = BytesMut::new();
            sealer.seal(b"first", &mut wire).unwrap();
            sealer.seal(b"second", &mut wire).unwrap();
            sealer.seal(b"", &mut wire).unwrap();
            assert_eq!(u16::from_be_bytes([wire[0], wire[1]]) as usize, 5 + TAG_LEN);

            assert_eq!(opener.open(&mut wire).unwrap().unwrap(), b"first");
            assert_eq!(opener.open(&mut wire).unwrap().unwrap(), b"second");
            assert!(opener.open(&mut wire).unwrap().unwrap().is_empty());
            assert!(wire.is_empty());
        }
    }

    #[test]
    fn partial_chunk_waits_for_more_bytes() {
        let (mut sealer, mut opener) = pair(Security::Aes128Gcm);
        let mut full = BytesMut::new();
        sealer.seal(b"payload", &mut full).unwrap();

        let mut buf = BytesMut::from(&full[..full.len() - 1]);
        assert!(opener.open(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&full[full.len() - 1..]);
        assert_eq!(opener.open(&mut buf).unwrap().unwrap(), b"payload");
    }

    #[test]
    fn out_of_order_chunk_fails_authentication() {
        let (mut sealer, mut opener) = pair(Security::Chacha20Poly1305);
        let mut first = BytesMut::new();
        let mut second = BytesMut::new();
        sealer.seal(b"one", &mut first).unwrap();
        sealer.seal(b"two", &mut second).unwrap();
        let err = opener.open(&mut second).unwrap_err();
        assert!(matches!(err, VmessError::Crypto(_)));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let (mut sealer, _) = pair(Security::None);
        let big = vec![0u8; MAX_CHUNK_PAYLOAD + 1];
        let err = sealer.seal(&big, &mut BytesMut::new()).unwrap_err();
        assert!(matches!(err, VmessError::ChunkTooLarge(n) if n == MAX_CHUNK_PAYLOAD + 1));
    }
}
