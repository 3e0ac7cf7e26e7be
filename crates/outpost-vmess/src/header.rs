//! Request and response headers.
//!
//! Request, before encryption:
//!
//! ```text
//! ver(1) ‖ body_iv(16) ‖ body_key(16) ‖ resp_v(1) ‖ opt(1) ‖ pad<<4|sec(1) ‖ 0(1)
//!   ‖ cmd(1) ‖ port(2) ‖ atyp(1) ‖ addr ‖ padding ‖ fnv1a32(4)
//! ```
//!
//! It travels as `HMAC-MD5(uuid, ts) ‖ AES-128-CFB(cmd_key, MD5(ts×4), header)`.
//! The response header is 4 bytes, AES-128-CFB with `MD5(body_key)` /
//! `MD5(body_iv)`.

use crate::addr::{AddrType, Destination, DomainName, DstAddr};
use crate::kdf;
use crate::security::Security;
use crate::user::Id;
use crate::{VmessError, COMMAND_TCP, OPTION_CHUNK_STREAM, VERSION};
use rand::{Rng, RngCore};

/// Bytes of the request header from `ver` through `atyp`.
pub const FIXED_LEN: usize = 41;
/// Length of the authentication prefix.
pub const AUTH_LEN: usize = 16;
/// Length of the response header.
pub const RESPONSE_LEN: usize = 4;

const MAX_PADDING: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    pub body_iv: [u8; 16],
    pub body_key: [u8; 16],
    pub resp_v: u8,
    pub security: Security,
    pub destination: Destination,
    /// Shorter than `MAX_PADDING`; only `random` and `parse` set it.
    padding: Vec<u8>,
}

impl RequestHeader {
    /// Fresh body key/iv, response token and padding for one connection.
    pub fn random(security: Security, destination: Destination) -> Self {
        let mut rng = rand::thread_rng();
        let mut body_iv = [0u8; 16];
        let mut body_key = [0u8; 16];
        rng.fill_bytes(&mut body_iv);
        rng.fill_bytes(&mut body_key);
        let mut padding = vec![0u8; rng.gen_range(0..MAX_PADDING)];
        rng.fill_bytes(&mut padding);
        Self {
            body_iv,
            body_key,
            resp_v: rng.gen(),
            security,
            destination,
            padding,
        }
    }

    pub fn padding(&self) -> &[u8] {
        &self.padding
    }

    pub fn response_key(&self) -> [u8; 16] {
        kdf::md5_sum(&self.body_key)
    }

    pub fn response_iv(&self) -> [u8; 16] {
        kdf::md5_sum(&self.body_iv)
    }

    /// The plaintext header including its checksum.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FIXED_LEN + 1 + 255 + MAX_PADDING + 4);
        buf.push(VERSION);
        buf.extend_from_slice(&self.body_iv);
        buf.extend_from_slice(&self.body_key);
        buf.push(self.resp_v);
        buf.push(OPTION_CHUNK_STREAM);
        // padding is always shorter than 16 bytes, so it fits the high nibble
        buf.push(((self.padding.len() as u8) << 4) | self.security.code());
        buf.push(0);
        buf.push(COMMAND_TCP);
        buf.extend_from_slice(&self.destination.port.to_be_bytes());
        self.destination.write_addr(&mut buf);
        buf.extend_from_slice(&self.padding);
        let checksum = kdf::fnv1a32(&buf);
        buf.extend_from_slice(&checksum.to_be_bytes());
        buf
    }

    /// Authentication prefix followed by the encrypted header.
    pub fn seal(&self, id: &Id, ts: u64) -> Result<Vec<u8>, VmessError> {
        let mut header = self.encode();
        kdf::cfb_encryptor(id.cmd_key(), &kdf::hash_timestamp(ts)).encrypt(&mut header);

        let mut out = Vec::with_capacity(AUTH_LEN + header.len());
        out.extend_from_slice(&kdf::auth(id.uuid(), ts)?);
        out.extend_from_slice(&header);
        Ok(out)
    }

    /// Parse a complete decrypted header, checksum included.
    pub fn parse(plain: &[u8]) -> Result<Self, VmessError> {
        let malformed = |what: &str| VmessError::MalformedRequest(what.to_string());
        if plain.len() < FIXED_LEN + 4 {
            return Err(malformed("too short"));
        }
        let (body, sum) = plain.split_at(plain.len() - 4);
        if kdf::fnv1a32(body).to_be_bytes() != sum {
            return Err(malformed("checksum mismatch"));
        }
        if body[0] != VERSION {
            return Err(malformed("unknown version"));
        }
        if body[37] != COMMAND_TCP {
            return Err(malformed("unsupported command"));
        }

        let security = Security::from_code(body[35] & 0x0f)
            .ok_or_else(|| VmessError::UnsupportedSecurity(format!("code {}", body[35] & 0x0f)))?;
        let padding_len = usize::from(body[35] >> 4);
        let port = u16::from_be_bytes([body[38], body[39]]);
        let atyp = AddrType::from_byte(body[40])
            .ok_or_else(|| VmessError::InvalidAddress(format!("address type {}", body[40])))?;

        let rest = &body[FIXED_LEN..];
        let (addr, used) = match atyp {
            AddrType::Ipv4 => {
                let octets: [u8; 4] = rest
                    .get(..4)
                    .and_then(|s| s.try_into().ok())
                    .ok_or_else(|| malformed("truncated ipv4 address"))?;
                (DstAddr::Ipv4(octets), 4)
            }
            AddrType::Ipv6 => {
                let octets: [u8; 16] = rest
                    .get(..16)
                    .and_then(|s| s.try_into().ok())
                    .ok_or_else(|| malformed("truncated ipv6 address"))?;
                (DstAddr::Ipv6(octets), 16)
            }
            AddrType::Domain => {
                let len = usize::from(*rest.first().ok_or_else(|| malformed("missing domain length"))?);
                let host = rest
                    .get(1..1 + len)
                    .ok_or_else(|| malformed("truncated domain"))?;
                let host = String::from_utf8(host.to_vec())
                    .map_err(|_| VmessError::InvalidAddress("domain is not utf-8".into()))?;
                (DstAddr::Domain(DomainName::new(host)?), 1 + len)
            }
        };

        let padding = rest
            .get(used..)
            .filter(|p| p.len() == padding_len)
            .ok_or_else(|| malformed("padding length mismatch"))?
            .to_vec();

        let mut body_iv = [0u8; 16];
        let mut body_key = [0u8; 16];
        body_iv.copy_from_slice(&body[1..17]);
        body_key.copy_from_slice(&body[17..33]);

        Ok(Self {
            body_iv,
            body_key,
            resp_v: body[33],
            security,
            destination: Destination::new(addr, port),
            padding,
        })
    }
}

/// Validate a decrypted response header against the request's `resp_v`.
pub fn check_response(resp_v: u8, header: &[u8; RESPONSE_LEN]) -> Result<(), VmessError> {
    if header[0] != resp_v {
        return Err(VmessError::UnexpectedResponse);
    }
    if header[2] != 0 {
        return Err(VmessError::DynamicPort);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::User;
    use std::net::Ipv4Addr;

    fn header() -> RequestHeader {
        RequestHeader::random(
            Security::Aes128Gcm,
            Destination::new(DstAddr::Domain(DomainName::new("example.com").unwrap()), 443),
        )
    }

    #[test]
    fn encoded_layout() {
        let h = header();
        let plain = h.encode();
        assert_eq!(plain.len(), FIXED_LEN + 1 + 11 + h.padding().len() + 4);
        assert_eq!(plain[0], VERSION);
        assert_eq!(&plain[1..17], &h.body_iv);
        assert_eq!(&plain[17..33], &h.body_key);
        assert_eq!(plain[33], h.resp_v);
        assert_eq!(plain[34], OPTION_CHUNK_STREAM);
        assert_eq!(plain[35] & 0x0f, 3);
        assert_eq!(usize::from(plain[35] >> 4), h.padding().len());
        assert_eq!(plain[37], COMMAND_TCP);
        assert_eq!(&plain[38..40], &443u16.to_be_bytes());
        assert_eq!(plain[40], AddrType::Domain as u8);
        assert_eq!(plain[41], 11);
        let n = plain.len();
        assert_eq!(
            &plain[n - 4..],
            &kdf::fnv1a32(&plain[..n - 4]).to_be_bytes()
        );
    }

    #[test]
    fn parse_recovers_fields() {
        let h = RequestHeader::random(
            Security::None,
            Destination::new(Ipv4Addr::new(10, 1, 2, 3).into(), 8080),
        );
        assert_eq!(RequestHeader::parse(&h.encode()).unwrap(), h);
    }

    #[test]
    fn padding_length_never_touches_security_nibble() {
        for _ in 0..512 {
            let h = RequestHeader::random(
                Security::Chacha20Poly1305,
                Destination::new(Ipv4Addr::LOCALHOST.into(), 1),
            );
            assert!(h.padding().len() < MAX_PADDING);
            let plain = h.encode();
            assert_eq!(plain[35] & 0x0f, Security::Chacha20Poly1305.code());
            assert_eq!(usize::from(plain[35] >> 4), h.padding().len());
            assert_eq!(RequestHeader::parse(&plain).unwrap(), h);
        }
    }

    #[test]
    fn parse_rejects_corrupted_checksum() {
        let mut plain = header().encode();
        plain[20] ^= 0xff;
        let err = RequestHeader::parse(&plain).unwrap_err();
        assert!(matches!(err, VmessError::MalformedRequest(_)));
    }

    #[test]
    fn sealed_header_starts_with_auth_and_decrypts() {
        let user = User::parse("b831381d-6324-4d53-ad4f-8cda48b30811", 0).unwrap();
        let id = user.primary();
        let h = header();
        let ts = 1_700_000_000;
        let sealed = h.seal(id, ts).unwrap();
        assert_eq!(&sealed[..AUTH_LEN], &kdf::auth(id.uuid(), ts).unwrap());

        let mut body = sealed[AUTH_LEN..].to_vec();
        kdf::cfb_decryptor(id.cmd_key(), &kdf::hash_timestamp(ts)).decrypt(&mut body);
        assert_eq!(body, h.encode());
    }

    #[test]
    fn response_checks() {
        assert!(check_response(7, &[7, 0, 0, 0]).is_ok());
        assert!(matches!(
            check_response(7, &[8, 0, 0, 0]),
            Err(VmessError::UnexpectedResponse)
        ));
        assert!(matches!(
            check_response(7, &[7, 0, 1, 4]),
            Err(VmessError::DynamicPort)
        ));
    }
}
