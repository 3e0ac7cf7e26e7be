//! Key derivation and checksum helpers shared by the client and the test server.

use aes::Aes128;
use cfb_mode::{BufDecryptor, BufEncryptor};
use cfb_mode::cipher::KeyIvInit;
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};

use crate::VmessError;

pub(crate) fn md5_sum(data: &[u8]) -> [u8; 16] {
    Md5::digest(data).into()
}

/// IV of the request header cipher: MD5 over the big-endian timestamp, four times.
pub(crate) fn hash_timestamp(ts: u64) -> [u8; 16] {
    let be = ts.to_be_bytes();
    let mut h = Md5::new();
    for _ in 0..4 {
        h.update(be);
    }
    h.finalize().into()
}

/// `HMAC-MD5(uuid, ts)`, the 16 byte authentication prefix.
pub(crate) fn auth(uuid: &[u8; 16], ts: u64) -> Result<[u8; 16], VmessError> {
    let mut mac = <Hmac<Md5> as Mac>::new_from_slice(uuid)
        .map_err(|e| VmessError::Crypto(format!("hmac init: {e}")))?;
    mac.update(&ts.to_be_bytes());
    Ok(mac.finalize().into_bytes().into())
}

/// 32-bit FNV-1a.
pub(crate) fn fnv1a32(data: &[u8]) -> u32 {
    data.iter().fold(0x811c_9dc5u32, |hash, b| {
        (hash ^ u32::from(*b)).wrapping_mul(0x0100_0193)
    })
}

pub(crate) fn cfb_encryptor(key: &[u8; 16], iv: &[u8; 16]) -> BufEncryptor<Aes128> {
    BufEncryptor::new(key.into(), iv.into())
}

pub(crate) fn cfb_decryptor(key: &[u8; 16], iv: &[u8; 16]) -> BufDecryptor<Aes128> {
    BufDecryptor::new(key.into(), iv.into())
}

pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
