//! Body security (cipher) selection.

use crate::VmessError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Security {
    Aes128Gcm = 3,
    Chacha20Poly1305 = 4,
    None = 5,
}

impl Security {
    /// Parse a cipher name. `auto` picks AES-128-GCM where the CPU usually
    /// has AES instructions and ChaCha20-Poly1305 elsewhere.
    pub fn parse(name: &str) -> Result<Self, VmessError> {
        match name.to_ascii_lowercase().as_str() {
            "aes-128-gcm" => Ok(Self::Aes128Gcm),
            "chacha20-poly1305" => Ok(Self::Chacha20Poly1305),
            "none" => Ok(Self::None),
            "auto" => Ok(Self::auto()),
            _ => Err(VmessError::UnsupportedSecurity(name.to_string())),
        }
    }

    pub fn auto() -> Self {
        if cfg!(any(
            target_arch = "x86_64",
            target_arch = "aarch64",
            target_arch = "s390x"
        )) {
            Self::Aes128Gcm
        } else {
            Self::Chacha20Poly1305
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            3 => Some(Self::Aes128Gcm),
            4 => Some(Self::Chacha20Poly1305),
            5 => Some(Self::None),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aes128Gcm => "aes-128-gcm",
            Self::Chacha20Poly1305 => "chacha20-poly1305",
            Self::None => "none",
        }
    }
}

impl fmt::Display for Security {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_names_case_insensitively() {
        assert_eq!(Security::parse("aes-128-gcm").unwrap(), Security::Aes128Gcm);
        assert_eq!(
            Security::parse("CHACHA20-POLY1305").unwrap(),
            Security::Chacha20Poly1305
        );
        assert_eq!(Security::parse("none").unwrap(), Security::None);
        assert_eq!(Security::parse("auto").unwrap(), Security::auto());
    }

    #[test]
    fn rejects_unknown_cipher() {
        let err = Security::parse("unsupported-cipher").unwrap_err();
        assert_eq!(err.to_string(), "unknown security type: unsupported-cipher");
    }

    #[test]
    fn codes_round_trip() {
        for s in [Security::Aes128Gcm, Security::Chacha20Poly1305, Security::None] {
            assert_eq!(Security::from_code(s.code()), Some(s));
        }
        assert_eq!(Security::from_code(0), None);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn auto_prefers_aes_on_x86_64() {
        assert_eq!(Security::auto(), Security::Aes128Gcm);
    }
}
