use std::{fmt, str::FromStr};

use ed25519_dalek::VerifyingKey;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

pub const ACCOUNT_LEN: usize = 20;

/// Fixed-width participant address, rendered as `0x` + 40 hex chars.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Account([u8; ACCOUNT_LEN]);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AccountParseError {
    #[error("address must start with 0x")]
    MissingPrefix,
    #[error("address must be {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("invalid hex in address: {0}")]
    InvalidHex(String),
}

impl Account {
    pub const ZERO: Account = Account([0u8; ACCOUNT_LEN]);

    pub const fn new(bytes: [u8; ACCOUNT_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ACCOUNT_LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ACCOUNT_LEN]
    }

    /// Last 20 bytes of `SHA-256(pubkey)`.
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        Self::from_digest(&Sha256::digest(key.as_bytes()).into())
    }

    /// Deterministic program address owned by `deployer`.
    pub fn derive_program(seed: &[u8], deployer: &Account) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(seed);
        hasher.update(deployer.0);
        Self::from_digest(&hasher.finalize().into())
    }

    fn from_digest(digest: &[u8; 32]) -> Self {
        let mut out = [0u8; ACCOUNT_LEN];
        out.copy_from_slice(&digest[32 - ACCOUNT_LEN..]);
        Self(out)
    }
}

impl FromStr for Account {
    type Err = AccountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let body = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or(AccountParseError::MissingPrefix)?;
        let bytes = hex::decode(body).map_err(|e| AccountParseError::InvalidHex(e.to_string()))?;
        let raw: [u8; ACCOUNT_LEN] =
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| AccountParseError::InvalidLength {
                    expected: ACCOUNT_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self(raw))
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Account({self})")
    }
}

impl Serialize for Account {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Account {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        encoded.parse().map_err(D::Error::custom)
    }
}
