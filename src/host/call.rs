use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::account::Account;
use crate::ledger::Amount;

const CALL_DOMAIN: &[u8] = b"rifero-call-v1";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlatformCall {
    CreateReferral { referee: Account },
    Transfer { to: Account, amount: Amount },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallPayload {
    pub nonce: u64,
    pub call: PlatformCall,
}

impl CallPayload {
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(CALL_DOMAIN);
        hasher.update(serde_json::to_vec(self).expect("call payload encode"));
        hasher.finalize().into()
    }
}

/// A call as submitted by a wallet: payload plus an Ed25519 signature over
/// its digest. The host turns the verifying key into the caller [`Account`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedCall {
    #[serde(with = "crate::host::serde_hex")]
    pub public_key: Vec<u8>,
    #[serde(with = "crate::host::serde_hex")]
    pub signature: Vec<u8>,
    pub payload: CallPayload,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CallError {
    #[error("malformed public key")]
    InvalidPublicKey,
    #[error("malformed signature")]
    MalformedSignature,
    #[error("signature does not match call payload")]
    InvalidSignature,
}

impl SignedCall {
    pub fn sign(key: &SigningKey, payload: CallPayload) -> Self {
        let signature = key.sign(&payload.digest());
        Self {
            public_key: key.verifying_key().to_bytes().to_vec(),
            signature: signature.to_bytes().to_vec(),
            payload,
        }
    }

    pub fn digest(&self) -> [u8; 32] {
        self.payload.digest()
    }

    /// Checks the signature and returns the authenticated caller.
    pub fn verify(&self) -> Result<Account, CallError> {
        let key_bytes: [u8; 32] = self
            .public_key
            .as_slice()
            .try_into()
            .map_err(|_| CallError::InvalidPublicKey)?;
        let key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| CallError::InvalidPublicKey)?;
        let signature =
            Signature::from_slice(&self.signature).map_err(|_| CallError::MalformedSignature)?;
        key.verify_strict(&self.digest(), &signature)
            .map_err(|_| CallError::InvalidSignature)?;
        Ok(Account::from_verifying_key(&key))
    }
}
