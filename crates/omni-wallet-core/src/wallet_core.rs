use ed25519_dalek::{SigningKey, VerifyingKey, SECRET_KEY_LENGTH};
use log::debug;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Bytes of the public-key digest kept in an address
pub const ADDRESS_BYTES: usize = 20;

// 🚀 Wallet Error Handling
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("Invalid secret key: {0}")]
    InvalidSecretKey(String),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

/// Address derived from an ed25519 public key: hex of the first
/// `ADDRESS_BYTES` of its SHA-256 digest
pub fn address_from_public_key(public_key: &VerifyingKey) -> String {
    let digest = Sha256::digest(public_key.as_bytes());
    hex::encode(&digest[..ADDRESS_BYTES])
}

/// Well-formed wallet address (lowercase hex of the right length)
pub fn validate_address(address: &str) -> Result<(), WalletError> {
    let well_formed = address.len() == ADDRESS_BYTES * 2
        && address
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
    if well_formed {
        Ok(())
    } else {
        Err(WalletError::InvalidAddress(address.to_string()))
    }
}

/// Publicly shareable part of a wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletIdentity {
    pub address: String,
    pub public_key: String,
}

/// Freshly created wallet keys. The secret is wiped on drop.
pub struct WalletKeys {
    signing_key: SigningKey,
    secret_hex: Zeroizing<String>,
    identity: WalletIdentity,
}

impl WalletKeys {
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let signing_key = SigningKey::generate(rng);
        let keys = Self::from_signing_key(signing_key);
        debug!("Generated wallet {}", keys.identity.address);
        keys
    }

    /// Restore keys from a hex-encoded 32-byte secret
    pub fn from_secret_hex(secret: &str) -> Result<Self, WalletError> {
        let mut bytes = Zeroizing::new([0u8; SECRET_KEY_LENGTH]);
        hex::decode_to_slice(secret.trim(), &mut bytes[..])
            .map_err(|e| WalletError::InvalidSecretKey(e.to_string()))?;
        Ok(Self::from_signing_key(SigningKey::from_bytes(&bytes)))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        let identity = WalletIdentity {
            address: address_from_public_key(&verifying_key),
            public_key: hex::encode(verifying_key.as_bytes()),
        };
        let secret_hex = Zeroizing::new(hex::encode(signing_key.to_bytes()));
        Self {
            signing_key,
            secret_hex,
            identity,
        }
    }

    pub fn address(&self) -> &str {
        &self.identity.address
    }

    pub fn public_key(&self) -> &str {
        &self.identity.public_key
    }

    pub fn secret_hex(&self) -> &str {
        &self.secret_hex
    }

    pub fn identity(&self) -> &WalletIdentity {
        &self.identity
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

impl std::fmt::Debug for WalletKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletKeys")
            .field("address", &self.identity.address)
            .field("public_key", &self.identity.public_key)
            .field("secret", &"<redacted>")
            .finish()
    }
}
