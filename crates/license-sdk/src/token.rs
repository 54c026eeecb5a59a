/// Signed license tokens.
///
/// A token is `hex(payload_json) "." hex(signature)` where the signature is
/// RSA PKCS#1 v1.5 over SHA-256 of the exact payload bytes. The issuing
/// authority keeps the private key; issuers running offline only need the
/// public key to judge a token.
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, SdkError};

const TOKEN_SEPARATOR: char = '.';

/// Structured data carried by a license and captured in the ledger on
/// redemption.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LicensePayload {
    /// Account the token is bound to. Unbound tokens may be redeemed by any account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Signed credit to apply to the account balance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    /// Unix seconds after which the token is no longer accepted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    /// Anything else the authority put in the license (feature flags, plan names, ...)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl LicensePayload {
    pub fn with_amount(amount: i64) -> Self {
        Self {
            amount: Some(amount),
            ..Self::default()
        }
    }

    pub fn bound_to(mut self, uid: &str) -> Self {
        self.uid = Some(uid.to_string());
        self
    }

    pub fn expiring_at(mut self, unix_secs: u64) -> Self {
        self.expires_at = Some(unix_secs);
        self
    }

    /// The credit to apply, if the payload carries a non-zero one.
    pub fn credit_amount(&self) -> Option<i64> {
        self.amount.filter(|amount| *amount != 0)
    }

    pub fn is_expired_at(&self, now_unix_secs: u64) -> bool {
        matches!(self.expires_at, Some(expires_at) if now_unix_secs >= expires_at)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| SdkError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| SdkError::Serialization(e.to_string()))
    }
}

/// Domain-separated hash of a token; ledgers key on this instead of the raw token.
pub fn hash_token(token: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"license_token:");
    hasher.update(token.as_bytes());
    let result = hasher.finalize();

    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

pub fn token_key(token: &str) -> String {
    hex::encode(hash_token(token))
}

/// Splits a token and decodes its payload without checking the signature.
pub fn decode_unverified(token: &str) -> Result<(LicensePayload, Vec<u8>, Vec<u8>)> {
    let (payload_hex, signature_hex) = token
        .trim()
        .split_once(TOKEN_SEPARATOR)
        .ok_or_else(|| SdkError::InvalidToken("missing signature separator".into()))?;
    let payload_bytes = hex::decode(payload_hex)
        .map_err(|e| SdkError::InvalidToken(format!("payload is not hex: {}", e)))?;
    let signature = hex::decode(signature_hex)
        .map_err(|e| SdkError::InvalidToken(format!("signature is not hex: {}", e)))?;
    let payload = LicensePayload::from_bytes(&payload_bytes)
        .map_err(|e| SdkError::InvalidToken(format!("payload is not a license: {}", e)))?;
    Ok((payload, payload_bytes, signature))
}

pub struct LicenseSigner {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
}

impl LicenseSigner {
    pub fn new(key_bits: usize) -> Result<Self> {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, key_bits)
            .map_err(|e| SdkError::Crypto(format!("Failed to generate RSA key: {}", e)))?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(Self {
            private_key,
            public_key,
        })
    }

    /// Accepts PKCS#8 (`BEGIN PRIVATE KEY`) or PKCS#1 (`BEGIN RSA PRIVATE KEY`) PEM.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| SdkError::Crypto(format!("Invalid private key: {}", e)))?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(Self {
            private_key,
            public_key,
        })
    }

    pub fn to_pem(&self) -> Result<String> {
        let pem = self
            .private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| SdkError::Crypto(format!("Failed to encode key: {}", e)))?;
        Ok(pem.to_string())
    }

    pub fn public_key_pem(&self) -> Result<String> {
        self.public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| SdkError::Crypto(format!("Failed to encode public key: {}", e)))
    }

    pub fn verifier(&self) -> LicenseVerifier {
        LicenseVerifier {
            public_key: self.public_key.clone(),
        }
    }

    pub fn issue(&self, payload: &LicensePayload) -> Result<String> {
        let payload_bytes = payload.to_bytes()?;
        let hashed = Sha256::digest(&payload_bytes);
        let signature = self
            .private_key
            .sign(Pkcs1v15Sign::new::<Sha256>(), &hashed)
            .map_err(|e| SdkError::Crypto(format!("Failed to sign license: {}", e)))?;
        Ok(format!(
            "{}{}{}",
            hex::encode(payload_bytes),
            TOKEN_SEPARATOR,
            hex::encode(signature)
        ))
    }
}

#[derive(Clone)]
pub struct LicenseVerifier {
    public_key: RsaPublicKey,
}

impl LicenseVerifier {
    pub fn new(public_key: RsaPublicKey) -> Self {
        Self { public_key }
    }

    /// Accepts SPKI (`BEGIN PUBLIC KEY`) or PKCS#1 (`BEGIN RSA PUBLIC KEY`) PEM.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let public_key = RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map_err(|e| SdkError::Crypto(format!("Invalid public key: {}", e)))?;
        Ok(Self { public_key })
    }

    /// Checks the signature and returns the payload it covers.
    pub fn verify(&self, token: &str) -> Result<LicensePayload> {
        let (payload, payload_bytes, signature) = decode_unverified(token)?;
        let hashed = Sha256::digest(&payload_bytes);
        self.public_key
            .verify(Pkcs1v15Sign::new::<Sha256>(), &hashed, &signature)
            .map_err(|_| SdkError::InvalidToken("signature does not match".into()))?;
        Ok(payload)
    }
}
