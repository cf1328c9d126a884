//! Hashing, key, address and signature primitives
//!
//! Addresses are `VDX` followed by base58 of
//! `version || RIPEMD160(SHA256(compressed pubkey)) || checksum`, where the
//! checksum is the first four bytes of the double SHA-256 of the payload.
//! Signatures are DER-encoded secp256k1 ECDSA over a 32-byte digest.

use crate::constants::{ADDRESS_PREFIX, ADDRESS_VERSION};
use crate::error::{ConsensusError, Result};
use crate::types::{Address, ByteString, Hash};
use bitcoin_hashes::{sha256d, Hash as BitcoinHash, HashEngine};
use rand::rngs::OsRng;
use ripemd::Ripemd160;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};

const CHECKSUM_LEN: usize = 4;
const PAYLOAD_LEN: usize = 21;

/// SHA256(SHA256(data))
pub fn double_sha256(data: &[u8]) -> Hash {
    let mut engine = sha256d::Hash::engine();
    engine.input(data);
    let result = sha256d::Hash::from_engine(engine);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

pub fn sha256(data: &[u8]) -> Hash {
    let digest = Sha256::digest(data);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&digest);
    hash
}

/// RIPEMD160(SHA256(data))
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let digest = Ripemd160::digest(sha256(data));
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    out
}

/// A secp256k1 key pair able to authorize spends
#[derive(Debug, Clone)]
pub struct KeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret, public) = secp.generate_keypair(&mut OsRng);
        Self { secret, public }
    }

    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let secret = SecretKey::from_slice(bytes)
            .map_err(|e| ConsensusError::Crypto(format!("invalid private key: {}", e)))?;
        let public = PublicKey::from_secret_key(&Secp256k1::signing_only(), &secret);
        Ok(Self { secret, public })
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.secret_bytes()
    }

    /// Compressed SEC1 encoding (33 bytes)
    pub fn public_key_bytes(&self) -> ByteString {
        self.public.serialize().to_vec()
    }

    pub fn address(&self) -> Address {
        encode_address(&hash160(&self.public.serialize()))
    }

    /// DER signature over `digest`
    pub fn sign(&self, digest: &Hash) -> Result<ByteString> {
        let message = Message::from_digest_slice(digest)
            .map_err(|e| ConsensusError::Crypto(e.to_string()))?;
        let signature = Secp256k1::signing_only().sign_ecdsa(&message, &self.secret);
        Ok(signature.serialize_der().to_vec())
    }
}

/// Derive the compressed public key for a raw private key
pub fn public_key_from_private(private_key: &[u8]) -> Result<ByteString> {
    Ok(KeyPair::from_secret_bytes(private_key)?.public_key_bytes())
}

/// Derive the address owned by a serialized public key
pub fn address_from_public_key(public_key: &[u8]) -> Result<Address> {
    let key = PublicKey::from_slice(public_key)
        .map_err(|e| ConsensusError::Crypto(format!("invalid public key: {}", e)))?;
    Ok(encode_address(&hash160(&key.serialize())))
}

/// Sign `digest` with a raw private key
pub fn sign(private_key: &[u8], digest: &Hash) -> Result<ByteString> {
    KeyPair::from_secret_bytes(private_key)?.sign(digest)
}

/// Check a DER signature over `digest`. Malformed keys or signatures verify as false.
pub fn verify_signature(public_key: &[u8], signature: &[u8], digest: &Hash) -> bool {
    let Ok(key) = PublicKey::from_slice(public_key) else {
        return false;
    };
    let Ok(signature) = Signature::from_der(signature) else {
        return false;
    };
    let Ok(message) = Message::from_digest_slice(digest) else {
        return false;
    };
    Secp256k1::verification_only()
        .verify_ecdsa(&message, &signature, &key)
        .is_ok()
}

pub fn encode_address(key_hash: &[u8; 20]) -> Address {
    let mut bytes = Vec::with_capacity(PAYLOAD_LEN + CHECKSUM_LEN);
    bytes.push(ADDRESS_VERSION);
    bytes.extend_from_slice(key_hash);
    let checksum = double_sha256(&bytes);
    bytes.extend_from_slice(&checksum[..CHECKSUM_LEN]);
    format!("{}{}", ADDRESS_PREFIX, bs58::encode(bytes).into_string())
}

/// Decode an address back to its key hash, checking prefix, length, checksum and version
pub fn parse_address(address: &str) -> Result<[u8; 20]> {
    let encoded = address
        .strip_prefix(ADDRESS_PREFIX)
        .ok_or_else(|| ConsensusError::Crypto(format!("invalid address prefix: {}", address)))?;
    let decoded = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| ConsensusError::Crypto(format!("invalid base58: {}", e)))?;
    if decoded.len() != PAYLOAD_LEN + CHECKSUM_LEN {
        return Err(ConsensusError::Crypto(format!(
            "invalid address length: expected {} bytes, got {}",
            PAYLOAD_LEN + CHECKSUM_LEN,
            decoded.len()
        )));
    }

    let (payload, checksum) = decoded.split_at(PAYLOAD_LEN);
    if double_sha256(payload)[..CHECKSUM_LEN] != *checksum {
        return Err(ConsensusError::Crypto("invalid address checksum".to_string()));
    }
    if payload[0] != ADDRESS_VERSION {
        return Err(ConsensusError::Crypto(format!(
            "invalid address version: {:02x}",
            payload[0]
        )));
    }

    let mut key_hash = [0u8; 20];
    key_hash.copy_from_slice(&payload[1..]);
    Ok(key_hash)
}
