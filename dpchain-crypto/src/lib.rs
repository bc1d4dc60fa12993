//! Cryptographic primitives are treated as a black-box oracle by the rest
//! of the workspace (§1); this crate only provides the seam
//! (`CryptoProvider`) and a concrete Ed25519 + blake3 + ripemd160
//! implementation. No novel cryptography is implemented here.

use anyhow::{anyhow, Result};
use dpchain_core::{Address, SecretHash};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey, SIGNATURE_LENGTH};
use ripemd::{Digest, Ripemd160};

pub trait CryptoProvider: Send + Sync {
    fn address_from_public_key(&self, pk: &[u8]) -> Result<Address>;
    fn verify_signature(&self, pk: &[u8], msg: &[u8], sig: &[u8]) -> Result<bool>;
    fn sign_message(&self, sk: &[u8], msg: &[u8]) -> Result<Vec<u8>>;
    fn ripemd160(&self, data: &[u8]) -> SecretHash;
    fn blake3(&self, data: &[u8]) -> [u8; 32];
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCryptoProvider;

impl DefaultCryptoProvider {
    pub fn new() -> Self {
        Self
    }
}

impl CryptoProvider for DefaultCryptoProvider {
    fn address_from_public_key(&self, pk: &[u8]) -> Result<Address> {
        let blake = blake3::hash(pk);
        let mut hasher = Ripemd160::new();
        hasher.update(blake.as_bytes());
        let digest = hasher.finalize();
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest);
        Ok(out)
    }

    fn verify_signature(&self, pk: &[u8], msg: &[u8], sig: &[u8]) -> Result<bool> {
        let pk_arr: [u8; 32] = pk.try_into().map_err(|_| anyhow!("bad public key length"))?;
        let vk = VerifyingKey::from_bytes(&pk_arr)?;
        let sig_arr: [u8; SIGNATURE_LENGTH] = sig.try_into().map_err(|_| anyhow!("bad signature length"))?;
        let signature = Signature::from_bytes(&sig_arr);
        Ok(vk.verify(msg, &signature).is_ok())
    }

    fn sign_message(&self, sk: &[u8], msg: &[u8]) -> Result<Vec<u8>> {
        let sk_arr: [u8; 32] = sk.try_into().map_err(|_| anyhow!("bad secret key length"))?;
        let signing = SigningKey::from_bytes(&sk_arr);
        Ok(signing.sign(msg).to_bytes().to_vec())
    }

    fn ripemd160(&self, data: &[u8]) -> SecretHash {
        let mut hasher = Ripemd160::new();
        hasher.update(data);
        let digest = hasher.finalize();
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest);
        out
    }

    fn blake3(&self, data: &[u8]) -> [u8; 32] {
        blake3::hash(data).into()
    }
}

pub fn generate_keypair() -> (Vec<u8>, Vec<u8>) {
    let mut csprng = rand::rngs::OsRng;
    let signing = SigningKey::generate(&mut csprng);
    let verify = signing.verifying_key();
    (verify.to_bytes().to_vec(), signing.to_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_roundtrip() {
        let (pk, sk) = generate_keypair();
        let provider = DefaultCryptoProvider::new();
        let msg = b"evaluate me";
        let sig = provider.sign_message(&sk, msg).unwrap();
        assert!(provider.verify_signature(&pk, msg, &sig).unwrap());
        assert!(!provider.verify_signature(&pk, b"tampered", &sig).unwrap());
    }

    #[test]
    fn address_is_deterministic() {
        let (pk, _) = generate_keypair();
        let provider = DefaultCryptoProvider::new();
        let a = provider.address_from_public_key(&pk).unwrap();
        let b = provider.address_from_public_key(&pk).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn secret_hash_chain() {
        let provider = DefaultCryptoProvider::new();
        let secret = [7u8; 32];
        let hash = provider.ripemd160(&secret);
        assert_eq!(hash.len(), 20);
    }
}
