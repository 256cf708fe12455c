/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cryptographic primitives.
//!
//! The definitions and re-exports in this module provide two categories of cryptographic primitives:
//! 1. **Cryptographic Hashes**: provided by the [`sha2`] crate.
//! 2. **Digital Signatures**: provided by the [`ed25519_dalek`] crate.
//!
//! Every signature produced by a replica is a signature over a [`CryptoHash`], never over raw message
//! bytes. Signed hashes are domain-separated by a short tag so that a signature over one kind of
//! message can never be replayed as a signature over another.

use borsh::BorshSerialize;

use super::data_types::{CryptoHash, SignatureBytes};

// re-exports below.
pub use sha2::Digest;
pub use sha2::Sha256 as CryptoHasher;

pub use ed25519_dalek::{Signature, SignatureError, Signer, SigningKey, Verifier, VerifyingKey};

/// A facade around [`SigningKey`] that implements a method for [`sign`](Self::sign)-ing hashes as well
/// as a getter for the [`public`](Self::public) key associated with the signing key.
#[derive(Clone)]
pub struct Keypair(SigningKey);

impl Keypair {
    /// Create a `Keypair` that wraps over `signing_key`.
    pub fn new(signing_key: SigningKey) -> Keypair {
        Keypair(signing_key)
    }

    /// Sign `hash` with the `Keypair`.
    pub fn sign(&self, hash: &CryptoHash) -> SignatureBytes {
        SignatureBytes::new(self.0.sign(&hash.bytes()).to_bytes())
    }

    /// Get the `VerifyingKey` of this `Keypair`.
    pub fn public(&self) -> VerifyingKey {
        self.0.verifying_key()
    }
}

/// Check that `signature` is a valid signature by `verifying_key` over `hash`.
pub fn verify(verifying_key: &VerifyingKey, hash: &CryptoHash, signature: &SignatureBytes) -> bool {
    let signature = Signature::from_bytes(&signature.bytes());
    verifying_key.verify(&hash.bytes(), &signature).is_ok()
}

/// Incrementally builds a domain-separated SHA256 hash over Borsh-serialized values.
pub(crate) struct HashBuilder(CryptoHasher);

impl HashBuilder {
    /// Start a hash whose first input is the `domain` tag.
    pub(crate) fn new(domain: &[u8]) -> HashBuilder {
        let mut hasher = CryptoHasher::new();
        hasher.update(domain);
        HashBuilder(hasher)
    }

    /// Feed the Borsh serialization of `value` into the hash.
    pub(crate) fn chain<T: BorshSerialize>(mut self, value: &T) -> HashBuilder {
        // Serializing into an in-memory buffer does not fail.
        if let Ok(bytes) = value.try_to_vec() {
            self.0.update(bytes);
        }
        self
    }

    /// Feed raw `bytes` into the hash.
    pub(crate) fn chain_bytes(mut self, bytes: &[u8]) -> HashBuilder {
        self.0.update(bytes);
        self
    }

    pub(crate) fn finish(self) -> CryptoHash {
        CryptoHash::new(self.0.finalize().into())
    }
}
