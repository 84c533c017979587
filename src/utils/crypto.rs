//! Asymmetric key agent used to protect handshake payloads.
//!
//! Payloads are sealed to a recipient's X25519 public key: the sender creates
//! an ephemeral key pair, derives a one-off key from the Diffie-Hellman output
//! and encrypts with XChaCha20-Poly1305.
//!
//! ```text
//! [EphemeralPublic(32)] [Nonce(24)] [Ciphertext + Tag(16)]
//! ```
//!
//! ## Limitations
//! This only keeps account-identifying fields away from passive observers on
//! the way to the server. The recipient key is long-lived, so there is no
//! forward secrecy: anyone who later obtains the server's private key can open
//! every recorded payload. The sender is not authenticated either. It is not a
//! substitute for TLS.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand_core::OsRng;
use sha2::{Digest, Sha256};
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::{Zeroize, Zeroizing};

use crate::error::{constants, ProtocolError, Result};

/// Length of an X25519 public or private key
pub const KEY_LEN: usize = 32;

/// XChaCha20 nonce length
pub const NONCE_LEN: usize = 24;

/// Poly1305 tag length
pub const TAG_LEN: usize = 16;

/// Bytes added to every sealed payload
pub const SEAL_OVERHEAD: usize = KEY_LEN + NONCE_LEN + TAG_LEN;

/// Raw public key bytes as exchanged on the wire
pub type PublicKeyBytes = [u8; KEY_LEN];

/// Holds this process's key pair. The private half never leaves the agent
/// except through [`KeyAgent::private_key`] for persistence.
pub struct KeyAgent {
    secret: StaticSecret,
    public: PublicKey,
}

impl std::fmt::Debug for KeyAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyAgent")
            .field("public", &self.public.as_bytes())
            .finish_non_exhaustive()
    }
}

impl KeyAgent {
    /// Generate a fresh key pair
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Rebuild an agent from persisted private key bytes
    pub fn from_private_key(mut private: [u8; KEY_LEN]) -> Self {
        let secret = StaticSecret::from(private);
        private.zeroize();
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Restore persisted key material, generating a new pair if it is absent
    /// or corrupt.
    ///
    /// Returns the agent and whether it had to regenerate, so the caller can
    /// persist the new pair.
    pub fn load_or_generate(public: &[u8], private: &[u8]) -> (Self, bool) {
        if let (Ok(public), Ok(private)) = (
            <[u8; KEY_LEN]>::try_from(public),
            <[u8; KEY_LEN]>::try_from(private),
        ) {
            let agent = Self::from_private_key(private);
            if agent.public_key() == public {
                return (agent, false);
            }
            tracing::warn!("Persisted public key does not match private key, regenerating");
        } else if !public.is_empty() || !private.is_empty() {
            tracing::warn!(
                public_len = public.len(),
                private_len = private.len(),
                "Persisted key material has wrong length, regenerating"
            );
        }
        (Self::generate(), true)
    }

    pub fn public_key(&self) -> PublicKeyBytes {
        self.public.to_bytes()
    }

    /// Private key bytes for the persistence collaborator
    pub fn private_key(&self) -> Zeroizing<[u8; KEY_LEN]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    /// Seal `plaintext` so only the holder of `recipient`'s private key can read it
    pub fn encrypt(recipient: &PublicKeyBytes, plaintext: &[u8]) -> Result<Vec<u8>> {
        let ephemeral = EphemeralSecret::random_from_rng(OsRng);
        let ephemeral_public = PublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(&PublicKey::from(*recipient));
        if !shared.was_contributory() {
            return Err(ProtocolError::EncryptionFailure);
        }

        let mut key = derive_key(shared.as_bytes(), ephemeral_public.as_bytes(), recipient);
        let mut nonce = [0u8; NONCE_LEN];
        getrandom::fill(&mut nonce)
            .map_err(|_| ProtocolError::Custom(constants::ERR_RANDOM_SOURCE.into()))?;

        let cipher = XChaCha20Poly1305::new(Key::from_slice(&key));
        key.zeroize();
        let ciphertext = cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: ephemeral_public.as_bytes(),
                },
            )
            .map_err(|_| ProtocolError::EncryptionFailure)?;

        let mut sealed = Vec::with_capacity(SEAL_OVERHEAD + plaintext.len());
        sealed.extend_from_slice(ephemeral_public.as_bytes());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Open a payload sealed to this agent's public key.
    ///
    /// Any corruption, truncation or payload sealed to a different key yields
    /// [`ProtocolError::DecryptionFailed`].
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < SEAL_OVERHEAD {
            tracing::debug!(len = sealed.len(), "{}", constants::ERR_SEALED_TOO_SHORT);
            return Err(ProtocolError::DecryptionFailed);
        }

        let (ephemeral_public, rest) = sealed.split_at(KEY_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

        let mut ephemeral_bytes = [0u8; KEY_LEN];
        ephemeral_bytes.copy_from_slice(ephemeral_public);
        let shared = self.secret.diffie_hellman(&PublicKey::from(ephemeral_bytes));
        if !shared.was_contributory() {
            return Err(ProtocolError::DecryptionFailed);
        }

        let mut key = derive_key(shared.as_bytes(), &ephemeral_bytes, self.public.as_bytes());
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&key));
        key.zeroize();

        cipher
            .decrypt(
                XNonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: ephemeral_public,
                },
            )
            .map_err(|_| ProtocolError::DecryptionFailed)
    }
}

/// Generate a key pair as raw bytes: `(public, private)`
pub fn generate_keypair() -> (PublicKeyBytes, Zeroizing<[u8; KEY_LEN]>) {
    let agent = KeyAgent::generate();
    (agent.public_key(), agent.private_key())
}

/// Derive the symmetric key from the shared secret and both public keys
fn derive_key(shared: &[u8], ephemeral_public: &[u8], recipient_public: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"mmo-protocol sealed v1");
    hasher.update(shared);
    hasher.update(ephemeral_public);
    hasher.update(recipient_public);
    hasher.finalize().into()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_and_open() {
        let agent = KeyAgent::generate();
        let sealed = KeyAgent::encrypt(&agent.public_key(), b"name=alice").unwrap();
        assert_eq!(sealed.len(), SEAL_OVERHEAD + 10);
        assert_eq!(agent.decrypt(&sealed).unwrap(), b"name=alice");
    }

    #[test]
    fn test_sealing_is_randomized() {
        let agent = KeyAgent::generate();
        let a = KeyAgent::encrypt(&agent.public_key(), b"same").unwrap();
        let b = KeyAgent::encrypt(&agent.public_key(), b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_foreign_key_fails() {
        let intended = KeyAgent::generate();
        let other = KeyAgent::generate();
        let sealed = KeyAgent::encrypt(&intended.public_key(), b"secret").unwrap();
        assert!(matches!(
            other.decrypt(&sealed),
            Err(ProtocolError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let agent = KeyAgent::generate();
        let mut sealed = KeyAgent::encrypt(&agent.public_key(), b"secret").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(
            agent.decrypt(&sealed),
            Err(ProtocolError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_short_input_fails() {
        let agent = KeyAgent::generate();
        assert!(matches!(
            agent.decrypt(&[0u8; SEAL_OVERHEAD - 1]),
            Err(ProtocolError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_load_persisted_pair() {
        let original = KeyAgent::generate();
        let (restored, regenerated) =
            KeyAgent::load_or_generate(&original.public_key(), &original.private_key()[..]);
        assert!(!regenerated);
        assert_eq!(restored.public_key(), original.public_key());
    }

    #[test]
    fn test_regenerate_when_absent_or_corrupt() {
        let (_, regenerated) = KeyAgent::load_or_generate(&[], &[]);
        assert!(regenerated);

        let a = KeyAgent::generate();
        let b = KeyAgent::generate();
        let (agent, regenerated) = KeyAgent::load_or_generate(&a.public_key(), &b.private_key()[..]);
        assert!(regenerated);
        assert_ne!(agent.public_key(), a.public_key());

        let (_, regenerated) = KeyAgent::load_or_generate(&[1, 2, 3], &[4, 5]);
        assert!(regenerated);
    }

    #[test]
    fn test_generate_keypair_matches() {
        let (public, private) = generate_keypair();
        assert_eq!(KeyAgent::from_private_key(*private).public_key(), public);
    }
}
