//! Session key agreement and AEAD framing.
//!
//! Ephemeral X25519 keys are exchanged during the handshake ([`crate::handshake`]);
//! the resulting shared secret is expanded through HKDF-SHA256 into the
//! AES-256-GCM key used for every `Seq` packet on the session.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use hkdf::Hkdf;
use log::warn;
use rand::thread_rng;
use sha2::Sha256;
use utils::error::Result;
use x25519_dalek::{EphemeralSecret, PublicKey, SharedSecret};

/// All `Seq` payloads are sealed with this fixed, all-zero nonce under the
/// same per-session key. This is a known nonce-reuse defect inherited from
/// the protocol this was distilled from: see the design notes for why it is
/// preserved bug-compatibly rather than fixed here.
const NONCE: [u8; 12] = [0; 12];
/// Associated data is likewise fixed and empty of any real content.
const AAD: [u8; 12] = [0; 12];

pub const KEY_LEN: usize = 32;
pub type SessionKey = [u8; KEY_LEN];

/// A freshly generated ephemeral X25519 keypair, consumed on first use.
pub struct Ephemeral(EphemeralSecret);

impl Ephemeral {
	pub fn generate() -> Self {
		Self(EphemeralSecret::random_from_rng(thread_rng()))
	}

	pub fn public(&self) -> PublicKey {
		PublicKey::from(&self.0)
	}

	pub fn diffie_hellman(self, their_public: &PublicKey) -> SharedSecret {
		self.0.diffie_hellman(their_public)
	}
}

/// Expand an X25519 shared secret into the session's AES-256-GCM key via
/// HKDF-SHA256 with an empty salt and a 12-byte all-zero info string.
pub fn derive_key(shared: &SharedSecret) -> SessionKey {
	let hk = Hkdf::<Sha256>::new(Some(&[]), shared.as_bytes());

	let mut okm = [0u8; KEY_LEN];
	hk.expand(&AAD, &mut okm).expect("32 bytes is a valid AES-256-GCM key length");
	okm
}

/// Seal `plaintext` under the session key, returning ciphertext with an
/// appended authentication tag.
pub fn seal(key: &SessionKey, plaintext: &[u8]) -> Vec<u8> {
	let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

	cipher
		.encrypt(Nonce::from_slice(&NONCE), aes_gcm::aead::Payload { msg: plaintext, aad: &AAD })
		.expect("sealing under a fixed-size key cannot fail")
}

/// Open a `Seq` payload sealed with [`seal`], returning the original plaintext.
pub fn open(key: &SessionKey, ciphertext: &[u8]) -> Result<Vec<u8>> {
	let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

	cipher
		.decrypt(Nonce::from_slice(&NONCE), aes_gcm::aead::Payload { msg: ciphertext, aad: &AAD })
		.map_err(|_| warn!("Failed to decrypt packet payload"))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn handshake_derives_identical_keys() {
		let a = Ephemeral::generate();
		let b = Ephemeral::generate();

		let a_pub = a.public();
		let b_pub = b.public();

		let a_key = derive_key(&a.diffie_hellman(&b_pub));
		let b_key = derive_key(&b.diffie_hellman(&a_pub));

		assert_eq!(a_key, b_key);
	}

	#[test]
	fn seal_open_round_trip() {
		let key = [7u8; KEY_LEN];
		let plaintext = b"hello rendezvous";

		let ciphertext = seal(&key, plaintext);
		let opened = open(&key, &ciphertext).expect("decrypts with the matching key");

		assert_eq!(opened, plaintext);
	}

	#[test]
	fn open_rejects_tampered_ciphertext() {
		let key = [7u8; KEY_LEN];
		let mut ciphertext = seal(&key, b"hello");
		*ciphertext.last_mut().unwrap() ^= 0xff;

		assert!(open(&key, &ciphertext).is_err());
	}
}
