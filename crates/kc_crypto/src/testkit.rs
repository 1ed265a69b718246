//! Client simulation for tests.
//!
//! Generates identity key packs the way a Keycat client would, seals private
//! packs to a recipient, and signs vault key pairs and secret blobs. There is no
//! unseal function.

use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit},
    XChaCha20Poly1305,
};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::pack::{sign_and_pack, BOX_KEY_SIZE};
use crate::vault_keys::VaultKeyPair;

/// A principal's full key material, as held by a client.
pub struct ClientKeys {
    public_pack: Vec<u8>,
    private_pack: Zeroizing<Vec<u8>>,
    enc_public: [u8; BOX_KEY_SIZE],
}

impl ClientKeys {
    pub fn generate() -> Self {
        let signing = SigningKey::generate(&mut OsRng);
        let enc_secret = StaticSecret::random_from_rng(OsRng);
        let enc_public = PublicKey::from(&enc_secret).to_bytes();

        let mut private_pack = Zeroizing::new(Vec::with_capacity(96));
        private_pack.extend_from_slice(&signing.to_keypair_bytes());
        private_pack.extend_from_slice(&enc_secret.to_bytes());

        let mut public_pack = signing.verifying_key().to_bytes().to_vec();
        // self-signature over the encryption key
        let signed_enc = sign_and_pack(&private_pack, &enc_public)
            .expect("fresh keypair bytes are valid");
        public_pack.extend_from_slice(&signed_enc);

        Self {
            public_pack,
            private_pack,
            enc_public,
        }
    }

    pub fn public_pack(&self) -> &[u8] {
        &self.public_pack
    }

    pub fn private_pack(&self) -> &[u8] {
        &self.private_pack
    }

    /// Own private pack sealed to own encryption key, signed by own signing key.
    pub fn sealed_private_pack(&self) -> Vec<u8> {
        self.sign(&seal(&self.enc_public, &self.private_pack))
    }

    /// `public pack | sealed private pack`, as uploaded at registration.
    pub fn registration_pack(&self) -> Vec<u8> {
        let mut out = self.public_pack.clone();
        out.extend_from_slice(&self.sealed_private_pack());
        out
    }

    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        sign_and_pack(&self.private_pack, msg)
            .expect("private pack built by generate()")
    }
}

/// Ephemeral X25519 to `recipient_enc_public`, then XChaCha20-Poly1305.
///
/// Output: `[ ephemeral public (32) | nonce (24) | ciphertext + tag ]`.
pub fn seal(recipient_enc_public: &[u8; BOX_KEY_SIZE], plaintext: &[u8]) -> Vec<u8> {
    let eph = EphemeralSecret::random_from_rng(OsRng);
    let eph_public = PublicKey::from(&eph);
    let shared = eph.diffie_hellman(&PublicKey::from(*recipient_enc_public));

    let cipher = XChaCha20Poly1305::new_from_slice(shared.as_bytes())
        .expect("shared secret is 32 bytes");
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ct = cipher
        .encrypt(&nonce, plaintext)
        .expect("in-memory encryption");

    let mut out = Vec::with_capacity(BOX_KEY_SIZE + nonce.len() + ct.len());
    out.extend_from_slice(eph_public.as_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ct);
    out
}

/// The vault's private pack sealed to `recipient` and signed by the vault.
pub fn sealed_vault_key(vault: &ClientKeys, recipient: &ClientKeys) -> Vec<u8> {
    vault.sign(&seal(&recipient.enc_public, &vault.private_pack))
}

/// A vault key pair signed by `admin`, with one entry per recipient id.
///
/// Entries are sealed to the vault's own encryption key, since only ids are
/// known here. Use [`sealed_vault_key`] when the recipient's keys are at hand.
pub fn vault_key_pair<I, S>(admin: &ClientKeys, vault: &ClientKeys, recipients: I) -> VaultKeyPair
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let sealed = sealed_vault_key(vault, vault);
    VaultKeyPair {
        public_key: admin.sign(vault.public_pack()),
        keys: recipients.into_iter().map(|id| (id.into(), sealed.clone())).collect(),
    }
}

/// An opaque secret payload of `len` bytes, signed by the vault.
pub fn signed_blob(vault: &ClientKeys, len: usize) -> Vec<u8> {
    let mut body = vec![0u8; len];
    rand::RngCore::fill_bytes(&mut OsRng, &mut body);
    vault.sign(&body)
}
