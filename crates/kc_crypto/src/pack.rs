//! Signature envelope and identity key packs.
//!
//! Envelope wire format:
//!   [ ed25519 signature (64 bytes) | message ]
//!
//! Key packs (both principals: users and vaults):
//!   public pack  = signPub (32) | signAndPack(signPriv, encPub (32))  (128 bytes)
//!   private pack = signPriv (64, seed | public) | encPriv (32)           (96 bytes)
//!
//! The private pack only exists in plaintext on clients. The server sees it
//! sealed (encrypted to a recipient, then signed), at least
//! `SEALED_KEY_PACK_MIN_SIZE` bytes, and never opens it.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};

use crate::error::CryptoError;

pub const SIGNATURE_SIZE: usize = 64;
pub const SIGN_PUBLIC_KEY_SIZE: usize = 32;
pub const SIGN_PRIVATE_KEY_SIZE: usize = 64;
pub const BOX_KEY_SIZE: usize = 32;

pub const PUBLIC_KEY_PACK_SIZE: usize = SIGN_PUBLIC_KEY_SIZE + SIGNATURE_SIZE + BOX_KEY_SIZE;
pub const PRIVATE_KEY_PACK_SIZE: usize = SIGN_PRIVATE_KEY_SIZE + BOX_KEY_SIZE;
pub const SEALED_KEY_PACK_MIN_SIZE: usize = SIGNATURE_SIZE + PRIVATE_KEY_PACK_SIZE;

/// Sign `msg` with the signing half of `private_pack`, returning `signature | msg`.
pub fn sign_and_pack(private_pack: &[u8], msg: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let keypair: &[u8; SIGN_PRIVATE_KEY_SIZE] = private_pack
        .get(..SIGN_PRIVATE_KEY_SIZE)
        .and_then(|k| k.try_into().ok())
        .ok_or(CryptoError::InvalidKeys)?;
    let signing_key =
        SigningKey::from_keypair_bytes(keypair).map_err(|_| CryptoError::InvalidKeys)?;
    let sig = signing_key.sign(msg);

    let mut out = Vec::with_capacity(SIGNATURE_SIZE + msg.len());
    out.extend_from_slice(&sig.to_bytes());
    out.extend_from_slice(msg);
    Ok(out)
}

/// Check `blob` against the signing half of `public_pack` and return the
/// signed message.
///
/// Blobs shorter than a signature, or whose signature has any of the three
/// high bits of its last byte set (non-canonical `s`), are rejected before
/// the curve check runs.
pub fn verify_and_unpack<'a>(public_pack: &[u8], blob: &'a [u8]) -> Result<&'a [u8], CryptoError> {
    let public: &[u8; SIGN_PUBLIC_KEY_SIZE] = public_pack
        .get(..SIGN_PUBLIC_KEY_SIZE)
        .and_then(|k| k.try_into().ok())
        .ok_or(CryptoError::InvalidPublicKey)?;
    if blob.len() < SIGNATURE_SIZE || blob[SIGNATURE_SIZE - 1] & 0xE0 != 0 {
        return Err(CryptoError::InvalidSignature);
    }
    let vk = VerifyingKey::from_bytes(public).map_err(|_| CryptoError::InvalidPublicKey)?;

    let (sig_bytes, msg) = blob.split_at(SIGNATURE_SIZE);
    let sig_bytes: &[u8; SIGNATURE_SIZE] =
        sig_bytes.try_into().map_err(|_| CryptoError::InvalidSignature)?;
    let sig = Signature::from_bytes(sig_bytes);
    vk.verify_strict(msg, &sig)
        .map_err(|_| CryptoError::InvalidSignature)?;
    Ok(msg)
}

/// Check that a public pack is well formed: right length, and its encryption
/// half signed by its own signing half.
pub fn check_public_pack(public_pack: &[u8]) -> Result<(), CryptoError> {
    if public_pack.len() != PUBLIC_KEY_PACK_SIZE {
        return Err(CryptoError::InvalidKeys);
    }
    let enc_pub = verify_and_unpack(public_pack, &public_pack[SIGN_PUBLIC_KEY_SIZE..])?;
    if enc_pub.len() != BOX_KEY_SIZE {
        return Err(CryptoError::InvalidKeys);
    }
    Ok(())
}

/// Encryption public key carried by a (checked) public pack.
pub fn encryption_public_key(public_pack: &[u8]) -> Result<&[u8], CryptoError> {
    check_public_pack(public_pack)?;
    Ok(&public_pack[SIGN_PUBLIC_KEY_SIZE + SIGNATURE_SIZE..])
}

/// Split a registration key pack into `(public pack, sealed private pack)`.
///
/// The registration pack is `public pack | sealed private pack`, where the
/// sealed private pack is signed by the embedded signing key. Both
/// self-signatures must hold: that is the proof the uploader owns the
/// private signing key. The sealed ciphertext itself is returned untouched.
pub fn expand_user_key_pack(full_pack: &[u8]) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
    if full_pack.len() < PUBLIC_KEY_PACK_SIZE + SEALED_KEY_PACK_MIN_SIZE {
        return Err(CryptoError::InvalidKeys);
    }
    let (public_pack, sealed_private) = full_pack.split_at(PUBLIC_KEY_PACK_SIZE);
    check_public_pack(public_pack)?;
    verify_and_unpack(public_pack, sealed_private)?;
    Ok((public_pack.to_vec(), sealed_private.to_vec()))
}
