//! Vault key pairs presented by clients.
//!
//! A `VaultKeyPair` carries the vault's public pack, signed by the admin
//! creating it, plus one sealed private pack per recipient, each signed by
//! the vault's own signing key. For promotion the same structure is reused
//! with `keys` indexed by vault id and no `public_key`; each entry is then
//! checked against its own vault's stored public pack.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::encoding::{b64, b64_map};
use crate::error::CryptoError;
use crate::pack::{check_public_pack, verify_and_unpack};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultKeyPair {
    #[serde(default, with = "b64")]
    pub public_key: Vec<u8>,
    #[serde(default, with = "b64_map")]
    pub keys: BTreeMap<String, Vec<u8>>,
}

/// Output of [`VaultKeyPair::verify_and_unpack`]: the vault's public pack,
/// now trusted, and the per-recipient entries. Entries stay signed, which is
/// how they are stored and handed back to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedVaultKeys {
    pub public_key: Vec<u8>,
    pub keys: BTreeMap<String, Vec<u8>>,
}

impl VaultKeyPair {
    pub fn verify_and_unpack(&self, admin_public_pack: &[u8]) -> Result<VerifiedVaultKeys, CryptoError> {
        let vault_pub = verify_and_unpack(admin_public_pack, &self.public_key)?;
        check_public_pack(vault_pub)?;
        for blob in self.keys.values() {
            verify_and_unpack(vault_pub, blob)?;
        }
        Ok(VerifiedVaultKeys {
            public_key: vault_pub.to_vec(),
            keys: self.keys.clone(),
        })
    }

    pub fn check_key_ids_match<I, S>(&self, required: I) -> Result<(), CryptoError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        check_key_ids_match(&self.keys, required)
    }
}

impl VerifiedVaultKeys {
    pub fn check_key_ids_match<I, S>(&self, required: I) -> Result<(), CryptoError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        check_key_ids_match(&self.keys, required)
    }
}

/// Exact set equality between the ids in `keys` and `required`.
pub fn check_key_ids_match<V, I, S>(keys: &BTreeMap<String, V>, required: I) -> Result<(), CryptoError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let required: BTreeSet<String> = required.into_iter().map(|s| s.as_ref().to_owned()).collect();
    if keys.len() != required.len() || !keys.keys().all(|k| required.contains(k)) {
        return Err(CryptoError::InvalidKeys);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{vault_key_pair, ClientKeys};

    #[test]
    fn exact_match_only() {
        let keys: BTreeMap<String, Vec<u8>> =
            [("a", vec![]), ("b", vec![])].into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        assert!(check_key_ids_match(&keys, ["a", "b"]).is_ok());
        assert!(check_key_ids_match(&keys, ["b", "a"]).is_ok());
        assert_eq!(check_key_ids_match(&keys, ["a"]), Err(CryptoError::InvalidKeys));
        assert_eq!(check_key_ids_match(&keys, ["a", "b", "c"]), Err(CryptoError::InvalidKeys));
        assert_eq!(check_key_ids_match(&keys, ["a", "c"]), Err(CryptoError::InvalidKeys));
        assert_eq!(
            check_key_ids_match(&BTreeMap::<String, Vec<u8>>::new(), ["a"]),
            Err(CryptoError::InvalidKeys)
        );
        assert!(check_key_ids_match(&BTreeMap::<String, Vec<u8>>::new(), Vec::<String>::new()).is_ok());
    }

    #[test]
    fn signed_by_admin_verifies() {
        let admin = ClientKeys::generate();
        let vault = ClientKeys::generate();
        let vkp = vault_key_pair(&admin, &vault, ["alice", "bob"]);
        let verified = vkp.verify_and_unpack(admin.public_pack()).unwrap();
        assert_eq!(verified.public_key, vault.public_pack());
        assert!(verified.check_key_ids_match(["alice", "bob"]).is_ok());
        assert_eq!(verified.keys, vkp.keys);
    }

    #[test]
    fn vault_key_signed_by_someone_else_fails() {
        let admin = ClientKeys::generate();
        let other = ClientKeys::generate();
        let vkp = vault_key_pair(&other, &ClientKeys::generate(), ["alice"]);
        assert_eq!(
            vkp.verify_and_unpack(admin.public_pack()),
            Err(CryptoError::InvalidSignature)
        );
    }

    #[test]
    fn recipient_key_not_signed_by_vault_fails() {
        let admin = ClientKeys::generate();
        let vault = ClientKeys::generate();
        let mut vkp = vault_key_pair(&admin, &vault, ["alice"]);
        let forged = vault_key_pair(&admin, &ClientKeys::generate(), ["bob"]);
        vkp.keys.extend(forged.keys);
        assert_eq!(
            vkp.verify_and_unpack(admin.public_pack()),
            Err(CryptoError::InvalidSignature)
        );
    }

    #[test]
    fn truncated_vault_public_pack_is_invalid_keys() {
        let admin = ClientKeys::generate();
        let vault = ClientKeys::generate();
        let vkp = VaultKeyPair {
            public_key: crate::sign_and_pack(admin.private_pack(), &vault.public_pack()[..100]).unwrap(),
            keys: BTreeMap::new(),
        };
        assert_eq!(
            vkp.verify_and_unpack(admin.public_pack()),
            Err(CryptoError::InvalidKeys)
        );
    }

    #[test]
    fn promotion_shape_deserializes_without_public_key() {
        let vkp: VaultKeyPair = serde_json::from_str(r#"{"keys":{"Generic":"AQID"}}"#).unwrap();
        assert!(vkp.public_key.is_empty());
        assert_eq!(vkp.keys["Generic"], vec![1, 2, 3]);
    }
}
