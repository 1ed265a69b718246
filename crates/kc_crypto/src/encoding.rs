//! Serde helpers for byte fields that travel as standard base64 strings.

use base64::{engine::general_purpose::STANDARD, Engine as _};

pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(s)
}

/// `#[serde(with = "kc_crypto::encoding::b64")]` for a single byte field.
pub mod b64 {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<T, S>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: AsRef<[u8]> + ?Sized,
        S: Serializer,
    {
        serializer.serialize_str(&super::encode(bytes.as_ref()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::decode(&s).map_err(D::Error::custom)
    }
}

/// `#[serde(with = "kc_crypto::encoding::b64_map")]` for `id -> bytes` maps.
pub mod b64_map {
    use std::collections::BTreeMap;

    use serde::{de::Error as _, ser::SerializeMap, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(map: &BTreeMap<String, Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut out = serializer.serialize_map(Some(map.len()))?;
        for (k, v) in map {
            out.serialize_entry(k, &super::encode(v))?;
        }
        out.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(k, v)| super::decode(&v).map(|b| (k, b)).map_err(D::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Wire {
        #[serde(with = "super::b64")]
        data: Vec<u8>,
        #[serde(with = "super::b64_map")]
        keys: BTreeMap<String, Vec<u8>>,
    }

    #[test]
    fn bytes_travel_as_base64_strings() {
        let w = Wire {
            data: vec![0xde, 0xad, 0xbe, 0xef],
            keys: BTreeMap::from([("alice".to_string(), vec![1, 2, 3])]),
        };
        let json = serde_json::to_string(&w).unwrap();
        assert_eq!(json, r#"{"data":"3q2+7w==","keys":{"alice":"AQID"}}"#);
        let back: Wire = serde_json::from_str(&json).unwrap();
        assert_eq!(back, w);
    }

    #[test]
    fn garbage_base64_is_a_decode_error() {
        let err = serde_json::from_str::<Wire>(r#"{"data":"!!!","keys":{}}"#);
        assert!(err.is_err());
    }
}
