//! Utility functions for identifiers, hashing and serialization

use bech32::Bech32m;
use uuid7::uuid7;

use crate::error::EngineError;

// mint a unique id then encode using bech32 with an entity prefix
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

pub fn to_cbor<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, EngineError> {
    minicbor::to_vec(value).map_err(|e| EngineError::Encode(e.to_string()))
}

pub fn from_cbor<T: for<'b> minicbor::Decode<'b, ()>>(bytes: &[u8]) -> Result<T, EngineError> {
    minicbor::decode(bytes).map_err(|e| EngineError::Decode(e.to_string()))
}

/// Digest of the CBOR encoding. Snapshots captured into approval requests
/// are referenced by this hash.
pub fn hash_cbor<T: minicbor::Encode<()>>(value: &T) -> Result<String, EngineError> {
    Ok(sha256::digest(to_cbor(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_valid_bech32_with_hrp() {
        let encoded = new_uuid_to_bech32("rec_").unwrap();
        assert!(encoded.starts_with("rec_1"));
        assert!(encoded.len() > 10);
    }

    #[test]
    fn generates_unique_ids() {
        let a = new_uuid_to_bech32("apr_").unwrap();
        let b = new_uuid_to_bech32("apr_").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_empty_hrp() {
        assert!(new_uuid_to_bech32("").is_err());
    }
}
