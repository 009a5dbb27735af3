use serde::Serialize;
use sha2::{Digest, Sha224, Sha256};

use crate::util::errors::{Error, Result};

/// Hex sha256 of a serializable value's JSON form.
pub fn content_hash<T: Serialize>(value: &T) -> Result<String> {
    let bytes = serde_json::to_vec(value).map_err(Error::from)?;
    Ok(hex::encode(Sha256::digest(bytes)))
}

/// Hex sha224 of a string. 56 characters, short enough for a label value.
pub fn label_hash(input: &str) -> String {
    hex::encode(Sha224::digest(input.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_hash_fits_label_value_limit() {
        let h = label_hash("aws-https://s3.amazonaws.com-bucket/prefix");
        assert_eq!(h.len(), 56);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn content_hash_tracks_content() {
        let a = content_hash(&serde_json::json!({"a": 1, "b": [1, 2]})).unwrap();
        let b = content_hash(&serde_json::json!({"a": 1, "b": [1, 2]})).unwrap();
        let c = content_hash(&serde_json::json!({"a": 1, "b": [2, 1]})).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
