use serde_json::Value;
use sha3::{Digest, Keccak256};

/// Hex characters kept from the digest
const FINGERPRINT_LEN: usize = 16;

/// Fingerprint of action parameters, independent of object key order.
///
/// Arrays keep their order, so `[1,2,3]` and `[3,2,1]` differ.
pub fn hash_action_params(params: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(params, &mut canonical);
    let digest = Keccak256::digest(canonical.as_bytes());
    let mut fingerprint = hex::encode(digest);
    fingerprint.truncate(FINGERPRINT_LEN);
    fingerprint
}

/// Compact JSON with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
