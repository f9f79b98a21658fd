use sha1::{Digest, Sha1};

/// Lowercase hex digest of a fragment's canonical text.
///
/// SHA-1 is chosen because it produces exactly the 160-bit / 40-hex-char
/// digest the wire format calls for (a lowercase hex string of fixed
/// length, at least 40 characters) — see DESIGN.md for the rationale.
pub fn fragment_hash(canonical_text: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(canonical_text.as_bytes());
    let digest = hasher.finalize();
    hex_lower(&digest)
}

fn hex_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_and_correct_length() {
        let h1 = fragment_hash("select distinct x from t a where a.y = 1");
        let h2 = fragment_hash("select distinct x from t a where a.y = 1");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 40);
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
    }

    #[test]
    fn different_text_different_hash() {
        let h1 = fragment_hash("select distinct x from t a where a.y = 1");
        let h2 = fragment_hash("select distinct x from t a where a.y = 2");
        assert_ne!(h1, h2);
    }
}
