use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Schema-qualified object name, e.g. `dbo.orders`.
pub type Id = String;

pub fn generate_id() -> Id {
    Uuid::new_v4().to_string()
}

/// SHA-256 over the JSON encoding of `value`, hex encoded.
///
/// Callers pass canonical forms (sorted collections, normalized text) so the
/// digest only moves when the definition semantically changes.
pub fn fingerprint_of<T: Serialize>(domain: &str, value: &T) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}\n", domain));
    // Serializing plain data structs to a Vec cannot fail.
    let encoded = serde_json::to_vec(value).unwrap_or_default();
    hasher.update(&encoded);
    hex::encode(hasher.finalize())
}

/// Collapse runs of whitespace and trim, so formatting-only edits to bodies
/// and expressions do not register as changes.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercased word tokens of a normalized body, used for similarity scoring.
pub fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '.'))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Jaccard similarity of two token sets, in per-mille.
pub fn jaccard_per_mille<I, J, T>(left: I, right: J) -> u16
where
    I: IntoIterator<Item = T>,
    J: IntoIterator<Item = T>,
    T: Ord,
{
    use std::collections::BTreeSet;

    let left: BTreeSet<T> = left.into_iter().collect();
    let right: BTreeSet<T> = right.into_iter().collect();
    if left.is_empty() && right.is_empty() {
        return 1000;
    }
    let shared = left.intersection(&right).count();
    let total = left.union(&right).count();
    ((shared * 1000) / total) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text_collapses_whitespace() {
        assert_eq!(
            normalize_text("  SELECT *\n\tFROM   orders  "),
            "SELECT * FROM orders"
        );
    }

    #[test]
    fn test_fingerprint_is_stable_and_domain_separated() {
        let a = fingerprint_of("table", &vec!["id", "name"]);
        let b = fingerprint_of("table", &vec!["id", "name"]);
        let c = fingerprint_of("view", &vec!["id", "name"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_jaccard() {
        assert_eq!(jaccard_per_mille(vec![1, 2, 3], vec![1, 2, 3]), 1000);
        assert_eq!(jaccard_per_mille(vec![1, 2], vec![2, 3]), 333);
        assert_eq!(jaccard_per_mille(Vec::<u8>::new(), Vec::<u8>::new()), 1000);
    }
}
