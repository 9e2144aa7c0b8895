//! Partition keys and their effective (routable) form.
//!
//! A logical partition key is a tuple of JSON-ish values pulled from the
//! document at the paths named by the collection's
//! [`PartitionKeyDefinition`]. Routing happens on the *effective* key: an
//! order-comparable hex string that the routing map's range boundaries are
//! expressed in.
//!
//! Hash-kind definitions route on a digest of the key (uniform spread);
//! range-kind definitions route on an order-preserving encoding.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::identity::PartitionRangeId;

/// One component of a partition key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PartitionKeyValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

/// A logical partition key: one component per definition path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionKey(pub Vec<PartitionKeyValue>);

impl PartitionKey {
    pub fn string(value: impl Into<String>) -> Self {
        Self(vec![PartitionKeyValue::String(value.into())])
    }

    pub fn number(value: f64) -> Self {
        Self(vec![PartitionKeyValue::Number(value)])
    }
}

/// How a collection spreads keys across ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PartitionKeyKind {
    #[default]
    Hash,
    Range,
}

/// The collection's partition key schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionKeyDefinition {
    /// Document paths the key components come from, e.g. `["/tenantId"]`.
    pub paths: Vec<String>,
    pub kind: PartitionKeyKind,
    pub version: u32,
}

impl PartitionKeyDefinition {
    pub fn hash(paths: Vec<String>) -> Self {
        Self {
            paths,
            kind: PartitionKeyKind::Hash,
            version: 2,
        }
    }

    /// Computes the effective key for `key` under this definition.
    ///
    /// A component-count mismatch is reported as [`PartitionKeyError::ShapeMismatch`]
    /// rather than silently routing wrong: the resolver decides whether it
    /// means a stale collection cache or a genuine client bug.
    pub fn effective_key(&self, key: &PartitionKey) -> Result<EffectivePartitionKey, PartitionKeyError> {
        if key.0.len() != self.paths.len() {
            return Err(PartitionKeyError::ShapeMismatch {
                expected: self.paths.len(),
                supplied: key.0.len(),
            });
        }

        match self.kind {
            PartitionKeyKind::Hash => Ok(hashed_key(key)),
            PartitionKeyKind::Range => Ok(ordered_key(key)),
        }
    }
}

/// Digest routing: blake3 over a canonical encoding of the components.
fn hashed_key(key: &PartitionKey) -> EffectivePartitionKey {
    let mut buf = Vec::new();
    for component in &key.0 {
        match component {
            PartitionKeyValue::Null => buf.push(0x00),
            PartitionKeyValue::Bool(b) => {
                buf.push(0x01);
                buf.push(u8::from(*b));
            }
            PartitionKeyValue::Number(n) => {
                buf.push(0x02);
                buf.extend_from_slice(&n.to_be_bytes());
            }
            PartitionKeyValue::String(s) => {
                buf.push(0x03);
                buf.extend_from_slice(&(s.len() as u64).to_be_bytes());
                buf.extend_from_slice(s.as_bytes());
            }
        }
    }

    let digest = blake3::hash(&buf);
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest.as_bytes()[..16]);
    // Keep every generated key strictly below the exclusive range maximum
    // ("FF"): the first hex character stays in '0'..='7'.
    bytes[0] &= 0x7F;
    EffectivePartitionKey(hex_upper(&bytes))
}

/// Range routing: an order-preserving encoding with a type-rank prefix per
/// component (null < bool < number < string).
fn ordered_key(key: &PartitionKey) -> EffectivePartitionKey {
    let mut out = String::new();
    for component in &key.0 {
        match component {
            PartitionKeyValue::Null => out.push('0'),
            PartitionKeyValue::Bool(b) => {
                out.push('1');
                out.push(if *b { '1' } else { '0' });
            }
            PartitionKeyValue::Number(n) => {
                out.push('2');
                out.push_str(&hex_upper(&monotonic_f64(*n).to_be_bytes()));
            }
            PartitionKeyValue::String(s) => {
                out.push('3');
                out.push_str(&hex_upper(s.as_bytes()));
            }
        }
    }
    EffectivePartitionKey(out)
}

/// Maps f64 onto u64 such that numeric order matches unsigned order.
fn monotonic_f64(value: f64) -> u64 {
    // Normalize the two zero representations to one encoding.
    let value = if value == 0.0 { 0.0 } else { value };
    let bits = value.to_bits();
    if bits & (1 << 63) != 0 {
        !bits
    } else {
        bits | (1 << 63)
    }
}

fn hex_upper(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02X}");
    }
    s
}

/// The routable form of a partition key.
///
/// Compares lexicographically; the routing map's range boundaries are
/// expressed in the same encoding, with `""` as the inclusive minimum and
/// `"FF"` as the exclusive maximum of the full key space.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EffectivePartitionKey(String);

impl EffectivePartitionKey {
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// Inclusive minimum of the full key space.
    pub fn range_min() -> Self {
        Self(String::new())
    }

    /// Exclusive maximum of the full key space. Generated keys are always
    /// strictly below it.
    pub fn range_max() -> Self {
        Self("FF".to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EffectivePartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One contiguous slice of the partition-key space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionKeyRange {
    pub id: PartitionRangeId,
    pub min_inclusive: EffectivePartitionKey,
    pub max_exclusive: EffectivePartitionKey,
    /// Ancestor chain, oldest first. Children of a split record the split
    /// range here; routing continuity checks walk this list.
    pub parents: Vec<PartitionRangeId>,
}

impl PartitionKeyRange {
    pub fn new(
        id: PartitionRangeId,
        min_inclusive: EffectivePartitionKey,
        max_exclusive: EffectivePartitionKey,
    ) -> Self {
        Self {
            id,
            min_inclusive,
            max_exclusive,
            parents: Vec::new(),
        }
    }

    /// The single range covering the whole key space.
    pub fn full(id: PartitionRangeId) -> Self {
        Self::new(
            id,
            EffectivePartitionKey::range_min(),
            EffectivePartitionKey::range_max(),
        )
    }

    pub fn with_parents(mut self, parents: Vec<PartitionRangeId>) -> Self {
        self.parents = parents;
        self
    }

    pub fn contains(&self, key: &EffectivePartitionKey) -> bool {
        *key >= self.min_inclusive && *key < self.max_exclusive
    }

    pub fn has_parent(&self, id: &PartitionRangeId) -> bool {
        self.parents.contains(id)
    }
}

/// Errors from effective-key computation.
#[derive(Debug, thiserror::Error)]
pub enum PartitionKeyError {
    /// The supplied key's component count doesn't match the definition.
    /// Either the collection cache is stale or the caller sent a bad key;
    /// the resolver decides which.
    #[error("partition key has {supplied} components, definition expects {expected}")]
    ShapeMismatch { expected: usize, supplied: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn hash_def(paths: usize) -> PartitionKeyDefinition {
        PartitionKeyDefinition::hash((0..paths).map(|i| format!("/k{i}")).collect())
    }

    fn range_def(paths: usize) -> PartitionKeyDefinition {
        PartitionKeyDefinition {
            paths: (0..paths).map(|i| format!("/k{i}")).collect(),
            kind: PartitionKeyKind::Range,
            version: 2,
        }
    }

    #[test]
    fn hashed_keys_are_deterministic() {
        let def = hash_def(1);
        let a = def.effective_key(&PartitionKey::string("tenant-7")).unwrap();
        let b = def.effective_key(&PartitionKey::string("tenant-7")).unwrap();
        assert_eq!(a, b);

        let c = def.effective_key(&PartitionKey::string("tenant-8")).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn shape_mismatch_is_reported() {
        let def = hash_def(2);
        let err = def.effective_key(&PartitionKey::string("only-one")).unwrap_err();
        assert!(matches!(
            err,
            PartitionKeyError::ShapeMismatch {
                expected: 2,
                supplied: 1
            }
        ));
    }

    #[test]
    fn full_range_contains_generated_keys() {
        let range = PartitionKeyRange::full(PartitionRangeId::new("0"));
        let def = hash_def(1);
        for value in ["a", "zzz", "", "\u{10FFFF}"] {
            let key = def.effective_key(&PartitionKey::string(value)).unwrap();
            assert!(range.contains(&key), "key {key} escaped the full range");
        }
    }

    #[test]
    fn range_bounds_are_half_open() {
        let mid = EffectivePartitionKey::new("80");
        let low = PartitionKeyRange::new(
            PartitionRangeId::new("1"),
            EffectivePartitionKey::range_min(),
            mid.clone(),
        );
        let high = PartitionKeyRange::new(
            PartitionRangeId::new("2"),
            mid.clone(),
            EffectivePartitionKey::range_max(),
        );

        assert!(low.contains(&EffectivePartitionKey::new("7F")));
        assert!(!low.contains(&mid));
        assert!(high.contains(&mid));
    }

    #[test]
    fn parent_chain() {
        let child = PartitionKeyRange::full(PartitionRangeId::new("3"))
            .with_parents(vec![PartitionRangeId::new("0"), PartitionRangeId::new("1")]);
        assert!(child.has_parent(&PartitionRangeId::new("1")));
        assert!(!child.has_parent(&PartitionRangeId::new("2")));
    }

    proptest! {
        /// Range-kind encoding preserves numeric order.
        #[test]
        fn prop_number_encoding_preserves_order(a in -1e12f64..1e12, b in -1e12f64..1e12) {
            let def = range_def(1);
            let ka = def.effective_key(&PartitionKey::number(a)).unwrap();
            let kb = def.effective_key(&PartitionKey::number(b)).unwrap();
            prop_assert_eq!(a.partial_cmp(&b).unwrap(), ka.cmp(&kb));
        }

        /// Range-kind encoding preserves string order.
        #[test]
        fn prop_string_encoding_preserves_order(a in "[a-z]{0,12}", b in "[a-z]{0,12}") {
            let def = range_def(1);
            let ka = def.effective_key(&PartitionKey::string(a.clone())).unwrap();
            let kb = def.effective_key(&PartitionKey::string(b.clone())).unwrap();
            prop_assert_eq!(a.cmp(&b), ka.cmp(&kb));
        }

        /// Every generated key lands inside [range_min, range_max).
        #[test]
        fn prop_keys_stay_in_bounds(s in ".{0,24}") {
            let hashed = hash_def(1).effective_key(&PartitionKey::string(s.clone())).unwrap();
            let ordered = range_def(1).effective_key(&PartitionKey::string(s)).unwrap();
            for key in [hashed, ordered] {
                prop_assert!(key >= EffectivePartitionKey::range_min());
                prop_assert!(key < EffectivePartitionKey::range_max());
            }
        }
    }
}
