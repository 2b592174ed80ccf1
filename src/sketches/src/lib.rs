pub mod dict;
pub mod error;
pub mod hll;
pub mod info;
pub mod registry;

use std::collections::HashSet;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub use error::{SketchError, SketchResult};
pub use info::DomainInfo;
pub use registry::Registry;

/// QueryResult is the answer a sketch gives for its current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryResult {
    Cardinality(u64),
}

/// Sketch is the interface of a stateful, approximate accumulator backing a domain.
///
/// Implementations are owned by the domain manager and never shared without
/// its per-domain lock, so `&mut self` is the only synchronisation they need.
pub trait Sketch: Send + Sync {
    /// sketch_type returns the registered type name of the sketch.
    fn sketch_type(&self) -> &str;

    /// add incorporates a batch of values. Adding a value twice has the same
    /// effect as adding it once.
    fn add(&mut self, values: &[Bytes]) -> SketchResult<bool>;

    /// remove removes the contribution of values, for sketches that can.
    fn remove(&mut self, _values: &[Bytes]) -> SketchResult<bool> {
        Err(SketchError::NotSupported {
            sketch_type: self.sketch_type().to_string(),
            op: "remove",
        })
    }

    /// query returns the current estimate without mutating the sketch.
    fn query(&self) -> SketchResult<QueryResult>;

    /// encode returns a versioned snapshot of the internal state.
    fn encode(&self) -> Vec<u8>;

    /// decode replaces the internal state with a snapshot produced by `encode`.
    fn decode(&mut self, data: &[u8]) -> SketchResult<()>;

    /// bytes estimates the memory footprint of the sketch, in bytes.
    fn bytes(&self) -> usize;
}

/// dedup collapses duplicate values of a batch, keeping first occurrences in order.
pub fn dedup(values: &[Bytes]) -> Vec<&Bytes> {
    let mut seen: HashSet<&[u8]> = HashSet::with_capacity(values.len());
    let mut uniq = Vec::with_capacity(values.len());
    for v in values {
        if seen.insert(v.as_ref()) {
            uniq.push(v);
        }
    }
    uniq
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use crate::{dedup, QueryResult};

    #[test]
    fn test_dedup_keeps_order() {
        let values = vec![
            Bytes::from("a"),
            Bytes::from("b"),
            Bytes::from("a"),
            Bytes::from("c"),
            Bytes::from("b"),
        ];
        let uniq: Vec<&[u8]> = dedup(&values).into_iter().map(|v| v.as_ref()).collect();
        assert_eq!(uniq, vec![b"a".as_slice(), b"b".as_slice(), b"c".as_slice()]);
    }

    #[test]
    fn test_query_result_shape() {
        let js = serde_json::to_string(&QueryResult::Cardinality(3)).unwrap();
        assert_eq!(js, r#"{"cardinality":3}"#);
    }
}
