use std::collections::HashMap;

use crate::{dict, hll, DomainInfo, Sketch, SketchError, SketchResult};

/// Constructor builds an empty sketch for a domain.
pub type Constructor = fn(&DomainInfo) -> SketchResult<Box<dyn Sketch>>;

/// DEFAULT_TYPE is the type name clients send when they do not care which sketch they get.
pub const DEFAULT_TYPE: &str = "default";

/// Registry maps declared sketch type names to their constructors.
#[derive(Clone)]
pub struct Registry {
    constructors: HashMap<String, Constructor>,
}

impl Registry {
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    pub fn register(&mut self, sketch_type: impl Into<String>, c: Constructor) -> &mut Self {
        self.constructors.insert(sketch_type.into(), c);
        self
    }

    pub fn contains(&self, sketch_type: &str) -> bool {
        self.constructors.contains_key(sketch_type)
    }

    /// create builds an empty sketch of the domain's declared type and capacity.
    pub fn create(&self, info: &DomainInfo) -> SketchResult<Box<dyn Sketch>> {
        let c = self
            .constructors
            .get(info.sketch_type.as_str())
            .ok_or_else(|| SketchError::UnknownType(info.sketch_type.clone()))?;
        c(info)
    }

    /// types returns the registered type names, sorted.
    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.constructors.keys().map(|k| k.as_str()).collect();
        types.sort();
        types
    }
}

impl Default for Registry {
    fn default() -> Self {
        let mut r = Self::empty();
        r.register(hll::TYPE_NAME, hll::construct)
            .register(DEFAULT_TYPE, hll::construct)
            .register(dict::TYPE_NAME, dict::construct);
        r
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use crate::registry::Registry;
    use crate::{DomainInfo, QueryResult, Sketch, SketchError, SketchResult};

    struct Counter(u64);

    impl Sketch for Counter {
        fn sketch_type(&self) -> &str {
            "counter"
        }

        fn add(&mut self, values: &[Bytes]) -> SketchResult<bool> {
            self.0 += values.len() as u64;
            Ok(true)
        }

        fn query(&self) -> SketchResult<QueryResult> {
            Ok(QueryResult::Cardinality(self.0))
        }

        fn encode(&self) -> Vec<u8> {
            self.0.to_be_bytes().to_vec()
        }

        fn decode(&mut self, data: &[u8]) -> SketchResult<()> {
            let buf: [u8; 8] = data
                .try_into()
                .map_err(|_| SketchError::Corrupt("counter".into()))?;
            self.0 = u64::from_be_bytes(buf);
            Ok(())
        }

        fn bytes(&self) -> usize {
            8
        }
    }

    #[test]
    fn test_default_types() {
        let r = Registry::default();
        assert_eq!(r.types(), vec!["default", "dict", "hllpp"]);

        let s = r.create(&DomainInfo::new("marvel", "default", 10000)).unwrap();
        assert_eq!(s.sketch_type(), "hllpp");
        let s = r.create(&DomainInfo::new("marvel", "dict", 10)).unwrap();
        assert_eq!(s.sketch_type(), "dict");
    }

    #[test]
    fn test_unknown_type() {
        let r = Registry::default();
        let err = r.create(&DomainInfo::new("x", "bloom", 1)).err().unwrap();
        assert!(matches!(err, SketchError::UnknownType(t) if t == "bloom"));
    }

    #[test]
    fn test_register_custom() {
        let mut r = Registry::empty();
        r.register("counter", |_| Ok(Box::new(Counter(0))));
        assert!(r.contains("counter"));
        assert!(!r.contains("hllpp"));

        let mut s = r.create(&DomainInfo::new("c", "counter", 0)).unwrap();
        s.add(&[Bytes::from("a"), Bytes::from("a")]).unwrap();
        assert_eq!(s.query().unwrap(), QueryResult::Cardinality(2));
    }
}
