use serde::{Deserialize, Serialize};

/// DomainInfo is the immutable description of a domain, written once when the
/// domain is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub sketch_type: String,
    pub capacity: u64,
    /// unix seconds, 0 for records that predate the field.
    #[serde(rename = "createdAt", default)]
    pub created_at: i64,
}

impl DomainInfo {
    pub fn new(id: impl Into<String>, sketch_type: impl Into<String>, capacity: u64) -> Self {
        Self {
            id: id.into(),
            sketch_type: sketch_type.into(),
            capacity,
            created_at: skizze_utils::time::unix_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::DomainInfo;

    #[test]
    fn test_decode_without_created_at() {
        let info: DomainInfo = serde_json::from_str(
            r#"{
                "id": "thing",
                "type": "default",
                "capacity": 12345
            }"#,
        )
        .unwrap();
        assert_eq!(info.id, "thing");
        assert_eq!(info.sketch_type, "default");
        assert_eq!(info.capacity, 12345);
        assert_eq!(info.created_at, 0);
    }
}
