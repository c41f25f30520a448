use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// One partition of the change stream as reported by the stream description.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shard {
    pub shard_id: String,
    pub parent_shard_id: Option<String>,
}

impl Shard {
    pub fn new(shard_id: impl Into<String>) -> Self {
        Self {
            shard_id: shard_id.into(),
            parent_shard_id: None,
        }
    }

    pub fn with_parent(
        shard_id: impl Into<String>,
        parent_shard_id: impl Into<String>,
    ) -> Self {
        Self {
            shard_id: shard_id.into(),
            parent_shard_id: Some(parent_shard_id.into()),
        }
    }

    /// Parent id, treating an empty string the same as no parent.
    #[inline]
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_shard_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// A single page of a paginated stream description.
#[derive(Debug, Clone, Default)]
pub struct ShardPage {
    pub shards: Vec<Shard>,
    pub last_evaluated_shard_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Insert,
    Modify,
    Remove,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Insert => "INSERT",
            OperationType::Modify => "MODIFY",
            OperationType::Remove => "REMOVE",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSERT" => Ok(OperationType::Insert),
            "MODIFY" => Ok(OperationType::Modify),
            "REMOVE" => Ok(OperationType::Remove),
            other => Err(format!("unknown operation type `{other}`")),
        }
    }
}

/// Key attribute value carried by a change record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    S(String),
    N(String),
    B(Vec<u8>),
}

impl AttributeValue {
    pub fn as_s(&self) -> Option<&str> {
        match self {
            AttributeValue::S(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::S(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::S(value)
    }
}

/// A single mutation read from a shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub event_id: String,
    pub operation: OperationType,
    pub keys: BTreeMap<String, AttributeValue>,
    pub sequence_number: String,
    #[serde(default)]
    pub approximate_creation_ms: Option<u64>,
    #[serde(default)]
    pub size_bytes: u64,
}

impl ChangeRecord {
    pub fn new(
        operation: OperationType,
        sequence_number: impl Into<String>,
    ) -> Self {
        let sequence_number = sequence_number.into();
        Self {
            event_id: sequence_number.clone(),
            operation,
            keys: BTreeMap::new(),
            sequence_number,
            approximate_creation_ms: None,
            size_bytes: 0,
        }
    }

    pub fn with_key(
        mut self,
        name: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.keys.insert(name.into(), value.into());
        self
    }

    pub fn key(&self, name: &str) -> Option<&AttributeValue> {
        self.keys.get(name)
    }
}

/// Records returned by one `get_records` call. `next_iterator == None`
/// means the shard has been read to its end.
#[derive(Debug, Clone, Default)]
pub struct RecordPage {
    pub records: Vec<ChangeRecord>,
    pub next_iterator: Option<String>,
}

/// Where a shard iterator starts reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IteratorPosition {
    TrimHorizon,
    Latest,
    AtSequence(String),
    AfterSequence(String),
}

/// Initial position for freshly claimed shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShardIteratorType {
    #[default]
    TrimHorizon,
    Latest,
}

impl ShardIteratorType {
    pub fn position(&self) -> IteratorPosition {
        match self {
            ShardIteratorType::TrimHorizon => IteratorPosition::TrimHorizon,
            ShardIteratorType::Latest => IteratorPosition::Latest,
        }
    }
}

impl FromStr for ShardIteratorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TRIM_HORIZON" => Ok(ShardIteratorType::TrimHorizon),
            "LATEST" => Ok(ShardIteratorType::Latest),
            other => Err(format!("unsupported shard iterator type `{other}`")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_parent_is_no_parent() {
        let shard = Shard::with_parent("A1", "");
        assert_eq!(shard.parent_id(), None);
        assert_eq!(Shard::with_parent("A1", "A").parent_id(), Some("A"));
    }

    #[test]
    fn record_serializes_with_stream_operation_names() {
        let record = ChangeRecord::new(OperationType::Remove, "0001")
            .with_key("PK", "orders#1");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["operation"], "REMOVE");
        assert_eq!(json["keys"]["PK"]["S"], "orders#1");
    }

    #[test]
    fn iterator_type_parses_case_insensitively() {
        assert_eq!(
            "latest".parse::<ShardIteratorType>().unwrap(),
            ShardIteratorType::Latest
        );
        assert!("AT_SEQUENCE_NUMBER".parse::<ShardIteratorType>().is_err());
    }
}
