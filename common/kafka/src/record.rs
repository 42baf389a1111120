use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// Decoded key/value content of a consumed message.
pub type Fields = Map<String, Value>;

/// Coordinates of a consumed message, used to acknowledge it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Position {
    topic: String,
    partition: i32,
    offset: i64,
}

impl Position {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.topic, self.partition, self.offset)
    }
}

/// One decoded message plus the metadata the broker assigned to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    position: Position,
    timestamp_ms: Option<i64>,
    data: Fields,
}

impl Record {
    pub fn new(position: Position, timestamp_ms: Option<i64>, data: Fields) -> Self {
        Self {
            position,
            timestamp_ms,
            data,
        }
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn topic(&self) -> &str {
        self.position.topic()
    }

    pub fn partition(&self) -> i32 {
        self.position.partition()
    }

    pub fn offset(&self) -> i64 {
        self.position.offset()
    }

    pub fn timestamp_ms(&self) -> Option<i64> {
        self.timestamp_ms
    }

    pub fn data(&self) -> &Fields {
        &self.data
    }

    /// Look up a top-level field of the decoded message.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

// Only the decoded content is serialized, broker metadata stays behind.
impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.data.serialize(serializer)
    }
}

/// What a single consume cycle hands to the caller.
///
/// A consumer configured with a batch size of one yields bare records,
/// anything larger yields ordered, non-empty batches.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Unit {
    Single(Record),
    Batch(Vec<Record>),
}

impl Unit {
    pub fn records(&self) -> &[Record] {
        match self {
            Unit::Single(record) => std::slice::from_ref(record),
            Unit::Batch(records) => records,
        }
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, Unit::Batch(_))
    }

    pub fn into_records(self) -> Vec<Record> {
        match self {
            Unit::Single(record) => vec![record],
            Unit::Batch(records) => records,
        }
    }
}
