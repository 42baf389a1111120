use std::str::FromStr;

use apache_avro::Reader;
use serde_json::Value;
use thiserror::Error;

use crate::record::Fields;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("message has no payload")]
    Empty,
    #[error("invalid json payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid avro payload: {0}")]
    Avro(#[from] apache_avro::Error),
    #[error("avro container holds no records")]
    EmptyContainer,
    #[error("payload decoded to {0}, expected an object")]
    NotAnObject(&'static str),
}

/// Wire encoding of consumed payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadFormat {
    #[default]
    Json,
    /// Avro object container, the first datum is the message.
    Avro,
}

impl PayloadFormat {
    pub fn decode(&self, payload: Option<&[u8]>) -> Result<Fields, DecodeError> {
        let payload = payload.ok_or(DecodeError::Empty)?;
        let value = match self {
            PayloadFormat::Json => serde_json::from_slice::<Value>(payload)?,
            PayloadFormat::Avro => {
                let mut reader = Reader::new(payload)?;
                let datum = reader.next().ok_or(DecodeError::EmptyContainer)??;
                Value::try_from(datum)?
            }
        };

        match value {
            Value::Object(fields) => Ok(fields),
            Value::Null => Err(DecodeError::NotAnObject("null")),
            Value::Bool(_) => Err(DecodeError::NotAnObject("a boolean")),
            Value::Number(_) => Err(DecodeError::NotAnObject("a number")),
            Value::String(_) => Err(DecodeError::NotAnObject("a string")),
            Value::Array(_) => Err(DecodeError::NotAnObject("an array")),
        }
    }
}

impl FromStr for PayloadFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(PayloadFormat::Json),
            "avro" => Ok(PayloadFormat::Avro),
            other => Err(format!("unknown payload format: {other}")),
        }
    }
}
