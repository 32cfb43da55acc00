//! Record transformer seam
//!
//! A [`RecordTransformer`] turns one message into structured fields and
//! learns templates as a side effect. Each worker owns exactly one
//! transformer, created by a [`TransformerFactory`] from its generation's
//! snapshot, and consumes it into a [`Delta`] when the generation stops.

use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

use crate::config::InputFormat;
use crate::error_handling::LineError;
use crate::model::{Delta, ModelSnapshot};

/// One structured output object
pub type Record = Map<String, Value>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("empty message")]
    EmptyMessage,
    #[error("{0}")]
    Rejected(String),
}

pub trait RecordTransformer: Send {
    /// Produce the structured fields for `message`, updating the local model.
    fn apply(&mut self, message: &str) -> Result<Record, TransformError>;

    /// Changes accumulated since the snapshot this transformer started from.
    fn delta(self) -> Delta;
}

pub trait TransformerFactory: Send + Sync + 'static {
    type Transformer: RecordTransformer + 'static;

    fn create(&self, snapshot: Arc<ModelSnapshot>) -> Self::Transformer;
}

/// Turn one input line into a record.
///
/// Text lines become `{"message": line, ..fields}`. JSON lines must be
/// objects holding `message_field` as a string; the transformer fields are
/// added to the parsed object, keeping every other field in place.
pub fn process_line<T: RecordTransformer>(
    transformer: &mut T,
    line: &str,
    format: &InputFormat,
    message_field: &str,
) -> Result<Record, LineError> {
    match format {
        InputFormat::Text => {
            let fields = transformer.apply(line)?;
            let mut record = Record::with_capacity(fields.len() + 1);
            record.insert("message".to_string(), Value::String(line.to_string()));
            record.extend(fields);
            Ok(record)
        }
        InputFormat::Json => {
            let Value::Object(mut object) = serde_json::from_str::<Value>(line)? else {
                return Err(LineError::NotAnObject);
            };

            let message = match object.get(message_field) {
                Some(Value::String(message)) => message.clone(),
                Some(_) => return Err(LineError::FieldNotString(message_field.to_string())),
                None => return Err(LineError::MissingField(message_field.to_string())),
            };

            let fields = transformer.apply(&message)?;
            object.extend(fields);
            Ok(object)
        }
    }
}
