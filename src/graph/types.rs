//! Declared result types and conformance checking.
//!
//! Node results travel through the engine as [`serde_json::Value`] payloads.
//! Each [`NodeId`](super::NodeId) declares a [`ResultType`] and the engine
//! checks every execution result against the declaration before accepting it.
//! A mismatch is an internal engine error, never an expected condition.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declared shape of a node's execution result.
///
/// `List` and `Map` are generic over their element type and are checked
/// element-wise. `Any` accepts every value, including `null`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultType {
    Any,
    Boolean,
    Integer,
    Float,
    Str,
    List(Box<ResultType>),
    Map(Box<ResultType>),
}

impl ResultType {
    /// A list with unconstrained elements.
    #[must_use]
    pub fn list_of(element: ResultType) -> Self {
        ResultType::List(Box::new(element))
    }

    /// A string-keyed map with the given value type.
    #[must_use]
    pub fn map_of(value: ResultType) -> Self {
        ResultType::Map(Box::new(value))
    }

    /// Check a result value against this declared type, element-wise for
    /// lists and maps.
    #[must_use]
    pub fn conforms(&self, value: &Value) -> bool {
        match self {
            ResultType::Any => true,
            ResultType::Boolean => value.is_boolean(),
            ResultType::Integer => value.is_i64() || value.is_u64(),
            ResultType::Float => value.is_number(),
            ResultType::Str => value.is_string(),
            ResultType::List(element) => match value {
                Value::Array(items) => items.iter().all(|item| element.conforms(item)),
                _ => false,
            },
            ResultType::Map(element) => match value {
                Value::Object(entries) => entries.values().all(|item| element.conforms(item)),
                _ => false,
            },
        }
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultType::Any => write!(f, "any"),
            ResultType::Boolean => write!(f, "boolean"),
            ResultType::Integer => write!(f, "integer"),
            ResultType::Float => write!(f, "float"),
            ResultType::Str => write!(f, "string"),
            ResultType::List(element) => write!(f, "list<{element}>"),
            ResultType::Map(element) => write!(f, "map<{element}>"),
        }
    }
}
