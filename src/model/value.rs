use derive_more::{Display, From};

use crate::errors::{WeaveError, WeaveResult};

/// A typed variable value. The type of a variable is fixed at construction; the
/// engine never changes a Bool into an Int, it only replaces like with like.
#[derive(Clone, Debug, PartialEq, Display, From)]
pub enum Value {
    #[display("{_0}")]
    Bool(bool),
    #[display("{_0}")]
    Int(i64),
    #[display("{_0}")]
    Double(f64),
    #[display("{_0}")]
    String(String),
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Double(_) => "double",
            Value::String(_) => "string",
        }
    }

    pub fn as_bool(&self) -> WeaveResult<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(WeaveError::TypeMismatch {
                expected: "boolean",
                actual: other.to_string(),
            }
            .into()),
        }
    }

    /// Integer view. Doubles convert only when they are whole numbers.
    pub fn as_int(&self) -> WeaveResult<i64> {
        match self {
            Value::Int(v) => Ok(*v),
            Value::Double(v) if v.fract() == 0.0 => Ok(*v as i64),
            other => Err(WeaveError::TypeMismatch {
                expected: "integer",
                actual: other.to_string(),
            }
            .into()),
        }
    }

    pub fn as_double(&self) -> WeaveResult<f64> {
        match self {
            Value::Int(v) => Ok(*v as f64),
            Value::Double(v) => Ok(*v),
            other => Err(WeaveError::TypeMismatch {
                expected: "double",
                actual: other.to_string(),
            }
            .into()),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Double(_))
    }
}
