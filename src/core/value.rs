use std::fmt;

use chrono::{DateTime, Utc};

use crate::core::{PipeError, Result};

/// A column or parameter value crossing the datasource boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Integer(_) => "INTEGER",
            Self::Float(_) => "FLOAT",
            Self::Text(_) => "TEXT",
            Self::Boolean(_) => "BOOLEAN",
            Self::Timestamp(_) => "TIMESTAMP",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Boolean(b) => *b,
            Self::Integer(i) => *i != 0,
            Self::Float(f) => *f != 0.0 && !f.is_nan(),
            Self::Text(s) => !s.is_empty(),
            Self::Timestamp(_) => true,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Float(f) => {
                if f.is_finite() && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                    Some(*f as i64)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Coerce a string into the most specific value it parses as.
    ///
    /// Used when turning path-expression results into bindable parameters.
    pub fn from_text(text: &str) -> Self {
        if let Ok(i) = text.parse::<i64>() {
            return Self::Integer(i);
        }
        if let Ok(f) = text.parse::<f64>() {
            return Self::Float(f);
        }
        match text {
            "true" => Self::Boolean(true),
            "false" => Self::Boolean(false),
            _ => Self::Text(text.to_string()),
        }
    }

    /// Serialized form emitted into the output event stream.
    pub fn serialize(&self) -> Result<String> {
        match self {
            Self::Null => Ok(String::new()),
            other => Ok(other.to_string()),
        }
    }

    pub fn expect_text(&self) -> Result<&str> {
        self.as_str().ok_or_else(|| {
            PipeError::TypeMismatch(format!("Expected TEXT, got {}", self.type_name()))
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(s) => write!(f, "{}", s),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_text_picks_most_specific_type() {
        assert_eq!(Value::from_text("42"), Value::Integer(42));
        assert_eq!(Value::from_text("4.5"), Value::Float(4.5));
        assert_eq!(Value::from_text("true"), Value::Boolean(true));
        assert_eq!(Value::from_text("abc"), Value::Text("abc".into()));
    }

    #[test]
    fn null_serializes_empty() {
        assert_eq!(Value::Null.serialize().unwrap(), "");
        assert_eq!(Value::Integer(7).serialize().unwrap(), "7");
    }
}
