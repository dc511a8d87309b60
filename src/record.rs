//! Record representation for a single logging call.
//!
//! A [`Record`] carries what the caller supplied: level, message, timestamp
//! and record-specific attributes. Inherited attributes and groups are merged
//! in later by the encoder, producing a [`LogEvent`](crate::encoder::LogEvent).

use std::fmt;

use chrono::{DateTime, Utc};

use crate::level::Level;

/// Attribute value: a scalar or a nested group of attributes.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Str(String),
    Group(Vec<Attr>),
}

impl Value {
    /// Return `true` when the value carries nothing worth emitting.
    ///
    /// Only groups can be empty: a group is empty when none of its members
    /// would produce output.
    pub(crate) fn is_empty_group(&self) -> bool {
        match self {
            Value::Group(members) => members.iter().all(Attr::is_empty),
            _ => false,
        }
    }
}

macro_rules! impl_value_from {
    ($variant:ident, $target:ty, $($ty:ty),+) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(<$target>::from(v))
                }
            }
        )+
    };
}

impl_value_from!(Int, i64, i8, i16, i32, i64);
impl_value_from!(Uint, u64, u8, u16, u32, u64);
impl_value_from!(Float, f64, f32, f64);
impl_value_from!(Bool, bool, bool);

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Uint(u64::try_from(v).unwrap_or(u64::MAX))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Uint(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(v) => f.write_str(v),
            Value::Group(members) => {
                f.write_str("[")?;
                for (i, attr) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}={}", attr.key, attr.value)?;
                }
                f.write_str("]")
            }
        }
    }
}

/// A key/value pair attached to a record or bound to a handler.
#[derive(Clone, Debug, PartialEq)]
pub struct Attr {
    pub key: String,
    pub value: Value,
}

impl Attr {
    /// Construct an attribute from anything convertible into a [`Value`].
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Construct a group attribute nesting `members` under `key`.
    ///
    /// An empty `key` inlines the members into the enclosing level.
    pub fn group(key: impl Into<String>, members: impl IntoIterator<Item = Attr>) -> Self {
        Self {
            key: key.into(),
            value: Value::Group(members.into_iter().collect()),
        }
    }

    /// Return `true` if encoding this attribute would emit nothing.
    pub(crate) fn is_empty(&self) -> bool {
        match &self.value {
            Value::Group(_) => self.value.is_empty_group(),
            _ => self.key.is_empty(),
        }
    }
}

/// Shorthand for [`Attr::new`].
pub fn attr(key: impl Into<String>, value: impl Into<Value>) -> Attr {
    Attr::new(key, value)
}

/// A single logging call as supplied by the caller.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    /// Time the record was created; `None` omits the timestamp downstream.
    pub timestamp: Option<DateTime<Utc>>,
    pub level: Level,
    pub message: String,
    /// Record-specific attributes, in call order.
    pub attrs: Vec<Attr>,
}

impl Record {
    /// Create a record stamped with the current time.
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            timestamp: Some(Utc::now()),
            level,
            message: message.into(),
            attrs: Vec::new(),
        }
    }

    /// Replace the timestamp. `None` marks the timestamp as zero-valued.
    pub fn with_timestamp(mut self, timestamp: Option<DateTime<Utc>>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Append a single attribute.
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attrs.push(Attr::new(key, value));
        self
    }

    /// Append several attributes, preserving their order.
    pub fn with_attrs(mut self, attrs: impl IntoIterator<Item = Attr>) -> Self {
        self.attrs.extend(attrs);
        self
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.level, self.message)
    }
}
