//! # Value Type System
//!
//! Core value types flowing through a pipeline: Null, Bool, Int, Float,
//! String, and nested lists. A nested list doubles as an N-dimensional array;
//! its shape is inferred structurally (see [`Value::shape`]), which is what
//! the shape resolver uses for root inputs.
//!
//! ## Usage
//!
//! ```rust
//! use pipemap::value::Value;
//!
//! let v = Value::from(vec![1i64, 2, 3]);
//! assert_eq!(v.shape(), vec![3]);
//! assert_eq!(v.get(&[1]).unwrap(), &Value::Int(2));
//! ```

use crate::shape::Key;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Errors raised when a value is accessed with the wrong type or index.
#[derive(Error, Debug)]
pub enum ValueError {
    /// Expected a list at some nesting level
    #[error("expected a list, found `{0}`")]
    NotAList(String),

    /// Index beyond the axis length
    #[error("index {index} out of bounds for axis of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// Typed accessor mismatch
    #[error("expected {expected}, found `{found}`")]
    TypeMismatch {
        expected: &'static str,
        found: String,
    },

    /// A required parameter is absent from the kwargs bundle
    #[error("missing parameter `{0}`")]
    MissingParameter(String),
}

/// Result type for value operations
pub type ValueResult<T> = Result<T, ValueError>;

/// A dynamically typed pipeline value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    /// Structural shape of the value, NumPy-style.
    ///
    /// A scalar has the empty shape. A list contributes one dimension; deeper
    /// dimensions are included only while every sibling shares the same
    /// sub-shape (ragged nesting stops the descent).
    pub fn shape(&self) -> Vec<usize> {
        match self {
            Value::List(items) => {
                let mut shape = vec![items.len()];
                if let Some(first) = items.first() {
                    let inner = first.shape();
                    if !inner.is_empty() && items.iter().all(|v| v.shape() == inner) {
                        shape.extend(inner);
                    }
                }
                shape
            }
            _ => Vec::new(),
        }
    }

    /// Number of leading list dimensions, per [`Value::shape`].
    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Element at a multi-index. Every key position must resolve a list level.
    pub fn get(&self, index: &[usize]) -> ValueResult<&Value> {
        let mut current = self;
        for &i in index {
            let items = current.as_list()?;
            current = items.get(i).ok_or(ValueError::IndexOutOfBounds {
                index: i,
                len: items.len(),
            })?;
        }
        Ok(current)
    }

    /// Select a sub-value by a key tuple of indices and `:` slices.
    ///
    /// Slice positions keep their axis; index positions drop it. A key
    /// shorter than the nesting depth leaves trailing axes untouched, so
    /// `x.select(&[Key::Index(1)])` on a 2-D value returns the row.
    pub fn select(&self, keys: &[Key]) -> ValueResult<Value> {
        match keys.split_first() {
            None => Ok(self.clone()),
            Some((Key::Index(i), rest)) => {
                let items = self.as_list()?;
                let item = items.get(*i).ok_or(ValueError::IndexOutOfBounds {
                    index: *i,
                    len: items.len(),
                })?;
                item.select(rest)
            }
            Some((Key::Slice, rest)) => {
                let items = self.as_list()?;
                let selected = items
                    .iter()
                    .map(|item| item.select(rest))
                    .collect::<ValueResult<Vec<_>>>()?;
                Ok(Value::List(selected))
            }
        }
    }

    /// Build a nested list of `shape` from a row-major flat slice.
    ///
    /// The empty shape returns the single element itself.
    pub fn from_flat(shape: &[usize], flat: &[Value]) -> Value {
        fn build(shape: &[usize], flat: &[Value]) -> Value {
            match shape.split_first() {
                None => flat[0].clone(),
                Some((&dim, rest)) => {
                    let stride: usize = rest.iter().product();
                    let items = (0..dim)
                        .map(|i| build(rest, &flat[i * stride..(i + 1) * stride]))
                        .collect();
                    Value::List(items)
                }
            }
        }
        debug_assert_eq!(flat.len(), shape.iter().product::<usize>());
        build(shape, flat)
    }

    /// Flatten the leading `ndim` list dimensions into a row-major vector.
    pub fn to_flat(&self, ndim: usize) -> ValueResult<Vec<Value>> {
        if ndim == 0 {
            return Ok(vec![self.clone()]);
        }
        let items = self.as_list()?;
        let mut flat = Vec::new();
        for item in items {
            flat.extend(item.to_flat(ndim - 1)?);
        }
        Ok(flat)
    }

    pub fn as_bool(&self) -> ValueResult<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(other.type_mismatch("a bool")),
        }
    }

    pub fn as_int(&self) -> ValueResult<i64> {
        match self {
            Value::Int(i) => Ok(*i),
            other => Err(other.type_mismatch("an int")),
        }
    }

    /// Numeric accessor that widens ints.
    pub fn as_float(&self) -> ValueResult<f64> {
        match self {
            Value::Float(f) => Ok(*f),
            Value::Int(i) => Ok(*i as f64),
            other => Err(other.type_mismatch("a float")),
        }
    }

    pub fn as_str(&self) -> ValueResult<&str> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(other.type_mismatch("a string")),
        }
    }

    pub fn as_list(&self) -> ValueResult<&Vec<Value>> {
        match self {
            Value::List(items) => Ok(items),
            other => Err(ValueError::NotAList(other.to_string())),
        }
    }

    fn type_mismatch(&self, expected: &'static str) -> ValueError {
        ValueError::TypeMismatch {
            expected,
            found: self.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

/// The named-argument bundle a [`crate::pipeline::PipeFunc`] is called with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Kwargs(BTreeMap<String, Value>);

impl Kwargs {
    pub fn new() -> Self {
        Kwargs(BTreeMap::new())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// The value for `name`, or [`ValueError::MissingParameter`].
    pub fn require(&self, name: &str) -> ValueResult<&Value> {
        self.0
            .get(name)
            .ok_or_else(|| ValueError::MissingParameter(name.to_string()))
    }

    pub fn int(&self, name: &str) -> ValueResult<i64> {
        self.require(name)?.as_int()
    }

    pub fn float(&self, name: &str) -> ValueResult<f64> {
        self.require(name)?.as_float()
    }

    pub fn str(&self, name: &str) -> ValueResult<&str> {
        self.require(name)?.as_str()
    }

    pub fn list(&self, name: &str) -> ValueResult<&Vec<Value>> {
        self.require(name)?.as_list()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Value)> for Kwargs {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Kwargs(iter.into_iter().collect())
    }
}

impl fmt::Display for Kwargs {
    /// Renders `k=v, k2=v2`, the form embedded in function error context.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        Ok(())
    }
}
