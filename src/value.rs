//! Typed values produced by the interpreter and their coercion rules

use crate::error::SpecError;
use crate::registry::{Component, Family};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// The declared type of a component member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueType {
    Bool,
    Int,
    Float,
    Str,
    /// A component of the named family, e.g. `KernelFunction`.
    Object(&'static str),
    List(Box<ValueType>),
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Bool => f.write_str("bool"),
            ValueType::Int => f.write_str("int"),
            ValueType::Float => f.write_str("float"),
            ValueType::Str => f.write_str("string"),
            ValueType::Object(family) => f.write_str(family),
            ValueType::List(elem) => write!(f, "{}[]", elem),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Object(Component),
    List(Vec<Value>),
}

impl Value {
    /// Name of this value's type as it appears in error messages.
    pub fn type_name(&self) -> String {
        match self {
            Value::Bool(_) => "bool".to_string(),
            Value::Int(_) => "int".to_string(),
            Value::Float(_) => "float".to_string(),
            Value::Str(_) => "string".to_string(),
            Value::Object(c) => c.family().to_string(),
            Value::List(items) => match items.first() {
                Some(first) => format!("{}[]", first.type_name()),
                None => "[]".to_string(),
            },
        }
    }

    pub fn as_component(&self) -> Option<&Component> {
        match self {
            Value::Object(c) => Some(c),
            _ => None,
        }
    }
}

/// Canonical spec text; re-parsing it yields an equivalent value.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            // Debug output of f64 always carries a '.' or exponent and
            // round-trips exactly.
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Str(s) => write_quoted(f, s),
            Value::Object(c) => f.write_str(c.spec()),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

pub(crate) fn write_quoted(f: &mut impl fmt::Write, s: &str) -> fmt::Result {
    f.write_char('"')?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            c => f.write_char(c)?,
        }
    }
    f.write_char('"')
}

pub(crate) fn quoted(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    // Writing into a String cannot fail.
    let _ = write_quoted(&mut out, s);
    out
}

/// Check `value` against the declared type of `member`.
///
/// The only conversion performed is int → float widening (element-wise for
/// lists). An empty list satisfies any list type.
pub fn coerce(value: Value, expected: &ValueType, member: &str) -> Result<Value, SpecError> {
    match (value, expected) {
        (v @ Value::Bool(_), ValueType::Bool) => Ok(v),
        (v @ Value::Int(_), ValueType::Int) => Ok(v),
        (Value::Int(i), ValueType::Float) => Ok(Value::Float(i as f64)),
        (v @ Value::Float(_), ValueType::Float) => Ok(v),
        (v @ Value::Str(_), ValueType::Str) => Ok(v),
        (Value::Object(c), ValueType::Object(family)) if c.family() == *family => {
            Ok(Value::Object(c))
        }
        (Value::List(items), ValueType::List(elem)) => {
            let original = Value::List(items.clone());
            let mut coerced = Vec::with_capacity(items.len());
            for item in items {
                match coerce(item, elem, member) {
                    Ok(v) => coerced.push(v),
                    Err(_) => return Err(mismatch(member, expected, &original)),
                }
            }
            Ok(Value::List(coerced))
        }
        (v, _) => Err(mismatch(member, expected, &v)),
    }
}

fn mismatch(member: &str, expected: &ValueType, got: &Value) -> SpecError {
    SpecError::TypeMismatch {
        member: member.to_string(),
        expected: expected.to_string(),
        got: got.type_name(),
    }
}

/// A Rust type a component member can be declared with.
pub trait MemberType: Sized {
    fn value_type() -> ValueType;

    /// Convert an already-coerced value; `None` means the types disagree.
    fn from_value(value: Value) -> Option<Self>;
}

impl MemberType for bool {
    fn value_type() -> ValueType {
        ValueType::Bool
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }
}

impl MemberType for i64 {
    fn value_type() -> ValueType {
        ValueType::Int
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(i),
            _ => None,
        }
    }
}

impl MemberType for f64 {
    fn value_type() -> ValueType {
        ValueType::Float
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Float(x) => Some(x),
            Value::Int(i) => Some(i as f64),
            _ => None,
        }
    }
}

impl MemberType for String {
    fn value_type() -> ValueType {
        ValueType::Str
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl<T: MemberType> MemberType for Vec<T> {
    fn value_type() -> ValueType {
        ValueType::List(Box::new(T::value_type()))
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::List(items) => items.into_iter().map(T::from_value).collect(),
            _ => None,
        }
    }
}

/// A shared component of family `F`, as seen by a member setter.
pub struct Shared<F: Family>(pub Arc<F::Object>, PhantomData<F>);

impl<F: Family> Shared<F> {
    pub fn into_inner(self) -> Arc<F::Object> {
        self.0
    }
}

impl<F: Family> MemberType for Shared<F> {
    fn value_type() -> ValueType {
        ValueType::Object(F::NAME)
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(c) => c.downcast::<F>().map(|obj| Shared(obj, PhantomData)),
            _ => None,
        }
    }
}
