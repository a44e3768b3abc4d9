//! The capability the VM uses to run embedded `{= }`, `{? }` and `{ }` blocks.

use fxhash::FxHashMap;
use std::fmt;

/// Variables visible to embedded expressions: captures and anything assigned by actions.
pub type Bindings = FxHashMap<String, Value>;

/// A value produced by an embedded expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    /// Only `nil` and `false` are falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Self::Nil | Self::Bool(false))
    }

    pub(crate) const fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => Ok(()),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(n) => f.write_str(itoa::Buffer::new().format(*n)),
            Self::Float(x) => f.write_str(ryu::Buffer::new().format(*x)),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

/// An embedded expression faulted. This aborts the whole generation attempt,
/// unlike a falsy `{? }` check which only backtracks.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalError {
    message: String,
}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for EvalError {}

/// Evaluates the source text of embedded blocks.
///
/// `bindings` is both the input scope and the output scope: the evaluator
/// may read, add, or overwrite variables. The VM snapshots the bindings at
/// every rescue point and puts them back when it backtracks, so an evaluator
/// must keep no state of its own that a backtrack should undo.
///
/// [`crate::Script`] is the built-in implementation. Any closure with the right
/// signature works too:
/// ```
/// use arbitrary::Unstructured;
/// use gentext::{Bindings, EvalError, Generator, Program, Value};
///
/// let program: Program = r#"r = "n=" {= n} {? n} ;"#.parse().unwrap();
/// let always_one = |_: &str, _: &mut Bindings| -> Result<Value, EvalError> { Ok(Value::Int(1)) };
/// let mut generator = Generator::new(&program).with_evaluator(always_one);
/// let text: String = generator.expression(&mut Unstructured::new(&[])).unwrap().unwrap();
/// assert_eq!(text, "n=1");
/// ```
pub trait Evaluator {
    fn evaluate(&mut self, source: &str, bindings: &mut Bindings) -> Result<Value, EvalError>;
}

impl<F> Evaluator for F
where
    F: FnMut(&str, &mut Bindings) -> Result<Value, EvalError>,
{
    fn evaluate(&mut self, source: &str, bindings: &mut Bindings) -> Result<Value, EvalError> {
        self(source, bindings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Bool(true).is_truthy());
        assert!(Value::Int(0).is_truthy());
        assert!(Value::Str(String::new()).is_truthy());
    }

    #[test]
    fn display() {
        assert_eq!(Value::Int(-42).to_string(), "-42");
        assert_eq!(Value::Float(1.5).to_string(), "1.5");
        assert_eq!(Value::Nil.to_string(), "");
        assert_eq!(Value::from("abc").to_string(), "abc");
    }
}
