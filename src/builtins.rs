use crate::eval::{EvalError, Value};
use std::str::FromStr;

/// Literal keywords of the embedded expression language.
const KEYWORDS: [&str; 3] = ["true", "false", "nil"];

/// Returns `true` if `name` can not be assigned to in an embedded expression:
/// the name of a builtin function or a literal keyword.
pub(crate) fn is_reserved(name: &str) -> bool {
    KEYWORDS.contains(&name) || Builtin::all().any(|b| b.as_str() == name)
}

/// Functions callable from embedded expressions, e.g. `{? len(name) < 8}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, enum_iterator::Sequence)]
#[allow(non_camel_case_types)]
pub(crate) enum Builtin {
    /// Number of characters in a string.
    len,
    /// Converts a number or numeric string to an integer.
    int,
    /// Converts a number or numeric string to a float.
    float,
    /// Renders any value as a string.
    str,
    upcase,
    downcase,
}

impl Builtin {
    pub(crate) fn call(self, args: Vec<Value>) -> Result<Value, EvalError> {
        let [arg]: [Value; 1] = args.try_into().map_err(|a: Vec<Value>| {
            EvalError::new(format!(
                "{}() takes 1 argument but {} were given",
                self.as_str(),
                a.len()
            ))
        })?;
        Ok(match (self, arg) {
            (Self::len, Value::Str(s)) => Value::Int(s.chars().count() as i64),
            (Self::int, Value::Int(n)) => Value::Int(n),
            (Self::int, Value::Float(x)) => Value::Int(x as i64),
            (Self::int, Value::Str(s)) => Value::Int(s.trim().parse().map_err(|_| {
                EvalError::new(format!("int(): `{}` is not an integer", s))
            })?),
            (Self::float, Value::Int(n)) => Value::Float(n as f64),
            (Self::float, Value::Float(x)) => Value::Float(x),
            (Self::float, Value::Str(s)) => Value::Float(s.trim().parse().map_err(|_| {
                EvalError::new(format!("float(): `{}` is not a number", s))
            })?),
            (Self::str, v) => Value::Str(v.to_string()),
            (Self::upcase, Value::Str(s)) => Value::Str(s.to_uppercase()),
            (Self::downcase, Value::Str(s)) => Value::Str(s.to_lowercase()),
            (b, v) => {
                return Err(EvalError::new(format!(
                    "{}() does not accept a {}",
                    b.as_str(),
                    v.type_name()
                )))
            }
        })
    }

    pub(crate) fn all() -> impl Iterator<Item = Self> {
        enum_iterator::all::<Self>()
    }

    pub(crate) const fn as_str(&self) -> &'static str {
        match self {
            Self::len => "len",
            Self::int => "int",
            Self::float => "float",
            Self::str => "str",
            Self::upcase => "upcase",
            Self::downcase => "downcase",
        }
    }
}

impl FromStr for Builtin {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .find(|b| b.as_str() == s)
            .ok_or_else(|| EvalError::new(format!("unknown function `{}`", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn str_conversions() {
        for b in Builtin::all() {
            assert_eq!(b, Builtin::from_str(b.as_str()).unwrap());
        }
        assert!(Builtin::from_str("nope").is_err());
    }

    #[test]
    fn reserved_names() {
        assert!(is_reserved("len"));
        assert!(is_reserved("nil"));
        assert!(!is_reserved("length"));
    }

    #[test]
    fn conversions() {
        assert_eq!(Builtin::len.call(vec!["héllo".into()]), Ok(Value::Int(5)));
        assert_eq!(Builtin::int.call(vec![" 42 ".into()]), Ok(Value::Int(42)));
        assert_eq!(Builtin::float.call(vec![Value::Int(2)]), Ok(Value::Float(2.0)));
        assert_eq!(Builtin::str.call(vec![Value::Int(7)]), Ok(Value::from("7")));
        assert_eq!(Builtin::upcase.call(vec!["ab".into()]), Ok(Value::from("AB")));
        assert!(Builtin::len.call(vec![Value::Int(1)]).is_err());
        assert!(Builtin::int.call(vec!["x1".into()]).is_err());
        assert!(Builtin::len.call(vec![]).is_err());
    }
}
