//! A small expression language for embedded grammar blocks.
//!
//! A block is a `;`-separated list of statements; its value is the value of the
//! last statement. A statement is either an assignment `name = expr` or an
//! expression. Expressions support integer, float, string, `true`, `false` and
//! `nil` literals, variables, calls to builtins (`len`, `int`, `float`, `str`,
//! `upcase`, `downcase`), and the operators below, loosest first:
//!
//! ```text
//! ||
//! &&
//! ==  !=
//! <  <=  >  >=
//! +  -            (`+` concatenates when either side is a string)
//! *  /  %
//! !  - (prefix)
//! ```

use crate::builtins::{is_reserved, Builtin};
use crate::eval::{Bindings, EvalError, Evaluator, Value};
use fxhash::FxHashMap;
use std::cmp::Ordering;
use std::str::FromStr;

peg::parser! {
grammar script() for str {
    pub rule block() -> Vec<Stmt>
        = _ s:(stmt() ** (_ ";" _)) _ ";"? _ { s }

    rule stmt() -> Stmt
        = n:ident() _ "=" !"=" _ e:expr() { Stmt::Assign(n, e) }
        / e:expr() { Stmt::Expr(e) }

    rule expr() -> Node = precedence!{
        x:(@) _ "||" _ y:@ { Node::Or(Box::new(x), Box::new(y)) }
        --
        x:(@) _ "&&" _ y:@ { Node::And(Box::new(x), Box::new(y)) }
        --
        x:(@) _ "==" _ y:@ { Node::binary(BinOp::Eq, x, y) }
        x:(@) _ "!=" _ y:@ { Node::binary(BinOp::Ne, x, y) }
        --
        x:(@) _ "<=" _ y:@ { Node::binary(BinOp::Le, x, y) }
        x:(@) _ ">=" _ y:@ { Node::binary(BinOp::Ge, x, y) }
        x:(@) _ "<" _ y:@ { Node::binary(BinOp::Lt, x, y) }
        x:(@) _ ">" _ y:@ { Node::binary(BinOp::Gt, x, y) }
        --
        x:(@) _ "+" _ y:@ { Node::binary(BinOp::Add, x, y) }
        x:(@) _ "-" _ y:@ { Node::binary(BinOp::Sub, x, y) }
        --
        x:(@) _ "*" _ y:@ { Node::binary(BinOp::Mul, x, y) }
        x:(@) _ "/" _ y:@ { Node::binary(BinOp::Div, x, y) }
        x:(@) _ "%" _ y:@ { Node::binary(BinOp::Rem, x, y) }
        --
        "!" _ x:@ { Node::Not(Box::new(x)) }
        "-" _ x:@ { Node::Neg(Box::new(x)) }
        --
        a:atom() { a }
    }

    rule atom() -> Node
        = "(" _ e:expr() _ ")" { e }
        / n:number() { Node::Const(n) }
        / s:string() { Node::Const(Value::Str(s)) }
        / "true" !ident_char() { Node::Const(Value::Bool(true)) }
        / "false" !ident_char() { Node::Const(Value::Bool(false)) }
        / "nil" !ident_char() { Node::Const(Value::Nil) }
        / f:ident() _ "(" _ args:(expr() ** (_ "," _)) _ ")" { Node::Call(f, args) }
        / n:ident() { Node::Var(n) }

    rule number() -> Value
        = s:$(['0'..='9']+ "." ['0'..='9']+ (['e' | 'E'] ['-' | '+']? ['0'..='9']+)?) {?
              s.parse().map(Value::Float).or(Err("float"))
          }
        / s:$(['0'..='9']+) {? s.parse().map(Value::Int).or(Err("64-bit integer")) }

    rule string() -> String
        = "\"" s:(escape() / [^'"'])* "\"" { s.into_iter().collect() }
        / "'" s:(escape() / [^'\''])* "'" { s.into_iter().collect() }

    rule escape() -> char
        = "\\n" { '\n' }
        / "\\t" { '\t' }
        / "\\" c:[_] { c }

    rule ident() -> String
        = s:bare_ident() { s.to_string() }

    rule bare_ident() -> &'input str
        = quiet!{ $(['a'..='z' | 'A'..='Z' | '_'] ident_char()*) }
        / expected!("identifier")

    rule ident_char() = ['a'..='z' | 'A'..='Z' | '0'..='9' | '_']

    rule _ = [' ' | '\n' | '\t' | '\r']*
}}

#[derive(Debug, Clone, PartialEq)]
enum Stmt {
    Assign(String, Node),
    Expr(Node),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Const(Value),
    Var(String),
    Call(String, Vec<Node>),
    Not(Box<Node>),
    Neg(Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Binary(BinOp, Box<Node>, Box<Node>),
}

impl Node {
    fn binary(op: BinOp, x: Node, y: Node) -> Self {
        Self::Binary(op, Box::new(x), Box::new(y))
    }

    fn eval(&self, bindings: &Bindings) -> Result<Value, EvalError> {
        Ok(match self {
            Self::Const(v) => v.clone(),
            Self::Var(name) => bindings
                .get(name)
                .cloned()
                .ok_or_else(|| EvalError::new(format!("undefined variable `{}`", name)))?,
            Self::Call(f, args) => {
                let args = args
                    .iter()
                    .map(|a| a.eval(bindings))
                    .collect::<Result<Vec<_>, _>>()?;
                Builtin::from_str(f)?.call(args)?
            }
            Self::Not(x) => Value::Bool(!x.eval(bindings)?.is_truthy()),
            Self::Neg(x) => match x.eval(bindings)? {
                Value::Int(n) => Value::Int(
                    n.checked_neg()
                        .ok_or_else(|| EvalError::new("integer overflow"))?,
                ),
                Value::Float(f) => Value::Float(-f),
                v => return Err(EvalError::new(format!("can not negate a {}", v.type_name()))),
            },
            Self::And(x, y) => {
                Value::Bool(x.eval(bindings)?.is_truthy() && y.eval(bindings)?.is_truthy())
            }
            Self::Or(x, y) => {
                Value::Bool(x.eval(bindings)?.is_truthy() || y.eval(bindings)?.is_truthy())
            }
            Self::Binary(op, x, y) => apply(*op, x.eval(bindings)?, y.eval(bindings)?)?,
        })
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Int(n) => Some(*n as f64),
        Value::Float(x) => Some(*x),
        _ => None,
    }
}

fn equal(x: &Value, y: &Value) -> bool {
    match (x, y) {
        (Value::Int(_), Value::Float(_)) | (Value::Float(_), Value::Int(_)) => {
            as_f64(x) == as_f64(y)
        }
        _ => x == y,
    }
}

fn compare(x: &Value, y: &Value) -> Result<Ordering, EvalError> {
    let ord = match (x, y) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => match (as_f64(x), as_f64(y)) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    };
    ord.ok_or_else(|| {
        EvalError::new(format!(
            "can not compare {} with {}",
            x.type_name(),
            y.type_name()
        ))
    })
}

fn arithmetic(op: BinOp, x: Value, y: Value) -> Result<Value, EvalError> {
    let overflow = || EvalError::new("integer overflow");
    if let (Value::Int(a), Value::Int(b)) = (&x, &y) {
        let (a, b) = (*a, *b);
        return Ok(Value::Int(match op {
            BinOp::Add => a.checked_add(b).ok_or_else(overflow)?,
            BinOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
            BinOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
            BinOp::Div | BinOp::Rem if b == 0 => {
                return Err(EvalError::new("division by zero"))
            }
            BinOp::Div => a.checked_div(b).ok_or_else(overflow)?,
            BinOp::Rem => a.checked_rem(b).ok_or_else(overflow)?,
            _ => unreachable!("not an arithmetic operator"),
        }));
    }
    match (as_f64(&x), as_f64(&y)) {
        (Some(a), Some(b)) => Ok(Value::Float(match op {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div => a / b,
            BinOp::Rem => a % b,
            _ => unreachable!("not an arithmetic operator"),
        })),
        _ => Err(EvalError::new(format!(
            "unsupported operand types {} and {}",
            x.type_name(),
            y.type_name()
        ))),
    }
}

fn apply(op: BinOp, x: Value, y: Value) -> Result<Value, EvalError> {
    Ok(match op {
        BinOp::Eq => Value::Bool(equal(&x, &y)),
        BinOp::Ne => Value::Bool(!equal(&x, &y)),
        BinOp::Lt => Value::Bool(compare(&x, &y)?.is_lt()),
        BinOp::Le => Value::Bool(compare(&x, &y)?.is_le()),
        BinOp::Gt => Value::Bool(compare(&x, &y)?.is_gt()),
        BinOp::Ge => Value::Bool(compare(&x, &y)?.is_ge()),
        BinOp::Add if matches!(x, Value::Str(_)) || matches!(y, Value::Str(_)) => {
            Value::Str(format!("{}{}", x, y))
        }
        _ => arithmetic(op, x, y)?,
    })
}

/// The built-in [`Evaluator`]. Parsed blocks are cached by source text, so
/// a block inside a loop is parsed once per `Script`.
#[derive(Debug, Default)]
pub struct Script {
    cache: FxHashMap<Box<str>, Vec<Stmt>>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Evaluator for Script {
    fn evaluate(&mut self, source: &str, bindings: &mut Bindings) -> Result<Value, EvalError> {
        if !self.cache.contains_key(source) {
            let parsed = script::block(source).map_err(|e| {
                EvalError::new(format!("syntax error at {}: expected {}", e.location, e.expected))
            })?;
            self.cache.insert(source.into(), parsed);
        }

        let mut last = Value::Nil;
        for stmt in &self.cache[source] {
            last = match stmt {
                Stmt::Assign(name, node) => {
                    if is_reserved(name) {
                        return Err(EvalError::new(format!(
                            "can not assign to reserved name `{}`",
                            name
                        )));
                    }
                    let v = node.eval(bindings)?;
                    bindings.insert(name.clone(), v.clone());
                    v
                }
                Stmt::Expr(node) => node.eval(bindings)?,
            };
        }
        Ok(last)
    }
}
