#![doc = include_str!("../README.md")]

mod ast;
mod builtins;
mod compile;
mod error;
mod eval;
mod generator;
mod instruction;
mod sample;
mod script;
mod sink;
mod vm;

pub use compile::Program;
pub use error::{Error, ErrorKind, Location, RunError, RunErrorKind};
pub use eval::{Bindings, EvalError, Evaluator, Value};
pub use generator::Generator;
pub use script::Script;
pub use sink::{Buffered, Direct, Limited, Sink, Snapshot};
