use crate::eval::EvalError;
use std::{fmt, io};

/// Where in the grammar source a compile error was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// File the grammar was read from, if it came from [`crate::Program::compile_file`].
    pub file: Option<String>,
    /// 1-based line.
    pub line: usize,
    /// 1-based column, counted in characters.
    pub column: usize,
}

impl Location {
    pub(crate) fn from_offset(source: &str, offset: usize) -> Self {
        let before = &source[..offset.min(source.len())];
        let line = before.matches('\n').count() + 1;
        let line_start = before.rfind('\n').map_or(0, |i| i + 1);
        Self {
            file: None,
            line,
            column: before[line_start..].chars().count() + 1,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(file) = &self.file {
            write!(f, "{}:", file)?;
        }
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// The type of error that can occur when compiling a grammar.
#[derive(Debug)]
pub struct Error {
    pub(crate) repr: ErrorRepr,
    pub(crate) location: Option<Location>,
}

/// The category of a compile [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    DuplicateRule,
    UndefinedRule,
    ProbabilityOverflow,
    ZeroWeight,
    InvalidBounds,
    Io,
}

#[derive(Debug)]
pub(crate) enum ErrorRepr {
    Grammar(peg::error::ParseError<peg::str::LineCol>),
    EmptyGrammar,
    DuplicateRule(String),
    UndefinedRule(String),
    ProbabilityOverflow(f64),
    ZeroWeight,
    InvalidRepetition(u32, u32),
    InvalidRange(String, String),
    Io(io::Error),
}

impl Error {
    pub(crate) fn at(repr: ErrorRepr, source: &str, offset: usize) -> Self {
        Self {
            repr,
            location: Some(Location::from_offset(source, offset)),
        }
    }

    pub(crate) fn unlocated(repr: ErrorRepr) -> Self {
        Self {
            repr,
            location: None,
        }
    }

    pub(crate) fn in_file(mut self, file: &str) -> Self {
        if let Some(location) = &mut self.location {
            location.file = Some(file.to_string());
        }
        self
    }

    /// Returns where the error was found, or `None` for errors that have no
    /// source position (e.g. I/O errors or an unknown start rule).
    pub fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }

    pub fn kind(&self) -> ErrorKind {
        match &self.repr {
            ErrorRepr::Grammar(_) | ErrorRepr::EmptyGrammar => ErrorKind::Syntax,
            ErrorRepr::DuplicateRule(_) => ErrorKind::DuplicateRule,
            ErrorRepr::UndefinedRule(_) => ErrorKind::UndefinedRule,
            ErrorRepr::ProbabilityOverflow(_) => ErrorKind::ProbabilityOverflow,
            ErrorRepr::ZeroWeight => ErrorKind::ZeroWeight,
            ErrorRepr::InvalidRepetition(..) | ErrorRepr::InvalidRange(..) => {
                ErrorKind::InvalidBounds
            }
            ErrorRepr::Io(_) => ErrorKind::Io,
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Grammar(e) => Some(e),
            ErrorRepr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(location) = &self.location {
            write!(f, "{}: ", location)?;
        }
        match &self.repr {
            ErrorRepr::Grammar(e) => write!(f, "expected {}", e.expected),
            ErrorRepr::EmptyGrammar => write!(f, "grammar defines no rules and no expressions"),
            ErrorRepr::DuplicateRule(name) => write!(f, "rule `{}` is defined twice", name),
            ErrorRepr::UndefinedRule(name) => write!(f, "rule `{}` is not defined", name),
            ErrorRepr::ProbabilityOverflow(sum) => {
                write!(f, "probabilities sum to {}%, exceeding 100%", sum * 100.0)
            }
            ErrorRepr::ZeroWeight => write!(f, "alternative has zero probability"),
            ErrorRepr::InvalidRepetition(min, max) => {
                write!(f, "repetition lower bound {} exceeds upper bound {}", min, max)
            }
            ErrorRepr::InvalidRange(lo, hi) => {
                write!(f, "range lower bound {} exceeds upper bound {}", lo, hi)
            }
            ErrorRepr::Io(e) => e.fmt(f),
        }
    }
}

/// The type of error that aborts a generation attempt.
///
/// A grammar-level failure (a failed `{? }` check with nowhere to backtrack to)
/// is not a `RunError`: it is reported as `Ok(false)` by [`crate::Generator::generate`].
#[derive(Debug)]
pub struct RunError(pub(crate) RunErrorRepr);

/// The category of a [`RunError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunErrorKind {
    /// An embedded expression faulted.
    Eval,
    /// The output sink failed to write, restore or read back.
    Sink,
    /// The entropy source rejected a request.
    Entropy,
    /// The program or VM stack is malformed.
    Invariant,
}

#[derive(Debug)]
pub(crate) enum RunErrorRepr {
    Eval { expr: String, error: EvalError },
    Sink(io::Error),
    Entropy(arbitrary::Error),
    Invariant(&'static str),
}

impl RunError {
    pub(crate) fn invariant(what: &'static str) -> Self {
        Self(RunErrorRepr::Invariant(what))
    }

    pub fn kind(&self) -> RunErrorKind {
        match &self.0 {
            RunErrorRepr::Eval { .. } => RunErrorKind::Eval,
            RunErrorRepr::Sink(_) => RunErrorKind::Sink,
            RunErrorRepr::Entropy(_) => RunErrorKind::Entropy,
            RunErrorRepr::Invariant(_) => RunErrorKind::Invariant,
        }
    }
}

impl From<io::Error> for RunError {
    fn from(e: io::Error) -> Self {
        Self(RunErrorRepr::Sink(e))
    }
}

impl From<arbitrary::Error> for RunError {
    fn from(e: arbitrary::Error) -> Self {
        Self(RunErrorRepr::Entropy(e))
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.0 {
            RunErrorRepr::Eval { error, .. } => Some(error),
            RunErrorRepr::Sink(e) => Some(e),
            RunErrorRepr::Entropy(e) => Some(e),
            RunErrorRepr::Invariant(_) => None,
        }
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            RunErrorRepr::Eval { expr, error } => write!(f, "in `{}`: {}", expr, error),
            RunErrorRepr::Sink(e) => write!(f, "output error: {}", e),
            RunErrorRepr::Entropy(e) => write!(f, "entropy error: {}", e),
            RunErrorRepr::Invariant(what) => write!(f, "internal error: {}", what),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_from_offset() {
        let source = "a = \"x\";\nb = c;\n";
        let loc = Location::from_offset(source, source.find('c').unwrap());
        assert_eq!((loc.line, loc.column), (2, 5));
        assert_eq!(loc.to_string(), "2:5");

        let loc = Location::from_offset(source, 0);
        assert_eq!((loc.line, loc.column), (1, 1));
    }

    #[test]
    fn file_prefix() {
        let e = Error::at(ErrorRepr::UndefinedRule("c".into()), "b = c;", 4).in_file("g.txt");
        assert_eq!(e.to_string(), "g.txt:1:5: rule `c` is not defined");
        assert_eq!(e.kind(), ErrorKind::UndefinedRule);
    }
}
