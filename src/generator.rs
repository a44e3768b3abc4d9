use crate::compile::Program;
use crate::error::{Error, ErrorRepr, RunError};
use crate::eval::Evaluator;
use crate::script::Script;
use crate::sink::{Buffered, Direct, Sink};
use crate::vm::Vm;

use arbitrary::Unstructured;
use std::io::Write;
use tracing::debug;

/// Runs a [`Program`] to produce text.
///
/// Every call to [`Generator::generate`] is an independent attempt whose
/// random choices are all drawn from the given `Unstructured`, so the same
/// bytes always generate the same text.
///
/// ```
/// use arbitrary::Unstructured;
/// use gentext::{Generator, Program};
///
/// let program: Program = r#"dice = 1...6 ("," dice)? ;"#.parse().unwrap();
/// let mut generator = Generator::new(&program);
/// let mut u = Unstructured::new(b"some fuzzer input");
/// let text: String = generator.expression(&mut u).unwrap().unwrap();
/// assert!(!text.is_empty());
/// ```
#[derive(Debug)]
pub struct Generator<'p, E = Script> {
    program: &'p Program,
    evaluator: E,
    start: Option<usize>,
}

impl<'p> Generator<'p> {
    /// Returns a generator that evaluates embedded blocks with [`Script`].
    pub fn new(program: &'p Program) -> Self {
        Self {
            program,
            evaluator: Script::new(),
            start: None,
        }
    }
}

impl<'p, E: Evaluator> Generator<'p, E> {
    /// Replaces the evaluator of embedded blocks.
    pub fn with_evaluator<F: Evaluator>(self, evaluator: F) -> Generator<'p, F> {
        Generator {
            program: self.program,
            evaluator,
            start: self.start,
        }
    }

    /// Starts generation at the rule called `rule` instead of the program entry.
    pub fn start(mut self, rule: &str) -> Result<Self, Error> {
        let addr = self
            .program
            .rule(rule)
            .ok_or_else(|| Error::unlocated(ErrorRepr::UndefinedRule(rule.to_string())))?;
        self.start = Some(addr);
        Ok(self)
    }

    pub fn evaluator(&mut self) -> &mut E {
        &mut self.evaluator
    }

    /// Writes generated text to `sink`.
    ///
    /// Returns `Ok(false)` if the grammar failed, e.g. a `{? }` check failed
    /// on every path; the sink is then restored to where it was before the call.
    /// `Err` is reserved for faults: evaluator errors, sink errors, entropy
    /// errors and a malformed program.
    pub fn generate<S: Sink + ?Sized>(
        &mut self,
        sink: &mut S,
        u: &mut Unstructured<'_>,
    ) -> Result<bool, RunError> {
        let before = sink.snapshot();
        let ok = Vm::new(self.program).run(self.start, sink, &mut self.evaluator, u)?;
        if !ok {
            sink.restore(before)?;
            debug!("generation failed");
        }
        Ok(ok)
    }

    /// Returns generated text in a new sink, or `None` if the grammar failed.
    pub fn expression<S: Sink + Default>(
        &mut self,
        u: &mut Unstructured<'_>,
    ) -> Result<Option<S>, RunError> {
        let mut sink = S::default();
        Ok(self.generate(&mut sink, u)?.then_some(sink))
    }

    /// Writes generated text to `writer`.
    ///
    /// Output is streamed straight into `writer` if the program never rolls
    /// output back (see [`Program::may_restore_output`]), and is buffered until
    /// the run succeeds otherwise. Nothing buffered is written if the grammar
    /// fails or the run ends in an error.
    pub fn generate_to<W: Write>(
        &mut self,
        writer: W,
        u: &mut Unstructured<'_>,
    ) -> Result<bool, RunError> {
        if self.program.may_restore_output() {
            self.generate_closing(&mut Buffered::new(writer), u)
        } else {
            self.generate_closing(&mut Direct::new(writer), u)
        }
    }

    fn generate_closing<S: Sink>(
        &mut self,
        sink: &mut S,
        u: &mut Unstructured<'_>,
    ) -> Result<bool, RunError> {
        let before = sink.snapshot();
        let result = self.generate(sink, u);
        if result.is_err() {
            // a Direct sink can not take back what it already wrote
            let _ = sink.restore(before);
        }
        sink.close()?;
        result
    }
}
