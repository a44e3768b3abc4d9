use crate::compile::Program;
use crate::error::{RunError, RunErrorRepr};
use crate::eval::{Bindings, Evaluator, Value};
use crate::instruction::{Instruction, NumRange};
use crate::sample::{unit, Pool};
use crate::sink::{Sink, Snapshot};

use arbitrary::{Arbitrary, Unstructured};
use tracing::{debug, trace};

/// State to return to when an attempt fails.
#[derive(Debug)]
pub(crate) struct RescuePoint {
    resume: usize,
    snapshot: Snapshot,
    bindings: Bindings,
}

/// A VM stack entry.
#[derive(Debug)]
pub(crate) enum Cell {
    Int(i64),
    Float(f64),
    /// Index into the literal pool.
    Literal(usize),
    Value(Value),
    /// Return address.
    Address(usize),
    Candidates(Pool<usize>),
    Rescue(RescuePoint),
    Offset(Snapshot),
    /// Stands in for a rescue point when a choice has nothing left to retry.
    Placeholder,
}

/// Runs a [`Program`] once. Each attempt gets a fresh `Vm`.
pub(crate) struct Vm<'p> {
    program: &'p Program,
    stack: Vec<Cell>,
    pc: usize,
    bindings: Bindings,
}

impl<'p> Vm<'p> {
    pub(crate) fn new(program: &'p Program) -> Self {
        Self {
            program,
            stack: Vec::new(),
            pc: 0,
            bindings: Bindings::default(),
        }
    }

    /// Runs from the program entry, or from the rule at `start`, until `halt`.
    ///
    /// Returns `Ok(false)` if a failure unwound past every rescue point.
    pub(crate) fn run<S, E>(
        &mut self,
        start: Option<usize>,
        sink: &mut S,
        evaluator: &mut E,
        u: &mut Unstructured<'_>,
    ) -> Result<bool, RunError>
    where
        S: Sink + ?Sized,
        E: Evaluator + ?Sized,
    {
        let program = self.program;
        self.pc = match start {
            Some(addr) => {
                self.stack.push(Cell::Address(program.halt()));
                addr
            }
            None => program.entry(),
        };

        loop {
            let instruction = program
                .instruction(self.pc)
                .ok_or(RunError::invariant("program counter out of range"))?;
            trace!(pc = self.pc, depth = self.stack.len(), %instruction);
            self.pc += 1;

            match instruction {
                Instruction::PushLiteral(i) => self.stack.push(Cell::Literal(*i)),
                Instruction::PushRandom(NumRange::Int(lo, hi)) => {
                    let n = u.int_in_range(*lo..=*hi)?;
                    self.stack.push(Cell::Int(n));
                }
                Instruction::PushRandom(NumRange::Float(lo, hi)) => {
                    let t = unit(u)?;
                    let x = lo * (1.0 - t) + hi * t;
                    self.stack.push(Cell::Float(x));
                }
                Instruction::PushCount(n) => self.stack.push(Cell::Int((*n).into())),
                Instruction::PushCandidates(candidates) => {
                    let items = candidates.iter().map(|c| (c.weight, c.target)).collect();
                    self.stack.push(Cell::Candidates(Pool::new(items)));
                }
                Instruction::Pop => {
                    self.pop()?;
                }
                Instruction::Dec => match self.stack.last_mut() {
                    Some(Cell::Int(n)) => *n -= 1,
                    _ => return Err(RunError::invariant("decrement without a counter")),
                },
                Instruction::JumpIfZero(addr) => match self.stack.last() {
                    Some(Cell::Int(0)) => self.pc = *addr,
                    Some(Cell::Int(_)) => {}
                    _ => return Err(RunError::invariant("loop without a counter")),
                },
                Instruction::JumpIf(addr) => match self.pop()? {
                    Cell::Value(v) => {
                        if v.is_truthy() {
                            self.pc = *addr;
                        }
                    }
                    _ => return Err(RunError::invariant("condition is not a value")),
                },
                Instruction::Flip(addr) => {
                    if !bool::arbitrary(u)? {
                        self.pc = *addr;
                    }
                }
                Instruction::Jump(addr) => self.pc = *addr,
                Instruction::Call(addr) => {
                    self.stack.push(Cell::Address(self.pc));
                    self.pc = *addr;
                }
                Instruction::Return => match self.pop()? {
                    Cell::Address(addr) => self.pc = addr,
                    _ => return Err(RunError::invariant("return without an address")),
                },
                Instruction::Write => {
                    let cell = self.pop()?;
                    self.write(sink, cell)?;
                }
                Instruction::Eval(i) => {
                    let source = program.script(*i);
                    let value = evaluator
                        .evaluate(source, &mut self.bindings)
                        .map_err(|error| {
                            RunError(RunErrorRepr::Eval {
                                expr: source.to_string(),
                                error,
                            })
                        })?;
                    self.stack.push(Cell::Value(value));
                }
                Instruction::Choose => self.choose(sink, u)?,
                Instruction::PushRescuePoint(resume) => {
                    let point = RescuePoint {
                        resume: resume.unwrap_or(self.pc),
                        snapshot: sink.snapshot(),
                        bindings: self.bindings.clone(),
                    };
                    self.stack.push(Cell::Rescue(point));
                }
                Instruction::Rescue => {
                    if !self.rescue(sink)? {
                        return Ok(false);
                    }
                }
                Instruction::PushOffset => self.stack.push(Cell::Offset(sink.snapshot())),
                Instruction::Capture { name, discard } => {
                    if !self.capture(name, *discard, sink)? && !self.rescue(sink)? {
                        return Ok(false);
                    }
                }
                Instruction::Halt => {
                    debug!(bindings = self.bindings.len(), "run finished");
                    return Ok(true);
                }
            }
        }
    }

    fn pop(&mut self) -> Result<Cell, RunError> {
        self.stack
            .pop()
            .ok_or(RunError::invariant("pop from an empty stack"))
    }

    fn write<S: Sink + ?Sized>(&self, sink: &mut S, cell: Cell) -> Result<(), RunError> {
        match cell {
            Cell::Literal(i) => sink.write(self.program.literal(i).as_bytes())?,
            Cell::Int(n) => sink.write(itoa::Buffer::new().format(n).as_bytes())?,
            Cell::Float(x) => sink.write(ryu::Buffer::new().format(x).as_bytes())?,
            Cell::Value(Value::Str(s)) => sink.write(s.as_bytes())?,
            Cell::Value(v) => sink.write(v.to_string().as_bytes())?,
            _ => return Err(RunError::invariant("write of a non-value cell")),
        };
        Ok(())
    }

    /// Draws the next branch of the choice whose candidates are on top of the stack.
    fn choose<S: Sink + ?Sized>(
        &mut self,
        sink: &mut S,
        u: &mut Unstructured<'_>,
    ) -> Result<(), RunError> {
        let dispatch = self.pc - 1;
        let pool = match self.stack.last_mut() {
            Some(Cell::Candidates(pool)) => pool,
            _ => return Err(RunError::invariant("choice without candidates")),
        };
        let last = pool.len() == 1;
        let target = pool
            .draw(u)?
            .ok_or(RunError::invariant("choice without candidates"))?;

        // the last candidate has nothing left to retry
        let cell = if last {
            Cell::Placeholder
        } else {
            Cell::Rescue(RescuePoint {
                resume: dispatch,
                snapshot: sink.snapshot(),
                bindings: self.bindings.clone(),
            })
        };
        self.stack.push(cell);
        self.pc = target;
        Ok(())
    }

    /// Unwinds to the most recent rescue point and restores the state it saved.
    /// Returns `false` if there is none.
    fn rescue<S: Sink + ?Sized>(&mut self, sink: &mut S) -> Result<bool, RunError> {
        while let Some(cell) = self.stack.pop() {
            if let Cell::Rescue(point) = cell {
                sink.restore(point.snapshot)?;
                self.bindings = point.bindings;
                self.pc = point.resume;
                debug!(resume = self.pc, depth = self.stack.len(), "rescued");
                return Ok(true);
            }
        }
        debug!(pc = self.pc, "attempt failed");
        Ok(false)
    }

    /// Binds `name` to the output written since the offset on top of the stack.
    /// Returns `false` if that output is not valid UTF-8.
    fn capture<S: Sink + ?Sized>(
        &mut self,
        name: &str,
        discard: bool,
        sink: &mut S,
    ) -> Result<bool, RunError> {
        let start = match self.pop()? {
            Cell::Offset(start) => start,
            _ => return Err(RunError::invariant("capture without an offset")),
        };
        let bytes = sink
            .written_since(start)
            .ok_or(RunError::invariant("sink can not read back output"))?
            .into_owned();
        let Ok(text) = String::from_utf8(bytes) else {
            return Ok(false);
        };
        self.bindings.insert(name.to_string(), Value::Str(text));
        if discard {
            sink.restore(start)?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EvalError, RunErrorKind, Script};
    use rand::{rngs::StdRng, RngCore, SeedableRng};

    fn run<'p>(program: &'p Program, buf: &[u8]) -> (bool, Vec<u8>, Vm<'p>) {
        let mut vm = Vm::new(program);
        let mut out = Vec::new();
        let mut u = Unstructured::new(buf);
        let ok = vm
            .run(None, &mut out, &mut Script::new(), &mut u)
            .unwrap();
        (ok, out, vm)
    }

    #[test]
    fn stack_is_balanced_at_halt() {
        let program: Program = r#"
            expr   = num | paren | expr symbol expr ;
            paren  = "(" expr symbol expr ")" ")"? ;
            symbol = "-" | "+" | "*" | "/" ;
            num    = 0...9*[1...3] {x = 1} ({? x == 1} | "never") ;
        "#
        .parse()
        .unwrap();

        let mut buf = [0u8; 256];
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..200 {
            rng.fill_bytes(&mut buf);
            let (ok, out, vm) = run(&program, &buf);
            assert!(ok);
            assert!(!out.is_empty());
            assert!(vm.stack.is_empty(), "{:?}", vm.stack);
        }
    }

    #[test]
    fn exhausted_entropy_takes_lowest_choices() {
        let program: Program = r#"r = ("a" | "b") "x"*[2...5] "y"* 3...9 ;"#.parse().unwrap();
        let (ok, out, _) = run(&program, &[]);
        assert!(ok);
        assert_eq!(out, b"axx3");
    }

    #[test]
    fn wide_float_ranges_stay_finite() {
        let program: Program = "r = -1e308...1e308 ;".parse().unwrap();
        let inputs: [&[u8]; 3] = [&[], &[0x80, 0, 0, 0], &[0xff; 4]];
        for entropy in inputs {
            let (ok, out, _) = run(&program, entropy);
            assert!(ok);
            let x: f64 = std::str::from_utf8(&out).unwrap().parse().unwrap();
            assert!(x.is_finite(), "{}", x);
        }
    }

    #[test]
    fn start_at_rule() {
        let program: Program = r#"a = "a" b ; b = "b" ;"#.parse().unwrap();
        let mut vm = Vm::new(&program);
        let mut out = Vec::new();
        let ok = vm
            .run(
                program.rule("b"),
                &mut out,
                &mut Script::new(),
                &mut Unstructured::new(&[]),
            )
            .unwrap();
        assert!(ok);
        assert_eq!(out, b"b");
        assert!(vm.stack.is_empty());
    }

    #[test]
    fn failed_check_unwinds() {
        let program: Program = r#"r = "a" {? 1 > 2} ;"#.parse().unwrap();
        let (ok, out, vm) = run(&program, &[]);
        assert!(!ok);
        // the sink is restored by the caller, not the VM
        assert_eq!(out, b"a");
        assert!(vm.stack.is_empty());
    }

    #[test]
    fn choice_retries_each_candidate_once() {
        let program: Program = r#"r = {n = 0} ({n = n + 1} "a" {? false} | {n = n + 1} "b" {? false} | "c") {= n} ;"#
            .parse()
            .unwrap();
        let mut buf = [0u8; 64];
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..50 {
            rng.fill_bytes(&mut buf);
            let (ok, out, _) = run(&program, &buf);
            assert!(ok);
            // bindings are rolled back along with the output
            assert_eq!(out, b"c0");
        }
    }

    #[test]
    fn capture_and_discard() {
        let program: Program = r#"r = "ab"{capture! x} "-" "cd"{capture y} {= x + y} ;"#
            .parse()
            .unwrap();
        let (ok, out, vm) = run(&program, &[]);
        assert!(ok);
        assert_eq!(out, b"-cdabcd");
        assert_eq!(vm.bindings.get("x"), Some(&Value::Str("ab".into())));
    }

    #[test]
    fn evaluator_faults_are_errors() {
        let program: Program = r#"r = "a" {= undefined} ;"#.parse().unwrap();
        let mut out = Vec::new();
        let e = Vm::new(&program)
            .run(None, &mut out, &mut Script::new(), &mut Unstructured::new(&[]))
            .unwrap_err();
        assert_eq!(e.kind(), RunErrorKind::Eval);

        let mut fail = |_: &str, _: &mut Bindings| Err(EvalError::new("no"));
        let e = Vm::new(&program)
            .run(None, &mut out, &mut fail, &mut Unstructured::new(&[]))
            .unwrap_err();
        assert!(e.to_string().contains("undefined"));
    }
}
