use crate::ast::{self, Alternative, Expr, Item, Number, Probability};
use crate::error::{Error, ErrorRepr};
use crate::instruction::{Candidate, Instruction, NumRange};

use fxhash::FxHashMap;
use std::{fmt, fs, path::Path, str::FromStr};
use tracing::debug;

/// How far explicit probabilities of one choice may sum past 100%.
const PROBABILITY_TOLERANCE: f64 = 1e-4;

/// A grammar compiled to bytecode, ready to be run by a [`crate::Generator`].
///
/// # Implementation
/// ## Construction
/// `Program` is constructed using [`Program::compile`] (or `from_str`) of a grammar source:
/// - A peg parser converts the source into an AST (in ast.rs).
/// - Rule names are checked for duplicates and every rule gets a label.
/// - Each expression is emitted depth-first as instructions that jump to labels.
/// - Labels are resolved to instruction addresses; none survive into the program.
///
/// ## Layout
/// The entry code comes first and is followed by `halt`. The entry is either the
/// grammar's top-level expressions or, if it has none, a call to its first rule.
/// Every rule body follows, each ending in `return`.
#[derive(Debug, Clone)]
pub struct Program {
    code: Vec<Instruction>,
    literals: Vec<Box<str>>,
    scripts: Vec<Box<str>>,
    rules: Vec<(String, usize)>,
    halt: usize,
}

impl Program {
    /// Compiles a grammar source.
    ///
    /// ```
    /// let program = gentext::Program::compile(r#"greeting = "hello" | "hi" ;"#).unwrap();
    /// assert!(program.rule("greeting").is_some());
    /// ```
    pub fn compile(source: &str) -> Result<Self, Error> {
        let items = ast::source::items(source).map_err(|e| {
            let offset = e.location.offset;
            Error::at(ErrorRepr::Grammar(e), source, offset)
        })?;
        Emitter::new(source).program(items)
    }

    /// Reads and compiles a grammar file. Error locations carry the file name.
    pub fn compile_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let source =
            fs::read_to_string(path).map_err(|e| Error::unlocated(ErrorRepr::Io(e)))?;
        Self::compile(&source).map_err(|e| e.in_file(&path.display().to_string()))
    }

    /// Returns the address of the rule called `name`.
    pub fn rule(&self, name: &str) -> Option<usize> {
        self.rules.iter().find(|(n, _)| n == name).map(|(_, addr)| *addr)
    }

    /// Returns `false` if running this program never rolls back or reads back
    /// output, i.e. it has no choice, check, optional repetition or capture.
    /// Such a program can write straight into a [`crate::Direct`] sink.
    pub fn may_restore_output(&self) -> bool {
        self.code.iter().any(Instruction::restores_output)
    }

    /// Number of instructions.
    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub(crate) fn instruction(&self, pc: usize) -> Option<&Instruction> {
        self.code.get(pc)
    }

    pub(crate) fn literal(&self, i: usize) -> &str {
        &self.literals[i]
    }

    pub(crate) fn script(&self, i: usize) -> &str {
        &self.scripts[i]
    }

    /// Address where a run starts unless it is given a rule.
    pub(crate) const fn entry(&self) -> usize {
        0
    }

    pub(crate) fn halt(&self) -> usize {
        self.halt
    }
}

impl FromStr for Program {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::compile(s)
    }
}

/// Disassembles the program, one instruction per line.
///
/// Useful to check that the compiled program matches what is expected
/// from the grammar.
impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (addr, instruction) in self.code.iter().enumerate() {
            for (name, _) in self.rules.iter().filter(|(_, a)| *a == addr) {
                writeln!(f, "{}:", name)?;
            }
            write!(f, "{:>6}  {}", addr, instruction)?;
            match instruction {
                Instruction::PushLiteral(i) => write!(f, "  ; {:?}", self.literal(*i))?,
                Instruction::Eval(i) => write!(f, "  ; {{{}}}", self.script(*i))?,
                _ => {}
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// A jump target that is not yet bound to an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Label(usize);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Deduplicated string pool.
#[derive(Default)]
struct Interner {
    items: Vec<Box<str>>,
    index: FxHashMap<Box<str>, usize>,
}

impl Interner {
    fn intern(&mut self, s: &str) -> usize {
        if let Some(i) = self.index.get(s) {
            return *i;
        }
        let i = self.items.len();
        self.items.push(s.into());
        self.index.insert(s.into(), i);
        i
    }
}

struct Emitter<'s> {
    source: &'s str,
    code: Vec<Instruction<Label>>,
    // `labels[i]` == address bound to `Label(i)`
    labels: Vec<Option<usize>>,
    literals: Interner,
    scripts: Interner,
    rules: FxHashMap<String, Label>,
}

impl<'s> Emitter<'s> {
    fn new(source: &'s str) -> Self {
        Self {
            source,
            code: Vec::new(),
            labels: Vec::new(),
            literals: Interner::default(),
            scripts: Interner::default(),
            rules: FxHashMap::default(),
        }
    }

    fn error(&self, repr: ErrorRepr, pos: usize) -> Error {
        Error::at(repr, self.source, pos)
    }

    fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    fn bind(&mut self, label: Label) {
        self.labels[label.0] = Some(self.code.len());
    }

    fn push(&mut self, instruction: Instruction<Label>) {
        self.code.push(instruction);
    }

    fn program(mut self, items: Vec<Item>) -> Result<Program, Error> {
        let mut rules = Vec::new();
        let mut entry = Vec::new();
        for item in items {
            match item {
                Item::Rule(r) => rules.push(r),
                Item::Expr(e) => entry.push(e),
            }
        }

        for rule in &rules {
            if self.rules.contains_key(&rule.name) {
                return Err(self.error(ErrorRepr::DuplicateRule(rule.name.clone()), rule.pos));
            }
            let label = self.label();
            self.rules.insert(rule.name.clone(), label);
        }

        match (entry.is_empty(), rules.first()) {
            (false, _) => {
                for e in &entry {
                    self.emit(e)?;
                }
            }
            (true, Some(first)) => {
                let label = self.rules[&first.name];
                self.push(Instruction::Call(label));
            }
            (true, None) => return Err(self.error(ErrorRepr::EmptyGrammar, self.source.len())),
        }
        let halt = self.code.len();
        self.push(Instruction::Halt);

        for rule in &rules {
            let label = self.rules[&rule.name];
            self.bind(label);
            self.emit(&rule.body)?;
            self.push(Instruction::Return);
        }

        let labels = self.labels;
        let code = self
            .code
            .into_iter()
            .map(|i| i.map_addr(|l| labels[l.0].ok_or(l)))
            .collect::<Result<Vec<_>, _>>()
            .expect("every label is bound during emission");
        let rules: Vec<_> = rules
            .into_iter()
            .map(|r| {
                let addr = labels[self.rules[&r.name].0].expect("rule label is bound");
                (r.name, addr)
            })
            .collect();

        debug!(
            rules = rules.len(),
            instructions = code.len(),
            literals = self.literals.items.len(),
            "grammar compiled"
        );
        Ok(Program {
            code,
            literals: self.literals.items,
            scripts: self.scripts.items,
            rules,
            halt,
        })
    }

    fn emit(&mut self, expr: &Expr) -> Result<(), Error> {
        match expr {
            Expr::Literal(s) => {
                let i = self.literals.intern(s);
                self.push(Instruction::PushLiteral(i));
                self.push(Instruction::Write);
            }
            Expr::Range(lo, hi, pos) => {
                self.range(*lo, *hi, *pos)?;
                self.push(Instruction::Write);
            }
            Expr::Reference(name, pos) => {
                let label = *self
                    .rules
                    .get(name)
                    .ok_or_else(|| self.error(ErrorRepr::UndefinedRule(name.clone()), *pos))?;
                self.push(Instruction::Call(label));
            }
            Expr::Sequence(items) => {
                for e in items {
                    self.emit(e)?;
                }
            }
            Expr::Repetition { sub, min, max, pos } => self.repetition(sub, *min, *max, *pos)?,
            Expr::Choice(alternatives, pos) => self.choice(alternatives, *pos)?,
            Expr::Generate(code) => {
                let i = self.scripts.intern(code);
                self.push(Instruction::Eval(i));
                self.push(Instruction::Write);
            }
            Expr::Check(code) => {
                let i = self.scripts.intern(code);
                let ok = self.label();
                self.push(Instruction::Eval(i));
                self.push(Instruction::JumpIf(ok));
                self.push(Instruction::Rescue);
                self.bind(ok);
            }
            Expr::Action(code) => {
                let i = self.scripts.intern(code);
                self.push(Instruction::Eval(i));
                self.push(Instruction::Pop);
            }
            Expr::Capture { sub, name, discard } => {
                self.push(Instruction::PushOffset);
                self.emit(sub)?;
                self.push(Instruction::Capture {
                    name: name.as_str().into(),
                    discard: *discard,
                });
            }
        }
        Ok(())
    }

    /// Pushes a number in `[lo, hi]`. A single-valued range is a literal.
    fn range(&mut self, lo: Number, hi: Number, pos: usize) -> Result<(), Error> {
        let invalid = |this: &Self| {
            this.error(
                ErrorRepr::InvalidRange(number_text(lo), number_text(hi)),
                pos,
            )
        };
        let range = match (lo, hi) {
            (Number::Int(a), Number::Int(b)) if a > b => return Err(invalid(self)),
            (Number::Int(a), Number::Int(b)) if a == b => {
                let i = self.literals.intern(itoa::Buffer::new().format(a));
                self.push(Instruction::PushLiteral(i));
                return Ok(());
            }
            (Number::Int(a), Number::Int(b)) => NumRange::Int(a, b),
            _ => {
                let (a, b) = (as_f64(lo), as_f64(hi));
                if a > b {
                    return Err(invalid(self));
                }
                if a == b {
                    let i = self.literals.intern(ryu::Buffer::new().format(a));
                    self.push(Instruction::PushLiteral(i));
                    return Ok(());
                }
                NumRange::Float(a, b)
            }
        };
        self.push(Instruction::PushRandom(range));
        Ok(())
    }

    fn repetition(
        &mut self,
        sub: &Expr,
        min: u32,
        max: Option<u32>,
        pos: usize,
    ) -> Result<(), Error> {
        if let Some(max) = max {
            if min > max {
                return Err(self.error(ErrorRepr::InvalidRepetition(min, max), pos));
            }
        }
        // `None` is unbounded
        let optional = max.map(|max| max - min);
        if min == 0 && optional == Some(0) {
            // nothing runs, but the body must still compile
            let mark = self.code.len();
            self.emit(sub)?;
            self.code.truncate(mark);
            return Ok(());
        }

        // the body is a local subroutine shared by both loops
        let body = self.label();
        let skip = self.label();
        self.push(Instruction::Jump(skip));
        self.bind(body);
        self.emit(sub)?;
        self.push(Instruction::Return);
        self.bind(skip);

        if min > 0 {
            let (top, end) = (self.label(), self.label());
            self.push(Instruction::PushCount(min));
            self.bind(top);
            self.push(Instruction::JumpIfZero(end));
            self.push(Instruction::Call(body));
            self.push(Instruction::Dec);
            self.push(Instruction::Jump(top));
            self.bind(end);
            self.push(Instruction::Pop);
        }

        // A failed optional iteration rolls back to just before itself and
        // leaves the loop.
        match optional {
            Some(0) => {}
            Some(n) => {
                let (top, end) = (self.label(), self.label());
                self.push(Instruction::PushRandom(NumRange::Int(0, n.into())));
                self.bind(top);
                self.push(Instruction::JumpIfZero(end));
                self.push(Instruction::PushRescuePoint(Some(end)));
                self.push(Instruction::Call(body));
                self.push(Instruction::Pop);
                self.push(Instruction::Dec);
                self.push(Instruction::Jump(top));
                self.bind(end);
                self.push(Instruction::Pop);
            }
            None => {
                let (top, end) = (self.label(), self.label());
                self.bind(top);
                self.push(Instruction::Flip(end));
                self.push(Instruction::PushRescuePoint(Some(end)));
                self.push(Instruction::Call(body));
                self.push(Instruction::Pop);
                self.push(Instruction::Jump(top));
                self.bind(end);
            }
        }
        Ok(())
    }

    fn choice(&mut self, alternatives: &[Alternative], pos: usize) -> Result<(), Error> {
        let weights = self.weights(alternatives, pos)?;
        let end = self.label();
        let targets: Vec<Label> = alternatives.iter().map(|_| self.label()).collect();
        let candidates = weights
            .iter()
            .zip(&targets)
            .map(|(&weight, &target)| Candidate { weight, target })
            .collect();
        self.push(Instruction::PushCandidates(candidates));
        self.push(Instruction::Choose);
        for (i, (alternative, target)) in alternatives.iter().zip(targets).enumerate() {
            self.bind(target);
            self.emit(&alternative.body)?;
            if i + 1 < alternatives.len() {
                self.push(Instruction::Jump(end));
            }
        }
        // drop the dispatch bookkeeping, then the candidates
        self.bind(end);
        self.push(Instruction::Pop);
        self.push(Instruction::Pop);
        Ok(())
    }

    /// Returns the effective weight of every alternative. Without any explicit
    /// probability all alternatives weigh the same; otherwise alternatives
    /// without one split what is left of 100%.
    fn weights(&self, alternatives: &[Alternative], pos: usize) -> Result<Vec<f64>, Error> {
        let mut explicit = 0.0;
        let mut auto = 0;
        for a in alternatives {
            match a.probability {
                Probability::Explicit(p) => explicit += p,
                Probability::Auto => auto += 1,
            }
        }
        if explicit > 1.0 + PROBABILITY_TOLERANCE {
            return Err(self.error(ErrorRepr::ProbabilityOverflow(explicit), pos));
        }

        let share = if auto == alternatives.len() {
            1.0
        } else {
            (1.0 - explicit) / auto as f64
        };
        let weights: Vec<f64> = alternatives
            .iter()
            .map(|a| match a.probability {
                Probability::Explicit(p) => p,
                Probability::Auto => share,
            })
            .collect();
        if weights.iter().any(|w| *w <= 0.0) {
            return Err(self.error(ErrorRepr::ZeroWeight, pos));
        }
        Ok(weights)
    }
}

fn as_f64(n: Number) -> f64 {
    match n {
        Number::Int(i) => i as f64,
        Number::Float(f) => f,
    }
}

fn number_text(n: Number) -> String {
    match n {
        Number::Int(i) => itoa::Buffer::new().format(i).to_string(),
        Number::Float(f) => ryu::Buffer::new().format(f).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn kind(source: &str) -> ErrorKind {
        Program::compile(source).unwrap_err().kind()
    }

    fn targets(program: &Program) -> Vec<usize> {
        let mut targets = Vec::new();
        for i in &program.code {
            match i {
                Instruction::JumpIfZero(a)
                | Instruction::JumpIf(a)
                | Instruction::Flip(a)
                | Instruction::Jump(a)
                | Instruction::Call(a)
                | Instruction::PushRescuePoint(Some(a)) => targets.push(*a),
                Instruction::PushCandidates(c) => targets.extend(c.iter().map(|c| c.target)),
                _ => {}
            }
        }
        targets
    }

    #[test]
    fn entry_calls_first_rule() {
        let program = Program::compile(r#"a = "x" b ; b = "y" ;"#).unwrap();
        assert_eq!(program.code[0], Instruction::Call(program.rule("a").unwrap()));
        assert_eq!(program.code[program.halt()], Instruction::Halt);
        assert_eq!(program.halt(), 1);
        assert_eq!(program.rule("c"), None);
        assert!(!program.may_restore_output());
    }

    #[test]
    fn top_level_expressions_are_the_entry() {
        let program = Program::compile(r#""<" item ">" item = "i" ;"#).unwrap();
        assert_eq!(program.code[0], Instruction::PushLiteral(0));
        assert_eq!(program.literal(0), "<");
        assert!(program.halt() > 0);
    }

    #[test]
    fn every_target_is_in_range() {
        let program = Program::compile(
            r#"
            start = (a | [20%] b | c)*[1...inf] "-"? d{capture x} {? x == "d"} ;
            a = "a" ;
            b = 1...6 ;
            c = {= 1 + 2} { n = 3 } ;
            d = "d" ;
            "#,
        )
        .unwrap();
        let targets = targets(&program);
        assert!(!targets.is_empty());
        assert!(targets.iter().all(|t| *t < program.len()));
        assert!(program.may_restore_output());
    }

    #[test]
    fn literals_are_interned() {
        let program = Program::compile(r#"r = "a" "b" "a" 3 3...3 ;"#).unwrap();
        assert_eq!(program.literals.len(), 3);
        assert_eq!(program.literal(2), "3");
    }

    #[test]
    fn weights() {
        let weights_of = |s: &str| {
            let program = Program::compile(s).unwrap();
            program
                .code
                .iter()
                .find_map(|i| match i {
                    Instruction::PushCandidates(c) => {
                        Some(c.iter().map(|c| c.weight).collect::<Vec<_>>())
                    }
                    _ => None,
                })
                .unwrap()
        };
        assert_eq!(weights_of(r#"r = "a" | "b" | "c" ;"#), vec![1.0, 1.0, 1.0]);
        let w = weights_of(r#"r = [50%] "a" | "b" | "c" ;"#);
        assert_eq!(w, vec![0.5, 0.25, 0.25]);
        let w = weights_of(r#"r = [0.1] "a" | [0.2] "b" ;"#);
        assert_eq!(w, vec![0.1, 0.2]);
    }

    #[test]
    fn compile_errors() {
        assert_eq!(kind(r#"a = "x" ; a = "y" ;"#), ErrorKind::DuplicateRule);
        assert_eq!(kind(r#"a = b ;"#), ErrorKind::UndefinedRule);
        assert_eq!(kind(r#"a = [60%] "x" | [50%] "y" ;"#), ErrorKind::ProbabilityOverflow);
        assert_eq!(kind(r#"a = [100%] "x" | "y" ;"#), ErrorKind::ZeroWeight);
        assert_eq!(kind(r#"a = [0%] "x" | "y" ;"#), ErrorKind::ZeroWeight);
        assert_eq!(kind(r#"a = "x"*[3...2] ;"#), ErrorKind::InvalidBounds);
        assert_eq!(kind(r#"a = 6...1 ;"#), ErrorKind::InvalidBounds);
        assert_eq!(kind(r#"a = "x" "#), ErrorKind::Syntax);
        assert_eq!(kind("  // nothing here\n"), ErrorKind::Syntax);
        assert_eq!(kind(r#"a = [150%] "x" ;"#), ErrorKind::ProbabilityOverflow);
        assert_eq!(kind(r#"a = [0%] "x" ;"#), ErrorKind::ZeroWeight);

        // a body that never runs is still checked
        assert_eq!(kind(r#"a = "x" b*[0] ;"#), ErrorKind::UndefinedRule);
        assert_eq!(
            kind(r#"a = ([60%] "x" | [50%] "y")*[0...0] ;"#),
            ErrorKind::ProbabilityOverflow
        );
        assert_eq!(kind(r#"a = (9...1)*[0] ;"#), ErrorKind::InvalidBounds);

        // within tolerance
        Program::compile(r#"a = [50.005%] "x" | [50%] "y" ;"#).unwrap();
    }

    #[test]
    fn error_locations() {
        let e = Program::compile("a = \"x\" ;\nb = a c ;").unwrap_err();
        let loc = e.location().unwrap();
        assert_eq!((loc.line, loc.column), (2, 7));

        let e = Program::compile("a = \"x\" ;\n\na = \"y\" ;").unwrap_err();
        assert_eq!(e.location().unwrap().line, 3);
    }

    #[test]
    fn shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Program>();
    }

    #[test]
    fn cycles_compile() {
        let program = Program::compile("a = b ; b = a ;").unwrap();
        assert_eq!(
            program.code[program.rule("a").unwrap()],
            Instruction::Call(program.rule("b").unwrap())
        );
    }

    #[test]
    fn disassembly() {
        let program = Program::compile(r#"r = "a" | {= 1} ;"#).unwrap();
        let text = program.to_string();
        assert!(text.contains("r:\n"));
        assert!(text.contains("halt"));
        assert!(text.contains("choose"));
        assert!(text.contains(r#"push_literal 0  ; "a""#));
        assert!(text.contains("eval 0  ; { 1}"));
        assert!(!text.contains('L'));
    }
}
