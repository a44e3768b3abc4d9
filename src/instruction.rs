use std::fmt;

/// A weighted branch of a choice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Candidate<A> {
    pub(crate) weight: f64,
    pub(crate) target: A,
}

/// Inclusive bounds of a numeric range primitive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum NumRange {
    Int(i64, i64),
    Float(f64, f64),
}

/// A VM instruction. `A` is the type of jump targets: labels while a
/// program is being emitted, instruction indices once it is resolved.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Instruction<A = usize> {
    /// Pushes an entry of the literal pool.
    PushLiteral(usize),
    /// Pushes a uniform sample of the range.
    PushRandom(NumRange),
    /// Pushes a loop counter.
    PushCount(u32),
    /// Pushes a private copy of the candidates of a choice.
    PushCandidates(Box<[Candidate<A>]>),
    Pop,
    /// Decrements the counter on top of the stack.
    Dec,
    /// Jumps if the counter on top of the stack is zero. The counter stays.
    JumpIfZero(A),
    /// Pops a value and jumps if it is truthy.
    JumpIf(A),
    /// Flips a fair coin: continues on heads, jumps on tails.
    Flip(A),
    Jump(A),
    Call(A),
    Return,
    /// Pops a cell and writes it to the sink.
    Write,
    /// Evaluates an entry of the script pool and pushes the result.
    Eval(usize),
    /// Draws a branch from the candidates on top of the stack.
    Choose,
    /// Saves the sink, bindings and a resume address (`None` resumes at the
    /// next instruction).
    PushRescuePoint(Option<A>),
    /// Unwinds to the most recent rescue point.
    Rescue,
    /// Pushes the current output position.
    PushOffset,
    /// Binds `name` to the output written since the offset on top of the stack.
    Capture { name: Box<str>, discard: bool },
    Halt,
}

impl<A> Instruction<A> {
    pub(crate) fn map_addr<B, E>(self, mut f: impl FnMut(A) -> Result<B, E>) -> Result<Instruction<B>, E> {
        use Instruction::*;
        Ok(match self {
            PushLiteral(i) => PushLiteral(i),
            PushRandom(r) => PushRandom(r),
            PushCount(n) => PushCount(n),
            PushCandidates(c) => PushCandidates(
                c.into_vec()
                    .into_iter()
                    .map(|c| {
                        Ok(Candidate {
                            weight: c.weight,
                            target: f(c.target)?,
                        })
                    })
                    .collect::<Result<_, E>>()?,
            ),
            Pop => Pop,
            Dec => Dec,
            JumpIfZero(a) => JumpIfZero(f(a)?),
            JumpIf(a) => JumpIf(f(a)?),
            Flip(a) => Flip(f(a)?),
            Jump(a) => Jump(f(a)?),
            Call(a) => Call(f(a)?),
            Return => Return,
            Write => Write,
            Eval(i) => Eval(i),
            Choose => Choose,
            PushRescuePoint(a) => PushRescuePoint(a.map(f).transpose()?),
            Rescue => Rescue,
            PushOffset => PushOffset,
            Capture { name, discard } => Capture { name, discard },
            Halt => Halt,
        })
    }

    /// Returns `true` if executing this may roll back or read back output.
    pub(crate) fn restores_output(&self) -> bool {
        matches!(
            self,
            Self::Choose
                | Self::PushRescuePoint(_)
                | Self::Rescue
                | Self::PushOffset
                | Self::Capture { .. }
        )
    }
}

impl fmt::Display for NumRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(lo, hi) => write!(f, "{}...{}", lo, hi),
            Self::Float(lo, hi) => write!(f, "{:?}...{:?}", lo, hi),
        }
    }
}

impl<A: fmt::Display> fmt::Display for Instruction<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Instruction::*;
        match self {
            PushLiteral(i) => write!(f, "push_literal {}", i),
            PushRandom(r) => write!(f, "push_random {}", r),
            PushCount(n) => write!(f, "push_count {}", n),
            PushCandidates(c) => {
                write!(f, "push_candidates")?;
                for (i, c) in c.iter().enumerate() {
                    let sep = if i == 0 { " " } else { ", " };
                    write!(f, "{}{}@{}", sep, c.weight, c.target)?;
                }
                Ok(())
            }
            Pop => write!(f, "pop"),
            Dec => write!(f, "dec"),
            JumpIfZero(a) => write!(f, "jump_if_zero {}", a),
            JumpIf(a) => write!(f, "jump_if {}", a),
            Flip(a) => write!(f, "flip {}", a),
            Jump(a) => write!(f, "jump {}", a),
            Call(a) => write!(f, "call {}", a),
            Return => write!(f, "return"),
            Write => write!(f, "write"),
            Eval(i) => write!(f, "eval {}", i),
            Choose => write!(f, "choose"),
            PushRescuePoint(Some(a)) => write!(f, "push_rescue_point {}", a),
            PushRescuePoint(None) => write!(f, "push_rescue_point"),
            Rescue => write!(f, "rescue"),
            PushOffset => write!(f, "push_offset"),
            Capture { name, discard } => {
                write!(f, "capture{} {}", if *discard { "!" } else { "" }, name)
            }
            Halt => write!(f, "halt"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_addr_rewrites_every_target() {
        let candidates = vec![
            Candidate {
                weight: 1.0,
                target: 'a',
            },
            Candidate {
                weight: 2.0,
                target: 'b',
            },
        ];
        let code = vec![
            Instruction::PushCandidates(candidates.into_boxed_slice()),
            Instruction::Jump('b'),
            Instruction::PushRescuePoint(Some('a')),
            Instruction::PushRescuePoint(None),
            Instruction::Halt,
        ];
        let resolved: Vec<Instruction> = code
            .into_iter()
            .map(|i| i.map_addr(|c| Ok::<_, ()>(c as usize - 'a' as usize)))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(resolved[1], Instruction::Jump(1));
        assert_eq!(resolved[2], Instruction::PushRescuePoint(Some(0)));
        assert_eq!(resolved[3], Instruction::PushRescuePoint(None));
        assert_eq!(resolved[0].to_string(), "push_candidates 1@0, 2@1");

        let failed = Instruction::Call('z').map_addr(|_| Err::<usize, _>("unbound"));
        assert_eq!(failed, Err("unbound"));
    }
}
