//! The public pipeline driver.

use crate::grammar::{Grammars, engine};
use crate::lift;
use crate::lower;
use crate::scalar::Scalar;

/// A bytecode program as the interpreter consumes it.
#[derive(Clone, Debug, PartialEq)]
pub struct Program<S> {
    /// Opcode words; values at or above [`crate::VAR_BEGIN`] are variables.
    pub bytecode: Vec<u32>,
    /// Immediate table, consumed in order by `Immed` words.
    pub immeds: Vec<S>,
    /// Stack depth the host must reserve for evaluation.
    pub stack_size: usize,
}

/// Arities of the external functions reachable through `FCall`/`PCall`,
/// plus the variable count consumed by `Eval`.
#[derive(Clone, Debug, Default)]
pub struct FnTable {
    pub fcall_arities: Vec<u32>,
    pub pcall_arities: Vec<u32>,
    pub eval_arity: u32,
}

impl FnTable {
    pub(crate) fn fcall_arity(&self, funcno: u32) -> usize {
        self.fcall_arities.get(funcno as usize).map_or(0, |a| *a as usize)
    }

    pub(crate) fn pcall_arity(&self, funcno: u32) -> usize {
        self.pcall_arities.get(funcno as usize).map_or(0, |a| *a as usize)
    }
}

/// A reusable optimizer instance.
///
/// Construction builds the four grammar tables; optimizing a program is a
/// pure function of the input afterwards.
pub struct Optimizer<S: Scalar> {
    grammars: Grammars<S>,
    /// Cost-tune for targets whose cbrt routine is `exp(log(x)/3)`:
    /// disables cbrt-based exponent chains except the single-cbrt case.
    pub cbrt_is_slow: bool,
}

impl<S: Scalar> Default for Optimizer<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Scalar> Optimizer<S> {
    #[must_use]
    pub fn new() -> Self {
        Optimizer {
            grammars: Grammars::build(),
            cbrt_is_slow: false,
        }
    }

    #[must_use]
    pub fn with_slow_cbrt(mut self) -> Self {
        self.cbrt_is_slow = true;
        self
    }

    /// Optimize a program. The result evaluates to the same function; only
    /// the instruction mix and stack use change.
    #[must_use]
    pub fn optimize(&self, program: &Program<S>, fns: &FnTable) -> Program<S> {
        let mut tree = lift::generate_from(&program.bytecode, &program.immeds, fns, false);
        engine::apply_grammars(&self.grammars, &mut tree);
        let (bytecode, immeds, stack_size) = lower::synthesize(&mut tree, self.cbrt_is_slow);
        Program {
            bytecode,
            immeds,
            stack_size,
        }
    }
}

/// One-shot convenience wrapper around [`Optimizer`].
#[must_use]
pub fn optimize<S: Scalar>(program: &Program<S>, fns: &FnTable) -> Program<S> {
    Optimizer::new().optimize(program, fns)
}
