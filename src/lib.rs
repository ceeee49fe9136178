#![forbid(unsafe_code)]
//! Optimizer for stack-based mathematical-expression bytecode.
//!
//! A runtime function parser compiles formulas like `sin(x)*sin(x)+cos(x)*cos(x)`
//! into a linear stack-machine program. This crate takes such a program, lifts
//! it into a shared expression DAG, rewrites the DAG with algebraic identities,
//! interval analysis and integer-exponent factoring, and lowers it back into a
//! program that computes the same function with fewer operations, shallower
//! stacks and better use of dedicated opcodes (`Sqrt`, `RSqrt`, `Inv`, `Exp`,
//! `Log2by`, fused `SinCos`, ...).
//!
//! # Pipeline
//!
//! ```text
//! ┌──────────┐    ┌────────┐    ┌─────────────────┐    ┌───────────┐
//! │ bytecode │ -> │ Lifter │ -> │ Grammar engine  │ -> │  Lowerer  │ -> bytecode
//! │ + immeds │    │        │    │ + const folder  │    │ CSE+powi  │    + immeds
//! └──────────┘    └────────┘    │ + range analysis│    └───────────┘    + stack size
//!                               └─────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use bytefold::{optimize, FnTable, Opcode, Program};
//!
//! // Bytecode for x^6, as a parser would emit it: x x*x -> ... -> pow(x, 6)
//! let program = Program {
//!     bytecode: vec![bytefold::VAR_BEGIN, Opcode::Immed as u32, Opcode::Pow as u32],
//!     immeds: vec![6.0_f64],
//!     stack_size: 2,
//! };
//! let optimized = optimize(&program, &FnTable::default());
//! // The result contains no Pow: x^6 becomes a short dup/sqr/mul chain.
//! assert!(!optimized.bytecode.contains(&(Opcode::Pow as u32)));
//! ```
//!
//! The optimizer is a pure library: no I/O, no globals, single-threaded and
//! deterministic. It never rejects input the interpreter would accept.

mod fold;
mod grammar;
mod lift;
mod lower;
mod opcode;
mod optimizer;
mod range;
mod scalar;
mod synth;
mod trace;
mod transform;
mod tree;

#[cfg(test)]
mod tests;

pub use opcode::{Opcode, VAR_BEGIN};
pub use optimizer::{FnTable, Optimizer, Program, optimize};
pub use range::{Range, TriTruth};
pub use scalar::Scalar;
pub use tree::{CodeTree, TreeHash};
