//! Property tests: semantic preservation, idempotence, hash correctness,
//! range soundness. Each property runs the full pipeline for both `f64`
//! and `f32`, with per-scalar comparison tolerances.

use num_traits::Float;
use quickcheck::{Arbitrary, Gen, QuickCheck, TestResult};

use crate::lift;
use crate::opcode::Opcode;
use crate::optimizer::{FnTable, Program, optimize};
use crate::range::calculate_result_boundaries;
use crate::scalar::Scalar;

use super::interp::{Builder, run};

/// A small random expression over three variables, restricted to shapes
/// whose domains are total (no logs, no fractional powers of signed values),
/// so the finite-value comparison is meaningful nearly everywhere.
#[derive(Clone, Debug)]
enum Expr {
    Var(u8),
    Num(f64),
    Add(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Sin(Box<Expr>),
    Cos(Box<Expr>),
    Abs(Box<Expr>),
    Min(Box<Expr>, Box<Expr>),
    Max(Box<Expr>, Box<Expr>),
    PowI(Box<Expr>, u8),
    Less(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
}

fn gen_expr(g: &mut Gen, depth: usize) -> Expr {
    let leaf = depth == 0 || u8::arbitrary(g) % 4 == 0;
    if leaf {
        return if bool::arbitrary(g) {
            Expr::Var(u8::arbitrary(g) % 3)
        } else {
            // Half-integers in [-2, 2]: comfortably apart relative to the
            // folder's equality tolerance, small enough that reassociation
            // error stays far below the comparison tolerance, and exactly
            // representable in every scalar type under test.
            Expr::Num(f64::from(i8::arbitrary(g) % 5) / 2.0)
        };
    }
    let sub = |g: &mut Gen| Box::new(gen_expr(g, depth - 1));
    match u8::arbitrary(g) % 13 {
        0 => Expr::Add(sub(g), sub(g)),
        1 => Expr::Mul(sub(g), sub(g)),
        2 => Expr::Sub(sub(g), sub(g)),
        3 => Expr::Div(sub(g), sub(g)),
        4 => Expr::Neg(sub(g)),
        5 => Expr::Sin(sub(g)),
        6 => Expr::Cos(sub(g)),
        7 => Expr::Abs(sub(g)),
        8 => Expr::Min(sub(g), sub(g)),
        9 => Expr::Max(sub(g), sub(g)),
        10 => Expr::PowI(sub(g), 2 + u8::arbitrary(g) % 3),
        11 => Expr::Less(sub(g), sub(g)),
        _ => Expr::And(sub(g), sub(g)),
    }
}

impl Arbitrary for Expr {
    fn arbitrary(g: &mut Gen) -> Self {
        gen_expr(g, 3)
    }
}

fn emit<S: Scalar>(expr: &Expr, builder: Builder<S>) -> Builder<S> {
    match expr {
        Expr::Var(index) => builder.var(u32::from(*index)),
        Expr::Num(value) => builder.num(*value),
        Expr::Add(a, b) => emit(b, emit(a, builder)).op(Opcode::Add),
        Expr::Mul(a, b) => emit(b, emit(a, builder)).op(Opcode::Mul),
        Expr::Sub(a, b) => emit(b, emit(a, builder)).op(Opcode::Sub),
        Expr::Div(a, b) => emit(b, emit(a, builder)).op(Opcode::Div),
        Expr::Neg(a) => emit(a, builder).op(Opcode::Neg),
        Expr::Sin(a) => emit(a, builder).op(Opcode::Sin),
        Expr::Cos(a) => emit(a, builder).op(Opcode::Cos),
        Expr::Abs(a) => emit(a, builder).op(Opcode::Abs),
        Expr::Min(a, b) => emit(b, emit(a, builder)).op(Opcode::Min),
        Expr::Max(a, b) => emit(b, emit(a, builder)).op(Opcode::Max),
        Expr::PowI(a, k) => emit(a, builder).num(f64::from(*k)).op(Opcode::Pow),
        Expr::Less(a, b) => emit(b, emit(a, builder)).op(Opcode::Less),
        Expr::And(a, b) => emit(b, emit(a, builder)).op(Opcode::And),
    }
}

fn compile<S: Scalar>(expr: &Expr) -> Program<S> {
    emit(expr, Builder::new()).build()
}

/// Sample points; every value is exactly representable in `f32` and `f64`.
const ENVS: [[f64; 3]; 5] = [
    [0.5, 1.5, -2.5],
    [-1.0, 2.0, 0.75],
    [3.0, -0.25, 1.0],
    [-2.0, -2.0, -2.0],
    [1.0, 1.0, 1.0],
];

fn envs<S: Scalar>() -> Vec<[S; 3]> {
    ENVS.iter()
        .map(|env| env.map(|v| S::from_f64(v).unwrap_or_else(S::zero)))
        .collect()
}

fn close<S: Scalar>(a: S, b: S, rel: f64) -> bool {
    let rel = S::from_f64(rel).unwrap_or_else(S::one);
    (a - b).abs() <= rel * a.abs().max(b.abs()).max(S::one())
}

/// P1 for one scalar type: the optimized program computes the same finite
/// values as the input program.
fn preserves_semantics<S: Scalar>(expr: &Expr, rel: f64) -> Result<(), String> {
    let program = compile::<S>(expr);
    let optimized = optimize(&program, &FnTable::default());
    for env in envs::<S>() {
        let original = run(&program, &env);
        let rewritten = run(&optimized, &env);
        if !original.is_finite() || !rewritten.is_finite() {
            continue;
        }
        if !close(original, rewritten, rel) {
            return Err(format!(
                "env {env:?}: original {original}, optimized {rewritten}, expr {expr:?}"
            ));
        }
    }
    Ok(())
}

/// P2 for one scalar type: a second optimization pass is a no-op.
fn is_idempotent<S: Scalar>(expr: &Expr) -> bool {
    let program = compile::<S>(expr);
    let fns = FnTable::default();
    let once = optimize(&program, &fns);
    let twice = optimize(&once, &fns);
    once == twice
}

/// P3 for one scalar type: identical construction implies identity, and
/// identity implies equal hashes.
fn hashes_consistently<S: Scalar>(expr: &Expr) -> bool {
    let program = compile::<S>(expr);
    let fns = FnTable::default();
    let a = lift::generate_from(&program.bytecode, &program.immeds, &fns, false);
    let b = lift::generate_from(&program.bytecode, &program.immeds, &fns, false);
    a.is_identical_to(&b) && a.hash() == b.hash()
}

/// P5 for one scalar type: every finite evaluation lands inside the
/// analyzer's interval (up to the scalar's rounding slack).
fn range_is_sound<S: Scalar>(expr: &Expr, slack: f64) -> Result<(), String> {
    let program = compile::<S>(expr);
    let tree = lift::generate_from(&program.bytecode, &program.immeds, &FnTable::default(), false);
    let range = calculate_result_boundaries(&tree);
    let slack = S::from_f64(slack).unwrap_or_else(S::zero);
    for env in envs::<S>() {
        let value = run(&program, &env);
        if !value.is_finite() {
            continue;
        }
        if let Some(lo) = range.min
            && value < lo - slack * lo.abs().max(S::one())
        {
            return Err(format!(
                "value {value} below range min {lo} at {env:?} for {expr:?}"
            ));
        }
        if let Some(hi) = range.max
            && value > hi + slack * hi.abs().max(S::one())
        {
            return Err(format!(
                "value {value} above range max {hi} at {env:?} for {expr:?}"
            ));
        }
    }
    Ok(())
}

#[test]
fn p1_semantic_preservation() {
    fn property(expr: Expr) -> TestResult {
        if let Err(message) = preserves_semantics::<f64>(&expr, 1e-6) {
            return TestResult::error(format!("f64: {message}"));
        }
        if let Err(message) = preserves_semantics::<f32>(&expr, 1e-3) {
            return TestResult::error(format!("f32: {message}"));
        }
        TestResult::passed()
    }
    QuickCheck::new()
        .tests(300)
        .quickcheck(property as fn(Expr) -> TestResult);
}

#[test]
fn p2_idempotence() {
    fn property(expr: Expr) -> bool {
        is_idempotent::<f64>(&expr) && is_idempotent::<f32>(&expr)
    }
    QuickCheck::new()
        .tests(200)
        .quickcheck(property as fn(Expr) -> bool);
}

#[test]
fn p3_hash_correctness() {
    fn property(expr: Expr) -> bool {
        hashes_consistently::<f64>(&expr) && hashes_consistently::<f32>(&expr)
    }
    QuickCheck::new()
        .tests(100)
        .quickcheck(property as fn(Expr) -> bool);
}

#[test]
fn p5_range_soundness() {
    fn property(expr: Expr) -> TestResult {
        if let Err(message) = range_is_sound::<f64>(&expr, 1e-9) {
            return TestResult::error(format!("f64: {message}"));
        }
        if let Err(message) = range_is_sound::<f32>(&expr, 1e-4) {
            return TestResult::error(format!("f32: {message}"));
        }
        TestResult::passed()
    }
    QuickCheck::new()
        .tests(300)
        .quickcheck(property as fn(Expr) -> TestResult);
}

#[test]
fn p4_canonical_order_after_rehash() {
    use crate::tree::CodeTree;
    // Build an Add with shuffled operands and confirm the invariant.
    let mut tree = CodeTree::<f64>::new_op(Opcode::Add);
    let sin = {
        let mut t = CodeTree::new_op(Opcode::Sin);
        t.add_param_move(CodeTree::new_var(0));
        t.rehash(false);
        t
    };
    tree.add_param_move(CodeTree::new_var(1));
    tree.add_param_move(sin);
    tree.add_param_move(CodeTree::new_var(0));
    tree.rehash(false);
    for pair in tree.params().windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        assert!(
            a.depth() > b.depth() || (a.depth() == b.depth() && a.hash() <= b.hash()),
            "params out of canonical order"
        );
    }
}
