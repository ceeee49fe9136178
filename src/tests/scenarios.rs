//! End-to-end scenarios over the full pipeline.

use crate::opcode::{Opcode, VAR_BEGIN};
use crate::optimizer::{FnTable, Program, optimize};

use super::interp::{Builder, run};

fn count(program: &Program<f64>, opcode: Opcode) -> usize {
    // Opcode operand words can collide with opcode values; for the opcodes
    // counted in these tests the programs carry no operand words with small
    // values (Fetch/PopNMov offsets are checked separately where relevant).
    program
        .bytecode
        .iter()
        .filter(|&&w| w == opcode as u32)
        .count()
}

fn assert_same_function(original: &Program<f64>, optimized: &Program<f64>, vars: &[&[f64]]) {
    for env in vars {
        let a = run(original, env);
        let b = run(optimized, env);
        if a.is_finite() && b.is_finite() {
            let tolerance = 1e-9 * a.abs().max(b.abs()).max(1.0);
            assert!(
                (a - b).abs() <= tolerance,
                "mismatch at {env:?}: original {a}, optimized {b}"
            );
        }
    }
}

#[test]
fn scenario_sincos_fusion() {
    // sin(x)*sin(x) + cos(x)*cos(x): one fused SinCos, each computed once.
    let program: Program<f64> = Builder::new()
        .var(0)
        .op(Opcode::Sin)
        .var(0)
        .op(Opcode::Sin)
        .op(Opcode::Mul)
        .var(0)
        .op(Opcode::Cos)
        .var(0)
        .op(Opcode::Cos)
        .op(Opcode::Mul)
        .op(Opcode::Add)
        .build();
    let optimized = optimize(&program, &FnTable::default());

    assert_eq!(count(&optimized, Opcode::SinCos), 1, "{optimized:?}");
    assert_eq!(count(&optimized, Opcode::Sin), 0);
    assert_eq!(count(&optimized, Opcode::Cos), 0);
    assert_same_function(
        &program,
        &optimized,
        &[&[0.0], &[0.5], &[-2.0], &[3.7], &[10.0]],
    );
}

#[test]
fn scenario_pow6_becomes_powi_chain() {
    // x^6: no Pow; at most 4 of {Dup, Mul, Sqr}; peak stack <= 1 + 2.
    let program: Program<f64> = Builder::new().var(0).num(6.0).op(Opcode::Pow).build();
    let optimized = optimize(&program, &FnTable::default());

    assert_eq!(count(&optimized, Opcode::Pow), 0, "{optimized:?}");
    assert!(optimized.bytecode.len() <= 1 + 4);
    for &word in &optimized.bytecode[1..] {
        assert!(
            word == Opcode::Dup as u32 || word == Opcode::Mul as u32 || word == Opcode::Sqr as u32,
            "unexpected word {word}"
        );
    }
    assert!(optimized.stack_size <= 3);
    assert_same_function(&program, &optimized, &[&[0.5], &[-1.5], &[2.0], &[3.0]]);
}

#[test]
fn scenario_pow2_of_3x() {
    // pow(2, 3*x): one Exp2 (or a Pow with immediate base 8) plus one Mul.
    let program: Program<f64> = Builder::new()
        .num(2.0)
        .num(3.0)
        .var(0)
        .op(Opcode::Mul)
        .op(Opcode::Pow)
        .build();
    let optimized = optimize(&program, &FnTable::default());

    let exp2s = count(&optimized, Opcode::Exp2);
    let pows = count(&optimized, Opcode::Pow);
    assert!(
        exp2s == 1 && pows == 0 || pows == 1 && optimized.immeds.contains(&8.0),
        "{optimized:?}"
    );
    assert_same_function(&program, &optimized, &[&[0.0], &[1.0], &[-2.0], &[2.5]]);
}

#[test]
fn scenario_abs_of_signed_product() {
    // abs(-5 * x * y) evaluates as 5 * abs(x*y).
    let program: Program<f64> = Builder::new()
        .num(-5.0)
        .var(0)
        .op(Opcode::Mul)
        .var(1)
        .op(Opcode::Mul)
        .op(Opcode::Abs)
        .build();
    let optimized = optimize(&program, &FnTable::default());

    // The minus sign is gone: the only immediate is a positive 5.
    assert_eq!(optimized.immeds, vec![5.0], "{optimized:?}");
    assert_eq!(count(&optimized, Opcode::Abs), 1);
    assert_same_function(
        &program,
        &optimized,
        &[&[1.0, 2.0], &[-1.0, 2.0], &[3.0, -4.0], &[-0.5, -0.25]],
    );
}

#[test]
fn scenario_contradictory_comparison_is_false() {
    // (x < y) & (y < x) -> constant 0.
    let program: Program<f64> = Builder::new()
        .var(0)
        .var(1)
        .op(Opcode::Less)
        .var(1)
        .var(0)
        .op(Opcode::Less)
        .op(Opcode::And)
        .build();
    let optimized = optimize(&program, &FnTable::default());

    assert_eq!(optimized.bytecode, vec![Opcode::Immed as u32]);
    assert_eq!(optimized.immeds, vec![0.0]);
}

#[test]
fn scenario_trichotomy_is_true() {
    // (a<b) | (a=b) | (a>b) -> constant 1.
    let program: Program<f64> = Builder::new()
        .var(0)
        .var(1)
        .op(Opcode::Less)
        .var(0)
        .var(1)
        .op(Opcode::Equal)
        .op(Opcode::Or)
        .var(0)
        .var(1)
        .op(Opcode::Greater)
        .op(Opcode::Or)
        .build();
    let optimized = optimize(&program, &FnTable::default());

    assert_eq!(optimized.bytecode, vec![Opcode::Immed as u32]);
    assert_eq!(optimized.immeds, vec![1.0]);
}

#[test]
fn optimization_is_idempotent() {
    let programs: [Program<f64>; 7] = [
        Builder::new().var(0).num(6.0).op(Opcode::Pow).build(),
        Builder::new()
            .var(0)
            .op(Opcode::Sin)
            .var(0)
            .op(Opcode::Sin)
            .op(Opcode::Mul)
            .var(0)
            .op(Opcode::Cos)
            .var(0)
            .op(Opcode::Cos)
            .op(Opcode::Mul)
            .op(Opcode::Add)
            .build(),
        Builder::new()
            .var(0)
            .var(1)
            .op(Opcode::Sub)
            .var(2)
            .op(Opcode::Div)
            .build(),
        Builder::new()
            .num(2.0)
            .num(3.0)
            .var(0)
            .op(Opcode::Mul)
            .op(Opcode::Pow)
            .build(),
        Builder::new()
            .var(0)
            .op(Opcode::Tan)
            .var(0)
            .op(Opcode::Tan)
            .op(Opcode::Add)
            .build(),
        Builder::new().var(0).num(0.5).op(Opcode::Pow).build(),
        Builder::new().var(0).num(2.5).op(Opcode::Pow).build(),
    ];
    let fns = FnTable::default();
    for program in programs {
        let once = optimize(&program, &fns);
        let twice = optimize(&once, &fns);
        assert_eq!(once, twice, "not idempotent for {program:?}");
    }
}

#[test]
fn division_lowered_back_to_div() {
    // (x - y) / z: the canonical Add/Mul/Pow form must not survive.
    let program: Program<f64> = Builder::new()
        .var(0)
        .var(1)
        .op(Opcode::Sub)
        .var(2)
        .op(Opcode::Div)
        .build();
    let optimized = optimize(&program, &FnTable::default());

    assert_eq!(count(&optimized, Opcode::Pow), 0, "{optimized:?}");
    assert!(count(&optimized, Opcode::Div) + count(&optimized, Opcode::RDiv) == 1);
    assert_same_function(
        &program,
        &optimized,
        &[&[1.0, 2.0, 3.0], &[5.0, -1.0, 0.5], &[0.0, 7.0, -2.0]],
    );
}

#[test]
fn sqrt_exponent_uses_sqrt_opcode() {
    let program: Program<f64> = Builder::new().var(0).num(0.5).op(Opcode::Pow).build();
    let optimized = optimize(&program, &FnTable::default());
    assert_eq!(optimized.bytecode, vec![VAR_BEGIN, Opcode::Sqrt as u32]);
}

#[test]
fn x_pow_1_5_avoids_pow() {
    let program: Program<f64> = Builder::new().var(0).num(1.5).op(Opcode::Pow).build();
    let optimized = optimize(&program, &FnTable::default());
    assert_eq!(count(&optimized, Opcode::Pow), 0, "{optimized:?}");
    assert_same_function(&program, &optimized, &[&[0.25], &[1.0], &[4.0], &[9.0]]);
}

#[test]
fn x_plus_x_becomes_dup_add() {
    let program: Program<f64> = Builder::new().var(0).var(0).op(Opcode::Add).build();
    let optimized = optimize(&program, &FnTable::default());
    assert_eq!(
        optimized.bytecode,
        vec![VAR_BEGIN, Opcode::Dup as u32, Opcode::Add as u32]
    );
}

#[test]
fn constant_expression_folds_completely() {
    // 2*3 + sin(0) -> 6
    let program: Program<f64> = Builder::new()
        .num(2.0)
        .num(3.0)
        .op(Opcode::Mul)
        .num(0.0)
        .op(Opcode::Sin)
        .op(Opcode::Add)
        .build();
    let optimized = optimize(&program, &FnTable::default());
    assert_eq!(optimized.bytecode, vec![Opcode::Immed as u32]);
    assert_eq!(optimized.immeds, vec![6.0]);
}

#[test]
fn tan_is_recreated() {
    // tan(x) + tan(x) lowers with a single Tan and a muli sequence.
    let program: Program<f64> = Builder::new()
        .var(0)
        .op(Opcode::Tan)
        .var(0)
        .op(Opcode::Tan)
        .op(Opcode::Add)
        .build();
    let optimized = optimize(&program, &FnTable::default());
    assert_eq!(count(&optimized, Opcode::Tan), 1, "{optimized:?}");
    assert_eq!(count(&optimized, Opcode::Sin), 0);
    assert_same_function(&program, &optimized, &[&[0.3], &[1.0], &[-0.7]]);
}

#[test]
fn if_branches_survive_lowering() {
    // if(x < 1, y+2, y*3)
    let program = Program {
        bytecode: vec![
            VAR_BEGIN,
            Opcode::Immed as u32,
            Opcode::Less as u32,
            Opcode::If as u32,
            11,
            2,
            VAR_BEGIN + 1,
            Opcode::Immed as u32,
            Opcode::Add as u32,
            Opcode::Jump as u32,
            14,
            3,
            VAR_BEGIN + 1,
            Opcode::Immed as u32,
            Opcode::Mul as u32,
        ],
        immeds: vec![1.0, 2.0, 3.0],
        stack_size: 3,
    };
    let optimized = optimize(&program, &FnTable::default());
    assert_same_function(
        &program,
        &optimized,
        &[&[0.0, 5.0], &[2.0, 5.0], &[1.0, -1.0], &[0.5, 0.0]],
    );
}

#[test]
fn cse_never_duplicates_extractions() {
    // (sin(x)+1) * (sin(x)+2) * (sin(x)+3): sin computed once.
    let program: Program<f64> = Builder::new()
        .var(0)
        .op(Opcode::Sin)
        .num(1.0)
        .op(Opcode::Add)
        .var(0)
        .op(Opcode::Sin)
        .num(2.0)
        .op(Opcode::Add)
        .op(Opcode::Mul)
        .var(0)
        .op(Opcode::Sin)
        .num(3.0)
        .op(Opcode::Add)
        .op(Opcode::Mul)
        .build();
    let optimized = optimize(&program, &FnTable::default());
    assert_eq!(count(&optimized, Opcode::Sin), 1, "{optimized:?}");
    assert_same_function(&program, &optimized, &[&[0.0], &[1.3], &[-2.2]]);
}

#[test]
fn stack_size_is_sufficient_everywhere() {
    // The interpreter asserts stack depth <= declared size on every step.
    let program: Program<f64> = Builder::new()
        .var(0)
        .var(1)
        .op(Opcode::Hypot)
        .var(0)
        .num(6.0)
        .op(Opcode::Pow)
        .op(Opcode::Add)
        .var(1)
        .op(Opcode::Exp)
        .op(Opcode::Mul)
        .build();
    let optimized = optimize(&program, &FnTable::default());
    for env in [[1.0, 2.0], [-3.0, 0.5], [0.1, -0.1]] {
        let _ = run(&optimized, &env);
    }
    assert_same_function(&program, &optimized, &[&[1.0, 2.0], &[-3.0, 0.5]]);
}
