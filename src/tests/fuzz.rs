//! Randomized end-to-end runs over polynomial-shaped programs.
//!
//! Structure: sums of many product terms over a handful of variables, the
//! shape that exercises the Add/Mul grouping rewriters, the muli/powi
//! lowering and the clone cache hardest. Coefficients and variable values
//! are small integers, so every intermediate value is exact in the scalar
//! and a mismatch is a logic bug rather than float noise. Failures report
//! the seed.

use rand::{RngExt, SeedableRng, rngs::StdRng};

use crate::opcode::Opcode;
use crate::optimizer::{FnTable, Program, optimize};

use super::interp::{Builder, run};

fn random_std_rng_with_seed() -> (StdRng, u64) {
    let seed: u64 = rand::random();
    (StdRng::seed_from_u64(seed), seed)
}

/// Sum-of-products shape: (coefficient, variable index per factor).
type Poly = Vec<(i32, Vec<u32>)>;

fn generate_poly(rng: &mut StdRng, num_terms: usize, num_vars: u32) -> Poly {
    let mut terms = Vec::with_capacity(num_terms);
    for _ in 0..num_terms {
        // Small nonzero integer coefficient.
        let mut coeff = 0;
        while coeff == 0 {
            coeff = rng.random_range(-10..=10);
        }
        let num_factors = rng.random_range(1..=4);
        let factors = (0..num_factors)
            .map(|_| rng.random_range(0..num_vars))
            .collect();
        terms.push((coeff, factors));
    }
    terms
}

/// Emit the polynomial in the postfix order the runtime parser would:
/// each term as coefficient times its factors, terms chained with Add.
fn emit_poly(poly: &Poly, mut builder: Builder<f64>) -> Builder<f64> {
    for (i, (coeff, factors)) in poly.iter().enumerate() {
        builder = builder.num(f64::from(*coeff));
        for &var in factors {
            builder = builder.var(var).op(Opcode::Mul);
        }
        if i > 0 {
            builder = builder.op(Opcode::Add);
        }
    }
    builder
}

/// Variable values 1, 2, 3, ... to avoid zero cancellations hiding bugs.
fn eval_env(num_vars: u32) -> Vec<f64> {
    (0..num_vars).map(|i| f64::from(i + 1)).collect()
}

#[test]
fn fuzz_polynomial_programs() {
    for _ in 0..25 {
        let (mut rng, seed) = random_std_rng_with_seed();

        // Progressive testing: start small, go bigger.
        for (num_terms, num_vars) in [(10, 3), (30, 5)] {
            let poly = generate_poly(&mut rng, num_terms, num_vars);
            let program: Program<f64> = emit_poly(&poly, Builder::new()).build();
            let optimized = optimize(&program, &FnTable::default());

            let env = eval_env(num_vars);
            let raw = run(&program, &env);
            let opt = run(&optimized, &env);
            let diff = (raw - opt).abs();
            assert!(
                diff <= 1e-9 * raw.abs().max(1.0),
                "Mismatch! Seed: {seed}, terms: {num_terms}, vars: {num_vars}\nRaw: {raw}\nOptimized: {opt}\nDiff: {diff}"
            );
        }
    }
}

#[test]
fn fuzz_cancellation_patterns() {
    for _ in 0..25 {
        let (mut rng, seed) = random_std_rng_with_seed();

        let p = generate_poly(&mut rng, 20, 4);
        let q = generate_poly(&mut rng, 5, 3);

        // (p + q) - p: heavy term overlap for the grouping rewriters.
        let mut builder = emit_poly(&p, Builder::new());
        builder = emit_poly(&q, builder).op(Opcode::Add);
        builder = emit_poly(&p, builder).op(Opcode::Sub);
        let program: Program<f64> = builder.build();

        let optimized = optimize(&program, &FnTable::default());

        let env = eval_env(4);
        let expected = run(&emit_poly(&q, Builder::new()).build(), &env);
        let actual = run(&optimized, &env);
        let diff = (expected - actual).abs();
        assert!(
            diff <= 1e-9 * expected.abs().max(1.0),
            "Mismatch! Seed: {seed}\nExpected: {expected}\nActual: {actual}\nDiff: {diff}"
        );
    }
}
