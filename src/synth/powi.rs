//! Integer-exponent and integer-factor sequence assembly.
//!
//! `x^k` for integer `k` is emitted as a dup-and-multiply schedule planned
//! with a 256-entry subdivision table and a factor cache that remembers
//! where each intermediate power lives on the stack, so common subfactors
//! are computed once. The same machinery, parameterized with `Add`/`Sub`
//! opcodes, expands integer multiplication (`k*x`) into add chains.

use rustc_hash::FxHashMap;

use crate::opcode::Opcode;
use crate::scalar::Scalar;

use super::ByteCodeSynth;

/// Maximum bytecode growth accepted for an integer-exponent expansion;
/// beyond it the lowerer falls back to a plain `Pow`.
pub(crate) const MAX_POWI_BYTECODE_LENGTH: usize = 15;
/// Analogous budget for integer-coefficient expansion of `Mul`.
pub(crate) const MAX_MULI_BYTECODE_LENGTH: usize = 3;

const POWI_TABLE_SIZE: usize = 256;
const POWI_WINDOW_SIZE: u32 = 3;
const POWI_CACHE_SIZE: usize = 256;

/// For each exponent 1..=255, the "half" to split by: a window of up to
/// 3 bits at a time, tuned for stack usage.
#[rustfmt::skip]
pub(crate) static POWI_TABLE: [i16; POWI_TABLE_SIZE] = [
      0,   1,   1,   1,   2,   1,   3,   1, /*   0 -   7 */
      4,   1,   5,   1,   6,   1,   7,   5, /*   8 -  15 */
      8,   1,   9,   1,  10,   1,  11,   1, /*  16 -  23 */
     12,   5,  13,   9,  14,   1,  15,   1, /*  24 -  31 */
     16,   1,  17,   1,  18,   1,  19,  13, /*  32 -  39 */
     20,   1,  21,   1,  22,   9,   1,   2, /*  40 -  47 */
     24,   1,  25,  17,  26,   1,  27,  11, /*  48 -  55 */
     28,  19,  29,   8,  30,   1,  31,  21, /*  56 -  63 */
     32,   1,  33,   1,  34,   1,  35,   1, /*  64 -  71 */
     36,   1,  37,  25,  38,   1,  39,   1, /*  72 -  79 */
     40,   9,  41,   1,  42,  17,   1,  29, /*  80 -  87 */
     44,   1,  45,   1,  46,  31,  47,  19, /*  88 -  95 */
     48,   1,  49,  33,  50,   1,  51,   1, /*  96 - 103 */
     52,  35,  53,   8,  54,   1,  55,  37, /* 104 - 111 */
     56,   1,  57,  16,  58,  13,  59,  17, /* 112 - 119 */
     60,   1,  61,  41,  62,  25,  63,   1, /* 120 - 127 */
     64,   1,  65,   1,  66,   1,  67,  45, /* 128 - 135 */
     68,   1,  69,   1,  70,   1,  71,   8, /* 136 - 143 */
     72,   1,  73,  49,  74,   1,  75,   1, /* 144 - 151 */
     76,  17,   1,  31,  78,   1,  79,  53, /* 152 - 159 */
     80,   1,  81,   1,  82,  33,   1,   2, /* 160 - 167 */
     84,   1,  85,  19,  86,   8,  87,  35, /* 168 - 175 */
     88,   1,  89,   1,  90,   1,  91,  61, /* 176 - 183 */
     92,  37,  93,  17,  94,  21,  95,   1, /* 184 - 191 */
     96,   1,  97,  65,  98,   1,  99,   1, /* 192 - 199 */
    100,  67, 101,   8, 102,  41, 103,  69, /* 200 - 207 */
    104,   1, 105,  16, 106,  71, 107,   1, /* 208 - 215 */
    108,   1, 109,  73, 110,  17, 111,   1, /* 216 - 223 */
    112,  45, 113,  32, 114,   1, 115,  33, /* 224 - 231 */
    116,   1, 117,   1, 118,   1, 119,   1, /* 232 - 239 */
    120,   1, 121,  81, 122,  49, 123,  19, /* 240 - 247 */
    124,   1, 125,   1, 126,   1, 127,  85, /* 248 - 255 */
];

/// Opcode roles for one sequence family.
pub(crate) struct SequenceOp {
    /// Value of the empty sequence (`x^0` = 1, `0*x` = 0).
    pub(crate) base_value: f64,
    pub(crate) op_flip: Opcode,
    pub(crate) op_normal: Opcode,
    pub(crate) op_normal_flip: Opcode,
    pub(crate) op_inverse: Opcode,
    pub(crate) op_inverse_flip: Opcode,
}

/// Multiplication implemented with adds.
pub(crate) const ADD_SEQUENCE: SequenceOp = SequenceOp {
    base_value: 0.0,
    op_flip: Opcode::Neg,
    op_normal: Opcode::Add,
    op_normal_flip: Opcode::Add,
    op_inverse: Opcode::Sub,
    op_inverse_flip: Opcode::RSub,
};

/// Exponentiation implemented with muls.
pub(crate) const MUL_SEQUENCE: SequenceOp = SequenceOp {
    base_value: 1.0,
    op_flip: Opcode::Inv,
    op_normal: Opcode::Mul,
    op_normal_flip: Opcode::Mul,
    op_inverse: Opcode::Div,
    op_inverse_flip: Opcode::RDiv,
};

fn subdivision_half(value: i64) -> i64 {
    if value < POWI_TABLE_SIZE as i64 {
        i64::from(POWI_TABLE[value as usize])
    } else if value & 1 != 0 {
        value & ((1 << POWI_WINDOW_SIZE) - 1)
    } else {
        value / 2
    }
}

/// Stack locations of intermediate powers, plus remaining demand per power.
struct PowiCache {
    position: [i32; POWI_CACHE_SIZE],
    needed: [i32; POWI_CACHE_SIZE],
}

impl PowiCache {
    fn new() -> Self {
        let mut cache = PowiCache {
            position: [-1; POWI_CACHE_SIZE],
            needed: [0; POWI_CACHE_SIZE],
        };
        // x^1 is already in hand when assembly starts.
        cache.position[1] = 0;
        cache
    }

    fn plan_add(&mut self, value: i64, count: i32) -> bool {
        if !(0..POWI_CACHE_SIZE as i64).contains(&value) {
            return false;
        }
        self.needed[value as usize] += count;
        self.position[value as usize] >= 0
    }

    fn plan_has(&mut self, value: i64) {
        if (0..POWI_CACHE_SIZE as i64).contains(&value) {
            self.position[value as usize] = 0;
        }
    }

    fn start(&mut self, value1_pos: usize) {
        self.position = [-1; POWI_CACHE_SIZE];
        self.remember(1, value1_pos);
    }

    fn find(&self, value: i64) -> Option<usize> {
        if (0..POWI_CACHE_SIZE as i64).contains(&value) && self.position[value as usize] >= 0 {
            #[allow(clippy::cast_sign_loss)]
            return Some(self.position[value as usize] as usize);
        }
        None
    }

    fn remember(&mut self, value: i64, stackpos: usize) {
        if (0..POWI_CACHE_SIZE as i64).contains(&value) {
            self.position[value as usize] =
                i32::try_from(stackpos).expect("stack position fits i32");
        }
    }

    fn use_get_needed(&mut self, value: i64) -> i32 {
        if (0..POWI_CACHE_SIZE as i64).contains(&value) {
            self.needed[value as usize] -= 1;
            return self.needed[value as usize];
        }
        0
    }
}

/// Decide which factors will be needed more than once.
fn plan_n_times_cache(value: i64, cache: &mut PowiCache, need_count: i32) {
    if value < 1 {
        return;
    }
    if cache.plan_add(value, need_count) {
        return;
    }
    let mut half = subdivision_half(value);
    let mut otherhalf = value - half;
    if half > otherhalf || half < 0 {
        std::mem::swap(&mut half, &mut otherhalf);
    }
    if half == otherhalf {
        plan_n_times_cache(half, cache, 2);
    } else {
        plan_n_times_cache(half, cache, 1);
        plan_n_times_cache(otherhalf.abs(), cache, 1);
    }
    cache.plan_has(value);
}

fn assemble_subdivide<S: Scalar>(
    value: i64,
    cache: &mut PowiCache,
    sequencing: &SequenceOp,
    synth: &mut ByteCodeSynth<S>,
) -> usize {
    if let Some(pos) = cache.find(value) {
        return pos;
    }
    let mut half = subdivision_half(value);
    let mut otherhalf = value - half;
    if half > otherhalf || half < 0 {
        std::mem::swap(&mut half, &mut otherhalf);
    }

    if half == otherhalf {
        let half_pos = assemble_subdivide(half, cache, sequencing, synth);
        // Self-cumulate the subdivided result.
        subdivide_combine(
            half_pos,
            half,
            half_pos,
            half,
            cache,
            sequencing.op_normal,
            sequencing.op_normal_flip,
            synth,
        );
    } else {
        let part1 = half;
        let part2 = otherhalf.abs();
        let part1_pos = assemble_subdivide(part1, cache, sequencing, synth);
        let part2_pos = assemble_subdivide(part2, cache, sequencing, synth);
        let (op, op_flip) = if otherhalf > 0 {
            (sequencing.op_normal, sequencing.op_normal_flip)
        } else {
            (sequencing.op_inverse, sequencing.op_inverse_flip)
        };
        subdivide_combine(part1_pos, part1, part2_pos, part2, cache, op, op_flip, synth);
    }
    let stackpos = synth.stack_top() - 1;
    cache.remember(value, stackpos);
    stackpos
}

/// Combine two planned powers, duplicating whichever operands are still
/// needed later. The scenarios mirror the possible stack layouts; the goal
/// is to end with `a ⊕ b` on top while preserving cached values.
#[allow(clippy::too_many_arguments)]
fn subdivide_combine<S: Scalar>(
    mut apos: usize,
    aval: i64,
    mut bpos: usize,
    bval: i64,
    cache: &mut PowiCache,
    cumulation_opcode: Opcode,
    cumulation_opcode_flip: Opcode,
    synth: &mut ByteCodeSynth<S>,
) {
    let a_needed = cache.use_get_needed(aval);
    let b_needed = cache.use_get_needed(bval);
    let mut flipped = false;

    macro_rules! dup_both {
        () => {{
            if apos < bpos {
                std::mem::swap(&mut apos, &mut bpos);
                flipped = !flipped;
            }
            synth.do_dup(apos);
            let second = if apos == bpos {
                synth.stack_top() - 1
            } else {
                bpos
            };
            synth.do_dup(second);
        }};
    }

    if a_needed > 0 {
        if b_needed > 0 {
            // Both must be preserved: push the higher-addressed first to
            // increase the odds of a plain Dup.
            dup_both!();
        } else if bpos != synth.stack_top() - 1 {
            dup_both!();
        } else {
            synth.do_dup(apos);
            flipped = !flipped;
        }
    } else if b_needed > 0 {
        if apos != synth.stack_top() - 1 {
            dup_both!();
        } else {
            synth.do_dup(bpos);
        }
    } else {
        // Both can be trampled over.
        let top = synth.stack_top() - 1;
        if apos == bpos && apos == top {
            synth.do_dup(apos);
        } else if apos == top && bpos == synth.stack_top() - 2 {
            flipped = !flipped;
        } else if apos == synth.stack_top() - 2 && bpos == top {
            // operands already in place
        } else if apos == top {
            synth.do_dup(bpos);
        } else if bpos == top {
            synth.do_dup(apos);
            flipped = !flipped;
        } else {
            dup_both!();
        }
    }
    synth.add_operation(
        if flipped {
            cumulation_opcode_flip
        } else {
            cumulation_opcode
        },
        2,
        1,
    );
}

/// Emit the sequence that raises (or multiplies) the stack top by `count`.
pub(crate) fn assemble_sequence<S: Scalar>(
    count: i64,
    sequencing: &SequenceOp,
    synth: &mut ByteCodeSynth<S>,
) {
    if count == 0 {
        synth.push_immed(S::from_f64(sequencing.base_value).unwrap_or_else(S::zero));
        return;
    }
    let mut count = count;
    let needs_flip = count < 0;
    if needs_flip {
        count = -count;
    }
    if count > 1 {
        let mut cache = PowiCache::new();
        plan_n_times_cache(count, &mut cache, 1);

        let stacktop_desired = synth.stack_top();
        cache.start(synth.stack_top() - 1);

        let res_stackpos = assemble_subdivide(count, &mut cache, sequencing, synth);

        let n_excess = synth.stack_top() - stacktop_desired;
        if n_excess > 0 || res_stackpos != stacktop_desired - 1 {
            // Remove cached values left below the result.
            synth.do_pop_n_mov(stacktop_desired - 1, res_stackpos);
        }
    }
    if needs_flip {
        synth.add_operation(sequencing.op_flip, 1, 1);
    }
}

/// Cost of computing `x^k` by square-and-multiply, with fixed per-opcode
/// costs: sqr 6, dup+mul 7, divide 22. Pure in `k`; memoized by the caller.
pub(crate) fn powi_factor_cost(exponent: i64, memo: &mut FxHashMap<i64, i64>) -> i64 {
    if exponent < 0 {
        return 22 + powi_factor_cost(-exponent, memo);
    }
    if let Some(&cost) = memo.get(&exponent) {
        return cost;
    }
    let mut cost = 0;
    let mut v = exponent;
    while v > 1 {
        if v & 1 == 0 {
            v /= 2;
            cost += 6; // sqr
        } else {
            v -= 1;
            cost += 7; // dup+mul
        }
    }
    memo.insert(exponent, cost);
    cost
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Evaluate an emitted mul-sequence over a one-variable program prefix.
    fn run_powi(value: f64, exponent: i64) -> (f64, usize) {
        let mut synth = ByteCodeSynth::<f64>::new();
        synth.push_var(0);
        assemble_sequence(exponent, &MUL_SEQUENCE, &mut synth);
        let (bytecode, immeds, stack_max) = synth.pull();

        let mut stack = vec![value];
        let mut dp = 0;
        let mut ip = 0;
        while ip < bytecode.len() {
            let w = bytecode[ip];
            if w >= crate::opcode::VAR_BEGIN {
                stack.push(value);
                ip += 1;
                continue;
            }
            match Opcode::from_u32(w).unwrap() {
                Opcode::Immed => {
                    stack.push(immeds[dp]);
                    dp += 1;
                }
                Opcode::Dup => stack.push(*stack.last().unwrap()),
                Opcode::Fetch => {
                    ip += 1;
                    stack.push(stack[bytecode[ip] as usize]);
                }
                Opcode::PopNMov => {
                    let target = bytecode[ip + 1] as usize;
                    let src = bytecode[ip + 2] as usize;
                    ip += 2;
                    stack[target] = stack[src];
                    stack.truncate(target + 1);
                }
                Opcode::Sqr => {
                    let a = stack.pop().unwrap();
                    stack.push(a * a);
                }
                Opcode::Mul => {
                    let b = stack.pop().unwrap();
                    let a = stack.pop().unwrap();
                    stack.push(a * b);
                }
                Opcode::Div => {
                    let b = stack.pop().unwrap();
                    let a = stack.pop().unwrap();
                    stack.push(a / b);
                }
                Opcode::RDiv => {
                    let b = stack.pop().unwrap();
                    let a = stack.pop().unwrap();
                    stack.push(b / a);
                }
                Opcode::Inv => {
                    let a = stack.pop().unwrap();
                    stack.push(1.0 / a);
                }
                other => panic!("unexpected opcode in powi sequence: {}", other.name()),
            }
            assert!(stack.len() <= stack_max, "peak stack under-reported");
            ip += 1;
        }
        assert_eq!(stack.len(), 1, "sequence must leave exactly the result");
        (stack[0], stack_max)
    }

    #[test]
    fn small_exponents_are_exact() {
        for k in 1..=40_i64 {
            let (got, _) = run_powi(1.5, k);
            let want = 1.5_f64.powi(i32::try_from(k).unwrap());
            assert!(
                (got - want).abs() <= want.abs() * 1e-12,
                "x^{k}: got {got}, want {want}"
            );
        }
    }

    #[test]
    fn negative_exponents_invert() {
        let (got, _) = run_powi(2.0, -3);
        assert!((got - 0.125).abs() < 1e-15);
    }

    #[test]
    fn x_pow_6_is_short_and_shallow() {
        let mut synth = ByteCodeSynth::<f64>::new();
        synth.push_var(0);
        let before = synth.bytecode_size();
        assemble_sequence(6, &MUL_SEQUENCE, &mut synth);
        let grown = synth.bytecode_size() - before;
        assert!(grown <= 4, "x^6 took {grown} words");
        let (_, _, stack_max) = synth.pull();
        assert!(stack_max <= 3, "x^6 peak stack {stack_max}");
    }

    #[test]
    fn large_exponent_exact() {
        let (got, _) = run_powi(1.01, 255);
        let want = 1.01_f64.powi(255);
        assert!((got - want).abs() <= want * 1e-12);
    }

    #[test]
    fn cost_function_basics() {
        let mut memo = FxHashMap::default();
        assert_eq!(powi_factor_cost(1, &mut memo), 0);
        assert_eq!(powi_factor_cost(2, &mut memo), 6);
        assert_eq!(powi_factor_cost(3, &mut memo), 13);
        assert_eq!(powi_factor_cost(-2, &mut memo), 28);
    }
}
