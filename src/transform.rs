//! Pre-lowering denormalization.
//!
//! During lifting everything was normalized into `Add`/`Mul`/`Pow` to keep
//! the rewrite rules simple. That form lowers badly: it overuses
//! `Pow(x, -1)` and `Mul(x, -1)`. This pass walks the finished tree and
//! recreates `Sub`/`RSub`/`Neg`/`Div`/`RDiv`/`Inv`/`Log2by` where they lower
//! better, and decomposes `Pow` with fractional exponents into
//! sqrt/cbrt/powi chains chosen by a cost search.

use num_traits::Float;
use rustc_hash::FxHashMap;

use crate::opcode::Opcode;
use crate::scalar::Scalar;
use crate::synth::powi::{
    MAX_POWI_BYTECODE_LENGTH, MUL_SEQUENCE, assemble_sequence, powi_factor_cost,
};
use crate::synth::ByteCodeSynth;
use crate::trace::trace;
use crate::tree::CodeTree;

/// Can `x^immed` be emitted as a mul sequence within the powi budget?
pub(crate) fn is_optimizable_using_powi<S: Scalar>(immed: i64, penalty: usize) -> bool {
    let mut synth = ByteCodeSynth::<S>::new();
    synth.push_var(0);
    let size_before = synth.bytecode_size();
    assemble_sequence(immed, &MUL_SEQUENCE, &mut synth);
    let grow = synth.bytecode_size() - size_before;
    grow < MAX_POWI_BYTECODE_LENGTH.saturating_sub(penalty)
}

const MAX_SEP: usize = 4;
const MAX_OP: usize = 5;

/// `1 / (2^s · 3^c)` for `c` in 0..=3 and `s` in 0..=4.
fn root_power<S: Scalar>(index: usize) -> S {
    let c = index / MAX_OP;
    let s = index % MAX_OP;
    let mut denom = 1i64;
    for _ in 0..s {
        denom *= 2;
    }
    for _ in 0..c {
        denom *= 3;
    }
    S::one() / S::from_long(denom)
}

#[derive(Debug, Default)]
struct PowiResult {
    n_int_sqrt: i32,
    n_int_cbrt: i32,
    /// Separation stages; each entry encodes `n_sqrt + MAX_OP * n_cbrt`.
    sep_list: [usize; MAX_SEP],
    /// 0 means "unoptimizable".
    resulting_exponent: i64,
}

fn makes_integer<S: Scalar>(value: S, factor: i64) -> bool {
    (value * S::from_long(factor)).is_long_integer()
}

fn multiply_and_make_long<S: Scalar>(value: S, factor: i64) -> i64 {
    (value * S::from_long(factor)).as_long()
}

/// The integer (product of 2s and 3s only) that `value` must be multiplied
/// with to become an integer; 0 when none fits.
fn find_integer_factor<S: Scalar>(value: S, cbrt_is_slow: bool) -> i64 {
    let mut factor: i64 = 2 * 2 * 2 * 2;
    if !cbrt_is_slow {
        factor *= 3 * 3 * 3;
    }
    let mut result = 0;
    if makes_integer(value, factor) {
        result = factor;
        while factor % 2 == 0 && makes_integer(value, factor / 2) {
            factor /= 2;
            result = factor;
        }
        while factor % 3 == 0 && makes_integer(value, factor / 3) {
            factor /= 3;
            result = factor;
        }
    }
    if cbrt_is_slow && result == 0 && makes_integer(value, 3) {
        // A single cbrt opcode is still allowed.
        return 3;
    }
    result
}

fn evaluate_factor_cost(mut factor: i64, s: i32, c: i32, nmuls: i32, cbrt_cost: i64) -> i64 {
    const SQRT_COST: i64 = 6;
    let mut result = i64::from(s) * SQRT_COST + i64::from(c) * cbrt_cost;
    while factor % 2 == 0 {
        factor /= 2;
        result += SQRT_COST;
    }
    while factor % 3 == 0 {
        factor /= 3;
        result += cbrt_cost;
    }
    result + i64::from(nmuls)
}

/// Search for the cheapest decomposition of a fractional exponent into
/// root chains and an integer power.
fn create_powi_result<S: Scalar>(exponent: S, cbrt_is_slow: bool) -> PowiResult {
    let cbrt_cost: i64 = if cbrt_is_slow { 25 } else { 8 };
    let mut memo = FxHashMap::default();
    let mut result = PowiResult::default();

    let mut best_factor = find_integer_factor(exponent, cbrt_is_slow);
    if best_factor == 0 {
        return result; // unoptimizable
    }
    result.resulting_exponent = multiply_and_make_long(exponent, best_factor);
    let mut best_cost = evaluate_factor_cost(best_factor, 0, 0, 0, cbrt_cost)
        + powi_factor_cost(result.resulting_exponent, &mut memo);

    let mut exponent = exponent;
    let mut s_count = 0;
    let mut c_count = 0;
    let mut mul_count = 0;

    for n_s in 0..MAX_SEP {
        let mut best_selected_sep = 0usize;
        let mut best_sep_cost = best_cost;
        let mut best_sep_factor = best_factor;
        let max_s = if cbrt_is_slow { MAX_OP } else { MAX_OP * 4 };
        for s in 1..max_s {
            let n_sqrt = (s % MAX_OP) as i32;
            let n_cbrt = (s / MAX_OP) as i32;
            if n_sqrt + n_cbrt > 4 {
                continue;
            }
            let changed_exponent = exponent - root_power::<S>(s);
            let factor = find_integer_factor(changed_exponent, cbrt_is_slow);
            if factor != 0 {
                let int_exponent = multiply_and_make_long(changed_exponent, factor);
                let cost = evaluate_factor_cost(
                    factor,
                    s_count + n_sqrt,
                    c_count + n_cbrt,
                    mul_count + 1,
                    cbrt_cost,
                ) + powi_factor_cost(int_exponent, &mut memo);
                if cost < best_sep_cost {
                    best_selected_sep = s;
                    best_sep_factor = factor;
                    best_sep_cost = cost;
                }
            }
        }
        if best_selected_sep == 0 {
            break;
        }
        result.sep_list[n_s] = best_selected_sep;
        exponent = exponent - root_power::<S>(best_selected_sep);
        s_count += (best_selected_sep % MAX_OP) as i32;
        c_count += (best_selected_sep / MAX_OP) as i32;
        best_cost = best_sep_cost;
        best_factor = best_sep_factor;
        mul_count += 1;
    }

    result.resulting_exponent = multiply_and_make_long(exponent, best_factor);
    while best_factor % 2 == 0 {
        result.n_int_sqrt += 1;
        best_factor /= 2;
    }
    while best_factor % 3 == 0 {
        result.n_int_cbrt += 1;
        best_factor /= 3;
    }
    result
}

/// Wrap `tree` in `cbrt_count` cbrts and `sqrt_count` sqrts; an inverted
/// chain turns one sqrt into rsqrt (or prepends a bare `Inv`).
fn change_into_root_chain<S: Scalar>(
    tree: &mut CodeTree<S>,
    mut inverted: bool,
    sqrt_count: i32,
    cbrt_count: i32,
) {
    for _ in 0..cbrt_count {
        let mut tmp = CodeTree::new_op(Opcode::Cbrt);
        tmp.add_param_move(std::mem::take(tree));
        tmp.rehash(true);
        *tree = tmp;
    }
    for _ in 0..sqrt_count {
        let opcode = if inverted {
            inverted = false;
            Opcode::RSqrt
        } else {
            Opcode::Sqrt
        };
        let mut tmp = CodeTree::new_op(opcode);
        tmp.add_param_move(std::mem::take(tree));
        tmp.rehash(true);
        *tree = tmp;
    }
    if inverted {
        let mut tmp = CodeTree::new_op(Opcode::Inv);
        tmp.add_param_move(std::mem::take(tree));
        tmp.rehash(false);
        *tree = tmp;
    }
}

/// One recreation pass. Returns true when anything changed; the caller
/// repairs hashes and re-runs to fixpoint.
#[allow(clippy::too_many_lines)]
pub(crate) fn recreate_inversions_and_negations<S: Scalar>(
    tree: &mut CodeTree<S>,
    cbrt_is_slow: bool,
) -> bool {
    let mut changed = false;
    for a in 0..tree.param_count() {
        let mut child = tree.param(a).clone();
        if recreate_inversions_and_negations(&mut child, cbrt_is_slow) {
            tree.set_param_move(a, child);
            changed = true;
        }
    }
    if changed {
        tree.mark_incompletely_hashed();
        return true;
    }

    match tree.opcode() {
        Opcode::Mul => {
            let mut div_params: Vec<CodeTree<S>> = Vec::new();
            let mut found_log2: Option<CodeTree<S>> = None;
            let mut found_log2by: Option<CodeTree<S>> = None;

            // log2(x)^e * c  ->  log2by(x, c^(1/e))^e, better at runtime
            // than log2by(x, 1)^e * c.
            let mut log2_exponent = None;
            for a in (0..tree.param_count()).rev() {
                let powgroup = tree.param(a);
                if powgroup.opcode() == Opcode::Pow
                    && powgroup.param(0).opcode() == Opcode::Log2
                    && powgroup.param(1).is_immed()
                {
                    log2_exponent = Some(powgroup.param(1).immed());
                    break;
                }
            }
            if let Some(exponent) = log2_exponent {
                let mut immeds = S::one();
                let mut had_immeds = false;
                for a in (0..tree.param_count()).rev() {
                    if tree.param(a).is_immed() {
                        immeds = immeds * tree.param(a).immed();
                        had_immeds = true;
                        tree.del_param(a);
                    }
                }
                if had_immeds {
                    for a in (0..tree.param_count()).rev() {
                        let powgroup = tree.param(a);
                        if powgroup.opcode() == Opcode::Pow
                            && powgroup.param(0).opcode() == Opcode::Log2
                            && powgroup.param(1).is_immed()
                        {
                            let mut powgroup = tree.param(a).get_unique_ref();
                            let mut log2 = powgroup.param(0).get_unique_ref();
                            log2.set_opcode(Opcode::Log2by);
                            log2.add_param_move(CodeTree::new_immed(
                                immeds.powf(S::one() / exponent),
                            ));
                            log2.rehash(false);
                            powgroup.set_param_move(0, log2);
                            powgroup.rehash(false);
                            tree.set_param_move(a, powgroup);
                            changed = true;
                            break;
                        }
                    }
                }
            }

            for a in (0..tree.param_count()).rev() {
                let powgroup = tree.param(a).clone();
                if powgroup.opcode() == Opcode::Pow && powgroup.param(1).is_immed() {
                    let exponent = powgroup.param(1).immed();
                    if exponent.fp_equal(-S::one()) {
                        div_params.push(powgroup.param(0).clone());
                        tree.del_param(a);
                    } else if exponent < S::zero() && exponent.is_integer_value() {
                        let mut edited = CodeTree::new_op(Opcode::Pow);
                        edited.add_param(powgroup.param(0));
                        edited.add_param_move(CodeTree::new_immed(-exponent));
                        edited.rehash(false);
                        div_params.push(edited);
                        tree.del_param(a);
                    }
                } else if powgroup.opcode() == Opcode::Log2 && found_log2.is_none() {
                    found_log2 = Some(powgroup.param(0).clone());
                    tree.del_param(a);
                } else if powgroup.opcode() == Opcode::Log2by && found_log2by.is_none() {
                    found_log2by = Some(powgroup);
                    tree.del_param(a);
                }
            }

            if !div_params.is_empty() {
                changed = true;
                let mut divgroup = CodeTree::new_op(Opcode::Mul);
                divgroup.set_params_move(div_params);
                divgroup.rehash(true); // reduces to the single operand if alone
                let mut mulgroup = CodeTree::new_op(Opcode::Mul);
                mulgroup.set_params_move(tree.take_params());
                mulgroup.rehash(true); // reduces to 1.0 if nothing remained
                if mulgroup.is_immed() && mulgroup.immed().fp_equal(S::one()) {
                    tree.set_opcode(Opcode::Inv);
                    tree.add_param_move(divgroup);
                } else if mulgroup.depth() >= divgroup.depth() {
                    tree.set_opcode(Opcode::Div);
                    tree.add_param_move(mulgroup);
                    tree.add_param_move(divgroup);
                } else {
                    tree.set_opcode(Opcode::RDiv);
                    tree.add_param_move(divgroup);
                    tree.add_param_move(mulgroup);
                }
            }
            if let Some(log2_arg) = found_log2 {
                changed = true;
                let mut mulgroup = CodeTree::new_op(tree.opcode());
                mulgroup.set_params_move(tree.take_params());
                mulgroup.rehash(true);
                while recreate_inversions_and_negations(&mut mulgroup, cbrt_is_slow) {
                    mulgroup.fix_incomplete_hashes();
                }
                tree.set_opcode(Opcode::Log2by);
                tree.add_param_move(log2_arg);
                tree.add_param_move(mulgroup);
            }
            if let Some(log2by) = found_log2by {
                changed = true;
                let mut mulgroup = CodeTree::new_op(Opcode::Mul);
                mulgroup.add_param(log2by.param(1));
                mulgroup.add_params_move(tree.take_params());
                mulgroup.rehash(true);
                while recreate_inversions_and_negations(&mut mulgroup, cbrt_is_slow) {
                    mulgroup.fix_incomplete_hashes();
                }
                tree.set_opcode(Opcode::Log2by);
                tree.add_param(log2by.param(0));
                tree.add_param_move(mulgroup);
            }
        }

        Opcode::Add => {
            let mut sub_params: Vec<CodeTree<S>> = Vec::new();
            for a in (0..tree.param_count()).rev() {
                match tree.param(a).opcode() {
                    Opcode::Mul => {
                        let mut mulgroup = tree.param(a).get_unique_ref();
                        let mut is_signed = false;
                        for b in (0..mulgroup.param_count()).rev() {
                            if !mulgroup.param(b).is_immed() {
                                continue;
                            }
                            let factor = mulgroup.param(b).immed();
                            if factor.fp_equal(-S::one()) {
                                mulgroup.del_param(b);
                                is_signed = !is_signed;
                            } else if factor.fp_equal(-S::from_long(2)) {
                                mulgroup.del_param(b);
                                mulgroup.add_param_move(CodeTree::new_immed(S::from_long(2)));
                                is_signed = !is_signed;
                            }
                        }
                        if is_signed {
                            mulgroup.rehash(true);
                            sub_params.push(mulgroup);
                            tree.del_param(a);
                        }
                    }
                    Opcode::Div => {
                        if tree.param(a).param(0).is_immed()
                            && tree.param(a).param(0).immed().fp_equal(-S::one())
                        {
                            let mut divgroup = tree.param(a).get_unique_ref();
                            divgroup.del_param(0);
                            divgroup.set_opcode(Opcode::Inv);
                            divgroup.rehash(false);
                            sub_params.push(divgroup);
                            tree.del_param(a);
                        }
                    }
                    Opcode::RDiv => {
                        if tree.param(a).param(1).is_immed()
                            && tree.param(a).param(1).immed().fp_equal(-S::one())
                        {
                            let mut divgroup = tree.param(a).get_unique_ref();
                            divgroup.del_param(1);
                            divgroup.set_opcode(Opcode::Inv);
                            divgroup.rehash(false);
                            sub_params.push(divgroup);
                            tree.del_param(a);
                        }
                    }
                    _ => {}
                }
            }
            if !sub_params.is_empty() {
                changed = true;
                let mut subgroup = CodeTree::new_op(Opcode::Add);
                subgroup.set_params_move(sub_params);
                subgroup.rehash(true); // reduces to the single operand if alone
                let mut addgroup = CodeTree::new_op(Opcode::Add);
                addgroup.set_params_move(tree.take_params());
                addgroup.rehash(true); // reduces to 0.0 if nothing remained
                if addgroup.is_immed() && addgroup.immed().fp_equal(S::zero()) {
                    tree.set_opcode(Opcode::Neg);
                    tree.add_param_move(subgroup);
                } else if addgroup.depth() == 1 {
                    // 5 - (x+y+z) as rsub(x+y+z, 5): lowest stack usage.
                    tree.set_opcode(Opcode::RSub);
                    tree.add_param_move(subgroup);
                    tree.add_param_move(addgroup);
                } else if subgroup.opcode() == Opcode::Add {
                    // a+b-(x+y+z) as a+b-x-y-z: a long chain of subs costs
                    // the same as adds but keeps the stack flat.
                    tree.set_opcode(Opcode::Sub);
                    tree.add_param_move(addgroup);
                    tree.add_param(subgroup.param(0));
                    for a in 1..subgroup.param_count() {
                        let mut innersub = CodeTree::new_op(Opcode::Sub);
                        innersub.set_params_move(tree.take_params());
                        innersub.rehash(false);
                        tree.add_param_move(innersub);
                        tree.add_param(subgroup.param(a));
                    }
                } else {
                    tree.set_opcode(Opcode::Sub);
                    tree.add_param_move(addgroup);
                    tree.add_param_move(subgroup);
                }
            }
        }

        Opcode::Pow => {
            let p1 = tree.param(1).clone();
            if p1.is_immed() && p1.immed() != S::zero() && !p1.immed().is_integer_value() {
                let r = create_powi_result::<S>(p1.immed().abs(), cbrt_is_slow);
                if r.resulting_exponent != 0 {
                    trace!(
                        "root chain for exponent {}: sqrt^{} cbrt^{} * x^{}",
                        p1.immed(),
                        r.n_int_sqrt,
                        r.n_int_cbrt,
                        r.resulting_exponent
                    );
                    // A negative exponent can fold its inversion into the
                    // chain by turning one sqrt into rsqrt.
                    let signed_chain =
                        p1.immed() < S::zero() && r.sep_list[0] == 0 && r.n_int_sqrt > 0;

                    let source_tree = tree.param(0).clone();
                    let mut pow_item = source_tree.clone();
                    change_into_root_chain(&mut pow_item, signed_chain, r.n_int_sqrt, r.n_int_cbrt);

                    let pow = if r.resulting_exponent == 1 {
                        pow_item
                    } else {
                        let mut pow = CodeTree::new_op(Opcode::Pow);
                        pow.add_param_move(pow_item);
                        pow.add_param_move(CodeTree::new_immed(S::from_long(
                            r.resulting_exponent,
                        )));
                        pow.rehash(false);
                        pow
                    };

                    let mut mul = CodeTree::new_op(Opcode::Mul);
                    mul.add_param_move(pow);
                    for sep in r.sep_list {
                        if sep == 0 {
                            break;
                        }
                        let n_sqrt = (sep % MAX_OP) as i32;
                        let n_cbrt = (sep / MAX_OP) as i32;
                        let mut mul_item = source_tree.clone();
                        change_into_root_chain(&mut mul_item, false, n_sqrt, n_cbrt);
                        mul.add_param_move(mul_item);
                    }

                    if p1.immed() < S::zero() && !signed_chain {
                        mul.rehash(false);
                        tree.set_opcode(Opcode::Inv);
                        tree.set_param_move(0, mul);
                        tree.del_param(1);
                    } else {
                        tree.set_opcode(Opcode::Mul);
                        tree.set_params_move(mul.take_params());
                    }
                    changed = true;
                }
            }
            if tree.opcode() == Opcode::Pow {
                let p0 = tree.param(0).clone();
                let p1 = tree.param(1).clone();
                let powi_fits = p1.is_long_integer_immed()
                    && is_optimizable_using_powi::<S>(p1.long_integer_immed(), 0);
                if !powi_fits {
                    if p0.is_immed() && p0.immed() > S::zero() {
                        // x^y = exp(log(x)*y) for constant positive x; base-2
                        // when log2(x) is exact, saving the multiply.
                        let log2_value = p0.immed().log2();
                        if log2_value.is_integer_value() {
                            if log2_value.fp_equal(S::one()) {
                                tree.del_param(0);
                            } else {
                                let mut exponent = CodeTree::new_op(Opcode::Mul);
                                exponent.add_param_move(CodeTree::new_immed(log2_value));
                                exponent.add_param(&p1);
                                exponent.rehash(true);
                                tree.set_param_move(0, exponent);
                                tree.del_param(1);
                            }
                            tree.set_opcode(Opcode::Exp2);
                        } else {
                            let mulvalue = p0.immed().ln();
                            if mulvalue.fp_equal(S::one()) {
                                tree.del_param(0);
                            } else {
                                let mut exponent = CodeTree::new_op(Opcode::Mul);
                                exponent.add_param_move(CodeTree::new_immed(mulvalue));
                                exponent.add_param(&p1);
                                exponent.rehash(true);
                                tree.set_param_move(0, exponent);
                                tree.del_param(1);
                            }
                            tree.set_opcode(Opcode::Exp);
                        }
                        changed = true;
                    } else if !p1.is_long_integer_immed() && p0.is_always_signed(true) {
                        // Positive base: exp(log(base) * exponent) saves the
                        // full pow call.
                        let mut log = CodeTree::new_op(Opcode::Log);
                        log.add_param(&p0);
                        log.rehash(true);
                        let mut exponent = CodeTree::new_op(Opcode::Mul);
                        exponent.add_param(&p1);
                        exponent.add_param_move(log);
                        exponent.rehash(true);
                        tree.set_opcode(Opcode::Exp);
                        tree.set_param_move(0, exponent);
                        tree.del_param(1);
                        changed = true;
                    }
                }
            }
        }

        _ => {}
    }

    if changed {
        tree.mark_incompletely_hashed();
    }
    changed
}
