//! `Pow` folding: constant evaluation, exponent pushing, and nested powers.
//!
//! Every rewrite that could overflow to infinity, collapse to zero, or lose
//! significand precision (e.g. `pow(1e-30, x) → 1^x`) is guarded and skipped
//! rather than applied; the unrewritten form stays behind.

use num_traits::Float;

use crate::opcode::Opcode;
use crate::scalar::{Scalar, exponent_too_large};
use crate::tree::CodeTree;

/// `pow` with the exact-root shortcuts (`x^(1/2)`, `x^(1/3)`).
fn special_pow<S: Scalar>(a: S, b: S) -> S {
    if b == S::one() / S::from_long(2) {
        return a.sqrt();
    }
    if b == S::one() / S::from_long(3) {
        return a.cbrt();
    }
    a.powf(b)
}

/// Fold a `Pow` node. Returns true when the opcode changed (redo).
pub(crate) fn fold_pow_operations<S: Scalar>(tree: &mut CodeTree<S>) -> bool {
    if tree.param(0).is_immed() && tree.param(1).is_immed() {
        let value = special_pow(tree.param(0).immed(), tree.param(1).immed());
        if value.is_finite() {
            tree.replace_with_immed(value);
        }
        return false;
    }
    if tree.param(1).is_immed() && tree.param(1).immed().narrowed_equals_one() {
        // x^1 = x. The float-narrowing comparison mops up abs(x)^1 residues
        // from rewrites like exp(log(x^6)/6).
        let base = tree.param(0).clone();
        tree.become_(&base);
        return true;
    }
    if tree.param(0).is_immed() && tree.param(0).immed().fp_equal(S::one()) {
        // 1^x = 1
        tree.replace_with_immed(S::one());
        return false;
    }

    // 5^(20*x) = (5^20)^x
    if tree.param(0).is_immed() && tree.param(1).opcode() == Opcode::Mul {
        let mut base_immed = tree.param(0).immed();
        let mut mulgroup = tree.param(1).clone();
        let mut changes = false;
        for a in (0..mulgroup.param_count()).rev() {
            if !mulgroup.param(a).is_immed() {
                continue;
            }
            let imm = mulgroup.param(a).immed();
            if exponent_too_large(base_immed, imm) {
                break;
            }
            let new_base_immed = base_immed.powf(imm);
            if new_base_immed.fp_equal(S::zero()) {
                break;
            }
            if new_base_immed.precision_bits()
                < (base_immed.precision_bits() + imm.precision_bits()) / 4
            {
                // Abrupt loss of precision, such as exp(2e-26 * x) -> pow(1, x).
                break;
            }
            changes = true;
            mulgroup.copy_on_write();
            base_immed = new_base_immed;
            mulgroup.del_param(a);
            break;
        }
        if changes {
            mulgroup.rehash(true);
            tree.set_param_move(0, CodeTree::new_immed(base_immed));
            tree.set_param_move(1, mulgroup);
        }
    }
    // (x*20)^2 = x^2 * 20^2
    if tree.param(1).is_immed() && tree.param(0).opcode() == Opcode::Mul {
        let exponent_immed = tree.param(1).immed();
        let mut factor_immed = S::one();
        let mut mulgroup = tree.param(0).clone();
        let mut changes = false;
        for a in (0..mulgroup.param_count()).rev() {
            if !mulgroup.param(a).is_immed() {
                continue;
            }
            let imm = mulgroup.param(a).immed();
            if exponent_too_large(imm, exponent_immed) {
                break;
            }
            let new_factor_immed = imm.powf(exponent_immed);
            if new_factor_immed.fp_equal(S::zero()) {
                break;
            }
            changes = true;
            mulgroup.copy_on_write();
            factor_immed = factor_immed * new_factor_immed;
            mulgroup.del_param(a);
            break;
        }
        if changes {
            mulgroup.rehash(true);
            let mut newpow = CodeTree::new_op(Opcode::Pow);
            newpow.add_param_move(mulgroup);
            newpow.add_param(tree.param(1));
            newpow.rehash(false);
            tree.set_opcode(Opcode::Mul);
            tree.del_params();
            tree.add_param_move(newpow);
            tree.add_param_move(CodeTree::new_immed(factor_immed));
            return true;
        }
    }

    // (x^3)^2 = x^6; when 3 is even and 3*2 is not, x becomes abs(x).
    if tree.param(0).opcode() == Opcode::Pow
        && tree.param(1).is_immed()
        && tree.param(0).param(1).is_immed()
    {
        let a = tree.param(0).param(1).immed();
        let b = tree.param(1).immed();
        let c = a * b;
        let inner_base = tree.param(0).param(0).clone();
        if a.is_even_integer() && !c.is_even_integer() {
            let mut newbase = CodeTree::new_op(Opcode::Abs);
            newbase.add_param_move(inner_base);
            newbase.rehash(true);
            tree.set_param_move(0, newbase);
        } else {
            tree.set_param_move(0, inner_base);
        }
        tree.set_param_move(1, CodeTree::new_immed(c));
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(n: u32) -> CodeTree<f64> {
        CodeTree::new_var(n)
    }

    fn op(opcode: Opcode, params: Vec<CodeTree<f64>>) -> CodeTree<f64> {
        let mut t = CodeTree::new_op(opcode);
        t.set_params_move(params);
        t.rehash(false);
        t
    }

    #[test]
    fn constant_pow_folds() {
        let mut t = op(
            Opcode::Pow,
            vec![CodeTree::new_immed(2.0), CodeTree::new_immed(10.0)],
        );
        fold_pow_operations(&mut t);
        assert!(t.is_immed());
        assert_eq!(t.immed(), 1024.0);
    }

    #[test]
    fn overflowing_pow_is_left_alone() {
        let mut t = op(
            Opcode::Pow,
            vec![CodeTree::new_immed(10.0), CodeTree::new_immed(400.0)],
        );
        fold_pow_operations(&mut t);
        assert_eq!(t.opcode(), Opcode::Pow);
    }

    #[test]
    fn pow_one_collapses() {
        let mut t = op(Opcode::Pow, vec![var(0), CodeTree::new_immed(1.0)]);
        assert!(fold_pow_operations(&mut t));
        assert!(t.is_var());
    }

    #[test]
    fn exponent_pushed_through_mul() {
        // 5^(20*x) -> (5^20)^x
        let product = op(Opcode::Mul, vec![CodeTree::new_immed(20.0), var(0)]);
        let mut t = op(Opcode::Pow, vec![CodeTree::new_immed(5.0), product]);
        fold_pow_operations(&mut t);
        assert_eq!(t.opcode(), Opcode::Pow);
        assert!(t.param(0).is_immed());
        assert!((t.param(0).immed() - 5.0_f64.powf(20.0)).abs() < 1e80);
        assert!(t.param(1).is_var());
    }

    #[test]
    fn tiny_base_is_not_flattened() {
        // pow(1e-300, x*1e-20) must not become pow(~1, x)
        let product = op(Opcode::Mul, vec![CodeTree::new_immed(1e-20), var(0)]);
        let mut t = op(Opcode::Pow, vec![CodeTree::new_immed(1e-300), product]);
        fold_pow_operations(&mut t);
        assert_eq!(t.param(0).immed(), 1e-300);
    }

    #[test]
    fn nested_pow_merges_with_abs_guard() {
        // (x^2)^0.5 -> abs(x)^1.0
        let inner = op(Opcode::Pow, vec![var(0), CodeTree::new_immed(2.0)]);
        let mut t = op(Opcode::Pow, vec![inner, CodeTree::new_immed(0.5)]);
        fold_pow_operations(&mut t);
        assert_eq!(t.opcode(), Opcode::Pow);
        assert_eq!(t.param(0).opcode(), Opcode::Abs);
        assert_eq!(t.param(1).immed(), 1.0);
    }

    #[test]
    fn nested_pow_merges_plain() {
        // (x^3)^2 -> x^6
        let inner = op(Opcode::Pow, vec![var(0), CodeTree::new_immed(3.0)]);
        let mut t = op(Opcode::Pow, vec![inner, CodeTree::new_immed(2.0)]);
        fold_pow_operations(&mut t);
        assert!(t.param(0).is_var());
        assert_eq!(t.param(1).immed(), 6.0);
    }
}
