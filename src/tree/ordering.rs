//! Canonical parameter ordering for commutative operations.
//!
//! The total order is: deeper subtrees first, ties broken by ascending hash.
//! Sorting commutative operands into this order makes hash-based identity
//! tests linear in DAG size instead of combinatorial, and guarantees that
//! equal expressions lower to identical bytecode.
//!
//! Directional comparisons take part in the same canonical form: when the
//! order would swap the operands of `Less`/`LessOrEq`/`Greater`/`GreaterOrEq`,
//! the operands are swapped and the opcode replaced by its mirror, so
//! `a < b` and `b > a` become the same node.

use std::cmp::Ordering;

use crate::opcode::Opcode;
use crate::scalar::Scalar;
use crate::tree::{CodeTree, Node};

/// The canonical operand order: primary key descending depth, secondary key
/// ascending hash.
pub(crate) fn param_order<S: Scalar>(a: &CodeTree<S>, b: &CodeTree<S>) -> Ordering {
    match b.depth().cmp(&a.depth()) {
        Ordering::Equal => a.hash().cmp(&b.hash()),
        other => other,
    }
}

/// Sort a node's params into canonical order where the opcode demands it.
pub(crate) fn sort_params<S: Scalar>(node: &mut Node<S>) {
    if node.opcode.is_commutative() {
        node.params.sort_by(param_order);
        return;
    }
    if let Some(mirror) = node.opcode.mirror()
        && node.params.len() == 2
        && param_order(&node.params[1], &node.params[0]) == Ordering::Less
    {
        node.params.swap(0, 1);
        node.opcode = mirror;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(opcode: Opcode, params: Vec<CodeTree<f64>>) -> CodeTree<f64> {
        let mut t = CodeTree::new_op(opcode);
        t.set_params_move(params);
        t.rehash(false);
        t
    }

    #[test]
    fn deeper_operands_sort_first() {
        let x = CodeTree::<f64>::new_var(0);
        let sin_x = op(Opcode::Sin, vec![x.clone()]);
        let sum = op(Opcode::Add, vec![x.clone(), sin_x.clone()]);
        assert!(sum.param(0).is_identical_to(&sin_x));
        assert!(sum.param(1).is_identical_to(&x));
    }

    #[test]
    fn comparison_flips_to_canonical_side() {
        let x = CodeTree::<f64>::new_var(0);
        let sin_x = op(Opcode::Sin, vec![x.clone()]);
        // x < sin(x): sin(x) is deeper, so the canonical form is sin(x) > x.
        let cmp = op(Opcode::Less, vec![x.clone(), sin_x.clone()]);
        assert_eq!(cmp.opcode(), Opcode::Greater);
        assert!(cmp.param(0).is_identical_to(&sin_x));

        // The mirrored spelling lands on the same node.
        let cmp2 = op(Opcode::Greater, vec![sin_x, x]);
        assert!(cmp.is_identical_to(&cmp2));
    }

    #[test]
    fn sort_is_stable_under_resort() {
        let parts = vec![
            CodeTree::<f64>::new_var(2),
            CodeTree::new_immed(1.0),
            CodeTree::new_var(0),
        ];
        let mut a = op(Opcode::Add, parts);
        let first = a.params().to_vec();
        a.rehash(false);
        for (x, y) in first.iter().zip(a.params()) {
            assert!(x.is_identical_to(y));
        }
    }
}
