//! The `If`/`AbsIf` simplification cascade.
//!
//! Every transformation that changes the opcode reports "redo" so the whole
//! folding switch restarts on the new shape.

use crate::fold;
use crate::opcode::Opcode;
use crate::range;
use crate::range::TriTruth;
use crate::scalar::Scalar;
use crate::tree::CodeTree;

#[allow(clippy::too_many_lines)]
pub(crate) fn fold_if_operations<S: Scalar>(tree: &mut CodeTree<S>) -> bool {
    // A negated condition swaps the branches and unwraps.
    loop {
        match tree.param(0).opcode() {
            Opcode::Not => {
                tree.set_opcode(Opcode::If);
                let cond = tree.param(0).param(0).clone();
                tree.set_param_move(0, cond);
                tree.params_mut().swap(1, 2);
            }
            Opcode::AbsNot => {
                tree.set_opcode(Opcode::AbsIf);
                let cond = tree.param(0).param(0).clone();
                tree.set_param_move(0, cond);
                tree.params_mut().swap(1, 2);
            }
            _ => break,
        }
    }

    // if(if(x,a,b), c,d) -> if(x, if(a,c,d), if(b,c,d))
    // when either a or b has a provable logical value.
    if matches!(tree.param(0).opcode(), Opcode::If | Opcode::AbsIf) {
        let cond = tree.param(0).clone();
        let notnot_op = if cond.opcode() == Opcode::If {
            Opcode::NotNot
        } else {
            Opcode::AbsNotNot
        };
        let mut truth_a = CodeTree::new_op(notnot_op);
        truth_a.add_param(cond.param(1));
        fold::constant_folding(&mut truth_a);
        let mut truth_b = CodeTree::new_op(notnot_op);
        truth_b.add_param(cond.param(2));
        fold::constant_folding(&mut truth_b);
        if truth_a.is_immed() || truth_b.is_immed() {
            let mut then_tree = CodeTree::new_op(cond.opcode());
            then_tree.add_param(cond.param(1));
            then_tree.add_param(tree.param(1));
            then_tree.add_param(tree.param(2));
            then_tree.rehash(true);
            let mut else_tree = CodeTree::new_op(cond.opcode());
            else_tree.add_param(cond.param(2));
            else_tree.add_param(tree.param(1));
            else_tree.add_param(tree.param(2));
            else_tree.rehash(true);
            tree.set_opcode(cond.opcode());
            tree.set_param(0, cond.param(0));
            tree.set_param_move(1, then_tree);
            tree.set_param_move(2, else_tree);
            return true;
        }
    }

    if tree.param(1).opcode() == tree.param(2).opcode()
        && matches!(tree.param(1).opcode(), Opcode::If | Opcode::AbsIf)
    {
        let leaf1 = tree.param(1).clone();
        let leaf2 = tree.param(2).clone();
        if leaf1.param(0).is_identical_to(leaf2.param(0))
            && (leaf1.param(1).is_identical_to(leaf2.param(1))
                || leaf1.param(2).is_identical_to(leaf2.param(2)))
        {
            // if(x, if(y,a,b), if(y,c,d)) -> if(y, if(x,a,c), if(x,b,d))
            let mut then_tree = CodeTree::new_op(tree.opcode());
            then_tree.add_param(tree.param(0));
            then_tree.add_param(leaf1.param(1));
            then_tree.add_param(leaf2.param(1));
            then_tree.rehash(true);
            let mut else_tree = CodeTree::new_op(tree.opcode());
            else_tree.add_param(tree.param(0));
            else_tree.add_param(leaf1.param(2));
            else_tree.add_param(leaf2.param(2));
            else_tree.rehash(true);
            tree.set_opcode(leaf1.opcode());
            tree.set_param(0, leaf1.param(0));
            tree.set_param_move(1, then_tree);
            tree.set_param_move(2, else_tree);
            return true;
        }
        if leaf1.param(1).is_identical_to(leaf2.param(1))
            && leaf1.param(2).is_identical_to(leaf2.param(2))
        {
            // if(x, if(y,a,b), if(z,a,b)) -> if(if(x,y,z), a,b)
            let mut cond_tree = CodeTree::new_op(tree.opcode());
            cond_tree.add_param(tree.param(0));
            cond_tree.add_param(leaf1.param(0));
            cond_tree.add_param(leaf2.param(0));
            cond_tree.rehash(true);
            tree.set_opcode(leaf1.opcode());
            tree.set_param_move(0, cond_tree);
            tree.set_param(2, leaf1.param(2));
            tree.set_param(1, leaf1.param(1));
            return true;
        }
        if leaf1.param(1).is_identical_to(leaf2.param(2))
            && leaf1.param(2).is_identical_to(leaf2.param(1))
        {
            // if(x, if(y,a,b), if(z,b,a)) -> if(if(x,y,!z), a,b)
            let mut not_tree = CodeTree::new_op(if leaf2.opcode() == Opcode::If {
                Opcode::Not
            } else {
                Opcode::AbsNot
            });
            not_tree.add_param(leaf2.param(0));
            not_tree.rehash(true);
            let mut cond_tree = CodeTree::new_op(tree.opcode());
            cond_tree.add_param(tree.param(0));
            cond_tree.add_param(leaf1.param(0));
            cond_tree.add_param_move(not_tree);
            cond_tree.rehash(true);
            tree.set_opcode(leaf1.opcode());
            tree.set_param_move(0, cond_tree);
            tree.set_param(2, leaf1.param(2));
            tree.set_param(1, leaf1.param(1));
            return true;
        }
    }

    // A provably true/false condition selects its branch outright.
    match range::get_logical_value(tree.param(0), tree.opcode() == Opcode::AbsIf) {
        TriTruth::Always => {
            let branch = tree.param(1).clone();
            tree.become_(&branch);
            return true;
        }
        TriTruth::Never => {
            let branch = tree.param(2).clone();
            tree.become_(&branch);
            return true;
        }
        TriTruth::Unknown => {}
    }

    if tree.param(1).is_identical_to(tree.param(2)) {
        // Identical branches make the test unnecessary.
        let branch = tree.param(1).clone();
        tree.become_(&branch);
        return true;
    }

    let op1 = tree.param(1).opcode();
    let op2 = tree.param(2).opcode();
    if op1 == op2 {
        // Same unary function on both branches: pull it out.
        // if(x, sin(a), sin(b)) -> sin(if(x, a,b))
        if tree.param(1).param_count() == 1 {
            let mut changed_if = CodeTree::new_op(tree.opcode());
            changed_if.add_param(tree.param(0));
            changed_if.add_param(tree.param(1).param(0));
            changed_if.add_param(tree.param(2).param(0));
            changed_if.rehash(true);
            tree.set_opcode(op1);
            tree.del_params();
            tree.add_param_move(changed_if);
            return true;
        }
        if matches!(
            op1,
            Opcode::Add
                | Opcode::Mul
                | Opcode::And
                | Opcode::Or
                | Opcode::AbsAnd
                | Opcode::AbsOr
                | Opcode::Min
                | Opcode::Max
        ) {
            // Extract the intersection of the two operand sets.
            let mut branch1 = tree.param(1).clone();
            let mut branch2 = tree.param(2).clone();
            let mut overlap: Vec<CodeTree<S>> = Vec::new();
            for a in (0..branch1.param_count()).rev() {
                for b in (0..branch2.param_count()).rev() {
                    if branch1.param(a).is_identical_to(branch2.param(b)) {
                        if overlap.is_empty() {
                            branch1.copy_on_write();
                            branch2.copy_on_write();
                        }
                        overlap.push(branch1.param(a).clone());
                        branch2.del_param(b);
                        branch1.del_param(a);
                        break;
                    }
                }
            }
            if !overlap.is_empty() {
                branch1.rehash(true);
                branch2.rehash(true);
                let mut changed_if = CodeTree::new_op(tree.opcode());
                changed_if.add_param(tree.param(0));
                changed_if.add_param_move(branch1);
                changed_if.add_param_move(branch2);
                changed_if.rehash(true);
                tree.set_opcode(op1);
                tree.set_params_move(overlap);
                tree.add_param_move(changed_if);
                return true;
            }
        }
    }

    // if(x, y+z, y) -> if(x, z,0) + y, and the Mul/And/Or analogues.
    if op1 == Opcode::Add
        || op1 == Opcode::Mul
        || (op1 == Opcode::And && tree.param(2).is_logical_value())
        || (op1 == Opcode::Or && tree.param(2).is_logical_value())
    {
        let branch2 = tree.param(2).clone();
        for a in (0..tree.param(1).param_count()).rev() {
            if tree.param(1).param(a).is_identical_to(&branch2) {
                let mut branch1 = tree.param(1).get_unique_ref();
                branch1.del_param(a);
                branch1.rehash(true);
                let neutral = if op1 == Opcode::Add || op1 == Opcode::Or {
                    S::zero()
                } else {
                    S::one()
                };
                let mut changed_if = CodeTree::new_op(tree.opcode());
                changed_if.add_param(tree.param(0));
                changed_if.add_param_move(branch1);
                changed_if.add_param_move(CodeTree::new_immed(neutral));
                changed_if.rehash(true);
                tree.set_opcode(op1);
                tree.del_params();
                tree.add_param_move(branch2);
                tree.add_param_move(changed_if);
                return true;
            }
        }
    }
    // if(x, y&z, !!y) -> if(x, z,1) & y
    if (op1 == Opcode::And || op1 == Opcode::Or) && op2 == Opcode::NotNot {
        let branch2op = tree.param(2).param(0).clone();
        for a in (0..tree.param(1).param_count()).rev() {
            if tree.param(1).param(a).is_identical_to(&branch2op) {
                let mut branch1 = tree.param(1).get_unique_ref();
                branch1.del_param(a);
                branch1.rehash(true);
                let neutral = if op1 == Opcode::Or { S::zero() } else { S::one() };
                let mut changed_if = CodeTree::new_op(tree.opcode());
                changed_if.add_param(tree.param(0));
                changed_if.add_param_move(branch1);
                changed_if.add_param_move(CodeTree::new_immed(neutral));
                changed_if.rehash(true);
                tree.set_opcode(op1);
                tree.del_params();
                tree.add_param_move(branch2op);
                tree.add_param_move(changed_if);
                return true;
            }
        }
    }
    // if(x, y, y+z) -> if(x, 0,z) + y
    if op2 == Opcode::Add
        || op2 == Opcode::Mul
        || (op2 == Opcode::And && tree.param(1).is_logical_value())
        || (op2 == Opcode::Or && tree.param(1).is_logical_value())
    {
        let branch1 = tree.param(1).clone();
        for a in (0..tree.param(2).param_count()).rev() {
            if tree.param(2).param(a).is_identical_to(&branch1) {
                let mut branch2 = tree.param(2).get_unique_ref();
                branch2.del_param(a);
                branch2.rehash(true);
                let neutral = if op2 == Opcode::Add || op2 == Opcode::Or {
                    S::zero()
                } else {
                    S::one()
                };
                let mut changed_if = CodeTree::new_op(tree.opcode());
                changed_if.add_param(tree.param(0));
                changed_if.add_param_move(CodeTree::new_immed(neutral));
                changed_if.add_param_move(branch2);
                changed_if.rehash(true);
                tree.set_opcode(op2);
                tree.del_params();
                tree.add_param_move(branch1);
                tree.add_param_move(changed_if);
                return true;
            }
        }
    }
    // if(x, !!y, y&z) -> if(x, 1,z) & y
    if (op2 == Opcode::And || op2 == Opcode::Or) && op1 == Opcode::NotNot {
        let branch1op = tree.param(1).param(0).clone();
        for a in (0..tree.param(2).param_count()).rev() {
            if tree.param(2).param(a).is_identical_to(&branch1op) {
                let mut branch2 = tree.param(2).get_unique_ref();
                branch2.del_param(a);
                branch2.rehash(true);
                let neutral = if op2 == Opcode::Or { S::zero() } else { S::one() };
                let mut changed_if = CodeTree::new_op(tree.opcode());
                changed_if.add_param(tree.param(0));
                changed_if.add_param_move(CodeTree::new_immed(neutral));
                changed_if.add_param_move(branch2);
                changed_if.rehash(true);
                tree.set_opcode(op2);
                tree.del_params();
                tree.add_param_move(branch1op);
                tree.add_param_move(changed_if);
                return true;
            }
        }
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
    fn negated_condition_swaps_branches() {
        let not_x = op(Opcode::Not, vec![var(0)]);
        let mut t = op(Opcode::If, vec![not_x, CodeTree::new_immed(7.0), var(1)]);
        assert!(fold_if_operations(&mut t) || t.param(0).is_var());
        assert!(t.param(0).is_var());
        assert!(t.param(1).is_var());
        assert_eq!(t.param(2).immed(), 7.0);
    }

    #[test]
    fn constant_condition_selects_branch() {
        let mut t = op(
            Opcode::If,
            vec![CodeTree::new_immed(1.0), var(0), CodeTree::new_immed(3.0)],
        );
        assert!(fold_if_operations(&mut t));
        assert!(t.is_var());
    }

    #[test]
    fn identical_branches_drop_the_test() {
        let mut t = op(Opcode::If, vec![var(0), var(1), var(1)]);
        assert!(fold_if_operations(&mut t));
        assert!(t.is_var());
        assert_eq!(t.var(), 1);
    }

    #[test]
    fn unary_function_pulled_out() {
        let sin_a = op(Opcode::Sin, vec![var(1)]);
        let sin_b = op(Opcode::Sin, vec![var(2)]);
        let mut t = op(Opcode::If, vec![var(0), sin_a, sin_b]);
        assert!(fold_if_operations(&mut t));
        assert_eq!(t.opcode(), Opcode::Sin);
        assert_eq!(t.param(0).opcode(), Opcode::If);
    }

    #[test]
    fn shared_addend_extracted() {
        // if(c, y+z, y) -> y + if(c, z, 0)
        let y = var(1);
        let z = var(2);
        let sum = op(Opcode::Add, vec![y.clone(), z]);
        let mut t = op(Opcode::If, vec![var(0), sum, y]);
        assert!(fold_if_operations(&mut t));
        assert_eq!(t.opcode(), Opcode::Add);
    }
}
