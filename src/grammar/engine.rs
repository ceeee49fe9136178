//! The grammar application loop.
//!
//! `apply_grammar` optimizes children first, then tries the candidate rules
//! of the node itself. A node that no rule of a grammar matches is stamped
//! with that grammar's id (`optimized_by`) and skipped on later walks; the
//! stamp is cleared automatically whenever the node's hash changes.

use crate::scalar::Scalar;
use crate::trace::trace;
use crate::tree::CodeTree;

use super::matching::{MatchInfo, test_params_top};
use super::synthesis::synthesize_rule;
use super::{Grammar, Grammars, Rule};

fn test_rule_and_apply_if_match<S: Scalar>(rule: &Rule<S>, tree: &mut CodeTree<S>) -> bool {
    let mut info = MatchInfo::new();
    if !test_params_top(&rule.match_tree, tree, &mut info) {
        return false;
    }
    trace!(
        "rule match on {}: {}",
        rule.match_tree.opcode.name(),
        crate::trace::dump(tree)
    );
    synthesize_rule(rule, tree, &mut info);
    trace!("  rewrote to: {}", crate::trace::dump(tree));
    true
}

/// One grammar pass over the tree. Returns true when anything changed; the
/// caller re-runs until a fixpoint.
pub(crate) fn apply_grammar<S: Scalar>(grammar: &Grammar<S>, tree: &mut CodeTree<S>) -> bool {
    if tree.optimized_by() == Some(grammar.id) {
        return false;
    }

    // Children first; a changed child gives the parent a fresh chance.
    // Unchanged children are written back too, to keep their convergence
    // stamp (stamping does not touch the hash).
    let mut changed = false;
    for a in 0..tree.param_count() {
        let mut child = tree.param(a).clone();
        if apply_grammar(grammar, &mut child) {
            changed = true;
        }
        tree.set_param_move(a, child);
    }
    if changed {
        tree.rehash(true);
        return true;
    }

    for rule in grammar.candidate_rules(tree.opcode(), tree.param_count()) {
        if test_rule_and_apply_if_match(rule, tree) {
            tree.rehash(true);
            return true;
        }
    }

    tree.set_optimized_by(Some(grammar.id));
    false
}

/// Run the four grammars to fixpoint, in order.
pub(crate) fn apply_grammars<S: Scalar>(grammars: &Grammars<S>, tree: &mut CodeTree<S>) {
    for grammar in &grammars.phases {
        while apply_grammar(grammar, tree) {
            tree.fix_incomplete_hashes();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::Opcode;

    fn op(opcode: Opcode, params: Vec<CodeTree<f64>>) -> CodeTree<f64> {
        let mut t = CodeTree::new_op(opcode);
        t.set_params_move(params);
        t.rehash(true);
        t
    }

    #[test]
    fn sin_of_negated_argument_normalizes() {
        // sin(-1 * x) -> sin(x) * -1
        let grammars = Grammars::<f64>::build();
        let neg = op(Opcode::Mul, vec![CodeTree::new_immed(-1.0), CodeTree::new_var(0)]);
        let mut tree = op(Opcode::Sin, vec![neg]);
        apply_grammars(&grammars, &mut tree);
        assert_eq!(tree.opcode(), Opcode::Mul);
        assert!(tree.params().iter().any(|p| p.opcode() == Opcode::Sin));
        assert!(
            tree.params()
                .iter()
                .any(|p| p.is_immed() && p.immed() == -1.0)
        );
    }

    #[test]
    fn cos_of_negated_argument_drops_sign() {
        let grammars = Grammars::<f64>::build();
        let neg = op(Opcode::Mul, vec![CodeTree::new_immed(-1.0), CodeTree::new_var(0)]);
        let mut tree = op(Opcode::Cos, vec![neg]);
        apply_grammars(&grammars, &mut tree);
        assert_eq!(tree.opcode(), Opcode::Cos);
        assert!(tree.param(0).is_var());
    }

    #[test]
    fn sin_asin_composition_collapses() {
        let grammars = Grammars::<f64>::build();
        let asin = op(Opcode::Asin, vec![CodeTree::new_var(0)]);
        let mut tree = op(Opcode::Sin, vec![asin]);
        apply_grammars(&grammars, &mut tree);
        assert!(tree.is_var());
    }

    #[test]
    fn tan_recreated_from_quotient() {
        // sin(x) * cos(x)^-1 -> tan(x)
        let grammars = Grammars::<f64>::build();
        let sin = op(Opcode::Sin, vec![CodeTree::new_var(0)]);
        let cos = op(Opcode::Cos, vec![CodeTree::new_var(0)]);
        let inv_cos = op(Opcode::Pow, vec![cos, CodeTree::new_immed(-1.0)]);
        let mut tree = op(Opcode::Mul, vec![sin, inv_cos]);
        apply_grammars(&grammars, &mut tree);
        assert_eq!(tree.opcode(), Opcode::Tan);
    }

    #[test]
    fn grammar_stamp_prevents_rework() {
        let grammars = Grammars::<f64>::build();
        let mut tree = op(Opcode::Add, vec![CodeTree::new_var(0), CodeTree::new_var(1)]);
        let g = &grammars.phases[0];
        assert!(!apply_grammar(g, &mut tree));
        assert_eq!(tree.optimized_by(), Some(g.id));
        // A second run takes the memoized early exit.
        assert!(!apply_grammar(g, &mut tree));
    }

    #[test]
    fn abs_products_merge() {
        // abs(x) * abs(y) -> abs(x*y)
        let grammars = Grammars::<f64>::build();
        let ax = op(Opcode::Abs, vec![CodeTree::new_var(0)]);
        let ay = op(Opcode::Abs, vec![CodeTree::new_var(1)]);
        let mut tree = op(Opcode::Mul, vec![ax, ay]);
        apply_grammars(&grammars, &mut tree);
        assert_eq!(tree.opcode(), Opcode::Abs);
        assert_eq!(tree.param(0).opcode(), Opcode::Mul);
    }

    #[test]
    fn if_with_boolean_branches_becomes_notnot() {
        let grammars = Grammars::<f64>::build();
        let cond = CodeTree::new_var(0);
        let mut tree = op(
            Opcode::If,
            vec![cond, CodeTree::new_immed(1.0), CodeTree::new_immed(0.0)],
        );
        apply_grammars(&grammars, &mut tree);
        assert_eq!(tree.opcode(), Opcode::NotNot);
    }
}
