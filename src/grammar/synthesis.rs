//! Building replacement trees from a rule's binding environment.

use crate::scalar::Scalar;
use crate::tree::CodeTree;

use super::matching::MatchInfo;
use super::{ParamSpec, Rule, RuleType};

/// Evaluate a group-function spec over the current bindings, producing the
/// tree it denotes (constant-folded). `None` when a referenced holder is
/// still unbound.
pub(crate) fn calculate_group_function<S: Scalar>(
    spec: &ParamSpec<S>,
    info: &MatchInfo<S>,
) -> Option<CodeTree<S>> {
    match spec {
        ParamSpec::NumConstant(v) => Some(CodeTree::new_immed(*v)),
        ParamSpec::Holder { index, .. } => info.holders[*index as usize].clone(),
        ParamSpec::Group { opcode, params, .. } => {
            let mut result = CodeTree::new_op(*opcode);
            for sub in params {
                result.add_param_move(calculate_group_function(sub, info)?);
            }
            result.rehash(true); // constant-folds
            Some(result)
        }
        ParamSpec::Func(fs) => {
            // A sub-function inside a group context is evaluated the same
            // way: build it and let folding reduce it.
            let mut result = CodeTree::new_op(fs.opcode);
            for sub in &fs.params {
                result.add_param_move(calculate_group_function(sub, info)?);
            }
            result.rehash(true);
            Some(result)
        }
    }
}

/// Synthesize one replacement param into `tree`.
///
/// `inner` controls the trailing rehash: the outermost `ProduceNewTree`
/// target is rehashed by the engine after the rule completes.
pub(crate) fn synthesize_param<S: Scalar>(
    spec: &ParamSpec<S>,
    tree: &mut CodeTree<S>,
    info: &mut MatchInfo<S>,
    inner: bool,
) {
    match spec {
        ParamSpec::NumConstant(v) => {
            *tree = CodeTree::new_immed(*v);
        }
        ParamSpec::Holder { index, .. } => {
            let bound = info.holders[*index as usize]
                .clone()
                .expect("rule references an unbound holder");
            tree.become_(&bound);
        }
        ParamSpec::Func(fs) => {
            tree.set_opcode(fs.opcode);
            tree.del_params();
            for sub in &fs.params {
                let mut nparam = CodeTree::default();
                synthesize_param(sub, &mut nparam, info, true);
                tree.add_param_move(nparam);
            }
            if fs.restholder != 0 {
                let trees = std::mem::take(&mut info.restholders[fs.restholder as usize]);
                tree.add_params_move(trees);
                if tree.param_count() == 1 {
                    // An associative op with a single operand collapses; this
                    // also happens in folding, but doing it here spares a
                    // rehash of the wrapper.
                    let only = tree.param(0).clone();
                    tree.become_(&only);
                }
            }
            if inner {
                tree.rehash(true);
            }
        }
        ParamSpec::Group { opcode, params, .. } => {
            tree.set_opcode(*opcode);
            tree.del_params();
            for sub in params {
                let mut nparam = CodeTree::default();
                synthesize_param(sub, &mut nparam, info, true);
                tree.add_param_move(nparam);
            }
            if inner {
                tree.rehash(true); // will constant-fold
            }
        }
    }
}

/// Apply a matched rule's replacement to the tree.
pub(crate) fn synthesize_rule<S: Scalar>(
    rule: &Rule<S>,
    tree: &mut CodeTree<S>,
    info: &mut MatchInfo<S>,
) {
    match rule.rule_type {
        RuleType::ProduceNewTree => {
            tree.del_params();
            synthesize_param(&rule.repl_params[0], tree, info, false);
        }
        RuleType::ReplaceParams => {
            // Delete matched operands in descending index order so the
            // remaining offsets stay valid.
            let mut list = info.matched_params.clone();
            list.sort_unstable();
            for index in list.into_iter().rev() {
                tree.del_param(index);
            }
            for spec in &rule.repl_params {
                let mut nparam = CodeTree::default();
                synthesize_param(spec, &mut nparam, info, true);
                tree.add_param_move(nparam);
            }
        }
    }
}
