//! Pattern matching with backtracking.
//!
//! Matching is continuation-passing: `test_param` tries every way the spec
//! can match the candidate and invokes the continuation for each; when the
//! continuation reports failure (a later pattern operand could not be
//! placed), the binding is undone and the next alternative is tried. This
//! explores the same search space as a resumable-position encoding, with
//! the call stack as the position record.

use num_traits::Float;

use crate::range::TriTruth;
use crate::scalar::Scalar;
use crate::tree::CodeTree;

use super::synthesis::calculate_group_function;
use super::{Constraints, FuncSpec, MatchType, OnenessConstraint, ParamSpec, SignConstraint,
            ValueConstraint};

pub(crate) const MAX_HOLDERS: usize = 8;
pub(crate) const MAX_RESTHOLDERS: usize = 4;

/// The binding environment built up during a match.
pub(crate) struct MatchInfo<S: Scalar> {
    pub(crate) holders: [Option<CodeTree<S>>; MAX_HOLDERS],
    pub(crate) restholders: [Vec<CodeTree<S>>; MAX_RESTHOLDERS],
    /// Top-level operand indices consumed by the match (for ReplaceParams).
    pub(crate) matched_params: Vec<usize>,
}

impl<S: Scalar> MatchInfo<S> {
    pub(crate) fn new() -> Self {
        MatchInfo {
            holders: Default::default(),
            restholders: Default::default(),
            matched_params: Vec::new(),
        }
    }
}

type Cont<'a, S> = &'a mut dyn FnMut(&mut MatchInfo<S>) -> bool;

/// Constraint tests against the candidate's range/parity/integrality facts.
pub(crate) fn test_constraints<S: Scalar>(c: Constraints, tree: &CodeTree<S>) -> bool {
    match c.value {
        ValueConstraint::Any => {}
        ValueConstraint::EvenInt => {
            if tree.get_evenness_info() != TriTruth::Always {
                return false;
            }
        }
        ValueConstraint::OddInt => {
            if tree.get_evenness_info() != TriTruth::Never {
                return false;
            }
        }
        ValueConstraint::Int => {
            if !tree.is_always_integer(true) {
                return false;
            }
        }
        ValueConstraint::NonInt => {
            if !tree.is_always_integer(false) {
                return false;
            }
        }
        ValueConstraint::Logical => {
            if !tree.is_logical_value() {
                return false;
            }
        }
    }
    match c.sign {
        SignConstraint::Any => {}
        SignConstraint::Positive => {
            if !tree.is_always_signed(true) {
                return false;
            }
        }
        SignConstraint::Negative => {
            if !tree.is_always_signed(false) {
                return false;
            }
        }
        SignConstraint::NoIdea => {
            if tree.is_always_signed(true) || tree.is_always_signed(false) {
                return false;
            }
        }
    }
    match c.oneness {
        OnenessConstraint::Any => {}
        OnenessConstraint::One => {
            if !tree.is_immed() || !tree.immed().abs().fp_equal(S::one()) {
                return false;
            }
        }
        OnenessConstraint::NotOne => {
            if !tree.is_immed() || tree.immed().abs().fp_equal(S::one()) {
                return false;
            }
        }
    }
    if c.constness && !tree.is_immed() {
        return false;
    }
    true
}

/// Cheap shape test before any backtracking: does the candidate supply
/// enough sub-functions/immediates/holders of the right kinds?
fn is_plausible_params_match<S: Scalar>(fs: &FuncSpec<S>, tree: &CodeTree<S>) -> bool {
    let needs = &fs.needs;
    if (tree.param_count() as i32) < needs.minimum_need {
        return false;
    }
    let mut subtrees = needs.subtrees;
    let mut others = needs.others;
    let mut immeds = needs.immeds;
    let mut detail = needs.subtree_detail;
    for p in tree.params() {
        if p.is_immed() {
            if immeds > 0 {
                immeds -= 1;
            } else {
                others -= 1;
            }
        } else if p.is_var() || p.param_count() == 0 {
            others -= 1;
        } else {
            let slot = p.opcode() as usize;
            if subtrees > 0 && detail[slot] > 0 {
                subtrees -= 1;
                detail[slot] -= 1;
            } else {
                others -= 1;
            }
        }
    }
    if immeds > 0 || subtrees > 0 || others > 0 {
        return false;
    }
    if fs.match_type != MatchType::Any && (subtrees < 0 || others < 0) {
        return false;
    }
    true
}

/// Group-function params must be tested after the holders they reference.
fn binds_holders<S: Scalar>(spec: &ParamSpec<S>) -> bool {
    !matches!(spec, ParamSpec::Group { .. })
}

/// Entry point: match a rule's pattern against a tree, filling `info`.
pub(crate) fn test_params_top<S: Scalar>(
    fs: &FuncSpec<S>,
    tree: &CodeTree<S>,
    info: &mut MatchInfo<S>,
) -> bool {
    test_params(fs, tree, info, true, &mut |_| true)
}

pub(crate) fn test_params<S: Scalar>(
    fs: &FuncSpec<S>,
    tree: &CodeTree<S>,
    info: &mut MatchInfo<S>,
    top_level: bool,
    k: Cont<'_, S>,
) -> bool {
    if fs.match_type != MatchType::Any && fs.params.len() != tree.param_count() {
        return false;
    }
    if !is_plausible_params_match(fs, tree) {
        return false;
    }
    match fs.match_type {
        MatchType::Positional => match_positional(fs, tree, 0, info, top_level, k),
        MatchType::Selected | MatchType::Any => {
            // Params with binding dependencies (group functions) go last so
            // their holders are bound by the time they are evaluated.
            let mut order: Vec<usize> = (0..fs.params.len()).collect();
            order.sort_by_key(|&i| usize::from(!binds_holders(&fs.params[i])));
            let mut used = vec![false; tree.param_count()];
            match_set(fs, &order, 0, tree, &mut used, info, top_level, k)
        }
    }
}

fn match_positional<S: Scalar>(
    fs: &FuncSpec<S>,
    tree: &CodeTree<S>,
    index: usize,
    info: &mut MatchInfo<S>,
    top_level: bool,
    k: Cont<'_, S>,
) -> bool {
    if index == fs.params.len() {
        if top_level {
            let mark = info.matched_params.len();
            info.matched_params.extend(0..fs.params.len());
            let ok = k(info);
            if !ok {
                info.matched_params.truncate(mark);
            }
            return ok;
        }
        return k(info);
    }
    let child = tree.param(index).clone();
    test_param(&fs.params[index], &child, info, &mut |info| {
        match_positional(fs, tree, index + 1, info, top_level, k)
    })
}

#[allow(clippy::too_many_arguments)]
fn match_set<S: Scalar>(
    fs: &FuncSpec<S>,
    order: &[usize],
    j: usize,
    tree: &CodeTree<S>,
    used: &mut Vec<bool>,
    info: &mut MatchInfo<S>,
    top_level: bool,
    k: Cont<'_, S>,
) -> bool {
    if j == order.len() {
        // Capture everything unused into the restholder, if the pattern
        // carries one.
        if fs.restholder != 0 {
            let id = fs.restholder as usize;
            debug_assert!(info.restholders[id].is_empty());
            let mark = info.matched_params.len();
            for (b, used_b) in used.iter().enumerate() {
                if !used_b {
                    info.restholders[id].push(tree.param(b).clone());
                    if top_level {
                        info.matched_params.push(b);
                    }
                }
            }
            let ok = k(info);
            if !ok {
                info.restholders[id].clear();
                info.matched_params.truncate(mark);
            }
            return ok;
        }
        return k(info);
    }
    let spec = &fs.params[order[j]];
    for a in 0..tree.param_count() {
        if used[a] {
            continue;
        }
        used[a] = true;
        if top_level {
            info.matched_params.push(a);
        }
        let child = tree.param(a).clone();
        let ok = test_param(spec, &child, info, &mut |info| {
            match_set(fs, order, j + 1, tree, used, info, top_level, k)
        });
        if ok {
            return true;
        }
        if top_level {
            info.matched_params.pop();
        }
        used[a] = false;
    }
    false
}

pub(crate) fn test_param<S: Scalar>(
    spec: &ParamSpec<S>,
    tree: &CodeTree<S>,
    info: &mut MatchInfo<S>,
    k: Cont<'_, S>,
) -> bool {
    match spec {
        ParamSpec::NumConstant(v) => {
            if !tree.is_immed() || !tree.immed().fp_equal(*v) {
                return false;
            }
            k(info)
        }
        ParamSpec::Holder { index, constraints } => {
            if !test_constraints(*constraints, tree) {
                return false;
            }
            let slot = *index as usize;
            if let Some(bound) = &info.holders[slot] {
                if !bound.is_identical_to(tree) {
                    return false;
                }
                return k(info);
            }
            info.holders[slot] = Some(tree.clone());
            let ok = k(info);
            if !ok {
                info.holders[slot] = None;
            }
            ok
        }
        ParamSpec::Group { constraints, .. } => {
            if !test_constraints(*constraints, tree) {
                return false;
            }
            let Some(expected) = calculate_group_function(spec, info) else {
                return false;
            };
            if !expected.is_identical_to(tree) {
                return false;
            }
            k(info)
        }
        ParamSpec::Func(fs) => {
            if !test_constraints(fs.constraints, tree) {
                return false;
            }
            if tree.opcode() != fs.opcode {
                return false;
            }
            test_params(fs, tree, info, false, k)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::rules::dsl;
    use crate::opcode::Opcode;

    fn op(opcode: Opcode, params: Vec<CodeTree<f64>>) -> CodeTree<f64> {
        let mut t = CodeTree::new_op(opcode);
        t.set_params_move(params);
        t.rehash(false);
        t
    }

    #[test]
    fn positional_match_binds_holder() {
        // Pattern: Pow[x, 2] against pow(var, 2)
        let mut pattern = dsl::func(
            Opcode::Pow,
            MatchType::Positional,
            vec![dsl::holder(0), dsl::num(2.0)],
        );
        pattern.seal();
        let tree = op(Opcode::Pow, vec![CodeTree::new_var(0), CodeTree::new_immed(2.0)]);
        let mut info = MatchInfo::new();
        assert!(test_params_top(&pattern, &tree, &mut info));
        assert!(info.holders[0].as_ref().unwrap().is_var());
    }

    #[test]
    fn repeated_holder_requires_identity() {
        // Pattern: Mul{x, x}
        let mut pattern = dsl::func(
            Opcode::Mul,
            MatchType::Selected,
            vec![dsl::holder(0), dsl::holder(0)],
        );
        pattern.seal();
        let same = op(
            Opcode::Mul,
            vec![CodeTree::new_var(0), CodeTree::new_var(0)],
        );
        let diff = op(
            Opcode::Mul,
            vec![CodeTree::new_var(0), CodeTree::new_var(1)],
        );
        assert!(test_params_top(&pattern, &same, &mut MatchInfo::new()));
        assert!(!test_params_top(&pattern, &diff, &mut MatchInfo::new()));
    }

    #[test]
    fn any_params_captures_rest() {
        // Pattern: Add 2 <rest#1>
        let mut pattern = dsl::func_rest(
            Opcode::Add,
            MatchType::Any,
            vec![dsl::num(2.0)],
            1,
        );
        pattern.seal();
        let tree = op(
            Opcode::Add,
            vec![
                CodeTree::new_var(0),
                CodeTree::new_immed(2.0),
                CodeTree::new_var(1),
            ],
        );
        let mut info = MatchInfo::new();
        assert!(test_params_top(&pattern, &tree, &mut info));
        assert_eq!(info.restholders[1].len(), 2);
        assert_eq!(info.matched_params.len(), 3);
    }

    #[test]
    fn selected_rejects_wrong_count() {
        let mut pattern = dsl::func(
            Opcode::Add,
            MatchType::Selected,
            vec![dsl::holder(0), dsl::num(1.0)],
        );
        pattern.seal();
        let tree = op(
            Opcode::Add,
            vec![
                CodeTree::new_var(0),
                CodeTree::new_immed(1.0),
                CodeTree::new_var(1),
            ],
        );
        assert!(!test_params_top(&pattern, &tree, &mut MatchInfo::new()));
    }

    #[test]
    fn backtracks_across_selected_operands() {
        // Pattern: Mul{Pow[x, y], x}: the same x must appear as base and as
        // a plain operand, whichever assignment works.
        let mut pattern = dsl::func(
            Opcode::Mul,
            MatchType::Selected,
            vec![
                dsl::f(dsl::func(
                    Opcode::Pow,
                    MatchType::Positional,
                    vec![dsl::holder(0), dsl::holder(1)],
                )),
                dsl::holder(0),
            ],
        );
        pattern.seal();
        let x = CodeTree::<f64>::new_var(0);
        let pow = op(Opcode::Pow, vec![x.clone(), CodeTree::new_var(1)]);
        let tree = op(Opcode::Mul, vec![pow, x]);
        let mut info = MatchInfo::new();
        assert!(test_params_top(&pattern, &tree, &mut info));
    }

    #[test]
    fn constraints_filter_candidates() {
        let mut pattern = dsl::func(
            Opcode::Pow,
            MatchType::Positional,
            vec![dsl::holder(0), dsl::holder_with(1, dsl::even_int())],
        );
        pattern.seal();
        let even = op(Opcode::Pow, vec![CodeTree::new_var(0), CodeTree::new_immed(4.0)]);
        let odd = op(Opcode::Pow, vec![CodeTree::new_var(0), CodeTree::new_immed(3.0)]);
        assert!(test_params_top(&pattern, &even, &mut MatchInfo::new()));
        assert!(!test_params_top(&pattern, &odd, &mut MatchInfo::new()));
    }
}
