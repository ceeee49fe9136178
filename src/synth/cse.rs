//! Common-subexpression extraction, run at the start of the lowering walk.
//!
//! Subtrees occurring at least twice are scored by `count · depth` and
//! synthesized greedily, highest score first, so later occurrences become
//! `Fetch`es. A candidate used as the argument of both `Sin` and `Cos`
//! additionally gets a fused `SinCos` emitted right after its value.
//!
//! A candidate is skipped when it sits on an unbalanced branch of an `If`:
//! extracting it would evaluate it unconditionally.

use rustc_hash::FxHashMap;

use crate::opcode::Opcode;
use crate::scalar::Scalar;
use crate::trace::trace;
use crate::tree::{CodeTree, TreeHash};

use super::ByteCodeSynth;

#[derive(Clone, Copy, Default)]
pub(crate) struct TreeCountItem {
    n_occurrences: usize,
    n_as_cos_param: usize,
    n_as_sin_param: usize,
}

impl TreeCountItem {
    fn add_from(&mut self, parent_op: Option<Opcode>) {
        self.n_occurrences += 1;
        match parent_op {
            Some(Opcode::Cos | Opcode::Sec) => self.n_as_cos_param += 1,
            Some(Opcode::Sin | Opcode::Csc) => self.n_as_sin_param += 1,
            _ => {}
        }
    }

    fn cse_score(self) -> usize {
        self.n_occurrences
    }

    /// 0: no sincos; 1: only used under sin/cos; 2: also needed bare.
    fn needs_sincos(self) -> i32 {
        if self.n_as_cos_param > 0 && self.n_as_sin_param > 0 {
            if self.n_occurrences == self.n_as_cos_param + self.n_as_sin_param {
                return 1;
            }
            return 2;
        }
        0
    }

    /// Leaves are cheaper than a `Fetch`; only sincos sharing justifies
    /// extracting a depth-1 node.
    fn minimum_depth(self) -> u32 {
        if self.n_as_cos_param.min(self.n_as_sin_param) == 0 {
            2
        } else {
            1
        }
    }
}

type TreeCounts<S> = FxHashMap<TreeHash, Vec<(TreeCountItem, CodeTree<S>)>>;

fn find_tree_counts<S: Scalar>(
    counts: &mut TreeCounts<S>,
    tree: &CodeTree<S>,
    parent_op: Option<Opcode>,
) {
    let bucket = counts.entry(tree.hash()).or_default();
    match bucket.iter_mut().find(|(_, t)| t.is_identical_to(tree)) {
        Some((item, _)) => item.add_from(parent_op),
        None => {
            let mut item = TreeCountItem::default();
            item.add_from(parent_op);
            bucket.push((item, tree.clone()));
        }
    }
    for p in tree.params() {
        find_tree_counts(counts, p, Some(tree.opcode()));
    }
}

struct BalanceResult {
    balance_good: bool,
    found_child: bool,
}

/// The candidate must be used by both branches of every `If` it appears
/// under (or only by the condition); otherwise extraction would force an
/// evaluation the program might skip.
fn if_balance_good<S: Scalar>(root: &CodeTree<S>, child: &CodeTree<S>) -> BalanceResult {
    if root.is_identical_to(child) {
        return BalanceResult {
            balance_good: true,
            found_child: true,
        };
    }
    if matches!(root.opcode(), Opcode::If | Opcode::AbsIf) {
        let cond = if_balance_good(root.param(0), child);
        let branch1 = if_balance_good(root.param(1), child);
        let branch2 = if_balance_good(root.param(2), child);
        let found_child = cond.found_child || branch1.found_child || branch2.found_child;
        let balance_good = ((branch1.found_child == branch2.found_child)
            || (cond.found_child && cond.balance_good))
            && (cond.balance_good || (branch1.found_child && branch2.found_child))
            && (branch1.balance_good || (cond.found_child && cond.balance_good))
            && (branch2.balance_good || (cond.found_child && cond.balance_good));
        return BalanceResult {
            balance_good,
            found_child,
        };
    }
    let mut found_child = false;
    let mut has_bad_balance = false;
    let mut has_good_balance_found = false;
    for a in 0..root.param_count() {
        let tmp = if_balance_good(root.param(a), child);
        if tmp.found_child {
            found_child = true;
        }
        if !tmp.balance_good {
            has_bad_balance = true;
        } else if tmp.found_child {
            has_good_balance_found = true;
        }
        // e.g. in if(x, sin(x), 0) + sin(x), sin(x) is still a good
        // candidate even though one occurrence is unbalanced.
    }
    BalanceResult {
        balance_good: !(has_bad_balance && !has_good_balance_found),
        found_child,
    }
}

fn contains_other_candidates<S: Scalar>(
    within: &CodeTree<S>,
    tree: &CodeTree<S>,
    synth: &ByteCodeSynth<S>,
    counts: &TreeCounts<S>,
) -> bool {
    for a in 0..tree.param_count() {
        let leaf = tree.param(a);
        if let Some(bucket) = counts.get(&leaf.hash()) {
            for (occ, candidate) in bucket {
                if !candidate.is_identical_to(leaf) {
                    continue;
                }
                if synth.find(candidate) {
                    continue;
                }
                if leaf.depth() < occ.minimum_depth() {
                    continue;
                }
                if occ.cse_score() < 2 {
                    continue;
                }
                if !if_balance_good(within, leaf).balance_good {
                    continue;
                }
                return true;
            }
        }
        if contains_other_candidates(within, leaf, synth, counts) {
            return true;
        }
    }
    false
}

fn is_descendant_of<S: Scalar>(parent: &CodeTree<S>, expr: &CodeTree<S>) -> bool {
    for a in 0..parent.param_count() {
        if parent.param(a).is_identical_to(expr) {
            return true;
        }
    }
    for a in 0..parent.param_count() {
        if is_descendant_of(parent.param(a), expr) {
            return true;
        }
    }
    false
}

/// Bad moment: the candidate is a descendant of exactly one of our children
/// (it will be reached again deeper down).
fn good_moment_for_cse<S: Scalar>(parent: &CodeTree<S>, expr: &CodeTree<S>) -> bool {
    if parent.opcode() == Opcode::If {
        return true;
    }
    for a in 0..parent.param_count() {
        if parent.param(a).is_identical_to(expr) {
            return true;
        }
    }
    let mut leaf_count = 0;
    for a in 0..parent.param_count() {
        if is_descendant_of(parent.param(a), expr) {
            leaf_count += 1;
        }
    }
    leaf_count != 1
}

/// Extract and synthesize common subexpressions; returns how many values
/// were left on the stack.
pub(crate) fn synth_common_subexpressions<S: Scalar>(
    tree: &CodeTree<S>,
    synth: &mut ByteCodeSynth<S>,
) -> usize {
    let stacktop_before = synth.stack_top();
    let mut counts: TreeCounts<S> = FxHashMap::default();
    find_tree_counts(&mut counts, tree, None);

    loop {
        // Pick the best-scoring viable candidate.
        let mut best_score = 0usize;
        let mut chosen: Option<(TreeCountItem, CodeTree<S>)> = None;
        for bucket in counts.values() {
            for (occ, candidate) in bucket {
                let score = occ.cse_score();
                if score < 2 {
                    continue;
                }
                if candidate.depth() < occ.minimum_depth() {
                    continue;
                }
                if synth.find(candidate) {
                    continue;
                }
                if !if_balance_good(tree, candidate).balance_good {
                    continue;
                }
                if contains_other_candidates(tree, candidate, synth, &counts) {
                    // Not yet; it may become viable once its pieces exist.
                    continue;
                }
                if !good_moment_for_cse(tree, candidate) {
                    continue;
                }
                let score = score * candidate.depth() as usize;
                if score > best_score {
                    best_score = score;
                    chosen = Some((*occ, candidate.clone()));
                }
            }
        }
        let Some((occ, candidate)) = chosen else {
            break;
        };
        trace!("cse candidate: {}", crate::trace::dump(&candidate));

        let mut needs_sincos = occ.needs_sincos();
        let mut sintree = CodeTree::new_op(Opcode::Sin);
        sintree.add_param(&candidate);
        sintree.rehash(false);
        let mut costree = CodeTree::new_op(Opcode::Cos);
        costree.add_param(&candidate);
        costree.rehash(false);
        if needs_sincos != 0
            && (synth.find(&sintree) || synth.find(&costree))
        {
            if needs_sincos == 2 {
                // sin and cos already exist and the bare value is not needed.
                remove_candidate(&mut counts, &candidate);
                continue;
            }
            needs_sincos = 0;
        }

        crate::lower::synthesize_bytecode(&candidate, synth, false);
        remove_candidate(&mut counts, &candidate);

        if needs_sincos != 0 {
            if needs_sincos == 2 {
                // The value itself is also needed besides sin/cos of it.
                synth.do_dup(synth.stack_top() - 1);
            }
            synth.add_operation(Opcode::SinCos, 1, 2);
            synth.stack_top_is_at(&sintree, 1);
            synth.stack_top_is_at(&costree, 0);
        }
    }

    synth.stack_top() - stacktop_before
}

fn remove_candidate<S: Scalar>(counts: &mut TreeCounts<S>, candidate: &CodeTree<S>) {
    if let Some(bucket) = counts.get_mut(&candidate.hash()) {
        bucket.retain(|(_, t)| !t.is_identical_to(candidate));
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
    fn balanced_if_usage_is_good() {
        // if(c, sin(x), sin(x)+1): sin(x) used in both branches
        let x = CodeTree::<f64>::new_var(0);
        let sin = op(Opcode::Sin, vec![x.clone()]);
        let sum = op(Opcode::Add, vec![sin.clone(), CodeTree::new_immed(1.0)]);
        let t = op(Opcode::If, vec![CodeTree::new_var(1), sin.clone(), sum]);
        assert!(if_balance_good(&t, &sin).balance_good);
    }

    #[test]
    fn unbalanced_if_usage_is_bad() {
        // if(c, sin(x), 0): sin(x) only in one branch
        let x = CodeTree::<f64>::new_var(0);
        let sin = op(Opcode::Sin, vec![x]);
        let t = op(
            Opcode::If,
            vec![CodeTree::new_var(1), sin.clone(), CodeTree::new_immed(0.0)],
        );
        assert!(!if_balance_good(&t, &sin).balance_good);
    }

    #[test]
    fn unbalanced_use_rescued_by_outer_occurrence() {
        // if(c, sin(x), 0) + sin(x): the outer use makes it extractable
        let x = CodeTree::<f64>::new_var(0);
        let sin = op(Opcode::Sin, vec![x]);
        let iftree = op(
            Opcode::If,
            vec![CodeTree::new_var(1), sin.clone(), CodeTree::new_immed(0.0)],
        );
        let t = op(Opcode::Add, vec![iftree, sin.clone()]);
        assert!(if_balance_good(&t, &sin).balance_good);
    }

    #[test]
    fn counts_accumulate_occurrences() {
        let x = CodeTree::<f64>::new_var(0);
        let sin = op(Opcode::Sin, vec![x.clone()]);
        let t = op(Opcode::Add, vec![sin.clone(), sin.clone()]);
        let mut counts = FxHashMap::default();
        find_tree_counts(&mut counts, &t, None);
        let bucket = counts.get(&sin.hash()).unwrap();
        let (occ, _) = bucket
            .iter()
            .find(|(_, c)| c.is_identical_to(&sin))
            .unwrap();
        assert_eq!(occ.cse_score(), 2);
    }

    #[test]
    fn sincos_detection() {
        // sin(y) * cos(y): y is needed under both
        let y = op(Opcode::Add, vec![CodeTree::new_var(0), CodeTree::new_immed(1.0)]);
        let sin = op(Opcode::Sin, vec![y.clone()]);
        let cos = op(Opcode::Cos, vec![y.clone()]);
        let t = op(Opcode::Mul, vec![sin, cos]);
        let mut counts = FxHashMap::default();
        find_tree_counts(&mut counts, &t, None);
        let bucket = counts.get(&y.hash()).unwrap();
        let (occ, _) = bucket.iter().find(|(_, c)| c.is_identical_to(&y)).unwrap();
        assert_eq!(occ.needs_sincos(), 1);
        assert_eq!(occ.minimum_depth(), 1);
    }
}
