//! Grouping of common factors and terms inside `Mul` and `Add`.
//!
//! A [`CollectionSet`] maps a subtree (by structural identity) to an
//! accumulated factor: for `Mul` the factor is the exponent (`x`, `Pow(x,y)`,
//! `Sqrt(x)`, `Inv(x)`, ... all contribute the same base with different
//! exponents), for `Add` it is the additive coefficient. When a base appears
//! twice the factors are summed and the node is regenerated from the set.
//!
//! `Mul` additionally merges bases that share a constant exponent
//! (`x^2 * y^2` → `(x*y)^2`), wrapping the merged base in `Abs` when an even
//! exponent's sign guarantee would otherwise be lost.

use num_traits::Float;
use rustc_hash::FxHashMap;

use crate::opcode::Opcode;
use crate::scalar::Scalar;
use crate::tree::{CodeTree, TreeHash};

struct Collection<S: Scalar> {
    value: CodeTree<S>,
    factor: CodeTree<S>,
    factor_needs_rehashing: bool,
}

pub(crate) struct CollectionSet<S: Scalar> {
    collections: FxHashMap<TreeHash, Vec<Collection<S>>>,
    /// Insertion order of (hash, index) pairs, for deterministic output.
    order: Vec<(TreeHash, usize)>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum CollectionResult {
    Ok,
    Suboptimal,
}

impl<S: Scalar> CollectionSet<S> {
    pub(crate) fn new() -> Self {
        CollectionSet {
            collections: FxHashMap::default(),
            order: Vec::new(),
        }
    }

    fn find_identical(&self, value: &CodeTree<S>) -> Option<(TreeHash, usize)> {
        let hash = value.hash();
        let bucket = self.collections.get(&hash)?;
        bucket
            .iter()
            .position(|c| c.value.is_identical_to(value))
            .map(|i| (hash, i))
    }

    fn add_factor_to(&mut self, factor: &CodeTree<S>, pos: (TreeHash, usize)) {
        let c = &mut self.collections.get_mut(&pos.0).expect("bucket exists")[pos.1];
        if c.factor_needs_rehashing {
            c.factor.add_param(factor);
        } else {
            let mut add = CodeTree::new_op(Opcode::Add);
            add.add_param_move(std::mem::take(&mut c.factor));
            add.add_param(factor);
            c.factor = add;
            c.factor_needs_rehashing = true;
        }
    }

    pub(crate) fn add_collection(
        &mut self,
        value: &CodeTree<S>,
        factor: &CodeTree<S>,
    ) -> CollectionResult {
        if let Some(pos) = self.find_identical(value) {
            self.add_factor_to(factor, pos);
            return CollectionResult::Suboptimal;
        }
        let hash = value.hash();
        let bucket = self.collections.entry(hash).or_default();
        self.order.push((hash, bucket.len()));
        bucket.push(Collection {
            value: value.clone(),
            factor: factor.clone(),
            factor_needs_rehashing: false,
        });
        CollectionResult::Ok
    }

    pub(crate) fn add_unit_collection(&mut self, value: &CodeTree<S>) -> CollectionResult {
        self.add_collection(value, &CodeTree::new_immed(S::one()))
    }

    fn into_entries(mut self) -> Vec<(CodeTree<S>, CodeTree<S>)> {
        let mut out = Vec::with_capacity(self.order.len());
        for (hash, index) in std::mem::take(&mut self.order) {
            let c = &mut self.collections.get_mut(&hash).expect("bucket exists")[index];
            let mut factor = std::mem::take(&mut c.factor);
            if c.factor_needs_rehashing {
                factor.rehash(true);
            }
            out.push((std::mem::take(&mut c.value), factor));
        }
        out
    }

    fn contains(&self, value: &CodeTree<S>) -> bool {
        self.find_identical(value).is_some()
    }
}

/// Strip the exponent off a `Mul` operand: `Pow(x,y)` yields `(x, y)`,
/// `RSqrt(x)` yields `(x, -½)`, `Inv(x)` yields `(x, -1)`. Plain operands
/// yield exponent 1.
///
/// `Sqrt`/`Cbrt` are deliberately NOT stripped: those nodes are produced by
/// the pre-lowering root-chain pass, and stripping them here would bounce
/// the tree between the two forms forever. (The lifter already turns
/// `Sqrt`/`Cbrt` bytecode into `Pow`, so nothing is lost during rewriting.)
fn strip_exponent<S: Scalar>(
    value: &mut CodeTree<S>,
    has_highlevel_opcodes: &mut bool,
) -> CodeTree<S> {
    match value.opcode() {
        Opcode::Pow => {
            let exponent = value.param(1).clone();
            let base = value.param(0).clone();
            value.become_(&base);
            exponent
        }
        Opcode::RSqrt => {
            let base = value.param(0).clone();
            value.become_(&base);
            *has_highlevel_opcodes = true;
            CodeTree::new_immed(S::from_f64(-0.5).unwrap_or_else(|| -S::one()))
        }
        Opcode::Inv => {
            let base = value.param(0).clone();
            value.become_(&base);
            *has_highlevel_opcodes = true;
            CodeTree::new_immed(-S::one())
        }
        _ => CodeTree::new_immed(S::one()),
    }
}

fn collect_mul_group<S: Scalar>(
    mul: &mut CollectionSet<S>,
    tree: &CodeTree<S>,
    factor: &CodeTree<S>,
    should_regenerate: &mut bool,
    has_highlevel_opcodes: &mut bool,
) {
    for a in 0..tree.param_count() {
        let mut value = tree.param(a).clone();
        let mut exponent = strip_exponent(&mut value, has_highlevel_opcodes);
        if !factor.is_immed() || factor.immed() != S::one() {
            let mut new_exp = CodeTree::new_op(Opcode::Mul);
            new_exp.add_param_move(exponent);
            new_exp.add_param(factor);
            new_exp.rehash(true);
            exponent = new_exp;
        }
        if mul.add_collection(&value, &exponent) == CollectionResult::Suboptimal {
            *should_regenerate = true;
        }
    }
}

/// Bases grouped by a shared constant exponent, with the combining pass that
/// turns `x^a * y^b` with a "neat" difference `b - a` into `(x*y)^a * y^(b-a)`.
struct ConstantExponentCollection<S: Scalar> {
    data: Vec<(S, Vec<CodeTree<S>>)>,
}

impl<S: Scalar> ConstantExponentCollection<S> {
    fn new() -> Self {
        ConstantExponentCollection { data: Vec::new() }
    }

    fn move_to_set_unique(&mut self, exponent: S, trees: Vec<CodeTree<S>>) {
        self.data.push((exponent, trees));
    }

    fn move_to_set_nonunique(&mut self, exponent: S, mut trees: Vec<CodeTree<S>>) {
        let pos = self
            .data
            .iter()
            .position(|(e, _)| *e >= exponent);
        match pos {
            Some(i) if self.data[i].0 == exponent => self.data[i].1.append(&mut trees),
            Some(i) => self.data.insert(i, (exponent, trees)),
            None => self.data.push((exponent, trees)),
        }
    }

    /// The combining loop. Returns true if anything merged.
    fn optimize(&mut self) -> bool {
        let mut changed = false;
        self.data
            .sort_by(|x, y| x.0.partial_cmp(&y.0).unwrap_or(std::cmp::Ordering::Equal));
        'redo: loop {
            for a in 0..self.data.len() {
                let exp_a = self.data[a].0;
                if exp_a.fp_equal(S::one()) {
                    continue;
                }
                for b in (a + 1)..self.data.len() {
                    let exp_b = self.data[b].0;
                    let exp_diff = exp_b - exp_a;
                    if exp_diff >= exp_a.abs() {
                        break;
                    }
                    let diff_scaled = exp_diff * S::from_long(16);
                    if !diff_scaled.is_integer_value()
                        || (exp_b.is_integer_value() && !exp_diff.is_integer_value())
                    {
                        continue;
                    }
                    // Moving an even integer power to a smaller non-even one
                    // loses the sign guarantee; keep it via Abs.
                    if exp_b.is_even_integer() && !exp_a.is_even_integer() {
                        let b_set = std::mem::take(&mut self.data[b].1);
                        let mut merged = CodeTree::new_op(Opcode::Mul);
                        merged.set_params_move(b_set);
                        merged.rehash(true);
                        let mut abs = CodeTree::new_op(Opcode::Abs);
                        abs.add_param_move(merged);
                        abs.rehash(true);
                        self.data[b].1 = vec![abs];
                    }
                    let b_set = self.data[b].1.clone();
                    self.data[a].1.extend(b_set.iter().cloned());
                    self.data.remove(b);
                    self.move_to_set_nonunique(exp_diff, b_set);
                    changed = true;
                    continue 'redo;
                }
            }
            break;
        }
        changed
    }
}

/// Group a `Mul`'s operands by base, summing exponents, and optionally merge
/// constant exponents. Returns true when the tree changed.
pub(crate) fn fold_mul_grouping<S: Scalar>(tree: &mut CodeTree<S>) -> bool {
    let mut has_highlevel_opcodes = false;
    let mut should_regenerate = false;
    let mut mul = CollectionSet::new();

    collect_mul_group(
        &mut mul,
        tree,
        &CodeTree::new_immed(S::one()),
        &mut should_regenerate,
        &mut has_highlevel_opcodes,
    );

    // Group bases by exponent (structural identity of the exponent).
    let mut by_exponent: Vec<(CodeTree<S>, Vec<CodeTree<S>>)> = Vec::new();
    for (value, exponent) in mul.into_entries() {
        match by_exponent
            .iter_mut()
            .find(|(e, _)| e.is_identical_to(&exponent))
        {
            Some((e, bases)) => {
                if !e.is_immed() || !e.immed().fp_equal(S::one()) {
                    should_regenerate = true;
                }
                bases.push(value);
            }
            None => by_exponent.push((exponent, vec![value])),
        }
    }

    // Split out constant exponents for the combining pass.
    let mut by_float_exponent = ConstantExponentCollection::new();
    by_exponent.retain_mut(|(exponent, bases)| {
        if exponent.is_immed() {
            let e = exponent.immed();
            if e != S::zero() {
                by_float_exponent.move_to_set_unique(e, std::mem::take(bases));
            }
            false
        } else {
            true
        }
    });
    if by_float_exponent.optimize() {
        should_regenerate = true;
    }

    if !should_regenerate {
        return false;
    }

    let before = {
        let mut b = tree.clone();
        b.copy_on_write();
        b
    };
    tree.del_params();

    // Non-constant exponents first.
    for (exponent, bases) in by_exponent {
        let mut mulgroup = CodeTree::new_op(Opcode::Mul);
        mulgroup.set_params_move(bases);
        mulgroup.rehash(true);
        let mut pow = CodeTree::new_op(Opcode::Pow);
        pow.add_param_move(mulgroup);
        pow.add_param_move(exponent);
        pow.rehash(true);
        tree.add_param_move(pow);
    }
    // Then constant exponents, preferring the dedicated root opcodes where
    // the original operand list used them.
    for (exponent, bases) in by_float_exponent.data {
        if exponent.fp_equal(S::one()) {
            tree.add_params_move(bases);
            continue;
        }
        let mut mulgroup = CodeTree::new_op(Opcode::Mul);
        mulgroup.set_params_move(bases);
        mulgroup.rehash(true);
        if has_highlevel_opcodes {
            let special = if exponent == S::one() / S::from_long(3) {
                Some(Opcode::Cbrt)
            } else if exponent == S::from_f64(0.5).unwrap_or_else(S::one) {
                Some(Opcode::Sqrt)
            } else if exponent == S::from_f64(-0.5).unwrap_or_else(|| -S::one()) {
                Some(Opcode::RSqrt)
            } else if exponent == -S::one() {
                Some(Opcode::Inv)
            } else {
                None
            };
            if let Some(op) = special {
                let mut node = CodeTree::new_op(op);
                node.add_param_move(mulgroup);
                node.rehash(true);
                tree.add_param_move(node);
                continue;
            }
        }
        let mut pow = CodeTree::new_op(Opcode::Pow);
        pow.add_param_move(mulgroup);
        pow.add_param_move(CodeTree::new_immed(exponent));
        pow.rehash(true);
        tree.add_param_move(pow);
    }
    // Identity against the pre-rewrite tree breaks the oscillation between
    // equivalent groupings like (x*z)^0.5*x^16.5 and x^17*z^0.5.
    tree.rehash(false);
    !tree.is_identical_to(&before)
}

/// Group an `Add`'s terms by their non-constant part, summing coefficients.
/// Returns true when the tree changed.
pub(crate) fn fold_add_grouping<S: Scalar>(tree: &mut CodeTree<S>) -> bool {
    let mut should_regenerate = false;
    let mut add = CollectionSet::new();
    for a in 0..tree.param_count() {
        if tree.param(a).opcode() == Opcode::Mul {
            continue;
        }
        if add.add_unit_collection(tree.param(a)) == CollectionResult::Suboptimal {
            should_regenerate = true;
        }
    }

    let mut remaining = vec![false; tree.param_count()];
    let mut mulgroups_remaining = 0usize;
    'next_param: for a in 0..tree.param_count() {
        let mulgroup = tree.param(a);
        if mulgroup.opcode() != Opcode::Mul {
            continue;
        }
        // x + y*x*z  ->  x*(1 + y*z)
        for b in 0..mulgroup.param_count() {
            if mulgroup.param(b).is_immed() {
                continue;
            }
            if let Some(pos) = add.find_identical(mulgroup.param(b)) {
                let mut tmp = mulgroup.get_unique_ref();
                tmp.del_param(b);
                tmp.rehash(true);
                add.add_factor_to(&tmp, pos);
                should_regenerate = true;
                continue 'next_param;
            }
        }
        remaining[a] = true;
        mulgroups_remaining += 1;
    }

    if mulgroups_remaining > 0 {
        if mulgroups_remaining > 1 {
            // x*a + x*b -> x*(a+b): find the most valuable duplicate factor
            // across the remaining mul-groups.
            let mut occurrences: Vec<(CodeTree<S>, usize)> = Vec::new();
            let mut found_dup = false;
            for a in 0..tree.param_count() {
                if !remaining[a] {
                    continue;
                }
                'next_factor: for b in 0..tree.param(a).param_count() {
                    let p = tree.param(a).param(b);
                    for entry in &mut occurrences {
                        if entry.0.is_identical_to(p) {
                            entry.1 += 1;
                            found_dup = true;
                            continue 'next_factor;
                        }
                    }
                    occurrences.push((p.clone(), 1));
                }
            }
            if found_dup {
                // Scored by count * depth.
                let mut group_by: Option<CodeTree<S>> = None;
                let mut best = 0usize;
                for (value, count) in occurrences {
                    if count <= 1 {
                        continue;
                    }
                    let score = count * value.depth() as usize;
                    if score > best {
                        best = score;
                        group_by = Some(value);
                    }
                }
                if let Some(group_by) = group_by {
                    let mut group_add = CodeTree::new_op(Opcode::Add);
                    for a in 0..tree.param_count() {
                        if !remaining[a] {
                            continue;
                        }
                        for b in 0..tree.param(a).param_count() {
                            if group_by.is_identical_to(tree.param(a).param(b)) {
                                let mut tmp = tree.param(a).get_unique_ref();
                                tmp.del_param(b);
                                tmp.rehash(true);
                                group_add.add_param_move(tmp);
                                remaining[a] = false;
                                break;
                            }
                        }
                    }
                    group_add.rehash(true);
                    let mut group = CodeTree::new_op(Opcode::Mul);
                    group.add_param_move(group_by);
                    group.add_param_move(group_add);
                    group.rehash(true);
                    add.add_unit_collection(&group);
                    should_regenerate = true;
                }
            }
        }
        for a in 0..tree.param_count() {
            if remaining[a]
                && add.add_unit_collection(tree.param(a)) == CollectionResult::Suboptimal
            {
                should_regenerate = true;
            }
        }
    }

    if !should_regenerate {
        return false;
    }

    tree.del_params();
    for (value, coeff) in add.into_entries() {
        if coeff.is_immed() {
            if coeff.immed().fp_equal(S::zero()) {
                continue;
            }
            if coeff.immed().fp_equal(S::one()) {
                tree.add_param_move(value);
                continue;
            }
        }
        let mut mul = CodeTree::new_op(Opcode::Mul);
        mul.add_param_move(value);
        mul.add_param_move(coeff);
        mul.rehash(true);
        tree.add_param_move(mul);
    }
    true
}
