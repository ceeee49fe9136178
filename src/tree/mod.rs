//! The expression DAG: reference-counted, copy-on-write tree nodes.
//!
//! A [`CodeTree`] is a cheap-to-clone handle (`Arc`) to a node. Shared
//! substructure is expected and normal: the lifter coalesces identical
//! subtrees through a hash-keyed cache, and rewrite passes freely alias
//! subtrees. Every mutating operation first ensures unique ownership
//! (`Arc::make_mut`), so a rewrite can never be observed through an
//! unrelated handle that happens to share storage.
//!
//! Invariants maintained here:
//!
//! 1. For commutative opcodes, `params` is sorted by descending depth, then
//!    ascending hash (see [`ordering`]).
//! 2. Directional comparisons are flipped to their canonical side during the
//!    same sort.
//! 3. `hash` and `depth` are recomputed non-recursively from the children's
//!    already-computed hashes after every structural change ([`hash`]).
//! 4. `depth == 0` marks a node whose descendants changed but whose own hash
//!    has not been recomputed yet; [`CodeTree::fix_incomplete_hashes`]
//!    repairs the whole tree.

pub(crate) mod hash;
pub(crate) mod ordering;

use std::sync::Arc;

use crate::opcode::Opcode;
use crate::range;
use crate::range::TriTruth;
use crate::scalar::Scalar;

pub use hash::TreeHash;

#[derive(Clone, Debug)]
pub(crate) struct Node<S: Scalar> {
    pub(crate) opcode: Opcode,
    /// Payload of `Immed`; zero otherwise.
    pub(crate) value: S,
    /// Variable number for variables, function number for `FCall`/`PCall`.
    pub(crate) var_or_func: u32,
    pub(crate) params: Vec<CodeTree<S>>,
    pub(crate) hash: TreeHash,
    /// `1 + max(children depth)`; `0` means "hash incomplete".
    pub(crate) depth: u32,
    /// Id of the grammar that last converged on this node, if any.
    pub(crate) optimized_by: Option<u32>,
}

impl<S: Scalar> Node<S> {
    fn new(opcode: Opcode) -> Self {
        Node {
            opcode,
            value: S::zero(),
            var_or_func: 0,
            params: Vec::new(),
            hash: TreeHash::default(),
            depth: 1,
            optimized_by: None,
        }
    }
}

/// Shared, copy-on-write handle to an expression node.
#[derive(Clone, Debug)]
pub struct CodeTree<S: Scalar> {
    data: Arc<Node<S>>,
}

impl<S: Scalar> Default for CodeTree<S> {
    fn default() -> Self {
        CodeTree {
            data: Arc::new(Node::new(Opcode::Nop)),
        }
    }
}

impl<S: Scalar> CodeTree<S> {
    /// A literal node, hashed on construction.
    #[must_use]
    pub fn new_immed(v: S) -> Self {
        let mut node = Node::new(Opcode::Immed);
        node.value = v;
        hash::recalculate(&mut node);
        CodeTree { data: Arc::new(node) }
    }

    /// A variable reference, hashed on construction.
    #[must_use]
    pub fn new_var(var: u32) -> Self {
        let mut node = Node::new(Opcode::Var);
        node.var_or_func = var;
        hash::recalculate(&mut node);
        CodeTree { data: Arc::new(node) }
    }

    /// A bare operation node with no params yet; caller fills params and
    /// rehashes.
    #[must_use]
    pub fn new_op(opcode: Opcode) -> Self {
        CodeTree {
            data: Arc::new(Node::new(opcode)),
        }
    }

    #[inline]
    pub(crate) fn node(&self) -> &Node<S> {
        &self.data
    }

    #[inline]
    pub(crate) fn node_mut(&mut self) -> &mut Node<S> {
        Arc::make_mut(&mut self.data)
    }

    // -------------------------------------------------------------------------
    // Read access
    // -------------------------------------------------------------------------

    #[inline]
    #[must_use]
    pub fn opcode(&self) -> Opcode {
        self.data.opcode
    }

    /// The literal payload. Only meaningful when [`CodeTree::is_immed`].
    #[inline]
    #[must_use]
    pub fn immed(&self) -> S {
        self.data.value
    }

    #[inline]
    #[must_use]
    pub fn var(&self) -> u32 {
        self.data.var_or_func
    }

    #[inline]
    #[must_use]
    pub fn func_no(&self) -> u32 {
        self.data.var_or_func
    }

    #[inline]
    #[must_use]
    pub fn param_count(&self) -> usize {
        self.data.params.len()
    }

    #[inline]
    #[must_use]
    pub fn param(&self, n: usize) -> &CodeTree<S> {
        &self.data.params[n]
    }

    #[inline]
    #[must_use]
    pub fn params(&self) -> &[CodeTree<S>] {
        &self.data.params
    }

    /// Mutable access to the param slice. The caller owns the follow-up
    /// `rehash` (or `mark_incompletely_hashed`).
    #[inline]
    pub(crate) fn params_mut(&mut self) -> &mut [CodeTree<S>] {
        &mut self.node_mut().params
    }

    #[inline]
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.data.depth
    }

    #[inline]
    #[must_use]
    pub fn hash(&self) -> TreeHash {
        self.data.hash
    }

    #[inline]
    #[must_use]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.data)
    }

    #[inline]
    #[must_use]
    pub fn is_defined(&self) -> bool {
        self.data.opcode != Opcode::Nop
    }

    #[inline]
    #[must_use]
    pub fn is_immed(&self) -> bool {
        self.data.opcode == Opcode::Immed
    }

    #[inline]
    #[must_use]
    pub fn is_var(&self) -> bool {
        self.data.opcode == Opcode::Var
    }

    /// True when the node is a literal whose value is an integer fitting `i64`.
    #[must_use]
    pub fn is_long_integer_immed(&self) -> bool {
        self.is_immed() && self.immed().is_long_integer()
    }

    /// The literal as `i64`; only meaningful after
    /// [`CodeTree::is_long_integer_immed`].
    #[must_use]
    pub fn long_integer_immed(&self) -> i64 {
        self.immed().as_long()
    }

    #[inline]
    pub(crate) fn optimized_by(&self) -> Option<u32> {
        self.data.optimized_by
    }

    pub(crate) fn set_optimized_by(&mut self, grammar: Option<u32>) {
        self.node_mut().optimized_by = grammar;
    }

    // -------------------------------------------------------------------------
    // Structural mutation (all copy-on-write)
    // -------------------------------------------------------------------------

    pub fn set_opcode(&mut self, opcode: Opcode) {
        self.node_mut().opcode = opcode;
    }

    /// Turn this node into the literal `v` (fresh storage, fully hashed).
    pub fn replace_with_immed(&mut self, v: S) {
        *self = CodeTree::new_immed(v);
    }

    pub fn set_var(&mut self, var: u32) {
        let node = self.node_mut();
        node.opcode = Opcode::Var;
        node.var_or_func = var;
    }

    pub fn set_func_opcode(&mut self, opcode: Opcode, func_no: u32) {
        let node = self.node_mut();
        node.opcode = opcode;
        node.var_or_func = func_no;
    }

    pub fn add_param(&mut self, param: &CodeTree<S>) {
        self.node_mut().params.push(param.clone());
    }

    pub fn add_param_move(&mut self, param: CodeTree<S>) {
        self.node_mut().params.push(param);
    }

    pub fn add_params_move(&mut self, params: Vec<CodeTree<S>>) {
        self.node_mut().params.extend(params);
    }

    /// Remove `replacing_slot` and append `params` (used by assimilation).
    pub fn add_params_replacing(&mut self, params: Vec<CodeTree<S>>, replacing_slot: usize) {
        let node = self.node_mut();
        node.params.remove(replacing_slot);
        node.params.extend(params);
    }

    pub fn set_param(&mut self, which: usize, param: &CodeTree<S>) {
        self.node_mut().params[which] = param.clone();
    }

    pub fn set_param_move(&mut self, which: usize, param: CodeTree<S>) {
        self.node_mut().params[which] = param;
    }

    pub fn set_params_move(&mut self, params: Vec<CodeTree<S>>) {
        self.node_mut().params = params;
    }

    pub fn del_param(&mut self, index: usize) {
        self.node_mut().params.remove(index);
    }

    pub fn del_params(&mut self) {
        self.node_mut().params.clear();
    }

    /// Move all params out, leaving the node empty. Implies unique ownership
    /// of the returned vector (copy-on-write on a shared node).
    pub(crate) fn take_params(&mut self) -> Vec<CodeTree<S>> {
        std::mem::take(&mut self.node_mut().params)
    }

    /// Replace this handle's identity with `other`'s. Sharing-aware: the two
    /// handles alias afterwards.
    pub fn become_(&mut self, other: &CodeTree<S>) {
        if !Arc::ptr_eq(&self.data, &other.data) {
            self.data = Arc::clone(&other.data);
        }
    }

    /// Force unique ownership of this handle's node.
    pub fn copy_on_write(&mut self) {
        self.node_mut();
    }

    /// A handle guaranteed to own its node uniquely; clones when shared.
    #[must_use]
    pub fn get_unique_ref(&self) -> CodeTree<S> {
        if Arc::strong_count(&self.data) > 1 {
            CodeTree {
                data: Arc::new((*self.data).clone()),
            }
        } else {
            self.clone()
        }
    }

    // -------------------------------------------------------------------------
    // Hashing
    // -------------------------------------------------------------------------

    /// Canonical sort, optional constant folding, then hash + depth update.
    ///
    /// Must run after any structural change before the node's hash is relied
    /// upon again.
    pub fn rehash(&mut self, constant_fold: bool) {
        if constant_fold {
            crate::fold::constant_folding(self);
        }
        let node = self.node_mut();
        ordering::sort_params(node);
        hash::recalculate(node);
    }

    pub fn mark_incompletely_hashed(&mut self) {
        self.node_mut().depth = 0;
    }

    #[inline]
    #[must_use]
    pub fn is_incompletely_hashed(&self) -> bool {
        self.data.depth == 0
    }

    /// Walk the tree, propagate "incomplete" marks up from mutated
    /// descendants, then rehash every marked node bottom-up.
    pub fn fix_incomplete_hashes(&mut self) {
        mark_incompletes(self);
        fix_incompletes(self);
    }

    // -------------------------------------------------------------------------
    // Identity
    // -------------------------------------------------------------------------

    /// Structural equality: quick hash reject, then full compare.
    #[must_use]
    pub fn is_identical_to(&self, other: &CodeTree<S>) -> bool {
        if Arc::ptr_eq(&self.data, &other.data) {
            return true;
        }
        if self.data.hash != other.data.hash {
            return false;
        }
        self.structurally_equal(other)
    }

    fn structurally_equal(&self, other: &CodeTree<S>) -> bool {
        let (a, b) = (&*self.data, &*other.data);
        if a.opcode != b.opcode {
            return false;
        }
        match a.opcode {
            Opcode::Immed => return a.value.fp_equal(b.value),
            Opcode::Var => return a.var_or_func == b.var_or_func,
            Opcode::FCall | Opcode::PCall => {
                if a.var_or_func != b.var_or_func {
                    return false;
                }
            }
            _ => {}
        }
        if a.params.len() != b.params.len() {
            return false;
        }
        a.params
            .iter()
            .zip(&b.params)
            .all(|(x, y)| x.is_identical_to(y))
    }

    // -------------------------------------------------------------------------
    // Derived predicates (range-analysis backed)
    // -------------------------------------------------------------------------

    /// True if this node can only evaluate to 0 or 1.
    #[must_use]
    pub fn is_logical_value(&self) -> bool {
        range::is_logical_value(self)
    }

    /// True if range analysis proves the sign (`positive`: ≥ 0, else < 0).
    #[must_use]
    pub fn is_always_signed(&self, positive: bool) -> bool {
        let info = range::get_positivity_info(self);
        if positive {
            info == TriTruth::Always
        } else {
            info == TriTruth::Never
        }
    }

    /// True if integrality is proven (`integer`) or disproven (`!integer`).
    #[must_use]
    pub fn is_always_integer(&self, integer: bool) -> bool {
        let info = range::get_integer_info(self);
        if integer {
            info == TriTruth::Always
        } else {
            info == TriTruth::Never
        }
    }

    /// Parity query: `odd = true` asks "is this always odd".
    #[must_use]
    pub fn is_always_parity(&self, odd: bool) -> bool {
        let info = range::get_evenness_info(self);
        if odd { info == TriTruth::Never } else { info == TriTruth::Always }
    }

    /// Evenness of an immediate: `Always` even, `Never` (odd), or `Unknown`.
    #[must_use]
    pub fn get_evenness_info(&self) -> TriTruth {
        range::get_evenness_info(self)
    }
}

fn mark_incompletes<S: Scalar>(tree: &mut CodeTree<S>) -> bool {
    if tree.is_incompletely_hashed() {
        return true;
    }
    let mut needs_rehash = false;
    for a in 0..tree.param_count() {
        let mut child = tree.param(a).clone();
        if mark_incompletes(&mut child) {
            tree.set_param_move(a, child);
            needs_rehash = true;
        }
    }
    if needs_rehash {
        tree.mark_incompletely_hashed();
    }
    needs_rehash
}

fn fix_incompletes<S: Scalar>(tree: &mut CodeTree<S>) {
    if tree.is_incompletely_hashed() {
        for a in 0..tree.param_count() {
            let mut child = tree.param(a).clone();
            fix_incompletes(&mut child);
            tree.set_param_move(a, child);
        }
        tree.rehash(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mul(params: Vec<CodeTree<f64>>) -> CodeTree<f64> {
        let mut t = CodeTree::new_op(Opcode::Mul);
        t.set_params_move(params);
        t.rehash(false);
        t
    }

    #[test]
    fn identical_after_commutative_sort() {
        let x = CodeTree::<f64>::new_var(0);
        let y = CodeTree::<f64>::new_var(1);
        let a = mul(vec![x.clone(), y.clone()]);
        let b = mul(vec![y, x]);
        assert_eq!(a.hash(), b.hash());
        assert!(a.is_identical_to(&b));
    }

    #[test]
    fn copy_on_write_isolates_sharers() {
        let x = CodeTree::<f64>::new_var(0);
        let shared = mul(vec![x.clone(), CodeTree::new_immed(2.0)]);
        let mut alias = shared.clone();
        assert!(alias.ref_count() >= 2);
        alias.set_param_move(0, CodeTree::new_immed(7.0));
        alias.rehash(false);
        // The original handle still sees the variable.
        assert!(shared.param(0).is_var());
        assert!(alias.param(0).is_immed());
    }

    #[test]
    fn become_aliases() {
        let a = CodeTree::<f64>::new_immed(3.0);
        let mut b = CodeTree::new_var(0);
        b.become_(&a);
        assert!(b.is_identical_to(&a));
        assert!(b.is_immed());
    }

    #[test]
    fn unique_ref_detaches() {
        let a = CodeTree::<f64>::new_immed(1.5);
        let _alias = a.clone();
        let unique = a.get_unique_ref();
        assert_eq!(unique.ref_count(), 1);
        assert!(unique.is_identical_to(&a));
    }

    #[test]
    fn fix_incomplete_hashes_repairs_marked_chain() {
        let x = CodeTree::<f64>::new_var(0);
        let inner = mul(vec![x, CodeTree::new_immed(3.0)]);
        let mut outer = mul(vec![inner, CodeTree::new_immed(5.0)]);
        let before = outer.hash();

        // Mutate a grandchild without rehashing the ancestors.
        let mut child = outer.param(0).clone();
        child.set_param_move(1, CodeTree::new_immed(4.0));
        child.rehash(false);
        outer.set_param_move(0, child);
        outer.mark_incompletely_hashed();

        outer.fix_incomplete_hashes();
        assert!(!outer.is_incompletely_hashed());
        assert_ne!(outer.hash(), before);
    }
}
