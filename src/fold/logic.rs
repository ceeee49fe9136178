//! Folding of logical conjunctions/disjunctions and their arithmetic
//! cousins through a relationship set.
//!
//! A [`ComparisonSet`] accumulates the operands of an `And`/`Or` (or the
//! logical items inside an `Add`/`Mul`) as either *plain items* (a subtree
//! plus a negation flag) or *comparisons* `(a, b, mask)` where the mask is a
//! bitset over {less, equal, greater}. Combining masks detects tautologies
//! and contradictions: `(x<y) & (x>y)` intersects to the empty mask (whole
//! expression false), `(a<b) | (a=b) | (a>b)` unions to the full mask (whole
//! expression true).

use crate::opcode::Opcode;
use crate::scalar::Scalar;
use crate::tree::CodeTree;

pub(crate) const LT_MASK: u8 = 0x1;
pub(crate) const EQ_MASK: u8 = 0x2;
pub(crate) const LE_MASK: u8 = LT_MASK | EQ_MASK;
pub(crate) const GT_MASK: u8 = 0x4;
pub(crate) const NE_MASK: u8 = GT_MASK | LT_MASK;
pub(crate) const GE_MASK: u8 = GT_MASK | EQ_MASK;
const FULL_MASK: u8 = LT_MASK | EQ_MASK | GT_MASK;

fn swap_mask(m: u8) -> u8 {
    (m & EQ_MASK)
        | if m & LT_MASK != 0 { GT_MASK } else { 0 }
        | if m & GT_MASK != 0 { LT_MASK } else { 0 }
}

/// How an insertion changed the set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SetChange {
    Ok,
    /// The whole expression collapsed to 0.
    BecomeZero,
    /// The whole expression collapsed to 1.
    BecomeOne,
    /// Something merged; the node must be regenerated from the set.
    Suboptimal,
}

/// Which n-ary context the set is folding for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CondType {
    Or,
    And,
    Mul,
    Add,
}

struct Comparison<S: Scalar> {
    a: CodeTree<S>,
    b: CodeTree<S>,
    relationship: u8,
}

struct Item<S: Scalar> {
    value: CodeTree<S>,
    negated: bool,
}

pub(crate) struct ComparisonSet<S: Scalar> {
    relationships: Vec<Comparison<S>>,
    plain_set: Vec<Item<S>>,
    const_offset: i64,
}

impl<S: Scalar> ComparisonSet<S> {
    pub(crate) fn new() -> Self {
        ComparisonSet {
            relationships: Vec::new(),
            plain_set: Vec::new(),
            const_offset: 0,
        }
    }

    pub(crate) fn add_item(&mut self, a: &CodeTree<S>, negated: bool, cond: CondType) -> SetChange {
        for c in 0..self.plain_set.len() {
            if self.plain_set[c].value.is_identical_to(a) {
                if negated != self.plain_set[c].negated {
                    return match cond {
                        CondType::Or => SetChange::BecomeOne,
                        CondType::Add => {
                            // x + !x = 1
                            self.plain_set.remove(c);
                            self.const_offset += 1;
                            SetChange::Suboptimal
                        }
                        CondType::And | CondType::Mul => SetChange::BecomeZero,
                    };
                }
                return SetChange::Suboptimal;
            }
        }
        self.plain_set.push(Item {
            value: a.clone(),
            negated,
        });
        SetChange::Ok
    }

    pub(crate) fn add_relationship(
        &mut self,
        mut a: CodeTree<S>,
        mut b: CodeTree<S>,
        mut reltype: u8,
        cond: CondType,
    ) -> SetChange {
        match cond {
            CondType::Or => {
                if reltype == FULL_MASK {
                    return SetChange::BecomeOne;
                }
            }
            CondType::Add => {
                if reltype == FULL_MASK {
                    self.const_offset += 1;
                    return SetChange::Suboptimal;
                }
            }
            CondType::And | CondType::Mul => {
                if reltype == 0 {
                    return SetChange::BecomeZero;
                }
            }
        }

        // Canonicalize the pair by hash order.
        if a.hash() >= b.hash() {
            std::mem::swap(&mut a, &mut b);
            reltype = swap_mask(reltype);
        }

        for c in 0..self.relationships.len() {
            let existing = &mut self.relationships[c];
            if !existing.a.is_identical_to(&a) || !existing.b.is_identical_to(&b) {
                continue;
            }
            match cond {
                CondType::Or => {
                    let newrel = existing.relationship | reltype;
                    if newrel == FULL_MASK {
                        return SetChange::BecomeOne;
                    }
                    existing.relationship = newrel;
                }
                CondType::And | CondType::Mul => {
                    let newrel = existing.relationship & reltype;
                    if newrel == 0 {
                        return SetChange::BecomeZero;
                    }
                    existing.relationship = newrel;
                }
                CondType::Add => {
                    let newrel_or = existing.relationship | reltype;
                    let newrel_and = existing.relationship & reltype;
                    if newrel_or == NE_MASK && newrel_and == 0 {
                        // (x<y) + (x>y) = x≠y
                        existing.relationship = NE_MASK;
                        return SetChange::Suboptimal;
                    }
                    if newrel_or == FULL_MASK && newrel_and == 0 {
                        // (x<y) + (x>=y) = 1, (x=y) + (x!=y) = 1
                        self.const_offset += 1;
                        self.relationships.remove(c);
                        return SetChange::Suboptimal;
                    }
                    if newrel_or == FULL_MASK && newrel_and == EQ_MASK {
                        // (x<=y) + (x>=y) = 1 + (x=y)
                        existing.relationship = EQ_MASK;
                        self.const_offset += 1;
                        return SetChange::Suboptimal;
                    }
                    continue;
                }
            }
            return SetChange::Suboptimal;
        }
        self.relationships.push(Comparison {
            a,
            b,
            relationship: reltype,
        });
        SetChange::Ok
    }
}

fn mask_opcode(mask: u8) -> Opcode {
    match mask {
        LT_MASK => Opcode::Less,
        EQ_MASK => Opcode::Equal,
        GT_MASK => Opcode::Greater,
        LE_MASK => Opcode::LessOrEq,
        NE_MASK => Opcode::NEqual,
        _ => Opcode::GreaterOrEq,
    }
}

/// Shared folding body for `And`/`Or` (logical context) and the logical
/// items of `Add`/`Mul` (arithmetic context).
///
/// Returns true when the tree was changed (including full collapse).
pub(crate) fn fold_logic_common<S: Scalar>(
    tree: &mut CodeTree<S>,
    cond: CondType,
    is_logical: bool,
) -> bool {
    let mut should_regenerate = false;
    let mut set = ComparisonSet::new();
    for a in 0..tree.param_count() {
        let atree = tree.param(a).clone();
        let change = match atree.opcode() {
            Opcode::Equal => {
                set.add_relationship(atree.param(0).clone(), atree.param(1).clone(), EQ_MASK, cond)
            }
            Opcode::NEqual => {
                set.add_relationship(atree.param(0).clone(), atree.param(1).clone(), NE_MASK, cond)
            }
            Opcode::Less => {
                set.add_relationship(atree.param(0).clone(), atree.param(1).clone(), LT_MASK, cond)
            }
            Opcode::LessOrEq => {
                set.add_relationship(atree.param(0).clone(), atree.param(1).clone(), LE_MASK, cond)
            }
            Opcode::Greater => {
                set.add_relationship(atree.param(0).clone(), atree.param(1).clone(), GT_MASK, cond)
            }
            Opcode::GreaterOrEq => {
                set.add_relationship(atree.param(0).clone(), atree.param(1).clone(), GE_MASK, cond)
            }
            Opcode::Not => set.add_item(atree.param(0), true, cond),
            Opcode::NotNot => set.add_item(atree.param(0), false, cond),
            _ => {
                if is_logical || atree.is_logical_value() {
                    set.add_item(&atree, false, cond)
                } else {
                    SetChange::Ok
                }
            }
        };
        match change {
            SetChange::Ok => {}
            SetChange::BecomeZero => {
                tree.replace_with_immed(S::zero());
                return true;
            }
            SetChange::BecomeOne => {
                tree.replace_with_immed(S::one());
                return true;
            }
            SetChange::Suboptimal => should_regenerate = true,
        }
    }
    if !should_regenerate {
        return false;
    }

    if is_logical {
        tree.del_params();
    } else {
        // Keep non-logical operands; the set only absorbed logical ones.
        for a in (0..tree.param_count()).rev() {
            if tree.param(a).is_logical_value() {
                tree.del_param(a);
            }
        }
    }

    for item in set.plain_set {
        if item.negated {
            let mut r = CodeTree::new_op(Opcode::Not);
            r.add_param_move(item.value);
            r.rehash(true);
            tree.add_param_move(r);
        } else if is_logical {
            tree.add_param_move(item.value);
        } else {
            let mut r = CodeTree::new_op(Opcode::NotNot);
            r.add_param_move(item.value);
            r.rehash(true);
            tree.add_param_move(r);
        }
    }
    for comp in set.relationships {
        let mut r = CodeTree::new_op(mask_opcode(comp.relationship));
        r.add_param_move(comp.a);
        r.add_param_move(comp.b);
        r.rehash(true);
        tree.add_param_move(r);
    }
    if set.const_offset != 0 {
        tree.add_param_move(CodeTree::new_immed(S::from_long(set.const_offset)));
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmp(op: Opcode, a: &CodeTree<f64>, b: &CodeTree<f64>) -> CodeTree<f64> {
        let mut t = CodeTree::new_op(op);
        t.add_param(a);
        t.add_param(b);
        t.rehash(false);
        t
    }

    #[test]
    fn contradiction_under_and() {
        // (x < y) & (y < x) -> 0
        let x = CodeTree::<f64>::new_var(0);
        let y = CodeTree::<f64>::new_var(1);
        let mut t = CodeTree::new_op(Opcode::And);
        t.add_param_move(cmp(Opcode::Less, &x, &y));
        t.add_param_move(cmp(Opcode::Less, &y, &x));
        t.rehash(false);

        assert!(fold_logic_common(&mut t, CondType::And, true));
        assert!(t.is_immed());
        assert_eq!(t.immed(), 0.0);
    }

    #[test]
    fn tautology_under_or() {
        // (a<b) | (a=b) | (a>b) -> 1
        let a = CodeTree::<f64>::new_var(0);
        let b = CodeTree::<f64>::new_var(1);
        let mut t = CodeTree::new_op(Opcode::Or);
        t.add_param_move(cmp(Opcode::Less, &a, &b));
        t.add_param_move(cmp(Opcode::Equal, &a, &b));
        t.add_param_move(cmp(Opcode::Greater, &a, &b));
        t.rehash(false);

        assert!(fold_logic_common(&mut t, CondType::Or, true));
        assert!(t.is_immed());
        assert_eq!(t.immed(), 1.0);
    }

    #[test]
    fn mask_merge_under_add() {
        // (x<y) + (x>y) -> x != y
        let x = CodeTree::<f64>::new_var(0);
        let y = CodeTree::<f64>::new_var(1);
        let mut t = CodeTree::new_op(Opcode::Add);
        t.add_param_move(cmp(Opcode::Less, &x, &y));
        t.add_param_move(cmp(Opcode::Greater, &x, &y));
        t.rehash(false);

        assert!(fold_logic_common(&mut t, CondType::Add, false));
        assert_eq!(t.param_count(), 1);
        assert_eq!(t.param(0).opcode(), Opcode::NEqual);
    }

    #[test]
    fn complement_under_add_becomes_one() {
        // (x<=y) + (x>=y) = 1 + (x=y)
        let x = CodeTree::<f64>::new_var(0);
        let y = CodeTree::<f64>::new_var(1);
        let mut t = CodeTree::new_op(Opcode::Add);
        t.add_param_move(cmp(Opcode::LessOrEq, &x, &y));
        t.add_param_move(cmp(Opcode::GreaterOrEq, &x, &y));
        t.rehash(false);

        assert!(fold_logic_common(&mut t, CondType::Add, false));
        let mut saw_eq = false;
        let mut saw_one = false;
        for p in t.params() {
            saw_eq |= p.opcode() == Opcode::Equal;
            saw_one |= p.is_immed() && p.immed() == 1.0;
        }
        assert!(saw_eq && saw_one);
    }

    #[test]
    fn duplicate_items_merge() {
        let x = CodeTree::<f64>::new_var(0);
        let notnot = {
            let mut t = CodeTree::new_op(Opcode::NotNot);
            t.add_param(&x);
            t.rehash(false);
            t
        };
        let mut t = CodeTree::new_op(Opcode::And);
        t.add_param(&notnot);
        t.add_param(&notnot);
        t.rehash(false);

        assert!(fold_logic_common(&mut t, CondType::And, true));
        assert_eq!(t.param_count(), 1);
    }
}
