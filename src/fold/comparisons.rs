//! Range-based folding of the six comparison opcodes.
//!
//! A decision table per opcode encodes what to do when the operands are
//! identical, when range analysis proves a definite ordering, and when one
//! side is a logical value while the other sits in a revealing sub-range.

use crate::opcode::Opcode;
use crate::range::{Range, calculate_result_boundaries};
use crate::scalar::Scalar;
use crate::tree::CodeTree;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Decision {
    MakeFalse,
    MakeTrue,
    MakeNEqual,
    MakeEqual,
    MakeNotNotP0,
    MakeNotNotP1,
    MakeNotP0,
    MakeNotP1,
    Unchanged,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum WhenCase {
    Never,
    Eq0,
    Eq1,
    Gt0Le1,
    Ge0Lt1,
}

struct LogicalCase {
    what: Decision,
    when: WhenCase,
}

struct ComparisonData {
    if_identical: Decision,
    /// What to do if always `<`, `<=`, `>`, `>=` (in that order).
    if_always: [Decision; 4],
    p0_logical_a: LogicalCase,
    p1_logical_a: LogicalCase,
    p0_logical_b: LogicalCase,
    p1_logical_b: LogicalCase,
}

const fn case(what: Decision, when: WhenCase) -> LogicalCase {
    LogicalCase { what, when }
}

/// Indexed by `opcode - Equal`.
static DATA: [ComparisonData; 6] = [
    // Equal
    ComparisonData {
        if_identical: Decision::MakeTrue,
        if_always: [
            Decision::MakeFalse,
            Decision::Unchanged,
            Decision::MakeFalse,
            Decision::Unchanged,
        ],
        p0_logical_a: case(Decision::MakeNotNotP0, WhenCase::Eq1),
        p1_logical_a: case(Decision::MakeNotNotP1, WhenCase::Eq1),
        p0_logical_b: case(Decision::MakeNotP0, WhenCase::Eq0),
        p1_logical_b: case(Decision::MakeNotP1, WhenCase::Eq0),
    },
    // NEqual
    ComparisonData {
        if_identical: Decision::MakeFalse,
        if_always: [
            Decision::MakeTrue,
            Decision::Unchanged,
            Decision::MakeTrue,
            Decision::Unchanged,
        ],
        p0_logical_a: case(Decision::MakeNotNotP0, WhenCase::Eq0),
        p1_logical_a: case(Decision::MakeNotNotP1, WhenCase::Eq0),
        p0_logical_b: case(Decision::MakeNotP0, WhenCase::Eq1),
        p1_logical_b: case(Decision::MakeNotP1, WhenCase::Eq1),
    },
    // Less
    ComparisonData {
        if_identical: Decision::MakeFalse,
        if_always: [
            Decision::MakeTrue,
            Decision::MakeNEqual,
            Decision::MakeFalse,
            Decision::MakeFalse,
        ],
        p0_logical_a: case(Decision::MakeNotP0, WhenCase::Gt0Le1),
        p1_logical_a: case(Decision::MakeNotNotP1, WhenCase::Ge0Lt1),
        p0_logical_b: case(Decision::Unchanged, WhenCase::Never),
        p1_logical_b: case(Decision::Unchanged, WhenCase::Never),
    },
    // LessOrEq
    ComparisonData {
        if_identical: Decision::MakeTrue,
        if_always: [
            Decision::Unchanged,
            Decision::MakeTrue,
            Decision::MakeFalse,
            Decision::MakeEqual,
        ],
        p0_logical_a: case(Decision::MakeNotP0, WhenCase::Ge0Lt1),
        p1_logical_a: case(Decision::MakeNotNotP1, WhenCase::Gt0Le1),
        p0_logical_b: case(Decision::Unchanged, WhenCase::Never),
        p1_logical_b: case(Decision::Unchanged, WhenCase::Never),
    },
    // Greater
    ComparisonData {
        if_identical: Decision::MakeFalse,
        if_always: [
            Decision::MakeFalse,
            Decision::MakeFalse,
            Decision::MakeTrue,
            Decision::MakeNEqual,
        ],
        p0_logical_a: case(Decision::MakeNotNotP0, WhenCase::Ge0Lt1),
        p1_logical_a: case(Decision::MakeNotP1, WhenCase::Gt0Le1),
        p0_logical_b: case(Decision::Unchanged, WhenCase::Never),
        p1_logical_b: case(Decision::Unchanged, WhenCase::Never),
    },
    // GreaterOrEq
    ComparisonData {
        if_identical: Decision::MakeTrue,
        if_always: [
            Decision::MakeFalse,
            Decision::MakeEqual,
            Decision::Unchanged,
            Decision::MakeTrue,
        ],
        p0_logical_a: case(Decision::MakeNotNotP0, WhenCase::Gt0Le1),
        p1_logical_a: case(Decision::MakeNotP1, WhenCase::Ge0Lt1),
        p0_logical_b: case(Decision::Unchanged, WhenCase::Never),
        p1_logical_b: case(Decision::Unchanged, WhenCase::Never),
    },
];

fn test_case<S: Scalar>(when: WhenCase, p: &Range<S>) -> bool {
    let (Some(lo), Some(hi)) = (p.min, p.max) else {
        return false;
    };
    match when {
        WhenCase::Eq0 => lo == S::zero() && hi == lo,
        WhenCase::Eq1 => lo == S::one() && hi == lo,
        WhenCase::Gt0Le1 => lo > S::zero() && hi <= S::one(),
        WhenCase::Ge0Lt1 => lo >= S::zero() && hi < S::one(),
        WhenCase::Never => false,
    }
}

fn analyze<S: Scalar>(data: &ComparisonData, a: &CodeTree<S>, b: &CodeTree<S>) -> Decision {
    if a.is_identical_to(b) {
        return data.if_identical;
    }
    let p0 = calculate_result_boundaries(a);
    let p1 = calculate_result_boundaries(b);
    if let (Some(p0_max), Some(p1_min)) = (p0.max, p1.min) {
        if p0_max < p1_min && data.if_always[0] != Decision::Unchanged {
            return data.if_always[0]; // always p0 < p1
        }
        if p0_max <= p1_min && data.if_always[1] != Decision::Unchanged {
            return data.if_always[1]; // always p0 <= p1
        }
    }
    if let (Some(p0_min), Some(p1_max)) = (p0.min, p1.max) {
        if p0_min > p1_max && data.if_always[2] != Decision::Unchanged {
            return data.if_always[2]; // always p0 > p1
        }
        if p0_min >= p1_max && data.if_always[3] != Decision::Unchanged {
            return data.if_always[3]; // always p0 >= p1
        }
    }
    if a.is_logical_value() {
        if data.p0_logical_a.what != Decision::Unchanged && test_case(data.p0_logical_a.when, &p1)
        {
            return data.p0_logical_a.what;
        }
        if data.p0_logical_b.what != Decision::Unchanged && test_case(data.p0_logical_b.when, &p1)
        {
            return data.p0_logical_b.what;
        }
    }
    if b.is_logical_value() {
        if data.p1_logical_a.what != Decision::Unchanged && test_case(data.p1_logical_a.when, &p0)
        {
            return data.p1_logical_a.what;
        }
        if data.p1_logical_b.what != Decision::Unchanged && test_case(data.p1_logical_b.when, &p0)
        {
            return data.p1_logical_b.what;
        }
    }
    Decision::Unchanged
}

/// Fold a comparison node. Returns true when the tree changed (redo).
pub(crate) fn fold_comparison<S: Scalar>(tree: &mut CodeTree<S>) -> bool {
    let index = (tree.opcode() as u32 - Opcode::Equal as u32) as usize;
    match analyze(&DATA[index], tree.param(0), tree.param(1)) {
        Decision::MakeFalse => {
            tree.replace_with_immed(S::zero());
            true
        }
        Decision::MakeTrue => {
            tree.replace_with_immed(S::one());
            true
        }
        Decision::MakeEqual => {
            tree.set_opcode(Opcode::Equal);
            true
        }
        Decision::MakeNEqual => {
            tree.set_opcode(Opcode::NEqual);
            true
        }
        Decision::MakeNotNotP0 => {
            tree.set_opcode(Opcode::NotNot);
            tree.del_param(1);
            true
        }
        Decision::MakeNotNotP1 => {
            tree.set_opcode(Opcode::NotNot);
            tree.del_param(0);
            true
        }
        Decision::MakeNotP0 => {
            tree.set_opcode(Opcode::Not);
            tree.del_param(1);
            true
        }
        Decision::MakeNotP1 => {
            tree.set_opcode(Opcode::Not);
            tree.del_param(0);
            true
        }
        Decision::Unchanged => false,
    }
}
