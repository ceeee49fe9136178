//! Lowering: tree → bytecode.
//!
//! Before the walk, the inversion-recreation pass runs to fixpoint. During
//! the walk every node first checks whether its value (or its reciprocal)
//! already sits on the stack, then extracts common subexpressions, then
//! dispatches on the opcode. N-ary operations cumulate pairwise as soon as
//! two operands are available to keep the peak stack low, preferring
//! operands that already sit on the stack top.

use crate::opcode::Opcode;
use crate::scalar::Scalar;
use crate::synth::powi::{
    ADD_SEQUENCE, MAX_MULI_BYTECODE_LENGTH, MAX_POWI_BYTECODE_LENGTH, MUL_SEQUENCE, SequenceOp,
    assemble_sequence,
};
use crate::synth::{ByteCodeSynth, cse};
use crate::trace::trace;
use crate::transform;
use crate::tree::CodeTree;

/// Lower a finished tree into `(bytecode, immediates, peak stack)`.
pub(crate) fn synthesize<S: Scalar>(
    tree: &mut CodeTree<S>,
    cbrt_is_slow: bool,
) -> (Vec<u32>, Vec<S>, usize) {
    while transform::recreate_inversions_and_negations(tree, cbrt_is_slow) {
        tree.fix_incomplete_hashes();
    }
    trace!("lowering tree: {}", crate::trace::dump(tree));
    let mut synth = ByteCodeSynth::new();
    // At the outermost level leftover temporaries below the result are
    // harmless; the interpreter keeps only the top.
    synthesize_bytecode(tree, &mut synth, false);
    synth.pull()
}

/// Synthesize `tree` and append `count` copies via the sequence opcodes,
/// unless the emitted sequence would exceed `max_bytecode_grow_length`.
fn assemble_sequence_checked<S: Scalar>(
    tree: &CodeTree<S>,
    count: i64,
    sequencing: &SequenceOp,
    synth: &mut ByteCodeSynth<S>,
    max_bytecode_grow_length: usize,
) -> bool {
    if count == 0 {
        assemble_sequence(count, sequencing, synth);
        return true;
    }
    let backup = synth.clone();
    synthesize_bytecode(tree, synth, true);
    // The subtree's own size does not count against the budget.
    let size_before = synth.bytecode_size();
    assemble_sequence(count, sequencing, synth);
    let grow = synth.bytecode_size() - size_before;
    if grow > max_bytecode_grow_length {
        *synth = backup;
        return false;
    }
    true
}

#[allow(clippy::too_many_lines)]
pub(crate) fn synthesize_bytecode<S: Scalar>(
    tree: &CodeTree<S>,
    synth: &mut ByteCodeSynth<S>,
    must_pop_temps: bool,
) {
    // If the value is already on the stack, a Dup/Fetch suffices.
    if synth.find_and_dup(tree) {
        return;
    }
    // The reciprocal may be there instead: cos(x) serves sec(x) and the
    // other trig pairs likewise, at the cost of one Inv.
    let reciprocal_pairs = [
        (Opcode::Sec, Opcode::Cos),
        (Opcode::Sin, Opcode::Csc),
        (Opcode::Csc, Opcode::Sin),
        (Opcode::Cos, Opcode::Sec),
    ];
    for (own, other) in reciprocal_pairs {
        if tree.opcode() == own {
            let mut invtree = CodeTree::new_op(other);
            invtree.set_params_move(tree.params().to_vec());
            invtree.rehash(false);
            if synth.find_and_dup(&invtree) {
                synth.add_operation(Opcode::Inv, 1, 1);
                synth.stack_top_is(tree);
                return;
            }
        }
    }

    let n_subexpressions_synthesized = cse::synth_common_subexpressions(tree, synth);

    match tree.opcode() {
        Opcode::Var => synth.push_var(tree.var()),
        Opcode::Immed => synth.push_immed(tree.immed()),

        Opcode::Add
        | Opcode::Mul
        | Opcode::Min
        | Opcode::Max
        | Opcode::And
        | Opcode::Or
        | Opcode::AbsAnd
        | Opcode::AbsOr => {
            if tree.opcode() == Opcode::Mul {
                // A long-integer factor can be cheaper as an add sequence.
                let mut did_muli = false;
                for a in 0..tree.param_count() {
                    if !tree.param(a).is_long_integer_immed() {
                        continue;
                    }
                    let value = tree.param(a).long_integer_immed();
                    let mut tmp = tree.get_unique_ref();
                    tmp.del_param(a);
                    tmp.rehash(true);
                    if assemble_sequence_checked(
                        &tmp,
                        value,
                        &ADD_SEQUENCE,
                        synth,
                        MAX_MULI_BYTECODE_LENGTH,
                    ) {
                        did_muli = true;
                        break;
                    }
                }
                if did_muli {
                    synth.stack_top_is(tree);
                    return;
                }
            }

            let mut n_stacked = 0;
            let mut done = vec![false; tree.param_count()];
            let mut synthed_tree = CodeTree::new_op(tree.opcode());

            // Operands already sitting on the stack top go first.
            loop {
                let mut found = false;
                for a in 0..tree.param_count() {
                    if done[a] || !synth.is_stack_top(tree.param(a)) {
                        continue;
                    }
                    found = true;
                    done[a] = true;
                    synthesize_bytecode(tree.param(a), synth, true);
                    synthed_tree.add_param(tree.param(a));
                    n_stacked += 1;
                    if n_stacked > 1 {
                        // Cumulate at the earliest opportunity.
                        synth.add_operation(tree.opcode(), 2, 1);
                        synthed_tree.rehash(false);
                        synth.stack_top_is(&synthed_tree);
                        n_stacked -= 1;
                    }
                }
                if !found {
                    break;
                }
            }
            for a in 0..tree.param_count() {
                if done[a] {
                    continue;
                }
                synthesize_bytecode(tree.param(a), synth, true);
                synthed_tree.add_param(tree.param(a));
                n_stacked += 1;
                if n_stacked > 1 {
                    synth.add_operation(tree.opcode(), 2, 1);
                    synthed_tree.rehash(false);
                    synth.stack_top_is(&synthed_tree);
                    n_stacked -= 1;
                }
            }
            if n_stacked == 0 {
                // An empty group should not happen; emit its neutral value.
                match tree.opcode() {
                    Opcode::Mul | Opcode::And | Opcode::AbsAnd => synth.push_immed(S::one()),
                    _ => synth.push_immed(S::zero()),
                }
            }
        }

        Opcode::Pow => {
            let p0 = tree.param(0);
            let p1 = tree.param(1);
            let did_powi = p1.is_long_integer_immed()
                && assemble_sequence_checked(
                    p0,
                    p1.long_integer_immed(),
                    &MUL_SEQUENCE,
                    synth,
                    MAX_POWI_BYTECODE_LENGTH,
                );
            if !did_powi {
                synthesize_bytecode(p0, synth, true);
                synthesize_bytecode(p1, synth, true);
                synth.add_operation(Opcode::Pow, 2, 1);
            }
        }

        Opcode::If | Opcode::AbsIf => {
            synthesize_bytecode(tree.param(0), synth, true); // condition
            let mut ifdata = synth.synth_if_step1(tree.opcode());
            synthesize_bytecode(tree.param(1), synth, true); // then-branch
            synth.synth_if_step2(&mut ifdata);
            synthesize_bytecode(tree.param(2), synth, true); // else-branch
            synth.synth_if_step3(&ifdata);
        }

        Opcode::FCall | Opcode::PCall => {
            for a in 0..tree.param_count() {
                synthesize_bytecode(tree.param(a), synth, true);
            }
            synth.add_operation(tree.opcode(), tree.param_count(), 1);
            synth.add_raw_word(tree.func_no());
        }

        _ => {
            for a in 0..tree.param_count() {
                synthesize_bytecode(tree.param(a), synth, true);
            }
            synth.add_operation(tree.opcode(), tree.param_count(), 1);
        }
    }

    synth.stack_top_is(tree);

    // Peel extracted subexpressions back off the stack.
    if must_pop_temps && n_subexpressions_synthesized > 0 {
        let top = synth.stack_top();
        synth.do_pop_n_mov(top - 1 - n_subexpressions_synthesized, top - 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::VAR_BEGIN;

    fn op(opcode: Opcode, params: Vec<CodeTree<f64>>) -> CodeTree<f64> {
        let mut t = CodeTree::new_op(opcode);
        t.set_params_move(params);
        t.rehash(true);
        t
    }

    #[test]
    fn lowers_leaf_nodes() {
        let mut tree = CodeTree::<f64>::new_var(2);
        let (bytecode, immeds, stack) = synthesize(&mut tree, false);
        assert_eq!(bytecode, vec![VAR_BEGIN + 2]);
        assert!(immeds.is_empty());
        assert_eq!(stack, 1);
    }

    #[test]
    fn pow_6_has_no_pow_opcode() {
        let mut tree = op(
            Opcode::Pow,
            vec![CodeTree::new_var(0), CodeTree::new_immed(6.0)],
        );
        let (bytecode, _, stack) = synthesize(&mut tree, false);
        assert!(!bytecode.contains(&(Opcode::Pow as u32)));
        assert!(bytecode.len() <= 5, "bytecode: {bytecode:?}");
        assert!(stack <= 3);
    }

    #[test]
    fn big_fractional_exponent_uses_pow() {
        // An exponent that fits no sqrt/cbrt chain stays a Pow.
        let mut tree = op(
            Opcode::Pow,
            vec![CodeTree::new_var(0), CodeTree::new_var(1)],
        );
        let (bytecode, _, _) = synthesize(&mut tree, false);
        assert!(bytecode.contains(&(Opcode::Pow as u32)));
    }

    #[test]
    fn shared_subtree_is_fetched() {
        // sin(x)*2 + sin(x): sin(x) computed once
        let sin = op(Opcode::Sin, vec![CodeTree::new_var(0)]);
        let twice = op(Opcode::Mul, vec![sin.clone(), CodeTree::new_immed(2.0)]);
        let mut tree = op(Opcode::Add, vec![twice, sin]);
        let (bytecode, _, _) = synthesize(&mut tree, false);
        let sin_count = bytecode
            .iter()
            .filter(|&&w| w == Opcode::Sin as u32)
            .count();
        assert_eq!(sin_count, 1, "bytecode: {bytecode:?}");
    }

    #[test]
    fn if_emission_backpatches_offsets() {
        let mut tree = op(
            Opcode::If,
            vec![
                CodeTree::new_var(0),
                CodeTree::new_var(1),
                CodeTree::new_var(2),
            ],
        );
        let (bytecode, _, _) = synthesize(&mut tree, false);
        // Find the If triple and check its target points past the Jump.
        let if_pos = bytecode
            .iter()
            .position(|&w| w == Opcode::If as u32)
            .expect("if emitted");
        let then_end = bytecode[if_pos + 1] as usize;
        assert_eq!(bytecode[then_end - 2], Opcode::Jump as u32);
        let jump_target = bytecode[then_end - 1] as usize;
        assert_eq!(jump_target, bytecode.len() - 1);
    }
}
