//! The bytecode synthesizer: an append-only program builder that models the
//! runtime stack.
//!
//! Alongside each stack slot the synthesizer remembers which tree produced
//! it ([`ByteCodeSynth::stack_top_is`]); [`ByteCodeSynth::find_and_dup`]
//! turns a re-occurrence of the same tree into a `Dup`/`Fetch` instead of
//! recomputation. `If` emission is a three-step dance with backpatched jump
//! offsets.

pub(crate) mod cse;
pub(crate) mod powi;

use crate::opcode::{Opcode, VAR_BEGIN};
use crate::scalar::Scalar;
use crate::tree::CodeTree;

#[derive(Clone)]
pub(crate) struct ByteCodeSynth<S: Scalar> {
    bytecode: Vec<u32>,
    immed: Vec<S>,
    /// Parallel to the runtime stack: the tree known to live in each slot.
    stack: Vec<Option<CodeTree<S>>>,
    stack_max: usize,
}

/// Backpatch state of an in-flight `If` emission.
pub(crate) struct IfData {
    ofs: usize,
}

impl<S: Scalar> ByteCodeSynth<S> {
    pub(crate) fn new() -> Self {
        ByteCodeSynth {
            bytecode: Vec::with_capacity(64),
            immed: Vec::with_capacity(8),
            stack: Vec::new(),
            stack_max: 0,
        }
    }

    pub(crate) fn pull(self) -> (Vec<u32>, Vec<S>, usize) {
        (self.bytecode, self.immed, self.stack_max)
    }

    pub(crate) fn bytecode_size(&self) -> usize {
        self.bytecode.len()
    }

    pub(crate) fn stack_top(&self) -> usize {
        self.stack.len()
    }

    fn set_stack_top(&mut self, value: usize) {
        self.stack.resize_with(value, || None);
        if value > self.stack_max {
            self.stack_max = value;
        }
    }

    pub(crate) fn push_var(&mut self, varno: u32) {
        self.bytecode.push(VAR_BEGIN + varno);
        self.set_stack_top(self.stack.len() + 1);
    }

    pub(crate) fn push_immed(&mut self, value: S) {
        self.bytecode.push(Opcode::Immed as u32);
        self.immed.push(value);
        self.set_stack_top(self.stack.len() + 1);
    }

    /// Record which tree the topmost slot now holds.
    pub(crate) fn stack_top_is(&mut self, tree: &CodeTree<S>) {
        self.stack_top_is_at(tree, 0);
    }

    /// Same, `offset` slots below the top.
    pub(crate) fn stack_top_is_at(&mut self, tree: &CodeTree<S>, offset: usize) {
        let len = self.stack.len();
        if len > offset {
            self.stack[len - 1 - offset] = Some(tree.clone());
        }
    }

    pub(crate) fn add_operation(&mut self, opcode: Opcode, eat_count: usize, produce_count: usize) {
        self.set_stack_top(self.stack.len() - eat_count);
        if opcode == Opcode::Mul && self.bytecode.last() == Some(&(Opcode::Dup as u32)) {
            // x Dup Mul == x Sqr
            *self.bytecode.last_mut().expect("nonempty") = Opcode::Sqr as u32;
        } else {
            self.bytecode.push(opcode as u32);
        }
        self.set_stack_top(self.stack.len() + produce_count);
    }

    /// Emit a raw word (function number of a call opcode).
    pub(crate) fn add_raw_word(&mut self, word: u32) {
        self.bytecode.push(word);
    }

    pub(crate) fn do_dup(&mut self, src_pos: usize) {
        if src_pos == self.stack.len() - 1 {
            self.bytecode.push(Opcode::Dup as u32);
        } else {
            self.bytecode.push(Opcode::Fetch as u32);
            self.bytecode.push(u32::try_from(src_pos).expect("stack fits u32"));
        }
        let copied = self.stack[src_pos].clone();
        self.set_stack_top(self.stack.len() + 1);
        let len = self.stack.len();
        self.stack[len - 1] = copied;
    }

    pub(crate) fn do_pop_n_mov(&mut self, target_pos: usize, src_pos: usize) {
        self.bytecode.push(Opcode::PopNMov as u32);
        self.bytecode
            .push(u32::try_from(target_pos).expect("stack fits u32"));
        self.bytecode
            .push(u32::try_from(src_pos).expect("stack fits u32"));
        self.stack[target_pos] = self.stack[src_pos].clone();
        self.set_stack_top(target_pos + 1);
    }

    /// Is the tree the current topmost stack value?
    pub(crate) fn is_stack_top(&self, tree: &CodeTree<S>) -> bool {
        self.stack
            .last()
            .is_some_and(|slot| slot.as_ref().is_some_and(|t| t.is_identical_to(tree)))
    }

    /// Non-emitting lookup: is the tree somewhere on the stack?
    pub(crate) fn find(&self, tree: &CodeTree<S>) -> bool {
        self.stack
            .iter()
            .any(|slot| slot.as_ref().is_some_and(|t| t.is_identical_to(tree)))
    }

    /// If the tree is already on the stack, `Dup`/`Fetch` it to the top.
    pub(crate) fn find_and_dup(&mut self, tree: &CodeTree<S>) -> bool {
        for a in (0..self.stack.len()).rev() {
            if self.stack[a]
                .as_ref()
                .is_some_and(|t| t.is_identical_to(tree))
            {
                self.do_dup(a);
                return true;
            }
        }
        false
    }

    pub(crate) fn synth_if_step1(&mut self, opcode: Opcode) -> IfData {
        self.set_stack_top(self.stack.len() - 1); // the condition is popped
        let ofs = self.bytecode.len();
        self.bytecode.push(opcode as u32);
        self.bytecode.push(0); // code index
        self.bytecode.push(0); // immed index
        IfData { ofs }
    }

    pub(crate) fn synth_if_step2(&mut self, ifdata: &mut IfData) {
        self.set_stack_top(self.stack.len() - 1); // ignore the then-branch value
        let ofs = ifdata.ofs;
        self.bytecode[ofs + 1] = u32::try_from(self.bytecode.len() + 2).expect("code fits u32");
        self.bytecode[ofs + 2] = u32::try_from(self.immed.len()).expect("immeds fit u32");
        ifdata.ofs = self.bytecode.len();
        self.bytecode.push(Opcode::Jump as u32);
        self.bytecode.push(0);
        self.bytecode.push(0);
    }

    pub(crate) fn synth_if_step3(&mut self, ifdata: &IfData) {
        self.set_stack_top(self.stack.len() - 1); // ignore the else-branch value
        let ofs = ifdata.ofs;
        self.bytecode[ofs + 1] = u32::try_from(self.bytecode.len() - 1).expect("code fits u32");
        self.bytecode[ofs + 2] = u32::try_from(self.immed.len()).expect("immeds fit u32");
        self.set_stack_top(self.stack.len() + 1); // one branch value was pushed

        // The branches may have left stale slot knowledge behind; the value
        // here depends on the condition, so forget it.
        let len = self.stack.len();
        self.stack[len - 1] = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dup_vs_fetch() {
        let mut synth = ByteCodeSynth::<f64>::new();
        synth.push_var(0);
        synth.push_var(1);
        // Duplicate top -> Dup
        synth.do_dup(1);
        assert_eq!(synth.bytecode[2], Opcode::Dup as u32);
        // Duplicate deeper slot -> Fetch with operand
        synth.do_dup(0);
        assert_eq!(synth.bytecode[3], Opcode::Fetch as u32);
        assert_eq!(synth.bytecode[4], 0);
        assert_eq!(synth.stack_top(), 4);
    }

    #[test]
    fn mul_after_dup_becomes_sqr() {
        let mut synth = ByteCodeSynth::<f64>::new();
        synth.push_var(0);
        synth.do_dup(0);
        synth.add_operation(Opcode::Mul, 2, 1);
        assert_eq!(synth.bytecode, vec![VAR_BEGIN, Opcode::Sqr as u32]);
        assert_eq!(synth.stack_top(), 1);
    }

    #[test]
    fn find_and_dup_reuses_known_tree() {
        let tree = CodeTree::<f64>::new_var(7);
        let mut synth = ByteCodeSynth::new();
        synth.push_var(7);
        synth.stack_top_is(&tree);
        synth.push_var(1);
        assert!(synth.find(&tree));
        assert!(synth.find_and_dup(&tree));
        // The known copy sits below the top, so a Fetch of slot 0 is emitted.
        let n = synth.bytecode.len();
        assert_eq!(synth.bytecode[n - 2], Opcode::Fetch as u32);
        assert_eq!(synth.bytecode[n - 1], 0);
        assert_eq!(synth.stack_top(), 3);
    }

    #[test]
    fn stack_max_tracks_peak() {
        let mut synth = ByteCodeSynth::<f64>::new();
        synth.push_var(0);
        synth.push_var(1);
        synth.add_operation(Opcode::Add, 2, 1);
        let (_, _, max) = synth.pull();
        assert_eq!(max, 2);
    }
}
