//! Lifting: bytecode → expression tree.
//!
//! Walks the program with a value stack of tree handles and an if-frame
//! stack. Most opcodes are canonicalized on the way in so the rewrite
//! machinery only ever sees `Add`/`Mul`/`Pow` forms: `Sub` becomes
//! `Add(x, Mul(y, -1))`, `Div` becomes `Mul(x, Pow(y, -1))`, `Exp` becomes
//! `Pow(e, x)`, `Tan` becomes `Sin·Cos⁻¹`, and so on. The
//! inversion-recreation pass undoes these choices before lowering.
//!
//! Identical subtrees are coalesced through a hash-keyed clone cache, so the
//! lifted result is a DAG.

pub(crate) mod powi;

use rustc_hash::FxHashMap;

use crate::opcode::{Opcode, VAR_BEGIN};
use crate::optimizer::FnTable;
use crate::scalar::Scalar;
use crate::trace::trace;
use crate::tree::{CodeTree, TreeHash};

struct IfFrame<S: Scalar> {
    condition: CodeTree<S>,
    then_branch: CodeTree<S>,
    endif_location: usize,
}

struct ParserState<S: Scalar> {
    stack: Vec<CodeTree<S>>,
    clones: FxHashMap<TreeHash, Vec<CodeTree<S>>>,
    keep_powi: bool,
}

impl<S: Scalar> ParserState<S> {
    fn new(keep_powi: bool) -> Self {
        ParserState {
            stack: Vec::new(),
            clones: FxHashMap::default(),
            keep_powi,
        }
    }

    /// Pop `nparams` operands, build a node, fold, coalesce, push.
    fn eat(&mut self, nparams: usize, opcode: Opcode) {
        let mut newnode = CodeTree::new_op(opcode);
        let stackhead = self.stack.len() - nparams;
        for param in self.stack.drain(stackhead..) {
            newnode.add_param_move(param);
        }

        if !self.keep_powi {
            match opcode {
                Opcode::Tanh => {
                    // tanh = sinh/cosh
                    let mut sinh = CodeTree::new_op(Opcode::Sinh);
                    sinh.add_param(newnode.param(0));
                    sinh.rehash(true);
                    let mut cosh = CodeTree::new_op(Opcode::Cosh);
                    cosh.add_param(newnode.param(0));
                    cosh.rehash(true);
                    let mut pow = CodeTree::new_op(Opcode::Pow);
                    pow.add_param_move(cosh);
                    pow.add_param_move(CodeTree::new_immed(-S::one()));
                    pow.rehash(true);
                    newnode.set_opcode(Opcode::Mul);
                    newnode.set_param_move(0, sinh);
                    newnode.add_param_move(pow);
                }
                Opcode::Tan => {
                    // tan = sin/cos
                    let mut sin = CodeTree::new_op(Opcode::Sin);
                    sin.add_param(newnode.param(0));
                    sin.rehash(true);
                    let mut cos = CodeTree::new_op(Opcode::Cos);
                    cos.add_param(newnode.param(0));
                    cos.rehash(true);
                    let mut pow = CodeTree::new_op(Opcode::Pow);
                    pow.add_param_move(cos);
                    pow.add_param_move(CodeTree::new_immed(-S::one()));
                    pow.rehash(true);
                    newnode.set_opcode(Opcode::Mul);
                    newnode.set_param_move(0, sin);
                    newnode.add_param_move(pow);
                }
                Opcode::Pow => {
                    // x^(a+b) -> x^a * x^b, so the factors can be optimized
                    // separately (e.g. exp(log(x)*-61.1 + log(z)*-59.1)).
                    if newnode.param(1).opcode() == Opcode::Add {
                        let base = newnode.param(0).clone();
                        let exps = newnode.param(1).clone();
                        let mut mulgroup = Vec::with_capacity(exps.param_count());
                        for a in 0..exps.param_count() {
                            let mut pow = CodeTree::new_op(Opcode::Pow);
                            pow.add_param(&base);
                            pow.add_param(exps.param(a));
                            pow.rehash(true);
                            mulgroup.push(pow);
                        }
                        newnode.set_opcode(Opcode::Mul);
                        newnode.set_params_move(mulgroup);
                    }
                }
                _ => {}
            }
        }

        newnode.rehash(!self.keep_powi);
        self.find_clone(&mut newnode, false);
        trace!("lift: eat {} -> {}", opcode.name(), crate::trace::dump(&newnode));
        self.stack.push(newnode);
    }

    fn eat_func(&mut self, nparams: usize, opcode: Opcode, funcno: u32) {
        let mut newnode = CodeTree::new_op(opcode);
        newnode.set_func_opcode(opcode, funcno);
        let stackhead = self.stack.len() - nparams;
        for param in self.stack.drain(stackhead..) {
            newnode.add_param_move(param);
        }
        newnode.rehash(false);
        self.find_clone(&mut newnode, true);
        self.stack.push(newnode);
    }

    fn add_const(&mut self, value: S) {
        let mut node = CodeTree::new_immed(value);
        self.find_clone(&mut node, true);
        self.stack.push(node);
    }

    fn add_var(&mut self, varno: u32) {
        let mut node = CodeTree::new_var(varno);
        self.find_clone(&mut node, true);
        self.stack.push(node);
    }

    fn swap_last_two(&mut self) {
        let n = self.stack.len();
        self.stack.swap(n - 1, n - 2);
    }

    fn dup(&mut self) {
        self.fetch(self.stack.len() - 1);
    }

    fn fetch(&mut self, which: usize) {
        let node = self.stack[which].clone();
        self.stack.push(node);
    }

    fn pop_n_mov(&mut self, target: usize, source: usize) {
        self.stack[target] = self.stack[source].clone();
        self.stack.truncate(target + 1);
    }

    fn pull_result(&mut self) -> CodeTree<S> {
        self.clones.clear();
        self.stack.pop().expect("lift: empty stack at end of bytecode")
    }

    fn stack_top(&self) -> usize {
        self.stack.len()
    }

    /// Coalesce `tree` with a previously seen identical subtree, if any.
    fn find_clone(&mut self, tree: &mut CodeTree<S>, recurse: bool) {
        if let Some(bucket) = self.clones.get(&tree.hash()) {
            for candidate in bucket {
                if candidate.is_identical_to(tree) {
                    tree.become_(candidate);
                    break;
                }
            }
        }
        if recurse {
            for a in 0..tree.param_count() {
                let mut child = tree.param(a).clone();
                self.find_clone(&mut child, true);
                tree.set_param_move(a, child);
            }
        }
        self.clones.entry(tree.hash()).or_default().push(tree.clone());
    }
}

/// Lift a bytecode program into an expression tree.
///
/// With `keep_powi` set, powi/muli idiom recognition and the lift-time
/// canonicalizations are disabled; used for probing, never by the optimizer
/// pipeline itself.
#[allow(clippy::too_many_lines)]
pub(crate) fn generate_from<S: Scalar>(
    bytecode: &[u32],
    immeds: &[S],
    fns: &FnTable,
    keep_powi: bool,
) -> CodeTree<S> {
    let mut sim = ParserState::new(keep_powi);
    let mut if_stack: Vec<IfFrame<S>> = Vec::new();
    let mut ip = 0usize;
    let mut dp = 0usize;

    'outer: loop {
        // The "else" of an "if" ends here.
        while if_stack
            .last()
            .is_some_and(|frame| frame.endif_location == ip)
        {
            let frame = if_stack.pop().expect("frame present");
            let else_branch = sim.pull_result();
            sim.stack.push(frame.condition);
            sim.stack.push(frame.then_branch);
            sim.stack.push(else_branch);
            sim.eat(3, Opcode::If);
        }
        if ip >= bytecode.len() {
            break;
        }

        let word = bytecode[ip];
        let is_powi_trigger = matches!(
            Opcode::from_u32(word),
            Some(
                Opcode::Sqr
                    | Opcode::Dup
                    | Opcode::Inv
                    | Opcode::Neg
                    | Opcode::Sqrt
                    | Opcode::RSqrt
                    | Opcode::Fetch
            )
        );
        if is_powi_trigger && !keep_powi {
            let limit = if_stack
                .last()
                .map_or(bytecode.len(), |frame| frame.endif_location);
            let mut nip = ip;
            let exponent: S =
                powi::parse_powi_sequence(bytecode, &mut nip, limit, sim.stack_top() - 1);
            if exponent != S::one() {
                sim.add_const(exponent);
                sim.eat(2, Opcode::Pow);
                ip = nip;
                continue 'outer;
            }
            if matches!(
                Opcode::from_u32(word),
                Some(Opcode::Dup | Opcode::Fetch | Opcode::Neg)
            ) {
                let mut nip = ip;
                let factor: S =
                    powi::parse_muli_sequence(bytecode, &mut nip, limit, sim.stack_top() - 1);
                if factor != S::one() {
                    sim.add_const(factor);
                    sim.eat(2, Opcode::Mul);
                    ip = nip;
                    continue 'outer;
                }
            }
        }

        if word >= VAR_BEGIN {
            sim.add_var(word - VAR_BEGIN);
            ip += 1;
            continue;
        }
        let Some(opcode) = Opcode::from_u32(word) else {
            ip += 1;
            continue;
        };
        match opcode {
            Opcode::If | Opcode::AbsIf => {
                let condition = sim.pull_result();
                if_stack.push(IfFrame {
                    condition,
                    then_branch: CodeTree::default(),
                    endif_location: bytecode.len(),
                });
                ip += 3; // code/immed offsets of the else branch are irrelevant
            }
            Opcode::Jump => {
                let frame = if_stack.last_mut().expect("jump outside if");
                frame.then_branch = sim.pull_result();
                frame.endif_location = bytecode[ip + 1] as usize + 1;
                ip += 3;
            }
            Opcode::Immed => {
                sim.add_const(immeds[dp]);
                dp += 1;
                ip += 1;
            }
            Opcode::Dup => {
                sim.dup();
                ip += 1;
            }
            Opcode::Nop => ip += 1,
            Opcode::FCall => {
                let funcno = bytecode[ip + 1];
                let params = fns.fcall_arity(funcno);
                sim.eat_func(params, Opcode::FCall, funcno);
                ip += 2;
            }
            Opcode::PCall => {
                let funcno = bytecode[ip + 1];
                let params = fns.pcall_arity(funcno);
                sim.eat_func(params, Opcode::PCall, funcno);
                ip += 2;
            }
            Opcode::Eval => {
                sim.eat(fns.eval_arity as usize, Opcode::Eval);
                ip += 1;
            }

            // Reached only with keep_powi, or when the powi parse yielded 1.
            Opcode::Inv => {
                sim.eat(1, Opcode::Inv);
                ip += 1;
            }
            Opcode::Neg => {
                sim.eat(1, Opcode::Neg);
                ip += 1;
            }
            Opcode::Sqr => {
                sim.eat(1, Opcode::Sqr);
                ip += 1;
            }

            Opcode::Deg => {
                sim.add_const(S::rad_to_deg());
                sim.eat(2, Opcode::Mul);
                ip += 1;
            }
            Opcode::Rad => {
                sim.add_const(S::deg_to_rad());
                sim.eat(2, Opcode::Mul);
                ip += 1;
            }
            Opcode::Exp => {
                if keep_powi {
                    sim.eat(1, Opcode::Exp);
                } else {
                    sim.add_const(S::E());
                    sim.swap_last_two();
                    sim.eat(2, Opcode::Pow);
                }
                ip += 1;
            }
            Opcode::Exp2 => {
                if keep_powi {
                    sim.eat(1, Opcode::Exp2);
                } else {
                    sim.add_const(S::from_long(2));
                    sim.swap_last_two();
                    sim.eat(2, Opcode::Pow);
                }
                ip += 1;
            }
            Opcode::Cot => {
                sim.eat(1, Opcode::Tan);
                sim.add_const(-S::one());
                sim.eat(2, Opcode::Pow);
                ip += 1;
            }
            Opcode::Csc => {
                sim.eat(1, Opcode::Sin);
                sim.add_const(-S::one());
                sim.eat(2, Opcode::Pow);
                ip += 1;
            }
            Opcode::Sec => {
                sim.eat(1, Opcode::Cos);
                sim.add_const(-S::one());
                sim.eat(2, Opcode::Pow);
                ip += 1;
            }
            Opcode::Int => {
                // int(x) = floor(x + 0.5)
                sim.add_const(S::from_f64(0.5).unwrap_or_else(S::one));
                sim.eat(2, Opcode::Add);
                sim.eat(1, Opcode::Floor);
                ip += 1;
            }
            Opcode::Log10 => {
                sim.eat(1, Opcode::Log);
                sim.add_const(S::log10_factor());
                sim.eat(2, Opcode::Mul);
                ip += 1;
            }
            Opcode::Log2 => {
                sim.eat(1, Opcode::Log);
                sim.add_const(S::log2_factor());
                sim.eat(2, Opcode::Mul);
                ip += 1;
            }
            Opcode::Log2by => {
                sim.swap_last_two(); // y x
                sim.eat(1, Opcode::Log); // y log(x)
                sim.add_const(S::log2_factor()); // y log(x) 1/ln2
                sim.eat(3, Opcode::Mul);
                ip += 1;
            }
            Opcode::Sub => {
                if keep_powi {
                    sim.eat(2, Opcode::Sub);
                } else {
                    sim.add_const(-S::one());
                    sim.eat(2, Opcode::Mul); // -x is x*-1
                    sim.eat(2, Opcode::Add); // minus is negative adding
                }
                ip += 1;
            }
            Opcode::RSub => {
                sim.swap_last_two();
                if keep_powi {
                    sim.eat(2, Opcode::Sub);
                } else {
                    sim.add_const(-S::one());
                    sim.eat(2, Opcode::Mul);
                    sim.eat(2, Opcode::Add);
                }
                ip += 1;
            }
            Opcode::Div => {
                if keep_powi {
                    sim.eat(2, Opcode::Div);
                } else {
                    sim.add_const(-S::one());
                    sim.eat(2, Opcode::Pow); // 1/x is x^-1
                    sim.eat(2, Opcode::Mul); // divide is inverse multiply
                }
                ip += 1;
            }
            Opcode::RDiv => {
                sim.swap_last_two();
                if keep_powi {
                    sim.eat(2, Opcode::Div);
                } else {
                    sim.add_const(-S::one());
                    sim.eat(2, Opcode::Pow);
                    sim.eat(2, Opcode::Mul);
                }
                ip += 1;
            }
            Opcode::RPow => {
                sim.swap_last_two();
                sim.eat(2, Opcode::Pow);
                ip += 1;
            }

            // The Abs-variants are downgraded for simplicity; folding
            // restores them where the argument is provably non-negative.
            Opcode::AbsOr => {
                sim.eat(2, Opcode::Or);
                ip += 1;
            }
            Opcode::AbsAnd => {
                sim.eat(2, Opcode::And);
                ip += 1;
            }
            Opcode::AbsNot => {
                sim.eat(1, Opcode::Not);
                ip += 1;
            }
            Opcode::AbsNotNot => {
                sim.eat(1, Opcode::NotNot);
                ip += 1;
            }

            Opcode::Fetch => {
                sim.fetch(bytecode[ip + 1] as usize);
                ip += 2;
            }
            Opcode::PopNMov => {
                let target = bytecode[ip + 1] as usize;
                let source = bytecode[ip + 2] as usize;
                sim.pop_n_mov(target, source);
                ip += 3;
            }
            Opcode::SinCos => {
                // x -> sin(x) cos(x)
                sim.dup();
                sim.eat(1, Opcode::Sin);
                sim.swap_last_two();
                sim.eat(1, Opcode::Cos);
                ip += 1;
            }

            other => {
                let arity = other.arity().unwrap_or(0);
                sim.eat(arity, other);
                ip += 1;
            }
        }
    }
    let mut result = sim.pull_result();
    result.fix_incomplete_hashes();
    trace!("lifted tree: {}", crate::trace::dump(&result));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::FnTable;

    fn lift(bytecode: &[u32], immeds: &[f64]) -> CodeTree<f64> {
        generate_from(bytecode, immeds, &FnTable::default(), false)
    }

    fn w(op: Opcode) -> u32 {
        op as u32
    }

    #[test]
    fn lifts_simple_add() {
        // x + 2
        let tree = lift(&[VAR_BEGIN, w(Opcode::Immed), w(Opcode::Add)], &[2.0]);
        assert_eq!(tree.opcode(), Opcode::Add);
        assert_eq!(tree.param_count(), 2);
    }

    #[test]
    fn canonicalizes_sub() {
        // x - y -> Add(x, Mul(y, -1))
        let tree = lift(&[VAR_BEGIN, VAR_BEGIN + 1, w(Opcode::Sub)], &[]);
        assert_eq!(tree.opcode(), Opcode::Add);
        assert!(tree.params().iter().any(|p| p.opcode() == Opcode::Mul));
    }

    #[test]
    fn canonicalizes_div_to_pow() {
        // x / y -> Mul(x, Pow(y, -1))
        let tree = lift(&[VAR_BEGIN, VAR_BEGIN + 1, w(Opcode::Div)], &[]);
        assert_eq!(tree.opcode(), Opcode::Mul);
        assert!(tree.params().iter().any(|p| p.opcode() == Opcode::Pow));
    }

    #[test]
    fn powi_idiom_becomes_pow() {
        // x Sqr Sqr = x^4
        let tree = lift(&[VAR_BEGIN, w(Opcode::Sqr), w(Opcode::Sqr)], &[]);
        assert_eq!(tree.opcode(), Opcode::Pow);
        assert_eq!(tree.param(1).immed(), 4.0);
    }

    #[test]
    fn muli_idiom_becomes_mul() {
        // x Dup Add = 2*x
        let tree = lift(&[VAR_BEGIN, w(Opcode::Dup), w(Opcode::Add)], &[]);
        assert_eq!(tree.opcode(), Opcode::Mul);
        assert!(tree.params().iter().any(|p| p.is_immed() && p.immed() == 2.0));
    }

    #[test]
    fn tan_splits_into_sin_cos() {
        let tree = lift(&[VAR_BEGIN, w(Opcode::Tan)], &[]);
        assert_eq!(tree.opcode(), Opcode::Mul);
        let ops: Vec<Opcode> = tree.params().iter().map(CodeTree::opcode).collect();
        assert!(ops.contains(&Opcode::Sin));
    }

    #[test]
    fn shared_subtrees_are_coalesced() {
        // sin(x) * sin(x): both factors resolve to the same node.
        let tree = lift(
            &[
                VAR_BEGIN,
                w(Opcode::Sin),
                VAR_BEGIN,
                w(Opcode::Sin),
                w(Opcode::Mul),
            ],
            &[],
        );
        // Folding turns this into Pow(sin(x), 2) via mul grouping.
        assert_eq!(tree.opcode(), Opcode::Pow);
        assert_eq!(tree.param(1).immed(), 2.0);
    }

    #[test]
    fn lifts_if_jump_structure() {
        // if(x, 1, 2): If triple, then-branch, Jump triple, else-branch.
        // The Jump's code offset points at the last word of the else branch.
        let bc = [
            VAR_BEGIN,
            w(Opcode::If),
            0,
            0,
            w(Opcode::Immed),
            w(Opcode::Jump),
            8,
            1,
            w(Opcode::Immed),
        ];
        let tree = lift(&bc, &[1.0, 2.0]);
        assert_eq!(tree.opcode(), Opcode::If);
        assert_eq!(tree.param_count(), 3);
        assert_eq!(tree.param(1).immed(), 1.0);
        assert_eq!(tree.param(2).immed(), 2.0);
    }
}
