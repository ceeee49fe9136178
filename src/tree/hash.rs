//! Structural hashing: a 128-bit hash per node, computed without recursion.
//!
//! The hash is a pure function of the opcode, the leaf payload and the
//! children's already-computed hashes. Identical subtrees always hash equal;
//! the converse holds with overwhelming probability, and structural
//! comparison remains the authority (the hash is a quick reject).

use crate::opcode::Opcode;
use crate::scalar::Scalar;
use crate::tree::Node;

/// Pair of 64-bit hash words. Ordered lexicographically (`h1`, then `h2`)
/// for the canonical param sort.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TreeHash {
    pub h1: u64,
    pub h2: u64,
}

const OPCODE_SALT_1: u64 = 0x3A83_A83A_83A8_3A0;
const OPCODE_SALT_2: u64 = 0x113_1462_E270_012B;
const PARAM_STEP_1: u64 = 0x2492_4924_9249_2492;
const PARAM_MUL_1: u64 = 1_099_511_628_211;
const PARAM_STEP_2: u64 = 0x9AB_CD80_1357;
const PARAM_MUL_2: u64 = 0xECA_DB91_2345;

/// Recompute `hash` and `depth` of a node from its children's hashes.
///
/// Clears the `optimized_by` memo when the hash actually changed, so a
/// grammar revisits rewritten nodes.
pub(crate) fn recalculate<S: Scalar>(node: &mut Node<S>) {
    let opcode_word = node.opcode as u64;
    let mut new = TreeHash {
        h1: opcode_word.wrapping_mul(OPCODE_SALT_1),
        h2: opcode_word.wrapping_mul(OPCODE_SALT_2),
    };
    let mut depth: u32 = 1;
    match node.opcode {
        Opcode::Immed => {
            if node.value != S::zero() {
                let bits = node.value.hash_bits();
                new.h1 ^= bits.rotate_left(32);
                new.h2 = new.h2.wrapping_add((!bits).wrapping_mul(3) ^ 1_234_567);
            }
        }
        Opcode::Var => {
            let v = u64::from(node.var_or_func);
            new.h1 ^= (v << 24) | (v >> 24);
            new.h2 = new.h2.wrapping_add(v.wrapping_mul(5) ^ 2_345_678);
        }
        _ => {
            if matches!(node.opcode, Opcode::FCall | Opcode::PCall) {
                let f = u64::from(node.var_or_func);
                new.h1 ^= (f << 24) | (f >> 24);
                new.h2 = new.h2.wrapping_add((!f).wrapping_mul(7) ^ 3_456_789);
            }
            let mut max_child_depth = 0;
            for param in &node.params {
                max_child_depth = max_child_depth.max(param.depth());
                let child = param.hash();
                new.h1 = new
                    .h1
                    .wrapping_add(PARAM_STEP_1)
                    .wrapping_mul(PARAM_MUL_1)
                    .wrapping_add(child.h1);
                new.h2 = new
                    .h2
                    .wrapping_add(PARAM_STEP_2)
                    .wrapping_mul(PARAM_MUL_2)
                    .wrapping_add((!child.h1) ^ 4_567_890);
            }
            depth += max_child_depth;
        }
    }
    node.depth = depth;
    if node.hash != new {
        node.hash = new;
        node.optimized_by = None;
    }
}
