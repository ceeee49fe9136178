//! Optional human-readable substitution dumps.
//!
//! Compiled in with the `trace` cargo feature and gated at runtime by the
//! `BYTEFOLD_TRACE` environment variable. The format is informational only
//! and carries no compatibility guarantees.

#[cfg(feature = "trace")]
pub(crate) fn enabled() -> bool {
    std::env::var("BYTEFOLD_TRACE")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Render a tree in prefix notation, e.g. `(Mul x0 (Sin x1) 2)`.
#[cfg_attr(not(feature = "trace"), allow(dead_code))]
pub(crate) fn dump<S: crate::scalar::Scalar>(tree: &crate::tree::CodeTree<S>) -> String {
    use std::fmt::Write;
    let mut out = String::new();
    fn walk<S: crate::scalar::Scalar>(t: &crate::tree::CodeTree<S>, out: &mut String) {
        if t.is_immed() {
            let _ = write!(out, "{}", t.immed());
            return;
        }
        if t.is_var() {
            let _ = write!(out, "x{}", t.var());
            return;
        }
        let _ = write!(out, "({}", t.opcode().name());
        for p in t.params() {
            out.push(' ');
            walk(p, out);
        }
        out.push(')');
    }
    walk(tree, &mut out);
    out
}

#[cfg(feature = "trace")]
macro_rules! trace {
    ($($arg:tt)*) => {
        if $crate::trace::enabled() {
            eprintln!($($arg)*);
        }
    };
}

#[cfg(not(feature = "trace"))]
macro_rules! trace {
    ($($arg:tt)*) => {};
}

pub(crate) use trace;

#[cfg(test)]
mod tests {
    use crate::opcode::Opcode;
    use crate::tree::CodeTree;

    #[test]
    fn dump_renders_prefix_form() {
        let mut t = CodeTree::<f64>::new_op(Opcode::Mul);
        t.add_param_move(CodeTree::new_var(0));
        t.add_param_move(CodeTree::new_immed(2.0));
        t.rehash(false);
        let s = super::dump(&t);
        assert!(s.starts_with("(Mul"));
        assert!(s.contains("x0"));
        assert!(s.contains('2'));
    }
}
