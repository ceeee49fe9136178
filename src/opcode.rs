//! The closed opcode set shared between the bytecode and the expression tree.
//!
//! Bytecode words are plain `u32`s: values below [`VAR_BEGIN`] are opcodes,
//! values at or above it denote variable number `word - VAR_BEGIN`. A few
//! opcodes carry operand words after them (`Fetch`, `PopNMov`, `If`, `AbsIf`,
//! `Jump`, `FCall`, `PCall`); `Immed` consumes the next value from the
//! immediate table instead.
//!
//! | Category   | Opcodes |
//! |------------|---------|
//! | Arithmetic | `Add Mul Sub Div RSub RDiv Mod Pow RPow Neg Inv Sqr` |
//! | Roots/logs | `Sqrt RSqrt Cbrt Log Log2 Log10 Log2by Exp Exp2` |
//! | Trig/hyp   | `Sin Cos Tan Cot Sec Csc Asin Acos Atan Atan2 Sinh Cosh Tanh Asinh Acosh Atanh Hypot Rad Deg` |
//! | Rounding   | `Floor Ceil Trunc Int Abs` |
//! | Comparison | `Equal NEqual Less LessOrEq Greater GreaterOrEq` |
//! | Logic      | `And Or Not NotNot` (+ `Abs*` variants for known-nonnegative args) |
//! | Control    | `If AbsIf Jump` |
//! | Stack      | `Dup Fetch PopNMov Nop SinCos Eval` (bytecode only, never in the tree) |

/// Operation tags. The discriminants are the bytecode encoding.
///
/// The six comparison opcodes are contiguous and in a fixed order; the
/// comparison folding table indexes them as `opcode - Equal`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum Opcode {
    /// Literal: pushes the next value from the immediate table.
    Immed = 0,

    // Variadic arithmetic (commutative, n-ary in the tree)
    Add = 1,
    Mul = 2,

    // Binary arithmetic
    Sub = 3,
    Div = 4,
    RSub = 5,
    RDiv = 6,
    Mod = 7,
    Pow = 8,
    RPow = 9,

    // Unary arithmetic
    Neg = 10,
    Inv = 11,
    Sqr = 12,

    // Roots, logarithms, exponentials
    Sqrt = 13,
    RSqrt = 14,
    Cbrt = 15,
    Log = 16,
    Log2 = 17,
    Log10 = 18,
    Log2by = 19,
    Exp = 20,
    Exp2 = 21,

    // Trigonometry
    Sin = 22,
    Cos = 23,
    Tan = 24,
    Cot = 25,
    Sec = 26,
    Csc = 27,
    Asin = 28,
    Acos = 29,
    Atan = 30,
    Atan2 = 31,

    // Hyperbolics
    Sinh = 32,
    Cosh = 33,
    Tanh = 34,
    Asinh = 35,
    Acosh = 36,
    Atanh = 37,

    Hypot = 38,
    Rad = 39,
    Deg = 40,

    // Rounding
    Floor = 41,
    Ceil = 42,
    Trunc = 43,
    Int = 44,
    Abs = 45,

    // Selection
    Min = 46,
    Max = 47,

    // Comparisons (contiguous, fixed order)
    Equal = 48,
    NEqual = 49,
    Less = 50,
    LessOrEq = 51,
    Greater = 52,
    GreaterOrEq = 53,

    // Logic
    And = 54,
    Or = 55,
    Not = 56,
    NotNot = 57,

    // Logic variants for arguments known to be non-negative
    AbsAnd = 58,
    AbsOr = 59,
    AbsNot = 60,
    AbsNotNot = 61,

    // Control
    If = 62,
    AbsIf = 63,
    Jump = 64,

    // Calls
    FCall = 65,
    PCall = 66,
    Eval = 67,

    // Stack manipulation (bytecode only)
    Dup = 68,
    Fetch = 69,
    PopNMov = 70,
    SinCos = 71,
    Nop = 72,

    /// Tree-side tag for a variable leaf. Never emitted as a bytecode word;
    /// bytecode uses `VAR_BEGIN + k` instead.
    Var = 73,
}

/// First variable: bytecode word `VAR_BEGIN + k` pushes variable `k`.
pub const VAR_BEGIN: u32 = 74;

/// Number of distinct opcodes (used for per-opcode count tables).
pub(crate) const OPCODE_COUNT: usize = VAR_BEGIN as usize;

impl Opcode {
    /// Decode a bytecode word. Returns `None` for variable words.
    #[must_use]
    pub fn from_u32(word: u32) -> Option<Self> {
        if word >= VAR_BEGIN {
            return None;
        }
        ALL_OPCODES.get(word as usize).copied()
    }

    /// Fixed operand count of the opcode when lifted into a tree, or `None`
    /// for leaves, stack-manipulation opcodes and the variadic calls.
    #[must_use]
    pub fn arity(self) -> Option<usize> {
        use Opcode::{
            Abs, AbsAnd, AbsIf, AbsNot, AbsNotNot, AbsOr, Acos, Acosh, Add, And, Asin, Asinh,
            Atan, Atan2, Atanh, Cbrt, Ceil, Cos, Cosh, Cot, Csc, Deg, Div, Equal, Exp, Exp2,
            Floor, Greater, GreaterOrEq, Hypot, If, Int, Inv, Less, LessOrEq, Log, Log2, Log2by,
            Log10, Max, Min, Mod, Mul, NEqual, Neg, Not, NotNot, Or, Pow, RDiv, RPow, RSqrt, RSub,
            Rad, Sec, Sin, Sinh, Sqr, Sqrt, Sub, Tan, Tanh, Trunc,
        };
        match self {
            Neg | Inv | Sqr | Sqrt | RSqrt | Cbrt | Log | Log2 | Log10 | Exp | Exp2 | Sin | Cos
            | Tan | Cot | Sec | Csc | Asin | Acos | Atan | Sinh | Cosh | Tanh | Asinh | Acosh
            | Atanh | Rad | Deg | Floor | Ceil | Trunc | Int | Abs | Not | NotNot | AbsNot
            | AbsNotNot => Some(1),
            Add | Mul | Sub | Div | RSub | RDiv | Mod | Pow | RPow | Atan2 | Hypot | Log2by
            | Min | Max | Equal | NEqual | Less | LessOrEq | Greater | GreaterOrEq | And | Or
            | AbsAnd | AbsOr => Some(2),
            If | AbsIf => Some(3),
            _ => None,
        }
    }

    /// Whether the params of a tree node with this opcode are kept in
    /// canonical sorted order.
    #[must_use]
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            Opcode::Add
                | Opcode::Mul
                | Opcode::Min
                | Opcode::Max
                | Opcode::And
                | Opcode::Or
                | Opcode::AbsAnd
                | Opcode::AbsOr
                | Opcode::Hypot
                | Opcode::Equal
                | Opcode::NEqual
        )
    }

    /// The mirror opcode of a directional comparison (`a < b` ⇔ `b > a`).
    #[must_use]
    pub fn mirror(self) -> Option<Self> {
        match self {
            Opcode::Less => Some(Opcode::Greater),
            Opcode::Greater => Some(Opcode::Less),
            Opcode::LessOrEq => Some(Opcode::GreaterOrEq),
            Opcode::GreaterOrEq => Some(Opcode::LessOrEq),
            _ => None,
        }
    }

    /// The logical antonym used by `Not` folding.
    #[must_use]
    pub fn antonym(self) -> Option<Self> {
        match self {
            Opcode::Equal => Some(Opcode::NEqual),
            Opcode::NEqual => Some(Opcode::Equal),
            Opcode::Less => Some(Opcode::GreaterOrEq),
            Opcode::Greater => Some(Opcode::LessOrEq),
            Opcode::LessOrEq => Some(Opcode::Greater),
            Opcode::GreaterOrEq => Some(Opcode::Less),
            Opcode::Not => Some(Opcode::NotNot),
            Opcode::AbsNot => Some(Opcode::AbsNotNot),
            Opcode::AbsNotNot => Some(Opcode::AbsNot),
            _ => None,
        }
    }

    /// Human-readable name for trace output.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Opcode::Immed => "Immed",
            Opcode::Add => "Add",
            Opcode::Mul => "Mul",
            Opcode::Sub => "Sub",
            Opcode::Div => "Div",
            Opcode::RSub => "RSub",
            Opcode::RDiv => "RDiv",
            Opcode::Mod => "Mod",
            Opcode::Pow => "Pow",
            Opcode::RPow => "RPow",
            Opcode::Neg => "Neg",
            Opcode::Inv => "Inv",
            Opcode::Sqr => "Sqr",
            Opcode::Sqrt => "Sqrt",
            Opcode::RSqrt => "RSqrt",
            Opcode::Cbrt => "Cbrt",
            Opcode::Log => "Log",
            Opcode::Log2 => "Log2",
            Opcode::Log10 => "Log10",
            Opcode::Log2by => "Log2by",
            Opcode::Exp => "Exp",
            Opcode::Exp2 => "Exp2",
            Opcode::Sin => "Sin",
            Opcode::Cos => "Cos",
            Opcode::Tan => "Tan",
            Opcode::Cot => "Cot",
            Opcode::Sec => "Sec",
            Opcode::Csc => "Csc",
            Opcode::Asin => "Asin",
            Opcode::Acos => "Acos",
            Opcode::Atan => "Atan",
            Opcode::Atan2 => "Atan2",
            Opcode::Sinh => "Sinh",
            Opcode::Cosh => "Cosh",
            Opcode::Tanh => "Tanh",
            Opcode::Asinh => "Asinh",
            Opcode::Acosh => "Acosh",
            Opcode::Atanh => "Atanh",
            Opcode::Hypot => "Hypot",
            Opcode::Rad => "Rad",
            Opcode::Deg => "Deg",
            Opcode::Floor => "Floor",
            Opcode::Ceil => "Ceil",
            Opcode::Trunc => "Trunc",
            Opcode::Int => "Int",
            Opcode::Abs => "Abs",
            Opcode::Min => "Min",
            Opcode::Max => "Max",
            Opcode::Equal => "Equal",
            Opcode::NEqual => "NEqual",
            Opcode::Less => "Less",
            Opcode::LessOrEq => "LessOrEq",
            Opcode::Greater => "Greater",
            Opcode::GreaterOrEq => "GreaterOrEq",
            Opcode::And => "And",
            Opcode::Or => "Or",
            Opcode::Not => "Not",
            Opcode::NotNot => "NotNot",
            Opcode::AbsAnd => "AbsAnd",
            Opcode::AbsOr => "AbsOr",
            Opcode::AbsNot => "AbsNot",
            Opcode::AbsNotNot => "AbsNotNot",
            Opcode::If => "If",
            Opcode::AbsIf => "AbsIf",
            Opcode::Jump => "Jump",
            Opcode::FCall => "FCall",
            Opcode::PCall => "PCall",
            Opcode::Eval => "Eval",
            Opcode::Dup => "Dup",
            Opcode::Fetch => "Fetch",
            Opcode::PopNMov => "PopNMov",
            Opcode::SinCos => "SinCos",
            Opcode::Nop => "Nop",
            Opcode::Var => "Var",
        }
    }
}

/// All opcodes in discriminant order; index with a bytecode word < `VAR_BEGIN`.
const ALL_OPCODES: [Opcode; OPCODE_COUNT] = [
    Opcode::Immed,
    Opcode::Add,
    Opcode::Mul,
    Opcode::Sub,
    Opcode::Div,
    Opcode::RSub,
    Opcode::RDiv,
    Opcode::Mod,
    Opcode::Pow,
    Opcode::RPow,
    Opcode::Neg,
    Opcode::Inv,
    Opcode::Sqr,
    Opcode::Sqrt,
    Opcode::RSqrt,
    Opcode::Cbrt,
    Opcode::Log,
    Opcode::Log2,
    Opcode::Log10,
    Opcode::Log2by,
    Opcode::Exp,
    Opcode::Exp2,
    Opcode::Sin,
    Opcode::Cos,
    Opcode::Tan,
    Opcode::Cot,
    Opcode::Sec,
    Opcode::Csc,
    Opcode::Asin,
    Opcode::Acos,
    Opcode::Atan,
    Opcode::Atan2,
    Opcode::Sinh,
    Opcode::Cosh,
    Opcode::Tanh,
    Opcode::Asinh,
    Opcode::Acosh,
    Opcode::Atanh,
    Opcode::Hypot,
    Opcode::Rad,
    Opcode::Deg,
    Opcode::Floor,
    Opcode::Ceil,
    Opcode::Trunc,
    Opcode::Int,
    Opcode::Abs,
    Opcode::Min,
    Opcode::Max,
    Opcode::Equal,
    Opcode::NEqual,
    Opcode::Less,
    Opcode::LessOrEq,
    Opcode::Greater,
    Opcode::GreaterOrEq,
    Opcode::And,
    Opcode::Or,
    Opcode::Not,
    Opcode::NotNot,
    Opcode::AbsAnd,
    Opcode::AbsOr,
    Opcode::AbsNot,
    Opcode::AbsNotNot,
    Opcode::If,
    Opcode::AbsIf,
    Opcode::Jump,
    Opcode::FCall,
    Opcode::PCall,
    Opcode::Eval,
    Opcode::Dup,
    Opcode::Fetch,
    Opcode::PopNMov,
    Opcode::SinCos,
    Opcode::Nop,
    Opcode::Var,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_encoding() {
        for (i, op) in ALL_OPCODES.iter().enumerate() {
            assert_eq!(*op as u32, u32::try_from(i).unwrap());
            assert_eq!(Opcode::from_u32(*op as u32), Some(*op));
        }
        assert_eq!(Opcode::from_u32(VAR_BEGIN), None);
        assert_eq!(Opcode::from_u32(VAR_BEGIN + 17), None);
    }

    #[test]
    fn comparisons_are_contiguous() {
        assert_eq!(Opcode::NEqual as u32, Opcode::Equal as u32 + 1);
        assert_eq!(Opcode::Less as u32, Opcode::Equal as u32 + 2);
        assert_eq!(Opcode::LessOrEq as u32, Opcode::Equal as u32 + 3);
        assert_eq!(Opcode::Greater as u32, Opcode::Equal as u32 + 4);
        assert_eq!(Opcode::GreaterOrEq as u32, Opcode::Equal as u32 + 5);
    }

    #[test]
    fn mirror_is_involutive() {
        for op in [Opcode::Less, Opcode::LessOrEq, Opcode::Greater, Opcode::GreaterOrEq] {
            assert_eq!(op.mirror().unwrap().mirror(), Some(op));
        }
    }
}
