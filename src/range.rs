//! Interval analysis over the expression tree.
//!
//! [`calculate_result_boundaries`] returns the tightest interval the
//! analyzer can prove for a node's value; absent endpoints mean unbounded on
//! that side. Soundness contract: for every environment in which the
//! expression evaluates to a finite value, that value lies inside the
//! reported interval.
//!
//! On top of the raw intervals this module derives the tri-valued facts the
//! rewrite conditions consume: logical truth, positivity, integrality and
//! parity.

use num_traits::Float;

use crate::opcode::Opcode;
use crate::scalar::Scalar;
use crate::tree::CodeTree;

/// Interval with optionally-unbounded endpoints.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Range<S> {
    pub min: Option<S>,
    pub max: Option<S>,
}

impl<S: Scalar> Default for Range<S> {
    fn default() -> Self {
        Range { min: None, max: None }
    }
}

impl<S: Scalar> Range<S> {
    #[must_use]
    pub fn unknown() -> Self {
        Range::default()
    }

    #[must_use]
    pub fn new(min: S, max: S) -> Self {
        Range {
            min: Some(min),
            max: Some(max),
        }
    }

    #[must_use]
    pub fn min_only(min: S) -> Self {
        Range {
            min: Some(min),
            max: None,
        }
    }

    #[must_use]
    pub fn max_only(max: S) -> Self {
        Range {
            min: None,
            max: Some(max),
        }
    }

    #[must_use]
    pub fn point(v: S) -> Self {
        Range::new(v, v)
    }

    /// Swap endpoints if a monotone mapping inverted their order.
    fn reorder(mut self) -> Self {
        if let (Some(a), Some(b)) = (self.min, self.max)
            && a > b
        {
            self.min = Some(b);
            self.max = Some(a);
        }
        self
    }
}

/// Three-valued truth for derived facts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriTruth {
    Always,
    Never,
    Unknown,
}

/// A range counts as definitely-true when it clears the logical threshold
/// (±0.5 in the plain form, +0.5 in the `Abs` form).
pub(crate) fn is_logical_true_value<S: Scalar>(p: &Range<S>, abs: bool) -> bool {
    let half = S::from_f64(0.5).unwrap_or_else(S::one);
    if p.min.is_some_and(|m| m >= half) {
        return true;
    }
    !abs && p.max.is_some_and(|m| m <= -half)
}

pub(crate) fn is_logical_false_value<S: Scalar>(p: &Range<S>, abs: bool) -> bool {
    let half = S::from_f64(0.5).unwrap_or_else(S::one);
    if abs {
        p.max.is_some_and(|m| m < half)
    } else {
        match (p.min, p.max) {
            (Some(lo), Some(hi)) => lo > -half && hi < half,
            _ => false,
        }
    }
}

/// Logical value of a subtree as far as its range proves it.
pub(crate) fn get_logical_value<S: Scalar>(tree: &CodeTree<S>, abs: bool) -> TriTruth {
    let p = calculate_result_boundaries(tree);
    logical_value_of_range(&p, abs)
}

pub(crate) fn logical_value_of_range<S: Scalar>(p: &Range<S>, abs: bool) -> TriTruth {
    if is_logical_true_value(p, abs) {
        TriTruth::Always
    } else if is_logical_false_value(p, abs) {
        TriTruth::Never
    } else {
        TriTruth::Unknown
    }
}

/// True when the node can only produce 0 or 1.
pub(crate) fn is_logical_value<S: Scalar>(tree: &CodeTree<S>) -> bool {
    match tree.opcode() {
        Opcode::Immed => tree.immed().fp_equal(S::zero()) || tree.immed().fp_equal(S::one()),
        Opcode::And
        | Opcode::Or
        | Opcode::Not
        | Opcode::NotNot
        | Opcode::AbsAnd
        | Opcode::AbsOr
        | Opcode::AbsNot
        | Opcode::AbsNotNot
        | Opcode::Equal
        | Opcode::NEqual
        | Opcode::Less
        | Opcode::LessOrEq
        | Opcode::Greater
        | Opcode::GreaterOrEq => true,
        Opcode::Mul => tree.params().iter().all(is_logical_value),
        Opcode::If | Opcode::AbsIf => {
            is_logical_value(tree.param(1)) && is_logical_value(tree.param(2))
        }
        _ => false,
    }
}

/// Integrality of the node's value.
pub(crate) fn get_integer_info<S: Scalar>(tree: &CodeTree<S>) -> TriTruth {
    match tree.opcode() {
        Opcode::Immed => {
            if tree.immed().is_integer_value() {
                TriTruth::Always
            } else {
                TriTruth::Never
            }
        }
        Opcode::Floor | Opcode::Ceil | Opcode::Trunc | Opcode::Int => TriTruth::Always,
        Opcode::And
        | Opcode::Or
        | Opcode::Not
        | Opcode::NotNot
        | Opcode::AbsAnd
        | Opcode::AbsOr
        | Opcode::AbsNot
        | Opcode::AbsNotNot
        | Opcode::Equal
        | Opcode::NEqual
        | Opcode::Less
        | Opcode::LessOrEq
        | Opcode::Greater
        | Opcode::GreaterOrEq => TriTruth::Always,
        Opcode::Add | Opcode::Mul => {
            if tree
                .params()
                .iter()
                .all(|p| get_integer_info(p) == TriTruth::Always)
            {
                TriTruth::Always
            } else {
                TriTruth::Unknown
            }
        }
        Opcode::If | Opcode::AbsIf => {
            let a = get_integer_info(tree.param(1));
            let b = get_integer_info(tree.param(2));
            if a == b { a } else { TriTruth::Unknown }
        }
        _ => TriTruth::Unknown,
    }
}

/// Evenness of an immediate value: `Always` (even int), `Never` (odd int),
/// else `Unknown`.
pub(crate) fn get_evenness_info<S: Scalar>(tree: &CodeTree<S>) -> TriTruth {
    if !tree.is_immed() {
        return TriTruth::Unknown;
    }
    let v = tree.immed();
    if v.is_even_integer() {
        TriTruth::Always
    } else if v.is_odd_integer() {
        TriTruth::Never
    } else {
        TriTruth::Unknown
    }
}

/// Sign of the node's value: `Always` ≥ 0, `Never` < 0, else `Unknown`.
pub(crate) fn get_positivity_info<S: Scalar>(tree: &CodeTree<S>) -> TriTruth {
    let p = calculate_result_boundaries(tree);
    if p.min.is_some_and(|m| m >= S::zero()) {
        TriTruth::Always
    } else if p.max.is_some_and(|m| m < S::zero()) {
        TriTruth::Never
    } else {
        TriTruth::Unknown
    }
}

/// Signed value with ±∞ sentinels, used for interval multiplication.
#[derive(Clone, Copy)]
enum IVal<S> {
    MinusInf,
    Finite(S),
    PlusInf,
}

impl<S: Scalar> IVal<S> {
    fn is_negative(self) -> bool {
        match self {
            IVal::MinusInf => true,
            IVal::Finite(v) => v < S::zero(),
            IVal::PlusInf => false,
        }
    }

    fn mul(self, rhs: IVal<S>) -> IVal<S> {
        if let (IVal::Finite(a), IVal::Finite(b)) = (self, rhs) {
            IVal::Finite(a * b)
        } else if self.is_negative() == rhs.is_negative() {
            IVal::PlusInf
        } else {
            IVal::MinusInf
        }
    }

    fn lt(self, rhs: IVal<S>) -> bool {
        match (self, rhs) {
            (IVal::MinusInf, IVal::MinusInf) => false,
            (IVal::MinusInf, _) => true,
            (IVal::Finite(_), IVal::PlusInf) => true,
            (IVal::Finite(a), IVal::Finite(b)) => a < b,
            _ => false,
        }
    }
}

fn endpoint<S: Scalar>(v: Option<S>, if_unknown: IVal<S>) -> IVal<S> {
    v.map_or(if_unknown, IVal::Finite)
}

/// Bounds of `sin` over `[lo, hi]` when the interval is narrower than a full
/// cycle. Reduces the endpoints mod 2π, then checks whether the arc covers
/// the crest (π/2) or the trough (3π/2).
fn sine_bounds<S: Scalar>(lo: S, hi: S) -> Range<S> {
    let twopi = S::two_pi();
    let mut min = lo % twopi;
    if min < S::zero() {
        min = min + twopi;
    }
    let mut max = hi % twopi;
    if max < S::zero() {
        max = max + twopi;
    }
    if max < min {
        max = max + twopi;
    }
    let crest = S::pi_half();
    let trough = S::from_f64(1.5).unwrap_or_else(S::one) * S::PI();
    let covers_plus1 = min <= crest && max >= crest;
    let covers_minus1 = min <= trough && max >= trough;
    if covers_plus1 && covers_minus1 {
        return Range::new(-S::one(), S::one());
    }
    let s_min = min.sin();
    let s_max = max.sin();
    if covers_minus1 {
        return Range::new(-S::one(), s_min.max(s_max));
    }
    if covers_plus1 {
        return Range::new(s_min.min(s_max), S::one());
    }
    Range::new(s_min.min(s_max), s_min.max(s_max))
}

fn monotone<S: Scalar>(m: Range<S>, f: impl Fn(S) -> S) -> Range<S> {
    Range {
        min: m.min.map(&f),
        max: m.max.map(&f),
    }
}

/// Range of a synthetic opcode, computed by rewriting it into its canonical
/// equivalent and recursing.
fn via_equivalent<S: Scalar>(opcode: Opcode, params: Vec<CodeTree<S>>) -> Range<S> {
    let mut tmp = CodeTree::new_op(opcode);
    tmp.set_params_move(params);
    calculate_result_boundaries(&tmp)
}

/// The tightest provable interval for the node's value.
#[allow(clippy::too_many_lines)]
pub fn calculate_result_boundaries<S: Scalar>(tree: &CodeTree<S>) -> Range<S> {
    match tree.opcode() {
        Opcode::Immed => Range::point(tree.immed()),

        // Truth-valued operations
        Opcode::And
        | Opcode::AbsAnd
        | Opcode::Or
        | Opcode::AbsOr
        | Opcode::Not
        | Opcode::AbsNot
        | Opcode::NotNot
        | Opcode::AbsNotNot
        | Opcode::Equal
        | Opcode::NEqual
        | Opcode::Less
        | Opcode::LessOrEq
        | Opcode::Greater
        | Opcode::GreaterOrEq => Range::new(S::zero(), S::one()),

        Opcode::Abs => {
            let m = calculate_result_boundaries(tree.param(0));
            let spans_zero = m.min.is_none_or(|v| v < S::zero())
                && m.max.is_none_or(|v| v >= S::zero());
            let mut r = Range {
                min: m.min.map(Float::abs),
                max: m.max.map(Float::abs),
            }
            .reorder();
            if spans_zero {
                if r.min.is_none() {
                    r.max = None;
                }
                r.min = Some(S::zero());
            }
            r
        }

        Opcode::Log | Opcode::Log2 | Opcode::Log10 => {
            let m = calculate_result_boundaries(tree.param(0));
            let f = |v: S| match tree.opcode() {
                Opcode::Log2 => v.log2(),
                Opcode::Log10 => v.log10(),
                _ => v.ln(),
            };
            Range {
                min: m.min.and_then(|v| (v >= S::zero()).then(|| f(v))),
                max: m.max.and_then(|v| (v >= S::zero()).then(|| f(v))),
            }
        }

        Opcode::Acosh => {
            let m = calculate_result_boundaries(tree.param(0));
            Range {
                min: m.min.and_then(|v| (v > S::one()).then(|| v.acosh())),
                max: m.max.and_then(|v| (v > S::one()).then(|| v.acosh())),
            }
        }
        Opcode::Asinh => monotone(calculate_result_boundaries(tree.param(0)), Float::asinh),
        Opcode::Atanh => monotone(calculate_result_boundaries(tree.param(0)), Float::atanh),
        Opcode::Sinh => monotone(calculate_result_boundaries(tree.param(0)), Float::sinh),

        Opcode::Acos => {
            // Order-flipping: acos is decreasing over [-1, 1].
            let m = calculate_result_boundaries(tree.param(0));
            Range::new(
                m.max.map_or(S::zero(), Float::acos),
                m.min.map_or(S::PI(), Float::acos),
            )
        }
        Opcode::Asin => {
            let m = calculate_result_boundaries(tree.param(0));
            Range::new(
                m.min.map_or(-S::pi_half(), Float::asin),
                m.max.map_or(S::pi_half(), Float::asin),
            )
        }
        Opcode::Atan => {
            let m = calculate_result_boundaries(tree.param(0));
            Range::new(
                m.min.map_or(-S::pi_half(), Float::atan),
                m.max.map_or(S::pi_half(), Float::atan),
            )
        }
        Opcode::Tanh => {
            let m = calculate_result_boundaries(tree.param(0));
            Range::new(
                m.min.map_or(-S::one(), Float::tanh),
                m.max.map_or(S::one(), Float::tanh),
            )
        }

        Opcode::Atan2 => {
            if tree.param(0).is_immed() && tree.param(0).immed().fp_equal(S::zero()) {
                // y == 0: either 0 or π
                return Range::new(S::zero(), S::PI());
            }
            if tree.param(1).is_immed() && tree.param(1).immed().fp_equal(S::zero()) {
                // x == 0: ±π/2
                return Range::new(-S::pi_half(), S::pi_half());
            }
            Range::new(-S::PI(), S::PI())
        }

        Opcode::Sin => {
            let m = calculate_result_boundaries(tree.param(0));
            match (m.min, m.max) {
                (Some(lo), Some(hi)) if hi - lo < S::two_pi() => sine_bounds(lo, hi),
                _ => Range::new(-S::one(), S::one()),
            }
        }
        Opcode::Cos => {
            // cos(x) = sin(x + π/2)
            let m = calculate_result_boundaries(tree.param(0));
            match (m.min, m.max) {
                (Some(lo), Some(hi)) if hi - lo < S::two_pi() => {
                    sine_bounds(lo + S::pi_half(), hi + S::pi_half())
                }
                _ => Range::new(-S::one(), S::one()),
            }
        }
        Opcode::Tan => Range::unknown(),

        Opcode::Ceil => {
            let mut m = calculate_result_boundaries(tree.param(0));
            m.max = m.max.map(Float::ceil);
            m
        }
        Opcode::Floor => {
            let mut m = calculate_result_boundaries(tree.param(0));
            m.min = m.min.map(Float::floor);
            m
        }
        Opcode::Trunc | Opcode::Int => {
            // May round either way; widen both sides.
            let mut m = calculate_result_boundaries(tree.param(0));
            m.min = m.min.map(Float::floor);
            m.max = m.max.map(Float::ceil);
            m
        }

        Opcode::Cosh => {
            let m = calculate_result_boundaries(tree.param(0));
            match (m.min, m.max) {
                (Some(lo), Some(hi)) => {
                    if lo >= S::zero() {
                        Range::new(lo.cosh(), hi.cosh())
                    } else if hi >= S::zero() {
                        Range::new(S::one(), lo.cosh().max(hi.cosh()))
                    } else {
                        Range::new(hi.cosh(), lo.cosh())
                    }
                }
                (Some(lo), None) => {
                    if lo >= S::zero() {
                        Range::min_only(lo.cosh())
                    } else {
                        Range::min_only(S::one())
                    }
                }
                (None, Some(hi)) => Range::min_only(hi.cosh().min(S::one())),
                (None, None) => Range::min_only(S::one()),
            }
        }

        Opcode::If | Opcode::AbsIf => {
            let mut r = calculate_result_boundaries(tree.param(1));
            let e = calculate_result_boundaries(tree.param(2));
            r.min = match (r.min, e.min) {
                (Some(a), Some(b)) => Some(a.min(b)),
                _ => None,
            };
            r.max = match (r.max, e.max) {
                (Some(a), Some(b)) => Some(a.max(b)),
                _ => None,
            };
            r
        }

        Opcode::Min => {
            let mut result = Range::<S>::unknown();
            let mut unknown_min = false;
            let mut unknown_max = false;
            for p in tree.params() {
                let m = calculate_result_boundaries(p);
                match m.min {
                    None => unknown_min = true,
                    Some(v) => {
                        if result.min.is_none_or(|r| v < r) {
                            result.min = Some(v);
                        }
                    }
                }
                match m.max {
                    None => unknown_max = true,
                    Some(v) => {
                        if result.max.is_none_or(|r| v < r) {
                            result.max = Some(v);
                        }
                    }
                }
            }
            if unknown_min {
                result.min = None;
            }
            if unknown_max {
                result.max = None;
            }
            result
        }
        Opcode::Max => {
            let mut result = Range::<S>::unknown();
            let mut unknown_min = false;
            let mut unknown_max = false;
            for p in tree.params() {
                let m = calculate_result_boundaries(p);
                match m.min {
                    None => unknown_min = true,
                    Some(v) => {
                        if result.min.is_none_or(|r| v > r) {
                            result.min = Some(v);
                        }
                    }
                }
                match m.max {
                    None => unknown_max = true,
                    Some(v) => {
                        if result.max.is_none_or(|r| v > r) {
                            result.max = Some(v);
                        }
                    }
                }
            }
            if unknown_min {
                result.min = None;
            }
            if unknown_max {
                result.max = None;
            }
            result
        }

        Opcode::Add => {
            let mut result = Range::new(S::zero(), S::zero());
            for p in tree.params() {
                let item = calculate_result_boundaries(p);
                result.min = match (result.min, item.min) {
                    (Some(a), Some(b)) => Some(a + b),
                    _ => None,
                };
                result.max = match (result.max, item.max) {
                    (Some(a), Some(b)) => Some(a + b),
                    _ => None,
                };
                if result.min.is_none() && result.max.is_none() {
                    break;
                }
            }
            result.reorder()
        }

        Opcode::Mul => {
            let mut result = Range::new(S::one(), S::one());
            for p in tree.params() {
                let item = calculate_result_boundaries(p);
                if item.min.is_none() && item.max.is_none() {
                    return Range::unknown();
                }
                let min0 = endpoint(result.min, IVal::MinusInf);
                let max0 = endpoint(result.max, IVal::PlusInf);
                let min1 = endpoint(item.min, IVal::MinusInf);
                let max1 = endpoint(item.max, IVal::PlusInf);

                let mut lo = IVal::PlusInf;
                let mut hi = IVal::MinusInf;
                for prod in [
                    min0.mul(min1),
                    min0.mul(max1),
                    max0.mul(min1),
                    max0.mul(max1),
                ] {
                    if prod.lt(lo) {
                        lo = prod;
                    }
                    if hi.lt(prod) {
                        hi = prod;
                    }
                }
                result.min = match lo {
                    IVal::Finite(v) => Some(v),
                    _ => None,
                };
                result.max = match hi {
                    IVal::Finite(v) => Some(v),
                    _ => None,
                };
                if result.min.is_none() && result.max.is_none() {
                    break;
                }
            }
            result.reorder()
        }

        Opcode::Mod => {
            let x = calculate_result_boundaries(tree.param(0));
            let y = calculate_result_boundaries(tree.param(1));
            match y.max {
                Some(ymax) if ymax >= S::zero() => {
                    if x.min.is_none_or(|v| v < S::zero()) {
                        Range::new(-ymax, ymax)
                    } else {
                        Range::new(S::zero(), ymax)
                    }
                }
                Some(ymax) => {
                    if x.max.is_none_or(|v| v >= S::zero()) {
                        Range::new(ymax, -ymax)
                    } else {
                        Range::new(ymax, S::negative_zero())
                    }
                }
                None => Range::unknown(),
            }
        }

        Opcode::Pow => pow_boundaries(tree),

        // Synthetic opcodes: rewrite into the canonical equivalent and recurse.
        Opcode::Neg => via_equivalent(
            Opcode::Mul,
            vec![CodeTree::new_immed(-S::one()), tree.param(0).clone()],
        ),
        Opcode::Sub => {
            let neg = {
                let mut t = CodeTree::new_op(Opcode::Neg);
                t.add_param(tree.param(1));
                t
            };
            via_equivalent(Opcode::Add, vec![tree.param(0).clone(), neg])
        }
        Opcode::Inv => via_equivalent(
            Opcode::Pow,
            vec![tree.param(0).clone(), CodeTree::new_immed(-S::one())],
        ),
        Opcode::Div => {
            let inv = {
                let mut t = CodeTree::new_op(Opcode::Inv);
                t.add_param(tree.param(1));
                t
            };
            via_equivalent(Opcode::Mul, vec![tree.param(0).clone(), inv])
        }
        Opcode::RSub => {
            let neg = {
                let mut t = CodeTree::new_op(Opcode::Neg);
                t.add_param(tree.param(0));
                t
            };
            via_equivalent(Opcode::Add, vec![tree.param(1).clone(), neg])
        }
        Opcode::RDiv => {
            let inv = {
                let mut t = CodeTree::new_op(Opcode::Inv);
                t.add_param(tree.param(0));
                t
            };
            via_equivalent(Opcode::Mul, vec![tree.param(1).clone(), inv])
        }
        Opcode::Rad => via_equivalent(
            Opcode::Mul,
            vec![tree.param(0).clone(), CodeTree::new_immed(S::deg_to_rad())],
        ),
        Opcode::Deg => via_equivalent(
            Opcode::Mul,
            vec![tree.param(0).clone(), CodeTree::new_immed(S::rad_to_deg())],
        ),
        Opcode::Sqr => via_equivalent(
            Opcode::Pow,
            vec![tree.param(0).clone(), CodeTree::new_immed(S::from_long(2))],
        ),
        Opcode::Exp => via_equivalent(
            Opcode::Pow,
            vec![CodeTree::new_immed(S::E()), tree.param(0).clone()],
        ),
        Opcode::Exp2 => via_equivalent(
            Opcode::Pow,
            vec![CodeTree::new_immed(S::from_long(2)), tree.param(0).clone()],
        ),
        Opcode::Cbrt => {
            // Unlike x^(1/3), cbrt admits and produces negative values.
            monotone(calculate_result_boundaries(tree.param(0)), Float::cbrt)
        }
        Opcode::Sqrt => {
            let m = calculate_result_boundaries(tree.param(0));
            Range {
                min: m
                    .min
                    .map(|v| if v < S::zero() { S::zero() } else { v.sqrt() }),
                max: m
                    .max
                    .map(|v| if v < S::zero() { S::zero() } else { v.sqrt() }),
            }
        }
        Opcode::RSqrt => via_equivalent(
            Opcode::Pow,
            vec![
                tree.param(0).clone(),
                CodeTree::new_immed(S::from_f64(-0.5).unwrap_or_else(|| -S::one())),
            ],
        ),
        Opcode::Hypot => {
            let sqr = |p: &CodeTree<S>| {
                let mut t = CodeTree::new_op(Opcode::Pow);
                t.add_param(p);
                t.add_param_move(CodeTree::new_immed(S::from_long(2)));
                t
            };
            let mut add = CodeTree::new_op(Opcode::Add);
            add.add_param_move(sqr(tree.param(0)));
            add.add_param_move(sqr(tree.param(1)));
            via_equivalent(Opcode::Sqrt, vec![add])
        }
        Opcode::Log2by => {
            let log2 = {
                let mut t = CodeTree::new_op(Opcode::Log2);
                t.add_param(tree.param(0));
                t
            };
            via_equivalent(Opcode::Mul, vec![log2, tree.param(1).clone()])
        }
        Opcode::Cot => inv_of(Opcode::Tan, tree.param(0)),
        Opcode::Sec => inv_of(Opcode::Cos, tree.param(0)),
        Opcode::Csc => inv_of(Opcode::Sin, tree.param(0)),

        // Cannot deduce: calls, leaves handled above, stack opcodes never in tree.
        _ => Range::unknown(),
    }
}

fn inv_of<S: Scalar>(inner_op: Opcode, arg: &CodeTree<S>) -> Range<S> {
    let inner = {
        let mut t = CodeTree::new_op(inner_op);
        t.add_param(arg);
        t
    };
    via_equivalent(Opcode::Inv, vec![inner])
}

#[allow(clippy::too_many_lines)]
fn pow_boundaries<S: Scalar>(tree: &CodeTree<S>) -> Range<S> {
    let base = tree.param(0);
    let exponent = tree.param(1);
    if exponent.is_immed() && exponent.immed() == S::zero() {
        // Makes 0^0 evaluate to 1.
        return Range::point(S::one());
    }
    if base.is_immed() && base.immed() == S::zero() {
        return Range::point(S::zero());
    }
    if base.is_immed() && base.immed().fp_equal(S::one()) {
        return Range::point(S::one());
    }
    if exponent.is_immed() && exponent.immed() > S::zero() && exponent.is_always_parity(false) {
        // x ^ positive_even_int is non-negative with computable bounds.
        let e = exponent.immed();
        let tmp = calculate_result_boundaries(base);
        let mut result = Range::min_only(S::zero());
        if let Some(lo) = tmp.min
            && lo >= S::zero()
        {
            result.min = Some(lo.powf(e));
        } else if let Some(hi) = tmp.max
            && hi <= S::zero()
        {
            result.min = Some(hi.powf(e));
        }
        if let (Some(lo), Some(hi)) = (tmp.min, tmp.max) {
            result.max = Some(lo.abs().max(hi.abs()).powf(e));
        }
        return result.reorder();
    }

    let p0 = calculate_result_boundaries(base);
    let p1 = calculate_result_boundaries(exponent);
    let p0_positivity = if p0.min.is_some_and(|v| v >= S::zero()) {
        TriTruth::Always
    } else if p0.max.is_some_and(|v| v < S::zero()) {
        TriTruth::Never
    } else {
        TriTruth::Unknown
    };
    let p1_evenness = get_evenness_info(exponent);

    let result_positivity = match p0_positivity {
        TriTruth::Always => TriTruth::Always,
        TriTruth::Never => p1_evenness,
        TriTruth::Unknown => match p1_evenness {
            TriTruth::Always => TriTruth::Always,
            TriTruth::Never => TriTruth::Unknown,
            TriTruth::Unknown => {
                // A constant non-negative non-integer exponent implies either
                // a positive result or NaN; treat as positive.
                if exponent.is_immed()
                    && exponent.is_always_integer(false)
                    && exponent.immed() >= S::zero()
                {
                    TriTruth::Always
                } else {
                    TriTruth::Unknown
                }
            }
        },
    };

    match result_positivity {
        TriTruth::Always => {
            let mut min = S::zero();
            if let (Some(b_min), Some(e_min)) = (p0.min, p1.min) {
                min = b_min.powf(e_min);
                if b_min < S::zero() && p1.max.is_none_or(|v| v >= S::zero()) && min >= S::zero() {
                    min = S::zero();
                }
            }
            if let (Some(b_min), Some(b_max), Some(e_max)) = (p0.min, p0.max, p1.max)
                && b_min >= S::zero()
            {
                let max = b_max.powf(e_max);
                return if min > max {
                    Range::new(max, min)
                } else {
                    Range::new(min, max)
                };
            }
            Range::min_only(min)
        }
        TriTruth::Never => Range::max_only(S::negative_zero()),
        TriTruth::Unknown => Range::unknown(),
    }
}
