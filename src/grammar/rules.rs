//! The four rule tables, authored with a small builder DSL.
//!
//! Phase order: entry normalizations, the main algebraic set, final-operation
//! recreation (`Tan`, `Log2`, `Int` and other cheaper dedicated opcodes), and
//! the final negation/inversion helpers. The heavy inversion recreation
//! itself is a separate tree pass (see `transform`); the rules here only
//! cover rewrites that constant folding will not undo.

use crate::opcode::Opcode;
use crate::scalar::Scalar;

use super::{MatchType, Rule};

/// Builders for rules and their pattern trees.
pub(crate) mod dsl {
    use super::super::{
        Constraints, FuncSpec, MatchType, NeedList, ParamSpec, Rule, RuleType, ValueConstraint,
    };
    use crate::opcode::Opcode;
    use crate::scalar::Scalar;

    pub(crate) fn num<S: Scalar>(v: f64) -> ParamSpec<S> {
        ParamSpec::NumConstant(S::from_f64(v).unwrap_or_else(S::zero))
    }

    pub(crate) fn holder<S: Scalar>(index: u8) -> ParamSpec<S> {
        ParamSpec::Holder {
            index,
            constraints: Constraints::default(),
        }
    }

    pub(crate) fn holder_with<S: Scalar>(index: u8, constraints: Constraints) -> ParamSpec<S> {
        ParamSpec::Holder { index, constraints }
    }

    pub(crate) fn even_int() -> Constraints {
        Constraints {
            value: ValueConstraint::EvenInt,
            ..Constraints::default()
        }
    }

    pub(crate) fn func<S: Scalar>(
        opcode: Opcode,
        match_type: MatchType,
        params: Vec<ParamSpec<S>>,
    ) -> FuncSpec<S> {
        FuncSpec {
            opcode,
            match_type,
            params,
            restholder: 0,
            constraints: Constraints::default(),
            needs: NeedList::default(),
        }
    }

    pub(crate) fn func_rest<S: Scalar>(
        opcode: Opcode,
        match_type: MatchType,
        params: Vec<ParamSpec<S>>,
        restholder: u8,
    ) -> FuncSpec<S> {
        FuncSpec {
            opcode,
            match_type,
            params,
            restholder,
            constraints: Constraints::default(),
            needs: NeedList::default(),
        }
    }

    /// Wrap a function spec as a pattern/replacement parameter.
    pub(crate) fn f<S: Scalar>(spec: FuncSpec<S>) -> ParamSpec<S> {
        ParamSpec::Func(spec)
    }

    pub(crate) fn group<S: Scalar>(opcode: Opcode, params: Vec<ParamSpec<S>>) -> ParamSpec<S> {
        ParamSpec::Group {
            opcode,
            params,
            constraints: Constraints::default(),
        }
    }

    pub(crate) fn rule_produce<S: Scalar>(
        mut match_tree: FuncSpec<S>,
        replacement: ParamSpec<S>,
    ) -> Rule<S> {
        match_tree.seal();
        let n_minimum_params = match_tree.params.len();
        Rule {
            rule_type: RuleType::ProduceNewTree,
            match_tree,
            repl_params: vec![replacement],
            n_minimum_params,
        }
    }

    pub(crate) fn rule_replace<S: Scalar>(
        mut match_tree: FuncSpec<S>,
        repl_params: Vec<ParamSpec<S>>,
    ) -> Rule<S> {
        match_tree.seal();
        let n_minimum_params = match_tree.params.len();
        Rule {
            rule_type: RuleType::ReplaceParams,
            match_tree,
            repl_params,
            n_minimum_params,
        }
    }
}

use dsl::{f, func, func_rest, holder, holder_with, num, rule_produce, rule_replace};

/// `f(x * -1 * rest) -> f(x * rest) * -1` for odd functions.
fn odd_negation_rule<S: Scalar>(opcode: Opcode) -> Rule<S> {
    rule_produce(
        func(
            opcode,
            MatchType::Positional,
            vec![f(func_rest(Opcode::Mul, MatchType::Any, vec![num(-1.0)], 1))],
        ),
        f(func(
            Opcode::Mul,
            MatchType::Positional,
            vec![
                f(func(
                    opcode,
                    MatchType::Positional,
                    vec![f(func_rest(Opcode::Mul, MatchType::Any, vec![], 1))],
                )),
                num(-1.0),
            ],
        )),
    )
}

/// `f(x * -1 * rest) -> f(x * rest)` for even functions.
fn even_negation_rule<S: Scalar>(opcode: Opcode) -> Rule<S> {
    rule_produce(
        func(
            opcode,
            MatchType::Positional,
            vec![f(func_rest(Opcode::Mul, MatchType::Any, vec![num(-1.0)], 1))],
        ),
        f(func(
            opcode,
            MatchType::Positional,
            vec![f(func_rest(Opcode::Mul, MatchType::Any, vec![], 1))],
        )),
    )
}

/// `outer(inner(x)) -> x`.
fn inverse_composition_rule<S: Scalar>(outer: Opcode, inner: Opcode) -> Rule<S> {
    rule_produce(
        func(
            outer,
            MatchType::Positional,
            vec![f(func(inner, MatchType::Positional, vec![holder(0)]))],
        ),
        holder(0),
    )
}

/// Entry normalizations: cheap shape changes that expose later rewrites.
pub(crate) fn entry_rules<S: Scalar>() -> Vec<Rule<S>> {
    let mut rules = Vec::new();
    // Negation pushed out of odd functions, dropped from even ones.
    for opcode in [
        Opcode::Sin,
        Opcode::Sinh,
        Opcode::Asin,
        Opcode::Asinh,
        Opcode::Atan,
        Opcode::Atanh,
        Opcode::Cbrt,
    ] {
        rules.push(odd_negation_rule(opcode));
    }
    for opcode in [Opcode::Cos, Opcode::Cosh, Opcode::Abs] {
        rules.push(even_negation_rule(opcode));
    }
    // Inverse compositions. (Tan/Tanh are split into quotients at lift time
    // and never appear as nodes here.)
    rules.push(inverse_composition_rule(Opcode::Sin, Opcode::Asin));
    rules.push(inverse_composition_rule(Opcode::Cos, Opcode::Acos));
    rules.push(inverse_composition_rule(Opcode::Sinh, Opcode::Asinh));
    rules.push(inverse_composition_rule(Opcode::Asinh, Opcode::Sinh));
    rules
}

/// The main algebraic set.
pub(crate) fn main_rules<S: Scalar>() -> Vec<Rule<S>> {
    vec![
        // abs(x)^even = x^even
        rule_produce(
            func(
                Opcode::Pow,
                MatchType::Positional,
                vec![
                    f(func(Opcode::Abs, MatchType::Positional, vec![holder(0)])),
                    holder_with(1, dsl::even_int()),
                ],
            ),
            f(func(
                Opcode::Pow,
                MatchType::Positional,
                vec![holder(0), holder(1)],
            )),
        ),
        // e^log(x) = x
        rule_produce(
            func(
                Opcode::Pow,
                MatchType::Positional,
                vec![
                    num(std::f64::consts::E),
                    f(func(Opcode::Log, MatchType::Positional, vec![holder(0)])),
                ],
            ),
            holder(0),
        ),
        // abs(abs-valued) is handled by range analysis; abs(x)*abs(y) = abs(x*y)
        rule_replace(
            func_rest(
                Opcode::Mul,
                MatchType::Any,
                vec![
                    f(func(Opcode::Abs, MatchType::Positional, vec![holder(0)])),
                    f(func(Opcode::Abs, MatchType::Positional, vec![holder(1)])),
                ],
                0,
            ),
            vec![f(func(
                Opcode::Abs,
                MatchType::Positional,
                vec![f(func(
                    Opcode::Mul,
                    MatchType::Positional,
                    vec![holder(0), holder(1)],
                ))],
            ))],
        ),
        // min(x, x) family is handled by folding; hypot(x, 0) = abs(x)
        rule_produce(
            func(
                Opcode::Hypot,
                MatchType::Selected,
                vec![holder(0), num(0.0)],
            ),
            f(func(Opcode::Abs, MatchType::Positional, vec![holder(0)])),
        ),
        // log(x^p) with positive base is folded; log(exp(x)) arrives as
        // log(pow(e, x)) and is folded too.
    ]
}

/// Recreation of dedicated final operations before lowering.
pub(crate) fn final_ops_rules<S: Scalar>() -> Vec<Rule<S>> {
    vec![
        // sin(x) * cos(x)^-1 = tan(x)
        rule_replace(
            func_rest(
                Opcode::Mul,
                MatchType::Any,
                vec![
                    f(func(Opcode::Sin, MatchType::Positional, vec![holder(0)])),
                    f(func(
                        Opcode::Pow,
                        MatchType::Positional,
                        vec![
                            f(func(Opcode::Cos, MatchType::Positional, vec![holder(0)])),
                            num(-1.0),
                        ],
                    )),
                ],
                0,
            ),
            vec![f(func(Opcode::Tan, MatchType::Positional, vec![holder(0)]))],
        ),
        // cos(x) * sin(x)^-1 = cot(x)
        rule_replace(
            func_rest(
                Opcode::Mul,
                MatchType::Any,
                vec![
                    f(func(Opcode::Cos, MatchType::Positional, vec![holder(0)])),
                    f(func(
                        Opcode::Pow,
                        MatchType::Positional,
                        vec![
                            f(func(Opcode::Sin, MatchType::Positional, vec![holder(0)])),
                            num(-1.0),
                        ],
                    )),
                ],
                0,
            ),
            vec![f(func(Opcode::Cot, MatchType::Positional, vec![holder(0)]))],
        ),
        // sinh(x) * cosh(x)^-1 = tanh(x)
        rule_replace(
            func_rest(
                Opcode::Mul,
                MatchType::Any,
                vec![
                    f(func(Opcode::Sinh, MatchType::Positional, vec![holder(0)])),
                    f(func(
                        Opcode::Pow,
                        MatchType::Positional,
                        vec![
                            f(func(Opcode::Cosh, MatchType::Positional, vec![holder(0)])),
                            num(-1.0),
                        ],
                    )),
                ],
                0,
            ),
            vec![f(func(Opcode::Tanh, MatchType::Positional, vec![holder(0)]))],
        ),
        // log(x) * (1/ln 2) = log2(x)
        rule_replace(
            func_rest(
                Opcode::Mul,
                MatchType::Any,
                vec![
                    f(func(Opcode::Log, MatchType::Positional, vec![holder(0)])),
                    num(std::f64::consts::LOG2_E),
                ],
                0,
            ),
            vec![f(func(Opcode::Log2, MatchType::Positional, vec![holder(0)]))],
        ),
        // log(x) * (1/ln 10) = log10(x)
        rule_replace(
            func_rest(
                Opcode::Mul,
                MatchType::Any,
                vec![
                    f(func(Opcode::Log, MatchType::Positional, vec![holder(0)])),
                    num(std::f64::consts::LOG10_E),
                ],
                0,
            ),
            vec![f(func(
                Opcode::Log10,
                MatchType::Positional,
                vec![holder(0)],
            ))],
        ),
        // floor(x + 0.5) = int(x)
        rule_produce(
            func(
                Opcode::Floor,
                MatchType::Positional,
                vec![f(func_rest(
                    Opcode::Add,
                    MatchType::Any,
                    vec![num(0.5)],
                    1,
                ))],
            ),
            f(func(
                Opcode::Int,
                MatchType::Positional,
                vec![f(func_rest(Opcode::Add, MatchType::Any, vec![], 1))],
            )),
        ),
    ]
}

/// Helpers for the negation/inversion denormalization pass.
pub(crate) fn final_neg_invert_rules<S: Scalar>() -> Vec<Rule<S>> {
    vec![
        // if(c, 1, 0) = !!c
        rule_produce(
            func(
                Opcode::If,
                MatchType::Positional,
                vec![holder(0), num(1.0), num(0.0)],
            ),
            f(func(
                Opcode::NotNot,
                MatchType::Positional,
                vec![holder(0)],
            )),
        ),
        // if(c, 0, 1) = !c
        rule_produce(
            func(
                Opcode::If,
                MatchType::Positional,
                vec![holder(0), num(0.0), num(1.0)],
            ),
            f(func(Opcode::Not, MatchType::Positional, vec![holder(0)])),
        ),
        // sin(x)^-1 = csc(x), cos(x)^-1 = sec(x), tan(x)^-1 = cot(x)
        rule_produce(
            func(
                Opcode::Pow,
                MatchType::Positional,
                vec![
                    f(func(Opcode::Sin, MatchType::Positional, vec![holder(0)])),
                    num(-1.0),
                ],
            ),
            f(func(Opcode::Csc, MatchType::Positional, vec![holder(0)])),
        ),
        rule_produce(
            func(
                Opcode::Pow,
                MatchType::Positional,
                vec![
                    f(func(Opcode::Cos, MatchType::Positional, vec![holder(0)])),
                    num(-1.0),
                ],
            ),
            f(func(Opcode::Sec, MatchType::Positional, vec![holder(0)])),
        ),
        rule_produce(
            func(
                Opcode::Pow,
                MatchType::Positional,
                vec![
                    f(func(Opcode::Tan, MatchType::Positional, vec![holder(0)])),
                    num(-1.0),
                ],
            ),
            f(func(Opcode::Cot, MatchType::Positional, vec![holder(0)])),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_build_and_seal() {
        let all = [
            entry_rules::<f64>(),
            main_rules::<f64>(),
            final_ops_rules::<f64>(),
            final_neg_invert_rules::<f64>(),
        ];
        for table in &all {
            assert!(!table.is_empty());
            for rule in table {
                // Need lists computed, minimum params consistent.
                assert_eq!(rule.n_minimum_params, rule.match_tree.params.len());
                assert!(
                    rule.match_tree.needs.minimum_need >= 0,
                    "need list must be sealed"
                );
                if rule.rule_type == super::super::RuleType::ProduceNewTree {
                    assert_eq!(rule.repl_params.len(), 1);
                }
            }
        }
    }
}
