//! The data-driven pattern rewriter.
//!
//! A grammar is an ordered list of rules. A rule matches a tree node against
//! a pattern (a [`FuncSpec`]) and, on success, synthesizes a replacement
//! from the binding environment. Pattern leaves are:
//!
//! - [`ParamSpec::NumConstant`]: a specific immediate value.
//! - [`ParamSpec::Holder`]: any node; repeated occurrences of the same
//!   holder id must match structurally identical nodes.
//! - [`ParamSpec::Func`]: a subtree with a given opcode whose operands
//!   match a sub-pattern positionally, in some order, or as a subset
//!   (with the unmatched rest captured by a restholder).
//! - [`ParamSpec::Group`]: synthesize-only, a pure expression over the
//!   bindings, constant-folded and compared against the candidate.
//!
//! Rules are grouped by root opcode with a per-rule *need list* (how many
//! sub-function children of each opcode, immediates and generic holders the
//! pattern requires) computed at construction; the need list rejects most
//! candidates before any backtracking begins.

pub(crate) mod engine;
pub(crate) mod matching;
pub(crate) mod rules;
pub(crate) mod synthesis;

use rustc_hash::FxHashMap;

use crate::opcode::{OPCODE_COUNT, Opcode};
use crate::scalar::Scalar;

/// How a pattern's operand list relates to the candidate's.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MatchType {
    /// Same count, same order.
    Positional,
    /// Same count, any order.
    Selected,
    /// Subset in any order; the rest is captured.
    Any,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RuleType {
    /// Replace the whole node with the synthesized first replacement param.
    ProduceNewTree,
    /// Delete the matched operands, append the synthesized replacements.
    ReplaceParams,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub(crate) enum ValueConstraint {
    #[default]
    Any,
    EvenInt,
    OddInt,
    Int,
    NonInt,
    Logical,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub(crate) enum SignConstraint {
    #[default]
    Any,
    Positive,
    Negative,
    NoIdea,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub(crate) enum OnenessConstraint {
    #[default]
    Any,
    One,
    NotOne,
}

/// Predicates a candidate must satisfy for a pattern leaf to match.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Constraints {
    pub(crate) value: ValueConstraint,
    pub(crate) sign: SignConstraint,
    pub(crate) oneness: OnenessConstraint,
    pub(crate) constness: bool,
}

#[derive(Clone, Debug)]
pub(crate) enum ParamSpec<S: Scalar> {
    NumConstant(S),
    Holder {
        index: u8,
        constraints: Constraints,
    },
    Func(FuncSpec<S>),
    Group {
        opcode: Opcode,
        params: Vec<ParamSpec<S>>,
        constraints: Constraints,
    },
}

#[derive(Clone, Debug)]
pub(crate) struct FuncSpec<S: Scalar> {
    pub(crate) opcode: Opcode,
    pub(crate) match_type: MatchType,
    pub(crate) params: Vec<ParamSpec<S>>,
    /// Nonzero: capture unmatched operands under this id (AnyParams only).
    pub(crate) restholder: u8,
    pub(crate) constraints: Constraints,
    /// Pre-screen counts, filled by [`FuncSpec::seal`].
    pub(crate) needs: NeedList,
}

/// Shape signature of a pattern: what a candidate must at least supply.
#[derive(Clone, Debug)]
pub(crate) struct NeedList {
    pub(crate) subtrees: i32,
    pub(crate) others: i32,
    pub(crate) immeds: i32,
    pub(crate) minimum_need: i32,
    pub(crate) subtree_detail: [u8; OPCODE_COUNT],
}

impl Default for NeedList {
    fn default() -> Self {
        NeedList {
            subtrees: 0,
            others: 0,
            immeds: 0,
            minimum_need: 0,
            subtree_detail: [0; OPCODE_COUNT],
        }
    }
}

impl<S: Scalar> FuncSpec<S> {
    /// Compute need lists for this spec and every nested sub-spec.
    pub(crate) fn seal(&mut self) {
        let mut needs = NeedList::default();
        for spec in &mut self.params {
            match spec {
                ParamSpec::Func(sub) => {
                    sub.seal();
                    needs.subtrees += 1;
                    needs.subtree_detail[sub.opcode as usize] += 1;
                    needs.minimum_need += 1;
                }
                ParamSpec::Group { .. } => {
                    needs.immeds += 1;
                    needs.minimum_need += 1;
                }
                ParamSpec::NumConstant(_) | ParamSpec::Holder { .. } => {
                    needs.others += 1;
                    needs.minimum_need += 1;
                }
            }
        }
        self.needs = needs;
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Rule<S: Scalar> {
    pub(crate) rule_type: RuleType,
    pub(crate) match_tree: FuncSpec<S>,
    pub(crate) repl_params: Vec<ParamSpec<S>>,
    /// Lower bound on the candidate's operand count.
    pub(crate) n_minimum_params: usize,
}

/// One rewrite phase: rules indexed by the root opcode they match.
pub(crate) struct Grammar<S: Scalar> {
    pub(crate) id: u32,
    rules_by_opcode: FxHashMap<Opcode, Vec<Rule<S>>>,
}

impl<S: Scalar> Grammar<S> {
    pub(crate) fn new(id: u32, rules: Vec<Rule<S>>) -> Self {
        let mut rules_by_opcode: FxHashMap<Opcode, Vec<Rule<S>>> = FxHashMap::default();
        for rule in rules {
            rules_by_opcode
                .entry(rule.match_tree.opcode)
                .or_default()
                .push(rule);
        }
        Grammar { id, rules_by_opcode }
    }

    /// Rules that may match a node with this opcode and operand count.
    pub(crate) fn candidate_rules(
        &self,
        opcode: Opcode,
        param_count: usize,
    ) -> impl Iterator<Item = &Rule<S>> {
        self.rules_by_opcode
            .get(&opcode)
            .into_iter()
            .flatten()
            .filter(move |rule| {
                if param_count < rule.n_minimum_params {
                    return false;
                }
                match rule.match_tree.match_type {
                    MatchType::Positional | MatchType::Selected => {
                        param_count == rule.n_minimum_params
                    }
                    MatchType::Any => true,
                }
            })
    }
}

/// The four rewrite phases, in application order.
pub(crate) struct Grammars<S: Scalar> {
    pub(crate) phases: [Grammar<S>; 4],
}

impl<S: Scalar> Grammars<S> {
    pub(crate) fn build() -> Self {
        Grammars {
            phases: [
                Grammar::new(1, rules::entry_rules()),
                Grammar::new(2, rules::main_rules()),
                Grammar::new(3, rules::final_ops_rules()),
                Grammar::new(4, rules::final_neg_invert_rules()),
            ],
        }
    }
}
