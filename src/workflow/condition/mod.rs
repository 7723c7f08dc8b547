// SPDX-License-Identifier: MIT

//! Conditional branch evaluation
//!
//! A conditional service carries a `target_handler` with ordered
//! `if`/`elif`/`else` branches. The first satisfied branch runs its
//! actions against a variable context and names the next service.

mod ast;
mod evaluator;
mod parser;

pub use ast::{
    Action, Branch, BranchKind, CalcExpr, CalcOp, Logic, Operator, Rule, TargetHandler,
    CONDITIONAL,
};
pub use evaluator::{apply_action, dedup_actions, eval_calc, evaluate, evaluate_rule, BranchDecision};
pub use parser::parse;
