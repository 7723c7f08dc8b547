// SPDX-License-Identifier: MIT

//! Types for conditional branch configuration

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Handler type that marks a service as conditional
pub const CONDITIONAL: &str = "conditional";

/// Branch configuration attached to a conditional service
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TargetHandler {
    #[serde(rename = "type")]
    pub handler_type: String,
    #[serde(default)]
    pub branches: Vec<Branch>,
}

/// One `if` / `elif` / `else` arm
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Branch {
    #[serde(rename = "type")]
    pub kind: BranchKind,
    #[serde(default)]
    pub rules: Vec<Rule>,
    pub logic: Option<Logic>,
    #[serde(default)]
    pub actions: Vec<Action>,
    /// Service key taken when this branch matches
    pub target: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BranchKind {
    If,
    Elif,
    Else,
}

/// How the rules of a branch combine
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum Logic {
    #[serde(rename = "AND", alias = "and")]
    And,
    #[serde(rename = "OR", alias = "or")]
    Or,
}

/// `{variable, operator, value}`
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Rule {
    pub variable: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
}

/// Rule operators
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum Operator {
    #[serde(rename = "exist")]
    Exist,
    #[serde(rename = "not_exist")]
    NotExist,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
}

/// Side effect run against the variable context when a branch matches
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    SetVariable {
        variable: String,
        #[serde(default)]
        value: Value,
    },
    Increment {
        variable: String,
        value: Option<Value>,
    },
    Decrement {
        variable: String,
        value: Option<Value>,
    },
    Calculate {
        variable: String,
        expression: String,
    },
    CopyVariable {
        source: String,
        variable: String,
    },
    DeleteVariable {
        variable: String,
    },
}

/// Arithmetic expression used by `calculate` actions
#[derive(Debug, Clone, PartialEq)]
pub enum CalcExpr {
    Number(f64),
    /// Variable reference (dot paths allowed)
    Var(String),
    Neg(Box<CalcExpr>),
    Binary {
        left: Box<CalcExpr>,
        op: CalcOp,
        right: Box<CalcExpr>,
    },
    /// Whitelisted function call
    Call { name: String, args: Vec<CalcExpr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalcOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operator::Exist => write!(f, "exist"),
            Operator::NotExist => write!(f, "not_exist"),
            Operator::Gt => write!(f, ">"),
            Operator::Lt => write!(f, "<"),
            Operator::Gte => write!(f, ">="),
            Operator::Lte => write!(f, "<="),
            Operator::Eq => write!(f, "=="),
            Operator::NotEq => write!(f, "!="),
        }
    }
}
