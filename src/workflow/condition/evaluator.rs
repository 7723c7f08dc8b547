//! Conditional branch evaluator

use serde_json::{Number, Value};

use super::ast::{Action, Branch, BranchKind, CalcExpr, CalcOp, Logic, Operator, Rule, TargetHandler, CONDITIONAL};
use super::parser;
use crate::runtime::{Result, WorkflowError};
use crate::workflow::params::to_f64;
use crate::workflow::state::VariableContext;

/// Outcome of evaluating a target handler
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BranchDecision {
    /// Index of the matching branch, if any
    pub branch: Option<usize>,
    /// Target service key of the matching branch
    pub target: Option<String>,
}

impl BranchDecision {
    pub fn is_satisfied(&self) -> bool {
        self.branch.is_some()
    }
}

/// Select the first satisfied branch, apply its actions to `ctx` and
/// return its target.
pub fn evaluate(handler: &TargetHandler, ctx: &mut VariableContext) -> Result<BranchDecision> {
    if handler.handler_type != CONDITIONAL {
        return Err(WorkflowError::ConditionalType(format!(
            "handler type must be '{}', got '{}'",
            CONDITIONAL, handler.handler_type
        ))
        .into());
    }

    for (index, branch) in handler.branches.iter().enumerate() {
        if !branch_matches(branch, ctx) {
            continue;
        }

        for action in dedup_actions(&branch.actions) {
            apply_action(action, ctx)?;
        }

        log::debug!(
            "Branch {} ({:?}) matched, target {:?}",
            index,
            branch.kind,
            branch.target
        );
        return Ok(BranchDecision {
            branch: Some(index),
            target: branch.target.clone(),
        });
    }

    Ok(BranchDecision::default())
}

fn branch_matches(branch: &Branch, ctx: &VariableContext) -> bool {
    match branch.kind {
        BranchKind::Else => true,
        BranchKind::If | BranchKind::Elif => match branch.logic {
            Some(Logic::And) => !branch.rules.is_empty() && branch.rules.iter().all(|r| evaluate_rule(r, ctx)),
            Some(Logic::Or) => branch.rules.iter().any(|r| evaluate_rule(r, ctx)),
            None => branch.rules.first().is_some_and(|r| evaluate_rule(r, ctx)),
        },
    }
}

/// Evaluate one rule against the context
pub fn evaluate_rule(rule: &Rule, ctx: &VariableContext) -> bool {
    let left = ctx.get_path(&rule.variable);

    match rule.operator {
        Operator::Exist => left.is_some_and(|v| !v.is_null()),
        Operator::NotExist => left.map_or(true, |v| v.is_null()),
        Operator::Eq => left.is_some_and(|v| values_equal(v, &rule.value)),
        Operator::NotEq => match left {
            Some(v) => !values_equal(v, &rule.value),
            None => !rule.value.is_null(),
        },
        Operator::Gt => compare(left, &rule.value, |o| o.is_gt()),
        Operator::Lt => compare(left, &rule.value, |o| o.is_lt()),
        Operator::Gte => compare(left, &rule.value, |o| o.is_ge()),
        Operator::Lte => compare(left, &rule.value, |o| o.is_le()),
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    if left == right {
        return true;
    }
    match (left, right) {
        (Value::Number(_), _) | (_, Value::Number(_)) => match (to_f64(left), to_f64(right)) {
            (Ok(a), Ok(b)) => (a - b).abs() < f64::EPSILON,
            _ => false,
        },
        _ => false,
    }
}

fn compare<F>(left: Option<&Value>, right: &Value, cmp: F) -> bool
where
    F: Fn(std::cmp::Ordering) -> bool,
{
    let Some(left) = left else {
        return false;
    };
    if let (Ok(a), Ok(b)) = (to_f64(left), to_f64(right)) {
        return a.partial_cmp(&b).is_some_and(cmp);
    }
    match (left, right) {
        (Value::String(a), Value::String(b)) => cmp(a.cmp(b)),
        _ => false,
    }
}

/// Drop structurally equal repeats, keeping first occurrences in order
pub fn dedup_actions(actions: &[Action]) -> Vec<&Action> {
    let mut unique: Vec<&Action> = Vec::with_capacity(actions.len());
    for action in actions {
        if !unique.contains(&action) {
            unique.push(action);
        }
    }
    unique
}

/// Apply one action to the context
pub fn apply_action(action: &Action, ctx: &mut VariableContext) -> Result<()> {
    match action {
        Action::SetVariable { variable, value } => ctx.set(variable, value.clone()),
        Action::Increment { variable, value } => step(ctx, variable, value.as_ref(), 1.0)?,
        Action::Decrement { variable, value } => step(ctx, variable, value.as_ref(), -1.0)?,
        Action::Calculate {
            variable,
            expression,
        } => {
            let expr = parser::parse(expression).map_err(|e| {
                WorkflowError::ConditionalType(format!("calculate '{}': {}", expression, e))
            })?;
            let result = eval_calc(&expr, ctx).map_err(|e| {
                WorkflowError::ConditionalType(format!("calculate '{}': {}", expression, e))
            })?;
            ctx.set(variable, number_value(result)?);
        }
        Action::CopyVariable { source, variable } => {
            let value = ctx.get_path(source).cloned().unwrap_or(Value::Null);
            ctx.set(variable, value);
        }
        Action::DeleteVariable { variable } => {
            ctx.remove(variable);
        }
    }
    Ok(())
}

fn step(ctx: &mut VariableContext, variable: &str, amount: Option<&Value>, sign: f64) -> Result<()> {
    let amount = match amount {
        Some(v) => to_f64(v).map_err(|e| WorkflowError::ConditionalType(format!("step for '{}': {}", variable, e)))?,
        None => 1.0,
    };
    let current = match ctx.get_path(variable) {
        None | Some(Value::Null) => 0.0,
        Some(v) => to_f64(v).map_err(|e| WorkflowError::ConditionalType(format!("'{}' is not numeric: {}", variable, e)))?,
    };
    ctx.set(variable, number_value(current + sign * amount)?);
    Ok(())
}

/// Evaluate a parsed arithmetic expression
pub fn eval_calc(expr: &CalcExpr, ctx: &VariableContext) -> std::result::Result<f64, String> {
    match expr {
        CalcExpr::Number(n) => Ok(*n),
        CalcExpr::Var(name) => {
            let value = ctx
                .get_path(name)
                .ok_or_else(|| format!("unknown variable '{}'", name))?;
            to_f64(value)
        }
        CalcExpr::Neg(inner) => Ok(-eval_calc(inner, ctx)?),
        CalcExpr::Binary { left, op, right } => {
            let a = eval_calc(left, ctx)?;
            let b = eval_calc(right, ctx)?;
            match op {
                CalcOp::Add => Ok(a + b),
                CalcOp::Sub => Ok(a - b),
                CalcOp::Mul => Ok(a * b),
                CalcOp::Div if b == 0.0 => Err("division by zero".to_string()),
                CalcOp::Div => Ok(a / b),
                CalcOp::Rem if b == 0.0 => Err("division by zero".to_string()),
                CalcOp::Rem => Ok(a % b),
                CalcOp::Pow => Ok(a.powf(b)),
            }
        }
        CalcExpr::Call { name, args } => {
            let values = args
                .iter()
                .map(|a| eval_calc(a, ctx))
                .collect::<std::result::Result<Vec<f64>, String>>()?;
            match (name.as_str(), values.as_slice()) {
                ("abs", [x]) => Ok(x.abs()),
                ("round", [x]) => Ok(x.round()),
                ("floor", [x]) => Ok(x.floor()),
                ("ceil", [x]) => Ok(x.ceil()),
                ("min", [first, rest @ ..]) => Ok(rest.iter().fold(*first, |m, v| m.min(*v))),
                ("max", [first, rest @ ..]) => Ok(rest.iter().fold(*first, |m, v| m.max(*v))),
                _ => Err(format!("bad call {}({} args)", name, values.len())),
            }
        }
    }
}

// Integral results are stored as integers
fn number_value(n: f64) -> Result<Value> {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        return Ok(Value::Number((n as i64).into()));
    }
    Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| WorkflowError::ConditionalType(format!("non-finite result {}", n)).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::FlowError;
    use serde_json::json;

    fn ctx_with(value: Value) -> VariableContext {
        VariableContext::from_map(value.as_object().cloned().unwrap())
    }

    fn rule(variable: &str, operator: Operator, value: Value) -> Rule {
        Rule {
            variable: variable.to_string(),
            operator,
            value,
        }
    }

    fn branch(kind: BranchKind, rules: Vec<Rule>, logic: Option<Logic>, target: &str) -> Branch {
        Branch {
            kind,
            rules,
            logic,
            actions: vec![],
            target: Some(target.to_string()),
        }
    }

    fn gt_five_else() -> TargetHandler {
        TargetHandler {
            handler_type: CONDITIONAL.to_string(),
            branches: vec![
                branch(BranchKind::If, vec![rule("x", Operator::Gt, json!(5))], None, "big.run"),
                Branch {
                    kind: BranchKind::Else,
                    rules: vec![],
                    logic: None,
                    actions: vec![],
                    target: Some("small.run".to_string()),
                },
            ],
        }
    }

    #[test]
    fn test_if_branch_selected() {
        let mut ctx = ctx_with(json!({"x": 10}));
        let decision = evaluate(&gt_five_else(), &mut ctx).unwrap();
        assert_eq!(decision.target.as_deref(), Some("big.run"));
        assert_eq!(decision.branch, Some(0));
    }

    #[test]
    fn test_else_branch_selected() {
        let mut ctx = ctx_with(json!({"x": 3}));
        let decision = evaluate(&gt_five_else(), &mut ctx).unwrap();
        assert_eq!(decision.target.as_deref(), Some("small.run"));
        assert_eq!(decision.branch, Some(1));
    }

    #[test]
    fn test_no_branch_satisfied() {
        let handler = TargetHandler {
            handler_type: CONDITIONAL.to_string(),
            branches: vec![branch(BranchKind::If, vec![rule("x", Operator::Eq, json!(1))], None, "a.b")],
        };
        let decision = evaluate(&handler, &mut ctx_with(json!({"x": 2}))).unwrap();
        assert!(!decision.is_satisfied());
        assert!(decision.target.is_none());
    }

    #[test]
    fn test_wrong_handler_type() {
        let mut handler = gt_five_else();
        handler.handler_type = "switch".to_string();
        let err = evaluate(&handler, &mut VariableContext::empty()).unwrap_err();
        assert!(matches!(err, FlowError::Workflow(WorkflowError::ConditionalType(_))));
    }

    #[test]
    fn test_logic_and_or() {
        let ctx = ctx_with(json!({"a": 1, "b": "x"}));
        let rules = vec![rule("a", Operator::Eq, json!(1)), rule("b", Operator::Eq, json!("y"))];

        let and = branch(BranchKind::If, rules.clone(), Some(Logic::And), "t.t");
        let or = branch(BranchKind::If, rules.clone(), Some(Logic::Or), "t.t");
        let single = branch(BranchKind::If, rules, None, "t.t");

        assert!(!branch_matches(&and, &ctx));
        assert!(branch_matches(&or, &ctx));
        // without logic only the first rule counts
        assert!(branch_matches(&single, &ctx));
    }

    #[test]
    fn test_operators() {
        let ctx = ctx_with(json!({"n": 5, "s": "10", "name": "bob", "nothing": null}));

        assert!(evaluate_rule(&rule("n", Operator::Exist, Value::Null), &ctx));
        assert!(!evaluate_rule(&rule("nothing", Operator::Exist, Value::Null), &ctx));
        assert!(evaluate_rule(&rule("missing", Operator::NotExist, Value::Null), &ctx));
        assert!(evaluate_rule(&rule("n", Operator::Gte, json!(5)), &ctx));
        assert!(evaluate_rule(&rule("n", Operator::Lt, json!(5.5)), &ctx));
        assert!(evaluate_rule(&rule("s", Operator::Gt, json!(9)), &ctx));
        assert!(evaluate_rule(&rule("n", Operator::Eq, json!("5")), &ctx));
        assert!(evaluate_rule(&rule("name", Operator::NotEq, json!("alice")), &ctx));
        assert!(evaluate_rule(&rule("name", Operator::Lte, json!("bob")), &ctx));
        assert!(!evaluate_rule(&rule("missing", Operator::Gt, json!(0)), &ctx));
        assert!(evaluate_rule(&rule("missing", Operator::NotEq, json!(0)), &ctx));
    }

    #[test]
    fn test_actions_applied_once_after_dedup() {
        let mut handler = gt_five_else();
        handler.branches[0].actions = vec![
            Action::Increment { variable: "hits".to_string(), value: None },
            Action::Increment { variable: "hits".to_string(), value: None },
            Action::SetVariable { variable: "label".to_string(), value: json!("big") },
            Action::Calculate { variable: "double".to_string(), expression: "x * 2 + hits".to_string() },
            Action::CopyVariable { source: "label".to_string(), variable: "copy".to_string() },
            Action::DeleteVariable { variable: "x".to_string() },
        ];

        let mut ctx = ctx_with(json!({"x": 10}));
        evaluate(&handler, &mut ctx).unwrap();

        assert_eq!(
            ctx.to_json(),
            json!({"hits": 1, "label": "big", "double": 21, "copy": "big"})
        );
    }

    #[test]
    fn test_decrement_with_amount() {
        let mut ctx = ctx_with(json!({"budget": 10}));
        apply_action(
            &Action::Decrement { variable: "budget".to_string(), value: Some(json!(2.5)) },
            &mut ctx,
        )
        .unwrap();
        assert_eq!(ctx.get("budget"), Some(&json!(7.5)));
    }

    #[test]
    fn test_calculate_errors() {
        let mut ctx = ctx_with(json!({"a": 1}));
        let bad = Action::Calculate { variable: "z".to_string(), expression: "a / 0".to_string() };
        assert!(apply_action(&bad, &mut ctx).is_err());

        let unknown = Action::Calculate { variable: "z".to_string(), expression: "b + 1".to_string() };
        assert!(apply_action(&unknown, &mut ctx).is_err());
    }

    #[test]
    fn test_eval_functions() {
        let ctx = ctx_with(json!({"stats": {"total": 7}}));
        let expr = parser::parse("max(stats.total, 3) + min(1, 2) + abs(-2) + round(1.6)").unwrap();
        assert_eq!(eval_calc(&expr, &ctx).unwrap(), 12.0);
    }
}
