//! Expression evaluation against a scope chain.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

use super::EvalError;
use super::parser::{BinaryOp, Expr, UnaryOp, parse};
use super::value::Value;
use crate::runtime::Instance;

/// Evaluation scope: loop-bound locals overlaid on a component instance.
///
/// Unqualified identifiers resolve to the innermost local first, then to
/// the instance's properties - standard lexical shadowing, so an inner
/// loop variable wins over an outer one of the same name.
pub struct Scope {
    instance: Rc<dyn Instance>,
    locals: Vec<(String, Value)>,
}

impl Scope {
    pub fn new(instance: Rc<dyn Instance>) -> Self {
        Self {
            instance,
            locals: Vec::new(),
        }
    }

    /// Bind a loop local for the duration of one body evaluation.
    pub fn push_local(&mut self, name: &str, value: Value) {
        self.locals.push((name.to_string(), value));
    }

    pub fn pop_local(&mut self) {
        self.locals.pop();
    }

    pub fn instance(&self) -> &Rc<dyn Instance> {
        &self.instance
    }

    fn local(&self, name: &str) -> Option<Value> {
        self.locals
            .iter()
            .rev()
            .find(|(bound, _)| bound == name)
            .map(|(_, value)| value.clone())
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        self.local(name).or_else(|| self.instance.property(name))
    }
}

/// Compile-once, evaluate-often expression engine.
///
/// Parsed expressions are cached per source string, mirroring the template
/// cache: a steady-state render parses nothing.
pub struct Evaluator {
    cache: RefCell<HashMap<String, Rc<Expr>>>,
}

impl Evaluator {
    pub fn new() -> Self {
        Self {
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Evaluate `source` in `scope`, surfacing any failure to the caller.
    pub fn eval(&self, source: &str, scope: &Scope) -> Result<Value, EvalError> {
        let cached = self.cache.borrow().get(source).cloned();
        let expr = match cached {
            Some(expr) => expr,
            None => {
                let expr = Rc::new(parse(source)?);
                self.cache
                    .borrow_mut()
                    .insert(source.to_string(), expr.clone());
                expr
            }
        };
        eval_expr(&expr, scope)
    }

    /// Interpolation context: a failure logs and renders as empty text.
    pub fn eval_display(&self, source: &str, scope: &Scope) -> String {
        match self.eval(source, scope) {
            Ok(value) => value.to_display(),
            Err(error) => {
                warn!(expression = source, %error, "interpolation failed, rendering empty");
                String::new()
            }
        }
    }

    /// Conditional context: a failure logs and tests false.
    pub fn eval_condition(&self, source: &str, scope: &Scope) -> bool {
        match self.eval(source, scope) {
            Ok(value) => value.is_truthy(),
            Err(error) => {
                warn!(expression = source, %error, "condition failed, treating as false");
                false
            }
        }
    }

    /// Loop-source context: a failure or a non-list logs and iterates
    /// nothing. Null is an empty list without complaint.
    pub fn eval_list(&self, source: &str, scope: &Scope) -> Vec<Value> {
        match self.eval(source, scope) {
            Ok(Value::List(items)) => items,
            Ok(Value::Null) => Vec::new(),
            Ok(other) => {
                warn!(
                    expression = source,
                    kind = other.kind(),
                    "loop source is not a list, iterating nothing"
                );
                Vec::new()
            }
            Err(error) => {
                warn!(expression = source, %error, "loop source failed, iterating nothing");
                Vec::new()
            }
        }
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

fn eval_expr(expr: &Expr, scope: &Scope) -> Result<Value, EvalError> {
    match expr {
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Null => Ok(Value::Null),
        Expr::This => Ok(Value::Instance(scope.instance().clone())),
        Expr::Ident(name) => scope
            .lookup(name)
            .ok_or_else(|| EvalError::Undefined { name: name.clone() }),
        Expr::Member {
            object,
            property,
            optional,
        } => {
            let target = eval_expr(object, scope)?;
            eval_member(target, property, *optional)
        }
        Expr::Index { object, index } => {
            let target = eval_expr(object, scope)?;
            let key = eval_expr(index, scope)?;
            eval_index(target, key)
        }
        Expr::Call { callee, args } => eval_call(callee, args, scope),
        Expr::Unary { op, operand } => {
            let value = eval_expr(operand, scope)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                UnaryOp::Neg => match value {
                    Value::Number(n) => Ok(Value::Number(-n)),
                    _ => Err(EvalError::InvalidOperands { op: "-" }),
                },
            }
        }
        Expr::Binary { op, left, right } => eval_binary(*op, left, right, scope),
    }
}

fn eval_member(target: Value, property: &str, optional: bool) -> Result<Value, EvalError> {
    match target {
        Value::Null if optional => Ok(Value::Null),
        Value::Null => Err(EvalError::PropertyOfNull {
            property: property.to_string(),
        }),
        // A missing property reads as null; the chain then degrades one
        // level later, matching how the host language surfaced it.
        Value::Instance(instance) => Ok(instance.property(property).unwrap_or(Value::Null)),
        Value::Object(entries) => Ok(entries.get(property).cloned().unwrap_or(Value::Null)),
        Value::List(items) if property == "length" => Ok(Value::Number(items.len() as f64)),
        Value::Str(s) if property == "length" => Ok(Value::Number(s.chars().count() as f64)),
        other => Err(EvalError::UnknownProperty {
            property: property.to_string(),
            kind: other.kind(),
        }),
    }
}

fn eval_index(target: Value, key: Value) -> Result<Value, EvalError> {
    match (target, key) {
        (Value::List(items), Value::Number(n)) => {
            if n < 0.0 || n.fract() != 0.0 {
                return Ok(Value::Null);
            }
            Ok(items.get(n as usize).cloned().unwrap_or(Value::Null))
        }
        (Value::Object(entries), Value::Str(key)) => {
            Ok(entries.get(&key).cloned().unwrap_or(Value::Null))
        }
        _ => Err(EvalError::InvalidOperands { op: "[]" }),
    }
}

fn eval_call(callee: &Expr, args: &[Expr], scope: &Scope) -> Result<Value, EvalError> {
    match callee {
        Expr::Ident(name) => {
            let args = eval_args(args, scope)?;
            if name == "now" {
                return Ok(Value::Number(now_millis()));
            }
            // Loop locals hold data, never callables.
            if scope.local(name).is_some() {
                return Err(EvalError::NotCallable);
            }
            scope
                .instance()
                .invoke(name, &args)
                .ok_or_else(|| EvalError::UnknownMethod {
                    method: name.clone(),
                })
        }
        Expr::Member {
            object,
            property,
            optional,
        } => {
            let target = eval_expr(object, scope)?;
            if matches!(target, Value::Null) {
                if *optional {
                    return Ok(Value::Null);
                }
                return Err(EvalError::PropertyOfNull {
                    property: property.clone(),
                });
            }
            let args = eval_args(args, scope)?;
            match target {
                Value::Signal(signal) => match property.as_str() {
                    "get" => Ok(signal.get()),
                    "getUntracked" => Ok(signal.get_untracked()),
                    "set" => {
                        signal.set(args.into_iter().next().unwrap_or(Value::Null));
                        Ok(Value::Null)
                    }
                    _ => Err(EvalError::UnknownMethod {
                        method: property.clone(),
                    }),
                },
                Value::Instance(instance) => {
                    instance
                        .invoke(property, &args)
                        .ok_or_else(|| EvalError::UnknownMethod {
                            method: property.clone(),
                        })
                }
                _ => Err(EvalError::NotCallable),
            }
        }
        _ => Err(EvalError::NotCallable),
    }
}

fn eval_args(args: &[Expr], scope: &Scope) -> Result<Vec<Value>, EvalError> {
    args.iter().map(|arg| eval_expr(arg, scope)).collect()
}

fn eval_binary(op: BinaryOp, left: &Expr, right: &Expr, scope: &Scope) -> Result<Value, EvalError> {
    // Logical operators short-circuit: the right side is not evaluated
    // unless the left side demands it.
    match op {
        BinaryOp::And => {
            let left = eval_expr(left, scope)?;
            if !left.is_truthy() {
                return Ok(Value::Bool(false));
            }
            let right = eval_expr(right, scope)?;
            return Ok(Value::Bool(right.is_truthy()));
        }
        BinaryOp::Or => {
            let left = eval_expr(left, scope)?;
            if left.is_truthy() {
                return Ok(Value::Bool(true));
            }
            let right = eval_expr(right, scope)?;
            return Ok(Value::Bool(right.is_truthy()));
        }
        _ => {}
    }

    let left = eval_expr(left, scope)?;
    let right = eval_expr(right, scope)?;
    match op {
        BinaryOp::Add => match (&left, &right) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::Str(_), _) | (_, Value::Str(_)) => {
                Ok(Value::Str(left.to_display() + &right.to_display()))
            }
            _ => Err(EvalError::InvalidOperands { op: "+" }),
        },
        BinaryOp::Sub => numeric(left, right, "-", |a, b| a - b),
        BinaryOp::Mul => numeric(left, right, "*", |a, b| a * b),
        BinaryOp::Rem => numeric(left, right, "%", |a, b| a % b),
        BinaryOp::Div => match (left, right) {
            (Value::Number(_), Value::Number(b)) if b == 0.0 => Err(EvalError::DivisionByZero),
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a / b)),
            _ => Err(EvalError::InvalidOperands { op: "/" }),
        },
        BinaryOp::Eq => Ok(Value::Bool(left == right)),
        BinaryOp::NotEq => Ok(Value::Bool(left != right)),
        BinaryOp::Lt => ordered(left, right, "<", |o| o == std::cmp::Ordering::Less),
        BinaryOp::LtEq => ordered(left, right, "<=", |o| o != std::cmp::Ordering::Greater),
        BinaryOp::Gt => ordered(left, right, ">", |o| o == std::cmp::Ordering::Greater),
        BinaryOp::GtEq => ordered(left, right, ">=", |o| o != std::cmp::Ordering::Less),
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

fn numeric(
    left: Value,
    right: Value,
    op: &'static str,
    apply: impl FnOnce(f64, f64) -> f64,
) -> Result<Value, EvalError> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok(Value::Number(apply(a, b))),
        _ => Err(EvalError::InvalidOperands { op }),
    }
}

fn ordered(
    left: Value,
    right: Value,
    op: &'static str,
    accept: impl FnOnce(std::cmp::Ordering) -> bool,
) -> Result<Value, EvalError> {
    let ordering = match (&left, &right) {
        (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => None,
    };
    match ordering {
        Some(ordering) => Ok(Value::Bool(accept(ordering))),
        None => Err(EvalError::InvalidOperands { op }),
    }
}

fn now_millis() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as f64)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::signal;
    use crate::runtime::DynamicInstance;

    fn empty_scope() -> Scope {
        Scope::new(DynamicInstance::new().into_ref())
    }

    fn eval_one(source: &str, scope: &Scope) -> Result<Value, EvalError> {
        Evaluator::new().eval(source, scope)
    }

    #[test]
    fn test_arithmetic() {
        let scope = empty_scope();
        assert_eq!(eval_one("1 + 2 * 3", &scope), Ok(Value::Number(7.0)));
        assert_eq!(eval_one("(1 + 2) * 3", &scope), Ok(Value::Number(9.0)));
        assert_eq!(eval_one("7 % 4", &scope), Ok(Value::Number(3.0)));
        assert_eq!(eval_one("-2 + 5", &scope), Ok(Value::Number(3.0)));
    }

    #[test]
    fn test_string_concatenation() {
        let scope = empty_scope();
        assert_eq!(eval_one("'item ' + 3", &scope), Ok(Value::Str("item 3".into())));
    }

    #[test]
    fn test_comparisons_and_logic() {
        let scope = empty_scope();
        assert_eq!(eval_one("1 < 2 && 'x'", &scope), Ok(Value::Bool(true)));
        assert_eq!(eval_one("1 > 2 || false", &scope), Ok(Value::Bool(false)));
        assert_eq!(eval_one("null == null", &scope), Ok(Value::Bool(true)));
        assert_eq!(eval_one("1 == '1'", &scope), Ok(Value::Bool(false)));
        assert_eq!(eval_one("!0", &scope), Ok(Value::Bool(true)));
    }

    #[test]
    fn test_short_circuit_skips_right_side() {
        // The right side would fail; && must never reach it.
        let scope = empty_scope();
        assert_eq!(
            eval_one("false && missing", &scope),
            Ok(Value::Bool(false))
        );
        assert_eq!(eval_one("true || missing", &scope), Ok(Value::Bool(true)));
    }

    #[test]
    fn test_instance_properties_and_locals() {
        let instance = DynamicInstance::new()
            .with_property("greeting", "hello")
            .into_ref();
        let mut scope = Scope::new(instance);

        assert_eq!(
            eval_one("greeting", &scope),
            Ok(Value::Str("hello".into()))
        );

        // A loop local shadows the instance property...
        scope.push_local("greeting", Value::from("shadowed"));
        assert_eq!(
            eval_one("greeting", &scope),
            Ok(Value::Str("shadowed".into()))
        );

        // ...and an inner local shadows the outer one.
        scope.push_local("greeting", Value::from("inner"));
        assert_eq!(eval_one("greeting", &scope), Ok(Value::Str("inner".into())));

        scope.pop_local();
        scope.pop_local();
        assert_eq!(eval_one("greeting", &scope), Ok(Value::Str("hello".into())));
    }

    #[test]
    fn test_method_invocation() {
        let count = signal(Value::Number(4.0));
        let count_method = count.clone();
        let instance = DynamicInstance::new()
            .with_method("getCount", move |_| count_method.get())
            .into_ref();
        let scope = Scope::new(instance);

        assert_eq!(eval_one("getCount() * 10", &scope), Ok(Value::Number(40.0)));
        assert_eq!(
            eval_one("this.getCount()", &scope),
            Ok(Value::Number(4.0)),
            "explicit this reaches the same method"
        );
    }

    #[test]
    fn test_signal_methods() {
        let count = signal(Value::Number(1.0));
        let instance = DynamicInstance::new()
            .with_property("count", Value::Signal(count.clone()))
            .into_ref();
        let scope = Scope::new(instance);

        assert_eq!(eval_one("count.get()", &scope), Ok(Value::Number(1.0)));

        assert_eq!(eval_one("count.set(5)", &scope), Ok(Value::Null));
        assert_eq!(count.get_untracked(), Value::Number(5.0));
        assert_eq!(
            eval_one("count.getUntracked()", &scope),
            Ok(Value::Number(5.0))
        );
    }

    #[test]
    fn test_nested_instance_chain() {
        let inner = DynamicInstance::new()
            .with_method("getCount2", |_| Value::Number(8.0))
            .into_ref();
        let outer = DynamicInstance::new()
            .with_property("counterService", Value::Instance(inner))
            .into_ref();
        let scope = Scope::new(outer);

        assert_eq!(
            eval_one("this.counterService.getCount2()", &scope),
            Ok(Value::Number(8.0))
        );
    }

    #[test]
    fn test_undefined_identifier_is_an_error() {
        let scope = empty_scope();
        assert_eq!(
            eval_one("foo.bar.baz", &scope),
            Err(EvalError::Undefined { name: "foo".into() })
        );
    }

    #[test]
    fn test_missing_property_degrades_to_null_then_errors() {
        let instance = DynamicInstance::new().with_property("foo", Value::Null).into_ref();
        let scope = Scope::new(instance);

        assert_eq!(
            eval_one("foo.bar", &scope),
            Err(EvalError::PropertyOfNull { property: "bar".into() })
        );
        assert_eq!(eval_one("foo?.bar", &scope), Ok(Value::Null));
    }

    #[test]
    fn test_index_and_length() {
        let instance = DynamicInstance::new()
            .with_property("items", vec![10i64, 20, 30])
            .into_ref();
        let scope = Scope::new(instance);

        assert_eq!(eval_one("items[1]", &scope), Ok(Value::Number(20.0)));
        assert_eq!(eval_one("items[9]", &scope), Ok(Value::Null));
        assert_eq!(eval_one("items.length", &scope), Ok(Value::Number(3.0)));
    }

    #[test]
    fn test_division_by_zero() {
        let scope = empty_scope();
        assert_eq!(eval_one("1 / 0", &scope), Err(EvalError::DivisionByZero));
    }

    #[test]
    fn test_context_defaults_swallow_failures() {
        let scope = empty_scope();
        let evaluator = Evaluator::new();

        assert_eq!(evaluator.eval_display("foo.bar.baz", &scope), "");
        assert!(!evaluator.eval_condition("missing", &scope));
        assert!(evaluator.eval_list("42", &scope).is_empty());
    }

    #[test]
    fn test_now_builtin() {
        let scope = empty_scope();
        let Ok(Value::Number(millis)) = eval_one("now()", &scope) else {
            panic!("now() should evaluate to a number");
        };
        assert!(millis > 0.0);
    }

    #[test]
    fn test_cache_reuses_parsed_expressions() {
        let evaluator = Evaluator::new();
        let scope = empty_scope();

        assert_eq!(evaluator.eval("1 + 1", &scope), Ok(Value::Number(2.0)));
        assert_eq!(evaluator.eval("1 + 1", &scope), Ok(Value::Number(2.0)));
        assert_eq!(evaluator.cache.borrow().len(), 1);
    }
}
