//! Closure Code Generation
//!
//! Lowers an [`Expr`] tree into a tree of closures bound to a fixed, ordered
//! parameter list. Identifiers are resolved to slot indices once, at compile
//! time; running the result is then just a walk over prebuilt closures.
//!
//! Identifiers that match no parameter and no global do not fail
//! compilation. They compile to a closure that raises a `ReferenceError`
//! when it actually runs, so `typeof missing` and `false && missing` behave.

use std::fmt;
use std::rc::Rc;

use super::builtins;
use super::ir::{BinaryOp, Expr, Literal, LogicalOp, TemplatePart, UnaryOp};
use super::value::{Native, Value};
use super::EvalError;
use crate::dom::NodeId;

/// What compiled code can ask of the outside world.
pub trait Host {
    /// Invoke a runtime capability such as `set` or `get`.
    fn call_capability(&self, native: Native, args: &[Value]) -> Result<Value, EvalError>;

    /// Read a property of an element handle.
    fn element_property(&self, id: NodeId, name: &str) -> Result<Value, EvalError>;

    /// Call a method on an element handle.
    fn element_method(&self, id: NodeId, name: &str, args: &[Value]) -> Result<Value, EvalError>;
}

/// Bindings visible while a closure runs.
///
/// Slot `i` lives in `scope` when `i < scope.len()`, otherwise in `locals`.
pub(crate) struct Frame<'a> {
    scope: &'a [Value],
    locals: &'a [Value],
    this: &'a Value,
    host: &'a dyn Host,
}

impl Frame<'_> {
    fn slot(&self, index: usize) -> Value {
        match self.scope.get(index) {
            Some(value) => value.clone(),
            None => self
                .locals
                .get(index - self.scope.len())
                .cloned()
                .unwrap_or_default(),
        }
    }

    fn capture(&self) -> Rc<[Value]> {
        self.scope.iter().chain(self.locals).cloned().collect()
    }
}

type Thunk = Rc<dyn Fn(&Frame<'_>) -> Result<Value, EvalError>>;

fn thunk<F>(f: F) -> Thunk
where
    F: Fn(&Frame<'_>) -> Result<Value, EvalError> + 'static,
{
    Rc::new(f)
}

enum Piece {
    Text(String),
    Hole(Thunk),
}

/// An arrow function value.
pub struct Lambda {
    arity: usize,
    captured: Rc<[Value]>,
    this: Value,
    body: Thunk,
}

impl Lambda {
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Call with `args`; missing arguments are `undefined`, extras dropped.
    pub fn call(&self, host: &dyn Host, args: &[Value]) -> Result<Value, EvalError> {
        let locals: Vec<Value> = args
            .iter()
            .cloned()
            .chain(std::iter::repeat(Value::Undefined))
            .take(self.arity)
            .collect();
        (self.body)(&Frame {
            scope: &self.captured,
            locals: &locals,
            this: &self.this,
            host,
        })
    }
}

impl fmt::Debug for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lambda")
            .field("arity", &self.arity)
            .field("captured", &self.captured.len())
            .finish()
    }
}

/// An expression compiled against a parameter list.
pub struct CompiledExpression {
    params: Vec<String>,
    body: Thunk,
}

impl CompiledExpression {
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Run with one argument per parameter, `this` as the receiver.
    pub fn call(&self, host: &dyn Host, this: &Value, args: &[Value]) -> Result<Value, EvalError> {
        debug_assert_eq!(args.len(), self.params.len(), "Wrong number of arguments");
        (self.body)(&Frame {
            scope: args,
            locals: &[],
            this,
            host,
        })
    }
}

impl fmt::Debug for CompiledExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledExpression")
            .field("params", &self.params)
            .finish()
    }
}

/// Lowers expression trees to closures.
pub struct Compiler {
    params: Vec<String>,
}

impl Compiler {
    pub fn new(params: &[String]) -> Self {
        Self {
            params: params.to_vec(),
        }
    }

    pub fn compile(self, expr: &Expr) -> CompiledExpression {
        let body = self.lower(expr);
        CompiledExpression {
            params: self.params,
            body,
        }
    }

    /// Slot of `name`; the last parameter with that name wins.
    fn resolve(&self, name: &str) -> Option<usize> {
        self.params.iter().rposition(|p| p == name)
    }

    fn lower(&self, expr: &Expr) -> Thunk {
        match expr {
            Expr::Literal { value } => {
                let value = match value {
                    Literal::Undefined => Value::Undefined,
                    Literal::Null => Value::Null,
                    Literal::Bool(b) => Value::Bool(*b),
                    Literal::Number(n) => Value::Number(*n),
                    Literal::String(s) => Value::String(s.clone()),
                };
                thunk(move |_| Ok(value.clone()))
            }

            Expr::Template { parts } => {
                let pieces: Vec<Piece> = parts
                    .iter()
                    .map(|part| match part {
                        TemplatePart::Text(text) => Piece::Text(text.clone()),
                        TemplatePart::Expr(expr) => Piece::Hole(self.lower(expr)),
                    })
                    .collect();
                thunk(move |frame| {
                    let mut out = String::new();
                    for piece in &pieces {
                        match piece {
                            Piece::Text(text) => out.push_str(text),
                            Piece::Hole(hole) => out.push_str(&hole(frame)?.to_js_string()),
                        }
                    }
                    Ok(Value::String(out))
                })
            }

            Expr::Array { items } => {
                let items: Vec<Thunk> = items.iter().map(|item| self.lower(item)).collect();
                thunk(move |frame| {
                    items
                        .iter()
                        .map(|item| item(frame))
                        .collect::<Result<Vec<_>, _>>()
                        .map(Value::Array)
                })
            }

            Expr::Object { entries } => {
                let entries: Vec<(String, Thunk)> = entries
                    .iter()
                    .map(|(key, value)| (key.clone(), self.lower(value)))
                    .collect();
                thunk(move |frame| {
                    let mut map = indexmap::IndexMap::with_capacity(entries.len());
                    for (key, value) in &entries {
                        map.insert(key.clone(), value(frame)?);
                    }
                    Ok(Value::Object(map))
                })
            }

            Expr::Ident { name } => self.lower_ident(name),

            Expr::This => thunk(|frame| Ok(frame.this.clone())),

            Expr::Member {
                object,
                property,
                optional,
            } => {
                let object = self.lower(object);
                let property = property.clone();
                let optional = *optional;
                thunk(move |frame| {
                    let target = object(frame)?;
                    if optional && target.is_nullish() {
                        return Ok(Value::Undefined);
                    }
                    builtins::property(frame.host, &target, &property)
                })
            }

            Expr::Index { object, index } => {
                let object = self.lower(object);
                let index = self.lower(index);
                thunk(move |frame| {
                    let target = object(frame)?;
                    let key = index(frame)?;
                    builtins::index(frame.host, &target, &key)
                })
            }

            Expr::Call { callee, args } => self.lower_call(callee, args),

            Expr::Unary { op, operand } => self.lower_unary(*op, operand),

            Expr::Binary { op, left, right } => {
                let op = *op;
                let left = self.lower(left);
                let right = self.lower(right);
                thunk(move |frame| binary(op, &left(frame)?, &right(frame)?))
            }

            Expr::Logical { op, left, right } => {
                let op = *op;
                let left = self.lower(left);
                let right = self.lower(right);
                thunk(move |frame| {
                    let value = left(frame)?;
                    let short_circuit = match op {
                        LogicalOp::And => !value.is_truthy(),
                        LogicalOp::Or => value.is_truthy(),
                        LogicalOp::Nullish => !value.is_nullish(),
                    };
                    if short_circuit {
                        Ok(value)
                    } else {
                        right(frame)
                    }
                })
            }

            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                let test = self.lower(test);
                let consequent = self.lower(consequent);
                let alternate = self.lower(alternate);
                thunk(move |frame| {
                    if test(frame)?.is_truthy() {
                        consequent(frame)
                    } else {
                        alternate(frame)
                    }
                })
            }

            Expr::Arrow { params, body } => {
                let arity = params.len();
                let inner = Compiler {
                    params: self.params.iter().chain(params).cloned().collect(),
                };
                let body = inner.lower(body);
                thunk(move |frame| {
                    Ok(Value::Function(Rc::new(Lambda {
                        arity,
                        captured: frame.capture(),
                        this: frame.this.clone(),
                        body: body.clone(),
                    })))
                })
            }
        }
    }

    fn lower_ident(&self, name: &str) -> Thunk {
        if let Some(slot) = self.resolve(name) {
            return thunk(move |frame| Ok(frame.slot(slot)));
        }
        if let Some(value) = builtins::global(name) {
            return thunk(move |_| Ok(value.clone()));
        }
        let name = name.to_string();
        thunk(move |_| Err(EvalError::Reference(name.clone())))
    }

    fn lower_call(&self, callee: &Expr, args: &[Expr]) -> Thunk {
        let args: Vec<Thunk> = args.iter().map(|arg| self.lower(arg)).collect();
        let label = label(callee);
        let eval_args = move |frame: &Frame<'_>| -> Result<Vec<Value>, EvalError> {
            args.iter().map(|arg| arg(frame)).collect()
        };

        if let Expr::Member {
            object,
            property,
            optional,
        } = callee
        {
            let object = self.lower(object);
            let property = property.clone();
            let optional = *optional;
            let receiver = label.rsplit_once('.').map(|(r, _)| r.to_string()).unwrap_or_default();
            return thunk(move |frame| {
                let target = object(frame)?;
                if optional && target.is_nullish() {
                    return Ok(Value::Undefined);
                }
                let args = eval_args(frame)?;
                builtins::method(frame.host, &target, &property, &args, &receiver)
            });
        }

        let callee = self.lower(callee);
        thunk(move |frame| {
            let function = callee(frame)?;
            let args = eval_args(frame)?;
            builtins::call(frame.host, &function, &args, &label)
        })
    }

    fn lower_unary(&self, op: UnaryOp, operand: &Expr) -> Thunk {
        // typeof on an undeclared name is the one place a missing
        // identifier is not an error
        if let (UnaryOp::TypeOf, Expr::Ident { name }) = (op, operand) {
            if self.resolve(name).is_none() && builtins::global(name).is_none() {
                return thunk(|_| Ok(Value::from("undefined")));
            }
        }
        let operand = self.lower(operand);
        thunk(move |frame| {
            let value = operand(frame)?;
            Ok(match op {
                UnaryOp::Not => Value::Bool(!value.is_truthy()),
                UnaryOp::Neg => Value::Number(-value.to_number()),
                UnaryOp::Plus => Value::Number(value.to_number()),
                UnaryOp::TypeOf => Value::from(value.type_of()),
            })
        })
    }
}

/// Source-like name of a callee, used in error messages.
fn label(expr: &Expr) -> String {
    match expr {
        Expr::Ident { name } => name.clone(),
        Expr::This => "this".to_string(),
        Expr::Member {
            object, property, ..
        } => format!("{}.{property}", label(object)),
        Expr::Index { object, .. } => format!("{}[...]", label(object)),
        Expr::Call { callee, .. } => format!("{}(...)", label(callee)),
        _ => "(intermediate value)".to_string(),
    }
}

fn is_primitive(value: &Value) -> bool {
    matches!(
        value,
        Value::Undefined | Value::Null | Value::Bool(_) | Value::Number(_)
    )
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    let numbers = || (left.to_number(), right.to_number());
    Ok(match op {
        BinaryOp::Add => {
            if is_primitive(left) && is_primitive(right) {
                Value::Number(left.to_number() + right.to_number())
            } else {
                Value::String(left.to_js_string() + &right.to_js_string())
            }
        }
        BinaryOp::Sub => {
            let (a, b) = numbers();
            Value::Number(a - b)
        }
        BinaryOp::Mul => {
            let (a, b) = numbers();
            Value::Number(a * b)
        }
        BinaryOp::Div => {
            let (a, b) = numbers();
            Value::Number(a / b)
        }
        BinaryOp::Mod => {
            let (a, b) = numbers();
            Value::Number(a % b)
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (left, right) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => {
                    let (a, b) = numbers();
                    a.partial_cmp(&b)
                }
            };
            Value::Bool(ordering.is_some_and(|ordering| match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinaryOp::Eq => Value::Bool(left.loose_equals(right)),
        BinaryOp::Ne => Value::Bool(!left.loose_equals(right)),
        BinaryOp::StrictEq => Value::Bool(left.strict_equals(right)),
        BinaryOp::StrictNe => Value::Bool(!left.strict_equals(right)),
        BinaryOp::In => {
            let key = left.to_js_string();
            match right {
                Value::Object(map) => Value::Bool(map.contains_key(&key)),
                Value::Array(items) => Value::Bool(
                    key == "length" || key.parse::<usize>().is_ok_and(|i| i < items.len()),
                ),
                other => {
                    return Err(EvalError::Type(format!(
                        "Cannot use 'in' operator to search for '{key}' in {}",
                        other.to_js_string()
                    )))
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parser::parse;
    use serde_json::json;
    use std::cell::RefCell;

    /// Records capability calls instead of touching a store.
    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<(Native, Vec<Value>)>>,
    }

    impl Host for Recorder {
        fn call_capability(&self, native: Native, args: &[Value]) -> Result<Value, EvalError> {
            self.calls.borrow_mut().push((native, args.to_vec()));
            Ok(Value::Undefined)
        }

        fn element_property(&self, id: NodeId, name: &str) -> Result<Value, EvalError> {
            Ok(Value::from(format!("{name}#{id}")))
        }

        fn element_method(&self, _id: NodeId, name: &str, _args: &[Value]) -> Result<Value, EvalError> {
            Err(EvalError::Type(format!("$el.{name} is not a function")))
        }
    }

    fn run(source: &str, bindings: &[(&str, Value)]) -> Result<Value, EvalError> {
        let params: Vec<String> = bindings.iter().map(|(k, _)| k.to_string()).collect();
        let args: Vec<Value> = bindings.iter().map(|(_, v)| v.clone()).collect();
        let compiled = Compiler::new(&params).compile(&parse(source)?);
        compiled.call(&Recorder::default(), &Value::Undefined, &args)
    }

    #[test]
    fn test_arithmetic_and_concatenation() {
        assert_eq!(run("1 + 2 * 3", &[]).unwrap(), Value::from(7));
        assert_eq!(run("'n=' + n", &[("n", Value::from(2))]).unwrap(), Value::from("n=2"));
        assert_eq!(run("10 % 4 - -1", &[]).unwrap(), Value::from(3));
    }

    #[test]
    fn test_last_binding_wins() {
        let value = run("x", &[("x", Value::from(1)), ("x", Value::from(2))]).unwrap();
        assert_eq!(value, Value::from(2));
    }

    #[test]
    fn test_unknown_identifier_only_fails_when_evaluated() {
        assert_eq!(
            run("missing", &[]).unwrap_err(),
            EvalError::Reference("missing".into())
        );
        assert_eq!(run("typeof missing", &[]).unwrap(), Value::from("undefined"));
        assert_eq!(run("false && missing", &[]).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_member_access_on_undefined_is_type_error() {
        let err = run("user.name", &[("user", Value::Undefined)]).unwrap_err();
        assert!(matches!(err, EvalError::Type(_)));
        assert_eq!(
            run("user?.name", &[("user", Value::Undefined)]).unwrap(),
            Value::Undefined
        );
    }

    #[test]
    fn test_arrow_functions_capture_scope() {
        let items = Value::from(json!([1, 2, 3]));
        let value = run(
            "items.map(x => x * factor).filter(x => x > 2)",
            &[("items", items), ("factor", Value::from(2))],
        )
        .unwrap();
        assert_eq!(value, Value::from(json!([4, 6])));

        let nested = run("[1, 2].map(a => [10].map(b => a + b))", &[]).unwrap();
        assert_eq!(nested, Value::from(json!([[11], [12]])));
    }

    #[test]
    fn test_capabilities_reach_the_host() {
        let host = Recorder::default();
        let params = vec!["set".to_string()];
        let compiled = Compiler::new(&params).compile(&parse("set('count', 1 + 1)").unwrap());
        compiled
            .call(&host, &Value::Undefined, &[Value::Native(Native::Set)])
            .unwrap();
        let calls = host.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, Native::Set);
        assert_eq!(calls[0].1, vec![Value::from("count"), Value::from(2)]);
    }

    #[test]
    fn test_element_handles_go_through_host() {
        let id = NodeId::from(slotmap::KeyData::from_ffi(4));
        let el = Value::Element(id);
        assert_eq!(run("$el.value", &[("$el", el)]).unwrap(), Value::from(format!("value#{id}")));
    }

    #[test]
    fn test_templates_and_comparisons() {
        let value = run(
            "`${count} item${count === 1 ? '' : 's'}`",
            &[("count", Value::from(3))],
        )
        .unwrap();
        assert_eq!(value, Value::from("3 items"));
        assert_eq!(run("'b' > 'a' && 2 >= 2", &[]).unwrap(), Value::Bool(true));
        assert_eq!(run("null == undefined", &[]).unwrap(), Value::Bool(true));
        assert_eq!(run("'a' in { a: 1 }", &[]).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_calling_non_function_names_the_callee() {
        let err = run("user.name()", &[("user", Value::from(json!({"name": "Ada"})))]).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: user.name is not a function");
    }
}
