//! Built-in globals, properties and methods.
//!
//! Everything here is pure except element access, which goes through the
//! [`Host`] so the expression never touches the document directly.

use indexmap::IndexMap;

use super::codegen::Host;
use super::value::{format_number, Native, Value};
use super::EvalError;

/// Globals that resolve when no parameter of the same name exists.
pub(crate) fn global(name: &str) -> Option<Value> {
    let object = |entries: &[Native]| {
        Value::Object(
            entries
                .iter()
                .map(|n| (n.name().to_string(), Value::Native(*n)))
                .collect::<IndexMap<_, _>>(),
        )
    };
    Some(match name {
        "JSON" => object(&[Native::JsonStringify, Native::JsonParse]),
        "Math" => object(&[
            Native::MathMin,
            Native::MathMax,
            Native::MathFloor,
            Native::MathCeil,
            Native::MathRound,
            Native::MathAbs,
        ]),
        "String" => Value::Native(Native::ToString),
        "Number" => Value::Native(Native::ToNumber),
        "NaN" => Value::Number(f64::NAN),
        "Infinity" => Value::Number(f64::INFINITY),
        _ => return None,
    })
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

fn read_error(target: &Value, name: &str) -> EvalError {
    EvalError::Type(format!(
        "Cannot read properties of {} (reading '{name}')",
        target.to_js_string()
    ))
}

/// `length` as script code counts it (UTF-16 units).
fn js_length(s: &str) -> usize {
    s.encode_utf16().count()
}

/// Resolve a possibly negative `slice` bound against a length.
fn relative_index(value: &Value, len: usize, default: usize) -> usize {
    if value.is_undefined() {
        return default;
    }
    let n = value.to_number();
    if n.is_nan() {
        0
    } else if n < 0.0 {
        (len as f64 + n.trunc()).max(0.0) as usize
    } else {
        (n.trunc() as usize).min(len)
    }
}

/// Read `target.name`.
pub(crate) fn property(host: &dyn Host, target: &Value, name: &str) -> Result<Value, EvalError> {
    match target {
        Value::Undefined | Value::Null => Err(read_error(target, name)),
        Value::String(s) => Ok(match name {
            "length" => Value::from(js_length(s)),
            _ => name
                .parse::<usize>()
                .ok()
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::String(c.to_string()))
                .unwrap_or_default(),
        }),
        Value::Array(items) => Ok(match name {
            "length" => Value::from(items.len()),
            _ => name
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or_default(),
        }),
        Value::Object(map) => Ok(map.get(name).cloned().unwrap_or_default()),
        Value::Element(id) => host.element_property(*id, name),
        Value::Native(native) if name == "name" => Ok(Value::from(native.name())),
        _ => Ok(Value::Undefined),
    }
}

/// Read `target[index]`.
pub(crate) fn index(host: &dyn Host, target: &Value, index: &Value) -> Result<Value, EvalError> {
    let key = match index {
        Value::Number(n) => format_number(*n),
        other => other.to_js_string(),
    };
    property(host, target, &key)
}

/// Call a function value.
pub(crate) fn call(host: &dyn Host, callee: &Value, args: &[Value], label: &str) -> Result<Value, EvalError> {
    match callee {
        Value::Native(native) if native.is_capability() => host.call_capability(*native, args),
        Value::Native(native) => call_native(*native, args),
        Value::Function(lambda) => lambda.call(host, args),
        _ => Err(EvalError::Type(format!("{label} is not a function"))),
    }
}

fn call_native(native: Native, args: &[Value]) -> Result<Value, EvalError> {
    let numbers = || args.iter().map(Value::to_number);
    let first = || arg(args, 0).to_number();
    Ok(match native {
        Native::JsonStringify => {
            let value = arg(args, 0);
            if matches!(value, Value::Undefined | Value::Function(_) | Value::Native(_)) {
                return Ok(Value::Undefined);
            }
            let json = value.to_json();
            let pretty = arg(args, 2).to_number() > 0.0;
            let text = if pretty {
                serde_json::to_string_pretty(&json)
            } else {
                serde_json::to_string(&json)
            };
            Value::String(text.map_err(|e| EvalError::Type(e.to_string()))?)
        }
        Native::JsonParse => {
            let text = arg(args, 0).to_js_string();
            let json: serde_json::Value = serde_json::from_str(&text).map_err(|e| EvalError::Syntax {
                message: format!("JSON.parse: {e}"),
                early: false,
            })?;
            Value::from_json(&json)
        }
        Native::MathMin => Value::Number(numbers().fold(f64::INFINITY, |acc, n| {
            if acc.is_nan() || n.is_nan() { f64::NAN } else { acc.min(n) }
        })),
        Native::MathMax => Value::Number(numbers().fold(f64::NEG_INFINITY, |acc, n| {
            if acc.is_nan() || n.is_nan() { f64::NAN } else { acc.max(n) }
        })),
        Native::MathFloor => Value::Number(first().floor()),
        Native::MathCeil => Value::Number(first().ceil()),
        Native::MathRound => Value::Number((first() + 0.5).floor()),
        Native::MathAbs => Value::Number(first().abs()),
        Native::ToString => Value::String(args.first().map(Value::to_js_string).unwrap_or_default()),
        Native::ToNumber => Value::Number(args.first().map(Value::to_number).unwrap_or(0.0)),
        capability => {
            return Err(EvalError::Type(format!(
                "{} requires a runtime",
                capability.name()
            )))
        }
    })
}

/// Call `target.name(args)`.
pub(crate) fn method(host: &dyn Host, target: &Value, name: &str, args: &[Value], label: &str) -> Result<Value, EvalError> {
    match target {
        Value::Undefined | Value::Null => Err(read_error(target, name)),
        Value::Element(id) => host.element_method(*id, name, args),
        Value::String(s) => string_method(s, name, args, label),
        Value::Array(items) => array_method(host, items, name, args, label),
        Value::Number(n) => number_method(*n, name, args, label),
        Value::Object(map) => match map.get(name) {
            Some(callee) => call(host, callee, args, &format!("{label}.{name}")),
            None => Err(not_a_function(label, name)),
        },
        _ if name == "toString" => Ok(Value::String(target.to_js_string())),
        _ => Err(not_a_function(label, name)),
    }
}

fn not_a_function(label: &str, name: &str) -> EvalError {
    EvalError::Type(format!("{label}.{name} is not a function"))
}

fn string_method(s: &str, name: &str, args: &[Value], label: &str) -> Result<Value, EvalError> {
    let needle = || arg(args, 0).to_js_string();
    Ok(match name {
        "toUpperCase" => Value::String(s.to_uppercase()),
        "toLowerCase" => Value::String(s.to_lowercase()),
        "trim" => Value::String(s.trim().to_string()),
        "toString" => Value::String(s.to_string()),
        "includes" => Value::Bool(s.contains(&needle())),
        "startsWith" => Value::Bool(s.starts_with(&needle())),
        "endsWith" => Value::Bool(s.ends_with(&needle())),
        "indexOf" => Value::Number(
            s.find(&needle())
                .map(|byte| js_length(&s[..byte]) as f64)
                .unwrap_or(-1.0),
        ),
        "split" => {
            let separator = arg(args, 0);
            let parts: Vec<Value> = match separator {
                Value::Undefined => vec![Value::from(s)],
                _ => {
                    let separator = separator.to_js_string();
                    if separator.is_empty() {
                        s.chars().map(|c| Value::String(c.to_string())).collect()
                    } else {
                        s.split(separator.as_str()).map(Value::from).collect()
                    }
                }
            };
            Value::Array(parts)
        }
        "slice" => {
            let chars: Vec<char> = s.chars().collect();
            let start = relative_index(&arg(args, 0), chars.len(), 0);
            let end = relative_index(&arg(args, 1), chars.len(), chars.len());
            Value::String(chars.get(start..end.max(start)).unwrap_or_default().iter().collect())
        }
        _ => return Err(not_a_function(label, name)),
    })
}

fn array_method(host: &dyn Host, items: &[Value], name: &str, args: &[Value], label: &str) -> Result<Value, EvalError> {
    let callback = arg(args, 0);
    let each = |f: &mut dyn FnMut(&Value, Value) -> Result<bool, EvalError>| -> Result<(), EvalError> {
        for (i, item) in items.iter().enumerate() {
            let result = call(host, &callback, &[item.clone(), Value::from(i)], "callback")?;
            if !f(item, result)? {
                break;
            }
        }
        Ok(())
    };

    Ok(match name {
        "includes" => {
            let needle = arg(args, 0);
            let is_nan = |v: &Value| v.as_f64().is_some_and(f64::is_nan);
            Value::Bool(
                items
                    .iter()
                    .any(|item| item.strict_equals(&needle) || (is_nan(item) && is_nan(&needle))),
            )
        }
        "indexOf" => {
            let needle = arg(args, 0);
            Value::Number(
                items
                    .iter()
                    .position(|item| item.strict_equals(&needle))
                    .map(|i| i as f64)
                    .unwrap_or(-1.0),
            )
        }
        "join" => {
            let separator = match arg(args, 0) {
                Value::Undefined => ",".to_string(),
                other => other.to_js_string(),
            };
            Value::String(
                items
                    .iter()
                    .map(|item| if item.is_nullish() { String::new() } else { item.to_js_string() })
                    .collect::<Vec<_>>()
                    .join(&separator),
            )
        }
        "slice" => {
            let start = relative_index(&arg(args, 0), items.len(), 0);
            let end = relative_index(&arg(args, 1), items.len(), items.len());
            Value::Array(items.get(start..end.max(start)).unwrap_or_default().to_vec())
        }
        "map" => {
            let mut out = Vec::with_capacity(items.len());
            each(&mut |_, result| {
                out.push(result);
                Ok(true)
            })?;
            Value::Array(out)
        }
        "filter" => {
            let mut out = Vec::new();
            each(&mut |item, result| {
                if result.is_truthy() {
                    out.push(item.clone());
                }
                Ok(true)
            })?;
            Value::Array(out)
        }
        "find" => {
            let mut found = Value::Undefined;
            each(&mut |item, result| {
                if result.is_truthy() {
                    found = item.clone();
                    return Ok(false);
                }
                Ok(true)
            })?;
            found
        }
        "some" => {
            let mut any = false;
            each(&mut |_, result| {
                any = result.is_truthy();
                Ok(!any)
            })?;
            Value::Bool(any)
        }
        "every" => {
            let mut all = true;
            each(&mut |_, result| {
                all = result.is_truthy();
                Ok(all)
            })?;
            Value::Bool(all)
        }
        "toString" => Value::String(Value::Array(items.to_vec()).to_js_string()),
        _ => return Err(not_a_function(label, name)),
    })
}

fn number_method(n: f64, name: &str, args: &[Value], label: &str) -> Result<Value, EvalError> {
    Ok(match name {
        "toFixed" => {
            let digits = arg(args, 0).to_number();
            let digits = if digits.is_nan() { 0.0 } else { digits.trunc() };
            if !(0.0..=100.0).contains(&digits) {
                return Err(EvalError::Range(
                    "toFixed() digits argument must be between 0 and 100".to_string(),
                ));
            }
            if n.is_finite() {
                Value::String(format!("{:.*}", digits as usize, n))
            } else {
                Value::String(format_number(n))
            }
        }
        "toString" => Value::String(format_number(n)),
        _ => return Err(not_a_function(label, name)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::NodeId;
    use serde_json::json;

    struct NoHost;

    impl Host for NoHost {
        fn call_capability(&self, native: Native, _args: &[Value]) -> Result<Value, EvalError> {
            Err(EvalError::Type(native.name().to_string()))
        }

        fn element_property(&self, _id: NodeId, _name: &str) -> Result<Value, EvalError> {
            Ok(Value::Undefined)
        }

        fn element_method(&self, _id: NodeId, name: &str, _args: &[Value]) -> Result<Value, EvalError> {
            Err(EvalError::Type(name.to_string()))
        }
    }

    #[test]
    fn test_property_on_nullish_is_type_error() {
        let err = property(&NoHost, &Value::Undefined, "name").unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: Cannot read properties of undefined (reading 'name')"
        );
    }

    #[test]
    fn test_string_methods() {
        let s = Value::from("Hello World");
        let call = |name: &str, args: &[Value]| method(&NoHost, &s, name, args, "s").unwrap();
        assert_eq!(call("toUpperCase", &[]), Value::from("HELLO WORLD"));
        assert_eq!(call("indexOf", &[Value::from("World")]), Value::from(6));
        assert_eq!(call("slice", &[Value::from(-5)]), Value::from("World"));
        assert_eq!(
            call("split", &[Value::from(" ")]),
            Value::from(json!(["Hello", "World"]))
        );
    }

    #[test]
    fn test_array_methods() {
        let items = Value::from(json!([1, 2, 3]));
        assert_eq!(
            method(&NoHost, &items, "join", &[Value::from("-")], "items").unwrap(),
            Value::from("1-2-3")
        );
        assert_eq!(
            method(&NoHost, &items, "includes", &[Value::from(2)], "items").unwrap(),
            Value::Bool(true)
        );
        assert_eq!(property(&NoHost, &items, "length").unwrap(), Value::from(3));
    }

    #[test]
    fn test_math_and_json() {
        assert_eq!(call_native(Native::MathMax, &[Value::from(1), Value::from(5)]).unwrap(), Value::from(5));
        assert_eq!(call_native(Native::MathRound, &[Value::from(-2.5)]).unwrap(), Value::from(-2));
        assert_eq!(
            call_native(Native::JsonStringify, &[Value::from(json!({"a": [1, 2]}))]).unwrap(),
            Value::from(r#"{"a":[1,2]}"#)
        );
        assert!(matches!(
            call_native(Native::JsonParse, &[Value::from("{oops")]),
            Err(EvalError::Syntax { .. })
        ));
    }

    #[test]
    fn test_to_fixed_range() {
        assert_eq!(number_method(3.14159, "toFixed", &[Value::from(2)], "n").unwrap(), Value::from("3.14"));
        assert!(matches!(
            number_method(1.0, "toFixed", &[Value::from(101)], "n"),
            Err(EvalError::Range(_))
        ));
    }

    #[test]
    fn test_calling_a_non_function() {
        let err = call(&NoHost, &Value::from(3), &[], "count").unwrap_err();
        assert_eq!(err.to_string(), "TypeError: count is not a function");
    }
}
