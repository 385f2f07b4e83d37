//! Dynamic Values
//!
//! [`Value`] is what expressions compute with. Store state is plain JSON;
//! values read from the store are converted on the way into a scope and
//! converted back when an expression writes to the store. Element handles,
//! native capabilities and closures exist only while an expression runs and
//! become `null` if they are ever written to the store.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::{Map, Value as Json};

use super::codegen::Lambda;
use crate::dom::NodeId;

/// Natively implemented functions reachable from expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Native {
    // Runtime capabilities
    Get,
    Set,
    Has,
    Update,
    SetDefaults,
    SetFromObj,
    Hydrate,

    // Pure built-ins
    JsonStringify,
    JsonParse,
    MathMin,
    MathMax,
    MathFloor,
    MathCeil,
    MathRound,
    MathAbs,
    ToString,
    ToNumber,
}

impl Native {
    /// The runtime API, in the order it is bound into every scope.
    pub const CAPABILITIES: [Native; 7] = [
        Native::Get,
        Native::Set,
        Native::Has,
        Native::Update,
        Native::SetDefaults,
        Native::SetFromObj,
        Native::Hydrate,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Native::Get => "get",
            Native::Set => "set",
            Native::Has => "has",
            Native::Update => "update",
            Native::SetDefaults => "setDefaults",
            Native::SetFromObj => "setFromObj",
            Native::Hydrate => "hydrate",
            Native::JsonStringify => "stringify",
            Native::JsonParse => "parse",
            Native::MathMin => "min",
            Native::MathMax => "max",
            Native::MathFloor => "floor",
            Native::MathCeil => "ceil",
            Native::MathRound => "round",
            Native::MathAbs => "abs",
            Native::ToString => "String",
            Native::ToNumber => "Number",
        }
    }

    /// Whether the call has to go through the runtime.
    pub fn is_capability(&self) -> bool {
        Self::CAPABILITIES.contains(self)
    }
}

/// A value produced or consumed by an expression.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
    /// Handle to an element in the document being hydrated.
    Element(NodeId),
    Native(Native),
    Function(Rc<Lambda>),
}

/// Format a number the way script code prints it.
pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let label = if n > 0.0 { "Infinity" } else { "-Infinity" };
        label.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else {
        format!("{n}")
    }
}

impl Value {
    pub fn from_json(json: &Json) -> Self {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::String(s.clone()),
            Json::Array(items) => Value::Array(items.iter().map(Value::from_json).collect()),
            Json::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert to JSON. Integral numbers become JSON integers.
    pub fn to_json(&self) -> Json {
        match self {
            Value::Undefined
            | Value::Null
            | Value::Element(_)
            | Value::Native(_)
            | Value::Function(_) => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => {
                if n.is_finite() && n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
                    Json::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(Json::Number)
                        .unwrap_or(Json::Null)
                }
            }
            Value::String(s) => Json::String(s.clone()),
            Value::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(map) => Json::Object(
                map.iter()
                    .filter(|(_, v)| !matches!(v, Value::Undefined | Value::Function(_)))
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect::<Map<_, _>>(),
            ),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Native(_) | Value::Function(_) => "function",
            Value::Null | Value::Array(_) | Value::Object(_) | Value::Element(_) => "object",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Numeric conversion used by arithmetic and relational operators.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse().unwrap_or(f64::NAN)
                }
            }
            Value::Array(items) if items.is_empty() => 0.0,
            Value::Array(items) if items.len() == 1 => items[0].to_number(),
            _ => f64::NAN,
        }
    }

    /// String conversion used by `+` and template literals.
    pub fn to_js_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.clone(),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    if item.is_nullish() {
                        String::new()
                    } else {
                        item.to_js_string()
                    }
                })
                .collect::<Vec<_>>()
                .join(","),
            Value::Object(_) => "[object Object]".to_string(),
            Value::Element(_) => "[object HTMLElement]".to_string(),
            Value::Native(native) => format!("function {}() {{ [native code] }}", native.name()),
            Value::Function(_) => "function () { [code] }".to_string(),
        }
    }

    /// Text written into markup by directives: strings verbatim, nullish as
    /// empty, arrays and objects as JSON, everything else as printed.
    pub fn stringify(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Undefined | Value::Null => String::new(),
            Value::Array(_) | Value::Object(_) => self.to_json().to_string(),
            other => other.to_js_string(),
        }
    }

    /// `===`; arrays and objects compare structurally.
    pub fn strict_equals(&self, other: &Value) -> bool {
        self == other
    }

    /// `==`: `null == undefined`, and primitives are compared numerically
    /// when their types differ.
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() || b.is_nullish() => a.is_nullish() && b.is_nullish(),
            (Value::Number(_) | Value::String(_) | Value::Bool(_), Value::Number(_) | Value::String(_) | Value::Bool(_))
                if std::mem::discriminant(self) != std::mem::discriminant(other) =>
            {
                self.to_number() == other.to_number()
            }
            _ => self == other,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Element(a), Value::Element(b)) => a == b,
            (Value::Native(a), Value::Native(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Array(items) => f.debug_list().entries(items).finish(),
            Value::Object(map) => f.debug_map().entries(map).finish(),
            Value::Element(id) => write!(f, "<element #{id}>"),
            Value::Native(native) => write!(f, "<native {}>", native.name()),
            Value::Function(_) => f.write_str("<function>"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(map: IndexMap<String, Value>) -> Self {
        Value::Object(map)
    }
}

impl From<Json> for Value {
    fn from(json: Json) -> Self {
        Value::from_json(&json)
    }
}

impl From<&Json> for Value {
    fn from(json: &Json) -> Self {
        Value::from_json(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_round_trip_keeps_integers_integral() {
        let json = json!({"count": 3, "ratio": 0.5, "tags": ["a", null], "ok": true});
        let value = Value::from_json(&json);
        assert_eq!(value.to_json(), json);
        assert_eq!(value.to_json().to_string(), r#"{"count":3,"ratio":0.5,"tags":["a",null],"ok":true}"#);
    }

    #[test]
    fn truthiness_follows_script_rules() {
        assert!(!Value::Undefined.is_truthy());
        assert!(!Value::from(0).is_truthy());
        assert!(!Value::from(f64::NAN).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(Value::from("0").is_truthy());
        assert!(Value::Array(vec![]).is_truthy());
    }

    #[test]
    fn stringify_for_markup() {
        assert_eq!(Value::from("<b>").stringify(), "<b>");
        assert_eq!(Value::Undefined.stringify(), "");
        assert_eq!(Value::from(2.5).stringify(), "2.5");
        assert_eq!(Value::from(7).stringify(), "7");
        assert_eq!(Value::from(json!([1, "a"])).stringify(), r#"[1,"a"]"#);
    }

    #[test]
    fn loose_and_strict_equality() {
        assert!(Value::Null.loose_equals(&Value::Undefined));
        assert!(!Value::Null.strict_equals(&Value::Undefined));
        assert!(Value::from("1").loose_equals(&Value::from(1)));
        assert!(!Value::from("1").strict_equals(&Value::from(1)));
        assert!(Value::from(json!({"a": [1]})).strict_equals(&Value::from(json!({"a": [1]}))));
    }

    #[test]
    fn numbers_print_like_scripts() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(format_number(f64::INFINITY), "Infinity");
    }
}
