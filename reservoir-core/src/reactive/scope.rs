//! Evaluation Scope
//!
//! The variables an expression can see, assembled fresh for every
//! evaluation from five layers. Later layers shadow earlier ones:
//!
//! 1. runtime capabilities (`get`, `set`, `has`, ...)
//! 2. a snapshot of the store
//! 3. ancestor bindings, farthest ancestor first so the nearest wins. Each
//!    element contributes its puddle (loop variables) and then its `pour.*`
//!    attributes, which are evaluated silently against its parent
//! 4. call-local parameters (`event` for listeners)
//! 5. `$el`, the element the expression runs for
//!
//! Names that are not valid identifiers are dropped before compiling, so an
//! attribute such as `pour.__proto__.x` cannot smuggle in a binding.

use indexmap::IndexMap;

use super::runtime::Runtime;
use crate::config::strip_family;
use crate::dom::NodeId;
use crate::expr::{is_valid_identifier, Native, Value};

/// Ordered name to value bindings. Rebinding a name replaces its value.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    bindings: IndexMap<String, Value>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    /// Drop every binding whose name is not a plain identifier.
    pub fn retain_identifiers(&mut self) {
        self.bindings.retain(|name, _| is_valid_identifier(name));
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Split into parallel name and value lists.
    pub fn into_parts(self) -> (Vec<String>, Vec<Value>) {
        self.bindings.into_iter().unzip()
    }
}

/// `node` and its element ancestors, nearest first.
fn element_chain(runtime: &Runtime, node: Option<NodeId>) -> Vec<NodeId> {
    let document = runtime.document.borrow();
    let mut chain = Vec::new();
    let mut current = node.filter(|&id| document.is_element(id));
    while let Some(id) = current {
        chain.push(id);
        current = document.parent_element(id);
    }
    chain
}

/// Assemble layers 1 to 4 for an evaluation at `node`.
pub(crate) fn assemble(runtime: &Runtime, node: Option<NodeId>, params: &[(&str, Value)]) -> Scope {
    let mut scope = Scope::new();

    for native in Native::CAPABILITIES {
        scope.bind(native.name(), Value::Native(native));
    }

    for (key, value) in runtime.store.borrow().snapshot() {
        scope.bind(key.clone(), Value::from_json(value));
    }

    let family = runtime.config().directives.pour_family();
    for ancestor in element_chain(runtime, node).into_iter().rev() {
        let puddle = runtime
            .nodes
            .borrow()
            .get(ancestor)
            .map(|state| state.puddle().clone())
            .unwrap_or_default();
        for (name, value) in puddle {
            scope.bind(name, value);
        }

        let (pours, parent) = {
            let document = runtime.document.borrow();
            (
                document.attributes_with_prefix(ancestor, &family),
                document.parent_element(ancestor),
            )
        };
        for (attribute, source) in pours {
            let Some(name) = strip_family(&attribute, &family) else {
                continue;
            };
            if let Ok(value) = runtime.run(&source, scope.clone(), parent, true) {
                scope.bind(name, value);
            }
        }
    }

    for (name, value) in params {
        scope.bind(*name, value.clone());
    }

    scope
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rebinding_replaces_value() {
        let mut scope = Scope::new();
        scope.bind("x", Value::from(1));
        scope.bind("y", Value::from(2));
        scope.bind("x", Value::from(3));
        assert_eq!(scope.len(), 2);
        assert_eq!(scope.get("x"), Some(&Value::from(3)));
    }

    #[test]
    fn test_invalid_names_are_dropped() {
        let mut scope = Scope::new();
        scope.bind("user", Value::Null);
        scope.bind("__proto__.polluted", Value::Null);
        scope.bind("data-id", Value::Null);
        scope.bind("$el", Value::Null);
        scope.retain_identifiers();
        let names: Vec<&str> = scope.names().collect();
        assert_eq!(names, ["user", "$el"]);
    }
}
