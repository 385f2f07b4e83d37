//! Expression Language
//!
//! A small, sandboxed expression language for directive attributes. Source
//! text is parsed once (and cached), then compiled against whatever
//! parameter list the caller assembled for that evaluation.
//!
//! ```text
//! "count > 0 ? `${count} left` : 'done'"
//!        │ parse (cached by source)
//!        ▼
//!   Expr tree ──compile(params)──▶ CompiledExpression ──call(host, this, args)──▶ Value
//! ```
//!
//! Nothing here can reach the document or the store directly; both go
//! through the [`Host`] the caller supplies.

mod builtins;
pub mod codegen;
pub mod ir;
pub mod parser;
pub mod value;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use thiserror::Error;

pub(crate) use builtins::call as call_value;
pub use codegen::{CompiledExpression, Compiler, Host, Lambda};
pub use ir::Expr;
pub use parser::parse;
pub use value::{Native, Value};

/// Failure raised while parsing or running an expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("ReferenceError: {0} is not defined")]
    Reference(String),

    #[error("TypeError: {0}")]
    Type(String),

    /// `early` marks an argument list closed before the expression ended.
    #[error("SyntaxError: {message}")]
    Syntax { message: String, early: bool },

    #[error("RangeError: {0}")]
    Range(String),
}

impl EvalError {
    /// Reference and type errors are routine for guarded expressions and
    /// are recorded without being reported.
    pub fn is_expected(&self) -> bool {
        matches!(self, EvalError::Reference(_) | EvalError::Type(_))
    }

    pub fn is_early_termination(&self) -> bool {
        matches!(self, EvalError::Syntax { early: true, .. })
    }
}

const RESERVED: [&str; 12] = [
    "true", "false", "null", "undefined", "this", "typeof", "in", "new", "function", "return",
    "var", "let",
];

/// Whether `name` can be bound as an expression parameter.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_' || first == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        && !RESERVED.contains(&name)
}

/// Parsed expressions keyed by source text.
///
/// Parse failures are cached too, so a broken attribute is only parsed once.
#[derive(Default)]
pub struct ExpressionCache {
    parsed: RefCell<HashMap<String, Result<Rc<Expr>, EvalError>>>,
}

impl ExpressionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(&self, source: &str) -> Result<Rc<Expr>, EvalError> {
        if let Some(cached) = self.parsed.borrow().get(source) {
            return cached.clone();
        }
        let parsed = parse(source).map(Rc::new);
        self.parsed
            .borrow_mut()
            .insert(source.to_string(), parsed.clone());
        parsed
    }

    /// Parse (or reuse) `source` and compile it against `params`.
    pub fn compile(&self, source: &str, params: &[String]) -> Result<CompiledExpression, EvalError> {
        let expr = self.parse(source)?;
        Ok(Compiler::new(params).compile(&expr))
    }

    pub fn len(&self) -> usize {
        self.parsed.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsed.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_filter() {
        assert!(is_valid_identifier("count"));
        assert!(is_valid_identifier("$el"));
        assert!(is_valid_identifier("_private1"));
        assert!(!is_valid_identifier("1abc"));
        assert!(!is_valid_identifier("user-name"));
        assert!(!is_valid_identifier("__proto__.x"));
        assert!(!is_valid_identifier("this"));
        assert!(!is_valid_identifier(""));
    }

    #[test]
    fn test_cache_reuses_parses_and_failures() {
        let cache = ExpressionCache::new();
        let first = cache.parse("a + 1").unwrap();
        let second = cache.parse("a + 1").unwrap();
        assert!(Rc::ptr_eq(&first, &second));

        assert!(cache.parse("a +").is_err());
        assert!(cache.parse("a +").is_err());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_error_classes() {
        assert!(EvalError::Reference("x".into()).is_expected());
        assert!(!EvalError::Range("x".into()).is_expected());
        let early = EvalError::Syntax {
            message: "Arg string terminates parameters early".into(),
            early: true,
        };
        assert!(early.is_early_termination());
        assert_eq!(
            early.to_string(),
            "SyntaxError: Arg string terminates parameters early"
        );
    }
}
