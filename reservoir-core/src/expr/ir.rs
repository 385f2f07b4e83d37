//! Expression Syntax Tree
//!
//! The parser produces an [`Expr`] tree which [`Compiler`](super::Compiler)
//! lowers into closures. The tree serializes to JSON, which is handy when
//! inspecting why an attribute evaluates the way it does.

use serde::Serialize;

/// Literal values that can appear in source text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Literal {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    TypeOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    // Comparison
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    StrictEq,
    StrictNe,

    // Other
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

/// Piece of a template literal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplatePart {
    Text(String),
    Expr(Expr),
}

/// A parsed expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Expr {
    Literal { value: Literal },
    Template { parts: Vec<TemplatePart> },
    Array { items: Vec<Expr> },
    Object { entries: Vec<(String, Expr)> },
    Ident { name: String },
    This,
    /// `object.property` or `object?.property`
    Member {
        object: Box<Expr>,
        property: String,
        optional: bool,
    },
    /// `object[index]`
    Index { object: Box<Expr>, index: Box<Expr> },
    Call { callee: Box<Expr>, args: Vec<Expr> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    /// `(a, b) => body`
    Arrow { params: Vec<String>, body: Box<Expr> },
}

impl Expr {
    pub fn ident(name: impl Into<String>) -> Self {
        Expr::Ident { name: name.into() }
    }

    pub fn literal(value: Literal) -> Self {
        Expr::Literal { value }
    }

    /// Dump the tree as JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl BinaryOp {
    /// Binding power in the operator table; higher binds tighter.
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::StrictEq | BinaryOp::StrictNe => 4,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::In => 5,
            BinaryOp::Add | BinaryOp::Sub => 6,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 7,
        }
    }
}

impl LogicalOp {
    pub fn precedence(self) -> u8 {
        match self {
            LogicalOp::Nullish => 1,
            LogicalOp::Or => 2,
            LogicalOp::And => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_dumps_as_json() {
        let expr = Expr::Binary {
            op: BinaryOp::Add,
            left: Box::new(Expr::ident("count")),
            right: Box::new(Expr::literal(Literal::Number(1.0))),
        };
        let json = expr.to_json().unwrap();
        assert!(json.contains(r#""kind":"binary""#));
        assert!(json.contains(r#""op":"add""#));
        assert!(json.contains(r#""name":"count""#));
    }

    #[test]
    fn test_multiplication_binds_tighter() {
        assert!(BinaryOp::Mul.precedence() > BinaryOp::Add.precedence());
        assert!(BinaryOp::Add.precedence() > BinaryOp::Lt.precedence());
        assert!(LogicalOp::And.precedence() > LogicalOp::Or.precedence());
    }
}
