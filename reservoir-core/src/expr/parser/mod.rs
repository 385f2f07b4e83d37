//! Expression Parser
//!
//! Turns source text into an [`Expr`] tree.
//!
//! # How It Works
//!
//! 1. A nesting scan rejects text that would recurse deeper than
//!    [`MAX_DEPTH`] anywhere downstream.
//! 2. The lexer produces spanned tokens. Template literals are lexed as a
//!    whole, keeping each `${...}` hole as raw source that is parsed on its
//!    own.
//! 3. A Pratt parser builds the tree. Member access, indexing and calls are
//!    postfix operators; arrow functions are tried before everything else
//!    and backtrack when no `=>` follows the parameter list.
//! 4. A stray closing parenthesis after a complete expression is reported
//!    as an early-terminated argument list, mirroring what happens when the
//!    text is spliced into a `return (...)` wrapper.

mod lexer;

use chumsky::{input::ValueInput, pratt::*, prelude::*};

use self::lexer::{lexer, Chunk, Token};
use super::ir::{BinaryOp, Expr, Literal, LogicalOp, TemplatePart, UnaryOp};
use super::value::format_number;
use super::EvalError;

type Span = SimpleSpan;
type LexError<'src> = extra::Err<Rich<'src, char, Span>>;
type ParseError<'src> = extra::Err<Rich<'src, Token<'src>, Span>>;

/// Deepest nesting an expression may have.
///
/// Brackets, templates, `${` holes, operators and the `typeof`/`in` keywords
/// each add a level; a comma ends the element it closes.
pub const MAX_DEPTH: usize = 128;

fn syntax(message: impl Into<String>) -> EvalError {
    EvalError::Syntax {
        message: message.into(),
        early: false,
    }
}

/// Parse a complete expression.
pub fn parse(source: &str) -> Result<Expr, EvalError> {
    check_depth(source)?;
    parse_nested(source)
}

/// Parse text already covered by a depth check.
fn parse_nested(source: &str) -> Result<Expr, EvalError> {
    let tokens = lexer()
        .parse(source)
        .into_result()
        .map_err(first_error)?;
    if tokens.is_empty() {
        return Err(syntax("Unexpected token ')'"));
    }

    let eoi = Span::from(source.len()..source.len());
    let errors = match expression()
        .then_ignore(end())
        .parse(tokens.map(eoi, |(token, span)| (token, span)))
        .into_result()
    {
        Ok(expr) => return Ok(expr),
        Err(errors) => errors,
    };

    let closes_early = expression()
        .then_ignore(symbol(")"))
        .then_ignore(any().repeated())
        .parse(tokens.map(eoi, |(token, span)| (token, span)))
        .into_result()
        .is_ok();
    if closes_early {
        return Err(EvalError::Syntax {
            message: "Arg string terminates parameters early".to_string(),
            early: true,
        });
    }
    Err(first_error(errors))
}

fn first_error<E: std::fmt::Display>(errors: Vec<E>) -> EvalError {
    match errors.into_iter().next() {
        Some(error) => syntax(error.to_string()),
        None => syntax("Invalid or unexpected token"),
    }
}

/// Rejects source nested deeper than [`MAX_DEPTH`].
///
/// Works on raw characters so it can run before the lexer, which recurses
/// into template holes. Runs of `!`, `+` and `-` count once per character
/// since each may be a prefix operator; any other operator run counts once.
fn check_depth(source: &str) -> Result<(), EvalError> {
    // operator count per open code level; `None` is a template body
    let mut levels: Vec<Option<usize>> = vec![Some(0)];
    let mut depth = 0;
    let mut in_operator = false;
    let mut chars = source.char_indices().peekable();

    while let Some((start, character)) = chars.next() {
        let mut nests = false;
        let operator = matches!(levels.last(), Some(Some(_)))
            && "+-*/%<>=!&|?.:".contains(character);

        if levels.last() == Some(&None) {
            match character {
                '\\' => {
                    chars.next();
                }
                '`' => {
                    levels.pop();
                    depth -= 1;
                }
                '$' if chars.next_if(|&(_, next)| next == '{').is_some() => {
                    levels.push(Some(0));
                    depth += 1;
                }
                _ => {}
            }
        } else {
            match character {
                '(' | '[' | '{' => {
                    levels.push(Some(0));
                    depth += 1;
                }
                ')' | ']' | '}' if levels.len() > 1 => {
                    if let Some(Some(operators)) = levels.pop() {
                        depth -= 1 + operators;
                    }
                }
                '`' => {
                    levels.push(None);
                    depth += 1;
                }
                '\'' | '"' => {
                    while let Some((_, next)) = chars.next() {
                        match next {
                            '\\' => {
                                chars.next();
                            }
                            _ if next == character => break,
                            _ => {}
                        }
                    }
                }
                ',' => {
                    if let Some(Some(operators)) = levels.last_mut() {
                        depth -= *operators;
                        *operators = 0;
                    }
                }
                _ if operator => nests = !in_operator || "!+-".contains(character),
                _ if character.is_alphabetic() || character == '_' || character == '$' => {
                    let mut end = start + character.len_utf8();
                    while let Some((index, next)) = chars
                        .next_if(|&(_, next)| next.is_alphanumeric() || next == '_' || next == '$')
                    {
                        end = index + next.len_utf8();
                    }
                    nests = matches!(&source[start..end], "typeof" | "in");
                }
                _ => {}
            }
        }
        in_operator = operator;

        if nests {
            if let Some(Some(operators)) = levels.last_mut() {
                *operators += 1;
                depth += 1;
            }
        }
        if depth > MAX_DEPTH {
            return Err(syntax(format!(
                "Expression nested deeper than {MAX_DEPTH} levels"
            )));
        }
    }
    Ok(())
}

fn symbol<'src, I>(punct: &'static str) -> impl Parser<'src, I, Token<'src>, ParseError<'src>> + Clone
where
    I: ValueInput<'src, Token = Token<'src>, Span = Span>,
{
    just(Token::Punct(punct))
}

/// Postfix accessors applied to an operand.
enum Access {
    Member { property: String, optional: bool },
    Index(Expr),
    Call(Vec<Expr>),
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn logical(op: LogicalOp, left: Expr, right: Expr) -> Expr {
    Expr::Logical {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn expression<'src, I>() -> impl Parser<'src, I, Expr, ParseError<'src>> + Clone
where
    I: ValueInput<'src, Token = Token<'src>, Span = Span>,
{
    recursive(|expression| {
        let name = select! { Token::Ident(name) => name.to_string() };
        let items = expression
            .clone()
            .separated_by(symbol(","))
            .allow_trailing()
            .collect::<Vec<_>>();

        let literal = select! {
            Token::Number(number) => Expr::literal(Literal::Number(number)),
            Token::Str(string) => Expr::literal(Literal::String(string)),
        };

        let word = select! { Token::Ident(name) => name }
            .filter(|name: &&str| !matches!(*name, "typeof" | "in"))
            .map(|name| match name {
                "true" => Expr::literal(Literal::Bool(true)),
                "false" => Expr::literal(Literal::Bool(false)),
                "null" => Expr::literal(Literal::Null),
                "undefined" => Expr::literal(Literal::Undefined),
                "this" => Expr::This,
                _ => Expr::ident(name),
            });

        let template = select! { Token::Template(chunks) => chunks }.try_map(|chunks, span| {
            chunks
                .into_iter()
                .map(|chunk| match chunk {
                    Chunk::Text(text) => Ok(TemplatePart::Text(text)),
                    Chunk::Hole(source) => parse_nested(source)
                        .map(TemplatePart::Expr)
                        .map_err(|error| Rich::custom(span, error)),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(|parts| Expr::Template { parts })
        });

        let array = items
            .clone()
            .delimited_by(symbol("["), symbol("]"))
            .map(|items| Expr::Array { items });

        let key = select! {
            Token::Ident(name) => name.to_string(),
            Token::Str(key) => key,
            Token::Number(number) => format_number(number),
        };
        // `{ a }` is shorthand for `{ a: a }`
        let entry = key
            .then(symbol(":").ignore_then(expression.clone()).or_not())
            .map(|(key, value)| {
                let value = value.unwrap_or_else(|| Expr::ident(key.clone()));
                (key, value)
            });
        let object = entry
            .separated_by(symbol(","))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(symbol("{"), symbol("}"))
            .map(|entries| Expr::Object { entries });

        let nested = expression.clone().delimited_by(symbol("("), symbol(")"));

        let atom = choice((literal, word, template, nested, array, object));

        let access = choice((
            symbol(".")
                .ignore_then(name.clone())
                .map(|property| Access::Member { property, optional: false }),
            symbol("?.")
                .ignore_then(name.clone())
                .map(|property| Access::Member { property, optional: true }),
            expression
                .clone()
                .delimited_by(symbol("["), symbol("]"))
                .map(Access::Index),
            items
                .delimited_by(symbol("("), symbol(")"))
                .map(Access::Call),
        ));

        let operand = atom.pratt((
            infix(
                left(LogicalOp::Nullish.precedence().into()),
                symbol("??"),
                |l, _, r, _| logical(LogicalOp::Nullish, l, r),
            ),
            infix(
                left(LogicalOp::Or.precedence().into()),
                symbol("||"),
                |l, _, r, _| logical(LogicalOp::Or, l, r),
            ),
            infix(
                left(LogicalOp::And.precedence().into()),
                symbol("&&"),
                |l, _, r, _| logical(LogicalOp::And, l, r),
            ),
            infix(
                left(BinaryOp::Eq.precedence().into()),
                select! {
                    Token::Punct("==") => BinaryOp::Eq,
                    Token::Punct("!=") => BinaryOp::Ne,
                    Token::Punct("===") => BinaryOp::StrictEq,
                    Token::Punct("!==") => BinaryOp::StrictNe,
                },
                |l, op, r, _| binary(op, l, r),
            ),
            infix(
                left(BinaryOp::Lt.precedence().into()),
                select! {
                    Token::Punct("<") => BinaryOp::Lt,
                    Token::Punct("<=") => BinaryOp::Le,
                    Token::Punct(">") => BinaryOp::Gt,
                    Token::Punct(">=") => BinaryOp::Ge,
                    Token::Ident("in") => BinaryOp::In,
                },
                |l, op, r, _| binary(op, l, r),
            ),
            infix(
                left(BinaryOp::Add.precedence().into()),
                select! {
                    Token::Punct("+") => BinaryOp::Add,
                    Token::Punct("-") => BinaryOp::Sub,
                },
                |l, op, r, _| binary(op, l, r),
            ),
            infix(
                left(BinaryOp::Mul.precedence().into()),
                select! {
                    Token::Punct("*") => BinaryOp::Mul,
                    Token::Punct("/") => BinaryOp::Div,
                    Token::Punct("%") => BinaryOp::Mod,
                },
                |l, op, r, _| binary(op, l, r),
            ),
            prefix(
                8,
                select! {
                    Token::Punct("!") => UnaryOp::Not,
                    Token::Punct("-") => UnaryOp::Neg,
                    Token::Punct("+") => UnaryOp::Plus,
                    Token::Ident("typeof") => UnaryOp::TypeOf,
                },
                |op, operand, _| Expr::Unary {
                    op,
                    operand: Box::new(operand),
                },
            ),
            postfix(9, access, |object, access, _| match access {
                Access::Member { property, optional } => Expr::Member {
                    object: Box::new(object),
                    property,
                    optional,
                },
                Access::Index(index) => Expr::Index {
                    object: Box::new(object),
                    index: Box::new(index),
                },
                Access::Call(args) => Expr::Call {
                    callee: Box::new(object),
                    args,
                },
            }),
        ));

        let conditional = operand
            .then(
                symbol("?")
                    .ignore_then(expression.clone())
                    .then_ignore(symbol(":"))
                    .then(expression.clone())
                    .or_not(),
            )
            .map(|(test, branches)| match branches {
                Some((consequent, alternate)) => Expr::Conditional {
                    test: Box::new(test),
                    consequent: Box::new(consequent),
                    alternate: Box::new(alternate),
                },
                None => test,
            });

        let params = choice((
            name.clone().map(|param| vec![param]),
            name.separated_by(symbol(","))
                .collect::<Vec<_>>()
                .delimited_by(symbol("("), symbol(")")),
        ));
        let arrow = params
            .then_ignore(symbol("=>"))
            .then(expression)
            .map(|(params, body)| Expr::Arrow {
                params,
                body: Box::new(body),
            });

        choice((arrow, conditional))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> Box<Expr> {
        Box::new(Expr::ident(name))
    }

    #[test]
    fn test_precedence() {
        let expr = parse("a + b * 2").unwrap();
        match expr {
            Expr::Binary {
                op: BinaryOp::Add,
                right,
                ..
            } => assert!(matches!(*right, Expr::Binary { op: BinaryOp::Mul, .. })),
            other => panic!("unexpected tree {other:?}"),
        }
    }

    #[test]
    fn test_prefix_binds_looser_than_member_access() {
        let expr = parse("!user.admin").unwrap();
        let Expr::Unary { op: UnaryOp::Not, operand } = expr else {
            panic!("expected negation");
        };
        assert!(matches!(*operand, Expr::Member { .. }));

        let expr = parse("typeof x === 'string'").unwrap();
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::StrictEq, .. }));
    }

    #[test]
    fn test_member_chain_and_call() {
        let expr = parse("user.name.toUpperCase()").unwrap();
        let Expr::Call { callee, args } = expr else {
            panic!("expected call");
        };
        assert!(args.is_empty());
        assert_eq!(
            *callee,
            Expr::Member {
                object: Box::new(Expr::Member {
                    object: ident("user"),
                    property: "name".into(),
                    optional: false,
                }),
                property: "toUpperCase".into(),
                optional: false,
            }
        );
    }

    #[test]
    fn test_arrow_functions() {
        let single = parse("x => x * 2").unwrap();
        assert!(matches!(single, Expr::Arrow { ref params, .. } if params == &["x"]));

        let multi = parse("(a, b) => a + b").unwrap();
        assert!(matches!(multi, Expr::Arrow { ref params, .. } if params.len() == 2));

        let none = parse("() => 1").unwrap();
        assert!(matches!(none, Expr::Arrow { ref params, .. } if params.is_empty()));

        // parenthesised expression, not an arrow
        assert!(matches!(parse("(a)").unwrap(), Expr::Ident { .. }));
    }

    #[test]
    fn test_template_holes_are_parsed() {
        let expr = parse("`Hello ${user.name}!`").unwrap();
        let Expr::Template { parts } = expr else {
            panic!("expected template");
        };
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], TemplatePart::Text("Hello ".into()));
        assert!(matches!(parts[1], TemplatePart::Expr(Expr::Member { .. })));
        assert!(parse("`${a +}`").is_err());
    }

    #[test]
    fn test_object_literal_shorthand() {
        let expr = parse("{ a: 1, b, 'c d': true, }").unwrap();
        let Expr::Object { entries } = expr else {
            panic!("expected object");
        };
        let keys: Vec<_> = entries.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["a", "b", "c d"]);
        assert_eq!(entries[1].1, Expr::ident("b"));
    }

    #[test]
    fn test_conditional_with_optional_chaining() {
        let expr = parse("user?.admin ? 'yes' : 'no'").unwrap();
        assert!(matches!(expr, Expr::Conditional { .. }));
        assert!(matches!(parse("a?.5:1").unwrap(), Expr::Conditional { .. }));
    }

    #[test]
    fn test_unbalanced_paren_is_early_termination() {
        match parse("a) + (b") {
            Err(EvalError::Syntax { early: true, .. }) => {}
            other => panic!("expected early termination, got {other:?}"),
        }
        match parse("a +") {
            Err(EvalError::Syntax { early: false, .. }) => {}
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            parse(r#"'it\'s\nA'"#).unwrap(),
            Expr::literal(Literal::String("it's\nA".into()))
        );
    }

    #[test]
    fn test_deep_nesting_is_a_syntax_error() {
        let parens = format!("{}1{}", "(".repeat(3_000), ")".repeat(3_000));
        assert!(matches!(parse(&parens), Err(EvalError::Syntax { early: false, .. })));

        let negations = format!("{}x", "!".repeat(3_000));
        assert!(parse(&negations).is_err());

        let sum = vec!["1"; 3_000].join(" + ");
        assert!(parse(&sum).is_err());

        let templates = format!("{}x{}", "`${".repeat(1_000), "}`".repeat(1_000));
        assert!(parse(&templates).is_err());
    }

    #[test]
    fn test_commas_keep_long_lists_shallow() {
        let list = format!("[{}]", vec!["a.b + 1"; 500].join(", "));
        assert!(matches!(parse(&list).unwrap(), Expr::Array { ref items } if items.len() == 500));

        let nested = format!("{}1{}", "(".repeat(20), ")".repeat(20));
        assert_eq!(parse(&nested).unwrap(), Expr::literal(Literal::Number(1.0)));
    }

    #[test]
    fn test_strings_do_not_hide_brackets() {
        // each level opens a call whose first argument is a quoted `)`
        let source = format!("{}1{}", "f(')', ".repeat(200), ")".repeat(200));
        assert!(parse(&source).is_err());
    }
}
