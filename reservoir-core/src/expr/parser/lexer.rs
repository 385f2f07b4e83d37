use std::fmt;

use chumsky::prelude::*;

use super::{LexError, Span};

const PUNCTUATORS: [&str; 28] = [
    "===", "!==", "=>", "==", "!=", "<=", ">=", "&&", "||", "??", "(", ")", "[", "]", "{", "}",
    ",", ".", "?", ":", "!", "+", "-", "*", "/", "%", "<", ">",
];

/// Piece of a template literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk<'src> {
    Text(String),
    /// Raw source of a `${...}` hole, parsed on its own.
    Hole(&'src str),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token<'src> {
    Number(f64),
    Str(String),
    Template(Vec<Chunk<'src>>),
    Ident(&'src str),
    Punct(&'static str),
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Number(number) => write!(f, "number {number}"),
            Self::Str(_) => f.write_str("string"),
            Self::Template(_) => f.write_str("template string"),
            Self::Ident(name) => write!(f, "identifier '{name}'"),
            Self::Punct(punct) => write!(f, "'{punct}'"),
        }
    }
}

pub fn lexer<'src>() -> impl Parser<'src, &'src str, Vec<(Token<'src>, Span)>, LexError<'src>> {
    let escape = just('\\').ignore_then(choice((
        just('u')
            .ignore_then(
                any()
                    .filter(char::is_ascii_hexdigit)
                    .repeated()
                    .exactly(4)
                    .to_slice()
                    .or_not(),
            )
            .try_map(|hex: Option<&str>, span| match hex {
                Some(hex) => Ok(u32::from_str_radix(hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .unwrap_or('\u{fffd}')),
                None => Err(Rich::custom(span, "Invalid Unicode escape sequence")),
            }),
        any().map(|character| match character {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            'b' => '\u{8}',
            'f' => '\u{c}',
            'v' => '\u{b}',
            other => other,
        }),
    )));

    let single_quoted = just('\'')
        .ignore_then(
            choice((escape.clone(), none_of("'\\\n")))
                .repeated()
                .collect::<String>(),
        )
        .then_ignore(just('\''));

    let double_quoted = just('"')
        .ignore_then(
            choice((escape.clone(), none_of("\"\\\n")))
                .repeated()
                .collect::<String>(),
        )
        .then_ignore(just('"'));

    // Holes are kept as raw source; the scan only has to find the matching
    // brace, stepping over strings and nested templates on the way.
    let template = recursive(|template| {
        let hole_source = recursive(|hole_source| {
            choice((
                single_quoted.clone().to_slice(),
                double_quoted.clone().to_slice(),
                template.clone().to_slice(),
                just('{').then(hole_source).then(just('}')).to_slice(),
                none_of("{}'\"`").to_slice(),
            ))
            .repeated()
            .to_slice()
        });

        let hole = just("${")
            .ignore_then(hole_source)
            .then_ignore(just('}'))
            .map(Chunk::Hole);

        let text = choice((
            escape.clone(),
            any()
                .and_is(just("${").not())
                .filter(|character: &char| *character != '`' && *character != '\\'),
        ))
        .repeated()
        .at_least(1)
        .collect::<String>()
        .map(Chunk::Text);

        just('`')
            .ignore_then(choice((hole, text)).repeated().collect::<Vec<_>>())
            .then_ignore(just('`'))
            .map(Token::Template)
    });

    let digits = text::digits(10);
    let mantissa = choice((
        digits
            .clone()
            .then(just('.').then(digits.clone().or_not()).or_not())
            .to_slice(),
        just('.').then(digits.clone()).to_slice(),
    ));
    let exponent = one_of("eE").then(one_of("+-").or_not()).then(digits);
    let number = mantissa
        .then(exponent.or_not())
        .to_slice()
        .try_map(|number: &str, span| {
            number
                .parse()
                .map(Token::Number)
                .map_err(|_| Rich::custom(span, format!("Invalid number '{number}'")))
        });

    let identifier = any()
        .filter(|character: &char| character.is_alphabetic() || *character == '_' || *character == '$')
        .then(
            any()
                .filter(|character: &char| {
                    character.is_alphanumeric() || *character == '_' || *character == '$'
                })
                .repeated(),
        )
        .to_slice()
        .map(Token::Ident);

    // `a?.5:1` is a conditional, not optional chaining
    let optional_chain = just("?.")
        .then_ignore(any().filter(char::is_ascii_digit).not())
        .to(Token::Punct("?."));

    let punctuator = choice(PUNCTUATORS.map(|punct| just(punct).to(Token::Punct(punct))));

    let token = choice((
        number,
        single_quoted.map(Token::Str),
        double_quoted.map(Token::Str),
        template,
        identifier,
        optional_chain,
        punctuator,
    ));

    token
        .map_with(|token, extra| (token, extra.span()))
        .padded()
        .repeated()
        .collect()
        .padded()
        .then_ignore(end())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token<'_>> {
        lexer()
            .parse(source)
            .into_result()
            .unwrap()
            .into_iter()
            .map(|(token, _)| token)
            .collect()
    }

    #[test]
    fn test_longest_punctuator_wins() {
        assert_eq!(
            tokens("a !== b"),
            vec![Token::Ident("a"), Token::Punct("!=="), Token::Ident("b")]
        );
        assert_eq!(
            tokens("x?.5:1"),
            vec![
                Token::Ident("x"),
                Token::Punct("?"),
                Token::Number(0.5),
                Token::Punct(":"),
                Token::Number(1.0),
            ]
        );
    }

    #[test]
    fn test_template_holes_stay_raw() {
        assert_eq!(
            tokens("`a ${ {b: '}'}.b } c`"),
            vec![Token::Template(vec![
                Chunk::Text("a ".into()),
                Chunk::Hole(" {b: '}'}.b "),
                Chunk::Text(" c".into()),
            ])]
        );
    }

    #[test]
    fn test_unterminated_string_is_an_error() {
        assert!(lexer().parse("'abc").into_result().is_err());
        assert!(lexer().parse("`abc").into_result().is_err());
    }
}
