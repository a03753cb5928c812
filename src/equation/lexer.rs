use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(value) => write!(f, "{value}"),
            Token::Ident(name) => write!(f, "{name}"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
        }
    }
}

/// A token and the byte offset it starts at
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub(crate) enum LexError {
    #[error("unexpected character '{found}' at {position}")]
    UnexpectedCharacter { found: char, position: usize },

    #[error("invalid number `{text}` at {position}")]
    InvalidNumber { text: String, position: usize },
}

/// Split an equation into tokens.
///
/// Identifiers are maximal `[A-Za-z_][A-Za-z0-9_]*` runs, so `T10` is never
/// read as `T1` followed by `0`.
pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned>, LexError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(position, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let token = match c {
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '(' => Token::LParen,
            ')' => Token::RParen,
            c if c.is_ascii_digit() || c == '.' => {
                let end = number_end(source, position);
                let text = &source[position..end];
                let value = text.parse::<f64>().map_err(|_| LexError::InvalidNumber {
                    text: text.to_string(),
                    position,
                })?;
                while chars.peek().is_some_and(|&(i, _)| i < end) {
                    chars.next();
                }
                tokens.push(Spanned {
                    token: Token::Number(value),
                    position,
                });
                continue;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Spanned {
                    token: Token::Ident(name),
                    position,
                });
                continue;
            }
            found => return Err(LexError::UnexpectedCharacter { found, position }),
        };

        chars.next();
        tokens.push(Spanned { token, position });
    }

    Ok(tokens)
}

// digits, an optional fraction and an optional exponent (`1.5e-3`)
fn number_end(source: &str, start: usize) -> usize {
    let bytes = source.as_bytes();
    let mut end = start;
    while end < bytes.len() && (bytes[end].is_ascii_digit() || bytes[end] == b'.') {
        end += 1;
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && (bytes[exp_end] == b'+' || bytes[exp_end] == b'-') {
            exp_end += 1;
        }
        let digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > digits_start {
            end = exp_end;
        }
    }
    end
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|spanned| spanned.token)
            .collect()
    }

    #[test]
    fn errors_name_the_offending_position() {
        let err = tokenize("TE $ 2").unwrap_err();
        assert_eq!(err, LexError::UnexpectedCharacter { found: '$', position: 3 });
        assert_eq!(err.to_string(), "unexpected character '$' at 3");
    }

    #[test]
    fn splits_operators_and_identifiers() {
        assert_eq!(
            kinds("offset + scale*exp(-TE/T2)"),
            vec![
                Token::Ident("offset".into()),
                Token::Plus,
                Token::Ident("scale".into()),
                Token::Star,
                Token::Ident("exp".into()),
                Token::LParen,
                Token::Minus,
                Token::Ident("TE".into()),
                Token::Slash,
                Token::Ident("T2".into()),
                Token::RParen,
            ]
        );
    }

    #[test]
    fn identifiers_are_maximal() {
        assert_eq!(kinds("T10"), vec![Token::Ident("T10".into())]);
        assert_eq!(kinds("T1_SAT"), vec![Token::Ident("T1_SAT".into())]);
    }

    #[test]
    fn reads_decimal_and_exponent_literals() {
        assert_eq!(
            kinds("2.5 .5 1e-3 4E2"),
            vec![
                Token::Number(2.5),
                Token::Number(0.5),
                Token::Number(0.001),
                Token::Number(400.0),
            ]
        );
    }

    #[test]
    fn exponent_without_digits_is_not_consumed() {
        // `2e` is the literal 2 followed by the identifier `e`
        assert_eq!(
            kinds("2e"),
            vec![Token::Number(2.0), Token::Ident("e".into())]
        );
    }

    #[test]
    fn rejects_unknown_characters() {
        assert_eq!(
            tokenize("TE ^ 2"),
            Err(LexError::UnexpectedCharacter {
                found: '^',
                position: 3
            })
        );
    }

    #[test]
    fn rejects_malformed_numbers() {
        assert!(matches!(
            tokenize("1.2.3"),
            Err(LexError::InvalidNumber { .. })
        ));
    }
}
