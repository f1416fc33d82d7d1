//! Tokenizer for rule bodies, with 1-based line/column tracking.

use super::ParseError;

/// Source position of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Ident(String),
    Integer(i64),
    Str(String),
    True,
    False,
    SelfKw,
    And,
    Or,
    Not,
    Implies,
    Dot,
    LParen,
    RParen,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Eof,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::Ident(name) => write!(f, "identifier '{name}'"),
            TokenKind::Integer(i) => write!(f, "integer {i}"),
            TokenKind::Str(s) => write!(f, "string '{s}'"),
            TokenKind::True => write!(f, "'true'"),
            TokenKind::False => write!(f, "'false'"),
            TokenKind::SelfKw => write!(f, "'self'"),
            TokenKind::And => write!(f, "'and'"),
            TokenKind::Or => write!(f, "'or'"),
            TokenKind::Not => write!(f, "'not'"),
            TokenKind::Implies => write!(f, "'implies'"),
            TokenKind::Dot => write!(f, "'.'"),
            TokenKind::LParen => write!(f, "'('"),
            TokenKind::RParen => write!(f, "')'"),
            TokenKind::Eq => write!(f, "'='"),
            TokenKind::Ne => write!(f, "'<>'"),
            TokenKind::Lt => write!(f, "'<'"),
            TokenKind::Le => write!(f, "'<='"),
            TokenKind::Gt => write!(f, "'>'"),
            TokenKind::Ge => write!(f, "'>='"),
            TokenKind::Eof => write!(f, "end of input"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: Position,
}

/// Split `source` into tokens, ending with [`TokenKind::Eof`].
pub fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    let mut line = 1;
    let mut column = 1;

    while let Some(&c) = chars.peek() {
        let pos = Position { line, column };
        if c == '\n' {
            chars.next();
            line += 1;
            column = 1;
            continue;
        }
        if c.is_whitespace() {
            chars.next();
            column += 1;
            continue;
        }

        let kind = if c.is_ascii_alphabetic() || c == '_' {
            let mut word = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    word.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            column += word.chars().count();
            keyword(word)
        } else if c.is_ascii_digit() {
            let mut digits = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_ascii_digit() {
                    digits.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            column += digits.len();
            let value = digits.parse::<i64>().map_err(|_| {
                ParseError::at(format!("integer literal {digits} is too large"), pos.line, pos.column)
            })?;
            TokenKind::Integer(value)
        } else if c == '\'' {
            chars.next();
            column += 1;
            let mut text = String::new();
            loop {
                match chars.next() {
                    Some('\'') => {
                        column += 1;
                        break;
                    }
                    Some('\n') | None => {
                        return Err(ParseError::at(
                            "unterminated string literal",
                            pos.line,
                            pos.column,
                        ));
                    }
                    Some(c) => {
                        column += 1;
                        text.push(c);
                    }
                }
            }
            TokenKind::Str(text)
        } else {
            chars.next();
            column += 1;
            match c {
                '.' => TokenKind::Dot,
                '(' => TokenKind::LParen,
                ')' => TokenKind::RParen,
                '=' => TokenKind::Eq,
                '<' => match chars.peek() {
                    Some('=') => {
                        chars.next();
                        column += 1;
                        TokenKind::Le
                    }
                    Some('>') => {
                        chars.next();
                        column += 1;
                        TokenKind::Ne
                    }
                    _ => TokenKind::Lt,
                },
                '>' => match chars.peek() {
                    Some('=') => {
                        chars.next();
                        column += 1;
                        TokenKind::Ge
                    }
                    _ => TokenKind::Gt,
                },
                other => {
                    return Err(ParseError::at(
                        format!("unexpected character '{other}'"),
                        pos.line,
                        pos.column,
                    ));
                }
            }
        };
        tokens.push(Token { kind, pos });
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        pos: Position { line, column },
    });
    Ok(tokens)
}

fn keyword(word: String) -> TokenKind {
    match word.as_str() {
        "self" => TokenKind::SelfKw,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        "implies" => TokenKind::Implies,
        _ => TokenKind::Ident(word),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn navigation_and_comparison() {
        assert_eq!(
            kinds("self.requirements.size() > 1"),
            vec![
                TokenKind::SelfKw,
                TokenKind::Dot,
                TokenKind::Ident("requirements".into()),
                TokenKind::Dot,
                TokenKind::Ident("size".into()),
                TokenKind::LParen,
                TokenKind::RParen,
                TokenKind::Gt,
                TokenKind::Integer(1),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn two_character_operators() {
        assert_eq!(
            kinds("<= >= <> < >"),
            vec![
                TokenKind::Le,
                TokenKind::Ge,
                TokenKind::Ne,
                TokenKind::Lt,
                TokenKind::Gt,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn keywords_and_strings() {
        assert_eq!(
            kinds("not true and 'open' or false implies x"),
            vec![
                TokenKind::Not,
                TokenKind::True,
                TokenKind::And,
                TokenKind::Str("open".into()),
                TokenKind::Or,
                TokenKind::False,
                TokenKind::Implies,
                TokenKind::Ident("x".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn positions_are_one_based() {
        let tokens = tokenize("self\n  .state").unwrap();
        assert_eq!(tokens[0].pos, Position { line: 1, column: 1 });
        assert_eq!(tokens[1].pos, Position { line: 2, column: 3 });
        assert_eq!(tokens[2].pos, Position { line: 2, column: 4 });
    }

    #[test]
    fn errors_carry_position() {
        let err = tokenize("self.a # 1").unwrap_err();
        assert_eq!(err.line, Some(1));
        assert_eq!(err.column, Some(8));

        let err = tokenize("self.a = 'open").unwrap_err();
        assert!(err.message.contains("unterminated"));
        assert_eq!(err.column, Some(10));
    }
}
