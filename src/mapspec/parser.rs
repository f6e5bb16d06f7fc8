//! Mapspec Grammar Parser
//!
//! Hand-rolled scanner for the axis-pattern grammar:
//!
//! ```text
//! MapSpec  := Inputs "->" Outputs
//! Inputs   := Array ("," Array)*
//! Outputs  := Array ("," Array)*
//! Array    := Ident "[" Axis ("," Axis)* "]"
//! Axis     := Ident | ":"
//! Ident    := [A-Za-z_][A-Za-z0-9_]*
//! ```
//!
//! Whitespace is insignificant everywhere.

use super::{ArraySpec, Axis, MapSpec, MapSpecError, MapSpecResult};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    LBracket,
    RBracket,
    Comma,
    Colon,
    Arrow,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Ident(name) => format!("identifier `{name}`"),
            Token::LBracket => "`[`".to_string(),
            Token::RBracket => "`]`".to_string(),
            Token::Comma => "`,`".to_string(),
            Token::Colon => "`:`".to_string(),
            Token::Arrow => "`->`".to_string(),
        }
    }
}

fn tokenize(source: &str) -> MapSpecResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '[' => tokens.push(Token::LBracket),
            ']' => tokens.push(Token::RBracket),
            ',' => tokens.push(Token::Comma),
            ':' => tokens.push(Token::Colon),
            '-' => match chars.next() {
                Some((_, '>')) => tokens.push(Token::Arrow),
                _ => return Err(parse_error(source, pos, "expected `>` after `-`")),
            },
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                ident.push(c);
                while let Some(&(_, next)) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        ident.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => {
                return Err(parse_error(
                    source,
                    pos,
                    &format!("unexpected character `{other}`"),
                ));
            }
        }
    }

    Ok(tokens)
}

fn parse_error(source: &str, pos: usize, message: &str) -> MapSpecError {
    MapSpecError::Parse {
        spec: source.to_string(),
        pos,
        message: message.to_string(),
    }
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    cursor: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, message: &str) -> MapSpecError {
        MapSpecError::Parse {
            spec: self.source.to_string(),
            pos: self.cursor,
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.cursor).cloned();
        if token.is_some() {
            self.cursor += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token) -> MapSpecResult<()> {
        match self.next() {
            Some(token) if token == *expected => Ok(()),
            Some(token) => Err(self.error(&format!(
                "expected {}, found {}",
                expected.describe(),
                token.describe()
            ))),
            None => Err(self.error(&format!("expected {}, found end of spec", expected.describe()))),
        }
    }

    fn ident(&mut self) -> MapSpecResult<String> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(name),
            Some(token) => Err(self.error(&format!("expected identifier, found {}", token.describe()))),
            None => Err(self.error("expected identifier, found end of spec")),
        }
    }

    fn axis(&mut self) -> MapSpecResult<Axis> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(Axis::Named(name)),
            Some(Token::Colon) => Ok(Axis::Reduced),
            Some(token) => Err(self.error(&format!("expected axis, found {}", token.describe()))),
            None => Err(self.error("expected axis, found end of spec")),
        }
    }

    fn array(&mut self) -> MapSpecResult<ArraySpec> {
        let name = self.ident()?;
        self.expect(&Token::LBracket)?;
        let mut axes = vec![self.axis()?];
        while self.peek() == Some(&Token::Comma) {
            self.next();
            axes.push(self.axis()?);
        }
        self.expect(&Token::RBracket)?;
        Ok(ArraySpec { name, axes })
    }

    fn array_list(&mut self) -> MapSpecResult<Vec<ArraySpec>> {
        let mut arrays = vec![self.array()?];
        while self.peek() == Some(&Token::Comma) {
            self.next();
            arrays.push(self.array()?);
        }
        Ok(arrays)
    }
}

/// Parse a mapspec string into a validated [`MapSpec`].
pub fn parse_mapspec(source: &str) -> MapSpecResult<MapSpec> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        source,
        tokens,
        cursor: 0,
    };

    let inputs = parser.array_list()?;
    parser.expect(&Token::Arrow)?;
    let outputs = parser.array_list()?;
    if let Some(trailing) = parser.peek() {
        let message = format!("unexpected trailing {}", trailing.describe());
        return Err(parser.error(&message));
    }

    MapSpec::new(inputs, outputs)
}
