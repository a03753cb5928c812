use super::lexer::{Spanned, Token};
use super::{BinaryOp, EquationError, Expr, Function};

/// Recursive-descent parser over the closed equation grammar:
///
/// ```text
/// expr    := term (('+' | '-') term)*
/// term    := unary (('*' | '/') unary)*
/// unary   := ('-' | '+') unary | primary
/// primary := NUMBER | 'Pi' | SYMBOL | FUNCTION '(' expr ')' | '(' expr ')'
/// ```
pub(crate) struct Parser<'a> {
    image_type: &'a str,
    tokens: &'a [Spanned],
    cursor: usize,
    parameters: &'a [&'a str],
    maps: &'a [&'a str],
    dependencies: Vec<String>,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(
        image_type: &'a str,
        tokens: &'a [Spanned],
        parameters: &'a [&'a str],
        maps: &'a [&'a str],
    ) -> Self {
        Self {
            image_type,
            tokens,
            cursor: 0,
            parameters,
            maps,
            dependencies: Vec::new(),
        }
    }

    /// Parse the whole token stream, returning the tree and the map symbols in
    /// first-seen order
    pub(crate) fn parse(mut self) -> Result<(Expr, Vec<String>), EquationError> {
        let expr = self.expression()?;
        if let Some(extra) = self.tokens.get(self.cursor) {
            return Err(self.unexpected(extra));
        }
        Ok((expr, self.dependencies))
    }

    fn peek(&self) -> Option<&'a Spanned> {
        self.tokens.get(self.cursor)
    }

    fn advance(&mut self) -> Option<&'a Spanned> {
        let token = self.tokens.get(self.cursor);
        if token.is_some() {
            self.cursor += 1;
        }
        token
    }

    fn expression(&mut self) -> Result<Expr, EquationError> {
        let mut lhs = self.term()?;
        while let Some(op) = self.peek().and_then(|s| match s.token {
            Token::Plus => Some(BinaryOp::Add),
            Token::Minus => Some(BinaryOp::Sub),
            _ => None,
        }) {
            self.advance();
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, EquationError> {
        let mut lhs = self.unary()?;
        while let Some(op) = self.peek().and_then(|s| match s.token {
            Token::Star => Some(BinaryOp::Mul),
            Token::Slash => Some(BinaryOp::Div),
            _ => None,
        }) {
            self.advance();
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, EquationError> {
        match self.peek().map(|s| &s.token) {
            Some(Token::Minus) => {
                self.advance();
                Ok(Expr::Neg(Box::new(self.unary()?)))
            }
            Some(Token::Plus) => {
                self.advance();
                self.unary()
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, EquationError> {
        let Some(spanned) = self.advance() else {
            return Err(EquationError::UnexpectedEnd {
                image_type: self.image_type.to_string(),
            });
        };

        match &spanned.token {
            Token::Number(value) => Ok(Expr::Literal(*value)),
            Token::LParen => {
                let inner = self.expression()?;
                self.expect_closing()?;
                Ok(inner)
            }
            Token::Ident(name) => self.identifier(name),
            _ => Err(self.unexpected(spanned)),
        }
    }

    fn identifier(&mut self, name: &str) -> Result<Expr, EquationError> {
        let is_call = matches!(self.peek().map(|s| &s.token), Some(Token::LParen));
        if is_call {
            if let Some(function) = Function::from_name(name) {
                self.advance();
                let argument = self.expression()?;
                self.expect_closing()?;
                return Ok(Expr::Call(function, Box::new(argument)));
            }
        }

        if self.parameters.contains(&name) {
            return Ok(Expr::Parameter(name.to_string()));
        }
        if self.maps.contains(&name) {
            if !self.dependencies.iter().any(|known| known == name) {
                self.dependencies.push(name.to_string());
            }
            return Ok(Expr::Map(name.to_string()));
        }
        if name == "Pi" {
            return Ok(Expr::Literal(std::f64::consts::PI));
        }

        Err(EquationError::UnknownSymbol {
            image_type: self.image_type.to_string(),
            symbol: name.to_string(),
        })
    }

    fn expect_closing(&mut self) -> Result<(), EquationError> {
        match self.advance() {
            Some(Spanned {
                token: Token::RParen,
                ..
            }) => Ok(()),
            Some(other) => Err(self.unexpected(other)),
            None => Err(EquationError::UnexpectedEnd {
                image_type: self.image_type.to_string(),
            }),
        }
    }

    fn unexpected(&self, spanned: &Spanned) -> EquationError {
        EquationError::UnexpectedToken {
            image_type: self.image_type.to_string(),
            found: spanned.token.to_string(),
            position: spanned.position,
        }
    }
}
