//! Recursive-descent parser producing [`Expr`] trees.
//!
//! Precedence, loosest first: `implies` (right-associative), `or`, `and`,
//! `not`, comparisons (non-associative), postfix navigation / calls.
//! Property names are resolved against the store while parsing, so a rule that
//! mentions an unknown property never compiles.

use crate::graph::Literal;
use crate::graph::store::GraphStore;
use crate::symbol::NodeId;

use super::ParseError;
use super::lexer::{Position, Token, TokenKind, tokenize};

/// Collection operations callable with `.name()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionOp {
    Size,
    IsEmpty,
    NotEmpty,
}

impl CollectionOp {
    pub fn name(self) -> &'static str {
        match self {
            CollectionOp::Size => "size",
            CollectionOp::IsEmpty => "isEmpty",
            CollectionOp::NotEmpty => "notEmpty",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Implies,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Implies => "implies",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        }
    }

    pub fn is_comparison(self) -> bool {
        !matches!(self, BinaryOp::And | BinaryOp::Or | BinaryOp::Implies)
    }

    /// The comparison that holds exactly when `self` does not.
    pub fn negated(self) -> BinaryOp {
        match self {
            BinaryOp::Eq => BinaryOp::Ne,
            BinaryOp::Ne => BinaryOp::Eq,
            BinaryOp::Lt => BinaryOp::Ge,
            BinaryOp::Le => BinaryOp::Gt,
            BinaryOp::Gt => BinaryOp::Le,
            BinaryOp::Ge => BinaryOp::Lt,
            other => other,
        }
    }

    /// The comparison with its operands swapped (`a < b` ⇔ `b > a`).
    pub fn flipped(self) -> BinaryOp {
        match self {
            BinaryOp::Lt => BinaryOp::Gt,
            BinaryOp::Le => BinaryOp::Ge,
            BinaryOp::Gt => BinaryOp::Lt,
            BinaryOp::Ge => BinaryOp::Le,
            other => other,
        }
    }
}

/// Static result type of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprType {
    Boolean,
    Integer,
    String,
    /// Result of navigation: zero or more nodes or literals.
    Collection,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    SelfRef,
    Literal(Literal),
    Navigate {
        source: Box<Expr>,
        property: NodeId,
        name: String,
    },
    Call {
        target: Box<Expr>,
        op: CollectionOp,
    },
    Not(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    pub fn static_type(&self) -> ExprType {
        match self {
            Expr::SelfRef | Expr::Navigate { .. } => ExprType::Collection,
            Expr::Literal(Literal::Boolean(_)) => ExprType::Boolean,
            Expr::Literal(Literal::Integer(_)) => ExprType::Integer,
            Expr::Literal(Literal::String(_)) => ExprType::String,
            Expr::Call {
                op: CollectionOp::Size,
                ..
            } => ExprType::Integer,
            Expr::Call { .. } | Expr::Not(_) | Expr::Binary { .. } => ExprType::Boolean,
        }
    }
}

/// Parse `source` into an expression tree.
pub fn parse(store: &GraphStore, source: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        store,
        tokens,
        cursor: 0,
        depth: 0,
    };
    let expr = parser.implies()?;
    let trailing = parser.peek();
    if trailing.kind != TokenKind::Eof {
        return Err(parser.error_at(format!("unexpected {}", trailing.kind), trailing.pos));
    }
    Ok(expr)
}

/// Deepest nesting of parentheses, `not` and `implies` chains accepted.
const MAX_DEPTH: usize = 128;

struct Parser<'a> {
    store: &'a GraphStore,
    tokens: Vec<Token>,
    cursor: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Token {
        self.tokens[self.cursor.min(self.tokens.len() - 1)].clone()
    }

    fn advance(&mut self) -> Token {
        let token = self.peek();
        if token.kind != TokenKind::Eof {
            self.cursor += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if &self.peek().kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        let token = self.peek();
        if token.kind == kind {
            Ok(self.advance())
        } else {
            Err(self.error_at(format!("expected {kind}, found {}", token.kind), token.pos))
        }
    }

    fn error_at(&self, message: impl Into<String>, pos: Position) -> ParseError {
        ParseError::at(message, pos.line, pos.column)
    }

    /// Run a recursive rule one level deeper, failing at the current token
    /// once the nesting limit is exceeded.
    fn nested<T>(
        &mut self,
        rule: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        if self.depth >= MAX_DEPTH {
            let token = self.peek();
            return Err(self.error_at("expression nests too deeply", token.pos));
        }
        self.depth += 1;
        let result = rule(self);
        self.depth -= 1;
        result
    }

    fn implies(&mut self) -> Result<Expr, ParseError> {
        self.nested(Self::implies_chain)
    }

    fn implies_chain(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.or()?;
        if self.peek().kind == TokenKind::Implies {
            let op_token = self.advance();
            let rhs = self.implies()?;
            return self.logical(BinaryOp::Implies, lhs, rhs, op_token.pos);
        }
        Ok(lhs)
    }

    fn or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.and()?;
        while self.peek().kind == TokenKind::Or {
            let op_token = self.advance();
            let rhs = self.and()?;
            lhs = self.logical(BinaryOp::Or, lhs, rhs, op_token.pos)?;
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.not()?;
        while self.peek().kind == TokenKind::And {
            let op_token = self.advance();
            let rhs = self.not()?;
            lhs = self.logical(BinaryOp::And, lhs, rhs, op_token.pos)?;
        }
        Ok(lhs)
    }

    fn not(&mut self) -> Result<Expr, ParseError> {
        if self.peek().kind == TokenKind::Not {
            let token = self.advance();
            let operand = self.nested(Self::not)?;
            self.require_logical(&operand, token.pos)?;
            return Ok(Expr::Not(Box::new(operand)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.postfix()?;
        let op = match self.peek().kind {
            TokenKind::Eq => BinaryOp::Eq,
            TokenKind::Ne => BinaryOp::Ne,
            TokenKind::Lt => BinaryOp::Lt,
            TokenKind::Le => BinaryOp::Le,
            TokenKind::Gt => BinaryOp::Gt,
            TokenKind::Ge => BinaryOp::Ge,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.postfix()?;
        Ok(Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn logical(
        &self,
        op: BinaryOp,
        lhs: Expr,
        rhs: Expr,
        pos: Position,
    ) -> Result<Expr, ParseError> {
        self.require_logical(&lhs, pos)?;
        self.require_logical(&rhs, pos)?;
        Ok(Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    /// Integers and strings can never be used as truth values.
    fn require_logical(&self, operand: &Expr, pos: Position) -> Result<(), ParseError> {
        match operand.static_type() {
            ExprType::Boolean | ExprType::Collection => Ok(()),
            other => Err(self.error_at(format!("expected a boolean operand, found {other:?}"), pos)),
        }
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary()?;
        while self.eat(&TokenKind::Dot) {
            let token = self.advance();
            let TokenKind::Ident(name) = token.kind else {
                return Err(self.error_at(
                    format!("expected a property or operation name, found {}", token.kind),
                    token.pos,
                ));
            };
            if self.eat(&TokenKind::LParen) {
                self.expect(TokenKind::RParen)?;
                let op = match name.as_str() {
                    "size" => CollectionOp::Size,
                    "isEmpty" => CollectionOp::IsEmpty,
                    "notEmpty" => CollectionOp::NotEmpty,
                    _ => {
                        return Err(self.error_at(format!("unknown operation '{name}()'"), token.pos));
                    }
                };
                if expr.static_type() != ExprType::Collection {
                    return Err(self.error_at(
                        format!("'{name}()' needs a collection, found {:?}", expr.static_type()),
                        token.pos,
                    ));
                }
                expr = Expr::Call {
                    target: Box::new(expr),
                    op,
                };
            } else {
                expr = self.navigate(expr, name, token.pos)?;
            }
        }
        Ok(expr)
    }

    fn navigate(&self, source: Expr, name: String, pos: Position) -> Result<Expr, ParseError> {
        if source.static_type() != ExprType::Collection {
            return Err(self.error_at(
                format!("cannot navigate '{name}' from a {:?} value", source.static_type()),
                pos,
            ));
        }
        let property = self
            .store
            .find_property(&name)
            .ok_or_else(|| self.error_at(format!("unknown property '{name}'"), pos))?;
        Ok(Expr::Navigate {
            source: Box::new(source),
            property,
            name,
        })
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.advance();
        match token.kind {
            TokenKind::SelfKw => Ok(Expr::SelfRef),
            TokenKind::True => Ok(Expr::Literal(Literal::Boolean(true))),
            TokenKind::False => Ok(Expr::Literal(Literal::Boolean(false))),
            TokenKind::Integer(i) => Ok(Expr::Literal(Literal::Integer(i))),
            TokenKind::Str(s) => Ok(Expr::Literal(Literal::String(s))),
            // Bare identifiers navigate from `self`.
            TokenKind::Ident(name) => self.navigate(Expr::SelfRef, name, token.pos),
            TokenKind::LParen => {
                let inner = self.implies()?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            other => Err(self.error_at(format!("unexpected {other}"), token.pos)),
        }
    }
}
