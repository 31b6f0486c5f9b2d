//! FHIRPath parser: token stream to AST.
//!
//! Recursive descent following the grammar precedence, lowest first:
//! implies, or/xor, and, membership (in/contains), equality (= != ~ !~),
//! inequality (< <= > >=), union (|), type (is/as), additive (+ - &),
//! multiplicative (* / div mod), unary +/-, postfix (`.` invocation and
//! `[index]`), term.

use std::str::FromStr;

use rust_decimal::Decimal;

use crate::ast::*;
use crate::error::{Error, Result};
use crate::lexer::Lexer;
use crate::temporal;
use crate::token::{Token, TokenType};

/// Parser for FHIRPath expressions.
pub struct Parser {
    lexer: Lexer,
    current: Token,
    depth: usize,
}

const MAX_RECURSION_DEPTH: usize = 200;

/// Calendar duration keywords usable as quantity units without quotes.
const CALENDAR_UNITS: &[&str] = &[
    "year", "years", "month", "months", "week", "weeks", "day", "days", "hour", "hours",
    "minute", "minutes", "second", "seconds", "millisecond", "milliseconds",
];

impl Parser {
    pub fn new(input: &str) -> Result<Self> {
        let mut lexer = Lexer::new(input);
        let current = lexer.next_token()?;
        Ok(Self {
            lexer,
            current,
            depth: 0,
        })
    }

    /// Parse the whole input as a single expression.
    pub fn parse(mut self) -> Result<AstNode> {
        let expr = self.parse_expression()?;
        if self.current.token_type != TokenType::Eof {
            return Err(Error::ParseError(format!(
                "unexpected token {:?} at line {}, column {}",
                self.current.token_type, self.current.line, self.current.column
            )));
        }
        Ok(expr)
    }

    fn advance(&mut self) -> Result<Token> {
        let next = self.lexer.next_token()?;
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn at(&self, tt: TokenType) -> bool {
        self.current.token_type == tt
    }

    fn at_one_of(&self, types: &[TokenType]) -> bool {
        types.contains(&self.current.token_type)
    }

    fn expect(&mut self, tt: TokenType) -> Result<Token> {
        if self.at(tt.clone()) {
            self.advance()
        } else {
            Err(Error::ParseError(format!(
                "expected {:?}, got {:?} at line {}, column {}",
                tt, self.current.token_type, self.current.line, self.current.column
            )))
        }
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_RECURSION_DEPTH {
            return Err(Error::ParseError(format!(
                "expression too deeply nested (max depth: {MAX_RECURSION_DEPTH})"
            )));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn parse_expression(&mut self) -> Result<AstNode> {
        self.enter()?;
        let expr = self.parse_implies();
        self.leave();
        expr
    }

    fn parse_implies(&mut self) -> Result<AstNode> {
        let mut left = self.parse_or()?;
        while self.at(TokenType::Implies) {
            self.advance()?;
            let right = self.parse_or()?;
            left = AstNode::BinaryOp {
                op: BinaryOperator::Implies,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<AstNode> {
        let mut left = self.parse_and()?;
        while self.at_one_of(&[TokenType::Or, TokenType::Xor]) {
            let op = if self.at(TokenType::Or) {
                BinaryOperator::Or
            } else {
                BinaryOperator::Xor
            };
            self.advance()?;
            let right = self.parse_and()?;
            left = AstNode::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<AstNode> {
        let mut left = self.parse_membership()?;
        while self.at(TokenType::And) {
            self.advance()?;
            let right = self.parse_membership()?;
            left = AstNode::BinaryOp {
                op: BinaryOperator::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_membership(&mut self) -> Result<AstNode> {
        let mut left = self.parse_equality()?;
        while self.at_one_of(&[TokenType::In, TokenType::Contains]) {
            let op = if self.at(TokenType::In) {
                BinaryOperator::In
            } else {
                BinaryOperator::ContainsOp
            };
            self.advance()?;
            let right = self.parse_equality()?;
            left = AstNode::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<AstNode> {
        let mut left = self.parse_inequality()?;
        while self.at_one_of(&[
            TokenType::Equal,
            TokenType::Equivalent,
            TokenType::NotEqual,
            TokenType::NotEquivalent,
        ]) {
            let op = match self.current.token_type {
                TokenType::Equal => BinaryOperator::Eq,
                TokenType::Equivalent => BinaryOperator::Equiv,
                TokenType::NotEqual => BinaryOperator::Ne,
                TokenType::NotEquivalent => BinaryOperator::NotEquiv,
                _ => unreachable!(),
            };
            self.advance()?;
            let right = self.parse_inequality()?;
            left = AstNode::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_inequality(&mut self) -> Result<AstNode> {
        let mut left = self.parse_union()?;
        while self.at_one_of(&[
            TokenType::LessThan,
            TokenType::LessThanOrEqual,
            TokenType::GreaterThan,
            TokenType::GreaterThanOrEqual,
        ]) {
            let op = match self.current.token_type {
                TokenType::LessThan => BinaryOperator::Lt,
                TokenType::LessThanOrEqual => BinaryOperator::Le,
                TokenType::GreaterThan => BinaryOperator::Gt,
                TokenType::GreaterThanOrEqual => BinaryOperator::Ge,
                _ => unreachable!(),
            };
            self.advance()?;
            let right = self.parse_union()?;
            left = AstNode::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_union(&mut self) -> Result<AstNode> {
        let mut left = self.parse_type_expr()?;
        while self.at(TokenType::Pipe) {
            self.advance()?;
            let right = self.parse_type_expr()?;
            left = AstNode::BinaryOp {
                op: BinaryOperator::Union,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_type_expr(&mut self) -> Result<AstNode> {
        let mut left = self.parse_additive()?;
        while self.at_one_of(&[TokenType::Is, TokenType::As]) {
            let op = if self.at(TokenType::Is) {
                TypeOperator::Is
            } else {
                TypeOperator::As
            };
            self.advance()?;
            let specifier = self.parse_type_specifier()?;
            left = AstNode::TypeOp {
                op,
                expr: Box::new(left),
                specifier,
            };
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<AstNode> {
        let mut left = self.parse_multiplicative()?;
        while self.at_one_of(&[TokenType::Plus, TokenType::Minus, TokenType::Ampersand]) {
            let op = match self.current.token_type {
                TokenType::Plus => BinaryOperator::Add,
                TokenType::Minus => BinaryOperator::Sub,
                TokenType::Ampersand => BinaryOperator::Concat,
                _ => unreachable!(),
            };
            self.advance()?;
            let right = self.parse_multiplicative()?;
            left = AstNode::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<AstNode> {
        let mut left = self.parse_unary()?;
        while self.at_one_of(&[
            TokenType::Multiply,
            TokenType::Divide,
            TokenType::Div,
            TokenType::Mod,
        ]) {
            let op = match self.current.token_type {
                TokenType::Multiply => BinaryOperator::Mul,
                TokenType::Divide => BinaryOperator::Div,
                TokenType::Div => BinaryOperator::TruncDiv,
                TokenType::Mod => BinaryOperator::Mod,
                _ => unreachable!(),
            };
            self.advance()?;
            let right = self.parse_unary()?;
            left = AstNode::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<AstNode> {
        if self.at_one_of(&[TokenType::Plus, TokenType::Minus]) {
            let op = if self.at(TokenType::Minus) {
                UnaryOperator::Minus
            } else {
                UnaryOperator::Plus
            };
            self.advance()?;
            self.enter()?;
            let operand = self.parse_unary()?;
            self.leave();
            return Ok(AstNode::UnaryOp {
                op,
                operand: Box::new(operand),
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<AstNode> {
        let mut expr = self.parse_term()?;
        loop {
            if self.at(TokenType::Dot) {
                self.advance()?;
                let invocation = self.parse_invocation()?;
                expr = AstNode::Invocation {
                    target: Box::new(expr),
                    invocation: Box::new(invocation),
                };
            } else if self.at(TokenType::OpenBracket) {
                self.advance()?;
                let index = self.parse_expression()?;
                self.expect(TokenType::CloseBracket)?;
                expr = AstNode::Indexer {
                    target: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_term(&mut self) -> Result<AstNode> {
        match self.current.token_type {
            TokenType::OpenParen => {
                self.advance()?;
                let expr = self.parse_expression()?;
                self.expect(TokenType::CloseParen)?;
                Ok(AstNode::ParenGroup(Box::new(expr)))
            }
            TokenType::EnvVariable => {
                let token = self.advance()?;
                Ok(AstNode::EnvVariable(token.value))
            }
            TokenType::OpenBrace => {
                self.advance()?;
                self.expect(TokenType::CloseBrace)?;
                Ok(AstNode::NullLiteral)
            }
            TokenType::BooleanLiteral
            | TokenType::StringLiteral
            | TokenType::NumberLiteral
            | TokenType::DateLiteral
            | TokenType::DateTimeLiteral
            | TokenType::TimeLiteral => self.parse_literal(),
            _ => self.parse_invocation(),
        }
    }

    fn parse_literal(&mut self) -> Result<AstNode> {
        let token = self.advance()?;
        match token.token_type {
            TokenType::BooleanLiteral => Ok(AstNode::BooleanLiteral(token.value == "true")),
            TokenType::StringLiteral => Ok(AstNode::StringLiteral(token.value)),
            TokenType::NumberLiteral => self.parse_number_literal(token),
            TokenType::DateLiteral => {
                let (date, precision) = temporal::parse_date(&token.value).ok_or_else(|| {
                    Error::ParseError(format!("invalid date literal '@{}'", token.value))
                })?;
                Ok(AstNode::DateLiteral(date, precision))
            }
            TokenType::DateTimeLiteral => {
                let (dt, precision, tz) =
                    temporal::parse_datetime(&token.value).ok_or_else(|| {
                        Error::ParseError(format!("invalid datetime literal '@{}'", token.value))
                    })?;
                Ok(AstNode::DateTimeLiteral(dt, precision, tz))
            }
            TokenType::TimeLiteral => {
                let (time, precision) = temporal::parse_time(&token.value).ok_or_else(|| {
                    Error::ParseError(format!("invalid time literal '@T{}'", token.value))
                })?;
                Ok(AstNode::TimeLiteral(time, precision))
            }
            other => Err(Error::ParseError(format!(
                "unexpected token type for literal: {other:?}"
            ))),
        }
    }

    /// A number literal, possibly followed by a quantity unit: a quoted UCUM
    /// unit or a bare calendar-duration keyword.
    fn parse_number_literal(&mut self, token: Token) -> Result<AstNode> {
        let unit = if self.at(TokenType::StringLiteral) {
            Some(self.advance()?.value)
        } else if self.at(TokenType::Identifier)
            && CALENDAR_UNITS.contains(&self.current.value.as_str())
        {
            Some(self.advance()?.value)
        } else {
            None
        };

        if let Some(unit) = unit {
            let value = Decimal::from_str(&token.value)
                .map_err(|e| Error::ParseError(format!("invalid number: {e}")))?;
            return Ok(AstNode::QuantityLiteral { value, unit });
        }

        if token.value.contains('.') {
            let value = Decimal::from_str(&token.value)
                .map_err(|e| Error::ParseError(format!("invalid number: {e}")))?;
            Ok(AstNode::DecimalLiteral(value))
        } else {
            let value = i32::from_str(&token.value)
                .map_err(|e| Error::ParseError(format!("invalid integer: {e}")))?;
            Ok(AstNode::IntegerLiteral(value))
        }
    }

    fn parse_invocation(&mut self) -> Result<AstNode> {
        match self.current.token_type {
            TokenType::This => {
                self.advance()?;
                Ok(AstNode::This)
            }
            TokenType::Index => {
                self.advance()?;
                Ok(AstNode::Index)
            }
            TokenType::Total => {
                self.advance()?;
                Ok(AstNode::Total)
            }
            // Operator keywords double as function names (`contains()`,
            // `in()`, `is()`, `as()`).
            TokenType::Identifier
            | TokenType::DelimitedIdentifier
            | TokenType::Contains
            | TokenType::In
            | TokenType::As
            | TokenType::Is => {
                let name = self.advance()?.value;
                if self.at(TokenType::OpenParen) {
                    self.advance()?;
                    let mut args = Vec::new();
                    if !self.at(TokenType::CloseParen) {
                        loop {
                            args.push(self.parse_expression()?);
                            if self.at(TokenType::Comma) {
                                self.advance()?;
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(TokenType::CloseParen)?;
                    Ok(AstNode::Function { name, args })
                } else {
                    Ok(AstNode::Member { name })
                }
            }
            _ => Err(Error::ParseError(format!(
                "expected identifier or function, got {:?} at line {}, column {}",
                self.current.token_type, self.current.line, self.current.column
            ))),
        }
    }

    /// `identifier ('.' identifier)?` — at most one qualifier (`System.X`,
    /// `FHIR.X`).
    fn parse_type_specifier(&mut self) -> Result<TypeSpecifierName> {
        let first = if self.at_one_of(&[TokenType::Identifier, TokenType::DelimitedIdentifier]) {
            self.advance()?.value
        } else {
            return Err(Error::ParseError("expected type specifier".into()));
        };

        if self.at(TokenType::Dot) {
            // Only consume the dot when a qualified name follows; `x is T`
            // can legitimately be followed by `.` navigation.
            if matches!(first.as_str(), "System" | "FHIR") {
                self.advance()?;
                let name = if self
                    .at_one_of(&[TokenType::Identifier, TokenType::DelimitedIdentifier])
                {
                    self.advance()?.value
                } else {
                    return Err(Error::ParseError(
                        "expected type name after namespace qualifier".into(),
                    ));
                };
                return Ok(TypeSpecifierName::qualified(first, name));
            }
        }

        Ok(TypeSpecifierName::unqualified(first))
    }
}

/// Convenience: parse a source string to an AST.
pub fn parse(input: &str) -> Result<AstNode> {
    Parser::new(input)?.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_member() {
        let ast = parse("Patient").unwrap();
        assert_eq!(
            ast,
            AstNode::Member {
                name: "Patient".into()
            }
        );
    }

    #[test]
    fn dotted_navigation() {
        let ast = parse("Patient.name.given").unwrap();
        match ast {
            AstNode::Invocation { invocation, .. } => {
                assert_eq!(
                    *invocation,
                    AstNode::Member {
                        name: "given".into()
                    }
                );
            }
            other => panic!("expected Invocation, got {other:?}"),
        }
    }

    #[test]
    fn precedence_mul_over_add() {
        // 1 + 2 * 3 parses as 1 + (2 * 3)
        let ast = parse("1 + 2 * 3").unwrap();
        match ast {
            AstNode::BinaryOp {
                op: BinaryOperator::Add,
                right,
                ..
            } => {
                assert!(matches!(
                    *right,
                    AstNode::BinaryOp {
                        op: BinaryOperator::Mul,
                        ..
                    }
                ));
            }
            other => panic!("expected Add at root, got {other:?}"),
        }
    }

    #[test]
    fn type_binds_tighter_than_inequality() {
        // `x is Integer = true` parses equality over the type test.
        let ast = parse("x is Integer = true").unwrap();
        assert!(matches!(
            ast,
            AstNode::BinaryOp {
                op: BinaryOperator::Eq,
                ..
            }
        ));
    }

    #[test]
    fn union_in_ladder() {
        // `a | b < c` parses as (a | b) < c.
        let ast = parse("a | b < c").unwrap();
        match ast {
            AstNode::BinaryOp {
                op: BinaryOperator::Lt,
                left,
                ..
            } => {
                assert!(matches!(
                    *left,
                    AstNode::BinaryOp {
                        op: BinaryOperator::Union,
                        ..
                    }
                ));
            }
            other => panic!("expected Lt at root, got {other:?}"),
        }
    }

    #[test]
    fn function_with_lambda_arg() {
        let ast = parse("name.where(use = 'official')").unwrap();
        match ast {
            AstNode::Invocation { invocation, .. } => match *invocation {
                AstNode::Function { name, args } => {
                    assert_eq!(name, "where");
                    assert_eq!(args.len(), 1);
                }
                other => panic!("expected Function, got {other:?}"),
            },
            other => panic!("expected Invocation, got {other:?}"),
        }
    }

    #[test]
    fn indexer_and_continuation() {
        let ast = parse("name[0].given").unwrap();
        match ast {
            AstNode::Invocation { target, .. } => {
                assert!(matches!(*target, AstNode::Indexer { .. }));
            }
            other => panic!("expected Invocation, got {other:?}"),
        }
    }

    #[test]
    fn quantity_literals() {
        assert_eq!(
            parse("4.5 'mg'").unwrap(),
            AstNode::QuantityLiteral {
                value: Decimal::from_str("4.5").unwrap(),
                unit: "mg".into()
            }
        );
        assert_eq!(
            parse("23 years").unwrap(),
            AstNode::QuantityLiteral {
                value: Decimal::from(23),
                unit: "years".into()
            }
        );
    }

    #[test]
    fn qualified_type_specifier() {
        let ast = parse("x is System.Boolean").unwrap();
        match ast {
            AstNode::TypeOp { specifier, .. } => {
                assert_eq!(specifier.qualifier.as_deref(), Some("System"));
                assert_eq!(specifier.name, "Boolean");
            }
            other => panic!("expected TypeOp, got {other:?}"),
        }
    }

    #[test]
    fn navigation_after_as_cast() {
        // A non-namespace dot after a type name is navigation, not a
        // qualifier.
        let ast = parse("(Observation.value as Quantity).unit").unwrap();
        assert!(matches!(ast, AstNode::Invocation { .. }));
    }

    #[test]
    fn null_literal() {
        assert_eq!(parse("{}").unwrap(), AstNode::NullLiteral);
    }

    #[test]
    fn keyword_function_names() {
        let ast = parse("name.contains('x')").unwrap();
        match ast {
            AstNode::Invocation { invocation, .. } => {
                assert!(matches!(*invocation, AstNode::Function { .. }));
            }
            other => panic!("expected Invocation, got {other:?}"),
        }
    }

    #[test]
    fn unary_minus() {
        let ast = parse("-5").unwrap();
        assert!(matches!(
            ast,
            AstNode::UnaryOp {
                op: UnaryOperator::Minus,
                ..
            }
        ));
    }

    #[test]
    fn env_variable_term() {
        assert_eq!(
            parse("%context").unwrap(),
            AstNode::EnvVariable("context".into())
        );
    }

    #[test]
    fn integer_overflow_rejected() {
        assert!(parse("2147483648").is_err());
        assert!(parse("2147483647").is_ok());
    }

    #[test]
    fn trailing_garbage_rejected() {
        assert!(parse("1 + 2 )").is_err());
    }

    #[test]
    fn deep_nesting_bounded() {
        let src = format!("{}1{}", "(".repeat(500), ")".repeat(500));
        assert!(parse(&src).is_err());
    }
}
