//! Parser for the s-expression form of [`Expr`].

use std::str::FromStr;

use crate::error::{PolicyError, Result};
use crate::expr::{Expr, Literal, MAX_DEPTH};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open,
    Close,
    Str(String),
    Atom(String),
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn err(&self, message: impl Into<String>) -> PolicyError {
        PolicyError::Parse {
            position: self.pos,
            message: message.into(),
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn tokenize(mut self) -> Result<Vec<(usize, Token)>> {
        let mut tokens = Vec::new();
        while let Some(c) = self.peek_char() {
            let start = self.pos;
            match c {
                c if c.is_whitespace() => {
                    self.bump();
                }
                '(' => {
                    self.bump();
                    tokens.push((start, Token::Open));
                }
                ')' => {
                    self.bump();
                    tokens.push((start, Token::Close));
                }
                '"' => {
                    self.bump();
                    let s = self.string()?;
                    tokens.push((start, Token::Str(s)));
                }
                _ => {
                    while let Some(c) = self.peek_char() {
                        if c.is_whitespace() || c == '(' || c == ')' || c == '"' {
                            break;
                        }
                        self.bump();
                    }
                    tokens.push((start, Token::Atom(self.src[start..self.pos].to_owned())));
                }
            }
        }
        Ok(tokens)
    }

    fn string(&mut self) -> Result<String> {
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(out),
                Some('\\') => match self.bump() {
                    Some(c @ ('"' | '\\')) => out.push(c),
                    Some('n') => out.push('\n'),
                    Some(c) => return Err(self.err(format!("unknown escape \\{}", c))),
                    None => return Err(self.err("unterminated string")),
                },
                Some(c) => out.push(c),
                None => return Err(self.err("unterminated string")),
            }
        }
    }
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    next: usize,
    end: usize,
    depth: usize,
}

impl Parser {
    fn err_at(position: usize, message: impl Into<String>) -> PolicyError {
        PolicyError::Parse {
            position,
            message: message.into(),
        }
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.next)
            .map(|(pos, _)| *pos)
            .unwrap_or(self.end)
    }

    fn take(&mut self) -> Result<(usize, Token)> {
        let token = self
            .tokens
            .get(self.next)
            .cloned()
            .ok_or_else(|| Self::err_at(self.end, "unexpected end of input"))?;
        self.next += 1;
        Ok(token)
    }

    fn at_close(&self) -> bool {
        matches!(self.tokens.get(self.next), Some((_, Token::Close)))
    }

    fn expect_close(&mut self) -> Result<()> {
        match self.take()? {
            (_, Token::Close) => Ok(()),
            (pos, _) => Err(Self::err_at(pos, "expected `)`")),
        }
    }

    fn expr(&mut self) -> Result<Expr> {
        if self.depth == MAX_DEPTH {
            return Err(Self::err_at(self.position(), "expression nested too deeply"));
        }
        self.depth += 1;
        let expr = match self.take()? {
            (_, Token::Atom(a)) if a == "true" => Ok(Expr::Const(true)),
            (_, Token::Atom(a)) if a == "false" => Ok(Expr::Const(false)),
            (_, Token::Open) => self.form(),
            (pos, _) => Err(Self::err_at(pos, "expected expression")),
        };
        self.depth -= 1;
        expr
    }

    fn form(&mut self) -> Result<Expr> {
        let (pos, head) = self.take()?;
        let op = match head {
            Token::Atom(op) => op,
            _ => return Err(Self::err_at(pos, "expected operator")),
        };
        let expr = match op.as_str() {
            "=" => {
                let fact = self.fact()?;
                Expr::Eq(fact, self.literal()?)
            }
            "in" => {
                let fact = self.fact()?;
                let mut literals = Vec::new();
                while !self.at_close() {
                    literals.push(self.literal()?);
                }
                Expr::In(fact, literals)
            }
            "contains" => {
                let fact = self.fact()?;
                Expr::Contains(fact, self.literal()?)
            }
            "present" => Expr::Present(self.fact()?),
            "and" | "or" => {
                let mut exprs = Vec::new();
                while !self.at_close() {
                    exprs.push(self.expr()?);
                }
                if op == "and" {
                    Expr::And(exprs)
                } else {
                    Expr::Or(exprs)
                }
            }
            "not" => Expr::not(self.expr()?),
            other => return Err(Self::err_at(pos, format!("unknown operator `{}`", other))),
        };
        self.expect_close()?;
        Ok(expr)
    }

    fn fact(&mut self) -> Result<String> {
        match self.take()? {
            (_, Token::Atom(name)) if is_fact_name(&name) => Ok(name),
            (pos, _) => Err(Self::err_at(pos, "expected fact name")),
        }
    }

    fn literal(&mut self) -> Result<Literal> {
        match self.take()? {
            (_, Token::Str(s)) => Ok(Literal::Str(s)),
            (_, Token::Atom(a)) if a == "true" => Ok(Literal::Bool(true)),
            (_, Token::Atom(a)) if a == "false" => Ok(Literal::Bool(false)),
            (pos, Token::Atom(a)) => a
                .parse::<i64>()
                .map(Literal::Int)
                .map_err(|_| Self::err_at(pos, format!("expected literal, found `{}`", a))),
            (pos, _) => Err(Self::err_at(pos, "expected literal")),
        }
    }
}

fn is_fact_name(name: &str) -> bool {
    name.chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Parse the textual form of a policy expression.
pub fn parse(src: &str) -> Result<Expr> {
    let tokens = Lexer::new(src).tokenize()?;
    let mut parser = Parser {
        tokens,
        next: 0,
        end: src.len(),
        depth: 0,
    };
    let expr = parser.expr()?;
    if parser.next != parser.tokens.len() {
        return Err(Parser::err_at(parser.position(), "trailing input"));
    }
    Ok(expr)
}

impl FromStr for Expr {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self> {
        parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_compound() {
        let expr: Expr = r#"(and (= subject.role "admin") (present subject.project))"#
            .parse()
            .unwrap();
        assert_eq!(
            expr,
            Expr::and([
                Expr::eq("subject.role", "admin"),
                Expr::present("subject.project")
            ])
        );
    }

    #[test]
    fn test_parse_literals() {
        let expr = parse("(or (= subject.level 3) (= subject.trusted true) (in action.id \"read\" -1 false))")
            .unwrap();
        assert_eq!(
            expr,
            Expr::or([
                Expr::eq("subject.level", 3i64),
                Expr::eq("subject.trusted", true),
                Expr::In(
                    "action.id".into(),
                    vec![Literal::from("read"), Literal::Int(-1), Literal::Bool(false)]
                ),
            ])
        );
    }

    #[test]
    fn test_display_parses_back() {
        let exprs = [
            Expr::Const(false),
            Expr::not(Expr::contains("subject.groups", "ops \"night\"")),
            Expr::and([]),
            Expr::is_in("resource.id", Vec::<Literal>::new()),
        ];
        for expr in exprs {
            assert_eq!(parse(&expr.to_string()).unwrap(), expr);
        }
    }

    #[test]
    fn test_errors_carry_position() {
        match parse("(= subject.role admin)") {
            Err(PolicyError::Parse { position, .. }) => assert_eq!(position, 16),
            other => panic!("unexpected {:?}", other),
        }
        assert!(parse("(xor true false)").is_err());
        assert!(parse("(not true").is_err());
        assert!(parse("true false").is_err());
        assert!(parse("(= \"unterminated").is_err());
        assert!(parse("(present 9lives)").is_err());
        assert!(parse("").is_err());
    }

    fn nested_not_text(depth: usize) -> String {
        format!("{}true{}", "(not ".repeat(depth - 1), ")".repeat(depth - 1))
    }

    #[test]
    fn test_nesting_is_bounded() {
        assert_eq!(parse(&nested_not_text(MAX_DEPTH)).unwrap().depth(), MAX_DEPTH);

        match parse(&nested_not_text(MAX_DEPTH + 1)) {
            Err(PolicyError::Parse { position, message }) => {
                assert_eq!(position, 5 * MAX_DEPTH);
                assert!(message.contains("nested too deeply"));
            }
            other => panic!("unexpected {:?}", other),
        }

        // Far past the limit the parser stops early instead of exhausting the stack.
        let deep = nested_not_text(200_000);
        assert!(matches!(parse(&deep), Err(PolicyError::Parse { .. })));
    }
}
