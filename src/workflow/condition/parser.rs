//! Restricted arithmetic parser for `calculate` actions
//!
//! Supports numbers, variable references (`count`, `stats.total`), the
//! operators `+ - * / % ^`, parentheses, unary minus and the functions
//! `abs`, `min`, `max`, `round`, `floor`, `ceil`. Nothing else is accepted.

use super::ast::{CalcExpr, CalcOp};
use std::error::Error;

const FUNCTIONS: [&str; 6] = ["abs", "min", "max", "round", "floor", "ceil"];

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
    Comma,
}

/// Parse an arithmetic expression string into an AST
pub fn parse(input: &str) -> Result<CalcExpr, Box<dyn Error + Send + Sync>> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err("Empty expression".into());
    }

    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expression()?;
    if parser.pos < parser.tokens.len() {
        return Err(format!(
            "Unexpected token {:?} in expression: {}",
            parser.tokens[parser.pos], input
        )
        .into());
    }
    Ok(expr)
}

fn tokenize(input: &str) -> Result<Vec<Token>, Box<dyn Error + Send + Sync>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let n = text
                .parse::<f64>()
                .map_err(|_| format!("Could not parse number: {}", text))?;
            tokens.push(Token::Number(n));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else if "+-*/%^".contains(c) {
            tokens.push(Token::Op(c));
            i += 1;
        } else if c == '(' {
            tokens.push(Token::LParen);
            i += 1;
        } else if c == ')' {
            tokens.push(Token::RParen);
            i += 1;
        } else if c == ',' {
            tokens.push(Token::Comma);
            i += 1;
        } else {
            return Err(format!("Unexpected character '{}' in expression: {}", c, input).into());
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    // expression := term (('+' | '-') term)*
    fn expression(&mut self) -> Result<CalcExpr, Box<dyn Error + Send + Sync>> {
        let mut left = self.term()?;
        while let Some(Token::Op(c @ ('+' | '-'))) = self.peek().cloned() {
            self.pos += 1;
            let right = self.term()?;
            let op = if c == '+' { CalcOp::Add } else { CalcOp::Sub };
            left = binary(left, op, right);
        }
        Ok(left)
    }

    // term := unary (('*' | '/' | '%') unary)*
    fn term(&mut self) -> Result<CalcExpr, Box<dyn Error + Send + Sync>> {
        let mut left = self.unary()?;
        while let Some(Token::Op(c @ ('*' | '/' | '%'))) = self.peek().cloned() {
            self.pos += 1;
            let right = self.unary()?;
            let op = match c {
                '*' => CalcOp::Mul,
                '/' => CalcOp::Div,
                _ => CalcOp::Rem,
            };
            left = binary(left, op, right);
        }
        Ok(left)
    }

    // unary := ('-' | '+') unary | power
    fn unary(&mut self) -> Result<CalcExpr, Box<dyn Error + Send + Sync>> {
        match self.peek() {
            Some(Token::Op('-')) => {
                self.pos += 1;
                Ok(CalcExpr::Neg(Box::new(self.unary()?)))
            }
            Some(Token::Op('+')) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    // power := atom ('^' unary)?   (right associative)
    fn power(&mut self) -> Result<CalcExpr, Box<dyn Error + Send + Sync>> {
        let base = self.atom()?;
        if let Some(Token::Op('^')) = self.peek() {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(binary(base, CalcOp::Pow, exponent));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<CalcExpr, Box<dyn Error + Send + Sync>> {
        match self.next() {
            Some(Token::Number(n)) => Ok(CalcExpr::Number(n)),
            Some(Token::Ident(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    if !FUNCTIONS.contains(&name.as_str()) {
                        return Err(format!("Function not allowed: {}", name).into());
                    }
                    self.pos += 1;
                    let args = self.arguments()?;
                    Ok(CalcExpr::Call { name, args })
                } else {
                    Ok(CalcExpr::Var(name))
                }
            }
            Some(Token::LParen) => {
                let inner = self.expression()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("Missing closing parenthesis".into()),
                }
            }
            Some(other) => Err(format!("Unexpected token {:?}", other).into()),
            None => Err("Unexpected end of expression".into()),
        }
    }

    fn arguments(&mut self) -> Result<Vec<CalcExpr>, Box<dyn Error + Send + Sync>> {
        let mut args = Vec::new();
        if let Some(Token::RParen) = self.peek() {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                _ => return Err("Expected ',' or ')' in argument list".into()),
            }
        }
    }
}

fn binary(left: CalcExpr, op: CalcOp, right: CalcExpr) -> CalcExpr {
    CalcExpr::Binary {
        left: Box::new(left),
        op,
        right: Box::new(right),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> CalcExpr {
        CalcExpr::Number(n)
    }

    fn var(name: &str) -> CalcExpr {
        CalcExpr::Var(name.to_string())
    }

    #[test]
    fn test_parse_precedence() {
        let expr = parse("a + 2 * b").unwrap();
        assert_eq!(
            expr,
            binary(var("a"), CalcOp::Add, binary(num(2.0), CalcOp::Mul, var("b")))
        );
    }

    #[test]
    fn test_parse_parentheses_and_unary() {
        let expr = parse("-(x - 1.5)").unwrap();
        assert_eq!(
            expr,
            CalcExpr::Neg(Box::new(binary(var("x"), CalcOp::Sub, num(1.5))))
        );
    }

    #[test]
    fn test_parse_power_right_associative() {
        let expr = parse("2 ^ 3 ^ 2").unwrap();
        assert_eq!(
            expr,
            binary(num(2.0), CalcOp::Pow, binary(num(3.0), CalcOp::Pow, num(2.0)))
        );
    }

    #[test]
    fn test_parse_dotted_variable_and_function() {
        let expr = parse("max(stats.total, 10)").unwrap();
        assert_eq!(
            expr,
            CalcExpr::Call {
                name: "max".to_string(),
                args: vec![var("stats.total"), num(10.0)],
            }
        );
    }

    #[test]
    fn test_parse_rejects_unknown_function() {
        assert!(parse("system(1)").is_err());
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse("").is_err());
        assert!(parse("1 +").is_err());
        assert!(parse("(1 + 2").is_err());
        assert!(parse("a = 1").is_err());
        assert!(parse("1 2").is_err());
    }
}
