//! Literal expressions found in declarative files: domains, `eval`
//! attributes, view modifiers and contexts.
//!
//! Only literals, names and calls are evaluated; arbitrary expressions are
//! tokenized to report the names they reference.

use serde_json::Value;

use crate::error::CoreError;

/// Parsed literal expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Literal>),
    Tuple(Vec<Literal>),
    Dict(Vec<(Literal, Literal)>),
    /// Identifier or dotted name resolved at evaluation time
    Name(String),
    /// Function call such as `ref('base.group_user')`
    Call(String, Vec<Literal>),
}

impl Literal {
    /// Converts to JSON, resolving names and calls through `resolve`.
    pub fn to_json<F>(&self, resolve: &mut F) -> Result<Value, CoreError>
    where
        F: FnMut(&Literal) -> Result<Value, CoreError>,
    {
        Ok(match self {
            Literal::None => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(i) => Value::from(*i),
            Literal::Float(f) => Value::from(*f),
            Literal::Str(s) => Value::String(s.clone()),
            Literal::List(items) | Literal::Tuple(items) => Value::Array(
                items
                    .iter()
                    .map(|i| i.to_json(resolve))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Literal::Dict(pairs) => {
                let mut map = serde_json::Map::new();
                for (k, v) in pairs {
                    let key = match k {
                        Literal::Str(s) => s.clone(),
                        other => other.to_json(resolve)?.to_string(),
                    };
                    map.insert(key, v.to_json(resolve)?);
                }
                Value::Object(map)
            }
            Literal::Name(_) | Literal::Call(..) => resolve(self)?,
        })
    }

    /// Converts to JSON, failing on any name or call.
    pub fn to_constant(&self, source: &str) -> Result<Value, CoreError> {
        self.to_json(&mut |lit| {
            Err(CoreError::BadExpression {
                expr: source.to_string(),
                reason: format!("'{:?}' is not a constant", lit),
            })
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Str(String),
    Int(i64),
    Float(f64),
    Name(String),
    Punct(char),
    Op(String),
}

/// Parses a literal expression (Python-like syntax).
pub fn parse_literal(source: &str) -> Result<Literal, CoreError> {
    let tokens = tokenize(source)?;
    let mut parser = LiteralParser {
        source,
        tokens: &tokens,
        pos: 0,
    };
    let value = parser.value()?;
    if parser.pos != tokens.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(value)
}

/// Names referenced by an arbitrary expression: identifiers that are not
/// keywords, attribute accesses, keyword-argument names or string contents.
/// Dotted names are reported by their first segment.
pub fn free_names(source: &str) -> Result<Vec<String>, CoreError> {
    const KEYWORDS: &[&str] = &[
        "and", "or", "not", "in", "is", "if", "else", "for", "lambda", "True", "False", "None",
    ];
    let tokens = tokenize(source)?;
    let mut names = Vec::new();
    for (i, token) in tokens.iter().enumerate() {
        let Token::Name(name) = token else { continue };
        let first = name.split('.').next().unwrap_or(name);
        if KEYWORDS.contains(&first) {
            continue;
        }
        let kwarg = matches!(tokens.get(i + 1), Some(Token::Op(op)) if op == "=");
        if kwarg {
            continue;
        }
        if !names.iter().any(|n| n == first) {
            names.push(first.to_string());
        }
    }
    Ok(names)
}

fn tokenize(source: &str) -> Result<Vec<Token>, CoreError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let bad = |reason: String| CoreError::BadExpression {
        expr: source.to_string(),
        reason,
    };
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '\'' || c == '"' {
            let mut value = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err(bad("unterminated string".to_string())),
                    Some('\\') => {
                        let escaped = chars
                            .get(i + 1)
                            .ok_or_else(|| bad("dangling escape".to_string()))?;
                        value.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            other => *other,
                        });
                        i += 2;
                    }
                    Some(q) if *q == c => {
                        i += 1;
                        break;
                    }
                    Some(other) => {
                        value.push(*other);
                        i += 1;
                    }
                }
            }
            tokens.push(Token::Str(value));
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.' || chars[i] == '_') {
                i += 1;
            }
            let text: String = chars[start..i].iter().filter(|&&d| d != '_').collect();
            if text.contains('.') {
                let value = text
                    .parse::<f64>()
                    .map_err(|_| bad(format!("invalid number '{}'", text)))?;
                tokens.push(Token::Float(value));
            } else {
                let value = text
                    .parse::<i64>()
                    .map_err(|_| bad(format!("invalid number '{}'", text)))?;
                tokens.push(Token::Int(value));
            }
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                i += 1;
            }
            let name: String = chars[start..i].iter().collect();
            tokens.push(Token::Name(name.trim_end_matches('.').to_string()));
        } else if "()[]{},:".contains(c) {
            tokens.push(Token::Punct(c));
            i += 1;
        } else if "=!<>+-*/%&|^~".contains(c) {
            let mut op = c.to_string();
            if let Some(&next) = chars.get(i + 1) {
                if "=<>*/".contains(next) {
                    op.push(next);
                }
            }
            i += op.chars().count();
            tokens.push(Token::Op(op));
        } else {
            return Err(bad(format!("unexpected character '{}'", c)));
        }
    }
    Ok(tokens)
}

struct LiteralParser<'a> {
    source: &'a str,
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> LiteralParser<'a> {
    fn error(&self, reason: &str) -> CoreError {
        CoreError::BadExpression {
            expr: self.source.to_string(),
            reason: reason.to_string(),
        }
    }

    fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn peek_punct(&self, c: char) -> bool {
        self.tokens.get(self.pos) == Some(&Token::Punct(c))
    }

    fn value(&mut self) -> Result<Literal, CoreError> {
        match self.next().cloned() {
            Some(Token::Str(s)) => Ok(Literal::Str(s)),
            Some(Token::Int(i)) => Ok(Literal::Int(i)),
            Some(Token::Float(f)) => Ok(Literal::Float(f)),
            Some(Token::Op(op)) if op == "-" => match self.next().cloned() {
                Some(Token::Int(i)) => Ok(Literal::Int(-i)),
                Some(Token::Float(f)) => Ok(Literal::Float(-f)),
                _ => Err(self.error("expected a number after '-'")),
            },
            Some(Token::Name(name)) => match name.as_str() {
                "True" => Ok(Literal::Bool(true)),
                "False" => Ok(Literal::Bool(false)),
                "None" => Ok(Literal::None),
                _ if self.peek_punct('(') => {
                    self.pos += 1;
                    let args = self.sequence(')')?;
                    Ok(Literal::Call(name, args))
                }
                _ => Ok(Literal::Name(name)),
            },
            Some(Token::Punct('[')) => Ok(Literal::List(self.sequence(']')?)),
            Some(Token::Punct('(')) => {
                let items = self.sequence(')')?;
                Ok(Literal::Tuple(items))
            }
            Some(Token::Punct('{')) => {
                let mut pairs = Vec::new();
                loop {
                    if self.peek_punct('}') {
                        self.pos += 1;
                        break;
                    }
                    let key = self.value()?;
                    if self.next() != Some(&Token::Punct(':')) {
                        return Err(self.error("expected ':' in dict"));
                    }
                    let value = self.value()?;
                    pairs.push((key, value));
                    match self.next() {
                        Some(Token::Punct(',')) => continue,
                        Some(Token::Punct('}')) => break,
                        _ => return Err(self.error("expected ',' or '}' in dict")),
                    }
                }
                Ok(Literal::Dict(pairs))
            }
            _ => Err(self.error("expected a value")),
        }
    }

    fn sequence(&mut self, close: char) -> Result<Vec<Literal>, CoreError> {
        let mut items = Vec::new();
        loop {
            if self.peek_punct(close) {
                self.pos += 1;
                return Ok(items);
            }
            items.push(self.value()?);
            match self.next() {
                Some(Token::Punct(',')) => continue,
                Some(Token::Punct(c)) if *c == close => return Ok(items),
                _ => return Err(self.error(&format!("expected ',' or '{}'", close))),
            }
        }
    }
}

/// Parses a boolean-ish attribute value (`1`, `True`, `true`).
pub fn parse_bool(text: &str) -> bool {
    matches!(text.trim(), "1" | "True" | "true")
}
