//! XPath subset used by view inheritance specs.
//!
//! Supported: absolute and relative location paths, `//`, `.`, `..`, `*`,
//! a parenthesized head with predicates (`(//field)[2]`), and predicates
//! built from `@attr`, string and number literals, `text()`, `=`/`!=`,
//! `and`/`or`, `not()`, `contains()`, `starts-with()`, `hasclass()`,
//! `name()`, `position()`, `last()` and nested relative paths.

use super::{Element, NodePath};
use crate::error::CoreError;

/// Compiled XPath expression.
#[derive(Debug, Clone)]
pub struct XPath {
    source: String,
    path: PathExpr,
}

#[derive(Debug, Clone)]
struct PathExpr {
    head: Head,
    steps: Vec<Step>,
}

#[derive(Debug, Clone)]
enum Head {
    /// Starts at the document node
    Root,
    /// Starts at the context node
    Context,
    /// Parenthesized sub-path filtered by predicates
    Filter(Box<PathExpr>, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Axis {
    Child,
    DescendantOrSelf,
    Parent,
    SelfNode,
}

#[derive(Debug, Clone)]
struct Step {
    axis: Axis,
    /// `None` matches any element
    name: Option<String>,
    predicates: Vec<Expr>,
}

#[derive(Debug, Clone)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Eq(Box<Expr>, Box<Expr>, bool),
    Attr(String),
    Literal(String),
    Number(f64),
    Path(PathExpr),
    Call(String, Vec<Expr>),
}

/// Location: the document node or an element path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Loc {
    Document,
    Node(NodePath),
}

enum Value {
    Str(String),
    Num(f64),
    Bool(bool),
    Missing,
    Nodes(Vec<Loc>),
}

impl XPath {
    /// Compiles an expression.
    pub fn parse(source: &str) -> Result<Self, CoreError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            source,
            tokens,
            pos: 0,
        };
        let path = parser.path()?;
        if parser.pos != parser.tokens.len() {
            return Err(parser.error("unexpected trailing tokens"));
        }
        Ok(Self {
            source: source.to_string(),
            path,
        })
    }

    /// Source text of the expression.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates against `root`, returning matching element paths in document order.
    pub fn select(&self, root: &Element) -> Vec<NodePath> {
        eval_path(&self.path, root, &Loc::Node(Vec::new()))
            .into_iter()
            .filter_map(|loc| match loc {
                Loc::Node(path) => Some(path),
                Loc::Document => None,
            })
            .collect()
    }

    /// First match in document order.
    pub fn select_first(&self, root: &Element) -> Option<NodePath> {
        self.select(root).into_iter().next()
    }
}

fn element<'a>(root: &'a Element, loc: &Loc) -> Option<&'a Element> {
    match loc {
        Loc::Document => None,
        Loc::Node(path) => root.get(path),
    }
}

fn children(root: &Element, loc: &Loc) -> Vec<Loc> {
    match loc {
        Loc::Document => vec![Loc::Node(Vec::new())],
        Loc::Node(path) => match root.get(path) {
            Some(el) => el
                .indexed_child_elements()
                .map(|(i, _)| {
                    let mut child = path.clone();
                    child.push(i);
                    Loc::Node(child)
                })
                .collect(),
            None => Vec::new(),
        },
    }
}

fn descendants_or_self(root: &Element, loc: &Loc) -> Vec<Loc> {
    let mut out = vec![loc.clone()];
    let mut stack = children(root, loc);
    stack.reverse();
    while let Some(next) = stack.pop() {
        let mut kids = children(root, &next);
        kids.reverse();
        out.push(next);
        stack.extend(kids);
    }
    out
}

fn eval_path(path: &PathExpr, root: &Element, context: &Loc) -> Vec<Loc> {
    let mut current = match &path.head {
        Head::Root => vec![Loc::Document],
        Head::Context => vec![context.clone()],
        Head::Filter(inner, predicates) => {
            let nodes = eval_path(inner, root, context);
            filter(nodes, predicates, root)
        }
    };
    for step in &path.steps {
        let mut next = Vec::new();
        for loc in &current {
            let candidates: Vec<Loc> = match step.axis {
                Axis::Child => children(root, loc),
                Axis::DescendantOrSelf => descendants_or_self(root, loc),
                Axis::Parent => match loc {
                    Loc::Document => Vec::new(),
                    Loc::Node(p) if p.is_empty() => vec![Loc::Document],
                    Loc::Node(p) => vec![Loc::Node(p[..p.len() - 1].to_vec())],
                },
                Axis::SelfNode => vec![loc.clone()],
            };
            let matching: Vec<Loc> = candidates
                .into_iter()
                .filter(|c| match (&step.name, c) {
                    (None, _) => true,
                    (Some(_), Loc::Document) => false,
                    (Some(name), c) => element(root, c).is_some_and(|el| &el.tag == name),
                })
                .collect();
            next.extend(filter(matching, &step.predicates, root));
        }
        next.sort();
        next.dedup();
        current = next;
    }
    current
}

fn filter(mut nodes: Vec<Loc>, predicates: &[Expr], root: &Element) -> Vec<Loc> {
    for predicate in predicates {
        let size = nodes.len();
        nodes = nodes
            .into_iter()
            .enumerate()
            .filter(|(i, loc)| eval_predicate(predicate, root, loc, i + 1, size))
            .map(|(_, loc)| loc)
            .collect();
    }
    nodes
}

fn eval_predicate(expr: &Expr, root: &Element, loc: &Loc, position: usize, size: usize) -> bool {
    match eval(expr, root, loc, position, size) {
        Value::Num(n) => (n - position as f64).abs() < f64::EPSILON,
        other => truthy(&other),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Str(s) => !s.is_empty(),
        Value::Num(n) => *n != 0.0,
        Value::Bool(b) => *b,
        Value::Missing => false,
        Value::Nodes(nodes) => !nodes.is_empty(),
    }
}

fn string_value(value: &Value, root: &Element) -> Option<String> {
    match value {
        Value::Str(s) => Some(s.clone()),
        Value::Num(n) => Some(format_number(*n)),
        Value::Bool(b) => Some(b.to_string()),
        Value::Missing => None,
        Value::Nodes(nodes) => nodes
            .first()
            .and_then(|loc| element(root, loc))
            .map(|el| el.deep_text()),
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn eval(expr: &Expr, root: &Element, loc: &Loc, position: usize, size: usize) -> Value {
    match expr {
        Expr::Or(a, b) => Value::Bool(
            truthy(&eval(a, root, loc, position, size)) || truthy(&eval(b, root, loc, position, size)),
        ),
        Expr::And(a, b) => Value::Bool(
            truthy(&eval(a, root, loc, position, size)) && truthy(&eval(b, root, loc, position, size)),
        ),
        Expr::Eq(a, b, negate) => {
            let left = eval(a, root, loc, position, size);
            let right = eval(b, root, loc, position, size);
            let equal = match (&left, &right) {
                (Value::Num(x), Value::Num(y)) => (x - y).abs() < f64::EPSILON,
                (Value::Nodes(nodes), other) | (other, Value::Nodes(nodes)) => {
                    let Some(wanted) = string_value(other, root) else {
                        return Value::Bool(false);
                    };
                    nodes
                        .iter()
                        .filter_map(|l| element(root, l))
                        .any(|el| el.deep_text() == wanted)
                }
                _ => match (string_value(&left, root), string_value(&right, root)) {
                    (Some(x), Some(y)) => x == y,
                    _ => return Value::Bool(false),
                },
            };
            Value::Bool(equal != *negate)
        }
        Expr::Attr(name) => match element(root, loc).and_then(|el| el.attr(name)) {
            Some(v) => Value::Str(v.to_string()),
            None => Value::Missing,
        },
        Expr::Literal(s) => Value::Str(s.clone()),
        Expr::Number(n) => Value::Num(*n),
        Expr::Path(path) => Value::Nodes(eval_path(path, root, loc)),
        Expr::Call(name, args) => {
            let arg = |i: usize| -> Option<String> {
                args.get(i)
                    .and_then(|a| string_value(&eval(a, root, loc, position, size), root))
            };
            match name.as_str() {
                "not" => Value::Bool(
                    !args
                        .first()
                        .is_some_and(|a| truthy(&eval(a, root, loc, position, size))),
                ),
                "contains" => match (arg(0), arg(1)) {
                    (Some(hay), Some(needle)) => Value::Bool(hay.contains(&needle)),
                    _ => Value::Bool(false),
                },
                "starts-with" => match (arg(0), arg(1)) {
                    (Some(hay), Some(prefix)) => Value::Bool(hay.starts_with(&prefix)),
                    _ => Value::Bool(false),
                },
                "hasclass" => {
                    let classes: Vec<&str> = element(root, loc)
                        .and_then(|el| el.attr("class"))
                        .map(|c| c.split_whitespace().collect())
                        .unwrap_or_default();
                    let all = (0..args.len()).all(|i| arg(i).is_some_and(|c| classes.contains(&c.as_str())));
                    Value::Bool(all)
                }
                "text" => match element(root, loc) {
                    Some(el) => Value::Str(el.text()),
                    None => Value::Missing,
                },
                "name" | "local-name" => match element(root, loc) {
                    Some(el) => Value::Str(el.tag.clone()),
                    None => Value::Missing,
                },
                "position" => Value::Num(position as f64),
                "last" => Value::Num(size as f64),
                _ => Value::Missing,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Slash,
    DoubleSlash,
    LBracket,
    RBracket,
    LParen,
    RParen,
    At,
    Eq,
    NotEq,
    Comma,
    Dot,
    DotDot,
    Star,
    Name(String),
    Str(String),
    Num(f64),
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
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '/' if chars.get(i + 1) == Some(&'/') => {
                tokens.push(Token::DoubleSlash);
                i += 2;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '@' => {
                tokens.push(Token::At);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Eq);
                i += 1;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::NotEq);
                i += 2;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '.' if chars.get(i + 1) == Some(&'.') => {
                tokens.push(Token::DotDot);
                i += 2;
            }
            '.' if !chars.get(i + 1).is_some_and(|d| d.is_ascii_digit()) => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '\'' | '"' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&q| q == c)
                    .ok_or_else(|| bad("unterminated string literal".to_string()))?;
                tokens.push(Token::Str(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            d if d.is_ascii_digit() || d == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| bad(format!("invalid number '{}'", text)))?;
                tokens.push(Token::Num(value));
            }
            n if n.is_alphabetic() || n == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '-' | ':' | '.'))
                {
                    i += 1;
                }
                tokens.push(Token::Name(chars[start..i].iter().collect()));
            }
            other => return Err(bad(format!("unexpected character '{}'", other))),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, reason: &str) -> CoreError {
        CoreError::BadExpression {
            expr: self.source.to_string(),
            reason: format!("{} at token {}", reason, self.pos),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<(), CoreError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {:?}", token)))
        }
    }

    fn path(&mut self) -> Result<PathExpr, CoreError> {
        let mut steps = Vec::new();
        let head = match self.peek() {
            Some(Token::Slash) => {
                self.pos += 1;
                if self.starts_step() {
                    steps.push(self.step()?);
                }
                Head::Root
            }
            Some(Token::DoubleSlash) => {
                self.pos += 1;
                steps.push(descendant_step());
                steps.push(self.step()?);
                Head::Root
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.path()?;
                self.expect(&Token::RParen)?;
                let predicates = self.predicates()?;
                Head::Filter(Box::new(inner), predicates)
            }
            _ => {
                steps.push(self.step()?);
                Head::Context
            }
        };
        loop {
            if self.eat(&Token::Slash) {
                steps.push(self.step()?);
            } else if self.eat(&Token::DoubleSlash) {
                steps.push(descendant_step());
                steps.push(self.step()?);
            } else {
                break;
            }
        }
        Ok(PathExpr { head, steps })
    }

    fn starts_step(&self) -> bool {
        matches!(
            self.peek(),
            Some(Token::Name(_)) | Some(Token::Star) | Some(Token::Dot) | Some(Token::DotDot)
        )
    }

    fn step(&mut self) -> Result<Step, CoreError> {
        let (axis, name) = match self.peek().cloned() {
            Some(Token::Dot) => {
                self.pos += 1;
                (Axis::SelfNode, None)
            }
            Some(Token::DotDot) => {
                self.pos += 1;
                (Axis::Parent, None)
            }
            Some(Token::Star) => {
                self.pos += 1;
                (Axis::Child, None)
            }
            Some(Token::Name(name)) => {
                self.pos += 1;
                (Axis::Child, Some(name))
            }
            _ => return Err(self.error("expected a location step")),
        };
        let predicates = self.predicates()?;
        Ok(Step {
            axis,
            name,
            predicates,
        })
    }

    fn predicates(&mut self) -> Result<Vec<Expr>, CoreError> {
        let mut predicates = Vec::new();
        while self.eat(&Token::LBracket) {
            predicates.push(self.or_expr()?);
            self.expect(&Token::RBracket)?;
        }
        Ok(predicates)
    }

    fn or_expr(&mut self) -> Result<Expr, CoreError> {
        let mut left = self.and_expr()?;
        while self.peek() == Some(&Token::Name("or".to_string())) {
            self.pos += 1;
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, CoreError> {
        let mut left = self.eq_expr()?;
        while self.peek() == Some(&Token::Name("and".to_string())) {
            self.pos += 1;
            let right = self.eq_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn eq_expr(&mut self) -> Result<Expr, CoreError> {
        let left = self.primary()?;
        if self.eat(&Token::Eq) {
            let right = self.primary()?;
            return Ok(Expr::Eq(Box::new(left), Box::new(right), false));
        }
        if self.eat(&Token::NotEq) {
            let right = self.primary()?;
            return Ok(Expr::Eq(Box::new(left), Box::new(right), true));
        }
        Ok(left)
    }

    fn primary(&mut self) -> Result<Expr, CoreError> {
        match self.peek().cloned() {
            Some(Token::At) => {
                self.pos += 1;
                match self.peek().cloned() {
                    Some(Token::Name(name)) => {
                        self.pos += 1;
                        Ok(Expr::Attr(name))
                    }
                    _ => Err(self.error("expected attribute name")),
                }
            }
            Some(Token::Str(s)) => {
                self.pos += 1;
                Ok(Expr::Literal(s))
            }
            Some(Token::Num(n)) => {
                self.pos += 1;
                Ok(Expr::Number(n))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.or_expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Name(name)) if self.tokens.get(self.pos + 1) == Some(&Token::LParen) => {
                self.pos += 2;
                let mut args = Vec::new();
                if !self.eat(&Token::RParen) {
                    loop {
                        args.push(self.or_expr()?);
                        if self.eat(&Token::RParen) {
                            break;
                        }
                        self.expect(&Token::Comma)?;
                    }
                }
                Ok(Expr::Call(name, args))
            }
            _ => Ok(Expr::Path(self.path()?)),
        }
    }
}

fn descendant_step() -> Step {
    Step {
        axis: Axis::DescendantOrSelf,
        name: None,
        predicates: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::parse_xml;

    fn tree() -> Element {
        parse_xml(
            r#"<form>
                <sheet>
                    <group name="main">
                        <field name="name"/>
                        <field name="price"/>
                    </group>
                    <group name="extra" class="o_extra o_wide">
                        <field name="note"/>
                        <label for="note">Note</label>
                    </group>
                </sheet>
            </form>"#,
            "t",
        )
        .unwrap()
    }

    fn names(root: &Element, expr: &str) -> Vec<String> {
        XPath::parse(expr)
            .unwrap()
            .select(root)
            .into_iter()
            .map(|p| {
                let el = root.get(&p).unwrap();
                el.attr("name").or(el.attr("for")).unwrap_or(&el.tag).to_string()
            })
            .collect()
    }

    #[test]
    fn test_descendant_with_attribute_predicate() {
        let root = tree();
        assert_eq!(names(&root, "//field[@name='price']"), vec!["price"]);
        assert_eq!(names(&root, "//field"), vec!["name", "price", "note"]);
    }

    #[test]
    fn test_absolute_and_parent_steps() {
        let root = tree();
        assert_eq!(names(&root, "/form/sheet/group[2]/field"), vec!["note"]);
        assert_eq!(names(&root, "//field[@name='note']/.."), vec!["extra"]);
        assert_eq!(names(&root, "/form"), vec!["form"]);
        assert!(names(&root, "/sheet").is_empty());
    }

    #[test]
    fn test_positional_and_last() {
        let root = tree();
        assert_eq!(names(&root, "//group[last()]"), vec!["extra"]);
        assert_eq!(names(&root, "(//field)[2]"), vec!["price"]);
        assert_eq!(names(&root, "//group/field[1]"), vec!["name", "note"]);
    }

    #[test]
    fn test_functions_and_nested_paths() {
        let root = tree();
        assert_eq!(names(&root, "//group[hasclass('o_extra')]"), vec!["extra"]);
        assert_eq!(names(&root, "//group[field[@name='name']]"), vec!["main"]);
        assert_eq!(names(&root, "//label[text()='Note']"), vec!["note"]);
        assert_eq!(
            names(&root, "//field[starts-with(@name, 'p') or @name='note']"),
            vec!["price", "note"]
        );
        assert_eq!(names(&root, "//field[not(@name='name')]"), vec!["price", "note"]);
        assert_eq!(names(&root, "//*[@name!='main'][contains(@class, 'wide')]"), vec!["extra"]);
    }

    #[test]
    fn test_relative_to_root_element() {
        let root = tree();
        assert_eq!(names(&root, "."), vec!["form"]);
        assert_eq!(names(&root, "sheet/group[@name='main']"), vec!["main"]);
    }

    #[test]
    fn test_parse_errors() {
        assert!(XPath::parse("//field[@name='x'").is_err());
        assert!(XPath::parse("//field[@name='x]").is_err());
        assert!(XPath::parse("//field]").is_err());
    }
}
