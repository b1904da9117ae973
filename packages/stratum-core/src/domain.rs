//! Search domains: prefix-notation filter expressions over field paths.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::CoreError;
use crate::expr::{parse_literal, Literal};

/// Comparison operator of a domain leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Like,
    ILike,
    NotLike,
    NotILike,
    EqLike,
    EqILike,
    /// `=?`: true when the right operand is unset
    EqOrUnset,
}

impl Operator {
    fn parse(text: &str) -> Option<Self> {
        Some(match text {
            "=" | "==" => Operator::Eq,
            "!=" | "<>" => Operator::Ne,
            "<" => Operator::Lt,
            "<=" => Operator::Le,
            ">" => Operator::Gt,
            ">=" => Operator::Ge,
            "in" => Operator::In,
            "not in" => Operator::NotIn,
            "like" => Operator::Like,
            "ilike" => Operator::ILike,
            "not like" => Operator::NotLike,
            "not ilike" => Operator::NotILike,
            "=like" => Operator::EqLike,
            "=ilike" => Operator::EqILike,
            "=?" => Operator::EqOrUnset,
            _ => return None,
        })
    }
}

/// Right-hand side of a condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Constant value
    Value(Value),
    /// Unresolved expression (e.g. `uid`, `parent.company_id`)
    Expr(Literal),
}

/// Domain leaf: `(path, operator, operand)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub path: String,
    pub operator: Operator,
    pub operand: Operand,
}

/// Parsed domain.
#[derive(Debug, Clone, PartialEq)]
pub enum Domain {
    True,
    False,
    Leaf(Condition),
    And(Vec<Domain>),
    Or(Vec<Domain>),
    Not(Box<Domain>),
}

enum Item {
    And,
    Or,
    Not,
    Leaf(Condition),
    Constant(bool),
}

impl Domain {
    /// Parses domain source text such as `[('state', '=', 'done')]`.
    pub fn parse(source: &str) -> Result<Self, CoreError> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Ok(Domain::True);
        }
        let literal = parse_literal(trimmed).map_err(|e| bad(source, &e.to_string()))?;
        Self::from_literal(&literal, source)
    }

    /// Builds a domain from an already parsed literal list.
    pub fn from_literal(literal: &Literal, source: &str) -> Result<Self, CoreError> {
        let Literal::List(items) = literal else {
            return Err(bad(source, "a domain must be a list"));
        };
        let mut parsed = Vec::with_capacity(items.len());
        for item in items {
            parsed.push(match item {
                Literal::Str(op) if op == "&" => Item::And,
                Literal::Str(op) if op == "|" => Item::Or,
                Literal::Str(op) if op == "!" => Item::Not,
                Literal::Tuple(parts) | Literal::List(parts) => leaf(parts, source)?,
                other => return Err(bad(source, &format!("unexpected domain item {:?}", other))),
            });
        }

        // Prefix notation: evaluate right to left with an operand stack.
        let mut stack: Vec<Domain> = Vec::new();
        for item in parsed.into_iter().rev() {
            match item {
                Item::Leaf(c) => stack.push(Domain::Leaf(c)),
                Item::Constant(true) => stack.push(Domain::True),
                Item::Constant(false) => stack.push(Domain::False),
                Item::Not => {
                    let operand = stack.pop().ok_or_else(|| bad(source, "'!' without operand"))?;
                    stack.push(Domain::Not(Box::new(operand)));
                }
                Item::And | Item::Or => {
                    let is_and = matches!(item, Item::And);
                    let first = stack.pop();
                    let second = stack.pop();
                    let (Some(a), Some(b)) = (first, second) else {
                        return Err(bad(source, "binary operator without two operands"));
                    };
                    stack.push(if is_and {
                        Domain::And(vec![a, b])
                    } else {
                        Domain::Or(vec![a, b])
                    });
                }
            }
        }
        stack.reverse();
        Ok(match stack.len() {
            0 => Domain::True,
            1 => stack.remove(0),
            _ => Domain::And(stack),
        })
    }

    /// Conjunction of domains, dropping trivially true members.
    pub fn and(parts: Vec<Domain>) -> Domain {
        let parts: Vec<Domain> = parts.into_iter().filter(|d| *d != Domain::True).collect();
        match parts.len() {
            0 => Domain::True,
            1 => parts.into_iter().next().unwrap_or(Domain::True),
            _ => Domain::And(parts),
        }
    }

    /// Disjunction of domains, dropping trivially false members.
    pub fn or(parts: Vec<Domain>) -> Domain {
        if parts.iter().any(|d| *d == Domain::True) {
            return Domain::True;
        }
        let parts: Vec<Domain> = parts.into_iter().filter(|d| *d != Domain::False).collect();
        match parts.len() {
            0 => Domain::False,
            1 => parts.into_iter().next().unwrap_or(Domain::False),
            _ => Domain::Or(parts),
        }
    }

    /// Every field path referenced by a leaf.
    pub fn field_paths(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_paths(&mut out);
        out
    }

    fn collect_paths<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Domain::Leaf(c) => out.push(c.path.as_str()),
            Domain::And(parts) | Domain::Or(parts) => parts.iter().for_each(|p| p.collect_paths(out)),
            Domain::Not(inner) => inner.collect_paths(out),
            Domain::True | Domain::False => {}
        }
    }

    /// Every unresolved name used as an operand.
    pub fn operand_names(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.visit_leaves(&mut |c| {
            if let Operand::Expr(lit) = &c.operand {
                collect_literal_names(lit, &mut out);
            }
        });
        out
    }

    fn visit_leaves<F: FnMut(&Condition)>(&self, f: &mut F) {
        match self {
            Domain::Leaf(c) => f(c),
            Domain::And(parts) | Domain::Or(parts) => parts.iter().for_each(|p| p.visit_leaves(f)),
            Domain::Not(inner) => inner.visit_leaves(f),
            Domain::True | Domain::False => {}
        }
    }

    /// Replaces expression operands using `context` (e.g. `uid`).
    pub fn bind(&self, context: &BTreeMap<String, Value>) -> Result<Domain, CoreError> {
        Ok(match self {
            Domain::Leaf(c) => {
                let operand = match &c.operand {
                    Operand::Value(v) => Operand::Value(v.clone()),
                    Operand::Expr(lit) => Operand::Value(lit.to_json(&mut |l| match l {
                        Literal::Name(name) => context.get(name).cloned().ok_or_else(|| CoreError::BadDomain {
                            domain: format!("{:?}", c),
                            reason: format!("unbound name '{}'", name),
                        }),
                        other => Err(CoreError::BadDomain {
                            domain: format!("{:?}", c),
                            reason: format!("unsupported expression {:?}", other),
                        }),
                    })?),
                };
                Domain::Leaf(Condition {
                    path: c.path.clone(),
                    operator: c.operator,
                    operand,
                })
            }
            Domain::And(parts) => Domain::And(parts.iter().map(|p| p.bind(context)).collect::<Result<_, _>>()?),
            Domain::Or(parts) => Domain::Or(parts.iter().map(|p| p.bind(context)).collect::<Result<_, _>>()?),
            Domain::Not(inner) => Domain::Not(Box::new(inner.bind(context)?)),
            Domain::True => Domain::True,
            Domain::False => Domain::False,
        })
    }

    /// Evaluates the domain; `resolve` returns the values found at a field path
    /// (several for to-many paths, none for an unset value).
    pub fn matches<F>(&self, resolve: &F) -> Result<bool, CoreError>
    where
        F: Fn(&str) -> Result<Vec<Value>, CoreError>,
    {
        Ok(match self {
            Domain::True => true,
            Domain::False => false,
            Domain::Not(inner) => !inner.matches(resolve)?,
            Domain::And(parts) => {
                for part in parts {
                    if !part.matches(resolve)? {
                        return Ok(false);
                    }
                }
                true
            }
            Domain::Or(parts) => {
                for part in parts {
                    if part.matches(resolve)? {
                        return Ok(true);
                    }
                }
                false
            }
            Domain::Leaf(c) => {
                let Operand::Value(expected) = &c.operand else {
                    return Err(CoreError::BadDomain {
                        domain: format!("{:?}", c),
                        reason: "operand must be bound before evaluation".to_string(),
                    });
                };
                let values = resolve(&c.path)?;
                compare(&values, c.operator, expected)
            }
        })
    }
}

fn collect_literal_names(lit: &Literal, out: &mut Vec<String>) {
    match lit {
        Literal::Name(n) => out.push(n.split('.').next().unwrap_or(n).to_string()),
        Literal::List(items) | Literal::Tuple(items) | Literal::Call(_, items) => {
            items.iter().for_each(|i| collect_literal_names(i, out))
        }
        Literal::Dict(pairs) => pairs.iter().for_each(|(_, v)| collect_literal_names(v, out)),
        _ => {}
    }
}

fn bad(source: &str, reason: &str) -> CoreError {
    CoreError::BadDomain {
        domain: source.to_string(),
        reason: reason.to_string(),
    }
}

fn leaf(parts: &[Literal], source: &str) -> Result<Item, CoreError> {
    if let [Literal::Int(a), Literal::Str(op), Literal::Int(b)] = parts {
        // (1, '=', 1) and (0, '=', 1) are the canonical constant leaves
        if op == "=" {
            return Ok(Item::Constant(a == b));
        }
    }
    let [Literal::Str(path), Literal::Str(op), operand] = parts else {
        return Err(bad(source, &format!("malformed leaf {:?}", parts)));
    };
    let operator = Operator::parse(op).ok_or_else(|| bad(source, &format!("unknown operator '{}'", op)))?;
    let operand = match operand.to_constant(source) {
        Ok(value) => Operand::Value(value),
        Err(_) => Operand::Expr(operand.clone()),
    };
    Ok(Item::Leaf(Condition {
        path: path.clone(),
        operator,
        operand,
    }))
}

fn is_unset(value: &Value) -> bool {
    matches!(value, Value::Null | Value::Bool(false))
}

fn compare(values: &[Value], operator: Operator, expected: &Value) -> bool {
    let present: Vec<&Value> = values.iter().filter(|v| !is_unset(v)).collect();
    match operator {
        Operator::EqOrUnset if is_unset(expected) => true,
        Operator::Eq | Operator::EqOrUnset => {
            if is_unset(expected) {
                present.is_empty()
            } else {
                present.iter().any(|v| json_eq(v, expected))
            }
        }
        Operator::Ne => {
            if is_unset(expected) {
                !present.is_empty()
            } else {
                !present.iter().any(|v| json_eq(v, expected))
            }
        }
        Operator::In | Operator::NotIn => {
            let candidates: Vec<&Value> = match expected {
                Value::Array(items) => items.iter().collect(),
                other => vec![other],
            };
            let unset_wanted = candidates.iter().any(|c| is_unset(c));
            let hit = present.iter().any(|v| candidates.iter().any(|c| json_eq(v, c)))
                || (unset_wanted && present.is_empty());
            hit == (operator == Operator::In)
        }
        Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge => present.iter().any(|v| {
            match json_cmp(v, expected) {
                Some(ordering) => match operator {
                    Operator::Lt => ordering.is_lt(),
                    Operator::Le => ordering.is_le(),
                    Operator::Gt => ordering.is_gt(),
                    _ => ordering.is_ge(),
                },
                None => false,
            }
        }),
        Operator::Like | Operator::ILike | Operator::NotLike | Operator::NotILike => {
            let needle = as_text(expected);
            let insensitive = matches!(operator, Operator::ILike | Operator::NotILike);
            let hit = present.iter().any(|v| {
                let hay = as_text(v);
                if insensitive {
                    hay.to_lowercase().contains(&needle.to_lowercase())
                } else {
                    hay.contains(&needle)
                }
            });
            hit == matches!(operator, Operator::Like | Operator::ILike)
        }
        Operator::EqLike | Operator::EqILike => {
            let pattern = as_text(expected);
            let insensitive = operator == Operator::EqILike;
            present.iter().any(|v| {
                let text = as_text(v);
                if insensitive {
                    like_match(&pattern.to_lowercase(), &text.to_lowercase())
                } else {
                    like_match(&pattern, &text)
                }
            })
        }
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
        _ => a == b,
    }
}

fn json_cmp(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

/// SQL LIKE matching with `%` and `_` wildcards.
fn like_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let mut dp = vec![vec![false; t.len() + 1]; p.len() + 1];
    dp[0][0] = true;
    for i in 1..=p.len() {
        if p[i - 1] == '%' {
            dp[i][0] = dp[i - 1][0];
        }
        for j in 1..=t.len() {
            dp[i][j] = match p[i - 1] {
                '%' => dp[i - 1][j] || dp[i][j - 1],
                '_' => dp[i - 1][j - 1],
                c => dp[i - 1][j - 1] && c == t[j - 1],
            };
        }
    }
    dp[p.len()][t.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(values: Value) -> impl Fn(&str) -> Result<Vec<Value>, CoreError> {
        move |path: &str| {
            Ok(match values.get(path) {
                Some(Value::Array(items)) => items.clone(),
                Some(v) => vec![v.clone()],
                None => Vec::new(),
            })
        }
    }

    #[test]
    fn test_prefix_notation() {
        let domain = Domain::parse("['|', ('a', '=', 1), ('b', '=', 2), ('c', '!=', False)]").unwrap();
        match &domain {
            Domain::And(parts) => {
                assert_eq!(parts.len(), 2);
                assert!(matches!(parts[0], Domain::Or(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(domain.field_paths(), vec!["a", "b", "c"]);

        assert!(domain.matches(&record(json!({"a": 1, "c": "x"}))).unwrap());
        assert!(!domain.matches(&record(json!({"a": 1}))).unwrap());
        assert!(!domain.matches(&record(json!({"a": 3, "b": 3, "c": "x"}))).unwrap());
    }

    #[test]
    fn test_operators() {
        let rec = record(json!({"name": "Blue Widget", "qty": 5, "tags": [1, 3]}));
        let check = |src: &str| Domain::parse(src).unwrap().matches(&rec).unwrap();
        assert!(check("[('name', 'ilike', 'blue')]"));
        assert!(!check("[('name', 'like', 'blue')]"));
        assert!(check("[('name', '=like', 'Blue%')]"));
        assert!(check("[('qty', '>=', 5), ('qty', '<', 6)]"));
        assert!(check("[('tags', 'in', [3, 4])]"));
        assert!(check("[('tags', 'not in', [7])]"));
        assert!(check("[('missing', '=', False)]"));
        assert!(check("['!', ('qty', '=', 4)]"));
        assert!(check("[(1, '=', 1)]"));
        assert!(!check("[(0, '=', 1)]"));
    }

    #[test]
    fn test_bind_names() {
        let domain = Domain::parse("[('user_id', '=', uid)]").unwrap();
        assert_eq!(domain.operand_names(), vec!["uid"]);
        assert!(domain.matches(&record(json!({"user_id": 2}))).is_err());

        let mut ctx = BTreeMap::new();
        ctx.insert("uid".to_string(), json!(2));
        let bound = domain.bind(&ctx).unwrap();
        assert!(bound.matches(&record(json!({"user_id": 2}))).unwrap());
        assert!(!bound.matches(&record(json!({"user_id": 3}))).unwrap());
    }

    #[test]
    fn test_malformed_domains() {
        assert_eq!(Domain::parse("('a', '=', 1)").unwrap_err().kind(), "BadDomain");
        assert_eq!(Domain::parse("[('a', 'equals', 1)]").unwrap_err().kind(), "BadDomain");
        assert_eq!(Domain::parse("['|', ('a', '=', 1)]").unwrap_err().kind(), "BadDomain");
        assert_eq!(Domain::parse("[('a', '=')]").unwrap_err().kind(), "BadDomain");
    }

    #[test]
    fn test_combinators() {
        let a = Domain::parse("[('a', '=', 1)]").unwrap();
        assert_eq!(Domain::and(vec![Domain::True, a.clone()]), a);
        assert_eq!(Domain::or(vec![Domain::False, a.clone()]), a);
        assert_eq!(Domain::or(vec![Domain::True, a]), Domain::True);
        assert_eq!(Domain::or(Vec::new()), Domain::False);
    }
}
