//! Label selector evaluation.
//!
//! Structured selectors (`LabelSelector`) are evaluated directly; the string
//! form used on list calls (`app=web,tier in (a,b),!legacy`) is rendered with
//! [`to_query`] and can be evaluated with [`matches_query`].

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectorError {
    #[error("unknown operator {op:?} for key {key:?}")]
    UnknownOperator { key: String, op: String },
    #[error("operator {op} for key {key:?} requires values")]
    MissingValues { key: String, op: String },
    #[error("operator {op} for key {key:?} takes no values")]
    UnexpectedValues { key: String, op: String },
    #[error("invalid selector term {0:?}")]
    Parse(String),
}

pub type Labels = BTreeMap<String, String>;

/// A selector with neither labels nor expressions selects everything.
pub fn is_empty(selector: &LabelSelector) -> bool {
    selector.match_labels.as_ref().map_or(true, |m| m.is_empty())
        && selector.match_expressions.as_ref().map_or(true, |e| e.is_empty())
}

pub fn validate(selector: &LabelSelector) -> Result<(), SelectorError> {
    for req in selector.match_expressions.iter().flatten() {
        validate_requirement(req)?;
    }
    Ok(())
}

fn validate_requirement(req: &LabelSelectorRequirement) -> Result<(), SelectorError> {
    let has_values = req.values.as_ref().map_or(false, |v| !v.is_empty());
    match req.operator.as_str() {
        "In" | "NotIn" if !has_values => {
            Err(SelectorError::MissingValues { key: req.key.clone(), op: req.operator.clone() })
        }
        "Exists" | "DoesNotExist" if has_values => {
            Err(SelectorError::UnexpectedValues { key: req.key.clone(), op: req.operator.clone() })
        }
        "In" | "NotIn" | "Exists" | "DoesNotExist" => Ok(()),
        other => Err(SelectorError::UnknownOperator { key: req.key.clone(), op: other.to_string() }),
    }
}

/// Evaluate `selector` against a label set. Malformed selectors are an
/// error, never a silent match or miss.
pub fn matches(selector: &LabelSelector, labels: &Labels) -> Result<bool, SelectorError> {
    validate(selector)?;
    if let Some(ml) = &selector.match_labels {
        for (k, v) in ml {
            if labels.get(k) != Some(v) {
                return Ok(false);
            }
        }
    }
    for req in selector.match_expressions.iter().flatten() {
        let current = labels.get(&req.key);
        let values = req.values.as_deref().unwrap_or(&[]);
        let ok = match req.operator.as_str() {
            "In" => current.map_or(false, |v| values.contains(v)),
            "NotIn" => current.map_or(true, |v| !values.contains(v)),
            "Exists" => current.is_some(),
            _ => current.is_none(),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Render a selector into list-call query form.
pub fn to_query(selector: &LabelSelector) -> Result<String, SelectorError> {
    validate(selector)?;
    let mut terms: Vec<String> = Vec::new();
    for (k, v) in selector.match_labels.iter().flatten() {
        terms.push(format!("{}={}", k, v));
    }
    for req in selector.match_expressions.iter().flatten() {
        let values = req.values.as_deref().unwrap_or(&[]).join(",");
        terms.push(match req.operator.as_str() {
            "In" => format!("{} in ({})", req.key, values),
            "NotIn" => format!("{} notin ({})", req.key, values),
            "Exists" => req.key.clone(),
            _ => format!("!{}", req.key),
        });
    }
    Ok(terms.join(","))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Term {
    Eq(String, String),
    NotEq(String, String),
    In(String, Vec<String>),
    NotIn(String, Vec<String>),
    Exists(String),
    DoesNotExist(String),
}

fn split_terms(query: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, ch) in query.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                out.push(&query[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&query[start..]);
    out.into_iter().map(str::trim).filter(|t| !t.is_empty()).collect()
}

fn parse_set(key: &str, rest: &str, raw: &str) -> Result<(String, Vec<String>), SelectorError> {
    let inner = rest
        .trim()
        .strip_prefix('(')
        .and_then(|r| r.strip_suffix(')'))
        .ok_or_else(|| SelectorError::Parse(raw.to_string()))?;
    let values: Vec<String> = inner.split(',').map(|v| v.trim().to_string()).filter(|v| !v.is_empty()).collect();
    if values.is_empty() {
        return Err(SelectorError::Parse(raw.to_string()));
    }
    Ok((key.trim().to_string(), values))
}

fn parse_term(raw: &str) -> Result<Term, SelectorError> {
    if let Some(key) = raw.strip_prefix('!') {
        return Ok(Term::DoesNotExist(key.trim().to_string()));
    }
    if let Some((key, rest)) = raw.split_once(" notin ") {
        let (k, v) = parse_set(key, rest, raw)?;
        return Ok(Term::NotIn(k, v));
    }
    if let Some((key, rest)) = raw.split_once(" in ") {
        let (k, v) = parse_set(key, rest, raw)?;
        return Ok(Term::In(k, v));
    }
    if let Some((k, v)) = raw.split_once("!=") {
        return Ok(Term::NotEq(k.trim().to_string(), v.trim().to_string()));
    }
    if let Some((k, v)) = raw.split_once("==").or_else(|| raw.split_once('=')) {
        return Ok(Term::Eq(k.trim().to_string(), v.trim().to_string()));
    }
    if raw.contains(char::is_whitespace) {
        return Err(SelectorError::Parse(raw.to_string()));
    }
    Ok(Term::Exists(raw.to_string()))
}

/// Evaluate a query-form selector. An empty query selects everything.
pub fn matches_query(query: &str, labels: &Labels) -> Result<bool, SelectorError> {
    for raw in split_terms(query) {
        let ok = match parse_term(raw)? {
            Term::Eq(k, v) => labels.get(&k) == Some(&v),
            Term::NotEq(k, v) => labels.get(&k) != Some(&v),
            Term::In(k, vs) => labels.get(&k).map_or(false, |v| vs.contains(v)),
            Term::NotIn(k, vs) => labels.get(&k).map_or(true, |v| !vs.contains(v)),
            Term::Exists(k) => labels.contains_key(&k),
            Term::DoesNotExist(k) => !labels.contains_key(&k),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terms_split_outside_parentheses() {
        assert_eq!(split_terms("a=b, c in (x,y),!d"), vec!["a=b", "c in (x,y)", "!d"]);
        assert!(split_terms("").is_empty());
    }

    #[test]
    fn term_parsing() {
        assert_eq!(parse_term("a==b").unwrap(), Term::Eq("a".into(), "b".into()));
        assert_eq!(parse_term("a!=b").unwrap(), Term::NotEq("a".into(), "b".into()));
        assert_eq!(parse_term("a notin (x)").unwrap(), Term::NotIn("a".into(), vec!["x".into()]));
        assert_eq!(parse_term("!a").unwrap(), Term::DoesNotExist("a".into()));
        assert!(parse_term("a in x").is_err());
        assert!(parse_term("a in ()").is_err());
    }
}
