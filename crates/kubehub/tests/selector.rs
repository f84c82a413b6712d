#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use fleet_kubehub::selector::{self, Labels};
use fleet_kubehub::SelectorError;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};

fn labels(pairs: &[(&str, &str)]) -> Labels {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn req(key: &str, op: &str, values: &[&str]) -> LabelSelectorRequirement {
    LabelSelectorRequirement {
        key: key.into(),
        operator: op.into(),
        values: if values.is_empty() { None } else { Some(values.iter().map(|v| v.to_string()).collect()) },
    }
}

fn selector(ml: &[(&str, &str)], exprs: Vec<LabelSelectorRequirement>) -> LabelSelector {
    LabelSelector {
        match_labels: if ml.is_empty() { None } else { Some(ml.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<BTreeMap<_, _>>()) },
        match_expressions: if exprs.is_empty() { None } else { Some(exprs) },
    }
}

#[test]
fn empty_selector_matches_everything() {
    let sel = LabelSelector::default();
    assert!(selector::is_empty(&sel));
    assert!(selector::matches(&sel, &Labels::new()).unwrap());
    assert_eq!(selector::to_query(&sel).unwrap(), "");
}

#[test]
fn match_labels_and_expressions() {
    let sel = selector(
        &[("team", "obs")],
        vec![req("env", "In", &["prod", "stage"]), req("legacy", "DoesNotExist", &[]), req("tier", "NotIn", &["db"])],
    );
    assert!(selector::matches(&sel, &labels(&[("team", "obs"), ("env", "prod")])).unwrap());
    assert!(!selector::matches(&sel, &labels(&[("team", "obs"), ("env", "dev")])).unwrap());
    assert!(!selector::matches(&sel, &labels(&[("team", "obs"), ("env", "prod"), ("legacy", "1")])).unwrap());
    assert!(!selector::matches(&sel, &labels(&[("team", "obs"), ("env", "prod"), ("tier", "db")])).unwrap());
    assert!(!selector::matches(&sel, &labels(&[("env", "prod")])).unwrap());
}

#[test]
fn malformed_selectors_are_errors() {
    let bad_op = selector(&[], vec![req("a", "Near", &["x"])]);
    assert!(matches!(selector::matches(&bad_op, &Labels::new()), Err(SelectorError::UnknownOperator { .. })));
    let no_values = selector(&[], vec![req("a", "In", &[])]);
    assert!(matches!(selector::to_query(&no_values), Err(SelectorError::MissingValues { .. })));
    let extra_values = selector(&[], vec![req("a", "Exists", &["x"])]);
    assert!(matches!(selector::matches(&extra_values, &Labels::new()), Err(SelectorError::UnexpectedValues { .. })));
}

#[test]
fn query_form_agrees_with_structured_form() {
    let sel = selector(
        &[("app", "web")],
        vec![req("env", "In", &["prod", "stage"]), req("zone", "Exists", &[]), req("old", "DoesNotExist", &[])],
    );
    let q = selector::to_query(&sel).unwrap();
    assert_eq!(q, "app=web,env in (prod,stage),zone,!old");
    for l in [
        labels(&[("app", "web"), ("env", "prod"), ("zone", "a")]),
        labels(&[("app", "web"), ("env", "prod")]),
        labels(&[("app", "web"), ("env", "qa"), ("zone", "a")]),
        labels(&[("app", "web"), ("env", "stage"), ("zone", "a"), ("old", "y")]),
    ] {
        assert_eq!(selector::matches(&sel, &l).unwrap(), selector::matches_query(&q, &l).unwrap());
    }
}
