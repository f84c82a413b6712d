#![forbid(unsafe_code)]

use chrono::{DateTime, TimeZone, Utc};
use fleet_core::{Condition, ConditionStatus, ConditionType, NamespaceSet, ObjectKey};

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap()
}

#[test]
fn object_key_round_trips_through_display() {
    let k = ObjectKey::namespaced("monitoring", "main");
    assert_eq!(k.to_string(), "monitoring/main");
    assert_eq!(k.namespace(), Some("monitoring"));
    assert_eq!(k.name(), "main");
    assert_eq!("monitoring/main".parse::<ObjectKey>().unwrap(), k);

    let c: ObjectKey = "kube-system".parse().unwrap();
    assert_eq!(c.namespace(), None);
    assert_eq!(c.name(), "kube-system");

    assert!("".parse::<ObjectKey>().is_err());
    assert!("a/b/c".parse::<ObjectKey>().is_err());
    assert!("/b".parse::<ObjectKey>().is_err());
}

#[test]
fn empty_namespace_yields_cluster_key() {
    assert_eq!(ObjectKey::new(Some(""), "n"), ObjectKey::cluster("n"));
    assert_eq!(ObjectKey::new(None, "n").as_str(), "n");
}

#[test]
fn namespace_set_sentinel_rules() {
    assert!(NamespaceSet::all().is_all_namespaces());
    assert!(!NamespaceSet::all().mixes_all_namespaces());

    let mixed: NamespaceSet = ["", "default"].into_iter().collect();
    assert!(mixed.mixes_all_namespaces());
    assert!(!mixed.is_all_namespaces());

    let parsed = NamespaceSet::parse_list(" default, monitoring ,,");
    assert_eq!(parsed.len(), 2);
    assert!(parsed.contains("default"));
    assert!(parsed.contains("monitoring"));
    assert!(NamespaceSet::parse_list("").is_empty());
}

#[test]
fn transition_time_is_stable_while_status_holds() {
    let prev = vec![Condition::new(ConditionType::Available, ConditionStatus::True, "", "", Some(1), at(100))];

    // same status, different message: timestamp carried
    let next = Condition::new(ConditionType::Available, ConditionStatus::True, "", "now with words", Some(2), at(200))
        .carry_transition_time(&prev);
    assert_eq!(next.last_transition_time, at(100));

    // status changed: timestamp advances
    let next = Condition::new(ConditionType::Available, ConditionStatus::Degraded, "SomePodsNotReady", "", Some(2), at(300))
        .carry_transition_time(&prev);
    assert_eq!(next.last_transition_time, at(300));

    // a different type never borrows the timestamp
    let next = Condition::new(ConditionType::Reconciled, ConditionStatus::True, "", "", Some(2), at(400))
        .carry_transition_time(&prev);
    assert_eq!(next.last_transition_time, at(400));
}

#[test]
fn condition_serializes_with_kubernetes_field_names() {
    let c = Condition::new(ConditionType::Reconciled, ConditionStatus::Unknown, "NotFound", "", Some(3), at(0));
    let v = serde_json::to_value(&c).unwrap();
    assert_eq!(v["type"], "Reconciled");
    assert_eq!(v["status"], "Unknown");
    assert_eq!(v["observedGeneration"], 3);
    assert!(v.get("lastTransitionTime").is_some());
}
