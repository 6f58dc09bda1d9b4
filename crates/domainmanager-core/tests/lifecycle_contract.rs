//! Contract Test: Node Lifecycle
//!
//! This test verifies how typed node events move nodes through the cache.
//!
//! Constraints verified:
//! - Removal retires every claim before the node is dropped
//! - Updates for unknown nodes admit them
//! - Removals for unknown nodes are ignored
//! - Monitoring events describe what happened
//!
//! If this test fails, records of departed nodes linger in DNS.

mod common;

use common::*;
use domainmanager_core::traits::{DomainHandler, HandlerShape, NodeEvent, NodeSnapshot, RecordType};
use domainmanager_core::{ManagerEvent, MutationKind};
use std::sync::Arc;

fn snapshot(name: &str, addr: &str, domains: &[&str]) -> NodeSnapshot {
    let mut node = NodeSnapshot::new(name).with_address(ip(addr));
    for domain in domains {
        node = node.with_annotation(format!("{}/domainmanager", domain), "true");
    }
    node
}

#[tokio::test]
async fn removal_retires_every_claim() {
    let handler = RecordingHandler::new("recording", HandlerShape::Single);
    let (mut manager, _event_rx) = manager(vec![handler.clone() as Arc<dyn DomainHandler>]);

    manager
        .handle_event(NodeEvent::Added {
            node: snapshot("n1", "10.0.0.1", &["a.example.com", "b.example.com"]),
        })
        .await;
    handler.clear_calls();

    manager
        .handle_event(NodeEvent::Removed {
            name: "n1".to_string(),
        })
        .await;

    assert_eq!(
        handler.calls(),
        vec![
            Call::Delete {
                domain: "a.example.com".to_string(),
                record_type: RecordType::A,
                addr: ip("10.0.0.1"),
            },
            Call::Delete {
                domain: "b.example.com".to_string(),
                record_type: RecordType::A,
                addr: ip("10.0.0.1"),
            },
        ]
    );
    assert!(manager.node("n1").is_none());
}

#[tokio::test]
async fn update_for_unknown_node_admits_it() {
    let handler = RecordingHandler::new("recording", HandlerShape::Single);
    let (mut manager, _event_rx) = manager(vec![handler.clone() as Arc<dyn DomainHandler>]);

    manager
        .handle_event(NodeEvent::Updated {
            node: snapshot("n1", "10.0.0.1", &["a.example.com"]),
        })
        .await;

    assert!(manager.node("n1").is_some());
    assert_eq!(handler.calls().len(), 1);
}

#[tokio::test]
async fn removal_of_unknown_node_is_ignored() {
    let handler = RecordingHandler::new("recording", HandlerShape::Single);
    let (mut manager, mut event_rx) = manager(vec![handler.clone() as Arc<dyn DomainHandler>]);

    let outcomes = manager.remove("ghost").await;

    assert!(outcomes.is_empty());
    assert_eq!(handler.responsibility_checks(), 0);
    assert!(drain(&mut event_rx).is_empty());
}

#[tokio::test]
async fn hostname_label_drives_resolution() {
    let resolver = StaticHostResolver::new();
    resolver.set("worker-1.internal", &["10.0.0.7"]);
    let handler = RecordingHandler::new("recording", HandlerShape::Single);
    let (mut manager, _event_rx) =
        manager_with_resolver(vec![handler.clone() as Arc<dyn DomainHandler>], &resolver);

    let node = NodeSnapshot::new("worker-1")
        .with_label("kubernetes.io/hostname", "worker-1.internal")
        .with_annotation("a.example.com/domainmanager", "true");
    manager.handle_event(NodeEvent::Added { node }).await;

    let record = manager.node("worker-1").expect("node admitted");
    assert_eq!(record.hostname, "worker-1.internal");
    assert_eq!(
        handler.published("a.example.com", RecordType::A).await,
        strings(&["10.0.0.7"])
    );
}

#[tokio::test]
async fn hostname_change_with_same_addresses_is_recorded() {
    let resolver = StaticHostResolver::new();
    resolver.set("worker-1.internal", &["10.0.0.7"]);
    resolver.set("worker-1.lan", &["10.0.0.7"]);
    let handler = RecordingHandler::new("recording", HandlerShape::Single);
    let (mut manager, _event_rx) =
        manager_with_resolver(vec![handler.clone() as Arc<dyn DomainHandler>], &resolver);
    let claims = claiming(&["a.example.com"]);

    manager.upsert("worker-1", "worker-1.internal", &[], &claims).await;
    handler.clear_calls();

    let outcomes = manager.upsert("worker-1", "worker-1.lan", &[], &claims).await;

    assert!(outcomes.is_empty());
    assert!(handler.calls().is_empty());
    let record = manager.node("worker-1").expect("node cached");
    assert_eq!(record.hostname, "worker-1.lan");
    assert_eq!(record.addresses.len(), 1);
}

#[tokio::test]
async fn events_describe_the_lifecycle() {
    let handler = RecordingHandler::new("recording", HandlerShape::Single);
    let (mut manager, mut event_rx) = manager(vec![handler.clone() as Arc<dyn DomainHandler>]);

    manager
        .upsert("n1", "n1", &ips(&["10.0.0.1"]), &claiming(&["a.example.com"]))
        .await;
    manager.remove("n1").await;

    let events = drain(&mut event_rx);
    assert_eq!(
        events,
        vec![
            ManagerEvent::NodeAdmitted {
                node: "n1".to_string(),
                claims_count: 1,
            },
            ManagerEvent::ClaimsChanged {
                node: "n1".to_string(),
                added: vec!["a.example.com".to_string()],
                removed: Vec::new(),
            },
            ManagerEvent::MutationApplied {
                node: "n1".to_string(),
                domain: "a.example.com".to_string(),
                record_type: RecordType::A,
                kind: MutationKind::Create,
            },
            ManagerEvent::ClaimsChanged {
                node: "n1".to_string(),
                added: Vec::new(),
                removed: vec!["a.example.com".to_string()],
            },
            ManagerEvent::MutationApplied {
                node: "n1".to_string(),
                domain: "a.example.com".to_string(),
                record_type: RecordType::A,
                kind: MutationKind::Delete,
            },
            ManagerEvent::NodeRetired {
                node: "n1".to_string(),
            },
        ]
    );
}
