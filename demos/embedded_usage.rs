//! Minimal embedding example for domainmanager-core
//!
//! Drives a DomainManager from an application-owned channel of node events,
//! publishing into two in-memory handlers: a grouped one for example.com and
//! a single-record one for everything else. The manager lifecycle is fully
//! managed by the application.

use domainmanager_core::traits::{HandlerShape, NodeEvent, NodeEventSource, NodeSnapshot, RecordType};
use domainmanager_core::{
    DomainHandler, DomainManager, DomainManagerConfig, MemoryDomainHandler, Result,
};
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Node event source fed by the application
struct ChannelSource {
    rx: Mutex<Option<mpsc::UnboundedReceiver<NodeEvent>>>,
}

impl ChannelSource {
    fn new() -> (Self, mpsc::UnboundedSender<NodeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                rx: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

impl NodeEventSource for ChannelSource {
    fn watch(&self) -> Pin<Box<dyn Stream<Item = NodeEvent> + Send + 'static>> {
        match self.rx.lock().ok().and_then(|mut rx| rx.take()) {
            Some(rx) => Box::pin(UnboundedReceiverStream::new(rx)),
            None => Box::pin(tokio_stream::empty()),
        }
    }
}

/// Host resolver for nodes that always carry explicit addresses
struct NoLookups;

#[async_trait::async_trait]
impl domainmanager_core::HostResolver for NoLookups {
    async fn resolve(&self, hostname: &str) -> Result<Vec<IpAddr>> {
        Err(domainmanager_core::Error::address_resolution(format!(
            "No lookups in this demo: {}",
            hostname
        )))
    }
}

fn node(name: &str, addr: [u8; 4], domains: &[&str]) -> NodeSnapshot {
    let mut node = NodeSnapshot::new(name).with_address(IpAddr::from(addr));
    for domain in domains {
        node = node.with_annotation(format!("{}/domainmanager", domain), "true");
    }
    node
}

async fn print_records(label: &str, handler: &MemoryDomainHandler, domains: &[&str]) {
    for domain in domains {
        println!(
            "   [{}] {} A = {:?}",
            label,
            domain,
            handler.addresses(domain, RecordType::A).await
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::WARN).init();

    println!("=== Embedded domainmanager-core Example ===\n");

    let grouped = Arc::new(MemoryDomainHandler::with_zones(
        "grouped",
        HandlerShape::Grouped,
        ["example.com"],
    ));
    let single = Arc::new(MemoryDomainHandler::new("single", HandlerShape::Single));

    println!("1. Creating manager...");
    let (mut manager, mut event_rx) = DomainManager::new(
        vec![
            grouped.clone() as Arc<dyn DomainHandler>,
            single.clone() as Arc<dyn DomainHandler>,
        ],
        Box::new(NoLookups),
        DomainManagerConfig::new(),
    )?;

    let event_listener = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            println!("   [Event] {:?}", event);
        }
    });

    let (source, node_tx) = ChannelSource::new();
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    println!("2. Starting manager in background...");
    let manager_handle = tokio::spawn(async move {
        let result = manager.run_with_shutdown(&source, Some(shutdown_rx)).await;
        (manager, result)
    });

    println!("3. Two nodes claim www.example.com, one also claims api.example.org\n");
    let _ = node_tx.send(NodeEvent::Added {
        node: node("node-a", [10, 0, 0, 1], &["www.example.com", "api.example.org"]),
    });
    let _ = node_tx.send(NodeEvent::Added {
        node: node("node-b", [10, 0, 0, 2], &["www.example.com"]),
    });
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

    print_records("grouped", &grouped, &["www.example.com"]).await;
    print_records("single", &single, &["api.example.org"]).await;

    println!("\n4. node-a leaves the cluster\n");
    let _ = node_tx.send(NodeEvent::Removed {
        name: "node-a".to_string(),
    });
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

    print_records("grouped", &grouped, &["www.example.com"]).await;
    print_records("single", &single, &["api.example.org"]).await;

    println!("\n5. Stopping manager...");
    let _ = shutdown_tx.send(());
    if let Ok((manager, result)) = manager_handle.await {
        result?;
        println!("   Nodes still known: {}", manager.nodes().len());
        for (zone, binding) in manager.resolver().bindings().await {
            println!("   Zone {}: {:?}", zone, binding);
        }
    }

    let _ = tokio::time::timeout(tokio::time::Duration::from_millis(100), event_listener).await;

    println!("\n=== Embedding Successful ===");
    println!("Key Points:");
    println!("- Manager lifecycle is fully controlled by application");
    println!("- All caches live inside the manager instance");
    println!("- Node events come from an application-owned source");

    Ok(())
}
