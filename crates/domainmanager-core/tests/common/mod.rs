//! Test doubles and common utilities for contract tests
//!
//! The recording handler keeps real records (backed by the in-memory
//! handler) so reconciliation sees its own earlier mutations, and records
//! every provider call so tests can assert on exact call sequences.

#![allow(dead_code)]

use domainmanager_core::config::DomainManagerConfig;
use domainmanager_core::error::{Error, Result};
use domainmanager_core::handlers::MemoryDomainHandler;
use domainmanager_core::traits::{
    DomainHandler, DomainTarget, GroupedRecordApi, HandlerApi, HandlerShape, HostResolver,
    NodeEvent, NodeEventSource, ProviderRecord, RecordType, SingleRecordApi,
};
use domainmanager_core::{DomainManager, ManagerEvent};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::Stream;

/// One mutation call received by a [`RecordingHandler`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create {
        domain: String,
        record_type: RecordType,
        addr: IpAddr,
    },
    Delete {
        domain: String,
        record_type: RecordType,
        addr: IpAddr,
    },
    ReplaceSet {
        domain: String,
        record_type: RecordType,
        addrs: BTreeSet<IpAddr>,
    },
    DeleteSet {
        domain: String,
        record_type: RecordType,
        addrs: BTreeSet<IpAddr>,
    },
}

/// A DomainHandler that records every call and supports failure injection
pub struct RecordingHandler {
    shape: HandlerShape,
    /// Backing record store
    store: MemoryDomainHandler,
    /// Call counter for check_if_responsible()
    responsibility_checks: AtomicUsize,
    /// Call counter for existing_records()
    fetch_count: AtomicUsize,
    /// Every mutation call, in order
    calls: Mutex<Vec<Call>>,
    /// Zone ids seen by existing_records()
    zone_ids: Mutex<Vec<String>>,
    fail_responsibility: AtomicBool,
    fail_fetch: AtomicBool,
    /// Mutations touching these addresses fail (after being recorded)
    failing_addrs: Mutex<HashSet<IpAddr>>,
}

impl RecordingHandler {
    /// Handler responsible for every zone
    pub fn new(name: &str, shape: HandlerShape) -> Arc<Self> {
        Self::with_zones(name, shape, &[])
    }

    /// Handler responsible for the given zones only
    pub fn with_zones(name: &str, shape: HandlerShape, zones: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            shape,
            store: MemoryDomainHandler::with_zones(name, shape, zones.iter().copied()),
            responsibility_checks: AtomicUsize::new(0),
            fetch_count: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            zone_ids: Mutex::new(Vec::new()),
            fail_responsibility: AtomicBool::new(false),
            fail_fetch: AtomicBool::new(false),
            failing_addrs: Mutex::new(HashSet::new()),
        })
    }

    /// Get the number of times check_if_responsible() was called
    pub fn responsibility_checks(&self) -> usize {
        self.responsibility_checks.load(Ordering::SeqCst)
    }

    /// Get the number of times existing_records() was called
    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    /// Get every mutation call so far
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Forget recorded calls (records are kept)
    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Zone ids handed to existing_records()
    pub fn zone_ids(&self) -> Vec<String> {
        self.zone_ids.lock().unwrap().clone()
    }

    /// Published addresses of `record_type` for `domain`
    pub async fn published(&self, domain: &str, record_type: RecordType) -> BTreeSet<String> {
        self.store.addresses(domain, record_type).await
    }

    /// Pre-populate a record without recording a call
    pub async fn seed(&self, domain: &str, addr: &str) {
        let addr: IpAddr = addr.parse().unwrap();
        let labels: Vec<String> = domain.split('.').map(str::to_string).collect();
        let target = DomainTarget {
            domain: domain.to_string(),
            zone_key: labels[labels.len() - 2..].join("."),
            labels,
            zone_id: String::new(),
        };
        self.store
            .ensure_single_record(&target, addr, RecordType::for_addr(&addr), &[])
            .await
            .unwrap();
    }

    pub fn fail_responsibility(&self, fail: bool) {
        self.fail_responsibility.store(fail, Ordering::SeqCst);
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn fail_mutations_for(&self, addr: &str) {
        self.failing_addrs.lock().unwrap().insert(addr.parse().unwrap());
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn check_failure<'a>(&self, addrs: impl IntoIterator<Item = &'a IpAddr>) -> Result<()> {
        let failing = self.failing_addrs.lock().unwrap();
        match addrs.into_iter().find(|addr| failing.contains(addr)) {
            Some(addr) => Err(Error::mutation(format!("injected failure for {}", addr))),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl SingleRecordApi for RecordingHandler {
    async fn ensure_single_record(
        &self,
        target: &DomainTarget,
        addr: IpAddr,
        record_type: RecordType,
        existing: &[ProviderRecord],
    ) -> Result<()> {
        self.record(Call::Create {
            domain: target.domain.clone(),
            record_type,
            addr,
        });
        self.check_failure([&addr])?;
        self.store
            .ensure_single_record(target, addr, record_type, existing)
            .await
    }

    async fn delete_single_record(
        &self,
        target: &DomainTarget,
        addr: IpAddr,
        record_type: RecordType,
        existing: &[ProviderRecord],
    ) -> Result<()> {
        self.record(Call::Delete {
            domain: target.domain.clone(),
            record_type,
            addr,
        });
        self.check_failure([&addr])?;
        self.store
            .delete_single_record(target, addr, record_type, existing)
            .await
    }
}

#[async_trait::async_trait]
impl GroupedRecordApi for RecordingHandler {
    async fn ensure_grouped_record(
        &self,
        target: &DomainTarget,
        addrs: &BTreeSet<IpAddr>,
        record_type: RecordType,
        existing: &[ProviderRecord],
    ) -> Result<()> {
        self.record(Call::ReplaceSet {
            domain: target.domain.clone(),
            record_type,
            addrs: addrs.clone(),
        });
        self.check_failure(addrs)?;
        self.store
            .ensure_grouped_record(target, addrs, record_type, existing)
            .await
    }

    async fn delete_grouped_record(
        &self,
        target: &DomainTarget,
        addrs: &BTreeSet<IpAddr>,
        record_type: RecordType,
        existing: &[ProviderRecord],
    ) -> Result<()> {
        self.record(Call::DeleteSet {
            domain: target.domain.clone(),
            record_type,
            addrs: addrs.clone(),
        });
        self.check_failure(addrs)?;
        self.store
            .delete_grouped_record(target, addrs, record_type, existing)
            .await
    }
}

#[async_trait::async_trait]
impl DomainHandler for RecordingHandler {
    fn name(&self) -> &str {
        self.store.name()
    }

    fn api(&self) -> HandlerApi<'_> {
        match self.shape {
            HandlerShape::Single => HandlerApi::Single(self),
            HandlerShape::Grouped => HandlerApi::Grouped(self),
        }
    }

    async fn check_if_responsible(&self, labels: &[String]) -> Result<Option<String>> {
        self.responsibility_checks.fetch_add(1, Ordering::SeqCst);
        if self.fail_responsibility.load(Ordering::SeqCst) {
            return Err(Error::resolution("injected zone lookup failure"));
        }
        self.store.check_if_responsible(labels).await
    }

    async fn existing_records(&self, target: &DomainTarget) -> Result<Vec<ProviderRecord>> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        self.zone_ids.lock().unwrap().push(target.zone_id.clone());
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(Error::fetch("injected fetch failure"));
        }
        self.store.existing_records(target).await
    }
}

/// A HostResolver backed by a fixed table
pub struct StaticHostResolver {
    table: Arc<Mutex<HashMap<String, Vec<IpAddr>>>>,
    lookup_count: Arc<AtomicUsize>,
}

impl StaticHostResolver {
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(HashMap::new())),
            lookup_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Set (or replace) the addresses of a hostname
    pub fn set(&self, hostname: &str, addrs: &[&str]) {
        self.table
            .lock()
            .unwrap()
            .insert(hostname.to_string(), addrs.iter().map(|a| ip(a)).collect());
    }

    /// Make a hostname unresolvable
    pub fn unset(&self, hostname: &str) {
        self.table.lock().unwrap().remove(hostname);
    }

    /// Get the number of lookups performed
    pub fn lookup_count(&self) -> usize {
        self.lookup_count.load(Ordering::SeqCst)
    }

    /// Create a new StaticHostResolver that shares its table with an existing one
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            table: Arc::clone(&other.table),
            lookup_count: Arc::clone(&other.lookup_count),
        }
    }
}

#[async_trait::async_trait]
impl HostResolver for StaticHostResolver {
    async fn resolve(&self, hostname: &str) -> Result<Vec<IpAddr>> {
        self.lookup_count.fetch_add(1, Ordering::SeqCst);
        self.table
            .lock()
            .unwrap()
            .get(hostname)
            .cloned()
            .ok_or_else(|| Error::address_resolution(format!("no such host: {}", hostname)))
    }
}

/// A controlled NodeEventSource that emits events on demand
///
/// The stream ends once every sender returned by [`Self::new`] is dropped.
pub struct ControlledEventSource {
    /// Receiver for the manager's watch stream
    engine_rx: Mutex<Option<mpsc::UnboundedReceiver<NodeEvent>>>,
    /// Call counter for watch()
    watch_call_count: AtomicUsize,
}

impl ControlledEventSource {
    pub fn new() -> (Self, mpsc::UnboundedSender<NodeEvent>) {
        let (test_tx, engine_rx) = mpsc::unbounded_channel();

        let source = Self {
            engine_rx: Mutex::new(Some(engine_rx)),
            watch_call_count: AtomicUsize::new(0),
        };

        (source, test_tx)
    }

    /// Get the number of times watch() was called
    pub fn watch_call_count(&self) -> usize {
        self.watch_call_count.load(Ordering::SeqCst)
    }
}

impl NodeEventSource for ControlledEventSource {
    fn watch(&self) -> Pin<Box<dyn Stream<Item = NodeEvent> + Send + 'static>> {
        self.watch_call_count.fetch_add(1, Ordering::SeqCst);

        // Take the receiver (only called once)
        let rx = self
            .engine_rx
            .lock()
            .unwrap()
            .take()
            .expect("watch() can only be called once");

        Box::pin(tokio_stream::wrappers::UnboundedReceiverStream::new(rx))
    }
}

/// A NodeEventSource that never emits events (for idle testing)
pub struct IdleEventSource {
    /// Held so the stream never ends
    _tx: mpsc::UnboundedSender<NodeEvent>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<NodeEvent>>>,
}

impl IdleEventSource {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            _tx: tx,
            rx: Mutex::new(Some(rx)),
        }
    }
}

impl NodeEventSource for IdleEventSource {
    fn watch(&self) -> Pin<Box<dyn Stream<Item = NodeEvent> + Send + 'static>> {
        let rx = self
            .rx
            .lock()
            .unwrap()
            .take()
            .expect("watch() can only be called once");

        Box::pin(tokio_stream::wrappers::UnboundedReceiverStream::new(rx))
    }
}

pub fn ip(addr: &str) -> IpAddr {
    addr.parse().expect("valid address literal")
}

pub fn ips(addrs: &[&str]) -> Vec<IpAddr> {
    addrs.iter().map(|a| ip(a)).collect()
}

pub fn ip_set(addrs: &[&str]) -> BTreeSet<IpAddr> {
    addrs.iter().map(|a| ip(a)).collect()
}

pub fn strings(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Build an annotation map from key/value pairs
pub fn annotations(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Annotation map claiming each domain with presence
pub fn claiming(domains: &[&str]) -> BTreeMap<String, String> {
    domains
        .iter()
        .map(|d| (format!("{}/domainmanager", d), "true".to_string()))
        .collect()
}

/// Create a manager over `handlers` with an empty static resolver
pub fn manager(
    handlers: Vec<Arc<dyn DomainHandler>>,
) -> (DomainManager, mpsc::Receiver<ManagerEvent>) {
    manager_with_resolver(handlers, &StaticHostResolver::new())
}

/// Create a manager over `handlers` that shares `resolver`'s table
pub fn manager_with_resolver(
    handlers: Vec<Arc<dyn DomainHandler>>,
    resolver: &StaticHostResolver,
) -> (DomainManager, mpsc::Receiver<ManagerEvent>) {
    DomainManager::new(
        handlers,
        Box::new(StaticHostResolver::sharing_counters_with(resolver)),
        DomainManagerConfig::new(),
    )
    .expect("manager construction succeeds")
}

/// Collect every event currently buffered
pub fn drain(rx: &mut mpsc::Receiver<ManagerEvent>) -> Vec<ManagerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
