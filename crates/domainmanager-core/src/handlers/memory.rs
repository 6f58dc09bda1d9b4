// # Memory Domain Handler
//
// In-memory implementation of DomainHandler.
//
// ## Purpose
//
// Keeps records in a HashMap instead of talking to a provider. It can act
// in either shape, which makes it useful for:
//
// - Dry runs of the daemon against a real event stream
// - Demos and embedded usage
// - Exercising both reconciliation strategies without credentials
//
// ## Crash Behavior
//
// All records are lost on restart.

use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use async_trait::async_trait;
use tracing::info;

use crate::annotations::zone_key;
use crate::config::ProviderConfig;
use crate::traits::{
    DomainHandler, DomainHandlerFactory, DomainTarget, GroupedRecordApi, HandlerApi, HandlerShape,
    ProviderRecord, RecordType, SingleRecordApi,
};
use crate::Error;

/// In-memory domain handler
///
/// # Example
///
/// ```rust,no_run
/// use domainmanager_core::handlers::MemoryDomainHandler;
/// use domainmanager_core::traits::HandlerShape;
///
/// // Responsible for example.com only, replacing whole record sets
/// let handler = MemoryDomainHandler::with_zones("memory", HandlerShape::Grouped, ["example.com"]);
/// ```
#[derive(Debug)]
pub struct MemoryDomainHandler {
    name: String,
    shape: HandlerShape,
    /// Zones this handler owns; empty means every zone
    zones: BTreeSet<String>,
    /// domain → published records
    records: RwLock<HashMap<String, Vec<ProviderRecord>>>,
    next_id: AtomicU64,
}

impl MemoryDomainHandler {
    /// Create a handler responsible for every zone
    pub fn new(name: impl Into<String>, shape: HandlerShape) -> Self {
        Self::with_zones(name, shape, std::iter::empty::<String>())
    }

    /// Create a handler responsible for the given zones only
    pub fn with_zones<I, S>(name: impl Into<String>, shape: HandlerShape, zones: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            shape,
            zones: zones.into_iter().map(Into::into).collect(),
            records: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Records currently published for `domain`
    pub async fn records(&self, domain: &str) -> Vec<ProviderRecord> {
        self.records
            .read()
            .await
            .get(domain)
            .cloned()
            .unwrap_or_default()
    }

    /// Addresses of `record_type` currently published for `domain`
    pub async fn addresses(&self, domain: &str, record_type: RecordType) -> BTreeSet<String> {
        self.records(domain)
            .await
            .into_iter()
            .filter(|record| record.record_type == record_type)
            .map(|record| record.value)
            .collect()
    }

    fn new_record(&self, record_type: RecordType, addr: &IpAddr) -> ProviderRecord {
        ProviderRecord {
            id: format!("{}-{}", self.name, self.next_id.fetch_add(1, Ordering::SeqCst)),
            record_type,
            value: addr.to_string(),
        }
    }
}

#[async_trait]
impl SingleRecordApi for MemoryDomainHandler {
    async fn ensure_single_record(
        &self,
        target: &DomainTarget,
        addr: IpAddr,
        record_type: RecordType,
        _existing: &[ProviderRecord],
    ) -> Result<(), Error> {
        let mut guard = self.records.write().await;
        let records = guard.entry(target.domain.clone()).or_default();

        if records.iter().any(|record| record.matches(record_type, &addr)) {
            return Ok(());
        }

        records.push(self.new_record(record_type, &addr));
        info!(handler = %self.name, domain = %target.domain, %record_type, %addr, "Created record");
        Ok(())
    }

    async fn delete_single_record(
        &self,
        target: &DomainTarget,
        addr: IpAddr,
        record_type: RecordType,
        _existing: &[ProviderRecord],
    ) -> Result<(), Error> {
        let mut guard = self.records.write().await;
        if let Some(records) = guard.get_mut(&target.domain) {
            records.retain(|record| !record.matches(record_type, &addr));
            info!(handler = %self.name, domain = %target.domain, %record_type, %addr, "Deleted record");
        }
        Ok(())
    }
}

#[async_trait]
impl GroupedRecordApi for MemoryDomainHandler {
    async fn ensure_grouped_record(
        &self,
        target: &DomainTarget,
        addrs: &BTreeSet<IpAddr>,
        record_type: RecordType,
        _existing: &[ProviderRecord],
    ) -> Result<(), Error> {
        let mut guard = self.records.write().await;
        let records = guard.entry(target.domain.clone()).or_default();

        records.retain(|record| record.record_type != record_type);
        for addr in addrs {
            records.push(self.new_record(record_type, addr));
        }

        info!(
            handler = %self.name,
            domain = %target.domain,
            %record_type,
            count = addrs.len(),
            "Replaced record set"
        );
        Ok(())
    }

    async fn delete_grouped_record(
        &self,
        target: &DomainTarget,
        _addrs: &BTreeSet<IpAddr>,
        record_type: RecordType,
        _existing: &[ProviderRecord],
    ) -> Result<(), Error> {
        let mut guard = self.records.write().await;
        if let Some(records) = guard.get_mut(&target.domain) {
            records.retain(|record| record.record_type != record_type);
            info!(handler = %self.name, domain = %target.domain, %record_type, "Deleted record set");
        }
        Ok(())
    }
}

#[async_trait]
impl DomainHandler for MemoryDomainHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn api(&self) -> HandlerApi<'_> {
        match self.shape {
            HandlerShape::Single => HandlerApi::Single(self),
            HandlerShape::Grouped => HandlerApi::Grouped(self),
        }
    }

    async fn check_if_responsible(&self, labels: &[String]) -> Result<Option<String>, Error> {
        let zone = zone_key(labels);
        if self.zones.is_empty() || self.zones.contains(&zone) {
            Ok(Some(format!("{}:{}", self.name, zone)))
        } else {
            Ok(None)
        }
    }

    async fn existing_records(&self, target: &DomainTarget) -> Result<Vec<ProviderRecord>, Error> {
        Ok(self.records(&target.domain).await)
    }
}

/// Factory for [`ProviderConfig::Memory`]
pub struct MemoryHandlerFactory;

impl DomainHandlerFactory for MemoryHandlerFactory {
    fn create(&self, config: &ProviderConfig) -> Result<std::sync::Arc<dyn DomainHandler>, Error> {
        match config {
            ProviderConfig::Memory { name, shape, zones } => Ok(std::sync::Arc::new(
                MemoryDomainHandler::with_zones(name.clone(), *shape, zones.iter().cloned()),
            )),
            _ => Err(Error::config("Invalid config for memory handler")),
        }
    }
}
