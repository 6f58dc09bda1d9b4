// # Route53 Domain Handler
//
// This crate provides a grouped-record DomainHandler over the AWS Route53
// API.
//
// ## Behavior
//
// - Responsibility: a zone belongs to this handler when
//   `ListHostedZonesByName` returns a hosted zone with exactly that name
// - The hosted zone id is returned from the responsibility check; the
//   resolver memoizes it and hands it back in `DomainTarget`
// - A and AAAA record sets are replaced as a whole (`UPSERT`) and deleted
//   with their current values (`DELETE`), TTL 60
// - Dry-run mode performs every read but only logs change batches
// - No retries
//
// ## Security Requirements
//
// - The secret access key NEVER appears in logs or Debug output
// - Credentials MUST be provided via configuration/environment only
//
// ## API Reference
//
// - ListHostedZonesByName, ListResourceRecordSets, ChangeResourceRecordSets:
//   https://docs.aws.amazon.com/Route53/latest/APIReference/

use async_trait::async_trait;
use aws_sdk_route53::Client;
use aws_sdk_route53::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_route53::error::DisplayErrorContext;
use aws_sdk_route53::types::{
    Change, ChangeAction, ChangeBatch, HostedZone, ResourceRecord, ResourceRecordSet, RrType,
};
use domainmanager_core::annotations::zone_key;
use domainmanager_core::config::ProviderConfig;
use domainmanager_core::registry::HandlerRegistry;
use domainmanager_core::traits::{
    DomainHandler, DomainHandlerFactory, DomainTarget, GroupedRecordApi, HandlerApi,
    ProviderRecord, RecordType,
};
use domainmanager_core::{Error, Result};
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;

/// Provider name used in logs and errors
const PROVIDER: &str = "route53";

/// TTL of every record set this handler writes
const RECORD_TTL: i64 = 60;

/// Comment attached to change batches
const CHANGE_COMMENT: &str = "Managed by domainmanager";

/// Route53 domain handler
///
/// # Dry-Run Mode
///
/// When `dry_run` is true, the handler will:
/// - Look up hosted zones and list record sets
/// - Log the change batches it would submit
/// - **NOT** actually modify DNS records
pub struct Route53Handler {
    /// API client holding the static credentials
    /// ⚠️ NEVER log the client configuration
    client: Client,

    /// AWS region of the client
    region: String,

    /// Dry-run mode: if true, perform reads but skip change batches
    dry_run: bool,
}

// Custom Debug implementation that hides the credentials
impl std::fmt::Debug for Route53Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route53Handler")
            .field("credentials", &"<REDACTED>")
            .field("region", &self.region)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl Route53Handler {
    /// Create a new Route53 handler from a static IAM credential
    ///
    /// # Errors
    ///
    /// Fails on an empty key id, secret or region.
    pub fn new(
        access_key_id: &str,
        secret_access_key: &str,
        region: &str,
        dry_run: bool,
    ) -> Result<Self> {
        if access_key_id.is_empty() || secret_access_key.is_empty() {
            return Err(Error::config("Route53 credentials cannot be empty"));
        }
        if region.is_empty() {
            return Err(Error::config("Route53 region cannot be empty"));
        }

        let credentials = Credentials::new(access_key_id, secret_access_key, None, None, PROVIDER);
        let config = aws_sdk_route53::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(credentials)
            .build();

        Ok(Self {
            client: Client::from_conf(config),
            region: region.to_string(),
            dry_run,
        })
    }

    /// Create a handler from a [`ProviderConfig::Route53`]
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        match config {
            ProviderConfig::Route53 {
                access_key_id,
                secret_access_key,
                region,
                dry_run,
            } => Self::new(access_key_id, secret_access_key, region, *dry_run),
            _ => Err(Error::config("Invalid config for Route53 handler")),
        }
    }

    /// Whether change batches are only logged
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Submit one change to the hosted zone of `target`
    async fn submit(
        &self,
        target: &DomainTarget,
        action: ChangeAction,
        record_type: RecordType,
        addrs: &BTreeSet<IpAddr>,
    ) -> Result<()> {
        let batch = change_batch(action.clone(), &target.domain, record_type, addrs)?;

        if self.dry_run {
            tracing::info!(
                "[DRY-RUN] Would submit {} of {} {} = [{}] to hosted zone {}",
                action.as_str(),
                record_type,
                target.domain,
                format_addrs(addrs),
                target.zone_id
            );
            return Ok(());
        }

        self.client
            .change_resource_record_sets()
            .hosted_zone_id(&target.zone_id)
            .change_batch(batch)
            .send()
            .await
            .map_err(|e| {
                Error::mutation(format!(
                    "{} {} record set {}: {}",
                    action.as_str(),
                    record_type,
                    target.domain,
                    DisplayErrorContext(&e)
                ))
            })?;

        tracing::info!(
            domain = %target.domain,
            %record_type,
            action = action.as_str(),
            addresses = %format_addrs(addrs),
            "Route53 record set changed"
        );
        Ok(())
    }
}

/// Fully qualified hosted zone name for a domain (`example.com.`)
fn hosted_zone_name(labels: &[String]) -> String {
    format!("{}.", zone_key(labels))
}

/// Pick the hosted zone id when the first listed zone is exactly `dns_name`
///
/// `ListHostedZonesByName` returns zones from `dns_name` onwards in sort
/// order, so the first entry may belong to a different zone.
fn matching_zone_id(zones: &[HostedZone], dns_name: &str) -> Option<String> {
    zones
        .first()
        .filter(|zone| zone.name().eq_ignore_ascii_case(dns_name))
        .map(|zone| zone.id().trim_start_matches("/hostedzone/").to_string())
}

/// Turn a Route53 record name into a domain
///
/// Strips the trailing dot and decodes `\ooo` octal escapes (`\052` → `*`).
fn unescape_record_name(name: &str) -> String {
    let name = name.strip_suffix('.').unwrap_or(name);
    let mut out = String::with_capacity(name.len());
    let mut rest = name;

    while let Some(pos) = rest.find('\\') {
        out.push_str(&rest[..pos]);
        let escape = rest
            .get(pos + 1..pos + 4)
            .filter(|digits| digits.bytes().all(|b| b.is_ascii_digit()));
        match escape.and_then(|digits| u8::from_str_radix(digits, 8).ok()) {
            Some(byte) if byte.is_ascii() => {
                out.push(byte as char);
                rest = &rest[pos + 4..];
            }
            _ => {
                out.push('\\');
                rest = &rest[pos + 1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn rr_type(record_type: RecordType) -> RrType {
    match record_type {
        RecordType::A => RrType::A,
        RecordType::Aaaa => RrType::Aaaa,
    }
}

/// A and AAAA values of `domain` in one page of record sets
fn into_provider_records(domain: &str, sets: &[ResourceRecordSet]) -> Vec<ProviderRecord> {
    sets.iter()
        .filter(|set| unescape_record_name(set.name()).eq_ignore_ascii_case(domain))
        .filter_map(|set| RecordType::parse(set.r#type().as_str()).map(|record_type| (set, record_type)))
        .flat_map(|(set, record_type)| {
            set.resource_records().iter().map(move |record| ProviderRecord {
                id: format!("{}:{}", record_type, record.value()),
                record_type,
                value: record.value().to_string(),
            })
        })
        .collect()
}

/// Build a single-change batch for the record set of `record_type`
fn change_batch(
    action: ChangeAction,
    domain: &str,
    record_type: RecordType,
    addrs: &BTreeSet<IpAddr>,
) -> Result<ChangeBatch> {
    if addrs.is_empty() {
        return Err(Error::invalid_input(format!(
            "Record set {} {} needs at least one address",
            record_type, domain
        )));
    }

    let records = addrs
        .iter()
        .map(|addr| ResourceRecord::builder().value(addr.to_string()).build())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::invalid_input(e.to_string()))?;

    let record_set = ResourceRecordSet::builder()
        .name(domain)
        .r#type(rr_type(record_type))
        .ttl(RECORD_TTL)
        .set_resource_records(Some(records))
        .build()
        .map_err(|e| Error::invalid_input(e.to_string()))?;

    let change = Change::builder()
        .action(action)
        .resource_record_set(record_set)
        .build()
        .map_err(|e| Error::invalid_input(e.to_string()))?;

    ChangeBatch::builder()
        .comment(CHANGE_COMMENT)
        .changes(change)
        .build()
        .map_err(|e| Error::invalid_input(e.to_string()))
}

fn format_addrs(addrs: &BTreeSet<IpAddr>) -> String {
    addrs
        .iter()
        .map(IpAddr::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl GroupedRecordApi for Route53Handler {
    async fn ensure_grouped_record(
        &self,
        target: &DomainTarget,
        addrs: &BTreeSet<IpAddr>,
        record_type: RecordType,
        _existing: &[ProviderRecord],
    ) -> Result<()> {
        self.submit(target, ChangeAction::Upsert, record_type, addrs)
            .await
    }

    async fn delete_grouped_record(
        &self,
        target: &DomainTarget,
        addrs: &BTreeSet<IpAddr>,
        record_type: RecordType,
        _existing: &[ProviderRecord],
    ) -> Result<()> {
        // DELETE must name the set's current values
        self.submit(target, ChangeAction::Delete, record_type, addrs)
            .await
    }
}

#[async_trait]
impl DomainHandler for Route53Handler {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn api(&self) -> HandlerApi<'_> {
        HandlerApi::Grouped(self)
    }

    async fn check_if_responsible(&self, labels: &[String]) -> Result<Option<String>> {
        let dns_name = hosted_zone_name(labels);

        let output = self
            .client
            .list_hosted_zones_by_name()
            .dns_name(&dns_name)
            .max_items(1)
            .send()
            .await
            .map_err(|e| {
                Error::resolution(format!(
                    "Hosted zone lookup for {}: {}",
                    dns_name,
                    DisplayErrorContext(&e)
                ))
            })?;

        let zone_id = matching_zone_id(output.hosted_zones(), &dns_name);
        if let Some(id) = &zone_id {
            tracing::debug!(zone = %dns_name, hosted_zone = %id, "Found hosted zone");
        }
        Ok(zone_id)
    }

    /// List A and AAAA values of a domain, following every page
    async fn existing_records(&self, target: &DomainTarget) -> Result<Vec<ProviderRecord>> {
        let mut records = Vec::new();
        let mut start: Option<(String, Option<RrType>, Option<String>)> = None;

        loop {
            let mut request = self
                .client
                .list_resource_record_sets()
                .hosted_zone_id(&target.zone_id);
            if let Some((name, record_type, identifier)) = start.take() {
                request = request
                    .start_record_name(name)
                    .set_start_record_type(record_type)
                    .set_start_record_identifier(identifier);
            }

            let page = request.send().await.map_err(|e| {
                Error::fetch(format!(
                    "Record listing for {}: {}",
                    target.domain,
                    DisplayErrorContext(&e)
                ))
            })?;

            records.extend(into_provider_records(
                &target.domain,
                page.resource_record_sets(),
            ));

            match (page.is_truncated(), page.next_record_name()) {
                (true, Some(name)) => {
                    start = Some((
                        name.to_string(),
                        page.next_record_type().cloned(),
                        page.next_record_identifier().map(str::to_string),
                    ));
                }
                _ => break,
            }
        }

        Ok(records)
    }
}

/// Factory for creating Route53 handlers
pub struct Route53Factory;

impl DomainHandlerFactory for Route53Factory {
    fn create(&self, config: &ProviderConfig) -> Result<Arc<dyn DomainHandler>> {
        let handler = Route53Handler::from_config(config)?;

        if handler.is_dry_run() {
            tracing::warn!("Route53 handler running in DRY-RUN mode - no changes will be made");
        }

        Ok(Arc::new(handler))
    }
}

/// Register the Route53 handler with a registry
///
/// # Example
///
/// ```rust
/// use domainmanager_core::HandlerRegistry;
///
/// let registry = HandlerRegistry::with_builtin();
/// domainmanager_provider_route53::register(&registry);
/// assert!(registry.has_handler("route53"));
/// ```
pub fn register(registry: &HandlerRegistry) {
    registry.register_handler(PROVIDER, Box::new(Route53Factory));
}
