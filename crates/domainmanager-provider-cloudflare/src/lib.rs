// # Cloudflare Domain Handler
//
// This crate provides a single-record DomainHandler over the Cloudflare
// API v4.
//
// ## Behavior
//
// - Responsibility: a zone belongs to this handler when `GET /zones?name=`
//   returns it for the configured credentials
// - One record per node address; records of other nodes are never touched
// - Dry-run mode performs every read but only logs mutations
// - No retries, no caching: the zone id arrives memoized in `DomainTarget`
//
// ## Security Requirements
//
// - Credentials NEVER appear in logs or Debug output
// - Credentials MUST be provided via configuration/environment only
//
// ## API Reference
//
// - Cloudflare API v4: https://developers.cloudflare.com/api/
// - List Zones: GET `/zones?name=...`
// - List DNS Records: GET `/zones/:zone_id/dns_records?name=...&page=...` (all pages)
// - Create DNS Record: POST `/zones/:zone_id/dns_records`
// - Delete DNS Record: DELETE `/zones/:zone_id/dns_records/:record_id`

use async_trait::async_trait;
use domainmanager_core::annotations::zone_key;
use domainmanager_core::config::ProviderConfig;
use domainmanager_core::registry::HandlerRegistry;
use domainmanager_core::traits::{
    DomainHandler, DomainHandlerFactory, DomainTarget, HandlerApi, ProviderRecord, RecordType,
    SingleRecordApi,
};
use domainmanager_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// Cloudflare API base URL
const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Page size for record listings
const RECORDS_PER_PAGE: &str = "100";

/// Provider name used in logs and errors
const PROVIDER: &str = "cloudflare";

/// Cloudflare API credentials
#[derive(Clone)]
pub enum Credentials {
    /// Scoped API token, sent as a bearer token
    Token(String),
    /// Legacy global API key with the account email
    GlobalKey {
        /// Account email
        email: String,
        /// Global API key
        key: String,
    },
}

impl Credentials {
    fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Credentials::Token(token) => request.bearer_auth(token),
            Credentials::GlobalKey { email, key } => request
                .header("X-Auth-Email", email)
                .header("X-Auth-Key", key),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Credentials::Token(token) => token.is_empty(),
            Credentials::GlobalKey { email, key } => email.is_empty() || key.is_empty(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Credentials::Token(_) => "token",
            Credentials::GlobalKey { .. } => "global-key",
        }
    }
}

// Custom Debug implementation that hides the secrets
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Credentials::{}(<REDACTED>)", self.kind())
    }
}

/// Response envelope shared by every Cloudflare API call
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
    result_info: Option<ResultInfo>,
}

/// Pagination block of list responses
#[derive(Debug, Deserialize)]
struct ResultInfo {
    #[serde(default)]
    page: u32,
    #[serde(default)]
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct Zone {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DnsRecord {
    id: String,
    #[serde(rename = "type")]
    record_type: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct NewDnsRecord<'a> {
    #[serde(rename = "type")]
    record_type: &'a str,
    name: &'a str,
    content: String,
    proxied: bool,
}

/// Cloudflare domain handler
///
/// # Dry-Run Mode
///
/// When `dry_run` is true, the handler will:
/// - Perform all GET requests (zone lookup, record listing)
/// - Log the intended POST/DELETE requests
/// - **NOT** actually modify DNS records
///
/// # Security
///
/// The Debug implementation does NOT expose the credentials.
pub struct CloudflareHandler {
    /// API credentials
    /// ⚠️ NEVER log these values
    credentials: Credentials,

    /// HTTP client for API requests
    client: reqwest::Client,

    /// API base URL
    api_base: String,

    /// Dry-run mode: if true, perform GET requests but skip mutations
    dry_run: bool,
}

impl std::fmt::Debug for CloudflareHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareHandler")
            .field("credentials", &self.credentials)
            .field("api_base", &self.api_base)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl CloudflareHandler {
    /// Create a new Cloudflare handler
    ///
    /// # Parameters
    ///
    /// - `credentials`: Token with Zone:Read and DNS:Edit permissions, or a global key
    /// - `dry_run`: If true, perform GET requests but skip mutations
    ///
    /// # Errors
    ///
    /// Fails on empty credentials or if the HTTP client cannot be built.
    pub fn new(credentials: Credentials, dry_run: bool) -> Result<Self> {
        if credentials.is_empty() {
            return Err(Error::config("Cloudflare credentials cannot be empty"));
        }

        // Build HTTP client with timeout
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            credentials,
            client,
            api_base: CLOUDFLARE_API_BASE.to_string(),
            dry_run,
        })
    }

    /// Create a handler from a [`ProviderConfig::Cloudflare`]
    ///
    /// A token takes precedence over a global key.
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        match config {
            ProviderConfig::Cloudflare {
                api_token,
                api_email,
                api_key,
                dry_run,
            } => {
                let credentials = match (api_token, api_email, api_key) {
                    (Some(token), _, _) if !token.is_empty() => Credentials::Token(token.clone()),
                    (_, Some(email), Some(key)) => Credentials::GlobalKey {
                        email: email.clone(),
                        key: key.clone(),
                    },
                    _ => {
                        return Err(Error::config(
                            "Cloudflare requires an API token or an API email and key",
                        ));
                    }
                };
                Self::new(credentials, *dry_run)
            }
            _ => Err(Error::config("Invalid config for Cloudflare handler")),
        }
    }

    /// Point the handler at a different API endpoint (e.g. a proxy)
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Whether mutations are only logged
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Send a request and unwrap the response envelope
    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<Option<T>> {
        let body = self.fetch(request, context).await?;
        unwrap_envelope(body, context)
    }

    /// Send a request and return the raw response envelope
    async fn fetch<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<ApiResponse<T>> {
        let response = self
            .credentials
            .apply(request)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| Error::provider(PROVIDER, format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(status_error(status.as_u16(), context, &error_text));
        }

        response
            .json()
            .await
            .map_err(|e| Error::provider(PROVIDER, format!("Failed to parse response: {}", e)))
    }
}

/// Map a non-success HTTP status to an error
fn status_error(status: u16, context: &str, body: &str) -> Error {
    match status {
        401 | 403 => Error::provider(
            PROVIDER,
            format!(
                "{}: authentication failed, invalid credentials or insufficient permissions (status {})",
                context, status
            ),
        ),
        404 => Error::not_found(format!("{}: not found", context)),
        429 => Error::provider(
            PROVIDER,
            format!("{}: rate limit exceeded (status {})", context, status),
        ),
        500..=599 => Error::provider(
            PROVIDER,
            format!("{}: server error (transient): {} - {}", context, status, body),
        ),
        _ => Error::provider(PROVIDER, format!("{}: {} - {}", context, status, body)),
    }
}

/// Reject `success: false` envelopes, return the result otherwise
fn unwrap_envelope<T>(body: ApiResponse<T>, context: &str) -> Result<Option<T>> {
    if !body.success {
        let messages = body
            .errors
            .iter()
            .map(|e| format!("[{}] {}", e.code, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(Error::provider(PROVIDER, format!("{}: {}", context, messages)));
    }
    Ok(body.result)
}

/// Page to request after `info`, if any
fn next_page(info: Option<&ResultInfo>) -> Option<u32> {
    info.filter(|info| info.page < info.total_pages)
        .map(|info| info.page + 1)
}

/// Convert listed records, keeping only the managed types
fn into_provider_records(records: Vec<DnsRecord>) -> Vec<ProviderRecord> {
    records
        .into_iter()
        .filter_map(|record| {
            RecordType::parse(&record.record_type).map(|record_type| ProviderRecord {
                id: record.id,
                record_type,
                value: record.content,
            })
        })
        .collect()
}

#[async_trait]
impl SingleRecordApi for CloudflareHandler {
    async fn ensure_single_record(
        &self,
        target: &DomainTarget,
        addr: IpAddr,
        record_type: RecordType,
        existing: &[ProviderRecord],
    ) -> Result<()> {
        if existing.iter().any(|record| record.matches(record_type, &addr)) {
            tracing::debug!(domain = %target.domain, %record_type, %addr, "Record already exists");
            return Ok(());
        }

        let url = format!("{}/zones/{}/dns_records", self.api_base, target.zone_id);
        let payload = NewDnsRecord {
            record_type: record_type.as_str(),
            name: &target.domain,
            content: addr.to_string(),
            proxied: false,
        };

        if self.dry_run {
            tracing::info!(
                "[DRY-RUN] Would send POST request to {} with payload: {}",
                url,
                serde_json::to_string(&payload).unwrap_or_default()
            );
            return Ok(());
        }

        let context = format!("Create {} record {}", record_type, target.domain);
        self.send::<serde_json::Value>(self.client.post(&url).json(&payload), &context)
            .await
            .map_err(|e| Error::mutation(e.to_string()))?;

        tracing::info!(domain = %target.domain, %record_type, %addr, "DNS record created");
        Ok(())
    }

    async fn delete_single_record(
        &self,
        target: &DomainTarget,
        addr: IpAddr,
        record_type: RecordType,
        existing: &[ProviderRecord],
    ) -> Result<()> {
        let Some(record) = existing
            .iter()
            .find(|record| record.matches(record_type, &addr))
        else {
            tracing::debug!(domain = %target.domain, %record_type, %addr, "No record to delete");
            return Ok(());
        };

        let url = format!(
            "{}/zones/{}/dns_records/{}",
            self.api_base, target.zone_id, record.id
        );

        if self.dry_run {
            tracing::info!("[DRY-RUN] Would send DELETE request to {}", url);
            return Ok(());
        }

        let context = format!("Delete {} record {}", record_type, target.domain);
        self.send::<serde_json::Value>(self.client.delete(&url), &context)
            .await
            .map_err(|e| Error::mutation(e.to_string()))?;

        tracing::info!(domain = %target.domain, %record_type, %addr, "DNS record deleted");
        Ok(())
    }
}

#[async_trait]
impl DomainHandler for CloudflareHandler {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn api(&self) -> HandlerApi<'_> {
        HandlerApi::Single(self)
    }

    /// Look up the zone by name
    ///
    /// ```http
    /// GET /zones?name=example.com
    /// ```
    async fn check_if_responsible(&self, labels: &[String]) -> Result<Option<String>> {
        let zone = zone_key(labels);
        let url = format!("{}/zones", self.api_base);
        let context = format!("Zone lookup for {}", zone);

        let zones: Vec<Zone> = self
            .send(self.client.get(&url).query(&[("name", zone.as_str())]), &context)
            .await
            .map_err(|e| Error::resolution(e.to_string()))?
            .unwrap_or_default();

        Ok(zones.into_iter().next().map(|zone| zone.id))
    }

    /// List A and AAAA records of a domain, following every page
    ///
    /// ```http
    /// GET /zones/:zone_id/dns_records?name=a.example.com&per_page=100&page=1
    /// ```
    async fn existing_records(&self, target: &DomainTarget) -> Result<Vec<ProviderRecord>> {
        let url = format!("{}/zones/{}/dns_records", self.api_base, target.zone_id);
        let context = format!("Record listing for {}", target.domain);

        let mut records = Vec::new();
        let mut page: u32 = 1;
        loop {
            let page_param = page.to_string();
            let body: ApiResponse<Vec<DnsRecord>> = self
                .fetch(
                    self.client.get(&url).query(&[
                        ("name", target.domain.as_str()),
                        ("per_page", RECORDS_PER_PAGE),
                        ("page", page_param.as_str()),
                    ]),
                    &context,
                )
                .await
                .map_err(|e| Error::fetch(e.to_string()))?;

            let next = next_page(body.result_info.as_ref());
            let listed = unwrap_envelope(body, &context)
                .map_err(|e| Error::fetch(e.to_string()))?
                .unwrap_or_default();
            records.extend(into_provider_records(listed));

            // Stop if the server does not advance
            match next {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }

        Ok(records)
    }
}

/// Factory for creating Cloudflare handlers
pub struct CloudflareFactory;

impl DomainHandlerFactory for CloudflareFactory {
    fn create(&self, config: &ProviderConfig) -> Result<Arc<dyn DomainHandler>> {
        let handler = CloudflareHandler::from_config(config)?;

        if handler.is_dry_run() {
            tracing::warn!("Cloudflare handler running in DRY-RUN mode - no changes will be made");
        }

        Ok(Arc::new(handler))
    }
}

/// Register the Cloudflare handler with a registry
///
/// # Example
///
/// ```rust
/// use domainmanager_core::HandlerRegistry;
///
/// let registry = HandlerRegistry::with_builtin();
/// domainmanager_provider_cloudflare::register(&registry);
/// assert!(registry.has_handler("cloudflare"));
/// ```
pub fn register(registry: &HandlerRegistry) {
    registry.register_handler(PROVIDER, Box::new(CloudflareFactory));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_config(token: &str, dry_run: bool) -> ProviderConfig {
        ProviderConfig::Cloudflare {
            api_token: Some(token.to_string()),
            api_email: None,
            api_key: None,
            dry_run,
        }
    }

    #[test]
    fn test_factory_creation() {
        let handler = CloudflareFactory.create(&token_config("test_token", false));

        assert!(handler.is_ok());
        assert_eq!(handler.unwrap().api().shape(), domainmanager_core::HandlerShape::Single);
    }

    #[test]
    fn test_factory_missing_credentials() {
        let config = ProviderConfig::Cloudflare {
            api_token: None,
            api_email: Some("ops@example.com".to_string()),
            api_key: None,
            dry_run: false,
        };

        assert!(CloudflareFactory.create(&config).is_err());
        assert!(CloudflareHandler::new(Credentials::Token(String::new()), false).is_err());
    }

    #[test]
    fn test_global_key_credentials() {
        let config = ProviderConfig::Cloudflare {
            api_token: None,
            api_email: Some("ops@example.com".to_string()),
            api_key: Some("global_key_abc".to_string()),
            dry_run: false,
        };

        let handler = CloudflareHandler::from_config(&config).unwrap();
        assert!(matches!(handler.credentials, Credentials::GlobalKey { .. }));
    }

    #[test]
    fn test_dry_run_mode() {
        let dry = CloudflareHandler::from_config(&token_config("token", true)).unwrap();
        let live = CloudflareHandler::from_config(&token_config("token", false)).unwrap();

        assert!(dry.is_dry_run(), "Dry-run handler should have dry_run=true");
        assert!(!live.is_dry_run(), "Live handler should have dry_run=false");
    }

    #[test]
    fn test_credentials_not_exposed_in_debug() {
        let handler =
            CloudflareHandler::from_config(&token_config("secret_token_12345", false)).unwrap();
        let debug_str = format!("{:?}", handler);
        assert!(!debug_str.contains("secret_token"));
        assert!(debug_str.contains("CloudflareHandler"));

        let key = Credentials::GlobalKey {
            email: "ops@example.com".to_string(),
            key: "global_key_abc".to_string(),
        };
        let debug_str = format!("{:?}", key);
        assert!(!debug_str.contains("global_key_abc"));
        assert!(!debug_str.contains("ops@example.com"));
    }

    #[test]
    fn test_api_base_override() {
        let handler = CloudflareHandler::from_config(&token_config("token", false))
            .unwrap()
            .with_api_base("http://127.0.0.1:8080/client/v4/");
        assert_eq!(handler.api_base, "http://127.0.0.1:8080/client/v4");
    }

    #[test]
    fn test_status_error_mapping() {
        assert!(matches!(status_error(401, "ctx", ""), Error::Provider { .. }));
        assert!(matches!(status_error(404, "ctx", ""), Error::NotFound(_)));
        assert!(status_error(429, "ctx", "").to_string().contains("rate limit"));
        assert!(status_error(503, "ctx", "down").to_string().contains("transient"));
    }

    #[test]
    fn test_record_listing_keeps_address_records() {
        let json = serde_json::json!({
            "success": true,
            "errors": [],
            "result": [
                {"id": "r1", "type": "A", "name": "a.example.com", "content": "10.0.0.1"},
                {"id": "r2", "type": "TXT", "name": "a.example.com", "content": "hello"},
                {"id": "r3", "type": "AAAA", "name": "a.example.com", "content": "2001:db8::1"}
            ]
        });

        let body: ApiResponse<Vec<DnsRecord>> = serde_json::from_value(json).unwrap();
        let records = into_provider_records(unwrap_envelope(body, "ctx").unwrap().unwrap());

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].record_type, RecordType::A);
        assert_eq!(records[1].id, "r3");
        assert!(records[1].matches(RecordType::Aaaa, &"2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn test_record_listing_follows_pages() {
        let first = serde_json::json!({
            "success": true,
            "errors": [],
            "result": [{"id": "r1", "type": "A", "name": "a.example.com", "content": "10.0.0.1"}],
            "result_info": {"page": 1, "per_page": 100, "count": 100, "total_count": 101, "total_pages": 2}
        });
        let last = serde_json::json!({
            "success": true,
            "errors": [],
            "result": [{"id": "r101", "type": "A", "name": "a.example.com", "content": "10.0.0.101"}],
            "result_info": {"page": 2, "per_page": 100, "count": 1, "total_count": 101, "total_pages": 2}
        });

        let first: ApiResponse<Vec<DnsRecord>> = serde_json::from_value(first).unwrap();
        let last: ApiResponse<Vec<DnsRecord>> = serde_json::from_value(last).unwrap();

        assert_eq!(next_page(first.result_info.as_ref()), Some(2));
        assert_eq!(next_page(last.result_info.as_ref()), None);
        assert_eq!(next_page(None), None);
    }

    #[test]
    fn test_unsuccessful_envelope_is_error() {
        let json = serde_json::json!({
            "success": false,
            "errors": [{"code": 9109, "message": "Invalid access token"}],
            "result": null
        });

        let body: ApiResponse<Vec<Zone>> = serde_json::from_value(json).unwrap();
        let err = unwrap_envelope(body, "Zone lookup").unwrap_err();
        assert!(err.to_string().contains("9109"));
    }

    #[test]
    fn test_create_payload_shape() {
        let payload = NewDnsRecord {
            record_type: RecordType::Aaaa.as_str(),
            name: "*.example.com",
            content: "2001:db8::1".to_string(),
            proxied: false,
        };

        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            serde_json::json!({
                "type": "AAAA",
                "name": "*.example.com",
                "content": "2001:db8::1",
                "proxied": false
            })
        );
    }

    #[tokio::test]
    async fn test_dry_run_mutations_do_not_call_api() {
        // Unroutable base: any request would fail
        let handler = CloudflareHandler::from_config(&token_config("token", true))
            .unwrap()
            .with_api_base("http://127.0.0.1:1");
        let target = DomainTarget {
            domain: "a.example.com".to_string(),
            labels: vec!["a".to_string(), "example".to_string(), "com".to_string()],
            zone_key: "example.com".to_string(),
            zone_id: "zone123".to_string(),
        };
        let addr: IpAddr = "10.0.0.1".parse().unwrap();
        let existing = vec![ProviderRecord {
            id: "r1".to_string(),
            record_type: RecordType::A,
            value: "10.0.0.1".to_string(),
        }];

        assert!(handler
            .ensure_single_record(&target, "10.0.0.2".parse().unwrap(), RecordType::A, &[])
            .await
            .is_ok());
        assert!(handler
            .delete_single_record(&target, addr, RecordType::A, &existing)
            .await
            .is_ok());
    }
}
