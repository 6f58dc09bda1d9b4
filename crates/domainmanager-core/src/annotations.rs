//! Node annotation parsing
//!
//! Turns the raw annotation map of a node into a [`ClaimSet`].
//!
//! ## Grammar
//!
//! ```text
//! <domain>/domainmanager            = "true" | "present" | "wildcard" | anything else
//! <domain>/domainmanager/wildcard   = "true"
//! ```
//!
//! `"true"`, `"present"` and `"wildcard"` mean the node wants to be reachable
//! under `<domain>`; every other value is an explicit request for absence.
//! `"wildcard"` on the primary key, or `"true"` on the companion key, also
//! claims `*.<domain>`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Suffix of the primary annotation key
pub const DOMAIN_ANNOTATION_SUFFIX: &str = "/domainmanager";

/// Suffix of the wildcard companion annotation key
pub const WILDCARD_ANNOTATION_SUFFIX: &str = "/domainmanager/wildcard";

const PRESENT_VALUES: &[&str] = &["true", "present", "wildcard"];

/// A node's declared desire to be registered (or removed) under a domain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DomainClaim {
    /// Full domain name, e.g. `*.example.com`
    pub domain: String,
    /// Dot-separated labels of `domain`
    pub labels: Vec<String>,
    /// Whether this claim is for `*.<parent>`
    pub wildcard: bool,
    /// `false` requests absence
    pub present: bool,
}

impl DomainClaim {
    /// Build a claim, rejecting domains with fewer than two labels or empty labels
    pub fn new(domain: &str, wildcard: bool, present: bool) -> Option<Self> {
        let labels: Vec<String> = domain.split('.').map(str::to_string).collect();
        if labels.len() < 2 || labels.iter().any(String::is_empty) {
            return None;
        }

        Some(Self {
            domain: domain.to_string(),
            labels,
            wildcard,
            present,
        })
    }

    /// The registrable parent domain: the last two labels joined with `.`
    pub fn zone_key(&self) -> String {
        zone_key(&self.labels)
    }
}

/// Compute the zone key (last two labels) of a label sequence
///
/// Sequences shorter than two labels yield the joined input unchanged.
pub fn zone_key(labels: &[String]) -> String {
    let start = labels.len().saturating_sub(2);
    labels[start..].join(".")
}

/// Canonical, domain-keyed set of claims
///
/// Backed by a `BTreeMap` so iteration order and equality never depend on
/// the iteration order of the annotation map it was parsed from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimSet {
    claims: BTreeMap<String, DomainClaim>,
}

/// Difference between two claim sets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimDelta {
    /// Claims that are new, or whose presence flag changed
    pub added: Vec<DomainClaim>,
    /// Claims that disappeared, or whose presence flag changed (old value)
    pub removed: Vec<DomainClaim>,
}

impl ClaimDelta {
    /// `true` when nothing needs reconciling
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

impl ClaimSet {
    /// Create an empty claim set
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a claim; presence is merged with OR if the domain already exists
    pub fn insert(&mut self, claim: DomainClaim) {
        self.claims
            .entry(claim.domain.clone())
            .and_modify(|existing| existing.present |= claim.present)
            .or_insert(claim);
    }

    /// Look up the claim for a domain
    pub fn get(&self, domain: &str) -> Option<&DomainClaim> {
        self.claims.get(domain)
    }

    /// `true` if this set holds a present claim for `domain`
    pub fn claims_present(&self, domain: &str) -> bool {
        self.claims.get(domain).is_some_and(|claim| claim.present)
    }

    /// Iterate claims in domain order
    pub fn iter(&self) -> impl Iterator<Item = &DomainClaim> {
        self.claims.values()
    }

    /// Number of claims
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    /// Check if the set is empty
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    /// Sorted list of claimed domain names
    pub fn domains(&self) -> Vec<String> {
        self.claims.keys().cloned().collect()
    }

    /// Compute what changed going from `self` to `next`
    ///
    /// Keyed by domain string. A domain held by both sets with a different
    /// presence flag shows up in both `removed` (old claim) and `added`
    /// (new claim).
    pub fn diff(&self, next: &ClaimSet) -> ClaimDelta {
        let mut delta = ClaimDelta::default();

        for (domain, old) in &self.claims {
            match next.claims.get(domain) {
                None => delta.removed.push(old.clone()),
                Some(new) if new.present != old.present => delta.removed.push(old.clone()),
                Some(_) => {}
            }
        }

        for (domain, new) in &next.claims {
            match self.claims.get(domain) {
                None => delta.added.push(new.clone()),
                Some(old) if old.present != new.present => delta.added.push(new.clone()),
                Some(_) => {}
            }
        }

        delta
    }
}

impl FromIterator<DomainClaim> for ClaimSet {
    fn from_iter<I: IntoIterator<Item = DomainClaim>>(iter: I) -> Self {
        let mut set = ClaimSet::new();
        for claim in iter {
            set.insert(claim);
        }
        set
    }
}

/// Parse a node's annotations into its claim set
///
/// Pure and order-independent. Domains with fewer than two labels are
/// logged and skipped.
pub fn parse_claims<'a, I>(annotations: I) -> ClaimSet
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let mut claims = ClaimSet::new();

    for (key, value) in annotations {
        let value = value.trim();

        // The wildcard suffix also ends with the primary suffix, check it first
        if let Some(domain) = key.strip_suffix(WILDCARD_ANNOTATION_SUFFIX) {
            push_claim(&mut claims, key, &format!("*.{}", domain), true, value == "true");
        } else if let Some(domain) = key.strip_suffix(DOMAIN_ANNOTATION_SUFFIX) {
            let present = PRESENT_VALUES.contains(&value);
            push_claim(&mut claims, key, domain, false, present);

            if value == "wildcard" {
                push_claim(&mut claims, key, &format!("*.{}", domain), true, true);
            }
        }
    }

    claims
}

fn push_claim(claims: &mut ClaimSet, key: &str, domain: &str, wildcard: bool, present: bool) {
    if domain.contains('/') || domain.trim_start_matches("*.").is_empty() {
        warn!(annotation = key, "Invalid domain annotation, ignoring");
        return;
    }

    match DomainClaim::new(domain, wildcard, present) {
        Some(claim) => claims.insert(claim),
        None => warn!(annotation = key, domain, "Invalid dns record: {}, ignoring", domain),
    }
}
