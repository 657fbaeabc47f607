//! Pure bookkeeping over the blocked-site list and the time-tracking map.
//!
//! Nothing in here touches storage: callers load [`UserPreferences`], run these
//! functions and persist the result themselves, so the same logic serves the
//! popup, the background reconciler and tests.
//!
//! [`UserPreferences`]: crate::domain::models::UserPreferences

use crate::domain::models::{BlockedSite, MILLIS_PER_MINUTE, TimeTrackingEntry};
use std::collections::BTreeMap;
use thiserror::Error;
use url::Url;

const WWW_PREFIX: &str = "www.";

pub type TimeTracking = BTreeMap<String, TimeTrackingEntry>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("site is already blocked: {0}")]
    AlreadyBlocked(String),
    #[error("site url must not be empty")]
    EmptyUrl,
    #[error("block duration must be at least one minute")]
    ZeroDuration,
}

/// Reduces a user-typed URL to the hostname used as the uniqueness key.
///
/// Drops an `http`/`https` scheme, any port, path or credentials, lowercases
/// the host and strips leading `www.` labels. Input the URL parser rejects is
/// stripped by hand instead, so this never fails.
pub fn normalize(raw: &str) -> String {
    let trimmed = raw.trim();
    let rest = strip_http_scheme(trimmed);
    let host = parse_host(rest).unwrap_or_else(|| best_effort_host(rest));
    strip_www(&host).to_string()
}

fn strip_http_scheme(value: &str) -> &str {
    for scheme in ["https://", "http://"] {
        let matches = value
            .get(..scheme.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme));
        if matches {
            return &value[scheme.len()..];
        }
    }
    value
}

fn parse_host(rest: &str) -> Option<String> {
    if rest.is_empty() {
        return None;
    }
    let parsed = Url::parse(&format!("http://{rest}")).ok()?;
    parsed
        .host_str()
        .filter(|host| !host.is_empty())
        .map(str::to_ascii_lowercase)
}

fn best_effort_host(rest: &str) -> String {
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    rest[..end].to_ascii_lowercase()
}

fn strip_www(host: &str) -> &str {
    let mut current = host;
    while let Some(stripped) = current.strip_prefix(WWW_PREFIX) {
        if stripped.is_empty() {
            break;
        }
        current = stripped;
    }
    current
}

pub fn find_site<'a>(sites: &'a [BlockedSite], url: &str) -> Option<&'a BlockedSite> {
    let key = normalize(url);
    sites.iter().find(|site| normalize(&site.url) == key)
}

pub fn is_blocked(sites: &[BlockedSite], url: &str) -> bool {
    find_site(sites, url).is_some()
}

/// Appends a new block starting at `now_ms`. Re-adding a site that is already
/// blocked is rejected rather than extended.
pub fn add_site(
    sites: &[BlockedSite],
    url: &str,
    minutes: u32,
    now_ms: i64,
) -> Result<Vec<BlockedSite>, RegistryError> {
    let host = normalize(url);
    if host.is_empty() {
        return Err(RegistryError::EmptyUrl);
    }
    if minutes == 0 {
        return Err(RegistryError::ZeroDuration);
    }
    if is_blocked(sites, &host) {
        return Err(RegistryError::AlreadyBlocked(host));
    }

    let mut updated = sites.to_vec();
    updated.push(BlockedSite::new(host, minutes, now_ms));
    Ok(updated)
}

pub fn remove_site(sites: &[BlockedSite], url: &str) -> Vec<BlockedSite> {
    let key = normalize(url);
    sites
        .iter()
        .filter(|site| normalize(&site.url) != key)
        .cloned()
        .collect()
}

pub fn prune_expired(sites: &[BlockedSite], now_ms: i64) -> Vec<BlockedSite> {
    sites
        .iter()
        .filter(|site| site.is_active_at(now_ms))
        .cloned()
        .collect()
}

pub fn expired_sites(sites: &[BlockedSite], now_ms: i64) -> Vec<BlockedSite> {
    sites
        .iter()
        .filter(|site| !site.is_active_at(now_ms))
        .cloned()
        .collect()
}

/// Earliest `end_time` still in the future, if any.
pub fn next_expiry(sites: &[BlockedSite], now_ms: i64) -> Option<i64> {
    sites
        .iter()
        .filter(|site| site.is_active_at(now_ms))
        .map(|site| site.end_time)
        .min()
}

/// Minutes actually spent blocked, capped at the requested duration.
pub fn elapsed_minutes(site: &BlockedSite, now_ms: i64) -> f64 {
    let elapsed = (now_ms - site.start_time).clamp(0, site.duration_ms());
    elapsed as f64 / MILLIS_PER_MINUTE as f64
}

pub fn accrue_time_on_removal(
    tracking: &TimeTracking,
    removed: &BlockedSite,
    now_ms: i64,
) -> TimeTracking {
    let host = normalize(&removed.url);
    let mut updated = tracking.clone();
    let entry = updated.entry(host).or_default();
    entry.total_time_blocked += elapsed_minutes(removed, now_ms);
    entry.last_blocked = now_ms;
    updated
}

/// Records that `host` was just blocked without changing its accumulated total.
pub fn mark_blocked(tracking: &TimeTracking, url: &str, now_ms: i64) -> TimeTracking {
    let mut updated = tracking.clone();
    updated.entry(normalize(url)).or_default().last_blocked = now_ms;
    updated
}
