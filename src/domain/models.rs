use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MILLIS_PER_MINUTE: i64 = 60 * 1000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlockedSite {
    pub url: String,
    /// Requested block duration in minutes.
    pub time_blocked: u32,
    pub start_time: i64,
    pub end_time: i64,
}

impl BlockedSite {
    pub fn new(url: impl Into<String>, minutes: u32, now_ms: i64) -> Self {
        Self {
            url: url.into(),
            time_blocked: minutes,
            start_time: now_ms,
            end_time: now_ms + i64::from(minutes) * MILLIS_PER_MINUTE,
        }
    }

    pub fn duration_ms(&self) -> i64 {
        i64::from(self.time_blocked) * MILLIS_PER_MINUTE
    }

    pub fn is_active_at(&self, now_ms: i64) -> bool {
        self.end_time > now_ms
    }

    pub fn end_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.end_time)
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.url, "site.url")?;
        if self.end_time != self.start_time + self.duration_ms() {
            return Err("site.end_time must equal start_time + time_blocked minutes".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimeTrackingEntry {
    /// Accumulated minutes, fractional.
    pub total_time_blocked: f64,
    pub last_blocked: i64,
}

impl Default for TimeTrackingEntry {
    fn default() -> Self {
        Self {
            total_time_blocked: 0.0,
            last_blocked: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct UserPreferences {
    #[serde(default)]
    pub blocked_sites: Vec<BlockedSite>,
    #[serde(default)]
    pub time_tracking: BTreeMap<String, TimeTrackingEntry>,
}

impl UserPreferences {
    pub fn validate(&self) -> Result<(), String> {
        for site in &self.blocked_sites {
            site.validate()?;
        }
        for (host, entry) in &self.time_tracking {
            validate_non_empty(host, "time_tracking key")?;
            if !entry.total_time_blocked.is_finite() || entry.total_time_blocked < 0.0 {
                return Err(format!(
                    "time_tracking[{host}].total_time_blocked must be a non-negative number"
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    MainFrame,
    SubFrame,
    Script,
    Image,
    XmlHttpRequest,
    Other,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleActionType {
    Block,
    Redirect,
    Allow,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Redirect {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleAction {
    #[serde(rename = "type")]
    pub action_type: RuleActionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<Redirect>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RuleCondition {
    pub url_filter: String,
    pub resource_types: Vec<ResourceType>,
}

/// Declarative rule handed to the browser's blocking engine. Derived on every
/// reconciliation pass, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NativeBlockRule {
    pub id: u32,
    pub priority: u32,
    pub action: RuleAction,
    pub condition: RuleCondition,
}

impl NativeBlockRule {
    pub fn redirect_url(&self) -> Option<&str> {
        self.action.redirect.as_ref().map(|redirect| redirect.url.as_str())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.id == 0 {
            return Err("rule.id must be >= 1".to_string());
        }
        validate_non_empty(&self.condition.url_filter, "rule.condition.url_filter")?;
        if self.condition.resource_types.is_empty() {
            return Err("rule.condition.resource_types must not be empty".to_string());
        }
        if self.action.action_type == RuleActionType::Redirect && self.action.redirect.is_none() {
            return Err("redirect rule requires action.redirect".to_string());
        }
        Ok(())
    }
}

fn validate_non_empty(value: &str, field: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field} must not be empty"));
    }
    Ok(())
}
