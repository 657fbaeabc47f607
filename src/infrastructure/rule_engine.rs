use crate::domain::models::{NativeBlockRule, ResourceType};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use url::Url;

pub const DEFAULT_MAX_DYNAMIC_RULES: usize = 5000;

/// One batch for the browser's dynamic rule set. Removals are applied before
/// additions and the whole batch either lands or is rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleUpdate {
    #[serde(default)]
    pub remove_rule_ids: Vec<u32>,
    #[serde(default)]
    pub add_rules: Vec<NativeBlockRule>,
}

impl RuleUpdate {
    pub fn is_empty(&self) -> bool {
        self.remove_rule_ids.is_empty() && self.add_rules.is_empty()
    }
}

#[async_trait]
pub trait RuleEngine: Send + Sync {
    async fn update_dynamic_rules(&self, update: RuleUpdate) -> Result<(), InfraError>;

    async fn get_dynamic_rules(&self) -> Result<Vec<NativeBlockRule>, InfraError>;
}

#[derive(Debug)]
pub struct InMemoryRuleEngine {
    rules: Mutex<BTreeMap<u32, NativeBlockRule>>,
    max_rules: usize,
}

impl Default for InMemoryRuleEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DYNAMIC_RULES)
    }
}

impl InMemoryRuleEngine {
    pub fn new(max_rules: usize) -> Self {
        Self {
            rules: Mutex::new(BTreeMap::new()),
            max_rules,
        }
    }

    fn lock_rules(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<u32, NativeBlockRule>>, InfraError> {
        self.rules
            .lock()
            .map_err(|error| InfraError::RuleEngine(format!("rule engine lock poisoned: {error}")))
    }

    /// Where a navigation to `url` would be sent, if any installed rule matches.
    /// Highest priority wins; ties go to the lowest rule id.
    pub fn redirect_for(&self, url: &str, resource_type: ResourceType) -> Result<Option<String>, InfraError> {
        let rules = self.lock_rules()?;
        let mut best: Option<&NativeBlockRule> = None;
        for rule in rules.values() {
            if !rule.condition.resource_types.contains(&resource_type) {
                continue;
            }
            if !url_filter_matches(&rule.condition.url_filter, url) {
                continue;
            }
            if best.is_none_or(|current| rule.priority > current.priority) {
                best = Some(rule);
            }
        }
        Ok(best.and_then(|rule| rule.redirect_url().map(ToOwned::to_owned)))
    }
}

#[async_trait]
impl RuleEngine for InMemoryRuleEngine {
    async fn update_dynamic_rules(&self, update: RuleUpdate) -> Result<(), InfraError> {
        let mut rules = self.lock_rules()?;
        let mut next = rules.clone();

        for id in &update.remove_rule_ids {
            next.remove(id);
        }
        for rule in update.add_rules {
            rule.validate().map_err(InfraError::RuleEngine)?;
            let id = rule.id;
            if next.insert(id, rule).is_some() {
                return Err(InfraError::RuleEngine(format!("duplicate rule id {id}")));
            }
        }
        if next.len() > self.max_rules {
            return Err(InfraError::RuleEngine(format!(
                "dynamic rule quota exceeded: {} > {}",
                next.len(),
                self.max_rules
            )));
        }

        *rules = next;
        Ok(())
    }

    async fn get_dynamic_rules(&self) -> Result<Vec<NativeBlockRule>, InfraError> {
        Ok(self.lock_rules()?.values().cloned().collect())
    }
}

/// Supports the `||domain` anchor form (with an optional `/*` tail), which
/// matches the domain and its subdomains. Other filters match as substrings.
fn url_filter_matches(filter: &str, url: &str) -> bool {
    let Some(anchored) = filter.strip_prefix("||") else {
        return url.contains(filter.trim_matches('*'));
    };
    let domain = anchored
        .split(['/', '^', '*'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    if domain.is_empty() {
        return false;
    }

    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    host == domain || host.ends_with(&format!(".{domain}"))
}
