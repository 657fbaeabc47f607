use crate::domain::countdown::remaining_minutes_ceil;
use crate::domain::models::{
    BlockedSite, NativeBlockRule, Redirect, ResourceType, RuleAction, RuleActionType,
    RuleCondition,
};
use crate::domain::registry::normalize;
use crate::infrastructure::config::EngineConfig;
use crate::infrastructure::error::InfraError;
use url::{Url, form_urlencoded};

const BLOCKED_ROUTE: &str = "blocked";
const PARAM_SITE: &str = "site";
const PARAM_TIME_LEFT: &str = "timeLeft";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSettings {
    pub blocked_page_url: String,
    pub priority: u32,
}

impl From<&EngineConfig> for RuleSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            blocked_page_url: config.blocked_page_url.clone(),
            priority: config.rule_priority,
        }
    }
}

impl Default for RuleSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

pub fn url_filter_for(site: &BlockedSite) -> String {
    format!("||{}/*", normalize(&site.url))
}

pub fn encode_block_rule(
    site: &BlockedSite,
    id: u32,
    now_ms: i64,
    settings: &RuleSettings,
) -> NativeBlockRule {
    let time_left = remaining_minutes_ceil(site.end_time, now_ms);
    NativeBlockRule {
        id,
        priority: settings.priority,
        action: RuleAction {
            action_type: RuleActionType::Redirect,
            redirect: Some(Redirect {
                url: blocked_page_url(&settings.blocked_page_url, &site.url, time_left),
            }),
        },
        condition: RuleCondition {
            url_filter: url_filter_for(site),
            resource_types: vec![ResourceType::MainFrame],
        },
    }
}

/// `<page>#blocked?site=<encoded url>&timeLeft=<minutes>`
pub fn blocked_page_url(page_url: &str, site_url: &str, time_left_minutes: u64) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair(PARAM_SITE, site_url)
        .append_pair(PARAM_TIME_LEFT, &time_left_minutes.to_string())
        .finish();
    format!("{page_url}#{BLOCKED_ROUTE}?{query}")
}

pub fn is_blocked_page(url: &str) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.fragment().map(|fragment| fragment.starts_with(BLOCKED_ROUTE)))
        .unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedPageAddress {
    pub site: String,
    /// Advisory only; the view recomputes remaining time from storage.
    pub time_left_minutes: Option<u64>,
}

impl BlockedPageAddress {
    pub fn parse(url: &str) -> Result<Self, InfraError> {
        let parsed = Url::parse(url)
            .map_err(|error| InfraError::InvalidAddress(format!("'{url}': {error}")))?;
        let fragment = parsed
            .fragment()
            .ok_or_else(|| InfraError::InvalidAddress(format!("'{url}' has no fragment")))?;
        Self::parse_fragment(fragment)
    }

    pub fn parse_fragment(fragment: &str) -> Result<Self, InfraError> {
        let fragment = fragment.strip_prefix('#').unwrap_or(fragment);
        let query = fragment
            .strip_prefix(BLOCKED_ROUTE)
            .ok_or_else(|| {
                InfraError::InvalidAddress(format!("fragment '{fragment}' is not a blocked route"))
            })?
            .trim_start_matches('?');

        let mut site = None;
        let mut time_left_minutes = None;
        for (name, value) in form_urlencoded::parse(query.as_bytes()) {
            match name.as_ref() {
                PARAM_SITE => site = Some(value.trim().to_string()),
                PARAM_TIME_LEFT => time_left_minutes = value.trim().parse::<u64>().ok(),
                _ => {}
            }
        }

        let site = site
            .filter(|value| !value.is_empty())
            .ok_or_else(|| InfraError::InvalidAddress("missing site parameter".to_string()))?;
        Ok(Self {
            site,
            time_left_minutes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_redirects_main_frame_to_blocked_page() {
        let site = BlockedSite::new("facebook.com", 5, 0);
        let rule = encode_block_rule(&site, 1, 0, &RuleSettings::default());

        assert_eq!(rule.id, 1);
        assert_eq!(rule.priority, 1);
        assert_eq!(rule.condition.url_filter, "||facebook.com/*");
        assert_eq!(rule.condition.resource_types, vec![ResourceType::MainFrame]);
        assert_eq!(
            rule.redirect_url(),
            Some("chrome-extension://siteblock/index.html#blocked?site=facebook.com&timeLeft=5")
        );
    }

    #[test]
    fn time_left_rounds_up_to_whole_minutes() {
        let site = BlockedSite::new("a.com", 5, 0);
        let rule = encode_block_rule(&site, 3, 61_000, &RuleSettings::default());
        let address = BlockedPageAddress::parse(rule.redirect_url().expect("redirect"))
            .expect("parse address");
        assert_eq!(address.time_left_minutes, Some(4));
    }

    #[test]
    fn address_decodes_encoded_site() {
        let url = blocked_page_url("chrome-extension://id/index.html", "https://a.com/x?y=1&z", 7);
        assert!(is_blocked_page(&url));

        let address = BlockedPageAddress::parse(&url).expect("parse");
        assert_eq!(address.site, "https://a.com/x?y=1&z");
        assert_eq!(address.time_left_minutes, Some(7));
    }

    #[test]
    fn address_tolerates_garbled_time_left() {
        let address =
            BlockedPageAddress::parse_fragment("#blocked?site=a.com&timeLeft=soon").expect("parse");
        assert_eq!(address.site, "a.com");
        assert_eq!(address.time_left_minutes, None);
    }

    #[test]
    fn address_without_site_is_rejected() {
        assert!(matches!(
            BlockedPageAddress::parse("chrome-extension://id/index.html#blocked?timeLeft=3"),
            Err(InfraError::InvalidAddress(_))
        ));
        assert!(matches!(
            BlockedPageAddress::parse("chrome-extension://id/index.html"),
            Err(InfraError::InvalidAddress(_))
        ));
        assert!(!is_blocked_page("chrome-extension://id/index.html#settings"));
    }
}
