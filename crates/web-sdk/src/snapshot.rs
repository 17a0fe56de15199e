//! Campaign snapshot — UTM attribution plus environment metadata for one
//! page load.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::events::PageContext;

pub const UTM_SOURCE: &str = "utm_source";
pub const UTM_MEDIUM: &str = "utm_medium";
pub const UTM_CAMPAIGN: &str = "utm_campaign";
pub const UTM_CONTENT: &str = "utm_content";

/// The four attribution parameters. Missing parameters are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtmParams {
    pub source: String,
    pub medium: String,
    pub campaign: String,
    pub content: String,
}

impl UtmParams {
    /// Pull UTM parameters out of a page URL. When a parameter repeats, the
    /// first occurrence wins. An unparseable URL yields no parameters.
    pub fn from_url(href: &str) -> Self {
        let url = match Url::parse(href) {
            Ok(url) => url,
            Err(e) => {
                warn!(url = href, error = %e, "cannot parse page url, no utm parameters");
                return Self::default();
            }
        };

        let mut params = Self::default();
        let mut seen = [false; 4];
        for (key, value) in url.query_pairs() {
            let (slot, idx) = match &*key {
                UTM_SOURCE => (&mut params.source, 0),
                UTM_MEDIUM => (&mut params.medium, 1),
                UTM_CAMPAIGN => (&mut params.campaign, 2),
                UTM_CONTENT => (&mut params.content, 3),
                _ => continue,
            };
            if !seen[idx] {
                *slot = value.into_owned();
                seen[idx] = true;
            }
        }
        params
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
            && self.medium.is_empty()
            && self.campaign.is_empty()
            && self.content.is_empty()
    }
}

/// Snapshot persisted under the `<prefix>_utm` key in both storage scopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignSnapshot {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub medium: String,
    #[serde(default)]
    pub campaign: String,
    #[serde(default)]
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub referrer: String,
    #[serde(default)]
    pub landing_page: String,
}

impl CampaignSnapshot {
    pub fn capture(ctx: &PageContext, now: DateTime<Utc>) -> Self {
        let UtmParams {
            source,
            medium,
            campaign,
            content,
        } = UtmParams::from_url(&ctx.url);

        Self {
            source,
            medium,
            campaign,
            content,
            timestamp: now,
            user_agent: ctx.user_agent.clone(),
            referrer: ctx.referrer.clone(),
            landing_page: ctx.url.clone(),
        }
    }

    pub fn utm(&self) -> UtmParams {
        UtmParams {
            source: self.source.clone(),
            medium: self.medium.clone(),
            campaign: self.campaign.clone(),
            content: self.content.clone(),
        }
    }
}
