//! Mastodon feed: public statuses of one account, boosts unwrapped and
//! custom emoji inlined.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{AUTHORIZATION, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;

use crate::content::{self, LinkPolicy};
use crate::feed::{FeedAdapter, FeedItem};

const AVATAR_URL: &str = "https://home.zsxcoder.top/api/avatar.png";

static EMOJI_SHORTCODE: Lazy<Regex> = Lazy::new(|| Regex::new(r":(\w+):").unwrap());
static INVISIBLE_SPAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<span class="invisible">([^<]+)</span>"#).unwrap());

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Instance hostname, e.g. `mastodon.social`.
    pub instance: String,
    pub user_id: String,
    pub token: Option<String>,
    pub tag: Option<String>,
    pub shown_max: usize,
    pub user_agent: String,
    pub link_policy: LinkPolicy,
    pub http_client: Option<HttpClient>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            instance: String::new(),
            user_id: String::new(),
            token: None,
            tag: None,
            shown_max: 15,
            user_agent: String::new(),
            link_policy: LinkPolicy::default(),
            http_client: None,
        }
    }
}

pub struct Client {
    http: HttpClient,
    instance: String,
    user_id: String,
    token: Option<String>,
    tag: Option<String>,
    shown_max: usize,
    user_agent: String,
    link_policy: LinkPolicy,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Status {
    content: String,
    created_at: Option<Value>,
    emojis: Vec<CustomEmoji>,
    media_attachments: Vec<MediaAttachment>,
    reblog: Option<Box<Status>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CustomEmoji {
    shortcode: String,
    static_url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MediaAttachment {
    #[serde(rename = "type")]
    kind: String,
    url: String,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.instance.trim().is_empty() || config.user_id.trim().is_empty() {
            bail!("mastodon instance and user id required");
        }
        if config.user_agent.trim().is_empty() {
            bail!("mastodon client user agent required");
        }

        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(Duration::from_secs(20))
                .build()?,
        };

        Ok(Client {
            http,
            instance: config.instance,
            user_id: config.user_id,
            token: config.token,
            tag: config.tag,
            shown_max: config.shown_max,
            user_agent: config.user_agent,
            link_policy: config.link_policy,
        })
    }

    fn statuses_url(&self) -> String {
        format!(
            "https://{}/api/v1/accounts/{}/statuses?tagged={}&exclude_replies=true",
            self.instance,
            self.user_id,
            self.tag.as_deref().unwrap_or("")
        )
    }

    fn map_status(&self, status: Status) -> FeedItem {
        // A boost carries no body of its own, everything comes from the
        // boosted status.
        let status = match status.reblog {
            Some(inner) => *inner,
            None => status,
        };

        let created_at = status
            .created_at
            .as_ref()
            .and_then(content::parse_timestamp)
            .unwrap_or_default();

        let mut item = FeedItem::new("钟神秀", created_at);
        item.avatar_url = AVATAR_URL.to_string();
        item.tags = vec!["日常".to_string()];
        item.content_html = format_content(&status.content, &status.emojis, &self.link_policy);
        item.plain_text = content::strip_html(&item.content_html);
        item.image_urls = status
            .media_attachments
            .into_iter()
            .filter(|m| m.kind == "image" && !m.url.is_empty())
            .map(|m| m.url)
            .collect();
        item
    }
}

/// Inlines `:shortcode:` custom emoji, drops the invisible URL-ellipsis
/// spans Mastodon wraps links in, and rewrites anchors through the safe-link
/// policy. Unknown shortcodes stay as literal text.
fn format_content(content: &str, emojis: &[CustomEmoji], policy: &LinkPolicy) -> String {
    let mut formatted = EMOJI_SHORTCODE
        .replace_all(content, |caps: &Captures<'_>| {
            match emojis.iter().find(|e| e.shortcode == caps[1]) {
                Some(emoji) => format!(r#"<img class="emoji" src="{}"/>"#, emoji.static_url),
                None => caps[0].to_string(),
            }
        })
        .into_owned();
    formatted = INVISIBLE_SPAN.replace_all(&formatted, "$1").into_owned();
    formatted = policy.rewrite_anchors(&formatted);
    formatted.replace('\n', "<br>")
}

impl FeedAdapter for Client {
    fn source(&self) -> &'static str {
        "mastodon"
    }

    fn fetch(&self) -> Result<Value> {
        let mut request = self
            .http
            .get(self.statuses_url())
            .header(USER_AGENT, &self.user_agent);
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = request.send().context("mastodon: request")?;
        if !response.status().is_success() {
            bail!("mastodon: upstream status {}", response.status());
        }
        let data: Value = response.json().context("mastodon: decode response")?;
        if !data.is_array() {
            bail!("mastodon: expected a status array");
        }
        Ok(data)
    }

    fn items(&self, raw: &Value) -> Vec<FeedItem> {
        let Some(entries) = raw.as_array() else {
            return Vec::new();
        };
        entries
            .iter()
            .take(self.shown_max.max(1))
            .filter_map(|entry| {
                serde_json::from_value::<Status>(entry.clone())
                    .map_err(|err| log::debug!("mastodon: skipping malformed status: {err}"))
                    .ok()
            })
            .map(|status| self.map_status(status))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> Client {
        Client::new(ClientConfig {
            instance: "mastodon.example".to_string(),
            user_id: "1".to_string(),
            shown_max: 2,
            user_agent: "moments-test".to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn custom_emoji_become_inline_images() {
        let emojis = vec![CustomEmoji {
            shortcode: "blobcat".to_string(),
            static_url: "https://files/blobcat.png".to_string(),
        }];
        let out = format_content("hi :blobcat: and :unknown:", &emojis, &LinkPolicy::default());
        assert!(out.contains(r#"<img class="emoji" src="https://files/blobcat.png"/>"#));
        assert!(out.contains(":unknown:"));
    }

    #[test]
    fn invisible_spans_unwrap_and_anchors_reroute() {
        let html = concat!(
            r#"<a href="https://evil.test/x"><span class="invisible">https://</span>evil.test/x</a>"#
        );
        let out = format_content(html, &[], &LinkPolicy::default());
        assert!(out.contains("/safego?url=https%3A%2F%2Fevil.test%2Fx"));
        assert!(!out.contains("invisible"));
    }

    #[test]
    fn boosts_unwrap_to_the_original_status() {
        let raw = json!([{
            "content": "",
            "reblog": {
                "content": "<p>boosted</p>",
                "created_at": "2024-01-02T03:04:05Z",
                "media_attachments": [
                    { "type": "image", "url": "https://img/a.png" },
                    { "type": "video", "url": "https://img/b.mp4" }
                ]
            }
        }]);
        let items = client().items(&raw);
        assert!(items[0].content_html.contains("boosted"));
        assert_eq!(items[0].image_urls, vec!["https://img/a.png"]);
        assert_eq!(items[0].created_at.timestamp(), 1_704_164_645);
    }

    #[test]
    fn list_is_capped_at_shown_max() {
        let raw = json!([
            { "content": "a" }, { "content": "b" }, { "content": "c" }
        ]);
        assert_eq!(client().items(&raw).len(), 2);
    }
}
