//! Telegram feed: a channel mirror API returning `ChannelMessageData`.
//! Tag chips and the view counter live inside the body here, not in the
//! card footer.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::USER_AGENT;
use serde::Deserialize;
use serde_json::Value;

use crate::content::{self, escape_html};
use crate::feed::{FeedAdapter, FeedItem};

pub const DEFAULT_ENDPOINT: &str = "https://tg-api.mcyzsx.top/";
const AVATAR_URL: &str = "https://home.zsxcoder.top/api/avatar.png";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: String,
    pub user_agent: String,
    pub http_client: Option<HttpClient>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            user_agent: String::new(),
            http_client: None,
        }
    }
}

pub struct Client {
    http: HttpClient,
    endpoint: String,
    user_agent: String,
}

#[derive(Debug, Deserialize)]
struct ChannelResponse {
    #[serde(rename = "ChannelMessageData", default)]
    messages: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Message {
    time: Option<Value>,
    text: Option<String>,
    image: Vec<String>,
    tags: Vec<String>,
    views: Option<Value>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("telegram client user agent required");
        }

        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(Duration::from_secs(20))
                .build()?,
        };

        Ok(Client {
            http,
            endpoint: config.endpoint,
            user_agent: config.user_agent,
        })
    }

    fn map_message(message: Message) -> FeedItem {
        let created_at = message
            .time
            .as_ref()
            .and_then(content::parse_timestamp)
            .unwrap_or_default();

        let mut item = FeedItem::new("钟神秀", created_at);
        item.avatar_url = AVATAR_URL.to_string();

        // Channel text arrives pre-wrapped; collapse the whitespace noise
        // and expand the `---` separator.
        let mut body = collapse_whitespace(message.text.as_deref().unwrap_or(""));
        body = body.replace("---", r#"<hr class="markdown-separator">"#);

        if !message.tags.is_empty() {
            let chips: Vec<String> = message
                .tags
                .iter()
                .map(|tag| format!(r#"<span class="tag">#{}</span>"#, escape_html(tag)))
                .collect();
            body.push_str(&format!(r#"<div class="tags">{}</div>"#, chips.join(" ")));
        }

        if let Some(views) = views_text(message.views.as_ref()) {
            body.push_str(&format!(r#"<div class="views">👁️ {views}</div>"#));
        }

        item.plain_text = content::strip_html(&body);
        item.content_html = body;
        item.image_urls = message
            .image
            .into_iter()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();
        item
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn views_text(views: Option<&Value>) -> Option<String> {
    match views? {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(num) => Some(num.to_string()),
        _ => None,
    }
}

impl FeedAdapter for Client {
    fn source(&self) -> &'static str {
        "telegram"
    }

    fn cache_key(&self) -> String {
        "tgMessagesCache".to_string()
    }

    fn fetch(&self) -> Result<Value> {
        let response = self
            .http
            .get(&self.endpoint)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .context("telegram: request")?;
        if !response.status().is_success() {
            bail!("telegram: upstream status {}", response.status());
        }
        let data: ChannelResponse = response.json().context("telegram: decode response")?;
        match data.messages {
            Some(messages) if messages.is_array() => Ok(messages),
            _ => bail!("telegram: response missing ChannelMessageData"),
        }
    }

    fn items(&self, raw: &Value) -> Vec<FeedItem> {
        let Some(entries) = raw.as_array() else {
            return Vec::new();
        };
        entries
            .iter()
            .filter_map(|entry| {
                serde_json::from_value::<Message>(entry.clone())
                    .map_err(|err| log::debug!("telegram: skipping malformed message: {err}"))
                    .ok()
            })
            .map(Client::map_message)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> Client {
        Client::new(ClientConfig {
            user_agent: "moments-test".to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn whitespace_collapses_and_separator_expands() {
        let raw = json!([{
            "time": "2024-05-01T08:00:00Z",
            "text": "line one\n\n   line two --- after"
        }]);
        let items = client().items(&raw);
        assert!(items[0]
            .content_html
            .starts_with("line one line two"));
        assert!(items[0]
            .content_html
            .contains(r#"<hr class="markdown-separator">"#));
    }

    #[test]
    fn tags_and_views_append_as_fragments() {
        let raw = json!([{
            "text": "hi",
            "tags": ["daily", "dev"],
            "views": 321,
            "image": [" https://img/a.png ", ""]
        }]);
        let items = client().items(&raw);
        assert!(items[0].content_html.contains(r#"<span class="tag">#daily</span>"#));
        assert!(items[0].content_html.contains("👁️ 321"));
        assert_eq!(items[0].image_urls, vec!["https://img/a.png"]);
    }

    #[test]
    fn missing_text_yields_an_empty_body() {
        let raw = json!([{ "views": null }]);
        let items = client().items(&raw);
        assert_eq!(items[0].content_html, "");
        assert_eq!(items[0].author, "钟神秀");
    }
}
