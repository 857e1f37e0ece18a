//! Memos feed: the icefox moments endpoint (`action/icefox?do=getPostData`).
//! Bodies are full markdown here, unlike the talks source.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use pulldown_cmark::{html, Options, Parser};
use regex::Regex;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::USER_AGENT;
use serde::Deserialize;
use serde_json::Value;

use crate::content::{self, LinkPolicy};
use crate::feed::{Attachment, FeedAdapter, FeedItem, VideoEmbed};

pub const DEFAULT_ENDPOINT: &str = "https://pyq.mcyzsx.top/action/icefox?do=getPostData";
const AVATAR_URL: &str = "https://home.zsxcoder.top/api/avatar.png";
const METING_API: &str =
    "https://met.liiiu.cn/meting/api?server=:server&type=:type&id=:id&auth=:auth&r=:r";

static MUSIC_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"id=(\d+)").unwrap());
static IMG_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<img src="([^"]+)" alt="([^"]*)"\s*/?>"#).unwrap());

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: String,
    pub user_agent: String,
    pub link_policy: LinkPolicy,
    pub http_client: Option<HttpClient>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            user_agent: String::new(),
            link_policy: LinkPolicy::default(),
            http_client: None,
        }
    }
}

pub struct Client {
    http: HttpClient,
    endpoint: String,
    user_agent: String,
    link_policy: LinkPolicy,
}

#[derive(Debug, Deserialize)]
struct PostResponse {
    code: i64,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MemoRecord {
    content: Option<String>,
    /// Epoch seconds, sometimes delivered as a string.
    created_at: Option<Value>,
    username: Option<String>,
    position: Option<String>,
    #[serde(rename = "positionUrl")]
    position_url: Option<String>,
    tags: Vec<MemoTag>,
    images: Vec<MemoImage>,
    extension_type: Option<String>,
    extension: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MemoTag {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MemoImage {
    image_url: String,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("memos client user agent required");
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
            link_policy: config.link_policy,
        })
    }

    fn map_record(&self, record: MemoRecord) -> FeedItem {
        let created_at = record
            .created_at
            .as_ref()
            .and_then(content::parse_timestamp)
            .unwrap_or_default();

        let author = record
            .username
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "钟神秀".to_string());

        let raw_content = record.content.unwrap_or_default();

        let mut item = FeedItem::new(author, created_at);
        item.avatar_url = AVATAR_URL.to_string();
        item.location = record.position.filter(|p| !p.is_empty());
        item.location_url = record.position_url.filter(|u| !u.is_empty());

        let tags: Vec<String> = record
            .tags
            .into_iter()
            .map(|t| t.name)
            .filter(|n| !n.is_empty())
            .collect();
        item.tags = if tags.is_empty() {
            vec!["icefox朋友圈".to_string()]
        } else {
            tags
        };

        item.image_urls = record
            .images
            .into_iter()
            .filter(|img| !img.image_url.is_empty())
            .map(|img| format!("{}?fmt=webp&q=75", img.image_url))
            .collect();

        item.content_html = render_markdown(&raw_content, &self.link_policy);
        item.plain_text =
            content::strip_html(&content::replace_markdown_links(&raw_content, "[链接]"));

        let extension_text = record.extension.as_ref().map(extension_as_text);
        match record.extension_type.as_deref() {
            Some("WEBSITE") => {
                if let Some((url, title)) = website_extension(record.extension.as_ref()) {
                    item.attachments.push(Attachment::Website {
                        url,
                        title,
                        favicon: String::new(),
                    });
                }
            }
            Some("GITHUBPROJ") => {
                if let Some((url, _)) = website_extension(record.extension.as_ref()) {
                    let title = content::github_project_title(&url);
                    item.attachments.push(Attachment::GithubProject { url, title });
                }
            }
            Some("MUSIC") => {
                if let Some(link) = extension_text.as_deref() {
                    if let Some(attachment) = music_attachment(link) {
                        item.attachments.push(attachment);
                    }
                }
            }
            Some("VIDEO") => {
                if let Some(video) = extension_text.as_deref().filter(|v| !v.is_empty()) {
                    item.attachments.push(Attachment::Video(video_embed(video)));
                }
            }
            _ => {}
        }

        item
    }
}

/// Full markdown rendering with the source's local conventions applied:
/// checklist glyphs, zoomable images, and the safe-link anchor rewrite.
fn render_markdown(text: &str, policy: &LinkPolicy) -> String {
    let prepared = text.replace("- [ ]", "⚪").replace("- [x]", "⚫");

    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let parser = Parser::new_ext(&prepared, options);
    let mut rendered = String::new();
    html::push_html(&mut rendered, parser);

    let rendered = IMG_TAG
        .replace_all(&rendered, r#"<img src="$1" alt="$2" class="zoomable">"#)
        .into_owned();
    policy.rewrite_anchors(&rendered)
}

/// The extension field arrives either as a JSON object or a bare string.
fn extension_as_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Site URL and title from the WEBSITE/GITHUBPROJ extension. The payload is
/// a JSON object (possibly serialized into a string) with `site`/`url` and
/// `title`, falling back to the raw value.
fn website_extension(value: Option<&Value>) -> Option<(String, String)> {
    let value = value?;
    let parsed: Option<Value> = match value {
        Value::String(text) => serde_json::from_str(text).ok(),
        Value::Object(_) => Some(value.clone()),
        _ => None,
    };

    let raw = extension_as_text(value);
    if let Some(Value::Object(obj)) = parsed {
        let url = obj
            .get("site")
            .or_else(|| obj.get("url"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| raw.clone());
        let title = obj
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| url.clone());
        return Some((url, title));
    }
    if raw.is_empty() {
        return None;
    }
    Some((raw.clone(), raw))
}

fn music_attachment(link: &str) -> Option<Attachment> {
    let server = if link.contains("music.163.com") {
        "netease"
    } else if link.contains("y.qq.com") {
        "tencent"
    } else {
        return None;
    };
    let id = MUSIC_ID.captures(link)?.get(1)?.as_str().to_string();
    Some(Attachment::Music {
        server: server.to_string(),
        kind: "song".to_string(),
        id,
        api: Some(METING_API.to_string()),
    })
}

fn video_embed(video: &str) -> VideoEmbed {
    if video.starts_with("BV") {
        VideoEmbed::Bilibili {
            embed_url: format!(
                "https://www.bilibili.com/blackboard/html5mobileplayer.html?bvid={video}&as_wide=1&high_quality=1&danmaku=0"
            ),
        }
    } else {
        VideoEmbed::Youtube {
            embed_url: format!("https://www.youtube.com/embed/{video}"),
        }
    }
}

impl FeedAdapter for Client {
    fn source(&self) -> &'static str {
        "memos"
    }

    fn fetch(&self) -> Result<Value> {
        let response = self
            .http
            .get(&self.endpoint)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .context("memos: request")?;
        if !response.status().is_success() {
            bail!("memos: upstream status {}", response.status());
        }
        let response: PostResponse = response.json().context("memos: decode response")?;

        if response.code != 1 {
            bail!("memos: upstream code {}", response.code);
        }
        let Some(data) = response.data else {
            bail!("memos: response missing data");
        };

        // The endpoint returns either a list under `items` or one bare post.
        if let Some(items) = data.get("items").filter(|v| v.is_array()) {
            return Ok(items.clone());
        }
        if data.get("id").is_some() {
            return Ok(Value::Array(vec![data]));
        }
        Ok(Value::Array(Vec::new()))
    }

    fn items(&self, raw: &Value) -> Vec<FeedItem> {
        let Some(entries) = raw.as_array() else {
            return Vec::new();
        };
        entries
            .iter()
            .filter_map(|entry| {
                serde_json::from_value::<MemoRecord>(entry.clone())
                    .map_err(|err| log::debug!("memos: skipping malformed entry: {err}"))
                    .ok()
            })
            .map(|record| self.map_record(record))
            .collect()
    }
}
