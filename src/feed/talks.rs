//! Talks feed: the self-hosted memo board behind `POST /api/memo/list`.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::USER_AGENT;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::content::{self, markdown_lite, LinkPolicy};
use crate::feed::{Attachment, FeedAdapter, FeedItem, VideoEmbed};

pub const DEFAULT_ENDPOINT: &str = "https://mm.ljx.icu/api/memo/list";
const DEFAULT_AVATAR: &str = "https://p.liiiu.cn/i/2024/03/29/66061417537af.png";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: String,
    pub user_agent: String,
    pub page_size: usize,
    pub link_policy: LinkPolicy,
    pub http_client: Option<HttpClient>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            user_agent: String::new(),
            page_size: 30,
            link_policy: LinkPolicy::default(),
            http_client: None,
        }
    }
}

pub struct Client {
    http: HttpClient,
    endpoint: String,
    user_agent: String,
    page_size: usize,
    link_policy: LinkPolicy,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    code: i64,
    #[serde(default)]
    data: Option<ListData>,
}

#[derive(Debug, Deserialize)]
struct ListData {
    #[serde(default)]
    list: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct TalkRecord {
    content: String,
    imgs: Option<String>,
    created_at: Option<Value>,
    user: TalkUser,
    location: Option<String>,
    tags: Option<String>,
    external_url: Option<String>,
    external_title: Option<String>,
    external_favicon: Option<String>,
    /// JSON-in-a-string envelope carrying the rich-card extras.
    ext: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct TalkUser {
    nickname: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct TalkExt {
    music: Option<ExtMusic>,
    video: Option<ExtVideo>,
    douban_movie: Option<ExtDoubanMovie>,
    douban_book: Option<ExtDoubanBook>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExtMusic {
    server: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    id: Option<String>,
    api: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExtVideo {
    #[serde(rename = "type")]
    kind: Option<String>,
    value: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ExtDoubanMovie {
    id: Option<String>,
    url: Option<String>,
    title: Option<String>,
    image: Option<String>,
    director: Option<String>,
    rating: Option<String>,
    runtime: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ExtDoubanBook {
    id: Option<String>,
    url: Option<String>,
    title: Option<String>,
    image: Option<String>,
    author: Option<String>,
    rating: Option<String>,
    pub_date: Option<String>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("talks client user agent required");
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
            page_size: config.page_size,
            link_policy: config.link_policy,
        })
    }

    fn map_record(&self, record: TalkRecord) -> FeedItem {
        let created_at = record
            .created_at
            .as_ref()
            .and_then(content::parse_timestamp)
            .unwrap_or_default();

        let author = record
            .user
            .nickname
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "匿名".to_string());

        let mut item = FeedItem::new(author, created_at);
        item.avatar_url = record
            .user
            .avatar_url
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| DEFAULT_AVATAR.to_string());

        item.location = Some(
            record
                .location
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| "陕西西安".to_string()),
        );

        item.tags = record
            .tags
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|tags| !tags.is_empty())
            .unwrap_or_else(|| vec!["无标签".to_string()]);

        item.image_urls = record
            .imgs
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|u| !u.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        item.content_html = markdown_lite(&record.content, &self.link_policy);
        item.plain_text = quote_text(&record.content, !item.image_urls.is_empty());

        if let Some(url) = record.external_url.filter(|u| !u.is_empty()) {
            item.attachments.push(Attachment::Website {
                url,
                title: record.external_title.unwrap_or_default(),
                favicon: record.external_favicon.unwrap_or_default(),
            });
        }

        let ext: TalkExt = record
            .ext
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();

        if let Some(music) = ext.music {
            if let Some(id) = music.id.filter(|id| !id.is_empty()) {
                item.attachments.push(Attachment::Music {
                    server: music.server.unwrap_or_default(),
                    kind: music.kind.unwrap_or_default(),
                    id,
                    api: music.api,
                });
            }
        }

        if let Some(movie) = ext.douban_movie {
            if movie.id.as_deref().is_some_and(|id| !id.is_empty()) {
                item.attachments.push(Attachment::DoubanMovie {
                    url: movie.url.unwrap_or_default(),
                    title: movie.title.unwrap_or_default(),
                    image: movie.image.unwrap_or_default(),
                    director: movie.director.unwrap_or_else(|| "未知导演".to_string()),
                    rating: movie.rating.unwrap_or_else(|| "暂无评分".to_string()),
                    runtime: movie.runtime.unwrap_or_else(|| "未知时长".to_string()),
                });
            }
        }

        if let Some(book) = ext.douban_book {
            if book.id.as_deref().is_some_and(|id| !id.is_empty()) {
                item.attachments.push(Attachment::DoubanBook {
                    url: book.url.unwrap_or_default(),
                    title: book.title.unwrap_or_default(),
                    image: book.image.unwrap_or_default(),
                    author: book.author.unwrap_or_default(),
                    rating: book.rating.unwrap_or_default(),
                    pub_date: book.pub_date.unwrap_or_default(),
                });
            }
        }

        if let Some(video) = ext.video {
            if let (Some(kind), Some(value)) = (video.kind, video.value) {
                let embed = match kind.as_str() {
                    "bilibili" => Some(VideoEmbed::Bilibili {
                        embed_url: format!("{value}&autoplay=0"),
                    }),
                    "youtube" => Some(VideoEmbed::Youtube { embed_url: value }),
                    _ => None,
                };
                if let Some(embed) = embed {
                    item.attachments.push(Attachment::Video(embed));
                }
            }
        }

        item
    }
}

/// Quote text approximates the body as plain text: markdown links collapse
/// to a link marker, and an image marker notes dropped pictures.
fn quote_text(content: &str, has_images: bool) -> String {
    let mut text = content::replace_markdown_links(content, "[链接]");
    if has_images {
        text.push_str("[图片]");
    }
    content::strip_html(&text)
}

impl FeedAdapter for Client {
    fn source(&self) -> &'static str {
        "talks"
    }

    fn fetch(&self) -> Result<Value> {
        let response = self
            .http
            .post(&self.endpoint)
            .header(USER_AGENT, &self.user_agent)
            .json(&json!({ "size": self.page_size }))
            .send()
            .context("talks: request")?;
        if !response.status().is_success() {
            bail!("talks: upstream status {}", response.status());
        }
        let response: ListResponse = response.json().context("talks: decode response")?;

        if response.code != 0 {
            bail!("talks: upstream code {}", response.code);
        }
        let list = response
            .data
            .and_then(|data| data.list)
            .unwrap_or_else(|| Value::Array(Vec::new()));
        if !list.is_array() {
            bail!("talks: list payload is not an array");
        }
        Ok(list)
    }

    fn items(&self, raw: &Value) -> Vec<FeedItem> {
        let Some(entries) = raw.as_array() else {
            return Vec::new();
        };
        entries
            .iter()
            .filter_map(|entry| {
                serde_json::from_value::<TalkRecord>(entry.clone())
                    .map_err(|err| log::debug!("talks: skipping malformed entry: {err}"))
                    .ok()
            })
            .map(|record| self.map_record(record))
            .collect()
    }
}
