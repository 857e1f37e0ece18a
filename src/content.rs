//! Content-model transforms shared by every feed source: the markdown-lite
//! renderer, the safe-link rewriter, GitHub title extraction, tolerant
//! timestamp parsing, and HTML stripping for quote text.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::{Captures, Regex};
use serde_json::Value;
use url::Url;

/// Matches `encodeURIComponent`: everything but `A-Za-z0-9 - _ . ! ~ * ' ( )`.
const URL_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Epoch values below this are seconds; at or above, milliseconds.
const EPOCH_MILLIS_FLOOR: i64 = 1_000_000_000_000;

static FENCED_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```\s*(\w*)\s*\n(.*?)\n\s*```").unwrap());
static MD_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[(.*?)\]\((.*?)\)").unwrap());
static MD_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[(.*?)\]\((.*?)\)").unwrap());
static MD_BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.*?)\*\*").unwrap());
static MD_ITALIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*(.*?)\*").unwrap());
static MD_CODE_SPAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"`(.*?)`").unwrap());
static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static ANCHOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<a href="([^"]+)"[^>]*>([^<]+)</a>"#).unwrap());
static GITHUB_REPO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^https?://github\.com/[^/]+/([^/?#]+)").unwrap());

/// Outbound-link policy: first-party hosts stay untouched, everything else
/// routes through the safe-link redirect endpoint.
#[derive(Debug, Clone)]
pub struct LinkPolicy {
    allow: Vec<String>,
    safego_path: String,
}

impl Default for LinkPolicy {
    fn default() -> Self {
        Self::new(
            vec![
                "blog.ljx.icu".to_string(),
                "localhost".to_string(),
                "127.0.0.1".to_string(),
                "b.zsxcoder.top".to_string(),
                "mcy.zsxcoder.top".to_string(),
            ],
            "/safego",
        )
    }
}

impl LinkPolicy {
    pub fn new(allow: Vec<String>, safego_path: impl Into<String>) -> Self {
        Self {
            allow,
            safego_path: safego_path.into(),
        }
    }

    fn is_first_party(&self, host: &str) -> bool {
        self.allow.iter().any(|domain| {
            host == domain || host.ends_with(&format!(".{domain}"))
        })
    }

    /// Rewrites a single href. Unparsable URLs (relative paths, anchors)
    /// are left alone; they cannot escape the first-party origin.
    pub fn rewrite_url(&self, href: &str) -> String {
        let Ok(parsed) = Url::parse(href) else {
            return href.to_string();
        };
        match parsed.host_str() {
            Some(host) if self.is_first_party(host) => href.to_string(),
            Some(_) => format!(
                "{}?url={}",
                self.safego_path,
                utf8_percent_encode(href, URL_COMPONENT)
            ),
            None => href.to_string(),
        }
    }

    /// Rewrites every anchor in an upstream HTML fragment, normalizing the
    /// anchor attributes while it is at it. No externally sourced href
    /// survives unchecked.
    pub fn rewrite_anchors(&self, html: &str) -> String {
        ANCHOR
            .replace_all(html, |caps: &Captures<'_>| {
                let href = self.rewrite_url(&caps[1]);
                let text = caps[2].trim();
                format!(
                    r#"<a href="{href}" target="_blank" rel="nofollow noopener">{text}</a>"#
                )
            })
            .into_owned()
    }
}

/// The markdown-lite transform used by the talks source and as the shared
/// fallback: link syntax, checklist glyphs, line breaks, emphasis, and
/// fenced/backtick code left as literal text (never dropped).
pub fn markdown_lite(text: &str, policy: &LinkPolicy) -> String {
    // Lift fenced blocks out first so later passes cannot mangle them.
    let mut fences: Vec<String> = Vec::new();
    let mut out = FENCED_CODE
        .replace_all(text, |caps: &Captures<'_>| {
            let lang = if caps[1].is_empty() { "plaintext" } else { &caps[1] };
            fences.push(format!(
                "<pre><code class=\"language-{}\">{}</code></pre>",
                lang,
                escape_html(&caps[2])
            ));
            format!("\u{1}F{}\u{1}", fences.len() - 1)
        })
        .into_owned();

    out = MD_IMAGE
        .replace_all(&out, r#"<img src="$2" alt="$1" class="zoomable">"#)
        .into_owned();
    out = MD_LINK
        .replace_all(&out, |caps: &Captures<'_>| {
            let href = policy.rewrite_url(&caps[2]);
            format!(
                r#"<a href="{href}" target="_blank" rel="nofollow noopener">@{}</a>"#,
                &caps[1]
            )
        })
        .into_owned();
    out = out.replace("- [ ]", "⚪").replace("- [x]", "⚫");
    out = out.replace('\n', "<br>");
    out = MD_BOLD.replace_all(&out, "<strong>$1</strong>").into_owned();
    out = MD_ITALIC.replace_all(&out, "<em>$1</em>").into_owned();
    out = MD_CODE_SPAN.replace_all(&out, "<code>$1</code>").into_owned();

    for (idx, fence) in fences.iter().enumerate() {
        out = out.replace(&format!("\u{1}F{idx}\u{1}"), fence);
    }
    out
}

/// Collapses markdown link syntax to a fixed marker, for quote text.
pub fn replace_markdown_links(text: &str, marker: &str) -> String {
    MD_LINK.replace_all(text, marker).into_owned()
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Strips tags for the plain-text quote form.
pub fn strip_html(html: &str) -> String {
    HTML_TAG.replace_all(html, "").into_owned()
}

/// Repository name from a GitHub project URL, falling back to the last
/// non-empty path segment, then to the raw text. Never fails.
pub fn github_project_title(url: &str) -> String {
    if let Some(caps) = GITHUB_REPO.captures(url) {
        return caps[1].to_string();
    }
    if let Ok(parsed) = Url::parse(url) {
        if let Some(segment) = parsed
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        {
            return segment.to_string();
        }
    }
    url.to_string()
}

/// Normalizes the upstream timestamp zoo: ISO-8601 strings, epoch seconds,
/// epoch milliseconds, and numeric strings of either.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => {
            let text = text.trim();
            if !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()) {
                return text.parse::<i64>().ok().and_then(from_epoch);
            }
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                return Some(parsed.with_timezone(&Utc));
            }
            NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| Utc.from_utc_datetime(&naive))
        }
        Value::Number(num) => {
            if let Some(int) = num.as_i64() {
                from_epoch(int)
            } else {
                num.as_f64().and_then(|f| from_epoch(f as i64))
            }
        }
        _ => None,
    }
}

fn from_epoch(value: i64) -> Option<DateTime<Utc>> {
    if value >= EPOCH_MILLIS_FLOOR {
        Utc.timestamp_millis_opt(value).single()
    } else {
        Utc.timestamp_opt(value, 0).single()
    }
}

/// Card timestamp format, `YYYY-MM-DD HH:MM`.
pub fn format_time(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M").to_string()
}
