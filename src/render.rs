//! HTML card rendering and card measurement. Cards are emitted as
//! absolutely positioned elements; the waterfall layout supplies their
//! coordinates and the container height.

use std::collections::HashMap;

use textwrap::wrap;
use unicode_width::UnicodeWidthStr;

use crate::content::{self, escape_html, strip_html};
use crate::feed::{Attachment, FeedItem, VideoEmbed};
use crate::layout::CardBox;

const BADGE_SVG: &str = r##"<svg viewBox="0 0 512 512" xmlns="http://www.w3.org/2000/svg" class="is-badge icon"><path d="m512 268c0 17.9-4.3 34.5-12.9 49.7s-20.1 27.1-34.6 35.4c.4 2.7.6 6.9.6 12.6 0 27.1-9.1 50.1-27.1 69.1-18.1 19.1-39.9 28.6-65.4 28.6-11.4 0-22.3-2.1-32.6-6.3-8 16.4-19.5 29.6-34.6 39.7-15 10.2-31.5 15.2-49.4 15.2-18.3 0-34.9-4.9-49.7-14.9-14.9-9.9-26.3-23.2-34.3-40-10.3 4.2-21.1 6.3-32.6 6.3-25.5 0-47.4-9.5-65.7-28.6-18.3-19-27.4-42.1-27.4-69.1 0-3 .4-7.2 1.1-12.6-14.5-8.4-26-20.2-34.6-35.4-8.5-15.2-12.8-31.8-12.8-49.7 0-19 4.8-36.5 14.3-52.3s22.3-27.5 38.3-35.1c-4.2-11.4-6.3-22.9-6.3-34.3 0-27 9.1-50.1 27.4-69.1s40.2-28.6 65.7-28.6c11.4 0 22.3 2.1 32.6 6.3 8-16.4 19.5-29.6 34.6-39.7 15-10.1 31.5-15.2 49.4-15.2s34.4 5.1 49.4 15.1c15 10.1 26.6 23.3 34.6 39.7 10.3-4.2 21.1-6.3 32.6-6.3 25.5 0 47.3 9.5 65.4 28.6s27.1 42.1 27.1 69.1c0 12.6-1.9 24-5.7 34.3 16 7.6 28.8 19.3 38.3 35.1 9.5 15.9 14.3 33.4 14.3 52.4zm-266.9 77.1 105.7-158.3c2.7-4.2 3.5-8.8 2.6-13.7-1-4.9-3.5-8.8-7.7-11.4-4.2-2.7-8.8-3.6-13.7-2.9-5 .8-9 3.2-12 7.4l-93.1 140-42.9-42.8c-3.8-3.8-8.2-5.6-13.1-5.4-5 .2-9.3 2-13.1 5.4-3.4 3.4-5.1 7.7-5.1 12.9 0 5.1 1.7 9.4 5.1 12.9l58.9 58.9 2.9 2.3c3.4 2.3 6.9 3.4 10.3 3.4 6.7-.1 11.8-2.9 15.2-8.7z" fill="#1da1f2"></path></svg>"##;

const WEBSITE_BACKDROP: &str = "https://p.liiiu.cn/i/2024/07/27/66a4632bbf06e.webp";
const GITHUB_BACKDROP: &str = "https://p.liiiu.cn/i/2024/07/27/66a461a3098aa.webp";

// Measurement model: a 16px body font at roughly 8px per terminal column,
// 24px line height, with card padding on both sides.
const CHAR_COL_PX: f64 = 8.0;
const LINE_HEIGHT_PX: f64 = 24.0;
const CARD_PADDING_PX: f64 = 16.0;
const META_HEIGHT_PX: f64 = 56.0;
const BOTTOM_HEIGHT_PX: f64 = 36.0;
const EMBED_HEIGHT_PX: f64 = 220.0;
const LINK_CARD_HEIGHT_PX: f64 = 72.0;
const DOUBAN_CARD_HEIGHT_PX: f64 = 160.0;
const MUSIC_HEIGHT_PX: f64 = 90.0;
const FALLBACK_IMAGE_HEIGHT_PX: f64 = 200.0;

pub fn attachment_html(attachment: &Attachment) -> String {
    match attachment {
        Attachment::Website { url, title, favicon } => {
            let backdrop = if favicon.is_empty() { WEBSITE_BACKDROP } else { favicon };
            external_link_html(url, title, backdrop)
        }
        Attachment::GithubProject { url, title } => {
            external_link_html(url, title, GITHUB_BACKDROP)
        }
        Attachment::Music { server, kind, id, api } => {
            let api_attr = api
                .as_deref()
                .map(|api| format!(r#" api="{}""#, escape_attr(api)))
                .unwrap_or_default();
            format!(
                r#"<meting-js server="{}" type="{}" id="{}"{}></meting-js>"#,
                escape_attr(server),
                escape_attr(kind),
                escape_attr(id),
                api_attr
            )
        }
        Attachment::Video(embed) => video_html(embed),
        Attachment::DoubanMovie { url, title, image, director, rating, runtime } => {
            douban_card_html(
                url,
                image,
                &[
                    ("电影名", title),
                    ("导演", director),
                    ("评分", rating),
                    ("时长", runtime),
                ],
            )
        }
        Attachment::DoubanBook { url, title, image, author, rating, pub_date } => {
            douban_card_html(
                url,
                image,
                &[
                    ("书名", title),
                    ("作者", author),
                    ("出版年份", pub_date),
                    ("评分", rating),
                ],
            )
        }
    }
}

fn external_link_html(url: &str, title: &str, backdrop: &str) -> String {
    format!(
        concat!(
            r#"<div class="shuoshuo-external-link">"#,
            r#"<a class="external-link" href="{url}" target="_blank" rel="nofollow noopener">"#,
            r#"<div class="external-link-left" style="background-image:url({backdrop})"></div>"#,
            r#"<div class="external-link-right">"#,
            r#"<div class="external-link-title">{title}</div>"#,
            r#"<div>点击跳转</div>"#,
            r#"</div></a></div>"#
        ),
        url = escape_attr(url),
        backdrop = escape_attr(backdrop),
        title = escape_html(title),
    )
}

fn video_html(embed: &VideoEmbed) -> String {
    let extra = match embed {
        VideoEmbed::Bilibili { .. } => r#" scrolling="no" frameborder="no""#,
        VideoEmbed::Youtube { .. } => {
            r#" title="YouTube video player" frameborder="0" referrerpolicy="strict-origin-when-cross-origin""#
        }
    };
    format!(
        concat!(
            r#"<div class="video-embed" style="position:relative;padding:30% 45%;margin-top:10px;">"#,
            r#"<iframe style="position:absolute;width:100%;height:100%;left:0;top:0;border-radius:12px;" src="{src}"{extra} allowfullscreen loading="lazy"></iframe>"#,
            r#"</div>"#
        ),
        src = escape_attr(embed.embed_url()),
        extra = extra,
    )
}

fn douban_card_html(url: &str, image: &str, rows: &[(&str, &str)]) -> String {
    let mut items = String::new();
    for (idx, (label, value)) in rows.iter().enumerate() {
        let value = escape_html(value);
        if idx == 0 {
            items.push_str(&format!(
                r#"<div class="douban-card-item"><span>{label}: </span><strong>{value}</strong></div>"#
            ));
        } else {
            items.push_str(&format!(
                r#"<div class="douban-card-item"><span>{label}: </span><span>{value}</span></div>"#
            ));
        }
    }
    format!(
        concat!(
            r#"<a class="douban-card" href="{url}" target="_blank">"#,
            r#"<div class="douban-card-bgimg" style="background-image:url('{image}');"></div>"#,
            r#"<div class="douban-card-left">"#,
            r#"<div class="douban-card-img" style="background-image:url('{image}');"></div>"#,
            r#"</div>"#,
            r#"<div class="douban-card-right">{items}</div>"#,
            r#"</a>"#
        ),
        url = escape_attr(url),
        image = escape_attr(image),
        items = items,
    )
}

/// One feed card. `index` wires the quote button back to the item.
pub fn card_html(item: &FeedItem, index: usize) -> String {
    let mut out = String::new();
    out.push_str(r#"<div class="talk_item">"#);

    out.push_str(r#"<div class="talk_meta">"#);
    out.push_str(&format!(
        r#"<img class="no-lightbox avatar" src="{}">"#,
        escape_attr(&item.avatar_url)
    ));
    out.push_str(r#"<div class="info">"#);
    out.push_str(&format!(
        r#"<span class="talk_nick">{} {}</span>"#,
        escape_html(&item.author),
        BADGE_SVG
    ));
    out.push_str(&format!(
        r#"<span class="talk_date">{}</span>"#,
        content::format_time(&item.created_at)
    ));
    out.push_str("</div></div>");

    out.push_str(r#"<div class="talk_content">"#);
    out.push_str(&format!(
        r#"<div class="talk_content_text">{}</div>"#,
        item.content_html
    ));
    if !item.image_urls.is_empty() {
        out.push_str(r#"<div class="prose">"#);
        for url in &item.image_urls {
            out.push_str(&format!(
                r#"<img src="{}" class="zoomable" loading="lazy">"#,
                escape_attr(url)
            ));
        }
        out.push_str("</div>");
    }
    for attachment in &item.attachments {
        out.push_str(&attachment_html(attachment));
    }
    out.push_str("</div>");

    out.push_str(r#"<div class="talk_bottom"><div class="talk_tags">"#);
    if !item.tags.is_empty() {
        out.push_str(&format!(
            r#"<span class="talk_tag">🏷️{}</span>"#,
            escape_html(&item.tags.join(","))
        ));
    }
    if let Some(location) = item.location.as_deref().filter(|l| !l.is_empty()) {
        match item.location_url.as_deref() {
            Some(url) => out.push_str(&format!(
                r#"<span class="location_tag"><a href="{}" target="_blank" rel="nofollow noopener">🌍{}</a></span>"#,
                escape_attr(url),
                escape_html(location)
            )),
            None => out.push_str(&format!(
                r#"<span class="location_tag">🌍{}</span>"#,
                escape_html(location)
            )),
        }
    }
    out.push_str("</div>");
    out.push_str(&format!(
        r#"<a href="javascript:;" class="quote-btn" title="引用此说说" data-quote-index="{index}"><span class="icon">❝</span></a>"#
    ));
    out.push_str("</div></div>");
    out
}

/// Estimated card height in pixels. Text wraps at the card's inner width;
/// images scale by their probed aspect ratio; embeds and rich cards use
/// fixed heights matching their styles.
pub fn estimate_height(
    item: &FeedItem,
    card_width: f64,
    image_dims: &HashMap<String, (u32, u32)>,
) -> f64 {
    let inner_width = (card_width - 2.0 * CARD_PADDING_PX).max(CHAR_COL_PX);
    let columns = (inner_width / CHAR_COL_PX).floor().max(1.0) as usize;

    let text = strip_html(&item.content_html.replace("<br>", "\n"));
    let mut lines = 0usize;
    for raw_line in text.split('\n') {
        for wrapped in wrap(raw_line, columns) {
            // wrap() measures in chars; wide glyphs take two columns, so
            // re-check with the display width.
            let width = UnicodeWidthStr::width(wrapped.as_ref());
            lines += width / columns + 1;
        }
    }
    let mut height = META_HEIGHT_PX + lines as f64 * LINE_HEIGHT_PX + BOTTOM_HEIGHT_PX;

    for url in &item.image_urls {
        height += match image_dims.get(url) {
            Some(&(w, h)) if w > 0 => inner_width * f64::from(h) / f64::from(w),
            _ => FALLBACK_IMAGE_HEIGHT_PX,
        };
    }

    for attachment in &item.attachments {
        height += match attachment {
            Attachment::Website { .. } | Attachment::GithubProject { .. } => LINK_CARD_HEIGHT_PX,
            Attachment::Music { .. } => MUSIC_HEIGHT_PX,
            Attachment::Video(_) => EMBED_HEIGHT_PX,
            Attachment::DoubanMovie { .. } | Attachment::DoubanBook { .. } => {
                DOUBAN_CARD_HEIGHT_PX
            }
        };
    }

    height + 2.0 * CARD_PADDING_PX
}

/// Full page around laid-out cards. Each card carries the absolute position
/// the waterfall layout computed for it.
pub fn page_html(cards: &[(String, CardBox)], container_width: f64, container_height: f64) -> String {
    let mut out = String::new();
    out.push_str("<!DOCTYPE html>\n<html lang=\"zh-CN\">\n<head>\n<meta charset=\"utf-8\">\n");
    out.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    out.push_str("<title>moments</title>\n</head>\n<body>\n");
    out.push_str(&format!(
        r#"<div id="talk" style="position:relative;width:{container_width}px;height:{container_height}px;margin:0 auto;">"#
    ));
    out.push('\n');
    for (html, card_box) in cards {
        out.push_str(&format!(
            r#"<div class="talk_slot" style="position:absolute;top:{}px;left:{}px;width:{}px;">"#,
            card_box.top, card_box.left, card_box.width
        ));
        out.push_str(html);
        out.push_str("</div>\n");
    }
    out.push_str("</div>\n</body>\n</html>\n");
    out
}

/// A page with a single centered notice instead of cards (empty feed,
/// failed fetch).
pub fn notice_page(class: &str, message: &str, container_width: f64) -> String {
    let mut out = String::new();
    out.push_str("<!DOCTYPE html>\n<html lang=\"zh-CN\">\n<head>\n<meta charset=\"utf-8\">\n");
    out.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    out.push_str("<title>moments</title>\n</head>\n<body>\n");
    out.push_str(&format!(
        r#"<div id="talk" style="position:relative;width:{container_width}px;margin:0 auto;">"#
    ));
    out.push_str(&format!(
        r#"<div class="{class}" style="text-align:center;padding:40px 0;color:#666;">{}</div>"#,
        escape_html(message)
    ));
    out.push_str("</div>\n</body>\n</html>\n");
    out
}

fn escape_attr(value: &str) -> String {
    escape_html(value).replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Margins;
    use chrono::{TimeZone, Utc};

    fn item() -> FeedItem {
        let mut item = FeedItem::new("作者", Utc.timestamp_opt(1_700_000_000, 0).single().unwrap());
        item.avatar_url = "https://a/avatar.png".to_string();
        item.content_html = "hello world".to_string();
        item.tags = vec!["生活".to_string()];
        item.location = Some("西安".to_string());
        item
    }

    #[test]
    fn card_carries_meta_content_and_quote_hook() {
        let html = card_html(&item(), 3);
        assert!(html.contains("talk_meta"));
        assert!(html.contains("作者"));
        assert!(html.contains("2023-11-14"));
        assert!(html.contains(r#"<div class="talk_content_text">hello world</div>"#));
        assert!(html.contains("🏷️生活"));
        assert!(html.contains("🌍西安"));
        assert!(html.contains(r#"data-quote-index="3""#));
    }

    #[test]
    fn linked_location_renders_an_anchor() {
        let mut it = item();
        it.location_url = Some("https://map.example/x".to_string());
        let html = card_html(&it, 0);
        assert!(html.contains(r#"<a href="https://map.example/x""#));
    }

    #[test]
    fn github_attachment_uses_repo_backdrop() {
        let html = attachment_html(&Attachment::GithubProject {
            url: "https://github.com/acme/widget".to_string(),
            title: "widget".to_string(),
        });
        assert!(html.contains(GITHUB_BACKDROP));
        assert!(html.contains("widget"));
    }

    #[test]
    fn taller_text_means_taller_card() {
        let dims = HashMap::new();
        let short = estimate_height(&item(), 360.0, &dims);
        let mut long = item();
        long.content_html = "很长的内容 ".repeat(40);
        assert!(estimate_height(&long, 360.0, &dims) > short);
    }

    #[test]
    fn probed_dimensions_scale_by_aspect_ratio() {
        let mut base = item();
        base.image_urls = vec!["https://img/a.png".to_string()];
        let mut dims = HashMap::new();

        let unknown = estimate_height(&base, 360.0, &dims);
        dims.insert("https://img/a.png".to_string(), (1000u32, 250u32));
        let known = estimate_height(&base, 360.0, &dims);
        // 4:1 aspect at 328px inner width is 82px, well under the fallback.
        assert!(known < unknown);
    }

    #[test]
    fn page_positions_cards_absolutely() {
        let card_box = CardBox {
            width: 360.0,
            height: 200.0,
            margins: Margins::uniform(8.0),
            top: 216.0,
            left: 368.0,
        };
        let page = page_html(&[("<div>x</div>".to_string(), card_box)], 780.0, 500.0);
        assert!(page.contains("top:216px;left:368px;width:360px"));
        assert!(page.contains("height:500px"));
    }
}
