//! Wires config, cache, media workers, and a feed adapter into one render
//! cycle and writes the resulting page out.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use crate::cache;
use crate::config;
use crate::content::LinkPolicy;
use crate::feed::{self, FeedAdapter};
use crate::media;
use crate::pipeline::{self, Pipeline, RenderState, UiEvent};

#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Overrides `feeds.source` from the config file.
    pub source: Option<String>,
    /// Output path for the rendered page; stdout when unset.
    pub output: Option<PathBuf>,
    pub config_file: Option<PathBuf>,
}

pub fn run(options: Options) -> Result<()> {
    let cfg = config::load(config::LoadOptions {
        config_file: options.config_file,
        env_prefix: None,
    })?;

    let policy = LinkPolicy::new(cfg.links.allow.clone(), cfg.links.safego_path.clone());
    let source = options
        .source
        .unwrap_or_else(|| cfg.feeds.source.clone());
    let adapter = build_adapter(&source, &cfg, policy)?;

    let store = cache::Store::open(cache::Options {
        path: cfg.cache.path.clone(),
    })?;

    let manager = media::Manager::new(media::Config {
        workers: cfg.media.workers,
        probe_timeout: cfg.media.probe_timeout,
        http_client: None,
    })?;

    let (events_tx, events_rx) = pipeline::event_channel();
    let mut pipe = Pipeline::new(
        adapter,
        store,
        manager.handle(),
        pipeline::Config {
            container_width: cfg.layout.container_width,
            card_width: cfg.layout.card_width,
            card_margin: cfg.layout.card_margin,
            cache_ttl: cfg.cache.ttl,
            ready_timeout: cfg.layout.ready_timeout,
            resize_debounce: cfg.layout.resize_debounce,
        },
        events_tx,
    );

    pipe.render();
    for event in events_rx.try_iter() {
        match event {
            UiEvent::Toast { message } => log::info!("{message}"),
            UiEvent::ScrollToComments | UiEvent::Relayout => {}
        }
    }

    let page = pipe.page().to_string();
    match options.output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create directory {}", parent.display())
                })?;
            }
            fs::write(&path, &page)
                .with_context(|| format!("failed to write {}", path.display()))?;
            log::info!("wrote {} ({} bytes)", path.display(), page.len());
        }
        None => print!("{page}"),
    }

    if pipe.state() == RenderState::Failed {
        bail!("feed {source} could not be fetched");
    }
    Ok(())
}

fn build_adapter(
    source: &str,
    cfg: &config::Config,
    policy: LinkPolicy,
) -> Result<Box<dyn FeedAdapter>> {
    let feeds = &cfg.feeds;
    match source {
        "talks" => {
            let mut client_cfg = feed::talks::ClientConfig {
                user_agent: feeds.user_agent.clone(),
                link_policy: policy,
                ..Default::default()
            };
            if !feeds.talks_endpoint.is_empty() {
                client_cfg.endpoint = feeds.talks_endpoint.clone();
            }
            Ok(Box::new(feed::talks::Client::new(client_cfg)?))
        }
        "memos" => {
            let mut client_cfg = feed::memos::ClientConfig {
                user_agent: feeds.user_agent.clone(),
                link_policy: policy,
                ..Default::default()
            };
            if !feeds.memos_endpoint.is_empty() {
                client_cfg.endpoint = feeds.memos_endpoint.clone();
            }
            Ok(Box::new(feed::memos::Client::new(client_cfg)?))
        }
        "mastodon" => {
            let client_cfg = feed::mastodon::ClientConfig {
                instance: feeds.mastodon_instance.clone(),
                user_id: feeds.mastodon_user_id.clone(),
                token: Some(feeds.mastodon_token.clone()).filter(|t| !t.is_empty()),
                tag: Some(feeds.mastodon_tag.clone()).filter(|t| !t.is_empty()),
                shown_max: feeds.shown_max,
                user_agent: feeds.user_agent.clone(),
                link_policy: policy,
                http_client: None,
            };
            Ok(Box::new(feed::mastodon::Client::new(client_cfg)?))
        }
        "telegram" => {
            let mut client_cfg = feed::telegram::ClientConfig {
                user_agent: feeds.user_agent.clone(),
                ..Default::default()
            };
            if !feeds.telegram_endpoint.is_empty() {
                client_cfg.endpoint = feeds.telegram_endpoint.clone();
            }
            Ok(Box::new(feed::telegram::Client::new(client_cfg)?))
        }
        other => bail!("unknown feed source {other:?} (expected talks, memos, mastodon, or telegram)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_source_is_rejected() {
        let cfg = config::Config::default();
        let err = build_adapter("rss", &cfg, LinkPolicy::default()).unwrap_err();
        assert!(err.to_string().contains("unknown feed source"));
    }

    #[test]
    fn known_sources_build() {
        let cfg = config::Config::default();
        assert!(build_adapter("talks", &cfg, LinkPolicy::default()).is_ok());
        assert!(build_adapter("memos", &cfg, LinkPolicy::default()).is_ok());
        assert!(build_adapter("telegram", &cfg, LinkPolicy::default()).is_ok());
        // Mastodon needs its instance and account configured.
        assert!(build_adapter("mastodon", &cfg, LinkPolicy::default()).is_err());
    }
}
