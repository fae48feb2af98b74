//! Play-index feed client.
//!
//! The authoritative per-game source of opaque play identifiers, one per
//! delivery. Consumed per game and memoized by the cache layer; this module
//! only knows how to fetch and deserialize one game's payload.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

#[async_trait]
pub trait PlayIndexFeed: Send + Sync {
    /// Raw per-at-bat delivery list for one game.
    async fn fetch_game_plays(&self, game_id: u64) -> Result<RawGameFeed>;
}

/// Top-level game payload. Only the slices the resolver needs are modeled.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawGameFeed {
    #[serde(default)]
    pub game_data: RawGameData,
    #[serde(default)]
    pub live_data: RawLiveData,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawGameData {
    #[serde(default)]
    pub datetime: RawDatetime,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDatetime {
    #[serde(default)]
    pub original_date: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLiveData {
    #[serde(default)]
    pub plays: RawPlays,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPlays {
    #[serde(default)]
    pub all_plays: Vec<RawPlay>,
}

/// One at-bat's worth of deliveries.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPlay {
    #[serde(default)]
    pub about: RawAbout,
    #[serde(default)]
    pub matchup: RawMatchup,
    #[serde(default)]
    pub play_events: Vec<RawDelivery>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAbout {
    #[serde(default)]
    pub at_bat_index: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMatchup {
    #[serde(default)]
    pub batter: RawIdent,
    #[serde(default)]
    pub pitcher: RawIdent,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawIdent {
    #[serde(default)]
    pub id: Option<u64>,
}

/// One delivery: an actual pitch or a non-pitch event (mound visit, pickoff).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDelivery {
    #[serde(default)]
    pub is_pitch: bool,
    #[serde(default)]
    pub pitch_number: Option<u32>,
    /// Declared index in full event order (includes non-pitch deliveries).
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub play_id: Option<String>,
    #[serde(default)]
    pub content: Option<RawContent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawContent {
    #[serde(default)]
    pub play_id: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
}

impl RawDelivery {
    /// The upstream stores the identifier in several places depending on
    /// payload vintage; check them in order of reliability.
    pub fn resolve_play_id(&self) -> Option<String> {
        if let Some(id) = &self.play_id {
            if !id.is_empty() {
                return Some(id.clone());
            }
        }
        if let Some(content) = &self.content {
            if let Some(id) = &content.play_id {
                if !id.is_empty() {
                    return Some(id.clone());
                }
            }
            // UUID-shaped content links double as identifiers
            if let Some(link) = &content.link {
                if link.len() > 30 {
                    return Some(link.clone());
                }
            }
        }
        None
    }
}

pub struct PlayIndexClient {
    client: Client,
    base_url: String,
}

impl PlayIndexClient {
    pub fn new(base_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .context("Failed to build play-index HTTP client")?;

        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl PlayIndexFeed for PlayIndexClient {
    async fn fetch_game_plays(&self, game_id: u64) -> Result<RawGameFeed> {
        let url = format!("{}/api/v1.1/game/{}/feed/live", self.base_url, game_id);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET game feed for {} failed", game_id))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("GET game feed {} {}: {}", game_id, status, text));
        }

        resp.json::<RawGameFeed>()
            .await
            .with_context(|| format!("Failed to parse game feed for {}", game_id))
    }
}
