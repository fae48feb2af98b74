//! Pitch feed client.
//!
//! Fetches pitch-level physical/outcome records for one player across a date
//! range. The upstream serves row-oriented CSV; rows that cannot be keyed to
//! a (game, at-bat, pitch) are skipped, not errors.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::{PitchRecord, Role};

#[async_trait]
pub trait PitchFeed: Send + Sync {
    /// Ordered record set for a player and date range. Failures propagate
    /// with the upstream message attached.
    async fn fetch_pitch_records(
        &self,
        player_id: u64,
        role: Role,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PitchRecord>>;
}

pub struct PitchFeedClient {
    client: Client,
    base_url: String,
}

impl PitchFeedClient {
    pub fn new(base_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .context("Failed to build pitch feed HTTP client")?;

        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl PitchFeed for PitchFeedClient {
    async fn fetch_pitch_records(
        &self,
        player_id: u64,
        role: Role,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PitchRecord>> {
        let url = format!("{}/statcast_search/csv", self.base_url);
        let lookup_key = match role {
            Role::Batter => "batters_lookup[]",
            Role::Pitcher => "pitchers_lookup[]",
        };

        let qp = [
            ("all", "true".to_string()),
            ("type", "details".to_string()),
            ("player_type", role.as_str().to_string()),
            (lookup_key, player_id.to_string()),
            ("game_date_gt", start.format("%Y-%m-%d").to_string()),
            ("game_date_lt", end.format("%Y-%m-%d").to_string()),
        ];

        let resp = self
            .client
            .get(&url)
            .query(&qp)
            .send()
            .await
            .context("GET /statcast_search/csv failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "GET /statcast_search/csv {}: {}",
                status,
                text
            ));
        }

        let body = resp
            .text()
            .await
            .context("Failed to read pitch feed response body")?;

        let records = parse_pitch_csv(&body)?;
        debug!(
            player_id,
            role = role.as_str(),
            rows = records.len(),
            "Fetched pitch records"
        );
        Ok(records)
    }
}

/// Parse the feed's CSV payload into typed records. Columns are resolved by
/// header name because the upstream reorders and renames them across
/// exports ("batter" vs "batter_id", "hit_distance_sc" vs "hit_distance").
pub fn parse_pitch_csv(body: &str) -> Result<Vec<PitchRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(body.as_bytes());

    let headers = reader
        .headers()
        .context("Pitch feed CSV has no header row")?
        .clone();
    let col: HashMap<&str, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, name)| (name, i))
        .collect();

    let field = |record: &csv::StringRecord, names: &[&str]| -> Option<String> {
        for name in names {
            if let Some(&idx) = col.get(name) {
                let v = record.get(idx).unwrap_or("").trim();
                if !v.is_empty() && !v.eq_ignore_ascii_case("null") && !v.eq_ignore_ascii_case("nan")
                {
                    return Some(v.to_string());
                }
            }
        }
        None
    };
    let f64_field = |record: &csv::StringRecord, names: &[&str]| -> Option<f64> {
        field(record, names).and_then(|v| v.parse().ok())
    };
    let u64_field = |record: &csv::StringRecord, names: &[&str]| -> Option<u64> {
        // Some exports serialize ids as floats ("543037.0")
        field(record, names).and_then(|v| {
            v.parse::<u64>()
                .ok()
                .or_else(|| v.parse::<f64>().ok().map(|f| f as u64))
        })
    };

    let mut records = Vec::new();
    let mut skipped = 0usize;

    for row in reader.records() {
        let row = match row {
            Ok(r) => r,
            Err(e) => {
                skipped += 1;
                debug!(error = %e, "Skipping malformed pitch feed row");
                continue;
            }
        };

        let (game_id, at_bat_number, pitch_number, batter_id, pitcher_id) = match (
            u64_field(&row, &["game_pk"]),
            u64_field(&row, &["at_bat_number"]),
            u64_field(&row, &["pitch_number"]),
            u64_field(&row, &["batter", "batter_id"]),
            u64_field(&row, &["pitcher", "pitcher_id"]),
        ) {
            (Some(g), Some(ab), Some(pn), Some(b), Some(p)) => (g, ab as u32, pn as u32, b, p),
            _ => {
                skipped += 1;
                continue;
            }
        };

        records.push(PitchRecord {
            game_id,
            at_bat_number,
            pitch_number,
            batter_id,
            pitcher_id,
            game_date: field(&row, &["game_date"])
                .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
            game_type: field(&row, &["game_type"]),
            description: field(&row, &["description"]),
            event: field(&row, &["events"]),
            call: field(&row, &["type"]),
            balls: u64_field(&row, &["balls"]).map(|v| v as u32),
            strikes: u64_field(&row, &["strikes"]).map(|v| v as u32),
            pitch_type: field(&row, &["pitch_type"]),
            plate_x: f64_field(&row, &["plate_x"]),
            plate_z: f64_field(&row, &["plate_z"]),
            release_speed: f64_field(&row, &["release_speed"]),
            release_spin_rate: f64_field(&row, &["release_spin_rate"]),
            spin_axis: f64_field(&row, &["spin_axis"]),
            pfx_x: f64_field(&row, &["pfx_x"]),
            pfx_z: f64_field(&row, &["pfx_z"]),
            launch_speed: f64_field(&row, &["launch_speed"]),
            launch_angle: f64_field(&row, &["launch_angle"]),
            launch_spin_rate: f64_field(&row, &["launch_spin_rate"]),
            hit_distance: f64_field(&row, &["hit_distance_sc", "hit_distance"]),
        });
    }

    if skipped > 0 {
        warn!(skipped, kept = records.len(), "Pitch feed rows skipped");
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
game_pk,at_bat_number,pitch_number,batter,pitcher,game_date,game_type,events,description,type,balls,strikes,pitch_type,plate_x,plate_z,release_speed,pfx_x,pfx_z,launch_speed,launch_spin_rate,hit_distance_sc
717465,12,1,660271,477132,2023-06-09,R,,called_strike,S,0,0,FF,-0.31,2.55,97.4,-0.81,1.21,,,
717465,12,2,660271,477132,2023-06-09,R,home_run,hit_into_play,X,0,1,SL,0.12,2.80,96.8,-0.77,1.30,108.9,2450,412
bogus,,,,,,,,,,,,,,,,,,,,
";

    #[test]
    fn test_parse_pitch_csv() {
        let records = parse_pitch_csv(CSV).unwrap();
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.game_id, 717465);
        assert_eq!(first.at_bat_number, 12);
        assert_eq!(first.batter_id, 660271);
        assert_eq!(first.event, None);
        assert_eq!(first.call.as_deref(), Some("S"));
        assert_eq!(first.pitch_type.as_deref(), Some("FF"));
        assert_eq!(first.plate_x, Some(-0.31));
        assert_eq!(first.launch_spin_rate, None);
        assert!(!first.is_hit_into_play());

        let second = &records[1];
        assert_eq!(second.event.as_deref(), Some("home_run"));
        assert_eq!(second.pitch_type.as_deref(), Some("SL"));
        assert_eq!(second.launch_speed, Some(108.9));
        assert_eq!(second.launch_spin_rate, Some(2450.0));
        assert_eq!(second.hit_distance, Some(412.0));
        assert!(second.is_hit_into_play());
    }

    #[test]
    fn test_float_formatted_ids() {
        let csv = "game_pk,at_bat_number,pitch_number,batter,pitcher\n717465.0,3,1,660271.0,477132.0\n";
        let records = parse_pitch_csv(csv).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].batter_id, 660271);
    }

    #[test]
    fn test_client_creation() {
        let client = PitchFeedClient::new("https://example.test".to_string());
        assert!(client.is_ok());
    }
}
