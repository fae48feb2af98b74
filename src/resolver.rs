//! Play-Index Resolver.
//!
//! Transforms one game's raw play-index payload into the per-at-bat lookup
//! structure the matching engine consumes. Built once per game, cached, and
//! read-only afterwards.

use chrono::NaiveDate;
use tracing::debug;

use crate::feeds::play_index::{RawGameFeed, RawPlay};
use crate::models::{GamePlayIndex, PlayIndexEntry};

/// Build the four indexing views for every at-bat in a game.
///
/// A single pass per at-bat maintains two counters: the raw delivery counter
/// advances for every delivery, the pitch-only counter advances only for
/// deliveries flagged as actual pitches. The feeds disagree on whether
/// non-pitch deliveries consume a sequence slot, so both numberings are kept.
pub fn build_game_play_index(game_id: u64, feed: &RawGameFeed) -> GamePlayIndex {
    let game_date = feed
        .game_data
        .datetime
        .original_date
        .as_deref()
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());

    let mut index = GamePlayIndex {
        game_id,
        game_date,
        entries: Default::default(),
    };

    for play in &feed.live_data.plays.all_plays {
        let Some(at_bat_index) = play.about.at_bat_index else {
            continue;
        };
        if let Some(entry) = build_entry(at_bat_index, game_date, play) {
            index.entries.insert(at_bat_index, entry);
        }
    }

    debug!(
        game_id,
        at_bats = index.entries.len(),
        "Built game play index"
    );
    index
}

fn build_entry(
    at_bat_index: u32,
    game_date: Option<NaiveDate>,
    play: &RawPlay,
) -> Option<PlayIndexEntry> {
    let mut entry = PlayIndexEntry {
        at_bat_index,
        batter_id: play.matchup.batter.id,
        pitcher_id: play.matchup.pitcher.id,
        game_date,
        ..Default::default()
    };

    let mut pitch_sequence = 0usize;
    for (raw_order, delivery) in play.play_events.iter().enumerate() {
        let play_id = delivery.resolve_play_id();

        // Every delivery consumes a raw-order slot, pitch or not
        entry.by_raw_order.push(play_id.clone());

        if !delivery.is_pitch {
            continue;
        }

        if let Some(id) = &play_id {
            entry.by_pitch_sequence.insert(pitch_sequence, id.clone());

            if let Some(pitch_number) = delivery.pitch_number {
                entry.by_pitch_number.insert(pitch_number, id.clone());
            }

            let event_order = delivery.index.unwrap_or(raw_order);
            entry.by_event_order.insert(event_order, id.clone());
        }

        // Advances whether or not an identifier was present, so later
        // pitches keep their alignment
        pitch_sequence += 1;
    }

    entry.pitch_count = pitch_sequence;

    // An at-bat with no pitches at all contributes nothing to matching
    if entry.pitch_count == 0 {
        return None;
    }
    Some(entry)
}
