//! Matching Engine.
//!
//! Annotates every pitch with an opaque play identifier (or leaves it
//! unresolved) and, at the at-bat level, picks the right play-index entry
//! when the two feeds' at-bat numbering has drifted apart, which happens
//! whenever one pitcher faces the same batter more than once in a game.
//!
//! Per-pitch lookup is an ordered list of strategy functions evaluated until
//! one yields an identifier, so adding or reordering strategies is a data
//! change rather than a control-flow edit.

use tracing::debug;

use crate::models::{
    AnnotatedAtBat, AnnotatedPitch, AtBatGroup, GamePlayIndex, MatchMethod, PlayIndexEntry,
};

/// Alignment context for one pitch: the feed's declared pitch number and the
/// pitch's zero-based position within its at-bat.
struct PitchContext {
    pitch_number: u32,
    sequence_index: usize,
}

type MatchStrategy = fn(&PitchContext, &PlayIndexEntry) -> Option<(String, MatchMethod)>;

/// Fixed priority order; first match wins.
const STRATEGIES: &[MatchStrategy] = &[
    by_pitch_number,
    by_pitch_sequence,
    by_event_order,
    by_raw_order,
    by_nearest_pitch_number,
];

fn by_pitch_number(ctx: &PitchContext, entry: &PlayIndexEntry) -> Option<(String, MatchMethod)> {
    entry
        .by_pitch_number
        .get(&ctx.pitch_number)
        .map(|id| (id.clone(), MatchMethod::PitchNumber))
}

/// Primary alignment for most well-formed games: both sides counted with
/// non-pitch deliveries excluded.
fn by_pitch_sequence(ctx: &PitchContext, entry: &PlayIndexEntry) -> Option<(String, MatchMethod)> {
    entry
        .by_pitch_sequence
        .get(&ctx.sequence_index)
        .map(|id| (id.clone(), MatchMethod::PitchSequence))
}

fn by_event_order(ctx: &PitchContext, entry: &PlayIndexEntry) -> Option<(String, MatchMethod)> {
    entry
        .by_event_order
        .get(&ctx.sequence_index)
        .map(|id| (id.clone(), MatchMethod::EventOrder))
}

fn by_raw_order(ctx: &PitchContext, entry: &PlayIndexEntry) -> Option<(String, MatchMethod)> {
    entry
        .by_raw_order
        .get(ctx.sequence_index)
        .and_then(|slot| slot.clone())
        .map(|id| (id, MatchMethod::RawOrder))
}

/// Last resort: nearest declared pitch number within a tolerance of one.
fn by_nearest_pitch_number(
    ctx: &PitchContext,
    entry: &PlayIndexEntry,
) -> Option<(String, MatchMethod)> {
    let mut numbers: Vec<u32> = entry.by_pitch_number.keys().copied().collect();
    numbers.sort_unstable();
    numbers
        .into_iter()
        .min_by_key(|n| n.abs_diff(ctx.pitch_number))
        .filter(|n| n.abs_diff(ctx.pitch_number) <= 1)
        .and_then(|n| entry.by_pitch_number.get(&n))
        .map(|id| (id.clone(), MatchMethod::NearestPitchNumber))
}

fn resolve_pitch(ctx: &PitchContext, entry: &PlayIndexEntry) -> Option<(String, MatchMethod)> {
    STRATEGIES.iter().find_map(|strategy| strategy(ctx, entry))
}

/// An at-bat paired with a candidate play-index entry sharing its matchup.
/// Exists only during selection.
struct MatchCandidate<'a> {
    entry: &'a PlayIndexEntry,
    pitch_count_diff: usize,
}

/// Result of at-bat selection.
enum AtBatSelection<'a> {
    /// Batter and pitcher identity cross-checked.
    Verified(&'a PlayIndexEntry),
    /// Direct at-bat-number lookup without identity verification.
    Unverified(&'a PlayIndexEntry),
    Unmatched,
}

/// Select the play-index entry for one at-bat.
///
/// Candidates are every entry whose batter and pitcher both match. Among
/// multiple candidates (a rematch in the same game), the smallest pitch-count
/// difference wins; ties break to the lowest at-bat index, on the assumption
/// that the chronologically-first at-bat is the least likely to be a later
/// unrelated rematch. That tie-break is deliberate and inspectable here, not
/// a silent map-ordering artifact.
fn select_entry<'a>(group: &AtBatGroup, index: &'a GamePlayIndex) -> AtBatSelection<'a> {
    let batter = group.batter_id();
    let pitcher = group.pitcher_id();

    let mut candidates: Vec<MatchCandidate<'a>> = index
        .entries
        .values()
        .filter(|entry| {
            entry.batter_id.is_some()
                && entry.pitcher_id.is_some()
                && entry.batter_id == batter
                && entry.pitcher_id == pitcher
        })
        .map(|entry| MatchCandidate {
            entry,
            pitch_count_diff: entry.pitch_count.abs_diff(group.pitch_count()),
        })
        .collect();

    if candidates.is_empty() {
        // Feed-local at-bat number against the raw at-bat-index keyspace,
        // flagged for downstream transparency
        return match index.entries.get(&group.at_bat_number) {
            Some(entry) => AtBatSelection::Unverified(entry),
            None => AtBatSelection::Unmatched,
        };
    }

    candidates.sort_by_key(|c| (c.pitch_count_diff, c.entry.at_bat_index));
    let best = &candidates[0];

    if best.pitch_count_diff > 0 || candidates.len() > 1 {
        debug!(
            game_id = group.game_id,
            at_bat_number = group.at_bat_number,
            matched_index = best.entry.at_bat_index,
            pitch_count_diff = best.pitch_count_diff,
            candidates = candidates.len(),
            "Ambiguous or inexact at-bat match"
        );
    }
    AtBatSelection::Verified(best.entry)
}

/// Annotate one at-bat against its game's play index (if any was resolved).
///
/// Deterministic over identical inputs: rerunning on the same cached index
/// yields identical annotations.
pub fn annotate_group(group: &AtBatGroup, index: Option<&GamePlayIndex>) -> AnnotatedAtBat {
    let selection = match index {
        Some(idx) => select_entry(group, idx),
        None => AtBatSelection::Unmatched,
    };

    let (entry, unverified) = match &selection {
        AtBatSelection::Verified(entry) => (Some(*entry), false),
        AtBatSelection::Unverified(entry) => (Some(*entry), true),
        AtBatSelection::Unmatched => (None, false),
    };

    let mut balls = 0u32;
    let mut strikes = 0u32;
    for pitch in &group.pitches {
        match pitch.call.as_deref() {
            Some("B") => balls += 1,
            Some("S") => strikes += 1,
            _ => {}
        }
    }

    let pitches = group
        .pitches
        .iter()
        .enumerate()
        .map(|(sequence_index, pitch)| {
            let ctx = PitchContext {
                pitch_number: pitch.pitch_number,
                sequence_index,
            };
            let resolved = entry.and_then(|e| resolve_pitch(&ctx, e));
            let (play_id, match_method) = match resolved {
                Some((id, method)) => {
                    // The at-bat-level verification status overrides the
                    // per-pitch tag so callers see the weakest link
                    let method = if unverified {
                        MatchMethod::UnverifiedAtBat
                    } else {
                        method
                    };
                    (Some(id), Some(method))
                }
                None => (None, None),
            };

            let is_hit = pitch.is_hit_into_play();
            AnnotatedPitch {
                pitch_number: pitch.pitch_number,
                pitch_type: pitch.pitch_type.clone(),
                balls: pitch.balls,
                strikes: pitch.strikes,
                description: pitch.description.clone(),
                plate_x: pitch.plate_x,
                plate_z: pitch.plate_z,
                velocity: pitch.release_speed,
                ivb: pitch.pfx_z.map(|v| v * 12.0),
                hvb: pitch.pfx_x.map(|v| v * -12.0),
                spin: pitch.release_spin_rate,
                axis: pitch.spin_axis,
                is_hit,
                exit_velocity: if is_hit { pitch.launch_speed } else { None },
                launch_angle: if is_hit { pitch.launch_angle } else { None },
                exit_spin: if is_hit { pitch.launch_spin_rate } else { None },
                hit_distance: if is_hit { pitch.hit_distance } else { None },
                play_id,
                match_method,
            }
        })
        .collect();

    // Play-index feed's game date is authoritative when present
    let game_date = entry
        .and_then(|e| e.game_date)
        .or_else(|| index.and_then(|i| i.game_date))
        .or_else(|| group.game_date());

    AnnotatedAtBat {
        game_id: group.game_id,
        at_bat_number: group.at_bat_number,
        player_at_bat_number: 0, // assigned by the engine once all groups exist
        game_date,
        pitch_count: group.pitch_count(),
        balls,
        strikes,
        outcome: group.terminal_event().map(|e| e.to_string()),
        unverified,
        pitches,
    }
}
