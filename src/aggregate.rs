//! Aggregation Engine.
//!
//! Turns the matched, deduplicated at-bat set into audited plate-appearance
//! statistics. Classification mirrors the scoring rules: sacrifice flies
//! count toward plate appearances but not at-bats, strikeouts are a subset
//! of outs, and events that never happened at the plate (caught stealing,
//! pickoffs) are excluded entirely.

use std::collections::HashMap;

use crate::models::{AtBatGroup, MatchupSummary};

/// Events that end a baserunning play, not a plate appearance.
const NON_PA_EVENTS: &[&str] = &[
    "sac_bunt",
    "sac_bunt_double_play",
    "catcher_interf",
    "caught_stealing_2b",
    "caught_stealing_3b",
    "caught_stealing_home",
    "pickoff_1b",
    "pickoff_2b",
    "pickoff_3b",
    "other_out",
];

/// Plate appearances but not at-bats.
const SAC_FLY_EVENTS: &[&str] = &["sac_fly", "sac_fly_double_play"];

const HIT_EVENTS: &[&str] = &["single", "double", "triple", "home_run"];

const OUT_EVENTS: &[&str] = &[
    "strikeout",
    "strikeout_double_play",
    "field_out",
    "force_out",
    "grounded_into_double_play",
    "fielders_choice",
    "fielders_choice_out",
    "double_play",
    "triple_play",
];

const WALK_EVENTS: &[&str] = &["walk", "intent_walk", "hit_by_pitch"];

const STRIKEOUT_EVENTS: &[&str] = &["strikeout", "strikeout_double_play"];

fn total_bases_for(event: &str) -> u32 {
    match event {
        "single" => 1,
        "double" => 2,
        "triple" => 3,
        "home_run" => 4,
        _ => 0,
    }
}

/// Deduplicate by (game id, at-bat number), keeping the group whose pitch
/// order is most complete. Preserves the incoming chronological order.
pub fn dedupe_groups(groups: Vec<AtBatGroup>) -> Vec<AtBatGroup> {
    let mut best: HashMap<(u64, u32), usize> = HashMap::new();
    let mut kept: Vec<Option<AtBatGroup>> = Vec::with_capacity(groups.len());

    for group in groups {
        let key = (group.game_id, group.at_bat_number);
        match best.get(&key) {
            Some(&slot) => {
                let replace = kept[slot]
                    .as_ref()
                    .map(|existing| group.pitch_count() > existing.pitch_count())
                    .unwrap_or(true);
                if replace {
                    kept[slot] = Some(group);
                }
            }
            None => {
                best.insert(key, kept.len());
                kept.push(Some(group));
            }
        }
    }

    kept.into_iter().flatten().collect()
}

/// Compute counting and rate statistics over the deduplicated at-bat set.
pub fn summarize(groups: &[AtBatGroup]) -> MatchupSummary {
    let mut plate_appearances = 0u32;
    let mut hits = 0u32;
    let mut singles = 0u32;
    let mut doubles = 0u32;
    let mut triples = 0u32;
    let mut home_runs = 0u32;
    let mut outs = 0u32;
    let mut strikeouts = 0u32;
    let mut walks = 0u32;
    let mut sac_flies = 0u32;
    let mut total_bases = 0u32;

    for group in groups {
        let Some(event) = group.terminal_event() else {
            // No terminal event: the at-bat never completed in this dataset
            continue;
        };
        let event = event.to_lowercase();
        let event = event.as_str();

        if NON_PA_EVENTS.contains(&event) {
            continue;
        }
        plate_appearances += 1;

        if SAC_FLY_EVENTS.contains(&event) {
            sac_flies += 1;
            continue;
        }

        if HIT_EVENTS.contains(&event) {
            hits += 1;
            total_bases += total_bases_for(event);
            match event {
                "single" => singles += 1,
                "double" => doubles += 1,
                "triple" => triples += 1,
                "home_run" => home_runs += 1,
                _ => {}
            }
        } else if OUT_EVENTS.contains(&event) {
            outs += 1;
            if STRIKEOUT_EVENTS.contains(&event) {
                strikeouts += 1;
            }
        } else if WALK_EVENTS.contains(&event) {
            walks += 1;
        }
    }

    let at_bats = hits + outs;

    let rate = |num: u32, den: u32| -> Option<f64> {
        if den == 0 {
            None
        } else {
            Some(f64::from(num) / f64::from(den))
        }
    };

    let avg = rate(hits, at_bats);
    let obp = rate(hits + walks, plate_appearances);
    let slg = rate(total_bases, at_bats);
    let ops = match (obp, slg) {
        (Some(o), Some(s)) => Some(o + s),
        _ => None,
    };

    MatchupSummary {
        plate_appearances,
        at_bats,
        hits,
        singles,
        doubles,
        triples,
        home_runs,
        strikeouts,
        walks,
        sac_flies,
        total_bases,
        avg,
        obp,
        slg,
        ops,
        consistent: at_bats + walks + sac_flies == plate_appearances,
    }
}
