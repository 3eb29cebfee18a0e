//! Timed-Out Match Example
//!
//! Plays a whole match without any player input: every phase deadline lapses
//! and the engine acts for the absent side, which shows the full phase cycle
//! and the move log it produces.

use chrono::Utc;
use kickoff::game::{
    DiceSource, Effect, MatchEvent, MatchRules, PhaseInfo, SeededDice,
    catalog::{starter_bonus_cards, starter_deck},
    entities::{MatchMode, PlayerSlot},
    state_machine::MatchRecord,
    transition,
};

fn main() {
    println!("=== Timed-Out Match Example ===\n");

    let rules = MatchRules::default();
    let now = Utc::now();
    let slot = |id| PlayerSlot::new(id, 1000, starter_deck(), starter_bonus_cards());

    let mut record = MatchRecord::new(uuid::Uuid::new_v4(), MatchMode::Ranked, slot(1), now);
    for event in [MatchEvent::Open, MatchEvent::Join { player: slot(2) }] {
        record = transition(&record, event, &rules, now)
            .expect("fresh match accepts open and join")
            .record;
    }

    let mut dice = SeededDice::from_seed(2024);
    while let Some(deadline) = record.deadline() {
        let step = transition(
            &record,
            MatchEvent::Timeout {
                rolls: dice.roll_set(),
            },
            &rules,
            deadline,
        )
        .expect("deadline is due");

        for effect in &step.effects {
            match effect {
                Effect::PhaseChanged(phase) => println!("-> {}", phase.name()),
                Effect::RecordMove(mv) => {
                    let outcome = mv
                        .resolution
                        .as_ref()
                        .map_or("no dice", |r| if r.success { "success" } else { "failed" });
                    println!(
                        "   turn {:>2}: side {} {} from cell {} ({outcome})",
                        mv.turn, mv.side, mv.kind, mv.actor_cell
                    );
                }
                Effect::RecordPlacement(p) => {
                    println!("   side {} places card {} on cell {}", p.side, p.card_id, p.cell);
                }
                Effect::ApplyResult(summary) => {
                    println!("\nFinal score {} - {}", summary.scores[0], summary.scores[1]);
                    if let Some(change) = summary.rating {
                        println!("Ratings: {:?} -> {:?}", change.before, change.after);
                    }
                }
            }
        }
        record = step.record;
    }
}
