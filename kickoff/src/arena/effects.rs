//! Reporting on transition effects once they are durable.
//!
//! The store writes a transition's log entries and result atomically with
//! the record itself (see [`crate::db::MatchRepository::compare_and_swap`]);
//! what remains for the caller is logging and counters.

use crate::game::{Effect, entities::MatchId};

/// Log and count the outcome carried by a committed transition.
pub fn report_committed(match_id: MatchId, effects: &[Effect]) {
    for effect in effects {
        if let Effect::ApplyResult(summary) = effect {
            log::info!(
                "Match {match_id} result recorded: {:?} ({}-{}, {:?})",
                summary.winner,
                summary.scores[0],
                summary.scores[1],
                summary.reason
            );
            metrics::counter!("matches_completed_total").increment(1);
        }
    }
}
