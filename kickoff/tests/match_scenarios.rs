//! End-to-end match scenarios.
//!
//! Pure state machine runs drive the clock explicitly through phase
//! deadlines; service runs go through the in-memory store.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use kickoff::{
    arena::MatchService,
    db::{InMemoryStore, MatchRepository, ResultRepository},
    game::{
        DiceRolls, DiceSource, Effect, MatchError, MatchEvent, MatchRules, Phase, PhaseInfo,
        SeededDice, Transition, transition,
        catalog::{starter_bonus_cards, starter_deck},
        entities::{ActionKind, MatchMode, PlayerSlot, Side},
        resolution::{DuelInput, resolve},
        state_machine::MatchRecord,
    },
    matchmaking::{Allocation, MatchmakingConfig},
    realtime::ChannelManager,
};

fn slot(player_id: i64, rating: i32) -> PlayerSlot {
    PlayerSlot::new(player_id, rating, starter_deck(), starter_bonus_cards())
}

fn service(store: &Arc<InMemoryStore>) -> MatchService {
    MatchService::new(
        store.clone(),
        Arc::new(ChannelManager::default()),
        Arc::new(MatchRules::default()),
        MatchmakingConfig::default(),
    )
}

fn coin_toss_record() -> MatchRecord {
    let rules = MatchRules::default();
    let now = Utc::now();
    let record = MatchRecord::new(uuid::Uuid::new_v4(), MatchMode::Ranked, slot(1, 1000), now);
    let record = transition(&record, MatchEvent::Open, &rules, now).unwrap().record;
    transition(
        &record,
        MatchEvent::Join {
            player: slot(2, 1050),
        },
        &rules,
        now,
    )
    .unwrap()
    .record
}

/// Fire the current phase deadline exactly when it falls due.
fn expire(record: &MatchRecord, dice: &mut SeededDice) -> Transition {
    let deadline = record.deadline().expect("phase has a deadline");
    transition(
        record,
        MatchEvent::Timeout {
            rolls: dice.roll_set(),
        },
        &MatchRules::default(),
        deadline,
    )
    .unwrap()
}

/// Let every deadline lapse until `stop` holds; returns the record and all effects.
fn run_until(
    mut record: MatchRecord,
    dice: &mut SeededDice,
    stop: impl Fn(&MatchRecord) -> bool,
) -> (MatchRecord, Vec<Effect>) {
    let mut effects = Vec::new();
    for _ in 0..500 {
        if stop(&record) {
            return (record, effects);
        }
        let step = expire(&record, dice);
        effects.extend(step.effects);
        record = step.record;
    }
    panic!("match did not reach the expected state");
}

#[tokio::test]
async fn scenario_quick_tickets_pair_into_coin_toss() {
    let store = Arc::new(InMemoryStore::new());
    store.set_rating(10, 1000).await;
    store.set_rating(11, 1050).await;
    let service = service(&store);

    let first = service.request_match(10, MatchMode::Quick, None).await.unwrap();
    let second = service.request_match(11, MatchMode::Quick, None).await.unwrap();
    assert_eq!(second, Allocation::Joined {
        match_id: first.match_id()
    });

    let matches = store.matches().await;
    assert_eq!(matches.len(), 1);
    let record = &matches[0];
    assert!(matches!(record.phase, Phase::CoinToss(_)));
    assert_eq!(record.player_id(Side::A), Some(10));
    assert_eq!(record.player_id(Side::B), Some(11));
}

#[tokio::test]
async fn scenario_first_card_must_be_midfielder() {
    let store = Arc::new(InMemoryStore::new());
    let service = service(&store);
    let match_id = service
        .request_match(1, MatchMode::Quick, None)
        .await
        .unwrap()
        .match_id();
    service.request_match(2, MatchMode::Quick, None).await.unwrap();

    // Resolve the toss directly so the test does not wait out its window.
    let record = store.load_match(match_id).await.unwrap().unwrap();
    let mut dice = SeededDice::from_seed(1);
    let toss = expire(&record, &mut dice);
    let tossed = toss.record;
    assert!(
        store
            .compare_and_swap(&tossed, record.version, &toss.effects)
            .await
            .unwrap()
    );

    let placer = tossed.player_id(tossed.current_turn.unwrap()).unwrap();
    // Card 2 is the striker.
    let err = service.place_card(placer, match_id, 2, 5).await.unwrap_err();
    assert_eq!(err, MatchError::FirstCardMustBeMidfield);

    let after = store.load_match(match_id).await.unwrap().unwrap();
    assert!(after.board.is_empty());
    assert_eq!(after.version, tossed.version);

    // A midfielder on the same cell is accepted.
    let cell = tossed.current_turn.unwrap().kick_off_cell();
    let placed = service.place_card(placer, match_id, 1, cell).await.unwrap();
    assert_eq!(placed.board.len(), 1);
}

#[test]
fn scenario_duel_won_by_higher_total() {
    let deck = starter_deck();
    // Winger (dribble 2) against the stopper (block 2).
    let input = DuelInput {
        kind: ActionKind::Dribble,
        attacker: &deck[2],
        defender: Some(&deck[3]),
        bonus: None,
    };
    let resolution = resolve(&input, DiceRolls::new(3, 4, 2));
    let duel = resolution.duel.expect("rolls 2-5 go to a duel");
    assert_eq!((duel.attacker_total, duel.defender_total), (6, 4));
    assert!(resolution.success);
    assert!(!resolution.critical);
}

#[test]
fn scenario_elapsed_turn_synthesizes_fallback() {
    let mut dice = SeededDice::from_seed(42);
    let (active, _) = run_until(coin_toss_record(), &mut dice, |r| {
        matches!(r.phase, Phase::Active(_))
    });
    let owner = active.current_turn.unwrap();
    assert_eq!(active.phase.awaiting(), Some(owner));
    let penalties_before = active.slot(owner).unwrap().reliability_penalties;

    let step = expire(&active, &mut dice);
    let next = step.record;

    assert_eq!(next.turn, active.turn + 1);
    assert_eq!(next.current_turn, Some(owner.other()));
    assert_eq!(
        next.slot(owner).unwrap().reliability_penalties,
        penalties_before + 1
    );
    let moves: Vec<_> = step
        .effects
        .iter()
        .filter_map(|e| match e {
            Effect::RecordMove(mv) => Some(mv),
            _ => None,
        })
        .collect();
    assert_eq!(moves.len(), 1);
    assert!(moves[0].auto);
    assert!(moves[0].verify());
}

#[tokio::test]
async fn scenario_full_match_rates_exactly_once() {
    let mut dice = SeededDice::from_seed(7);
    let (done, effects) = run_until(coin_toss_record(), &mut dice, MatchRecord::is_completed);

    let Phase::Completed(completed) = &done.phase else {
        unreachable!();
    };
    assert_eq!(completed.scores, done.scores);
    assert_eq!(done.turn, 10);

    // The detour through half time happened exactly once.
    let half_times = effects
        .iter()
        .filter(|e| matches!(e, Effect::PhaseChanged(Phase::HalfTime(_))))
        .count();
    assert_eq!(half_times, 1);

    let summaries: Vec<_> = effects
        .iter()
        .filter_map(|e| match e {
            Effect::ApplyResult(summary) => Some(summary.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(summaries.len(), 1);
    let summary = &summaries[0];
    assert!(summary.rating.is_some());

    // Frozen once completed.
    let err = transition(
        &done,
        MatchEvent::Forfeit { player: 1 },
        &MatchRules::default(),
        Utc::now(),
    )
    .unwrap_err();
    assert!(matches!(err, MatchError::MatchCompleted(_)));

    // Recording the result is idempotent.
    let store = InMemoryStore::new();
    assert!(store.record_result(summary).await.unwrap());
    let rating = store.rating(1).await.unwrap();
    assert!(!store.record_result(summary).await.unwrap());
    assert_eq!(store.rating(1).await.unwrap(), rating);
}

#[test]
fn turn_owner_alternates_except_across_half_time() {
    let mut dice = SeededDice::from_seed(99);
    let mut record = coin_toss_record();
    let mut owners: Vec<(u32, Side)> = Vec::new();

    while !record.is_completed() {
        if let Phase::Active(_) = record.phase {
            let owner = record.current_turn.unwrap();
            assert!(record.player_id(owner).is_some());
            if owners.last().map(|(turn, _)| *turn) != Some(record.turn) {
                owners.push((record.turn, owner));
            }
        }
        record = expire(&record, &mut dice).record;
    }

    let turns: Vec<u32> = owners.iter().map(|(turn, _)| *turn).collect();
    assert_eq!(turns, (1..=10).collect::<Vec<_>>());
    for pair in owners.windows(2) {
        let ((turn, a), (_, b)) = (pair[0], pair[1]);
        if turn != 5 {
            assert_ne!(a, b, "turn {turn} did not alternate");
        }
    }
    // Each half is kicked off by a different side.
    assert_ne!(owners[0].1, owners[5].1);
}

#[test]
fn deadlines_are_persisted_on_every_waiting_phase() {
    let mut dice = SeededDice::from_seed(3);
    let mut record = coin_toss_record();
    let start: DateTime<Utc> = record.updated_at;
    while !record.is_completed() {
        let deadline = record.deadline().unwrap();
        assert!(deadline >= start);
        assert!(!record.phase.is_due(deadline - TimeDelta::milliseconds(1)));
        record = expire(&record, &mut dice).record;
    }
}
