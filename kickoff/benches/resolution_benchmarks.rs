use chrono::Utc;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use kickoff::game::{
    DiceRolls, DiceSource, DuelInput, MatchEvent, MatchRules, SeededDice,
    catalog::{starter_bonus_cards, starter_deck},
    entities::{ActionKind, MatchMode, PlayerSlot},
    resolve,
    state_machine::MatchRecord,
    transition, validate_placement,
};
use std::hint::black_box;

/// A match that has just been joined and waits on its coin toss
fn joined_match() -> MatchRecord {
    let rules = MatchRules::default();
    let now = Utc::now();
    let slot = |id| PlayerSlot::new(id, 1000, starter_deck(), starter_bonus_cards());
    let record = MatchRecord::new(uuid::Uuid::new_v4(), MatchMode::Ranked, slot(1), now);
    let record = transition(&record, MatchEvent::Open, &rules, now).unwrap().record;
    transition(&record, MatchEvent::Join { player: slot(2) }, &rules, now)
        .unwrap()
        .record
}

/// Let every deadline lapse until the match is over
fn play_out(mut record: MatchRecord, seed: u64) -> MatchRecord {
    let rules = MatchRules::default();
    let mut dice = SeededDice::from_seed(seed);
    while let Some(deadline) = record.deadline() {
        record = transition(
            &record,
            MatchEvent::Timeout {
                rolls: dice.roll_set(),
            },
            &rules,
            deadline,
        )
        .unwrap()
        .record;
    }
    record
}

fn bench_resolve(c: &mut Criterion) {
    let deck = starter_deck();
    let bonus = &starter_bonus_cards()[0];
    let mut group = c.benchmark_group("resolve");

    for (name, kind, attacker, defender) in [
        ("pass", ActionKind::Pass, &deck[0], &deck[3]),
        ("shot_on_keeper", ActionKind::Shot, &deck[1], &deck[4]),
        ("dribble", ActionKind::Dribble, &deck[7], &deck[6]),
    ] {
        let input = DuelInput {
            kind,
            attacker,
            defender: Some(defender),
            bonus: Some(bonus),
        };
        group.bench_with_input(BenchmarkId::from_parameter(name), &input, |b, input| {
            b.iter(|| resolve(black_box(input), black_box(DiceRolls::new(3, 4, 2))));
        });
    }
    group.finish();
}

fn bench_validate_placement(c: &mut Criterion) {
    let rules = MatchRules::default();
    let record = play_out_until_placement();

    c.bench_function("validate_placement", |b| {
        b.iter(|| {
            let _ = validate_placement(
                black_box(&record),
                &rules.config,
                black_box(1),
                black_box(1),
                black_box(5),
            );
        });
    });
}

fn play_out_until_placement() -> MatchRecord {
    let record = joined_match();
    let deadline = record.deadline().unwrap();
    transition(
        &record,
        MatchEvent::Timeout {
            rolls: DiceRolls::new(1, 1, 1),
        },
        &MatchRules::default(),
        deadline,
    )
    .unwrap()
    .record
}

fn bench_full_match(c: &mut Criterion) {
    let record = joined_match();
    c.bench_function("timed_out_full_match", |b| {
        b.iter(|| play_out(black_box(record.clone()), 7));
    });
}

criterion_group!(resolution, bench_resolve, bench_validate_placement);
criterion_group!(state_machine, bench_full_match);
criterion_main!(resolution, state_machine);
