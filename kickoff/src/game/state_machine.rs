//! Match state machine.
//!
//! [`transition`] is a pure function from a record and an event to the next
//! record plus the effects that must be stored with it (append to the logs,
//! apply the result). Dice arrive inside the event so the same inputs always
//! produce the same outputs. Persistence and broadcasting live outside.

use chrono::{DateTime, TimeDelta, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use super::{
    constants::BOARD_CELLS,
    dice::DiceRolls,
    entities::{
        ActionKind, ActionRequest, Board, Card, CardId, Cell, MatchId, MatchMode, Occupant,
        PlayerId, PlayerSlot, Role, Side, distance,
    },
    errors::{MatchError, MatchResult},
    moves::{Move, Placement as PlacementRecord},
    policy::MatchRules,
    rating::{self, RatingChange},
    resolution::{DuelInput, Resolution, resolve},
    states::{
        Active, CoinToss, Completed, CompletionReason, HalfTime, Phase, PhaseInfo, Placement,
        PlacementLocked, PlacementRound, WaitingForPlayers,
    },
    validator::{CheckedAction, validate_move, validate_placement},
};

/// Authoritative state of one match.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MatchRecord {
    pub id: MatchId,
    pub mode: MatchMode,
    pub phase: Phase,
    /// 0 until kick-off, then `1..=max_turns`.
    pub turn: u32,
    pub turn_started_at: Option<DateTime<Utc>>,
    pub players: [Option<PlayerSlot>; 2],
    pub current_turn: Option<Side>,
    pub scores: [u32; 2],
    pub token: Cell,
    pub board: Board,
    pub first_half_starter: Option<Side>,
    pub invite_code: Option<String>,
    /// Next move sequence within the current turn.
    pub sequence: u32,
    pub placement_order: u32,
    /// Bumped by every transition; guards the compare-and-swap write.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MatchRecord {
    #[must_use]
    pub fn new(id: MatchId, mode: MatchMode, creator: PlayerSlot, now: DateTime<Utc>) -> Self {
        Self {
            id,
            mode,
            phase: Phase::default(),
            turn: 0,
            turn_started_at: None,
            players: [Some(creator), None],
            current_turn: None,
            scores: [0, 0],
            token: BOARD_CELLS / 2,
            board: Board::default(),
            first_half_starter: None,
            invite_code: None,
            sequence: 0,
            placement_order: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_invite_code(mut self, code: impl Into<String>) -> Self {
        self.invite_code = Some(code.into());
        self
    }

    #[must_use]
    pub fn side_of(&self, player: PlayerId) -> Option<Side> {
        [Side::A, Side::B]
            .into_iter()
            .find(|side| self.player_id(*side) == Some(player))
    }

    #[must_use]
    pub fn slot(&self, side: Side) -> Option<&PlayerSlot> {
        self.players[side.index()].as_ref()
    }

    pub fn slot_mut(&mut self, side: Side) -> Option<&mut PlayerSlot> {
        self.players[side.index()].as_mut()
    }

    #[must_use]
    pub fn player_id(&self, side: Side) -> Option<PlayerId> {
        self.slot(side).map(|slot| slot.player_id)
    }

    /// Card of `side` standing on `cell` and free to act.
    #[must_use]
    pub fn active_card(&self, cell: Cell, side: Side) -> Option<&Card> {
        let occupant = self.board.active_for(cell, side, self.turn)?;
        self.slot(side)?.card(occupant.card_id)
    }

    #[must_use]
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.phase.deadline()
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.phase.is_terminal()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.players.iter().all(Option::is_some)
    }

    /// Time left in the running turn, measured from the persisted start so a
    /// reconnecting client never gains time.
    #[must_use]
    pub fn remaining_turn_time(&self, now: DateTime<Utc>, rules: &MatchRules) -> Option<TimeDelta> {
        if !matches!(self.phase, Phase::Active(_)) {
            return None;
        }
        let started = self.turn_started_at?;
        let left = started + rules.config.turn_duration() - now;
        Some(left.max(TimeDelta::zero()))
    }
}

/// Inputs the state machine reacts to.
#[derive(Clone, Debug, PartialEq)]
pub enum MatchEvent {
    /// Publish a freshly created match to matchmaking.
    Open,
    Join { player: PlayerSlot },
    PlaceCard {
        player: PlayerId,
        card_id: CardId,
        cell: Cell,
    },
    ConfirmPlacement { player: PlayerId },
    Act {
        player: PlayerId,
        action: ActionRequest,
        rolls: DiceRolls,
    },
    /// The phase deadline passed; act for whoever did not.
    Timeout { rolls: DiceRolls },
    Forfeit { player: PlayerId },
    /// Nobody claimed the open seat in time.
    Abandon,
}

impl MatchEvent {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Join { .. } => "join",
            Self::PlaceCard { .. } => "place_card",
            Self::ConfirmPlacement { .. } => "confirm_placement",
            Self::Act { .. } => "act",
            Self::Timeout { .. } => "timeout",
            Self::Forfeit { .. } => "forfeit",
            Self::Abandon => "abandon",
        }
    }
}

/// Final result handed to the store exactly once per match.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MatchSummary {
    pub match_id: MatchId,
    pub mode: MatchMode,
    pub player_ids: [Option<PlayerId>; 2],
    pub winner: Option<Side>,
    pub scores: [u32; 2],
    pub reason: CompletionReason,
    /// Present only for rated matches that were actually played.
    pub rating: Option<RatingChange>,
    pub completed_at: DateTime<Utc>,
}

/// Side effects of a transition, committed together with the new record.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    RecordMove(Move),
    RecordPlacement(PlacementRecord),
    PhaseChanged(Phase),
    ApplyResult(MatchSummary),
}

#[derive(Clone, Debug)]
pub struct Transition {
    pub record: MatchRecord,
    pub effects: Vec<Effect>,
}

/// Apply `event` to `record`.
///
/// # Errors
///
/// Validation failures leave no trace; the input record is never modified.
/// A completed match rejects every event with [`MatchError::MatchCompleted`].
pub fn transition(
    record: &MatchRecord,
    event: MatchEvent,
    rules: &MatchRules,
    now: DateTime<Utc>,
) -> MatchResult<Transition> {
    if record.is_completed() {
        return Err(MatchError::MatchCompleted(record.id));
    }

    let mut machine = Machine {
        record: record.clone(),
        rules,
        now,
        effects: Vec::new(),
    };
    machine.apply(event)?;

    let Machine {
        record: mut next,
        mut effects,
        ..
    } = machine;
    if next.phase != record.phase {
        debug!(
            "match {}: {} -> {}",
            next.id,
            record.phase.name(),
            next.phase.name()
        );
        effects.push(Effect::PhaseChanged(next.phase.clone()));
    }
    next.version += 1;
    next.updated_at = now;
    Ok(Transition {
        record: next,
        effects,
    })
}

/// What a validated action will do, detached from the record it was read from.
enum Plan {
    Bonus {
        side: Side,
        bonus_id: CardId,
    },
    Substitute {
        side: Side,
        actor_cell: Cell,
        outgoing_cost: u8,
        incoming: Card,
    },
    Contested {
        side: Side,
        kind: ActionKind,
        actor_cell: Cell,
        target_cell: Cell,
        defender_cell: Option<Cell>,
        bonus_id: Option<CardId>,
        resolution: Resolution,
    },
}

impl Plan {
    fn from_checked(checked: CheckedAction<'_>, rolls: DiceRolls) -> Self {
        match checked {
            CheckedAction::PlayBonus { side, bonus } => Self::Bonus {
                side,
                bonus_id: bonus.id,
            },
            CheckedAction::Substitute {
                side,
                actor_cell,
                outgoing,
                incoming,
            } => Self::Substitute {
                side,
                actor_cell,
                outgoing_cost: outgoing.cost,
                incoming: incoming.clone(),
            },
            CheckedAction::Contested {
                side,
                kind,
                actor_cell,
                actor,
                target_cell,
                defender,
                bonus,
            } => {
                let input = DuelInput {
                    kind,
                    attacker: actor,
                    defender: defender.map(|d| d.card),
                    bonus,
                };
                Self::Contested {
                    side,
                    kind,
                    actor_cell,
                    target_cell,
                    defender_cell: defender.map(|d| d.cell),
                    bonus_id: bonus.map(|b| b.id),
                    resolution: resolve(&input, rolls),
                }
            }
        }
    }
}

struct Machine<'r> {
    record: MatchRecord,
    rules: &'r MatchRules,
    now: DateTime<Utc>,
    effects: Vec<Effect>,
}

impl Machine<'_> {
    fn apply(&mut self, event: MatchEvent) -> MatchResult<()> {
        match event {
            MatchEvent::Open => self.open(),
            MatchEvent::Join { player } => self.join(player),
            MatchEvent::PlaceCard {
                player,
                card_id,
                cell,
            } => self.place_card(player, card_id, cell),
            MatchEvent::ConfirmPlacement { player } => self.confirm(player),
            MatchEvent::Act {
                player,
                action,
                rolls,
            } => self.act(player, &action, rolls),
            MatchEvent::Timeout { rolls } => self.timeout(rolls),
            MatchEvent::Forfeit { player } => self.forfeit(player),
            MatchEvent::Abandon => self.abandon(),
        }
    }

    fn wrong_phase(&self) -> MatchError {
        MatchError::InvalidActionForPhase(self.record.phase.name().to_string())
    }

    fn seated(&self, player: PlayerId) -> MatchResult<Side> {
        self.record.side_of(player).ok_or(MatchError::NotSeated)
    }

    fn slot_mut(&mut self, side: Side) -> MatchResult<&mut PlayerSlot> {
        self.record.slot_mut(side).ok_or(MatchError::NotSeated)
    }

    // Lobby

    fn open(&mut self) -> MatchResult<()> {
        if !matches!(self.record.phase, Phase::Initializing(_)) {
            return Err(self.wrong_phase());
        }
        self.record.phase = WaitingForPlayers { since: self.now }.into();
        Ok(())
    }

    fn join(&mut self, player: PlayerSlot) -> MatchResult<()> {
        if !matches!(self.record.phase, Phase::WaitingForPlayers(_)) {
            return Err(if self.record.is_full() {
                MatchError::SeatTaken
            } else {
                self.wrong_phase()
            });
        }
        if self.record.side_of(player.player_id).is_some() {
            return Err(MatchError::SelfMatch);
        }
        if self.record.players[Side::B.index()].is_some() {
            return Err(MatchError::SeatTaken);
        }

        self.record.players[Side::B.index()] = Some(player);
        self.record.phase = CoinToss {
            deadline: self.now + self.rules.config.coin_toss(),
        }
        .into();
        Ok(())
    }

    fn toss(&mut self, die: u8) -> MatchResult<()> {
        let winner = self.rules.coin_toss.winner(die);
        debug!("match {}: side {winner} wins the toss", self.record.id);
        self.record.first_half_starter = Some(winner);
        self.start_placement(winner, PlacementRound::Initial);
        Ok(())
    }

    // Placement

    fn start_placement(&mut self, first: Side, round: PlacementRound) {
        for slot in self.record.players.iter_mut().flatten() {
            slot.reset_round();
        }
        self.record.token = first.kick_off_cell();
        self.set_placer(first, round);
    }

    fn set_placer(&mut self, side: Side, round: PlacementRound) {
        let slot = self
            .rules
            .config
            .placement_slot(round == PlacementRound::SecondHalf);
        self.record.current_turn = Some(side);
        self.record.phase = Placement {
            team: side.into(),
            round,
            deadline: self.now + slot,
        }
        .into();
    }

    fn place_card(&mut self, player: PlayerId, card_id: CardId, cell: Cell) -> MatchResult<()> {
        let side = self.seated(player)?;
        let card = validate_placement(&self.record, &self.rules.config, player, card_id, cell)?
            .clone();
        self.put_card(side, player, &card, cell)?;
        self.advance_placement(side)
    }

    fn put_card(&mut self, side: Side, player: PlayerId, card: &Card, cell: Cell) -> MatchResult<()> {
        self.record.board.insert(cell, Occupant::new(side, card.id));
        let slot = self.slot_mut(side)?;
        slot.placements_this_round += 1;
        slot.placed_cost += u32::from(card.cost);
        self.log_placement(side, player, card.id, cell, false);
        Ok(())
    }

    fn log_placement(&mut self, side: Side, player: PlayerId, card_id: CardId, cell: Cell, substitute: bool) {
        self.effects.push(Effect::RecordPlacement(PlacementRecord {
            match_id: self.record.id,
            placement_order: self.record.placement_order,
            player_id: player,
            side,
            card_id,
            cell,
            substitute,
            expelled_until_turn: None,
            created_at: self.now,
        }));
        self.record.placement_order += 1;
    }

    fn needs_placement(&self, side: Side) -> bool {
        self.record
            .slot(side)
            .is_some_and(|slot| slot.placements_this_round < self.rules.config.required_placements)
    }

    fn placement_round(&self) -> MatchResult<PlacementRound> {
        match &self.record.phase {
            Phase::Placement(placement) => Ok(placement.round),
            _ => Err(self.wrong_phase()),
        }
    }

    /// Hand the placement to the other side, or lock the line-ups once both are done.
    fn advance_placement(&mut self, placed: Side) -> MatchResult<()> {
        let round = self.placement_round()?;
        let next = [placed.other(), placed]
            .into_iter()
            .find(|side| self.needs_placement(*side));
        match next {
            Some(side) => self.set_placer(side, round),
            None => {
                self.record.current_turn = None;
                self.record.phase = PlacementLocked {
                    round,
                    confirmations: [false, false],
                    deadline: self.now + self.rules.config.placement_lock(),
                }
                .into();
            }
        }
        Ok(())
    }

    /// Cheapest affordable card (a midfielder when it opens the line-up) on
    /// the first legal cell of the player's own half.
    fn auto_place(&mut self, side: Side) -> MatchResult<()> {
        let player = self.record.player_id(side).ok_or(MatchError::NotSeated)?;
        let slot = self.record.slot(side).ok_or(MatchError::NotSeated)?;
        let opening = slot.placements_this_round == 0;

        let mut candidates: Vec<&Card> = slot
            .deck
            .iter()
            .filter(|card| !self.record.board.contains_card(side, card.id))
            .collect();
        candidates.sort_by_key(|card| (opening && card.role != Role::Midfielder, card.cost, card.id));

        let choice = candidates.into_iter().find_map(|card| {
            side.half().into_iter().find_map(|cell| {
                validate_placement(&self.record, &self.rules.config, player, card.id, cell)
                    .ok()
                    .map(|card| (card.clone(), cell))
            })
        });

        match choice {
            Some((card, cell)) => {
                debug!(
                    "match {}: auto-placing card {} on cell {cell} for side {side}",
                    self.record.id, card.id
                );
                self.put_card(side, player, &card, cell)?;
            }
            None => {
                let required = self.rules.config.required_placements;
                self.slot_mut(side)?.placements_this_round = required;
            }
        }
        self.advance_placement(side)
    }

    fn confirm(&mut self, player: PlayerId) -> MatchResult<()> {
        let side = self.seated(player)?;
        match &mut self.record.phase {
            Phase::PlacementLocked(locked) => {
                locked.confirmations[side.index()] = true;
                if locked.confirmations == [true, true] {
                    let round = locked.round;
                    self.kick_off(round);
                }
            }
            Phase::HalfTime(half_time) => {
                half_time.confirmations[side.index()] = true;
                if half_time.confirmations == [true, true] {
                    self.start_second_half();
                }
            }
            _ => return Err(self.wrong_phase()),
        }
        Ok(())
    }

    // Play

    fn kick_off(&mut self, round: PlacementRound) {
        let starter = self.record.first_half_starter.unwrap_or(Side::A);
        let (owner, turn) = match round {
            PlacementRound::Initial => (starter, 1),
            PlacementRound::SecondHalf => (starter.other(), self.rules.config.half_time_turn + 1),
        };
        self.record.turn = turn;
        self.record.token = owner.kick_off_cell();
        self.begin_turn(owner);
    }

    fn begin_turn(&mut self, owner: Side) {
        self.record.current_turn = Some(owner);
        self.record.turn_started_at = Some(self.now);
        self.record.sequence = 0;
        self.record.phase = Active {
            owner: owner.into(),
            deadline: self.now + self.rules.config.turn_duration(),
        }
        .into();
    }

    fn act(&mut self, player: PlayerId, action: &ActionRequest, rolls: DiceRolls) -> MatchResult<()> {
        let checked = validate_move(&self.record, &self.rules.config, player, action)?;
        let plan = Plan::from_checked(checked, rolls);
        self.execute(player, plan, false)
    }

    fn execute(&mut self, player: PlayerId, plan: Plan, auto: bool) -> MatchResult<()> {
        match plan {
            Plan::Bonus { side, bonus_id } => {
                let slot = self.slot_mut(side)?;
                let position = slot
                    .bonus_cards
                    .iter()
                    .position(|card| card.id == bonus_id)
                    .ok_or(MatchError::BonusCardUnavailable)?;
                slot.active_bonus = Some(slot.bonus_cards.remove(position));
                let token = self.record.token;
                self.log_move(side, player, ActionKind::PlayBonus, token, None, Some(bonus_id), None, auto);
                Ok(())
            }
            Plan::Substitute {
                side,
                actor_cell,
                outgoing_cost,
                incoming,
            } => {
                if let Some(occupant) = self.record.board.get_mut(actor_cell) {
                    occupant.card_id = incoming.id;
                    occupant.expelled_until_turn = None;
                }
                let slot = self.slot_mut(side)?;
                slot.substitutes_used += 1;
                slot.placed_cost =
                    slot.placed_cost.saturating_sub(u32::from(outgoing_cost)) + u32::from(incoming.cost);
                self.log_placement(side, player, incoming.id, actor_cell, true);
                self.log_move(
                    side,
                    player,
                    ActionKind::Substitute,
                    actor_cell,
                    None,
                    Some(incoming.id),
                    None,
                    auto,
                );
                self.end_turn()
            }
            Plan::Contested {
                side,
                kind,
                actor_cell,
                target_cell,
                defender_cell,
                bonus_id,
                resolution,
            } => {
                if let Some(id) = bonus_id {
                    self.consume_bonus(side, id)?;
                }
                self.apply_outcome(side, kind, target_cell, defender_cell, &resolution);
                self.log_move(
                    side,
                    player,
                    kind,
                    actor_cell,
                    Some(target_cell),
                    bonus_id,
                    Some(resolution),
                    auto,
                );
                self.end_turn()
            }
        }
    }

    fn consume_bonus(&mut self, side: Side, bonus_id: CardId) -> MatchResult<()> {
        let slot = self.slot_mut(side)?;
        if slot.active_bonus.as_ref().is_some_and(|armed| armed.id == bonus_id) {
            slot.active_bonus = None;
        } else {
            slot.bonus_cards.retain(|card| card.id != bonus_id);
        }
        Ok(())
    }

    /// Score, token movement, and expulsion for a resolved action.
    fn apply_outcome(
        &mut self,
        side: Side,
        kind: ActionKind,
        target_cell: Cell,
        defender_cell: Option<Cell>,
        resolution: &Resolution,
    ) {
        let record = &mut self.record;
        match (kind, resolution.success) {
            (ActionKind::Shot, true) => {
                record.scores[side.index()] += 1;
                record.token = side.other().kick_off_cell();
            }
            // Keeper gathers the ball.
            (ActionKind::Shot, false) => record.token = target_cell,
            (ActionKind::Pass | ActionKind::Dribble, true) => record.token = target_cell,
            (ActionKind::Pass, false) => {
                if let Some(cell) = defender_cell {
                    record.token = cell;
                }
            }
            _ => {}
        }

        if kind == ActionKind::Dribble
            && resolution.defender_fumbled()
            && let Some(cell) = defender_cell
        {
            let until = record.turn + self.rules.config.expulsion_turns + 1;
            if let Some(occupant) = record.board.get_mut(cell) {
                occupant.expelled_until_turn = Some(until);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn log_move(
        &mut self,
        side: Side,
        player: PlayerId,
        kind: ActionKind,
        actor_cell: Cell,
        target_cell: Option<Cell>,
        card_ref: Option<CardId>,
        resolution: Option<Resolution>,
        auto: bool,
    ) {
        let mv = Move {
            match_id: self.record.id,
            turn: self.record.turn,
            sequence: self.record.sequence,
            player_id: player,
            side,
            kind,
            actor_cell,
            target_cell,
            card_ref,
            resolution,
            auto,
            created_at: self.now,
            integrity_hash: String::new(),
        }
        .sealed();
        self.record.sequence += 1;
        self.effects.push(Effect::RecordMove(mv));
    }

    fn end_turn(&mut self) -> MatchResult<()> {
        let finished = self.record.turn;
        if finished >= self.rules.config.max_turns {
            self.complete(CompletionReason::FullTime);
        } else if finished == self.rules.config.half_time_turn {
            self.enter_half_time()?;
        } else {
            let next = self
                .record
                .current_turn
                .map(Side::other)
                .ok_or(MatchError::NotYourTurn)?;
            self.record.turn += 1;
            self.begin_turn(next);
        }
        Ok(())
    }

    /// Shortest legal pass, else a dribble, else an idle turn with no dice.
    fn fallback(&mut self, side: Side, rolls: DiceRolls) -> MatchResult<()> {
        let player = self.record.player_id(side).ok_or(MatchError::NotSeated)?;
        let token = self.record.token;
        let config = &self.rules.config;

        let mut actors: Vec<Cell> = (1..=BOARD_CELLS)
            .filter(|cell| distance(*cell, token) <= 1)
            .filter(|cell| self.record.active_card(*cell, side).is_some())
            .collect();
        actors.sort_by_key(|cell| (distance(*cell, token), *cell));

        let mut passes = Vec::new();
        for reach in 1..=config.pass_range {
            for target in [token.checked_sub(reach), token.checked_add(reach)]
                .into_iter()
                .flatten()
            {
                for actor in &actors {
                    passes.push(ActionRequest::new(ActionKind::Pass, *actor, Some(target)));
                }
            }
        }
        let dribbles = actors
            .iter()
            .map(|actor| ActionRequest::new(ActionKind::Dribble, *actor, None));

        let plan = passes.into_iter().chain(dribbles).find_map(|action| {
            validate_move(&self.record, config, player, &action)
                .ok()
                .map(|checked| Plan::from_checked(checked, rolls))
        });

        match plan {
            Some(plan) => self.execute(player, plan, true),
            None => {
                self.log_move(side, player, ActionKind::Pass, token, None, None, None, true);
                self.end_turn()
            }
        }
    }

    // Half time

    fn enter_half_time(&mut self) -> MatchResult<()> {
        self.record.board.clear();
        let grants = self.rules.redistribution.redistribute(&self.record);
        for (side, cards) in [Side::A, Side::B].into_iter().zip(grants) {
            let slot = self.slot_mut(side)?;
            slot.reset_round();
            slot.bonus_cards.extend(cards);
        }
        self.record.current_turn = None;
        self.record.phase = HalfTime {
            confirmations: [false, false],
            deadline: self.now + self.rules.config.half_time(),
        }
        .into();
        Ok(())
    }

    fn start_second_half(&mut self) {
        let starter = self
            .record
            .first_half_starter
            .map_or(Side::B, Side::other);
        self.start_placement(starter, PlacementRound::SecondHalf);
    }

    // Deadlines

    fn penalize(&mut self, side: Side) {
        if let Some(slot) = self.record.slot_mut(side) {
            slot.reliability_penalties += 1;
        }
    }

    fn penalize_unconfirmed(&mut self, confirmations: [bool; 2]) {
        for side in [Side::A, Side::B] {
            if !confirmations[side.index()] {
                self.penalize(side);
            }
        }
    }

    fn timeout(&mut self, rolls: DiceRolls) -> MatchResult<()> {
        if !self.record.phase.is_due(self.now) {
            return Err(MatchError::DeadlineNotReached);
        }
        match self.record.phase.clone() {
            Phase::CoinToss(_) => self.toss(rolls.initial),
            Phase::Placement(placement) => {
                let side = placement.team.into();
                self.penalize(side);
                self.auto_place(side)
            }
            Phase::PlacementLocked(locked) => {
                self.penalize_unconfirmed(locked.confirmations);
                self.kick_off(locked.round);
                Ok(())
            }
            Phase::Active(active) => {
                let side = active.owner.into();
                self.penalize(side);
                self.fallback(side, rolls)
            }
            Phase::HalfTime(half_time) => {
                self.penalize_unconfirmed(half_time.confirmations);
                self.start_second_half();
                Ok(())
            }
            _ => Err(MatchError::DeadlineNotReached),
        }
    }

    // Endings

    fn forfeit(&mut self, player: PlayerId) -> MatchResult<()> {
        let side = self.seated(player)?;
        match self.record.phase {
            Phase::Initializing(_) | Phase::WaitingForPlayers(_) => {
                self.complete(CompletionReason::Abandoned);
            }
            _ => self.complete(CompletionReason::Forfeit { by: side }),
        }
        Ok(())
    }

    fn abandon(&mut self) -> MatchResult<()> {
        match self.record.phase {
            Phase::Initializing(_) | Phase::WaitingForPlayers(_) => {
                self.complete(CompletionReason::Abandoned);
                Ok(())
            }
            _ => Err(self.wrong_phase()),
        }
    }

    fn complete(&mut self, reason: CompletionReason) {
        let record = &mut self.record;
        let [a, b] = record.scores;
        let winner = match reason {
            CompletionReason::Forfeit { by } => Some(by.other()),
            CompletionReason::Abandoned => None,
            CompletionReason::FullTime => match a.cmp(&b) {
                std::cmp::Ordering::Greater => Some(Side::A),
                std::cmp::Ordering::Less => Some(Side::B),
                std::cmp::Ordering::Equal => None,
            },
        };

        let ratings = match (&record.players[0], &record.players[1]) {
            (Some(a), Some(b)) => Some([a.rating, b.rating]),
            _ => None,
        };
        let rating = ratings
            .filter(|_| record.mode.is_rated() && reason != CompletionReason::Abandoned)
            .map(|ratings| {
                let score_a = match winner {
                    Some(Side::A) => 1.0,
                    Some(Side::B) => 0.0,
                    None => 0.5,
                };
                rating::adjust(ratings, score_a)
            });
        if let Some(change) = rating {
            for (slot, after) in record.players.iter_mut().flatten().zip(change.after) {
                slot.rating = after;
            }
        }

        record.current_turn = None;
        record.phase = Completed {
            winner,
            scores: record.scores,
            reason,
            at: self.now,
        }
        .into();

        let summary = MatchSummary {
            match_id: record.id,
            mode: record.mode,
            player_ids: [record.player_id(Side::A), record.player_id(Side::B)],
            winner,
            scores: record.scores,
            reason,
            rating,
            completed_at: self.now,
        };
        self.effects.push(Effect::ApplyResult(summary));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{
        states::{ActiveTurn, PlacementTurn},
        test_support::slot,
    };

    fn rules() -> MatchRules {
        MatchRules::default()
    }

    fn step(record: &MatchRecord, event: MatchEvent, now: DateTime<Utc>) -> MatchRecord {
        transition(record, event, &rules(), now).unwrap().record
    }

    fn later(record: &MatchRecord, secs: i64) -> DateTime<Utc> {
        record.updated_at + TimeDelta::seconds(secs)
    }

    fn waiting() -> MatchRecord {
        let now = Utc::now();
        let record = MatchRecord::new(uuid::Uuid::new_v4(), MatchMode::Quick, slot(1, 1000), now);
        step(&record, MatchEvent::Open, now)
    }

    fn tossed() -> MatchRecord {
        let record = waiting();
        let record = step(
            &record,
            MatchEvent::Join {
                player: slot(2, 1050),
            },
            later(&record, 1),
        );
        step(
            &record,
            MatchEvent::Timeout {
                rolls: DiceRolls::new(1, 1, 1),
            },
            later(&record, 3),
        )
    }

    /// Both line-ups placed, A to kick off.
    fn locked() -> MatchRecord {
        let mut record = tossed();
        let script = [
            (1, 1, 5),
            (2, 1, 6),
            (1, 4, 2),
            (2, 4, 9),
            (1, 3, 4),
            (2, 3, 7),
            (1, 5, 1),
            (2, 5, 10),
        ];
        for (player, card_id, cell) in script {
            record = step(
                &record,
                MatchEvent::PlaceCard {
                    player,
                    card_id,
                    cell,
                },
                later(&record, 1),
            );
        }
        record
    }

    fn kicked_off() -> MatchRecord {
        let record = locked();
        let record = step(&record, MatchEvent::ConfirmPlacement { player: 1 }, later(&record, 1));
        step(&record, MatchEvent::ConfirmPlacement { player: 2 }, later(&record, 1))
    }

    #[test]
    fn join_moves_to_coin_toss() {
        let record = waiting();
        assert_eq!(record.phase.name(), "waiting_for_players");

        let err = transition(
            &record,
            MatchEvent::Join {
                player: slot(1, 1000),
            },
            &rules(),
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err, MatchError::SelfMatch);

        let joined = step(
            &record,
            MatchEvent::Join {
                player: slot(2, 1050),
            },
            Utc::now(),
        );
        assert_eq!(joined.phase.name(), "coin_toss");
        assert_eq!(joined.player_id(Side::B), Some(2));
        assert_eq!(joined.version, record.version + 1);
    }

    #[test]
    fn coin_toss_waits_for_its_deadline() {
        let record = waiting();
        let record = step(
            &record,
            MatchEvent::Join {
                player: slot(2, 1050),
            },
            record.updated_at,
        );
        let early = transition(
            &record,
            MatchEvent::Timeout {
                rolls: DiceRolls::new(2, 1, 1),
            },
            &rules(),
            later(&record, 1),
        );
        assert_eq!(early.unwrap_err(), MatchError::DeadlineNotReached);

        let placed = step(
            &record,
            MatchEvent::Timeout {
                rolls: DiceRolls::new(2, 1, 1),
            },
            later(&record, 3),
        );
        // Even die: side B wins the toss and places first.
        let Phase::Placement(placement) = &placed.phase else {
            panic!("expected placement, got {:?}", placed.phase);
        };
        assert_eq!(placement.team, PlacementTurn::TeamB);
        assert_eq!(placed.first_half_starter, Some(Side::B));
        assert_eq!(placed.current_turn, Some(Side::B));
    }

    #[test]
    fn placement_alternates_then_locks() {
        let record = tossed();
        let next = step(
            &record,
            MatchEvent::PlaceCard {
                player: 1,
                card_id: 1,
                cell: 5,
            },
            later(&record, 1),
        );
        assert_eq!(next.current_turn, Some(Side::B));

        let record = locked();
        assert_eq!(record.phase.name(), "placement_locked");
        assert_eq!(record.board.len(), 8);
        assert_eq!(record.current_turn, None);
        assert_eq!(record.placement_order, 8);
    }

    #[test]
    fn rejected_placement_leaves_record_untouched() {
        let record = tossed();
        let err = transition(
            &record,
            MatchEvent::PlaceCard {
                player: 1,
                card_id: 2,
                cell: 5,
            },
            &rules(),
            later(&record, 1),
        )
        .unwrap_err();
        assert_eq!(err, MatchError::FirstCardMustBeMidfield);
        assert!(record.board.is_empty());
    }

    #[test]
    fn confirmations_start_turn_one() {
        let record = kicked_off();
        let Phase::Active(active) = &record.phase else {
            panic!("expected active, got {:?}", record.phase);
        };
        assert_eq!(active.owner, ActiveTurn::TurnA);
        assert_eq!(record.turn, 1);
        assert_eq!(record.token, 5);
        assert!(record.turn_started_at.is_some());
    }

    #[test]
    fn bonus_keeps_the_turn_and_boosts_next_action() {
        let record = kicked_off();
        let bonus = transition(
            &record,
            MatchEvent::Act {
                player: 1,
                action: ActionRequest::new(ActionKind::PlayBonus, 5, None).with_card(101),
                rolls: DiceRolls::new(1, 1, 1),
            },
            &rules(),
            later(&record, 2),
        )
        .unwrap();
        let record = bonus.record;
        assert_eq!(record.current_turn, Some(Side::A));
        assert_eq!(record.sequence, 1);
        assert!(record.slot(Side::A).unwrap().active_bonus.is_some());
        assert!(!bonus.effects.iter().any(|e| matches!(e, Effect::PhaseChanged(_))));

        let dribble = transition(
            &record,
            MatchEvent::Act {
                player: 1,
                action: ActionRequest::new(ActionKind::Dribble, 5, Some(6)),
                rolls: DiceRolls::new(3, 4, 2),
            },
            &rules(),
            later(&record, 2),
        )
        .unwrap();
        let Some(Effect::RecordMove(mv)) = dribble.effects.first() else {
            panic!("expected a recorded move");
        };
        let duel = mv.resolution.as_ref().and_then(|r| r.duel).unwrap();
        // 4 + dribble 1 + bonus 1 against 2 + block 1
        assert_eq!((duel.attacker_total, duel.defender_total), (6, 3));
        assert!(mv.verify());

        let record = dribble.record;
        assert_eq!(record.token, 6);
        assert_eq!(record.turn, 2);
        assert_eq!(record.current_turn, Some(Side::B));
        assert!(record.slot(Side::A).unwrap().active_bonus.is_none());
    }

    fn act(record: &MatchRecord, player: PlayerId, action: ActionRequest, rolls: DiceRolls) -> Transition {
        transition(
            record,
            MatchEvent::Act {
                player,
                action,
                rolls,
            },
            &rules(),
            later(record, 2),
        )
        .unwrap()
    }

    #[test]
    fn goal_scores_and_hands_kick_off_to_the_conceding_side() {
        let mut record = kicked_off();
        // Striker pushed up within range of B's goal.
        record.board.insert(8, Occupant::new(Side::A, 2));
        record.token = 8;

        let next = act(
            &record,
            1,
            ActionRequest::new(ActionKind::Shot, 8, None),
            DiceRolls::new(6, 1, 1),
        )
        .record;
        assert_eq!(next.scores, [1, 0]);
        assert_eq!(next.token, Side::B.kick_off_cell());
        assert_eq!(next.turn, 2);
        assert_eq!(next.current_turn, Some(Side::B));
    }

    #[test]
    fn failed_pass_goes_to_the_interceptor() {
        let mut record = kicked_off();
        record.board.insert(3, Occupant::new(Side::B, 7));

        let result = act(
            &record,
            1,
            ActionRequest::new(ActionKind::Pass, 5, Some(2)),
            DiceRolls::new(1, 6, 1),
        );
        let Some(Effect::RecordMove(mv)) = result.effects.first() else {
            panic!("expected a recorded move");
        };
        assert!(mv.resolution.as_ref().is_some_and(|r| !r.success));
        assert_eq!(result.record.token, 3);
        assert_eq!(result.record.current_turn, Some(Side::B));
    }

    #[test]
    fn defender_rolling_one_in_a_dribble_is_expelled() {
        let record = kicked_off();
        // 4 + dribble 1 against 1 + block 1.
        let next = act(
            &record,
            1,
            ActionRequest::new(ActionKind::Dribble, 5, Some(6)),
            DiceRolls::new(3, 4, 1),
        )
        .record;
        assert_eq!(next.token, 6);

        let occupant = next.board.occupant(6).unwrap();
        assert_eq!(occupant.owner, Side::B);
        let until = record.turn + rules().config.expulsion_turns + 1;
        assert_eq!(occupant.expelled_until_turn, Some(until));
        assert!(next.active_card(6, Side::B).is_none());

        let err = transition(
            &next,
            MatchEvent::Act {
                player: 2,
                action: ActionRequest::new(ActionKind::Dribble, 6, None),
                rolls: DiceRolls::new(3, 3, 3),
            },
            &rules(),
            later(&next, 2),
        )
        .unwrap_err();
        assert_eq!(err, MatchError::EmptyActorCell);
    }

    #[test]
    fn trailing_side_gets_the_half_time_boost() {
        let mut record = kicked_off();
        record.turn = rules().config.half_time_turn;
        record.scores = [0, 1];

        let next = act(
            &record,
            1,
            ActionRequest::new(ActionKind::Dribble, 5, Some(6)),
            DiceRolls::new(1, 1, 1),
        )
        .record;
        assert_eq!(next.phase.name(), "half_time");
        assert!(next.board.is_empty());

        let boost = crate::game::policy::HALF_TIME_BOOST_ID;
        assert!(next.slot(Side::A).unwrap().bonus_card(boost).is_some());
        assert!(next.slot(Side::B).unwrap().bonus_card(boost).is_none());
    }

    #[test]
    fn turn_timeout_synthesizes_fallback() {
        let record = kicked_off();
        let before = record.turn;
        let result = transition(
            &record,
            MatchEvent::Timeout {
                rolls: DiceRolls::new(1, 1, 1),
            },
            &rules(),
            later(&record, 45),
        )
        .unwrap();
        let next = result.record;
        assert_eq!(next.turn, before + 1);
        assert_eq!(next.current_turn, Some(Side::B));
        assert_eq!(next.slot(Side::A).unwrap().reliability_penalties, 1);
        let auto_move = result.effects.iter().find_map(|e| match e {
            Effect::RecordMove(mv) => Some(mv),
            _ => None,
        });
        assert!(auto_move.is_some_and(|mv| mv.auto));
    }

    #[test]
    fn forfeit_completes_and_freezes_the_match() {
        let record = kicked_off();
        let result = transition(
            &record,
            MatchEvent::Forfeit { player: 1 },
            &rules(),
            later(&record, 5),
        )
        .unwrap();
        let Phase::Completed(completed) = &result.record.phase else {
            panic!("expected completed");
        };
        assert_eq!(completed.winner, Some(Side::B));

        let summaries: Vec<_> = result
            .effects
            .iter()
            .filter_map(|e| match e {
                Effect::ApplyResult(summary) => Some(summary),
                _ => None,
            })
            .collect();
        assert_eq!(summaries.len(), 1);
        let change = summaries[0].rating.unwrap();
        assert!(change.deltas()[0] < 0);
        assert_eq!(change.deltas()[0], -change.deltas()[1]);

        let err = transition(
            &result.record,
            MatchEvent::Forfeit { player: 2 },
            &rules(),
            later(&record, 6),
        )
        .unwrap_err();
        assert!(matches!(err, MatchError::MatchCompleted(_)));
    }

    #[test]
    fn abandoned_waiting_match_has_no_rating_effect() {
        let record = waiting();
        let result = transition(&record, MatchEvent::Abandon, &rules(), later(&record, 301)).unwrap();
        let summary = result.effects.iter().find_map(|e| match e {
            Effect::ApplyResult(summary) => Some(summary.clone()),
            _ => None,
        });
        assert!(summary.is_some_and(|s| s.rating.is_none() && s.winner.is_none()));
    }

    #[test]
    fn remaining_time_counts_from_turn_start() {
        let record = kicked_off();
        let started = record.turn_started_at.unwrap();
        let rules = rules();
        assert_eq!(
            record.remaining_turn_time(started + TimeDelta::seconds(30), &rules),
            Some(TimeDelta::seconds(15))
        );
        assert_eq!(
            record.remaining_turn_time(started + TimeDelta::seconds(90), &rules),
            Some(TimeDelta::zero())
        );
        assert_eq!(locked().remaining_turn_time(started, &rules), None);
    }
}
