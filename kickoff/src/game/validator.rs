//! Pure placement and move validation.
//!
//! Checks run in a fixed order so the same illegal request always reports
//! the same error. Nothing here mutates the match.

use super::{
    entities::{
        ActionKind, ActionRequest, BonusCard, Card, CardId, Cell, PlayerId, Role, Side, Zone,
        distance, is_valid_cell,
    },
    errors::{MatchError, MatchResult},
    policy::RulesConfig,
    state_machine::MatchRecord,
    states::{Phase, PhaseInfo},
};

/// Opponent card contesting an action.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Defender<'a> {
    pub cell: Cell,
    pub card: &'a Card,
}

/// A validated action with every card it touches resolved.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CheckedAction<'a> {
    Contested {
        side: Side,
        kind: ActionKind,
        actor_cell: Cell,
        actor: &'a Card,
        target_cell: Cell,
        defender: Option<Defender<'a>>,
        bonus: Option<&'a BonusCard>,
    },
    Substitute {
        side: Side,
        actor_cell: Cell,
        outgoing: &'a Card,
        incoming: &'a Card,
    },
    PlayBonus {
        side: Side,
        bonus: &'a BonusCard,
    },
}

/// Check a `PlaceCard` request and return the card to be placed.
///
/// # Errors
///
/// The first failing rule, in the order: not your turn, card not in deck,
/// card already placed, cell occupied, zone full, budget exceeded, first
/// card must be a midfielder.
pub fn validate_placement<'a>(
    record: &'a MatchRecord,
    rules: &RulesConfig,
    player: PlayerId,
    card_id: CardId,
    cell: Cell,
) -> MatchResult<&'a Card> {
    let side = record.side_of(player).ok_or(MatchError::NotSeated)?;
    let slot = record.slot(side).ok_or(MatchError::NotSeated)?;

    match &record.phase {
        Phase::Placement(placement) if Side::from(placement.team) == side => {}
        _ => return Err(MatchError::NotYourTurn),
    }
    if slot.placements_this_round >= rules.required_placements {
        return Err(MatchError::NotYourTurn);
    }

    let card = slot.card(card_id).ok_or(MatchError::CardNotInDeck)?;
    if record.board.contains_card(side, card_id) {
        return Err(MatchError::CardAlreadyPlaced);
    }

    if !is_valid_cell(cell) {
        return Err(MatchError::InvalidCell(cell));
    }
    if record.board.occupant(cell).is_some() {
        return Err(MatchError::CellOccupied(cell));
    }
    let zone = Zone::of(cell).ok_or(MatchError::InvalidCell(cell))?;
    if record.board.zone_count(zone) >= rules.zone_capacity {
        return Err(MatchError::ZoneFull(zone));
    }

    let required = u32::from(card.cost);
    let available = rules.cp_budget.saturating_sub(slot.placed_cost);
    if required > available {
        return Err(MatchError::BudgetExceeded {
            required,
            available,
        });
    }

    if slot.placements_this_round == 0 && card.role != Role::Midfielder {
        return Err(MatchError::FirstCardMustBeMidfield);
    }

    Ok(card)
}

/// Check a `MakeMove` or `PlayBonusCard` request.
///
/// # Errors
///
/// The first failing rule, in the order: invalid action for phase, not your
/// turn, empty actor cell, actor out of reach, illegal target, bonus card
/// unavailable, substitute unavailable.
pub fn validate_move<'a>(
    record: &'a MatchRecord,
    rules: &RulesConfig,
    player: PlayerId,
    action: &ActionRequest,
) -> MatchResult<CheckedAction<'a>> {
    let Phase::Active(active) = &record.phase else {
        return Err(MatchError::InvalidActionForPhase(
            record.phase.name().to_string(),
        ));
    };
    let side = record.side_of(player).ok_or(MatchError::NotSeated)?;
    if Side::from(active.owner) != side {
        return Err(MatchError::NotYourTurn);
    }

    match action.kind {
        ActionKind::PlayBonus => validate_bonus(record, side, action.card_ref),
        ActionKind::Substitute => validate_substitute(record, rules, side, action),
        ActionKind::Shot | ActionKind::Pass | ActionKind::Dribble => {
            validate_contested(record, rules, side, action)
        }
    }
}

fn validate_bonus(
    record: &MatchRecord,
    side: Side,
    card_ref: Option<CardId>,
) -> MatchResult<CheckedAction<'_>> {
    let slot = record.slot(side).ok_or(MatchError::NotSeated)?;
    if slot.active_bonus.is_some() {
        return Err(MatchError::BonusCardUnavailable);
    }
    let bonus = card_ref
        .and_then(|id| slot.bonus_card(id))
        .ok_or(MatchError::BonusCardUnavailable)?;
    Ok(CheckedAction::PlayBonus { side, bonus })
}

fn validate_substitute<'a>(
    record: &'a MatchRecord,
    rules: &RulesConfig,
    side: Side,
    action: &ActionRequest,
) -> MatchResult<CheckedAction<'a>> {
    let slot = record.slot(side).ok_or(MatchError::NotSeated)?;
    let outgoing = record
        .active_card(action.actor_cell, side)
        .ok_or(MatchError::EmptyActorCell)?;

    let incoming = action
        .card_ref
        .and_then(|id| slot.card(id))
        .ok_or(MatchError::SubstituteUnavailable)?;
    if record.board.contains_card(side, incoming.id) || slot.substitutes_used >= rules.max_substitutes
    {
        return Err(MatchError::SubstituteUnavailable);
    }
    let cost_after = slot.placed_cost.saturating_sub(u32::from(outgoing.cost)) + u32::from(incoming.cost);
    if cost_after > rules.cp_budget {
        return Err(MatchError::SubstituteUnavailable);
    }

    Ok(CheckedAction::Substitute {
        side,
        actor_cell: action.actor_cell,
        outgoing,
        incoming,
    })
}

fn validate_contested<'a>(
    record: &'a MatchRecord,
    rules: &RulesConfig,
    side: Side,
    action: &ActionRequest,
) -> MatchResult<CheckedAction<'a>> {
    let actor = record
        .active_card(action.actor_cell, side)
        .ok_or(MatchError::EmptyActorCell)?;
    if distance(action.actor_cell, record.token) > 1 {
        return Err(MatchError::ActorOutOfReach);
    }

    let (target_cell, defender_cell) = match action.kind {
        ActionKind::Shot => shot_target(record, rules, side, action.target_cell)?,
        ActionKind::Pass => pass_target(record, rules, side, action)?,
        _ => dribble_target(record, side, action.target_cell)?,
    };
    let defender = defender_cell.and_then(|cell| {
        record
            .active_card(cell, side.other())
            .map(|card| Defender { cell, card })
    });

    let bonus = select_bonus(record, side, action)?;

    Ok(CheckedAction::Contested {
        side,
        kind: action.kind,
        actor_cell: action.actor_cell,
        actor,
        target_cell,
        defender,
        bonus,
    })
}

type Target = (Cell, Option<Cell>);

fn shot_target(
    record: &MatchRecord,
    rules: &RulesConfig,
    side: Side,
    requested: Option<Cell>,
) -> MatchResult<Target> {
    let goal = side.target_goal();
    if requested.is_some_and(|cell| cell != goal) || distance(record.token, goal) > rules.shot_range
    {
        return Err(MatchError::IllegalTarget);
    }
    Ok((goal, Some(goal)))
}

fn pass_target(
    record: &MatchRecord,
    rules: &RulesConfig,
    side: Side,
    action: &ActionRequest,
) -> MatchResult<Target> {
    let target = action.target_cell.ok_or(MatchError::IllegalTarget)?;
    let reach = distance(record.token, target);
    if target == action.actor_cell
        || record.active_card(target, side).is_none()
        || !(1..=rules.pass_range).contains(&reach)
    {
        return Err(MatchError::IllegalTarget);
    }

    // Opponent between ball and receiver, nearest the receiver.
    let (low, high) = (record.token.min(target), record.token.max(target));
    let interceptor = (low + 1..high)
        .filter(|cell| record.active_card(*cell, side.other()).is_some())
        .min_by_key(|cell| distance(*cell, target));
    Ok((target, interceptor))
}

fn dribble_target(record: &MatchRecord, side: Side, requested: Option<Cell>) -> MatchResult<Target> {
    let next = side
        .step_forward(record.token)
        .ok_or(MatchError::IllegalTarget)?;
    if requested.is_some_and(|cell| cell != next) {
        return Err(MatchError::IllegalTarget);
    }
    if record
        .board
        .occupant(next)
        .is_some_and(|occupant| occupant.owner == side)
    {
        return Err(MatchError::IllegalTarget);
    }
    Ok((next, Some(next)))
}

/// Bonus boosting this action: the one named by `card_ref`, else the armed one.
fn select_bonus<'a>(
    record: &'a MatchRecord,
    side: Side,
    action: &ActionRequest,
) -> MatchResult<Option<&'a BonusCard>> {
    let slot = record.slot(side).ok_or(MatchError::NotSeated)?;
    match action.card_ref {
        Some(id) => {
            let bonus = slot
                .active_bonus
                .as_ref()
                .filter(|armed| armed.id == id)
                .or_else(|| slot.bonus_card(id))
                .ok_or(MatchError::BonusCardUnavailable)?;
            if !bonus.scope.applies_to(action.kind) {
                return Err(MatchError::BonusCardUnavailable);
            }
            Ok(Some(bonus))
        }
        None => Ok(slot
            .active_bonus
            .as_ref()
            .filter(|armed| armed.scope.applies_to(action.kind))),
    }
}
