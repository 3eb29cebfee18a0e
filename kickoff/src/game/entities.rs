//! Cards, board geometry, and player-facing action types.

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, ops::RangeInclusive};

use super::constants::{BOARD_CELLS, MAX_TOTAL};

pub type PlayerId = i64;
pub type MatchId = uuid::Uuid;
pub type CardId = i64;
pub type DeckId = i64;

/// Board cell, `1..=BOARD_CELLS`.
pub type Cell = u8;

#[must_use]
pub fn is_valid_cell(cell: Cell) -> bool {
    (1..=BOARD_CELLS).contains(&cell)
}

/// Which seat of a match a player occupies. Side A attacks toward cell 10,
/// side B toward cell 1.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Side {
    A,
    B,
}

impl Side {
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }

    /// The goal cell this side defends.
    #[must_use]
    pub const fn own_goal(self) -> Cell {
        match self {
            Self::A => 1,
            Self::B => BOARD_CELLS,
        }
    }

    /// The goal cell this side shoots at.
    #[must_use]
    pub const fn target_goal(self) -> Cell {
        self.other().own_goal()
    }

    /// Cell the token is placed on when this side kicks off.
    #[must_use]
    pub const fn kick_off_cell(self) -> Cell {
        match self {
            Self::A => BOARD_CELLS / 2,
            Self::B => BOARD_CELLS / 2 + 1,
        }
    }

    /// One step from `cell` toward the opponent's goal.
    #[must_use]
    pub fn step_forward(self, cell: Cell) -> Option<Cell> {
        let next = match self {
            Self::A => cell.checked_add(1)?,
            Self::B => cell.checked_sub(1)?,
        };
        is_valid_cell(next).then_some(next)
    }

    /// Cells of this side's half, nearest the own goal first.
    #[must_use]
    pub fn half(self) -> Vec<Cell> {
        let half = BOARD_CELLS / 2;
        match self {
            Self::A => (1..=half).collect(),
            Self::B => (half + 1..=BOARD_CELLS).rev().collect(),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
        }
    }
}

/// Groups of adjacent cells sharing a placement capacity.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    GoalA,
    DefenseA,
    Midfield,
    DefenseB,
    GoalB,
}

impl Zone {
    pub const ALL: [Zone; 5] = [
        Zone::GoalA,
        Zone::DefenseA,
        Zone::Midfield,
        Zone::DefenseB,
        Zone::GoalB,
    ];

    #[must_use]
    pub fn of(cell: Cell) -> Option<Self> {
        Self::ALL.into_iter().find(|zone| zone.cells().contains(&cell))
    }

    #[must_use]
    pub const fn cells(self) -> RangeInclusive<Cell> {
        match self {
            Self::GoalA => 1..=1,
            Self::DefenseA => 2..=4,
            Self::Midfield => 5..=6,
            Self::DefenseB => 7..=9,
            Self::GoalB => 10..=10,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Goalkeeper,
    Defender,
    Midfielder,
    Forward,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rarity {
    Common,
    Limited,
    Rare,
    SuperRare,
    Unique,
}

impl Rarity {
    #[must_use]
    pub const fn bonus(self) -> u8 {
        match self {
            Self::Common | Self::Limited => 0,
            Self::Rare | Self::SuperRare => 1,
            Self::Unique => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct CardStats {
    pub shot: u8,
    pub pass: u8,
    pub dribble: u8,
    pub block: u8,
    /// Used instead of `block` when a goalkeeper defends a shot on goal.
    pub save: u8,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Card {
    pub id: CardId,
    pub name: String,
    pub role: Role,
    pub rarity: Rarity,
    /// Cost points spent when the card is placed.
    pub cost: u8,
    pub stats: CardStats,
}

impl Card {
    /// Stat added to an attacker's die for the given action kind.
    #[must_use]
    pub fn attack_stat(&self, kind: ActionKind) -> u8 {
        match kind {
            ActionKind::Shot => self.stats.shot,
            ActionKind::Pass => self.stats.pass,
            ActionKind::Dribble => self.stats.dribble,
            ActionKind::Substitute | ActionKind::PlayBonus => 0,
        }
    }

    /// Stat added to a defender's die. Goalkeepers facing a shot use `save`.
    #[must_use]
    pub fn defense_stat(&self, kind: ActionKind) -> u8 {
        if kind == ActionKind::Shot && self.role == Role::Goalkeeper {
            self.stats.save
        } else {
            self.stats.block
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BonusScope {
    Any,
    Shot,
    Pass,
    Dribble,
}

impl BonusScope {
    #[must_use]
    pub fn applies_to(self, kind: ActionKind) -> bool {
        match self {
            Self::Any => matches!(
                kind,
                ActionKind::Shot | ActionKind::Pass | ActionKind::Dribble
            ),
            Self::Shot => kind == ActionKind::Shot,
            Self::Pass => kind == ActionKind::Pass,
            Self::Dribble => kind == ActionKind::Dribble,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BonusCard {
    pub id: CardId,
    pub name: String,
    pub scope: BonusScope,
    pub modifier: u8,
}

/// Card standing on a board cell.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Occupant {
    pub owner: Side,
    pub card_id: CardId,
    /// Turn from which an expelled card may act again.
    pub expelled_until_turn: Option<u32>,
}

impl Occupant {
    #[must_use]
    pub fn new(owner: Side, card_id: CardId) -> Self {
        Self {
            owner,
            card_id,
            expelled_until_turn: None,
        }
    }

    #[must_use]
    pub fn is_active(&self, turn: u32) -> bool {
        self.expelled_until_turn.is_none_or(|until| turn >= until)
    }
}

/// Occupancy map of the ten cells. At most one occupant per cell.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Board {
    cells: BTreeMap<Cell, Occupant>,
}

impl Board {
    #[must_use]
    pub fn occupant(&self, cell: Cell) -> Option<&Occupant> {
        self.cells.get(&cell)
    }

    /// Occupant at `cell` owned by `side` and not serving an expulsion.
    #[must_use]
    pub fn active_for(&self, cell: Cell, side: Side, turn: u32) -> Option<&Occupant> {
        self.cells
            .get(&cell)
            .filter(|o| o.owner == side && o.is_active(turn))
    }

    #[must_use]
    pub fn zone_count(&self, zone: Zone) -> usize {
        zone.cells()
            .filter(|cell| self.cells.contains_key(cell))
            .count()
    }

    #[must_use]
    pub fn contains_card(&self, side: Side, card_id: CardId) -> bool {
        self.cells
            .values()
            .any(|o| o.owner == side && o.card_id == card_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Cell, &Occupant)> {
        self.cells.iter().map(|(cell, occupant)| (*cell, occupant))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub(crate) fn insert(&mut self, cell: Cell, occupant: Occupant) -> Option<Occupant> {
        self.cells.insert(cell, occupant)
    }

    pub(crate) fn get_mut(&mut self, cell: Cell) -> Option<&mut Occupant> {
        self.cells.get_mut(&cell)
    }

    pub(crate) fn clear(&mut self) {
        self.cells.clear();
    }
}

/// Number of cells between two positions.
#[must_use]
pub fn distance(from: Cell, to: Cell) -> u8 {
    from.abs_diff(to)
}

/// Clamp a duel total to the rules maximum.
#[must_use]
pub fn cap_total(total: u32) -> u8 {
    total.min(u32::from(MAX_TOTAL)) as u8
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    Quick,
    Ranked,
    Friendly,
}

impl MatchMode {
    /// Whether the allocator may retry with the widened rating band.
    #[must_use]
    pub const fn allows_widened_band(self) -> bool {
        matches!(self, Self::Quick)
    }

    #[must_use]
    pub const fn is_rated(self) -> bool {
        matches!(self, Self::Ranked | Self::Quick)
    }
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quick => write!(f, "quick"),
            Self::Ranked => write!(f, "ranked"),
            Self::Friendly => write!(f, "friendly"),
        }
    }
}

impl std::str::FromStr for MatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quick" => Ok(Self::Quick),
            "ranked" => Ok(Self::Ranked),
            "friendly" => Ok(Self::Friendly),
            other => Err(format!("unknown match mode '{other}'")),
        }
    }
}

/// One seat of a match.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PlayerSlot {
    pub player_id: PlayerId,
    pub rating: i32,
    pub deck: Vec<Card>,
    pub bonus_cards: Vec<BonusCard>,
    /// Bonus armed by `play_bonus`, consumed by the next resolved action.
    pub active_bonus: Option<BonusCard>,
    pub placements_this_round: u8,
    pub placed_cost: u32,
    pub substitutes_used: u8,
    /// Deadlines this player let expire.
    pub reliability_penalties: u32,
}

impl PlayerSlot {
    #[must_use]
    pub fn new(player_id: PlayerId, rating: i32, deck: Vec<Card>, bonus_cards: Vec<BonusCard>) -> Self {
        Self {
            player_id,
            rating,
            deck,
            bonus_cards,
            active_bonus: None,
            placements_this_round: 0,
            placed_cost: 0,
            substitutes_used: 0,
            reliability_penalties: 0,
        }
    }

    #[must_use]
    pub fn card(&self, card_id: CardId) -> Option<&Card> {
        self.deck.iter().find(|c| c.id == card_id)
    }

    #[must_use]
    pub fn bonus_card(&self, card_id: CardId) -> Option<&BonusCard> {
        self.bonus_cards.iter().find(|c| c.id == card_id)
    }

    pub(crate) fn reset_round(&mut self) {
        self.placements_this_round = 0;
        self.placed_cost = 0;
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Pass,
    Shot,
    Dribble,
    Substitute,
    PlayBonus,
}

impl ActionKind {
    /// Kinds resolved with dice.
    #[must_use]
    pub const fn is_contested(self) -> bool {
        matches!(self, Self::Pass | Self::Shot | Self::Dribble)
    }

    /// Kinds that hand the turn to the opponent.
    #[must_use]
    pub const fn ends_turn(self) -> bool {
        !matches!(self, Self::PlayBonus)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let repr = match self {
            Self::Pass => "pass",
            Self::Shot => "shot",
            Self::Dribble => "dribble",
            Self::Substitute => "substitute",
            Self::PlayBonus => "play_bonus",
        };
        write!(f, "{repr}")
    }
}

/// A player's intent for their turn.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ActionRequest {
    pub kind: ActionKind,
    pub actor_cell: Cell,
    #[serde(default)]
    pub target_cell: Option<Cell>,
    /// Bonus card for `play_bonus` or a boosted move, incoming card for `substitute`.
    #[serde(default, alias = "bonus_card_ref")]
    pub card_ref: Option<CardId>,
}

impl ActionRequest {
    #[must_use]
    pub fn new(kind: ActionKind, actor_cell: Cell, target_cell: Option<Cell>) -> Self {
        Self {
            kind,
            actor_cell,
            target_cell,
            card_ref: None,
        }
    }

    #[must_use]
    pub fn with_card(mut self, card_ref: CardId) -> Self {
        self.card_ref = Some(card_ref);
        self
    }
}
