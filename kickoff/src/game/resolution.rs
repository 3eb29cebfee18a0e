//! Dice-based resolution of contested actions.
//!
//! An initial roll of 1 fails outright and a 6 succeeds critically; anything
//! in between goes to a duel where each side adds its stat, rarity bonus and
//! (for the attacker) any armed bonus card, capped at 6. Ties go to the
//! defender. Every modifier is itemized so a recorded move can be checked
//! against its dice without consulting the card catalog.

use serde::{Deserialize, Serialize};

use super::{
    dice::DiceRolls,
    entities::{ActionKind, BonusCard, Card, CardId, Role, cap_total},
};

pub const AUTO_FAIL_ROLL: u8 = 1;
pub const CRITICAL_ROLL: u8 = 6;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuelSide {
    Attacker,
    Defender,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModifierSource {
    /// Card stat for the action (`shot`, `pass`, `dribble`, `block`, `save`).
    Stat { stat: String, card_id: CardId },
    Rarity { card_id: CardId },
    Bonus { card_id: CardId },
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Modifier {
    pub side: DuelSide,
    pub source: ModifierSource,
    pub value: u8,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Duel {
    pub attacker_roll: u8,
    pub defender_roll: u8,
    pub attacker_total: u8,
    pub defender_total: u8,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Resolution {
    pub initial_roll: u8,
    pub duel: Option<Duel>,
    pub modifiers: Vec<Modifier>,
    pub success: bool,
    pub critical: bool,
}

impl Resolution {
    /// Whether the defender lost a duel after rolling a natural 1.
    #[must_use]
    pub fn defender_fumbled(&self) -> bool {
        self.success && self.duel.is_some_and(|duel| duel.defender_roll == AUTO_FAIL_ROLL)
    }

    /// Recompute totals from the itemized modifiers.
    #[must_use]
    pub fn recomputed_totals(&self) -> Option<(u8, u8)> {
        let duel = self.duel?;
        let sum = |side: DuelSide| -> u32 {
            self.modifiers
                .iter()
                .filter(|m| m.side == side)
                .map(|m| u32::from(m.value))
                .sum()
        };
        Some((
            cap_total(u32::from(duel.attacker_roll) + sum(DuelSide::Attacker)),
            cap_total(u32::from(duel.defender_roll) + sum(DuelSide::Defender)),
        ))
    }
}

/// Everything the engine needs to resolve one contested action.
#[derive(Clone, Copy, Debug)]
pub struct DuelInput<'a> {
    pub kind: ActionKind,
    pub attacker: &'a Card,
    pub defender: Option<&'a Card>,
    pub bonus: Option<&'a BonusCard>,
}

/// Resolve a contested action with the supplied dice.
#[must_use]
pub fn resolve(input: &DuelInput<'_>, rolls: DiceRolls) -> Resolution {
    debug_assert!((1..=6).contains(&rolls.initial));

    if rolls.initial == AUTO_FAIL_ROLL {
        return Resolution {
            initial_roll: rolls.initial,
            duel: None,
            modifiers: Vec::new(),
            success: false,
            critical: false,
        };
    }

    if rolls.initial == CRITICAL_ROLL {
        return Resolution {
            initial_roll: rolls.initial,
            duel: None,
            modifiers: Vec::new(),
            success: true,
            critical: true,
        };
    }

    let modifiers = itemize(input);
    let side_sum = |side: DuelSide| -> u32 {
        modifiers
            .iter()
            .filter(|m| m.side == side)
            .map(|m| u32::from(m.value))
            .sum()
    };

    let attacker_total = cap_total(u32::from(rolls.attacker) + side_sum(DuelSide::Attacker));
    let defender_total = cap_total(u32::from(rolls.defender) + side_sum(DuelSide::Defender));

    Resolution {
        initial_roll: rolls.initial,
        duel: Some(Duel {
            attacker_roll: rolls.attacker,
            defender_roll: rolls.defender,
            attacker_total,
            defender_total,
        }),
        modifiers,
        success: attacker_total > defender_total,
        critical: false,
    }
}

fn itemize(input: &DuelInput<'_>) -> Vec<Modifier> {
    let mut modifiers = Vec::with_capacity(5);
    let attacker = input.attacker;

    modifiers.push(Modifier {
        side: DuelSide::Attacker,
        source: ModifierSource::Stat {
            stat: input.kind.to_string(),
            card_id: attacker.id,
        },
        value: attacker.attack_stat(input.kind),
    });
    push_rarity(&mut modifiers, DuelSide::Attacker, attacker);

    if let Some(bonus) = input.bonus.filter(|b| b.scope.applies_to(input.kind)) {
        modifiers.push(Modifier {
            side: DuelSide::Attacker,
            source: ModifierSource::Bonus { card_id: bonus.id },
            value: bonus.modifier,
        });
    }

    if let Some(defender) = input.defender {
        let stat = if input.kind == ActionKind::Shot
            && defender.role == Role::Goalkeeper
        {
            "save"
        } else {
            "block"
        };
        modifiers.push(Modifier {
            side: DuelSide::Defender,
            source: ModifierSource::Stat {
                stat: stat.to_string(),
                card_id: defender.id,
            },
            value: defender.defense_stat(input.kind),
        });
        push_rarity(&mut modifiers, DuelSide::Defender, defender);
    }

    modifiers
}

fn push_rarity(modifiers: &mut Vec<Modifier>, side: DuelSide, card: &Card) {
    let value = card.rarity.bonus();
    if value > 0 {
        modifiers.push(Modifier {
            side,
            source: ModifierSource::Rarity { card_id: card.id },
            value,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entities::{BonusScope, CardStats, Rarity, Role};

    fn card(id: CardId, role: Role, rarity: Rarity, stats: CardStats) -> Card {
        Card {
            id,
            name: format!("card-{id}"),
            role,
            rarity,
            cost: 4,
            stats,
        }
    }

    fn striker() -> Card {
        card(
            1,
            Role::Forward,
            Rarity::Rare,
            CardStats {
                shot: 2,
                pass: 1,
                dribble: 1,
                block: 0,
                save: 0,
            },
        )
    }

    fn keeper() -> Card {
        card(
            2,
            Role::Goalkeeper,
            Rarity::Common,
            CardStats {
                shot: 0,
                pass: 0,
                dribble: 0,
                block: 0,
                save: 2,
            },
        )
    }

    #[test]
    fn roll_of_one_fails_without_duel() {
        let attacker = striker();
        let input = DuelInput {
            kind: ActionKind::Shot,
            attacker: &attacker,
            defender: None,
            bonus: None,
        };
        let resolution = resolve(&input, DiceRolls::new(1, 6, 1));
        assert!(!resolution.success);
        assert!(!resolution.critical);
        assert!(resolution.duel.is_none());
    }

    #[test]
    fn roll_of_six_is_critical_success() {
        let attacker = striker();
        let defender = keeper();
        let input = DuelInput {
            kind: ActionKind::Shot,
            attacker: &attacker,
            defender: Some(&defender),
            bonus: None,
        };
        let resolution = resolve(&input, DiceRolls::new(6, 1, 6));
        assert!(resolution.success);
        assert!(resolution.critical);
        assert!(resolution.duel.is_none());
    }

    #[test]
    fn duel_attacker_wins_with_stats() {
        // initial 3, attacker die 4, defender die 2: 4 + 2 shot + 1 rare = 6 (capped) vs 2 + 2 save
        let attacker = striker();
        let defender = keeper();
        let input = DuelInput {
            kind: ActionKind::Shot,
            attacker: &attacker,
            defender: Some(&defender),
            bonus: None,
        };
        let resolution = resolve(&input, DiceRolls::new(3, 4, 2));
        let duel = resolution.duel.unwrap();
        assert_eq!(duel.attacker_total, 6);
        assert_eq!(duel.defender_total, 4);
        assert!(resolution.success);
        assert!(!resolution.critical);
    }

    #[test]
    fn ties_favor_the_defender() {
        let attacker = card(3, Role::Midfielder, Rarity::Common, CardStats::default());
        let defender = card(4, Role::Defender, Rarity::Common, CardStats::default());
        let input = DuelInput {
            kind: ActionKind::Pass,
            attacker: &attacker,
            defender: Some(&defender),
            bonus: None,
        };
        let resolution = resolve(&input, DiceRolls::new(4, 3, 3));
        assert!(!resolution.success);
    }

    #[test]
    fn goalkeeper_uses_block_outside_shots() {
        let attacker = card(5, Role::Forward, Rarity::Common, CardStats::default());
        let defender = keeper();
        let input = DuelInput {
            kind: ActionKind::Dribble,
            attacker: &attacker,
            defender: Some(&defender),
            bonus: None,
        };
        let resolution = resolve(&input, DiceRolls::new(2, 3, 3));
        assert_eq!(resolution.duel.unwrap().defender_total, 3);
    }

    #[test]
    fn bonus_is_itemized_only_when_in_scope() {
        let attacker = card(6, Role::Midfielder, Rarity::Unique, CardStats::default());
        let bonus = BonusCard {
            id: 90,
            name: "Through ball".to_string(),
            scope: BonusScope::Pass,
            modifier: 1,
        };
        let pass = DuelInput {
            kind: ActionKind::Pass,
            attacker: &attacker,
            defender: None,
            bonus: Some(&bonus),
        };
        let resolution = resolve(&pass, DiceRolls::new(2, 1, 5));
        assert!(
            resolution
                .modifiers
                .iter()
                .any(|m| m.source == ModifierSource::Bonus { card_id: 90 })
        );
        // 1 + 2 unique + 1 bonus = 4 against a lone die of 5
        assert_eq!(resolution.duel.unwrap().attacker_total, 4);
        assert!(!resolution.success);

        let dribble = DuelInput {
            kind: ActionKind::Dribble,
            ..pass
        };
        let resolution = resolve(&dribble, DiceRolls::new(2, 1, 5));
        assert!(
            !resolution
                .modifiers
                .iter()
                .any(|m| matches!(m.source, ModifierSource::Bonus { .. }))
        );
    }

    #[test]
    fn itemized_modifiers_reproduce_totals() {
        let attacker = striker();
        let defender = keeper();
        let input = DuelInput {
            kind: ActionKind::Shot,
            attacker: &attacker,
            defender: Some(&defender),
            bonus: None,
        };
        for a in 1..=6 {
            for d in 1..=6 {
                let resolution = resolve(&input, DiceRolls::new(3, a, d));
                let duel = resolution.duel.unwrap();
                assert_eq!(
                    resolution.recomputed_totals(),
                    Some((duel.attacker_total, duel.defender_total))
                );
            }
        }
    }
}
