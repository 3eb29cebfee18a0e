//! Built-in starter deck, handed to players who queue without a deck of their own.

use super::entities::{BonusCard, BonusScope, Card, CardStats, Rarity, Role};

fn card(id: i64, name: &str, role: Role, rarity: Rarity, cost: u8, stats: CardStats) -> Card {
    Card {
        id,
        name: name.to_string(),
        role,
        rarity,
        cost,
        stats,
    }
}

/// Eight cards costing 28 CP in total, so a line-up of four fits the budget
/// in several ways but never all eight at once.
#[must_use]
pub fn starter_deck() -> Vec<Card> {
    vec![
        card(1, "Playmaker", Role::Midfielder, Rarity::Common, 3, CardStats {
            pass: 2,
            dribble: 1,
            block: 1,
            ..CardStats::default()
        }),
        card(2, "Striker", Role::Forward, Rarity::Rare, 5, CardStats {
            shot: 2,
            dribble: 1,
            ..CardStats::default()
        }),
        card(3, "Winger", Role::Forward, Rarity::Common, 4, CardStats {
            shot: 1,
            pass: 1,
            dribble: 2,
            ..CardStats::default()
        }),
        card(4, "Stopper", Role::Defender, Rarity::Common, 2, CardStats {
            block: 2,
            ..CardStats::default()
        }),
        card(5, "Keeper", Role::Goalkeeper, Rarity::Common, 3, CardStats {
            block: 1,
            save: 2,
            ..CardStats::default()
        }),
        card(6, "Runner", Role::Midfielder, Rarity::Common, 2, CardStats {
            pass: 1,
            dribble: 1,
            ..CardStats::default()
        }),
        card(7, "Sweeper", Role::Defender, Rarity::Limited, 3, CardStats {
            pass: 1,
            block: 1,
            ..CardStats::default()
        }),
        card(8, "Captain", Role::Midfielder, Rarity::Unique, 6, CardStats {
            shot: 1,
            pass: 2,
            dribble: 2,
            block: 1,
            ..CardStats::default()
        }),
    ]
}

#[must_use]
pub fn starter_bonus_cards() -> Vec<BonusCard> {
    vec![
        BonusCard {
            id: 101,
            name: "Second wind".to_string(),
            scope: BonusScope::Any,
            modifier: 1,
        },
        BonusCard {
            id: 102,
            name: "Top corner".to_string(),
            scope: BonusScope::Shot,
            modifier: 2,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::{CP_BUDGET, DECK_SIZE};

    #[test]
    fn starter_deck_is_well_formed() {
        let deck = starter_deck();
        assert_eq!(deck.len(), DECK_SIZE);
        assert!(deck.iter().any(|c| c.role == Role::Midfielder));
        let total: u32 = deck.iter().map(|c| u32::from(c.cost)).sum();
        assert!(total > CP_BUDGET);
        let mut ids: Vec<_> = deck.iter().map(|c| c.id).collect();
        ids.dedup();
        assert_eq!(ids.len(), DECK_SIZE);
    }
}
