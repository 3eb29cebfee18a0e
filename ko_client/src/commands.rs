use kickoff::{
    entities::{ActionKind, ActionRequest},
    game::entities::{CardId, Cell},
    realtime::ClientCommand,
};
use serde_json::json;

/// Errors that can occur during command parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// A cell or card argument is not a number.
    #[error("Invalid {what} '{value}'. Must be a positive number")]
    InvalidNumber { what: &'static str, value: String },
    /// Required argument missing.
    #[error("Usage: {0}")]
    MissingArgument(&'static str),
    /// Unrecognized command.
    #[error("Unrecognized command '{0}'. Type 'help' to see available commands")]
    UnrecognizedCommand(String),
}

pub const HELP: &str = "\
Placement:  place <card> <cell>, confirm
Actions:    pass <from> <to> [bonus], shot <from> [bonus], dribble <from> <to> [bonus]
            sub <cell> <card>, bonus <card>
Other:      state, say <text>, forfeit, help, quit";

/// Parse a command string into a ClientCommand.
///
/// # Arguments
///
/// * `input` - The raw command string from user input
///
/// # Returns
///
/// * `Ok(ClientCommand)` - Successfully parsed command
/// * `Err(ParseError)` - Parse error with descriptive message
///
/// # Examples
///
/// ```
/// use ko_client::commands::parse_command;
/// use kickoff::realtime::ClientCommand;
///
/// assert!(matches!(parse_command("confirm"), Ok(ClientCommand::ConfirmPlacement)));
/// assert!(matches!(
///     parse_command("place 1 5"),
///     Ok(ClientCommand::PlaceCard { card_id: 1, cell: 5 })
/// ));
/// ```
pub fn parse_command(input: &str) -> Result<ClientCommand, ParseError> {
    let trimmed = input.trim();

    // Try single-word commands first
    match trimmed {
        "confirm" => return Ok(ClientCommand::ConfirmPlacement),
        "forfeit" => return Ok(ClientCommand::Forfeit),
        "state" | "sync" => return Ok(ClientCommand::RequestState),
        _ => {}
    }

    let parts: Vec<&str> = trimmed.split_ascii_whitespace().collect();
    match parts.first() {
        Some(&"place") => Ok(ClientCommand::PlaceCard {
            card_id: card(&parts, 1, "place <card> <cell>")?,
            cell: cell(&parts, 2, "place <card> <cell>")?,
        }),
        Some(&"pass") => parse_action(ActionKind::Pass, &parts, "pass <from> <to> [bonus]"),
        Some(&"dribble") => {
            parse_action(ActionKind::Dribble, &parts, "dribble <from> <to> [bonus]")
        }
        Some(&"shot" | &"shoot") => parse_shot(&parts),
        Some(&"sub") => {
            let usage = "sub <cell> <card>";
            let action = ActionRequest::new(ActionKind::Substitute, cell(&parts, 1, usage)?, None)
                .with_card(card(&parts, 2, usage)?);
            Ok(ClientCommand::MakeMove { action })
        }
        Some(&"bonus") => Ok(ClientCommand::PlayBonusCard {
            card_ref: card(&parts, 1, "bonus <card>")?,
        }),
        Some(&"say") => {
            let text = trimmed
                .strip_prefix("say")
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .ok_or(ParseError::MissingArgument("say <text>"))?;
            Ok(ClientCommand::Broadcast {
                payload: json!({ "text": text }),
            })
        }
        _ => Err(ParseError::UnrecognizedCommand(trimmed.to_string())),
    }
}

/// Parse "<kind> <from> <to> [bonus]"
fn parse_action(kind: ActionKind, parts: &[&str], usage: &'static str) -> Result<ClientCommand, ParseError> {
    let action = ActionRequest::new(kind, cell(parts, 1, usage)?, Some(cell(parts, 2, usage)?));
    with_optional_bonus(action, parts, 3)
}

/// Parse "shot <from> [bonus]"; the target is always the opposing goal.
fn parse_shot(parts: &[&str]) -> Result<ClientCommand, ParseError> {
    let action = ActionRequest::new(ActionKind::Shot, cell(parts, 1, "shot <from> [bonus]")?, None);
    with_optional_bonus(action, parts, 2)
}

fn with_optional_bonus(
    action: ActionRequest,
    parts: &[&str],
    index: usize,
) -> Result<ClientCommand, ParseError> {
    let action = match parts.get(index) {
        Some(value) => action.with_card(number(value, "bonus card")?),
        None => action,
    };
    Ok(ClientCommand::MakeMove { action })
}

fn cell(parts: &[&str], index: usize, usage: &'static str) -> Result<Cell, ParseError> {
    let value = parts.get(index).ok_or(ParseError::MissingArgument(usage))?;
    number(value, "cell")
}

fn card(parts: &[&str], index: usize, usage: &'static str) -> Result<CardId, ParseError> {
    let value = parts.get(index).ok_or(ParseError::MissingArgument(usage))?;
    number(value, "card")
}

fn number<T: std::str::FromStr>(value: &str, what: &'static str) -> Result<T, ParseError> {
    value.parse().map_err(|_| ParseError::InvalidNumber {
        what,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // === Single-word command tests ===

    #[test]
    fn test_parse_confirm() {
        assert!(matches!(
            parse_command("confirm"),
            Ok(ClientCommand::ConfirmPlacement)
        ));
    }

    #[test]
    fn test_parse_forfeit() {
        assert!(matches!(parse_command("forfeit"), Ok(ClientCommand::Forfeit)));
    }

    #[test]
    fn test_parse_state_aliases() {
        assert!(matches!(parse_command("state"), Ok(ClientCommand::RequestState)));
        assert!(matches!(parse_command(" sync "), Ok(ClientCommand::RequestState)));
    }

    // === Placement ===

    #[test]
    fn test_parse_place() {
        assert_eq!(
            parse_command("place 8 6"),
            Ok(ClientCommand::PlaceCard { card_id: 8, cell: 6 })
        );
    }

    #[test]
    fn test_parse_place_missing_cell() {
        assert_eq!(
            parse_command("place 8"),
            Err(ParseError::MissingArgument("place <card> <cell>"))
        );
    }

    #[test]
    fn test_parse_place_cell_out_of_range_for_u8() {
        assert!(matches!(
            parse_command("place 1 300"),
            Err(ParseError::InvalidNumber { what: "cell", .. })
        ));
    }

    // === Actions ===

    #[test]
    fn test_parse_pass() {
        assert_eq!(
            parse_command("pass 5 7"),
            Ok(ClientCommand::MakeMove {
                action: ActionRequest::new(ActionKind::Pass, 5, Some(7)),
            })
        );
    }

    #[test]
    fn test_parse_dribble_with_bonus() {
        assert_eq!(
            parse_command("dribble 6 7 101"),
            Ok(ClientCommand::MakeMove {
                action: ActionRequest::new(ActionKind::Dribble, 6, Some(7)).with_card(101),
            })
        );
    }

    #[test]
    fn test_parse_shot_has_no_target() {
        assert_eq!(
            parse_command("shoot 9 102"),
            Ok(ClientCommand::MakeMove {
                action: ActionRequest::new(ActionKind::Shot, 9, None).with_card(102),
            })
        );
    }

    #[test]
    fn test_parse_substitute() {
        let parsed = parse_command("sub 3 7").unwrap();
        let ClientCommand::MakeMove { action } = parsed else {
            panic!("expected make_move");
        };
        assert_eq!(action.kind, ActionKind::Substitute);
        assert_eq!(action.actor_cell, 3);
        assert_eq!(action.card_ref, Some(7));
    }

    #[test]
    fn test_parse_bonus() {
        assert_eq!(
            parse_command("bonus 101"),
            Ok(ClientCommand::PlayBonusCard { card_ref: 101 })
        );
    }

    #[test]
    fn test_parse_invalid_bonus() {
        assert!(matches!(
            parse_command("pass 5 7 abc"),
            Err(ParseError::InvalidNumber { what: "bonus card", .. })
        ));
    }

    // === Broadcast ===

    #[test]
    fn test_parse_say_keeps_spacing() {
        let parsed = parse_command("say  good  game").unwrap();
        assert_eq!(
            parsed,
            ClientCommand::Broadcast {
                payload: json!({"text": "good  game"}),
            }
        );
    }

    #[test]
    fn test_parse_say_without_text() {
        assert_eq!(
            parse_command("say"),
            Err(ParseError::MissingArgument("say <text>"))
        );
    }

    // === Error cases ===

    #[test]
    fn test_parse_unrecognized_command() {
        assert!(matches!(
            parse_command("bicycle 5"),
            Err(ParseError::UnrecognizedCommand(_))
        ));
    }

    #[test]
    fn test_parse_empty_string() {
        assert!(matches!(
            parse_command("   "),
            Err(ParseError::UnrecognizedCommand(_))
        ));
    }

    #[test]
    fn test_error_message_invalid_number() {
        let error = ParseError::InvalidNumber {
            what: "cell",
            value: "x".to_string(),
        };
        let msg = error.to_string();
        assert!(msg.contains("Invalid cell"));
        assert!(msg.contains("'x'"));
    }
}
