use crate::rules::RuleSet;

/// Outcome of matching one inbound message against the rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// No qualifying rule; ordinary chat traffic, not an error.
    NoMatch,
    /// A rule matched but nothing follows the command token.
    MissingPayload { command: String },
    /// A rule matched; forward `payload` to `target_chat_id`.
    Matched {
        command: String,
        target_chat_id: i64,
        payload: String,
    },
}

/// Match `(chat_id, text)` against the rule set. Pure function, no side
/// effects.
///
/// The first whitespace-delimited token is the routing key, compared
/// case-insensitively. A rule qualifies only when the originating chat is in
/// its source set and a target is configured; inert rules never match.
/// Commands are unique, normalized keys, so a direct lookup finds the single
/// possible candidate. The returned `command` is the canonical stored key,
/// not the token as the sender typed it.
pub fn match_message(rules: &RuleSet, chat_id: i64, text: &str) -> MatchOutcome {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return MatchOutcome::NoMatch;
    }

    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let token = match parts.next() {
        Some(token) => token.to_lowercase(),
        None => return MatchOutcome::NoMatch,
    };
    let payload = parts.next().unwrap_or("").trim_start();

    let Some((command, rule)) = rules.get_key_value(&token) else {
        return MatchOutcome::NoMatch;
    };
    if rule.is_inert() || !rule.source_chat_ids.contains(&chat_id) {
        return MatchOutcome::NoMatch;
    }
    let Some(target_chat_id) = rule.target_chat_id else {
        return MatchOutcome::NoMatch;
    };

    if payload.is_empty() {
        MatchOutcome::MissingPayload {
            command: command.clone(),
        }
    } else {
        MatchOutcome::Matched {
            command: command.clone(),
            target_chat_id,
            payload: payload.to_string(),
        }
    }
}
