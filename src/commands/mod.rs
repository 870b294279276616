mod ask;
mod config;
mod manage;
mod quick;

use tracing::error;

use crate::llm::LlmError;
use crate::state::Context;

/// Discord rejects messages longer than 2000 characters.
const MAX_MESSAGE_LEN: usize = 1990;

/// Factures - assistant for invoice and order questions
#[poise::command(
    slash_command,
    subcommands(
        "ask::ask",
        "quick::quick",
        "manage::details",
        "manage::history",
        "manage::clear",
        "config::config"
    )
)]
pub async fn factures(_ctx: Context<'_>) -> Result<(), anyhow::Error> {
    Ok(())
}

/// Split text into Discord-safe pieces, preferring line then word breaks.
fn split_chunks(text: &str, max: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        if remaining.len() <= max {
            chunks.push(remaining);
            break;
        }
        let mut limit = max;
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }
        if limit == 0 {
            limit = remaining.chars().next().map_or(remaining.len(), char::len_utf8);
        }
        let window = &remaining[..limit];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .map(|i| i + 1)
            .unwrap_or(limit);
        chunks.push(&remaining[..split_at]);
        remaining = &remaining[split_at..];
    }
    chunks
}

/// Send a message in Discord-safe chunks.
/// Uses ctx.say() for all chunks — poise routes follow-ups through the
/// interaction webhook, which doesn't require Send Messages channel permission.
async fn send_chunked(ctx: &Context<'_>, text: &str) -> Result<(), anyhow::Error> {
    for chunk in split_chunks(text, MAX_MESSAGE_LEN) {
        ctx.say(chunk).await?;
    }
    Ok(())
}

/// Cut text to at most `max` characters, marking the cut.
fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

/// Tell the user the generation service failed. There is no fallback answer.
async fn report_llm_error(ctx: &Context<'_>, err: LlmError) -> Result<(), anyhow::Error> {
    error!(error = %err, user = %ctx.author().name, "generation failed");
    ctx.say(format!(
        "Le service de génération est indisponible ({}). Veuillez réessayer plus tard.",
        err
    ))
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_short_text() {
        assert_eq!(split_chunks("Payée.", 10), vec!["Payée."]);
        assert!(split_chunks("", 10).is_empty());
    }

    #[test]
    fn test_split_prefers_line_breaks() {
        let text = "ligne une\nligne deux\nfin";
        let chunks = split_chunks(text, 15);
        assert_eq!(chunks, vec!["ligne une\n", "ligne deux\nfin"]);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_split_respects_char_boundaries() {
        // "é" is two bytes; a byte limit landing inside it must back off.
        let text = "ééééééééé";
        let chunks = split_chunks(text, 5);
        assert!(chunks.iter().all(|c| c.len() <= 5));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("Échéance", 20), "Échéance");
        assert_eq!(truncate_chars("Échéance", 4), "Éch…");
    }
}
