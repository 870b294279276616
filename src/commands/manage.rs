use tracing::info;

use super::{send_chunked, truncate_chars};
use crate::state::Context;

const DEFAULT_HISTORY_LIMIT: usize = 5;
const MAX_HISTORY_LIMIT: usize = 20;
const SECTION_LEN: usize = 1900;
const PREVIEW_LEN: usize = 300;

/// Forget the conversation: drops remembered records and archived turns
#[poise::command(slash_command, guild_only)]
pub async fn clear(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let user_id = ctx.author().id.get();
    let had_session = ctx.data().sessions.reset(user_id).await;
    let removed = ctx.data().history.clear(user_id).await?;
    let active_sessions = ctx.data().sessions.len().await;

    info!(
        user = %ctx.author().name,
        had_session,
        removed,
        active_sessions,
        "conversation cleared"
    );
    ctx.say(format!(
        "Conversation réinitialisée ({} échange(s) archivé(s) supprimé(s)).",
        removed
    ))
    .await?;
    Ok(())
}

/// Show your most recent questions and answers
#[poise::command(slash_command, guild_only)]
pub async fn history(
    ctx: Context<'_>,
    #[description = "Nombre d'échanges (défaut 5, max 20)"] limit: Option<u32>,
) -> Result<(), anyhow::Error> {
    let limit = limit
        .map(|l| (l as usize).clamp(1, MAX_HISTORY_LIMIT))
        .unwrap_or(DEFAULT_HISTORY_LIMIT);
    let turns = ctx.data().history.list(ctx.author().id.get(), limit).await?;

    if turns.is_empty() {
        ctx.say("Aucun échange archivé.").await?;
        return Ok(());
    }

    // Numbered from the most recent, matching `/factures details`.
    let mut out = format!("**Derniers échanges ({}):**\n", turns.len());
    for (i, turn) in turns.iter().rev().enumerate() {
        let when = chrono::DateTime::<chrono::Utc>::from_timestamp(
            turn.timestamp.div_euclid(1_000_000),
            (turn.timestamp.rem_euclid(1_000_000) * 1_000) as u32,
        )
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default();
        let mode = if turn.single_shot { " (quick)" } else { "" };
        out.push_str(&format!(
            "\n**{}.** `{}`{} **Q:** {}\n> {}\n",
            i + 1,
            when,
            mode,
            truncate_chars(&turn.question, PREVIEW_LEN),
            truncate_chars(&turn.answer, PREVIEW_LEN).replace('\n', "\n> ")
        ));
    }
    send_chunked(&ctx, &out).await
}

/// Show the pipeline trace of an archived turn (extraction, facts, prompts)
#[poise::command(slash_command, guild_only)]
pub async fn details(
    ctx: Context<'_>,
    #[description = "Numéro de l'échange dans /factures history (1 = le plus récent)"]
    turn: Option<u32>,
) -> Result<(), anyhow::Error> {
    let turns = ctx
        .data()
        .history
        .list(ctx.author().id.get(), MAX_HISTORY_LIMIT)
        .await?;

    let back = turn.unwrap_or(1) as usize;
    let index = turns.len().checked_sub(back).filter(|_| back > 0);
    let Some(record) = index.and_then(|i| turns.get(i)) else {
        ctx.say("Échange introuvable. Voir `/factures history`.").await?;
        return Ok(());
    };
    let Some(details) = &record.details else {
        ctx.say("Aucun détail n'a été conservé pour cet échange.").await?;
        return Ok(());
    };

    let sections = [
        ("Prompt d'extraction", &details.extract_prompt),
        ("Résultat de l'extraction", &details.ids_result),
        ("Données fournies", &details.combined_info),
        ("Prompt de réponse", &details.answer_prompt),
    ];
    ctx.say(format!(
        "**Détails de l'échange:** {}",
        truncate_chars(&record.question, PREVIEW_LEN)
    ))
    .await?;
    for (title, body) in sections {
        let body = truncate_chars(&body.replace("```", "'''"), SECTION_LEN);
        ctx.say(format!("**{}**\n```\n{}\n```", title, body)).await?;
    }
    Ok(())
}
