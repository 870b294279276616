use std::time::{Duration, Instant};

use poise::CreateReply;
use tracing::{debug, info, warn};

use super::{report_llm_error, split_chunks, truncate_chars, MAX_MESSAGE_LEN};
use crate::history::types::TurnRecord;
use crate::state::Context;

/// Minimum delay between two edits of the streamed reply (Discord rate limits).
const EDIT_INTERVAL: Duration = Duration::from_millis(1200);

pub(super) const NO_ANSWER: &str = "Aucune réponse n'a été produite.";

/// Ask a question about invoices (the conversation remembers the last records)
#[poise::command(slash_command, guild_only)]
pub async fn ask(
    ctx: Context<'_>,
    #[description = "Votre question"] question: String,
) -> Result<(), anyhow::Error> {
    ctx.defer().await?;

    let user_id = ctx.author().id.get();
    let params = *ctx.data().params.read().await;
    let session = ctx.data().sessions.get_or_create(user_id).await;
    // Held for the whole turn: one turn at a time per conversation.
    let mut assistant = session.lock().await;

    info!(user = %ctx.author().name, question, "turn started");

    let mut pending = match assistant.submit_turn(&question, &params).await {
        Ok(pending) => pending,
        Err(e) => return report_llm_error(&ctx, e).await,
    };
    debug!(facts = %pending.details().combined_info, "answer requested");

    let reply = ctx.say("…").await?;
    let mut last_edit = Instant::now();

    while let Some(chunk) = pending.next_chunk().await {
        if let Err(e) = chunk {
            pending.abort();
            return report_llm_error(&ctx, e).await;
        }
        if last_edit.elapsed() >= EDIT_INTERVAL && !pending.partial().is_empty() {
            let preview = truncate_chars(pending.partial(), MAX_MESSAGE_LEN);
            if let Err(e) = reply.edit(ctx, CreateReply::default().content(preview)).await {
                warn!("Failed to update streamed reply: {}", e);
            }
            last_edit = Instant::now();
        }
    }

    let outcome = match pending.finish().await {
        Ok(outcome) => outcome,
        Err(e) => return report_llm_error(&ctx, e).await,
    };
    info!(
        answer_len = outcome.answer.len(),
        remembered = assistant.context().len(),
        transcript_len = assistant.session().transcript().len(),
        "turn complete"
    );
    drop(assistant);

    let record = TurnRecord::new(
        user_id,
        &question,
        &outcome.answer,
        Some(outcome.details),
        false,
    );
    if let Err(e) = ctx.data().history.append(&record).await {
        warn!("Failed to archive turn: {}", e);
    }

    let answer = if outcome.answer.trim().is_empty() {
        NO_ANSWER
    } else {
        outcome.answer.as_str()
    };

    // The streamed reply becomes the first chunk; overflow goes in follow-ups.
    let mut chunks = split_chunks(answer, MAX_MESSAGE_LEN).into_iter();
    let first = chunks.next().unwrap_or(NO_ANSWER);
    reply
        .edit(ctx, CreateReply::default().content(first))
        .await?;
    for chunk in chunks {
        ctx.say(chunk).await?;
    }

    Ok(())
}
