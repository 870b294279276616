use tracing::{info, warn};

use super::ask::NO_ANSWER;
use super::{report_llm_error, send_chunked};
use crate::assistant::single_shot;
use crate::history::types::TurnRecord;
use crate::state::Context;

/// One-off question, answered without conversation memory
#[poise::command(slash_command, guild_only)]
pub async fn quick(
    ctx: Context<'_>,
    #[description = "Votre question"] question: String,
) -> Result<(), anyhow::Error> {
    ctx.defer().await?;

    let params = *ctx.data().params.read().await;
    info!(user = %ctx.author().name, question, "single-shot question");

    let data = ctx.data();
    let outcome = match single_shot(&data.dataset, data.llm.as_ref(), &question, &params).await {
        Ok(outcome) => outcome,
        Err(e) => return report_llm_error(&ctx, e).await,
    };

    let record = TurnRecord::new(
        ctx.author().id.get(),
        &question,
        &outcome.answer,
        Some(outcome.details),
        true,
    );
    if let Err(e) = data.history.append(&record).await {
        warn!("Failed to archive turn: {}", e);
    }

    if outcome.answer.trim().is_empty() {
        ctx.say(NO_ANSWER).await?;
        return Ok(());
    }
    send_chunked(&ctx, &outcome.answer).await
}
