use std::ops::RangeInclusive;

use tracing::info;

use crate::llm::GenerationParams;
use crate::state::Context;

const TEMPERATURE_RANGE: RangeInclusive<f32> = 0.0..=2.0;
const MAX_TOKENS_RANGE: RangeInclusive<u32> = 1..=8192;

/// Configure generation parameters (admin only)
#[poise::command(slash_command, guild_only)]
pub async fn config(
    ctx: Context<'_>,
    #[description = "temperature | max_tokens"] param: Option<String>,
    #[description = "Nouvelle valeur"] value: Option<String>,
) -> Result<(), anyhow::Error> {
    let user_id = ctx.author().id.get();
    if !ctx.data().is_admin(user_id) {
        ctx.say("Cette commande est réservée aux administrateurs.").await?;
        return Ok(());
    }

    match (param.as_deref(), value.as_deref().map(str::trim)) {
        // Show current config
        (None, _) => {
            let params = *ctx.data().params.read().await;
            ctx.say(format!(
                "**Paramètres de génération:**\n\
                 `temperature`: {}\n\
                 `max_tokens`: {}\n\
                 `modèle`: {}",
                params.temperature,
                params.max_tokens,
                ctx.data().llm.model()
            ))
            .await?;
        }
        // Set a parameter
        (Some(key), Some(raw)) => {
            let reply = {
                let mut params = ctx.data().params.write().await;
                match apply_param(&mut params, key, raw) {
                    Ok(reply) => {
                        info!(user = %ctx.author().name, param = key, value = raw, "config updated");
                        reply
                    }
                    Err(reply) => reply,
                }
            };
            ctx.say(reply).await?;
        }
        (Some(_), None) => {
            ctx.say("Indiquez `param` et `value`. Exemple: `/factures config temperature 0.2`")
                .await?;
        }
    }

    Ok(())
}

/// Validate and store one parameter. Both outcomes carry the reply to show.
fn apply_param(params: &mut GenerationParams, key: &str, raw: &str) -> Result<String, String> {
    match key {
        "temperature" => match raw.parse::<f32>() {
            Ok(v) if TEMPERATURE_RANGE.contains(&v) => {
                params.temperature = v;
                Ok(format!("`temperature` réglée à {}", v))
            }
            _ => Err(format!(
                "`temperature` doit être un nombre entre {} et {}",
                TEMPERATURE_RANGE.start(),
                TEMPERATURE_RANGE.end()
            )),
        },
        "max_tokens" => match raw.parse::<u32>() {
            Ok(v) if MAX_TOKENS_RANGE.contains(&v) => {
                params.max_tokens = v;
                Ok(format!("`max_tokens` réglé à {}", v))
            }
            _ => Err(format!(
                "`max_tokens` doit être un entier entre {} et {}",
                MAX_TOKENS_RANGE.start(),
                MAX_TOKENS_RANGE.end()
            )),
        },
        _ => Err(format!(
            "Paramètre inconnu `{}`. Valides: `temperature`, `max_tokens`",
            key
        )),
    }
}
