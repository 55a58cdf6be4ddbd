//! Reset command.

use console::style;

use super::super::helpers::open_state;
use crate::config::{Config, Settings};

/// Forget a category's processed URLs, or reset the sampler.
pub async fn cmd_reset(
    settings: &Settings,
    config: &Config,
    category: Option<&str>,
    sampler: bool,
    confirm: bool,
) -> anyhow::Result<()> {
    let target = match (category, sampler) {
        (_, true) => "the sampler multiplier".to_string(),
        (Some(name), false) => {
            let categories = config.categories()?;
            match categories.get(name) {
                Some(category) => format!("processed URLs for '{}'", category.name()),
                None => anyhow::bail!("Unknown category '{}'", name),
            }
        }
        (None, false) => anyhow::bail!("Give a category or --sampler"),
    };

    if !confirm {
        println!(
            "{} This will reset {}. Run again with --confirm to proceed.",
            style("!").yellow(),
            target
        );
        return Ok(());
    }

    let (dedup, sampler_state) = open_state(settings, config).await?;

    if sampler {
        sampler_state.reset().await?;
        println!(
            "{} Sampler reset to {:.2}",
            style("✓").green(),
            sampler_state.multiplier().await
        );
        return Ok(());
    }

    if let Some(name) = category {
        let categories = config.categories()?;
        if let Some(category) = categories.get(name) {
            let removed = dedup.reset(category.name()).await?;
            println!(
                "{} Cleared {} processed URLs for {}",
                style("✓").green(),
                removed,
                category
            );
        }
    }

    Ok(())
}
