//! Status command.

use console::style;
use serde::Serialize;

use super::super::helpers::open_state;
use crate::config::{Config, Settings};
use crate::storage::ImageLibrary;

#[derive(Serialize)]
struct CategoryStatus {
    category: String,
    images: u64,
    processed_urls: usize,
    degenerate_streak: u32,
}

#[derive(Serialize)]
struct StatusReport {
    data_dir: String,
    multiplier: f64,
    sampler_updates: u64,
    processed_urls: usize,
    categories: Vec<CategoryStatus>,
}

/// Show per-category counts and sampler state.
pub async fn cmd_status(settings: &Settings, config: &Config, json: bool) -> anyhow::Result<()> {
    let categories = config.categories()?;
    let (dedup, sampler) = open_state(settings, config).await?;
    let library = ImageLibrary::new(&settings.images_dir);
    let state = sampler.snapshot().await;
    let url_counts = dedup.category_counts().await;

    let mut rows = Vec::new();
    for category in categories.iter() {
        let name = category.name();
        rows.push(CategoryStatus {
            category: name.to_string(),
            images: library.count(name)?,
            processed_urls: url_counts.get(name).copied().unwrap_or(0),
            degenerate_streak: state.degenerate_streaks.get(name).copied().unwrap_or(0),
        });
    }

    let report = StatusReport {
        data_dir: settings.data_dir.display().to_string(),
        multiplier: state.multiplier,
        sampler_updates: state.updates,
        processed_urls: dedup.len().await,
        categories: rows,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("\n{}", style("Jam Hot Collector Status").bold());
    println!("{}", "-".repeat(48));
    println!("{:<20} {}", "Data Directory:", report.data_dir);
    println!("{:<20} {:.3}", "Multiplier:", report.multiplier);
    println!("{:<20} {}", "Sampler Updates:", report.sampler_updates);
    println!("{:<20} {}", "Processed URLs:", report.processed_urls);
    if let Some(updated_at) = state.updated_at {
        println!("{:<20} {}", "Last Update:", updated_at.format("%Y-%m-%d %H:%M UTC"));
    }

    println!("\n{:<18} {:>8} {:>10}", style("Category").bold(), "Images", "Processed");
    for row in &report.categories {
        let name = if row.degenerate_streak > 0 {
            format!("{} {}", row.category, style(format!("(!{})", row.degenerate_streak)).yellow())
        } else {
            row.category.clone()
        };
        println!("{:<18} {:>8} {:>10}", name, row.images, row.processed_urls);
    }

    Ok(())
}
