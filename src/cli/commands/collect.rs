//! Collect command.

use std::sync::Arc;

use console::style;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;

use super::super::helpers::{build_adapters, build_filter, open_state};
use crate::collector::{Collector, CollectorError, CollectorEvent, RoundOutcome, RoundReport};
use crate::config::{Config, Settings};
use crate::storage::ImageLibrary;

pub struct CollectArgs {
    pub categories: Vec<String>,
    pub all: bool,
    pub target: usize,
    pub sources: Vec<String>,
    pub parallel: usize,
    pub progress: bool,
    pub json: bool,
}

/// Run one round per requested category.
pub async fn cmd_collect(settings: &Settings, config: &Config, args: CollectArgs) -> anyhow::Result<()> {
    let categories = config.categories()?;

    let names: Vec<String> = if args.all {
        categories.names().into_iter().map(String::from).collect()
    } else if args.categories.is_empty() {
        anyhow::bail!("No categories given. Pass category names or use --all");
    } else {
        let mut names = Vec::new();
        for name in &args.categories {
            match categories.get(name) {
                Some(category) => names.push(category.name().to_string()),
                None => anyhow::bail!(
                    "Unknown category '{}'. Run 'jamhot-collect categories' to list them",
                    name
                ),
            }
        }
        names
    };

    let sources = if args.sources.is_empty() {
        settings.default_sources.clone()
    } else {
        args.sources.clone()
    };

    settings.ensure_directories()?;
    let (dedup, sampler) = open_state(settings, config).await?;
    let filter = build_filter(config, &categories)?;
    let adapters = build_adapters(settings, config, &sources, Arc::new(dedup.clone()))?;

    let mut collector = Collector::new(
        categories,
        dedup,
        sampler.clone(),
        filter,
        ImageLibrary::new(&settings.images_dir),
    )
    .with_flush_every(settings.flush_every);

    if !args.json {
        println!(
            "{} Collecting {} images for {} categories from {} (multiplier {:.2})",
            style("→").cyan(),
            args.target,
            names.len(),
            sources.join(", "),
            sampler.multiplier().await
        );
    }

    // Progress display runs off collector events
    let progress_task = if args.progress && !args.json {
        let (event_tx, mut event_rx) = mpsc::channel::<CollectorEvent>(64);
        collector = collector.with_events(event_tx);

        let pb = ProgressBar::new((args.target * names.len()) as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        Some(tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                match event {
                    CollectorEvent::Accepted { category, counter, .. } => {
                        pb.inc(1);
                        pb.set_message(format!("{} #{}", category, counter));
                    }
                    CollectorEvent::SourceAborted { category, source, error } => {
                        pb.println(format!(
                            "  {} {} {}: {}",
                            style("!").yellow(),
                            category,
                            source,
                            error
                        ));
                    }
                    CollectorEvent::Finished { category, accepted, target } if accepted < target => {
                        // Shortfall will never be collected this run
                        pb.inc((target - accepted) as u64);
                        pb.println(format!(
                            "  {} {} exhausted at {}/{}",
                            style("!").yellow(),
                            category,
                            accepted,
                            target
                        ));
                    }
                    _ => {}
                }
            }
            pb.finish_and_clear();
        }))
    } else {
        None
    };

    let target = args.target;
    let results: Vec<(String, Result<RoundReport, CollectorError>)> = stream::iter(names)
        .map(|name| {
            let collector = collector.clone();
            let adapters = adapters.clone();
            async move {
                let result = collector.run(&name, target, &adapters).await;
                (name, result)
            }
        })
        .buffer_unordered(args.parallel.max(1))
        .collect()
        .await;

    // Close the event channel so the progress task ends
    drop(collector);
    if let Some(task) = progress_task {
        let _ = task.await;
    }

    let mut failures = 0;
    let mut reports = Vec::new();
    for (name, result) in results {
        match result {
            Ok(report) => reports.push(report),
            Err(e) => {
                failures += 1;
                eprintln!("{} {}: {}", style("✗").red(), name, e);
            }
        }
    }
    reports.sort_by(|a, b| a.category.cmp(&b.category));

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        print_reports(&reports);
        println!(
            "  {} multiplier now {:.2}",
            style("→").dim(),
            sampler.multiplier().await
        );
    }

    if failures > 0 {
        anyhow::bail!("{} categories failed", failures);
    }
    Ok(())
}

fn print_reports(reports: &[RoundReport]) {
    for report in reports {
        let marker = match report.outcome {
            RoundOutcome::TargetMet => style("✓").green(),
            RoundOutcome::Exhausted => style("!").yellow(),
        };
        println!(
            "{} {:<16} {}/{} accepted, {} rejected, {} duplicates, {} timed out",
            marker,
            report.category,
            report.accepted,
            report.target,
            report.rejected,
            report.skipped_duplicate,
            report.timed_out
        );

        if !report.rejections_by_reason.is_empty() {
            let reasons: Vec<String> = report
                .rejections_by_reason
                .iter()
                .map(|(reason, count)| format!("{} {}", reason, count))
                .collect();
            println!("  {} {}", style("→").dim(), reasons.join(", "));
        }
        for error in &report.source_errors {
            println!("  {} {}", style("!").yellow(), error);
        }
        if report.feedback.is_degenerate() {
            println!(
                "  {} no images accepted from {} URLs; check sources and filters",
                style("!").yellow(),
                report.requested
            );
        }
    }
}
