//! Categories command.

use console::style;

use crate::config::Config;
use crate::models::CategoryKind;

/// List the configured taxonomy.
pub fn cmd_categories(config: &Config, terms: bool) -> anyhow::Result<()> {
    let categories = config.categories()?;

    println!("{} {} categories", style("→").cyan(), categories.len());
    for category in categories.iter() {
        let kind = match category.kind() {
            CategoryKind::Target => style("target").dim(),
            CategoryKind::UnknownFruit => style("sentinel: unknown fruit").yellow(),
            CategoryKind::NotFruit => style("sentinel: not fruit").yellow(),
        };
        println!("  {:<16} {}", category.name(), kind);

        if !category.aliases().is_empty() {
            println!("    aliases: {}", category.aliases().join(", "));
        }
        if terms {
            for term in category.search_terms() {
                println!("    {} {}", style("·").dim(), term);
            }
        }
    }

    Ok(())
}
