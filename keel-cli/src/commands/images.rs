//! Images command handler

use anyhow::Result;
use colored::*;
use keel_core::domain::ImageSpec;

use crate::config::Config;

/// Prints builder aliases and registry services
pub fn list_images(config: &Config) -> Result<i32> {
    let registry = config.registry()?;

    println!("{}", "Builders:".bold());
    print_table(&registry.builders(), false);

    println!();
    println!("{}", "Services:".bold());
    print_table(&registry.services(), true);

    Ok(0)
}

fn print_table(entries: &[(&str, &ImageSpec)], with_ports: bool) {
    let width = entries.iter().map(|(name, _)| name.len()).max().unwrap_or(0);

    for (name, image) in entries {
        if with_ports && !image.ports.is_empty() {
            println!(
                "  {:<width$}  {}  {}",
                name.cyan(),
                image.tag,
                image.ports.join(",").dimmed(),
                width = width
            );
        } else {
            println!("  {:<width$}  {}", name.cyan(), image.tag, width = width);
        }
    }
}
