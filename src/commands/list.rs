use anyhow::Result;
use colored::Colorize;

use crate::Context;
use crate::cli::ListArgs;
use crate::config::ProjectConfig;
use crate::paths::{self, ProjectLayout};
use crate::ui;

/// Show the units that would be deployed, without touching the provider.
pub fn run(ctx: &Context, deploy_dir: Option<&str>, args: &ListArgs) -> Result<()> {
    let dir = paths::deploy_dir(deploy_dir)?;
    let layout = ProjectLayout::discover(&dir)?;
    let project = ProjectConfig::load(layout.deploy_dir())?;

    let units = match &args.feature {
        Some(feature) => layout.feature_units(feature)?,
        None => layout.units(&project.ignore)?,
    };

    if ctx.quiet {
        for unit in &units {
            println!("{unit}");
        }
        return Ok(());
    }

    ui::header(&format!("Units of {}", layout.project()));
    ui::kv("Deploy dir", &layout.deploy_dir().display().to_string());
    if !project.ignore.is_empty() && args.feature.is_none() {
        ui::kv("Ignored", &project.ignore.join(", "));
    }

    let mut current = None;
    for unit in &units {
        if current != Some(&unit.feature) {
            ui::section(&unit.feature);
            current = Some(&unit.feature);
        }
        println!(
            "  {} {}",
            unit.name().bold(),
            unit.path().display().to_string().dimmed()
        );
    }

    println!();
    if units.is_empty() {
        ui::warn("No units found");
    } else {
        ui::dim(&format!("{} unit(s)", units.len()));
    }
    Ok(())
}
