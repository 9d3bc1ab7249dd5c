use anyhow::{bail, Result};
use inquire::{Select, Text};
use std::path::Path;

use crate::core::config::Config;

const OTHER_MODEL: &str = "Other...";

/// Fills in whatever a first run needs before it can start: the model to
/// call and the project to seed an outline from. Returns `true` when the
/// config changed and should be saved.
pub fn run_setup(config: &mut Config) -> Result<bool> {
    let mut changed = false;

    if config.model.trim().is_empty() {
        if config.unattended {
            bail!("`model` is not set in config.yml and unattended mode cannot ask for it");
        }
        config.model = select_model(config)?;
        changed = true;
    }

    let has_outline = config
        .outline_file
        .as_deref()
        .is_some_and(|p| Path::new(p).exists());
    let has_project = !config.project_file.trim().is_empty() && Path::new(&config.project_file).exists();

    if !has_outline && !has_project {
        if config.unattended {
            bail!(
                "Project file '{}' not found and no outline to resume",
                config.project_file
            );
        }
        config.project_file = Text::new("Path to the project definition (.project.json):")
            .with_validator(|input: &str| {
                if Path::new(input.trim()).is_file() {
                    Ok(inquire::validator::Validation::Valid)
                } else {
                    Ok(inquire::validator::Validation::Invalid(
                        "File not found".into(),
                    ))
                }
            })
            .prompt()?
            .trim()
            .to_string();
        changed = true;
    }

    Ok(changed)
}

fn select_model(config: &Config) -> Result<String> {
    let mut models: Vec<String> = config.retry.models.keys().cloned().collect();
    models.sort();
    models.push(OTHER_MODEL.to_string());

    let choice = Select::new("Select the model to write with:", models).prompt()?;
    if choice != OTHER_MODEL {
        return Ok(choice);
    }

    let custom = Text::new("Model id:").prompt()?;
    let custom = custom.trim();
    if custom.is_empty() {
        bail!("No model selected");
    }
    Ok(custom.to_string())
}
