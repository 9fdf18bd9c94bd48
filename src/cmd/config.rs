//! Configuration view and validation commands: `opsboard config`.

use anyhow::{Context, Result};

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use opsboard::opsboard_config::{CONFIG_DIR, CONFIG_FILE, OpsboardConfig, OpsboardToml};

    let config_path = project_dir.join(CONFIG_DIR).join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("opsboard Configuration");
            println!("======================");
            println!();

            let config = OpsboardConfig::new(project_dir).context("Failed to load configuration")?;
            match &config.source_file {
                Some(path) => println!("Config file: {}", path.display()),
                None => {
                    println!("No {} found at {}", CONFIG_FILE, config_path.display());
                    println!("Using defaults. Run 'opsboard config init' to create one.");
                }
            }
            println!();
            println!("Effective values (file + OPSBOARD_* environment):");
            println!();

            let rendered =
                toml::to_string_pretty(&config.toml).context("Failed to render configuration")?;
            for line in rendered.lines() {
                println!("  {}", line);
            }
            println!();

            let targets = config.watch_targets();
            if !targets.is_empty() {
                println!("Watched paths:");
                for target in &targets {
                    let exists = if target.path.is_dir() { "" } else { " (missing)" };
                    match &target.only_file {
                        Some(file) => println!(
                            "  {:<9} {:<10} {}{}",
                            target.source,
                            target.alias,
                            target.path.join(file).display(),
                            exists
                        ),
                        None => println!(
                            "  {:<9} {:<10} {}{}",
                            target.source,
                            target.alias,
                            target.path.display(),
                            exists
                        ),
                    }
                }
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let config = OpsboardConfig::new(project_dir).context("Failed to load configuration")?;
            if config.source_file.is_none() {
                println!("No {} found. Using defaults (valid).", CONFIG_FILE);
                return Ok(());
            }

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("{} already exists at {}", CONFIG_FILE, config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            OpsboardToml::default()
                .save(&config_path)
                .context("Failed to write default configuration")?;

            println!("Created {} at {}", CONFIG_FILE, config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [server] host, port, cors_origins");
            println!("  - [watch] artifact_roots, inbox_dir");
            println!("  - [producers] bd_cmd, runs_log, progress_state, prd_file");
            println!();
        }
    }

    Ok(())
}
