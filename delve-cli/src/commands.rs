//! Subcommand handlers.

use crate::{Commands, ConfigAction};
use delve_core::DelveConfig;
use std::path::Path;

pub fn handle_command(
    command: Commands,
    workspace: &Path,
    config: &DelveConfig,
) -> anyhow::Result<()> {
    match command {
        Commands::Config { action } => handle_config(action, workspace, config),
    }
}

fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    config: &DelveConfig,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = init_config(workspace)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            println!("{}", render_config(config)?);
            Ok(())
        }
    }
}

/// Write the default configuration to `<workspace>/.delve/config.toml`.
///
/// An existing file is left untouched.
fn init_config(workspace: &Path) -> anyhow::Result<std::path::PathBuf> {
    let config_dir = workspace.join(".delve");
    std::fs::create_dir_all(&config_dir)?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        anyhow::bail!(
            "Configuration file already exists at: {}",
            config_path.display()
        );
    }
    let toml_str = toml::to_string_pretty(&DelveConfig::default())?;
    std::fs::write(&config_path, toml_str)?;
    Ok(config_path)
}

/// The effective configuration as TOML, with any inline API key masked.
fn render_config(config: &DelveConfig) -> anyhow::Result<String> {
    Ok(toml::to_string_pretty(&config.redacted())?)
}
