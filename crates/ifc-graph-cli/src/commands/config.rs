use super::OutputContext;
use crate::cli::ConfigCommands;
use crate::config::FileConfig;
use anyhow::Result;
use std::path::Path;

pub fn execute(command: ConfigCommands, cfg: &FileConfig, path: Option<&Path>, output: &OutputContext) -> Result<()> {
    match command {
        ConfigCommands::Show => show_config(cfg, output),
        ConfigCommands::Path => show_path(path, output),
    }
}

fn show_config(cfg: &FileConfig, output: &OutputContext) -> Result<()> {
    if output.json {
        return output.print_json(&redacted(cfg));
    }
    print!("{}", redacted(cfg).to_toml()?);
    Ok(())
}

fn show_path(path: Option<&Path>, output: &OutputContext) -> Result<()> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(FileConfig::default_path);
    if output.json {
        return output.print_json(&serde_json::json!({
            "path": path,
            "exists": path.exists(),
        }));
    }
    println!("{}", path.display());
    Ok(())
}

/// API keys shorter than twice this are masked entirely
const VISIBLE_KEY_CHARS: usize = 8;

/// Copy with secrets masked
pub fn redacted(cfg: &FileConfig) -> FileConfig {
    let mut cfg = cfg.clone();
    if let Some(key) = cfg.store.api_key.as_mut() {
        *key = if key.chars().count() > VISIBLE_KEY_CHARS * 2 {
            let visible: String = key.chars().take(VISIBLE_KEY_CHARS).collect();
            format!("{visible}...")
        } else {
            "********".to_string()
        };
    }
    if cfg.store.password.is_some() {
        cfg.store.password = Some("********".to_string());
    }
    cfg
}
