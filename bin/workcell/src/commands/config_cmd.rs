use std::path::{Path, PathBuf};
use workcell_core::RuntimeConfig;

use super::load_config;

pub fn show(config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}

pub fn init(config_path: Option<&str>, force: bool) -> anyhow::Result<()> {
    let path: PathBuf = match config_path {
        Some(path) => Path::new(path).to_path_buf(),
        None => RuntimeConfig::default_path(),
    };
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists, pass --force to overwrite",
            path.display()
        );
    }
    RuntimeConfig::default().save(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}
