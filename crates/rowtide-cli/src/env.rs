use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;

fn env_file_name(environment: Option<&str>) -> String {
    match environment {
        Some(name) => format!(".env.{}", name),
        None => ".env".to_string(),
    }
}

/// Load the closest `.env` (or `.env.{ENV}`) file, searching from the
/// current directory up to the filesystem root.
///
/// A missing default `.env` is not an error since the variables may come
/// from the process environment. A missing named environment file is.
pub fn load_dotenv_from_ancestors(environment: Option<&str>) -> Result<Option<PathBuf>> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let file_name = env_file_name(environment);

    let mut current = cwd.as_path();
    loop {
        let env_path = current.join(&file_name);
        if env_path.exists() {
            dotenvy::from_path(&env_path)
                .with_context(|| format!("Failed to load {}", env_path.display()))?;
            info!(path = %env_path.display(), "Loaded environment file");
            return Ok(Some(env_path));
        }

        match current.parent() {
            Some(parent) => current = parent,
            None => break,
        }
    }

    if environment.is_some() {
        anyhow::bail!(
            "No {} file found.\n\nSearched from {} to filesystem root.",
            file_name,
            cwd.display()
        );
    }
    Ok(None)
}
