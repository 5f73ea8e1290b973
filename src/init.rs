//! Project initialization for fluentflow
//!
//! `fluentflow init` creates the data directory, database and config, and
//! mints the first API token.

use crate::auth::{generate_token, hash_token};
use crate::config::{Config, CONFIG_DIR, CONFIG_FILE};
use crate::db::Database;
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};

/// Initialize fluentflow in `root`. Returns the freshly minted token when a
/// new config was written.
pub fn init_project(root: &Path) -> Result<Option<String>, String> {
    println!("\n{}", "Initializing FluentFlow...".cyan().bold());
    println!("   Directory: {}\n", root.display());

    // 1. Data directory
    let data_dir = root.join(CONFIG_DIR);
    create_dir_if_missing(&data_dir)?;

    // 2. Database (opening creates the tables)
    let db_path = data_dir.join("fluentflow.db");
    let existed = db_path.exists();
    Database::open_at(&db_path).map_err(|e| format!("Could not create database: {}", e))?;
    if existed {
        println!("   {} {}/fluentflow.db (already exists)", "Skipping".yellow(), CONFIG_DIR);
    } else {
        println!("   {} {}/fluentflow.db", "Creating".green(), CONFIG_DIR);
    }

    // 3. Config with a first token
    let config_path = data_dir.join(CONFIG_FILE);
    let token = if config_path.exists() {
        println!("   {} {}/{} (already exists)", "Skipping".yellow(), CONFIG_DIR, CONFIG_FILE);
        None
    } else {
        let token = generate_token();
        let mut config = Config::default();
        config.auth.token_hashes.push(hash_token(&token));
        config.save_to(&config_path)?;
        println!("   {} {}/{}", "Creating".green(), CONFIG_DIR, CONFIG_FILE);
        Some(token)
    };

    // 4. Keep the database out of version control
    add_to_gitignore(root)?;

    println!("\n{}", "FluentFlow initialized!".green().bold());
    if let Some(token) = &token {
        println!("\nAPI token (shown once, only its hash is stored):");
        println!("   {}", token.cyan());
    }
    println!("\nNext steps:");
    println!("  1. Run {} to load the goal bank", "fluentflow seed".cyan());
    println!("  2. Run {} to start the API", "fluentflow serve".cyan());
    println!();

    Ok(token)
}

/// Mint a new token and add its hash to the config at `config_path`
pub fn register_token(config_path: &Path) -> Result<String, String> {
    let mut config = if config_path.exists() {
        Config::load_from(config_path)?
    } else {
        if let Some(parent) = config_path.parent() {
            create_dir_if_missing(parent)?;
        }
        Config::default()
    };

    let token = generate_token();
    config.auth.token_hashes.push(hash_token(&token));
    config.save_to(config_path)?;
    log::info!("Registered new API token in {}", config_path.display());
    Ok(token)
}

/// Config file to write tokens into: the one found walking up, else ./.fluentflow/config.toml
pub fn default_config_path() -> PathBuf {
    Config::find_config_path().unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE))
}

fn create_dir_if_missing(path: &Path) -> Result<(), String> {
    if !path.as_os_str().is_empty() && !path.exists() {
        fs::create_dir_all(path)
            .map_err(|e| format!("Could not create {}: {}", path.display(), e))?;
        println!("   {} {}", "Creating".green(), path.display());
    }
    Ok(())
}

fn add_to_gitignore(root: &Path) -> Result<(), String> {
    let gitignore_path = root.join(".gitignore");
    let entry = format!("{}/", CONFIG_DIR);

    if gitignore_path.exists() {
        let existing = fs::read_to_string(&gitignore_path)
            .map_err(|e| format!("Could not read .gitignore: {}", e))?;

        if existing
            .lines()
            .any(|line| line.trim() == entry || line.trim() == CONFIG_DIR)
        {
            return Ok(());
        }

        let new_content = format!(
            "{}\n\n# FluentFlow data (student records)\n{}\n",
            existing.trim_end(),
            entry
        );
        fs::write(&gitignore_path, new_content)
            .map_err(|e| format!("Could not update .gitignore: {}", e))?;
        println!("   {} .gitignore (added {})", "Updated".green(), entry);
    } else {
        let content = format!("# FluentFlow data (student records)\n{}\n", entry);
        fs::write(&gitignore_path, content)
            .map_err(|e| format!("Could not create .gitignore: {}", e))?;
        println!("   {} .gitignore", "Creating".green());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Authenticator;
    use tempfile::TempDir;

    #[test]
    fn test_init_creates_everything() {
        let dir = TempDir::new().unwrap();
        let token = init_project(dir.path()).unwrap().unwrap();

        assert!(dir.path().join(".fluentflow/fluentflow.db").exists());
        let config = Config::load_from(&dir.path().join(".fluentflow/config.toml")).unwrap();
        let auth = Authenticator::from_hashes(config.auth.token_hashes.clone());
        assert!(auth.authorize(Some(&format!("Bearer {}", token))));

        let gitignore = fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert!(gitignore.contains(".fluentflow/"));
    }

    #[test]
    fn test_init_twice_keeps_config() {
        let dir = TempDir::new().unwrap();
        init_project(dir.path()).unwrap();
        let second = init_project(dir.path()).unwrap();
        assert!(second.is_none());

        let gitignore = fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert_eq!(gitignore.matches(".fluentflow/").count(), 1);
    }

    #[test]
    fn test_register_token_appends_hash() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let first = register_token(&path).unwrap();
        let second = register_token(&path).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.auth.token_hashes.len(), 2);
        let auth = Authenticator::from_hashes(config.auth.token_hashes);
        assert!(auth.authorize(Some(&format!("Bearer {}", first))));
        assert!(auth.authorize(Some(&format!("Bearer {}", second))));
    }
}
