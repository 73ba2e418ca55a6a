use std::fs;
use std::path::PathBuf;

use crate::config::generate::generate_starter_config;

pub fn init(stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_content = generate_starter_config();

    if stdout {
        print!("{}", config_content);
        return Ok(());
    }

    // Prefer ~/.config/docwatch/config.yml, fall back to /etc/docwatch/config.yml
    let config_path = match dirs::home_dir() {
        Some(home_dir) => {
            let user_config = home_dir.join(".config/docwatch/config.yml");
            match user_config.parent().map(fs::create_dir_all) {
                Some(Err(e)) => {
                    eprintln!("Warning: Could not create {}: {}", user_config.display(), e);
                    eprintln!("Falling back to /etc/docwatch/config.yml");
                    PathBuf::from("/etc/docwatch/config.yml")
                }
                _ => user_config,
            }
        }
        None => PathBuf::from("/etc/docwatch/config.yml"),
    };

    if config_path.exists() {
        return Err(format!(
            "config file already exists at {}; remove it first or use --stdout",
            config_path.display()
        )
        .into());
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&config_path, config_content)?;

    println!("Config file written to {}", config_path.display());
    Ok(())
}

pub fn validate(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path.ok_or("No config file found. Use --config to specify a path.")?;

    println!("Validating config file: {}", path.display());

    match crate::config::load_config(&path) {
        Ok(_) => {
            println!("✓ Config is valid");
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Config validation failed:\n{}", e);
            Err(e.into())
        }
    }
}
