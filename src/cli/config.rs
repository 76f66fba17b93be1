use std::fs;
use std::path::PathBuf;

const SAMPLE_CONFIG: &str = include_str!("../../samples/config.yml");

pub fn init(stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    write_config(SAMPLE_CONFIG, stdout)
}

fn write_config(config_content: &str, stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    if stdout {
        print!("{}", config_content);
        return Ok(());
    }

    // Prefer ~/.config/cwtail/config.yml, fall back to /etc/cwtail/config.yml
    let config_path = dirs::home_dir()
        .map(|home| home.join(".config/cwtail/config.yml"))
        .filter(|path| match path.parent() {
            Some(parent) => match fs::create_dir_all(parent) {
                Ok(()) => true,
                Err(_) => {
                    eprintln!("Warning: Could not create directory {}", parent.display());
                    eprintln!("Falling back to /etc/cwtail/config.yml");
                    false
                }
            },
            None => false,
        })
        .unwrap_or_else(|| PathBuf::from("/etc/cwtail/config.yml"));

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

    let config = crate::config::load_config(&path)?;
    match crate::config::validate_config(config, chrono::Utc::now()) {
        Ok(resolved) => {
            println!(
                "Config is valid: log group '{}', pattern '{}', {}",
                resolved.config.log_group,
                resolved.pattern.as_str(),
                if resolved.window.is_live() {
                    "live tail"
                } else {
                    "historical range"
                }
            );
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_sample_config_parses_and_validates() {
        let config: Config = serde_yaml::from_str(SAMPLE_CONFIG).unwrap();
        assert_eq!(config.log_group, "/aws/lambda/my-function");
        assert!(config.refresh_streams);

        let resolved = crate::config::validate_config(config, chrono::Utc::now()).unwrap();
        assert!(resolved.window.is_live());
    }
}
