use std::path::Path;

use fusenfs_config::MountConfig;

pub fn run(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = MountConfig::from_file(config_path)?.effective();
    let errors = config.validate();

    if errors.is_empty() {
        println!("Configuration is valid.");
        Ok(())
    } else {
        eprintln!("Configuration has {} error(s):", errors.len());
        for (i, err) in errors.iter().enumerate() {
            eprintln!("  {}: {}", i + 1, err);
        }
        Err(format!("{} validation error(s) found", errors.len()).into())
    }
}

/// Print the configuration with defaults applied, as YAML.
pub fn print_effective(config: &MountConfig) -> Result<(), Box<dyn std::error::Error>> {
    print!("{}", serde_yaml::to_string(&config.effective())?);
    Ok(())
}
