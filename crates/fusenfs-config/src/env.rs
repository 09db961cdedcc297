use std::env;
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::ConfigError;

fn env_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env interpolation pattern is valid")
    })
}

/// Interpolate environment variables in a string.
/// Replaces `${VAR_NAME}` with the value of the environment variable; every
/// unset variable is reported at once.
pub fn interpolate_env(input: &str) -> Result<String, ConfigError> {
    let mut missing: Vec<String> = Vec::new();

    let result = env_pattern().replace_all(input, |cap: &Captures| {
        let name = &cap[1];
        match env::var(name) {
            Ok(value) => value,
            Err(_) => {
                if !missing.iter().any(|m| m == name) {
                    missing.push(name.to_string());
                }
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        return Err(ConfigError::MissingEnvVars(missing));
    }

    Ok(result.into_owned())
}
