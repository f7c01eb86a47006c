use figment::providers::{Format, Json};
use figment::Figment;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

use super::schema::{Config, TransportKind};
use crate::error::{ConfigError, Result};

static VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

/// Load, expand, and validate a configuration file.
pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = expand_home(path.as_ref());

    if !path.exists() {
        return Err(ConfigError::Parse(format!(
            "config file not found: {}",
            path.display()
        ))
        .into());
    }

    let config: Config = Figment::new()
        .merge(Json::file(&path))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    let config = expand_variables(config);
    validate(&config)?;

    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    for (name, entry) in &config.mcp_servers {
        if entry.disabled {
            continue;
        }

        let kind = entry.transport_kind().ok_or_else(|| {
            ConfigError::Validation(format!("server '{name}': unsupported transport type"))
        })?;

        match kind {
            TransportKind::Stdio => {
                if entry.command.is_empty() {
                    return Err(ConfigError::Validation(format!(
                        "server '{name}': command is required for stdio transport"
                    ))
                    .into());
                }
            }
            TransportKind::Http | TransportKind::EventStream => {
                if entry.url.is_empty() {
                    return Err(ConfigError::Validation(format!(
                        "server '{name}': url is required for {kind} transport"
                    ))
                    .into());
                }
                if !entry.url.starts_with("http://") && !entry.url.starts_with("https://") {
                    return Err(ConfigError::Validation(format!(
                        "server '{name}': url must be http(s)"
                    ))
                    .into());
                }
            }
            TransportKind::Container => {
                if entry.image.is_empty() {
                    return Err(ConfigError::Validation(format!(
                        "server '{name}': image is required for container transport"
                    ))
                    .into());
                }
            }
        }
    }

    Ok(())
}

/// Replace `${NAME}` references in every string field with the named
/// environment variable's current value; unset variables expand to the
/// empty string.
fn expand_variables(mut config: Config) -> Config {
    for entry in config.mcp_servers.values_mut() {
        entry.command = substitute(&entry.command);
        for arg in &mut entry.args {
            *arg = substitute(arg);
        }
        for value in entry.env.values_mut() {
            *value = substitute(value);
        }
        entry.url = substitute(&entry.url);
        for value in entry.headers.values_mut() {
            *value = substitute(value);
        }
        entry.image = substitute(&entry.image);
        entry.volumes = entry
            .volumes
            .iter()
            .map(|(host, inside)| (substitute(host), substitute(inside)))
            .collect();
        entry.network = substitute(&entry.network);
    }
    config
}

fn substitute(input: &str) -> String {
    VAR_PATTERN
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

fn expand_home(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}
