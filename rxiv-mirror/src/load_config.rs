/// `load_config` module: reads the static YAML mirror config and the secrets
/// the clients need from the environment.
///
/// The YAML file never carries secrets. Object-store keys and the registry
/// token are read from the environment (a `.env` file is honored by `main`)
/// and a missing or empty variable fails immediately with its name in the
/// message, before any remote call is made.
///
/// # Errors
/// All errors use `anyhow::Error` with enough context to be shown to the
/// operator as-is.
use anyhow::{Context, Result};
use rxiv_mirror_core::config::MirrorConfig;
use rxiv_mirror_core::download::S3Credentials;
use std::fs;
use std::path::Path;
use tracing::{error, info};

pub const AWS_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const AWS_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const HF_API_KEY: &str = "HF_API_KEY";

/// Loads and validates the mirror config file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<MirrorConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let config: MirrorConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => conf,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    config
        .validate()
        .with_context(|| format!("Invalid config {:?}", path_ref))?;
    config.trace_loaded();
    Ok(config)
}

fn required_env(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        Ok(_) => {
            error!(variable = name, "Required environment variable is empty");
            Err(anyhow::anyhow!("{name} is set but empty"))
        }
        Err(e) => {
            error!(variable = name, error = ?e, "Required environment variable missing");
            Err(anyhow::anyhow!("{name} missing in environment"))
        }
    }
}

/// Object-store access keys from `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`.
pub fn load_store_credentials() -> Result<S3Credentials> {
    let credentials = S3Credentials {
        access_key_id: required_env(AWS_ACCESS_KEY_ID)?,
        secret_access_key: required_env(AWS_SECRET_ACCESS_KEY)?,
    };
    info!("Loaded object store credentials from environment");
    Ok(credentials)
}

/// Registry API token from `HF_API_KEY`.
pub fn load_registry_token() -> Result<String> {
    let token = required_env(HF_API_KEY)?;
    info!(token_set = !token.is_empty(), "Loaded registry token from environment");
    Ok(token)
}
