//! Configuration loading for the lost-and-found client.
//!
//! Sources are layered in this order, later ones winning:
//!
//! 1. `{CONFIG_DIR}/default.*` (optional)
//! 2. `{CONFIG_DIR}/{RUN_ENV}.*` (optional, `RUN_ENV` defaults to `debug`)
//! 3. `LOSTFOUND__SECTION__KEY` environment variables
//!
//! Any string value equal to `"secret_from_env"` is then replaced by the
//! environment variable named after its upper-cased path, so
//! `firebase.api_key` reads `FIREBASE_API_KEY`.

use config::{Config, ConfigError, Environment, File};
use once_cell::sync::OnceCell;
use serde_json::Value;
use std::env;
use std::path::PathBuf;
use tracing::{debug, warn};

pub mod models;
pub use models::*;

/// Marker value replaced by an environment variable after loading.
pub const SECRET_MARKER: &str = "secret_from_env";

/// The prefix for configuration environment variables
pub const DEFAULT_PREFIX: &str = "LOSTFOUND";

/// The separator for configuration environment variables
pub const CONFIG_SEPARATOR: &str = "__";

pub fn load_config() -> Result<AppConfig, ConfigError> {
    ensure_dotenv_loaded();

    let run_env = env::var("RUN_ENV").unwrap_or_else(|_| "debug".to_string());
    let prefix = env::var("PREFIX").unwrap_or_else(|_| DEFAULT_PREFIX.to_string());
    let config_dir = PathBuf::from(env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string()));

    load_config_from(&config_dir, &run_env, &prefix)
}

/// Loads the configuration from an explicit directory, environment name and
/// env var prefix.
pub fn load_config_from(
    config_dir: &std::path::Path,
    run_env: &str,
    prefix: &str,
) -> Result<AppConfig, ConfigError> {
    let default_path = config_dir.join("default");
    let env_path = config_dir.join(run_env);

    debug!(
        "loading config: default={}, env={}",
        default_path.display(),
        env_path.display()
    );

    let builder = Config::builder()
        .add_source(File::from(default_path).required(false))
        .add_source(File::from(env_path).required(false))
        .add_source(Environment::with_prefix(prefix).separator(CONFIG_SEPARATOR));

    let raw_config: AppConfig = builder.build()?.try_deserialize()?;
    apply_env_overrides_from_marker(raw_config)
}

/// Recursively replaces all "secret_from_env" string values with environment variable values
fn inject_env_secrets(value: &mut Value) {
    fn walk(path: Vec<String>, obj: &mut Value) {
        match obj {
            Value::Object(map) => {
                for (k, v) in map.iter_mut() {
                    let mut new_path = path.clone();
                    new_path.push(k.to_string());
                    walk(new_path, v);
                }
            }
            Value::String(s) if s == SECRET_MARKER => {
                let env_key = path.join("_").to_uppercase();
                match std::env::var(&env_key) {
                    Ok(env_val) => *obj = Value::String(env_val),
                    Err(_) => {
                        warn!("env var {} not found for {}", env_key, SECRET_MARKER);
                        *obj = Value::Null;
                    }
                }
            }
            _ => {}
        }
    }

    walk(vec![], value);
}

/// Applies environment overrides based on "secret_from_env" markers in serialized config.
///
/// A marker without a matching variable becomes `None`, so a missing API key
/// shows up as an absent value instead of the literal marker string.
pub fn apply_env_overrides_from_marker(config: AppConfig) -> Result<AppConfig, ConfigError> {
    let mut json = serde_json::to_value(&config)
        .map_err(|err| ConfigError::Message(format!("failed to serialize config: {err}")))?;
    inject_env_secrets(&mut json);
    serde_json::from_value(json)
        .map_err(|err| ConfigError::Message(format!("failed to rebuild config: {err}")))
}

static INIT_DOTENV: OnceCell<()> = OnceCell::new();

/// Ensures that the dotenv file is loaded into the environment variables.
///
/// `DOTENV_OVERRIDE` selects another file; the default is `.env`. Loading
/// happens once per process. Returns the path that was used.
pub fn ensure_dotenv_loaded() -> String {
    let dotenv_path = std::env::var("DOTENV_OVERRIDE").unwrap_or_else(|_| ".env".to_string());

    INIT_DOTENV.get_or_init(|| {
        dotenv::from_filename(&dotenv_path).ok();
    });

    dotenv_path
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_config_dir(name: &str) -> PathBuf {
        let dir = env::temp_dir().join(format!("lostfound-config-{}-{}", name, std::process::id()));
        fs::create_dir_all(&dir).expect("create temp config dir");
        dir
    }

    #[test]
    fn test_defaults_without_files() {
        let dir = temp_config_dir("empty");
        let config = load_config_from(&dir, "debug", "LOSTFOUND_TEST_EMPTY").unwrap();

        assert!(config.firebase.is_none());
        assert_eq!(config.item.max_title_length, 100);
        assert_eq!(config.item.max_description_length, 1000);
        assert_eq!(config.item.categories.len(), 6);
        assert_eq!(config.user.min_password_length, 6);
        assert_eq!(config.storage.items_path, "items");
        assert!((config.image.quality - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn test_environment_file_overrides_default() {
        let dir = temp_config_dir("layered");
        fs::write(
            dir.join("default.toml"),
            "[item]\nmax_title_length = 80\n[storage]\nitems_path = \"lost\"\n",
        )
        .unwrap();
        fs::write(dir.join("staging.toml"), "[item]\nmax_title_length = 60\n").unwrap();

        let config = load_config_from(&dir, "staging", "LOSTFOUND_TEST_LAYERED").unwrap();

        assert_eq!(config.item.max_title_length, 60);
        assert_eq!(config.storage.items_path, "lost");
        // untouched keys keep their defaults
        assert_eq!(config.item.min_title_length, 3);
    }

    #[test]
    fn test_secret_marker_is_replaced_from_env() {
        let dir = temp_config_dir("secret");
        fs::write(
            dir.join("default.toml"),
            "[firebase]\napi_key = \"secret_from_env\"\nproject_id = \"demo\"\n",
        )
        .unwrap();
        env::set_var("FIREBASE_API_KEY", "key-from-env");

        let config = load_config_from(&dir, "debug", "LOSTFOUND_TEST_SECRET").unwrap();
        let firebase = config.firebase.expect("firebase section");

        assert_eq!(firebase.api_key.as_deref(), Some("key-from-env"));
        assert_eq!(firebase.project_id.as_deref(), Some("demo"));
        assert_eq!(firebase.poll_interval_ms, 2000);
    }
}
