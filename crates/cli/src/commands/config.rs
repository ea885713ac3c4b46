use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use comanda_core::config::{AppConfig, LoadOptions};
use toml::Value;

/// One effective setting and the environment variables that can override it,
/// in lookup order.
struct Field {
    key_path: &'static str,
    env_keys: &'static [&'static str],
    value: String,
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines =
        vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key_path,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key_path, &field.value, source));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    vec![
        Field {
            key_path: "database.url",
            env_keys: &["COMANDA_DATABASE_URL"],
            value: config.database.url.clone(),
        },
        Field {
            key_path: "database.max_connections",
            env_keys: &["COMANDA_DATABASE_MAX_CONNECTIONS"],
            value: config.database.max_connections.to_string(),
        },
        Field {
            key_path: "database.timeout_secs",
            env_keys: &["COMANDA_DATABASE_TIMEOUT_SECS"],
            value: config.database.timeout_secs.to_string(),
        },
        Field {
            key_path: "invoicing.establishment",
            env_keys: &["COMANDA_INVOICING_ESTABLISHMENT"],
            value: config.invoicing.establishment.clone(),
        },
        Field {
            key_path: "invoicing.emission_point",
            env_keys: &["COMANDA_INVOICING_EMISSION_POINT"],
            value: config.invoicing.emission_point.clone(),
        },
        Field {
            key_path: "invoicing.sequence_width",
            env_keys: &["COMANDA_INVOICING_SEQUENCE_WIDTH"],
            value: config.invoicing.sequence_width.to_string(),
        },
        Field {
            key_path: "logging.level",
            env_keys: &["COMANDA_LOGGING_LEVEL", "COMANDA_LOG_LEVEL"],
            value: config.logging.level.clone(),
        },
        Field {
            key_path: "logging.format",
            env_keys: &["COMANDA_LOGGING_FORMAT", "COMANDA_LOG_FORMAT"],
            value: format!("{:?}", config.logging.format).to_ascii_lowercase(),
        },
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("comanda.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/comanda.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
