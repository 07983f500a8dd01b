use std::collections::HashMap;

use config::{Config as ConfigLib, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerSettings,
    pub signing: SigningSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Signing defaults applied to every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningSettings {
    /// Attribute name treated as the document's ID attribute.
    pub id_attribute: String,
    /// ID value assigned to a root element that has none.
    pub fallback_id: String,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_sources(None)
    }

    pub fn load_with_sources(
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = ConfigLib::builder()
            .set_default("server.host", "localhost")?
            .set_default("server.port", 8003)?
            .set_default("signing.id_attribute", "id")?
            .set_default("signing.fallback_id", "comprobante")?
            .add_source(File::with_name("config/settings").required(false));

        // If env_vars is provided, we use it instead of system environment
        // to avoid variable pollution across tests.
        if let Some(vars) = env_vars {
            for (key, value) in vars {
                builder = builder.set_override(&key, value)?;
            }
        } else {
            // System environment variables in the format APP_SERVER__HOST.
            builder = builder.add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );
        }

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::load_with_sources(Some(HashMap::new())).expect("Failed to load");

        assert_eq!(config.server.host, "localhost");
        assert_eq!(config.server.port, 8003);
        assert_eq!(config.signing.id_attribute, "id");
        assert_eq!(config.signing.fallback_id, "comprobante");
    }

    #[test]
    fn test_env_override() {
        let mut env_vars = HashMap::new();
        env_vars.insert("server.port".to_string(), "9000".to_string());
        env_vars.insert("signing.id_attribute".to_string(), "Id".to_string());

        let config = Config::load_with_sources(Some(env_vars)).expect("Failed to load");

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.signing.id_attribute, "Id");
        // Untouched values keep their defaults.
        assert_eq!(config.server.host, "localhost");
        assert_eq!(config.signing.fallback_id, "comprobante");
    }
}
