use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct Store {
    /// "memory" or "rtdb".
    pub backend: String,
    pub url: Option<String>,
    pub auth_token: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Server {
    pub bind: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Admin {
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    pub store: Store,
    pub server: Server,
    pub admin: Admin,
}

impl Settings {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .build()?;

        config.try_deserialize()
    }
}
