//! String key/value configuration with environment overrides.
//!
//! `DOG_UPLOAD__HTTP__PORT=8080` becomes `http.port = "8080"`.

use std::collections::HashMap;
use std::time::Duration;

use dog_upload::{UploadConfig, UploadError, UploadResult};

/// Prefix of environment variables read by [`AppConfig::from_env`]
pub const ENV_PREFIX: &str = "DOG_UPLOAD__";

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    values: HashMap<String, String>,
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every variable starting with [`ENV_PREFIX`]
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars(), ENV_PREFIX)
    }

    pub fn from_vars<I>(vars: I, prefix: &str) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = Self::new();
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix(prefix) {
                config.set(stripped.to_lowercase().replace("__", "."), value);
            }
        }
        config
    }

    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str) -> UploadResult<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|_| UploadError::invalid(format!("{} has an invalid value: {}", key, raw))),
        }
    }

    pub fn host(&self) -> String {
        self.get("http.host").unwrap_or("127.0.0.1").to_string()
    }

    pub fn port(&self) -> UploadResult<u16> {
        Ok(self.parse("http.port")?.unwrap_or(3030))
    }

    /// `host:port` to bind
    pub fn address(&self) -> UploadResult<String> {
        Ok(format!("{}:{}", self.host(), self.port()?))
    }

    /// Session settings, defaults overridden by any `upload.*` keys
    pub fn upload_config(&self) -> UploadResult<UploadConfig> {
        let mut config = UploadConfig::default();

        if let Some(bytes) = self.parse::<u64>("upload.chunk_size")? {
            config = config.with_chunk_size(bytes);
        }
        if let Some(bytes) = self.parse::<u64>("upload.max_file_bytes")? {
            config = config.with_max_file_bytes(bytes);
        }
        if let Some(secs) = self.parse::<u64>("upload.presign_expiry_secs")? {
            config = config.with_presign_expiry(Duration::from_secs(secs));
        }
        if let Some(prefix) = self.get("upload.key_prefix") {
            config = config.with_key_prefix(prefix);
        }
        if let Some(types) = self.get("upload.accepted_content_types") {
            config = config.with_accepted_content_types(
                types
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty() && *t != "*"),
            );
        }

        Ok(config)
    }
}
