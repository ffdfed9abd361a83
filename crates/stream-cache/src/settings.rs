//! # Settings
//!
//! Layered assembly of [`CacheOptions`]: a JSON base file, an optional
//! environment overlay next to it (`<stem>.<environment>.json`), then
//! variables carrying the `STREAM_CACHE_` prefix. Later layers win.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, Map};
use serde::Deserialize;
use tracing::debug;

use crate::cache::CacheOptions;
use crate::error::SettingsError;

/// Prefix of the variables read by [`CacheSettings::load`]
pub const ENV_PREFIX: &str = "STREAM_CACHE";

/// Cache settings; every field may be left out of any layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub configuration: Option<String>,
    pub instance_name: Option<String>,
    pub default_expiration_secs: Option<u64>,
    pub stale_staging_after_secs: Option<u64>,
    pub max_memory_bytes: Option<u64>,
}

impl CacheSettings {
    /// Assemble settings from every layer.
    ///
    /// The base file must exist when given; the environment overlay is
    /// optional. `vars` is usually `std::env::vars()`.
    pub fn load<I, K, V>(
        base: Option<&Path>,
        environment: Option<&str>,
        vars: I,
    ) -> Result<Self, SettingsError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut builder = Config::builder();

        if let Some(base) = base {
            builder = builder.add_source(File::from(base));

            if let Some(environment) = environment {
                let overlay = overlay_path(base, environment);
                debug!(path = ?overlay, "Adding environment settings overlay");
                builder = builder.add_source(File::from(overlay).required(false));
            }
        }

        let vars: Map<String, String> = vars
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .collect();

        // No key separator: field names keep their underscores
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .try_parsing(true)
                .source(Some(vars)),
        );

        let settings = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    /// [`CacheSettings::load`] with the variables of the current process
    pub fn load_from_env(
        base: Option<&Path>,
        environment: Option<&str>,
    ) -> Result<Self, SettingsError> {
        Self::load(base, environment, std::env::vars())
    }

    /// Build the options a cache is constructed from
    pub fn into_options(self) -> Result<CacheOptions, SettingsError> {
        let configuration = self
            .configuration
            .ok_or(SettingsError::Missing("configuration"))?;
        let instance_name = self
            .instance_name
            .ok_or(SettingsError::Missing("instance_name"))?;

        let mut options = CacheOptions::new(configuration, instance_name)
            .with_default_expiration_option(self.default_expiration_secs.map(Duration::from_secs));
        if let Some(secs) = self.stale_staging_after_secs {
            options = options.with_stale_staging_after(Duration::from_secs(secs));
        }
        if let Some(bytes) = self.max_memory_bytes {
            options = options.with_max_memory_bytes(bytes);
        }
        Ok(options)
    }
}

fn overlay_path(base: &Path, environment: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    base.with_file_name(format!("{stem}.{environment}.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_vars() -> Vec<(String, String)> {
        Vec::new()
    }

    #[test]
    fn test_layers_override_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("cache.json");
        std::fs::write(
            &base,
            r#"{"configuration": "/var/cache/app", "instance_name": "svc-a", "default_expiration_secs": 60}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("cache.production.json"),
            r#"{"default_expiration_secs": 600}"#,
        )
        .unwrap();

        let vars = vec![
            ("STREAM_CACHE_INSTANCE_NAME", "svc-b"),
            ("UNRELATED", "ignored"),
        ];
        let settings = CacheSettings::load(Some(base.as_path()), Some("production"), vars).unwrap();

        assert_eq!(settings.configuration.as_deref(), Some("/var/cache/app"));
        assert_eq!(settings.instance_name.as_deref(), Some("svc-b"));
        assert_eq!(settings.default_expiration_secs, Some(600));

        let options = settings.into_options().unwrap();
        assert_eq!(options.default_expiration, Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_missing_overlay_is_optional() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("cache.json");
        std::fs::write(&base, r#"{"configuration": "memory://"}"#).unwrap();

        let settings = CacheSettings::load(Some(base.as_path()), Some("staging"), no_vars()).unwrap();
        assert_eq!(settings.configuration.as_deref(), Some("memory://"));
    }

    #[test]
    fn test_missing_base_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = CacheSettings::load(Some(dir.path().join("absent.json").as_path()), None, no_vars())
            .unwrap_err();
        assert!(matches!(err, SettingsError::Config(_)));
    }

    #[test]
    fn test_invalid_layers_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("cache.json");
        std::fs::write(&base, r#"{"configuration": "#).unwrap();
        assert!(matches!(
            CacheSettings::load(Some(base.as_path()), None, no_vars()),
            Err(SettingsError::Config(_))
        ));

        let vars = vec![("STREAM_CACHE_DEFAULT_EXPIRATION_SECS", "soon")];
        assert!(matches!(
            CacheSettings::load(None, None, vars),
            Err(SettingsError::Config(_))
        ));
    }

    #[test]
    fn test_variables_without_files() {
        let vars = vec![
            ("STREAM_CACHE_CONFIGURATION", "memory://"),
            ("STREAM_CACHE_INSTANCE_NAME", "svc-a"),
            ("STREAM_CACHE_STALE_STAGING_AFTER_SECS", "30"),
            ("STREAM_CACHE_MAX_MEMORY_BYTES", "1024"),
        ];
        let options = CacheSettings::load(None, None, vars)
            .unwrap()
            .into_options()
            .unwrap();

        assert_eq!(options.configuration, "memory://");
        assert_eq!(options.instance_name, "svc-a");
        assert_eq!(options.stale_staging_after, Duration::from_secs(30));
        assert_eq!(options.max_memory_bytes, 1024);
        assert_eq!(options.default_expiration, None);
    }

    #[test]
    fn test_required_settings() {
        let settings = CacheSettings {
            configuration: Some("memory://".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            settings.into_options(),
            Err(SettingsError::Missing("instance_name"))
        ));
    }
}
