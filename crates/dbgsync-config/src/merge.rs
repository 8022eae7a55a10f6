use crate::config::Config;
use crate::error::ConfigError;

/// Merge an overlay TOML fragment on top of a base [`Config`].
///
/// Keys present in `overlay_toml` win; everything else keeps its `base`
/// value. Both sides go through [`toml::Value`] so nested tables merge
/// key by key.
pub fn merge_configs(base: &Config, overlay_toml: &str) -> Result<Config, ConfigError> {
    let base_str = toml::to_string(base).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let mut base_val: toml::Value =
        toml::from_str(&base_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let overlay_val: toml::Value =
        toml::from_str(overlay_toml).map_err(|e| ConfigError::Parse(e.to_string()))?;

    merge_values(&mut base_val, &overlay_val);

    base_val
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Parse(e.to_string()))
}

fn merge_values(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, val) in overlay_table {
                match base_table.get_mut(key) {
                    Some(base_val) => merge_values(base_val, val),
                    None => {
                        base_table.insert(key.clone(), val.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncModeSetting;
    use std::path::PathBuf;

    #[test]
    fn merge_empty_overlay_returns_base() {
        let base = Config::default();
        assert_eq!(merge_configs(&base, "").unwrap(), base);
    }

    #[test]
    fn merge_overrides_one_key_in_a_section() {
        let mut base = Config::default();
        base.breakpoints.allow_pending = false;
        let merged = merge_configs(&base, "[breakpoints]\nsync_mode = \"manual\"\n").unwrap();
        assert_eq!(merged.breakpoints.sync_mode, SyncModeSetting::Manual);
        assert!(!merged.breakpoints.allow_pending);
        assert_eq!(merged.session, base.session);
    }

    #[test]
    fn merge_adds_missing_optional_field() {
        let base = Config::default();
        let merged = merge_configs(&base, "[log]\nfile = \"/var/log/dbgsync.log\"\n").unwrap();
        assert_eq!(merged.log.file, Some(PathBuf::from("/var/log/dbgsync.log")));
    }

    #[test]
    fn merge_wrong_type_is_parse_error() {
        let base = Config::default();
        let err = merge_configs(&base, "[session]\nquery_timeout_ms = \"soon\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn merge_invalid_overlay_returns_parse_error() {
        assert!(merge_configs(&Config::default(), "{{invalid}}").is_err());
    }
}
