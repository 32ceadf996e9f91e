//! Application configuration loading for CLI defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use wgrabber::DownloadMode;

/// Longest accepted delay setting, in seconds.
const MAX_DELAY_SECS: f64 = 600.0;

/// File configuration for wgrabber defaults.
#[derive(Debug, Clone, Default)]
pub struct FileConfig {
    /// Default base folder for galleries.
    pub output_dir: Option<PathBuf>,
    /// Default download mode.
    pub mode: Option<DownloadMode>,
    /// Delete page images after archiving by default.
    pub zip_only: Option<bool>,
    /// Default number of concurrent image workers (1..=16).
    pub concurrency: Option<usize>,
    /// Floor of the adaptive request delay.
    pub min_delay_secs: Option<f64>,
    /// Cap of the adaptive request delay.
    pub max_delay_secs: Option<f64>,
    /// Starting request delay.
    pub initial_delay_secs: Option<f64>,
    /// HTTP connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// HTTP read timeout in seconds.
    pub read_timeout_secs: Option<u64>,
    /// Extra breadcrumb category mappings: `category."<label>" = "<code>"`.
    pub categories: Vec<(String, String)>,
    /// Extra breadcrumb language mappings: `language."<label>" = "<code>"`.
    pub languages: Vec<(String, String)>,
}

impl FileConfig {
    /// Validates config values against runtime and CLI constraints.
    pub fn validate(&self) -> Result<()> {
        if let Some(concurrency) = self.concurrency
            && !(1..=16).contains(&concurrency)
        {
            bail!("Invalid config value for `concurrency`: {concurrency}. Expected range: 1..=16");
        }

        validate_delay_secs("min_delay_secs", self.min_delay_secs)?;
        validate_delay_secs("max_delay_secs", self.max_delay_secs)?;
        validate_delay_secs("initial_delay_secs", self.initial_delay_secs)?;
        if let (Some(min), Some(max)) = (self.min_delay_secs, self.max_delay_secs)
            && min > max
        {
            bail!(
                "Invalid config: `min_delay_secs` ({min}) is greater than `max_delay_secs` ({max})"
            );
        }

        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("read_timeout_secs", self.read_timeout_secs)?;

        Ok(())
    }
}

fn validate_delay_secs(field: &str, value: Option<f64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(0.0..=MAX_DELAY_SECS).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 0..={MAX_DELAY_SECS}");
    }
    Ok(())
}

fn validate_timeout_secs(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed file config when a config file exists and was valid.
    pub config: Option<FileConfig>,
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/wgrabber/config.toml`
/// 2. `$HOME/.config/wgrabber/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("wgrabber")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("wgrabber")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Expands a leading `~` against `$HOME`.
#[must_use]
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match env_var_non_empty_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}

/// Loads config from default path if present.
pub fn load_default_file_config() -> Result<LoadedConfig> {
    let path = resolve_default_config_path();
    let Some(path_ref) = path.as_deref() else {
        return Ok(LoadedConfig { path, config: None });
    };

    if !path_ref.exists() {
        return Ok(LoadedConfig { path, config: None });
    }

    let config = load_file_config(path_ref)?;
    Ok(LoadedConfig {
        path,
        config: Some(config),
    })
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let line_no = line_index + 1;

        let Some((raw_key, raw_value)) = split_key_value(line) else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };

        let key = raw_key.trim();
        let value = raw_value.trim();

        if let Some(label) = key.strip_prefix("category.") {
            let label = parse_string_literal(label.trim())
                .with_context(|| format!("Invalid category label on line {line_no}"))?;
            let code = parse_string_literal(value)
                .with_context(|| format!("Invalid category code on line {line_no}"))?;
            cfg.categories.push((label, code));
            continue;
        }
        if let Some(label) = key.strip_prefix("language.") {
            let label = parse_string_literal(label.trim())
                .with_context(|| format!("Invalid language label on line {line_no}"))?;
            let code = parse_string_literal(value)
                .with_context(|| format!("Invalid language code on line {line_no}"))?;
            cfg.languages.push((label, code));
            continue;
        }

        match key {
            "output_dir" => {
                let parsed = parse_string_literal(value)
                    .with_context(|| format!("Invalid `output_dir` value on line {line_no}"))?;
                cfg.output_dir = Some(PathBuf::from(parsed));
            }
            "mode" => {
                let parsed = parse_string_literal(value)
                    .with_context(|| format!("Invalid `mode` value on line {line_no}"))?;
                cfg.mode = Some(
                    parsed
                        .parse()
                        .with_context(|| format!("Invalid `mode` value on line {line_no}"))?,
                );
            }
            "zip_only" => {
                let parsed = parse_boolean(value)
                    .with_context(|| format!("Invalid `zip_only` value on line {line_no}"))?;
                cfg.zip_only = Some(parsed);
            }
            "concurrency" => {
                let parsed = parse_integer_u64(value)
                    .with_context(|| format!("Invalid `concurrency` value on line {line_no}"))?;
                let n = usize::try_from(parsed)
                    .map_err(|_| anyhow::anyhow!("concurrency out of range"))?;
                cfg.concurrency = Some(n);
            }
            "min_delay_secs" => {
                let parsed = parse_seconds(value)
                    .with_context(|| format!("Invalid `min_delay_secs` value on line {line_no}"))?;
                cfg.min_delay_secs = Some(parsed);
            }
            "max_delay_secs" => {
                let parsed = parse_seconds(value)
                    .with_context(|| format!("Invalid `max_delay_secs` value on line {line_no}"))?;
                cfg.max_delay_secs = Some(parsed);
            }
            "initial_delay_secs" => {
                let parsed = parse_seconds(value).with_context(|| {
                    format!("Invalid `initial_delay_secs` value on line {line_no}")
                })?;
                cfg.initial_delay_secs = Some(parsed);
            }
            "connect_timeout_secs" => {
                let parsed = parse_integer_u64(value).with_context(|| {
                    format!("Invalid `connect_timeout_secs` value on line {line_no}")
                })?;
                cfg.connect_timeout_secs = Some(parsed);
            }
            "read_timeout_secs" => {
                let parsed = parse_integer_u64(value).with_context(|| {
                    format!("Invalid `read_timeout_secs` value on line {line_no}")
                })?;
                cfg.read_timeout_secs = Some(parsed);
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_no}");
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

/// Splits on the first `=` outside a quoted key segment.
fn split_key_value(line: &str) -> Option<(&str, &str)> {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '=' if !in_string => return Some((&line[..index], &line[index + 1..])),
            _ => {}
        }
    }
    None
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_seconds(raw_value: &str) -> Result<f64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected number of seconds");
    }
    let value = token.parse::<f64>()?;
    if !value.is_finite() || value < 0.0 {
        bail!("Expected a non-negative number of seconds");
    }
    Ok(value)
}

fn parse_boolean(raw_value: &str) -> Result<bool> {
    match raw_value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => bail!("Expected 'true' or 'false'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_partial_fields() {
        let cfg = parse_config_str(
            r#"
concurrency = 2
mode = "normal"
"#,
        )
        .expect("partial config should parse");
        assert_eq!(cfg.concurrency, Some(2));
        assert_eq!(cfg.mode, Some(DownloadMode::Normal));
        assert!(cfg.output_dir.is_none());
        assert!(cfg.zip_only.is_none());
    }

    #[test]
    fn test_parse_config_all_scalar_fields() {
        let cfg = parse_config_str(
            r#"
output_dir = "/srv/manga"
zip_only = true
min_delay_secs = 1.5
max_delay_secs = 20
initial_delay_secs = 4
connect_timeout_secs = 15
read_timeout_secs = 90
"#,
        )
        .expect("full config should parse");
        assert_eq!(cfg.output_dir, Some(PathBuf::from("/srv/manga")));
        assert_eq!(cfg.zip_only, Some(true));
        assert_eq!(cfg.min_delay_secs, Some(1.5));
        assert_eq!(cfg.max_delay_secs, Some(20.0));
        assert_eq!(cfg.initial_delay_secs, Some(4.0));
        assert_eq!(cfg.connect_timeout_secs, Some(15));
        assert_eq!(cfg.read_timeout_secs, Some(90));
    }

    #[test]
    fn test_parse_config_rejects_invalid_concurrency() {
        let err = parse_config_str("concurrency = 0").expect_err("invalid concurrency expected");
        assert!(err.to_string().contains("concurrency"));
        let err = parse_config_str("concurrency = 17").expect_err("too many workers");
        assert!(err.to_string().contains("1..=16"));
    }

    #[test]
    fn test_parse_config_rejects_numeric_values_with_trailing_tokens() {
        let err = parse_config_str("concurrency = 4 trailing")
            .expect_err("expected trailing token error");
        assert!(err.to_string().contains("concurrency"));
    }

    #[test]
    fn test_parse_config_rejects_unknown_mode() {
        let err = parse_config_str(r#"mode = "fast""#).expect_err("unknown mode expected");
        assert!(err.to_string().contains("mode"));
    }

    #[test]
    fn test_parse_config_rejects_inverted_delay_bounds() {
        let err = parse_config_str("min_delay_secs = 10\nmax_delay_secs = 5")
            .expect_err("inverted bounds expected");
        assert!(err.to_string().contains("min_delay_secs"));
    }

    #[test]
    fn test_parse_config_rejects_negative_delay() {
        let err = parse_config_str("min_delay_secs = -1").expect_err("negative delay expected");
        assert!(err.to_string().contains("min_delay_secs"));
    }

    #[test]
    fn test_parse_config_supports_inline_comments() {
        let cfg = parse_config_str(
            r#"
concurrency = 3 # workers
output_dir = "/tmp/#hash" # quoted hash is kept
"#,
        )
        .expect("config with comments should parse");
        assert_eq!(cfg.concurrency, Some(3));
        assert_eq!(cfg.output_dir, Some(PathBuf::from("/tmp/#hash")));
    }

    #[test]
    fn test_parse_config_taxonomy_entries() {
        let cfg = parse_config_str(
            r#"
category."新分類" = "new"
language."繁體" = "TW"
"#,
        )
        .expect("taxonomy entries should parse");
        assert_eq!(cfg.categories, vec![("新分類".to_string(), "new".to_string())]);
        assert_eq!(cfg.languages, vec![("繁體".to_string(), "TW".to_string())]);
    }

    #[test]
    fn test_parse_config_taxonomy_label_may_contain_equals() {
        let cfg = parse_config_str(r#"category."a=b" = "ab""#).expect("quoted = in label");
        assert_eq!(cfg.categories, vec![("a=b".to_string(), "ab".to_string())]);
    }

    #[test]
    fn test_parse_config_rejects_invalid_boolean() {
        let err = parse_config_str("zip_only = yes").expect_err("invalid boolean expected");
        assert!(err.to_string().contains("zip_only"));
    }

    #[test]
    fn test_parse_config_rejects_invalid_timeout_value() {
        let err =
            parse_config_str("connect_timeout_secs = 0").expect_err("invalid timeout expected");
        assert!(err.to_string().contains("connect_timeout_secs"));
    }

    #[test]
    fn test_parse_config_rejects_unknown_keys() {
        let err = parse_config_str("unknown_key = 123").expect_err("unknown key error expected");
        assert!(err.to_string().contains("Unknown configuration key"));
        assert!(err.to_string().contains("unknown_key"));
    }

    #[test]
    fn test_parse_config_rejects_missing_equals() {
        let err = parse_config_str("zip_only true").expect_err("syntax error expected");
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_expand_home_leaves_other_paths() {
        assert_eq!(expand_home(Path::new("/abs/dir")), PathBuf::from("/abs/dir"));
        assert_eq!(expand_home(Path::new("rel/dir")), PathBuf::from("rel/dir"));
    }
}
