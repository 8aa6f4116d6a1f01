#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};
use tracing::debug;

pub const DEFAULT_PROPERTIES_PATH: &str = "subchecker.properties";
pub const PROPERTIES_PATH_ENV: &str = "SUBCHECKER_PROPERTIES_FILE";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_API_BASE: &str = "https://api.twitch.tv";

/// A setting that can come from the environment or from the properties file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Setting {
    pub env: &'static str,
    pub property: &'static str,
}

pub const CLIENT_ID: Setting = Setting {
    env: "SUBCHECKER_TWITCH_APP_CLIENT_ID",
    property: "twitch.app.client_id",
};
pub const CLIENT_SECRET: Setting = Setting {
    env: "SUBCHECKER_TWITCH_APP_CLIENT_SECRET",
    property: "twitch.app.client_secret",
};
pub const REDIRECT_URI: Setting = Setting {
    env: "SUBCHECKER_TWITCH_APP_REDIRECT_URI",
    property: "twitch.app.redirect_uri",
};
pub const CHANNEL_NAME: Setting = Setting {
    env: "SUBCHECKER_TWITCH_CHANNEL_NAME",
    property: "twitch.channel_name",
};
pub const SUCCESS_REDIRECT_URL: Setting = Setting {
    env: "SUBCHECKER_ON_SUCCESS_REDIRECT_URL",
    property: "on_success_redirect_url",
};
pub const SUCCESS_MODE: Setting = Setting {
    env: "SUBCHECKER_ON_SUCCESS_MODE",
    property: "on_success_mode",
};
pub const HOST: Setting = Setting {
    env: "SUBCHECKER_HOST",
    property: "server.host",
};
pub const PORT: Setting = Setting {
    env: "SUBCHECKER_PORT",
    property: "server.port",
};
pub const API_BASE: Setting = Setting {
    env: "SUBCHECKER_TWITCH_API_BASE",
    property: "twitch.api_base",
};

/// What the service answers with once a subscription has been confirmed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SuccessMode {
    #[default]
    Redirect,
    Report,
}

impl SuccessMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "redirect" => Some(Self::Redirect),
            "report" | "page" | "debug" => Some(Self::Report),
            _ => None,
        }
    }
}

/// Per-request application settings. Values may be blank; the pipeline
/// validates them before issuing any outbound call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub channel_name: String,
    pub success_redirect_url: String,
    pub success_mode: SuccessMode,
}

impl AppConfig {
    /// Environment variable names of every required setting that is blank.
    pub fn missing_settings(&self) -> Vec<&'static str> {
        [
            (CLIENT_ID, &self.client_id),
            (CLIENT_SECRET, &self.client_secret),
            (REDIRECT_URI, &self.redirect_uri),
            (CHANNEL_NAME, &self.channel_name),
            (SUCCESS_REDIRECT_URL, &self.success_redirect_url),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(setting, _)| setting.env)
        .collect()
    }
}

/// Reads the properties file and the process environment. Called once per
/// incoming request so edits to either source apply without a restart.
pub fn load_app_config(properties_path: &Path) -> Result<AppConfig> {
    let properties = read_properties_file(properties_path)?;
    Ok(build_app_config(&properties, env_var_string))
}

pub fn build_app_config(
    properties: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> AppConfig {
    let value =
        |setting: Setting| lookup_setting(setting, properties, &env_lookup).unwrap_or_default();
    let success_mode = lookup_setting(SUCCESS_MODE, properties, &env_lookup)
        .as_deref()
        .and_then(SuccessMode::parse)
        .unwrap_or_default();
    AppConfig {
        client_id: value(CLIENT_ID),
        client_secret: value(CLIENT_SECRET),
        redirect_uri: value(REDIRECT_URI),
        channel_name: value(CHANNEL_NAME),
        success_redirect_url: value(SUCCESS_REDIRECT_URL),
        success_mode,
    }
}

/// Listener and upstream settings, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub api_base: String,
    pub properties_path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub api_base: Option<String>,
    pub properties_path: Option<PathBuf>,
}

pub fn resolve_server_settings(overrides: ServerOverrides) -> Result<ServerSettings> {
    let properties_path = overrides
        .properties_path
        .clone()
        .or_else(|| env_var_string(PROPERTIES_PATH_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PROPERTIES_PATH));
    let properties = read_properties_file(&properties_path)?;
    Ok(build_server_settings(
        &properties,
        env_var_string,
        ServerOverrides {
            properties_path: Some(properties_path),
            ..overrides
        },
    ))
}

fn build_server_settings(
    properties: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: ServerOverrides,
) -> ServerSettings {
    let host = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup_setting(HOST, properties, &env_lookup))
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = overrides
        .port
        .or_else(|| {
            lookup_setting(PORT, properties, &env_lookup)
                .and_then(|value| value.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_PORT);
    let api_base = overrides
        .api_base
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup_setting(API_BASE, properties, &env_lookup))
        .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
    ServerSettings {
        host,
        port,
        api_base: api_base.trim_end_matches('/').to_string(),
        properties_path: overrides
            .properties_path
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PROPERTIES_PATH)),
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Environment wins when non-blank, otherwise the properties value. Blank
/// properties values count as unset.
fn lookup_setting(
    setting: Setting,
    properties: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    if let Some(value) = env_lookup(setting.env).filter(|value| !value.trim().is_empty()) {
        debug!(setting = setting.env, source = "environment", "resolved setting");
        return Some(value);
    }
    match properties
        .get(setting.property)
        .filter(|value| !value.trim().is_empty())
    {
        Some(value) => {
            debug!(setting = setting.property, source = "properties", "resolved setting");
            Some(value.clone())
        }
        None => {
            debug!(setting = setting.env, source = "unset", "resolved setting");
            None
        }
    }
}

/// Parses a Java-style properties file. A missing file yields an empty set.
pub fn read_properties_file(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    Ok(parse_properties(&content))
}

/// Parses `.properties` text the way `java.util.Properties` loads it: a line
/// continues only when it ends in an odd run of backslashes, and escapes are
/// decoded in both keys and values.
pub fn parse_properties(content: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    let mut logical = String::new();
    let mut continuing = false;
    for line in content.lines() {
        let line = trim_line_end(line.trim_start());
        if !continuing && (line.is_empty() || line.starts_with('#') || line.starts_with('!')) {
            continue;
        }
        if trailing_backslashes(line) % 2 == 1 {
            logical.push_str(&line[..line.len() - 1]);
            continuing = true;
            continue;
        }
        logical.push_str(line);
        continuing = false;
        insert_property(&mut vars, &std::mem::take(&mut logical));
    }
    if !logical.is_empty() {
        insert_property(&mut vars, &logical);
    }
    vars
}

fn trailing_backslashes(line: &str) -> usize {
    line.bytes().rev().take_while(|byte| *byte == b'\\').count()
}

/// Trims trailing whitespace unless the last blank is escaped (`\ `).
fn trim_line_end(line: &str) -> &str {
    let trimmed = line.trim_end();
    if trimmed.len() < line.len() && trailing_backslashes(trimmed) % 2 == 1 {
        let kept = line[trimmed.len()..]
            .chars()
            .next()
            .map_or(0, char::len_utf8);
        return &line[..trimmed.len() + kept];
    }
    trimmed
}

fn insert_property(vars: &mut HashMap<String, String>, line: &str) {
    let (key, value) = split_key_value(line);
    if key.is_empty() {
        return;
    }
    vars.insert(unescape(key), unescape(value));
}

/// The key ends at the first unescaped `=`, `:` or blank.
fn split_key_value(line: &str) -> (&str, &str) {
    let mut escaped = false;
    for (index, ch) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '=' | ':' => return (&line[..index], line[index + 1..].trim_start()),
            ' ' | '\t' | '\x0c' => {
                let rest = line[index..].trim_start();
                let rest = rest.strip_prefix(['=', ':']).unwrap_or(rest);
                return (&line[..index], rest.trim_start());
            }
            _ => {}
        }
    }
    (line, "")
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\x0c'),
            Some('u') => {
                let hex: String = chars.clone().take(4).collect();
                match decode_unicode_escape(&hex) {
                    Some(decoded) => {
                        out.push(decoded);
                        chars.nth(3);
                    }
                    // Malformed escapes stay as written.
                    None => out.push_str("\\u"),
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn decode_unicode_escape(hex: &str) -> Option<char> {
    if hex.len() != 4 || !hex.bytes().all(|byte| byte.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
}
