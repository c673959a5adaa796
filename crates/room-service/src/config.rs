//! Room service configuration.
//!
//! Configuration is loaded from environment variables. Backend shared
//! secrets are redacted in Debug output.

use crate::crypto::{DEFAULT_BCRYPT_COST, MAX_BCRYPT_COST, MIN_BCRYPT_COST};
use crate::model::{
    ConversationType, Listable, LobbyState, MentionPermissions, Permissions, ReadOnlyState,
    RecordingConsent, SipState,
};
use crate::presets::{DefaultPreset, ForcedPreset, PermissionOverride, PresetConfig};
use common::config::ObservabilityConfig;
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Prefix of every room service variable.
pub const ENV_PREFIX: &str = "RS";

/// Default bind address for health, metrics and monitoring.
pub const DEFAULT_HTTP_BIND_ADDRESS: &str = "0.0.0.0:8090";

/// Default backend request timeout in seconds.
pub const DEFAULT_BACKEND_TIMEOUT_SECONDS: u64 = 10;

/// Default session sweep interval in seconds.
pub const DEFAULT_SESSION_SWEEP_INTERVAL_SECONDS: u64 = 30;

/// One configured backend: the first server of the list and its secret.
#[derive(Clone)]
pub struct BackendEndpoint {
    pub server: String,
    pub secret: SecretString,
}

impl fmt::Debug for BackendEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendEndpoint")
            .field("server", &self.server)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Room service configuration.
#[derive(Clone)]
pub struct Config {
    /// Local server URL, sent as the `*-Backend` header and as the
    /// federation `remoteServerUrl`.
    pub server_url: String,

    /// Health, metrics and monitoring bind address (default: "0.0.0.0:8090").
    pub http_bind_address: String,

    /// Signaling server, if configured.
    pub signaling: Option<BackendEndpoint>,

    /// Recording server, if configured.
    pub recording: Option<BackendEndpoint>,

    /// Send federation notifications to remote servers (default: false).
    pub federation_enabled: bool,

    pub backend_timeout: Duration,

    pub session_sweep_interval: Duration,

    /// Server-wide default permissions; `DEFAULT` means all.
    pub default_permissions: Permissions,

    /// Read privacy of new attendees.
    pub default_read_privacy: bool,

    /// bcrypt cost for conversation passwords.
    pub password_hash_cost: u32,

    pub presets: PresetConfig,

    pub observability: ObservabilityConfig,
}

/// Custom Debug implementation that redacts backend secrets.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("server_url", &self.server_url)
            .field("http_bind_address", &self.http_bind_address)
            .field("signaling", &self.signaling)
            .field("recording", &self.recording)
            .field("federation_enabled", &self.federation_enabled)
            .field("backend_timeout", &self.backend_timeout)
            .field("session_sweep_interval", &self.session_sweep_interval)
            .field("default_permissions", &self.default_permissions)
            .field("default_read_privacy", &self.default_read_privacy)
            .field("password_hash_cost", &self.password_hash_cost)
            .field("presets", &self.presets)
            .field("observability", &self.observability)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// See [`Config::from_vars`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// `MissingEnvVar` when `RS_SERVER_URL` is unset, or a backend server
    /// list is set without its secret. `InvalidValue` for any value that
    /// does not parse or is out of range.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let server_url = vars
            .get("RS_SERVER_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("RS_SERVER_URL".to_string()))?
            .clone();

        let http_bind_address = vars
            .get("RS_HTTP_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HTTP_BIND_ADDRESS.to_string());

        let signaling = backend_endpoint(vars, "RS_SIGNALING_SERVERS", "RS_SIGNALING_SECRET")?;
        let recording = backend_endpoint(vars, "RS_RECORDING_SERVERS", "RS_RECORDING_SECRET")?;

        let federation_enabled = parse_bool(vars, "RS_FEDERATION_ENABLED")?.unwrap_or(false);

        let backend_timeout_seconds: u64 =
            parse(vars, "RS_BACKEND_TIMEOUT_SECONDS")?.unwrap_or(DEFAULT_BACKEND_TIMEOUT_SECONDS);
        if backend_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "RS_BACKEND_TIMEOUT_SECONDS must be greater than 0".to_string(),
            ));
        }

        let sweep_interval_seconds: u64 = parse(vars, "RS_SESSION_SWEEP_INTERVAL_SECONDS")?
            .unwrap_or(DEFAULT_SESSION_SWEEP_INTERVAL_SECONDS);
        if sweep_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "RS_SESSION_SWEEP_INTERVAL_SECONDS must be greater than 0".to_string(),
            ));
        }

        let default_permissions = parse::<u16>(vars, "RS_DEFAULT_PERMISSIONS")?
            .map_or(Permissions::DEFAULT, Permissions::from_bits_truncate);

        let default_read_privacy = match parse::<u8>(vars, "RS_DEFAULT_READ_PRIVACY")? {
            None | Some(0) => false,
            Some(1) => true,
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "RS_DEFAULT_READ_PRIVACY must be 0 or 1, got {other}"
                )))
            }
        };

        let password_hash_cost =
            parse(vars, "RS_PASSWORD_HASH_COST")?.unwrap_or(DEFAULT_BCRYPT_COST);
        if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&password_hash_cost) {
            return Err(ConfigError::InvalidValue(format!(
                "RS_PASSWORD_HASH_COST must be {MIN_BCRYPT_COST}-{MAX_BCRYPT_COST}, got {password_hash_cost}"
            )));
        }

        let presets = PresetConfig {
            defaults: default_preset(vars)?,
            forced: forced_preset(vars)?,
        };

        Ok(Config {
            server_url,
            http_bind_address,
            signaling,
            recording,
            federation_enabled,
            backend_timeout: Duration::from_secs(backend_timeout_seconds),
            session_sweep_interval: Duration::from_secs(sweep_interval_seconds),
            default_permissions,
            default_read_privacy,
            password_hash_cost,
            presets,
            observability: ObservabilityConfig::from_vars(ENV_PREFIX, vars),
        })
    }
}

fn parse<T: FromStr>(vars: &HashMap<String, String>, name: &str) -> Result<Option<T>, ConfigError> {
    vars.get(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(format!("{name}: '{raw}'")))
        })
        .transpose()
}

fn parse_bool(vars: &HashMap<String, String>, name: &str) -> Result<Option<bool>, ConfigError> {
    vars.get(name)
        .map(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(ConfigError::InvalidValue(format!("{name}: '{raw}'"))),
        })
        .transpose()
}

/// Parse an integer-coded room setting.
fn parse_code<T>(
    vars: &HashMap<String, String>,
    name: &str,
    from_int: fn(i64) -> Option<T>,
) -> Result<Option<T>, ConfigError> {
    parse::<i64>(vars, name)?
        .map(|code| {
            from_int(code).ok_or_else(|| ConfigError::InvalidValue(format!("{name}: unknown value {code}")))
        })
        .transpose()
}

/// First server of a comma separated list, with its required secret.
fn backend_endpoint(
    vars: &HashMap<String, String>,
    servers_var: &str,
    secret_var: &str,
) -> Result<Option<BackendEndpoint>, ConfigError> {
    let Some(server) = vars
        .get(servers_var)
        .and_then(|list| list.split(',').map(str::trim).find(|s| !s.is_empty()))
    else {
        return Ok(None);
    };
    let secret = vars
        .get(secret_var)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(secret_var.to_string()))?;
    Ok(Some(BackendEndpoint {
        server: server.to_string(),
        secret: SecretString::from(secret.clone()),
    }))
}

fn default_preset(vars: &HashMap<String, String>) -> Result<DefaultPreset, ConfigError> {
    Ok(DefaultPreset {
        room_type: parse_code(vars, "RS_PRESET_DEFAULT_TYPE", ConversationType::from_int)?,
        read_only: parse_code(vars, "RS_PRESET_DEFAULT_READ_ONLY", ReadOnlyState::from_int)?,
        lobby: parse_code(vars, "RS_PRESET_DEFAULT_LOBBY", LobbyState::from_int)?,
        recording_consent: parse_code(
            vars,
            "RS_PRESET_DEFAULT_RECORDING_CONSENT",
            RecordingConsent::from_int,
        )?,
        listable: parse_code(vars, "RS_PRESET_DEFAULT_LISTABLE", Listable::from_int)?,
        message_expiration: parse(vars, "RS_PRESET_DEFAULT_MESSAGE_EXPIRATION")?,
        sip: parse_code(vars, "RS_PRESET_DEFAULT_SIP_ENABLED", SipState::from_int)?,
        permissions: parse::<u16>(vars, "RS_PRESET_DEFAULT_PERMISSIONS")?
            .map(Permissions::from_bits_truncate),
        mention_permissions: parse_code(
            vars,
            "RS_PRESET_DEFAULT_MENTION_PERMISSIONS",
            MentionPermissions::from_int,
        )?,
    })
}

fn forced_preset(vars: &HashMap<String, String>) -> Result<ForcedPreset, ConfigError> {
    for name in ["TYPE", "READ_ONLY", "LOBBY", "RECORDING_CONSENT"] {
        let var = format!("RS_PRESET_FORCE_{name}");
        if vars.contains_key(&var) {
            return Err(ConfigError::InvalidValue(format!("{var}: this setting cannot be forced")));
        }
    }

    let permissions = vars
        .get("RS_PRESET_FORCE_PERMISSIONS")
        .map(|raw| {
            PermissionOverride::parse(raw)
                .map_err(|e| ConfigError::InvalidValue(format!("RS_PRESET_FORCE_PERMISSIONS: {e}")))
        })
        .transpose()?;

    Ok(ForcedPreset {
        listable: parse_code(vars, "RS_PRESET_FORCE_LISTABLE", Listable::from_int)?,
        message_expiration: parse(vars, "RS_PRESET_FORCE_MESSAGE_EXPIRATION")?,
        sip: parse_code(vars, "RS_PRESET_FORCE_SIP_ENABLED", SipState::from_int)?,
        permissions,
        mention_permissions: parse_code(
            vars,
            "RS_PRESET_FORCE_MENTION_PERMISSIONS",
            MentionPermissions::from_int,
        )?,
    })
}
