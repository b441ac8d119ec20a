//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `RELAY_CONFIG`
//! environment variable. A missing file is not an error: every field has a default.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `RELAY_` override YAML values
//! 3. **Operator variables** - `FLOW_URL`, `SMTP_USER`, `SMTP_PASS`, `MAIL_TO` and `MAIL_CC`
//!    map onto `webhook.url`, `email.username`, `email.password`, `email.to` and `email.cc`
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `RELAY_EMAIL__TRANSPORT__PORT=2525` sets the `email.transport.port` field.
//!
//! The operator variables are optional at load time. Whether they are present is checked on
//! every upload against the configured [`DeliveryMode`], so a misconfigured deployment still
//! answers preflight and health requests and reports the missing variable to the form.
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! # Relay submissions by email instead of the default webhook
//! RELAY_DELIVERY=email
//! SMTP_USER=onboarding@example.com
//! SMTP_PASS=secret
//! MAIL_TO=agence@example.com,backoffice@example.com
//!
//! # Override server port
//! RELAY_PORT=8080
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::errors::Error;

/// 18 MiB, the largest attachment set the Office 365 relay reliably accepts.
pub const DEFAULT_MAX_ATTACHMENT_BYTES: u64 = 18 * 1024 * 1024;

/// Operator variables and the config key each one sets.
const OPERATOR_VARIABLES: &[(&str, &str)] = &[
    ("FLOW_URL", "webhook.url"),
    ("SMTP_USER", "email.username"),
    ("SMTP_PASS", "email.password"),
    ("MAIL_TO", "email.to"),
    ("MAIL_CC", "email.cc"),
];

/// Free-text keys. Their `RELAY_` values are kept as written, so `[TEST]` stays a string
/// instead of becoming an array and `0755` stays a string instead of becoming a number.
const TEXT_KEYS: &[&str] = &[
    "host",
    "upload_path",
    "webhook.url",
    "email.username",
    "email.password",
    "email.to",
    "email.cc",
    "email.subject_prefix",
    "email.transport.host",
    "email.transport.path",
];

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "RELAY_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Path the onboarding form posts to
    pub upload_path: String,
    /// Where submissions are relayed
    pub delivery: DeliveryMode,
    /// Resource limits for a single submission
    pub limits: LimitsConfig,
    /// Webhook delivery settings
    pub webhook: WebhookConfig,
    /// Email delivery settings
    pub email: EmailConfig,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

/// Which variant of the upload endpoint is deployed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// POST the submission as JSON to `FLOW_URL`
    #[default]
    Webhook,
    /// Send the submission by email with the files attached
    Email,
    /// Answer every request with a liveness payload, without reading the body
    Liveness,
}

impl std::fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryMode::Webhook => write!(f, "webhook"),
            DeliveryMode::Email => write!(f, "email"),
            DeliveryMode::Liveness => write!(f, "liveness"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Ceiling on the summed size of all attachments in one submission (default: 18 MiB)
    pub max_attachment_bytes: u64,
    /// Ceiling on the whole multipart stream, fields and boundaries included (default: 32 MiB)
    pub max_body_size: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_attachment_bytes: DEFAULT_MAX_ATTACHMENT_BYTES,
            max_body_size: 32 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct WebhookConfig {
    /// Workflow endpoint receiving the JSON payload (`FLOW_URL`); blank counts as unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Overall timeout for the webhook call; unset leaves the HTTP client default
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl WebhookConfig {
    /// The webhook URL, or the error reported to the form when it is absent or blank.
    pub fn target(&self) -> Result<Url, Error> {
        let raw = self
            .url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or(Error::MissingConfig { variable: "FLOW_URL" })?;

        Url::parse(raw).map_err(|e| Error::Internal {
            operation: format!("parse FLOW_URL: {e}"),
        })
    }
}

/// Email configuration for relaying submissions over SMTP.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmailConfig {
    /// Email transport method
    pub transport: EmailTransportConfig,
    /// SMTP login, also used as the sender address (`SMTP_USER`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// SMTP password (`SMTP_PASS`)
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Comma-separated recipients (`MAIL_TO`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Comma-separated carbon-copy recipients (`MAIL_CC`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cc: Option<String>,
    /// Text placed before the client name in the subject line
    pub subject_prefix: String,
    /// Attachment groups counted in the email body, keyed by field-name prefix
    pub attachment_groups: Vec<AttachmentGroup>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            transport: EmailTransportConfig::default(),
            username: None,
            password: None,
            to: None,
            cc: None,
            subject_prefix: "[ONBOARDING]".to_string(),
            attachment_groups: vec![
                AttachmentGroup {
                    prefix: "degat_".to_string(),
                    label: "Photos dégâts".to_string(),
                },
                AttachmentGroup {
                    prefix: "hors_sinistre_".to_string(),
                    label: "Photos hors sinistre".to_string(),
                },
            ],
        }
    }
}

/// Operator settings that must all be present before an email can be sent.
#[derive(Debug, Clone, Copy)]
pub struct SmtpCredentials<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub to: &'a str,
    pub cc: Option<&'a str>,
}

impl EmailConfig {
    /// Resolves the operator settings, naming the first missing variable.
    pub fn credentials(&self) -> Result<SmtpCredentials<'_>, Error> {
        fn present(value: &Option<String>) -> Option<&str> {
            value.as_deref().map(str::trim).filter(|v| !v.is_empty())
        }

        let username = present(&self.username).ok_or(Error::MissingConfig { variable: "SMTP_USER" })?;
        let password = present(&self.password).ok_or(Error::MissingConfig { variable: "SMTP_PASS" })?;
        let to = present(&self.to).ok_or(Error::MissingConfig { variable: "MAIL_TO" })?;

        Ok(SmtpCredentials {
            username,
            password,
            to,
            cc: present(&self.cc),
        })
    }
}

/// Email transport configuration - either SMTP or file-based for testing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EmailTransportConfig {
    /// Send emails via SMTP server
    Smtp {
        /// SMTP server hostname
        host: String,
        /// SMTP server port
        port: u16,
        /// Upgrade the connection with STARTTLS
        use_tls: bool,
    },
    /// Write emails to files (for development/testing)
    File {
        /// Directory path where email files will be written
        path: String,
    },
}

impl Default for EmailTransportConfig {
    fn default() -> Self {
        EmailTransportConfig::Smtp {
            host: "smtp.office365.com".to_string(),
            port: 587,
            use_tls: true,
        }
    }
}

/// Files whose field name starts with `prefix` are counted under `label`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AttachmentGroup {
    pub prefix: String,
    pub label: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7071,
            upload_path: "/api/upload".to_string(),
            delivery: DeliveryMode::default(),
            limits: LimitsConfig::default(),
            webhook: WebhookConfig::default(),
            email: EmailConfig::default(),
            enable_otel_export: false,
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency
    pub fn validate(&self) -> Result<(), Error> {
        if !self.upload_path.starts_with('/') {
            return Err(Error::Internal {
                operation: format!("Config validation: upload_path must start with '/', got '{}'", self.upload_path),
            });
        }

        if self.limits.max_attachment_bytes == 0 {
            return Err(Error::Internal {
                operation: "Config validation: limits.max_attachment_bytes must be greater than zero".to_string(),
            });
        }

        if self.limits.max_attachment_bytes > self.limits.max_body_size {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: limits.max_attachment_bytes ({}) cannot be greater than limits.max_body_size ({})",
                    self.limits.max_attachment_bytes, self.limits.max_body_size
                ),
            });
        }

        // A malformed FLOW_URL is caught here; an absent one only fails the upload
        if let Err(e @ Error::Internal { .. }) = self.webhook.target() {
            return Err(Error::Internal {
                operation: format!("Config validation: {e}"),
            });
        }

        if let Some(group) = self.email.attachment_groups.iter().find(|g| g.prefix.is_empty()) {
            return Err(Error::Internal {
                operation: format!("Config validation: attachment group '{}' has an empty prefix", group.label),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        let figment = Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // RELAY_CONFIG names the file itself and is not a config key
            .merge(
                Env::prefixed("RELAY_")
                    .filter(|key| !key.as_str().eq_ignore_ascii_case("config"))
                    .split("__"),
            );

        // Re-apply free-text keys unparsed over the typed values above
        let figment = merge_verbatim(
            figment,
            Env::prefixed("RELAY_")
                .split("__")
                .filter(|key| TEXT_KEYS.iter().any(|text| key.as_str().eq_ignore_ascii_case(text))),
        );

        // Operator variables keep their historical names
        OPERATOR_VARIABLES.iter().fold(figment, |figment, (variable, key)| {
            merge_verbatim(figment, Env::raw().only(&[*variable]).map(move |_| (*key).into()))
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Merges every variable `env` selects as a plain string, bypassing figment's value parsing.
fn merge_verbatim(figment: Figment, env: Env) -> Figment {
    env.iter()
        .fold(figment, |figment, (key, value)| figment.merge(Serialized::default(key.as_str(), value)))
}
