//! Test utilities shared by the handler, email and webhook tests.

use std::path::{Path, PathBuf};

use axum_test::TestServer;

use crate::config::{Config, DeliveryMode, EmailTransportConfig};
use crate::submission::{Attachment, Submission};

/// A configuration with every operator variable set, except `FLOW_URL` which tests point at
/// their own mock server. Emails go to a per-process temp directory.
pub fn create_test_config() -> Config {
    let temp_dir = std::env::temp_dir().join(format!("onboarding-relay-test-emails-{}", std::process::id()));

    let mut config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        delivery: DeliveryMode::Webhook,
        ..Default::default()
    };
    config.email.transport = EmailTransportConfig::File {
        path: temp_dir.display().to_string(),
    };
    config.email.username = Some("relay@example.com".to_string());
    config.email.password = Some("test-password".to_string());
    config.email.to = Some("agence@example.com, backoffice@example.com".to_string());
    config.email.cc = Some("copie@example.com".to_string());
    config
}

pub fn test_http_client() -> reqwest::Client {
    crate::install_crypto_provider();
    reqwest::Client::new()
}

pub fn create_test_server(config: Config) -> TestServer {
    crate::install_crypto_provider();
    crate::Application::new(config)
        .expect("Failed to create application")
        .into_test_server()
}

pub fn submission_with(fields: &[(&str, &str)], files: Vec<Attachment>) -> Submission {
    Submission {
        fields: fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        files,
    }
}

/// `.eml` files written by the file transport into `dir`.
pub fn eml_files(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| path.extension().is_some_and(|ext| ext == "eml"))
                .collect()
        })
        .unwrap_or_default()
}
