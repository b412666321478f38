use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::net::SocketAddr;

// Ingress configuration sourced from environment variables, with an
// optional YAML file overriding individual keys.
#[derive(Debug, Clone)]
pub struct IngressConfig {
    // WebSocket listener bind host.
    pub host: String,
    // WebSocket listener bind port.
    pub port: u16,
    // Server certificate chain (PEM).
    pub tls_cert: String,
    // Server private key (PEM).
    pub tls_key: String,
    // CA bundle for verifying client certificates; optional because
    // pass-through deployments terminate mTLS upstream.
    pub tls_client_ca: Option<String>,
    // Identity extraction mode when TLS is terminated upstream.
    pub tls_pass_through: Option<TlsPassThrough>,
    // Which certificate of the direct-TLS peer chain carries the identity.
    pub direct_cert_selection: DirectCertSelection,
    // Prometheus listener bind address.
    pub metrics_bind: SocketAddr,
    // Topic -> ordered producer names.
    pub dispatch_rules: HashMap<String, Vec<String>>,
    // Record type -> dispatcher name owning the reliable ack.
    pub reliable_ack_sources: HashMap<String, String>,
    // Keep the decoded envelope on each record for structured sinks.
    pub transmit_decoded_records: bool,
    // Inbound frames above this size are counted and skipped.
    pub max_frame_bytes: usize,
    // Depth of the process-wide ack queue and per-socket reply queues.
    pub ack_queue_depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TlsPassThrough {
    #[serde(rename = "RFC9440")]
    Rfc9440,
    #[serde(rename = "AWSApplicationLoadBalancer")]
    AwsApplicationLoadBalancer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectCertSelection {
    // Some stacks present the identity-bearing certificate last.
    #[default]
    ChainLast,
    ChainFirst,
}

const DEFAULT_CONFIG_PATH: &str = "/etc/drover/config.yml";
const DEFAULT_TLS_CERT: &str = "/etc/drover/tls/server.pem";
const DEFAULT_TLS_KEY: &str = "/etc/drover/tls/server-key.pem";
const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;
const DEFAULT_ACK_QUEUE_DEPTH: usize = 256;

#[derive(Debug, Deserialize)]
struct IngressConfigOverride {
    host: Option<String>,
    port: Option<u16>,
    tls_cert: Option<String>,
    tls_key: Option<String>,
    tls_client_ca: Option<String>,
    tls_pass_through: Option<TlsPassThrough>,
    direct_cert_selection: Option<DirectCertSelection>,
    metrics_bind: Option<String>,
    dispatch_rules: Option<HashMap<String, Vec<String>>>,
    reliable_ack_sources: Option<HashMap<String, String>>,
    transmit_decoded_records: Option<bool>,
    max_frame_bytes: Option<usize>,
    ack_queue_depth: Option<usize>,
}

impl IngressConfig {
    pub fn from_env() -> Result<Self> {
        // Environment variables provide defaults for local development.
        let host = std::env::var("DROVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = std::env::var("DROVER_PORT")
            .unwrap_or_else(|_| "8443".to_string())
            .parse()
            .with_context(|| "parse DROVER_PORT")?;
        let tls_cert =
            std::env::var("DROVER_TLS_CERT").unwrap_or_else(|_| DEFAULT_TLS_CERT.to_string());
        let tls_key =
            std::env::var("DROVER_TLS_KEY").unwrap_or_else(|_| DEFAULT_TLS_KEY.to_string());
        let tls_client_ca = std::env::var("DROVER_TLS_CLIENT_CA").ok();
        let tls_pass_through = match std::env::var("DROVER_TLS_PASS_THROUGH") {
            Ok(value) => Some(parse_pass_through(&value)?),
            Err(_) => None,
        };
        let direct_cert_selection = match std::env::var("DROVER_DIRECT_CERT_SELECTION") {
            Ok(value) => parse_cert_selection(&value)?,
            Err(_) => DirectCertSelection::default(),
        };
        let metrics_bind = std::env::var("DROVER_METRICS_BIND")
            .unwrap_or_else(|_| "0.0.0.0:9090".to_string())
            .parse()
            .with_context(|| "parse DROVER_METRICS_BIND")?;
        let transmit_decoded_records = std::env::var("DROVER_TRANSMIT_DECODED")
            .ok()
            .map(|value| matches!(value.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        let max_frame_bytes = std::env::var("DROVER_MAX_FRAME_BYTES")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_MAX_FRAME_BYTES);
        let ack_queue_depth = std::env::var("DROVER_ACK_QUEUE_DEPTH")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_ACK_QUEUE_DEPTH);
        Ok(Self {
            host,
            port,
            tls_cert,
            tls_key,
            tls_client_ca,
            tls_pass_through,
            direct_cert_selection,
            metrics_bind,
            dispatch_rules: HashMap::new(),
            reliable_ack_sources: HashMap::new(),
            transmit_decoded_records,
            max_frame_bytes,
            ack_queue_depth,
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        let override_path = std::env::var("DROVER_CONFIG").ok();
        let config_path = override_path
            .clone()
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
        let contents = match fs::read_to_string(&config_path) {
            Ok(contents) => Some(contents),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                // The default path is optional; an explicit path is not.
                if override_path.is_some() {
                    return Err(err).with_context(|| format!("read DROVER_CONFIG: {config_path}"));
                }
                None
            }
            Err(err) => {
                return Err(err).with_context(|| format!("read ingress config: {config_path}"));
            }
        };
        if let Some(contents) = contents {
            let override_cfg: IngressConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse ingress config yaml")?;
            if let Some(value) = override_cfg.host {
                config.host = value;
            }
            if let Some(value) = override_cfg.port {
                config.port = value;
            }
            if let Some(value) = override_cfg.tls_cert {
                config.tls_cert = value;
            }
            if let Some(value) = override_cfg.tls_key {
                config.tls_key = value;
            }
            if let Some(value) = override_cfg.tls_client_ca {
                config.tls_client_ca = Some(value);
            }
            if let Some(value) = override_cfg.tls_pass_through {
                config.tls_pass_through = Some(value);
            }
            if let Some(value) = override_cfg.direct_cert_selection {
                config.direct_cert_selection = value;
            }
            if let Some(value) = override_cfg.metrics_bind {
                config.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
            }
            if let Some(value) = override_cfg.dispatch_rules {
                config.dispatch_rules = value;
            }
            if let Some(value) = override_cfg.reliable_ack_sources {
                config.reliable_ack_sources = value;
            }
            if let Some(value) = override_cfg.transmit_decoded_records {
                config.transmit_decoded_records = value;
            }
            if let Some(value) = override_cfg.max_frame_bytes {
                if value > 0 {
                    config.max_frame_bytes = value;
                }
            }
            if let Some(value) = override_cfg.ack_queue_depth {
                if value > 0 {
                    config.ack_queue_depth = value;
                }
            }
        }
        Ok(config)
    }
}

fn parse_pass_through(value: &str) -> Result<TlsPassThrough> {
    match value {
        "RFC9440" => Ok(TlsPassThrough::Rfc9440),
        "AWSApplicationLoadBalancer" => Ok(TlsPassThrough::AwsApplicationLoadBalancer),
        other => bail!("unknown DROVER_TLS_PASS_THROUGH value: {other}"),
    }
}

fn parse_cert_selection(value: &str) -> Result<DirectCertSelection> {
    match value {
        "chain_last" => Ok(DirectCertSelection::ChainLast),
        "chain_first" => Ok(DirectCertSelection::ChainFirst),
        other => bail!("unknown DROVER_DIRECT_CERT_SELECTION value: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn clear_env() {
        for key in [
            "DROVER_HOST",
            "DROVER_PORT",
            "DROVER_TLS_CERT",
            "DROVER_TLS_KEY",
            "DROVER_TLS_CLIENT_CA",
            "DROVER_TLS_PASS_THROUGH",
            "DROVER_DIRECT_CERT_SELECTION",
            "DROVER_METRICS_BIND",
            "DROVER_TRANSMIT_DECODED",
            "DROVER_MAX_FRAME_BYTES",
            "DROVER_ACK_QUEUE_DEPTH",
            "DROVER_CONFIG",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn env_defaults_are_sane() {
        clear_env();
        let config = IngressConfig::from_env().expect("config");
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8443);
        assert!(config.tls_pass_through.is_none());
        assert_eq!(config.direct_cert_selection, DirectCertSelection::ChainLast);
        assert_eq!(config.max_frame_bytes, DEFAULT_MAX_FRAME_BYTES);
        assert!(config.dispatch_rules.is_empty());
    }

    #[test]
    #[serial]
    fn pass_through_mode_parses_from_env() {
        clear_env();
        std::env::set_var("DROVER_TLS_PASS_THROUGH", "AWSApplicationLoadBalancer");
        let config = IngressConfig::from_env().expect("config");
        assert_eq!(
            config.tls_pass_through,
            Some(TlsPassThrough::AwsApplicationLoadBalancer)
        );
        std::env::set_var("DROVER_TLS_PASS_THROUGH", "bogus");
        assert!(IngressConfig::from_env().is_err());
        clear_env();
    }

    #[test]
    #[serial]
    fn yaml_overrides_env_and_carries_maps() {
        clear_env();
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "port: 9443\n\
             tls_pass_through: RFC9440\n\
             dispatch_rules:\n\
             \x20 V: [kafka, logger]\n\
             \x20 connectivity: [logger]\n\
             reliable_ack_sources:\n\
             \x20 V: kafka\n"
        )
        .expect("write yaml");
        std::env::set_var("DROVER_CONFIG", file.path());
        let config = IngressConfig::from_env_or_yaml().expect("config");
        assert_eq!(config.port, 9443);
        assert_eq!(config.tls_pass_through, Some(TlsPassThrough::Rfc9440));
        assert_eq!(
            config.dispatch_rules.get("V"),
            Some(&vec!["kafka".to_string(), "logger".to_string()])
        );
        assert_eq!(
            config.reliable_ack_sources.get("V"),
            Some(&"kafka".to_string())
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn explicit_missing_config_file_is_an_error() {
        clear_env();
        std::env::set_var("DROVER_CONFIG", "/nonexistent/drover.yml");
        assert!(IngressConfig::from_env_or_yaml().is_err());
        clear_env();
    }
}
