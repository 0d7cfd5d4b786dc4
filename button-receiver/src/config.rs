//! Receiver configuration: one immutable value built at startup.
//!
//! Sources, in order: YAML file (`BUTTON_RECEIVER_CONFIG`, default
//! `receiver.yaml`), then `MQTT_*` environment overrides, then validation.

use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::info;

/// Variable d'environnement pointant vers le fichier YAML
pub const CONFIG_PATH_ENV: &str = "BUTTON_RECEIVER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "receiver.yaml";
pub const DEFAULT_TOPIC: &str = "esp8266/button";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: &'static str, value: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Configuration immuable du receiver, construite une fois au démarrage
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ReceiverConfig {
    pub broker: BrokerConf,
    pub subscription: SubscriptionConf,
    /// Borne du disconnect gracieux
    pub shutdown_timeout_ms: u64,
    /// Capacité du canal de requêtes du client MQTT
    pub channel_capacity: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct BrokerConf {
    pub host: String,
    pub port: u16,
    /// Must be unique per broker, the broker drops duplicate ids.
    pub client_id: String,
    pub keep_alive_secs: u64,
    /// Attente max d'un CONNACK / SUBACK
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SubscriptionConf {
    pub topic: String,
    /// 0, 1 ou 2
    pub qos: u8,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConf::default(),
            subscription: SubscriptionConf::default(),
            shutdown_timeout_ms: 250,
            channel_capacity: 10,
        }
    }
}

impl Default for BrokerConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "button-receiver".into(),
            keep_alive_secs: 30,
            connect_timeout_ms: 5000,
        }
    }
}

impl Default for SubscriptionConf {
    fn default() -> Self {
        Self { topic: DEFAULT_TOPIC.into(), qos: 1 }
    }
}

impl SubscriptionConf {
    pub fn qos(&self) -> QoS {
        match self.qos {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            _ => QoS::ExactlyOnce,
        }
    }
}

impl ReceiverConfig {
    /// `.env` → YAML (si présent) → variables MQTT_* → validation
    pub async fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        let mut config = Self::from_file_or_default(Path::new(&path)).await?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub async fn from_file_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!("[config] pas de {}, usage config par défaut", path.display());
            return Ok(Self::default());
        }

        let txt = fs::read_to_string(path).await.map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }

        let config = serde_yaml::from_str(&txt).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        info!("[config] loaded {}", path.display());
        Ok(config)
    }

    /// Applique MQTT_HOST, MQTT_PORT, MQTT_CLIENT_ID, MQTT_TOPIC, MQTT_QOS.
    /// `lookup` is `std::env::var` in production and a map in tests.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("MQTT_HOST") {
            self.broker.host = host;
        }
        if let Some(port) = lookup("MQTT_PORT") {
            self.broker.port = port
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { key: "MQTT_PORT", value: port })?;
        }
        if let Some(client_id) = lookup("MQTT_CLIENT_ID") {
            self.broker.client_id = client_id;
        }
        if let Some(topic) = lookup("MQTT_TOPIC") {
            self.subscription.topic = topic;
        }
        if let Some(qos) = lookup("MQTT_QOS") {
            self.subscription.qos = qos
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { key: "MQTT_QOS", value: qos })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.host.trim().is_empty() {
            return Err(ConfigError::Invalid("broker.host is empty".into()));
        }
        if self.broker.port == 0 {
            return Err(ConfigError::Invalid("broker.port must be > 0".into()));
        }
        if self.broker.client_id.trim().is_empty() {
            return Err(ConfigError::Invalid("broker.client_id is empty".into()));
        }
        if !rumqttc::valid_filter(&self.subscription.topic) {
            return Err(ConfigError::Invalid(format!(
                "subscription.topic {:?} is not a valid MQTT filter",
                self.subscription.topic
            )));
        }
        if self.subscription.qos > 2 {
            return Err(ConfigError::Invalid(format!(
                "subscription.qos must be 0, 1 or 2 (got {})",
                self.subscription.qos
            )));
        }
        if self.broker.connect_timeout_ms == 0 || self.shutdown_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be > 0".into()));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid("channel_capacity must be > 0".into()));
        }
        Ok(())
    }

    /// Adresse affichable, ex: tcp://localhost:1883
    pub fn broker_address(&self) -> String {
        format!("tcp://{}:{}", self.broker.host, self.broker.port)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.broker.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.broker.connect_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_firmware_setup() {
        let config = ReceiverConfig::default();
        assert_eq!(config.broker_address(), "tcp://localhost:1883");
        assert_eq!(config.subscription.topic, "esp8266/button");
        assert_eq!(config.subscription.qos(), QoS::AtLeastOnce);
        assert_eq!(config.shutdown_timeout(), Duration::from_millis(250));
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ReceiverConfig::from_file_or_default(&dir.path().join("absent.yaml"))
            .await
            .unwrap();
        assert_eq!(config, ReceiverConfig::default());
    }

    #[tokio::test]
    async fn test_partial_yaml_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "broker:\n  host: 192.168.1.20\n  client_id: lab-receiver\nsubscription:\n  qos: 0").unwrap();

        let config = ReceiverConfig::from_file_or_default(file.path()).await.unwrap();
        assert_eq!(config.broker.host, "192.168.1.20");
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.broker.client_id, "lab-receiver");
        assert_eq!(config.subscription.topic, DEFAULT_TOPIC);
        assert_eq!(config.subscription.qos(), QoS::AtMostOnce);
    }

    #[tokio::test]
    async fn test_invalid_yaml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "broker: [not, a, map").unwrap();

        let err = ReceiverConfig::from_file_or_default(file.path()).await.unwrap_err();
        assert!(matches!(err, ConfigError::Yaml { .. }));
        let message = err.to_string();
        assert!(message.starts_with("invalid YAML in "), "{message}");
        assert!(message.contains(&file.path().display().to_string()));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ReceiverConfig::default();
        config
            .apply_env_overrides(env(&[
                ("MQTT_HOST", "broker.lan"),
                ("MQTT_PORT", "1884"),
                ("MQTT_TOPIC", "esp8266/+"),
                ("MQTT_QOS", "2"),
            ]))
            .unwrap();

        assert_eq!(config.broker_address(), "tcp://broker.lan:1884");
        assert_eq!(config.broker.client_id, "button-receiver");
        assert_eq!(config.subscription.topic, "esp8266/+");
        assert_eq!(config.subscription.qos(), QoS::ExactlyOnce);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_env_values_are_rejected() {
        let mut config = ReceiverConfig::default();
        let err = config.apply_env_overrides(env(&[("MQTT_PORT", "eighteen")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { key: "MQTT_PORT", .. }));
    }

    #[test]
    fn test_validation() {
        let mut config = ReceiverConfig::default();
        config.subscription.qos = 3;
        assert!(config.validate().is_err());

        let mut config = ReceiverConfig::default();
        config.subscription.topic = "esp8266/#/button".into();
        assert!(config.validate().is_err());

        let mut config = ReceiverConfig::default();
        config.broker.client_id = String::new();
        assert!(config.validate().is_err());

        let mut config = ReceiverConfig::default();
        config.shutdown_timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
