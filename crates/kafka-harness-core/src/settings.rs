//! Producer and consumer settings derived from a [`CapabilityBundle`].
//!
//! Settings are rebuilt for every logical operation rather than cached, so
//! concurrent tests with distinct group and client ids never share
//! configuration state.

use std::collections::BTreeMap;
use std::time::Duration;

use rdkafka::config::ClientConfig;

use crate::broker::BrokerAddress;
use crate::config::ClientDefaults;
use crate::env::CapabilityBundle;
use crate::error::{SettingsError, SettingsResult};

/// Consumer option: where to start when the group has no committed offset.
pub const AUTO_OFFSET_RESET: &str = "auto.offset.reset";

/// Consumer option: how often topic metadata is refreshed.
pub const METADATA_MAX_AGE_MS: &str = "metadata.max.age.ms";

/// Settings for one producer scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerSettings {
    addresses: Vec<BrokerAddress>,
    request_timeout: Duration,
    client_id: Option<String>,
    extra_options: BTreeMap<String, String>,
}

impl ProducerSettings {
    /// Broker endpoints the producer bootstraps from.
    #[must_use]
    pub fn addresses(&self) -> &[BrokerAddress] {
        &self.addresses
    }

    /// Time allowed for a send to be acknowledged.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    #[must_use]
    pub fn extra_options(&self) -> &BTreeMap<String, String> {
        &self.extra_options
    }

    /// Copy of these settings with a client id.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Copy of these settings with an extra client property.
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_options.insert(key.into(), value.into());
        self
    }

    /// Kafka client properties for these settings.
    ///
    /// Extra options are applied last and win over derived values.
    #[must_use]
    pub fn properties(&self) -> BTreeMap<String, String> {
        let timeout_ms = self.request_timeout.as_millis().to_string();
        let mut props = BTreeMap::new();
        props.insert("bootstrap.servers".to_string(), join(&self.addresses));
        props.insert("request.timeout.ms".to_string(), timeout_ms.clone());
        props.insert("message.timeout.ms".to_string(), timeout_ms);
        if let Some(client_id) = &self.client_id {
            props.insert("client.id".to_string(), client_id.clone());
        }
        props.extend(self.extra_options.clone());
        props
    }

    /// rdkafka configuration for these settings.
    #[must_use]
    pub fn client_config(&self) -> ClientConfig {
        to_client_config(self.properties())
    }
}

/// Settings for one consumer scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSettings {
    addresses: Vec<BrokerAddress>,
    group_id: String,
    client_id: String,
    poll_interval: Duration,
    commit_interval: Duration,
    max_poll_records: usize,
    max_poll_concurrency: usize,
    extra_options: BTreeMap<String, String>,
}

impl ConsumerSettings {
    /// Broker endpoints the consumer bootstraps from.
    #[must_use]
    pub fn addresses(&self) -> &[BrokerAddress] {
        &self.addresses
    }

    #[must_use]
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Default wait for a single poll.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Interval between automatic offset commits.
    #[must_use]
    pub fn commit_interval(&self) -> Duration {
        self.commit_interval
    }

    /// Upper bound on records returned from one poll.
    #[must_use]
    pub fn max_poll_records(&self) -> usize {
        self.max_poll_records
    }

    /// Number of polls that may be in flight at once.
    ///
    /// Always 1. Scoped logic holds the consumer through `&mut`, so a second
    /// poll cannot start until the first returns; this value reports that
    /// limit rather than configuring it.
    #[must_use]
    pub fn max_poll_concurrency(&self) -> usize {
        self.max_poll_concurrency
    }

    #[must_use]
    pub fn extra_options(&self) -> &BTreeMap<String, String> {
        &self.extra_options
    }

    /// Value of an extra option, if set.
    #[must_use]
    pub fn option(&self, key: &str) -> Option<&str> {
        self.extra_options.get(key).map(String::as_str)
    }

    /// Copy of these settings with an extra client property.
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_options.insert(key.into(), value.into());
        self
    }

    /// Kafka client properties for these settings.
    ///
    /// Extra options are applied last and win over derived values.
    #[must_use]
    pub fn properties(&self) -> BTreeMap<String, String> {
        let mut props = BTreeMap::new();
        props.insert("bootstrap.servers".to_string(), join(&self.addresses));
        props.insert("group.id".to_string(), self.group_id.clone());
        props.insert("client.id".to_string(), self.client_id.clone());
        props.insert("enable.auto.commit".to_string(), "true".to_string());
        props.insert(
            "auto.commit.interval.ms".to_string(),
            self.commit_interval.as_millis().to_string(),
        );
        props.insert("enable.partition.eof".to_string(), "false".to_string());
        props.extend(self.extra_options.clone());
        props
    }

    /// rdkafka configuration for these settings.
    #[must_use]
    pub fn client_config(&self) -> ClientConfig {
        to_client_config(self.properties())
    }
}

/// Derives per-operation settings from a capability bundle.
#[derive(Debug, Clone, Default)]
pub struct SettingsBuilder {
    defaults: ClientDefaults,
}

impl SettingsBuilder {
    /// Builder with explicit defaults, usually from [`crate::config::HarnessConfig`].
    #[must_use]
    pub fn new(defaults: ClientDefaults) -> Self {
        Self { defaults }
    }

    #[must_use]
    pub fn defaults(&self) -> &ClientDefaults {
        &self.defaults
    }

    /// Producer settings targeting the bundle's broker.
    #[must_use]
    pub fn producer_settings(&self, env: &CapabilityBundle) -> ProducerSettings {
        ProducerSettings {
            addresses: env.broker().addresses().to_vec(),
            request_timeout: self.defaults.request_timeout(),
            client_id: None,
            extra_options: BTreeMap::new(),
        }
    }

    /// Consumer settings targeting the bundle's broker.
    ///
    /// # Errors
    ///
    /// Returns an error if `group_id` or `client_id` is empty.
    pub fn consumer_settings(
        &self,
        env: &CapabilityBundle,
        group_id: &str,
        client_id: &str,
    ) -> SettingsResult<ConsumerSettings> {
        if group_id.trim().is_empty() {
            return Err(SettingsError::EmptyGroupId);
        }
        if client_id.trim().is_empty() {
            return Err(SettingsError::EmptyClientId);
        }

        let mut extra_options = BTreeMap::new();
        extra_options.insert(AUTO_OFFSET_RESET.to_string(), "earliest".to_string());
        extra_options.insert(
            METADATA_MAX_AGE_MS.to_string(),
            self.defaults.metadata_max_age_ms.to_string(),
        );

        Ok(ConsumerSettings {
            addresses: env.broker().addresses().to_vec(),
            group_id: group_id.to_string(),
            client_id: client_id.to_string(),
            poll_interval: self.defaults.poll_interval(),
            commit_interval: self.defaults.commit_interval(),
            max_poll_records: self.defaults.max_poll_records,
            max_poll_concurrency: 1,
            extra_options,
        })
    }
}

/// Producer settings with the default [`ClientDefaults`].
#[must_use]
pub fn producer_settings(env: &CapabilityBundle) -> ProducerSettings {
    SettingsBuilder::default().producer_settings(env)
}

/// Consumer settings with the default [`ClientDefaults`].
///
/// # Errors
///
/// Returns an error if `group_id` or `client_id` is empty.
pub fn consumer_settings(
    env: &CapabilityBundle,
    group_id: &str,
    client_id: &str,
) -> SettingsResult<ConsumerSettings> {
    SettingsBuilder::default().consumer_settings(env, group_id, client_id)
}

fn join(addresses: &[BrokerAddress]) -> String {
    addresses
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn to_client_config(props: BTreeMap<String, String>) -> ClientConfig {
    let mut config = ClientConfig::new();
    for (key, value) in props {
        config.set(key, value);
    }
    config
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::broker::BrokerHandle;

    fn env() -> CapabilityBundle {
        let broker = BrokerHandle::new(vec![
            BrokerAddress::new("127.0.0.1", 9092),
            BrokerAddress::new("127.0.0.1", 9093),
        ])
        .unwrap();
        CapabilityBundle::tokio(Arc::new(broker))
    }

    #[test]
    fn test_producer_defaults() {
        let settings = producer_settings(&env());
        assert_eq!(settings.addresses().len(), 2);
        assert_eq!(settings.request_timeout(), Duration::from_secs(5));
        assert!(settings.extra_options().is_empty());
        assert_eq!(settings.client_id(), None);
    }

    #[test]
    fn test_producer_properties() {
        let settings = producer_settings(&env()).with_client_id("producer-1");
        let config = settings.client_config();
        assert_eq!(
            config.get("bootstrap.servers"),
            Some("127.0.0.1:9092,127.0.0.1:9093")
        );
        assert_eq!(config.get("request.timeout.ms"), Some("5000"));
        assert_eq!(config.get("client.id"), Some("producer-1"));
    }

    #[test]
    fn test_consumer_defaults() {
        let settings = consumer_settings(&env(), "group-a", "client-a").unwrap();
        assert_eq!(settings.group_id(), "group-a");
        assert_eq!(settings.client_id(), "client-a");
        assert_eq!(settings.poll_interval(), Duration::from_millis(250));
        assert_eq!(settings.commit_interval(), Duration::from_millis(250));
        assert_eq!(settings.max_poll_concurrency(), 1);
        assert_eq!(settings.option(AUTO_OFFSET_RESET), Some("earliest"));
        assert_eq!(settings.option(METADATA_MAX_AGE_MS), Some("100"));
    }

    #[test]
    fn test_consumer_properties() {
        let config = consumer_settings(&env(), "group-a", "client-a")
            .unwrap()
            .client_config();
        assert_eq!(config.get("group.id"), Some("group-a"));
        assert_eq!(config.get("client.id"), Some("client-a"));
        assert_eq!(config.get("auto.commit.interval.ms"), Some("250"));
        assert_eq!(config.get("auto.offset.reset"), Some("earliest"));
        assert_eq!(config.get("metadata.max.age.ms"), Some("100"));
    }

    #[test]
    fn test_extra_options_win() {
        let settings = consumer_settings(&env(), "group-a", "client-a")
            .unwrap()
            .with_option(AUTO_OFFSET_RESET, "latest")
            .with_option("enable.auto.commit", "false");
        let props = settings.properties();
        assert_eq!(props["auto.offset.reset"], "latest");
        assert_eq!(props["enable.auto.commit"], "false");
    }

    #[test]
    fn test_empty_group_id_rejected() {
        assert_eq!(
            consumer_settings(&env(), "", "client-a"),
            Err(SettingsError::EmptyGroupId)
        );
        assert_eq!(
            consumer_settings(&env(), "   ", "client-a"),
            Err(SettingsError::EmptyGroupId)
        );
    }

    #[test]
    fn test_empty_client_id_rejected() {
        assert_eq!(
            consumer_settings(&env(), "group-a", ""),
            Err(SettingsError::EmptyClientId)
        );
    }

    #[test]
    fn test_settings_are_fresh_per_call() {
        let env = env();
        let first = consumer_settings(&env, "group-a", "client-a").unwrap();
        let second = consumer_settings(&env, "group-b", "client-b").unwrap();
        assert_ne!(first, second);
        assert_eq!(first.addresses(), second.addresses());
    }

    #[test]
    fn test_custom_defaults() {
        let builder = SettingsBuilder::new(ClientDefaults {
            poll_interval_ms: 50,
            request_timeout_ms: 1_000,
            ..ClientDefaults::default()
        });
        let env = env();
        assert_eq!(
            builder.producer_settings(&env).request_timeout(),
            Duration::from_secs(1)
        );
        assert_eq!(
            builder
                .consumer_settings(&env, "g", "c")
                .unwrap()
                .poll_interval(),
            Duration::from_millis(50)
        );
    }
}
