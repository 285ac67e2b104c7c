use crate::{ClientConfig, EnoOneClient};
use enomod_core::frame::tcp::DEFAULT_PORT;
use enomod_core::registers::RegisterMapKind;

const SINGLE_PORT: &[u8] = &[1];
const DUAL_PORT: &[u8] = &[1, 2];

/// Where a charger lives and which optional features it has enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ChargerConfig {
    pub host: String,
    pub port: u16,
    /// Second charging port exposed as unit id 2.
    pub dual_port: bool,
    /// EMS control is enabled on the charger, which unlocks the transaction
    /// token registers.
    pub ems_control: bool,
}

impl Default for ChargerConfig {
    fn default() -> Self {
        Self::new("127.0.0.1")
    }
}

impl ChargerConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            dual_port: false,
            ems_control: false,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_dual_port(mut self, dual_port: bool) -> Self {
        self.dual_port = dual_port;
        self
    }

    pub fn with_ems_control(mut self, ems_control: bool) -> Self {
        self.ems_control = ems_control;
        self
    }

    pub fn unit_ids(&self) -> &'static [u8] {
        if self.dual_port {
            DUAL_PORT
        } else {
            SINGLE_PORT
        }
    }
}

/// One physical charger: a client per charging port.
///
/// Ports share nothing but the address; each has its own connection and
/// exchange lock, so a slow port never blocks the other.
pub struct Charger {
    config: ChargerConfig,
    ports: Vec<EnoOneClient>,
}

impl Charger {
    pub fn new(config: ChargerConfig, client_config: ClientConfig) -> Self {
        let ports = config
            .unit_ids()
            .iter()
            .map(|&unit_id| {
                EnoOneClient::new(config.host.clone(), config.port, unit_id, client_config)
            })
            .collect();
        Self { config, ports }
    }

    pub fn config(&self) -> &ChargerConfig {
        &self.config
    }

    pub fn port(&self, unit_id: u8) -> Option<&EnoOneClient> {
        self.ports.iter().find(|client| client.unit_id() == unit_id)
    }

    pub fn ports(&self) -> impl Iterator<Item = &EnoOneClient> {
        self.ports.iter()
    }

    /// Register maps to poll on every port.
    pub fn polled_maps(&self) -> impl Iterator<Item = RegisterMapKind> {
        RegisterMapKind::polled(self.config.ems_control)
    }

    pub async fn close(&self) {
        for client in &self.ports {
            client.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Charger, ChargerConfig};
    use crate::ClientConfig;
    use enomod_core::registers::RegisterMapKind;

    #[test]
    fn single_port_charger_has_unit_one() {
        let charger = Charger::new(ChargerConfig::new("10.0.0.7"), ClientConfig::polling());
        let units: Vec<u8> = charger.ports().map(|c| c.unit_id()).collect();
        assert_eq!(units, vec![1]);
        assert!(charger.port(2).is_none());
        assert_eq!(charger.port(1).map(|c| c.port()), Some(502));
    }

    #[test]
    fn dual_port_charger_has_independent_clients() {
        let config = ChargerConfig::new("10.0.0.7")
            .with_port(1502)
            .with_dual_port(true);
        let charger = Charger::new(config, ClientConfig::polling());
        let units: Vec<u8> = charger.ports().map(|c| c.unit_id()).collect();
        assert_eq!(units, vec![1, 2]);
        assert!(charger.ports().all(|c| c.host() == "10.0.0.7" && c.port() == 1502));
    }

    #[test]
    fn token_is_polled_only_with_ems_control() {
        let plain = Charger::new(ChargerConfig::new("h"), ClientConfig::polling());
        assert!(!plain
            .polled_maps()
            .any(|kind| kind == RegisterMapKind::TransactionToken));

        let ems = Charger::new(
            ChargerConfig::new("h").with_ems_control(true),
            ClientConfig::polling(),
        );
        assert!(ems
            .polled_maps()
            .any(|kind| kind == RegisterMapKind::TransactionToken));
    }
}
