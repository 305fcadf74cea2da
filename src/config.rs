//! Engine configuration (§6). Loadable through the `config` crate the same
//! way `interledger-settlement-engines`' CLI loads its settings, but exposed
//! here as a plain typed struct since the CLI/config-file glue belongs to
//! the surrounding plugin (out of scope, §1).

use ethereum_types::Address;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Our on-chain address, and the `contractAddress` claims are checked against.
    pub contract_address: Address,
    pub our_address: Address,

    /// Default outgoing channel value / top-up increment, in wei.
    pub outgoing_channel_amount: u64,
    /// Gate for auto-funding: we only collateralize peers whose incoming
    /// channel already holds at least this much, in wei.
    pub min_incoming_channel_amount: u64,
    /// Dispute period committed to new outgoing channels, in blocks.
    pub outgoing_dispute_period: u32,
    /// Floor for accepting an incoming channel's dispute period, in blocks.
    pub min_incoming_dispute_period: u32,
    /// Channel watcher polling interval, in milliseconds.
    pub channel_watcher_interval_ms: u64,
    /// Per-packet size cap, in gwei.
    pub max_packet_amount: u64,
    /// Receivable balance cap, in gwei.
    pub max_balance: i64,
}

impl EngineConfig {
    pub fn channel_watcher_interval(&self) -> Duration {
        Duration::from_millis(self.channel_watcher_interval_ms)
    }

    /// Loads configuration from any source the `config` crate understands
    /// (file, environment, etc), the way
    /// `interledger-settlement-engines/src/main.rs` merges CLI args, env
    /// vars and a config file before building the engine.
    pub fn from_source(config: config::Config) -> Result<Self, config::ConfigError> {
        config.try_into()
    }
}

#[cfg(test)]
pub mod test_fixtures {
    use super::*;

    pub fn config() -> EngineConfig {
        EngineConfig {
            contract_address: Address::from_low_u64_be(0xC047),
            our_address: Address::from_low_u64_be(0xAAAA),
            outgoing_channel_amount: 1_000_000_000,
            min_incoming_channel_amount: 1_000_000,
            outgoing_dispute_period: 100,
            min_incoming_dispute_period: 50,
            channel_watcher_interval_ms: 1_000,
            max_packet_amount: 1_000_000,
            max_balance: 1_000_000_000,
        }
    }
}
