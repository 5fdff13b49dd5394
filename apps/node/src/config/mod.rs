use std::path::PathBuf;

use config::Config;
use serde::Deserialize;

mod logger;
pub use logger::LoggerConfig;

mod p2p;
pub use p2p::P2pConfig;

/// Bitcoin network, used only to pick the protocol's wire magic.
#[derive(Deserialize, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Bitcoin,
    Testnet,
    Regtest,
}

impl Network {
    pub fn magic(self) -> gossip_wire::Magic {
        let network = match self {
            Self::Bitcoin => bitcoin::Network::Bitcoin,
            Self::Testnet => bitcoin::Network::Testnet,
            Self::Regtest => bitcoin::Network::Regtest,
        };
        network.magic()
    }
}

#[derive(Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub network: Network,

    pub p2p: P2pConfig,

    #[serde(default)]
    pub logger: LoggerConfig,
}

impl NodeConfig {
    pub fn from_path(path: PathBuf) -> eyre::Result<Self> {
        let config = Config::builder().add_source(config::File::from(path)).build()?;

        Ok(config.try_deserialize()?)
    }
}
