use std::net::{SocketAddr, ToSocketAddrs};

use eyre::{Context, OptionExt};
use serde::Deserialize;

use gossip_p2p::{client, Limits};

/// Default number of inbound connections accepted.
pub const DEFAULT_MAX_INBOUND_CONNECTIONS: usize = 8;
/// Default number of outbound connections maintained.
pub const DEFAULT_MAX_OUTBOUND_CONNECTIONS: usize = 8;
/// Default TCP port this protocol listens on.
pub const DEFAULT_TCP_PORT: u16 = 8833;

#[derive(Deserialize, Clone)]
pub struct P2pConfig {
    /// Address to listen on for inbound connections.
    pub address: String,
    /// Peers to dial and keep reconnecting to.
    #[serde(default)]
    pub connect: Vec<String>,
    #[serde(default = "default_max_inbound_connections")]
    pub max_inbound_connections: usize,
    #[serde(default = "default_max_outbound_connections")]
    pub max_outbound_connections: usize,
    /// Whether to actively announce our own address (vs. only on `getaddr`).
    #[serde(default)]
    pub server: bool,
}

fn default_max_inbound_connections() -> usize {
    DEFAULT_MAX_INBOUND_CONNECTIONS
}

fn default_max_outbound_connections() -> usize {
    DEFAULT_MAX_OUTBOUND_CONNECTIONS
}

impl P2pConfig {
    /// Resolve the listen/connect strings and produce the typed config the
    /// engine itself consumes.
    pub fn to_client_config(&self, magic: gossip_wire::Magic) -> eyre::Result<client::P2PConfig> {
        let address = self
            .address
            .to_socket_addrs()
            .wrap_err("failed to resolve p2p listen address")?
            .next()
            .ok_or_eyre("no address found in p2p listen address")?;

        let persistent: Vec<SocketAddr> = self
            .connect
            .iter()
            .map(|s| s.to_socket_addrs().wrap_err("failed to resolve connect address"))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .flatten()
            .collect();

        Ok(client::P2PConfig {
            magic,
            listen: address,
            limits: Limits {
                max_inbound: self.max_inbound_connections,
                max_outbound: self.max_outbound_connections,
            },
            protocol: gossip_p2p::Config {
                magic,
                protocol_version: gossip_p2p::common::network::PROTOCOL_VERSION,
                services: gossip_p2p::common::network::Services::Full.into(),
                required_services: gossip_p2p::common::network::Services::Full.into(),
                user_agent: gossip_p2p::common::network::USER_AGENT,
                whitelist: Default::default(),
                persistent,
                target_outbound_peers: self.max_outbound_connections,
                max_inbound_peers: self.max_inbound_connections,
                default_tcp_port: DEFAULT_TCP_PORT,
                server: self.server,
            },
        })
    }
}
