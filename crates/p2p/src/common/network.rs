//! Service-bit conventions for this network.
use bitcoin::network::constants::ServiceFlags;

/// Protocol version advertised in our own `version` messages.
pub const PROTOCOL_VERSION: u32 = 70001;

/// User agent advertised in our own `version` messages.
pub const USER_AGENT: &str = "/Satoshi:0.8.1/";

/// The single service bit this protocol requires of its peers: relaying
/// full blocks and transactions. There is no compact-filter or pruned-node
/// distinction here, unlike Bitcoin's own service bit zoo.
#[derive(Debug, Copy, Clone, Default)]
pub enum Services {
    #[default]
    Full,
}

impl From<Services> for ServiceFlags {
    fn from(value: Services) -> Self {
        match value {
            Services::Full => Self::NETWORK,
        }
    }
}
