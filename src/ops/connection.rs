//! Connection details handed to store clients and proxies

use crate::common::{connection_string, FleetConfig, Result};
use crate::host::{TlsFile, TlsMaterial};
use crate::membership::{members_cluster_string, MembershipClient};
use serde::Serialize;

/// Sorted connection string over this node and every db-facing peer address.
pub fn client_connection_string<S: AsRef<str>>(
    own_address: &str,
    peer_addresses: &[S],
    port: u16,
) -> String {
    let mut addresses: Vec<&str> = peer_addresses.iter().map(|a| a.as_ref()).collect();
    addresses.push(own_address);
    connection_string(&addresses, port)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientCredentials {
    pub client_key: String,
    pub client_cert: String,
    pub ca: String,
}

impl ClientCredentials {
    pub fn load(tls: &TlsMaterial) -> Result<Self> {
        Ok(Self {
            client_key: tls.read(TlsFile::ClientKey)?,
            client_cert: tls.read(TlsFile::ClientCert)?,
            ca: tls.read(TlsFile::Ca)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionDetails {
    pub connection_string: String,
    pub cluster: String,
    pub version: String,
    pub credentials: ClientCredentials,
}

impl ConnectionDetails {
    /// Everything a client of this cluster needs, read from the live membership.
    pub fn collect(
        config: &FleetConfig,
        membership: &dyn MembershipClient,
        tls: &TlsMaterial,
    ) -> Result<Self> {
        let members = membership.list_members(None)?;
        let mut urls: Vec<String> = members
            .values()
            .flat_map(|m| m.client_urls.iter().cloned())
            .collect();
        urls.sort();
        urls.dedup();
        let connection_string = if urls.is_empty() {
            tracing::debug!("No client URLs listed, using own address");
            client_connection_string::<&str>(&config.public_address, &[], config.port)
        } else {
            urls.join(",")
        };
        Ok(Self {
            connection_string,
            cluster: members_cluster_string(&members),
            version: membership.version(),
            credentials: ClientCredentials::load(tls)?,
        })
    }
}
