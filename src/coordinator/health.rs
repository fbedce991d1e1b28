//! Cluster health reporting

use crate::common::peer_noun;
use crate::host::Status;
use crate::membership::MembershipClient;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnitHealth {
    Healthy,
    UnHealthy,
    /// The member list could not be read
    Errored,
}

impl std::fmt::Display for UnitHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitHealth::Healthy => write!(f, "Healthy"),
            UnitHealth::UnHealthy => write!(f, "UnHealthy"),
            UnitHealth::Errored => write!(f, "Errored"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub health: UnitHealth,
    pub peers: usize,
    pub version: String,
    pub raw: String,
}

impl HealthReport {
    pub fn message(&self) -> String {
        format!("{} with {} known {}", self.health, self.peers, peer_noun(self.peers))
    }

    pub fn status(&self) -> Status {
        Status::Active(self.message())
    }
}

pub fn check_cluster_health(membership: &dyn MembershipClient) -> HealthReport {
    let version = membership.version();
    let health = membership.cluster_health(None);
    match membership.list_members(None) {
        Ok(members) => HealthReport {
            health: if health.is_unhealthy() {
                UnitHealth::UnHealthy
            } else {
                UnitHealth::Healthy
            },
            peers: members.len(),
            version,
            raw: health.raw,
        },
        Err(e) => {
            tracing::warn!("Member list failed during health check: {}", e);
            HealthReport {
                health: UnitHealth::Errored,
                peers: 0,
                version,
                raw: e.to_string(),
            }
        }
    }
}
