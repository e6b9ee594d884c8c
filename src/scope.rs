// Client and network selection.
// Runs once per run, before any upload. A configured ID is only accepted if
// the API key can actually see it; a stale ID is an error, never a reason to
// fall back to another scope.

use crate::api::{ClientId, ClientSummary, NetworkId, NetworkSummary, PlatformApi};
use crate::config::RunConfiguration;
use crate::error::{Result, UploadError};
use crate::retry::Clock;
use crate::ui::{Candidate, Chooser};

/// The client/network pair every upload of the run targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedScope {
    pub client_id: ClientId,
    pub network_id: NetworkId,
}

/// Determine the client and network for the run.
///
/// Listing clients is the first platform call of a run, so an invalid key
/// surfaces here as [`UploadError::Auth`].
pub fn resolve_scope(
    api: &dyn PlatformApi,
    chooser: &dyn Chooser,
    clock: &dyn Clock,
    config: &RunConfiguration,
) -> Result<ResolvedScope> {
    let clients = config
        .retry
        .run(clock, "listing clients", || api.authenticate_and_list_clients())?;
    tracing::debug!(count = clients.len(), "clients visible to API key");

    let client_id = ClientId(pick(
        "client",
        config.client_id.map(|id| id.0),
        &client_candidates(&clients),
        chooser,
    )?);

    let networks: Vec<NetworkSummary> = config
        .retry
        .run(clock, "listing networks", || api.list_networks(client_id))?
        .into_iter()
        .filter(|n| n.client_id == client_id)
        .collect();
    tracing::debug!(%client_id, count = networks.len(), "networks in client");

    let network_id = NetworkId(pick(
        "network",
        config.network_id.map(|id| id.0),
        &network_candidates(&networks),
        chooser,
    )?);

    tracing::info!(%client_id, %network_id, "upload scope resolved");
    Ok(ResolvedScope {
        client_id,
        network_id,
    })
}

fn client_candidates(clients: &[ClientSummary]) -> Vec<Candidate> {
    clients
        .iter()
        .map(|c| Candidate {
            id: c.id.0,
            name: c.name.clone(),
        })
        .collect()
}

fn network_candidates(networks: &[NetworkSummary]) -> Vec<Candidate> {
    networks
        .iter()
        .map(|n| Candidate {
            id: n.id.0,
            name: n.name.clone(),
        })
        .collect()
}

/// Same rule for clients and networks: a configured ID must be listed;
/// otherwise a single candidate is taken and several go to the chooser.
fn pick(kind: &str, configured: Option<u64>, candidates: &[Candidate], chooser: &dyn Chooser) -> Result<u64> {
    if let Some(id) = configured {
        return if candidates.iter().any(|c| c.id == id) {
            Ok(id)
        } else {
            Err(UploadError::Configuration(format!(
                "configured {kind}_id {id} is not available to this API key"
            )))
        };
    }

    match candidates {
        [] => Err(UploadError::Configuration(format!("no {}s are available to this API key", kind))),
        [only] => {
            tracing::info!(id = only.id, name = %only.name, "only one {} available, selecting it", kind);
            Ok(only.id)
        }
        _ => chooser.choose_among(kind, candidates),
    }
}
