//! Tunnel-group backends shared by edges and routes
//!
//! Backends are joined to agent tunnels purely by label equality, so the
//! label map is the identity of a backend.

use tracing::info;

use crate::crd;
use crate::error::Result;
use crate::platform::{
    collect_all, NgrokApi, TunnelGroupBackend, TunnelGroupBackendCreate, TunnelGroupBackendUpdate,
};

/// First remote backend whose labels equal `spec.labels`
pub async fn find_by_labels(
    ngrok: &dyn NgrokApi,
    spec: &crd::TunnelGroupBackend,
) -> Result<Option<TunnelGroupBackend>> {
    Ok(collect_all(ngrok.list_tunnel_group_backends())
        .await?
        .into_iter()
        .find(|b| b.labels == spec.labels))
}

pub async fn create(
    ngrok: &dyn NgrokApi,
    spec: &crd::TunnelGroupBackend,
) -> Result<TunnelGroupBackend> {
    let backend = ngrok
        .create_tunnel_group_backend(&TunnelGroupBackendCreate {
            description: spec.description.clone(),
            metadata: spec.metadata.clone(),
            labels: spec.labels.clone(),
        })
        .await?;
    info!("Created tunnel group backend {} {:?}", backend.id, backend.labels);
    Ok(backend)
}

/// Locate a backend by labels, creating one when none matches
pub async fn find_or_create(
    ngrok: &dyn NgrokApi,
    spec: &crd::TunnelGroupBackend,
) -> Result<TunnelGroupBackend> {
    match find_by_labels(ngrok, spec).await? {
        Some(existing) => Ok(existing),
        None => create(ngrok, spec).await,
    }
}

/// Converge the backend recorded in an edge status
///
/// A recorded ID is kept and its labels corrected in place. Without one, or
/// when the recorded backend is gone, a backend is found by labels or created.
pub async fn ensure(
    ngrok: &dyn NgrokApi,
    recorded_id: &str,
    spec: &crd::TunnelGroupBackend,
) -> Result<TunnelGroupBackend> {
    if !recorded_id.is_empty() {
        match ngrok.get_tunnel_group_backend(recorded_id).await {
            Ok(backend) if backend.labels == spec.labels => return Ok(backend),
            Ok(backend) => {
                info!("Updating labels of tunnel group backend {}", backend.id);
                return Ok(ngrok
                    .update_tunnel_group_backend(&TunnelGroupBackendUpdate {
                        id: backend.id,
                        description: Some(spec.description.clone()),
                        metadata: Some(spec.metadata.clone()),
                        labels: spec.labels.clone(),
                    })
                    .await?);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
    }
    find_or_create(ngrok, spec).await
}
