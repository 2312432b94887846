//! Finalizer handling for ngrok-backed resources
//!
//! The finalizer holds local deletion until the remote object is deleted or
//! confirmed absent (or retained, per the reclaim policy).

use kube::{Resource, ResourceExt};
use tracing::info;

use super::kube_io::{NamespacedKind, ResourceClient};
use crate::error::Result;

/// Finalizer attached to every resource the operator reconciles
pub const FINALIZER: &str = "k8s.ngrok.com/finalizer";

/// Add our finalizer if missing. Returns whether a write happened.
pub async fn add_finalizer<K: NamespacedKind>(
    client: &dyn ResourceClient<K>,
    obj: &K,
) -> Result<bool> {
    if has_finalizer(obj) {
        return Ok(false);
    }
    let mut finalizers: Vec<String> = obj.finalizers().to_vec();
    finalizers.push(FINALIZER.to_string());
    client.set_finalizers(obj, finalizers).await?;
    info!("Added finalizer to {}/{}", obj.namespace().unwrap_or_default(), obj.name_any());
    Ok(true)
}

/// Remove our finalizer, leaving any others in place
pub async fn remove_finalizer<K: NamespacedKind>(
    client: &dyn ResourceClient<K>,
    obj: &K,
) -> Result<()> {
    if !has_finalizer(obj) {
        return Ok(());
    }
    let finalizers: Vec<String> = obj
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != FINALIZER)
        .cloned()
        .collect();
    client.set_finalizers(obj, finalizers).await?;
    info!(
        "Removed finalizer from {}/{}",
        obj.namespace().unwrap_or_default(),
        obj.name_any()
    );
    Ok(())
}

/// A deletion timestamp means deletion was requested but finalizers hold it
pub fn is_being_deleted<K: Resource>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
}

pub fn has_finalizer<K: Resource>(obj: &K) -> bool {
    obj.meta()
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|f| f == FINALIZER))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{Tunnel, TunnelSpec};
    use crate::testing::FakeResources;

    fn tunnel(finalizers: Vec<String>) -> Tunnel {
        let mut t = Tunnel::new("example-80", TunnelSpec::default());
        t.metadata.namespace = Some("test".to_string());
        t.metadata.finalizers = Some(finalizers);
        t
    }

    #[test]
    fn test_finalizer_name() {
        assert_eq!(FINALIZER, "k8s.ngrok.com/finalizer");
    }

    #[tokio::test]
    async fn test_add_then_remove_keeps_foreign_finalizers() {
        let fake = FakeResources::with([tunnel(vec!["other/finalizer".to_string()])]);
        let obj = fake.current("test", "example-80").unwrap();

        assert!(add_finalizer(&fake, &obj).await.unwrap());
        let obj = fake.current("test", "example-80").unwrap();
        assert!(has_finalizer(&obj));
        assert!(!add_finalizer(&fake, &obj).await.unwrap());

        remove_finalizer(&fake, &obj).await.unwrap();
        let obj = fake.current("test", "example-80").unwrap();
        assert_eq!(obj.finalizers(), &["other/finalizer".to_string()]);
    }

    #[tokio::test]
    async fn test_removing_last_finalizer_completes_deletion() {
        let fake = FakeResources::with([tunnel(vec![FINALIZER.to_string()])]);
        fake.delete("test", "example-80").await.unwrap();

        let obj = fake.current("test", "example-80").unwrap();
        assert!(is_being_deleted(&obj));

        remove_finalizer(&fake, &obj).await.unwrap();
        assert!(fake.current("test", "example-80").is_none());
    }
}
