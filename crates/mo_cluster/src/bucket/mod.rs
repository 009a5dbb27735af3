//! Cluster-wide deduplication of object storage buckets.
//!
//! A bucket is identified by a hash of its provider type, endpoint and path. Exactly one
//! [`BucketClaim`] may carry a given identity; the clusters using the bucket are recorded in its
//! status. Conflicting claims are reported, never repaired.

use std::collections::BTreeMap;

use kube::api::ObjectMeta;
use kube::ResourceExt;
use tracing::{info, warn};

use crate::api::v1alpha1::{
    BucketClaim, BucketClaimSpec, BucketClaimStatus, BucketState, S3Provider, BUCKET_UNIQUE_ID_LABEL,
};
use crate::store::ResourceStore;
use crate::util::errors::{Error, Result, StdError};
use crate::util::hash::label_hash;

/// Content identity of a bucket. Pure function of provider type, endpoint and path.
pub fn identity(s3: &S3Provider) -> String {
    label_hash(&format!(
        "{}-{}-{}",
        s3.provider_type,
        s3.endpoint.as_deref().unwrap_or_default(),
        s3.path
    ))
}

pub fn claim_name(identity: &str) -> String {
    format!("bucket-{}", &identity[..identity.len().min(16)])
}

/// Finds the claim for an identity. More than one is a consistency fault.
pub async fn resolve<S: ResourceStore>(store: &S, identity: &str) -> Result<Option<BucketClaim>> {
    let selector = BTreeMap::from([(BUCKET_UNIQUE_ID_LABEL.to_string(), identity.to_string())]);
    let mut claims: Vec<BucketClaim> = store.list(None, &selector).await?;
    match claims.len() {
        0 => Ok(None),
        1 => Ok(claims.pop()),
        count => {
            warn!("Found {} bucket claims for identity {}", count, identity);
            Err(Error::StdError(StdError::ClaimConflict {
                identity: identity.to_string(),
                count,
            }))
        }
    }
}

/// Binds `owner` (`namespace/name`) to the claim for `s3`, creating the claim when absent.
pub async fn claim<S: ResourceStore>(store: &S, s3: &S3Provider, owner: &str) -> Result<BucketClaim> {
    let id = identity(s3);
    let mut claim = match resolve(store, &id).await? {
        Some(existing) => existing,
        None => {
            let name = claim_name(&id);
            info!("Creating BucketClaim '{}' for {}", name, owner);
            let desired = BucketClaim {
                metadata: ObjectMeta {
                    name: Some(name),
                    labels: Some(BTreeMap::from([(BUCKET_UNIQUE_ID_LABEL.to_string(), id.clone())])),
                    ..Default::default()
                },
                spec: BucketClaimSpec { s3: s3.clone() },
                status: None,
            };
            store.create(&desired).await?
        }
    };

    let status = claim.status.get_or_insert_with(BucketClaimStatus::default);
    let bound = status.bind_to.iter().any(|b| b == owner);
    if bound && status.state == Some(BucketState::InUse) {
        return Ok(claim);
    }
    if !bound {
        status.bind_to.push(owner.to_string());
    }
    status.state = Some(BucketState::InUse);
    let status = serde_json::to_value(&*status)?;
    store
        .patch_status::<BucketClaim>(None, &claim.name_any(), status)
        .await?;
    info!("Bound BucketClaim '{}' to {}", claim.name_any(), owner);
    Ok(claim)
}

/// Removes `owner` from the claim for `s3`. The claim is marked released when nobody is left.
pub async fn release<S: ResourceStore>(store: &S, s3: &S3Provider, owner: &str) -> Result<()> {
    let Some(mut claim) = resolve(store, &identity(s3)).await? else {
        return Ok(());
    };
    let status = claim.status.get_or_insert_with(BucketClaimStatus::default);
    let before = status.bind_to.len();
    status.bind_to.retain(|b| b != owner);
    if status.bind_to.len() == before {
        return Ok(());
    }
    status.state = Some(if status.bind_to.is_empty() {
        BucketState::Released
    } else {
        BucketState::InUse
    });
    let status = serde_json::to_value(&*status)?;
    store
        .patch_status::<BucketClaim>(None, &claim.name_any(), status)
        .await?;
    info!("Released BucketClaim '{}' from {}", claim.name_any(), owner);
    Ok(())
}
