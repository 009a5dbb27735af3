use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::S3Provider;

/// Label carrying the provider identity a claim stands for.
pub const BUCKET_UNIQUE_ID_LABEL: &str = "matrixorigin.io/bucket-unique-id";

/// Cluster-wide record that a physical bucket is in use.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(kind = "BucketClaim", group = "core.matrixorigin.io", version = "v1alpha1")]
#[kube(status = "BucketClaimStatus", shortname = "bucket")]
#[kube(printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#)]
#[serde(rename_all = "camelCase")]
pub struct BucketClaimSpec {
    pub s3: S3Provider,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BucketClaimStatus {
    /// `namespace/name` of every cluster using the bucket.
    #[serde(default)]
    pub bind_to: Vec<String>,
    pub state: Option<BucketState>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum BucketState {
    InUse,
    Released,
}
