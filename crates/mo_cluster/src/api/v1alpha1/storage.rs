use std::fmt;

use k8s_openapi::api::core::v1::LocalObjectReference;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A persistent volume requested per replica.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub size: Quantity,
    pub storage_class_name: Option<String>,
}

/// Sizing of the shared storage cache of a component.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SharedStorageCache {
    /// Defaults to half of the memory request.
    pub memory_cache_size: Option<Quantity>,
    /// Defaults to the size of the cache volume.
    pub disk_cache_size: Option<Quantity>,
}

/// Where the cluster keeps its shared data.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum SharedStorageProvider {
    FileSystem(FileSystemProvider),
    S3(S3Provider),
}

impl SharedStorageProvider {
    pub fn s3(&self) -> Option<&S3Provider> {
        match self {
            SharedStorageProvider::S3(s3) => Some(s3),
            SharedStorageProvider::FileSystem(_) => None,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct FileSystemProvider {
    /// Path of a shared mount available on every node.
    pub path: String,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum S3ProviderType {
    #[default]
    Aws,
    Minio,
}

impl fmt::Display for S3ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            S3ProviderType::Aws => write!(f, "aws"),
            S3ProviderType::Minio => write!(f, "minio"),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct S3Provider {
    /// `<bucket>/<key prefix>`
    pub path: String,
    #[serde(rename = "type", default)]
    pub provider_type: S3ProviderType,
    pub endpoint: Option<String>,
    /// Secret holding `AWS_ACCESS_KEY_ID` and `AWS_SECRET_ACCESS_KEY`.
    pub secret_ref: Option<LocalObjectReference>,
    pub region: Option<String>,
}

impl S3Provider {
    /// Splits `path` into bucket and key prefix.
    pub fn bucket_and_prefix(&self) -> (&str, &str) {
        let path = self.path.trim_matches('/');
        match path.split_once('/') {
            Some((bucket, prefix)) => (bucket, prefix),
            None => (path, ""),
        }
    }
}
