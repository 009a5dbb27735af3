//! Access to the objects the operator reads and writes.
//!
//! Reconcilers are generic over [`ResourceStore`] so the same code runs against the API server
//! ([`KubeStore`]) and against an in-process map in tests ([`MemoryStore`]).

use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Service};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::api::v1alpha1::{BucketClaim, MatrixOneCluster};
use crate::util::errors::Result;

pub mod kube_store;
pub mod memory;

pub use kube_store::KubeStore;
pub use memory::MemoryStore;

pub const FIELD_MANAGER: &str = "matrixone-operator";
pub const STATUS_FIELD_MANAGER: &str = "matrixone-operator-status";

/// An object type the store knows how to address.
pub trait StoreObject:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Api handle for the scope. Cluster-scoped kinds ignore the namespace.
    fn api(client: Client, namespace: Option<&str>) -> Api<Self>;
}

macro_rules! namespaced_objects {
    ($($kind:ty),* $(,)?) => {
        $(
            impl StoreObject for $kind {
                fn api(client: Client, namespace: Option<&str>) -> Api<Self> {
                    match namespace {
                        Some(ns) => Api::namespaced(client, ns),
                        None => Api::all(client),
                    }
                }
            }
        )*
    };
}

namespaced_objects!(ConfigMap, Service, StatefulSet, Deployment, Pod, MatrixOneCluster);

impl StoreObject for BucketClaim {
    fn api(client: Client, _namespace: Option<&str>) -> Api<Self> {
        Api::all(client)
    }
}

#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Returns `None` when the object does not exist.
    async fn get<K: StoreObject>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>>;

    /// Lists objects carrying every label in `labels`. `None` lists across namespaces.
    async fn list<K: StoreObject>(
        &self,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>>;

    async fn create<K: StoreObject>(&self, obj: &K) -> Result<K>;

    /// Server-side applies the fields the operator manages.
    async fn apply<K: StoreObject>(&self, obj: &K) -> Result<K>;

    /// Deleting an absent object succeeds.
    async fn delete<K: StoreObject>(&self, namespace: Option<&str>, name: &str) -> Result<()>;

    /// Replaces the status sub-resource.
    async fn patch_status<K: StoreObject>(
        &self,
        namespace: Option<&str>,
        name: &str,
        status: serde_json::Value,
    ) -> Result<()>;
}

/// `k1=v1,k2=v2`
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_joins_pairs() {
        let labels = BTreeMap::from([
            ("matrixorigin.io/cluster".to_string(), "mo".to_string()),
            ("matrixorigin.io/component".to_string(), "cn".to_string()),
        ]);
        assert_eq!(
            label_selector(&labels),
            "matrixorigin.io/cluster=mo,matrixorigin.io/component=cn"
        );
    }
}
