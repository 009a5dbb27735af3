use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::debug;

use super::{label_selector, ResourceStore, StoreObject, FIELD_MANAGER, STATUS_FIELD_MANAGER};
use crate::util::errors::{Error, Result, StdError};

/// [`ResourceStore`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn name_of<K: StoreObject>(obj: &K) -> Result<String> {
    obj.meta()
        .name
        .clone()
        .ok_or_else(|| Error::StdError(StdError::MetadataMissing(format!("{} without a name", K::kind(&())))))
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get<K: StoreObject>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>> {
        Ok(K::api(self.client.clone(), namespace).get_opt(name).await?)
    }

    async fn list<K: StoreObject>(
        &self,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>> {
        let params = ListParams::default().labels(&label_selector(labels));
        let list = K::api(self.client.clone(), namespace).list(&params).await?;
        Ok(list.items)
    }

    async fn create<K: StoreObject>(&self, obj: &K) -> Result<K> {
        let api = K::api(self.client.clone(), obj.namespace().as_deref());
        let created = api.create(&PostParams::default(), obj).await?;
        debug!("Created {} '{}'", K::kind(&()), created.name_any());
        Ok(created)
    }

    async fn apply<K: StoreObject>(&self, obj: &K) -> Result<K> {
        let name = name_of(obj)?;
        let api = K::api(self.client.clone(), obj.namespace().as_deref());
        let applied = api
            .patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(obj))
            .await?;
        Ok(applied)
    }

    async fn delete<K: StoreObject>(&self, namespace: Option<&str>, name: &str) -> Result<()> {
        match K::api(self.client.clone(), namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(err)) if err.code == 404 => Ok(()),
            Err(e) => Err(Error::StdError(StdError::KubeError(e))),
        }
    }

    async fn patch_status<K: StoreObject>(
        &self,
        namespace: Option<&str>,
        name: &str,
        status: serde_json::Value,
    ) -> Result<()> {
        let patch = Patch::Apply(json!({
            "apiVersion": K::api_version(&()),
            "kind": K::kind(&()),
            "status": status,
        }));
        K::api(self.client.clone(), namespace)
            .patch_status(name, &PatchParams::apply(STATUS_FIELD_MANAGER).force(), &patch)
            .await?;
        Ok(())
    }
}
