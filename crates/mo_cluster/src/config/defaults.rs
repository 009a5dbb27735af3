use k8s_openapi::api::core::v1::ConfigMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::v1alpha1::ComponentKind;
use crate::store::ResourceStore;
use crate::util::errors::{Error, Result, StdError};

/// Key of the operator ConfigMap holding the default service args.
pub const DEFAULT_ARGS_KEY: &str = "defaultArgs";

/// Default service command-line args per component kind.
///
/// Loaded once at startup and handed to every reconcile through the controller context. Never
/// mutated afterwards.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultArgs {
    #[serde(default)]
    pub log_service: Vec<String>,
    #[serde(default)]
    pub dn: Vec<String>,
    #[serde(default)]
    pub cn: Vec<String>,
    #[serde(default)]
    pub proxy: Vec<String>,
}

impl DefaultArgs {
    /// Parses the YAML (or JSON) document stored under [`DEFAULT_ARGS_KEY`].
    pub fn parse(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).map_err(|e| {
            Error::StdError(StdError::InvalidArgument(format!("malformed {DEFAULT_ARGS_KEY}: {e}")))
        })
    }

    pub fn for_kind(&self, kind: ComponentKind) -> &[String] {
        match kind {
            ComponentKind::LogService => &self.log_service,
            ComponentKind::DataNode => &self.dn,
            ComponentKind::ComputeNode => &self.cn,
            ComponentKind::Proxy => &self.proxy,
            ComponentKind::WebUI => &[],
        }
    }

    /// The args a component runs with: its own when it sets any, the defaults otherwise.
    pub fn service_args(&self, kind: ComponentKind, configured: Option<&[String]>) -> Vec<String> {
        match configured {
            Some(args) if !args.is_empty() => args.to_vec(),
            _ => self.for_kind(kind).to_vec(),
        }
    }

    /// Reads the defaults from the operator ConfigMap. A missing ConfigMap or key yields empty
    /// defaults.
    pub async fn load<S: ResourceStore>(store: &S, namespace: &str, name: &str) -> Result<Self> {
        let Some(cm) = store.get::<ConfigMap>(Some(namespace), name).await? else {
            warn!("ConfigMap '{}/{}' not found, running without default service args", namespace, name);
            return Ok(Self::default());
        };
        match cm.data.as_ref().and_then(|d| d.get(DEFAULT_ARGS_KEY)) {
            Some(raw) => {
                let args = Self::parse(raw)?;
                info!("Loaded default service args from '{}/{}'", namespace, name);
                Ok(args)
            }
            None => {
                warn!("ConfigMap '{}/{}' has no '{}' key", namespace, name, DEFAULT_ARGS_KEY);
                Ok(Self::default())
            }
        }
    }
}
