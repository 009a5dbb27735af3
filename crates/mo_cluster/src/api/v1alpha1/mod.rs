use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

mod bucketclaim;
mod components;
mod matrixonecluster;
mod overlay;
mod storage;

pub use bucketclaim::*;
pub use components::*;
pub use matrixonecluster::*;
pub use overlay::*;
pub use storage::*;

pub const API_GROUP: &str = "core.matrixorigin.io";
pub const API_VERSION: &str = "core.matrixorigin.io/v1alpha1";

/// The kinds of workload a cluster is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
pub enum ComponentKind {
    LogService,
    DataNode,
    ComputeNode,
    Proxy,
    WebUI,
}

impl ComponentKind {
    /// Short name used in object names and labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::LogService => "log",
            ComponentKind::DataNode => "dn",
            ComponentKind::ComputeNode => "cn",
            ComponentKind::Proxy => "proxy",
            ComponentKind::WebUI => "webui",
        }
    }

    /// Value of `service-type` in the rendered configuration.
    pub fn service_type(&self) -> &'static str {
        match self {
            ComponentKind::LogService => "LOG",
            ComponentKind::DataNode => "DN",
            ComponentKind::ComputeNode => "CN",
            ComponentKind::Proxy => "PROXY",
            ComponentKind::WebUI => "WEBUI",
        }
    }

    /// Whether the component cannot start before the log service publishes discovery.
    pub fn needs_discovery(&self) -> bool {
        matches!(
            self,
            ComponentKind::DataNode | ComponentKind::ComputeNode | ComponentKind::Proxy
        )
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub fn conditions_schema(_: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
    serde_json::from_value(serde_json::json!({
        "type": "array",
        "x-kubernetes-list-type": "map",
        "x-kubernetes-list-map-keys": ["type"],
        "items": {
            "type": "object",
            "properties": {
                "lastTransitionTime": { "format": "date-time", "type": "string" },
                "message": { "type": "string" },
                "observedGeneration": { "type": "integer", "format": "int64", "default": 0 },
                "reason": { "type": "string" },
                "status": { "type": "string" },
                "type": { "type": "string" }
            },
            "required": [
                "lastTransitionTime",
                "message",
                "reason",
                "status",
                "type"
            ],
        },
    }))
    .expect("static schema is valid")
}
