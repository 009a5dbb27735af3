//! Generated `fileservice` configuration.

use serde_json::{json, Map, Value};

use crate::api::v1alpha1::{ComponentSetSpec, S3ProviderType, SharedStorageProvider, Volume};
use crate::config::ConfigTree;
use crate::controllers::common::{memory_request, DATA_DIR, DATA_PATH};
use crate::util::quantity::{percent_of, to_size_string};

/// Builds the file services of a component: a local one on the data volume (or in memory), the
/// shared one on the cluster storage provider and the ETL one next to it.
pub fn file_service_config(
    provider: &SharedStorageProvider,
    set: &ComponentSetSpec,
    data_volume: Option<&Volume>,
) -> ConfigTree {
    let data_dir = format!("{DATA_PATH}/{DATA_DIR}");

    let local = match data_volume {
        Some(_) => json!({"name": "LOCAL", "backend": "DISK", "data-dir": format!("{data_dir}/local")}),
        None => json!({"name": "LOCAL", "backend": "MEM"}),
    };

    let mut shared = storage_backend(provider, "SHARED", "");
    if let Some(cache) = cache_config(set, data_volume, &data_dir) {
        shared.insert("cache".to_string(), cache);
    }
    let etl = storage_backend(provider, "ETL", "etl");

    let mut tree = ConfigTree::new();
    tree.set(
        &["fileservice"],
        Value::Array(vec![local, Value::Object(shared), Value::Object(etl)]),
    );
    tree
}

fn storage_backend(provider: &SharedStorageProvider, name: &str, sub_dir: &str) -> Map<String, Value> {
    let mut fs = Map::new();
    fs.insert("name".to_string(), json!(name));
    match provider {
        SharedStorageProvider::FileSystem(local) => {
            let backend = if name == "ETL" { "DISK-ETL" } else { "DISK" };
            fs.insert("backend".to_string(), json!(backend));
            fs.insert("data-dir".to_string(), json!(join_path(&local.path, sub_dir)));
        }
        SharedStorageProvider::S3(s3) => {
            let (bucket, prefix) = s3.bucket_and_prefix();
            fs.insert("backend".to_string(), json!("S3"));
            let mut s3_conf = Map::new();
            s3_conf.insert("bucket".to_string(), json!(bucket));
            s3_conf.insert("key-prefix".to_string(), json!(join_path(prefix, sub_dir)));
            if let Some(endpoint) = &s3.endpoint {
                s3_conf.insert("endpoint".to_string(), json!(endpoint));
            }
            if let Some(region) = &s3.region {
                s3_conf.insert("region".to_string(), json!(region));
            }
            if s3.provider_type == S3ProviderType::Minio {
                s3_conf.insert("is-minio".to_string(), json!(true));
            }
            fs.insert("s3".to_string(), Value::Object(s3_conf));
        }
    }
    fs
}

fn cache_config(set: &ComponentSetSpec, data_volume: Option<&Volume>, data_dir: &str) -> Option<Value> {
    let cache = set.shared_storage_cache.clone().unwrap_or_default();
    let memory = cache
        .memory_cache_size
        .or_else(|| memory_request(set).and_then(|q| percent_of(q, 50)));
    let disk = cache.disk_cache_size.or_else(|| data_volume.map(|v| v.size.clone()));

    let mut conf = Map::new();
    if let Some(size) = memory.as_ref().and_then(to_size_string) {
        conf.insert("memory-capacity".to_string(), json!(size));
    }
    if let (Some(size), Some(_)) = (disk.as_ref().and_then(to_size_string), data_volume) {
        conf.insert("disk-capacity".to_string(), json!(size));
        conf.insert("disk-path".to_string(), json!(format!("{data_dir}/disk-cache")));
    }
    (!conf.is_empty()).then_some(Value::Object(conf))
}

fn join_path(base: &str, sub: &str) -> String {
    match (base.trim_end_matches('/'), sub) {
        (base, "") => base.to_string(),
        ("", sub) => sub.to_string(),
        (base, sub) => format!("{base}/{sub}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::v1alpha1::{FileSystemProvider, S3Provider};
    use k8s_openapi::api::core::v1::ResourceRequirements;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use std::collections::BTreeMap;

    fn s3() -> SharedStorageProvider {
        SharedStorageProvider::S3(S3Provider {
            path: "mo-data/cluster-a".to_string(),
            provider_type: S3ProviderType::Minio,
            endpoint: Some("http://minio:9000".to_string()),
            ..Default::default()
        })
    }

    #[test]
    fn s3_backends_split_bucket_and_prefix() {
        let conf = file_service_config(&s3(), &ComponentSetSpec::default(), None);
        let services = conf.get(&["fileservice"]).unwrap().as_array().unwrap();

        assert_eq!(services[0], json!({"name": "LOCAL", "backend": "MEM"}));
        assert_eq!(services[1]["s3"]["bucket"], json!("mo-data"));
        assert_eq!(services[1]["s3"]["key-prefix"], json!("cluster-a"));
        assert_eq!(services[1]["s3"]["is-minio"], json!(true));
        assert_eq!(services[2]["s3"]["key-prefix"], json!("cluster-a/etl"));
        assert!(services[1].get("cache").is_none());
    }

    #[test]
    fn cache_defaults_from_memory_request_and_volume() {
        let set = ComponentSetSpec {
            resources: Some(ResourceRequirements {
                requests: Some(BTreeMap::from([("memory".to_string(), Quantity("2Gi".to_string()))])),
                ..Default::default()
            }),
            ..Default::default()
        };
        let volume = Volume {
            size: Quantity("10Gi".to_string()),
            storage_class_name: None,
        };
        let provider = SharedStorageProvider::FileSystem(FileSystemProvider {
            path: "/mnt/shared/".to_string(),
        });
        let conf = file_service_config(&provider, &set, Some(&volume));
        let services = conf.get(&["fileservice"]).unwrap().as_array().unwrap();

        assert_eq!(services[0]["data-dir"], json!("/var/lib/matrixone/data/local"));
        assert_eq!(services[1]["data-dir"], json!("/mnt/shared"));
        assert_eq!(services[2]["backend"], json!("DISK-ETL"));
        assert_eq!(services[1]["cache"]["memory-capacity"], json!("1073741824B"));
        assert_eq!(services[1]["cache"]["disk-capacity"], json!("10737418240B"));
    }

    #[test]
    fn renders_as_array_of_tables() {
        let rendered = file_service_config(&s3(), &ComponentSetSpec::default(), None)
            .render()
            .unwrap();
        assert!(rendered.contains("[[fileservice]]"));
    }
}
