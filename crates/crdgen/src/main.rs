use kube::CustomResourceExt as _;
use mo_cluster::api::v1alpha1::{BucketClaim, MatrixOneCluster};

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&MatrixOneCluster::crd())?);
    println!("---");
    print!("{}", serde_yaml::to_string(&BucketClaim::crd())?);
    Ok(())
}
