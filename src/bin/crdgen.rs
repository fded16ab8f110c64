use gitkube_controller::crd::Remote;
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&Remote::crd())?);
    Ok(())
}
