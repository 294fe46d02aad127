use alertmanager_operator::crd::{Alert, Notifier, Recipient};
use kube::CustomResourceExt;

fn main() {
    println!("---");
    println!("# Alert CRD");
    println!("{}", serde_yaml::to_string(&Alert::crd()).unwrap());

    println!("---");
    println!("# Recipient CRD");
    println!("{}", serde_yaml::to_string(&Recipient::crd()).unwrap());

    println!("---");
    println!("# Notifier CRD");
    println!("{}", serde_yaml::to_string(&Notifier::crd()).unwrap());
}
