//! Decision engine tests

use std::path::PathBuf;

use autodeploy::errors::DeployError;
use autodeploy::infra::decider::decide;
use autodeploy::infra::spec::{DriverKind, InfraSpec};
use autodeploy::models::analysis::{Analysis, Framework};
use autodeploy::models::intent::{Intent, Provider, Resource};

fn analysis(port: u16) -> Analysis {
    Analysis {
        repo_path: PathBuf::from("jobs/x/repo"),
        repo_url: "https://github.com/acme/shop.git".to_string(),
        framework: Framework::Flask,
        port,
        start_command: "python3 app.py".to_string(),
    }
}

#[test]
fn test_aws_app_runner_takes_port_from_analysis() {
    let spec = decide(&Intent::new(Provider::Aws, Resource::AppRunner), &analysis(8080)).unwrap();
    assert_eq!(
        spec,
        InfraSpec::AwsAppRunner {
            region: "us-east-1".to_string(),
            port: 8080,
        }
    );
    assert_eq!(spec.driver(), DriverKind::Container);
}

#[test]
fn test_aws_other_resources_become_vm() {
    for resource in [Resource::Vm, Resource::CloudRun, Resource::K8s] {
        let spec = decide(&Intent::new(Provider::Aws, resource), &analysis(5000)).unwrap();
        assert_eq!(
            spec,
            InfraSpec::AwsVm {
                instance_type: "t2.micro".to_string(),
                region: "us-east-1".to_string(),
            }
        );
        assert_eq!(spec.driver(), DriverKind::Remote);
    }
}

#[test]
fn test_gcp_always_vm() {
    for resource in [Resource::Vm, Resource::AppRunner, Resource::CloudRun, Resource::K8s] {
        let spec = decide(&Intent::new(Provider::Gcp, resource), &analysis(5000)).unwrap();
        assert_eq!(
            spec,
            InfraSpec::GcpVm {
                machine_type: "e2-micro".to_string(),
                region: "us-central1".to_string(),
            }
        );
        assert_eq!(spec.driver(), DriverKind::Remote);
    }
}

#[test]
fn test_azure_is_unsupported() {
    for resource in [Resource::Vm, Resource::AppRunner, Resource::CloudRun, Resource::K8s] {
        let err = decide(&Intent::new(Provider::Azure, resource), &analysis(5000)).unwrap_err();
        match err {
            DeployError::UnsupportedConfiguration { provider, resource: r } => {
                assert_eq!(provider, "azure");
                assert_eq!(r, resource.as_str());
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

#[test]
fn test_vm_sizing_ignores_analysis() {
    let a = decide(&Intent::new(Provider::Gcp, Resource::Vm), &analysis(1)).unwrap();
    let b = decide(&Intent::new(Provider::Gcp, Resource::Vm), &analysis(9999)).unwrap();
    assert_eq!(a, b);
}
