//! Embedded IaC templates, compiled into the binary

pub static AWS_VM_MAIN: &str = include_str!("templates/aws_vm_main.tf.tera");
pub static AWS_APP_RUNNER_MAIN: &str = include_str!("templates/aws_app_runner_main.tf.tera");
pub static GCP_VM_MAIN: &str = include_str!("templates/gcp_vm_main.tf.tera");

pub const AWS_VM: &str = "aws_vm_main.tf";
pub const AWS_APP_RUNNER: &str = "aws_app_runner_main.tf";
pub const GCP_VM: &str = "gcp_vm_main.tf";

/// All embedded templates as (name, content) pairs for registration with Tera.
pub const ALL_TEMPLATES: &[(&str, &str)] = &[
    (AWS_VM, AWS_VM_MAIN),
    (AWS_APP_RUNNER, AWS_APP_RUNNER_MAIN),
    (GCP_VM, GCP_VM_MAIN),
];
