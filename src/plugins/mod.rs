//! Concrete build environment and layer registry implementations

pub mod aws_lambda_plugin;
pub mod docker_environment;

pub use aws_lambda_plugin::AwsLambdaRegistry;
pub use docker_environment::DockerEnvironment;
