pub mod config;
pub mod k8s;
pub mod manifest;
pub mod plugin;
pub mod telemetry;
pub mod template;
