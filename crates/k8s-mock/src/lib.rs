//! Mock Kubernetes API server for testing.
//!
//! Serves get, list, create and replace for a fixed set of resource kinds
//! over real HTTP, so clients can connect to it through a kubeconfig.

pub mod discovery;
pub mod http;

pub use discovery::{MockApiResource, MockDiscovery};
pub use http::{HttpMockK8sServer, RecordedRequest, RunningHttpMockK8sServer};
