//! Resource kinds known to the mock server.

use std::collections::HashMap;

/// Kinds the mock server can store, keyed by apiVersion (`v1`, `apps/v1`, ...).
pub struct MockDiscovery {
	pub resources: HashMap<String, Vec<MockApiResource>>,
}

impl Default for MockDiscovery {
	fn default() -> Self {
		Self {
			resources: HashMap::from([
				(
					"v1".to_string(),
					vec![
						MockApiResource::namespaced("configmaps", "ConfigMap"),
						MockApiResource::namespaced("secrets", "Secret"),
						MockApiResource::namespaced("services", "Service"),
						MockApiResource::cluster_scoped("namespaces", "Namespace"),
					],
				),
				(
					"apps/v1".to_string(),
					vec![
						MockApiResource::namespaced("deployments", "Deployment"),
						MockApiResource::namespaced("statefulsets", "StatefulSet"),
						MockApiResource::namespaced("daemonsets", "DaemonSet"),
					],
				),
				(
					"batch/v1".to_string(),
					vec![
						MockApiResource::namespaced("cronjobs", "CronJob"),
						MockApiResource::namespaced("jobs", "Job"),
					],
				),
			]),
		}
	}
}

impl MockDiscovery {
	/// Look up a resource by apiVersion and kind.
	pub fn by_kind(&self, api_version: &str, kind: &str) -> Option<&MockApiResource> {
		self.resources
			.get(api_version)?
			.iter()
			.find(|r| r.kind == kind)
	}

	/// Look up a resource by apiVersion and plural name.
	pub fn by_plural(&self, api_version: &str, plural: &str) -> Option<&MockApiResource> {
		self.resources
			.get(api_version)?
			.iter()
			.find(|r| r.name == plural)
	}
}

/// A mock API resource definition.
pub struct MockApiResource {
	/// Plural name used in request paths.
	pub name: String,
	pub kind: String,
	pub namespaced: bool,
}

impl MockApiResource {
	pub fn namespaced(name: &str, kind: &str) -> Self {
		Self {
			name: name.to_string(),
			kind: kind.to_string(),
			namespaced: true,
		}
	}

	pub fn cluster_scoped(name: &str, kind: &str) -> Self {
		Self {
			name: name.to_string(),
			kind: kind.to_string(),
			namespaced: false,
		}
	}
}
