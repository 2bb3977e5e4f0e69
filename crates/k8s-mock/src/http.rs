//! HTTP-based mock Kubernetes server using wiremock.
//!
//! The server keeps an in-memory object store and answers the requests a
//! create-or-replace client makes: get, list, create (POST) and replace (PUT).
//! Every request is journaled so tests can assert on what was sent.

use std::{
	collections::BTreeMap,
	sync::{Arc, RwLock},
};

use bon::Builder;
use kube::config::{
	AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext,
};
use serde_json::{json, Value};
use tracing::{debug, trace};
use wiremock::{
	matchers::{method, path, path_regex},
	Mock, MockServer, Request, ResponseTemplate,
};

use super::discovery::MockDiscovery;

/// Location of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ObjectKey {
	api_version: String,
	plural: String,
	namespace: Option<String>,
	name: String,
}

/// Type alias for the shared mutable object store.
type SharedResources = Arc<RwLock<BTreeMap<ObjectKey, Value>>>;

/// A mock Kubernetes server exposed over HTTP.
#[derive(Builder)]
pub struct HttpMockK8sServer {
	/// Objects present before the first request, as raw manifests. Their
	/// location is derived from apiVersion/kind using the discovery table.
	#[builder(default)]
	resources: Vec<Value>,
	/// `gitVersion` reported by `/version`.
	#[builder(default = "v1.31.0".to_string(), into)]
	git_version: String,
}

/// A running HTTP mock server instance.
pub struct RunningHttpMockK8sServer {
	server: MockServer,
	discovery: Arc<MockDiscovery>,
	resources: SharedResources,
}

/// A request received by the mock server.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
	pub method: String,
	pub path: String,
	/// Request body, if it was JSON.
	pub body: Option<Value>,
}

impl HttpMockK8sServer {
	/// Start the mock server with all configured resources.
	pub async fn start(self) -> RunningHttpMockK8sServer {
		let server = MockServer::start().await;
		let discovery = Arc::new(MockDiscovery::default());

		debug!(uri = %server.uri(), "Started mock K8s server");

		let mut resources = BTreeMap::new();
		for manifest in self.resources {
			if let Some(key) = key_for_manifest(&manifest, &discovery) {
				trace!(?key, "Registered resource");
				resources.insert(key, manifest);
			}
		}
		let shared_resources = Arc::new(RwLock::new(resources));

		mount_version(&server, &self.git_version).await;
		mount_resources(&server, &discovery, &shared_resources).await;

		RunningHttpMockK8sServer {
			server,
			discovery,
			resources: shared_resources,
		}
	}
}

impl RunningHttpMockK8sServer {
	/// Get the server's URI (e.g., "http://127.0.0.1:12345").
	pub fn uri(&self) -> String {
		self.server.uri()
	}

	/// Create a Kubeconfig pointing to this mock server.
	pub fn kubeconfig(&self) -> Kubeconfig {
		let cluster_name = "mock-cluster";
		let user_name = "mock-user";
		let context_name = "mock-context";

		Kubeconfig {
			clusters: vec![NamedCluster {
				name: cluster_name.to_string(),
				cluster: Some(Cluster {
					server: Some(self.uri()),
					insecure_skip_tls_verify: Some(true),
					..Default::default()
				}),
			}],
			contexts: vec![NamedContext {
				name: context_name.to_string(),
				context: Some(Context {
					cluster: cluster_name.to_string(),
					user: Some(user_name.to_string()),
					namespace: Some("default".to_string()),
					..Default::default()
				}),
			}],
			auth_infos: vec![NamedAuthInfo {
				name: user_name.to_string(),
				auth_info: Some(AuthInfo::default()),
			}],
			current_context: Some(context_name.to_string()),
			..Default::default()
		}
	}

	/// Stored object `name` under the collection path `api_path`
	/// (e.g. `/apis/apps/v1/namespaces/default/deployments`).
	pub fn object(&self, api_path: &str, name: &str) -> Option<Value> {
		let collection = parse_resource_path(api_path, &self.discovery)?;
		if collection.name.is_some() {
			return None;
		}
		let key = collection.into_key(name.to_string());
		let resources = self.resources.read().unwrap();
		resources.get(&key).cloned()
	}

	/// Number of stored objects.
	pub fn object_count(&self) -> usize {
		self.resources.read().unwrap().len()
	}

	/// Make every `method` request to exactly `path` fail with `status`.
	///
	/// Takes precedence over the regular handlers. The failing requests are
	/// still journaled.
	pub async fn fail_requests(&self, http_method: &str, request_path: &str, status: u16) {
		Mock::given(method(http_method))
			.and(path(request_path))
			.respond_with(status_response(status, "InternalError", "injected failure"))
			.with_priority(1)
			.mount(&self.server)
			.await;
	}

	/// All requests received so far, in arrival order.
	pub async fn requests(&self) -> Vec<RecordedRequest> {
		self.server
			.received_requests()
			.await
			.unwrap_or_default()
			.into_iter()
			.map(|req| RecordedRequest {
				method: req.method.to_string(),
				path: req.url.path().to_string(),
				body: serde_json::from_slice(&req.body).ok(),
			})
			.collect()
	}

	/// Received requests that could change cluster state.
	pub async fn mutations(&self) -> Vec<RecordedRequest> {
		self.requests()
			.await
			.into_iter()
			.filter(|r| r.method != "GET")
			.collect()
	}
}

/// Request path split into its resource coordinates.
#[derive(Debug, PartialEq, Eq)]
struct ResourcePath {
	api_version: String,
	plural: String,
	namespace: Option<String>,
	name: Option<String>,
}

impl ResourcePath {
	fn into_key(self, name: String) -> ObjectKey {
		ObjectKey {
			api_version: self.api_version,
			plural: self.plural,
			namespace: self.namespace,
			name,
		}
	}
}

/// Parse a Kubernetes API path.
///
/// Examples:
/// - `/api/v1/namespaces/default/configmaps/my-config` -> configmaps `my-config` in `default`
/// - `/apis/apps/v1/namespaces/default/deployments` -> deployments collection in `default`
/// - `/api/v1/namespaces/my-ns` -> namespace `my-ns`
///
/// Subresources and unknown kinds yield `None`.
fn parse_resource_path(request_path: &str, discovery: &MockDiscovery) -> Option<ResourcePath> {
	let segments: Vec<&str> = request_path
		.trim_matches('/')
		.split('/')
		.collect();

	let (api_version, rest) = match segments.as_slice() {
		["api", version, rest @ ..] => ((*version).to_string(), rest),
		["apis", group, version, rest @ ..] => (format!("{group}/{version}"), rest),
		_ => return None,
	};

	let (namespace, plural, tail) = match rest {
		["namespaces", namespace, plural, tail @ ..] => (Some(*namespace), *plural, tail),
		[plural, tail @ ..] => (None, *plural, tail),
		[] => return None,
	};

	let resource = discovery.by_plural(&api_version, plural)?;
	if resource.namespaced != namespace.is_some() && !(resource.namespaced && tail.is_empty()) {
		// cluster-wide lists of namespaced kinds are allowed, nothing else
		return None;
	}

	let name = match tail {
		[] => None,
		[name] => Some((*name).to_string()),
		_ => return None,
	};

	Some(ResourcePath {
		api_version,
		plural: plural.to_string(),
		namespace: namespace.map(ToString::to_string),
		name,
	})
}

/// Derive the storage key for a manifest using discovery data.
fn key_for_manifest(manifest: &Value, discovery: &MockDiscovery) -> Option<ObjectKey> {
	let api_version = manifest.get("apiVersion")?.as_str()?;
	let kind = manifest.get("kind")?.as_str()?;
	let name = manifest.pointer("/metadata/name")?.as_str()?;
	let resource = discovery.by_kind(api_version, kind)?;

	let namespace = resource.namespaced.then(|| {
		manifest
			.pointer("/metadata/namespace")
			.and_then(Value::as_str)
			.unwrap_or("default")
			.to_string()
	});

	Some(ObjectKey {
		api_version: api_version.to_string(),
		plural: resource.name.clone(),
		namespace,
		name: name.to_string(),
	})
}

fn status_response(code: u16, reason: &str, message: &str) -> ResponseTemplate {
	ResponseTemplate::new(code).set_body_json(json!({
		"kind": "Status",
		"apiVersion": "v1",
		"metadata": {},
		"status": "Failure",
		"message": message,
		"reason": reason,
		"code": code
	}))
}

fn not_found(request_path: &str) -> ResponseTemplate {
	status_response(404, "NotFound", &format!("{request_path} not found"))
}

/// Body with `metadata.namespace` filled in from the request path.
fn with_namespace(mut body: Value, namespace: Option<&str>) -> Value {
	if let (Some(namespace), Some(metadata)) = (namespace, body.get_mut("metadata")) {
		if let Some(metadata) = metadata.as_object_mut() {
			metadata.insert("namespace".to_string(), Value::String(namespace.to_string()));
		}
	}
	body
}

async fn mount_version(server: &MockServer, git_version: &str) {
	let trimmed = git_version.trim_start_matches('v');
	let mut parts = trimmed.split('.');
	let major = parts.next().unwrap_or("1");
	let minor = parts.next().unwrap_or("0");

	Mock::given(method("GET"))
		.and(path("/version"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"major": major,
			"minor": minor,
			"gitVersion": git_version,
			"gitCommit": "fake",
			"gitTreeState": "clean",
			"buildDate": "2024-01-01T00:00:00Z",
			"goVersion": "go1.22.0",
			"compiler": "gc",
			"platform": "linux/amd64"
		})))
		.mount(server)
		.await;
}

async fn mount_resources(server: &MockServer, discovery: &Arc<MockDiscovery>, resources: &SharedResources) {
	let get_discovery = Arc::clone(discovery);
	let get_resources = Arc::clone(resources);

	// GET - single object or list
	Mock::given(method("GET"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let request_path = req.url.path();
			let Some(target) = parse_resource_path(request_path, &get_discovery) else {
				return not_found(request_path);
			};
			let resources = get_resources.read().unwrap();

			if let Some(name) = target.name.clone() {
				return match resources.get(&target.into_key(name)) {
					Some(object) => ResponseTemplate::new(200).set_body_json(object),
					None => not_found(request_path),
				};
			}

			let items: Vec<_> = resources
				.iter()
				.filter(|(key, _)| {
					key.api_version == target.api_version
						&& key.plural == target.plural
						&& (target.namespace.is_none() || key.namespace == target.namespace)
				})
				.map(|(_, v)| v.clone())
				.collect();

			let kind = get_discovery
				.by_plural(&target.api_version, &target.plural)
				.map_or_else(|| "List".to_string(), |r| format!("{}List", r.kind));
			ResponseTemplate::new(200).set_body_json(json!({
				"kind": kind,
				"apiVersion": target.api_version,
				"metadata": {"resourceVersion": "1"},
				"items": items
			}))
		})
		.mount(server)
		.await;

	let post_discovery = Arc::clone(discovery);
	let post_resources = Arc::clone(resources);

	// POST - create, conflicting with any existing object of the same name
	Mock::given(method("POST"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let request_path = req.url.path();
			let Some(target) = parse_resource_path(request_path, &post_discovery) else {
				return not_found(request_path);
			};
			if target.name.is_some() {
				return status_response(405, "MethodNotAllowed", "create must target a collection");
			}

			let Ok(body) = serde_json::from_slice::<Value>(&req.body) else {
				return status_response(400, "BadRequest", "body is not json");
			};
			let Some(name) = body.pointer("/metadata/name").and_then(Value::as_str) else {
				return status_response(422, "Invalid", "metadata.name: Required value");
			};
			let name = name.to_string();
			let body = with_namespace(body, target.namespace.as_deref());

			let mut resources = post_resources.write().unwrap();
			let key = target.into_key(name.clone());
			if resources.contains_key(&key) {
				return status_response(409, "AlreadyExists", &format!("{name} already exists"));
			}
			trace!(?key, "Created resource");
			resources.insert(key, body.clone());
			ResponseTemplate::new(201).set_body_json(body)
		})
		.mount(server)
		.await;

	let put_discovery = Arc::clone(discovery);
	let put_resources = Arc::clone(resources);

	// PUT - replace an existing object as a whole
	Mock::given(method("PUT"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let request_path = req.url.path();
			let Some(target) = parse_resource_path(request_path, &put_discovery) else {
				return not_found(request_path);
			};
			let Some(name) = target.name.clone() else {
				return status_response(405, "MethodNotAllowed", "replace must target an object");
			};

			let Ok(body) = serde_json::from_slice::<Value>(&req.body) else {
				return status_response(400, "BadRequest", "body is not json");
			};
			let body = with_namespace(body, target.namespace.as_deref());

			let mut resources = put_resources.write().unwrap();
			let key = target.into_key(name);
			let Some(stored) = resources.get_mut(&key) else {
				return not_found(request_path);
			};
			trace!(?key, "Replaced resource");
			*stored = body.clone();
			ResponseTemplate::new(200).set_body_json(body)
		})
		.mount(server)
		.await;
}
