//! End-to-end deploy runs against a mock Kubernetes API server.
//!
//! Each test renders a manifest template, decodes it and applies every
//! document through a real kube client talking to `k8s-mock`.

use std::path::Path;

use assert_matches::assert_matches;
use drone_kube::{
	config::{Build, Job, PluginConfig, Repo},
	k8s::{
		apply::{ApplyError, ApplyOutcome},
		client::{ClusterConnection, ClusterCredentials},
		resource::ResourceKindIdentifier,
	},
	manifest::DeployError,
	plugin::{Plugin, PluginError},
};
use indoc::indoc;
use k8s_mock::{HttpMockK8sServer, RunningHttpMockK8sServer};
use k8s_openapi::api::{apps::v1::Deployment, batch::v1::CronJob, core::v1::Service};
use serde_json::json;

const DEPLOYMENTS_IN_PROD: &str = "/apis/apps/v1/namespaces/prod/deployments";
const CRONJOBS_IN_JOBS: &str = "/apis/batch/v1/namespaces/jobs/cronjobs";

/// Deployment without a namespace followed by a CronJob in `jobs`.
const TWO_DOCUMENTS: &str = indoc! {r#"
	apiVersion: apps/v1
	kind: Deployment
	metadata:
	  name: api
	  labels:
	    build: "{{ .build.number }}"
	spec:
	  selector:
	    matchLabels:
	      app: api
	  template:
	    metadata:
	      labels:
	        app: api
	    spec:
	      containers:
	      - name: api
	        image: "{{ .repo.owner }}/{{ .repo.name }}:{{ .build.commit }}"
	---
	apiVersion: batch/v1
	kind: CronJob
	metadata:
	  name: cleanup
	  namespace: jobs
	spec:
	  schedule: "0 3 * * *"
	  jobTemplate:
	    spec:
	      template:
	        spec:
	          restartPolicy: Never
	          containers:
	          - name: cleanup
	            image: busybox
"#};

fn plugin_config(template: &Path) -> PluginConfig {
	PluginConfig {
		credentials: ClusterCredentials::Kubeconfig("unused".into()),
		namespace: "prod".to_string(),
		template: template.to_path_buf(),
		repo: Repo {
			owner: "acme".to_string(),
			name: "shop".to_string(),
		},
		build: Build {
			number: 7,
			commit: "abc123".to_string(),
			..Build::default()
		},
		job: Job::default(),
	}
}

/// Write `template`, connect to `server` and run the deploy.
async fn deploy(
	server: &RunningHttpMockK8sServer,
	template: &str,
) -> Result<Vec<ApplyOutcome>, PluginError> {
	let dir = tempfile::tempdir().expect("tempdir");
	let path = dir.path().join("deploy.yaml");
	std::fs::write(&path, template).expect("write template");

	let connection = ClusterConnection::from_kubeconfig(server.kubeconfig())
		.await
		.expect("failed to create connection");

	Plugin::new(plugin_config(&path)).exec_with(&connection).await
}

async fn mutation_log(server: &RunningHttpMockK8sServer) -> Vec<(String, String)> {
	server
		.mutations()
		.await
		.into_iter()
		.map(|r| (r.method, r.path))
		.collect()
}

#[tokio::test]
async fn test_creates_absent_objects_in_document_order() {
	let server = HttpMockK8sServer::builder().build().start().await;

	let outcomes = deploy(&server, TWO_DOCUMENTS).await.expect("deploy should succeed");

	assert_eq!(outcomes, [ApplyOutcome::Created, ApplyOutcome::Created]);
	assert_eq!(
		mutation_log(&server).await,
		[
			("POST".to_string(), DEPLOYMENTS_IN_PROD.to_string()),
			("POST".to_string(), CRONJOBS_IN_JOBS.to_string()),
		]
	);

	let deployment = server
		.object(DEPLOYMENTS_IN_PROD, "api")
		.expect("deployment should be stored in the default namespace");
	assert_eq!(deployment["metadata"]["namespace"], "prod");
	assert_eq!(deployment["metadata"]["labels"]["build"], "7");
	assert_eq!(
		deployment["spec"]["template"]["spec"]["containers"][0]["image"],
		"acme/shop:abc123"
	);
	assert!(server.object(CRONJOBS_IN_JOBS, "cleanup").is_some());
	assert!(server
		.object("/apis/batch/v1/namespaces/prod/cronjobs", "cleanup")
		.is_none());
}

#[tokio::test]
async fn test_updates_existing_object_and_creates_the_rest() {
	let server = HttpMockK8sServer::builder()
		.resources(vec![json!({
			"apiVersion": "apps/v1",
			"kind": "Deployment",
			"metadata": {
				"name": "api",
				"namespace": "prod",
				"labels": { "build": "6", "stale": "true" },
			},
		})])
		.build()
		.start()
		.await;

	let outcomes = deploy(&server, TWO_DOCUMENTS).await.expect("deploy should succeed");

	assert_eq!(outcomes, [ApplyOutcome::Updated, ApplyOutcome::Created]);
	assert_eq!(
		mutation_log(&server).await,
		[
			("PUT".to_string(), format!("{DEPLOYMENTS_IN_PROD}/api")),
			("POST".to_string(), CRONJOBS_IN_JOBS.to_string()),
		]
	);

	// whole-object replace: labels missing from the manifest are gone
	let deployment = server
		.object(DEPLOYMENTS_IN_PROD, "api")
		.expect("deployment should still exist");
	assert_eq!(deployment["metadata"]["labels"], json!({ "build": "7" }));
}

#[tokio::test]
async fn test_failure_stops_run_without_rollback() {
	let server = HttpMockK8sServer::builder().build().start().await;
	server.fail_requests("POST", CRONJOBS_IN_JOBS, 500).await;

	let result = deploy(&server, TWO_DOCUMENTS).await;

	assert_matches!(
		result,
		Err(PluginError::Deploy(DeployError::Document {
			index: 1,
			kind,
			source: ApplyError::Create { .. },
		})) if kind == ResourceKindIdentifier::of::<CronJob>()
	);
	// the first document stays applied
	assert!(server.object(DEPLOYMENTS_IN_PROD, "api").is_some());
	assert!(server.object(CRONJOBS_IN_JOBS, "cleanup").is_none());
}

#[tokio::test]
async fn test_lookup_failure_is_reported() {
	let server = HttpMockK8sServer::builder().build().start().await;
	server
		.fail_requests("GET", &format!("{DEPLOYMENTS_IN_PROD}/api"), 500)
		.await;

	let result = deploy(&server, TWO_DOCUMENTS).await;

	assert_matches!(
		result,
		Err(PluginError::Deploy(DeployError::Document {
			index: 0,
			source: ApplyError::Lookup { identity, .. },
			..
		})) if identity.name == "api" && identity.namespace == "prod"
	);
	assert!(mutation_log(&server).await.is_empty());
}

#[tokio::test]
async fn test_unsupported_kind_makes_no_cluster_calls() {
	let server = HttpMockK8sServer::builder().build().start().await;

	let result = deploy(
		&server,
		indoc! {"
			apiVersion: v1
			kind: Service
			metadata:
			  name: api
			spec:
			  ports:
			  - port: 80
			---
			apiVersion: apps/v1
			kind: Deployment
			metadata:
			  name: api
		"},
	)
	.await;

	assert_matches!(
		result,
		Err(PluginError::Deploy(DeployError::Document {
			index: 0,
			source: ApplyError::UnsupportedKind(kind),
			..
		})) if kind == ResourceKindIdentifier::of::<Service>()
	);
	let resource_requests: Vec<_> = server
		.requests()
		.await
		.into_iter()
		.filter(|r| r.path != "/version")
		.collect();
	assert!(resource_requests.is_empty(), "unexpected requests: {resource_requests:?}");
}

#[tokio::test]
async fn test_failure_index_counts_comment_only_documents() {
	let server = HttpMockK8sServer::builder().build().start().await;
	server.fail_requests("POST", CRONJOBS_IN_JOBS, 500).await;

	let manifest = format!("# generated manifest\n---\n{TWO_DOCUMENTS}");
	let result = deploy(&server, &manifest).await;

	assert_matches!(
		result,
		Err(PluginError::Deploy(DeployError::Document {
			index: 2,
			source: ApplyError::Create { .. },
			..
		}))
	);
	assert!(server.object(DEPLOYMENTS_IN_PROD, "api").is_some());
}

#[tokio::test]
async fn test_legacy_cronjob_version_is_unsupported() {
	let server = HttpMockK8sServer::builder().build().start().await;

	let result = deploy(
		&server,
		indoc! {"
			apiVersion: batch/v1beta1
			kind: CronJob
			metadata:
			  name: cleanup
		"},
	)
	.await;

	assert_matches!(
		result,
		Err(PluginError::Deploy(DeployError::Document {
			source: ApplyError::UnsupportedKind(kind),
			..
		})) if kind == ResourceKindIdentifier::new("batch", "v1beta1", "CronJob")
	);
}

#[tokio::test]
async fn test_invalid_document_fails_before_any_apply() {
	let server = HttpMockK8sServer::builder().build().start().await;

	let result = deploy(
		&server,
		indoc! {"
			apiVersion: apps/v1
			kind: Deployment
			metadata:
			  name: api
			---
			kind: Deployment
			metadata:
			  name: worker
		"},
	)
	.await;

	assert_matches!(result, Err(PluginError::Manifest(_)));
	assert!(mutation_log(&server).await.is_empty());
	assert_eq!(server.object_count(), 0);
}

#[tokio::test]
async fn test_second_run_updates_everything() {
	let server = HttpMockK8sServer::builder().build().start().await;

	deploy(&server, TWO_DOCUMENTS).await.expect("first deploy should succeed");
	let outcomes = deploy(&server, TWO_DOCUMENTS).await.expect("second deploy should succeed");

	assert_eq!(outcomes, [ApplyOutcome::Updated, ApplyOutcome::Updated]);
	assert!(server.object(DEPLOYMENTS_IN_PROD, "api").is_some());
	let deployment: Deployment = serde_json::from_value(
		server
			.object(DEPLOYMENTS_IN_PROD, "api")
			.expect("deployment should exist"),
	)
	.expect("stored object is a deployment");
	assert_eq!(deployment.metadata.namespace.as_deref(), Some("prod"));
}
