//! Integration tests for ClusterConnection using HTTP mock server.

use assert_matches::assert_matches;
use drone_kube::{
	config::{Build, Job, PluginConfig, Repo},
	k8s::{
		apply::ApplyOutcome,
		client::{ClusterConnection, ClusterCredentials, ConnectionError},
	},
	plugin::{Plugin, PluginError},
};
use k8s_mock::HttpMockK8sServer;
use k8s_openapi::apimachinery::pkg::version::Info;
use kube::config::Kubeconfig;

fn write_kubeconfig(dir: &std::path::Path, kubeconfig: &Kubeconfig) -> std::path::PathBuf {
	let path = dir.join("kubeconfig");
	std::fs::write(
		&path,
		serde_json::to_string(kubeconfig).expect("serialize kubeconfig"),
	)
	.expect("write kubeconfig");
	path
}

#[tokio::test]
async fn test_connect_reports_server_version() {
	let server = HttpMockK8sServer::builder().build().start().await;

	let conn = ClusterConnection::from_kubeconfig(server.kubeconfig())
		.await
		.expect("connection should succeed");

	assert_eq!(
		*conn.server_version(),
		Info {
			major: "1".to_string(),
			minor: "31".to_string(),
			git_version: "v1.31.0".to_string(),
			git_commit: "fake".to_string(),
			git_tree_state: "clean".to_string(),
			build_date: "2024-01-01T00:00:00Z".to_string(),
			go_version: "go1.22.0".to_string(),
			compiler: "gc".to_string(),
			platform: "linux/amd64".to_string(),
		}
	);
	assert!(conn.cluster_identifier().starts_with(&server.uri()));
}

#[tokio::test]
async fn test_connect_unreachable_server() {
	let server = HttpMockK8sServer::builder().build().start().await;
	let mut kubeconfig = server.kubeconfig();
	// nothing listens on the discard port
	if let Some(cluster) = kubeconfig.clusters[0].cluster.as_mut() {
		cluster.server = Some("http://127.0.0.1:9".to_string());
	}

	let result = ClusterConnection::from_kubeconfig(kubeconfig).await;
	assert_matches!(result, Err(ConnectionError::Kube(_)));
}

#[tokio::test]
async fn test_connect_without_current_context() {
	let server = HttpMockK8sServer::builder().build().start().await;
	let kubeconfig = Kubeconfig {
		current_context: None,
		..server.kubeconfig()
	};

	let result = ClusterConnection::from_kubeconfig(kubeconfig).await;
	assert_matches!(result, Err(ConnectionError::Kubeconfig(_)));
}

#[tokio::test]
async fn test_plugin_exec_through_kubeconfig_file() {
	let server = HttpMockK8sServer::builder().build().start().await;
	let dir = tempfile::tempdir().expect("tempdir");
	let kubeconfig = write_kubeconfig(dir.path(), &server.kubeconfig());
	let template = dir.path().join("deploy.yaml");
	std::fs::write(
		&template,
		"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: settings\ndata:\n  build: \"{{ .build.number }}\"\n",
	)
	.expect("write template");

	let plugin = Plugin::new(PluginConfig {
		credentials: ClusterCredentials::Kubeconfig(kubeconfig),
		namespace: "staging".to_string(),
		template,
		repo: Repo::default(),
		build: Build {
			number: 12,
			..Build::default()
		},
		job: Job::default(),
	});
	let outcomes = plugin.exec().await.expect("deploy should succeed");

	assert_eq!(outcomes, [ApplyOutcome::Created]);
	let stored = server
		.object("/api/v1/namespaces/staging/configmaps", "settings")
		.expect("config map should be stored");
	assert_eq!(stored["data"]["build"], "12");
}

#[tokio::test]
async fn test_plugin_exec_renders_before_connecting() {
	let dir = tempfile::tempdir().expect("tempdir");

	let plugin = Plugin::new(PluginConfig {
		// would fail to connect if it were ever tried
		credentials: ClusterCredentials::Kubeconfig(dir.path().join("missing-kubeconfig")),
		namespace: "default".to_string(),
		template: dir.path().join("missing-template.yaml"),
		repo: Repo::default(),
		build: Build::default(),
		job: Job::default(),
	});

	assert_matches!(plugin.exec().await, Err(PluginError::Template(_)));
}
