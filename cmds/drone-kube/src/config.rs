//! Plugin configuration.
//!
//! Drone passes plugin settings as `PLUGIN_*` environment variables and build
//! metadata as `DRONE_*` ones. Every setting is also a command line flag, and
//! the `KUBE_*` variables take precedence over their `PLUGIN_*` aliases.

use std::path::{Path, PathBuf};

use clap::Args;
use serde::Serialize;
use thiserror::Error;
use tracing::Level;

use crate::k8s::client::{CertificateAuthority, ClientAuth, ClusterCredentials, DEFAULT_CA_FILE};

/// Namespace for objects whose manifest does not name one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Errors found while validating the plugin settings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
	#[error("KUBE_TEMPLATE, or template must be defined")]
	MissingTemplate,

	#[error("if not using KUBE_CONFIG, KUBE_SERVER must be defined")]
	MissingServer,

	#[error("if not using KUBE_CONFIG and no default CA file {} exists, KUBE_CA must be defined", default_ca.display())]
	MissingCa { default_ca: PathBuf },

	#[error("no KUBE_CONFIG, client certificate nor KUBE_TOKEN defined")]
	MissingAuth,
}

/// Command line interface of the plugin.
#[derive(Debug, Clone, Default, Args)]
pub struct PluginArgs {
	#[command(flatten)]
	pub cluster: ClusterArgs,

	#[command(flatten)]
	pub repo: RepoArgs,

	#[command(flatten)]
	pub build: BuildArgs,

	#[command(flatten)]
	pub job: JobArgs,

	/// Load environment variables from this file before reading settings
	#[arg(long)]
	pub env_file: Option<PathBuf>,

	/// Log level (overrides RUST_LOG)
	#[arg(long)]
	pub log_level: Option<Level>,
}

/// Cluster access and deployment settings.
#[derive(Debug, Clone, Default, Args)]
pub struct ClusterArgs {
	/// Kubernetes config file
	#[arg(long, env = "KUBE_CONFIG")]
	pub kubeconfig: Option<PathBuf>,

	/// PEM-encoded client certificate file
	#[arg(long, env = "KUBE_CLIENT_CERT")]
	pub clientcert: Option<PathBuf>,

	/// PEM-encoded client certificate key file
	#[arg(long, env = "KUBE_CLIENT_KEY")]
	pub clientkey: Option<PathBuf>,

	/// Kubernetes bearer token
	#[arg(long, env = "KUBE_TOKEN", hide_env_values = true)]
	pub token: Option<String>,

	#[arg(long = "plugin-token", env = "PLUGIN_TOKEN", hide = true, hide_env_values = true)]
	plugin_token: Option<String>,

	/// Certificate Authority file encoded into base64, e.g. `cat ca.pem | base64`
	#[arg(long, env = "KUBE_CA")]
	pub ca: Option<String>,

	#[arg(long = "plugin-ca", env = "PLUGIN_CA", hide = true)]
	plugin_ca: Option<String>,

	/// Server url, e.g. https://mykubernetes:6443
	#[arg(long, env = "KUBE_SERVER")]
	pub server: Option<String>,

	#[arg(long = "plugin-server", env = "PLUGIN_SERVER", hide = true)]
	plugin_server: Option<String>,

	/// Namespace for objects that do not set one [default: default]
	#[arg(long, env = "KUBE_NAMESPACE")]
	pub namespace: Option<String>,

	#[arg(long = "plugin-namespace", env = "PLUGIN_NAMESPACE", hide = true)]
	plugin_namespace: Option<String>,

	/// Manifest template file to deploy
	#[arg(long, env = "KUBE_TEMPLATE")]
	pub template: Option<PathBuf>,

	#[arg(long = "plugin-template", env = "PLUGIN_TEMPLATE", hide = true)]
	plugin_template: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct RepoArgs {
	/// Repository owner
	#[arg(long = "repo.owner", env = "DRONE_REPO_OWNER", default_value = "")]
	pub repo_owner: String,

	/// Repository name
	#[arg(long = "repo.name", env = "DRONE_REPO_NAME", default_value = "")]
	pub repo_name: String,
}

#[derive(Debug, Clone, Default, Args)]
pub struct BuildArgs {
	/// Git commit sha
	#[arg(long = "commit.sha", env = "DRONE_COMMIT_SHA", default_value = "")]
	pub commit_sha: String,

	/// Git commit ref
	#[arg(long = "commit.ref", env = "DRONE_COMMIT_REF", default_value = "refs/heads/master")]
	pub commit_ref: String,

	/// Git commit branch
	#[arg(long = "commit.branch", env = "DRONE_COMMIT_BRANCH", default_value = "master")]
	pub commit_branch: String,

	/// Git author name
	#[arg(long = "commit.author", env = "DRONE_COMMIT_AUTHOR", default_value = "")]
	pub commit_author: String,

	/// Build event
	#[arg(long = "build.event", env = "DRONE_BUILD_EVENT", default_value = "push")]
	pub build_event: String,

	/// Build number
	#[arg(long = "build.number", env = "DRONE_BUILD_NUMBER", default_value_t = 0)]
	pub build_number: u64,

	/// Build status
	#[arg(long = "build.status", env = "DRONE_BUILD_STATUS", default_value = "success")]
	pub build_status: String,

	/// Build link
	#[arg(long = "build.link", env = "DRONE_BUILD_LINK", default_value = "")]
	pub build_link: String,

	/// Build started
	#[arg(long = "build.started", env = "DRONE_BUILD_STARTED", default_value_t = 0)]
	pub build_started: i64,

	/// Build created
	#[arg(long = "build.created", env = "DRONE_BUILD_CREATED", default_value_t = 0)]
	pub build_created: i64,

	/// Build tag
	#[arg(long = "build.tag", env = "DRONE_TAG", default_value = "")]
	pub build_tag: String,
}

#[derive(Debug, Clone, Default, Args)]
pub struct JobArgs {
	/// Job started
	#[arg(long = "job.started", env = "DRONE_JOB_STARTED", default_value_t = 0)]
	pub job_started: i64,
}

/// Repository being built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Repo {
	pub owner: String,
	pub name: String,
}

/// Build that triggered the deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Build {
	pub tag: String,
	pub event: String,
	pub number: u64,
	pub commit: String,
	#[serde(rename = "ref")]
	pub git_ref: String,
	pub branch: String,
	pub author: String,
	pub status: String,
	pub link: String,
	pub started: i64,
	pub created: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Job {
	pub started: i64,
}

/// Validated plugin settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginConfig {
	pub credentials: ClusterCredentials,
	pub namespace: String,
	pub template: PathBuf,
	pub repo: Repo,
	pub build: Build,
	pub job: Job,
}

/// Treat empty values the same as unset ones.
fn non_empty<T: AsRef<std::ffi::OsStr>>(value: Option<T>) -> Option<T> {
	value.filter(|v| !v.as_ref().is_empty())
}

impl PluginArgs {
	/// Validate the settings, looking for the in-cluster CA in its usual place.
	pub fn into_config(self) -> Result<PluginConfig, ConfigError> {
		self.into_config_with_default_ca(Path::new(DEFAULT_CA_FILE))
	}

	/// Validate the settings, using `default_ca` when no CA is configured.
	pub fn into_config_with_default_ca(self, default_ca: &Path) -> Result<PluginConfig, ConfigError> {
		let cluster = self.cluster;

		let template = non_empty(cluster.template.or(cluster.plugin_template)).ok_or(ConfigError::MissingTemplate)?;
		let namespace = non_empty(cluster.namespace.or(cluster.plugin_namespace))
			.unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

		let credentials = if let Some(kubeconfig) = non_empty(cluster.kubeconfig) {
			ClusterCredentials::Kubeconfig(kubeconfig)
		} else {
			let server = non_empty(cluster.server.or(cluster.plugin_server)).ok_or(ConfigError::MissingServer)?;

			let certificate_authority = match non_empty(cluster.ca.or(cluster.plugin_ca)) {
				Some(data) => CertificateAuthority::Inline(data),
				None if default_ca.exists() => CertificateAuthority::File(default_ca.to_path_buf()),
				None => {
					return Err(ConfigError::MissingCa {
						default_ca: default_ca.to_path_buf(),
					})
				}
			};

			let auth = match (non_empty(cluster.clientcert), non_empty(cluster.clientkey)) {
				(Some(cert_file), Some(key_file)) => ClientAuth::Certificate { cert_file, key_file },
				_ => non_empty(cluster.token.or(cluster.plugin_token))
					.map(ClientAuth::Token)
					.ok_or(ConfigError::MissingAuth)?,
			};

			ClusterCredentials::Server {
				server,
				auth,
				certificate_authority,
			}
		};

		Ok(PluginConfig {
			credentials,
			namespace,
			template,
			repo: Repo {
				owner: self.repo.repo_owner,
				name: self.repo.repo_name,
			},
			build: Build {
				tag: self.build.build_tag,
				event: self.build.build_event,
				number: self.build.build_number,
				commit: self.build.commit_sha,
				git_ref: self.build.commit_ref,
				branch: self.build.commit_branch,
				author: self.build.commit_author,
				status: self.build.build_status,
				link: self.build.build_link,
				started: self.build.build_started,
				created: self.build.build_created,
			},
			job: Job {
				started: self.job.job_started,
			},
		})
	}
}
