//! Kubernetes cluster connection management.

use std::{
	fmt,
	path::{Path, PathBuf},
	time::Duration,
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use k8s_openapi::apimachinery::pkg::version::Info;
use kube::{
	config::{
		AuthInfo, Cluster, Context, KubeConfigOptions, Kubeconfig, KubeconfigError, NamedAuthInfo,
		NamedCluster, NamedContext,
	},
	Client, Config,
};
use thiserror::Error;
use tracing::instrument;

/// CA bundle mounted into every pod with a service account.
pub const DEFAULT_CA_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// Default timeout for Kubernetes API requests.
const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(30);

/// Name of the cluster, user and context in kubeconfigs built from flags.
const GENERATED_CONTEXT: &str = "drone";

/// Errors that can occur when connecting to a Kubernetes cluster.
#[derive(Debug, Error)]
pub enum ConnectionError {
	#[error("unable to read kubeconfig {}", path.display())]
	ReadKubeconfig {
		path: PathBuf,
		#[source]
		source: KubeconfigError,
	},

	#[error("certificate authority data is not valid base64")]
	InvalidCaData(#[source] base64::DecodeError),

	#[error(transparent)]
	Kubeconfig(#[from] KubeconfigError),

	#[error(transparent)]
	Kube(#[from] kube::Error),
}

/// How the plugin authenticates against the API server.
#[derive(Clone, PartialEq, Eq)]
pub enum ClientAuth {
	/// Bearer token.
	Token(String),
	/// Client certificate and key files.
	Certificate { cert_file: PathBuf, key_file: PathBuf },
}

impl fmt::Debug for ClientAuth {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Token(_) => f.debug_tuple("Token").field(&"<redacted>").finish(),
			Self::Certificate {
				cert_file,
				key_file,
			} => f
				.debug_struct("Certificate")
				.field("cert_file", cert_file)
				.field("key_file", key_file)
				.finish(),
		}
	}
}

/// Where the API server's CA certificate comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateAuthority {
	/// Base64-encoded PEM bundle.
	Inline(String),
	/// PEM bundle on disk.
	File(PathBuf),
}

impl Default for CertificateAuthority {
	fn default() -> Self {
		Self::File(PathBuf::from(DEFAULT_CA_FILE))
	}
}

/// Everything needed to reach a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterCredentials {
	/// An existing kubeconfig file, used through its current context.
	Kubeconfig(PathBuf),
	/// Explicit API server endpoint.
	Server {
		server: String,
		auth: ClientAuth,
		certificate_authority: CertificateAuthority,
	},
}

impl ClusterCredentials {
	/// Produce the kubeconfig these credentials describe.
	///
	/// File-based credentials are read from disk; explicit ones become a
	/// single-context kubeconfig held in memory.
	pub fn to_kubeconfig(&self) -> Result<Kubeconfig, ConnectionError> {
		match self {
			Self::Kubeconfig(path) => read_kubeconfig(path),
			Self::Server {
				server,
				auth,
				certificate_authority,
			} => server_kubeconfig(server, auth, certificate_authority),
		}
	}
}

fn read_kubeconfig(path: &Path) -> Result<Kubeconfig, ConnectionError> {
	Kubeconfig::read_from(path).map_err(|source| ConnectionError::ReadKubeconfig {
		path: path.to_path_buf(),
		source,
	})
}

fn server_kubeconfig(
	server: &str,
	auth: &ClientAuth,
	certificate_authority: &CertificateAuthority,
) -> Result<Kubeconfig, ConnectionError> {
	let mut cluster = Cluster {
		server: Some(server.to_string()),
		..Default::default()
	};
	match certificate_authority {
		CertificateAuthority::Inline(data) => {
			let data = data.trim();
			STANDARD.decode(data).map_err(ConnectionError::InvalidCaData)?;
			cluster.certificate_authority_data = Some(data.to_string());
		}
		CertificateAuthority::File(path) => {
			cluster.certificate_authority = Some(path.display().to_string());
		}
	}

	let auth_info = match auth {
		ClientAuth::Token(token) => AuthInfo {
			token: Some(token.clone().into()),
			..Default::default()
		},
		ClientAuth::Certificate {
			cert_file,
			key_file,
		} => AuthInfo {
			client_certificate: Some(cert_file.display().to_string()),
			client_key: Some(key_file.display().to_string()),
			..Default::default()
		},
	};

	Ok(Kubeconfig {
		clusters: vec![NamedCluster {
			name: GENERATED_CONTEXT.to_string(),
			cluster: Some(cluster),
		}],
		auth_infos: vec![NamedAuthInfo {
			name: GENERATED_CONTEXT.to_string(),
			auth_info: Some(auth_info),
		}],
		contexts: vec![NamedContext {
			name: GENERATED_CONTEXT.to_string(),
			context: Some(Context {
				cluster: GENERATED_CONTEXT.to_string(),
				user: Some(GENERATED_CONTEXT.to_string()),
				..Default::default()
			}),
		}],
		current_context: Some(GENERATED_CONTEXT.to_string()),
		..Default::default()
	})
}

/// Represents a connection to a Kubernetes cluster.
///
/// This type encapsulates the kube client and server metadata.
#[derive(Clone)]
pub struct ClusterConnection {
	client: Client,
	server_version: Info,
	/// Human-readable identifier for the cluster (API server URL and context).
	cluster_identifier: String,
}

impl fmt::Debug for ClusterConnection {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ClusterConnection")
			.field("cluster_identifier", &self.cluster_identifier)
			.field("server_version", &self.server_version)
			.finish_non_exhaustive()
	}
}

impl ClusterConnection {
	/// Connect to the cluster described by `credentials`.
	#[instrument(skip_all)]
	pub async fn connect(credentials: &ClusterCredentials) -> Result<Self, ConnectionError> {
		let kubeconfig = credentials.to_kubeconfig()?;
		Self::from_kubeconfig(kubeconfig).await
	}

	/// Connect through the current context of `kubeconfig`.
	///
	/// Fetches the server version, so an unreachable or misconfigured
	/// cluster fails here rather than on the first apply.
	#[instrument(skip_all)]
	pub async fn from_kubeconfig(kubeconfig: Kubeconfig) -> Result<Self, ConnectionError> {
		let context = kubeconfig.current_context.clone().unwrap_or_default();
		let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;

		let cluster_identifier = format!("{}  (context:{})", config.cluster_url, context);
		tracing::debug!(cluster = %cluster_identifier, "connecting to cluster");

		config.read_timeout = Some(DEFAULT_API_TIMEOUT);
		let client = Client::try_from(config)?;

		let server_version = client.apiserver_version().await?;

		Ok(Self {
			client,
			server_version,
			cluster_identifier,
		})
	}

	/// Get a reference to the underlying kube client.
	pub fn client(&self) -> &Client {
		&self.client
	}

	/// Get the server version.
	pub fn server_version(&self) -> &Info {
		&self.server_version
	}

	/// Get the cluster identifier (API server URL and context name).
	pub fn cluster_identifier(&self) -> &str {
		&self.cluster_identifier
	}
}
