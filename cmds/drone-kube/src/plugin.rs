//! The deploy run: render the template, decode its documents, connect to the
//! cluster and apply everything in order.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument};

use crate::{
	config::PluginConfig,
	k8s::{
		apply::{ApplyEngine, ApplyOutcome},
		client::{ClusterConnection, ConnectionError},
		registry::HandlerRegistry,
	},
	manifest::{decode_documents, DeployError, Deployer, Document, ManifestError},
	template::{self, TemplateContext, TemplateError},
};

#[derive(Debug, Error)]
pub enum PluginError {
	#[error("template processing failed")]
	Template(#[from] TemplateError),

	#[error("unable to make object descriptors")]
	Manifest(#[from] ManifestError),

	#[error("unable to connect to cluster")]
	Connection(#[from] ConnectionError),

	#[error(transparent)]
	Deploy(#[from] DeployError),
}

pub struct Plugin {
	config: PluginConfig,
	registry: Arc<HandlerRegistry>,
}

impl Plugin {
	/// Plugin handling every built-in kind.
	pub fn new(config: PluginConfig) -> Self {
		Self::with_registry(config, Arc::new(HandlerRegistry::builtin()))
	}

	pub fn with_registry(config: PluginConfig, registry: Arc<HandlerRegistry>) -> Self {
		Self { config, registry }
	}

	/// Render and decode the manifest without touching the cluster.
	pub fn documents(&self) -> Result<Vec<Document>, PluginError> {
		let rendered = template::render_file(&self.config.template, &TemplateContext::from(&self.config))?;
		Ok(decode_documents(&rendered)?)
	}

	/// Run the deployment against the configured cluster.
	///
	/// The manifest is decoded before connecting, so template mistakes are
	/// reported without any cluster traffic.
	#[instrument(skip_all, fields(template = %self.config.template.display()))]
	pub async fn exec(&self) -> Result<Vec<ApplyOutcome>, PluginError> {
		let documents = self.documents()?;
		let connection = ClusterConnection::connect(&self.config.credentials).await?;
		self.deploy(&connection, documents).await
	}

	/// Run the deployment over an established connection.
	#[instrument(skip_all, fields(template = %self.config.template.display()))]
	pub async fn exec_with(&self, connection: &ClusterConnection) -> Result<Vec<ApplyOutcome>, PluginError> {
		let documents = self.documents()?;
		self.deploy(connection, documents).await
	}

	async fn deploy(
		&self,
		connection: &ClusterConnection,
		documents: Vec<Document>,
	) -> Result<Vec<ApplyOutcome>, PluginError> {
		info!(
			cluster = connection.cluster_identifier(),
			server_version = %connection.server_version().git_version,
			namespace = %self.config.namespace,
			"deploying to cluster"
		);

		let engine = ApplyEngine::new(
			connection.client().clone(),
			Arc::clone(&self.registry),
			self.config.namespace.as_str(),
		);
		Ok(Deployer::new(engine).run(documents).await?)
	}
}
