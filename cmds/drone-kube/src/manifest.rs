//! Multi-document manifests.
//!
//! A rendered template holds any number of YAML documents separated by
//! `---` lines. They are decoded up front and then applied one at a time,
//! in document order. The first failure stops the run; documents applied
//! before it stay applied.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, info_span, Instrument};

use crate::k8s::{
	apply::{ApplyEngine, ApplyError, ApplyOutcome},
	resource::{DecodeError, Resource, ResourceKindIdentifier},
};

static DOCUMENT_SEPARATOR: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"---[[:space:]]*\n").expect("separator regex is valid"));

#[derive(Debug, Error)]
pub enum ManifestError {
	#[error("unable to parse document {index}")]
	Yaml {
		index: usize,
		#[source]
		source: serde_yaml_with_quirks::Error,
	},

	#[error("unable to decode document {index}")]
	Decode {
		index: usize,
		#[source]
		source: DecodeError,
	},
}

#[derive(Debug, Error)]
pub enum DeployError {
	#[error("unable to apply document {index} ({kind})")]
	Document {
		index: usize,
		kind: ResourceKindIdentifier,
		#[source]
		source: ApplyError,
	},
}

/// Split a manifest into its documents, dropping blank ones.
pub fn split_documents(text: &str) -> Vec<&str> {
	DOCUMENT_SEPARATOR
		.split(text)
		.filter(|chunk| !chunk.trim().is_empty())
		.collect()
}

fn is_comment_only(chunk: &str) -> bool {
	chunk.lines().all(|line| {
		let line = line.trim();
		line.is_empty() || line.starts_with('#')
	})
}

/// A decoded document and its position in the manifest.
#[derive(Debug, Clone)]
pub struct Document {
	pub index: usize,
	pub resource: Resource,
}

/// Split and decode every document of a manifest.
///
/// Documents holding nothing but comments are skipped. Indices, both in
/// errors and on the returned documents, still count them.
pub fn decode_documents(text: &str) -> Result<Vec<Document>, ManifestError> {
	let chunks = split_documents(text);
	info!(count = chunks.len(), "{} documents found", chunks.len());

	let mut documents = Vec::with_capacity(chunks.len());
	for (index, chunk) in chunks.into_iter().enumerate() {
		if is_comment_only(chunk) {
			tracing::debug!(index, "skipping empty document");
			continue;
		}
		let value: Value = serde_yaml_with_quirks::from_str(chunk)
			.map_err(|source| ManifestError::Yaml { index, source })?;
		if value.is_null() {
			tracing::debug!(index, "skipping null document");
			continue;
		}
		let resource = Resource::from_value(value).map_err(|source| ManifestError::Decode { index, source })?;
		tracing::debug!(index, kind = %resource.kind_id(), identity = %resource.identity(), "decoded document");
		documents.push(Document { index, resource });
	}
	Ok(documents)
}

/// Applies decoded documents in order.
pub struct Deployer {
	engine: ApplyEngine,
}

impl Deployer {
	pub fn new(engine: ApplyEngine) -> Self {
		Self { engine }
	}

	/// Apply `documents` one after another.
	///
	/// Returns the outcome of every document, or the first failure.
	pub async fn run(&self, documents: Vec<Document>) -> Result<Vec<ApplyOutcome>, DeployError> {
		let mut outcomes = Vec::with_capacity(documents.len());
		for Document { index, resource } in documents {
			let kind = resource.kind_id();
			info!(index, %kind, "applying document");

			let outcome = self
				.engine
				.apply(resource)
				.instrument(info_span!("document", index))
				.await
				.map_err(|source| DeployError::Document {
					index,
					kind,
					source,
				})?;
			outcomes.push(outcome);
		}
		Ok(outcomes)
	}
}
