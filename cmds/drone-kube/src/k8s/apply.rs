//! Create-or-replace apply engine.
//!
//! Each decoded object is routed to the handler registered for its kind,
//! gets its namespace defaulted, and is then created when no object of the
//! same name exists or replaced as a whole when one does.
//!
//! Lookup and write are separate requests. A concurrent writer can slip in
//! between them; the resulting conflict surfaces as a create or update error
//! and is not retried.

use std::{fmt, sync::Arc};

use kube::Client;
use thiserror::Error;
use tracing::{debug, field, info, instrument, Span};

use super::{
	registry::HandlerRegistry,
	resource::{ObjectIdentity, Resource, ResourceKindIdentifier},
};

/// Errors that can occur while applying a single object.
#[derive(Debug, Error)]
pub enum ApplyError {
	#[error("unsupported object kind {0}")]
	UnsupportedKind(ResourceKindIdentifier),

	#[error("unable to find {kind} {identity}")]
	Lookup {
		kind: ResourceKindIdentifier,
		identity: ObjectIdentity,
		#[source]
		source: Box<kube::Error>,
	},

	#[error("unable to create {kind} {identity}")]
	Create {
		kind: ResourceKindIdentifier,
		identity: ObjectIdentity,
		#[source]
		source: Box<kube::Error>,
	},

	#[error("unable to update {kind} {identity}")]
	Update {
		kind: ResourceKindIdentifier,
		identity: ObjectIdentity,
		#[source]
		source: Box<kube::Error>,
	},
}

impl ApplyError {
	/// Kind of the object that failed to apply.
	pub fn kind(&self) -> &ResourceKindIdentifier {
		match self {
			Self::UnsupportedKind(kind)
			| Self::Lookup { kind, .. }
			| Self::Create { kind, .. }
			| Self::Update { kind, .. } => kind,
		}
	}

	/// Identity the failing request was made for, if any request was made.
	pub fn identity(&self) -> Option<&ObjectIdentity> {
		match self {
			Self::UnsupportedKind(_) => None,
			Self::Lookup { identity, .. }
			| Self::Create { identity, .. }
			| Self::Update { identity, .. } => Some(identity),
		}
	}
}

/// What [`ApplyEngine::apply`] did with an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
	Created,
	Updated,
}

impl fmt::Display for ApplyOutcome {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ApplyOutcome::Created => write!(f, "created"),
			ApplyOutcome::Updated => write!(f, "updated"),
		}
	}
}

/// Engine for applying decoded objects to a cluster.
pub struct ApplyEngine {
	client: Client,
	registry: Arc<HandlerRegistry>,
	default_namespace: String,
}

impl ApplyEngine {
	/// Create a new apply engine.
	///
	/// Objects without a namespace are placed in `default_namespace`.
	pub fn new(client: Client, registry: Arc<HandlerRegistry>, default_namespace: impl Into<String>) -> Self {
		Self {
			client,
			registry,
			default_namespace: default_namespace.into(),
		}
	}

	/// Apply a single object to the cluster.
	#[instrument(skip_all, fields(
		kind = %object.kind_id(),
		name = field::Empty,
		namespace = field::Empty,
	))]
	pub async fn apply(&self, mut object: Resource) -> Result<ApplyOutcome, ApplyError> {
		let kind = object.kind_id();
		let handler = self
			.registry
			.resolve(&kind)
			.ok_or_else(|| ApplyError::UnsupportedKind(kind.clone()))?;

		let mut identity = handler.identity(&object);
		if identity.namespace.is_empty() {
			identity.namespace.clone_from(&self.default_namespace);
			object.metadata_mut().namespace = Some(self.default_namespace.clone());
		}

		let span = Span::current();
		span.record("name", identity.name.as_str());
		span.record("namespace", identity.namespace.as_str());

		let existing = handler
			.find(&self.client, &identity)
			.await
			.map_err(|e| ApplyError::Lookup {
				kind: kind.clone(),
				identity: identity.clone(),
				source: Box::new(e),
			})?;

		// Whatever is stored gets overwritten by the supplied object
		let outcome = if existing.is_some() {
			debug!("object exists, replacing it");
			handler
				.update(&self.client, &object)
				.await
				.map_err(|e| ApplyError::Update {
					kind,
					identity,
					source: Box::new(e),
				})?;
			ApplyOutcome::Updated
		} else {
			debug!("object does not exist, creating it");
			handler
				.create(&self.client, &object)
				.await
				.map_err(|e| ApplyError::Create {
					kind,
					identity,
					source: Box::new(e),
				})?;
			ApplyOutcome::Created
		};

		info!(%outcome, "applied object");
		Ok(outcome)
	}
}
