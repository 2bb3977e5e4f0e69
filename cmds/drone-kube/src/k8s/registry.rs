//! Lookup table from resource kinds to their handlers.

use std::collections::HashMap;

use k8s_openapi::api::{
	apps::v1::{DaemonSet, Deployment, StatefulSet},
	batch::v1::CronJob,
	core::v1::{ConfigMap, Secret},
};
use tracing::warn;

use super::{
	handler::{ResourceHandler, TypedHandler},
	resource::{ResourceKind, ResourceKindIdentifier},
};

/// Immutable mapping of [`ResourceKindIdentifier`] to [`ResourceHandler`].
///
/// Built once with a [`RegistryBuilder`]; afterwards it only serves lookups
/// and can be shared between apply calls without locking.
pub struct HandlerRegistry {
	handlers: HashMap<ResourceKindIdentifier, Box<dyn ResourceHandler>>,
}

impl HandlerRegistry {
	pub fn builder() -> RegistryBuilder {
		RegistryBuilder::default()
	}

	/// Registry with a handler for every kind that has a typed shape.
	pub fn builtin() -> Self {
		Self::builder()
			.register_typed::<Deployment>()
			.register_typed::<StatefulSet>()
			.register_typed::<DaemonSet>()
			.register_typed::<CronJob>()
			.register_typed::<ConfigMap>()
			.register_typed::<Secret>()
			.build()
	}

	/// Find the handler registered for exactly `kind`.
	///
	/// There is no fallback: group, version and kind must all match.
	pub fn resolve(&self, kind: &ResourceKindIdentifier) -> Option<&dyn ResourceHandler> {
		self.handlers.get(kind).map(Box::as_ref)
	}

	/// Registered kinds, sorted.
	pub fn kinds(&self) -> Vec<&ResourceKindIdentifier> {
		let mut kinds: Vec<_> = self.handlers.keys().collect();
		kinds.sort();
		kinds
	}

	pub fn len(&self) -> usize {
		self.handlers.len()
	}

	pub fn is_empty(&self) -> bool {
		self.handlers.is_empty()
	}
}

impl std::fmt::Debug for HandlerRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("HandlerRegistry")
			.field("kinds", &self.kinds())
			.finish()
	}
}

/// Collects handlers before freezing them into a [`HandlerRegistry`].
#[derive(Default)]
pub struct RegistryBuilder {
	handlers: HashMap<ResourceKindIdentifier, Box<dyn ResourceHandler>>,
}

impl RegistryBuilder {
	/// Register `handler` for `kind`. A later registration of the same kind wins.
	pub fn register(mut self, kind: ResourceKindIdentifier, handler: impl ResourceHandler + 'static) -> Self {
		if self.handlers.contains_key(&kind) {
			warn!(%kind, "replacing previously registered handler");
		}
		self.handlers.insert(kind, Box::new(handler));
		self
	}

	/// Register the typed handler for `K` under its own identifier.
	pub fn register_typed<K: ResourceKind>(self) -> Self {
		self.register(ResourceKindIdentifier::of::<K>(), TypedHandler::<K>::new())
	}

	pub fn build(self) -> HandlerRegistry {
		HandlerRegistry {
			handlers: self.handlers,
		}
	}
}
