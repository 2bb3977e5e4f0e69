//! Per-kind cluster operations.
//!
//! A [`ResourceHandler`] knows how to find, create and replace objects of
//! exactly one resource kind. The apply engine drives every kind through the
//! same handler contract, so supporting a new kind only needs a new handler.

use std::marker::PhantomData;

use async_trait::async_trait;
use k8s_openapi::api::{
	apps::v1::{DaemonSet, Deployment, StatefulSet},
	batch::v1::CronJob,
	core::v1::{ConfigMap, Secret},
};
use kube::{
	api::{Api, PostParams},
	Client, Resource as _,
};
use tracing::instrument;

use super::resource::{ObjectIdentity, Resource, ResourceKind, ResourceKindIdentifier};

/// Cluster operations for a single resource kind.
///
/// Passing an object of another kind to a handler is a programming error.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
	/// Name and namespace of `object`, exactly as decoded.
	fn identity(&self, object: &Resource) -> ObjectIdentity;

	/// Look up an object by name in `identity.namespace`.
	///
	/// A missing object is `Ok(None)`; only a failing request is an error.
	async fn find(&self, client: &Client, identity: &ObjectIdentity) -> kube::Result<Option<Resource>>;

	async fn create(&self, client: &Client, object: &Resource) -> kube::Result<Resource>;

	/// Replace the stored object with `object` as a whole.
	async fn update(&self, client: &Client, object: &Resource) -> kube::Result<Resource>;
}

/// Handler for a namespaced resource with a typed shape.
pub struct TypedHandler<K> {
	_kind: PhantomData<fn() -> K>,
}

pub type DeploymentHandler = TypedHandler<Deployment>;
pub type StatefulSetHandler = TypedHandler<StatefulSet>;
pub type DaemonSetHandler = TypedHandler<DaemonSet>;
pub type CronJobHandler = TypedHandler<CronJob>;
pub type ConfigMapHandler = TypedHandler<ConfigMap>;
pub type SecretHandler = TypedHandler<Secret>;

impl<K> TypedHandler<K> {
	pub const fn new() -> Self {
		Self { _kind: PhantomData }
	}
}

impl<K> Default for TypedHandler<K> {
	fn default() -> Self {
		Self::new()
	}
}

impl<K: ResourceKind> TypedHandler<K> {
	fn typed(object: &Resource) -> &K {
		K::from_resource(object).unwrap_or_else(|| {
			panic!(
				"{} handler was given a {} object",
				ResourceKindIdentifier::of::<K>(),
				object.kind_id()
			)
		})
	}

	fn api(client: &Client, namespace: &str) -> Api<K> {
		Api::namespaced(client.clone(), namespace)
	}
}

#[async_trait]
impl<K: ResourceKind> ResourceHandler for TypedHandler<K> {
	fn identity(&self, object: &Resource) -> ObjectIdentity {
		ObjectIdentity::from_meta(Self::typed(object).meta())
	}

	#[instrument(skip_all, fields(kind = K::KIND, %identity))]
	async fn find(&self, client: &Client, identity: &ObjectIdentity) -> kube::Result<Option<Resource>> {
		let found = Self::api(client, &identity.namespace)
			.get_opt(&identity.name)
			.await?;
		tracing::trace!(found = found.is_some(), "looked up object");
		Ok(found.map(K::into_resource))
	}

	#[instrument(skip_all, fields(kind = K::KIND))]
	async fn create(&self, client: &Client, object: &Resource) -> kube::Result<Resource> {
		let typed = Self::typed(object);
		let identity = ObjectIdentity::from_meta(typed.meta());
		Self::api(client, &identity.namespace)
			.create(&PostParams::default(), typed)
			.await
			.map(K::into_resource)
	}

	#[instrument(skip_all, fields(kind = K::KIND))]
	async fn update(&self, client: &Client, object: &Resource) -> kube::Result<Resource> {
		let typed = Self::typed(object);
		let identity = ObjectIdentity::from_meta(typed.meta());
		Self::api(client, &identity.namespace)
			.replace(&identity.name, &PostParams::default(), typed)
			.await
			.map(K::into_resource)
	}
}
