//! Decoded manifest documents.
//!
//! Every document of a manifest decodes into a [`Resource`], a closed set of
//! typed shapes the plugin knows how to deploy, plus [`Resource::Unrecognized`]
//! for well-formed documents of any other kind. Unrecognized documents still
//! carry their [`ResourceKindIdentifier`] so the apply engine can report them.

use std::fmt;

use k8s_openapi::{
	api::{
		apps::v1::{DaemonSet, Deployment, StatefulSet},
		batch::v1::CronJob,
		core::v1::{ConfigMap, Secret},
	},
	apimachinery::pkg::apis::meta::v1::ObjectMeta,
	NamespaceResourceScope,
};
use kube::api::DynamicObject;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The `{group, version, kind}` triple identifying a resource type.
///
/// Equality is structural: all three fields must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKindIdentifier {
	pub group: String,
	pub version: String,
	pub kind: String,
}

impl ResourceKindIdentifier {
	pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
		Self {
			group: group.into(),
			version: version.into(),
			kind: kind.into(),
		}
	}

	/// Build an identifier from a manifest `apiVersion` and `kind`.
	///
	/// `apps/v1` splits into group `apps` and version `v1`; a bare `v1`
	/// belongs to the core (empty) group.
	pub fn from_api_version(api_version: &str, kind: &str) -> Self {
		let (group, version) = match api_version.split_once('/') {
			Some((g, v)) => (g, v),
			None => ("", api_version),
		};
		Self::new(group, version, kind)
	}

	/// The identifier of a statically typed resource.
	pub fn of<K: k8s_openapi::Resource>() -> Self {
		Self::new(K::GROUP, K::VERSION, K::KIND)
	}

	/// The `apiVersion` string for this identifier.
	pub fn api_version(&self) -> String {
		if self.group.is_empty() {
			self.version.clone()
		} else {
			format!("{}/{}", self.group, self.version)
		}
	}
}

impl fmt::Display for ResourceKindIdentifier {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} {}", self.kind, self.api_version())
	}
}

/// Name and namespace of an object.
///
/// The name is the only key used to look an object up in the cluster.
/// The namespace may be empty until the apply engine defaults it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ObjectIdentity {
	pub name: String,
	pub namespace: String,
}

impl ObjectIdentity {
	pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			namespace: namespace.into(),
		}
	}

	pub fn from_meta(meta: &ObjectMeta) -> Self {
		Self {
			name: meta.name.clone().unwrap_or_default(),
			namespace: meta.namespace.clone().unwrap_or_default(),
		}
	}
}

impl fmt::Display for ObjectIdentity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.namespace, self.name)
	}
}

/// Errors produced while turning a parsed document into a [`Resource`].
#[derive(Debug, Error)]
pub enum DecodeError {
	#[error("manifest missing apiVersion or kind")]
	MissingApiVersionOrKind,

	#[error("manifest missing metadata.name")]
	MissingName,

	#[error("decoding {kind} object")]
	Malformed {
		kind: ResourceKindIdentifier,
		#[source]
		source: serde_json::Error,
	},
}

/// A typed resource shape that has a dedicated variant in [`Resource`].
pub trait ResourceKind:
	kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()>
	+ k8s_openapi::Resource
	+ Clone
	+ fmt::Debug
	+ Serialize
	+ DeserializeOwned
	+ Send
	+ Sync
	+ 'static
{
	/// Borrow the typed object out of `resource` if it has this shape.
	fn from_resource(resource: &Resource) -> Option<&Self>;

	fn into_resource(self) -> Resource;
}

macro_rules! resource_kinds {
	($($variant:ident($ty:ty)),+ $(,)?) => {
		/// A decoded manifest document.
		#[derive(Debug, Clone)]
		pub enum Resource {
			$($variant($ty),)+
			/// A well-formed document whose kind has no typed shape.
			Unrecognized(DynamicObject),
		}

		impl Resource {
			pub fn kind_id(&self) -> ResourceKindIdentifier {
				match self {
					$(Self::$variant(_) => ResourceKindIdentifier::of::<$ty>(),)+
					Self::Unrecognized(obj) => obj
						.types
						.as_ref()
						.map(|t| ResourceKindIdentifier::from_api_version(&t.api_version, &t.kind))
						.unwrap_or_default(),
				}
			}

			pub fn metadata(&self) -> &ObjectMeta {
				match self {
					$(Self::$variant(obj) => &obj.metadata,)+
					Self::Unrecognized(obj) => &obj.metadata,
				}
			}

			pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
				match self {
					$(Self::$variant(obj) => &mut obj.metadata,)+
					Self::Unrecognized(obj) => &mut obj.metadata,
				}
			}

			fn decode_typed(kind: &ResourceKindIdentifier, value: Value) -> Result<Self, DecodeError> {
				let malformed = |source| DecodeError::Malformed { kind: kind.clone(), source };
				$(
					if *kind == ResourceKindIdentifier::of::<$ty>() {
						return serde_json::from_value::<$ty>(value)
							.map(Self::$variant)
							.map_err(malformed);
					}
				)+
				serde_json::from_value::<DynamicObject>(value)
					.map(Self::Unrecognized)
					.map_err(malformed)
			}
		}

		$(
			impl ResourceKind for $ty {
				fn from_resource(resource: &Resource) -> Option<&Self> {
					match resource {
						Resource::$variant(obj) => Some(obj),
						_ => None,
					}
				}

				fn into_resource(self) -> Resource {
					Resource::$variant(self)
				}
			}
		)+
	};
}

resource_kinds! {
	Deployment(Deployment),
	StatefulSet(StatefulSet),
	DaemonSet(DaemonSet),
	CronJob(CronJob),
	ConfigMap(ConfigMap),
	Secret(Secret),
}

impl Resource {
	/// Decode a parsed manifest document.
	///
	/// Documents must carry `apiVersion`, `kind` and a non-empty
	/// `metadata.name`; the namespace may be absent.
	pub fn from_value(value: Value) -> Result<Self, DecodeError> {
		let api_version = value.get("apiVersion").and_then(Value::as_str);
		let kind = value.get("kind").and_then(Value::as_str);
		let (Some(api_version), Some(kind)) = (api_version, kind) else {
			return Err(DecodeError::MissingApiVersionOrKind);
		};
		let kind = ResourceKindIdentifier::from_api_version(api_version, kind);

		let has_name = value
			.pointer("/metadata/name")
			.and_then(Value::as_str)
			.is_some_and(|name| !name.is_empty());
		if !has_name {
			return Err(DecodeError::MissingName);
		}

		Self::decode_typed(&kind, value)
	}

	pub fn identity(&self) -> ObjectIdentity {
		ObjectIdentity::from_meta(self.metadata())
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use rstest::rstest;
	use serde_json::json;

	use super::*;

	#[rstest]
	#[case("apps/v1", "Deployment", "apps", "v1")]
	#[case("batch/v1", "CronJob", "batch", "v1")]
	#[case("v1", "ConfigMap", "", "v1")]
	fn test_identifier_from_api_version(
		#[case] api_version: &str,
		#[case] kind: &str,
		#[case] group: &str,
		#[case] version: &str,
	) {
		let id = ResourceKindIdentifier::from_api_version(api_version, kind);
		assert_eq!(id, ResourceKindIdentifier::new(group, version, kind));
		assert_eq!(id.api_version(), api_version);
	}

	#[test]
	fn test_identifier_of_typed_resource() {
		assert_eq!(
			ResourceKindIdentifier::of::<Deployment>(),
			ResourceKindIdentifier::new("apps", "v1", "Deployment")
		);
		assert_eq!(
			ResourceKindIdentifier::of::<Secret>().to_string(),
			"Secret v1"
		);
		assert_eq!(
			ResourceKindIdentifier::of::<CronJob>().to_string(),
			"CronJob batch/v1"
		);
	}

	#[test]
	fn test_decode_deployment() {
		let resource = Resource::from_value(json!({
			"apiVersion": "apps/v1",
			"kind": "Deployment",
			"metadata": { "name": "api" },
			"spec": {
				"selector": { "matchLabels": { "app": "api" } },
				"template": {
					"metadata": { "labels": { "app": "api" } },
					"spec": { "containers": [{ "name": "api", "image": "api:1" }] }
				}
			}
		}))
		.expect("deployment should decode");

		assert_matches!(resource, Resource::Deployment(_));
		assert_eq!(resource.identity(), ObjectIdentity::new("api", ""));
		assert_eq!(
			resource.kind_id(),
			ResourceKindIdentifier::new("apps", "v1", "Deployment")
		);
	}

	#[test]
	fn test_decode_keeps_namespace() {
		let resource = Resource::from_value(json!({
			"apiVersion": "batch/v1",
			"kind": "CronJob",
			"metadata": { "name": "cleanup", "namespace": "jobs" },
		}))
		.expect("cronjob should decode");

		assert_matches!(resource, Resource::CronJob(_));
		assert_eq!(resource.identity(), ObjectIdentity::new("cleanup", "jobs"));
	}

	#[test]
	fn test_decode_unknown_kind_is_unrecognized() {
		let resource = Resource::from_value(json!({
			"apiVersion": "batch/v1beta1",
			"kind": "CronJob",
			"metadata": { "name": "legacy" },
		}))
		.expect("well-formed document should decode");

		assert_matches!(resource, Resource::Unrecognized(_));
		assert_eq!(
			resource.kind_id(),
			ResourceKindIdentifier::new("batch", "v1beta1", "CronJob")
		);
		assert_eq!(resource.identity().name, "legacy");
	}

	#[test]
	fn test_decode_missing_type_meta() {
		let result = Resource::from_value(json!({ "metadata": { "name": "x" } }));
		assert_matches!(result, Err(DecodeError::MissingApiVersionOrKind));

		let result = Resource::from_value(json!({ "kind": "ConfigMap", "metadata": { "name": "x" } }));
		assert_matches!(result, Err(DecodeError::MissingApiVersionOrKind));
	}

	#[rstest]
	#[case(json!({ "apiVersion": "v1", "kind": "ConfigMap" }))]
	#[case(json!({ "apiVersion": "v1", "kind": "ConfigMap", "metadata": {} }))]
	#[case(json!({ "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": "" } }))]
	fn test_decode_missing_name(#[case] value: Value) {
		assert_matches!(Resource::from_value(value), Err(DecodeError::MissingName));
	}

	#[test]
	fn test_decode_malformed_typed_body() {
		let result = Resource::from_value(json!({
			"apiVersion": "v1",
			"kind": "ConfigMap",
			"metadata": { "name": "settings" },
			"data": "not-a-map",
		}));
		assert_matches!(
			result,
			Err(DecodeError::Malformed { kind, .. }) if kind == ResourceKindIdentifier::of::<ConfigMap>()
		);
	}

	#[test]
	fn test_metadata_mut_updates_identity() {
		let mut resource = Resource::ConfigMap(ConfigMap {
			metadata: ObjectMeta {
				name: Some("settings".to_string()),
				..ObjectMeta::default()
			},
			..ConfigMap::default()
		});
		resource.metadata_mut().namespace = Some("prod".to_string());
		assert_eq!(resource.identity(), ObjectIdentity::new("settings", "prod"));
	}

	#[test]
	fn test_from_resource_matches_only_own_variant() {
		let resource = Deployment::default().into_resource();
		assert!(Deployment::from_resource(&resource).is_some());
		assert!(CronJob::from_resource(&resource).is_none());
	}
}
