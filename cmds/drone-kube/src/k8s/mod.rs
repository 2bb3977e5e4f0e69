//! Kubernetes access for the deploy plugin.
//!
//! Manifest documents decode into [`resource::Resource`] values, the
//! [`registry::HandlerRegistry`] maps their kinds to handlers, and the
//! [`apply::ApplyEngine`] drives each object through find, then update or
//! create, against a [`client::ClusterConnection`].

pub mod apply;
pub mod client;
pub mod handler;
pub mod registry;
pub mod resource;
