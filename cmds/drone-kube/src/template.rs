//! Manifest template rendering.
//!
//! Templates use Go text/template syntax and see the build metadata under
//! `.repo`, `.build`, `.job` and `.config`, e.g. `{{ .build.number }}` or
//! `{{ .build.tag | default "latest" }}`.
//!
//! Handlebars-style paths without the leading dot (`{{ build.number }}`)
//! are not accepted: `build` parses as a function name and the template is
//! rejected with a parse error before anything is rendered.

use std::{
	collections::HashMap,
	path::{Path, PathBuf},
};

use gtmpl::{Context, FuncError, Template, Value};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::{
	config::{Build, Job, PluginConfig, Repo},
	k8s::client::ClusterCredentials,
};

#[derive(Debug, Error)]
pub enum TemplateError {
	#[error("unable to read template {}", path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("template parse error: {0}")]
	Parse(String),

	#[error("template rendering failed: {0}")]
	Render(String),

	#[error("unable to build template context")]
	Context(#[from] serde_json::Error),
}

/// Deployment settings visible to templates. Credentials are left out.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TemplateSettings {
	pub namespace: String,
	pub server: String,
	pub kubeconfig: String,
	pub template: String,
}

/// Values a template is rendered with.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TemplateContext {
	pub repo: Repo,
	pub build: Build,
	pub job: Job,
	pub config: TemplateSettings,
}

impl From<&PluginConfig> for TemplateContext {
	fn from(config: &PluginConfig) -> Self {
		let (server, kubeconfig) = match &config.credentials {
			ClusterCredentials::Kubeconfig(path) => (String::new(), path.display().to_string()),
			ClusterCredentials::Server { server, .. } => (server.clone(), String::new()),
		};
		Self {
			repo: config.repo.clone(),
			build: config.build.clone(),
			job: config.job.clone(),
			config: TemplateSettings {
				namespace: config.namespace.clone(),
				server,
				kubeconfig,
				template: config.template.display().to_string(),
			},
		}
	}
}

/// Returns the first non-empty argument, mimicking Sprig's default function.
///
/// Piped values become the last argument, so `{{ .value | default "x" }}`
/// is called with `["x", .value]`.
fn tmpl_default(args: &[Value]) -> Result<Value, FuncError> {
	if let Some(value) = args.iter().rev().find(|v| !is_empty_value(v)) {
		return Ok(value.clone());
	}
	Ok(args.first().cloned().unwrap_or(Value::NoValue))
}

fn is_empty_value(v: &Value) -> bool {
	match v {
		Value::NoValue | Value::Nil => true,
		Value::Bool(b) => !b,
		Value::String(s) => s.is_empty(),
		Value::Number(n) => n.as_f64().is_some_and(|f| f == 0.0),
		Value::Array(a) => a.is_empty(),
		Value::Map(m) => m.is_empty(),
		Value::Object(o) => o.is_empty(),
		_ => false,
	}
}

fn json_to_gtmpl(value: &JsonValue) -> Value {
	match value {
		JsonValue::Null => Value::Nil,
		JsonValue::Bool(b) => Value::Bool(*b),
		JsonValue::Number(n) => {
			if let Some(i) = n.as_i64() {
				Value::Number(i.into())
			} else if let Some(u) = n.as_u64() {
				Value::Number(u.into())
			} else if let Some(f) = n.as_f64() {
				Value::Number(f.into())
			} else {
				Value::Nil
			}
		}
		JsonValue::String(s) => Value::String(s.clone()),
		JsonValue::Array(arr) => Value::Array(arr.iter().map(json_to_gtmpl).collect()),
		JsonValue::Object(obj) => Value::Map(
			obj.iter()
				.map(|(k, v)| (k.clone(), json_to_gtmpl(v)))
				.collect::<HashMap<_, _>>(),
		),
	}
}

/// Render `text` with `context`, trimming surrounding whitespace.
pub fn render(text: &str, context: &TemplateContext) -> Result<String, TemplateError> {
	let mut tmpl = Template::default();
	tmpl.add_func("default", tmpl_default);
	tmpl.parse(text).map_err(|e| TemplateError::Parse(e.to_string()))?;

	let values = json_to_gtmpl(&serde_json::to_value(context)?);
	let rendered = tmpl
		.render(&Context::from(values))
		.map_err(|e| TemplateError::Render(e.to_string()))?;

	Ok(rendered.trim().to_string())
}

/// Read and render the template file at `path`.
#[instrument(skip(context))]
pub fn render_file(path: &Path, context: &TemplateContext) -> Result<String, TemplateError> {
	let text = std::fs::read_to_string(path).map_err(|source| TemplateError::Read {
		path: path.to_path_buf(),
		source,
	})?;
	let rendered = render(&text, context)?;
	debug!(bytes = rendered.len(), "rendered template");
	Ok(rendered)
}
