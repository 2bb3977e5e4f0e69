use anyhow::{Context, Result};
use clap::Parser;
use drone_kube::{config::PluginArgs, plugin::Plugin, telemetry};
use tracing::info;

#[derive(Parser)]
#[command(name = "drone-kube")]
#[command(about = "Kubernetes deployment plugin for Drone", long_about = None)]
#[command(version = env!("DRONE_KUBE_VERSION"))]
struct Cli {
	#[command(flatten)]
	args: PluginArgs,
}

fn main() -> Result<()> {
	let mut cli = Cli::parse();

	// Settings may come from the env file, so parse again once it is loaded.
	// Variables already present in the environment are kept.
	if let Some(env_file) = cli.args.env_file.clone() {
		dotenvy::from_path(&env_file)
			.with_context(|| format!("unable to load env file {}", env_file.display()))?;
		cli = Cli::parse();
	}

	let runtime = tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.context("unable to start async runtime")?;
	runtime.block_on(run(cli.args))
}

async fn run(args: PluginArgs) -> Result<()> {
	let _telemetry = telemetry::init(args.log_level).context("unable to initialize logging")?;
	info!(version = env!("DRONE_KUBE_VERSION"), "drone-kube starting");

	let config = args.into_config().context("configuration error")?;
	let outcomes = Plugin::new(config).exec().await.context("deployment failed")?;

	info!(documents = outcomes.len(), "deployment finished");
	Ok(())
}
