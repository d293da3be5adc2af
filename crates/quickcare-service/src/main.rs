//! Main entry point for the QuickCare service.
//!
//! Loads configuration, wires the configured storage backend into the engine
//! and keeps the engine alive until interrupted, logging every committed
//! change.

use clap::Parser;
use quickcare_config::Config;
use quickcare_core::{EngineFactories, QuickCareBuilder, QuickCareEngine};
use quickcare_storage::get_all_implementations;
use std::path::PathBuf;

/// Command-line arguments for the QuickCare service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml", env = "QUICKCARE_CONFIG")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	tracing::info!("Started QuickCare");

	let config_path = args
		.config
		.to_str()
		.ok_or("configuration path is not valid UTF-8")?;
	let config = Config::from_file(config_path).await?;
	tracing::info!("Loaded configuration [{}]", config.store.id);

	let engine = build_engine(config)?;
	engine.initialize().await?;
	engine.run().await?;
	engine.shutdown().await?;

	tracing::info!("Stopped QuickCare");
	Ok(())
}

/// Builds the engine with every storage backend this binary ships.
fn build_engine(config: Config) -> Result<QuickCareEngine, Box<dyn std::error::Error>> {
	let storage_factories = get_all_implementations()
		.into_iter()
		.map(|(name, factory)| (name.to_string(), factory))
		.collect();

	let engine = QuickCareBuilder::new(config).build(EngineFactories { storage_factories })?;
	Ok(engine)
}

#[cfg(test)]
mod tests {
	use super::*;
	use quickcare_types::{Actor, MedicineDraft};
	use rust_decimal::Decimal;
	use std::fs;
	use tempfile::TempDir;

	fn write_config(dir: &TempDir) -> PathBuf {
		let data = dir.path().join("data");
		let path = dir.path().join("config.toml");
		fs::write(
			&path,
			format!(
				r#"
include = ["pricing.toml"]

[store]
id = "store-blr-01"
name = "QuickCare Indiranagar"

[storage]
primary = "file"

[storage.implementations.file]
storage_path = "{}"
"#,
				data.display()
			),
		)
		.unwrap();
		fs::write(
			dir.path().join("pricing.toml"),
			"[fees]\nstandard = 30\nexpress = 45\nemergency = 60\n",
		)
		.unwrap();
		path
	}

	#[test]
	fn test_args_defaults() {
		let args = Args::parse_from(["quickcare"]);
		assert_eq!(args.config, PathBuf::from("config.toml"));
		assert_eq!(args.log_level, "info");

		let args = Args::parse_from(["quickcare", "-c", "prod.toml", "-l", "debug"]);
		assert_eq!(args.config, PathBuf::from("prod.toml"));
		assert_eq!(args.log_level, "debug");
	}

	#[tokio::test]
	async fn test_engine_persists_across_restarts() {
		let dir = TempDir::new().unwrap();
		let path = write_config(&dir);
		let manager = Actor::store_manager("mgr-1");

		let config = Config::from_file(path.to_str().unwrap()).await.unwrap();
		let engine = build_engine(config).unwrap();
		engine.initialize().await.unwrap();
		let draft = MedicineDraft {
			name: "Paracetamol 500mg".into(),
			description: String::new(),
			category: "Pain Relief".into(),
			price: Decimal::new(2550, 2),
			stock: 40,
			min_stock: 10,
			prescription_required: false,
			image_url: None,
		};
		let created = engine.create_medicine(&manager, draft).await.unwrap();
		engine.shutdown().await.unwrap();

		let config = Config::from_file(path.to_str().unwrap()).await.unwrap();
		assert_eq!(config.fees.standard, Decimal::from(30));
		let restarted = build_engine(config).unwrap();
		restarted.initialize().await.unwrap();
		let reloaded = restarted.medicine(&created.id).await.unwrap();
		assert_eq!(reloaded, created);
	}
}
