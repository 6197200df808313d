use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use sb_core::{
	cloud_api::{AuthToken, HttpGateway, RequestConfig},
	config::{default_data_dir, AppConfig},
	geo::{haversine_distance, initial_bearing, Position},
	logging,
	model::{ShotPair, ShotPairDraft},
	sync::spawn_auto_sync,
	LocalStore, SyncEngine, SyncMode,
};
use tokio::signal;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "skytebane", about = "Offline-first field navigation data, synced per team")]
struct Args {
	/// Path to the skytebane data directory
	#[arg(long, env = "SKYTEBANE_DATA_DIR")]
	data_dir: Option<PathBuf>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Push local changes and pull the team's state
	Sync {
		/// Team to sync against, overrides the configured one
		#[arg(long)]
		team: Option<String>,
	},
	/// Run auto sync in the foreground until interrupted
	Watch,
	/// List the current shot pairs
	Pairs {
		#[arg(long)]
		json: bool,
	},
	/// Place a shot pair from a position, a range and a bearing
	Project {
		#[arg(long, allow_hyphen_values = true)]
		lat: f64,
		#[arg(long, allow_hyphen_values = true)]
		lng: f64,
		/// Range to the impact, in meters
		#[arg(long)]
		distance: f64,
		/// Bearing to the impact, degrees clockwise from north
		#[arg(long)]
		bearing: f64,
		#[arg(long)]
		name: Option<String>,
		/// Store the pair instead of only printing the target
		#[arg(long)]
		save: bool,
	},
	/// Delete a shot pair by pair id or by the local id of either end
	Forget { id: String },
	/// Great-circle distance and initial bearing between two points
	Distance {
		#[arg(allow_hyphen_values = true)]
		from_lat: f64,
		#[arg(allow_hyphen_values = true)]
		from_lng: f64,
		#[arg(allow_hyphen_values = true)]
		to_lat: f64,
		#[arg(allow_hyphen_values = true)]
		to_lng: f64,
	},
}

#[tokio::main]
async fn main() -> Result<()> {
	let args = Args::parse();

	if let Command::Distance {
		from_lat,
		from_lng,
		to_lat,
		to_lng,
	} = args.command
	{
		let (from, to) = (Position::new(from_lat, from_lng), Position::new(to_lat, to_lng));
		println!(
			"{:.1} m, bearing {:.1}°",
			haversine_distance(from, to),
			initial_bearing(from, to)
		);
		return Ok(());
	}

	let data_dir = match args.data_dir {
		Some(dir) => dir,
		None => default_data_dir()?,
	};
	let config = AppConfig::load_or_create(&data_dir)?.with_env_overrides();

	let _guard = logging::init(&config.logs_dir(), &config.log_level)?;

	let gateway = HttpGateway::new(RequestConfig::new(
		config.api_url.clone(),
		config.sync.request_timeout(),
		config.auth_token.clone().map(AuthToken::bearer),
	)?);
	let store = LocalStore::open(config.store_dir())
		.await
		.context("Failed to open local store")?;
	let engine = SyncEngine::new(Arc::new(gateway), Arc::new(store), config.sync.clone()).await?;

	match args.command {
		Command::Sync { team } => {
			engine.set_scope(team.or(config.active_team)).await?;

			let report = engine.sync(SyncMode::Manual).await;
			match (report.skipped, report.summary) {
				(Some(reason), _) => println!("Nothing synced: {reason:?}"),
				(None, Some(summary)) => println!("{summary}"),
				(None, None) => {}
			}
			for error in &report.result.errors {
				eprintln!("  {error}");
			}
		}

		Command::Watch => {
			engine.set_scope(config.active_team).await?;

			let Some(handle) = spawn_auto_sync(engine.clone()) else {
				return Err(anyhow!("Auto sync is disabled in the configuration"));
			};

			// catch up with whatever changed while we were not running
			engine.sync(SyncMode::Manual).await;

			signal::ctrl_c().await?;
			info!("Received Ctrl+C, shutting down;");
			handle.abort();
		}

		Command::Pairs { json } => {
			let pairs = engine.reconcile().await?;

			if json {
				println!("{}", serde_json::to_string_pretty(&pairs)?);
			} else {
				pairs.iter().for_each(print_pair);
			}
		}

		Command::Project {
			lat,
			lng,
			distance,
			bearing,
			name,
			save,
		} => {
			let mut draft = ShotPairDraft::new(Position::new(lat, lng), distance, bearing);
			draft.name = name;

			let [origin, target] = if save {
				engine.set_scope(config.active_team).await?;
				engine.record_shot_pair(draft).await?
			} else {
				draft.project()
			};

			println!(
				"{:.6}, {:.6} -> {:.6}, {:.6}",
				origin.position.lat, origin.position.lng, target.position.lat, target.position.lng
			);
		}

		Command::Forget { id } => {
			engine.set_scope(config.active_team).await?;

			let pair = engine
				.reconcile()
				.await?
				.into_iter()
				.find(|pair| {
					pair.pair_local_id.as_deref() == Some(id.as_str())
						|| pair.points().any(|p| p.local_id == id)
				})
				.ok_or_else(|| anyhow!("No shot pair with id {id}"))?;

			engine.delete_shot_pair(&pair).await?;
			println!("Deleted");
		}

		// answered before touching config or store
		Command::Distance { .. } => {}
	}

	Ok(())
}

fn print_pair(pair: &ShotPair) {
	let id = pair
		.pair_local_id
		.clone()
		.or_else(|| pair.origin.as_ref().map(|p| p.local_id.clone()))
		.or_else(|| pair.target.as_ref().map(|p| p.local_id.clone()))
		.unwrap_or_default();

	let range = pair
		.distance()
		.zip(pair.bearing())
		.map(|(d, b)| format!("{d:.0} m @ {b:.0}°"))
		.unwrap_or_else(|| "incomplete".to_string());

	println!(
		"{id}  {}  {range}{}",
		pair.name().unwrap_or("-"),
		if pair.ambiguous { "  (ambiguous)" } else { "" }
	);
}
