//! Cache a computed table across runs.
//!
//! Run twice to see the second run hit the cache:
//! `cargo run --example usage`

use std::time::Duration;

use serde::{Deserialize, Serialize};
use table_disk_cache::{DiskCache, JsonCodec, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Measurement {
    station: String,
    temperature_c: f32,
    humidity_pct: f32,
}

fn load_measurements() -> Vec<Measurement> {
    // Stands in for an expensive fetch or query
    vec![
        Measurement {
            station: "oslo".to_string(),
            temperature_c: 4.2,
            humidity_pct: 81.0,
        },
        Measurement {
            station: "lisbon".to_string(),
            temperature_c: 19.6,
            humidity_pct: 64.0,
        },
    ]
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("table_disk_cache=debug,usage=info")),
        )
        .init();

    let cache = DiskCache::open_default(JsonCodec::<Vec<Measurement>>::new())?;
    info!(dir = %cache.cache_dir().display(), "cache ready");

    let key = "weather/latest";
    let table = match cache.get(key)? {
        Some(table) => {
            info!("cache hit");
            table
        }
        None => {
            info!("cache miss, loading");
            let table = load_measurements();
            cache.set(key, &table, Some(Duration::from_secs(300)))?;
            table
        }
    };

    for row in &table {
        println!(
            "{:<10} {:>6.1} C {:>6.1} %",
            row.station, row.temperature_c, row.humidity_pct
        );
    }

    let pruned = cache.prune()?;
    info!(pruned, "swept expired entries");
    Ok(())
}
