use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use harvest_ledger::services;
use harvest_ledger::settings::Settings;
use harvest_ledger::store::memory::MemoryStore;
use harvest_ledger::store::rtdb::RtdbStore;
use harvest_ledger::store::TreeStore;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    #[arg(long, default_value = "log4rs.yaml")]
    log4rs: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = Settings::load(&args.config).expect("Could not load config file.");

    init_logging(&args.log4rs).expect("Failed to initialize logging.");
    log::info!("Starting harvest-ledger.");

    let store: Arc<dyn TreeStore> = match settings.store.backend.as_str() {
        "memory" => Arc::new(MemoryStore::new()),
        "rtdb" => {
            let url = settings
                .store
                .url
                .as_deref()
                .expect("store.url is required for the rtdb backend");
            Arc::new(RtdbStore::new(url, settings.store.auth_token.clone()))
        }
        other => anyhow::bail!("unknown store backend: {}", other),
    };

    println!("[*] Starting services.");
    services::start_services(store, settings).await
}

fn init_logging(path: &str) -> Result<(), anyhow::Error> {
    if !Path::new("logs").exists() {
        fs::create_dir("logs")?;
    }

    match log4rs::init_file(path, Default::default()) {
        Ok(_) => {
            println!("[*] Logging initialized successfully.");
            Ok(())
        }
        Err(e) => {
            println!("[ERROR] Failed to initialize logging: {}", e);
            Err(anyhow::anyhow!("Could not initialize logging: {}", e))
        }
    }
}
