use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use dotenv::dotenv;
use sqlx::postgres::PgPoolOptions;

use survey_rewards::repositories::gateway::HttpPaymentGateway;
use survey_rewards::repositories::identity::FirebaseIdentityProvider;
use survey_rewards::repositories::memory::MemoryStore;
use survey_rewards::repositories::postgres::PgDocumentStore;
use survey_rewards::repositories::store::DocumentStore;
use survey_rewards::services::{self, http};
use survey_rewards::settings::{Settings, StoreBackend};

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
    dotenv().ok();
    let args = Args::parse();

    init_logging(&args.log4rs)?;
    let settings = Settings::load(&args.config)?;
    log::info!("Starting survey rewards service.");

    let store = open_store(&settings).await?;
    let gateway = Arc::new(HttpPaymentGateway::new(settings.payment_gateway.url.clone()));
    let identity = Arc::new(FirebaseIdentityProvider::new(
        settings.identity.url.clone(),
        settings.identity.api_key.clone(),
        settings.identity.email_domain.clone(),
    ));

    let channels = services::start_services(store, gateway, identity, &settings);
    http::start_http_server(channels, &settings.http.listen).await?;

    Ok(())
}

async fn open_store(settings: &Settings) -> Result<Arc<dyn DocumentStore>> {
    match settings.store.backend {
        StoreBackend::Memory => {
            log::warn!("Using the in-memory store. Data is lost on restart.");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Postgres => {
            let postgres = settings
                .postgres
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("Missing [postgres] section for the postgres store."))?;
            let conn = PgPoolOptions::new()
                .max_connections(postgres.max_connections)
                .connect(&postgres.url)
                .await?;

            let store = PgDocumentStore::new(conn);
            store.migrate().await?;

            Ok(Arc::new(store))
        }
    }
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
