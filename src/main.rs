use adpilot::config::AdPilotConfig;
use adpilot::dispatcher::{ActionDispatcher, LogNotifier, Notifier};
use adpilot::http::{GraphPlatformClient, RecordStoreClient, WebhookNotifier};
use adpilot::scheduler::{Scheduler, TokioRevertScheduler};
use adpilot::server::ApiServer;
use adpilot::store::SledExecutionStore;
use adpilot::{AutomationEngine, RunRequest};
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "adpilot")]
#[command(about = "Rules-based ads automation engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scheduler and HTTP invocation surface
    Run {
        /// Path to the configuration file
        #[arg(short, long, default_value = "adpilot.yaml")]
        config: String,

        /// Port to listen on
        #[arg(short, long, default_value_t = 3030)]
        port: u16,

        /// Webhook URL for send_notification actions (logs only if unset)
        #[arg(long)]
        notify_webhook: Option<String>,
    },
    /// Execute a single rule once and print the run summary
    Execute {
        #[arg(short, long, default_value = "adpilot.yaml")]
        config: String,

        /// Rule id to run
        rule_id: String,

        /// User owning the rule's ad account
        #[arg(short, long)]
        user_id: String,

        /// Evaluate conditions and safeguards without mutating anything
        #[arg(long)]
        dry_run: bool,
    },
}

fn build_engine(config: &AdPilotConfig, webhook: Option<String>) -> Result<Arc<AutomationEngine>> {
    let records = Arc::new(RecordStoreClient::new(
        config.record_store.base_url.clone(),
        config.record_store.api_token.clone(),
    )?);
    let platform = Arc::new(GraphPlatformClient::new(
        config.platform.base_url.clone(),
        config.platform.access_token.clone(),
    )?);
    let store = Arc::new(SledExecutionStore::new(&config.engine.persistence_path)?);
    let notifier: Arc<dyn Notifier> = match webhook {
        Some(url) => Arc::new(WebhookNotifier::new(url)?),
        None => Arc::new(LogNotifier),
    };
    let reverts = Arc::new(TokioRevertScheduler::new(platform.clone(), records.clone()));

    let dispatcher = ActionDispatcher::new(platform, records.clone(), notifier, reverts);
    Ok(Arc::new(AutomationEngine::new(
        records.clone(),
        records.clone(),
        records,
        store,
        dispatcher,
    )))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Cli::parse();

    match args.command {
        Commands::Run {
            config,
            port,
            notify_webhook,
        } => {
            let config_data = AdPilotConfig::from_file(&config)?;
            let engine = build_engine(&config_data, notify_webhook)?;

            let scheduler = Scheduler::new(engine.clone(), config_data.engine.tick_seconds);
            tokio::spawn(scheduler.run());

            let server = ApiServer::new(
                engine,
                config_data.server.rate_limit,
                config_data.server.api_keys.clone(),
            );
            server.run(port).await?;
        }
        Commands::Execute {
            config,
            rule_id,
            user_id,
            dry_run,
        } => {
            let config_data = AdPilotConfig::from_file(&config)?;
            let engine = build_engine(&config_data, None)?;

            let summary = engine
                .run(RunRequest {
                    rule_id,
                    user_id,
                    dry_run,
                    manual_run: true,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
