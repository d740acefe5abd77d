//! `tenantry`: validates feature configuration files and checks tenant
//! routing against them.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tenantry_core::{AmbientContext, FeaturesConfig, TenantId, TenantStrategy};
use tenantry_store::{ContextProvider, EntityRegistry};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tenantry")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the features configuration file (JSON)
    #[arg(short, long, default_value = "features.json")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration and print the enabled features
    Check,

    /// Open a context for a tenant and report where it is routed
    Route {
        /// Tenant id to route
        #[arg(short, long)]
        tenant: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let raw = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("failed to read {}", cli.config.display()))?;
    let features = FeaturesConfig::from_json(&raw)?.into_builder().build()?;

    match cli.command {
        Commands::Check => {
            match features.multi_tenant() {
                Some(TenantStrategy::Discriminator(d)) => {
                    println!("multi-tenant: discriminator on '{}' ({:?})", d.tenant_field, d.store);
                }
                Some(TenantStrategy::Database(db)) => {
                    println!("multi-tenant: database, {} tenant(s)", db.tenants.len());
                    for (tenant, store) in &db.tenants {
                        println!("  {tenant}: {store:?}");
                    }
                }
                None => println!("multi-tenant: disabled ({:?})", features.store()),
            }
            match features.auditing() {
                Some(audit) => println!("auditing: missing user -> {}", audit.missing_user),
                None => println!("auditing: disabled"),
            }
            if let Some(identity) = features.identity() {
                println!(
                    "identity: {} / {} keyed by '{}'",
                    identity.user_entity, identity.role_entity, identity.key_field
                );
            }
        }
        Commands::Route { tenant } => {
            let provider =
                ContextProvider::builder(Arc::new(features), Arc::new(EntityRegistry::new()))
                    .build()?;
            let ambient = Arc::new(AmbientContext::new());
            let tenant = tenant.map(TenantId::new);
            let ctx = provider.context(&ambient, tenant.as_ref())?;
            println!("routed: {ctx:?}");
        }
    }

    Ok(())
}
