use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use netcap_deployer::{
    check::{
        check_kubernetes_api, check_kubernetes_permissions, check_kubernetes_resources,
        log_outcomes, ConnectivitySettings, ConnectivityVerifier, HttpConnector,
    },
    config::Config,
    k8s::{DeploymentManager, K8sClient, KubeTunnelOpener, ResourceCatalog, ResourceNames},
};

#[derive(Parser)]
#[command(name = "netcap-deployer", version, about = "Deploy and check NetCap on Kubernetes")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create every NetCap object in the cluster
    Deploy,
    /// Check API access, permissions, deployed objects and hub connectivity
    Check,
    /// Remove every NetCap object
    Clean,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = Config::load()?;
    tracing::debug!(mode = %config.mode(), namespace = %config.resources_namespace, "Configuration loaded");

    match cli.command {
        Command::Deploy => deploy(&config).await,
        Command::Check => check(&config).await,
        Command::Clean => clean(&config).await,
    }
}

fn catalog(config: &Config) -> ResourceCatalog {
    ResourceCatalog::new(
        config.mode(),
        &config.resources_namespace,
        ResourceNames::default(),
    )
}

async fn connect(config: &Config) -> netcap_deployer::error::AppResult<K8sClient> {
    K8sClient::new(config.kubeconfig.as_deref(), config.kube_context.as_deref()).await
}

async fn deploy(config: &Config) -> Result<()> {
    let manager = DeploymentManager::new(connect(config).await?, catalog(config));

    match manager.create_all(config).await {
        Ok(true) => tracing::info!("NetCap deployed"),
        Ok(false) => tracing::info!("NetCap deployed without RBAC objects"),
        Err(failure) => {
            tracing::error!(rbac_ready = failure.rbac_ready, "{}", failure);
            return Err(failure.into());
        }
    }
    Ok(())
}

async fn check(config: &Config) -> Result<()> {
    let (client, outcomes) = check_kubernetes_api(connect(config)).await;
    let api_ok = log_outcomes("kubernetes-api", &outcomes);

    let client = match client {
        Some(client) if api_ok => client,
        _ => bail!("Status check results are ✗"),
    };
    let catalog = catalog(config);

    let outcomes =
        check_kubernetes_permissions(&client, config.mode(), &config.resources_namespace).await;
    let permissions_ok = log_outcomes("kubernetes-permissions", &outcomes);

    let outcomes = check_kubernetes_resources(&client, &catalog).await;
    let resources_ok = log_outcomes("k8s-components", &outcomes);

    let probe = HttpConnector::new()?;
    let tunnels = KubeTunnelOpener::new(client.inner().clone(), &config.proxy_host);
    let settings = ConnectivitySettings::from_config(config, catalog.names())?;
    let (connected, outcomes) = ConnectivityVerifier::new(&probe, &tunnels, settings)
        .verify()
        .await;
    log_outcomes("hub connectivity", &outcomes);

    if permissions_ok && resources_ok && connected {
        tracing::info!("Status check results are ✓");
        Ok(())
    } else {
        bail!("Status check results are ✗")
    }
}

async fn clean(config: &Config) -> Result<()> {
    let manager = DeploymentManager::new(connect(config).await?, catalog(config));

    let cancel = CancellationToken::new();
    let report = manager
        .delete_all(cancel, config.namespace_delete_timeout())
        .await;

    if !report.is_complete() {
        bail!("{} resources could not be removed", report.leftovers.len());
    }
    tracing::info!("NetCap resources removed");
    Ok(())
}
