//! Drydock CLI - install and upgrade the embedded platform on this host

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use kube::CustomResourceExt;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use drydock::addons::HelmAddOnInstaller;
use drydock::config::{ExtensionChart, InstallOptions};
use drydock::extensions::HelmExtensionsInstaller;
use drydock::hosts::SystemdHostAdapter;
use drydock::metadata::{Installation, KubeMetadataClient};
use drydock::orchestrator::InfraManager;
use drydock::runtime::K0sRuntime;
use drydock::status::State;
use drydock::support::CommandSupportBundle;

/// Drydock - provision and upgrade an embedded Kubernetes platform
#[derive(Parser, Debug)]
#[command(name = "drydock", version, about, long_about = None)]
struct Cli {
    /// Generate the Installation CRD manifest and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install the platform on this host
    Install(RunArgs),

    /// Upgrade a previously installed platform in place
    Upgrade(RunArgs),

    /// Show the cluster-side installation record
    Status,
}

/// Flags shared by install and upgrade
#[derive(Parser, Debug)]
struct RunArgs {
    /// Bundle version being installed or upgraded to
    #[arg(long, env = "DRYDOCK_VERSION", default_value = env!("CARGO_PKG_VERSION"))]
    bundle_version: String,

    /// Airgap mode: use pre-staged artifacts, no outbound network
    #[arg(long)]
    airgap: bool,

    /// Include the disaster-recovery add-on
    #[arg(long)]
    disaster_recovery: bool,

    /// Multi-node (high availability) mode
    #[arg(long)]
    multi_node: bool,

    /// NodePort for the admin console
    #[arg(long, default_value_t = drydock::config::DEFAULT_ADMIN_CONSOLE_PORT)]
    admin_console_port: u16,

    /// Data directory for the runtime and bundled artifacts
    #[arg(long, env = "DRYDOCK_DATA_DIR", default_value = drydock::config::DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Extension charts as name=chart:namespace triples, repeatable
    #[arg(long = "extension")]
    extensions: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&Installation::crd())
            .map_err(|e| anyhow::anyhow!("failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    match cli.command {
        Some(Commands::Install(args)) => run(args, false).await,
        Some(Commands::Upgrade(args)) => run(args, true).await,
        Some(Commands::Status) => show_status().await,
        None => {
            eprintln!("no command given; see --help");
            std::process::exit(2);
        }
    }
}

fn options_from(args: &RunArgs) -> anyhow::Result<InstallOptions> {
    let mut extensions = Vec::new();
    for raw in &args.extensions {
        extensions.push(parse_extension(raw)?);
    }

    Ok(InstallOptions {
        version: args.bundle_version.clone(),
        airgap: args.airgap,
        disaster_recovery: args.disaster_recovery,
        multi_node: args.multi_node,
        admin_console_port: args.admin_console_port,
        runtime_binary: args.data_dir.join("bin/k0s"),
        charts_dir: args.data_dir.join("charts"),
        data_dir: args.data_dir.clone(),
        extensions,
        ..Default::default()
    })
}

/// Parse `name=chart:namespace` into an extension declaration
fn parse_extension(raw: &str) -> anyhow::Result<ExtensionChart> {
    let (name, rest) = raw
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("extension must be name=chart:namespace, got {raw:?}"))?;
    let (chart, namespace) = rest
        .rsplit_once(':')
        .ok_or_else(|| anyhow::anyhow!("extension must be name=chart:namespace, got {raw:?}"))?;
    Ok(ExtensionChart {
        name: name.to_string(),
        chart: chart.to_string(),
        namespace: namespace.to_string(),
        values_file: None,
    })
}

async fn run(args: RunArgs, upgrade: bool) -> anyhow::Result<()> {
    let opts = options_from(&args)?;
    let kubeconfig = opts.data_dir.join("pki/admin.conf");
    let helm = opts.data_dir.join("bin/helm");

    let hosts = Arc::new(SystemdHostAdapter::default());
    let runtime = Arc::new(K0sRuntime::new(&opts, hosts));
    let addons = Arc::new(HelmAddOnInstaller::new(helm.clone(), kubeconfig.clone()));
    let extensions = Arc::new(HelmExtensionsInstaller::new(helm, kubeconfig.clone()));
    // Connects lazily: the kubeconfig only exists once the runtime is up.
    let metadata = Arc::new(KubeMetadataClient::new(kubeconfig.clone()));
    let support = Arc::new(CommandSupportBundle::new(
        opts.data_dir.join("bin/support-bundle"),
        kubeconfig,
        opts.data_dir.join("support"),
    ));

    let manager = InfraManager::new(runtime, addons, extensions, metadata, support);

    let verb = if upgrade { "Upgrade" } else { "Installation" };
    println!("=== Drydock {verb} ===");
    println!("Version: {}", opts.version);
    println!("Airgap: {}", opts.airgap);
    println!("Multi-node: {}", opts.multi_node);
    println!();

    if upgrade {
        manager.upgrade(opts).await?;
    } else {
        manager.install(opts).await?;
    }

    // The submission is accepted; from here we are just another polling
    // client of the status store.
    let mut seen: HashMap<String, State> = HashMap::new();
    loop {
        let infra = manager.get()?;
        for component in &infra.components {
            let state = component.status.state;
            if seen.get(&component.name) != Some(&state) {
                println!(
                    "  [{state}] {} {}",
                    component.name, component.status.description
                );
                seen.insert(component.name.clone(), state);
            }
        }

        if infra.status.state.is_terminal() {
            println!();
            match infra.status.state {
                State::Succeeded => {
                    println!("{}", infra.status.description);
                    return Ok(());
                }
                _ => {
                    eprintln!("{verb} failed: {}", infra.status.description);
                    std::process::exit(1);
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

async fn show_status() -> anyhow::Result<()> {
    let kubeconfig = PathBuf::from(drydock::config::DEFAULT_DATA_DIR).join("pki/admin.conf");
    let metadata = KubeMetadataClient::new(kubeconfig);

    use drydock::metadata::MetadataClient;
    let installation = metadata.latest_installation().await?;
    let status = installation.status.clone().unwrap_or_default();

    println!("Version: {}", installation.spec.version);
    println!("State:   {:?}", status.state);
    if let Some(reason) = status.reason {
        println!("Reason:  {reason}");
    }
    Ok(())
}
