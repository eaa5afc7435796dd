//! Managed add-on installation
//!
//! The platform ships a fixed set of add-ons — storage, the airgap registry
//! and object store, disaster recovery, the runtime operator, and the admin
//! console — installed as Helm charts from the bundled charts directory.
//! Which of them a run installs is pure flag logic; the name functions are
//! side-effect free so the component registry can seed statuses before any
//! work starts.
//!
//! During installation the installer emits one progress event per status
//! change of each add-on over the channel it is handed, and guarantees a
//! terminal event for every add-on it was given.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use crate::config::InstallOptions;
use crate::exec::run_command_ok;
use crate::progress::AddOnProgress;
use crate::status::Status;
use crate::Error;

/// Storage add-on (local-path provisioner)
pub const STORAGE: &str = "Storage";
/// Object-storage add-on, airgap + multi-node only
pub const OBJECT_STORAGE: &str = "Object Storage";
/// Image registry add-on, airgap only
pub const REGISTRY: &str = "Registry";
/// Backup/restore add-on, gated on the DR entitlement
pub const DISASTER_RECOVERY: &str = "Disaster Recovery";
/// In-cluster operator that reconciles the installation after the CLI exits
pub const RUNTIME_OPERATOR: &str = "Runtime Operator";
/// The admin application
pub const ADMIN_CONSOLE: &str = "Admin Console";

/// Installs the platform's managed add-ons.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AddOnInstaller: Send + Sync {
    /// Ordered names of the add-ons a fresh install with these options will
    /// manage. Pure: no I/O, flags only.
    fn names_for_install(&self, opts: &InstallOptions) -> Vec<String>;

    /// Ordered names for an upgrade to these (target) options. Pure.
    fn names_for_upgrade(&self, opts: &InstallOptions) -> Vec<String>;

    /// Install every selected add-on, emitting progress events as work
    /// advances. The sender is owned by the callee and dropped on return,
    /// which closes the channel.
    async fn install(
        &self,
        opts: &InstallOptions,
        progress: UnboundedSender<AddOnProgress>,
    ) -> Result<(), Error>;

    /// Upgrade every selected add-on; same event contract as `install`
    async fn upgrade(
        &self,
        opts: &InstallOptions,
        progress: UnboundedSender<AddOnProgress>,
    ) -> Result<(), Error>;
}

/// One managed add-on: its display name, chart archive prefix, and target
/// namespace.
struct AddOnSpec {
    name: &'static str,
    chart_prefix: &'static str,
    namespace: &'static str,
}

/// Declared installation order. Storage first (others claim volumes from
/// it), the console last (it reports on everything before it).
const CATALOG: &[AddOnSpec] = &[
    AddOnSpec {
        name: STORAGE,
        chart_prefix: "openebs",
        namespace: "openebs",
    },
    AddOnSpec {
        name: OBJECT_STORAGE,
        chart_prefix: "seaweedfs",
        namespace: "seaweedfs",
    },
    AddOnSpec {
        name: REGISTRY,
        chart_prefix: "docker-registry",
        namespace: "registry",
    },
    AddOnSpec {
        name: DISASTER_RECOVERY,
        chart_prefix: "velero",
        namespace: "velero",
    },
    AddOnSpec {
        name: RUNTIME_OPERATOR,
        chart_prefix: "drydock-operator",
        namespace: crate::SYSTEM_NAMESPACE,
    },
    AddOnSpec {
        name: ADMIN_CONSOLE,
        chart_prefix: "admin-console",
        namespace: crate::SYSTEM_NAMESPACE,
    },
];

fn selected(opts: &InstallOptions) -> Vec<&'static AddOnSpec> {
    CATALOG
        .iter()
        .filter(|spec| match spec.name {
            OBJECT_STORAGE => opts.airgap && opts.multi_node,
            REGISTRY => opts.airgap,
            DISASTER_RECOVERY => opts.disaster_recovery,
            _ => true,
        })
        .collect()
}

/// Production installer driving helm against the bundled chart archives.
pub struct HelmAddOnInstaller {
    helm_binary: PathBuf,
    kubeconfig: PathBuf,
}

impl HelmAddOnInstaller {
    /// Build an installer using the given helm binary and kubeconfig
    pub fn new(helm_binary: PathBuf, kubeconfig: PathBuf) -> Self {
        Self {
            helm_binary,
            kubeconfig,
        }
    }

    fn chart_values(spec: &AddOnSpec, opts: &InstallOptions) -> Vec<String> {
        match spec.name {
            STORAGE => vec![format!(
                "localpv.basePath={}",
                opts.data_dir.join("openebs-local").display()
            )],
            ADMIN_CONSOLE => {
                let mut values = vec![
                    format!("service.nodePort={}", opts.admin_console_port),
                    format!("isAirgap={}", opts.airgap),
                ];
                if let Some(proxy) = &opts.https_proxy {
                    values.push(format!("extraEnv.HTTPS_PROXY={proxy}"));
                }
                values
            }
            REGISTRY => vec!["service.type=NodePort".to_string()],
            _ => Vec::new(),
        }
    }

    async fn helm_upgrade_install(
        &self,
        spec: &AddOnSpec,
        opts: &InstallOptions,
    ) -> Result<(), Error> {
        let chart = find_chart(&opts.charts_dir, spec.chart_prefix)?;
        let kubeconfig = self.kubeconfig.display().to_string();
        let release = spec.chart_prefix;

        let mut args = vec![
            "upgrade",
            "--install",
            release,
            &chart,
            "--namespace",
            spec.namespace,
            "--create-namespace",
            "--kubeconfig",
            &kubeconfig,
            "--wait",
        ];
        let values = Self::chart_values(spec, opts);
        for value in &values {
            args.push("--set");
            args.push(value);
        }

        run_command_ok(&self.helm_binary, &args).await
    }

    async fn run(
        &self,
        opts: &InstallOptions,
        progress: UnboundedSender<AddOnProgress>,
        running_desc: &str,
        done_desc: &str,
    ) -> Result<(), Error> {
        for spec in selected(opts) {
            send_event(&progress, spec.name, Status::running(running_desc));

            match self.helm_upgrade_install(spec, opts).await {
                Ok(()) => {
                    info!(addon = spec.name, "add-on done");
                    send_event(&progress, spec.name, Status::succeeded(done_desc));
                }
                Err(err) => {
                    send_event(&progress, spec.name, Status::failed(err.to_string()));
                    return Err(Error::stage(spec.name, err));
                }
            }
        }
        Ok(())
    }
}

/// Send an event, tolerating a closed channel: a receiver that went away
/// must not fail the install it was only observing.
fn send_event(progress: &UnboundedSender<AddOnProgress>, name: &str, status: Status) {
    if progress.send(AddOnProgress::new(name, status)).is_err() {
        warn!(addon = name, "progress receiver dropped");
    }
}

#[async_trait]
impl AddOnInstaller for HelmAddOnInstaller {
    fn names_for_install(&self, opts: &InstallOptions) -> Vec<String> {
        selected(opts).iter().map(|s| s.name.to_string()).collect()
    }

    fn names_for_upgrade(&self, opts: &InstallOptions) -> Vec<String> {
        // Same catalog and order; what differs between install and upgrade
        // is only the target flags the caller passes in.
        self.names_for_install(opts)
    }

    async fn install(
        &self,
        opts: &InstallOptions,
        progress: UnboundedSender<AddOnProgress>,
    ) -> Result<(), Error> {
        self.run(opts, progress, "Installing", "Installed").await
    }

    async fn upgrade(
        &self,
        opts: &InstallOptions,
        progress: UnboundedSender<AddOnProgress>,
    ) -> Result<(), Error> {
        self.run(opts, progress, "Upgrading", "Upgraded").await
    }
}

/// Find a chart archive by prefix in the bundled charts directory.
fn find_chart(charts_dir: &Path, prefix: &str) -> Result<String, Error> {
    let dir = std::fs::read_dir(charts_dir).map_err(|e| {
        Error::config(format!(
            "cannot read charts dir {}: {e}",
            charts_dir.display()
        ))
    })?;

    for entry in dir.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(prefix) && name.ends_with(".tgz") {
            return Ok(entry.path().to_string_lossy().to_string());
        }
    }

    Err(Error::config(format!(
        "no {prefix} chart found in {}",
        charts_dir.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(airgap: bool, dr: bool, multi_node: bool) -> InstallOptions {
        InstallOptions {
            airgap,
            disaster_recovery: dr,
            multi_node,
            ..Default::default()
        }
    }

    #[test]
    fn online_single_node_selection() {
        let installer =
            HelmAddOnInstaller::new(PathBuf::from("helm"), PathBuf::from("kubeconfig"));
        let names = installer.names_for_install(&opts(false, false, false));
        assert_eq!(names, vec![STORAGE, RUNTIME_OPERATOR, ADMIN_CONSOLE]);
    }

    #[test]
    fn airgap_adds_registry() {
        let installer =
            HelmAddOnInstaller::new(PathBuf::from("helm"), PathBuf::from("kubeconfig"));
        let names = installer.names_for_install(&opts(true, false, false));
        assert_eq!(
            names,
            vec![STORAGE, REGISTRY, RUNTIME_OPERATOR, ADMIN_CONSOLE]
        );
    }

    #[test]
    fn airgap_ha_adds_object_storage_before_registry() {
        let installer =
            HelmAddOnInstaller::new(PathBuf::from("helm"), PathBuf::from("kubeconfig"));
        let names = installer.names_for_install(&opts(true, false, true));
        assert_eq!(
            names,
            vec![
                STORAGE,
                OBJECT_STORAGE,
                REGISTRY,
                RUNTIME_OPERATOR,
                ADMIN_CONSOLE
            ]
        );
    }

    #[test]
    fn disaster_recovery_is_entitlement_gated() {
        let installer =
            HelmAddOnInstaller::new(PathBuf::from("helm"), PathBuf::from("kubeconfig"));
        let names = installer.names_for_install(&opts(false, true, false));
        assert!(names.contains(&DISASTER_RECOVERY.to_string()));
        let names = installer.names_for_install(&opts(false, false, false));
        assert!(!names.contains(&DISASTER_RECOVERY.to_string()));
    }

    #[test]
    fn upgrade_names_follow_target_flags() {
        let installer =
            HelmAddOnInstaller::new(PathBuf::from("helm"), PathBuf::from("kubeconfig"));
        // The currently-running version was online; the target is airgap.
        // Selection must follow the target.
        let names = installer.names_for_upgrade(&opts(true, false, false));
        assert!(names.contains(&REGISTRY.to_string()));
    }

    #[test]
    fn console_values_carry_port_and_airgap() {
        let spec = CATALOG.iter().find(|s| s.name == ADMIN_CONSOLE).unwrap();
        let options = InstallOptions {
            admin_console_port: 31111,
            airgap: true,
            ..Default::default()
        };
        let values = HelmAddOnInstaller::chart_values(spec, &options);
        assert!(values.contains(&"service.nodePort=31111".to_string()));
        assert!(values.contains(&"isAirgap=true".to_string()));
    }

    #[tokio::test]
    async fn missing_chart_emits_failed_event() {
        let installer =
            HelmAddOnInstaller::new(PathBuf::from("helm"), PathBuf::from("kubeconfig"));
        let options = InstallOptions {
            charts_dir: PathBuf::from("/nonexistent/charts"),
            ..Default::default()
        };
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let err = installer.install(&options, tx).await.unwrap_err();
        assert!(err.to_string().contains(STORAGE));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.name, STORAGE);
        assert_eq!(first.status.state, crate::status::State::Running);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.status.state, crate::status::State::Failed);
        // Channel closed after the failure: the sender was dropped inside.
        assert!(rx.recv().await.is_none());
    }
}
