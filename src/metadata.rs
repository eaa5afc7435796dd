//! Cluster-side installation metadata
//!
//! Every run is recorded as an `Installation` object inside the cluster it
//! just created or upgraded. Fresh installs upsert a version-named object;
//! upgrades create a new timestamp-named object each time so history is
//! preserved for rollback and disaster recovery. A version-metadata
//! ConfigMap sits alongside for tooling that cannot read CRDs.
//!
//! This is the only state that survives the installer process; the in-memory
//! status store does not.

use chrono::Utc;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, CustomResource, CustomResourceExt, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info};

use crate::config::InstallOptions;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::{Error, SYSTEM_NAMESPACE};

/// Field manager used for every server-side apply
const FIELD_MANAGER: &str = "drydock";

/// Name of the version-metadata ConfigMap
const VERSION_METADATA_NAME: &str = "drydock-version-metadata";

/// Spec of one recorded installation or upgrade.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "drydock.dev",
    version = "v1beta1",
    kind = "Installation",
    plural = "installations",
    status = "InstallationStatus",
    namespaced = false,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct InstallationSpec {
    /// Bundle version this run installed or upgraded to
    pub version: String,

    /// Whether the run was performed in airgap mode
    pub airgap: bool,

    /// Whether the disaster-recovery add-on was selected
    pub disaster_recovery: bool,

    /// Whether the cluster runs in multi-node (high-availability) mode
    pub high_availability: bool,

    /// NodePort the admin console listens on
    pub admin_console_port: u16,

    /// License identifier, when the bundle carries one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_id: Option<String>,
}

/// Cluster-side lifecycle state of an installation object.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub enum InstallationState {
    /// The run that created this object is still in flight
    #[default]
    Installing,
    /// The run finished and the object is finalized
    Installed,
    /// The run failed; `reason` carries the error text
    Failed,
}

/// Status of an installation object.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstallationStatus {
    /// Current lifecycle state
    #[serde(default)]
    pub state: InstallationState,

    /// Human-readable reason for the current state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Installation {
    /// Build an installation object from the run's options.
    ///
    /// Fresh installs name the object after the version so re-recording is
    /// an idempotent upsert; upgrades get a timestamp name so every run
    /// leaves its own record.
    pub fn from_options(opts: &InstallOptions, upgrade: bool) -> Self {
        let name = if upgrade {
            Utc::now().format("%Y%m%d%H%M%S").to_string()
        } else {
            sanitize_name(&opts.version)
        };
        Installation::new(
            &name,
            InstallationSpec {
                version: opts.version.clone(),
                airgap: opts.airgap,
                disaster_recovery: opts.disaster_recovery,
                high_availability: opts.multi_node,
                admin_console_port: opts.admin_console_port,
                license_id: opts.license_id.clone(),
            },
        )
    }
}

/// Turn a version string into a valid object name.
fn sanitize_name(version: &str) -> String {
    let mut name: String = version
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    name = name.trim_matches('-').to_string();
    if name.is_empty() {
        name = "unversioned".to_string();
    }
    name
}

/// Cluster metadata operations consumed by the orchestrator.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MetadataClient: Send + Sync {
    /// Block until the cluster API answers
    async fn wait_ready(&self) -> Result<(), Error>;

    /// Idempotently upsert the installation object (fresh installs)
    async fn record_installation(&self, installation: &Installation) -> Result<(), Error>;

    /// Create a new installation object, failing if it exists (upgrades,
    /// which must preserve history)
    async fn create_installation(&self, installation: &Installation) -> Result<(), Error>;

    /// The most recently created installation object
    async fn latest_installation(&self) -> Result<Installation, Error>;

    /// Set the state of the named installation object
    async fn set_installation_state(
        &self,
        name: &str,
        state: InstallationState,
        reason: &str,
    ) -> Result<(), Error>;

    /// Record the version-metadata ConfigMap
    async fn record_version_metadata(&self, version: &str) -> Result<(), Error>;
}

/// Production client over the cluster's API server.
///
/// Connects lazily: at install time the kubeconfig does not exist until the
/// runtime has bootstrapped, so the client is only built on first use and
/// cached afterwards.
pub struct KubeMetadataClient {
    kubeconfig_path: std::path::PathBuf,
    client: tokio::sync::OnceCell<Client>,
}

impl KubeMetadataClient {
    /// Client for the admin kubeconfig the runtime writes at bootstrap
    pub fn new(kubeconfig_path: std::path::PathBuf) -> Self {
        Self {
            kubeconfig_path,
            client: tokio::sync::OnceCell::new(),
        }
    }

    async fn client(&self) -> Result<&Client, Error> {
        self.client
            .get_or_try_init(|| async {
                let kubeconfig = kube::config::Kubeconfig::read_from(&self.kubeconfig_path)
                    .map_err(|e| Error::config(format!("cannot read kubeconfig: {e}")))?;
                let config =
                    kube::Config::from_custom_kubeconfig(kubeconfig, &Default::default())
                        .await
                        .map_err(|e| Error::config(format!("cannot build kube config: {e}")))?;
                Client::try_from(config)
                    .map_err(|e| Error::config(format!("cannot build kube client: {e}")))
            })
            .await
    }

    /// Install the Installation CRD via server-side apply.
    ///
    /// The installer owns its own CRD so the schema version always matches
    /// the binary.
    async fn ensure_crd(&self) -> Result<(), Error> {
        let crds: Api<CustomResourceDefinition> = Api::all(self.client().await?.clone());
        let params = PatchParams::apply(FIELD_MANAGER).force();
        crds.patch(
            "installations.drydock.dev",
            &params,
            &Patch::Apply(&Installation::crd()),
        )
        .await?;
        debug!("Installation CRD applied");
        Ok(())
    }

    async fn ensure_namespace(&self) -> Result<(), Error> {
        let namespaces: Api<Namespace> = Api::all(self.client().await?.clone());
        let ns = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": SYSTEM_NAMESPACE },
        });
        namespaces
            .patch(
                SYSTEM_NAMESPACE,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&ns),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MetadataClient for KubeMetadataClient {
    async fn wait_ready(&self) -> Result<(), Error> {
        // The kubeconfig itself may not exist yet, so connecting is part of
        // what gets retried.
        retry_with_backoff(&RetryConfig::with_max_attempts(30), "apiserver", || async {
            self.client().await?.apiserver_version().await?;
            Ok::<(), Error>(())
        })
        .await
    }

    async fn record_installation(&self, installation: &Installation) -> Result<(), Error> {
        self.ensure_crd().await?;

        let api: Api<Installation> = Api::all(self.client().await?.clone());
        let name = installation.name_any();
        // The CRD may take a moment to be established after the apply above.
        retry_with_backoff(&RetryConfig::with_max_attempts(20), "record installation", || {
            let api = api.clone();
            let name = name.clone();
            async move {
                api.patch(
                    &name,
                    &PatchParams::apply(FIELD_MANAGER).force(),
                    &Patch::Apply(installation),
                )
                .await
            }
        })
        .await?;
        info!(installation = %name, "installation recorded");
        Ok(())
    }

    async fn create_installation(&self, installation: &Installation) -> Result<(), Error> {
        self.ensure_crd().await?;

        let api: Api<Installation> = Api::all(self.client().await?.clone());
        retry_with_backoff(&RetryConfig::with_max_attempts(20), "create installation", || {
            let api = api.clone();
            async move { api.create(&PostParams::default(), installation).await }
        })
        .await?;
        info!(installation = %installation.name_any(), "installation created");
        Ok(())
    }

    async fn latest_installation(&self) -> Result<Installation, Error> {
        let api: Api<Installation> = Api::all(self.client().await?.clone());
        let list = api.list(&ListParams::default()).await?;
        list.items
            .into_iter()
            .max_by_key(|i| i.metadata.creation_timestamp.as_ref().map(|t| t.0))
            .ok_or_else(|| Error::config("no installation object found in the cluster"))
    }

    async fn set_installation_state(
        &self,
        name: &str,
        state: InstallationState,
        reason: &str,
    ) -> Result<(), Error> {
        let api: Api<Installation> = Api::all(self.client().await?.clone());
        let status_patch = serde_json::json!({
            "status": InstallationStatus {
                state,
                reason: Some(reason.to_string()),
            }
        });
        api.patch_status(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&status_patch),
        )
        .await?;
        Ok(())
    }

    async fn record_version_metadata(&self, version: &str) -> Result<(), Error> {
        self.ensure_namespace().await?;

        let configmaps: Api<ConfigMap> =
            Api::namespaced(self.client().await?.clone(), SYSTEM_NAMESPACE);
        let cm = serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": VERSION_METADATA_NAME,
                "namespace": SYSTEM_NAMESPACE,
            },
            "data": {
                "version": version,
                "installer": env!("CARGO_PKG_VERSION"),
            },
        });
        configmaps
            .patch(
                VERSION_METADATA_NAME,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&cm),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_options() -> InstallOptions {
        InstallOptions {
            version: "v1.12.0+k8s-1.32".to_string(),
            airgap: true,
            multi_node: true,
            ..Default::default()
        }
    }

    #[test]
    fn install_objects_are_named_after_the_version() {
        let installation = Installation::from_options(&sample_options(), false);
        assert_eq!(installation.name_any(), "v1-12-0-k8s-1-32");
        assert_eq!(installation.spec.version, "v1.12.0+k8s-1.32");
        assert!(installation.spec.airgap);
        assert!(installation.spec.high_availability);
    }

    #[test]
    fn upgrade_objects_get_unique_timestamp_names() {
        let installation = Installation::from_options(&sample_options(), true);
        let name = installation.name_any();
        assert_eq!(name.len(), 14);
        assert!(name.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn sanitize_never_yields_an_empty_name() {
        assert_eq!(sanitize_name("+++"), "unversioned");
        assert_eq!(sanitize_name("V2.0"), "v2-0");
    }

    #[test]
    fn default_state_is_installing() {
        let status = InstallationStatus::default();
        assert_eq!(status.state, InstallationState::Installing);
    }

    #[test]
    fn crd_is_cluster_scoped() {
        let crd = Installation::crd();
        assert_eq!(crd.spec.scope, "Cluster");
        assert_eq!(crd.spec.names.kind, "Installation");
    }
}
