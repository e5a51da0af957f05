//! `security` category: Pod Security admission and API transport security.

use k3s_validator_cluster::{ClusterClient, ClusterError, Condition, PodRequest, SecuritySettings};
use k3s_validator_core::Category;

use super::ModuleRegistry;
use crate::context::{ModuleContext, Verdict};
use crate::error::ModuleError;
use crate::module::{ModuleInfo, TestModule};

pub fn register<C: ClusterClient>(registry: &mut ModuleRegistry<C>) {
    registry.register(PodSecurity);
    registry.register(ApiTls);
}

// ─── pod-security ────────────────────────────────────────────────────

static POD_SECURITY: ModuleInfo = ModuleInfo::new(
    Category::Security,
    "pod-security",
    "restricted pods are admitted, privileged pods are refused",
);

/// Non-root UID used for the restricted probe pod.
const PROBE_UID: i64 = 1000;

pub struct PodSecurity;

impl<C: ClusterClient> TestModule<C> for PodSecurity {
    fn info(&self) -> &ModuleInfo {
        &POD_SECURITY
    }

    async fn run(&self, ctx: &ModuleContext<C>) -> Result<(), ModuleError> {
        ctx.check("restricted-pod-admitted", restricted_pod(ctx))
            .await?;
        ctx.check("privileged-pod", privileged_pod(ctx)).await?;
        Ok(())
    }
}

async fn restricted_pod<C: ClusterClient>(ctx: &ModuleContext<C>) -> Result<Verdict, ClusterError> {
    let pod = PodRequest::new(ctx.unique_name("restricted"), ctx.test_image())
        .command(["sleep", "3600"])
        .with_security(SecuritySettings::restricted(PROBE_UID));
    let resource = match ctx.create_pod(&pod).await {
        Ok(resource) => resource,
        Err(e) if e.is_rejection() => {
            return Ok(Verdict::Fail(format!("restricted pod refused: {e}")));
        }
        Err(e) => return Err(e),
    };
    let ready = ctx
        .wait(&resource, Condition::PodReady, ctx.timeouts().pod_ready())
        .await;
    ctx.cleanup(&resource).await;
    ready?;
    Ok(Verdict::Pass(format!(
        "pod running as UID {PROBE_UID} with all capabilities dropped"
    )))
}

/// Refusal is the secure outcome; admission means no policy is enforced.
async fn privileged_pod<C: ClusterClient>(ctx: &ModuleContext<C>) -> Result<Verdict, ClusterError> {
    let pod = PodRequest::new(ctx.unique_name("privileged"), ctx.test_image())
        .command(["sleep", "3600"])
        .with_security(SecuritySettings::privileged());
    match ctx.create_pod(&pod).await {
        Ok(resource) => {
            ctx.cleanup(&resource).await;
            Ok(Verdict::Warn(
                "privileged pod admitted, no Pod Security Standard enforced on the namespace"
                    .to_owned(),
            ))
        }
        Err(e) if e.is_rejection() => Ok(Verdict::Pass(format!("privileged pod refused: {e}"))),
        Err(e) => Err(e),
    }
}

// ─── api-tls ─────────────────────────────────────────────────────────

static API_TLS: ModuleInfo = ModuleInfo::new(
    Category::Security,
    "api-tls",
    "API server is served over TLS",
);

pub struct ApiTls;

impl<C: ClusterClient> TestModule<C> for ApiTls {
    fn info(&self) -> &ModuleInfo {
        &API_TLS
    }

    async fn run(&self, ctx: &ModuleContext<C>) -> Result<(), ModuleError> {
        let endpoint = ctx.client().endpoint();
        let secure = endpoint.starts_with("https://");
        ctx.check("https-endpoint", async {
            Ok(if secure {
                Verdict::Pass(format!("{endpoint} uses https"))
            } else {
                Verdict::Fail(format!("{endpoint} is not an https endpoint"))
            })
        })
        .await?;

        if !secure {
            ctx.skip("tls-handshake", "endpoint is not https");
            return Ok(());
        }
        // The client verifies the server certificate against the kubeconfig CA,
        // so any successful request means the handshake validated.
        ctx.check("tls-handshake", async {
            let version = ctx.client().server_version().await?;
            Ok(Verdict::Pass(format!("verified TLS session, server {version}")))
        })
        .await?;
        Ok(())
    }
}
