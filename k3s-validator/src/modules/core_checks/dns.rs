//! Cluster DNS: the kube-dns service plus in-pod name resolution.

use k3s_validator_cluster::{ClusterClient, ClusterError, KUBE_SYSTEM};
use k3s_validator_core::Category;

use crate::context::{ModuleContext, Verdict};
use crate::error::ModuleError;
use crate::module::{ModuleInfo, TestModule};
use crate::modules::support::probe_shell;

static INFO: ModuleInfo = ModuleInfo::new(
    Category::Core,
    "dns",
    "kube-dns service, in-cluster and external name resolution",
);

const INTERNAL_NAME: &str = "kubernetes.default.svc.cluster.local";

pub struct Dns;

impl<C: ClusterClient> TestModule<C> for Dns {
    fn info(&self) -> &ModuleInfo {
        &INFO
    }

    async fn run(&self, ctx: &ModuleContext<C>) -> Result<(), ModuleError> {
        ctx.check("kube-dns-service", kube_dns_service(ctx)).await?;
        ctx.check("internal-resolution", internal_resolution(ctx))
            .await?;
        ctx.check("external-resolution", external_resolution(ctx))
            .await?;
        Ok(())
    }
}

async fn kube_dns_service<C: ClusterClient>(
    ctx: &ModuleContext<C>,
) -> Result<Verdict, ClusterError> {
    let service = match ctx.client().get_service(KUBE_SYSTEM, "kube-dns").await {
        Ok(service) => service,
        Err(e) if e.is_not_found() => {
            return Ok(Verdict::Fail(format!("service {KUBE_SYSTEM}/kube-dns not found")));
        }
        Err(e) => return Err(e),
    };
    Ok(match service.cluster_ip {
        Some(ip) => Verdict::Pass(format!("kube-dns at {ip}")),
        None => Verdict::Fail("kube-dns has no cluster IP".to_owned()),
    })
}

async fn internal_resolution<C: ClusterClient>(
    ctx: &ModuleContext<C>,
) -> Result<Verdict, ClusterError> {
    let outcome = probe_shell(ctx, "dns", &format!("nslookup {INTERNAL_NAME}"), None).await?;
    Ok(if outcome.succeeded {
        Verdict::Pass(format!("resolved {INTERNAL_NAME}{}", outcome.attempts_note()))
    } else {
        Verdict::Fail(format!("could not resolve {INTERNAL_NAME}: {}", outcome.detail))
    })
}

/// Air-gapped clusters legitimately cannot resolve public names.
async fn external_resolution<C: ClusterClient>(
    ctx: &ModuleContext<C>,
) -> Result<Verdict, ClusterError> {
    let name = &ctx.checks().external_dns_name;
    let outcome = probe_shell(ctx, "dns", &format!("nslookup {name}"), None).await?;
    Ok(if outcome.succeeded {
        Verdict::Pass(format!("resolved {name}{}", outcome.attempts_note()))
    } else {
        Verdict::Warn(format!(
            "could not resolve {name} ({}), upstream DNS may be unreachable",
            outcome.detail
        ))
    })
}
