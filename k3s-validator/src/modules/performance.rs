//! `performance` category: pod startup latency and API request throughput.
//!
//! Thresholds come from `[checks]`; exceeding one is a warning, since a slow
//! cluster still works.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use k3s_validator_cluster::{ClusterClient, ClusterError, Condition, PodRequest};
use k3s_validator_core::Category;

use super::ModuleRegistry;
use crate::context::{ModuleContext, Verdict};
use crate::error::ModuleError;
use crate::module::{ModuleInfo, TestModule};

pub fn register<C: ClusterClient>(registry: &mut ModuleRegistry<C>) {
    registry.register(PodStartup);
    registry.register(ApiThroughput);
}

// ─── pod-startup ─────────────────────────────────────────────────────

static POD_STARTUP: ModuleInfo = ModuleInfo::new(
    Category::Performance,
    "pod-startup",
    "time from pod creation to Ready",
);

pub struct PodStartup;

impl<C: ClusterClient> TestModule<C> for PodStartup {
    fn info(&self) -> &ModuleInfo {
        &POD_STARTUP
    }

    async fn run(&self, ctx: &ModuleContext<C>) -> Result<(), ModuleError> {
        ctx.check("startup-latency", startup_latency(ctx)).await
    }
}

async fn startup_latency<C: ClusterClient>(
    ctx: &ModuleContext<C>,
) -> Result<Verdict, ClusterError> {
    let samples = ctx.checks().pod_startup_samples;
    let mut timings = Vec::with_capacity(samples as usize);
    for sample in 1..=samples {
        let elapsed = time_pod_start(ctx).await?;
        debug!(sample, elapsed_ms = elapsed.as_millis() as u64, "pod startup sample");
        timings.push(elapsed);
    }
    Ok(startup_verdict(
        &timings,
        Duration::from_secs(ctx.checks().pod_startup_warn_secs),
    ))
}

async fn time_pod_start<C: ClusterClient>(ctx: &ModuleContext<C>) -> Result<Duration, ClusterError> {
    let pod = PodRequest::new(ctx.unique_name("startup"), ctx.web_image());
    let started = Instant::now();
    let resource = ctx.create_pod(&pod).await?;
    let ready = ctx
        .wait(&resource, Condition::PodReady, ctx.timeouts().pod_ready())
        .await;
    let elapsed = started.elapsed();
    ctx.cleanup(&resource).await;
    ready.map(|()| elapsed)
}

fn startup_verdict(timings: &[Duration], warn_above: Duration) -> Verdict {
    let Some(slowest) = timings.iter().max() else {
        return Verdict::Skip("no samples taken".to_owned());
    };
    let total: Duration = timings.iter().sum();
    let average = total / timings.len() as u32;
    let summary = format!(
        "average {:.2}s, slowest {:.2}s over {} pod(s)",
        average.as_secs_f64(),
        slowest.as_secs_f64(),
        timings.len()
    );
    if average > warn_above {
        Verdict::Warn(format!("{summary} (warn above {}s)", warn_above.as_secs()))
    } else {
        Verdict::Pass(summary)
    }
}

// ─── api-throughput ──────────────────────────────────────────────────

static API_THROUGHPUT: ModuleInfo = ModuleInfo::new(
    Category::Performance,
    "api-throughput",
    "sequential API read throughput",
);

pub struct ApiThroughput;

impl<C: ClusterClient> TestModule<C> for ApiThroughput {
    fn info(&self) -> &ModuleInfo {
        &API_THROUGHPUT
    }

    async fn run(&self, ctx: &ModuleContext<C>) -> Result<(), ModuleError> {
        ctx.check("request-rate", request_rate(ctx)).await
    }
}

async fn request_rate<C: ClusterClient>(ctx: &ModuleContext<C>) -> Result<Verdict, ClusterError> {
    let requests = ctx.checks().api_throughput_requests;
    let mut errors = Vec::new();
    let started = Instant::now();
    for _ in 0..requests {
        match ctx.client().list_pods(ctx.namespace(), None).await {
            Ok(_) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => errors.push(e.to_string()),
        }
    }
    let elapsed = started.elapsed();
    Ok(rate_verdict(
        requests,
        elapsed,
        &errors,
        ctx.checks().api_throughput_min_rps,
    ))
}

fn rate_verdict(requests: u32, elapsed: Duration, errors: &[String], min_rps: f64) -> Verdict {
    if let Some(first) = errors.first() {
        return Verdict::Fail(format!(
            "{}/{requests} requests failed, first: {first}",
            errors.len()
        ));
    }
    let rps = f64::from(requests) / elapsed.max(Duration::from_millis(1)).as_secs_f64();
    if rps < min_rps {
        Verdict::Warn(format!("{rps:.1} req/s, below {min_rps:.1} req/s"))
    } else {
        Verdict::Pass(format!(
            "{requests} requests in {:.2}s ({rps:.1} req/s)",
            elapsed.as_secs_f64()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::Harness;
    use k3s_validator_cluster::SimulatedCluster;
    use k3s_validator_core::TestStatus;

    #[test]
    fn slow_average_warns() {
        let timings = [Duration::from_secs(20), Duration::from_secs(50)];
        assert!(matches!(
            startup_verdict(&timings, Duration::from_secs(30)),
            Verdict::Warn(_)
        ));
        assert_eq!(
            startup_verdict(&timings, Duration::from_secs(40)),
            Verdict::Pass("average 35.00s, slowest 50.00s over 2 pod(s)".to_owned())
        );
    }

    #[test]
    fn zero_elapsed_does_not_divide_by_zero() {
        match rate_verdict(20, Duration::ZERO, &[], 10.0) {
            Verdict::Pass(message) => assert!(message.contains("20000.0 req/s")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn slow_api_warns_and_errors_fail() {
        assert!(matches!(
            rate_verdict(20, Duration::from_secs(10), &[], 10.0),
            Verdict::Warn(_)
        ));
        let errors = vec!["list_pods: simulated server error".to_owned()];
        assert!(matches!(
            rate_verdict(20, Duration::from_secs(1), &errors, 10.0),
            Verdict::Fail(_)
        ));
    }

    #[tokio::test]
    async fn pods_start_and_are_removed() {
        let harness = Harness::new(SimulatedCluster::healthy_single_node()).await;
        let ctx = harness.context(POD_STARTUP);
        PodStartup.run(&ctx).await.unwrap();
        assert_eq!(harness.cluster.count_calls("create_pod").await, 3);
        assert_eq!(harness.cluster.count_calls("delete_pod").await, 3);
        drop(ctx);
        let suite = harness.finish().await;
        assert_eq!(suite.results()[0].status, TestStatus::Pass);
    }

    #[tokio::test]
    async fn throughput_issues_configured_requests() {
        let harness = Harness::new(SimulatedCluster::healthy_single_node()).await;
        ApiThroughput.run(&harness.context(API_THROUGHPUT)).await.unwrap();
        assert_eq!(harness.cluster.count_calls("list_pods").await, 20);
        let suite = harness.finish().await;
        assert_eq!(suite.failed(), 0);
        assert_eq!(suite.total(), 1);
    }
}
