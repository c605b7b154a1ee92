use anyhow::{Context, Result};
use futures::future::BoxFuture;
use k8s_openapi::api::core::v1::{Container, Pod};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{Api, Client, Config};
use serde_json::Value;
use tracing::debug;

use crate::model::TargetDescriptor;
use crate::telemetry::{MetricsFrame, MetricsPoller, PodUsage};

/// Polls `metrics.k8s.io` for one container and scales usage against its limits.
#[derive(Clone)]
pub struct KubeMetricsPoller {
    client: Client,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ContainerBudget {
    cpu_millicores: Option<u64>,
    memory_bytes: Option<u64>,
}

impl KubeMetricsPoller {
    pub async fn new(context: Option<String>) -> Result<Self> {
        let config = match Kubeconfig::read() {
            Ok(kubeconfig) => {
                let options = KubeConfigOptions {
                    context,
                    cluster: None,
                    user: None,
                };
                Config::from_custom_kubeconfig(kubeconfig, &options)
                    .await
                    .context("failed to infer Kubernetes configuration")?
            }
            Err(_) => {
                if context.is_some() {
                    anyhow::bail!("kubeconfig not found; cannot select a context");
                }
                Config::infer()
                    .await
                    .context("failed to infer Kubernetes configuration")?
            }
        };
        let client = Client::try_from(config).context("failed to initialize Kubernetes client")?;
        Ok(Self { client })
    }

    pub async fn fetch(&self, target: &TargetDescriptor) -> Result<MetricsFrame> {
        let namespace = target.namespace.as_str();
        let pod_name = target.pod_name.as_str();

        let pod_metrics_gvk = GroupVersionKind::gvk("metrics.k8s.io", "v1beta1", "PodMetrics");
        let pod_metrics_resource = ApiResource::from_gvk_with_plural(&pod_metrics_gvk, "pods");
        let pod_metrics_api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &pod_metrics_resource);
        let pod_metrics = pod_metrics_api
            .get(pod_name)
            .await
            .with_context(|| format!("failed to fetch pod metrics for {namespace}/{pod_name}"))?;

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = pods
            .get(pod_name)
            .await
            .with_context(|| format!("failed to fetch pod {namespace}/{pod_name}"))?;

        let (cpu_millicores, memory_bytes) =
            container_usage(&pod_metrics.data, &target.container);
        let budget = container_budget(&pod, &target.container);
        debug!(
            pod = %target,
            cpu_millicores,
            memory_bytes,
            ?budget,
            "polled container usage"
        );

        Ok(MetricsFrame::Single(PodUsage {
            name: Some(pod_name.to_string()),
            cpu: usage_percent(cpu_millicores, budget.cpu_millicores),
            memory: usage_percent(memory_bytes, budget.memory_bytes),
            storage: None,
        }))
    }
}

impl MetricsPoller for KubeMetricsPoller {
    fn poll<'a>(&'a self, target: &'a TargetDescriptor) -> BoxFuture<'a, Result<MetricsFrame>> {
        Box::pin(self.fetch(target))
    }
}

fn usage_percent(used: u64, budget: Option<u64>) -> Option<f64> {
    let budget = budget.filter(|budget| *budget > 0)?;
    Some(used as f64 * 100.0 / budget as f64)
}

/// Usage of the named container, or the whole pod when the container is not listed.
fn container_usage(data: &Value, container: &str) -> (u64, u64) {
    let Some(containers) = data.get("containers").and_then(Value::as_array) else {
        return (0, 0);
    };

    if let Some(entry) = containers
        .iter()
        .find(|entry| entry.get("name").and_then(Value::as_str) == Some(container))
    {
        return entry
            .get("usage")
            .map(parse_usage_from_value)
            .unwrap_or((0, 0));
    }

    containers
        .iter()
        .fold((0u64, 0u64), |(cpu, memory), entry| {
            let (entry_cpu, entry_memory) = entry
                .get("usage")
                .map(parse_usage_from_value)
                .unwrap_or((0, 0));
            (
                cpu.saturating_add(entry_cpu),
                memory.saturating_add(entry_memory),
            )
        })
}

fn container_budget(pod: &Pod, container: &str) -> ContainerBudget {
    let Some(spec) = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.containers.iter().find(|entry| entry.name == container))
    else {
        return ContainerBudget::default();
    };

    ContainerBudget {
        cpu_millicores: resource_quantity(spec, "cpu").and_then(|raw| parse_cpu_millicores(&raw)),
        memory_bytes: resource_quantity(spec, "memory").and_then(|raw| parse_memory_bytes(&raw)),
    }
}

/// Limit for `resource`, falling back to the request.
fn resource_quantity(container: &Container, resource: &str) -> Option<String> {
    let resources = container.resources.as_ref()?;
    resources
        .limits
        .as_ref()
        .and_then(|limits| limits.get(resource))
        .or_else(|| {
            resources
                .requests
                .as_ref()
                .and_then(|requests| requests.get(resource))
        })
        .map(|quantity| quantity.0.clone())
}

fn parse_usage_from_value(value: &Value) -> (u64, u64) {
    let cpu = value
        .get("cpu")
        .and_then(Value::as_str)
        .and_then(parse_cpu_millicores)
        .unwrap_or(0);
    let memory = value
        .get("memory")
        .and_then(Value::as_str)
        .and_then(parse_memory_bytes)
        .unwrap_or(0);
    (cpu, memory)
}

fn parse_cpu_millicores(value: &str) -> Option<u64> {
    let raw = value.trim();
    if raw.is_empty() {
        return None;
    }

    let (number, multiplier) = if let Some(number) = raw.strip_suffix('m') {
        (number, 1.0)
    } else if let Some(number) = raw.strip_suffix('u') {
        (number, 0.001)
    } else if let Some(number) = raw.strip_suffix('n') {
        (number, 0.000001)
    } else {
        (raw, 1000.0)
    };

    scaled(number, multiplier)
}

fn parse_memory_bytes(value: &str) -> Option<u64> {
    const UNITS: [(&str, f64); 13] = [
        ("Ei", 1_152_921_504_606_846_976.0),
        ("Pi", 1_125_899_906_842_624.0),
        ("Ti", 1_099_511_627_776.0),
        ("Gi", 1_073_741_824.0),
        ("Mi", 1_048_576.0),
        ("Ki", 1_024.0),
        ("E", 1_000_000_000_000_000_000.0),
        ("P", 1_000_000_000_000_000.0),
        ("T", 1_000_000_000_000.0),
        ("G", 1_000_000_000.0),
        ("M", 1_000_000.0),
        ("k", 1_000.0),
        ("m", 0.001),
    ];

    let raw = value.trim();
    if raw.is_empty() {
        return None;
    }

    for (suffix, multiplier) in UNITS {
        if let Some(number) = raw.strip_suffix(suffix) {
            return scaled(number, multiplier);
        }
    }
    scaled(raw, 1.0)
}

fn scaled(number: &str, multiplier: f64) -> Option<u64> {
    let numeric = number.trim().parse::<f64>().ok()?;
    let value = (numeric * multiplier).round();
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some(value as u64)
}
