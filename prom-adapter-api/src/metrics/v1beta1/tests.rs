use std::time::Duration;

use k8s::Resource as _;

use super::*;
use crate::default;

fn usage(cpu: &str, memory: &str) -> Usage {
    Usage {
        cpu: resource::Quantity(cpu.to_string()),
        memory: resource::Quantity(memory.to_string()),
    }
}

#[test]
fn usage_parses_cpu_and_memory() {
    let usage = usage("150m", "512Mi");

    assert_eq!(usage.cpu().unwrap(), 0.15);
    assert_eq!(usage.memory().unwrap(), 512 * 1024 * 1024);
}

#[test]
fn container_delegates_to_usage() {
    let container = Container {
        name: "web".to_string(),
        usage: usage("2", "1Gi"),
    };

    assert_eq!(container.cpu().unwrap(), 2.0);
    assert_eq!(container.memory().unwrap(), 1024 * 1024 * 1024);
}

#[test]
fn node_metrics_resource_constants() {
    assert_eq!(NodeMetrics::API_VERSION, "metrics.k8s.io/v1beta1");
    assert_eq!(NodeMetrics::URL_PATH_SEGMENT, "nodes");
    assert_eq!(NodeMetrics::KIND, "NodeMetrics");
}

#[test]
fn pod_metrics_serializes_window_as_go_duration() {
    let metrics = PodMetrics {
        metadata: metav1::ObjectMeta {
            name: Some("demo".to_string()),
            namespace: Some("default".to_string()),
            ..default()
        },
        timestamp: metav1::Time(default()),
        window: Duration::from_secs(60),
        containers: Vec::new(),
    };

    let value = serde_json::to_value(&metrics).unwrap();
    assert_eq!(value["window"], "1m");
}

#[test]
fn pod_metrics_deserializes_window() {
    let raw = serde_json::json!({
        "metadata": {"name": "demo", "namespace": "default"},
        "timestamp": "2024-01-01T00:00:00Z",
        "window": "30s",
        "containers": [],
    });

    let metrics: PodMetrics = serde_json::from_value(raw).unwrap();
    assert_eq!(metrics.window, Duration::from_secs(30));
}
