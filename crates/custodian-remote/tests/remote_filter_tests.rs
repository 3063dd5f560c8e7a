//! Remote-data filter integration tests
//!
//! Build `metric` and `stackdriver-logs` filters through the registry and
//! run them against the closure-backed mock backend.


use custodian_core::{Error, ProviderError, RetryConfig};
use custodian_policy::filters::Filter;
use custodian_policy::{EngineConfig, FilterRegistry, ResourceManager};
use custodian_remote::register_filters;
use mock_client::{ids, ids_in_query, instances, series, throttled, MockBackend};
use serde_json::{json, Value};
use std::sync::Arc;

const CPU: &str = "compute.googleapis.com/instance/cpu/utilization";

fn registry() -> FilterRegistry {
    let mut registry = FilterRegistry::with_defaults().unwrap();
    register_filters(&mut registry).unwrap();
    registry
}

fn build(client: Arc<MockBackend>, config: EngineConfig, spec: Value) -> Arc<dyn Filter> {
    let manager = ResourceManager::new("gcp.instance", client, Arc::new(config));
    registry().factory(&spec, &manager).unwrap()
}

fn cpu_below(threshold: i64) -> Value {
    json!({"type": "metric", "metric": CPU, "op": "lt", "threshold": threshold})
}

/// Every queried instance reports its index as the aggregated value
fn indexed_backend() -> MockBackend {
    MockBackend::new(|request, _| {
        let all: Vec<Value> = ids_in_query(request)
            .iter()
            .map(|id| {
                let n = id.trim_start_matches("i-");
                series(id, json!({"int64Value": n}))
            })
            .collect();
        Ok(json!({"timeSeries": all}))
    })
}

fn names(range: std::ops::Range<usize>) -> Vec<String> {
    range.map(|i| format!("i-{}", i)).collect()
}

#[tokio::test]
async fn test_metric_batches_by_chunk() {
    let client = Arc::new(indexed_backend());
    let filter = build(client.clone(), EngineConfig::default(), cpu_below(10));

    let out = filter.process(instances(45)).await.unwrap();
    assert_eq!(ids(&out), names(0..10));

    assert_eq!(client.call_count(), 3);
    let mut sizes: Vec<usize> = client.requests().iter().map(|r| ids_in_query(r).len()).collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![5, 20, 20]);

    let request = &client.requests()[0];
    assert_eq!(request.service, "monitoring");
    assert_eq!(request.method, "projects.timeSeries.list");
    assert_eq!(request.params["name"], json!("projects/test-project"));
    assert_eq!(request.params["aggregation_perSeriesAligner"], json!("ALIGN_MEAN"));
    assert_eq!(request.params["aggregation_crossSeriesReducer"], json!("REDUCE_MEAN"));
    assert!(request.params["filter"]
        .as_str()
        .unwrap()
        .starts_with(&format!("metric.type = \"{}\" AND resource.labels.instance_id = one_of(", CPU)));
}

#[tokio::test]
async fn test_metric_cache_dedupes_identical_filters() {
    let client = Arc::new(indexed_backend());
    let filter = build(
        client.clone(),
        EngineConfig::default(),
        json!({"and": [cpu_below(3), cpu_below(3)]}),
    );

    let out = filter.process(instances(5)).await.unwrap();
    assert_eq!(ids(&out), names(0..3));
    assert_eq!(client.call_count(), 1);

    let key = format!(
        "metric: {}, aggregation: mean, aligner: mean, timeframe: 24, filter: ",
        CPU
    );
    assert_eq!(out[1].annotation_entry("metrics", &key), Some(&json!(1.0)));

    // annotated resources come back out and stay cached
    let again = build(client.clone(), EngineConfig::default(), cpu_below(3));
    again.process(out).await.unwrap();
    assert_eq!(client.call_count(), 1);
}

#[tokio::test]
async fn test_metric_different_timeframe_is_not_cached() {
    let client = Arc::new(indexed_backend());
    let mut longer = cpu_below(3);
    longer["timeframe"] = json!(72);
    let filter = build(
        client.clone(),
        EngineConfig::default(),
        json!({"and": [cpu_below(3), longer]}),
    );

    filter.process(instances(5)).await.unwrap();
    assert_eq!(client.call_count(), 2);
}

#[tokio::test]
async fn test_metric_no_data_action() {
    let sparse = || {
        MockBackend::new(|_, _| Ok(json!({"timeSeries": [series("i-0", json!({"doubleValue": 0.5}))]})))
    };

    let client = Arc::new(sparse());
    let exclude = build(client.clone(), EngineConfig::default(), cpu_below(10));
    assert_eq!(ids(&exclude.process(instances(3)).await.unwrap()), names(0..1));

    let client = Arc::new(sparse());
    let mut spec = cpu_below(10);
    spec["no_data_action"] = json!("include");
    let include = build(client.clone(), EngineConfig::default(), spec);
    let out = include.process(instances(3)).await.unwrap();
    assert_eq!(ids(&out), names(0..3));

    // "no data" is cached as well
    include.process(out).await.unwrap();
    assert_eq!(client.call_count(), 1);
}

#[tokio::test]
async fn test_metric_chunk_failure_is_isolated() {
    let client = Arc::new(MockBackend::new(|request, _| {
        let ids = ids_in_query(request);
        if ids.iter().any(|id| id == "i-1") {
            return Err(ProviderError::new("PermissionDenied", "denied").with_status(403));
        }
        Ok(json!({"timeSeries": ids.iter().map(|id| series(id, json!({"int64Value": "1"}))).collect::<Vec<_>>()}))
    }));
    let mut spec = cpu_below(10);
    spec["batch_size"] = json!(1);
    let filter = build(client.clone(), EngineConfig::default(), spec);

    let out = filter.process(instances(3)).await.unwrap();
    assert_eq!(ids(&out), vec!["i-0", "i-2"]);
    // fatal errors are not retried
    assert_eq!(client.call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_metric_retries_throttled_calls() {
    let client = Arc::new(MockBackend::new(|request, n| {
        if n <= 2 {
            return Err(throttled());
        }
        Ok(json!({"timeSeries": ids_in_query(request).iter().map(|id| series(id, json!({"int64Value": "2"}))).collect::<Vec<_>>()}))
    }));
    let filter = build(client.clone(), EngineConfig::default(), cpu_below(10));

    let out = filter.process(instances(3)).await.unwrap();
    assert_eq!(ids(&out), names(0..3));
    assert_eq!(client.call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_metric_retry_exhaustion_excludes_chunk() {
    let client = Arc::new(MockBackend::new(|_, _| Err(throttled())));
    let config = EngineConfig {
        retry: RetryConfig {
            max_attempts: 3,
            ..Default::default()
        },
        ..Default::default()
    };
    let filter = build(client.clone(), config, cpu_below(10));

    let out = filter.process(instances(3)).await.unwrap();
    assert!(out.is_empty());
    assert_eq!(client.call_count(), 3);
}

#[tokio::test]
async fn test_metric_ambiguous_series_excluded() {
    let client = Arc::new(MockBackend::new(|_, _| {
        let mut two_points = series("i-2", json!({"int64Value": "1"}));
        two_points["points"] = json!([
            {"value": {"int64Value": "1"}},
            {"value": {"int64Value": "2"}},
        ]);
        Ok(json!({"timeSeries": [
            series("i-0", json!({"int64Value": "1"})),
            series("i-1", json!({"int64Value": "1"})),
            series("i-1", json!({"int64Value": "3"})),
            two_points,
        ]}))
    }));
    let filter = build(client.clone(), EngineConfig::default(), cpu_below(10));

    let out = filter.process(instances(3)).await.unwrap();
    assert_eq!(ids(&out), vec!["i-0"]);
}

#[tokio::test]
async fn test_metric_rejects_list_operator() {
    let manager = ResourceManager::new(
        "gcp.instance",
        Arc::new(indexed_backend()),
        Arc::new(EngineConfig::default()),
    );
    let err = registry()
        .factory(
            &json!({"type": "metric", "metric": CPU, "op": "in", "threshold": 1}),
            &manager,
        )
        .unwrap_err();
    assert!(err.is_validation());
}

fn logs_spec(filter: &str) -> Value {
    json!({"type": "stackdriver-logs", "filter": filter, "filter_days": 7})
}

const BY_ID: &str = "resource.labels.instance_id=\"{resource[id]}\" AND severity>=ERROR";

#[tokio::test]
async fn test_logs_follows_pages() {
    let client = Arc::new(MockBackend::new(|request, _| {
        match request.params["body"].get("pageToken").and_then(Value::as_str) {
            None => Ok(json!({
                "entries": [{"severity": "ERROR", "textPayload": "disk full"}],
                "nextPageToken": "page-2",
            })),
            Some(_) => Ok(json!({"entries": [{"severity": "ERROR", "textPayload": "oom"}]})),
        }
    }));
    let filter = build(client.clone(), EngineConfig::default(), logs_spec(BY_ID));

    let out = filter.process(instances(1)).await.unwrap();
    assert_eq!(ids(&out), vec!["i-0"]);
    assert_eq!(client.call_count(), 2);

    let requests = client.requests();
    assert_eq!(requests[0].service, "logging");
    assert_eq!(requests[0].method, "entries.list");
    assert_eq!(requests[1].params["body"]["pageToken"], json!("page-2"));
    assert_eq!(
        requests[0].params["body"]["resourceNames"],
        json!(["projects/test-project"])
    );

    let query = requests[0].params["body"]["filter"].as_str().unwrap();
    assert!(query.starts_with("timestamp>=\""), "{}", query);
    assert!(
        query.ends_with(" AND (resource.labels.instance_id=\"i-0\" AND severity>=ERROR)"),
        "{}",
        query
    );

    let key = format!("filter: {}, filter_days: 7", BY_ID);
    let cached = out[0].annotation_entry("logs", &key).unwrap();
    assert_eq!(cached.as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn test_logs_value_semantics_on_entries() {
    let client = Arc::new(MockBackend::new(|request, _| {
        let query = request.params["body"]["filter"].as_str().unwrap_or_default();
        if query.contains("\"i-0\"") {
            Ok(json!({"entries": [{"severity": "ERROR"}]}))
        } else {
            Ok(json!({}))
        }
    }));
    let mut spec = logs_spec(BY_ID);
    spec["key"] = json!("filtered_logs");
    spec["op"] = json!("empty");
    let filter = build(client.clone(), EngineConfig::default(), spec);

    let out = filter.process(instances(3)).await.unwrap();
    assert_eq!(ids(&out), vec!["i-1", "i-2"]);
}

#[tokio::test]
async fn test_logs_cache_dedupes_identical_filters() {
    let client = Arc::new(MockBackend::new(|_, _| Ok(json!({"entries": [{"severity": "ERROR"}]}))));
    let filter = build(
        client.clone(),
        EngineConfig::default(),
        json!({"and": [logs_spec(BY_ID), logs_spec(BY_ID)]}),
    );

    let out = filter.process(instances(2)).await.unwrap();
    assert_eq!(ids(&out), names(0..2));
    assert_eq!(client.call_count(), 2);
}

#[tokio::test]
async fn test_logs_failures_are_per_resource() {
    let client = Arc::new(MockBackend::new(|request, _| {
        let query = request.params["body"]["filter"].as_str().unwrap_or_default();
        if query.contains("\"i-2\"") {
            return Err(ProviderError::new("PermissionDenied", "denied").with_status(403));
        }
        Ok(json!({"entries": [{"severity": "ERROR"}]}))
    }));
    let filter = build(
        client.clone(),
        EngineConfig::default(),
        logs_spec("labels.owner=\"{resource[labels][owner]}\" AND resource.labels.instance_id=\"{resource[id]}\""),
    );

    let mut resources = instances(4);
    for r in resources.iter_mut().skip(1) {
        r.insert("labels", json!({"owner": "ops"}));
    }
    // i-0 cannot render its filter, i-2 fails remotely
    let out = filter.process(resources).await.unwrap();
    assert_eq!(ids(&out), vec!["i-1", "i-3"]);
    assert_eq!(client.call_count(), 3);
}

#[tokio::test]
async fn test_logs_filter_days_validation() {
    let manager = ResourceManager::new(
        "gcp.instance",
        Arc::new(MockBackend::new(|_, _| Ok(json!({})))),
        Arc::new(EngineConfig::default()),
    );
    let mut spec = logs_spec(BY_ID);
    spec["filter_days"] = json!(-1);

    match registry().factory(&spec, &manager) {
        Err(Error::Validation { type_name, field, .. }) => {
            assert_eq!(type_name, "stackdriver-logs");
            assert_eq!(field, "filter_days");
        }
        other => panic!("expected validation error, got {:?}", other.map(|f| f.filter_type().to_string())),
    }

    let missing = json!({"type": "stackdriver-logs"});
    assert!(registry().factory(&missing, &manager).unwrap_err().is_validation());
}
