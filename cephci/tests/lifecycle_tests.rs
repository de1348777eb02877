//! End-to-end lifecycle tests against the in-memory provider

mod common;

use cephci::destroyer::DestroyerConfig;
use cephci::health::DegradedReason;
use cephci::provider::memory::Fault;
use cephci::{
    ClusterLayout, Error, HealthChecker, HealthStatus, InMemoryProvider, NodeDeclaration,
    NodeDestroyer, NodeProvisioner, OpenStackCredentials,
};
use cephci_common::NodeRole;
use common::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const TIMEOUT: Duration = Duration::from_secs(5);

fn destroyer(provider: &InMemoryProvider) -> NodeDestroyer {
    NodeDestroyer::with_config(
        Arc::new(provider.clone()),
        DestroyerConfig {
            retry_interval: Duration::from_secs(1),
            volume_settle: Duration::from_secs(10),
        },
    )
}

#[tokio::test(start_paused = true)]
async fn test_provision_creates_every_node_concurrently() {
    let provider = slow_provider();
    let params = params("run0001");
    let started = Instant::now();

    let cluster = NodeProvisioner::new(Arc::new(provider.clone()))
        .provision(&topology(3), &params)
        .await
        .unwrap();

    assert_eq!(cluster.nodes.len(), 5);
    assert!(provider.peak_concurrent_creates() > 1);
    assert!(started.elapsed() < Duration::from_secs(2));

    assert!(cluster
        .nodes
        .values()
        .all(|n| n.hostname.starts_with(&cluster.name_prefix)));
    assert_eq!(cluster.nodes["node3"].hostname, "ceph-qe-run0001-node3-osd");
    assert_eq!(cluster.nodes_with_role(NodeRole::Osd).len(), 3);

    // two disks per osd node
    assert_eq!(provider.volumes().await.len(), 6);
}

#[tokio::test]
async fn test_invalid_layout_never_reaches_provider() {
    let provider = InMemoryProvider::new();
    let mut layout = topology(2);
    layout.push(NodeDeclaration::new("node9", "osd"));

    let err = NodeProvisioner::new(Arc::new(provider.clone()))
        .provision(&layout, &params("run0002"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Validation { ref field, .. } if field == "node9.no-of-volumes"));
    assert_eq!(provider.calls().await.total(), 0);
}

#[tokio::test]
async fn test_unknown_role_never_reaches_provider() {
    let provider = InMemoryProvider::new();
    let layout = vec![NodeDeclaration::new("node1", "monitor")];

    let err = NodeProvisioner::new(Arc::new(provider.clone()))
        .provision(&layout, &params("run0003"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Validation { ref field, .. } if field == "node1.role"));
    assert_eq!(provider.calls().await.total(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_teardown_with_nothing_to_do() {
    let provider = InMemoryProvider::new();

    let report = destroyer(&provider)
        .teardown("ceph-qe-run0004-", TIMEOUT)
        .await
        .unwrap();

    assert!(report.is_noop());
    assert_eq!(provider.calls().await.mutations(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_provision_then_teardown_leaves_nothing() {
    let provider = InMemoryProvider::new();
    let cluster = NodeProvisioner::new(Arc::new(provider.clone()))
        .provision(&topology(2), &params("run0005"))
        .await
        .unwrap();

    let report = destroyer(&provider)
        .teardown(&cluster.name_prefix, TIMEOUT)
        .await
        .unwrap();

    assert_eq!(report.destroyed_nodes.len(), 4);
    assert_eq!(report.released_ips.len(), 4);
    assert_eq!(report.destroyed_volumes.len(), 4);
    assert!(provider.nodes().await.is_empty());
    assert!(provider.floating_ips().await.is_empty());
    assert!(provider.volumes().await.is_empty());

    // a second pass finds nothing left
    let again = destroyer(&provider)
        .teardown(&cluster.name_prefix, TIMEOUT)
        .await
        .unwrap();
    assert!(again.is_noop());
}

#[tokio::test(start_paused = true)]
async fn test_teardown_spares_other_runs() {
    let provider = InMemoryProvider::new();
    let provisioner = NodeProvisioner::new(Arc::new(provider.clone()));
    let doomed = provisioner.provision(&topology(1), &params("run0006")).await.unwrap();
    let other = provisioner.provision(&topology(1), &params("run0007")).await.unwrap();
    let stray = provider.add_volume(None, 5).await;

    let report = destroyer(&provider)
        .teardown(&doomed.name_prefix, TIMEOUT)
        .await
        .unwrap();
    assert_eq!(report.skipped_volumes, 1);

    let nodes = provider.nodes().await;
    assert_eq!(nodes.len(), 3);
    assert!(nodes.iter().all(|n| n.hostname.starts_with(&other.name_prefix)));

    // the surviving run keeps its attached addresses and disks
    let ips = provider.floating_ips().await;
    assert_eq!(ips.len(), 3);
    assert!(ips.iter().all(|ip| !ip.is_orphaned()));

    let volumes = provider.volumes().await;
    assert_eq!(volumes.len(), 3);
    assert!(volumes.iter().any(|v| v.id == stray.id));
}

#[tokio::test(start_paused = true)]
async fn test_sweep_releases_orphans_from_anywhere() {
    let provider = InMemoryProvider::new();
    provider.add_floating_ip("172.16.9.9", None).await;

    let report = destroyer(&provider)
        .teardown("ceph-qe-run0008-", TIMEOUT)
        .await
        .unwrap();

    assert_eq!(report.released_ips, vec!["172.16.9.9".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_teardowns_share_the_orphan_sweep() {
    let provider = InMemoryProvider::new();
    provider.add_floating_ip("172.16.9.9", None).await;
    let first = destroyer(&provider);
    let second = destroyer(&provider);

    let (a, b) = tokio::join!(
        first.teardown("ceph-qe-runaaaa-", TIMEOUT),
        second.teardown("ceph-qe-runbbbb-", TIMEOUT),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    // exactly one of them released it
    assert_eq!(a.released_ips.len() + b.released_ips.len(), 1);
    assert!(provider.floating_ips().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_teardowns_of_one_run() {
    let provider = InMemoryProvider::new();
    let cluster = NodeProvisioner::new(Arc::new(provider.clone()))
        .provision(&topology(2), &params("run0012"))
        .await
        .unwrap();
    let first = destroyer(&provider);
    let second = destroyer(&provider);

    let (a, b) = tokio::join!(
        first.teardown(&cluster.name_prefix, TIMEOUT),
        second.teardown(&cluster.name_prefix, TIMEOUT),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.destroyed_nodes.len() + b.destroyed_nodes.len(), 4);
    assert_eq!(a.destroyed_volumes.len() + b.destroyed_volumes.len(), 4);
    assert!(provider.nodes().await.is_empty());
    assert!(provider.floating_ips().await.is_empty());
    assert!(provider.volumes().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_teardown_rides_out_transient_failures() {
    let provider = InMemoryProvider::new();
    let cluster = NodeProvisioner::new(Arc::new(provider.clone()))
        .provision(&topology(1), &params("run0009"))
        .await
        .unwrap();

    // three refusals at one-second spacing fit in a five second budget
    for node in cluster.nodes.values() {
        provider.fail_destroy(&node.hostname, Fault::Times(3)).await;
    }

    let report = destroyer(&provider)
        .teardown(&cluster.name_prefix, TIMEOUT)
        .await
        .unwrap();

    assert_eq!(report.destroyed_nodes.len(), 3);
    assert_eq!(provider.calls().await.destroy_node, 12);
}

#[tokio::test(start_paused = true)]
async fn test_every_timed_out_node_is_named() {
    let provider = InMemoryProvider::new();
    let cluster = NodeProvisioner::new(Arc::new(provider.clone()))
        .provision(&topology(2), &params("run0010"))
        .await
        .unwrap();
    wedge_nodes(&provider, &cluster.name_prefix).await;

    let err = destroyer(&provider)
        .teardown(&cluster.name_prefix, Duration::from_secs(3))
        .await
        .unwrap_err();

    let mut timed_out = err.timed_out_resources();
    timed_out.sort_unstable();
    let mut expected: Vec<_> = cluster.nodes.values().map(|n| n.hostname.as_str()).collect();
    expected.sort_unstable();
    assert_eq!(timed_out, expected);

    // addresses were detached up front, so the sweep still ran
    assert!(provider.floating_ips().await.is_empty());
    assert!(provider.volumes().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_partial_provision_is_cleaned_up() {
    let provider = slow_provider();
    let params = params("run0011");
    provider
        .fail_create(&format!("{}node3-osd", params.name_prefix()))
        .await;

    let err = NodeProvisioner::new(Arc::new(provider.clone()))
        .provision(&topology(3), &params)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Provider { .. }));

    // every other node was still created
    assert_eq!(provider.nodes().await.len(), 4);

    destroyer(&provider)
        .teardown(&params.name_prefix(), TIMEOUT)
        .await
        .unwrap();

    assert!(provider.nodes().await.is_empty());
    assert!(provider.floating_ips().await.is_empty());
    assert!(provider.volumes().await.is_empty());
}

#[tokio::test]
async fn test_layout_file_to_running_cluster() {
    let layout = ClusterLayout::from_yaml(
        r#"
globals:
  ceph-cluster:
    name: ceph
    create: true
    image-name: rhel-9.4-server-x86_64
    vm-size: m1.medium
    node1:
      role: mon
    node2:
      role: osd
      no-of-volumes: 1
      disk-size: 15
"#,
    )
    .unwrap();
    let credentials = OpenStackCredentials {
        username: "qe".to_string(),
        password: "secret".to_string(),
        auth_url: "https://keystone.example.com:13000".to_string(),
        auth_version: "3.x_password".to_string(),
        tenant_name: "ceph-qe".to_string(),
        service_region: "regionOne".to_string(),
        keypair: None,
    };

    let provider = InMemoryProvider::new();
    let cluster = NodeProvisioner::new(Arc::new(provider.clone()))
        .provision(layout.declarations(), &layout.params(OWNER, &credentials))
        .await
        .unwrap();

    assert_eq!(cluster.nodes.len(), 2);
    assert!(cluster.name_prefix.starts_with("ceph-qe-run"));
    assert_eq!(provider.volumes().await[0].size_gb, 15);
}

#[tokio::test(start_paused = true)]
async fn test_health_waits_for_placement_groups() {
    let status = ScriptedStatus::new(vec![
        ceph_status(3, 3, 3, "creating+peering"),
        ceph_status(3, 3, 3, "activating"),
        ceph_status(3, 3, 3, "active+clean"),
    ]);

    let verdict = HealthChecker::new(Duration::from_secs(1))
        .wait_healthy(&status, 3, 3, Duration::from_secs(60))
        .await
        .unwrap();

    assert_eq!(verdict, HealthStatus::Healthy);
    assert_eq!(status.polls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_health_reports_missing_osds() {
    let status = ScriptedStatus::new(vec![ceph_status(2, 2, 2, "active+clean")]);

    let verdict = HealthChecker::default()
        .wait_healthy(&status, 3, 3, Duration::from_secs(60))
        .await
        .unwrap();

    assert_eq!(
        verdict,
        HealthStatus::Degraded(DegradedReason::OsdCountMismatch {
            expected: 3,
            actual: 2
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_health_evaluates_after_deadline() {
    let status = ScriptedStatus::new(vec![ceph_status(3, 3, 2, "peering")]);

    let verdict = HealthChecker::new(Duration::from_secs(1))
        .wait_healthy(&status, 3, 3, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(
        verdict,
        HealthStatus::Degraded(DegradedReason::OsdNotIn { up: 3, osds_in: 2 })
    );
    assert!(status.polls() >= 6);
}
