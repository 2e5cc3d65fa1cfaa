//! Target registry tests

use shipyard_models::release::{ReleaseRequest, ReleaseStatus};
use shipyard_models::target::{RuntimeReadiness, TargetFilter, TargetNodeSpec, TargetSpec, TargetUpdate};
use shipyard_models::RuntimeType;

use crate::common::Harness;

fn compose_spec(name: &str, host_ids: &[i64]) -> TargetSpec {
    TargetSpec {
        name: name.to_string(),
        target_type: "compose".to_string(),
        nodes: Some(host_ids.iter().map(|id| TargetNodeSpec::new(*id)).collect()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_k8s_target_requires_cluster() {
    let h = Harness::new();
    let err = h
        .engine
        .targets
        .create_target(
            &h.ctx,
            TargetSpec {
                name: "prod-k8s".to_string(),
                target_type: "k8s".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "validation");
    assert!(h.engine.targets.list_targets(&TargetFilter::default()).is_empty());
}

#[tokio::test]
async fn test_unknown_target_type_is_rejected() {
    let h = Harness::new();
    let err = h
        .engine
        .targets
        .create_target(
            &h.ctx,
            TargetSpec {
                name: "swarm".to_string(),
                target_type: "nomad".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
    assert!(err.to_string().contains("unsupported target type"));
}

#[tokio::test]
async fn test_k8s_target_with_unknown_cluster_is_not_found() {
    let h = Harness::new();
    let err = h
        .engine
        .targets
        .create_target(
            &h.ctx,
            TargetSpec {
                name: "prod-k8s".to_string(),
                target_type: "k8s".to_string(),
                cluster_id: Some(42),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_offline_compose_host_fails_creation_atomically() {
    let h = Harness::new();
    let online = h.add_host("edge-1", "10.0.0.1", "active").await;
    let offline = h.add_host("edge-2", "10.0.0.2", "offline").await;

    let err = h
        .engine
        .targets
        .create_target(&h.ctx, compose_spec("edge", &[online.id, offline.id]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");

    // no target row and no bindings survive the failed call
    assert!(h.engine.targets.list_targets(&TargetFilter::default()).is_empty());
    assert!(h.engine.store.read(|t| t.target_nodes.is_empty()));
}

#[tokio::test]
async fn test_create_applies_defaults_and_hydrates_hosts() {
    let h = Harness::new();
    let host = h.add_host("edge-1", "10.0.0.1", "active").await;

    let detail = h
        .engine
        .targets
        .create_target(&h.ctx, compose_spec("edge", &[host.id]))
        .await
        .unwrap();

    assert_eq!(detail.target.environment, "staging");
    assert_eq!(detail.target.target_type, RuntimeType::Compose);
    assert_eq!(detail.target.created_by, "alice");
    assert_eq!(detail.target.readiness, RuntimeReadiness::Unknown);
    assert_eq!(detail.nodes.len(), 1);
    assert_eq!(detail.nodes[0].node.role, "worker");
    assert_eq!(detail.nodes[0].node.weight, 100);
    assert_eq!(detail.nodes[0].host_name, "edge-1");
    assert_eq!(detail.nodes[0].host_address, "10.0.0.1");
}

#[tokio::test]
async fn test_node_validation() {
    let h = Harness::new();
    let host = h.add_host("edge-1", "10.0.0.1", "active").await;
    let target = h
        .engine
        .targets
        .create_target(&h.ctx, compose_spec("edge", &[]))
        .await
        .unwrap();
    let target_id = target.target.id;

    let zero_weight = TargetNodeSpec {
        host_id: host.id,
        role: None,
        weight: Some(0),
    };
    let err = h
        .engine
        .targets
        .replace_target_nodes(&h.ctx, target_id, vec![zero_weight])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");

    let err = h
        .engine
        .targets
        .replace_target_nodes(&h.ctx, target_id, vec![TargetNodeSpec::new(host.id), TargetNodeSpec::new(host.id)])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");

    let err = h
        .engine
        .targets
        .replace_target_nodes(&h.ctx, target_id, vec![TargetNodeSpec::new(999)])
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_replace_nodes_is_all_or_nothing() {
    let h = Harness::new();
    let a = h.add_host("edge-a", "10.0.0.1", "active").await;
    let b = h.add_host("edge-b", "10.0.0.2", "active").await;
    let down = h.add_host("edge-c", "10.0.0.3", "offline").await;

    let target = h
        .engine
        .targets
        .create_target(&h.ctx, compose_spec("edge", &[a.id]))
        .await
        .unwrap();
    let target_id = target.target.id;

    let result = h
        .engine
        .targets
        .replace_target_nodes(&h.ctx, target_id, vec![TargetNodeSpec::new(b.id), TargetNodeSpec::new(down.id)])
        .await;
    assert!(result.is_err());

    // original binding untouched
    let nodes = h.engine.targets.get_target(target_id).unwrap().nodes;
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].node.host_id, a.id);

    let nodes = h
        .engine
        .targets
        .replace_target_nodes(
            &h.ctx,
            target_id,
            vec![TargetNodeSpec {
                host_id: b.id,
                role: Some("manager".to_string()),
                weight: Some(50),
            }],
        )
        .await
        .unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].node.host_id, b.id);
    assert_eq!(nodes[0].node.role, "manager");
    assert_eq!(nodes[0].node.weight, 50);
}

#[tokio::test]
async fn test_k8s_nodes_may_bind_inactive_hosts() {
    let h = Harness::new();
    let cluster = h.add_cluster("lab").await;
    let drained = h.add_host("k8s-1", "10.1.0.1", "maintenance").await;

    let detail = h
        .engine
        .targets
        .create_target(
            &h.ctx,
            TargetSpec {
                name: "lab".to_string(),
                target_type: "k8s".to_string(),
                cluster_id: Some(cluster.id),
                nodes: Some(vec![TargetNodeSpec::new(drained.id)]),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(detail.nodes.len(), 1);
}

#[tokio::test]
async fn test_update_only_overwrites_non_empty_fields() {
    let h = Harness::new();
    let host = h.add_host("edge-1", "10.0.0.1", "active").await;
    let target = h
        .engine
        .targets
        .create_target(
            &h.ctx,
            TargetSpec {
                project_id: Some(7),
                ..compose_spec("edge", &[host.id])
            },
        )
        .await
        .unwrap();
    let target_id = target.target.id;

    let updated = h
        .engine
        .targets
        .update_target(
            &h.ctx,
            target_id,
            TargetUpdate {
                name: Some("  ".to_string()),
                project_id: Some(0),
                environment: Some("qa".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.target.name, "edge");
    assert_eq!(updated.target.project_id, Some(7));
    assert_eq!(updated.target.environment, "qa");
    // nodes: None leaves bindings alone
    assert_eq!(updated.nodes.len(), 1);

    let cleared = h
        .engine
        .targets
        .update_target(
            &h.ctx,
            target_id,
            TargetUpdate {
                nodes: Some(Vec::new()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(cleared.nodes.is_empty());
}

#[tokio::test]
async fn test_target_names_are_unique() {
    let h = Harness::new();
    h.engine
        .targets
        .create_target(&h.ctx, compose_spec("edge", &[]))
        .await
        .unwrap();
    let err = h
        .engine
        .targets
        .create_target(&h.ctx, compose_spec("edge", &[]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
}

#[tokio::test]
async fn test_missing_host_keeps_placeholder_node() {
    let h = Harness::new();
    let host = h.add_host("edge-1", "10.0.0.1", "active").await;
    let target = h
        .engine
        .targets
        .create_target(&h.ctx, compose_spec("edge", &[host.id]))
        .await
        .unwrap();

    h.engine.store.delete_host(host.id).await.unwrap();

    let detail = h.engine.targets.get_target(target.target.id).unwrap();
    assert_eq!(detail.nodes.len(), 1);
    assert_eq!(detail.nodes[0].node.host_id, host.id);
    assert_eq!(detail.nodes[0].host_name, "");
    assert_eq!(detail.nodes[0].host_address, "");
}

#[tokio::test]
async fn test_list_filters() {
    let h = Harness::new();
    let cluster = h.add_cluster("lab").await;
    h.engine
        .targets
        .create_target(&h.ctx, compose_spec("edge", &[]))
        .await
        .unwrap();
    h.engine
        .targets
        .create_target(
            &h.ctx,
            TargetSpec {
                name: "lab".to_string(),
                target_type: "k8s".to_string(),
                cluster_id: Some(cluster.id),
                environment: Some("production".to_string()),
                team_id: Some(3),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let k8s = h.engine.targets.list_targets(&TargetFilter {
        target_type: Some(RuntimeType::K8s),
        ..Default::default()
    });
    assert_eq!(k8s.len(), 1);
    assert_eq!(k8s[0].name, "lab");

    let staging = h.engine.targets.list_targets(&TargetFilter {
        environment: Some("staging".to_string()),
        ..Default::default()
    });
    assert_eq!(staging.len(), 1);
    assert_eq!(staging[0].name, "edge");

    let team = h.engine.targets.list_targets(&TargetFilter {
        team_id: Some(3),
        ..Default::default()
    });
    assert_eq!(team.len(), 1);
}

#[tokio::test]
async fn test_delete_removes_bindings() {
    let h = Harness::new();
    let host = h.add_host("edge-1", "10.0.0.1", "active").await;
    let target = h
        .engine
        .targets
        .create_target(&h.ctx, compose_spec("edge", &[host.id]))
        .await
        .unwrap();
    let target_id = target.target.id;

    h.engine.targets.delete_target(&h.ctx, target_id).await.unwrap();

    assert!(h.engine.targets.get_target(target_id).unwrap_err().is_not_found());
    assert!(h.engine.store.read(|t| t.target_nodes.is_empty()));
}

#[tokio::test]
async fn test_delete_refuses_pending_release() {
    let h = Harness::new();
    let target = h
        .engine
        .targets
        .create_target(
            &h.ctx,
            TargetSpec {
                environment: Some("production".to_string()),
                ..compose_spec("edge", &[])
            },
        )
        .await
        .unwrap();
    h.add_service(5, "services:\n  web:\n    image: nginx\n");
    let release = h
        .engine
        .releases
        .apply_release(
            &h.ctx,
            ReleaseRequest {
                service_id: 5,
                target_id: target.target.id,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(release.status, ReleaseStatus::PendingApproval);

    let err = h
        .engine
        .targets
        .delete_target(&h.ctx, target.target.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "conflict");
    assert!(h.engine.targets.get_target(target.target.id).is_ok());
}
