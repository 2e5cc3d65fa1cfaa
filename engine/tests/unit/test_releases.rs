//! Release pipeline tests

use std::collections::BTreeMap;

use shipyard::locks::release_key;
use shipyard::EngineError;
use shipyard_models::release::{
    ApprovalDecision, ReleaseFilter, ReleaseRequest, ReleaseStatus, ReleaseStrategy, TimelineEventKind,
};
use shipyard_models::target::TargetSpec;
use shipyard_models::FindingLevel;

use crate::common::Harness;

const WEB_MANIFEST: &str = r#"apiVersion: v1
kind: ConfigMap
metadata:
  name: web-config
data:
  tag: "{{ tag }}"
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
  namespace: frontend
spec:
  template:
    spec:
      containers:
        - name: web
          image: "registry.local/web:{{tag}}"
"#;

const SERVICE: i64 = 201;

async fn k8s_target(h: &Harness, environment: &str) -> i64 {
    let cluster = h.add_credentialed_cluster("lab").await;
    h.add_service(SERVICE, WEB_MANIFEST);
    h.engine
        .targets
        .create_target(
            &h.ctx,
            TargetSpec {
                name: format!("lab-{}", environment),
                target_type: "k8s".to_string(),
                cluster_id: Some(cluster.id),
                environment: Some(environment.to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .target
        .id
}

fn request(target_id: i64, tag: &str) -> ReleaseRequest {
    ReleaseRequest {
        service_id: SERVICE,
        target_id,
        variables: BTreeMap::from([("tag".to_string(), tag.to_string())]),
        ..Default::default()
    }
}

fn release_count(h: &Harness) -> usize {
    h.engine.store.read(|t| t.releases.len())
}

#[tokio::test]
async fn test_preview_persists_nothing() {
    let h = Harness::new();
    let target_id = k8s_target(&h, "staging").await;

    let preview = h
        .engine
        .releases
        .preview_release(&request(target_id, "1.0.0"))
        .await
        .unwrap();

    assert!(preview.manifest.contains("registry.local/web:1.0.0"));
    assert!(!preview.manifest.contains("{{"));
    assert_eq!(preview.namespace, "shop");
    assert_eq!(preview.environment, "staging");
    assert_eq!(preview.revision.as_deref(), Some("rev-201"));
    assert!(preview.checks.iter().any(|c| c.code == "target_resolved"));
    assert!(preview.checks.iter().any(|c| c.code == "manifest_resolved"));
    assert!(preview.warnings.is_empty());
    assert_eq!(release_count(&h), 0);
    assert!(h.applier.applied().is_empty());
}

#[tokio::test]
async fn test_preview_reports_unresolved_variables() {
    let h = Harness::new();
    let target_id = k8s_target(&h, "staging").await;

    let err = h
        .engine
        .releases
        .preview_release(&ReleaseRequest {
            service_id: SERVICE,
            target_id,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
    assert!(err.to_string().contains("tag"));
}

#[tokio::test]
async fn test_preview_warns_on_shape_problems() {
    let h = Harness::new();
    let edge = h
        .engine
        .targets
        .create_target(
            &h.ctx,
            TargetSpec {
                name: "edge".to_string(),
                target_type: "compose".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    h.add_service(9, "version: '3.8'\nvolumes:\n  data: {}\n");

    let preview = h
        .engine
        .releases
        .preview_release(&ReleaseRequest {
            service_id: 9,
            target_id: edge.target.id,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(preview.warnings.len(), 1);
    assert_eq!(preview.warnings[0].code, "compose_services_missing");
    assert_eq!(preview.warnings[0].level, FindingLevel::Warning);

    let k8s_target_id = k8s_target(&h, "staging").await;
    h.add_service(10, "apiVersion: v1\nmetadata:\n  name: nameless\n");
    let preview = h
        .engine
        .releases
        .preview_release(&ReleaseRequest {
            service_id: 10,
            target_id: k8s_target_id,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(preview.warnings.iter().any(|w| w.code == "k8s_kind_missing"));
}

#[tokio::test]
async fn test_preview_unknown_service_and_target() {
    let h = Harness::new();
    let target_id = k8s_target(&h, "staging").await;

    let err = h
        .engine
        .releases
        .preview_release(&ReleaseRequest {
            service_id: 404,
            target_id,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let err = h
        .engine
        .releases
        .preview_release(&request(target_id + 100, "1"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_apply_to_k8s_applies_every_document() {
    let h = Harness::new();
    let target_id = k8s_target(&h, "staging").await;

    let release = h
        .engine
        .releases
        .apply_release(&h.ctx, request(target_id, "1.0.0"))
        .await
        .unwrap();

    assert_eq!(release.status, ReleaseStatus::Succeeded);
    assert_eq!(release.strategy, ReleaseStrategy::Rolling);
    assert_eq!(release.operator, "alice");
    assert!(release.finished_at.is_some());

    let applied = h.applier.applied();
    assert_eq!(applied.len(), 2);
    assert_eq!(applied[0].name.as_deref(), Some("web-config"));
    assert_eq!(applied[0].namespace, "shop");
    assert_eq!(applied[1].kind.as_deref(), Some("Deployment"));
    assert_eq!(applied[1].namespace, "frontend");
    assert!(applied.iter().all(|a| a.field_manager == "shipyard"));

    let timeline = h.engine.releases.list_release_timeline(release.id).unwrap();
    let kinds: Vec<_> = timeline.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            TimelineEventKind::Created,
            TimelineEventKind::StatusChanged,
            TimelineEventKind::StatusChanged
        ]
    );
    assert_eq!(timeline[2].to_status, Some(ReleaseStatus::Succeeded));
}

#[tokio::test]
async fn test_compose_release_is_accepted() {
    let h = Harness::new();
    let edge = h
        .engine
        .targets
        .create_target(
            &h.ctx,
            TargetSpec {
                name: "edge".to_string(),
                target_type: "compose".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    h.add_service(7, "services:\n  web:\n    image: nginx:{{tag}}\n");

    let release = h
        .engine
        .releases
        .apply_release(
            &h.ctx,
            ReleaseRequest {
                service_id: 7,
                target_id: edge.target.id,
                variables: BTreeMap::from([("tag".to_string(), "1.25".to_string())]),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(release.status, ReleaseStatus::Accepted);
    assert_eq!(release.manifest, "services:\n  web:\n    image: nginx:1.25\n");
    assert!(h.applier.applied().is_empty());
}

#[tokio::test]
async fn test_production_release_waits_for_approval() {
    let h = Harness::new();
    let target_id = k8s_target(&h, "production").await;

    let release = h
        .engine
        .releases
        .apply_release(&h.ctx, request(target_id, "2.0.0"))
        .await
        .unwrap();
    assert_eq!(release.status, ReleaseStatus::PendingApproval);
    assert!(release.checks.iter().any(|c| c.code == "approval_required"));
    assert!(h.applier.applied().is_empty());

    let timeline = h.engine.releases.list_release_timeline(release.id).unwrap();
    let gates = timeline
        .iter()
        .filter(|e| e.kind == TimelineEventKind::ApprovalRequired)
        .count();
    assert_eq!(gates, 1);

    let approver = shipyard::OpContext::new("bob");
    let approved = h
        .engine
        .releases
        .approve_release(&approver, release.id, "ship it")
        .await
        .unwrap();
    assert_eq!(approved.status, ReleaseStatus::Succeeded);
    assert_eq!(h.applier.applied().len(), 2);

    let approvals = h.engine.releases.list_release_approvals(release.id).unwrap();
    assert_eq!(approvals.len(), 1);
    assert_eq!(approvals[0].decision, ApprovalDecision::Approved);
    assert_eq!(approvals[0].actor, "bob");
    assert_eq!(approvals[0].comment, "ship it");

    let timeline = h.engine.releases.list_release_timeline(release.id).unwrap();
    let approved_event = timeline
        .iter()
        .find(|e| e.kind == TimelineEventKind::Approved)
        .unwrap();
    assert_eq!(approved_event.actor, "bob");
    assert_eq!(approved_event.message, "ship it");

    // a second approval is not a valid transition
    let err = h
        .engine
        .releases
        .approve_release(&approver, release.id, "again")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_transition");
    assert_eq!(h.applier.applied().len(), 2);
}

#[tokio::test]
async fn test_request_environment_overrides_target() {
    let h = Harness::new();
    let target_id = k8s_target(&h, "staging").await;

    let release = h
        .engine
        .releases
        .apply_release(
            &h.ctx,
            ReleaseRequest {
                environment: Some("Production".to_string()),
                ..request(target_id, "2.0.0")
            },
        )
        .await
        .unwrap();
    assert_eq!(release.status, ReleaseStatus::PendingApproval);
    assert_eq!(release.environment, "Production");
}

#[tokio::test]
async fn test_rejected_release_is_terminal() {
    let h = Harness::new();
    let target_id = k8s_target(&h, "production").await;
    let release = h
        .engine
        .releases
        .apply_release(&h.ctx, request(target_id, "2.0.0"))
        .await
        .unwrap();

    let rejected = h
        .engine
        .releases
        .reject_release(&h.ctx, release.id, "change freeze")
        .await
        .unwrap();
    assert_eq!(rejected.status, ReleaseStatus::Rejected);
    assert!(rejected.finished_at.is_some());

    let err = h
        .engine
        .releases
        .approve_release(&h.ctx, release.id, "")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_transition");

    let err = h
        .engine
        .releases
        .rollback_release(&h.ctx, release.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_transition");
    assert!(h.applier.applied().is_empty());

    let approvals = h.engine.releases.list_release_approvals(release.id).unwrap();
    assert_eq!(approvals[0].decision, ApprovalDecision::Rejected);
}

#[tokio::test]
async fn test_apply_after_cluster_deleted_records_failure() {
    let h = Harness::new();
    let target_id = k8s_target(&h, "staging").await;
    let cluster_id = h
        .engine
        .targets
        .get_target(target_id)
        .unwrap()
        .target
        .cluster_id
        .unwrap();
    h.engine.store.delete_cluster(cluster_id).await.unwrap();

    let err = h
        .engine
        .releases
        .apply_release(&h.ctx, request(target_id, "1.0.0"))
        .await
        .unwrap_err();
    let release_id = match err {
        EngineError::ReleaseFailed { release_id, .. } => release_id,
        other => panic!("expected a recorded release failure, got {other}"),
    };

    let release = h.engine.releases.get_release(release_id).unwrap();
    assert_eq!(release.status, ReleaseStatus::Failed);
    assert!(!release.diagnostics.is_empty());
    assert!(release.diagnostics.iter().any(|d| d.code == "cluster_not_found"));
    assert!(h.applier.applied().is_empty());
}

#[tokio::test]
async fn test_document_failure_keeps_applied_documents() {
    let h = Harness::new();
    let target_id = k8s_target(&h, "staging").await;
    h.applier.reject_name("web");

    let err = h
        .engine
        .releases
        .apply_release(&h.ctx, request(target_id, "1.0.0"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "release_failed");

    let release = h.engine.releases.list_releases(&ReleaseFilter::default())[0].clone();
    assert_eq!(release.status, ReleaseStatus::Failed);

    // the ConfigMap went through and is not undone
    let applied = h.applier.applied();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].name.as_deref(), Some("web-config"));

    let failure = release
        .diagnostics
        .iter()
        .find(|d| d.level == FindingLevel::Error)
        .unwrap();
    assert_eq!(failure.code, "document_apply_failed");
    assert!(failure.message.contains("Deployment/web"));
}

#[tokio::test]
async fn test_rollback_without_previous_release() {
    let h = Harness::new();
    let target_id = k8s_target(&h, "staging").await;
    let only = h
        .engine
        .releases
        .apply_release(&h.ctx, request(target_id, "1.0.0"))
        .await
        .unwrap();

    let err = h
        .engine
        .releases
        .rollback_release(&h.ctx, only.id)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(err.to_string().contains("no previous release"));
    assert_eq!(release_count(&h), 1);
}

#[tokio::test]
async fn test_rollback_is_bookkeeping_by_default() {
    let h = Harness::new();
    let target_id = k8s_target(&h, "staging").await;
    let first = h
        .engine
        .releases
        .apply_release(&h.ctx, request(target_id, "1.0.0"))
        .await
        .unwrap();
    let second = h
        .engine
        .releases
        .apply_release(&h.ctx, request(target_id, "2.0.0"))
        .await
        .unwrap();
    assert_eq!(h.applier.applied().len(), 4);

    let rollback = h
        .engine
        .releases
        .rollback_release(&h.ctx, second.id)
        .await
        .unwrap();

    assert_eq!(rollback.strategy, ReleaseStrategy::Rollback);
    assert_eq!(rollback.status, ReleaseStatus::Succeeded);
    assert_eq!(rollback.manifest, first.manifest);
    assert_eq!(rollback.revision, first.revision);
    assert_eq!(rollback.rollback_of, Some(second.id));
    assert!(rollback.id > second.id);

    // cluster untouched, older rows untouched
    assert_eq!(h.applier.applied().len(), 4);
    assert_eq!(h.engine.releases.get_release(second.id).unwrap(), second);

    let timeline = h.engine.releases.list_release_timeline(rollback.id).unwrap();
    assert!(timeline.iter().any(|e| e.kind == TimelineEventKind::RolledBack));

    let listed = h.engine.releases.list_releases(&ReleaseFilter {
        service_id: Some(SERVICE),
        target_id: Some(target_id),
    });
    let ids: Vec<_> = listed.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![rollback.id, second.id, first.id]);
}

#[tokio::test]
async fn test_rollback_reapplies_when_enabled() {
    let h = Harness::with_settings(|s| s.reapply_on_rollback = true);
    let target_id = k8s_target(&h, "staging").await;
    h.engine
        .releases
        .apply_release(&h.ctx, request(target_id, "1.0.0"))
        .await
        .unwrap();
    let second = h
        .engine
        .releases
        .apply_release(&h.ctx, request(target_id, "2.0.0"))
        .await
        .unwrap();

    let rollback = h
        .engine
        .releases
        .rollback_release(&h.ctx, second.id)
        .await
        .unwrap();
    assert_eq!(rollback.status, ReleaseStatus::Succeeded);
    assert_eq!(h.applier.applied().len(), 6);
}

#[tokio::test]
async fn test_rollback_skips_failed_releases() {
    let h = Harness::new();
    let target_id = k8s_target(&h, "staging").await;
    let good = h
        .engine
        .releases
        .apply_release(&h.ctx, request(target_id, "1.0.0"))
        .await
        .unwrap();

    h.applier.reject_name("web");
    let _ = h
        .engine
        .releases
        .apply_release(&h.ctx, request(target_id, "1.5.0"))
        .await
        .unwrap_err();
    h.applier.reject.lock().unwrap().clear();

    let third = h
        .engine
        .releases
        .apply_release(&h.ctx, request(target_id, "2.0.0"))
        .await
        .unwrap();

    let rollback = h
        .engine
        .releases
        .rollback_release(&h.ctx, third.id)
        .await
        .unwrap();
    assert_eq!(rollback.manifest, good.manifest);
}

#[tokio::test]
async fn test_concurrent_release_on_same_pair_conflicts() {
    let h = Harness::new();
    let target_id = k8s_target(&h, "staging").await;

    let _held = h
        .engine
        .in_flight
        .acquire(vec![release_key(SERVICE, target_id)])
        .unwrap();

    let err = h
        .engine
        .releases
        .apply_release(&h.ctx, request(target_id, "1.0.0"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "conflict");
    assert_eq!(release_count(&h), 0);
    assert!(h.applier.applied().is_empty());
}

#[tokio::test]
async fn test_apply_refuses_rollback_strategy() {
    let h = Harness::new();
    let target_id = k8s_target(&h, "staging").await;
    let err = h
        .engine
        .releases
        .apply_release(
            &h.ctx,
            ReleaseRequest {
                strategy: ReleaseStrategy::Rollback,
                ..request(target_id, "1.0.0")
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
}
