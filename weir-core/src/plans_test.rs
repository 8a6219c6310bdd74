use std::sync::Arc;

use anyhow::Result;

use crate::assignments::PartitionAssignmentRegistry;
use crate::error::CoordError;
use crate::paths::Namespace;
use crate::plan::{FeedDescriptor, OperatorDescriptor, Plan};
use crate::plans::PlanRepository;
use crate::store::memory::MemoryStore;
use crate::store::CoordinationStore;

fn test_plan(name: &str) -> Plan {
    Plan {
        name: name.into(),
        feed: FeedDescriptor { kind: "queue".into(), properties: Default::default() },
        root_operator: OperatorDescriptor { kind: "noop".into(), ..Default::default() },
        disabled: false,
        max_workers: 0,
    }
}

fn harness(store: &MemoryStore) -> (Arc<dyn CoordinationStore>, Namespace) {
    (Arc::new(store.session()), Namespace::default())
}

#[tokio::test]
async fn ensure_namespace_is_idempotent() -> Result<()> {
    let store = MemoryStore::new();
    let (session, ns) = harness(&store);
    let repo = PlanRepository::new(session.clone(), ns.clone());

    repo.ensure_namespace().await?;
    repo.ensure_namespace().await?;

    assert!(session.exists(&ns.workers()).await?.is_some(), "workers path must exist");
    assert!(session.exists(&ns.plans()).await?.is_some(), "plans path must exist");
    Ok(())
}

#[tokio::test]
async fn create_rejects_duplicate_plan_names() -> Result<()> {
    let store = MemoryStore::new();
    let (session, ns) = harness(&store);
    let repo = PlanRepository::new(session, ns);
    repo.ensure_namespace().await?;
    repo.create(&test_plan("p1")).await?;

    let res = repo.create(&test_plan("p1")).await;

    assert!(matches!(res, Err(CoordError::PlanExists(name)) if name == "p1"), "expected PlanExists");
    Ok(())
}

#[tokio::test]
async fn get_returns_not_found_for_unknown_plan() -> Result<()> {
    let store = MemoryStore::new();
    let (session, ns) = harness(&store);
    let repo = PlanRepository::new(session, ns);
    repo.ensure_namespace().await?;

    let res = repo.get("missing").await;

    assert!(matches!(res, Err(CoordError::NotFound(_))), "expected NotFound, got {:?}", res.map(|v| v.0.name));
    Ok(())
}

#[tokio::test]
async fn update_with_stale_version_conflicts_exactly_once() -> Result<()> {
    let store = MemoryStore::new();
    let (session, ns) = harness(&store);
    let repo = PlanRepository::new(session, ns);
    repo.ensure_namespace().await?;
    repo.create(&test_plan("p1")).await?;
    let (mut plan, version) = repo.get("p1").await?;
    plan.max_workers = 2;

    // Two updates carrying the same observed version: the first wins, the
    // second must be rejected with a version conflict.
    let first = repo.update(&plan, version).await;
    let second = repo.update(&plan, version).await;

    assert!(first.is_ok(), "first update must succeed, got {:?}", first);
    assert!(matches!(second, Err(CoordError::VersionConflict { .. })), "second update must conflict, got {:?}", second);
    let (stored, new_version) = repo.get("p1").await?;
    assert_eq!(stored.max_workers, 2, "winning update must be visible");
    assert_eq!(new_version, version + 1, "plan versions must increase monotonically");
    Ok(())
}

#[tokio::test]
async fn update_missing_plan_returns_not_found() -> Result<()> {
    let store = MemoryStore::new();
    let (session, ns) = harness(&store);
    let repo = PlanRepository::new(session, ns);
    repo.ensure_namespace().await?;

    let res = repo.update(&test_plan("ghost"), 0).await;

    assert!(matches!(res, Err(CoordError::NotFound(_))), "expected NotFound, got {:?}", res);
    Ok(())
}

#[tokio::test]
async fn list_names_returns_all_plans() -> Result<()> {
    let store = MemoryStore::new();
    let (session, ns) = harness(&store);
    let repo = PlanRepository::new(session, ns);
    repo.ensure_namespace().await?;
    repo.create(&test_plan("b")).await?;
    repo.create(&test_plan("a")).await?;

    let names = repo.list_names().await?;

    assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["a".to_string(), "b".to_string()]);
    Ok(())
}

#[tokio::test]
async fn find_workers_for_plan_reads_claim_payloads() -> Result<()> {
    let store = MemoryStore::new();
    let (session, ns) = harness(&store);
    let repo = PlanRepository::new(session.clone(), ns.clone());
    let assignments = PartitionAssignmentRegistry::new(session, ns);
    repo.ensure_namespace().await?;
    repo.create(&test_plan("p1")).await?;
    assignments.claim("p1", "part-0", "worker-a").await?;
    assignments.claim("p1", "part-1", "worker-b").await?;

    let workers = repo.find_workers_for_plan("p1").await?;

    assert_eq!(
        workers.into_iter().collect::<Vec<_>>(),
        vec!["worker-a".to_string(), "worker-b".to_string()],
        "workers must be recovered from claim payloads"
    );
    Ok(())
}
