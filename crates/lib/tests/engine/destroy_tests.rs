//! Destroy integration tests.

use std::sync::Arc;

use infraplan_lib::execute::{CancelSignal, ExecuteConfig, Resolution, UnitStatus, apply, cancellation, destroy};
use infraplan_lib::graph::UnitId;

use super::common::{RecordingBackend, collaborators, memory_state, prepare_fixture, test_config};

#[tokio::test]
async fn destroy_reverses_apply_order() {
  let prepared = prepare_fixture("webapp.yaml");
  let plan = &prepared.plan;
  let backend = Arc::new(RecordingBackend::default());
  let state = memory_state();
  let collab = collaborators(&backend, state.clone());

  apply(plan, &collab, &test_config(), &CancelSignal::never()).await.unwrap();
  let outcome = destroy(plan, &collab, &test_config(), &CancelSignal::never()).await.unwrap();

  assert_eq!(outcome.report.count(UnitStatus::Succeeded), plan.len());
  assert!(state.snapshot(plan.scope()).await.is_empty());

  let destroys = backend.destroys();
  assert_eq!(destroys.len(), plan.len());
  let position = |id: &UnitId| destroys.iter().position(|d| d == id).unwrap();
  for unit in plan.units() {
    for dep in &unit.dependencies {
      assert!(position(&unit.id) < position(dep), "{} destroyed before {}", unit.id, dep);
    }
  }
}

#[tokio::test]
async fn destroy_after_partial_apply_only_touches_created_units() {
  let prepared = prepare_fixture("webapp.yaml");
  let plan = &prepared.plan;
  let failing = UnitId(String::from("resource:postgresql/orders"));
  let state = memory_state();

  let broken = Arc::new(RecordingBackend::rejecting([failing.clone()]));
  let failure = apply(plan, &collaborators(&broken, state.clone()), &test_config(), &CancelSignal::never())
    .await
    .unwrap_err();
  let created = failure.report.count(UnitStatus::Succeeded);

  let outcome = destroy(plan, &collaborators(&broken, state.clone()), &test_config(), &CancelSignal::never())
    .await
    .unwrap();

  assert_eq!(broken.destroys().len(), created);
  assert!(!broken.destroys().contains(&failing));
  assert_eq!(
    outcome.report.record(&failing).unwrap().resolution,
    Some(Resolution::Absent)
  );
  assert!(state.snapshot(plan.scope()).await.is_empty());
}

#[tokio::test]
async fn destroy_probes_backend_when_state_is_missing() {
  let prepared = prepare_fixture("minimal.yaml");
  let plan = &prepared.plan;
  let backend = Arc::new(RecordingBackend::default());

  apply(plan, &collaborators(&backend, memory_state()), &test_config(), &CancelSignal::never())
    .await
    .unwrap();

  let config = ExecuteConfig {
    probe_existing: true,
    ..test_config()
  };
  let outcome = destroy(plan, &collaborators(&backend, memory_state()), &config, &CancelSignal::never())
    .await
    .unwrap();

  assert!(
    outcome
      .report
      .records
      .values()
      .all(|r| r.resolution == Some(Resolution::Destroyed))
  );
}

#[tokio::test]
async fn cancelled_destroy_reports_pending_units() {
  let prepared = prepare_fixture("minimal.yaml");
  let backend = Arc::new(RecordingBackend::default());
  let state = memory_state();
  let collab = collaborators(&backend, state.clone());
  apply(&prepared.plan, &collab, &test_config(), &CancelSignal::never())
    .await
    .unwrap();

  let (handle, signal) = cancellation();
  handle.cancel();
  let failure = destroy(&prepared.plan, &collab, &test_config(), &signal).await.unwrap_err();

  assert!(failure.cancelled);
  assert_eq!(failure.retry_ids().len(), prepared.plan.len());
  assert!(backend.destroys().is_empty());
  assert_eq!(state.snapshot(prepared.plan.scope()).await.len(), prepared.plan.len());
}
