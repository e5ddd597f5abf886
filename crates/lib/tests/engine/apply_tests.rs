//! Apply integration tests.

use std::sync::Arc;

use infraplan_lib::backend::{FileStateStore, MemoryStateStore, SimulatedBackend, StateStore, StoredUnit, UnitOutputs};
use infraplan_lib::execute::{CancelSignal, Collaborators, Resolution, UnitStatus, apply};
use infraplan_lib::graph::UnitId;
use infraplan_lib::manifest::{ResourceType, ValidationError};
use infraplan_lib::naming::NamingTable;
use infraplan_lib::pipeline::{PrepareError, prepare};
use tempfile::TempDir;

use super::common::{
  RecordingBackend, collaborators, fixture_content, memory_state, prepare_fixture, test_config,
  transitive_dependencies,
};

#[tokio::test]
async fn apply_webapp_with_simulated_backend() {
  let prepared = prepare_fixture("webapp.yaml");
  let collab = Collaborators::new(Arc::new(SimulatedBackend::new()), memory_state());

  let outcome = apply(&prepared.plan, &collab, &test_config(), &CancelSignal::never())
    .await
    .unwrap();

  assert_eq!(outcome.report.total(), prepared.plan.len());
  assert_eq!(outcome.outputs.resource_group, "rg-webshop-dev");

  let db = outcome.outputs.resource("postgresql/orders").unwrap();
  assert_eq!(db.name, "psql-webshop-orders-dev");
  assert_eq!(db.endpoint.as_deref(), Some("psql-webshop-orders-dev.postgres.database.azure.com"));

  for suffix in ["admins", "readers", "developers"] {
    assert!(outcome.outputs.security_groups.contains_key(suffix), "missing group {suffix}");
  }
}

#[tokio::test]
async fn reapply_does_not_reinvoke_backend_for_recorded_units() {
  let prepared = prepare_fixture("webapp.yaml");
  let state = memory_state();

  let first = Arc::new(RecordingBackend::default());
  apply(&prepared.plan, &collaborators(&first, state.clone()), &test_config(), &CancelSignal::never())
    .await
    .unwrap();
  assert_eq!(first.creates().len(), prepared.plan.len());

  let second = Arc::new(RecordingBackend::default());
  let outcome = apply(&prepared.plan, &collaborators(&second, state.clone()), &test_config(), &CancelSignal::never())
    .await
    .unwrap();

  assert!(second.creates().is_empty());
  assert!(
    outcome
      .report
      .records
      .values()
      .all(|r| r.resolution == Some(Resolution::Reused))
  );
}

#[tokio::test]
async fn units_recorded_by_an_earlier_run_are_not_provisioned_again() {
  let prepared = prepare_fixture("webapp.yaml");
  let plan = &prepared.plan;

  let recorded: Vec<UnitId> = plan.stages()[..2].iter().flat_map(|s| s.units.iter().cloned()).collect();
  let state = Arc::new(MemoryStateStore::with_entries(
    plan.scope(),
    recorded.iter().map(|id| {
      let name = plan.unit(id).unwrap().name.clone();
      (
        id.clone(),
        StoredUnit::succeeded(name, UnitOutputs {
          id: format!("/earlier/{id}"),
          ..Default::default()
        }),
      )
    }),
  ));

  let backend = Arc::new(RecordingBackend::default());
  let outcome = apply(plan, &collaborators(&backend, state), &test_config(), &CancelSignal::never())
    .await
    .unwrap();

  let creates = backend.creates();
  for id in &recorded {
    assert!(!creates.contains(id), "{id} was provisioned twice");
    assert_eq!(outcome.report.record(id).unwrap().resolution, Some(Resolution::Reused));
  }
  assert_eq!(creates.len(), plan.len() - recorded.len());
  assert_eq!(
    outcome.outputs.resource("postgresql/orders").map(|r| r.id.as_str()),
    Some("/earlier/resource:postgresql/orders")
  );
}

#[tokio::test]
async fn environments_sharing_a_store_do_not_reuse_each_other() {
  let dev = prepare_fixture("minimal.yaml");
  let prod_manifest = fixture_content("minimal.yaml").replace("environment: dev", "environment: prod");
  let prod = prepare(&prod_manifest, &NamingTable::standard()).unwrap();
  assert_ne!(dev.plan.scope(), prod.plan.scope());

  let state = memory_state();
  let backend = Arc::new(RecordingBackend::default());
  apply(&dev.plan, &collaborators(&backend, state.clone()), &test_config(), &CancelSignal::never())
    .await
    .unwrap();

  let prod_backend = Arc::new(RecordingBackend::default());
  let outcome = apply(&prod.plan, &collaborators(&prod_backend, state.clone()), &test_config(), &CancelSignal::never())
    .await
    .unwrap();

  assert_eq!(prod_backend.creates().len(), prod.plan.len());
  assert!(
    outcome
      .report
      .records
      .values()
      .all(|r| r.resolution == Some(Resolution::Created))
  );
  let files = outcome.outputs.resource("storage_account/files").unwrap();
  assert_eq!(files.id, format!("/test/{}", files.name));
  assert_ne!(files.name, "stmyappfilesd");

  assert_eq!(state.snapshot(dev.plan.scope()).await.len(), dev.plan.len());
  assert_eq!(state.snapshot(prod.plan.scope()).await.len(), prod.plan.len());
}

#[tokio::test]
async fn entries_recorded_under_another_name_are_not_reused() {
  let prepared = prepare_fixture("minimal.yaml");
  let plan = &prepared.plan;
  let files = UnitId::resource(ResourceType::StorageAccount, "files");
  let state = Arc::new(MemoryStateStore::with_entries(
    plan.scope(),
    [(
      files.clone(),
      StoredUnit::succeeded("stmyappfilesold", UnitOutputs {
        id: "/stale".to_string(),
        ..Default::default()
      }),
    )],
  ));

  let backend = Arc::new(RecordingBackend::default());
  let outcome = apply(plan, &collaborators(&backend, state.clone()), &test_config(), &CancelSignal::never())
    .await
    .unwrap();

  assert!(backend.creates().contains(&files));
  assert_eq!(outcome.report.record(&files).unwrap().resolution, Some(Resolution::Created));
  assert_eq!(state.snapshot(plan.scope()).await[&files].name, "stmyappfilesd");
}

#[tokio::test]
async fn permanent_failure_skips_transitive_dependents_only() {
  let prepared = prepare_fixture("webapp.yaml");
  let plan = &prepared.plan;
  let failing = UnitId::resource(ResourceType::PostgreSql, "orders");
  assert_eq!(plan.stage_of(&failing), Some(1));

  let backend = Arc::new(RecordingBackend::rejecting([failing.clone()]));
  let failure = apply(plan, &collaborators(&backend, memory_state()), &test_config(), &CancelSignal::never())
    .await
    .unwrap_err();

  assert_eq!(failure.failed(), vec![&failing]);
  for unit in plan.units() {
    let status = failure.report.status(&unit.id).unwrap();
    if unit.id == failing {
      continue;
    }
    if transitive_dependencies(plan, &unit.id).contains(&failing) {
      assert_eq!(status, UnitStatus::Skipped, "{} should be skipped", unit.id);
      let reason = failure.report.record(&unit.id).unwrap().skipped_because.as_ref().unwrap();
      assert_eq!(reason.failed, failing);
      assert_eq!(reason.chain.last(), Some(&failing));
    } else {
      assert_eq!(status, UnitStatus::Succeeded, "{} should have run", unit.id);
    }
  }

  // The function app declares a dependency on the database.
  let api = UnitId::resource(ResourceType::FunctionApp, "api");
  assert_eq!(failure.report.status(&api), Some(UnitStatus::Skipped));
  assert!(!backend.creates().contains(&api));

  // Unrelated resources still produced outputs.
  let outputs = failure.outputs.as_ref().unwrap();
  assert!(outputs.resource("static_web_app/site").is_some());
}

#[tokio::test]
async fn file_state_makes_runs_resumable() {
  let temp = TempDir::new().unwrap();
  let path = temp.path().join("state.json");
  let prepared = prepare_fixture("minimal.yaml");

  let backend = Arc::new(RecordingBackend::default());
  let store: Arc<dyn StateStore> = Arc::new(FileStateStore::new(&path));
  apply(&prepared.plan, &collaborators(&backend, store), &test_config(), &CancelSignal::never())
    .await
    .unwrap();
  assert!(path.exists());

  let reopened: Arc<dyn StateStore> = Arc::new(FileStateStore::new(&path));
  let again = Arc::new(RecordingBackend::default());
  let outcome = apply(&prepared.plan, &collaborators(&again, reopened), &test_config(), &CancelSignal::never())
    .await
    .unwrap();

  assert!(again.creates().is_empty());
  assert_eq!(
    outcome
      .outputs
      .resource("storage_account/files")
      .map(|r| r.id.as_str()),
    Some("/test/stmyappfilesd")
  );
}

#[test]
fn invalid_manifest_reports_every_error_before_planning() {
  let err = prepare(&fixture_content("invalid.yaml"), &NamingTable::standard()).unwrap_err();
  let PrepareError::Validation(errors) = err else {
    panic!("expected validation errors, got {err:?}");
  };

  assert!(errors.len() >= 5, "{errors}");
  assert!(
    errors
      .iter()
      .any(|e| matches!(e, ValidationError::UnknownType { found, .. } if found == "redis"))
  );
  assert!(
    errors
      .iter()
      .any(|e| matches!(e, ValidationError::DuplicateName { name, .. } if name == "secrets"))
  );
}
