//! Standard push and pull strategies driven through the sync command against
//! a recording remote and an in-memory local store.

use pipeliner_sync::cancellation::request_stop;
use pipeliner_sync::entity::{LocalRecord, RemoteRecord};
use pipeliner_sync::events::{EntitySkipped, SkipSide};
use pipeliner_sync::remote::{FeedPosition, PulledPage, RemoteError};
use pipeliner_sync::strategies::{PassthroughMapper, PullStrategy, PushStrategy};
use pipeliner_sync::testing::{fields, RecordingRemote, TestEnvironment};
use pipeliner_sync::{
    CursorKey, DirectionSet, EntityType, ModelType, RunOutcome, ScopeTracker, StrategyFilter,
    StrategyRegistry, SyncCommand, SyncError, SyncReport, SyncRequest,
};
use serde_json::{json, Map};
use std::sync::Arc;

fn push(env: &TestEnvironment, entity: EntityType, required: &[&str]) -> Arc<PushStrategy> {
    Arc::new(PushStrategy::new(
        entity,
        env.remote.clone(),
        env.local.clone(),
        Arc::new(PassthroughMapper::new(
            required.iter().map(|f| f.to_string()).collect(),
        )),
    ))
}

fn pull(env: &TestEnvironment, entity: EntityType) -> Arc<PullStrategy> {
    Arc::new(
        PullStrategy::new(
            entity,
            env.remote.clone(),
            env.local.clone(),
            Arc::new(PassthroughMapper::default()),
        )
        .with_page_size(2),
    )
}

fn command(env: &TestEnvironment, registry: StrategyRegistry) -> SyncCommand {
    SyncCommand::new(env.orchestrator(registry)).without_signal_handler()
}

async fn run(command: &SyncCommand, directions: DirectionSet) -> SyncReport {
    match command.run(&SyncRequest::new(directions)).await.expect("run") {
        RunOutcome::Completed(report) => report,
        other => panic!("expected a completed run, got {other:?}"),
    }
}

fn remote_task(id: &str) -> RemoteRecord {
    RemoteRecord::new(Some(id.to_string()), fields([("title", json!(format!("task {id}")))]))
}

fn contact(id: &str, name: &str, email: Option<&str>) -> LocalRecord {
    let mut values = vec![("name", json!(name))];
    if let Some(email) = email {
        values.push(("email", json!(email)));
    }
    LocalRecord::new(EntityType::Contact, id, fields(values))
}

#[tokio::test]
async fn test_push_only_strategy_never_receives_pull() {
    let env = TestEnvironment::new().expect("environment");
    env.local.insert(contact("1", "Ada", Some("ada@example.com")));
    let mut registry = StrategyRegistry::new();
    registry.register(push(&env, EntityType::Contact, &[])).unwrap();
    let command = command(&env, registry);

    for _ in 0..2 {
        let report = run(&command, DirectionSet::pull_only()).await;
        assert!(report.applied.is_empty());
    }

    assert!(env.remote.pull_calls().is_empty());
    assert!(env.remote.push_calls().is_empty());
}

#[tokio::test]
async fn test_push_classifies_entity_outcomes() {
    let remote = RecordingRemote::new()
        .fail_push("Cy", RemoteError::Rejected("duplicate email".to_string()))
        .fail_push("Dee", RemoteError::Unexpected("HTTP 500".to_string()));
    let env = TestEnvironment::with_remote(remote).expect("environment");
    env.local.insert(contact("1", "Ada", Some("ada@example.com")));
    env.local.insert(contact("2", "Bob", None));
    env.local.insert(contact("3", "Cy", Some("cy@example.com")));
    env.local.insert(contact("4", "Dee", Some("dee@example.com")));

    let mut registry = StrategyRegistry::new();
    registry.register(push(&env, EntityType::Contact, &["email"])).unwrap();
    let command = command(&env, registry);
    let mut skips = env.bus.subscribe::<EntitySkipped>();

    let report = run(&command, DirectionSet::push_only()).await;
    let pass = &report.applied[0];

    assert_eq!(pass.synced, 1);
    assert_eq!(pass.skipped.len(), 2, "missing field and remote rejection");
    assert_eq!(pass.errors.len(), 1);
    assert!(pass.errors[0].contains("HTTP 500"));
    assert!(!pass.ok);
    assert_eq!(env.remote.push_calls().len(), 3, "invalid record never sent");

    let events = skips.drain();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.side == SkipSide::Local));

    let stored = env.local.records(EntityType::Contact);
    assert_eq!(stored[0].remote_id.as_deref(), Some("r-1"));
    assert!(!stored[0].dirty);
    assert!(stored[1].dirty && stored[2].dirty && stored[3].dirty);
}

#[tokio::test]
async fn test_authentication_failure_aborts_run() {
    let remote = RecordingRemote::new().fail_all(RemoteError::Authentication("token expired".to_string()));
    let env = TestEnvironment::with_remote(remote).expect("environment");
    env.local.insert(contact("1", "Ada", None));
    env.local.insert(contact("2", "Bob", None));

    let mut registry = StrategyRegistry::new();
    registry.register(push(&env, EntityType::Contact, &[])).unwrap();
    registry.register(pull(&env, EntityType::Task)).unwrap();
    let command = command(&env, registry);

    let err = command.run(&SyncRequest::default()).await.err().unwrap();

    assert!(matches!(err, SyncError::Fatal { ref context, .. } if context == "PushContactStrategy"));
    assert_eq!(env.remote.push_calls().len(), 1, "stops at the first entity");
    assert!(env.remote.pull_calls().is_empty(), "later strategies are abandoned");
    assert!(!env.lock.running().unwrap());
}

#[tokio::test]
async fn test_pull_resumes_from_checkpoint() {
    let remote = RecordingRemote::new()
        .with_page(
            EntityType::Task,
            None,
            PulledPage {
                records: vec![remote_task("t-1"), remote_task("t-2")],
                next_cursor: Some("c1".to_string()),
                has_more: true,
            },
        )
        .with_page(
            EntityType::Task,
            Some("c1"),
            PulledPage {
                records: vec![remote_task("t-3")],
                next_cursor: Some("c2".to_string()),
                has_more: false,
            },
        );
    let env = TestEnvironment::with_remote(remote).expect("environment");
    let mut registry = StrategyRegistry::new();
    registry.register(pull(&env, EntityType::Task)).unwrap();
    let command = command(&env, registry);

    let report = run(&command, DirectionSet::pull_only()).await;
    assert_eq!(report.applied[0].synced, 3);
    assert_eq!(env.local.records(EntityType::Task).len(), 3);
    let cursor = env.cursors.get(&CursorKey::new(EntityType::Task)).unwrap().unwrap();
    assert_eq!(cursor.token, "c2");

    let report = run(&command, DirectionSet::pull_only()).await;
    assert_eq!(report.applied[0].synced, 0);

    let positions: Vec<FeedPosition> = env.remote.pull_calls().into_iter().map(|(_, p)| p).collect();
    assert_eq!(
        positions,
        vec![
            FeedPosition::Start,
            FeedPosition::After("c1".to_string()),
            FeedPosition::After("c2".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_flushed_cursor_restarts_from_beginning() {
    let remote = RecordingRemote::new().with_page(
        EntityType::Note,
        None,
        PulledPage {
            records: vec![RemoteRecord::new(Some("n-1".to_string()), Map::new())],
            next_cursor: Some("c1".to_string()),
            has_more: false,
        },
    );
    let env = TestEnvironment::with_remote(remote).expect("environment");
    let mut registry = StrategyRegistry::new();
    registry.register(pull(&env, EntityType::Note)).unwrap();
    let command = command(&env, registry);

    run(&command, DirectionSet::pull_only()).await;
    assert_eq!(env.cursors.invalidate_all().unwrap(), 1);
    run(&command, DirectionSet::pull_only()).await;

    let positions: Vec<FeedPosition> = env.remote.pull_calls().into_iter().map(|(_, p)| p).collect();
    assert_eq!(positions, vec![FeedPosition::Start, FeedPosition::Start]);
    assert_eq!(env.local.records(EntityType::Note).len(), 1, "re-pulled record is upserted");
}

#[tokio::test]
async fn test_scope_change_invalidates_cursors() {
    let env = TestEnvironment::new().expect("environment");
    let tracker = ScopeTracker::new(env.db.clone(), env.cursors.clone());
    assert!(tracker.apply(&["emea"]).unwrap());

    env.cursors.save(&CursorKey::new(EntityType::Company), "c9").unwrap();
    assert!(!tracker.apply(&["emea"]).unwrap());
    assert!(env.cursors.get(&CursorKey::new(EntityType::Company)).unwrap().is_some());

    assert!(tracker.apply(&["emea", "apac"]).unwrap());
    assert!(env.cursors.get(&CursorKey::new(EntityType::Company)).unwrap().is_none());
}

#[tokio::test]
async fn test_pulled_record_without_id_is_skipped() {
    let remote = RecordingRemote::new().with_page(
        EntityType::Company,
        None,
        PulledPage {
            records: vec![
                RemoteRecord::new(Some("c-1".to_string()), fields([("name", json!("Acme"))])),
                RemoteRecord::new(None, fields([("name", json!("Orphan"))])),
            ],
            next_cursor: None,
            has_more: false,
        },
    );
    let env = TestEnvironment::with_remote(remote).expect("environment");
    let mut registry = StrategyRegistry::new();
    registry.register(pull(&env, EntityType::Company)).unwrap();
    let command = command(&env, registry);
    let mut skips = env.bus.subscribe::<EntitySkipped>();

    let report = run(&command, DirectionSet::pull_only()).await;

    assert!(report.applied[0].ok);
    assert_eq!(report.applied[0].synced, 1);
    let events = skips.drain();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].side, SkipSide::Remote);
    assert!(env.cursors.get(&CursorKey::new(EntityType::Company)).unwrap().is_none());
}

#[tokio::test]
async fn test_sync_model_pull_refreshes_linked_record() {
    let remote = RecordingRemote::new().with_record(
        EntityType::Contact,
        RemoteRecord::new(Some("r-9".to_string()), fields([("name", json!("Ada Lovelace"))])),
    );
    let env = TestEnvironment::with_remote(remote).expect("environment");
    let mut local = contact("9", "Ada", None);
    local.remote_id = Some("r-9".to_string());
    env.local.insert(local);

    let mut registry = StrategyRegistry::new();
    registry.register(push(&env, EntityType::Contact, &[])).unwrap();
    registry.register(pull(&env, EntityType::Contact)).unwrap();
    let command = command(&env, registry);

    let outcome = command
        .run_model(DirectionSet::pull_only(), ModelType::Contact, "9", None)
        .await
        .expect("run");

    let report = outcome.report().expect("report");
    assert_eq!(report.applied.len(), 1);
    assert_eq!(report.applied[0].synced, 1);
    assert_eq!(env.remote.fetch_calls(), vec![(EntityType::Contact, "r-9".to_string())]);
    assert!(env.remote.push_calls().is_empty());
    let stored = env.local.records(EntityType::Contact);
    assert_eq!(stored[0].fields["name"], json!("Ada Lovelace"));
}

fn two_task_page_after(after: &str, next: &str) -> RecordingRemote {
    RecordingRemote::new().with_page(
        EntityType::Task,
        Some(after),
        PulledPage {
            records: vec![remote_task("t-1"), remote_task("t-2")],
            next_cursor: Some(next.to_string()),
            has_more: false,
        },
    )
}

fn task_cursor(env: &TestEnvironment) -> Option<String> {
    env.cursors
        .get(&CursorKey::new(EntityType::Task))
        .unwrap()
        .map(|cursor| cursor.token)
}

#[tokio::test]
async fn test_page_with_local_failure_is_not_checkpointed() {
    let env = TestEnvironment::with_remote(two_task_page_after("c0", "c1")).expect("environment");
    env.cursors.save(&CursorKey::new(EntityType::Task), "c0").unwrap();
    env.local.on_upsert(|remote_id| {
        if remote_id == "t-2" {
            Err(SyncError::Storage("disk full".to_string()))
        } else {
            Ok(())
        }
    });
    let mut registry = StrategyRegistry::new();
    registry.register(pull(&env, EntityType::Task)).unwrap();
    let command = command(&env, registry);

    let report = run(&command, DirectionSet::pull_only()).await;
    let pass = &report.applied[0];

    assert!(!pass.ok);
    assert_eq!(pass.synced, 1);
    assert_eq!(pass.errors.len(), 2, "the record failure and the held-back page");
    assert!(pass.errors[0].contains("disk full"));
    assert!(pass.errors[1].contains("not advancing"));
    assert_eq!(task_cursor(&env).as_deref(), Some("c0"), "failed page is pulled again");

    // Once the store recovers the same page is re-read and checkpointed
    env.local.on_upsert(|_| Ok(()));
    let report = run(&command, DirectionSet::pull_only()).await;
    assert!(report.applied[0].ok);
    assert_eq!(task_cursor(&env).as_deref(), Some("c1"));
    assert_eq!(env.local.records(EntityType::Task).len(), 2);
}

#[tokio::test]
async fn test_pull_stopped_mid_page_keeps_previous_cursor() {
    let env = TestEnvironment::with_remote(two_task_page_after("c0", "c1")).expect("environment");
    env.cursors.save(&CursorKey::new(EntityType::Task), "c0").unwrap();
    let mut registry = StrategyRegistry::new();
    registry.register(pull(&env, EntityType::Task)).unwrap();
    let command = command(&env, registry);

    let lock = Arc::clone(&env.lock);
    let shutdown = command.orchestrator().cancellation_token();
    env.local.on_upsert(move |_| {
        request_stop(&lock, &shutdown);
        Ok(())
    });

    let outcome = command
        .run(&SyncRequest::new(DirectionSet::pull_only()))
        .await
        .expect("run");

    let report = match &outcome {
        RunOutcome::StoppedEarly(report) => report,
        other => panic!("expected an early stop, got {other:?}"),
    };
    assert_eq!(report.applied[0].synced, 1, "the second record is left for later");
    assert_eq!(task_cursor(&env).as_deref(), Some("c0"));
    assert_eq!(outcome.exit_code(), 130);
    assert!(!env.lock.running().unwrap());
}

fn scoped_command(env: &TestEnvironment, scopes: &[&str]) -> SyncCommand {
    let mut registry = StrategyRegistry::new();
    registry.register(push(env, EntityType::Contact, &[])).unwrap();
    command(env, registry).with_scopes(
        ScopeTracker::new(env.db.clone(), env.cursors.clone()),
        scopes.iter().map(|s| s.to_string()).collect(),
    )
}

#[tokio::test]
async fn test_scopes_are_applied_only_while_holding_the_lock() {
    let env = TestEnvironment::new().expect("environment");
    let tracker = ScopeTracker::new(env.db.clone(), env.cursors.clone());
    let key = CursorKey::new(EntityType::Company);
    env.cursors.save(&key, "c9").unwrap();
    let command = scoped_command(&env, &["emea"]);

    let live = env.competing_lock();
    assert!(live.acquire().unwrap());
    let outcome = command.run(&SyncRequest::default()).await.expect("run");
    assert!(matches!(outcome, RunOutcome::LockBusy(_)));
    assert!(env.cursors.get(&key).unwrap().is_some(), "live run keeps its cursor");
    assert!(tracker.current().unwrap().is_none());

    live.release().unwrap();
    run(&command, DirectionSet::both()).await;
    assert!(env.cursors.get(&key).unwrap().is_none());
    let current = tracker.current().unwrap().expect("scopes recorded");
    assert!(current.contains("emea") && current.len() == 1);
}

#[tokio::test]
async fn test_unknown_strategy_leaves_scopes_untouched() {
    let env = TestEnvironment::new().expect("environment");
    let key = CursorKey::new(EntityType::Company);
    env.cursors.save(&key, "c9").unwrap();
    let command = scoped_command(&env, &["emea"]);

    let request = SyncRequest::default().with_filter(StrategyFilter::new(["PushNothingStrategy"]));
    let err = command.run(&request).await.err().unwrap();

    assert!(matches!(err, SyncError::UnknownStrategy { .. }));
    assert!(env.cursors.get(&key).unwrap().is_some());
    assert!(ScopeTracker::new(env.db.clone(), env.cursors.clone())
        .current()
        .unwrap()
        .is_none());
    assert!(!env.lock.running().unwrap());
}
