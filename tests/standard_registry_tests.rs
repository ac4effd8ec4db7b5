//! Loading a configuration file and building the standard strategy registry
//! from it.

use pipeliner_sync::constants::CONFIG_ENV_VAR;
use pipeliner_sync::entity::LocalRecord;
use pipeliner_sync::testing::{fields, TestEnvironment};
use pipeliner_sync::{
    load_sync_config, standard_registry, DirectionSet, EntityType, StrategyFilter, StrategyId,
    SyncCommand, SyncConfig, SyncError, SyncRequest,
};
use serde_json::json;
use std::fs;
use tempfile::tempdir;

const CONFIG: &str = r#"{
    "lock_name": "crm-sync",
    "page_size": 50,
    "default_strategies": ["push-contact", "PullTaskStrategy"],
    "strategy_aliases": { "contacts": "PushContactStrategy" },
    "required_fields": { "contact": ["email"] },
    "remote": { "base_url": "http://localhost:9" }
}"#;

fn load_config() -> SyncConfig {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("sync_config.json");
    fs::write(&path, CONFIG).expect("write config");
    load_sync_config(path.to_str()).expect("load config")
}

fn ids(env: &TestEnvironment, config: &SyncConfig, filter: &StrategyFilter) -> Vec<StrategyId> {
    let registry = standard_registry(config, env.remote.clone(), env.local.clone()).unwrap();
    registry
        .resolve(filter)
        .unwrap()
        .iter()
        .map(|s| s.id())
        .collect()
}

#[test]
fn test_standard_registry_covers_entity_catalogue() {
    let env = TestEnvironment::new().expect("environment");
    let registry =
        standard_registry(&SyncConfig::default(), env.remote.clone(), env.local.clone()).unwrap();

    assert!(registry.get(StrategyId::pull(EntityType::User)).is_some());
    assert!(registry.get(StrategyId::push(EntityType::User)).is_none(), "users are remote-owned");
    assert!(registry.get(StrategyId::push(EntityType::CustomField)).is_none());
    assert!(registry.get(StrategyId::push(EntityType::Opportunity)).is_some());

    let all = registry.resolve(&StrategyFilter::defaults()).unwrap();
    assert_eq!(all.len(), registry.len(), "no configured defaults runs everything");
    let first_pull = all
        .iter()
        .position(|s| s.id().direction == pipeliner_sync::SyncDirection::Pull)
        .unwrap();
    assert!(all[..first_pull]
        .iter()
        .all(|s| s.id().direction == pipeliner_sync::SyncDirection::Push));
}

#[test]
fn test_configured_defaults_and_aliases() {
    let env = TestEnvironment::new().expect("environment");
    let config = load_config();
    assert_eq!(config.lock_name, "crm-sync");

    assert_eq!(
        ids(&env, &config, &StrategyFilter::defaults()),
        vec![StrategyId::push(EntityType::Contact), StrategyId::pull(EntityType::Task)]
    );
    assert_eq!(
        ids(&env, &config, &StrategyFilter::new(["contacts", "PushContactStrategy"])),
        vec![StrategyId::push(EntityType::Contact)],
        "duplicate selections collapse"
    );

    let registry = standard_registry(&config, env.remote.clone(), env.local.clone()).unwrap();
    let err = registry.resolve(&StrategyFilter::new(["push-user"])).err().unwrap();
    assert!(matches!(err, SyncError::UnknownStrategy { .. }));
}

#[test]
fn test_config_path_from_environment() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("from_env.json");
    fs::write(&path, r#"{ "lock_name": "env-sync" }"#).expect("write config");

    std::env::set_var(CONFIG_ENV_VAR, &path);
    let config = load_sync_config(None);
    std::env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(config.expect("load config").lock_name, "env-sync");
}

#[tokio::test]
async fn test_required_fields_turn_into_skips() {
    let env = TestEnvironment::new().expect("environment");
    env.local.insert(LocalRecord::new(
        EntityType::Contact,
        "1",
        fields([("name", json!("Ada")), ("email", json!("ada@example.com"))]),
    ));
    env.local.insert(LocalRecord::new(
        EntityType::Contact,
        "2",
        fields([("name", json!("Bob")), ("email", json!("  "))]),
    ));
    let config = load_config();
    let registry = standard_registry(&config, env.remote.clone(), env.local.clone()).unwrap();
    let command = SyncCommand::new(env.orchestrator(registry)).without_signal_handler();

    let request = SyncRequest::new(DirectionSet::push_only())
        .with_filter(StrategyFilter::new(["contacts"]));
    let outcome = command.run(&request).await.expect("run");
    let report = outcome.report().expect("report");

    assert_eq!(report.applied.len(), 1);
    assert_eq!(report.applied[0].synced, 1);
    assert_eq!(report.applied[0].skipped.len(), 1);
    assert!(report.applied[0].skipped[0].contains("email"));
    assert!(report.all_ok());
    assert_eq!(env.remote.push_calls().len(), 1);
}
