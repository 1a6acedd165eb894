use crate::harness::{Assertion, Scenario};
use planstore_core::{EntityType, StoreConfig};

#[test]
fn test_projects_have_separate_trees() {
    Scenario::new("project_trees")
        .in_project("alpha")
        .create_plan("roadmap")
        .create_entity("roadmap", EntityType::Requirement, "a", "Alpha requirement")
        .in_project("beta")
        .create_plan("roadmap")
        .assert_entity_count("roadmap", EntityType::Requirement, 0)
        .leave_project()
        .assert(Assertion::PlanMissing("roadmap".into()))
        .assert(Assertion::FileExists("alpha/plans/roadmap/manifest.json".into()))
        .assert(Assertion::FileExists("beta/plans/roadmap/manifest.json".into()))
        .assert(Assertion::FileMissing("plans/roadmap".into()))
        .run()
        .unwrap();
}

#[test]
fn test_configured_default_project() {
    let mut config = StoreConfig::default();
    config.storage.default_project = Some("single-tenant".into());

    Scenario::new("default_project")
        .with_config(config)
        .create_plan("p1")
        .assert(Assertion::FileExists("single-tenant/plans/p1/manifest.json".into()))
        .in_project("other")
        .assert(Assertion::PlanMissing("p1".into()))
        .run()
        .unwrap();
}

#[test]
fn test_invalid_project_rejected() {
    Scenario::new("invalid_project")
        .in_project("Not Valid")
        .create_plan("p1")
        .fails_with("VALIDATION_ERROR")
        .run()
        .unwrap();
}
