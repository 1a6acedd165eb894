use crate::harness::{Assertion, Scenario};
use planstore_core::{EntityPatch, EntityType, NewEntity, StoreConfig};

#[test]
fn test_rotation_keeps_newest_snapshots() {
    Scenario::new("history_rotation")
        .create_plan_with_history("p1", true, 2)
        .create_entity("p1", EntityType::Requirement, "r", "V1")
        .update_title("p1", EntityType::Requirement, "r", "V2")
        .update_title("p1", EntityType::Requirement, "r", "V3")
        .update_title("p1", EntityType::Requirement, "r", "V4")
        .update_title("p1", EntityType::Requirement, "r", "V5")
        .assert_version("p1", EntityType::Requirement, "r", 5)
        .assert_history("p1", EntityType::Requirement, "r", &[4, 3])
        .assert_verify_clean()
        .run()
        .unwrap();
}

#[test]
fn test_diff_reports_changed_fields_only() {
    let mut input = NewEntity::titled("V1 Title");
    input.description = Some("V1 Description".into());

    Scenario::new("history_diff")
        .create_plan_with_history("p1", true, 10)
        .create_entity_with("p1", EntityType::Solution, "s", input)
        .update_entity(
            "p1",
            EntityType::Solution,
            "s",
            EntityPatch {
                title: Some("V2 Title".into()),
                description: Some("V2 Description".into()),
                author: Some("reviewer".into()),
                ..EntityPatch::default()
            },
            Some(1),
        )
        .assert(Assertion::DiffChanges {
            plan: "p1".into(),
            entity_type: EntityType::Solution,
            alias: "s".into(),
            from: 1,
            to: 2,
            fields: vec!["title".into(), "description".into()],
        })
        .update_entity(
            "p1",
            EntityType::Solution,
            "s",
            EntityPatch::default().with_field("effort", 3),
            Some(2),
        )
        .assert(Assertion::DiffChanges {
            plan: "p1".into(),
            entity_type: EntityType::Solution,
            alias: "s".into(),
            from: 1,
            to: 3,
            fields: vec!["title".into(), "description".into(), "effort".into()],
        })
        .assert(Assertion::DiffChanges {
            plan: "p1".into(),
            entity_type: EntityType::Solution,
            alias: "s".into(),
            from: 1,
            to: 9,
            fields: vec![],
        })
        .fails_with("NOT_FOUND")
        .run()
        .unwrap();
}

#[test]
fn test_disabled_history_records_nothing() {
    Scenario::new("history_disabled")
        .create_plan_with_history("quiet", false, 5)
        .create_entity("quiet", EntityType::Decision, "d", "Choose a database")
        .update_title("quiet", EntityType::Decision, "d", "Choose Postgres")
        .update_title("quiet", EntityType::Decision, "d", "Choose SQLite")
        .assert_version("quiet", EntityType::Decision, "d", 3)
        .assert_history("quiet", EntityType::Decision, "d", &[])
        .assert(Assertion::FileMissing(
            "plans/quiet/history/decisions".into(),
        ))
        .run()
        .unwrap();
}

#[test]
fn test_configured_default_depth() {
    let mut config = StoreConfig::default();
    config.history.max_depth_default = 1;

    Scenario::new("history_configured_depth")
        .with_config(config)
        .create_plan("p1")
        .create_entity("p1", EntityType::Artifact, "a", "Draft")
        .update_title("p1", EntityType::Artifact, "a", "Second")
        .update_title("p1", EntityType::Artifact, "a", "Third")
        .assert_history("p1", EntityType::Artifact, "a", &[2])
        .run()
        .unwrap();
}

#[test]
fn test_entity_delete_purges_history() {
    Scenario::new("history_purged_on_delete")
        .create_plan("p1")
        .create_entity("p1", EntityType::Phase, "ph", "Alpha")
        .update_title("p1", EntityType::Phase, "ph", "Beta")
        .assert_history("p1", EntityType::Phase, "ph", &[1])
        .delete_entity("p1", EntityType::Phase, "ph")
        .assert_history("p1", EntityType::Phase, "ph", &[])
        .run()
        .unwrap();
}
