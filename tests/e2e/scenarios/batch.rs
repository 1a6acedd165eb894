use crate::harness::assertions::Aliases;
use crate::harness::{Assertion, Scenario};
use planstore_core::{BatchOperation, EntityType, PlanStore};
use serde_json::json;

fn create(entity_type: EntityType, temp_id: &str, title: &str) -> BatchOperation {
    BatchOperation::Create {
        entity_type,
        temp_id: Some(temp_id.to_string()),
        data: json!({ "title": title }),
    }
}

#[test]
fn test_batch_resolves_temp_ids() {
    Scenario::new("batch_temp_ids")
        .create_plan("p1")
        .batch(
            "p1",
            vec![
                create(EntityType::Requirement, "$req", "Audit log"),
                BatchOperation::Create {
                    entity_type: EntityType::Solution,
                    temp_id: Some("$sol".into()),
                    data: json!({ "title": "Append-only table", "addressing": ["$req"] }),
                },
                BatchOperation::CreateLink {
                    source_id: "$sol".into(),
                    target_id: "$req".into(),
                    relation_type: "implements".into(),
                    metadata: Default::default(),
                },
            ],
        )
        .assert_entity_count("p1", EntityType::Requirement, 1)
        .assert_entity_count("p1", EntityType::Solution, 1)
        .assert_link_count("p1", 1)
        .assert(Assertion::Custom(Box::new(
            |store: &PlanStore, aliases: &Aliases| -> anyhow::Result<()> {
                let sol = store.get_entity("p1", EntityType::Solution, &aliases["sol"])?;
                anyhow::ensure!(
                    sol.field("addressing") == Some(json!([aliases["req"].clone()])),
                    "temp id not resolved inside data: {:?}",
                    sol.field("addressing")
                );
                Ok(())
            },
        )))
        .assert_verify_clean()
        .run()
        .unwrap();
}

#[test]
fn test_failed_batch_rolls_back_everything() {
    Scenario::new("batch_rollback")
        .create_plan("p1")
        .create_entity("p1", EntityType::Requirement, "keep", "Original")
        .batch(
            "p1",
            vec![
                BatchOperation::Update {
                    entity_type: EntityType::Requirement,
                    id: "@keep".into(),
                    data: json!({ "title": "Changed" }),
                    expected_version: Some(1),
                },
                create(EntityType::Requirement, "$new", "Should vanish"),
                create(EntityType::Phase, "$phase", "Should vanish too"),
                BatchOperation::Update {
                    entity_type: EntityType::Requirement,
                    id: "does-not-exist".into(),
                    data: json!({ "title": "x" }),
                    expected_version: None,
                },
            ],
        )
        .fails_with("BULK_OPERATION_FAILED")
        .assert_version("p1", EntityType::Requirement, "keep", 1)
        .assert_field("p1", EntityType::Requirement, "keep", "title", "Original")
        .assert_entity_count("p1", EntityType::Requirement, 1)
        .assert_entity_count("p1", EntityType::Phase, 0)
        .assert_history("p1", EntityType::Requirement, "keep", &[])
        .assert(Assertion::StatisticsCount {
            plan: "p1".into(),
            entity_type: EntityType::Requirement,
            count: 1,
        })
        .assert_no_temp_files()
        .assert_verify_clean()
        .run()
        .unwrap();
}

#[test]
fn test_batch_version_conflict_rolls_back() {
    Scenario::new("batch_version_conflict")
        .create_plan("p1")
        .create_entity("p1", EntityType::Decision, "d", "Pick a queue")
        .update_title("p1", EntityType::Decision, "d", "Pick Kafka")
        .batch(
            "p1",
            vec![
                create(EntityType::Artifact, "$adr", "ADR-7"),
                BatchOperation::Update {
                    entity_type: EntityType::Decision,
                    id: "@d".into(),
                    data: json!({ "title": "Pick NATS" }),
                    expected_version: Some(1),
                },
            ],
        )
        .fails_with("BULK_OPERATION_FAILED")
        .assert_field("p1", EntityType::Decision, "d", "title", "Pick Kafka")
        .assert_entity_count("p1", EntityType::Artifact, 0)
        .run()
        .unwrap();
}

#[test]
fn test_malformed_temp_id_applies_nothing() {
    Scenario::new("batch_bad_temp_id")
        .create_plan("p1")
        .batch(
            "p1",
            vec![
                create(EntityType::Requirement, "$ok", "Fine"),
                create(EntityType::Requirement, "no-dollar", "Bad"),
            ],
        )
        .fails_with("VALIDATION_ERROR")
        .assert_entity_count("p1", EntityType::Requirement, 0)
        .run()
        .unwrap();
}

#[test]
fn test_batch_delete_cascades() {
    Scenario::new("batch_delete")
        .create_plan("p1")
        .create_entity("p1", EntityType::Requirement, "r", "Old requirement")
        .create_entity("p1", EntityType::Solution, "s", "Old solution")
        .link("p1", "s", "r", "implements")
        .batch(
            "p1",
            vec![BatchOperation::Delete {
                entity_type: EntityType::Requirement,
                id: "@r".into(),
            }],
        )
        .assert_entity_count("p1", EntityType::Requirement, 0)
        .assert_link_count("p1", 0)
        .assert_verify_clean()
        .run()
        .unwrap();
}
