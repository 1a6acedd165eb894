use crate::harness::assertions::Aliases;
use crate::harness::{Assertion, Scenario};
use planstore_core::{EntityPatch, EntityType, NewEntity, PlanStore};

#[test]
fn test_plan_with_entities_and_links() {
    Scenario::new("plan_with_entities_and_links")
        .create_plan("launch")
        .create_entity("launch", EntityType::Requirement, "login", "Users can sign in")
        .create_entity("launch", EntityType::Solution, "oauth", "OAuth via provider")
        .create_entity("launch", EntityType::Decision, "provider", "Pick identity provider")
        .link("launch", "oauth", "login", "implements")
        .link("launch", "provider", "oauth", "affects")
        .assert(Assertion::PlanExists("launch".into()))
        .assert_entity_count("launch", EntityType::Requirement, 1)
        .assert(Assertion::StatisticsCount {
            plan: "launch".into(),
            entity_type: EntityType::Solution,
            count: 1,
        })
        .assert_link_count("launch", 2)
        .assert_field("launch", EntityType::Requirement, "login", "status", "draft")
        .assert_field("launch", EntityType::Decision, "provider", "status", "active")
        .assert_verify_clean()
        .assert_no_temp_files()
        .run()
        .expect("scenario should pass");
}

#[test]
fn test_optimistic_update_conflict() {
    Scenario::new("optimistic_update_conflict")
        .create_plan("p1")
        .create_entity("p1", EntityType::Phase, "mvp", "MVP")
        .update_entity(
            "p1",
            EntityType::Phase,
            "mvp",
            EntityPatch::default().with_field("status", "in_progress"),
            Some(1),
        )
        .update_entity("p1", EntityType::Phase, "mvp", EntityPatch::default(), Some(1))
        .fails_with("CONFLICT_VERSION_MISMATCH")
        .assert_version("p1", EntityType::Phase, "mvp", 2)
        .assert_field("p1", EntityType::Phase, "mvp", "status", "in_progress")
        .run()
        .unwrap();
}

#[test]
fn test_delete_cascades_links_and_statistics() {
    Scenario::new("delete_cascades")
        .create_plan("p1")
        .create_entity("p1", EntityType::Requirement, "req", "Export")
        .create_entity("p1", EntityType::Artifact, "doc", "Export spec")
        .link("p1", "doc", "req", "documents")
        .delete_entity("p1", EntityType::Requirement, "req")
        .assert(Assertion::EntityMissing {
            plan: "p1".into(),
            entity_type: EntityType::Requirement,
            alias: "req".into(),
        })
        .assert_link_count("p1", 0)
        .assert(Assertion::StatisticsCount {
            plan: "p1".into(),
            entity_type: EntityType::Requirement,
            count: 0,
        })
        .assert_verify_clean()
        .run()
        .unwrap();
}

#[test]
fn test_validation_and_duplicates() {
    Scenario::new("validation_and_duplicates")
        .create_plan("p1")
        .create_plan("p1")
        .fails_with("CONFLICT_DUPLICATE")
        .create_entity("p1", EntityType::Requirement, "blank", "  ")
        .fails_with("VALIDATION_ERROR")
        .create_entity_with(
            "p1",
            EntityType::Requirement,
            "sneaky",
            NewEntity::titled("x").with_field("version", 99),
        )
        .fails_with("VALIDATION_ERROR")
        .create_entity("missing", EntityType::Requirement, "orphan", "Nowhere")
        .fails_with("NOT_FOUND")
        .assert_entity_count("p1", EntityType::Requirement, 0)
        .run()
        .unwrap();
}

#[test]
fn test_filtered_listing() {
    Scenario::new("filtered_listing")
        .create_plan("p1")
        .create_entity_with(
            "p1",
            EntityType::Requirement,
            "a",
            NewEntity::titled("A").with_field("priority", "high"),
        )
        .create_entity_with(
            "p1",
            EntityType::Requirement,
            "b",
            NewEntity::titled("B").with_field("priority", "low"),
        )
        .create_entity_with(
            "p1",
            EntityType::Requirement,
            "c",
            NewEntity::titled("C").with_field("priority", "high"),
        )
        .assert(Assertion::Custom(Box::new(|store: &PlanStore, aliases: &Aliases| -> anyhow::Result<()> {
            let mut query = planstore_core::ListQuery {
                limit: Some(1),
                ..Default::default()
            };
            query.filters.insert("priority".into(), "high".into());
            let page = store.list_entities("p1", EntityType::Requirement, &query)?;
            anyhow::ensure!(page.total == 2, "expected 2 high-priority, got {}", page.total);
            anyhow::ensure!(page.has_more, "expected another page");
            let first = &page.items[0].id;
            anyhow::ensure!(first == &aliases["a"] || first == &aliases["c"], "unexpected {first}");

            query.filters.insert("nope".into(), "x".into());
            let err = store
                .list_entities("p1", EntityType::Requirement, &query)
                .unwrap_err();
            anyhow::ensure!(err.code() == "QUERY_FILTER", "got {}", err.code());
            Ok(())
        })))
        .run()
        .unwrap();
}

#[test]
fn test_delete_plan() {
    Scenario::new("delete_plan")
        .create_plan("p1")
        .create_entity("p1", EntityType::Phase, "one", "One")
        .delete_plan("p1")
        .assert(Assertion::PlanMissing("p1".into()))
        .assert(Assertion::FileMissing("plans/p1/manifest.json".into()))
        .create_plan("p1")
        .assert_entity_count("p1", EntityType::Phase, 0)
        .run()
        .unwrap();
}
