use crate::harness::{Assertion, Scenario};
use planstore_core::EntityType;

#[test]
fn test_concurrent_writers_serialize() {
    Scenario::new("concurrent_writers")
        .create_plan("p1")
        .create_entity("p1", EntityType::Requirement, "hot", "Contended")
        .concurrent_updates("p1", EntityType::Requirement, "hot", 8)
        .assert_version("p1", EntityType::Requirement, "hot", 9)
        .assert_history("p1", EntityType::Requirement, "hot", &[8, 7, 6, 5, 4])
        .assert_no_temp_files()
        .assert_verify_clean()
        .run()
        .unwrap();
}

#[test]
fn test_concurrent_projects_stay_isolated() {
    Scenario::new("concurrent_projects")
        .concurrent_projects(&["alpha", "beta", "gamma"], "shared", 4)
        .in_project("alpha")
        .assert_entity_count("shared", EntityType::Requirement, 4)
        .assert(Assertion::StatisticsCount {
            plan: "shared".into(),
            entity_type: EntityType::Requirement,
            count: 4,
        })
        .in_project("gamma")
        .assert_entity_count("shared", EntityType::Requirement, 4)
        .leave_project()
        .assert(Assertion::PlanMissing("shared".into()))
        .assert(Assertion::FileExists("beta/plans/shared/manifest.json".into()))
        .run()
        .unwrap();
}

#[test]
fn test_concurrent_writers_inside_project() {
    Scenario::new("concurrent_writers_in_project")
        .in_project("team-x")
        .create_plan("p1")
        .create_entity("p1", EntityType::Phase, "ph", "Rollout")
        .concurrent_updates("p1", EntityType::Phase, "ph", 4)
        .assert_version("p1", EntityType::Phase, "ph", 5)
        .run()
        .unwrap();
}
