use super::assertions::Assertion;
use super::runner::ScenarioRunner;
use super::steps::ScenarioStep;
use planstore_core::{BatchOperation, EntityPatch, EntityType, NewEntity, StoreConfig};
use serde_json::Value;

/// Fluent DSL for building test scenarios
pub struct Scenario {
    name: String,
    config: Option<StoreConfig>,
    steps: Vec<ScenarioStep>,
}

impl Scenario {
    /// Create a new scenario with the given name
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            config: None,
            steps: Vec::new(),
        }
    }

    // ===== Initial setup =====

    /// Write a planstore.toml before the store is opened
    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = Some(config);
        self
    }

    fn push(mut self, step: ScenarioStep) -> Self {
        self.steps.push(step);
        self
    }

    // ===== Plans =====

    /// Create a plan with configured history defaults
    pub fn create_plan(self, plan: &str) -> Self {
        self.push(ScenarioStep::CreatePlan {
            plan: plan.to_string(),
            enable_history: None,
            max_history_depth: None,
        })
    }

    /// Create a plan with explicit history settings
    pub fn create_plan_with_history(self, plan: &str, enabled: bool, max_depth: u32) -> Self {
        self.push(ScenarioStep::CreatePlan {
            plan: plan.to_string(),
            enable_history: Some(enabled),
            max_history_depth: Some(max_depth),
        })
    }

    pub fn delete_plan(self, plan: &str) -> Self {
        self.push(ScenarioStep::DeletePlan {
            plan: plan.to_string(),
        })
    }

    // ===== Entities =====

    /// Create an entity with just a title
    pub fn create_entity(self, plan: &str, entity_type: EntityType, alias: &str, title: &str) -> Self {
        self.create_entity_with(plan, entity_type, alias, NewEntity::titled(title))
    }

    pub fn create_entity_with(
        self,
        plan: &str,
        entity_type: EntityType,
        alias: &str,
        input: NewEntity,
    ) -> Self {
        self.push(ScenarioStep::CreateEntity {
            plan: plan.to_string(),
            entity_type,
            alias: alias.to_string(),
            input,
        })
    }

    /// Change an entity's title without a version check
    pub fn update_title(self, plan: &str, entity_type: EntityType, alias: &str, title: &str) -> Self {
        let patch = EntityPatch {
            title: Some(title.to_string()),
            ..EntityPatch::default()
        };
        self.update_entity(plan, entity_type, alias, patch, None)
    }

    pub fn update_entity(
        self,
        plan: &str,
        entity_type: EntityType,
        alias: &str,
        patch: EntityPatch,
        expected_version: Option<u64>,
    ) -> Self {
        self.push(ScenarioStep::UpdateEntity {
            plan: plan.to_string(),
            entity_type,
            alias: alias.to_string(),
            patch,
            expected_version,
        })
    }

    pub fn delete_entity(self, plan: &str, entity_type: EntityType, alias: &str) -> Self {
        self.push(ScenarioStep::DeleteEntity {
            plan: plan.to_string(),
            entity_type,
            alias: alias.to_string(),
        })
    }

    // ===== Links and batches =====

    pub fn link(self, plan: &str, source: &str, target: &str, relation: &str) -> Self {
        self.push(ScenarioStep::CreateLink {
            plan: plan.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            relation: relation.to_string(),
        })
    }

    /// Run a batch; temp ids become aliases (without the `$`) on success
    pub fn batch(self, plan: &str, operations: Vec<BatchOperation>) -> Self {
        self.push(ScenarioStep::Batch {
            plan: plan.to_string(),
            operations,
        })
    }

    // ===== Concurrency =====

    /// `writers` threads update the same entity at once
    pub fn concurrent_updates(self, plan: &str, entity_type: EntityType, alias: &str, writers: usize) -> Self {
        self.push(ScenarioStep::ConcurrentUpdates {
            plan: plan.to_string(),
            entity_type,
            alias: alias.to_string(),
            writers,
        })
    }

    /// One thread per project creates `plan` and fills it
    pub fn concurrent_projects(self, projects: &[&str], plan: &str, entities_each: usize) -> Self {
        self.push(ScenarioStep::ConcurrentProjects {
            projects: projects.iter().map(|p| p.to_string()).collect(),
            plan: plan.to_string(),
            entities_each,
        })
    }

    // ===== Project routing =====

    /// Route following steps to `project`
    pub fn in_project(self, project: &str) -> Self {
        self.push(ScenarioStep::EnterProject {
            project: project.to_string(),
        })
    }

    pub fn leave_project(self) -> Self {
        self.push(ScenarioStep::LeaveProject)
    }

    // ===== Failure simulation =====

    /// Overwrite a file under the root with raw bytes
    pub fn write_raw(self, path: &str, content: &[u8]) -> Self {
        self.push(ScenarioStep::WriteRaw {
            path: path.to_string(),
            content: content.to_vec(),
        })
    }

    /// Drop the store without closing it
    pub fn crash(self) -> Self {
        self.push(ScenarioStep::Crash)
    }

    /// Reopen the store from disk
    pub fn restart(self) -> Self {
        self.push(ScenarioStep::Restart)
    }

    pub fn rebuild(self, plan: &str) -> Self {
        self.push(ScenarioStep::RebuildIndexes {
            plan: plan.to_string(),
        })
    }

    /// Require the previous step to fail with `code`
    pub fn fails_with(mut self, code: &str) -> Self {
        if let Some(step) = self.steps.pop() {
            self.steps.push(ScenarioStep::ExpectError {
                step: Box::new(step),
                code: code.to_string(),
            });
        }
        self
    }

    // ===== Assertions =====

    /// Add a general assertion
    pub fn assert(self, assertion: Assertion) -> Self {
        self.push(ScenarioStep::Assert { assertion })
    }

    pub fn assert_version(self, plan: &str, entity_type: EntityType, alias: &str, version: u64) -> Self {
        self.assert(Assertion::EntityVersion {
            plan: plan.to_string(),
            entity_type,
            alias: alias.to_string(),
            version,
        })
    }

    pub fn assert_field(
        self,
        plan: &str,
        entity_type: EntityType,
        alias: &str,
        field: &str,
        value: impl Into<Value>,
    ) -> Self {
        self.assert(Assertion::EntityField {
            plan: plan.to_string(),
            entity_type,
            alias: alias.to_string(),
            field: field.to_string(),
            value: value.into(),
        })
    }

    pub fn assert_entity_count(self, plan: &str, entity_type: EntityType, count: usize) -> Self {
        self.assert(Assertion::EntityCount {
            plan: plan.to_string(),
            entity_type,
            count,
        })
    }

    /// Assert stored snapshot versions, newest first
    pub fn assert_history(self, plan: &str, entity_type: EntityType, alias: &str, versions: &[u64]) -> Self {
        self.assert(Assertion::HistoryVersions {
            plan: plan.to_string(),
            entity_type,
            alias: alias.to_string(),
            versions: versions.to_vec(),
        })
    }

    pub fn assert_link_count(self, plan: &str, count: usize) -> Self {
        self.assert(Assertion::LinkCount {
            plan: plan.to_string(),
            count,
        })
    }

    pub fn assert_verify_clean(self) -> Self {
        self.assert(Assertion::VerifyClean)
    }

    pub fn assert_no_temp_files(self) -> Self {
        self.assert(Assertion::NoTempFiles)
    }

    // ===== Execution =====

    /// Execute the scenario and return results
    pub fn run(self) -> ScenarioResult {
        let mut runner = match ScenarioRunner::new(self.config.as_ref()) {
            Ok(r) => r,
            Err(e) => {
                return ScenarioResult {
                    name: self.name.clone(),
                    success: false,
                    steps_executed: 0,
                    failure_step: Some(0),
                    error: Some(format!("Failed to create runner: {}", e)),
                }
            }
        };

        match runner.execute(&self.steps) {
            Ok(()) => ScenarioResult {
                name: self.name,
                success: true,
                steps_executed: self.steps.len(),
                failure_step: None,
                error: None,
            },
            Err(e) => {
                let failure_step = runner.current_step();
                ScenarioResult {
                    name: self.name,
                    success: false,
                    steps_executed: failure_step,
                    failure_step: Some(failure_step),
                    error: Some(format!("{:?}", e)),
                }
            }
        }
    }
}

/// Result of running a scenario
#[derive(Debug)]
pub struct ScenarioResult {
    pub name: String,
    pub success: bool,
    pub steps_executed: usize,
    pub failure_step: Option<usize>,
    pub error: Option<String>,
}

impl ScenarioResult {
    /// Unwrap the result, panicking if it failed
    pub fn unwrap(self) {
        if !self.success {
            panic!(
                "Scenario '{}' failed at step {}: {}",
                self.name,
                self.failure_step.unwrap_or(0),
                self.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
    }

    /// Expect the result to be successful
    pub fn expect(self, msg: &str) {
        if !self.success {
            panic!(
                "{}: Scenario '{}' failed at step {}: {}",
                msg,
                self.name,
                self.failure_step.unwrap_or(0),
                self.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
    }
}
