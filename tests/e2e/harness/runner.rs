use super::assertions::{Aliases, Assertion};
use super::steps::ScenarioStep;
use super::workspace::TestWorkspace;
use anyhow::{anyhow, bail, Context, Result};
use planstore_core::{
    BatchOperation, EntityPatch, EntityType, HistoryQuery, ListQuery, NewEntity, NewLink,
    NewPlan, PlanStore, StoreConfig, StoreError,
};
use serde_json::Value;
use std::thread;

/// Executes scenarios against a real store on a temp root
pub struct ScenarioRunner {
    workspace: TestWorkspace,
    store: Option<PlanStore>,
    aliases: Aliases,
    project: Option<String>,
    current_step: usize,
}

impl ScenarioRunner {
    /// Create a runner, writing `config` to planstore.toml first if given
    pub fn new(config: Option<&StoreConfig>) -> Result<Self> {
        let workspace = match config {
            Some(config) => TestWorkspace::with_config(config)?,
            None => TestWorkspace::empty()?,
        };
        let store = workspace.open_store()?;

        Ok(Self {
            workspace,
            store: Some(store),
            aliases: Aliases::new(),
            project: None,
            current_step: 0,
        })
    }

    /// Get current step number
    pub fn current_step(&self) -> usize {
        self.current_step
    }

    /// Execute all steps in sequence
    pub fn execute(&mut self, steps: &[ScenarioStep]) -> Result<()> {
        for (i, step) in steps.iter().enumerate() {
            self.current_step = i;
            self.execute_step(step)
                .with_context(|| format!("Step {}: {:?}", i, step))?;
        }
        Ok(())
    }

    fn store(&self) -> Result<&PlanStore> {
        self.store
            .as_ref()
            .ok_or_else(|| anyhow!("Store not available (crashed?)"))
    }

    fn id(&self, alias: &str) -> Result<String> {
        self.aliases
            .get(alias)
            .cloned()
            .ok_or_else(|| anyhow!("Unknown entity alias '{}'", alias))
    }

    /// Runs `f` routed to the current project, if any
    fn scoped<T>(&self, f: impl FnOnce(&PlanStore) -> Result<T>) -> Result<T> {
        let store = self.store()?;
        match &self.project {
            Some(project) => store.run_with_context(project, || f(store))?,
            None => f(store),
        }
    }

    /// Execute a single step
    fn execute_step(&mut self, step: &ScenarioStep) -> Result<()> {
        match step {
            ScenarioStep::CreatePlan {
                plan,
                enable_history,
                max_history_depth,
            } => {
                let input = NewPlan {
                    id: Some(plan.clone()),
                    name: plan.clone(),
                    description: None,
                    enable_history: *enable_history,
                    max_history_depth: *max_history_depth,
                };
                self.scoped(|s| Ok(s.create_plan(input)?))?;
                Ok(())
            }
            ScenarioStep::DeletePlan { plan } => {
                self.scoped(|s| Ok(s.delete_plan(plan)?))?;
                Ok(())
            }

            ScenarioStep::CreateEntity {
                plan,
                entity_type,
                alias,
                input,
            } => {
                let entity = self.scoped(|s| Ok(s.create_entity(plan, *entity_type, input.clone())?))?;
                self.aliases.insert(alias.clone(), entity.id);
                Ok(())
            }
            ScenarioStep::UpdateEntity {
                plan,
                entity_type,
                alias,
                patch,
                expected_version,
            } => {
                let id = self.id(alias)?;
                self.scoped(|s| {
                    Ok(s.update_entity(plan, *entity_type, &id, patch.clone(), *expected_version)?)
                })?;
                Ok(())
            }
            ScenarioStep::DeleteEntity {
                plan,
                entity_type,
                alias,
            } => {
                let id = self.id(alias)?;
                self.scoped(|s| Ok(s.delete_entity(plan, *entity_type, &id)?))?;
                Ok(())
            }

            ScenarioStep::CreateLink {
                plan,
                source,
                target,
                relation,
            } => {
                let input = NewLink {
                    source_id: self.id(source)?,
                    target_id: self.id(target)?,
                    relation_type: relation.clone(),
                    ..NewLink::default()
                };
                self.scoped(|s| Ok(s.create_link(plan, input)?))?;
                Ok(())
            }

            ScenarioStep::Batch { plan, operations } => {
                let operations = operations
                    .iter()
                    .map(|op| self.resolve_aliases(op))
                    .collect::<Result<Vec<_>>>()?;
                let result = self.scoped(|s| Ok(s.execute_batch(plan, operations)?))?;
                for (temp_id, id) in result.temp_ids {
                    self.aliases
                        .insert(temp_id.trim_start_matches('$').to_string(), id);
                }
                Ok(())
            }

            ScenarioStep::ConcurrentUpdates {
                plan,
                entity_type,
                alias,
                writers,
            } => self.handle_concurrent_updates(plan, *entity_type, alias, *writers),
            ScenarioStep::ConcurrentProjects {
                projects,
                plan,
                entities_each,
            } => self.handle_concurrent_projects(projects, plan, *entities_each),

            ScenarioStep::EnterProject { project } => {
                self.project = Some(project.clone());
                Ok(())
            }
            ScenarioStep::LeaveProject => {
                self.project = None;
                Ok(())
            }

            ScenarioStep::WriteRaw { path, content } => self.workspace.write_file(path, content),
            ScenarioStep::Crash => {
                // dropped without close(), like a killed process
                self.store.take();
                Ok(())
            }
            ScenarioStep::Restart => {
                if self.store.is_some() {
                    bail!("Restart without a preceding crash");
                }
                self.store = Some(self.workspace.open_store()?);
                Ok(())
            }

            ScenarioStep::RebuildIndexes { plan } => {
                self.scoped(|s| Ok(s.rebuild_indexes(plan)?))?;
                Ok(())
            }

            ScenarioStep::ExpectError { step, code } => match self.execute_step(step) {
                Ok(()) => bail!("Expected error {}, but the step succeeded", code),
                Err(e) => {
                    let actual = e
                        .chain()
                        .find_map(|cause| cause.downcast_ref::<StoreError>())
                        .map(StoreError::code);
                    if actual != Some(code.as_str()) {
                        bail!("Expected error {}, got {:?}: {:#}", code, actual, e);
                    }
                    Ok(())
                }
            },

            ScenarioStep::Assert { assertion } => self.handle_assertion(assertion),
        }
    }

    /// Replaces `@alias` strings inside an operation with entity ids
    fn resolve_aliases(&self, op: &BatchOperation) -> Result<BatchOperation> {
        fn walk(value: &mut Value, aliases: &Aliases) -> Result<()> {
            match value {
                Value::String(s) => {
                    if let Some(alias) = s.strip_prefix('@') {
                        let id = aliases
                            .get(alias)
                            .ok_or_else(|| anyhow!("Unknown entity alias '{}'", alias))?;
                        *s = id.clone();
                    }
                }
                Value::Array(items) => {
                    for item in items {
                        walk(item, aliases)?;
                    }
                }
                Value::Object(map) => {
                    for item in map.values_mut() {
                        walk(item, aliases)?;
                    }
                }
                _ => {}
            }
            Ok(())
        }

        let mut value = serde_json::to_value(op)?;
        walk(&mut value, &self.aliases)?;
        Ok(serde_json::from_value(value)?)
    }

    // ===== Concurrency handlers =====

    fn handle_concurrent_updates(
        &self,
        plan: &str,
        entity_type: EntityType,
        alias: &str,
        writers: usize,
    ) -> Result<()> {
        let id = self.id(alias)?;
        let store = self.store()?;
        let project = self.project.as_deref();

        let outcomes: Vec<Result<u64>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..writers)
                .map(|n| {
                    let id = id.as_str();
                    scope.spawn(move || -> Result<u64> {
                        let update = || {
                            let patch = EntityPatch::default().with_field("writer", n as u64);
                            store.update_entity(plan, entity_type, id, patch, None)
                        };
                        let entity = match project {
                            Some(project) => store.run_with_context(project, update)??,
                            None => update()?,
                        };
                        Ok(entity.version)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().map_err(|_| anyhow!("writer thread panicked")).and_then(|r| r))
                .collect()
        });

        let mut versions = outcomes.into_iter().collect::<Result<Vec<_>>>()?;
        versions.sort_unstable();
        versions.dedup();
        if versions.len() != writers {
            bail!("Concurrent writers observed duplicate versions: {:?}", versions);
        }
        Ok(())
    }

    fn handle_concurrent_projects(&self, projects: &[String], plan: &str, entities_each: usize) -> Result<()> {
        let store = self.store()?;

        thread::scope(|scope| {
            let handles: Vec<_> = projects
                .iter()
                .map(|project| {
                    scope.spawn(move || -> Result<()> {
                        store.run_with_context(project, || -> Result<()> {
                            store.create_plan(NewPlan {
                                id: Some(plan.to_string()),
                                name: project.clone(),
                                ..NewPlan::default()
                            })?;
                            for i in 0..entities_each {
                                store.create_entity(
                                    plan,
                                    EntityType::Requirement,
                                    NewEntity::titled(format!("{} #{}", project, i)),
                                )?;
                            }
                            Ok(())
                        })?
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().map_err(|_| anyhow!("project thread panicked")).and_then(|r| r))
                .collect::<Result<()>>()
        })
    }

    // ===== Assertion handlers =====

    fn handle_assertion(&self, assertion: &Assertion) -> Result<()> {
        match assertion {
            Assertion::PlanExists(plan) => {
                self.scoped(|s| Ok(s.get_plan(plan)?))?;
                Ok(())
            }
            Assertion::PlanMissing(plan) => self.scoped(|s| match s.get_plan(plan) {
                Ok(_) => bail!("Plan '{}' unexpectedly exists", plan),
                Err(e) if e.code() == "NOT_FOUND" => Ok(()),
                Err(e) => Err(e.into()),
            }),
            Assertion::StatisticsCount {
                plan,
                entity_type,
                count,
            } => {
                let actual = self.scoped(|s| Ok(s.get_plan(plan)?.statistics.count(*entity_type)))?;
                if actual != *count {
                    bail!("Expected {} {} in statistics, found {}", count, entity_type, actual);
                }
                Ok(())
            }

            Assertion::EntityVersion {
                plan,
                entity_type,
                alias,
                version,
            } => {
                let id = self.id(alias)?;
                let entity = self.scoped(|s| Ok(s.get_entity(plan, *entity_type, &id)?))?;
                if entity.version != *version {
                    bail!("Expected '{}' at version {}, found {}", alias, version, entity.version);
                }
                Ok(())
            }
            Assertion::EntityField {
                plan,
                entity_type,
                alias,
                field,
                value,
            } => {
                let id = self.id(alias)?;
                let entity = self.scoped(|s| Ok(s.get_entity(plan, *entity_type, &id)?))?;
                let actual = entity.to_value()?.get(field).cloned().unwrap_or(Value::Null);
                if actual != *value {
                    bail!("Expected '{}'.{} = {}, found {}", alias, field, value, actual);
                }
                Ok(())
            }
            Assertion::EntityMissing {
                plan,
                entity_type,
                alias,
            } => {
                let id = self.id(alias)?;
                self.scoped(|s| match s.get_entity(plan, *entity_type, &id) {
                    Ok(_) => bail!("Entity '{}' unexpectedly exists", alias),
                    Err(e) if e.code() == "NOT_FOUND" => Ok(()),
                    Err(e) => Err(e.into()),
                })
            }
            Assertion::EntityCount {
                plan,
                entity_type,
                count,
            } => {
                let page = self.scoped(|s| Ok(s.list_entities(plan, *entity_type, &ListQuery::default())?))?;
                if page.total != *count {
                    bail!("Expected {} {} entities, found {}", count, entity_type, page.total);
                }
                Ok(())
            }

            Assertion::LinkCount { plan, count } => {
                let links = self.scoped(|s| Ok(s.list_links(plan)?))?;
                if links.len() != *count {
                    bail!("Expected {} links, found {}", count, links.len());
                }
                Ok(())
            }

            Assertion::HistoryVersions {
                plan,
                entity_type,
                alias,
                versions,
            } => {
                let id = self.id(alias)?;
                let history = self.scoped(|s| {
                    Ok(s.get_history(plan, *entity_type, &id, HistoryQuery::default())?)
                })?;
                let actual: Vec<u64> = history.versions.iter().map(|v| v.version).collect();
                if actual != *versions {
                    bail!("Expected history {:?}, found {:?}", versions, actual);
                }
                Ok(())
            }
            Assertion::DiffChanges {
                plan,
                entity_type,
                alias,
                from,
                to,
                fields,
            } => {
                let id = self.id(alias)?;
                let diff = self.scoped(|s| Ok(s.diff(plan, *entity_type, &id, *from, *to)?))?;
                let actual: Vec<&String> = diff.changes.keys().collect();
                let mut expected: Vec<&String> = fields.iter().collect();
                expected.sort();
                if actual != expected {
                    bail!("Expected changed fields {:?}, found {:?}", expected, actual);
                }
                Ok(())
            }

            Assertion::VerifyClean => {
                let report = self.scoped(|s| Ok(s.verify(None)?))?;
                if report.has_issues() {
                    bail!("{}: {:?}", report.summary(), report);
                }
                Ok(())
            }
            Assertion::VerifyHasIssues => {
                let report = self.scoped(|s| Ok(s.verify(None)?))?;
                if !report.has_issues() {
                    bail!("Expected verification issues, storage is clean");
                }
                Ok(())
            }
            Assertion::NoTempFiles => {
                let temps = self.workspace.temp_files()?;
                if !temps.is_empty() {
                    bail!("Found stray temp files: {:?}", temps);
                }
                Ok(())
            }
            Assertion::FileExists(path) => {
                if !self.workspace.file_exists(path) {
                    bail!("Expected file '{}' to exist", path);
                }
                Ok(())
            }
            Assertion::FileMissing(path) => {
                if self.workspace.file_exists(path) {
                    bail!("Expected file '{}' to be absent", path);
                }
                Ok(())
            }

            Assertion::Custom(check) => self.scoped(|s| check(s, &self.aliases)),
        }
    }
}
