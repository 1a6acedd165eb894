//! Integrity verification and index repair.
//!
//! Verification only reads. Repair ([`rebuild_indexes`]) is an explicit
//! operator action that regenerates index files from entity files.

use crate::atomic::{is_temp_file, read_json};
use crate::error::{Result, StoreError};
use crate::factory::RepositoryFactory;
use crate::index::IndexFile;
use crate::layout::{validate_id, ProjectLayout};
use crate::types::{Entity, EntityType, IndexEntry, LinksFile, PlanManifest, VersionHistory};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// An index entry whose version disagrees with its entity file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionMismatch {
    pub plan_id: String,
    pub entity_type: EntityType,
    pub id: String,
    pub index_version: u64,
    pub file_version: u64,
}

/// Report from storage verification.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyReport {
    /// Number of plans checked.
    pub plans_checked: usize,

    /// Number of entity files read.
    pub entities_checked: usize,

    /// Files that exist but do not parse.
    pub corrupt_files: Vec<PathBuf>,

    /// Index entries out of step with their entity file.
    pub version_mismatches: Vec<VersionMismatch>,

    /// Entity files with no index entry, as `plan/type/id`.
    pub missing_from_index: Vec<String>,

    /// Index entries with no entity file, as `plan/type/id`.
    pub orphan_index_entries: Vec<String>,

    /// History files holding more snapshots than the plan keeps.
    pub oversized_histories: Vec<PathBuf>,

    /// Links whose source or target no longer exists, as `plan/linkId`.
    pub dangling_links: Vec<String>,

    /// Temp files left behind by interrupted writes.
    pub stray_temp_files: Vec<PathBuf>,
}

impl VerifyReport {
    /// Returns true if any issues were found.
    pub fn has_issues(&self) -> bool {
        !self.corrupt_files.is_empty()
            || !self.version_mismatches.is_empty()
            || !self.missing_from_index.is_empty()
            || !self.orphan_index_entries.is_empty()
            || !self.oversized_histories.is_empty()
            || !self.dangling_links.is_empty()
            || !self.stray_temp_files.is_empty()
    }

    /// Returns a summary message.
    pub fn summary(&self) -> String {
        if !self.has_issues() {
            return format!(
                "Storage is healthy. Checked {} plans and {} entities.",
                self.plans_checked, self.entities_checked
            );
        }

        let counts = [
            (self.corrupt_files.len(), "corrupt files"),
            (self.version_mismatches.len(), "version mismatches"),
            (self.missing_from_index.len(), "unindexed entities"),
            (self.orphan_index_entries.len(), "orphan index entries"),
            (self.oversized_histories.len(), "oversized histories"),
            (self.dangling_links.len(), "dangling links"),
            (self.stray_temp_files.len(), "stray temp files"),
        ];
        let issues: Vec<String> = counts
            .iter()
            .filter(|(n, _)| *n > 0)
            .map(|(n, what)| format!("{n} {what}"))
            .collect();
        format!("Storage has issues: {}", issues.join(", "))
    }
}

/// Entity files of one type, split into readable and corrupt.
#[derive(Debug, Default)]
pub(crate) struct EntityScan {
    pub(crate) entities: Vec<Entity>,
    pub(crate) corrupt: Vec<PathBuf>,
}

pub(crate) fn scan_entities(dir: &Path) -> Result<EntityScan> {
    let mut scan = EntityScan::default();
    for path in json_files(dir)? {
        match read_json::<Entity>(&path) {
            Ok(Some(entity)) => scan.entities.push(entity),
            Ok(None) => {}
            Err(StoreError::Storage { .. }) => scan.corrupt.push(path),
            Err(e) => return Err(e),
        }
    }
    scan.entities.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(scan)
}

/// `*.json` files directly in `dir`, temp files excluded.
fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let read_dir = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::storage(dir, e.to_string())),
    };
    let mut files = Vec::new();
    for entry in read_dir {
        let path = entry.map_err(|e| StoreError::storage(dir, e.to_string()))?.path();
        if path.is_file() && !is_temp_file(&path) && path.extension().is_some_and(|x| x == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn collect_temp_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let read_dir = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(StoreError::storage(dir, e.to_string())),
    };
    for entry in read_dir {
        let path = entry.map_err(|e| StoreError::storage(dir, e.to_string()))?.path();
        if path.is_dir() {
            collect_temp_files(&path, out)?;
        } else if is_temp_file(&path) {
            out.push(path);
        }
    }
    Ok(())
}

/// Verifies one plan, or every plan of the layout's project.
pub fn verify(layout: &ProjectLayout, plan_id: Option<&str>) -> Result<VerifyReport> {
    let mut report = VerifyReport::default();

    let plan_ids: Vec<String> = match plan_id {
        Some(id) => {
            validate_id("planId", id)?;
            vec![id.to_string()]
        }
        None => {
            let mut ids = Vec::new();
            let plans_dir = layout.plans_dir();
            if plans_dir.is_dir() {
                for entry in fs::read_dir(&plans_dir).map_err(|e| StoreError::storage(&plans_dir, e.to_string()))? {
                    let path = entry.map_err(|e| StoreError::storage(&plans_dir, e.to_string()))?.path();
                    if path.is_dir() {
                        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                            ids.push(name.to_string());
                        }
                    }
                }
            }
            ids.sort();
            ids
        }
    };

    for plan in &plan_ids {
        check_plan(layout, plan, &mut report)?;
    }

    if report.has_issues() {
        warn!(summary = %report.summary(), "verification found issues");
    }
    Ok(report)
}

fn check_plan(layout: &ProjectLayout, plan_id: &str, report: &mut VerifyReport) -> Result<()> {
    let manifest_path = layout.manifest_path(plan_id);
    let manifest = match read_json::<PlanManifest>(&manifest_path) {
        Ok(Some(m)) => Some(m),
        Ok(None) => return Err(StoreError::not_found("plan", plan_id)),
        Err(StoreError::Storage { .. }) => {
            report.corrupt_files.push(manifest_path);
            None
        }
        Err(e) => return Err(e),
    };
    report.plans_checked += 1;

    let mut existing: HashMap<String, EntityType> = HashMap::new();
    for entity_type in EntityType::ALL {
        let scan = scan_entities(&layout.entity_dir(plan_id, entity_type))?;
        report.entities_checked += scan.entities.len();
        report.corrupt_files.extend(scan.corrupt.iter().cloned());
        for path in &scan.corrupt {
            // corrupt files still exist as far as links are concerned
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                existing.insert(stem.to_string(), entity_type);
            }
        }

        let index_path = layout.index_path(plan_id, entity_type);
        let indexed: BTreeMap<String, IndexEntry> = match IndexFile::load(&index_path) {
            Ok(Some(file)) => file.entries.into_iter().map(|e| (e.id.clone(), e)).collect(),
            Ok(None) => BTreeMap::new(),
            Err(StoreError::Storage { .. } | StoreError::Migration { .. }) => {
                report.corrupt_files.push(index_path);
                for entity in &scan.entities {
                    existing.insert(entity.id.clone(), entity_type);
                }
                continue;
            }
            Err(e) => return Err(e),
        };

        for entity in &scan.entities {
            existing.insert(entity.id.clone(), entity_type);
            match indexed.get(&entity.id) {
                None => report
                    .missing_from_index
                    .push(format!("{plan_id}/{entity_type}/{}", entity.id)),
                Some(entry) if entry.version != entity.version => {
                    report.version_mismatches.push(VersionMismatch {
                        plan_id: plan_id.to_string(),
                        entity_type,
                        id: entity.id.clone(),
                        index_version: entry.version,
                        file_version: entity.version,
                    })
                }
                Some(_) => {}
            }
        }
        for id in indexed.keys() {
            let on_disk = scan.entities.iter().any(|e| &e.id == id)
                || scan.corrupt.iter().any(|p| p.file_stem().is_some_and(|s| s == id.as_str()));
            if !on_disk {
                report
                    .orphan_index_entries
                    .push(format!("{plan_id}/{entity_type}/{id}"));
            }
        }

        if let Some(manifest) = &manifest {
            let depth = manifest.max_history_depth as usize;
            for path in json_files(&layout.history_dir(plan_id, entity_type))? {
                match read_json::<VersionHistory>(&path) {
                    Ok(Some(history)) if depth > 0 && history.versions.len() > depth => {
                        report.oversized_histories.push(path)
                    }
                    Ok(_) => {}
                    Err(StoreError::Storage { .. }) => report.corrupt_files.push(path),
                    Err(e) => return Err(e),
                }
            }
        }
    }

    let links_path = layout.links_path(plan_id);
    match read_json::<LinksFile>(&links_path) {
        Ok(Some(file)) => {
            for link in file.links {
                if !existing.contains_key(&link.source_id) || !existing.contains_key(&link.target_id) {
                    report.dangling_links.push(format!("{plan_id}/{}", link.id));
                }
            }
        }
        Ok(None) => {}
        Err(StoreError::Storage { .. }) => report.corrupt_files.push(links_path),
        Err(e) => return Err(e),
    }

    collect_temp_files(&layout.plan_dir(plan_id), &mut report.stray_temp_files)?;
    Ok(())
}

/// Report from an index rebuild.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildReport {
    pub plan_id: String,
    /// Entries written per entity type.
    pub indexed: BTreeMap<EntityType, usize>,
    /// Entity files skipped because they do not parse.
    pub skipped_corrupt: Vec<PathBuf>,
}

/// Regenerates every index of `plan_id` from its entity files.
///
/// Corrupt entity files are skipped and reported.
pub fn rebuild_indexes(factory: &RepositoryFactory, plan_id: &str) -> Result<RebuildReport> {
    validate_id("planId", plan_id)?;
    let layout = factory.layout()?;
    if !layout.manifest_path(plan_id).exists() {
        return Err(StoreError::not_found("plan", plan_id));
    }
    let _plan = factory
        .lock_manager()
        .acquire(&layout.plan_key(plan_id), factory.lock_timeout())?;

    let mut report = RebuildReport {
        plan_id: plan_id.to_string(),
        ..RebuildReport::default()
    };
    for entity_type in EntityType::ALL {
        let scan = scan_entities(&layout.entity_dir(plan_id, entity_type))?;
        for path in &scan.corrupt {
            warn!(path = %path.display(), "skipping corrupt entity file during rebuild");
        }
        let entries: Vec<IndexEntry> = scan.entities.iter().map(IndexEntry::from_entity).collect();
        report.indexed.insert(entity_type, entries.len());
        factory
            .index_unloaded(plan_id, entity_type)?
            .save_index(entries)?;
        report.skipped_corrupt.extend(scan.corrupt);
    }

    info!(plan = plan_id, indexed = ?report.indexed, "indexes rebuilt");
    Ok(report)
}
