//! Schema Reconciliation Engine (C7): diffs declared constraints against a
//! live catalog, applies what's missing, optionally drops what's obsolete.

pub mod constraint;
pub mod dialect;

pub use constraint::{Constraint, ConstraintDescriptor, ConstraintKind, ReferentialAction};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::config::Dialect;
use crate::error::{DbError, DbErrorKind, ErrorSlot};
use crate::executer::QueryExecuter;
use crate::manager::ConnectionManager;

use dialect::{emit_add_ddl, emit_drop_ddl, fetch_catalog_snapshot, synthesize_name};

/// One declared constraint's reconciliation outcome.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AppliedConstraint {
    pub kind: ConstraintKind,
    pub applied: bool,
    pub descriptor: ConstraintDescriptor,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ReconciliationSummary {
    pub table_name: String,
    pub total_constraints: usize,
    pub constraint_types: BTreeMap<String, usize>,
    pub has_errors: bool,
    pub error: Option<DbError>,
}

/// Reconciles `declared` against `table`'s live catalog via `manager`.
pub struct SchemaReconciler {
    manager: Arc<dyn ConnectionManager>,
    dialect: Dialect,
    table: String,
    declared: Vec<ConstraintDescriptor>,
    remove_obsolete: bool,
    applied: Vec<AppliedConstraint>,
    error: ErrorSlot,
}

impl SchemaReconciler {
    /// Non-descriptor entries are filtered out silently per §4.7 step 1;
    /// with `declared: &[Constraint]` that case cannot occur in practice —
    /// every `Constraint` always yields a descriptor — so this constructor
    /// never actually drops anything, unlike the dynamically-typed source.
    pub fn new(
        manager: Arc<dyn ConnectionManager>,
        table: impl Into<String>,
        declared: &[Constraint],
        remove_obsolete: bool,
    ) -> Self {
        let dialect = manager.stats().config.dialect;
        Self {
            manager,
            dialect,
            table: table.into(),
            declared: declared.iter().map(Constraint::to_descriptor).collect(),
            remove_obsolete,
            applied: Vec::new(),
            error: ErrorSlot::new(),
        }
    }

    pub async fn reconcile(&mut self) -> bool {
        self.applied.clear();
        self.error.clear();

        let snapshot = fetch_catalog_snapshot(self.manager.clone(), self.dialect, &self.table).await;
        let mut declared_names: BTreeSet<String> = BTreeSet::new();

        for descriptor in self.declared.clone() {
            let name = synthesize_name(&self.table, &descriptor);
            declared_names.insert(name.clone());

            if matches!(
                descriptor.kind,
                ConstraintKind::Primary | ConstraintKind::AutoIncrement
            ) {
                self.applied.push(AppliedConstraint {
                    kind: descriptor.kind,
                    applied: true,
                    descriptor,
                });
                continue;
            }

            if snapshot.has_name(&name) {
                self.applied.push(AppliedConstraint {
                    kind: descriptor.kind,
                    applied: true,
                    descriptor,
                });
                continue;
            }

            let ddl = emit_add_ddl(&self.table, &name, &descriptor, self.dialect);
            let mut executer = QueryExecuter::new(self.manager.clone(), None);
            executer.prepare(&ddl).await;
            if !executer.execute().await {
                let message = executer.last_error().map(|e| e.message).unwrap_or_default();
                self.error.set(DbError::new(
                    DbErrorKind::ConstraintApplyFailure,
                    format!("Failed to apply {} constraint: {message}", descriptor.kind.label()),
                ));
                return false;
            }
            self.applied.push(AppliedConstraint {
                kind: descriptor.kind,
                applied: true,
                descriptor,
            });
        }

        if self.remove_obsolete {
            for record in &snapshot.constraints {
                if declared_names.contains(&record.name) {
                    continue;
                }
                let ddl = emit_drop_ddl(&self.table, &record.name, false, self.dialect);
                if !self.run_ddl(&ddl, record.kind.label()).await {
                    return false;
                }
            }
            for record in &snapshot.indexes {
                if declared_names.contains(&record.name) {
                    continue;
                }
                let ddl = emit_drop_ddl(&self.table, &record.name, true, self.dialect);
                if !self.run_ddl(&ddl, "index").await {
                    return false;
                }
            }
        }

        true
    }

    async fn run_ddl(&mut self, ddl: &str, kind_label: &str) -> bool {
        let mut executer = QueryExecuter::new(self.manager.clone(), None);
        executer.prepare(ddl).await;
        if !executer.execute().await {
            let message = executer.last_error().map(|e| e.message).unwrap_or_default();
            self.error.set(DbError::new(
                DbErrorKind::ConstraintApplyFailure,
                format!("Failed to apply {kind_label} constraint: {message}"),
            ));
            return false;
        }
        true
    }

    pub fn applied_constraints(&self) -> &[AppliedConstraint] {
        &self.applied
    }

    pub fn summary(&self) -> ReconciliationSummary {
        let mut constraint_types = BTreeMap::new();
        for applied in &self.applied {
            *constraint_types
                .entry(applied.kind.label().to_string())
                .or_insert(0) += 1;
        }
        ReconciliationSummary {
            table_name: self.table.clone(),
            total_constraints: self.applied.len(),
            constraint_types,
            has_errors: self.error.get().is_some(),
            error: self.error.get().cloned(),
        }
    }

    pub fn last_error(&self) -> Option<DbError> {
        self.error.get().cloned()
    }
}
