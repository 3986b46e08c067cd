use std::fmt;
use std::sync::Arc;

use tracing::warn;

use super::{
    AdministratorIndex, AdministratorMetaData, ManagedObjectIndex, ManagedObjectMetaData, Scope,
};

/// Problem found while assembling metadata. Recorded, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub scope: Scope,
    pub message: String,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.scope, self.message)
    }
}

/// Name-keyed registration of the managed objects and administrators of
/// one scope. Registration order defines the runtime indices.
pub struct ScopeRegistry {
    scope: Scope,
    managed_objects: Vec<Arc<ManagedObjectMetaData>>,
    administrators: Vec<Arc<AdministratorMetaData>>,
    issues: Vec<Issue>,
}

impl ScopeRegistry {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            managed_objects: Vec::new(),
            administrators: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Registers `meta` under its name. A second registration under the
    /// same name returns the first one and records an [`Issue`].
    pub fn add_managed_object(
        &mut self,
        meta: ManagedObjectMetaData,
    ) -> (ManagedObjectIndex, Arc<ManagedObjectMetaData>) {
        if let Some(index) = self.managed_objects.iter().position(|existing| existing.name == meta.name) {
            self.record_duplicate("managed object", &meta.name);
            let index = ManagedObjectIndex {
                scope: self.scope,
                index,
            };
            return (index, self.managed_objects[index.index].clone());
        }
        let meta = Arc::new(meta);
        self.managed_objects.push(meta.clone());
        let index = ManagedObjectIndex {
            scope: self.scope,
            index: self.managed_objects.len() - 1,
        };
        (index, meta)
    }

    pub fn add_administrator(
        &mut self,
        meta: AdministratorMetaData,
    ) -> (AdministratorIndex, Arc<AdministratorMetaData>) {
        if let Some(index) = self.administrators.iter().position(|existing| existing.name == meta.name) {
            self.record_duplicate("administrator", &meta.name);
            return (
                AdministratorIndex::new(self.scope, index),
                self.administrators[index].clone(),
            );
        }
        let meta = Arc::new(meta);
        self.administrators.push(meta.clone());
        (
            AdministratorIndex::new(self.scope, self.administrators.len() - 1),
            meta,
        )
    }

    pub fn managed_objects(&self) -> &[Arc<ManagedObjectMetaData>] {
        &self.managed_objects
    }

    pub fn administrators(&self) -> &[Arc<AdministratorMetaData>] {
        &self.administrators
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    /// Registered metadata in index order, ready for the scope's slot in
    /// [`ProcessMetaData`](super::ProcessMetaData) or a work's metadata.
    pub fn into_parts(self) -> (Vec<Arc<ManagedObjectMetaData>>, Vec<Arc<AdministratorMetaData>>) {
        (self.managed_objects, self.administrators)
    }

    fn record_duplicate(&mut self, kind: &str, name: &str) {
        warn!(scope = %self.scope, name, "{kind} added more than once");
        self.issues.push(Issue {
            scope: self.scope,
            message: format!("{kind} '{name}' added more than once"),
        });
    }
}
