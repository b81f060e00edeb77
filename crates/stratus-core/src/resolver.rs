//! Identity resolution: turn an operator-facing handle into one remote id.

use crate::config::ReconcileConfig;
use crate::retry::{retry, Budget};
use crate::CoreError;
use std::collections::HashMap;
use stratus_remote::{QueryScope, RemoteApi, SummaryRecord};
use stratus_schema::{ImportPath, Lookup, ResourceId, ResourceKind, TieBreak};
use tracing::debug;

/// Bound on the parent walk; real containment is at most four levels deep.
const MAX_DEPTH: usize = 8;

type ParentIndex = HashMap<ResourceId, Option<ResourceId>>;

pub struct Resolver<'a> {
    remote: &'a dyn RemoteApi,
    config: &'a ReconcileConfig,
}

fn names(records: &[SummaryRecord]) -> Vec<String> {
    records.iter().map(|r| r.name.clone()).collect()
}

/// Pick exactly one record. Several matches are only acceptable with a
/// tie-break, and only if it singles out one record.
fn select(
    kind: ResourceKind,
    what: &str,
    mut records: Vec<SummaryRecord>,
    tie_break: Option<TieBreak>,
) -> Result<SummaryRecord, CoreError> {
    match records.len() {
        0 => return Err(CoreError::NotFound(format!("no {kind} matches {what}"))),
        1 => return Ok(records.remove(0)),
        _ => {}
    }
    let Some(tie_break) = tie_break else {
        return Err(CoreError::AmbiguousMatch {
            names: names(&records),
        });
    };
    let pick = match tie_break {
        TieBreak::Earliest => records.iter().filter_map(|r| r.created_at).min(),
        TieBreak::Latest => records.iter().filter_map(|r| r.created_at).max(),
    };
    let mut chosen: Vec<SummaryRecord> = records
        .iter()
        .filter(|r| r.created_at.is_some() && r.created_at == pick)
        .cloned()
        .collect();
    if chosen.len() == 1 {
        Ok(chosen.remove(0))
    } else {
        Err(CoreError::AmbiguousMatch {
            names: names(&records),
        })
    }
}

impl<'a> Resolver<'a> {
    pub fn new(remote: &'a dyn RemoteApi, config: &'a ReconcileConfig) -> Self {
        Self { remote, config }
    }

    /// Resolve `lookup` among objects of `kind` within `scope`.
    pub fn resolve(
        &self,
        kind: ResourceKind,
        lookup: &Lookup,
        scope: &QueryScope,
    ) -> Result<ResourceId, CoreError> {
        let budget = Budget::start(self.config);
        match lookup {
            Lookup::Id(id) => {
                retry(&budget, &format!("read {id}"), || self.remote.read(id)).map_err(|e| {
                    if e.is_not_found() {
                        CoreError::NotFound(format!("{kind} {id}"))
                    } else {
                        e
                    }
                })?;
                Ok(id.clone())
            }
            Lookup::Name(name) => {
                let scope = QueryScope {
                    parent: scope.parent.clone(),
                    name: Some(name.clone()),
                };
                let records = self.query(&budget, kind, &scope)?;
                Ok(select(kind, &format!("name '{name}'"), records, None)?.id)
            }
            Lookup::Filter(filter) => {
                let compiled = filter.compile()?;
                let records: Vec<SummaryRecord> = self
                    .query(&budget, kind, scope)?
                    .into_iter()
                    .filter(|r| compiled.matches(&r.name, r.created_at, &r.metadata))
                    .collect();
                debug!("filter on {kind} matched {} objects", records.len());
                Ok(select(kind, "the filter", records, compiled.tie_break)?.id)
            }
        }
    }

    /// Resolve an import path by walking its ancestors from the outermost one.
    pub fn resolve_import(&self, path: &ImportPath) -> Result<ResourceId, CoreError> {
        let budget = Budget::start(self.config);
        let mut index = None;
        let mut parent: Option<ResourceId> = None;
        for (kind, name) in path.kind.import_ancestors().iter().zip(&path.ancestors) {
            let found = self.find_named(&budget, *kind, parent.as_ref(), name, &mut index)?;
            let record = select(*kind, &format!("name '{name}'"), found, None)?;
            parent = Some(record.id);
        }

        let candidates =
            self.find_named(&budget, path.kind, parent.as_ref(), &path.name, &mut index)?;
        match path.position {
            Some(n) => candidates
                .into_iter()
                .nth(n - 1)
                .map(|r| r.id)
                .ok_or_else(|| {
                    CoreError::NotFound(format!(
                        "{} has no {} named '{}' at position {n}",
                        path.render(&self.config.import_separator),
                        path.kind,
                        path.name
                    ))
                }),
            None => Ok(select(path.kind, &format!("name '{}'", path.name), candidates, None)?.id),
        }
    }

    /// Named objects under `parent`, in creation order. Kinds that hang off an
    /// intermediate object not named in the path (a NAT rule under a gateway
    /// under a VDC) are found by name alone, then kept only if `parent` is
    /// among their ancestors.
    fn find_named(
        &self,
        budget: &Budget,
        kind: ResourceKind,
        parent: Option<&ResourceId>,
        name: &str,
        index: &mut Option<ParentIndex>,
    ) -> Result<Vec<SummaryRecord>, CoreError> {
        let scoped = QueryScope {
            parent: parent.cloned(),
            name: Some(name.to_owned()),
        };
        let records = self.query(budget, kind, &scoped)?;
        let Some(ancestor) = parent else {
            return Ok(records);
        };
        if !records.is_empty() {
            return Ok(records);
        }
        let unscoped = QueryScope {
            parent: None,
            name: Some(name.to_owned()),
        };
        let mut within = Vec::new();
        for record in self.query(budget, kind, &unscoped)? {
            if self.descends_from(budget, &record, ancestor, index)? {
                within.push(record);
            } else {
                debug!("{kind} '{name}' ({}) is outside {ancestor}", record.id);
            }
        }
        Ok(within)
    }

    /// Whether `ancestor` is on the parent chain of `record`. The parent index
    /// is built on first use and shared across one import.
    fn descends_from(
        &self,
        budget: &Budget,
        record: &SummaryRecord,
        ancestor: &ResourceId,
        index: &mut Option<ParentIndex>,
    ) -> Result<bool, CoreError> {
        let mut current = record.parent.clone();
        for _ in 0..MAX_DEPTH {
            let Some(id) = current else {
                return Ok(false);
            };
            if id == *ancestor {
                return Ok(true);
            }
            if index.is_none() {
                *index = Some(self.parent_index(budget)?);
            }
            current = index.as_ref().and_then(|m| m.get(&id)).cloned().flatten();
        }
        Ok(false)
    }

    fn parent_index(&self, budget: &Budget) -> Result<ParentIndex, CoreError> {
        let mut parents = ParentIndex::new();
        for kind in ResourceKind::ALL {
            for record in self.query(budget, kind, &QueryScope::default())? {
                parents.insert(record.id, record.parent);
            }
        }
        debug!("indexed parents of {} objects", parents.len());
        Ok(parents)
    }

    fn query(
        &self,
        budget: &Budget,
        kind: ResourceKind,
        scope: &QueryScope,
    ) -> Result<Vec<SummaryRecord>, CoreError> {
        retry(budget, &format!("query {kind}"), || self.remote.query(kind, scope))
    }
}
