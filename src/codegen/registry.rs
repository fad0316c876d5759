//! Patched block registry
//!
//! Helper functions generated for a program are registered here by name.
//! Registration is append-only and memoized: asking for an existing name
//! returns the existing handle and never runs the producer again, so callers
//! must make the text a pure function of the name.
//!
//! Dependencies are recorded by name and may point at blocks registered
//! later. They are only resolved when the program is written out, see
//! [`PatchRegistry::write_all`].

use indexmap::IndexMap;
use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use rustc_hash::{FxBuildHasher, FxHashSet};
use std::fmt::Write;

use crate::diagnostics::{Result, StuckBlock, SubgroupError};

/// Handle to a registered block (its registration index)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

/// A dependency edge, resolved when the target already existed at insert time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepRef {
    Resolved(BlockId),
    Pending(String),
}

/// Named helper snippet
#[derive(Debug, Clone)]
pub struct PatchBlock {
    pub name: String,
    pub text: String,
    pub deps: Vec<DepRef>,
}

/// Program-wide registry of patched blocks
#[derive(Debug, Default)]
pub struct PatchRegistry {
    blocks: IndexMap<String, PatchBlock, FxBuildHasher>,
}

impl PatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` unless present. Returns the handle and whether the
    /// producer ran.
    pub fn add_or_get<S, F>(&mut self, name: &str, deps: &[S], producer: F) -> (BlockId, bool)
    where
        S: AsRef<str>,
        F: FnOnce() -> String,
    {
        if let Some(idx) = self.blocks.get_index_of(name) {
            return (BlockId(idx), false);
        }
        let deps = deps
            .iter()
            .map(|dep| {
                let dep = dep.as_ref();
                match self.blocks.get_index_of(dep) {
                    Some(idx) => DepRef::Resolved(BlockId(idx)),
                    None => DepRef::Pending(dep.to_string()),
                }
            })
            .collect();
        let text = producer();
        let (idx, _) = self.blocks.insert_full(
            name.to_string(),
            PatchBlock {
                name: name.to_string(),
                text,
                deps,
            },
        );
        tracing::debug!("Registered patched block [{}]", name);
        (BlockId(idx), true)
    }

    pub fn get(&self, name: &str) -> Option<&PatchBlock> {
        self.blocks.get(name)
    }

    pub fn id_of(&self, name: &str) -> Option<BlockId> {
        self.blocks.get_index_of(name).map(BlockId)
    }

    pub fn block(&self, id: BlockId) -> Option<&PatchBlock> {
        self.blocks.get_index(id.0).map(|(_, b)| b)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.blocks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Block names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.blocks.keys().map(String::as_str)
    }

    fn dep_name<'a>(&'a self, dep: &'a DepRef) -> &'a str {
        match dep {
            DepRef::Resolved(id) => self.blocks.get_index(id.0).map_or("", |(name, _)| name.as_str()),
            DepRef::Pending(name) => name.as_str(),
        }
    }

    /// Emission order: repeatedly take every pending block whose
    /// dependencies are out, in registration order, until a pass makes no
    /// progress.
    pub fn emission_order(&self) -> Result<Vec<BlockId>> {
        let mut emitted: FxHashSet<&str> = FxHashSet::default();
        let mut order = Vec::with_capacity(self.blocks.len());
        let mut pending: Vec<usize> = (0..self.blocks.len()).collect();

        loop {
            let before = pending.len();
            let mut still = Vec::with_capacity(before);
            for idx in pending {
                let Some((name, block)) = self.blocks.get_index(idx) else {
                    continue;
                };
                let ready = block
                    .deps
                    .iter()
                    .all(|dep| emitted.contains(self.dep_name(dep)));
                if ready {
                    emitted.insert(name.as_str());
                    order.push(BlockId(idx));
                } else {
                    still.push(idx);
                }
            }
            pending = still;
            if pending.is_empty() || pending.len() == before {
                break;
            }
        }

        if pending.is_empty() {
            return Ok(order);
        }

        let stuck = pending
            .iter()
            .filter_map(|&idx| self.blocks.get_index(idx))
            .map(|(name, block)| StuckBlock {
                name: name.clone(),
                total_deps: block.deps.len(),
                missing: block
                    .deps
                    .iter()
                    .map(|dep| self.dep_name(dep))
                    .filter(|dep| !emitted.contains(dep))
                    .map(str::to_string)
                    .collect(),
            })
            .collect::<Vec<_>>();
        let cycles = self.find_cycles(&pending);
        tracing::debug!("{} patched blocks stuck, {} cycles", stuck.len(), cycles.len());
        Err(SubgroupError::dependency(stuck, cycles))
    }

    /// Strongly connected components among the stuck blocks
    fn find_cycles(&self, pending: &[usize]) -> Vec<Vec<String>> {
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for &idx in pending {
            let Some((name, block)) = self.blocks.get_index(idx) else {
                continue;
            };
            graph.add_node(name.as_str());
            for dep in &block.deps {
                graph.add_edge(name.as_str(), self.dep_name(dep), ());
            }
        }
        tarjan_scc(&graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
            .map(|scc| {
                let mut names: Vec<String> = scc.into_iter().map(str::to_string).collect();
                names.sort_by_key(|n| self.blocks.get_index_of(n.as_str()));
                names
            })
            .collect()
    }

    /// Write every block, dependencies first, each behind a provenance
    /// banner. Nothing is written when a dependency cannot be satisfied.
    pub fn write_all(&self, out: &mut String) -> Result<()> {
        let order = self.emission_order()?;
        for id in order {
            let Some(block) = self.block(id) else { continue };
            let _ = writeln!(out, "// patched block [{}]", block.name);
            out.push_str(&block.text);
            out.push_str("\n\n");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_DEPS: &[&str] = &[];

    #[test]
    fn test_add_or_get_memoizes() {
        let mut reg = PatchRegistry::new();
        let mut calls = 0;
        let (a, inserted) = reg.add_or_get("a", NO_DEPS, || {
            calls += 1;
            "text a".to_string()
        });
        assert!(inserted);
        let (b, inserted) = reg.add_or_get("a", NO_DEPS, || {
            calls += 1;
            "other".to_string()
        });
        assert!(!inserted);
        assert_eq!(a, b);
        assert_eq!(calls, 1);
        assert_eq!(reg.get("a").unwrap().text, "text a");
    }

    #[test]
    fn test_deps_resolved_or_pending() {
        let mut reg = PatchRegistry::new();
        reg.add_or_get("base", NO_DEPS, String::new);
        reg.add_or_get("user", &["base", "later"], String::new);
        let deps = &reg.get("user").unwrap().deps;
        assert_eq!(deps[0], DepRef::Resolved(BlockId(0)));
        assert_eq!(deps[1], DepRef::Pending("later".to_string()));
    }

    #[test]
    fn test_forward_reference_emits_dependency_first() {
        let mut reg = PatchRegistry::new();
        reg.add_or_get("user", &["base"], || "user();".to_string());
        reg.add_or_get("base", NO_DEPS, || "base();".to_string());

        let mut out = String::new();
        reg.write_all(&mut out).unwrap();
        let base = out.find("// patched block [base]").unwrap();
        let user = out.find("// patched block [user]").unwrap();
        assert!(base < user);
    }

    #[test]
    fn test_missing_dependency_reported() {
        let mut reg = PatchRegistry::new();
        reg.add_or_get("a", &["ghost"], String::new);
        let err = reg.emission_order().unwrap_err();
        let SubgroupError::Dependency { stuck, cycles, .. } = err else {
            panic!("expected dependency error");
        };
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].missing, vec!["ghost".to_string()]);
        assert!(cycles.is_empty());
    }

    #[test]
    fn test_self_cycle_detected() {
        let mut reg = PatchRegistry::new();
        reg.add_or_get("loop", &["loop"], String::new);
        let err = reg.emission_order().unwrap_err();
        let SubgroupError::Dependency { cycles, .. } = err else {
            panic!("expected dependency error");
        };
        assert_eq!(cycles, vec![vec!["loop".to_string()]]);
    }
}
