use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use itertools::Itertools;
use log::debug;

use crate::process::{Node, NodeKey, Process};
use crate::{Config, Error, KTHREAD_PID, Pid, ProcessRecord, ProcessSource, Result, SysinfoSource};

/// State shared by a session and every [`Process`] handle it gives out.
pub(crate) struct Shared {
    config: Config,
    source: Box<dyn ProcessSource>,
    state: Mutex<TreeState>,
}

impl Shared {
    /// Acquire the session lock. The lock is not reentrant: code holding the
    /// guard must only call `TreeState` methods, never public operations.
    pub(crate) fn lock(&self) -> MutexGuard<'_, TreeState> {
        // Walks never leave the state half-written, so a panic in another
        // thread does not invalidate it.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Everything guarded by the session lock.
///
/// Methods on this type assume the lock is already held and never try to
/// acquire it.
#[derive(Debug, Default)]
pub(crate) struct TreeState {
    /// Every known node, including excluded nodes and unpruned tombstones.
    pub(crate) nodes: HashMap<Pid, Node>,
    next_serial: u64,
    /// Pids of all nodes, ascending.
    all: Vec<Pid>,
    /// Roots of the absolute tree, ascending.
    absolute_roots: Vec<Pid>,
    /// Configured roots in configuration order, resolved by the first update
    /// that finds all of them.
    configured_roots: Option<Vec<NodeKey>>,
    /// Included nodes, ascending.
    included: Vec<Pid>,
    /// Roots of the included tree, ascending.
    included_roots: Vec<Pid>,
}

impl TreeState {
    fn update(
        &mut self,
        config: &Config,
        source: &dyn ProcessSource,
        prune_tombstones: bool,
    ) -> Result<()> {
        let records = source.processes().map_err(Error::Enumeration)?;

        self.mark_all_tombstone();
        self.reconcile(config, records);
        if prune_tombstones {
            self.prune_tombstones();
        }
        let resolved = self.resolve_configured_roots(config);
        self.rebuild_absolute_structure();
        self.compute_inclusion(config);
        self.rebuild_included_structure();

        debug!(
            "Process tree updated: {} processes ({} tombstones), {} absolute roots, {} included, included roots [{}]",
            self.all.len(),
            self.nodes.values().filter(|node| node.tombstone).count(),
            self.absolute_roots.len(),
            self.included.len(),
            self.included_roots.iter().join(", "),
        );

        resolved
    }

    /// Tombstone every node and drop all child links; links are rederived on
    /// each update.
    fn mark_all_tombstone(&mut self) {
        for node in self.nodes.values_mut() {
            node.tombstone = true;
            node.children.clear();
            node.included_children.clear();
        }
    }

    /// Create nodes for new pids and refresh the ones already known.
    ///
    /// A refreshed node keeps its identity even if the OS recycled the pid for
    /// an unrelated process in the meantime.
    fn reconcile(&mut self, config: &Config, records: Vec<ProcessRecord>) {
        for record in records {
            if !config.include_kernel_threads()
                && (record.pid == KTHREAD_PID || record.ppid == KTHREAD_PID)
            {
                continue;
            }

            match self.nodes.entry(record.pid) {
                Entry::Occupied(mut entry) => {
                    let node = entry.get_mut();
                    node.record = record;
                    node.tombstone = false;
                }
                Entry::Vacant(entry) => {
                    let serial = self.next_serial;
                    self.next_serial += 1;
                    entry.insert(Node::new(serial, record, !config.has_fixed_roots()));
                }
            }
        }
    }

    fn prune_tombstones(&mut self) {
        let before = self.nodes.len();
        self.nodes.retain(|_, node| !node.tombstone);
        debug!("Pruned {} tombstoned processes", before - self.nodes.len());
    }

    /// Look up the configured roots once. On failure the list stays
    /// unresolved and the lookup is retried by the next update.
    fn resolve_configured_roots(&mut self, config: &Config) -> Result<()> {
        if !config.has_fixed_roots() || self.configured_roots.is_some() {
            return Ok(());
        }

        let mut roots = Vec::with_capacity(config.root_pids().len());
        for &pid in config.root_pids() {
            match self.key(pid) {
                Some(key) => roots.push(key),
                None => {
                    debug!("Configured root pid {pid} not found");
                    return Err(Error::RootNotFound(pid));
                }
            }
        }
        self.configured_roots = Some(roots);
        Ok(())
    }

    /// Resolve every node's absolute parent from its recorded ppid and rebuild
    /// the absolute child lists and roots.
    fn rebuild_absolute_structure(&mut self) {
        self.all = self.nodes.keys().copied().sorted_unstable().collect();
        self.absolute_roots.clear();

        // Pids are visited in ascending order, so every list is built sorted.
        for &pid in &self.all {
            let Some(ppid) = self.nodes.get(&pid).map(|node| node.record.ppid) else {
                continue;
            };
            let parent = if ppid == 0 { None } else { self.key(ppid) };

            if let Some(node) = self.nodes.get_mut(&pid) {
                node.parent = parent.map(|key| key.pid);
                if node.original_parent.is_none() {
                    node.original_parent = parent;
                }
            }

            match parent {
                Some(parent) if parent.pid != pid => {
                    if let Some(parent_node) = self.nodes.get_mut(&parent.pid) {
                        parent_node.children.push(pid);
                    }
                }
                // A node parented to itself is a root as far as traversal goes.
                _ => self.absolute_roots.push(pid),
            }
        }
    }

    fn compute_inclusion(&mut self, config: &Config) {
        if config.has_fixed_roots() {
            for node in self.nodes.values_mut() {
                node.included = false;
            }

            let roots = self
                .configured_roots
                .iter()
                .flatten()
                .filter(|key| self.node(**key).is_some())
                .map(|key| key.pid)
                .collect::<Vec<_>>();

            let mut reachable = self.full_subtrees(&roots);
            if config.include_root_ancestors() {
                for &root in &roots {
                    reachable.extend(self.full_ancestry(root));
                }
            }
            self.set_included(&reachable, true);
        } else {
            for node in self.nodes.values_mut() {
                node.included = true;
            }
        }

        // Applied last so kernel threads stay out even under a configured root.
        if !config.include_kernel_threads() && self.nodes.contains_key(&KTHREAD_PID) {
            let kernel_threads = self.full_subtrees(&[KTHREAD_PID]);
            self.set_included(&kernel_threads, false);
        }
    }

    fn set_included(&mut self, pids: &[Pid], included: bool) {
        for pid in pids {
            if let Some(node) = self.nodes.get_mut(pid) {
                node.included = included;
            }
        }
    }

    /// Full (unfiltered) depth-first walk of the absolute subtrees under
    /// `roots`, in root order then ascending pid order.
    fn full_subtrees(&self, roots: &[Pid]) -> Vec<Pid> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        let mut stack = roots.iter().rev().copied().collect::<Vec<_>>();

        while let Some(pid) = stack.pop() {
            let Some(node) = self.nodes.get(&pid) else {
                continue;
            };
            if !visited.insert(pid) {
                continue;
            }
            order.push(pid);
            stack.extend(node.children.iter().rev());
        }
        order
    }

    /// Full (unfiltered) ancestry of `pid`, starting with `pid` itself.
    fn full_ancestry(&self, pid: Pid) -> Vec<Pid> {
        std::iter::once(pid).chain(self.ancestors(pid)).collect()
    }

    fn rebuild_included_structure(&mut self) {
        self.included.clear();
        self.included_roots.clear();

        for &pid in &self.all {
            let Some(node) = self.nodes.get(&pid) else {
                continue;
            };
            if !node.included {
                continue;
            }
            let parent = node.parent;
            self.included.push(pid);

            let parent_included = match parent {
                Some(parent) if parent != pid => match self.nodes.get_mut(&parent) {
                    Some(parent_node) => {
                        parent_node.included_children.push(pid);
                        parent_node.included
                    }
                    None => false,
                },
                _ => false,
            };
            if !parent_included {
                self.included_roots.push(pid);
            }
        }
    }

    pub(crate) fn key(&self, pid: Pid) -> Option<NodeKey> {
        self.nodes.get(&pid).map(|node| NodeKey {
            pid,
            serial: node.serial,
        })
    }

    pub(crate) fn keys<'a>(&'a self, pids: &'a [Pid]) -> impl Iterator<Item = NodeKey> + 'a {
        pids.iter().filter_map(|&pid| self.key(pid))
    }
}

/// A session over the OS process tree.
///
/// The session holds one lock. Every public operation, on the session or on
/// a [`Process`] handle, acquires it for its own duration only. Walks take
/// the lock once per visited node, so a walk running concurrently with
/// [`ProcTree::update`] may observe a mix of the old and new snapshots.
///
/// Nothing runs in the background: the snapshot only changes when
/// [`ProcTree::update`] is called.
#[derive(Clone)]
pub struct ProcTree {
    shared: Arc<Shared>,
}

impl fmt::Debug for ProcTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcTree")
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl ProcTree {
    /// Create a session over the live process table and take an initial snapshot.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_source(config, SysinfoSource)
    }

    /// Create a session over `source` and take an initial snapshot.
    ///
    /// Fails if the enumeration fails or if a configured root pid is absent.
    pub fn with_source(config: Config, source: impl ProcessSource + 'static) -> Result<Self> {
        let tree = ProcTree {
            shared: Arc::new(Shared {
                config,
                source: Box::new(source),
                state: Mutex::new(TreeState::default()),
            }),
        };
        tree.update(false)?;
        Ok(tree)
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Refresh the snapshot. Known processes keep their [`Process`] identity;
    /// those not found again become tombstones, and are forgotten when
    /// `prune_tombstones` is set.
    ///
    /// On an enumeration error the previous snapshot is left untouched. A
    /// missing configured root is reported after the snapshot has been
    /// rebuilt, with an empty included view.
    ///
    /// The enumeration runs under the session lock; callers that need bounded
    /// latency must impose their own timeout around this call.
    pub fn update(&self, prune_tombstones: bool) -> Result<()> {
        let mut state = self.shared.lock();
        state.update(
            &self.shared.config,
            self.shared.source.as_ref(),
            prune_tombstones,
        )
    }

    fn handles(&self, state: &TreeState, pids: &[Pid]) -> Vec<Process> {
        state
            .keys(pids)
            .map(|key| Process::new(self.shared.clone(), key))
            .collect()
    }

    /// Included processes, in ascending pid order.
    pub fn processes(&self) -> Vec<Process> {
        let state = self.shared.lock();
        self.handles(&state, &state.included)
    }

    /// Roots of the included tree, in ascending pid order.
    pub fn roots(&self) -> Vec<Process> {
        let state = self.shared.lock();
        self.handles(&state, &state.included_roots)
    }

    /// Configured root processes in configuration order. Empty when no roots
    /// are configured, or while they are unresolved.
    pub fn configured_roots(&self) -> Vec<Process> {
        let state = self.shared.lock();
        state
            .configured_roots
            .iter()
            .flatten()
            .filter(|key| state.node(**key).is_some())
            .map(|&key| Process::new(self.shared.clone(), key))
            .collect()
    }

    /// Look up a process by pid. Unpruned tombstones are found too.
    pub fn process(&self, pid: Pid) -> Option<Process> {
        let state = self.shared.lock();
        state
            .key(pid)
            .map(|key| Process::new(self.shared.clone(), key))
    }

    /// Walk the included tree depth-first from its roots, roots and children
    /// in ascending pid order. The first error returned by `handler` stops the
    /// walk and is returned.
    pub fn walk<E, F>(&self, handler: F) -> Result<(), E>
    where
        F: FnMut(&Process) -> Result<(), E>,
    {
        self.walk_from_roots(&self.roots(), handler)
    }

    /// Walk the included subtrees of `roots`, in the given order.
    ///
    /// No root may be a descendant of another one; otherwise the shared
    /// descendants are visited once per enclosing root.
    pub fn walk_from_roots<E, F>(&self, roots: &[Process], mut handler: F) -> Result<(), E>
    where
        F: FnMut(&Process) -> Result<(), E>,
    {
        for root in roots {
            root.walk_subtree_with(&mut HashSet::new(), &mut handler)?;
        }
        Ok(())
    }

    /// Sort processes in ascending pid order.
    pub fn sort_by_pid(processes: &mut [Process]) {
        processes.sort_by_key(Process::pid);
    }

    /// End the session. No resources are held, so this never fails; handles
    /// given out earlier stay usable.
    pub fn close(self) -> Result<()> {
        Ok(())
    }
}
