use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::tree::{Shared, TreeState};
use crate::{Pid, ProcessRecord};

/// Identity of a node within a session: its pid plus a serial assigned when
/// the node was created, so that a pid pruned and later rediscovered does not
/// alias the old node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeKey {
    pub(crate) pid: Pid,
    pub(crate) serial: u64,
}

/// Per-process bookkeeping stored in the session arena. Links are pids into
/// the same arena.
#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) serial: u64,
    pub(crate) record: ProcessRecord,
    /// Not rediscovered by the most recent update.
    pub(crate) tombstone: bool,
    /// Absolute parent, independent of filtering. May be the node itself.
    pub(crate) parent: Option<Pid>,
    /// First absolute parent ever assigned; never overwritten.
    pub(crate) original_parent: Option<NodeKey>,
    /// Nodes whose absolute parent is this one, ascending.
    pub(crate) children: Vec<Pid>,
    /// Included subset of `children`, ascending.
    pub(crate) included_children: Vec<Pid>,
    pub(crate) included: bool,
}

impl Node {
    pub(crate) fn new(serial: u64, record: ProcessRecord, included: bool) -> Self {
        Self {
            serial,
            record,
            tombstone: false,
            parent: None,
            original_parent: None,
            children: Vec::new(),
            included_children: Vec::new(),
            included,
        }
    }
}

/// Absolute ancestors of a node, nearest first. Stops at a node without
/// parent or parented to itself, and after as many steps as there are nodes
/// so that a longer parent cycle cannot run forever.
pub(crate) struct Ancestors<'a> {
    state: &'a TreeState,
    current: Pid,
    remaining: usize,
}

impl Iterator for Ancestors<'_> {
    type Item = Pid;

    fn next(&mut self) -> Option<Pid> {
        if self.remaining == 0 {
            return None;
        }
        let parent = self.state.nodes.get(&self.current)?.parent?;
        if parent == self.current {
            return None;
        }
        self.remaining -= 1;
        self.current = parent;
        Some(parent)
    }
}

// Lock-held helpers behind the public `Process` operations.
impl TreeState {
    pub(crate) fn node(&self, key: NodeKey) -> Option<&Node> {
        self.nodes
            .get(&key.pid)
            .filter(|node| node.serial == key.serial)
    }

    pub(crate) fn ancestors(&self, pid: Pid) -> Ancestors<'_> {
        Ancestors {
            state: self,
            current: pid,
            remaining: self.nodes.len(),
        }
    }

    /// Absolute parent of `key`, or `None` if it has none or is its own parent.
    fn absolute_parent(&self, key: NodeKey) -> Option<NodeKey> {
        let parent = self.node(key)?.parent?;
        if parent == key.pid {
            return None;
        }
        self.key(parent)
    }

    fn is_included(&self, key: NodeKey) -> bool {
        self.node(key).is_some_and(|node| node.included)
    }

    fn parent(&self, key: NodeKey) -> Option<NodeKey> {
        self.absolute_parent(key)
            .filter(|&parent| self.is_included(parent))
    }

    fn is_descendant_of(&self, key: NodeKey, ancestor: NodeKey) -> bool {
        self.node(key).is_some()
            && self.node(ancestor).is_some()
            && self.ancestors(key.pid).any(|pid| pid == ancestor.pid)
    }

    fn depth(&self, key: NodeKey) -> usize {
        if self.node(key).is_none() {
            return 0;
        }
        self.ancestors(key.pid)
            .take_while(|&pid| self.nodes.get(&pid).is_some_and(|node| node.included))
            .count()
    }
}

/// Handle to one process of a [`ProcTree`](crate::ProcTree) session.
///
/// A handle keeps referring to the same node across updates, as long as the
/// process is rediscovered or kept as a tombstone. Once the node is pruned the
/// handle is detached: it reports a tombstone with no parent, no children and
/// no executable.
///
/// Every method takes the session lock for its own duration; see
/// [`ProcTree`](crate::ProcTree) for the consequences on walks.
#[derive(Clone)]
pub struct Process {
    shared: Arc<Shared>,
    key: NodeKey,
}

impl PartialEq for Process {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared) && self.key == other.key
    }
}

impl Eq for Process {}

impl Hash for Process {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.key.pid)
            .field("serial", &self.key.serial)
            .finish()
    }
}

impl Process {
    pub(crate) fn new(shared: Arc<Shared>, key: NodeKey) -> Self {
        Self { shared, key }
    }

    fn same_session(&self, other: &Process) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    fn handle(&self, key: NodeKey) -> Process {
        Process::new(self.shared.clone(), key)
    }

    pub fn pid(&self) -> Pid {
        self.key.pid
    }

    /// Parent pid reported by the last enumeration that found this process.
    pub fn ppid(&self) -> Option<Pid> {
        let state = self.shared.lock();
        state.node(self.key).map(|node| node.record.ppid)
    }

    /// Executable name, without the directory path.
    pub fn executable(&self) -> Option<String> {
        let state = self.shared.lock();
        state.node(self.key).map(|node| node.record.executable.clone())
    }

    /// Whether the process was not found by the most recent update.
    pub fn is_tombstone(&self) -> bool {
        let state = self.shared.lock();
        state.node(self.key).is_none_or(|node| node.tombstone)
    }

    /// Whether the process is part of the included view.
    pub fn is_included(&self) -> bool {
        let state = self.shared.lock();
        state.is_included(self.key)
    }

    /// The parent process, or `None` if the parent is unknown, is this process
    /// itself, or is not included.
    pub fn parent(&self) -> Option<Process> {
        let state = self.shared.lock();
        state.parent(self.key).map(|key| self.handle(key))
    }

    /// The first parent this process was seen with. Differs from the current
    /// parent once the process has been re-parented, e.g. reattached to init
    /// after its parent exited. Not affected by filtering.
    pub fn original_parent(&self) -> Option<Process> {
        let state = self.shared.lock();
        state
            .node(self.key)?
            .original_parent
            .filter(|&key| state.node(key).is_some())
            .map(|key| self.handle(key))
    }

    /// Included children, in ascending pid order.
    pub fn children(&self) -> Vec<Process> {
        let state = self.shared.lock();
        let Some(node) = state.node(self.key) else {
            return Vec::new();
        };
        state
            .keys(&node.included_children)
            .map(|key| self.handle(key))
            .collect()
    }

    /// Whether `ancestor` is reached by climbing the absolute parent chain,
    /// regardless of filtering. A process is not its own descendant.
    pub fn is_descendant_of(&self, ancestor: &Process) -> bool {
        if !self.same_session(ancestor) {
            return false;
        }
        let state = self.shared.lock();
        state.is_descendant_of(self.key, ancestor.key)
    }

    pub fn is_ancestor_of(&self, descendant: &Process) -> bool {
        descendant.is_descendant_of(self)
    }

    /// Depth within the included view: 0 for an included root, 1 for its
    /// children, and so on.
    pub fn depth(&self) -> usize {
        let state = self.shared.lock();
        state.depth(self.key)
    }

    /// Walk the included subtree rooted at this process depth-first, children
    /// in ascending pid order. Nothing is visited if this process is not
    /// included. The first error returned by `handler` stops the walk.
    pub fn walk_subtree<E, F>(&self, mut handler: F) -> Result<(), E>
    where
        F: FnMut(&Process) -> Result<(), E>,
    {
        self.walk_subtree_with(&mut HashSet::new(), &mut handler)
    }

    pub(crate) fn walk_subtree_with<E>(
        &self,
        visited: &mut HashSet<NodeKey>,
        handler: &mut dyn FnMut(&Process) -> Result<(), E>,
    ) -> Result<(), E> {
        // A parent cycle left by pid reuse would otherwise recurse forever.
        if !visited.insert(self.key) || !self.is_included() {
            return Ok(());
        }
        handler(self)?;
        for child in self.children() {
            child.walk_subtree_with(visited, handler)?;
        }
        Ok(())
    }

    /// Walk from this process up the absolute parent chain. `handler` is only
    /// called for included processes, but the climb goes on through excluded
    /// ones. The first error returned by `handler` stops the walk.
    pub fn walk_ancestry<E, F>(&self, mut handler: F) -> Result<(), E>
    where
        F: FnMut(&Process) -> Result<(), E>,
    {
        let mut visited = HashSet::new();
        let mut current = self.clone();

        while visited.insert(current.key) {
            let (included, parent) = {
                let state = self.shared.lock();
                (
                    state.is_included(current.key),
                    state.absolute_parent(current.key),
                )
            };
            if included {
                handler(&current)?;
            }
            match parent {
                Some(key) => current = self.handle(key),
                None => break,
            }
        }
        Ok(())
    }
}
