//! Testing utilities for quest graphs.
//!
//! `ScriptedContent` is a [`NodeLoader`] whose nodes follow editable
//! [`NodeSpec`]s and record every lifecycle call into a shared journal, so
//! tests can change content between evaluations and assert exactly which
//! nodes were evaluated, entered, reset or disposed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::quest::{
    NextNode, NodeId, NodeLoader, PlayerId, QuestNode, ReevaluateSignal,
};

/// Scripted behavior of one node
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub id: NodeId,
    pub next: NextNode,
    pub is_root: bool,
    pub rollback: bool,
    /// What `evaluate` returns
    pub passes: bool,
}

impl NodeSpec {
    /// A root node. `next` uses the content encoding (-1 suspend, -2 complete).
    pub fn root(id: NodeId, next: i32) -> Self {
        Self {
            id,
            next: parse_next(next),
            is_root: true,
            rollback: false,
            passes: true,
        }
    }

    /// A non-root node
    pub fn step(id: NodeId, next: i32) -> Self {
        Self {
            is_root: false,
            ..Self::root(id, next)
        }
    }

    pub fn rollback_point(mut self) -> Self {
        self.rollback = true;
        self
    }

    pub fn failing(mut self) -> Self {
        self.passes = false;
        self
    }
}

/// Unknown negative values read as "suspend"
fn parse_next(raw: i32) -> NextNode {
    NextNode::from_raw(raw).unwrap_or(NextNode::Suspend)
}

/// A lifecycle call made on a scripted node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeCall {
    Evaluate(NodeId, PlayerId),
    Enter(NodeId, PlayerId),
    Reset(NodeId, PlayerId),
    Dispose(NodeId),
}

#[derive(Default)]
struct ContentInner {
    specs: HashMap<NodeId, NodeSpec>,
    calls: Vec<NodeCall>,
    signals: HashMap<NodeId, ReevaluateSignal>,
    loads: usize,
}

/// Shared, editable quest content
#[derive(Clone, Default)]
pub struct ScriptedContent {
    inner: Arc<Mutex<ContentInner>>,
}

impl ScriptedContent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_nodes(specs: impl IntoIterator<Item = NodeSpec>) -> Self {
        let content = Self::new();
        for spec in specs {
            content.insert(spec);
        }
        content
    }

    /// `len` nodes in a line: root 0, steps 1..len-2, and a terminating
    /// root `len - 1`
    pub fn linear_chain(len: usize) -> Self {
        let last = len.saturating_sub(1) as NodeId;
        let content = Self::new();
        content.insert(NodeSpec::root(0, 1));
        for id in 1..last {
            content.insert(NodeSpec::step(id, id + 1));
        }
        content.insert(NodeSpec::root(last, -1));
        content
    }

    fn lock(&self) -> MutexGuard<'_, ContentInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, spec: NodeSpec) {
        self.lock().specs.insert(spec.id, spec);
    }

    /// Remove a node so the loader no longer finds it
    pub fn remove(&self, id: NodeId) {
        self.lock().specs.remove(&id);
    }

    pub fn set_passes(&self, id: NodeId, passes: bool) {
        if let Some(spec) = self.lock().specs.get_mut(&id) {
            spec.passes = passes;
        }
    }

    pub fn set_next(&self, id: NodeId, next: i32) {
        if let Some(spec) = self.lock().specs.get_mut(&id) {
            spec.next = parse_next(next);
        }
    }

    pub fn calls(&self) -> Vec<NodeCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// How many times the loader produced a node
    pub fn loads(&self) -> usize {
        self.lock().loads
    }

    pub fn evaluations_of(&self, id: NodeId) -> usize {
        self.count(|call| matches!(call, NodeCall::Evaluate(node, _) if *node == id))
    }

    pub fn enters_of(&self, id: NodeId) -> usize {
        self.count(|call| matches!(call, NodeCall::Enter(node, _) if *node == id))
    }

    pub fn resets_of(&self, id: NodeId) -> usize {
        self.count(|call| matches!(call, NodeCall::Reset(node, _) if *node == id))
    }

    pub fn disposals_of(&self, id: NodeId) -> usize {
        self.count(|call| matches!(call, NodeCall::Dispose(node) if *node == id))
    }

    fn count(&self, predicate: impl Fn(&NodeCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|call| predicate(call)).count()
    }

    /// Raise the re-evaluation signal of a loaded node. Returns false when
    /// the node is not currently subscribed.
    pub fn raise_signal(&self, id: NodeId, player: &PlayerId) -> bool {
        let signal = self.lock().signals.get(&id).cloned();
        match signal {
            Some(signal) => {
                signal.request(player);
                true
            }
            None => false,
        }
    }

    pub fn loader(&self) -> Arc<dyn NodeLoader> {
        Arc::new(self.clone())
    }

    fn record(&self, call: NodeCall) {
        self.lock().calls.push(call);
    }

    fn spec(&self, id: NodeId) -> Option<NodeSpec> {
        self.lock().specs.get(&id).cloned()
    }
}

impl NodeLoader for ScriptedContent {
    fn load_node(&self, _quest_tag: &str, node_id: NodeId) -> Option<Box<dyn QuestNode>> {
        let mut inner = self.lock();
        let spec = inner.specs.get(&node_id)?;
        let is_root = spec.is_root;
        let rollback = spec.rollback;
        inner.loads += 1;
        drop(inner);

        Some(Box::new(ScriptedNode {
            id: node_id,
            is_root,
            rollback,
            content: self.clone(),
        }))
    }
}

/// Node backed by a [`NodeSpec`]; structure is fixed at load time, while
/// `passes` and `next` are read live from the content
pub struct ScriptedNode {
    id: NodeId,
    is_root: bool,
    rollback: bool,
    content: ScriptedContent,
}

impl QuestNode for ScriptedNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn next_id(&self, _player: &PlayerId) -> NextNode {
        self.content
            .spec(self.id)
            .map_or(NextNode::Suspend, |spec| spec.next)
    }

    fn is_root(&self) -> bool {
        self.is_root
    }

    fn is_rollback_point(&self) -> bool {
        self.rollback
    }

    fn evaluate(&mut self, player: &PlayerId) -> bool {
        self.content.record(NodeCall::Evaluate(self.id, player.clone()));
        self.content.spec(self.id).is_some_and(|spec| spec.passes)
    }

    fn enter(&mut self, player: &PlayerId) {
        self.content.record(NodeCall::Enter(self.id, player.clone()));
    }

    fn reset(&mut self, player: &PlayerId) {
        self.content.record(NodeCall::Reset(self.id, player.clone()));
    }

    fn dispose(&mut self) {
        self.content.record(NodeCall::Dispose(self.id));
    }

    fn subscribe(&mut self, signal: ReevaluateSignal) {
        self.content.lock().signals.insert(self.id, signal);
    }

    fn unsubscribe(&mut self) {
        self.content.lock().signals.remove(&self.id);
    }
}
