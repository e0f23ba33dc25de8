//! Quest Dispatcher
//!
//! A tokio task that owns every open quest graph. Commands arrive on an mpsc
//! channel and are applied one at a time; on every tick the re-evaluations
//! nodes queued since the last tick are run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::pack::QuestPackRegistry;
use crate::quest::{
    Cursor, EvaluationOutcome, EvaluationPolicy, GraphError, NodeId, NodeLoader, PlayerId,
    QuestCompleted, QuestEvent, QuestGraph, QuestSnapshot,
};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no quest pack with tag '{0}'")]
    UnknownQuest(String),

    #[error("quest '{0}' is already open")]
    QuestAlreadyOpen(String),

    #[error("dispatcher is no longer running")]
    Closed,

    #[error(transparent)]
    Graph(#[from] GraphError),
}

type Reply<T> = oneshot::Sender<Result<T, DispatchError>>;

/// Request sent to the dispatcher task
#[derive(Debug)]
pub enum DispatchCommand {
    OpenQuest {
        quest_tag: String,
        reply: Reply<()>,
    },
    /// Removes every player, then disposes the graph and reports leaked nodes
    CloseQuest {
        quest_tag: String,
        reply: Reply<Vec<(NodeId, u32)>>,
    },
    /// `root` defaults to the pack's start node
    AddPlayer {
        quest_tag: String,
        player: PlayerId,
        root: Option<NodeId>,
        reply: Reply<()>,
    },
    RestorePlayer {
        quest_tag: String,
        player: PlayerId,
        snapshot: QuestSnapshot,
        reply: Reply<()>,
    },
    RemovePlayer {
        quest_tag: String,
        player: PlayerId,
        reply: Reply<()>,
    },
    /// Evaluates from the player's current node
    Evaluate {
        quest_tag: String,
        player: PlayerId,
        policy: EvaluationPolicy,
        reply: Reply<EvaluationOutcome>,
    },
    /// Forwarded to the player's nodes on every open quest
    SendEvent {
        player: PlayerId,
        event: QuestEvent,
        reply: Reply<usize>,
    },
    CaptureSnapshot {
        quest_tag: String,
        player: PlayerId,
        reply: Reply<QuestSnapshot>,
    },
    Shutdown,
}

/// Owner of all open quest graphs
pub struct QuestDispatcher {
    packs: Arc<QuestPackRegistry>,
    graphs: HashMap<String, QuestGraph>,
    completed_tx: broadcast::Sender<QuestCompleted>,
}

impl QuestDispatcher {
    pub fn new(
        packs: Arc<QuestPackRegistry>,
        completed_tx: broadcast::Sender<QuestCompleted>,
    ) -> Self {
        Self {
            packs,
            graphs: HashMap::new(),
            completed_tx,
        }
    }

    /// Process commands until shutdown, draining re-evaluations every `tick`
    pub async fn run(mut self, mut commands: mpsc::Receiver<DispatchCommand>, tick: Duration) {
        let mut interval = tokio::time::interval(tick);
        info!("Quest dispatcher started ({:?} tick)", tick);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(DispatchCommand::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                _ = interval.tick() => self.tick(),
            }
        }

        let tags: Vec<String> = self.graphs.keys().cloned().collect();
        for tag in tags {
            let _ = self.close_quest(&tag);
        }
        info!("Quest dispatcher stopped");
    }

    fn handle(&mut self, command: DispatchCommand) {
        match command {
            DispatchCommand::OpenQuest { quest_tag, reply } => {
                let _ = reply.send(self.open_quest(&quest_tag));
            }
            DispatchCommand::CloseQuest { quest_tag, reply } => {
                let _ = reply.send(self.close_quest(&quest_tag));
            }
            DispatchCommand::AddPlayer {
                quest_tag,
                player,
                root,
                reply,
            } => {
                let _ = reply.send(self.add_player(&quest_tag, &player, root));
            }
            DispatchCommand::RestorePlayer {
                quest_tag,
                player,
                snapshot,
                reply,
            } => {
                let result = self.reject_registered(&quest_tag, &player).and_then(|()| {
                    self.with_graph(&quest_tag, |graph| graph.restore_player(&player, &snapshot))
                });
                let _ = reply.send(result);
            }
            DispatchCommand::RemovePlayer {
                quest_tag,
                player,
                reply,
            } => {
                let result = self.with_graph(&quest_tag, |graph| graph.remove_player(&player));
                let _ = reply.send(result);
            }
            DispatchCommand::Evaluate {
                quest_tag,
                player,
                policy,
                reply,
            } => {
                let result = self.with_graph(&quest_tag, |graph| {
                    let node = graph
                        .cursor(&player)
                        .map_or(Cursor::NONE.node, |cursor| cursor.node);
                    graph.evaluate(node, &player, policy)
                });
                let _ = reply.send(result);
            }
            DispatchCommand::SendEvent {
                player,
                event,
                reply,
            } => {
                let notified = self
                    .graphs
                    .values_mut()
                    .map(|graph| graph.dispatch_event(&player, &event))
                    .sum();
                let _ = reply.send(Ok(notified));
            }
            DispatchCommand::CaptureSnapshot {
                quest_tag,
                player,
                reply,
            } => {
                let result = self.with_graph(&quest_tag, |graph| graph.capture_snapshot(&player));
                let _ = reply.send(result);
            }
            DispatchCommand::Shutdown => {}
        }
    }

    fn tick(&mut self) {
        let mut broken = Vec::new();
        for (tag, graph) in self.graphs.iter_mut() {
            match graph.process_reevaluations() {
                Ok(outcomes) if !outcomes.is_empty() => debug!(
                    "Quest '{}': ran {} queued re-evaluations",
                    tag,
                    outcomes.len()
                ),
                Ok(_) => {}
                Err(e) => broken.push((tag.clone(), e)),
            }
        }

        for (tag, e) in broken {
            self.close_inconsistent(&tag, &e);
        }
    }

    fn open_quest(&mut self, quest_tag: &str) -> Result<(), DispatchError> {
        if self.graphs.contains_key(quest_tag) {
            return Err(DispatchError::QuestAlreadyOpen(quest_tag.to_string()));
        }
        if self.packs.get(quest_tag).is_none() {
            return Err(DispatchError::UnknownQuest(quest_tag.to_string()));
        }

        let loader: Arc<dyn NodeLoader> = self.packs.clone();
        self.open_graph(QuestGraph::with_notifier(
            quest_tag,
            loader,
            self.completed_tx.clone(),
        ))
    }

    /// Take ownership of a graph built elsewhere, keyed by its quest tag
    pub fn open_graph(&mut self, graph: QuestGraph) -> Result<(), DispatchError> {
        let quest_tag = graph.quest_tag().to_string();
        if self.graphs.contains_key(&quest_tag) {
            return Err(DispatchError::QuestAlreadyOpen(quest_tag));
        }
        info!("Opened quest '{}'", quest_tag);
        self.graphs.insert(quest_tag, graph);
        Ok(())
    }

    fn close_quest(&mut self, quest_tag: &str) -> Result<Vec<(NodeId, u32)>, DispatchError> {
        let mut graph = self
            .graphs
            .remove(quest_tag)
            .ok_or_else(|| DispatchError::UnknownQuest(quest_tag.to_string()))?;

        let players: Vec<PlayerId> = graph.players().cloned().collect();
        for player in &players {
            if let Err(e) = graph.remove_player(player) {
                warn!("Quest '{}': failed to remove player {}: {}", quest_tag, player, e);
            }
        }

        let leaks = graph.dispose();
        info!(
            "Closed quest '{}' ({} players removed)",
            quest_tag,
            players.len()
        );
        Ok(leaks)
    }

    fn add_player(
        &mut self,
        quest_tag: &str,
        player: &PlayerId,
        root: Option<NodeId>,
    ) -> Result<(), DispatchError> {
        self.reject_registered(quest_tag, player)?;
        let root = match root {
            Some(root) => root,
            None => {
                self.packs
                    .get(quest_tag)
                    .ok_or_else(|| DispatchError::UnknownQuest(quest_tag.to_string()))?
                    .start
            }
        };
        self.with_graph(quest_tag, |graph| graph.add_player(player, root))
    }

    /// Adding a player twice is a caller mistake; keep it away from the graph
    fn reject_registered(&self, quest_tag: &str, player: &PlayerId) -> Result<(), DispatchError> {
        let graph = self
            .graphs
            .get(quest_tag)
            .ok_or_else(|| DispatchError::UnknownQuest(quest_tag.to_string()))?;
        if graph.player_state(player).is_some() {
            return Err(GraphError::PlayerAlreadyRegistered(player.clone()).into());
        }
        Ok(())
    }

    /// Run `op` on an open graph. A graph that reports an invariant
    /// violation is closed.
    fn with_graph<T>(
        &mut self,
        quest_tag: &str,
        op: impl FnOnce(&mut QuestGraph) -> Result<T, GraphError>,
    ) -> Result<T, DispatchError> {
        let graph = self
            .graphs
            .get_mut(quest_tag)
            .ok_or_else(|| DispatchError::UnknownQuest(quest_tag.to_string()))?;

        let result = op(graph);
        if let Err(e) = &result {
            if e.is_invariant_violation() {
                self.close_inconsistent(quest_tag, e);
            }
        }
        result.map_err(DispatchError::from)
    }

    fn close_inconsistent(&mut self, quest_tag: &str, e: &GraphError) {
        error!("Quest '{}' is inconsistent ({}), closing it", quest_tag, e);
        let _ = self.close_quest(quest_tag);
    }
}

/// Async front end to a running dispatcher
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<DispatchCommand>,
    completed_tx: broadcast::Sender<QuestCompleted>,
}

impl DispatcherHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> DispatchCommand,
    ) -> Result<T, DispatchError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| DispatchError::Closed)?;
        rx.await.map_err(|_| DispatchError::Closed)?
    }

    pub async fn open_quest(&self, quest_tag: &str) -> Result<(), DispatchError> {
        self.request(|reply| DispatchCommand::OpenQuest {
            quest_tag: quest_tag.to_string(),
            reply,
        })
        .await
    }

    pub async fn close_quest(&self, quest_tag: &str) -> Result<Vec<(NodeId, u32)>, DispatchError> {
        self.request(|reply| DispatchCommand::CloseQuest {
            quest_tag: quest_tag.to_string(),
            reply,
        })
        .await
    }

    pub async fn add_player(
        &self,
        quest_tag: &str,
        player: &PlayerId,
        root: Option<NodeId>,
    ) -> Result<(), DispatchError> {
        self.request(|reply| DispatchCommand::AddPlayer {
            quest_tag: quest_tag.to_string(),
            player: player.clone(),
            root,
            reply,
        })
        .await
    }

    pub async fn restore_player(
        &self,
        quest_tag: &str,
        player: &PlayerId,
        snapshot: QuestSnapshot,
    ) -> Result<(), DispatchError> {
        self.request(|reply| DispatchCommand::RestorePlayer {
            quest_tag: quest_tag.to_string(),
            player: player.clone(),
            snapshot,
            reply,
        })
        .await
    }

    pub async fn remove_player(
        &self,
        quest_tag: &str,
        player: &PlayerId,
    ) -> Result<(), DispatchError> {
        self.request(|reply| DispatchCommand::RemovePlayer {
            quest_tag: quest_tag.to_string(),
            player: player.clone(),
            reply,
        })
        .await
    }

    pub async fn evaluate(
        &self,
        quest_tag: &str,
        player: &PlayerId,
        policy: EvaluationPolicy,
    ) -> Result<EvaluationOutcome, DispatchError> {
        self.request(|reply| DispatchCommand::Evaluate {
            quest_tag: quest_tag.to_string(),
            player: player.clone(),
            policy,
            reply,
        })
        .await
    }

    /// Returns how many nodes received the event
    pub async fn send_event(
        &self,
        player: &PlayerId,
        event: QuestEvent,
    ) -> Result<usize, DispatchError> {
        self.request(|reply| DispatchCommand::SendEvent {
            player: player.clone(),
            event,
            reply,
        })
        .await
    }

    pub async fn capture_snapshot(
        &self,
        quest_tag: &str,
        player: &PlayerId,
    ) -> Result<QuestSnapshot, DispatchError> {
        self.request(|reply| DispatchCommand::CaptureSnapshot {
            quest_tag: quest_tag.to_string(),
            player: player.clone(),
            reply,
        })
        .await
    }

    pub fn subscribe_completed(&self) -> broadcast::Receiver<QuestCompleted> {
        self.completed_tx.subscribe()
    }

    pub async fn shutdown(&self) -> Result<(), DispatchError> {
        self.tx
            .send(DispatchCommand::Shutdown)
            .await
            .map_err(|_| DispatchError::Closed)
    }
}

/// Spawn the dispatcher task and return a handle to it
pub fn spawn_dispatcher(
    packs: Arc<QuestPackRegistry>,
    tick: Duration,
) -> (DispatcherHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(256);
    let (completed_tx, _) = broadcast::channel(256);

    let dispatcher = QuestDispatcher::new(packs, completed_tx.clone());
    let task = tokio::spawn(dispatcher.run(rx, tick));

    (DispatcherHandle { tx, completed_tx }, task)
}
