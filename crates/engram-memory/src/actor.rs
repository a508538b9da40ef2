//! Single-writer actor
//!
//! The actor task owns the `MemoryGraph` and applies every mutation in
//! arrival order. After each mutating command it publishes an immutable
//! snapshot; readers rank against the latest snapshot without waiting on
//! the writer.

use crate::engine::MemoryGraph;
use crate::gate::{AdminCommand, AdminResult, WriteGate};
use crate::persistence::{Persistence, SaveOutcome};
use crate::ranker::{MomentumTable, RankRequest, RankedResults};
use crate::types::{EdgeOutcome, EdgeWrite, FactWrite, GraphStats, WriteOutcome};
use engram_core::{Error, NodeId, Result, SessionId};
use engram_graph::{MaintenanceReport, ReleaseResult};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Configuration for the actor
#[derive(Debug, Clone)]
pub struct ActorConfig {
    /// Channel buffer size for commands
    pub command_buffer_size: usize,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            command_buffer_size: 256,
        }
    }
}

/// Commands sent to the actor
#[derive(Debug)]
pub enum MemoryCommand {
    WriteFact {
        write: FactWrite,
        reply_tx: oneshot::Sender<Result<WriteOutcome>>,
    },
    WriteEdge {
        write: EdgeWrite,
        reply_tx: oneshot::Sender<Result<EdgeOutcome>>,
    },
    StartSession {
        reply_tx: oneshot::Sender<Result<SessionId>>,
    },
    EndSession {
        session: SessionId,
        reply_tx: oneshot::Sender<Result<ReleaseResult>>,
    },
    TouchSession {
        session: SessionId,
        reply_tx: oneshot::Sender<Result<()>>,
    },
    Admin {
        token: Option<String>,
        command: AdminCommand,
        reply_tx: oneshot::Sender<Result<AdminResult>>,
    },
    /// Record accesses for nodes a reader returned
    TouchHits {
        nodes: Vec<NodeId>,
        reply_tx: oneshot::Sender<Result<usize>>,
    },
    /// Run a full maintenance pass now
    Maintain {
        reply_tx: oneshot::Sender<Result<Vec<MaintenanceReport>>>,
    },
    /// Stop the actor
    Shutdown,
}

/// Owns the graph; reachable only through a `MemoryHandle`
pub struct MemoryActor {
    graph: MemoryGraph,
    gate: WriteGate,
    command_rx: mpsc::Receiver<MemoryCommand>,
    snapshot_tx: watch::Sender<Arc<MemoryGraph>>,
}

impl MemoryActor {
    /// Start the actor task and return a handle to it
    pub fn spawn(
        graph: MemoryGraph,
        gate: WriteGate,
        config: ActorConfig,
    ) -> (MemoryHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer_size.max(1));
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(graph.clone()));
        let momentum = MomentumTable::from_config(&graph.config().rank);

        let actor = Self {
            graph,
            gate,
            command_rx,
            snapshot_tx,
        };
        let task = tokio::spawn(actor.run());

        let handle = MemoryHandle {
            command_tx,
            snapshot_rx,
            momentum: Arc::new(Mutex::new(momentum)),
            persistence: None,
        };
        (handle, task)
    }

    async fn run(mut self) {
        info!("Memory actor started");

        while let Some(command) = self.command_rx.recv().await {
            match command {
                MemoryCommand::WriteFact { write, reply_tx } => {
                    let result = self.gate.write_fact(&mut self.graph, write);
                    self.publish();
                    let _ = reply_tx.send(result);
                }
                MemoryCommand::WriteEdge { write, reply_tx } => {
                    let result = self.gate.write_edge(&mut self.graph, write);
                    self.publish();
                    let _ = reply_tx.send(result);
                }
                MemoryCommand::StartSession { reply_tx } => {
                    let result = self.graph.start_session();
                    self.publish();
                    let _ = reply_tx.send(result);
                }
                MemoryCommand::EndSession { session, reply_tx } => {
                    let result = self.graph.end_session(session);
                    self.publish();
                    let _ = reply_tx.send(result);
                }
                MemoryCommand::TouchSession { session, reply_tx } => {
                    let result = self.graph.touch_session(session);
                    self.publish();
                    let _ = reply_tx.send(result);
                }
                MemoryCommand::Admin {
                    token,
                    command,
                    reply_tx,
                } => {
                    let result = self.gate.admin(&mut self.graph, token.as_deref(), command);
                    self.publish();
                    let _ = reply_tx.send(result);
                }
                MemoryCommand::TouchHits { nodes, reply_tx } => {
                    let result = self.graph.touch_hits(&nodes);
                    self.publish();
                    let _ = reply_tx.send(result);
                }
                MemoryCommand::Maintain { reply_tx } => {
                    let result = self.graph.maintain();
                    self.publish();
                    let _ = reply_tx.send(result);
                }
                MemoryCommand::Shutdown => {
                    info!("Memory actor shutting down");
                    break;
                }
            }
        }

        info!("Memory actor stopped");
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(Arc::new(self.graph.clone()));
        debug!("Published graph snapshot");
    }
}

/// Clone-able access to a running actor
#[derive(Debug, Clone)]
pub struct MemoryHandle {
    command_tx: mpsc::Sender<MemoryCommand>,
    snapshot_rx: watch::Receiver<Arc<MemoryGraph>>,
    momentum: Arc<Mutex<MomentumTable>>,
    persistence: Option<Arc<Persistence>>,
}

impl MemoryHandle {
    /// Attach snapshot persistence
    pub fn with_persistence(mut self, persistence: Arc<Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> MemoryCommand,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| Error::ChannelClosed)?;
        reply_rx.await.map_err(|_| Error::ChannelClosed)?
    }

    // ========== Writes ==========

    pub async fn write_fact(&self, write: FactWrite) -> Result<WriteOutcome> {
        self.request(|reply_tx| MemoryCommand::WriteFact { write, reply_tx })
            .await
    }

    pub async fn write_edge(&self, write: EdgeWrite) -> Result<EdgeOutcome> {
        self.request(|reply_tx| MemoryCommand::WriteEdge { write, reply_tx })
            .await
    }

    pub async fn start_session(&self) -> Result<SessionId> {
        self.request(|reply_tx| MemoryCommand::StartSession { reply_tx })
            .await
    }

    pub async fn end_session(&self, session: SessionId) -> Result<ReleaseResult> {
        self.request(|reply_tx| MemoryCommand::EndSession { session, reply_tx })
            .await
    }

    pub async fn touch_session(&self, session: SessionId) -> Result<()> {
        self.request(|reply_tx| MemoryCommand::TouchSession { session, reply_tx })
            .await
    }

    pub async fn admin(&self, token: Option<&str>, command: AdminCommand) -> Result<AdminResult> {
        let token = token.map(str::to_string);
        self.request(|reply_tx| MemoryCommand::Admin {
            token,
            command,
            reply_tx,
        })
        .await
    }

    pub async fn touch_hits(&self, nodes: Vec<NodeId>) -> Result<usize> {
        self.request(|reply_tx| MemoryCommand::TouchHits { nodes, reply_tx })
            .await
    }

    pub async fn maintain(&self) -> Result<Vec<MaintenanceReport>> {
        self.request(|reply_tx| MemoryCommand::Maintain { reply_tx })
            .await
    }

    /// Stop the actor; later commands fail with `ChannelClosed`
    pub async fn shutdown(&self) -> Result<()> {
        self.command_tx
            .send(MemoryCommand::Shutdown)
            .await
            .map_err(|_| Error::ChannelClosed)
    }

    // ========== Reads ==========

    /// Latest published snapshot
    pub fn snapshot(&self) -> Arc<MemoryGraph> {
        self.snapshot_rx.borrow().clone()
    }

    /// Rank against the latest snapshot, updating this handle's momentum
    pub fn rank(&self, request: &RankRequest) -> Result<RankedResults> {
        let snapshot = self.snapshot();
        let mut momentum = self
            .momentum
            .lock()
            .map_err(|_| Error::Internal("Failed to acquire momentum lock".to_string()))?;
        snapshot.rank(&mut momentum, request)
    }

    /// Rank, then record accesses on the returned nodes
    pub async fn rank_and_touch(&self, request: &RankRequest) -> Result<RankedResults> {
        let results = self.rank(request)?;
        let hits: Vec<NodeId> = results.primary.iter().map(|hit| hit.node).collect();
        if !hits.is_empty() {
            self.touch_hits(hits).await?;
        }
        Ok(results)
    }

    pub fn stats(&self) -> GraphStats {
        let mut stats = self.snapshot().stats();
        stats.degraded = self
            .persistence
            .as_ref()
            .is_some_and(|persistence| persistence.is_degraded());
        stats
    }

    // ========== Persistence ==========

    /// Save the latest snapshot; the actor keeps accepting writes meanwhile
    pub async fn save(&self) -> Result<SaveOutcome> {
        let persistence = self
            .persistence
            .as_ref()
            .ok_or_else(|| Error::Configuration("no persistence attached".to_string()))?;
        let snapshot = self.snapshot();
        persistence.save(&snapshot).await
    }
}
