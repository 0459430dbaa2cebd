//! Progress event channel between the engine and its observers

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::task::{TaskKind, TaskStatus};
use crate::types::{AgentId, GoalId, TaskId, UnitId};

/// Progress events emitted by every level of the hierarchy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    GoalReceived {
        goal_id: GoalId,
        text: String,
    },
    PlanReady {
        goal_id: GoalId,
        implementation: usize,
        verification: usize,
    },
    IterationStarted {
        goal_id: GoalId,
        iteration: u32,
    },
    TaskStarted {
        task_id: TaskId,
        kind: TaskKind,
        title: String,
    },
    AttemptFinished {
        task_id: TaskId,
        attempt: u32,
        success: bool,
        reason: String,
    },
    TaskFinished {
        task_id: TaskId,
        status: TaskStatus,
    },
    CapabilityInvoked {
        agent_id: AgentId,
        capability: String,
        success: bool,
    },
    GoalCompleted {
        goal_id: GoalId,
        iterations: u32,
    },
    Escalated {
        goal_id: GoalId,
        reason: String,
    },
    CompanyCreated {
        unit_id: UnitId,
        domain: String,
    },
    IncidentOpened {
        service: String,
        failures: u32,
    },
    IncidentResolved {
        service: String,
    },
    HumanEscalation {
        reason: String,
    },
}

/// Sending side handed to engine components. Emission never fails.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<Event>>,
}

impl EventSink {
    /// A sink that drops everything
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: Event) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

/// Observer side of the event stream
pub struct EventChannel {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventChannel {
    /// Create a channel; returns the observer and the sink to hand out
    pub fn new() -> (Self, EventSink) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, EventSink { tx: Some(tx) })
    }

    /// Try to receive an event (non-blocking)
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Receive the next event; `None` once every sink is dropped
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Everything currently queued
    pub fn drain(&mut self) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            out.push(event);
        }
        out
    }
}
