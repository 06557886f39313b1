// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use rust_decimal::Decimal;
use tokio::sync::broadcast;

use bard_model::Message;

use crate::aggregate::StreamingSnapshot;
use crate::session::ProjectId;

/// Events emitted by the orchestrator.  Every event names its project so
/// observers watching multiple projects can route without extra lookups.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    SessionCreated {
        project_id: ProjectId,
    },
    SessionDeleted {
        project_id: ProjectId,
    },
    MessageAdded {
        project_id: ProjectId,
        message: Message,
    },
    /// The streaming draft grew; carries the full accumulated state.
    StreamingUpdate {
        project_id: ProjectId,
        snapshot: StreamingSnapshot,
    },
    LoadingChanged {
        project_id: ProjectId,
        is_loading: bool,
    },
    CostUpdated {
        project_id: ProjectId,
        total_cost: Decimal,
    },
    ContextUsageUpdated {
        project_id: ProjectId,
        input_tokens: u32,
    },
}

const BUS_CAPACITY: usize = 256;

/// Fire-and-forget fan-out to any number of subscribers.
///
/// Observers can never block or fail the orchestrator: sends to a bus with
/// no (or lagging) receivers are silently dropped, and each subscriber reads
/// at its own pace from its own buffered receiver.
#[derive(Clone)]
pub struct ObserverBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl ObserverBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for ObserverBus {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
