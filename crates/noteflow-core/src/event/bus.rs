//! Bus de eventos en proceso basado en `tokio::sync::broadcast`.
//!
//! Además del fan-out en vivo guarda un journal acotado con los últimos
//! eventos, consultable por job.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::Utc;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::types::{PipelineEvent, PipelineEventKind};

pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    seq: AtomicU64,
    journal: Mutex<VecDeque<PipelineEvent>>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self { tx,
               seq: AtomicU64::new(0),
               journal: Mutex::new(VecDeque::with_capacity(capacity)),
               capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Emite un evento. Sin suscriptores no es error: el journal conserva
    /// el hecho.
    pub fn emit(&self, job_id: Uuid, kind: PipelineEventKind) -> PipelineEvent {
        let mut journal = self.journal.lock().unwrap_or_else(|e| e.into_inner());
        let ev = PipelineEvent { seq: self.seq.fetch_add(1, Ordering::SeqCst),
                                 job_id,
                                 kind,
                                 ts: Utc::now() };
        if journal.len() == self.capacity {
            journal.pop_front();
        }
        journal.push_back(ev.clone());
        let _ = self.tx.send(ev.clone());
        ev
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Eventos retenidos de un job, en orden de emisión.
    pub fn recent(&self, job_id: Uuid) -> Vec<PipelineEvent> {
        self.journal
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.job_id == job_id)
            .cloned()
            .collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_EVENT_CAPACITY)
    }
}
