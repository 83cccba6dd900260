//! Native Call Queue
//!
//! Native capabilities finish their work on host threads, but anything that
//! touches script-visible state has to run on the runtime's own thread. This
//! queue is the handoff point: many senders, one draining consumer.

use rquickjs::Ctx;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use crate::error::{catch_fault, ScriptFault};

/// A deferred unit of work run on the runtime thread with the script context
pub type NativeCall = Box<dyn for<'js> FnOnce(&Ctx<'js>) -> rquickjs::Result<()> + Send + 'static>;

/// Box a closure as a `NativeCall`
pub fn native_call<F>(f: F) -> NativeCall
where
    F: for<'js> FnOnce(&Ctx<'js>) -> rquickjs::Result<()> + Send + 'static,
{
    Box::new(f)
}

/// Count of outstanding native work, with a wakeup when it drops to zero
#[derive(Debug, Default)]
struct InFlightCount {
    count: AtomicUsize,
    idle: Notify,
}

/* ===================== Sender ===================== */

/// Cloneable, thread-safe producer side of the queue
#[derive(Clone)]
pub struct NativeCallSender {
    tx: mpsc::UnboundedSender<NativeCall>,
    in_flight: Arc<InFlightCount>,
}

impl NativeCallSender {
    /// Append a callback. Never blocks; returns false if the engine is gone.
    pub fn enqueue(&self, call: NativeCall) -> bool {
        if self.tx.send(call).is_err() {
            warn!("Native call dropped: queue is closed");
            return false;
        }
        true
    }

    /// Mark native work as outstanding until the returned guard is dropped.
    ///
    /// Drop the guard only after the completion callback has been enqueued,
    /// otherwise the pump may decide there is nothing left to wait for.
    pub fn begin(&self) -> InFlight {
        self.in_flight.count.fetch_add(1, Ordering::SeqCst);
        InFlight {
            counter: self.in_flight.clone(),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.count.load(Ordering::SeqCst)
    }

    /// Resolve once no native work is outstanding. Work that is aborted
    /// drops its guard without enqueueing anything; this is how a waiting
    /// pump finds out.
    pub async fn idle(&self) {
        loop {
            if self.in_flight() == 0 {
                return;
            }
            self.in_flight.idle.notified().await;
        }
    }
}

/// Guard for one piece of outstanding native work
#[derive(Debug)]
pub struct InFlight {
    counter: Arc<InFlightCount>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.counter.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.counter.idle.notify_one();
        }
    }
}

/* ===================== Queue ===================== */

/// Consumer side, owned by the engine and drained on the runtime thread
pub struct NativeCallQueue {
    tx: mpsc::UnboundedSender<NativeCall>,
    rx: mpsc::UnboundedReceiver<NativeCall>,
    pending: Option<NativeCall>,
    in_flight: Arc<InFlightCount>,
}

impl Default for NativeCallQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeCallQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            pending: None,
            in_flight: Arc::new(InFlightCount::default()),
        }
    }

    pub fn sender(&self) -> NativeCallSender {
        NativeCallSender {
            tx: self.tx.clone(),
            in_flight: self.in_flight.clone(),
        }
    }

    /// Number of native operations still running on host threads
    pub fn in_flight(&self) -> usize {
        self.in_flight.count.load(Ordering::SeqCst)
    }

    /// Run every callback present right now, in enqueue order.
    ///
    /// Callbacks enqueued while draining wait for the next pass. Every
    /// collected callback runs even if an earlier one fails; the first
    /// failure is returned.
    pub(crate) fn drain_all<'js>(&mut self, ctx: &Ctx<'js>) -> Result<usize, ScriptFault> {
        let mut batch: Vec<NativeCall> = self.pending.take().into_iter().collect();
        while let Ok(call) = self.rx.try_recv() {
            batch.push(call);
        }
        if batch.is_empty() {
            return Ok(0);
        }

        debug!(count = batch.len(), "Draining native calls");
        let ran = batch.len();
        let mut first_fault = None;
        for call in batch {
            if let Err(err) = call(ctx) {
                let fault = catch_fault(ctx, err);
                warn!(error = %fault.message, "Native call failed");
                first_fault.get_or_insert(fault);
            }
        }

        match first_fault {
            Some(fault) => Err(fault),
            None => Ok(ran),
        }
    }

    /// Wait for the next callback to arrive
    pub async fn next(&mut self) -> Option<NativeCall> {
        self.rx.recv().await
    }

    /// Put a callback received through `next` back at the head of the line
    /// for the following drain
    pub(crate) fn push_front(&mut self, call: NativeCall) {
        self.pending = Some(call);
    }

    /// Drop everything queued without running it
    pub fn discard(&mut self) -> usize {
        let mut dropped = usize::from(self.pending.take().is_some());
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(count = dropped, "Discarded stale native calls");
        }
        dropped
    }
}
