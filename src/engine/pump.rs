//! The execution pump
//!
//! Alternates between runtime jobs and native callbacks on the owning
//! thread until the script has nothing left to do:
//!
//! ```text
//! loop:
//!   stop requested?            -> leave (caller reports Cancelled)
//!   run up to job_slice jobs
//!   drain native callbacks
//!   progress?                  -> yield, go again
//!   native work in flight?     -> sleep until a callback, idle or stop
//!   completion settled?        -> done
//!   otherwise                  -> Stalled
//! ```

use tracing::trace;

use super::{Engine, ExecutionStats};
use crate::error::{ExecutionError, ScriptFault};
use crate::queue::NativeCall;

/// Why a sleeping pump woke up
enum Wake {
    Call(Option<NativeCall>),
    Idle,
    Stop,
}

impl Engine {
    pub(super) async fn pump(&mut self, job_slice: usize, stats: &mut ExecutionStats) -> Result<(), ExecutionError> {
        let sender = self.queue.sender();

        loop {
            if self.stop.is_requested() {
                return Ok(());
            }
            stats.pump_iterations += 1;
            let in_flight = self.queue.in_flight();

            let jobs = self
                .runtime
                .advance(job_slice)
                .map_err(|fault| self.pump_error(fault))?;

            let queue = &mut self.queue;
            let drained = self.runtime.with(|ctx| queue.drain_all(&ctx))?;
            let calls = drained.map_err(|fault| self.pump_error(fault))?;

            stats.jobs_run += jobs as u64;
            stats.native_calls_run += calls as u64;

            if jobs > 0 || calls > 0 {
                tokio::task::yield_now().await;
                continue;
            }

            if in_flight > 0 {
                trace!(in_flight, "Pump waiting for native work");
                let wake = tokio::select! {
                    call = self.queue.next() => Wake::Call(call),
                    _ = sender.idle() => Wake::Idle,
                    _ = self.stop.requested() => Wake::Stop,
                };
                match wake {
                    Wake::Call(Some(call)) => self.queue.push_front(call),
                    // Every sender is gone; nothing more can arrive
                    Wake::Call(None) => return self.settled_or_stalled(),
                    Wake::Idle | Wake::Stop => {}
                }
                continue;
            }

            return self.settled_or_stalled();
        }
    }

    fn settled_or_stalled(&self) -> Result<(), ExecutionError> {
        if self.tracker.is_settled() {
            Ok(())
        } else {
            Err(ExecutionError::Stalled)
        }
    }

    /// A script error escaping a job or a native callback
    fn pump_error(&self, fault: ScriptFault) -> ExecutionError {
        if self.stop.is_requested() {
            ExecutionError::Cancelled
        } else {
            fault.into_runtime_error()
        }
    }
}
