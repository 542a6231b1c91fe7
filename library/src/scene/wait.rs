use std::time::Duration;

use log::{debug, info, warn};

use crate::animation::TimePoint;
use crate::reference::{NodeId, ObjectId};
use crate::task::{LogProgress, ProgressHost};

use super::DataSet;

impl DataSet {
    /// Hands finished background tasks to their owners. Waits up to `timeout` for the first one
    /// and returns how many were handled.
    pub fn process_events(&mut self, timeout: Option<Duration>) -> usize {
        let mut handled = 0;
        let mut timeout = timeout;
        while let Some(done) = self.tasks.next_finished(timeout.take()) {
            self.task_finished(done);
            handled += 1;
        }
        handled
    }

    /// Processes background results until `ready` holds.
    ///
    /// Returns false if the wait was canceled through `progress` (or the interrupt token when no
    /// host is given), or if nothing is left running that could make `ready` true. Canceling
    /// also cancels all running tasks.
    pub fn wait_until(
        &mut self,
        mut ready: impl FnMut(&mut DataSet) -> bool,
        message: &str,
        progress: Option<&mut dyn ProgressHost>,
    ) -> bool {
        if ready(self) {
            return true;
        }

        let mut fallback = LogProgress::new(self.interrupt.clone());
        let progress: &mut dyn ProgressHost = match progress {
            Some(progress) => progress,
            None => &mut fallback,
        };
        progress.set_message(message);
        info!("{} ({} task(s) running)", message, self.tasks.pending_count());

        let poll = self.config.wait_poll_interval();
        loop {
            if progress.is_canceled() {
                info!("Wait canceled: {}", message);
                self.tasks.cancel_all();
                self.interrupt.reset();
                return false;
            }
            if !self.tasks.has_pending() {
                warn!("Nothing left to wait for: {}", message);
                return false;
            }
            let handled = self.process_events(Some(poll));
            if handled > 0 {
                debug!("Handled {} task result(s) while waiting", handled);
                if ready(self) {
                    return true;
                }
            }
        }
    }

    /// Waits until evaluating `object` at `time` no longer reports a pending status.
    pub fn wait_until_ready(
        &mut self,
        object: ObjectId,
        time: TimePoint,
        message: &str,
        progress: Option<&mut dyn ProgressHost>,
    ) -> bool {
        if !self.contains(object) {
            warn!("Cannot wait for unknown {}", object);
            return false;
        }
        self.wait_until(
            |dataset| !dataset.evaluate(object, time).status().is_pending(),
            message,
            progress,
        )
    }

    /// Waits until the node's pipeline output at `time` no longer reports a pending status.
    pub fn wait_until_node_ready(
        &mut self,
        node: NodeId,
        time: TimePoint,
        message: &str,
        progress: Option<&mut dyn ProgressHost>,
    ) -> bool {
        if self.node(node).is_none() {
            warn!("Cannot wait for unknown {}", node);
            return false;
        }
        self.wait_until(
            |dataset| match dataset.eval_pipeline(node, time) {
                Ok(state) => !state.status().is_pending(),
                Err(_) => true,
            },
            message,
            progress,
        )
    }
}
