use log::info;

use super::CancellationToken;

/// Whatever shows progress to the user while the pipeline waits for background work.
pub trait ProgressHost {
    fn set_message(&mut self, message: &str);

    /// Polled between waits; returning true aborts the wait.
    fn is_canceled(&self) -> bool;

    fn set_progress(&mut self, _value: usize, _maximum: usize) {}
}

/// Progress host used when the caller supplies none: messages go to the log and cancellation
/// comes from a token that other threads may trigger.
pub struct LogProgress {
    token: CancellationToken,
    last_message: String,
}

impl LogProgress {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            last_message: String::new(),
        }
    }

    pub fn last_message(&self) -> &str {
        &self.last_message
    }
}

impl ProgressHost for LogProgress {
    fn set_message(&mut self, message: &str) {
        if message != self.last_message {
            info!("{}", message);
            self.last_message = message.to_string();
        }
    }

    fn is_canceled(&self) -> bool {
        self.token.is_canceled()
    }

    fn set_progress(&mut self, value: usize, maximum: usize) {
        info!("{}: {}/{}", self.last_message, value, maximum);
    }
}
