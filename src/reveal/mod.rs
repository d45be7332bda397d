//! Typewriter-style reveal of streamed text.
//!
//! Fragments arrive in bursts; the display catches up one character per
//! frame. Each new fragment cancels the running reveal task and starts a
//! fresh one from whatever prefix is already on screen, so the display only
//! ever grows and never restarts from the beginning.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum RevealError {
    #[error("reveal task panicked")]
    Panicked,
}

/// Animates a growing text into a `watch` channel.
///
/// Must be used from within a tokio runtime.
pub struct RevealDriver {
    frame: Duration,
    display: Arc<watch::Sender<String>>,
    cumulative: String,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    panicked: bool,
}

impl RevealDriver {
    pub fn new(frame: Duration, display: Arc<watch::Sender<String>>) -> Self {
        Self {
            frame: frame.max(Duration::from_millis(1)),
            display,
            cumulative: String::new(),
            cancel: CancellationToken::new(),
            task: None,
            panicked: false,
        }
    }

    /// Everything pushed so far.
    pub fn cumulative(&self) -> &str {
        &self.cumulative
    }

    /// Appends a fragment and restarts the reveal toward the new text.
    pub fn push(&mut self, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        self.cumulative.push_str(fragment);
        self.stop();

        self.cancel = CancellationToken::new();
        self.task = Some(tokio::spawn(reveal(
            self.cumulative.clone(),
            Arc::clone(&self.display),
            self.frame,
            self.cancel.clone(),
        )));
    }

    /// Stops animating, shows the full text and returns it.
    pub async fn finish(mut self) -> Result<String, RevealError> {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if matches!(task.await, Err(e) if e.is_panic()) {
                self.panicked = true;
            }
        }
        if self.panicked {
            return Err(RevealError::Panicked);
        }

        let full = std::mem::take(&mut self.cumulative);
        self.display.send_replace(full.clone());
        Ok(full)
    }

    // Cancels the running task, noting whether it had already panicked.
    fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if task.is_finished() && matches!(task.now_or_never(), Some(Err(e)) if e.is_panic()) {
                self.panicked = true;
            }
        }
    }
}

impl Drop for RevealDriver {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn reveal(
    target: String,
    display: Arc<watch::Sender<String>>,
    frame: Duration,
    cancel: CancellationToken,
) {
    let mut ticks = tokio::time::interval(frame);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            _ = ticks.tick() => {}
        }

        let mut done = false;
        display.send_if_modified(|shown| {
            // A newer task owns the display once it is no longer our prefix.
            if !target.starts_with(shown.as_str()) {
                done = true;
                return false;
            }
            match target[shown.len()..].chars().next() {
                Some(next) => {
                    shown.push(next);
                    true
                }
                None => {
                    done = true;
                    false
                }
            }
        });
        if done {
            return;
        }
    }
}
