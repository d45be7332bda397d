//! A model that replays a fixed script, for tests and offline runs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use super::{GenerativeModel, ModelError, TextStream};

/// One step of a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Emit a text increment.
    Fragment(String),
    /// Fail the stream with [`ModelError::Failed`].
    Fail(String),
    /// Never produce anything again, as a hung upstream would.
    Stall,
}

/// Replays the same script on every call and records what it was asked.
///
/// # Examples
///
/// ```
/// use prompt_enhancer::model::ScriptedModel;
///
/// let model = ScriptedModel::new(["A ", " cat", " sitting."]);
/// assert_eq!(model.calls(), 0);
/// ```
#[derive(Debug, Default)]
pub struct ScriptedModel {
    steps: Vec<Step>,
    open_error: Option<String>,
    stall_open: bool,
    delay: Duration,
    calls: AtomicUsize,
    open_streams: Arc<AtomicUsize>,
    last_request: Mutex<Option<(String, String)>>,
}

impl ScriptedModel {
    /// A model that emits `fragments` in order and then ends cleanly.
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            steps: fragments
                .into_iter()
                .map(|f| Step::Fragment(f.into()))
                .collect(),
            ..Self::default()
        }
    }

    /// A model that follows `steps` exactly.
    pub fn from_steps(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Appends a failure after the scripted fragments.
    #[must_use]
    pub fn then_fail(mut self, message: impl Into<String>) -> Self {
        self.steps.push(Step::Fail(message.into()));
        self
    }

    /// Appends a stall after the scripted fragments.
    #[must_use]
    pub fn then_stall(mut self) -> Self {
        self.steps.push(Step::Stall);
        self
    }

    /// Makes every call fail before a stream is opened.
    #[must_use]
    pub fn failing_to_open(mut self, message: impl Into<String>) -> Self {
        self.open_error = Some(message.into());
        self
    }

    /// Makes every call hang before a stream is opened, as an upstream
    /// that accepts the connection but never answers would.
    #[must_use]
    pub fn stalling_on_open(mut self) -> Self {
        self.stall_open = true;
        self
    }

    /// Waits `delay` before each step.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of generation calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of streams handed out and not yet dropped.
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    /// The `(instruction, prompt)` pair of the most recent call.
    pub fn last_request(&self) -> Option<(String, String)> {
        self.last_request
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

// Counts a stream as open until the stream (and this guard with it) is dropped.
struct OpenGuard(Arc<AtomicUsize>);

impl OpenGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl GenerativeModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream_generate(
        &self,
        instruction: &str,
        prompt: &str,
    ) -> Result<TextStream, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_request.lock() {
            *last = Some((instruction.to_owned(), prompt.to_owned()));
        }

        if self.stall_open {
            std::future::pending::<()>().await;
        }
        if let Some(message) = &self.open_error {
            return Err(ModelError::Failed(message.clone()));
        }

        let guard = OpenGuard::new(&self.open_streams);
        let delay = self.delay;
        let steps = self.steps.clone().into_iter();

        Ok(stream::unfold((steps, guard), move |(mut steps, guard)| async move {
            let step = steps.next()?;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match step {
                Step::Fragment(text) => Some((Ok(text), (steps, guard))),
                Step::Fail(message) => Some((
                    Err(ModelError::Failed(message)),
                    (Vec::new().into_iter(), guard),
                )),
                Step::Stall => {
                    std::future::pending::<()>().await;
                    None
                }
            }
        })
        .boxed())
    }
}
