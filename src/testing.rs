//! In-memory stand-ins for the proxy and the chat model.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::fetcher::{FetchOutcome, PageSource};
use crate::llm::{ChatModel, LlmError};

/// Replays scripted outcomes per URL; unscripted or exhausted URLs answer 404.
#[derive(Default)]
pub struct ScriptedSource {
    scripts: Mutex<HashMap<String, VecDeque<FetchOutcome>>>,
    log: Mutex<Vec<(String, Instant)>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, url: &str, outcomes: Vec<FetchOutcome>) -> Self {
        self.scripts
            .get_mut()
            .unwrap()
            .insert(url.to_string(), outcomes.into());
        self
    }

    pub fn page(self, url: &str, body: &str) -> Self {
        self.script(url, vec![FetchOutcome::Success(body.to_string())])
    }

    pub fn log(&self) -> Vec<(String, Instant)> {
        self.log.lock().unwrap().clone()
    }

    pub fn calls(&self, url: &str) -> usize {
        self.log().iter().filter(|(u, _)| u == url).count()
    }

    /// Time between consecutive requests for `url`.
    pub fn gaps(&self, url: &str) -> Vec<Duration> {
        let times: Vec<Instant> = self
            .log()
            .into_iter()
            .filter(|(u, _)| u == url)
            .map(|(_, t)| t)
            .collect();
        times.windows(2).map(|w| w[1] - w[0]).collect()
    }
}

impl PageSource for ScriptedSource {
    async fn get(&self, url: &str) -> FetchOutcome {
        self.log.lock().unwrap().push((url.to_string(), Instant::now()));
        self.scripts
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|q| q.pop_front())
            .unwrap_or(FetchOutcome::Status(404))
    }
}

/// Answers every prompt through a closure and counts the calls.
pub struct FnModel<F> {
    reply: F,
    calls: AtomicUsize,
}

impl<F> FnModel<F>
where
    F: Fn(&str) -> Result<String, LlmError>,
{
    pub fn new(reply: F) -> Self {
        Self {
            reply,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<F> ChatModel for FnModel<F>
where
    F: Fn(&str) -> Result<String, LlmError>,
{
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.reply)(prompt)
    }
}
