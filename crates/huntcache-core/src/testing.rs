//! A scripted `Fetcher` for exercising the engine without a network.
//!
//! Compiled only with the `testing` feature (or under `cfg(test)`). Hosts can
//! enable it to test their own wiring; the crate's tests use it throughout.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{Barrier, Semaphore};

use crate::error::NetworkError;
use crate::fetch::Fetcher;
use crate::request::{Request, Response};

#[derive(Default)]
struct Script {
    answers: HashMap<String, Result<Response, NetworkError>>,
    calls: Vec<String>,
    gate: Option<Arc<Semaphore>>,
    barrier: Option<Arc<Barrier>>,
}

/// Answers each URL with whatever was scripted for it; unscripted URLs fail
/// as if the device were offline.
#[derive(Default)]
pub struct ScriptedFetcher {
    script: Mutex<Script>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn respond(&self, url: &str, response: Response) {
        self.script().answers.insert(url.to_string(), Ok(response));
    }

    pub fn fail(&self, url: &str, error: NetworkError) {
        self.script().answers.insert(url.to_string(), Err(error));
    }

    /// Forget the answer for `url`, so it fails like an offline request
    pub fn forget(&self, url: &str) {
        self.script().answers.remove(url);
    }

    /// Make every fetch wait until `release` lets it through
    pub fn hold(&self) {
        self.script().gate = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, fetches: usize) {
        if let Some(gate) = &self.script().gate {
            gate.add_permits(fetches);
        }
    }

    /// Make fetches wait until `parties` of them are in flight at once
    pub fn rendezvous(&self, parties: usize) {
        self.script().barrier = Some(Arc::new(Barrier::new(parties)));
    }

    /// URLs fetched so far, in call order
    pub fn calls(&self) -> Vec<String> {
        self.script().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.script().calls.len()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.script().calls.iter().filter(|c| *c == url).count()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        let url = request.url.to_string();
        let (gate, barrier) = {
            let mut script = self.script();
            script.calls.push(url.clone());
            (script.gate.clone(), script.barrier.clone())
        };

        if let Some(barrier) = barrier {
            barrier.wait().await;
        }
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        self.script()
            .answers
            .get(&url)
            .cloned()
            .unwrap_or_else(|| Err(NetworkError::Transport(format!("offline: {}", url))))
    }
}
