//! Scripted HttpGateway used by the unit tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::error::{DetectError, Result};
use crate::gateway::HttpGateway;

/// Holds a response for one path until the test releases it.
#[derive(Default)]
pub(crate) struct Gate {
    entered: Notify,
    release: Notify,
}

impl Gate {
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Call {
    pub method: &'static str,
    pub path: String,
    pub body: Option<Value>,
}

/// Answers each path from a queue of scripted results, in order.
/// Paths with nothing queued fail with `NetworkFailure`.
#[derive(Default)]
pub(crate) struct ScriptedGateway {
    responses: Mutex<HashMap<String, VecDeque<Result<Value>>>>,
    gates: Mutex<HashMap<String, Arc<Gate>>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, path: &str, body: Value) {
        self.push(path, Ok(body));
    }

    pub fn fail(&self, path: &str, err: DetectError) {
        self.push(path, Err(err));
    }

    fn push(&self, path: &str, result: Result<Value>) {
        self.responses
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(result);
    }

    /// The next call to `path` blocks until the returned gate is released.
    pub fn hold(&self, path: &str) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.gates
            .lock()
            .unwrap()
            .insert(path.to_string(), gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.path == path)
            .count()
    }

    async fn answer(&self, method: &'static str, path: &str, body: Option<Value>) -> Result<Value> {
        self.calls.lock().unwrap().push(Call {
            method,
            path: path.to_string(),
            body,
        });

        let gate = self.gates.lock().unwrap().remove(path);
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let next = self
            .responses
            .lock()
            .unwrap()
            .get_mut(path)
            .and_then(|queue| queue.pop_front());
        next.unwrap_or_else(|| {
            Err(DetectError::NetworkFailure(format!(
                "no scripted response for {}",
                path
            )))
        })
    }
}

#[async_trait]
impl HttpGateway for ScriptedGateway {
    async fn get(&self, path: &str) -> Result<Value> {
        self.answer("GET", path, None).await
    }

    async fn post_json(&self, path: &str, body: Value) -> Result<Value> {
        self.answer("POST", path, Some(body)).await
    }

    async fn delete(&self, path: &str) -> Result<Value> {
        self.answer("DELETE", path, None).await
    }
}
