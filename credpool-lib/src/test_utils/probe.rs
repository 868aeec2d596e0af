//! Probe with scripted answers.

use crate::cooldown::HealthProbe;
use crate::store::Credential;
use crate::{CredpoolError, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Answers probes from a script; succeeds once the script runs out.
#[derive(Debug, Default)]
pub struct ScriptedProbe {
    script: Mutex<VecDeque<bool>>,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    /// Probe answering with `script` in order.
    pub fn new(script: impl IntoIterator<Item = bool>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Append answers.
    pub fn push(&self, answers: impl IntoIterator<Item = bool>) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(answers);
    }

    /// Number of probes run.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn probe(&self, credential: &Credential) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let healthy = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(true);
        if healthy {
            Ok(())
        } else {
            Err(CredpoolError::Probe {
                id: credential.id,
                reason: "scripted failure".to_string(),
            })
        }
    }
}
