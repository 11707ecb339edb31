//! In-memory fakes for the external collaborators.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::overrides::{OverrideStore, StoreError};
use crate::shutdown::{ComputeApi, ComputeError, ShutdownTarget, StopOperation};

enum ComputeMode {
    Succeed,
    FailFirst(u32),
    AlwaysFail(String),
}

/// Records every stop call and answers according to its mode.
pub struct FakeCompute {
    mode: ComputeMode,
    delay: Option<Duration>,
    calls: AtomicU32,
    log: Mutex<Vec<(Instant, ShutdownTarget)>>,
}

impl FakeCompute {
    fn with_mode(mode: ComputeMode) -> Self {
        Self {
            mode,
            delay: None,
            calls: AtomicU32::new(0),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding() -> Self {
        Self::with_mode(ComputeMode::Succeed)
    }

    pub fn failing_then_ok(failures: u32) -> Self {
        Self::with_mode(ComputeMode::FailFirst(failures))
    }

    pub fn always_failing(code: &str) -> Self {
        Self::with_mode(ComputeMode::AlwaysFail(code.to_string()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.log.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }

    pub fn stopped_targets(&self) -> Vec<ShutdownTarget> {
        self.log.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
    }
}

#[async_trait]
impl ComputeApi for FakeCompute {
    async fn stop_instance(&self, target: &ShutdownTarget) -> Result<StopOperation, ComputeError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.lock().unwrap().push((Instant::now(), target.clone()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let ok = StopOperation {
            name: format!("operation-stop-{}", n),
            status: "RUNNING".to_string(),
        };
        match &self.mode {
            ComputeMode::Succeed => Ok(ok),
            ComputeMode::FailFirst(failures) if n > *failures => Ok(ok),
            ComputeMode::FailFirst(_) => Err(ComputeError::new("UNAVAILABLE", "try again")
                .with_http_status(503)),
            ComputeMode::AlwaysFail(code) => {
                Err(ComputeError::new(code.clone(), "injected failure").with_http_status(429))
            }
        }
    }
}

type ErrorFactory = Box<dyn Fn() -> StoreError + Send + Sync>;

/// Override store holding a fixed flag or failing every read.
pub struct FakeOverrideStore {
    answer: Result<bool, ErrorFactory>,
    delay: Option<Duration>,
    reads: Mutex<Vec<String>>,
}

impl FakeOverrideStore {
    pub fn flag(enabled: bool) -> Self {
        Self {
            answer: Ok(enabled),
            delay: None,
            reads: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: impl Fn() -> StoreError + Send + Sync + 'static) -> Self {
        Self {
            answer: Err(Box::new(error)),
            delay: None,
            reads: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn reads(&self) -> Vec<String> {
        self.reads.lock().unwrap().clone()
    }
}

#[async_trait]
impl OverrideStore for FakeOverrideStore {
    async fn read_flag(&self, key: &str) -> Result<bool, StoreError> {
        self.reads.lock().unwrap().push(key.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.answer {
            Ok(flag) => Ok(*flag),
            Err(make) => Err(make()),
        }
    }
}
