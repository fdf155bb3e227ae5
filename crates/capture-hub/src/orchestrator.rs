//! Session orchestrator.
//!
//! ```text
//! Idle/Armed --start--> Recording --stop--> Saving --artifacts saved--> Idle
//! Idle/Armed --set_name--> Armed
//! any --ping--> same state
//! ```
//!
//! Every operation fans out to the active backends concurrently, one task per backend, each
//! bounded by the fan-out timeout, and joins them all. Backend failures are collected into a
//! [`FanOutReport`]; they never abort sibling backends or the operation itself. Completion
//! order between backends is unspecified.
//!
//! A stop returning does not mean artifacts have arrived: remote devices push them over the
//! data plane afterwards. The session stays in `Saving` until every backend that stopped
//! cleanly reports its artifacts saved, or until the save timeout passes. Start and rename
//! are refused while saving.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::sync::Mutex;

use crate::backend::{BackendRecorder, decorate};
use crate::error::{BackendError, SessionError};
use crate::lifecycle::SessionLifecycle;

type SharedBackend = Arc<Mutex<Box<dyn BackendRecorder>>>;

/// How long a stopped take may wait for its artifacts before the session moves on.
pub const DEFAULT_SAVE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Armed,
    Recording,
    Saving,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Armed => "armed",
            SessionState::Recording => "recording",
            SessionState::Saving => "saving",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Validate,
    Start,
    Stop,
    SetName,
    Ping,
    Shutdown,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Validate => "validate",
            Operation::Start => "start",
            Operation::Stop => "stop",
            Operation::SetName => "set_name",
            Operation::Ping => "ping",
            Operation::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub struct BackendFailure {
    pub backend: String,
    pub error: BackendError,
}

/// Outcome of one fan-out across backends.
#[derive(Debug)]
pub struct FanOutReport {
    pub operation: Operation,
    pub succeeded: Vec<String>,
    pub failures: Vec<BackendFailure>,
}

impl FanOutReport {
    fn empty(operation: Operation) -> Self {
        Self {
            operation,
            succeeded: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_backends(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.backend.as_str()).collect()
    }
}

#[derive(Clone)]
enum Action {
    Validate,
    Start,
    Stop,
    SetName(String),
    Ping,
    CheckSaved,
    Shutdown,
}

impl Action {
    /// `Ok(false)` only comes from `CheckSaved` while artifacts are outstanding.
    async fn run(self, backend: SharedBackend) -> Result<bool, BackendError> {
        let mut backend = backend.lock().await;
        let done = match self {
            Action::Validate => backend.validate().await,
            Action::Start => backend.start().await,
            Action::Stop => backend.stop().await,
            Action::SetName(name) => {
                let decorated = decorate(&name, backend.device_id());
                backend.set_name(&decorated).await
            }
            Action::Ping => backend.ping().await,
            Action::CheckSaved => return backend.artifacts_saved().await,
            Action::Shutdown => backend.shutdown().await,
        };
        done.map(|()| true)
    }
}

struct BackendEntry {
    id: String,
    backend: SharedBackend,
    /// Started successfully in the current take.
    started: bool,
    /// Stopped cleanly; its artifacts are not confirmed saved yet.
    saving: bool,
}

pub struct Orchestrator {
    backends: Vec<BackendEntry>,
    name: String,
    take: u32,
    state: SessionState,
    fanout_timeout: Duration,
    save_timeout: Duration,
    saving_since: Option<Instant>,
    lifecycle: SessionLifecycle,
}

impl Orchestrator {
    /// Validate every backend, drop the ones that fail, and slate the initial name.
    ///
    /// Fails only when no backend survives validation.
    pub async fn initialize(
        backends: Vec<Box<dyn BackendRecorder>>,
        initial_name: &str,
        fanout_timeout: Duration,
        lifecycle: SessionLifecycle,
    ) -> Result<Self, SessionError> {
        let backends = backends
            .into_iter()
            .map(|b| BackendEntry {
                id: b.id().to_string(),
                backend: Arc::new(Mutex::new(b)),
                started: false,
                saving: false,
            })
            .collect();
        let mut orch = Self {
            backends,
            name: String::new(),
            take: 0,
            state: SessionState::Idle,
            fanout_timeout,
            save_timeout: DEFAULT_SAVE_TIMEOUT,
            saving_since: None,
            lifecycle,
        };

        let all: Vec<usize> = (0..orch.backends.len()).collect();
        let results = orch.fan_out(Action::Validate, &all).await;
        let failed: Vec<usize> = results
            .iter()
            .filter(|(_, r)| r.is_err())
            .map(|(idx, _)| *idx)
            .collect();
        let report = orch.report(Operation::Validate, results);
        orch.log_report(&report);

        if !failed.is_empty() {
            // Best effort teardown of anything the failed backends may have opened.
            orch.fan_out(Action::Shutdown, &failed).await;
            let mut idx = 0;
            orch.backends.retain(|_| {
                let keep = !failed.contains(&idx);
                idx += 1;
                keep
            });
        }
        if orch.backends.is_empty() {
            return Err(SessionError::NoBackends);
        }
        tracing::info!(backends = ?orch.backend_ids(), "backends active");

        let name = initial_name.trim();
        if !name.is_empty() {
            orch.set_name(name).await?;
        }
        Ok(orch)
    }

    pub fn with_save_timeout(mut self, save_timeout: Duration) -> Self {
        self.save_timeout = save_timeout;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_name(&self) -> &str {
        &self.name
    }

    pub fn take_number(&self) -> u32 {
        self.take
    }

    pub fn backend_ids(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.id.as_str()).collect()
    }

    /// Start every backend. Starting while already recording re-issues the start and keeps
    /// the take number.
    pub async fn start(&mut self) -> Result<FanOutReport, SessionError> {
        self.ensure_running()?;
        if self.refresh_saving().await == SessionState::Saving {
            return Err(SessionError::StillSaving);
        }
        if self.state == SessionState::Recording {
            tracing::warn!(take = self.take, "start while recording; re-issuing");
        }
        let all: Vec<usize> = (0..self.backends.len()).collect();
        let results = self.fan_out(Action::Start, &all).await;
        for (idx, result) in &results {
            self.backends[*idx].started = result.is_ok();
        }
        self.state = SessionState::Recording;
        let report = self.report(Operation::Start, results);
        tracing::info!(name = %self.name, take = self.take, "recording");
        self.log_report(&report);
        Ok(report)
    }

    /// Stop the backends that started this take, then advance the take number. The session
    /// is left in `Saving` while any stopped backend still has artifacts outstanding.
    pub async fn stop(&mut self) -> Result<FanOutReport, SessionError> {
        if self.state != SessionState::Recording {
            return Err(SessionError::NotRecording);
        }
        self.state = SessionState::Saving;
        let started: Vec<usize> = self
            .backends
            .iter()
            .enumerate()
            .filter(|(_, b)| b.started)
            .map(|(idx, _)| idx)
            .collect();
        let results = self.fan_out(Action::Stop, &started).await;
        for entry in &mut self.backends {
            entry.started = false;
        }
        for (idx, result) in &results {
            self.backends[*idx].saving = result.is_ok();
        }
        let report = self.report(Operation::Stop, results);
        tracing::info!(name = %self.name, take = self.take, "take stopped");
        self.log_report(&report);
        self.take += 1;
        self.saving_since = Some(Instant::now());
        self.refresh_saving().await;
        Ok(report)
    }

    /// Ask the backends still saving whether their artifacts are in. Moves `Saving` to
    /// `Idle` once none are outstanding or the save timeout has passed.
    pub async fn refresh_saving(&mut self) -> SessionState {
        if self.state != SessionState::Saving {
            return self.state;
        }
        let pending: Vec<usize> = self
            .backends
            .iter()
            .enumerate()
            .filter(|(_, b)| b.saving)
            .map(|(idx, _)| idx)
            .collect();
        let results = self.fan_out(Action::CheckSaved, &pending).await;
        for (idx, result) in results {
            let entry = &mut self.backends[idx];
            match result {
                Ok(saved) => entry.saving = !saved,
                Err(e) => {
                    tracing::warn!(backend = %entry.id, error = %e, "artifact check failed; not waiting on it");
                    entry.saving = false;
                }
            }
        }

        let outstanding: Vec<&str> = self
            .backends
            .iter()
            .filter(|b| b.saving)
            .map(|b| b.id.as_str())
            .collect();
        if outstanding.is_empty() {
            tracing::info!(name = %self.name, "take saved");
        } else if self
            .saving_since
            .is_some_and(|since| since.elapsed() >= self.save_timeout)
        {
            tracing::warn!(backends = ?outstanding, timeout = ?self.save_timeout, "artifacts not confirmed in time; moving on");
        } else {
            tracing::debug!(backends = ?outstanding, "artifacts outstanding");
            return self.state;
        }
        for entry in &mut self.backends {
            entry.saving = false;
        }
        self.saving_since = None;
        self.state = SessionState::Idle;
        self.state
    }

    /// Rename the session. The same name re-slates without resetting the take number.
    pub async fn set_name(&mut self, name: &str) -> Result<FanOutReport, SessionError> {
        self.ensure_running()?;
        match self.refresh_saving().await {
            SessionState::Recording => return Err(SessionError::RenameWhileRecording),
            SessionState::Saving => return Err(SessionError::StillSaving),
            SessionState::Idle | SessionState::Armed => {}
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(SessionError::EmptyName);
        }
        if self.name != name {
            self.name = name.to_string();
            self.take = 0;
        }
        let all: Vec<usize> = (0..self.backends.len()).collect();
        let results = self.fan_out(Action::SetName(self.name.clone()), &all).await;
        self.state = SessionState::Armed;
        let report = self.report(Operation::SetName, results);
        tracing::info!(name = %self.name, take = self.take, "session armed");
        self.log_report(&report);
        Ok(report)
    }

    /// Liveness check; never changes state.
    pub async fn ping(&self) -> FanOutReport {
        let all: Vec<usize> = (0..self.backends.len()).collect();
        let results = self.fan_out(Action::Ping, &all).await;
        let report = self.report(Operation::Ping, results);
        self.log_report(&report);
        report
    }

    /// Stop an in-flight take, tear every backend down, and release them.
    pub async fn shutdown(&mut self) -> FanOutReport {
        if self.state == SessionState::Recording {
            // stop() logs its own report.
            let _ = self.stop().await;
        }
        let all: Vec<usize> = (0..self.backends.len()).collect();
        let results = self.fan_out(Action::Shutdown, &all).await;
        let report = self.report(Operation::Shutdown, results);
        self.log_report(&report);
        self.backends.clear();
        self.lifecycle.request_shutdown();
        report
    }

    fn ensure_running(&self) -> Result<(), SessionError> {
        if self.lifecycle.is_shutting_down() {
            return Err(SessionError::ShuttingDown);
        }
        if self.backends.is_empty() {
            return Err(SessionError::NoBackends);
        }
        Ok(())
    }

    async fn fan_out(
        &self,
        action: Action,
        targets: &[usize],
    ) -> Vec<(usize, Result<bool, BackendError>)> {
        let limit = self.fanout_timeout;
        let handles = targets.iter().map(|&idx| {
            let backend = self.backends[idx].backend.clone();
            let action = action.clone();
            tokio::spawn(async move {
                match tokio::time::timeout(limit, action.run(backend)).await {
                    Ok(result) => result,
                    Err(_) => Err(BackendError::Timeout(limit)),
                }
            })
        });
        let joined = join_all(handles).await;
        targets
            .iter()
            .copied()
            .zip(joined)
            .map(|(idx, joined)| {
                let result = joined.unwrap_or_else(|e| Err(BackendError::Aborted(e.to_string())));
                (idx, result)
            })
            .collect()
    }

    fn report(
        &self,
        operation: Operation,
        results: Vec<(usize, Result<bool, BackendError>)>,
    ) -> FanOutReport {
        let mut report = FanOutReport::empty(operation);
        for (idx, result) in results {
            let backend = self.backends[idx].id.clone();
            match result {
                Ok(_) => report.succeeded.push(backend),
                Err(error) => report.failures.push(BackendFailure { backend, error }),
            }
        }
        report
    }

    fn log_report(&self, report: &FanOutReport) {
        for failure in &report.failures {
            tracing::warn!(
                backend = %failure.backend,
                operation = %report.operation,
                error = %failure.error,
                "backend operation failed"
            );
        }
        tracing::debug!(
            operation = %report.operation,
            succeeded = report.succeeded.len(),
            failed = report.failures.len(),
            "fan-out complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    type Log = Arc<StdMutex<Vec<String>>>;

    #[derive(Default, Clone)]
    struct Mock {
        id: String,
        device_id: String,
        fail_start: bool,
        fail_validate: bool,
        hang_stop: bool,
        /// Artifacts of the last stop not delivered yet.
        unsaved: Arc<AtomicBool>,
        log: Log,
    }

    impl Mock {
        fn new(id: &str, log: &Log) -> Self {
            Self {
                id: id.to_string(),
                log: log.clone(),
                ..Self::default()
            }
        }

        fn record(&self, what: String) {
            self.log.lock().unwrap().push(format!("{}:{what}", self.id));
        }
    }

    #[async_trait]
    impl BackendRecorder for Mock {
        fn id(&self) -> &str {
            &self.id
        }

        fn device_id(&self) -> &str {
            &self.device_id
        }

        async fn validate(&mut self) -> Result<(), BackendError> {
            if self.fail_validate {
                return Err(BackendError::Validation("missing".to_string()));
            }
            Ok(())
        }

        async fn start(&mut self) -> Result<(), BackendError> {
            if self.fail_start {
                return Err(BackendError::NotConnected(self.id.clone()));
            }
            self.record("start".to_string());
            Ok(())
        }

        async fn stop(&mut self) -> Result<(), BackendError> {
            if self.hang_stop {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            self.record("stop".to_string());
            Ok(())
        }

        async fn set_name(&mut self, name: &str) -> Result<(), BackendError> {
            self.record(format!("name={name}"));
            Ok(())
        }

        async fn artifacts_saved(&mut self) -> Result<bool, BackendError> {
            Ok(!self.unsaved.load(Ordering::SeqCst))
        }

        async fn shutdown(&mut self) -> Result<(), BackendError> {
            self.record("shutdown".to_string());
            Ok(())
        }
    }

    async fn orchestrator(mocks: Vec<Mock>) -> Result<Orchestrator, SessionError> {
        let boxed = mocks
            .into_iter()
            .map(|m| Box::new(m) as Box<dyn BackendRecorder>)
            .collect();
        Orchestrator::initialize(
            boxed,
            "hello",
            Duration::from_millis(200),
            SessionLifecycle::new(),
        )
        .await
    }

    fn entries(log: &Log, suffix: &str) -> Vec<String> {
        let mut v: Vec<String> = log
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.ends_with(suffix))
            .cloned()
            .collect();
        v.sort();
        v
    }

    #[tokio::test]
    async fn one_failing_start_does_not_block_the_others() {
        let log = Log::default();
        let mut broken = Mock::new("b", &log);
        broken.fail_start = true;
        let mut orch = orchestrator(vec![Mock::new("a", &log), broken, Mock::new("c", &log)])
            .await
            .unwrap();

        let started = orch.start().await.unwrap();
        assert_eq!(started.failed_backends(), vec!["b"]);
        assert_eq!(started.succeeded.len(), 2);
        assert_eq!(orch.state(), SessionState::Recording);

        let stopped = orch.stop().await.unwrap();
        assert!(stopped.is_clean());
        let mut ok = stopped.succeeded.clone();
        ok.sort();
        assert_eq!(ok, vec!["a", "c"]);
        assert_eq!(entries(&log, ":stop"), vec!["a:stop", "c:stop"]);
        assert_eq!(orch.take_number(), 1);
        assert_eq!(orch.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn rename_while_recording_is_rejected() {
        let log = Log::default();
        let mut orch = orchestrator(vec![Mock::new("a", &log)]).await.unwrap();
        orch.start().await.unwrap();

        assert_eq!(
            orch.set_name("world").await.unwrap_err(),
            SessionError::RenameWhileRecording
        );
        assert_eq!(orch.session_name(), "hello");
        assert_eq!(entries(&log, "world"), Vec::<String>::new());

        orch.stop().await.unwrap();
        orch.set_name("world").await.unwrap();
        assert_eq!(orch.session_name(), "world");
        assert_eq!(orch.state(), SessionState::Armed);
    }

    #[tokio::test]
    async fn take_number_follows_name_changes() {
        let log = Log::default();
        let mut orch = orchestrator(vec![Mock::new("a", &log)]).await.unwrap();
        for _ in 0..2 {
            orch.start().await.unwrap();
            orch.start().await.unwrap();
            orch.stop().await.unwrap();
        }
        assert_eq!(orch.take_number(), 2);
        orch.set_name("hello").await.unwrap();
        assert_eq!(orch.take_number(), 2);
        orch.set_name("world").await.unwrap();
        assert_eq!(orch.take_number(), 0);
        assert_eq!(orch.stop().await.unwrap_err(), SessionError::NotRecording);
        assert_eq!(orch.set_name("  ").await.unwrap_err(), SessionError::EmptyName);
    }

    #[tokio::test]
    async fn names_are_decorated_per_device() {
        let log = Log::default();
        let mut cam = Mock::new("camera", &log);
        cam.device_id = "cam1".to_string();
        orchestrator(vec![cam, Mock::new("face", &log)]).await.unwrap();
        assert_eq!(
            entries(&log, "hello_cam1"),
            vec!["camera:name=hello_cam1"]
        );
        assert_eq!(entries(&log, "=hello"), vec!["face:name=hello"]);
    }

    #[tokio::test]
    async fn hung_stop_is_reported_as_timeout() {
        let log = Log::default();
        let mut slow = Mock::new("slow", &log);
        slow.hang_stop = true;
        let mut orch = orchestrator(vec![slow, Mock::new("fast", &log)]).await.unwrap();
        orch.start().await.unwrap();

        let report = orch.stop().await.unwrap();
        assert_eq!(report.succeeded, vec!["fast"]);
        assert!(matches!(
            report.failures[0].error,
            BackendError::Timeout(_)
        ));
        assert_eq!(orch.state(), SessionState::Idle);
        // The backend is usable again once the timed-out call is dropped.
        assert!(orch.start().await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn validation_failures_are_excluded() {
        let log = Log::default();
        let mut bad = Mock::new("bad", &log);
        bad.fail_validate = true;
        let orch = orchestrator(vec![bad.clone(), Mock::new("good", &log)])
            .await
            .unwrap();
        assert_eq!(orch.backend_ids(), vec!["good"]);
        assert_eq!(entries(&log, ":shutdown"), vec!["bad:shutdown"]);

        let err = orchestrator(vec![bad]).await.err();
        assert_eq!(err, Some(SessionError::NoBackends));
    }

    #[tokio::test]
    async fn shutdown_stops_active_take_and_releases_backends() {
        let log = Log::default();
        let mut orch = orchestrator(vec![Mock::new("a", &log)]).await.unwrap();
        orch.start().await.unwrap();
        let report = orch.shutdown().await;
        assert_eq!(report.succeeded, vec!["a"]);
        assert_eq!(entries(&log, ":stop"), vec!["a:stop"]);
        assert!(orch.backend_ids().is_empty());
        assert_eq!(orch.start().await.unwrap_err(), SessionError::ShuttingDown);
    }

    #[tokio::test]
    async fn saving_holds_until_artifacts_arrive() {
        let log = Log::default();
        let face = Mock::new("face", &log);
        face.unsaved.store(true, Ordering::SeqCst);
        let pending = face.unsaved.clone();
        let mut orch = orchestrator(vec![face, Mock::new("camera", &log)])
            .await
            .unwrap();

        orch.start().await.unwrap();
        assert!(orch.stop().await.unwrap().is_clean());
        assert_eq!(orch.state(), SessionState::Saving);
        assert_eq!(orch.take_number(), 1);
        assert_eq!(orch.start().await.unwrap_err(), SessionError::StillSaving);
        assert_eq!(orch.set_name("world").await.unwrap_err(), SessionError::StillSaving);
        assert_eq!(orch.refresh_saving().await, SessionState::Saving);

        pending.store(false, Ordering::SeqCst);
        assert_eq!(orch.refresh_saving().await, SessionState::Idle);
        assert!(orch.start().await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn save_timeout_releases_the_session() {
        let log = Log::default();
        let face = Mock::new("face", &log);
        face.unsaved.store(true, Ordering::SeqCst);
        let mut orch = orchestrator(vec![face])
            .await
            .unwrap()
            .with_save_timeout(Duration::ZERO);

        orch.start().await.unwrap();
        orch.stop().await.unwrap();
        assert_eq!(orch.state(), SessionState::Idle);
        orch.start().await.unwrap();
    }

    #[tokio::test]
    async fn failed_stop_is_not_waited_on() {
        let log = Log::default();
        let mut slow = Mock::new("slow", &log);
        slow.hang_stop = true;
        slow.unsaved.store(true, Ordering::SeqCst);
        let mut orch = orchestrator(vec![slow]).await.unwrap();
        orch.start().await.unwrap();
        assert!(!orch.stop().await.unwrap().is_clean());
        assert_eq!(orch.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn ping_keeps_state() {
        let log = Log::default();
        let orch = orchestrator(vec![Mock::new("a", &log)]).await.unwrap();
        assert!(orch.ping().await.is_clean());
        assert_eq!(orch.state(), SessionState::Armed);
    }
}
