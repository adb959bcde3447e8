use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use arc_swap::ArcSwap;
use tracing::{debug, error, info, warn};

use relic_types::Event;

use crate::error::{AgentError, AgentResult};
use crate::info::{AgentInfo, AgentState};
use crate::traits::{CursorStore, EventHandler, EventSource};

/// Default number of events fetched per batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Default)]
struct Control {
    signaled: bool,
    stopping: bool,
}

/// State shared between an [`Agent`] handle and its worker thread.
struct Shared {
    name: String,
    batch_size: usize,
    source: Arc<dyn EventSource>,
    cursor: Arc<dyn CursorStore>,
    handler: Arc<dyn EventHandler>,
    info: ArcSwap<AgentInfo>,
    control: Mutex<Control>,
    wake: Condvar,
}

impl Shared {
    fn publish(&self, cur_seq: u64, max_seq: u64, state: AgentState) {
        self.info
            .store(Arc::new(AgentInfo::new(cur_seq, max_seq, state)));
    }

    fn is_stopping(&self) -> bool {
        self.control.lock().expect("agent lock poisoned").stopping
    }

    /// Block until signaled or stopping. Returns `false` when stopping.
    fn wait_for_signal(&self) -> bool {
        let control = self.control.lock().expect("agent lock poisoned");
        let mut control = self
            .wake
            .wait_while(control, |c| !c.signaled && !c.stopping)
            .expect("agent lock poisoned");
        control.signaled = false;
        !control.stopping
    }

    /// Clear a signal that arrived while work was in progress; the work
    /// about to be done covers it.
    fn take_signal(&self) {
        self.control.lock().expect("agent lock poisoned").signaled = false;
    }
}

/// Outcome of draining the pending queue.
enum Drain {
    /// Every pending event was processed.
    Empty,
    /// The head event failed and stays queued for the next signal.
    Blocked,
    /// Stop was requested mid-batch.
    Stopping,
}

/// A background consumer of an event log.
///
/// The worker thread fetches batches of events after its persisted cursor,
/// hands each to the [`EventHandler`], and advances the cursor after every
/// success. A failing event stays at the head of the queue and is retried
/// on each [`signal`](Agent::signal); no later event is processed before
/// it. When there is nothing to do the worker sleeps until signaled.
pub struct Agent {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        source: Arc<dyn EventSource>,
        cursor: Arc<dyn CursorStore>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                batch_size: DEFAULT_BATCH_SIZE,
                source,
                cursor,
                handler,
                info: ArcSwap::from_pointee(AgentInfo::default()),
                control: Mutex::new(Control::default()),
                wake: Condvar::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Set the number of events fetched per batch. Only effective before
    /// [`start`](Agent::start).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.batch_size = batch_size.max(1);
        }
        self
    }

    /// The agent's name, which is also its cursor key.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Latest published progress. Never blocks.
    pub fn info(&self) -> AgentInfo {
        **self.shared.info.load()
    }

    /// Spawn the worker thread.
    pub fn start(&self) -> AgentResult<()> {
        let mut worker = self.worker.lock().expect("agent lock poisoned");
        if worker.is_some() {
            return Err(AgentError::AlreadyStarted(self.shared.name.clone()));
        }
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(format!("relic-agent-{}", self.shared.name))
            .spawn(move || run(&shared))?;
        *worker = Some(handle);
        info!(agent = %self.shared.name, "agent started");
        Ok(())
    }

    /// Wake the worker: new events may be available, or a failed event may
    /// now succeed.
    pub fn signal(&self) {
        self.shared.control.lock().expect("agent lock poisoned").signaled = true;
        self.shared.wake.notify_all();
    }

    /// Ask the worker to stop and block until it has exited.
    pub fn stop(&self) {
        self.shared.control.lock().expect("agent lock poisoned").stopping = true;
        self.shared.wake.notify_all();

        let handle = self.worker.lock().expect("agent lock poisoned").take();
        match handle {
            Some(handle) => {
                if handle.join().is_err() {
                    error!(agent = %self.shared.name, "agent thread panicked");
                }
            }
            None => {
                let info = self.info();
                if !info.state.is_terminal() {
                    self.shared
                        .publish(info.cur_seq, info.max_seq, AgentState::Stopped);
                }
            }
        }
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.shared.name)
            .field("info", &self.info())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Worker loop
// ---------------------------------------------------------------------------

fn run(shared: &Shared) {
    let (state, cur_seq, max_seq) = match drive(shared) {
        Ok((cur, max)) => (AgentState::Stopped, cur, max),
        Err((cur, max, err)) if err.is_unavailable() => {
            info!(agent = %shared.name, error = %err, "agent source unavailable, stopping");
            (AgentState::Stopped, cur, max)
        }
        Err((cur, max, err)) => {
            error!(agent = %shared.name, cur_seq = cur, error = %err, "agent failed");
            (AgentState::Error, cur, max)
        }
    };
    shared.publish(cur_seq, max_seq, state);
    info!(agent = %shared.name, cur_seq, %state, "agent exited");
}

type DriveError = (u64, u64, AgentError);

/// Run until stopped. Returns the final `(cur_seq, max_seq)`.
fn drive(shared: &Shared) -> Result<(u64, u64), DriveError> {
    let mut cur_seq = shared.cursor.load(&shared.name).map_err(|e| (0, 0, e))?;
    let mut max_seq = cur_seq;
    let mut pending: VecDeque<Event> = VecDeque::new();

    loop {
        if shared.is_stopping() {
            return Ok((cur_seq, max_seq));
        }
        shared.take_signal();

        if pending.is_empty() {
            let batch = shared
                .source
                .fetch(cur_seq, shared.batch_size)
                .map_err(|e| (cur_seq, max_seq, e))?;
            if let Some(last) = batch.last() {
                max_seq = max_seq.max(last.seq);
            }
            if batch.len() >= shared.batch_size {
                let last = shared
                    .source
                    .last_seq()
                    .map_err(|e| (cur_seq, max_seq, e))?;
                max_seq = max_seq.max(last);
            }
            pending.extend(batch);
        }
        shared.publish(cur_seq, max_seq, AgentState::Running);

        // Events queued for this round, retried ones included.
        let queued = pending.len();
        let drained = drain(shared, &mut pending, &mut cur_seq, max_seq)
            .map_err(|e| (cur_seq, max_seq, e))?;
        match drained {
            Drain::Stopping => return Ok((cur_seq, max_seq)),
            Drain::Empty if queued > 0 => continue,
            Drain::Empty | Drain::Blocked => {
                shared.publish(cur_seq, max_seq, AgentState::Waiting);
                debug!(agent = %shared.name, cur_seq, pending = pending.len(), "agent waiting");
                if !shared.wait_for_signal() {
                    return Ok((cur_seq, max_seq));
                }
            }
        }
    }
}

fn drain(
    shared: &Shared,
    pending: &mut VecDeque<Event>,
    cur_seq: &mut u64,
    max_seq: u64,
) -> AgentResult<Drain> {
    while let Some(event) = pending.pop_front() {
        if shared.is_stopping() {
            pending.push_front(event);
            return Ok(Drain::Stopping);
        }
        match shared.handler.process(&event) {
            Ok(()) => {
                shared.cursor.save(&shared.name, event.seq)?;
                *cur_seq = event.seq;
                shared.publish(*cur_seq, max_seq.max(event.seq), AgentState::Running);
            }
            Err(err) if err.is_unavailable() => return Err(err),
            Err(err) => {
                warn!(
                    agent = %shared.name,
                    seq = event.seq,
                    content = %event.content.short_hex(),
                    error = %err,
                    "event processing failed, will retry"
                );
                pending.push_front(event);
                return Ok(Drain::Blocked);
            }
        }
    }
    Ok(Drain::Empty)
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashMap};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use relic_types::{ErrorKind, Hash, Operation};

    use super::*;

    // -----------------------------------------------------------------------
    // Fixtures
    // -----------------------------------------------------------------------

    #[derive(Default)]
    struct Log {
        events: Mutex<Vec<Event>>,
        closed: Mutex<bool>,
        fail_fetch: Mutex<Option<ErrorKind>>,
    }

    impl Log {
        fn push(&self, n: usize) {
            let mut events = self.events.lock().unwrap();
            for _ in 0..n {
                let seq = events.len() as u64 + 1;
                events.push(Event::new(
                    seq,
                    Operation::Create,
                    Hash::of(&seq.to_be_bytes()),
                    BTreeSet::new(),
                ));
            }
        }
    }

    impl EventSource for Log {
        fn fetch(&self, after: u64, limit: usize) -> AgentResult<Vec<Event>> {
            if *self.closed.lock().unwrap() {
                return Err(AgentError::new(ErrorKind::RepositoryClosed, "log closed"));
            }
            if let Some(kind) = *self.fail_fetch.lock().unwrap() {
                return Err(AgentError::new(kind, "fetch failed"));
            }
            Ok(self
                .events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.seq > after)
                .take(limit)
                .cloned()
                .collect())
        }

        fn last_seq(&self) -> AgentResult<u64> {
            Ok(self.events.lock().unwrap().len() as u64)
        }
    }

    #[derive(Default)]
    struct Cursors(Mutex<HashMap<String, u64>>);

    impl CursorStore for Cursors {
        fn load(&self, key: &str) -> AgentResult<u64> {
            Ok(self.0.lock().unwrap().get(key).copied().unwrap_or(0))
        }

        fn save(&self, key: &str, seq: u64) -> AgentResult<()> {
            self.0.lock().unwrap().insert(key.to_string(), seq);
            Ok(())
        }
    }

    /// Records processed sequence numbers; fails every event whose
    /// sequence number is in `failing`.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<u64>>,
        attempts: AtomicUsize,
        failing: Mutex<BTreeSet<u64>>,
        unavailable: Mutex<bool>,
    }

    impl EventHandler for Recorder {
        fn process(&self, event: &Event) -> AgentResult<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if *self.unavailable.lock().unwrap() {
                return Err(AgentError::new(ErrorKind::UnreachableNode, "target gone"));
            }
            if self.failing.lock().unwrap().contains(&event.seq) {
                return Err(AgentError::new(ErrorKind::IoFailure, "transient"));
            }
            self.seen.lock().unwrap().push(event.seq);
            Ok(())
        }
    }

    struct Fixture {
        log: Arc<Log>,
        cursors: Arc<Cursors>,
        recorder: Arc<Recorder>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                log: Arc::new(Log::default()),
                cursors: Arc::new(Cursors::default()),
                recorder: Arc::new(Recorder::default()),
            }
        }

        fn agent(&self, batch_size: usize) -> Agent {
            Agent::new(
                "test",
                self.log.clone(),
                self.cursors.clone(),
                self.recorder.clone(),
            )
            .with_batch_size(batch_size)
        }
    }

    fn wait_until(agent: &Agent, pred: impl Fn(&AgentInfo) -> bool) -> AgentInfo {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let info = agent.info();
            if pred(&info) {
                return info;
            }
            assert!(Instant::now() < deadline, "timed out, last info {info:?}");
            thread::sleep(Duration::from_millis(5));
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    #[test]
    fn new_agent_reports_new() {
        let fx = Fixture::new();
        let agent = fx.agent(10);
        assert_eq!(agent.info(), AgentInfo::default());
        agent.stop();
        assert_eq!(agent.info().state, AgentState::Stopped);
    }

    #[test]
    fn processes_backlog_then_waits() {
        let fx = Fixture::new();
        fx.log.push(25);
        let agent = fx.agent(10);
        agent.start().unwrap();

        let info = wait_until(&agent, |i| i.state == AgentState::Waiting && i.cur_seq == 25);
        assert_eq!(info.max_seq, 25);
        assert_eq!(*fx.recorder.seen.lock().unwrap(), (1..=25).collect::<Vec<_>>());
        assert_eq!(fx.cursors.load("test").unwrap(), 25);

        agent.stop();
        assert_eq!(agent.info().state, AgentState::Stopped);
    }

    #[test]
    fn signal_picks_up_new_events() {
        let fx = Fixture::new();
        let agent = fx.agent(10);
        agent.start().unwrap();
        wait_until(&agent, |i| i.state == AgentState::Waiting);

        fx.log.push(3);
        agent.signal();
        wait_until(&agent, |i| i.state == AgentState::Waiting && i.cur_seq == 3);
        agent.stop();
    }

    #[test]
    fn resumes_from_persisted_cursor() {
        let fx = Fixture::new();
        fx.log.push(5);
        fx.cursors.save("test", 3).unwrap();
        let agent = fx.agent(10);
        agent.start().unwrap();
        wait_until(&agent, |i| i.state == AgentState::Waiting && i.cur_seq == 5);
        assert_eq!(*fx.recorder.seen.lock().unwrap(), vec![4, 5]);
    }

    #[test]
    fn start_twice_is_rejected() {
        let fx = Fixture::new();
        let agent = fx.agent(10);
        agent.start().unwrap();
        assert!(matches!(agent.start(), Err(AgentError::AlreadyStarted(_))));
    }

    // -----------------------------------------------------------------------
    // Failures
    // -----------------------------------------------------------------------

    #[test]
    fn failing_event_blocks_later_events_until_it_succeeds() {
        let fx = Fixture::new();
        fx.log.push(4);
        fx.recorder.failing.lock().unwrap().insert(2);
        let agent = fx.agent(10);
        agent.start().unwrap();

        let info = wait_until(&agent, |i| i.state == AgentState::Waiting);
        assert_eq!(info.cur_seq, 1);
        assert_eq!(*fx.recorder.seen.lock().unwrap(), vec![1]);

        // Still failing: retried once more, nothing after it runs.
        let before = fx.recorder.attempts.load(Ordering::SeqCst);
        agent.signal();
        let deadline = Instant::now() + Duration::from_secs(5);
        while fx.recorder.attempts.load(Ordering::SeqCst) == before {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(5));
        }
        wait_until(&agent, |i| i.state == AgentState::Waiting);
        assert_eq!(*fx.recorder.seen.lock().unwrap(), vec![1]);

        fx.recorder.failing.lock().unwrap().clear();
        agent.signal();
        wait_until(&agent, |i| i.state == AgentState::Waiting && i.cur_seq == 4);
        assert_eq!(*fx.recorder.seen.lock().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn closed_source_stops_the_agent() {
        let fx = Fixture::new();
        let agent = fx.agent(10);
        agent.start().unwrap();
        wait_until(&agent, |i| i.state == AgentState::Waiting);

        *fx.log.closed.lock().unwrap() = true;
        agent.signal();
        wait_until(&agent, |i| i.state == AgentState::Stopped);
    }

    #[test]
    fn unreachable_target_stops_the_agent() {
        let fx = Fixture::new();
        fx.log.push(1);
        *fx.recorder.unavailable.lock().unwrap() = true;
        let agent = fx.agent(10);
        agent.start().unwrap();
        let info = wait_until(&agent, |i| i.state.is_terminal());
        assert_eq!(info.state, AgentState::Stopped);
        assert_eq!(info.cur_seq, 0);
    }

    #[test]
    fn unexpected_fetch_failure_is_terminal() {
        let fx = Fixture::new();
        *fx.log.fail_fetch.lock().unwrap() = Some(ErrorKind::IoFailure);
        let agent = fx.agent(10);
        agent.start().unwrap();
        wait_until(&agent, |i| i.state == AgentState::Error);

        // No restart on signal.
        *fx.log.fail_fetch.lock().unwrap() = None;
        fx.log.push(1);
        agent.signal();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(agent.info().state, AgentState::Error);
        agent.stop();
        assert_eq!(agent.info().state, AgentState::Error);
    }

    #[test]
    fn full_batch_reports_absolute_max_seq() {
        let fx = Fixture::new();
        fx.log.push(7);
        fx.recorder.failing.lock().unwrap().insert(1);
        let agent = fx.agent(3);
        agent.start().unwrap();
        let info = wait_until(&agent, |i| i.state == AgentState::Waiting);
        assert_eq!(info.cur_seq, 0);
        assert_eq!(info.max_seq, 7);
        assert_eq!(info.lag(), 7);
    }
}
