//! Server-sent event stream: one long-lived response multiplexing every metric
//! category, each on its own timer.
//!
//! A session pushes one frame per category on connect, then one task per
//! category samples on its configured period. The session ends when the
//! client goes away (the frame channel closes, or a send fails) or when the
//! dispatcher shuts down; every category task is aborted and awaited before
//! the session task returns. A failed sample produces an "unavailable" frame,
//! never a session end. Paused categories are not sampled at all.

use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::body::Body;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::SourceError;
use crate::types::Unavailable;

/// Frames buffered per session before sampling tasks wait on the client.
const FRAME_BUFFER: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Cpu,
    Memory,
    Disk,
    Network,
    Gpu,
    Processes,
    Sockets,
    Firewall,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Cpu,
        Category::Memory,
        Category::Disk,
        Category::Network,
        Category::Gpu,
        Category::Processes,
        Category::Sockets,
        Category::Firewall,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Cpu => "cpu",
            Category::Memory => "memory",
            Category::Disk => "disk",
            Category::Network => "network",
            Category::Gpu => "gpu",
            Category::Processes => "processes",
            Category::Sockets => "sockets",
            Category::Firewall => "firewall",
        }
    }

    fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown category: {0}")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// Produces one category's payload. Called on a blocking thread.
pub trait Sampler: Send + Sync + 'static {
    fn sample(&self, category: Category) -> Result<Value, SourceError>;
}

#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    data: &'a Value,
}

/// `event: <category>\ndata: {"type":"<category>","data":...}\n\n`
pub fn encode_frame(category: Category, data: &Value) -> Bytes {
    let envelope = Envelope {
        kind: category.as_str(),
        data,
    };
    // A serde_json::Value always serializes; the fallback keeps the frame well-formed.
    let body = serde_json::to_string(&envelope)
        .unwrap_or_else(|_| format!(r#"{{"type":"{category}","data":null}}"#));
    Bytes::from(format!("event: {category}\ndata: {body}\n\n"))
}

/// Per-category sampling periods.
#[derive(Debug, Clone, Default)]
pub struct Intervals(HashMap<Category, Duration>);

impl Intervals {
    pub const DEFAULT: Duration = Duration::from_millis(5000);
    pub const FIREWALL_DEFAULT: Duration = Duration::from_millis(10_000);

    pub fn new(map: HashMap<Category, Duration>) -> Self {
        Self(map)
    }

    /// Same period for every category.
    pub fn uniform(period: Duration) -> Self {
        Self(Category::ALL.into_iter().map(|c| (c, period)).collect())
    }

    pub fn get(&self, category: Category) -> Duration {
        self.0.get(&category).copied().unwrap_or(match category {
            Category::Firewall => Self::FIREWALL_DEFAULT,
            _ => Self::DEFAULT,
        })
    }

    pub fn longest(&self) -> Duration {
        Category::ALL
            .into_iter()
            .map(|c| self.get(c))
            .max()
            .unwrap_or(Self::DEFAULT)
    }
}

/// Per-session controls shared between the session task and the pause API.
#[derive(Debug)]
struct SessionControl {
    paused: AtomicU16,
    cancel: CancellationToken,
}

impl SessionControl {
    fn is_paused(&self, category: Category) -> bool {
        self.paused.load(Ordering::Acquire) & category.bit() != 0
    }

    fn set_paused(&self, category: Category, paused: bool) {
        if paused {
            self.paused.fetch_or(category.bit(), Ordering::AcqRel);
        } else {
            self.paused.fetch_and(!category.bit(), Ordering::AcqRel);
        }
    }
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client went away or a frame could not be delivered.
    Disconnected,
    /// The dispatcher shut down.
    Cancelled,
}

/// A freshly opened stream: its id, the frame receiver to hand to the HTTP
/// body, and the session task.
pub struct OpenStream {
    pub id: Uuid,
    pub frames: mpsc::Receiver<Bytes>,
    pub task: JoinHandle<SessionEnd>,
}

impl OpenStream {
    /// Response body that yields frames until the session ends. Dropping the
    /// body (client disconnect) closes the channel and tears the session down.
    pub fn into_body(frames: mpsc::Receiver<Bytes>) -> Body {
        let stream = futures::stream::unfold(frames, |mut rx| async move {
            rx.recv().await.map(|b| (Ok::<_, Infallible>(b), rx))
        });
        Body::from_stream(stream)
    }
}

type SessionMap = Arc<Mutex<HashMap<Uuid, Arc<SessionControl>>>>;

// Counts a live category timer; decremented when the owning task is dropped.
struct TimerGuard(Arc<AtomicUsize>);

impl TimerGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter.clone())
    }
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

// Removes the session from the registry however the session task exits.
struct Registration {
    id: Uuid,
    sessions: SessionMap,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

pub struct StreamDispatcher {
    sampler: Arc<dyn Sampler>,
    intervals: Intervals,
    active_timers: Arc<AtomicUsize>,
    sessions: SessionMap,
    shutdown: CancellationToken,
}

impl StreamDispatcher {
    pub fn new(sampler: Arc<dyn Sampler>, intervals: Intervals) -> Self {
        Self {
            sampler,
            intervals,
            active_timers: Arc::new(AtomicUsize::new(0)),
            sessions: Arc::default(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Starts a session with `paused` categories suppressed from the start.
    pub fn open(&self, paused: &[Category]) -> OpenStream {
        let id = Uuid::new_v4();
        let ctrl = Arc::new(SessionControl {
            paused: AtomicU16::new(paused.iter().fold(0, |m, c| m | c.bit())),
            cancel: self.shutdown.child_token(),
        });
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, ctrl.clone());
        let registration = Registration {
            id,
            sessions: self.sessions.clone(),
        };

        let (tx, frames) = mpsc::channel(FRAME_BUFFER);
        let session = Session {
            id,
            ctrl,
            sampler: self.sampler.clone(),
            intervals: self.intervals.clone(),
            active_timers: self.active_timers.clone(),
        };
        let task = tokio::spawn(async move {
            let _registration = registration;
            let end = session.run(tx).await;
            debug!(%id, ?end, "stream session closed");
            end
        });
        debug!(%id, "stream session opened");
        OpenStream { id, frames, task }
    }

    /// Pauses or resumes one category of a session. Returns false if the
    /// session is unknown or already gone.
    pub fn set_paused(&self, id: Uuid, category: Category, paused: bool) -> bool {
        let map = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        match map.get(&id) {
            Some(ctrl) => {
                ctrl.set_paused(category, paused);
                true
            }
            None => false,
        }
    }

    /// Number of category timers alive across all sessions.
    pub fn active_timers(&self) -> usize {
        self.active_timers.load(Ordering::Acquire)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn intervals(&self) -> &Intervals {
        &self.intervals
    }

    /// Cancels every open session.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

struct Session {
    id: Uuid,
    ctrl: Arc<SessionControl>,
    sampler: Arc<dyn Sampler>,
    intervals: Intervals,
    active_timers: Arc<AtomicUsize>,
}

impl Session {
    async fn run(self, tx: mpsc::Sender<Bytes>) -> SessionEnd {
        // each category samples on its own task, so one slow source cannot
        // hold back the cold start of the others
        let mut timers = JoinSet::new();
        for category in Category::ALL {
            timers.spawn(category_loop(
                category,
                self.intervals.get(category),
                self.sampler.clone(),
                tx.clone(),
                self.ctrl.clone(),
                TimerGuard::new(&self.active_timers),
            ));
        }

        let end = tokio::select! {
            _ = self.ctrl.cancel.cancelled() => SessionEnd::Cancelled,
            _ = tx.closed() => SessionEnd::Disconnected,
            // a category task only returns when its send failed
            Some(_) = timers.join_next() => SessionEnd::Disconnected,
        };
        timers.shutdown().await;
        debug!(id = %self.id, "stream timers stopped");
        end
    }
}

async fn category_loop(
    category: Category,
    period: Duration,
    sampler: Arc<dyn Sampler>,
    tx: mpsc::Sender<Bytes>,
    ctrl: Arc<SessionControl>,
    _guard: TimerGuard,
) {
    // the first tick completes at once: that is the cold-start frame
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if ctrl.is_paused(category) {
            continue;
        }
        let frame = sample_frame(&sampler, category).await;
        if tx.send(frame).await.is_err() {
            return;
        }
    }
}

async fn sample_frame(sampler: &Arc<dyn Sampler>, category: Category) -> Bytes {
    let s = sampler.clone();
    let result = tokio::task::spawn_blocking(move || s.sample(category)).await;
    let value = match result {
        Ok(Ok(v)) => v,
        Ok(Err(e)) => {
            debug!("{category} sample failed: {e}");
            serde_json::to_value(Unavailable::new(e.to_string())).unwrap_or(Value::Null)
        }
        Err(e) => {
            warn!("{category} sampler panicked: {e}");
            serde_json::to_value(Unavailable::new("sampler failed")).unwrap_or(Value::Null)
        }
    };
    encode_frame(category, &value)
}
