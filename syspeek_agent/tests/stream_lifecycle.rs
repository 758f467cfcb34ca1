//! Stream sessions driven through the library API with a scripted sampler.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::{json, Value};
use syspeek_agent::error::SourceError;
use syspeek_agent::stream::{Category, Intervals, Sampler, SessionEnd, StreamDispatcher};

#[derive(Default)]
struct Scripted {
    samples: AtomicUsize,
}

impl Sampler for Scripted {
    fn sample(&self, category: Category) -> Result<Value, SourceError> {
        self.samples.fetch_add(1, Ordering::Relaxed);
        match category {
            Category::Firewall => Err(SourceError::Unavailable("firewall backend".into())),
            c => Ok(json!({ "category": c.as_str() })),
        }
    }
}

fn event_name(frame: &Bytes) -> String {
    let text = std::str::from_utf8(frame).unwrap();
    text.lines()
        .next()
        .and_then(|l| l.strip_prefix("event: "))
        .unwrap()
        .to_string()
}

fn dispatcher(period_ms: u64) -> (Arc<Scripted>, StreamDispatcher) {
    let sampler = Arc::new(Scripted::default());
    let d = StreamDispatcher::new(
        sampler.clone(),
        Intervals::uniform(Duration::from_millis(period_ms)),
    );
    (sampler, d)
}

async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn cold_start_then_disconnect_stops_every_timer() {
    let (_sampler, d) = dispatcher(50);
    let mut open = d.open(&[]);

    // categories start independently, so the first frames arrive in any order
    let mut names = BTreeSet::new();
    while names.len() < Category::ALL.len() {
        let frame = open.frames.recv().await.unwrap();
        if event_name(&frame) == "firewall" {
            let text = std::str::from_utf8(&frame).unwrap();
            assert!(text.contains("\"available\":false"));
        }
        names.insert(event_name(&frame));
    }
    let expected: BTreeSet<String> = Category::ALL.iter().map(|c| c.to_string()).collect();
    assert_eq!(names, expected);

    wait_for(|| d.active_timers() == Category::ALL.len()).await;
    assert_eq!(d.active_sessions(), 1);

    drop(open.frames);
    let end = open.task.await.unwrap();
    assert_eq!(end, SessionEnd::Disconnected);
    assert_eq!(d.active_timers(), 0);
    assert_eq!(d.active_sessions(), 0);
}

#[tokio::test]
async fn paused_categories_are_not_sampled() {
    let (_sampler, d) = dispatcher(40);
    let mut open = d.open(&[Category::Gpu]);

    for _ in 0..Category::ALL.len() - 1 {
        let frame = open.frames.recv().await.unwrap();
        assert_ne!(event_name(&frame), "gpu");
    }

    assert!(d.set_paused(open.id, Category::Cpu, true));
    tokio::time::sleep(Duration::from_millis(100)).await;
    while open.frames.try_recv().is_ok() {}

    let deadline = tokio::time::Instant::now() + Duration::from_millis(250);
    while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, open.frames.recv()).await {
        let name = event_name(&frame);
        assert!(name != "cpu" && name != "gpu", "paused category {name} was sent");
    }

    assert!(d.set_paused(open.id, Category::Gpu, false));
    let resumed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let frame = open.frames.recv().await.unwrap();
            if event_name(&frame) == "gpu" {
                break;
            }
        }
    })
    .await;
    assert!(resumed.is_ok(), "gpu never resumed");

    d.shutdown();
    assert_eq!(open.task.await.unwrap(), SessionEnd::Cancelled);
    assert_eq!(d.active_timers(), 0);
    assert!(!d.set_paused(open.id, Category::Cpu, false));
}

#[tokio::test]
async fn sessions_are_independent() {
    let (sampler, d) = dispatcher(1_000);
    let mut a = d.open(&[]);
    let mut b = d.open(&Category::ALL);
    for _ in 0..Category::ALL.len() {
        a.frames.recv().await.unwrap();
    }
    // b starts fully paused: nothing on cold start
    assert!(tokio::time::timeout(Duration::from_millis(100), b.frames.recv())
        .await
        .is_err());
    assert_eq!(sampler.samples.load(Ordering::Relaxed), Category::ALL.len());

    drop(b.frames);
    assert_eq!(b.task.await.unwrap(), SessionEnd::Disconnected);
    assert_eq!(d.active_sessions(), 1);
    drop(a.frames);
    a.task.await.unwrap();
    assert_eq!(d.active_timers(), 0);
}
