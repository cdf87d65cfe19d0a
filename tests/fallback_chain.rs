//! End-to-end strategy-chain scenarios.
//!
//! Exercises the orchestrator against scripted collaborators: a pattern
//! remote handle, deterministic playback surfaces, an in-memory sink, and
//! wiremock for the direct-fetch strategy.

use anyhow::{bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use siphon_engine::acquisition::capture::{
    MediaMetadata, PlayError, PlaybackSurface, Recorder, SurfaceProvider,
};
use siphon_engine::config::EngineConfig;
use siphon_engine::descriptor::{MediaDescriptor, SourceLocator};
use siphon_engine::errors::ErrorKind;
use siphon_engine::orchestrator::Orchestrator;
use siphon_engine::progress::{TaskEvent, TaskNotice};
use siphon_engine::resolver::{DescriptorResolver, ResolveContext};
use siphon_engine::rpc::{CandidateProvider, ChunkLocation, RemoteHandle};
use siphon_engine::sink::{Artifact, ArtifactSink};
use siphon_engine::task::TaskState;

const MIB: u64 = 1024 * 1024;

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// ── Scripted collaborators ──

struct FixedResolver(Option<MediaDescriptor>);

#[async_trait]
impl DescriptorResolver for FixedResolver {
    async fn resolve(&self, _ctx: &ResolveContext) -> Option<MediaDescriptor> {
        self.0.clone()
    }
}

/// Remote handle serving a deterministic byte pattern, with optional delay
/// and scripted failure.
struct PatternHandle {
    total: u64,
    healthy: bool,
    fail_reads: bool,
    read_delay: Duration,
    pings: AtomicU32,
    calls: Mutex<Vec<(u64, u32)>>,
}

impl PatternHandle {
    fn new(total: u64) -> Arc<Self> {
        Arc::new(Self {
            total,
            healthy: true,
            fail_reads: false,
            read_delay: Duration::ZERO,
            pings: AtomicU32::new(0),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn byte_at(offset: u64) -> u8 {
        (offset % 241) as u8
    }
}

#[async_trait]
impl RemoteHandle for PatternHandle {
    async fn ping(&self) -> Result<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if self.healthy {
            Ok(())
        } else {
            bail!("capability not present")
        }
    }

    async fn read_chunk(&self, _location: &ChunkLocation, offset: u64, limit: u32) -> Result<Bytes> {
        self.calls.lock().unwrap().push((offset, limit));
        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
        if self.fail_reads {
            bail!("channel dropped");
        }
        let len = u64::from(limit).min(self.total.saturating_sub(offset));
        Ok(Bytes::from(
            (offset..offset + len).map(Self::byte_at).collect::<Vec<u8>>(),
        ))
    }
}

struct Candidates(Vec<Arc<PatternHandle>>);

impl CandidateProvider for Candidates {
    fn candidates(&self) -> Vec<Arc<dyn RemoteHandle>> {
        self.0
            .iter()
            .map(|h| h.clone() as Arc<dyn RemoteHandle>)
            .collect()
    }
}

/// Builds deterministic surfaces on demand: each plays a short clip and
/// records the configured segments.
struct SurfaceFactory {
    segments: Vec<Bytes>,
    /// None simulates a source that never signals metadata or ends.
    duration_secs: Option<f64>,
    reject_play: bool,
    unavailable: bool,
}

#[async_trait]
impl SurfaceProvider for SurfaceFactory {
    async fn open(&self, _source: &SourceLocator) -> Result<Box<dyn PlaybackSurface>> {
        if self.unavailable {
            bail!("no off-screen surface in this environment");
        }
        Ok(Box::new(ScriptedSurface {
            duration_secs: self.duration_secs,
            reject_play: self.reject_play,
            segments: self.segments.clone(),
            playing_since: None,
            rate: 1.0,
        }))
    }
}

struct ScriptedSurface {
    duration_secs: Option<f64>,
    reject_play: bool,
    segments: Vec<Bytes>,
    playing_since: Option<std::time::Instant>,
    rate: f64,
}

impl ScriptedSurface {
    fn position(&self) -> f64 {
        self.playing_since
            .map(|t| t.elapsed().as_secs_f64() * self.rate)
            .unwrap_or(0.0)
    }
}

#[async_trait]
impl PlaybackSurface for ScriptedSurface {
    async fn await_metadata(&mut self) -> Result<MediaMetadata> {
        match self.duration_secs {
            Some(d) => Ok(MediaMetadata {
                duration_secs: Some(d),
            }),
            None => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    async fn configure(&mut self, rate: f64, _muted: bool) -> Result<()> {
        self.rate = rate;
        Ok(())
    }

    async fn play(&mut self) -> std::result::Result<(), PlayError> {
        if self.reject_play {
            return Err(PlayError::Rejected);
        }
        self.playing_since = Some(std::time::Instant::now());
        Ok(())
    }

    async fn begin_capture(&mut self) -> Result<Box<dyn Recorder>> {
        Ok(Box::new(ScriptedRecorder {
            segments: self.segments.clone(),
            delivered: 0,
            stopped: false,
        }))
    }

    async fn buffered_fraction(&self) -> Result<f64> {
        match self.duration_secs {
            Some(d) if d > 0.0 => Ok((self.position() / d).min(1.0)),
            _ => Ok(0.0),
        }
    }

    async fn position_secs(&self) -> Result<f64> {
        Ok(self.position())
    }

    async fn ended(&mut self) -> Result<()> {
        let Some(d) = self.duration_secs else {
            std::future::pending::<()>().await;
            unreachable!()
        };
        loop {
            if self.position() >= d {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

struct ScriptedRecorder {
    segments: Vec<Bytes>,
    delivered: usize,
    stopped: bool,
}

#[async_trait]
impl Recorder for ScriptedRecorder {
    async fn next_segment(&mut self) -> Result<Option<Bytes>> {
        if self.delivered >= self.segments.len() {
            if self.stopped {
                return Ok(None);
            }
            std::future::pending::<()>().await;
            unreachable!()
        }
        if !self.stopped {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let seg = self.segments[self.delivered].clone();
        self.delivered += 1;
        Ok(Some(seg))
    }

    fn mime_type(&self) -> String {
        "video/webm;codecs=vp8,opus".to_string()
    }

    async fn stop(&mut self) -> Result<()> {
        self.stopped = true;
        Ok(())
    }
}

#[derive(Default)]
struct MemorySink {
    saved: Mutex<Vec<(Bytes, String, String)>>,
}

#[async_trait]
impl ArtifactSink for MemorySink {
    async fn persist(&self, artifact: &Artifact, filename: &str) -> Result<()> {
        self.saved.lock().unwrap().push((
            artifact.bytes.clone(),
            artifact.mime_type.clone(),
            filename.to_string(),
        ));
        Ok(())
    }
}

// ── Helpers ──

fn descriptor(total: u64) -> MediaDescriptor {
    MediaDescriptor {
        id: 881_502,
        access_token: -12_345,
        file_reference: vec![0xde, 0xad, 0xbe, 0xef],
        shard_id: 2,
        total_size: total,
        mime_hint: Some("video/mp4".into()),
        suggested_name: Some("lecture".into()),
    }
}

fn element_source() -> SourceLocator {
    SourceLocator::Element {
        reference: "video-7".into(),
    }
}

fn test_config() -> EngineConfig {
    EngineConfig {
        retry_backoff: Duration::from_millis(1),
        metadata_timeout: Duration::from_millis(50),
        capture_ceiling: Duration::from_millis(300),
        capture_poll: Duration::from_millis(20),
        fetch_timeout: Duration::from_secs(2),
        ..EngineConfig::default()
    }
}

fn drain(rx: &mut siphon_engine::progress::EventReceiver) -> Vec<TaskNotice> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

fn states(notices: &[TaskNotice]) -> Vec<TaskState> {
    notices
        .iter()
        .filter_map(|n| match n.event {
            TaskEvent::StateChanged { state } => Some(state),
            _ => None,
        })
        .collect()
}

fn progress_percents(notices: &[TaskNotice], id: Uuid) -> Vec<u8> {
    notices
        .iter()
        .filter(|n| n.task_id == id)
        .filter_map(|n| match n.event {
            TaskEvent::Progress { percent, .. } => Some(percent),
            _ => None,
        })
        .collect()
}

// ── Scenarios ──

#[tokio::test]
async fn chunked_transfer_partitions_and_completes() {
    init_tracing();
    let handle = PatternHandle::new(3 * MIB);
    let sink = Arc::new(MemorySink::default());
    let orch = Orchestrator::new(
        test_config(),
        Arc::new(FixedResolver(Some(descriptor(3 * MIB)))),
        Box::new(Candidates(vec![handle.clone()])),
        Arc::new(SurfaceFactory {
            segments: vec![],
            duration_secs: None,
            reject_play: false,
            unavailable: true,
        }),
        sink.clone(),
    );
    let mut rx = orch.subscribe();

    let id = orch.create_task(element_source(), None);
    let outcome = orch.run(id).await.unwrap();
    assert_eq!(outcome.state, TaskState::Completed);

    // Exactly three strictly sequential calls partitioning [0, 3 MiB).
    let calls = handle.calls.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![(0, MIB as u32), (MIB, MIB as u32), (2 * MIB, MIB as u32)]
    );

    let notices = drain(&mut rx);
    assert_eq!(
        states(&notices),
        vec![
            TaskState::ResolvingDescriptor,
            TaskState::StrategyChunked,
            TaskState::Assembling,
            TaskState::Completed,
        ]
    );

    // Progress is non-decreasing and hits 100 exactly once.
    let percents = progress_percents(&notices, id);
    assert!(percents.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(percents.iter().filter(|p| **p == 100).count(), 1);
    assert_eq!(*percents.last().unwrap(), 100);

    // The sink received the exact bytes with the descriptor-derived name.
    let saved = sink.saved.lock().unwrap();
    let (bytes, mime, filename) = &saved[0];
    assert_eq!(bytes.len() as u64, 3 * MIB);
    assert!(bytes
        .iter()
        .enumerate()
        .all(|(i, b)| *b == PatternHandle::byte_at(i as u64)));
    assert_eq!(mime, "video/mp4");
    assert_eq!(filename, "lecture.mp4");
}

#[tokio::test]
async fn probe_failure_skips_chunked_strategy() {
    init_tracing();
    let mut dead = PatternHandle::new(MIB);
    Arc::get_mut(&mut dead).unwrap().healthy = false;
    let orch = Orchestrator::new(
        test_config(),
        Arc::new(FixedResolver(Some(descriptor(MIB)))),
        Box::new(Candidates(vec![dead])),
        Arc::new(SurfaceFactory {
            segments: vec![Bytes::from_static(b"recorded")],
            duration_secs: Some(0.1),
            reject_play: false,
            unavailable: false,
        }),
        Arc::new(MemorySink::default()),
    );
    let mut rx = orch.subscribe();

    let outcome = orch.acquire(element_source(), None).await;
    assert_eq!(outcome.state, TaskState::Completed);

    // ResolvingDescriptor transitions directly to StrategyCapture.
    let observed = states(&drain(&mut rx));
    assert!(!observed.contains(&TaskState::StrategyChunked));
    assert_eq!(observed[0], TaskState::ResolvingDescriptor);
    assert_eq!(observed[1], TaskState::StrategyCapture);
}

#[tokio::test]
async fn failed_probe_cooldown_suppresses_reprobing_for_next_task() {
    init_tracing();
    let mut dead = PatternHandle::new(MIB);
    Arc::get_mut(&mut dead).unwrap().healthy = false;
    let dead_probe_counter = dead.clone();
    let orch = Orchestrator::new(
        test_config(),
        Arc::new(FixedResolver(Some(descriptor(MIB)))),
        Box::new(Candidates(vec![dead])),
        Arc::new(SurfaceFactory {
            segments: vec![Bytes::from_static(b"seg")],
            duration_secs: Some(0.05),
            reject_play: false,
            unavailable: false,
        }),
        Arc::new(MemorySink::default()),
    );

    orch.acquire(element_source(), None).await;
    assert_eq!(dead_probe_counter.pings.load(Ordering::SeqCst), 1);

    // A second task within the cooldown window issues zero probe calls.
    orch.acquire(element_source(), None).await;
    assert_eq!(dead_probe_counter.pings.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn transfer_failure_falls_back_to_capture() {
    init_tracing();
    let mut flaky = PatternHandle::new(MIB);
    Arc::get_mut(&mut flaky).unwrap().fail_reads = true;
    let orch = Orchestrator::new(
        test_config(),
        Arc::new(FixedResolver(Some(descriptor(MIB)))),
        Box::new(Candidates(vec![flaky])),
        Arc::new(SurfaceFactory {
            segments: vec![Bytes::from_static(b"fallback-data")],
            duration_secs: Some(0.1),
            reject_play: false,
            unavailable: false,
        }),
        Arc::new(MemorySink::default()),
    );
    let mut rx = orch.subscribe();

    let outcome = orch.acquire(element_source(), None).await;
    assert_eq!(outcome.state, TaskState::Completed);

    let notices = drain(&mut rx);
    let observed = states(&notices);
    assert!(observed.contains(&TaskState::StrategyChunked));
    assert!(observed.contains(&TaskState::StrategyCapture));
    assert!(notices.iter().any(|n| matches!(
        n.event,
        TaskEvent::StrategyFallback {
            from: TaskState::StrategyChunked,
            kind: ErrorKind::TransferFatal,
            ..
        }
    )));
}

#[tokio::test]
async fn capture_without_segments_falls_to_fetch() {
    init_tracing();
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"fetched-whole".to_vec())
                .insert_header("content-type", "video/mp4"),
        )
        .mount(&server)
        .await;

    let sink = Arc::new(MemorySink::default());
    let orch = Orchestrator::new(
        test_config(),
        Arc::new(FixedResolver(None)),
        Box::new(Candidates(vec![])),
        // Recorder never yields, source never ends: ceiling fires with zero
        // segments, which must not count as success.
        Arc::new(SurfaceFactory {
            segments: vec![],
            duration_secs: None,
            reject_play: false,
            unavailable: false,
        }),
        sink.clone(),
    );
    let mut rx = orch.subscribe();

    let source = SourceLocator::Url {
        url: format!("{}/clip", server.uri()),
    };
    let outcome = orch.acquire(source, Some("talk".into())).await;
    assert_eq!(outcome.state, TaskState::Completed);

    let observed = states(&drain(&mut rx));
    assert!(observed.contains(&TaskState::StrategyFetch));

    let saved = sink.saved.lock().unwrap();
    assert_eq!(&saved[0].0[..], b"fetched-whole");
    assert_eq!(saved[0].2, "talk.mp4");
}

#[tokio::test]
async fn exhausted_chain_fails_with_fetch_blocked() {
    init_tracing();
    let orch = Orchestrator::new(
        test_config(),
        Arc::new(FixedResolver(None)),
        Box::new(Candidates(vec![])),
        Arc::new(SurfaceFactory {
            segments: vec![],
            duration_secs: None,
            reject_play: true,
            unavailable: false,
        }),
        Arc::new(MemorySink::default()),
    );
    let mut rx = orch.subscribe();

    // Element source: the fetch strategy has nothing addressable.
    let outcome = orch.acquire(element_source(), None).await;
    assert_eq!(outcome.state, TaskState::Failed);
    let failure = outcome.failure.unwrap();
    assert_eq!(failure.kind, ErrorKind::FetchBlocked);

    let notices = drain(&mut rx);
    // Autoplay rejection was surfaced on the way through.
    assert!(notices.iter().any(|n| matches!(
        n.event,
        TaskEvent::StrategyFallback {
            kind: ErrorKind::CaptureBlocked,
            ..
        }
    )));
    assert!(notices
        .iter()
        .any(|n| matches!(n.event, TaskEvent::Failed { .. })));
    // Failure never emits the terminal 100.
    assert!(!progress_percents(&notices, outcome.task_id).contains(&100));
}

#[tokio::test]
async fn cancellation_mid_transfer_is_silent() {
    init_tracing();
    let mut slow = PatternHandle::new(64 * MIB);
    Arc::get_mut(&mut slow).unwrap().read_delay = Duration::from_millis(25);
    let sink = Arc::new(MemorySink::default());
    let orch = Arc::new(Orchestrator::new(
        test_config(),
        Arc::new(FixedResolver(Some(descriptor(64 * MIB)))),
        Box::new(Candidates(vec![slow])),
        Arc::new(SurfaceFactory {
            segments: vec![],
            duration_secs: None,
            reject_play: false,
            unavailable: true,
        }),
        sink.clone(),
    ));
    let mut rx = orch.subscribe();

    let id = orch.create_task(element_source(), None);
    let runner = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.run(id).await })
    };
    tokio::time::sleep(Duration::from_millis(60)).await;
    orch.cancel(id);

    let outcome = runner.await.unwrap().unwrap();
    assert_eq!(outcome.state, TaskState::Cancelled);
    assert_eq!(orch.task_state(id), Some(TaskState::Cancelled));

    // No completion, no failure, no terminal progress for the cancelled id.
    let notices = drain(&mut rx);
    for notice in &notices {
        assert!(!matches!(
            notice.event,
            TaskEvent::Completed { .. } | TaskEvent::Failed { .. }
        ));
    }
    assert!(!progress_percents(&notices, id).contains(&100));
    assert!(sink.saved.lock().unwrap().is_empty());
}

#[tokio::test]
async fn capture_artifact_uses_recorder_mime_not_source_hint() {
    init_tracing();
    let sink = Arc::new(MemorySink::default());
    let orch = Orchestrator::new(
        test_config(),
        // Descriptor resolves but there is no handle, so capture runs; the
        // descriptor's mp4 hint must not leak into the webm artifact.
        Arc::new(FixedResolver(Some(descriptor(MIB)))),
        Box::new(Candidates(vec![])),
        Arc::new(SurfaceFactory {
            segments: vec![Bytes::from_static(b"webm-bits")],
            duration_secs: Some(0.05),
            reject_play: false,
            unavailable: false,
        }),
        sink.clone(),
    );

    let outcome = orch.acquire(element_source(), None).await;
    assert_eq!(outcome.state, TaskState::Completed);

    let saved = sink.saved.lock().unwrap();
    assert_eq!(saved[0].1, "video/webm;codecs=vp8,opus");
    assert_eq!(saved[0].2, "lecture.webm");
}
