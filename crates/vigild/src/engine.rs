//! Verification engine: a pool of worker threads owning attempt state.
//!
//! Each attempt lives on exactly one worker, chosen from its id, so frames
//! for one attempt are processed in submission order without locking. Async
//! callers hold a cloneable [`EngineHandle`] and talk to workers over
//! bounded channels. Every request carries a oneshot reply.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;
use vigil_core::{
    Attempt, AttemptError, AttemptProgress, AttemptReport, BoundingBox, Challenge, ChallengeKind,
    ChallengeOutcome, ChallengeValidator, FraudAggregator, Frame, LandmarkProvider, SmileDetector,
    TextureAnalyzer, VerificationConfig,
};

use crate::config::EngineConfig;
use crate::evidence::{Evidence, EvidenceSink};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] vigil_core::ConfigError),
    #[error("failed to spawn engine worker: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("unknown attempt {0}")]
    UnknownAttempt(Uuid),
    #[error("attempt {0} expired")]
    Expired(Uuid),
    #[error(transparent)]
    Attempt(#[from] AttemptError),
    #[error("engine worker exited")]
    ChannelClosed,
}

/// External capabilities the engine is built from.
pub struct Collaborators {
    pub landmarks: Arc<dyn LandmarkProvider>,
    pub smiles: Arc<dyn SmileDetector>,
    pub texture: TextureAnalyzer,
    pub evidence: Arc<dyn EvidenceSink>,
}

/// Challenge as presented to the subject.
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedChallenge {
    pub kind: ChallengeKind,
    pub prompt: String,
    pub timeout: Duration,
}

impl From<&Challenge> for IssuedChallenge {
    fn from(challenge: &Challenge) -> Self {
        Self {
            kind: challenge.kind,
            prompt: challenge.prompt.clone(),
            timeout: challenge.timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttemptStarted {
    pub id: Uuid,
    pub challenge: Option<IssuedChallenge>,
}

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

enum EngineRequest {
    Begin {
        id: Uuid,
        reply: Reply<AttemptStarted>,
    },
    Frame {
        id: Uuid,
        frame: Frame,
        reply: Reply<AttemptProgress>,
    },
    Challenge {
        id: Uuid,
        frames: Vec<Frame>,
        reply: Reply<ChallengeOutcome>,
    },
    Finalize {
        id: Uuid,
        frame: Frame,
        face_box: BoundingBox,
        reply: Reply<AttemptReport>,
    },
    Abort {
        id: Uuid,
        reply: Reply<bool>,
    },
    Sweep {
        reply: Reply<usize>,
    },
}

/// Clone-safe handle to the worker pool.
#[derive(Clone)]
pub struct EngineHandle {
    shards: Arc<[mpsc::Sender<EngineRequest>]>,
}

impl EngineHandle {
    /// Start an attempt, issuing a challenge when challenges are enabled.
    pub async fn begin(&self) -> Result<AttemptStarted, EngineError> {
        let id = Uuid::new_v4();
        self.call(id, |reply| EngineRequest::Begin { id, reply }).await
    }

    /// Feed one frame of the liveness stream.
    pub async fn submit_frame(&self, id: Uuid, frame: Frame) -> Result<AttemptProgress, EngineError> {
        self.call(id, |reply| EngineRequest::Frame { id, frame, reply })
            .await
    }

    /// Validate the challenge response burst. Answerable once.
    pub async fn answer_challenge(
        &self,
        id: Uuid,
        frames: Vec<Frame>,
    ) -> Result<ChallengeOutcome, EngineError> {
        self.call(id, |reply| EngineRequest::Challenge { id, frames, reply })
            .await
    }

    /// Run the fraud pipeline on `frame` and close the attempt.
    pub async fn finalize(
        &self,
        id: Uuid,
        frame: Frame,
        face_box: BoundingBox,
    ) -> Result<AttemptReport, EngineError> {
        self.call(id, |reply| EngineRequest::Finalize {
            id,
            frame,
            face_box,
            reply,
        })
        .await
    }

    /// Discard an attempt. Returns whether it existed.
    pub async fn abort(&self, id: Uuid) -> Result<bool, EngineError> {
        self.call(id, |reply| EngineRequest::Abort { id, reply }).await
    }

    /// Drop expired attempts on every worker. Returns how many were dropped.
    pub async fn sweep(&self) -> Result<usize, EngineError> {
        let mut swept = 0;
        for shard in self.shards.iter() {
            swept += Self::send(shard, |reply| EngineRequest::Sweep { reply }).await?;
        }
        Ok(swept)
    }

    /// Sweep expired attempts every `every` until the engine shuts down.
    pub fn spawn_sweeper(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match handle.sweep().await {
                    Ok(0) => {}
                    Ok(swept) => tracing::info!(swept, "expired attempts dropped"),
                    Err(_) => break,
                }
            }
        })
    }

    fn shard(&self, id: Uuid) -> &mpsc::Sender<EngineRequest> {
        let index = id.as_u128() % self.shards.len() as u128;
        &self.shards[index as usize]
    }

    async fn call<T>(
        &self,
        id: Uuid,
        request: impl FnOnce(Reply<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        Self::send(self.shard(id), request).await
    }

    async fn send<T>(
        shard: &mpsc::Sender<EngineRequest>,
        request: impl FnOnce(Reply<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        shard
            .send(request(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Read-only state shared by all workers.
struct Pipeline {
    config: VerificationConfig,
    landmarks: Arc<dyn LandmarkProvider>,
    challenges: ChallengeValidator,
    aggregator: FraudAggregator,
    evidence: Arc<dyn EvidenceSink>,
}

/// Spawn the worker pool.
///
/// Validates configuration and builds the shared pipeline up front, so a
/// bad configuration fails here rather than on the first attempt.
pub fn spawn_engine(
    config: &VerificationConfig,
    engine: &EngineConfig,
    collaborators: Collaborators,
) -> Result<EngineHandle, EngineError> {
    config.validate()?;

    let texture = collaborators.texture.strategy_name();
    let challenges = ChallengeValidator::new(
        config.challenge.clone(),
        collaborators.landmarks.clone(),
        collaborators.smiles,
    )?;
    let aggregator = FraudAggregator::new(&config.fraud, collaborators.texture)?;

    let pipeline = Arc::new(Pipeline {
        config: config.clone(),
        landmarks: collaborators.landmarks,
        challenges,
        aggregator,
        evidence: collaborators.evidence,
    });

    let workers = engine.worker_count();
    let mut shards = Vec::with_capacity(workers);
    for index in 0..workers {
        let (tx, rx) = mpsc::channel::<EngineRequest>(engine.queue_depth.max(1));
        let worker = Worker {
            index,
            pipeline: pipeline.clone(),
            attempts: HashMap::new(),
        };
        std::thread::Builder::new()
            .name(format!("vigil-engine-{index}"))
            .spawn(move || worker.run(rx))
            .map_err(EngineError::Spawn)?;
        shards.push(tx);
    }

    tracing::info!(
        workers,
        texture,
        challenges = config.challenge.enabled,
        "engine started"
    );

    Ok(EngineHandle {
        shards: shards.into(),
    })
}

struct Worker {
    index: usize,
    pipeline: Arc<Pipeline>,
    attempts: HashMap<Uuid, Attempt>,
}

impl Worker {
    fn run(mut self, mut rx: mpsc::Receiver<EngineRequest>) {
        tracing::debug!(worker = self.index, "engine worker started");
        while let Some(req) = rx.blocking_recv() {
            match req {
                EngineRequest::Begin { id, reply } => {
                    let _ = reply.send(self.begin(id));
                }
                EngineRequest::Frame { id, frame, reply } => {
                    let result = self.attempt_mut(id).map(|a| a.observe(&frame));
                    let _ = reply.send(result);
                }
                EngineRequest::Challenge { id, frames, reply } => {
                    let pipeline = self.pipeline.clone();
                    let result = self.attempt_mut(id).and_then(|a| {
                        a.answer_challenge(&pipeline.challenges, &frames)
                            .map_err(EngineError::from)
                    });
                    let _ = reply.send(result);
                }
                EngineRequest::Finalize {
                    id,
                    frame,
                    face_box,
                    reply,
                } => {
                    let _ = reply.send(self.finalize(id, frame, face_box));
                }
                EngineRequest::Abort { id, reply } => {
                    let existed = self.attempts.remove(&id).is_some();
                    if existed {
                        tracing::info!(attempt = %id, "attempt discarded");
                    }
                    let _ = reply.send(Ok(existed));
                }
                EngineRequest::Sweep { reply } => {
                    let _ = reply.send(Ok(self.sweep(Instant::now())));
                }
            }
        }
        tracing::debug!(worker = self.index, "engine worker exiting");
    }

    fn begin(&mut self, id: Uuid) -> Result<AttemptStarted, EngineError> {
        let pipeline = &self.pipeline;
        let challenge = pipeline
            .config
            .challenge
            .enabled
            .then(|| pipeline.challenges.issue());
        let issued = challenge.as_ref().map(IssuedChallenge::from);

        let attempt = Attempt::new(id, &pipeline.config, pipeline.landmarks.clone(), challenge)?;
        self.attempts.insert(id, attempt);

        tracing::info!(
            attempt = %id,
            worker = self.index,
            challenge = ?issued.as_ref().map(|c| c.kind),
            "attempt started"
        );
        Ok(AttemptStarted { id, challenge: issued })
    }

    fn finalize(
        &mut self,
        id: Uuid,
        frame: Frame,
        face_box: BoundingBox,
    ) -> Result<AttemptReport, EngineError> {
        self.check_expiry(id)?;
        let attempt = self
            .attempts
            .remove(&id)
            .ok_or(EngineError::UnknownAttempt(id))?;

        let report = attempt.finalize(&self.pipeline.aggregator, &frame, face_box);
        if report.verdict.is_fraud {
            let evidence = Evidence::new(id, &frame, report.verdict.clone());
            self.pipeline.evidence.record(&evidence, &frame);
        }
        Ok(report)
    }

    fn attempt_mut(&mut self, id: Uuid) -> Result<&mut Attempt, EngineError> {
        self.check_expiry(id)?;
        self.attempts
            .get_mut(&id)
            .ok_or(EngineError::UnknownAttempt(id))
    }

    /// Drop `id` if it has outlived its TTL.
    fn check_expiry(&mut self, id: Uuid) -> Result<(), EngineError> {
        let expired = self
            .attempts
            .get(&id)
            .is_some_and(|a| a.is_expired_at(Instant::now()));
        if expired {
            self.attempts.remove(&id);
            tracing::info!(attempt = %id, "attempt expired");
            return Err(EngineError::Expired(id));
        }
        Ok(())
    }

    fn sweep(&mut self, now: Instant) -> usize {
        let before = self.attempts.len();
        self.attempts.retain(|_, a| !a.is_expired_at(now));
        let swept = before - self.attempts.len();
        if swept > 0 {
            tracing::debug!(worker = self.index, swept, "swept expired attempts");
        }
        swept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::sync::Mutex;
    use vigil_core::{
        AbortReason, BlinkStatus, Detection, EyeLandmarks, FaceLandmarks, FraudType, Point,
    };

    struct FixedLandmarks(Detection);

    impl LandmarkProvider for FixedLandmarks {
        fn detect(&self, _frame: &Frame) -> Detection {
            self.0.clone()
        }
    }

    struct NoSmiles;

    impl SmileDetector for NoSmiles {
        fn count_smiles(&self, _frame: &Frame) -> usize {
            0
        }
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<Uuid>>);

    impl EvidenceSink for RecordingSink {
        fn record(&self, evidence: &Evidence, _frame: &Frame) {
            self.0.lock().unwrap().push(evidence.attempt);
        }
    }

    /// Eye with an aspect ratio of 0.3.
    fn open_eye(x: f32) -> EyeLandmarks {
        EyeLandmarks::from_slice(&[
            Point::new(x, 100.0),
            Point::new(x + 10.0, 95.5),
            Point::new(x + 20.0, 95.5),
            Point::new(x + 30.0, 100.0),
            Point::new(x + 20.0, 104.5),
            Point::new(x + 10.0, 104.5),
        ])
        .unwrap()
    }

    fn open_face() -> Detection {
        Detection::Face(FaceLandmarks {
            bbox: BoundingBox::new(60.0, 60.0, 120.0, 140.0),
            left_eye: Some(open_eye(80.0)),
            right_eye: Some(open_eye(130.0)),
            nose: vec![Point::new(120.0, 130.0)],
            mouth: vec![Point::new(100.0, 160.0), Point::new(140.0, 160.0)],
        })
    }

    fn frame(index: u64) -> Frame {
        let image = RgbImage::from_fn(64, 64, |x, y| {
            let v = ((x * 5 + y * 11 + index as u32 * 17) % 180 + 40) as u8;
            Rgb([v, v, v])
        });
        Frame::new(index, image)
    }

    const FACE: BoundingBox = BoundingBox::new(0.0, 0.0, 120.0, 140.0);

    fn engine_with(
        detection: Detection,
        config: VerificationConfig,
        workers: usize,
    ) -> (EngineHandle, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let texture = TextureAnalyzer::new(&config.texture, None).unwrap();
        let handle = spawn_engine(
            &config,
            &EngineConfig {
                workers,
                queue_depth: 8,
            },
            Collaborators {
                landmarks: Arc::new(FixedLandmarks(detection)),
                smiles: Arc::new(NoSmiles),
                texture,
                evidence: sink.clone(),
            },
        )
        .unwrap();
        (handle, sink)
    }

    fn no_challenges() -> VerificationConfig {
        let mut config = VerificationConfig::default();
        config.challenge.enabled = false;
        config
    }

    #[tokio::test]
    async fn begin_issues_challenge_when_enabled() {
        let (engine, _) = engine_with(open_face(), VerificationConfig::default(), 1);
        let started = engine.begin().await.unwrap();
        let challenge = started.challenge.unwrap();
        assert_eq!(challenge.timeout, Duration::from_secs(10));
        assert!(!challenge.prompt.is_empty());

        let (engine, _) = engine_with(open_face(), no_challenges(), 1);
        assert!(engine.begin().await.unwrap().challenge.is_none());
    }

    #[tokio::test]
    async fn frames_report_progress() {
        let (engine, _) = engine_with(open_face(), no_challenges(), 2);
        let id = engine.begin().await.unwrap().id;
        let progress = engine.submit_frame(id, frame(0)).await.unwrap();
        match progress {
            AttemptProgress::Pending {
                status: BlinkStatus::Undetermined { blinks, .. },
                recent_blinks,
            } => {
                assert_eq!(blinks, 0);
                assert_eq!(recent_blinks, 0);
            }
            other => panic!("unexpected progress: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_attempt_rejected() {
        let (engine, _) = engine_with(open_face(), no_challenges(), 2);
        let id = Uuid::new_v4();
        assert!(matches!(
            engine.submit_frame(id, frame(0)).await,
            Err(EngineError::UnknownAttempt(got)) if got == id
        ));
    }

    #[tokio::test]
    async fn finalize_consumes_attempt_and_records_fraud() {
        let (engine, sink) = engine_with(open_face(), no_challenges(), 2);
        let id = engine.begin().await.unwrap().id;
        for i in 0..5 {
            engine.submit_frame(id, frame(i)).await.unwrap();
        }

        // Liveness window still open, so the attempt cannot pass.
        let report = engine.finalize(id, frame(5), FACE).await.unwrap();
        assert!(report.verdict.is_fraud);
        assert!(!report.accepted);
        assert_eq!(*sink.0.lock().unwrap(), vec![id]);

        assert!(matches!(
            engine.finalize(id, frame(6), FACE).await,
            Err(EngineError::UnknownAttempt(_))
        ));
    }

    #[tokio::test]
    async fn multiple_faces_abort_attempt() {
        let (engine, sink) = engine_with(Detection::MultipleFaces(2), no_challenges(), 1);
        let id = engine.begin().await.unwrap().id;
        let progress = engine.submit_frame(id, frame(0)).await.unwrap();
        assert_eq!(
            progress,
            AttemptProgress::Aborted(AbortReason::MultipleFaces { count: 2 })
        );

        let report = engine.finalize(id, frame(1), FACE).await.unwrap();
        assert_eq!(report.verdict.fraud_type, Some(FraudType::MultipleFaces));
        assert_eq!(sink.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn challenge_requires_issue() {
        let (engine, _) = engine_with(open_face(), no_challenges(), 1);
        let id = engine.begin().await.unwrap().id;
        let err = engine.answer_challenge(id, vec![frame(0)]).await.unwrap_err();
        assert!(matches!(err, EngineError::Attempt(AttemptError::NoChallenge)));
    }

    #[tokio::test]
    async fn challenge_answered_once() {
        let (engine, _) = engine_with(open_face(), VerificationConfig::default(), 1);
        let id = engine.begin().await.unwrap().id;
        engine
            .answer_challenge(id, (0..4).map(frame).collect())
            .await
            .unwrap();
        let err = engine.answer_challenge(id, vec![frame(9)]).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Attempt(AttemptError::ChallengeAnswered)
        ));
    }

    #[tokio::test]
    async fn abort_discards_attempt() {
        let (engine, _) = engine_with(open_face(), no_challenges(), 3);
        let id = engine.begin().await.unwrap().id;
        assert!(engine.abort(id).await.unwrap());
        assert!(!engine.abort(id).await.unwrap());
        assert!(matches!(
            engine.submit_frame(id, frame(0)).await,
            Err(EngineError::UnknownAttempt(_))
        ));
    }

    #[tokio::test]
    async fn attempts_spread_across_workers() {
        let (engine, _) = engine_with(open_face(), no_challenges(), 4);
        let mut ids = Vec::new();
        for _ in 0..16 {
            ids.push(engine.begin().await.unwrap().id);
        }
        for (i, id) in ids.iter().enumerate() {
            engine.submit_frame(*id, frame(i as u64)).await.unwrap();
        }
        assert_eq!(engine.sweep().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn expired_attempts_dropped() {
        let mut config = no_challenges();
        config.attempt.ttl_secs = 1;
        let (engine, _) = engine_with(open_face(), config, 1);
        let lazy = engine.begin().await.unwrap().id;
        let swept = engine.begin().await.unwrap().id;

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert!(matches!(
            engine.submit_frame(lazy, frame(0)).await,
            Err(EngineError::Expired(got)) if got == lazy
        ));
        assert_eq!(engine.sweep().await.unwrap(), 1);
        assert!(matches!(
            engine.submit_frame(swept, frame(0)).await,
            Err(EngineError::UnknownAttempt(_))
        ));
    }

    #[test]
    fn invalid_config_fails_spawn() {
        let mut config = no_challenges();
        config.blink.consecutive_frames = 0;
        let texture = TextureAnalyzer::new(&config.texture, None).unwrap();
        let result = spawn_engine(
            &config,
            &EngineConfig::default(),
            Collaborators {
                landmarks: Arc::new(FixedLandmarks(Detection::NoFace)),
                smiles: Arc::new(NoSmiles),
                texture,
                evidence: Arc::new(RecordingSink::default()),
            },
        );
        assert!(matches!(result, Err(EngineError::Config(_))));
    }
}
