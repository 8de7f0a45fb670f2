use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cockade_watch::{
    AuthCredential, AuthError, AuthStatus, CaptureDevice, CaptureError, CaptureRequest,
    CapturedFrame, DetectionEndpoint, DetectionEngine, DetectionError, DetectionResponse,
    DeviceProvider, EncodedFrame, EngineConfig, EngineError, EngineEvent, Facing,
    SchedulerState, SkipReason, SourceMode, TokenEndpoint, TriggerOutcome,
};

struct StaticToken {
    calls: AtomicUsize,
}

impl TokenEndpoint for StaticToken {
    fn fetch_token(&self) -> Result<AuthCredential, AuthError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(AuthCredential::new(format!("session-{}", n)))
    }
}

type Reply = dyn Fn(usize) -> Result<DetectionResponse, DetectionError> + Send + Sync;

struct FakeDetector {
    calls: AtomicUsize,
    gate: Mutex<Option<Receiver<()>>>,
    reply: Box<Reply>,
}

impl FakeDetector {
    fn new(
        reply: impl Fn(usize) -> Result<DetectionResponse, DetectionError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            gate: Mutex::new(None),
            reply: Box::new(reply),
        }
    }

    fn hits() -> Self {
        Self::new(|_| Ok(hit()))
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DetectionEndpoint for FakeDetector {
    fn name(&self) -> &str {
        "fake"
    }

    fn submit(
        &self,
        _credential: &AuthCredential,
        frame: &EncodedFrame,
    ) -> Result<DetectionResponse, DetectionError> {
        assert!(!frame.is_empty());
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(gate) = self.gate.lock().unwrap().as_ref() {
            let _ = gate.recv();
        }
        (self.reply)(n)
    }
}

fn hit() -> DetectionResponse {
    serde_json::from_str(
        r#"{
            "detection_classes": ["patriota"],
            "detection_boxes": [[12, 16, 36, 48]],
            "detection_scores": [0.9]
        }"#,
    )
    .unwrap()
}

/// Devices that count how many are open at once.
#[derive(Clone, Default)]
struct CountingDevices {
    opened: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
    deny: bool,
}

struct CountingDevice {
    live: Arc<AtomicUsize>,
    width: u32,
    height: u32,
}

impl DeviceProvider for CountingDevices {
    fn open(&self, request: &CaptureRequest) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        if self.deny {
            return Err(CaptureError::PermissionDenied("camera blocked".to_string()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingDevice {
            live: self.live.clone(),
            width: request.ideal.width,
            height: request.ideal.height,
        }))
    }
}

impl CaptureDevice for CountingDevice {
    fn name(&self) -> &str {
        "counting"
    }

    fn grab(&mut self) -> Result<CapturedFrame, CaptureError> {
        let len = (self.width * self.height * 3) as usize;
        CapturedFrame::from_rgb(vec![90; len], self.width, self.height)
    }
}

impl Drop for CountingDevice {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Harness {
    engine: Arc<DetectionEngine>,
    token: Arc<StaticToken>,
    detector: Arc<FakeDetector>,
    devices: CountingDevices,
}

fn harness(detector: FakeDetector, devices: CountingDevices) -> Harness {
    let mut config = EngineConfig::default();
    config.capture.width = 64;
    config.capture.height = 48;
    config.capture.grab_fps = 50;
    let token = Arc::new(StaticToken {
        calls: AtomicUsize::new(0),
    });
    let detector = Arc::new(detector);
    let engine = DetectionEngine::new(
        config,
        token.clone(),
        detector.clone(),
        Arc::new(devices.clone()),
    )
    .expect("engine");
    Harness {
        engine: Arc::new(engine),
        token,
        detector,
        devices,
    }
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 4) as u8, (y * 4) as u8, 128])
    });
    let mut out = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
        .unwrap();
    out
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

fn drain(events: &mpsc::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    events.try_iter().collect()
}

#[test]
fn uploaded_image_is_analysed_immediately() {
    let h = harness(FakeDetector::hits(), CountingDevices::default());
    let events = h.engine.subscribe();
    h.engine.authenticate().unwrap();

    let outcome = h.engine.analyze_image(&png(320, 240)).unwrap();
    let TriggerOutcome::Completed(result) = outcome else {
        panic!("expected a completed detection");
    };
    assert!(result.is_detected());
    assert_eq!(result.confidence(), 0.9);

    let status = h.engine.status();
    assert_eq!(status.mode, SourceMode::StaticImage);
    assert_eq!(status.dimensions.map(|d| (d.width, d.height)), Some((320, 240)));
    assert_eq!(status.last_result, Some(result));
    assert_eq!(status.auth, AuthStatus::Held);
    assert!(!status.in_flight);

    let overlay = h.engine.overlay().unwrap();
    assert_eq!(overlay.left, 16.0 / 320.0);
    assert_eq!(overlay.top, 12.0 / 240.0);
    assert_eq!(overlay.width, 32.0 / 320.0);
    assert_eq!(overlay.height, 24.0 / 240.0);

    let stats = h.engine.stats();
    assert_eq!((stats.total, stats.detected_count), (1, 1));

    let seen = drain(&events);
    assert_eq!(seen[0], EngineEvent::AuthReady);
    assert!(seen
        .iter()
        .any(|e| matches!(e, EngineEvent::ImageLoaded(d) if d.width == 320)));
    assert!(seen
        .iter()
        .any(|e| matches!(e, EngineEvent::DetectionCompleted(_))));
}

#[test]
fn malformed_upload_is_a_decode_error() {
    let h = harness(FakeDetector::hits(), CountingDevices::default());
    h.engine.authenticate().unwrap();
    let err = h.engine.analyze_image(b"definitely not an image").unwrap_err();
    assert!(matches!(err, EngineError::Decode(_)));
    assert_eq!(h.engine.status().mode, SourceMode::Idle);
    assert_eq!(h.detector.calls(), 0);
}

#[test]
fn triggers_are_single_flight() {
    let (release, gate) = mpsc::channel();
    let detector = FakeDetector::hits();
    *detector.gate.lock().unwrap() = Some(gate);
    let h = harness(detector, CountingDevices::default());
    h.engine.authenticate().unwrap();
    h.engine.load_image(&png(64, 64)).unwrap();

    let first = {
        let engine = h.engine.clone();
        std::thread::spawn(move || engine.trigger_once())
    };
    assert!(wait_until(|| h.detector.calls() == 1));
    assert_eq!(h.engine.status().scheduler, SchedulerState::InFlight);

    for _ in 0..3 {
        assert_eq!(
            h.engine.trigger_once().unwrap(),
            TriggerOutcome::Skipped(SkipReason::InFlight)
        );
    }
    release.send(()).unwrap();

    assert!(matches!(
        first.join().unwrap(),
        Ok(TriggerOutcome::Completed(_))
    ));
    assert_eq!(h.detector.calls(), 1);
    assert_eq!(h.engine.stats().total, 1);
}

#[test]
fn live_polling_records_until_capture_stops() {
    let h = harness(FakeDetector::hits(), CountingDevices::default());
    let events = h.engine.subscribe();
    h.engine.authenticate().unwrap();

    h.engine.start_capture(Some(Facing::Environment)).unwrap();
    assert_eq!(h.devices.live.load(Ordering::SeqCst), 1);
    assert!(wait_until(|| h.engine.status().dimensions.is_some()));

    assert!(h.engine.start_polling_every(Duration::from_millis(20)));
    assert!(!h.engine.start_polling_every(Duration::from_millis(20)));
    assert!(wait_until(|| h.engine.stats().total >= 3));

    h.engine.stop_capture();
    assert_eq!(h.devices.live.load(Ordering::SeqCst), 0);
    let status = h.engine.status();
    assert_eq!(status.mode, SourceMode::Idle);
    assert!(!status.polling);

    assert!(wait_until(|| !h.engine.status().in_flight));
    assert_eq!(
        h.engine.trigger_once().unwrap(),
        TriggerOutcome::Skipped(SkipReason::NoSource)
    );
    let settled = h.engine.stats().total;
    std::thread::sleep(Duration::from_millis(120));
    assert_eq!(h.engine.stats().total, settled);

    let recent = h.engine.recent_activity();
    assert_eq!(recent.len(), settled.min(5));
    assert!(recent
        .windows(2)
        .all(|pair| pair[0].timestamp() >= pair[1].timestamp()));

    let seen = drain(&events);
    assert!(seen.contains(&EngineEvent::CaptureStarted {
        facing: Facing::Environment
    }));
    assert!(seen.contains(&EngineEvent::PollingStarted {
        interval: Duration::from_millis(20)
    }));
    assert!(seen.contains(&EngineEvent::PollingStopped));
    assert!(seen.contains(&EngineEvent::CaptureStopped));
}

#[test]
fn switching_to_an_image_releases_the_camera() {
    let h = harness(FakeDetector::hits(), CountingDevices::default());
    h.engine.authenticate().unwrap();

    h.engine.start_capture(None).unwrap();
    h.engine.start_polling_every(Duration::from_secs(60));
    assert_eq!(h.devices.live.load(Ordering::SeqCst), 1);

    h.engine.load_image(&png(100, 50)).unwrap();
    assert_eq!(h.devices.opened.load(Ordering::SeqCst), 1);
    assert_eq!(h.devices.live.load(Ordering::SeqCst), 0);

    let status = h.engine.status();
    assert_eq!(status.mode, SourceMode::StaticImage);
    assert!(!status.polling);
    assert!(status.last_result.is_none());

    h.engine.start_capture(None).unwrap();
    assert_eq!(h.devices.live.load(Ordering::SeqCst), 1);
    assert_eq!(h.engine.status().mode, SourceMode::LiveCapture);
    h.engine.shutdown();
    assert_eq!(h.devices.live.load(Ordering::SeqCst), 0);
}

#[test]
fn denied_camera_leaves_engine_idle() {
    let devices = CountingDevices {
        deny: true,
        ..CountingDevices::default()
    };
    let h = harness(FakeDetector::hits(), devices);
    let events = h.engine.subscribe();

    let err = h.engine.start_capture(None).unwrap_err();
    assert!(matches!(err, CaptureError::PermissionDenied(_)));
    assert_eq!(h.engine.status().mode, SourceMode::Idle);
    assert_eq!(drain(&events), vec![EngineEvent::CaptureFailed(err)]);
}

#[test]
fn missing_credential_fails_fast_then_recovers() {
    let h = harness(FakeDetector::hits(), CountingDevices::default());
    h.engine.load_image(&png(64, 64)).unwrap();

    assert_eq!(
        h.engine.trigger_once().unwrap_err(),
        DetectionError::Unauthenticated
    );
    assert_eq!(h.detector.calls(), 0);
    assert!(wait_until(|| h.engine.status().auth == AuthStatus::Held));
    assert_eq!(h.token.calls.load(Ordering::SeqCst), 1);

    assert!(matches!(
        h.engine.trigger_once(),
        Ok(TriggerOutcome::Completed(_))
    ));
}

#[test]
fn engine_start_acquires_credential_in_background() {
    let h = harness(FakeDetector::hits(), CountingDevices::default());
    let events = h.engine.subscribe();
    assert_eq!(h.engine.status().auth, AuthStatus::Absent);

    h.engine.start();
    assert_eq!(
        events.recv_timeout(Duration::from_secs(5)).unwrap(),
        EngineEvent::AuthReady
    );
    assert_eq!(h.engine.status().auth, AuthStatus::Held);

    h.engine.start();
    h.engine.load_image(&png(64, 64)).unwrap();
    assert!(matches!(
        h.engine.trigger_once(),
        Ok(TriggerOutcome::Completed(_))
    ));
    assert_eq!(h.token.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn rejected_credential_is_refreshed_on_next_call() {
    let detector = FakeDetector::new(|n| {
        if n == 1 {
            Err(DetectionError::ServiceError {
                status_code: 401,
                body: "expired".to_string(),
            })
        } else {
            Ok(hit())
        }
    });
    let h = harness(detector, CountingDevices::default());
    h.engine.authenticate().unwrap();
    h.engine.load_image(&png(64, 64)).unwrap();

    assert!(h.engine.trigger_once().is_err());
    assert_eq!(h.engine.status().auth, AuthStatus::Absent);
    assert_eq!(
        h.engine.trigger_once().unwrap_err(),
        DetectionError::Unauthenticated
    );
    assert!(wait_until(|| h.engine.status().auth == AuthStatus::Held));
    assert_eq!(h.token.calls.load(Ordering::SeqCst), 2);
    assert!(matches!(
        h.engine.trigger_once(),
        Ok(TriggerOutcome::Completed(_))
    ));
    assert_eq!(h.engine.stats().total, 1);
}
