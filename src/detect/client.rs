use std::io::Read;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use reqwest::blocking::multipart::{Form, Part};

use super::response::DetectionResponse;
use super::result::DetectionResult;
use crate::auth::{AuthCredential, AuthSession};
use crate::error::DetectionError;
use crate::frame::EncodedFrame;

/// Multipart field carrying the image.
pub const IMAGE_FIELD: &str = "image";
/// File name the image is submitted under.
pub const IMAGE_FILE_NAME: &str = "detection-image.jpg";
/// Header carrying the credential.
pub const DEFAULT_AUTH_HEADER: &str = "X-Auth-Token";

const MAX_RESPONSE_BYTES: u64 = 4 * 1024 * 1024;

/// Remote detector.
///
/// Implementations submit exactly one frame per call and never retry.
pub trait DetectionEndpoint: Send + Sync {
    fn name(&self) -> &str;

    fn submit(
        &self,
        credential: &AuthCredential,
        frame: &EncodedFrame,
    ) -> Result<DetectionResponse, DetectionError>;
}

/// `POST` a multipart form with a single image part.
pub struct HttpDetectionEndpoint {
    url: String,
    auth_header: String,
    client: reqwest::blocking::Client,
}

impl HttpDetectionEndpoint {
    pub fn new(url: impl Into<String>, timeout: Option<Duration>) -> Result<Self, DetectionError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DetectionError::Transport(format!("http client init: {}", e)))?;
        Ok(Self {
            url: url.into(),
            auth_header: DEFAULT_AUTH_HEADER.to_string(),
            client,
        })
    }

    pub fn with_auth_header(mut self, header: impl Into<String>) -> Self {
        self.auth_header = header.into();
        self
    }
}

impl DetectionEndpoint for HttpDetectionEndpoint {
    fn name(&self) -> &str {
        &self.url
    }

    fn submit(
        &self,
        credential: &AuthCredential,
        frame: &EncodedFrame,
    ) -> Result<DetectionResponse, DetectionError> {
        let response = self
            .client
            .post(&self.url)
            .header(self.auth_header.as_str(), credential.expose())
            .multipart(image_form(frame)?)
            .send()
            .map_err(|e| DetectionError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DetectionError::ServiceError {
                status_code: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }

        let mut raw = Vec::new();
        response
            .take(MAX_RESPONSE_BYTES)
            .read_to_end(&mut raw)
            .map_err(|e| DetectionError::Transport(format!("read response body: {}", e)))?;
        DetectionResponse::from_slice(&raw)
    }
}

pub(crate) fn image_form(frame: &EncodedFrame) -> Result<Form, DetectionError> {
    let part = Part::bytes(frame.bytes().to_vec())
        .file_name(IMAGE_FILE_NAME)
        .mime_str(frame.media_type())
        .map_err(|e| {
            DetectionError::Transport(format!("media type '{}': {}", frame.media_type(), e))
        })?;
    Ok(Form::new().part(IMAGE_FIELD, part))
}

/// Submits frames with the session credential and normalizes the answer.
pub struct DetectionClient {
    auth: Arc<AuthSession>,
    endpoint: Arc<dyn DetectionEndpoint>,
    target_class: String,
}

impl DetectionClient {
    pub fn new(
        auth: Arc<AuthSession>,
        endpoint: Arc<dyn DetectionEndpoint>,
        target_class: impl Into<String>,
    ) -> Self {
        Self {
            auth,
            endpoint,
            target_class: target_class.into(),
        }
    }

    pub fn target_class(&self) -> &str {
        &self.target_class
    }

    pub fn auth(&self) -> &Arc<AuthSession> {
        &self.auth
    }

    /// One detection round-trip for `frame`.
    ///
    /// Without a credential the call fails fast with `Unauthenticated` and a
    /// background token request is started. A 401/403 from the service drops
    /// the held credential so the next call re-acquires.
    pub fn detect(&self, frame: &EncodedFrame) -> Result<DetectionResult, DetectionError> {
        let Some(credential) = self.auth.current() else {
            if self.auth.spawn_acquire() {
                log::info!("detection attempted without credential; re-acquiring");
            }
            return Err(DetectionError::Unauthenticated);
        };

        log::debug!(
            "submitting {} byte frame ({}) to {}",
            frame.len(),
            frame.dimensions(),
            self.endpoint.name()
        );
        let response = match self.endpoint.submit(&credential, frame) {
            Ok(response) => response,
            Err(err) => {
                if let DetectionError::ServiceError {
                    status_code: 401 | 403,
                    ..
                } = &err
                {
                    self.auth.invalidate();
                }
                return Err(err);
            }
        };

        let result = response.into_result(&self.target_class, SystemTime::now())?;
        if result.is_detected() {
            log::info!(
                "{} detected with confidence {:.2}",
                self.target_class,
                result.confidence()
            );
        }
        Ok(result)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::tests::FakeTokenEndpoint;
    use crate::auth::AuthStatus;
    use crate::events::EventBus;
    use crate::frame::tests::gradient_frame;
    use crate::frame::DEFAULT_JPEG_QUALITY;
    use crate::lock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Mutex};

    type Respond = dyn Fn(usize) -> Result<DetectionResponse, DetectionError> + Send + Sync;

    /// Endpoint answering from a closure over the 1-based call number.
    /// An optional gate holds each call until released.
    pub(crate) struct ScriptedEndpoint {
        pub calls: AtomicUsize,
        pub gate: Mutex<Option<mpsc::Receiver<()>>>,
        respond: Box<Respond>,
    }

    impl ScriptedEndpoint {
        pub(crate) fn new(
            respond: impl Fn(usize) -> Result<DetectionResponse, DetectionError> + Send + Sync + 'static,
        ) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                gate: Mutex::new(None),
                respond: Box::new(respond),
            }
        }

        pub(crate) fn always_detects(score: f64) -> Self {
            Self::new(move |_| Ok(target_response(score)))
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl DetectionEndpoint for ScriptedEndpoint {
        fn name(&self) -> &str {
            "scripted"
        }

        fn submit(
            &self,
            _credential: &AuthCredential,
            _frame: &EncodedFrame,
        ) -> Result<DetectionResponse, DetectionError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(gate) = lock(&self.gate).as_ref() {
                let _ = gate.recv();
            }
            (self.respond)(n)
        }
    }

    pub(crate) fn target_response(score: f64) -> DetectionResponse {
        DetectionResponse {
            detection_classes: Some(vec!["target".to_string()]),
            detection_boxes: Some(vec![vec![10.0, 20.0, 30.0, 60.0]]),
            detection_scores: Some(vec![score]),
        }
    }

    fn encoded() -> EncodedFrame {
        gradient_frame(32, 24)
            .encode_jpeg(DEFAULT_JPEG_QUALITY)
            .unwrap()
    }

    fn session() -> Arc<AuthSession> {
        Arc::new(AuthSession::new(
            Arc::new(FakeTokenEndpoint::ok()),
            Arc::new(EventBus::new()),
        ))
    }

    #[test]
    fn detect_normalizes_target_hit() {
        let auth = session();
        auth.acquire().unwrap();
        let endpoint = Arc::new(ScriptedEndpoint::always_detects(0.8));
        let client = DetectionClient::new(auth, endpoint.clone(), "target");

        let before = SystemTime::now();
        let result = client.detect(&encoded()).unwrap();
        assert!(result.is_detected());
        assert_eq!(result.confidence(), 0.8);
        assert!(result.timestamp() >= before);
        let b = result.bounding_box().unwrap();
        assert_eq!((b.x, b.y, b.width, b.height), (20.0, 10.0, 40.0, 20.0));
        assert_eq!(endpoint.calls(), 1);
    }

    #[test]
    fn missing_credential_fails_fast_and_reacquires() {
        let auth = session();
        let endpoint = Arc::new(ScriptedEndpoint::always_detects(0.8));
        let client = DetectionClient::new(auth.clone(), endpoint.clone(), "target");

        assert_eq!(
            client.detect(&encoded()),
            Err(DetectionError::Unauthenticated)
        );
        assert_eq!(endpoint.calls(), 0);

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while auth.status() != AuthStatus::Held && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(auth.status(), AuthStatus::Held);
    }

    #[test]
    fn rejected_credential_is_invalidated() {
        let auth = session();
        auth.acquire().unwrap();
        let endpoint = Arc::new(ScriptedEndpoint::new(|_| {
            Err(DetectionError::ServiceError {
                status_code: 401,
                body: "expired".to_string(),
            })
        }));
        let client = DetectionClient::new(auth.clone(), endpoint, "target");

        let err = client.detect(&encoded()).unwrap_err();
        assert!(matches!(
            err,
            DetectionError::ServiceError {
                status_code: 401,
                ..
            }
        ));
        assert!(auth.current().is_none());
    }

    #[test]
    fn server_errors_keep_the_credential() {
        let auth = session();
        auth.acquire().unwrap();
        let endpoint = Arc::new(ScriptedEndpoint::new(|_| {
            Err(DetectionError::ServiceError {
                status_code: 500,
                body: String::new(),
            })
        }));
        let client = DetectionClient::new(auth.clone(), endpoint, "target");
        assert!(client.detect(&encoded()).is_err());
        assert!(auth.current().is_some());
    }

    #[test]
    fn image_form_rejects_unusable_media_type() {
        let frame = EncodedFrame::new(
            b"JPEGDATA".to_vec(),
            crate::frame::FrameDimensions::new(2, 2).unwrap(),
            "not a mime type",
        );
        assert!(matches!(
            image_form(&frame),
            Err(DetectionError::Transport(_))
        ));

        let jpeg = EncodedFrame::new(
            b"JPEGDATA".to_vec(),
            crate::frame::FrameDimensions::new(2, 2).unwrap(),
            crate::frame::JPEG_MEDIA_TYPE,
        );
        assert!(!image_form(&jpeg).unwrap().boundary().is_empty());
    }
}
