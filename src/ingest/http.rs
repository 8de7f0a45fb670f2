//! HTTP camera device.
//!
//! Supports network cameras that serve either an MJPEG stream
//! (`multipart/x-mixed-replace`) or a single JPEG per request. The content type
//! of the first response decides which mode is used.

use std::io::Read;
use std::time::Duration;

use crate::error::CaptureError;
use crate::frame::{decode_image, CapturedFrame};

use super::CaptureDevice;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(5);

enum HttpStream {
    Mjpeg(MjpegStream),
    SingleJpeg,
}

pub struct HttpCamera {
    url: String,
    agent: ureq::Agent,
    stream: HttpStream,
    frame_count: u64,
}

impl HttpCamera {
    /// Connect to the camera. Fails if the first request is refused.
    pub fn open(url: &str) -> Result<Self, CaptureError> {
        let agent = ureq::AgentBuilder::new().timeout_read(READ_TIMEOUT).build();
        let response = agent.get(url).call().map_err(|e| map_ureq_error(url, e))?;
        let content_type = response.header("Content-Type").unwrap_or("").to_lowercase();
        let stream = if content_type.contains("multipart") {
            HttpStream::Mjpeg(MjpegStream::new(response.into_reader()))
        } else {
            HttpStream::SingleJpeg
        };
        log::info!(
            "HttpCamera: connected to {} ({})",
            url,
            match stream {
                HttpStream::Mjpeg(_) => "mjpeg",
                HttpStream::SingleJpeg => "snapshot",
            }
        );
        Ok(Self {
            url: url.to_string(),
            agent,
            stream,
            frame_count: 0,
        })
    }

    fn fetch_single_jpeg(&self) -> Result<Vec<u8>, CaptureError> {
        let response = self
            .agent
            .get(&self.url)
            .call()
            .map_err(|e| map_ureq_error(&self.url, e))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_JPEG_BYTES as u64)
            .read_to_end(&mut bytes)
            .map_err(|e| CaptureError::Unavailable(format!("read jpeg snapshot: {}", e)))?;
        if bytes.is_empty() {
            return Err(CaptureError::Unavailable("empty jpeg snapshot".to_string()));
        }
        Ok(bytes)
    }
}

impl CaptureDevice for HttpCamera {
    fn name(&self) -> &str {
        &self.url
    }

    fn grab(&mut self) -> Result<CapturedFrame, CaptureError> {
        let jpeg = match &mut self.stream {
            HttpStream::Mjpeg(stream) => stream.read_next_jpeg()?,
            HttpStream::SingleJpeg => self.fetch_single_jpeg()?,
        };
        let frame =
            decode_image(&jpeg).map_err(|e| CaptureError::Unavailable(format!("decode: {}", e)))?;
        self.frame_count += 1;
        Ok(frame)
    }
}

fn map_ureq_error(url: &str, err: ureq::Error) -> CaptureError {
    match err {
        ureq::Error::Status(code @ (401 | 403), _) => {
            CaptureError::PermissionDenied(format!("{} answered {}", url, code))
        }
        ureq::Error::Status(code, _) => {
            CaptureError::Unavailable(format!("{} answered {}", url, code))
        }
        ureq::Error::Transport(t) => CaptureError::Unavailable(format!("{}: {}", url, t)),
    }
}

struct MjpegStream {
    reader: Box<dyn Read + Send + Sync>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send + Sync>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn read_next_jpeg(&mut self) -> Result<Vec<u8>, CaptureError> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self
                .reader
                .read(&mut chunk)
                .map_err(|e| CaptureError::Unavailable(format!("read mjpeg chunk: {}", e)))?;
            if read == 0 {
                return Err(CaptureError::Unavailable("mjpeg stream ended".to_string()));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

/// Locate the first complete SOI..EOI span in the buffer.
fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}
