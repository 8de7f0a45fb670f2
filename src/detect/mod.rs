mod client;
mod response;
mod result;

pub use client::{
    DetectionClient, DetectionEndpoint, HttpDetectionEndpoint, DEFAULT_AUTH_HEADER,
    IMAGE_FIELD, IMAGE_FILE_NAME,
};
pub use response::DetectionResponse;
pub use result::{BoundingBox, DetectionResult, OverlayRect};

#[cfg(test)]
pub(crate) use client::tests as fixtures;
