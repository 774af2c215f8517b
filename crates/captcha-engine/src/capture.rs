//! Image capture collaborator.
//!
//! The engine never loads images itself. Probing an unsized `<img>` and
//! grabbing the bitmap to recognise both go through an [`ImageSource`].

use crate::recognizer::BoxError;
use async_trait::async_trait;
use captcha_dom::Size;
use std::collections::HashMap;

/// What to capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    /// Selector resolving to the element
    pub selector: String,
    /// The element's `src`, when it has one
    pub src: Option<String>,
}

/// A captured bitmap and its natural size.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedImage {
    /// Encoded image bytes
    pub bytes: Vec<u8>,
    /// Natural width in px
    pub width: f64,
    /// Natural height in px
    pub height: f64,
}

impl CapturedImage {
    /// Natural size of the image.
    #[must_use]
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

/// Loads element images.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Capture the image behind the requested element.
    async fn capture(&self, request: &CaptureRequest) -> Result<CapturedImage, BoxError>;
}

/// Image source backed by a map from `src` to image.
///
/// Requests without a known `src` fail.
#[derive(Debug, Clone, Default)]
pub struct StaticImageSource {
    images: HashMap<String, CapturedImage>,
}

impl StaticImageSource {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `image` for `src`.
    #[must_use]
    pub fn with_image(mut self, src: impl Into<String>, image: CapturedImage) -> Self {
        self.images.insert(src.into(), image);
        self
    }
}

#[async_trait]
impl ImageSource for StaticImageSource {
    async fn capture(&self, request: &CaptureRequest) -> Result<CapturedImage, BoxError> {
        let src = request
            .src
            .as_deref()
            .ok_or_else(|| format!("element '{}' has no src", request.selector))?;
        self.images
            .get(src)
            .cloned()
            .ok_or_else(|| format!("no image for '{src}'").into())
    }
}
