//! Request and response types for the render service.
//!
//! - [`RenderRequest`]: the document to render plus how to reach the client
//! - [`CancellationObserver`]: cooperative "client went away" flag
//! - [`PdfDocument`]: the rendered bytes plus response metadata
//!
//! # Cancellation
//!
//! The transport owns the connection, so only it can tell when the client
//! disconnects. It keeps a clone of the request's observer and calls
//! [`disconnect`](CancellationObserver::disconnect), or holds a
//! [`DisconnectOnDrop`] guard inside its handler future so that a dropped
//! handler marks the request as abandoned automatically.
//!
//! ```rust
//! use html2pdf_gate::{CancellationObserver, RenderRequest};
//!
//! let observer = CancellationObserver::new();
//! let request = RenderRequest::new("<h1>Invoice</h1>")
//!     .with_filename("invoice.pdf")
//!     .with_observer(observer.clone());
//!
//! // connection closed
//! observer.disconnect();
//! assert!(request.observer().is_disconnected());
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::RenderError;

/// Filename hint used when the request does not set one.
pub const DEFAULT_FILENAME: &str = "document.pdf";

/// MIME type of every rendered document.
pub const PDF_CONTENT_TYPE: &str = "application/pdf";

// ============================================================================
// CancellationObserver
// ============================================================================

/// Shared flag recording that the requesting client disconnected.
///
/// Cloning shares the flag. Once set it stays set.
#[derive(Debug, Clone, Default)]
pub struct CancellationObserver {
    disconnected: Arc<AtomicBool>,
}

impl CancellationObserver {
    /// A fresh, connected observer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the client as gone.
    pub fn disconnect(&self) {
        if !self.disconnected.swap(true, Ordering::AcqRel) {
            log::debug!("🔌 Client disconnected");
        }
    }

    /// Whether the client is gone.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    /// Guard that disconnects this observer when dropped, unless disarmed.
    pub fn guard(&self) -> DisconnectOnDrop {
        DisconnectOnDrop {
            observer: Some(self.clone()),
        }
    }
}

/// Marks a [`CancellationObserver`] disconnected on drop.
///
/// Hold it in the transport's handler future; call
/// [`disarm`](Self::disarm) once the response has been handed off.
#[derive(Debug)]
#[must_use = "dropping the guard immediately marks the client disconnected"]
pub struct DisconnectOnDrop {
    observer: Option<CancellationObserver>,
}

impl DisconnectOnDrop {
    /// Response delivered; do not mark the client disconnected.
    pub fn disarm(mut self) {
        self.observer = None;
    }
}

impl Drop for DisconnectOnDrop {
    fn drop(&mut self) {
        if let Some(observer) = self.observer.take() {
            observer.disconnect();
        }
    }
}

// ============================================================================
// RenderRequest
// ============================================================================

/// One document to render.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    /// Markup to render; `None` when the transport received no document.
    document: Option<String>,

    /// Filename hint for the response; `None` uses [`DEFAULT_FILENAME`].
    filename: Option<String>,

    observer: CancellationObserver,
}

impl RenderRequest {
    /// A request for `document` with its own (never disconnected) observer.
    pub fn new<S: Into<String>>(document: S) -> Self {
        Self::from_optional(Some(document.into()))
    }

    /// A request whose document may be missing, as decoded by a transport.
    ///
    /// A missing document is rejected by
    /// [`submit`](crate::RenderService::submit) with
    /// [`RenderError::InvalidInput`].
    pub fn from_optional(document: Option<String>) -> Self {
        Self {
            document,
            filename: None,
            observer: CancellationObserver::new(),
        }
    }

    /// Set the filename hint (e.g. `invoice.pdf`).
    pub fn with_filename<S: Into<String>>(mut self, filename: S) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Attach the transport's cancellation observer.
    pub fn with_observer(mut self, observer: CancellationObserver) -> Self {
        self.observer = observer;
        self
    }

    /// The document, if any.
    pub fn document(&self) -> Option<&str> {
        self.document.as_deref()
    }

    /// The request's cancellation observer.
    pub fn observer(&self) -> &CancellationObserver {
        &self.observer
    }

    /// The filename hint, or [`DEFAULT_FILENAME`].
    pub fn filename_or_default(&self) -> String {
        self.filename
            .clone()
            .unwrap_or_else(|| DEFAULT_FILENAME.to_string())
    }

    /// The document, or [`RenderError::InvalidInput`] if it is missing or
    /// blank.
    pub fn validated_document(&self) -> Result<&str, RenderError> {
        match self.document.as_deref() {
            None => Err(RenderError::InvalidInput("no document supplied".to_string())),
            Some(doc) if doc.trim().is_empty() => {
                Err(RenderError::InvalidInput("document is empty".to_string()))
            }
            Some(doc) => Ok(doc),
        }
    }
}

// ============================================================================
// PdfDocument
// ============================================================================

/// A rendered PDF ready to be sent.
///
/// # Response Headers
///
/// ```text
/// Content-Type: application/pdf
/// Content-Disposition: attachment; filename="invoice.pdf"
/// ```
///
/// # Example
///
/// ```rust
/// use html2pdf_gate::PdfDocument;
///
/// let doc = PdfDocument::new(b"%PDF-1.7".to_vec(), "invoice.pdf".to_string());
/// assert_eq!(doc.content_type(), "application/pdf");
/// assert_eq!(doc.content_disposition(), "attachment; filename=\"invoice.pdf\"");
/// assert!(doc.is_pdf());
/// ```
#[derive(Debug, Clone)]
pub struct PdfDocument {
    /// The PDF bytes; valid output starts with `%PDF-`.
    pub data: Vec<u8>,

    /// Suggested filename for the download.
    pub filename: String,
}

impl PdfDocument {
    /// Wrap rendered bytes.
    pub fn new(data: Vec<u8>, filename: String) -> Self {
        Self { data, filename }
    }

    /// Always `application/pdf`.
    pub fn content_type(&self) -> &'static str {
        PDF_CONTENT_TYPE
    }

    /// `attachment; filename="…"` with quotes and line breaks stripped from
    /// the filename.
    pub fn content_disposition(&self) -> String {
        let filename: String = self
            .filename
            .chars()
            .filter(|c| !matches!(c, '"' | '\r' | '\n' | '\\'))
            .collect();
        format!("attachment; filename=\"{}\"", filename)
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Whether the bytes start with the PDF signature.
    pub fn is_pdf(&self) -> bool {
        self.data.starts_with(b"%PDF-")
    }

    /// Take the bytes.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
