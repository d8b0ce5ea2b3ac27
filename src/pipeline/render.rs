//! PDF rasterisation through pdfium: the production [`DocumentOpener`].
//!
//! pdfium uses thread-local state and blocks on CPU, so every call runs in
//! `tokio::task::spawn_blocking`. The document is re-opened per batch rather
//! than kept open across awaits: pdfium handles are not `Send`, and a reopen
//! is cheap next to a vision-model round trip.
//!
//! `max_rendered_pixels` caps the longest edge regardless of physical page
//! size, keeping memory bounded and images inside typical API upload limits.

use crate::config::PipelineConfig;
use crate::error::{BatchFailure, ErrorKind, PipelineError};
use crate::pipeline::encode;
use crate::pipeline::input::check_pdf_file;
use crate::pipeline::source::{DocumentOpener, DocumentSource, PageRange};
use async_trait::async_trait;
use edgequake_llm::ImageData;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Opens PDFs with pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumOpener {
    password: Option<String>,
    max_pixels: u32,
}

impl PdfiumOpener {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            password: config.password.clone(),
            max_pixels: config.max_rendered_pixels,
        }
    }
}

#[async_trait]
impl DocumentOpener for PdfiumOpener {
    async fn open(&self, path: &Path) -> Result<Arc<dyn DocumentSource>, PipelineError> {
        check_pdf_file(path)?;

        let owned = path.to_path_buf();
        let password = self.password.clone();
        let page_count =
            tokio::task::spawn_blocking(move || count_pages_blocking(&owned, password.as_deref()))
                .await
                .map_err(|e| PipelineError::Internal(format!("Open task panicked: {e}")))??;

        if page_count == 0 {
            return Err(PipelineError::DocumentUnreadable {
                path: path.to_path_buf(),
                detail: "document has zero pages".into(),
            });
        }
        info!("Opened {}: {} pages", path.display(), page_count);

        Ok(Arc::new(PdfiumDocument {
            path: path.to_path_buf(),
            page_count,
            password: self.password.clone(),
            max_pixels: self.max_pixels,
        }))
    }
}

/// An opened PDF; pages are rendered on demand, one batch at a time.
#[derive(Debug, Clone)]
pub struct PdfiumDocument {
    path: PathBuf,
    page_count: usize,
    password: Option<String>,
    max_pixels: u32,
}

#[async_trait]
impl DocumentSource for PdfiumDocument {
    fn path(&self) -> &Path {
        &self.path
    }

    fn page_count(&self) -> usize {
        self.page_count
    }

    async fn render(&self, range: PageRange) -> Result<Vec<ImageData>, BatchFailure> {
        let doc = self.clone();
        tokio::task::spawn_blocking(move || doc.render_blocking(range))
            .await
            .map_err(|e| {
                BatchFailure::new(ErrorKind::Malformed, format!("render task panicked: {e}"))
            })?
    }
}

impl PdfiumDocument {
    fn render_blocking(&self, range: PageRange) -> Result<Vec<ImageData>, BatchFailure> {
        let malformed = |page: usize, e: &dyn std::fmt::Debug| {
            BatchFailure::new(
                ErrorKind::Malformed,
                format!("page {page}: rasterisation failed: {e:?}"),
            )
        };

        let pdfium = bind_pdfium()
            .map_err(|e| BatchFailure::new(ErrorKind::Malformed, format!("pdfium: {e:?}")))?;
        let document = pdfium
            .load_pdf_from_file(&self.path, self.password.as_deref())
            .map_err(|e| malformed(range.first, &e))?;

        let pages = document.pages();
        let render_config = PdfRenderConfig::new()
            .set_target_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32);

        let mut images = Vec::with_capacity(range.len());
        for page_num in range.pages() {
            let page = pages
                .get((page_num - 1) as u16)
                .map_err(|e| malformed(page_num, &e))?;
            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| malformed(page_num, &e))?;
            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                page_num,
                image.width(),
                image.height()
            );
            images.push(encode::encode_page(page_num, &image)?);
        }
        Ok(images)
    }
}

/// Bind pdfium: `PDFIUM_LIB_PATH` first, then the working directory, then
/// the system library search path.
fn bind_pdfium() -> Result<Pdfium, PdfiumError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(path) if !path.is_empty() => Pdfium::bind_to_library(path)?,
        _ => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library())?,
    };
    Ok(Pdfium::new(bindings))
}

fn count_pages_blocking(path: &Path, password: Option<&str>) -> Result<usize, PipelineError> {
    let unreadable = |detail: String| PipelineError::DocumentUnreadable {
        path: path.to_path_buf(),
        detail,
    };

    let pdfium = bind_pdfium().map_err(|e| {
        PipelineError::Internal(format!(
            "Failed to bind to pdfium library: {e:?}\nSet PDFIUM_LIB_PATH=/path/to/libpdfium."
        ))
    })?;

    let document = pdfium.load_pdf_from_file(path, password).map_err(|e| {
        let err_str = format!("{e:?}");
        if err_str.to_lowercase().contains("password") {
            if password.is_some() {
                unreadable("wrong password".into())
            } else {
                unreadable("encrypted; provide --password".into())
            }
        } else {
            unreadable(format!("corrupt PDF: {err_str}"))
        }
    })?;

    Ok(document.pages().len() as usize)
}
