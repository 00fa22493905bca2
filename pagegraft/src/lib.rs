/*!
A crate for embedding pages of existing PDF files into a PDF that is being
produced with [`pdf-writer`](https://docs.rs/pdf-writer/).

Selected pages of a source document are materialized either as reusable Form
XObjects or appended as pages of the destination document. Every indirect
object reachable from a page's resources is transplanted into the destination
exactly once per embedding call (see [`PdfEmbedder`]), receiving a fresh
identifier there, with all references rewritten consistently. Content streams are passed through
byte for byte; Flate-compressed segments are inflated only where several
segments have to be concatenated into a single stream.

```no_run
use pagegraft::{PageBoxKind, PageSelection, PdfEmbedder, open_source};
use pdf_writer::Ref;

let pdf = open_source("source.pdf")?;
let mut next_ref = Ref::new(1);

let mut embedder = PdfEmbedder::new(&pdf, Box::new(|| next_ref.bump()));
let xobjects = embedder.embed_as_form_xobjects(
    &PageSelection::All,
    PageBoxKind::Crop,
    None,
)?;
let chunk = embedder.finish();
// Extend the destination document with `chunk` and reference the returned
// ids from its pages.
# Ok::<(), Box<dyn std::error::Error>>(())
```
*/

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod boxes;
mod content;
mod copy;
mod primitive;
mod trace;

pub use crate::boxes::PageBoxKind;
pub use hayro_syntax::Pdf;
pub use kurbo::Affine;

use crate::content::deflate_encode;
use crate::primitive::WriteDirect;
use crate::trace::warn;
use hayro_syntax::object::dict::keys::RESOURCES;
use hayro_syntax::object::{Dict, ObjRef};
use kurbo::Rect;
use pdf_writer::{Chunk, Filter, Finish, Name, Ref};
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::ops::DerefMut;
use std::path::Path;
use std::sync::Arc;

/// Read a source PDF from disk and start parsing it.
pub fn open_source(path: impl AsRef<Path>) -> Result<Pdf, EmbedError> {
    let path = path.as_ref();

    let data = std::fs::read(path).map_err(|e| {
        warn!("unable to open {} for reading: {e}", path.display());
        EmbedError::Open(e)
    })?;

    Pdf::new(Arc::new(data)).map_err(|e| {
        warn!("failure occurred while parsing {}: {e:?}", path.display());
        EmbedError::Parse
    })
}

/// The reason an embed operation failed.
#[derive(Debug)]
pub enum EmbedError {
    /// The source file could not be opened.
    Open(std::io::Error),
    /// The source refused to parse, or an object inside it could not be
    /// materialized.
    Parse,
    /// A page selection range does not fit the source document.
    InvalidRange {
        /// First page index of the offending range.
        first: usize,
        /// Last page index of the offending range, inclusive.
        last: usize,
        /// Number of pages in the source document.
        page_count: usize,
    },
    /// Page contents had a shape that cannot be copied.
    Structure(&'static str),
    /// A content stream uses a filter other than `FlateDecode`.
    UnsupportedFilter,
    /// A stream dictionary lacks an integer `Length` entry.
    MissingLength,
}

impl fmt::Display for EmbedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open(e) => write!(f, "failed to open the source file: {e}"),
            Self::Parse => write!(f, "failed to parse the source document"),
            Self::InvalidRange {
                first,
                last,
                page_count,
            } => write!(
                f,
                "page range {first}..={last} is invalid for a document with {page_count} pages"
            ),
            Self::Structure(why) => write!(f, "{why}"),
            Self::UnsupportedFilter => {
                write!(f, "content stream filter is neither absent nor FlateDecode")
            }
            Self::MissingLength => write!(f, "stream dictionary has no integer Length"),
        }
    }
}

impl std::error::Error for EmbedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open(e) => Some(e),
            _ => None,
        }
    }
}

/// A failed embed operation, together with the handles of the pages that were
/// completed before the failure.
///
/// Objects already emitted for the completed pages stay in the session and are
/// still returned by [`PdfEmbedder::finish`].
#[derive(Debug)]
pub struct EmbedFailure {
    /// What went wrong.
    pub error: EmbedError,
    /// Handles of the pages embedded before the failure, in selection order.
    pub completed: Vec<Ref>,
}

impl fmt::Display for EmbedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "embedding failed after {} pages: {}", self.completed.len(), self.error)
    }
}

impl std::error::Error for EmbedFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// An inclusive range of zero-based page indices.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PageRange {
    /// Index of the first page of the range.
    pub first: usize,
    /// Index of the last page of the range, inclusive.
    pub last: usize,
}

impl PageRange {
    /// Create a new inclusive page range.
    pub fn new(first: usize, last: usize) -> Self {
        Self { first, last }
    }

    fn is_valid(self, page_count: usize) -> bool {
        self.first <= self.last && self.last < page_count
    }
}

/// The pages of the source document an operation applies to.
#[derive(Debug, Clone)]
pub enum PageSelection {
    /// Every page of the document, in order.
    All,
    /// The pages of the given ranges, in the given order. Ranges may overlap;
    /// a page selected twice is embedded twice.
    Ranges(Vec<PageRange>),
}

impl PageSelection {
    /// Select a single page.
    pub fn single(index: usize) -> Self {
        Self::Ranges(vec![PageRange::new(index, index)])
    }
}

/// An embedder over a parsed source document.
///
/// Each top-level call — [`embed_as_form_xobjects`](Self::embed_as_form_xobjects)
/// or [`append_as_pages`](Self::append_as_pages) — is one embedding session:
/// it owns a mapping from source object ids to destination ids, so resources
/// shared between its pages (fonts, images, color spaces) are emitted exactly
/// once no matter how many pages reference them. The mapping is cleared when
/// the call returns, even on failure, so no later call can observe stale
/// destination ids.
pub struct PdfEmbedder<'a> {
    pub(crate) pdf: &'a Pdf,
    pub(crate) chunk: Chunk,
    pub(crate) source_to_target: HashMap<ObjRef, Ref>,
    /// The source page whose artifact is currently being finalized, if any.
    written_page: Option<Dict<'a>>,
    new_ref: Box<dyn FnMut() -> Ref + 'a>,
}

impl<'a> PdfEmbedder<'a> {
    /// Create a session for the given source document.
    ///
    /// `new_ref` allocates object ids in the destination document; the caller
    /// must not reuse ids it hands out here.
    pub fn new(pdf: &'a Pdf, new_ref: Box<dyn FnMut() -> Ref + 'a>) -> Self {
        Self {
            pdf,
            chunk: Chunk::new(),
            source_to_target: HashMap::new(),
            written_page: None,
            new_ref,
        }
    }

    /// Embed the selected pages as Form XObjects.
    ///
    /// Each page becomes one XObject whose bounding box is the page's box of
    /// the requested kind and whose content is the page's content, with an
    /// optional transformation matrix applied on use. Returns the XObject ids
    /// in selection order.
    pub fn embed_as_form_xobjects(
        &mut self,
        selection: &PageSelection,
        box_kind: PageBoxKind,
        transform: Option<Affine>,
    ) -> Result<Vec<Ref>, EmbedFailure> {
        self.drive(selection, |session, index| {
            session.embed_form_xobject(index, box_kind, transform)
        })
    }

    /// Append the selected pages as pages of the destination document.
    ///
    /// The new page dictionaries reference `parent` as their page-tree parent;
    /// the caller owns that node and must list the returned ids among its
    /// kids. Only the media box is carried over.
    pub fn append_as_pages(
        &mut self,
        selection: &PageSelection,
        parent: Ref,
    ) -> Result<Vec<Ref>, EmbedFailure> {
        self.drive(selection, |session, index| session.append_page(index, parent))
    }

    /// Everything the session has emitted, ready to be merged into the
    /// destination document.
    pub fn finish(self) -> Chunk {
        self.chunk
    }

    /// The destination id for a source object, allocating one on first sight.
    ///
    /// Once mapped, a source object keeps its destination id for the rest of
    /// the session.
    pub(crate) fn target_ref(&mut self, source: ObjRef) -> Ref {
        if let Some(target) = self.source_to_target.get(&source) {
            *target
        } else {
            let target = (self.new_ref)();
            self.source_to_target.insert(source, target);

            target
        }
    }

    fn drive(
        &mut self,
        selection: &PageSelection,
        embed_one: impl FnMut(&mut Self, usize) -> Result<Ref, EmbedError>,
    ) -> Result<Vec<Ref>, EmbedFailure> {
        let result = self.drive_inner(selection, embed_one);

        // Sharing of copied objects is scoped to a single top-level call; the
        // next call starts from a clean mapping, even after a failure.
        self.source_to_target.clear();

        result
    }

    fn drive_inner(
        &mut self,
        selection: &PageSelection,
        mut embed_one: impl FnMut(&mut Self, usize) -> Result<Ref, EmbedError>,
    ) -> Result<Vec<Ref>, EmbedFailure> {
        let page_count = self.pdf.pages().len();
        let mut completed = Vec::new();

        match selection {
            PageSelection::All => {
                for index in 0..page_count {
                    match embed_one(&mut *self, index) {
                        Ok(handle) => completed.push(handle),
                        Err(error) => {
                            warn!("failed to embed page {index}");
                            return Err(EmbedFailure { error, completed });
                        }
                    }
                }
            }
            PageSelection::Ranges(ranges) => {
                for range in ranges {
                    if !range.is_valid(page_count) {
                        warn!(
                            "range mismatch. first = {}, last = {}, page count = {}",
                            range.first, range.last, page_count
                        );
                        return Err(EmbedFailure {
                            error: EmbedError::InvalidRange {
                                first: range.first,
                                last: range.last,
                                page_count,
                            },
                            completed,
                        });
                    }

                    for index in range.first..=range.last {
                        match embed_one(&mut *self, index) {
                            Ok(handle) => completed.push(handle),
                            Err(error) => {
                                warn!("failed to embed page {index}");
                                return Err(EmbedFailure { error, completed });
                            }
                        }
                    }
                }
            }
        }

        Ok(completed)
    }

    fn parse_page(&self, index: usize) -> Result<Dict<'a>, EmbedError> {
        let pages = self.pdf.pages();
        let Some(page) = pages.get(index) else {
            warn!("page index {index} does not denote a page object");
            return Err(EmbedError::Parse);
        };

        Ok(page.raw().clone())
    }

    fn embed_form_xobject(
        &mut self,
        index: usize,
        box_kind: PageBoxKind,
        transform: Option<Affine>,
    ) -> Result<Ref, EmbedError> {
        let page = self.parse_page(index)?;

        copy::copy_resources(self, &page)?;

        let bbox = boxes::determine_page_box(&page, box_kind);

        let mut content = Vec::new();
        content::page_content_to_sink(self.pdf, &page, &mut content)?;
        let encoded = deflate_encode(&content);

        let id = (self.new_ref)();

        // Built in its own chunk so that a failure leaves no partial artifact
        // behind; objects copied for the page's resources stay either way.
        let mut chunk = Chunk::new();
        let mut xobject = chunk.form_xobject(id, &encoded);
        xobject.deref_mut().filter(Filter::FlateDecode);
        xobject.bbox(convert_rect(bbox));
        if let Some(transform) = transform {
            let m = transform.as_coeffs();
            xobject.matrix(m.map(|c| c as f32));
        }

        self.written_page = Some(page.clone());
        let status = self.write_resources(&mut xobject.resources());
        self.written_page = None;
        status?;

        xobject.finish();
        self.chunk.extend(&chunk);

        Ok(id)
    }

    fn append_page(&mut self, index: usize, parent: Ref) -> Result<Ref, EmbedError> {
        let page = self.parse_page(index)?;

        copy::copy_resources(self, &page)?;

        let media_box = boxes::determine_page_box(&page, PageBoxKind::Media);
        let segments = content::page_content_segments(self.pdf, &page)?;

        let mut chunk = Chunk::new();

        // Every source segment becomes a fresh stream of the new page.
        let mut content_ids = Vec::with_capacity(segments.len());
        for segment in &segments {
            let content_id = (self.new_ref)();
            chunk
                .stream(content_id, &deflate_encode(segment))
                .filter(Filter::FlateDecode);
            content_ids.push(content_id);
        }

        let id = (self.new_ref)();
        let mut target = chunk.page(id);
        target.media_box(convert_rect(media_box));
        target.parent(parent);
        match content_ids.as_slice() {
            [single] => {
                target.contents(*single);
            }
            refs => {
                target.insert(Name(b"Contents")).array().items(refs.iter().copied());
            }
        }

        self.written_page = Some(page.clone());
        let status = self.write_resources(&mut target.resources());
        self.written_page = None;
        status?;

        target.finish();
        self.chunk.extend(&chunk);

        Ok(id)
    }

    /// Populate the resources dictionary of the artifact currently being
    /// finalized from the written page's own resources.
    ///
    /// Every reference that occurs here was copied up front when the page was
    /// embedded, so the write must not discover new objects.
    fn write_resources(&mut self, target: &mut pdf_writer::Dict<'_>) -> Result<(), EmbedError> {
        let Some(page) = self.written_page.clone() else {
            return Ok(());
        };

        let Some(resources) = page.get::<Dict<'_>>(RESOURCES) else {
            return Ok(());
        };

        let mut discovered = Vec::new();
        for (key, value) in resources.entries() {
            value.write_direct(target.insert(Name(key.deref())), self, &mut discovered)?;
        }

        debug_assert!(
            discovered.is_empty(),
            "resources referenced objects that were not copied up front"
        );

        Ok(())
    }
}

fn convert_rect(rect: Rect) -> pdf_writer::Rect {
    pdf_writer::Rect::new(
        rect.x0 as f32,
        rect.y0 as f32,
        rect.x1 as f32,
        rect.y1 as f32,
    )
}
