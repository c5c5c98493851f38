//! Loaded PDF document wrapper.
//!
//! Thin layer over [`lopdf::Document`] that callers use for page lookup,
//! geometry and content-stream access. The original byte buffer is never
//! mutated; extraction reads it once and export loads a fresh copy.

use std::collections::BTreeMap;

use lopdf::{Document, Object, ObjectId};
use serde::{Deserialize, Serialize};

use crate::error::{FillError, Result};
use crate::geom::Rect;

/// Per-page render geometry.
///
/// `render_scale` is render pixels per PDF unit, fixed once the page is
/// rasterized at a given width; recomputed only if the width changes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageGeometry {
    /// 1-based page number.
    pub page_number: u32,
    /// Page height in PDF user-space units.
    pub height: f64,
    /// Render pixels per PDF unit.
    pub render_scale: f64,
}

/// A parsed PDF document.
pub struct FormDocument {
    inner: Document,
    /// Ordered page object ids, indexed by 0-based page number.
    page_ids: Vec<ObjectId>,
}

impl std::fmt::Debug for FormDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormDocument")
            .field("page_count", &self.page_ids.len())
            .finish_non_exhaustive()
    }
}

impl FormDocument {
    /// Parses a document from an in-memory byte buffer.
    pub fn load(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 8 || !bytes.starts_with(b"%PDF-") {
            return Err(FillError::Structure("invalid PDF header".into()));
        }
        let inner = Document::load_mem(bytes)?;
        let pages: BTreeMap<u32, ObjectId> = inner.get_pages();
        let page_ids: Vec<ObjectId> = pages.values().copied().collect();
        if page_ids.is_empty() {
            return Err(FillError::Structure("document has no pages".into()));
        }
        Ok(Self { inner, page_ids })
    }

    /// Access the underlying lopdf document.
    pub fn inner(&self) -> &Document {
        &self.inner
    }

    /// Mutable access for export-time rewriting.
    pub(crate) fn inner_mut(&mut self) -> &mut Document {
        &mut self.inner
    }

    pub fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    /// Ordered page object ids (0-based index order).
    pub fn page_ids(&self) -> &[ObjectId] {
        &self.page_ids
    }

    /// Object id for a 1-based page number.
    pub fn page_id(&self, page_number: u32) -> Result<ObjectId> {
        self.page_ids
            .get(page_number.saturating_sub(1) as usize)
            .copied()
            .ok_or(FillError::PageNotFound(page_number))
    }

    /// Page (width, height) in PDF units, from the MediaBox.
    ///
    /// Walks up the page tree when the box is inherited; falls back to
    /// A4 if no MediaBox exists anywhere (malformed but seen in the wild).
    pub fn page_size(&self, page_number: u32) -> Result<(f64, f64)> {
        let page_id = self.page_id(page_number)?;
        match resolve_inherited(&self.inner, page_id, b"MediaBox") {
            Some(obj) => {
                let resolved = resolve(&self.inner, obj);
                let arr = resolved
                    .as_array()
                    .map_err(|_| FillError::Structure("MediaBox is not an array".into()))?;
                if arr.len() != 4 {
                    return Err(FillError::Structure("MediaBox has wrong length".into()));
                }
                let x0 = object_to_f64(&arr[0]).unwrap_or(0.0);
                let y0 = object_to_f64(&arr[1]).unwrap_or(0.0);
                let x1 = object_to_f64(&arr[2]).unwrap_or(0.0);
                let y1 = object_to_f64(&arr[3]).unwrap_or(0.0);
                Ok(((x1 - x0).abs(), (y1 - y0).abs()))
            }
            None => Ok((595.0, 842.0)),
        }
    }

    /// Page height in PDF units.
    pub fn page_height(&self, page_number: u32) -> Result<f64> {
        Ok(self.page_size(page_number)?.1)
    }

    /// Computes render geometry for a page rasterized at `render_width`
    /// pixels.
    pub fn page_geometry(&self, page_number: u32, render_width: f64) -> Result<PageGeometry> {
        let (width, height) = self.page_size(page_number)?;
        let render_scale = if width > 0.0 { render_width / width } else { 1.0 };
        Ok(PageGeometry {
            page_number,
            height,
            render_scale,
        })
    }

    /// Decoded content-stream bytes for a page.
    ///
    /// Handles both a single stream and an array of streams; streams are
    /// decompressed and concatenated with a separating space.
    pub fn content_bytes(&self, page_number: u32) -> Result<Vec<u8>> {
        let page_id = self.page_id(page_number)?;
        let page_dict = self
            .inner
            .get_object(page_id)
            .and_then(|o| o.as_dict())
            .map_err(|_| FillError::Structure("page dictionary missing".into()))?;

        let contents = match page_dict.get(b"Contents") {
            Ok(obj) => obj,
            Err(_) => return Ok(Vec::new()),
        };

        match contents {
            Object::Reference(id) => {
                let stream = self
                    .inner
                    .get_object(*id)
                    .and_then(|o| o.as_stream())
                    .map_err(|_| FillError::Structure("/Contents is not a stream".into()))?;
                decode_stream(stream)
            }
            Object::Array(arr) => {
                let mut out = Vec::new();
                for item in arr {
                    let id = item
                        .as_reference()
                        .map_err(|_| FillError::Structure("/Contents item is not a ref".into()))?;
                    let stream = self
                        .inner
                        .get_object(id)
                        .and_then(|o| o.as_stream())
                        .map_err(|_| FillError::Structure("/Contents item is not a stream".into()))?;
                    if !out.is_empty() {
                        out.push(b' ');
                    }
                    out.extend_from_slice(&decode_stream(stream)?);
                }
                Ok(out)
            }
            _ => Err(FillError::Structure(
                "/Contents is neither reference nor array".into(),
            )),
        }
    }
}

fn decode_stream(stream: &lopdf::Stream) -> Result<Vec<u8>> {
    if stream.dict.get(b"Filter").is_ok() {
        stream
            .decompressed_content()
            .map_err(|e| FillError::Structure(format!("content stream decode failed: {e}")))
    } else {
        Ok(stream.content.clone())
    }
}

/// Dereferences one level of indirection, returning the object itself
/// when it is not a reference or the target is missing.
pub(crate) fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        other => other,
    }
}

/// Looks up `key` on a page dictionary, walking `/Parent` links for
/// inheritable attributes.
pub(crate) fn resolve_inherited<'a>(
    doc: &'a Document,
    page_id: ObjectId,
    key: &[u8],
) -> Option<&'a Object> {
    let mut current = page_id;
    let mut hops = 0;
    loop {
        let dict = doc.get_object(current).and_then(|o| o.as_dict()).ok()?;
        if let Ok(value) = dict.get(key) {
            return Some(value);
        }
        // Bounded walk: page trees are shallow, cycles are malformed.
        hops += 1;
        if hops > 64 {
            return None;
        }
        current = dict.get(b"Parent").and_then(|p| p.as_reference()).ok()?;
    }
}

/// Converts a numeric object (Integer or Real) to f64.
pub(crate) fn object_to_f64(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(f) => Some(f64::from(*f)),
        _ => None,
    }
}

/// Decodes a PDF text string: UTF-16BE when BOM-prefixed, otherwise
/// UTF-8 with a Latin-1 fallback.
pub(crate) fn decode_text_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        match std::str::from_utf8(bytes) {
            Ok(s) => s.to_string(),
            Err(_) => bytes.iter().map(|&b| b as char).collect(),
        }
    }
}

/// Converts a PDF `/Rect` array `[x1 y1 x2 y2]` into a normalized
/// (x, y, width, height) rectangle in PDF user space.
pub(crate) fn rect_from_array(doc: &Document, arr: &[Object]) -> Option<Rect> {
    if arr.len() != 4 {
        return None;
    }
    let mut v = [0.0f64; 4];
    for (i, obj) in arr.iter().enumerate() {
        v[i] = object_to_f64(resolve(doc, obj))?;
    }
    let (x0, x1) = (v[0].min(v[2]), v[0].max(v[2]));
    let (y0, y1) = (v[1].min(v[3]), v[1].max(v[3]));
    Some(Rect::new(x0, y0, x1 - x0, y1 - y0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_pdf_bytes() {
        let err = FormDocument::load(b"not a pdf at all").unwrap_err();
        assert!(matches!(err, FillError::Structure(_)));
    }

    #[test]
    fn decodes_utf16be_strings() {
        let bytes = [0xFE, 0xFF, 0x00, b'H', 0x00, b'i'];
        assert_eq!(decode_text_string(&bytes), "Hi");
    }

    #[test]
    fn decodes_latin1_fallback() {
        let bytes = [b'a', 0xE9, b'b'];
        assert_eq!(decode_text_string(&bytes), "a\u{e9}b");
    }

    #[test]
    fn normalizes_inverted_rect_arrays() {
        let doc = Document::with_version("1.5");
        let arr = vec![
            Object::Integer(200),
            Object::Integer(700),
            Object::Integer(100),
            Object::Integer(680),
        ];
        let rect = rect_from_array(&doc, &arr).unwrap();
        assert_eq!(rect, Rect::new(100.0, 680.0, 100.0, 20.0));
    }
}
