//! Page images for the compliance pass.
//!
//! Only full-page scans are forwarded: a page qualifies when its content
//! stream shows no text and paints one image XObject over nearly the whole
//! MediaBox. Typed pages, even ones carrying a logo or a pasted signature,
//! are skipped because the text pass already reads them. JPEG streams are
//! forwarded untouched, everything else is decoded and re-encoded as PNG.

use std::io::Cursor;

use base64::Engine as _;
use image::{DynamicImage, ImageFormat};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("PDF could not be parsed: {0}")]
    Parse(String),
    #[error("page image could not be decoded: {0}")]
    Image(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    pub page_index: usize,
    pub mime: &'static str,
    pub bytes: Vec<u8>,
}

impl RenderedPage {
    pub fn data_url(&self) -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&self.bytes);
        format!("data:{};base64,{encoded}", self.mime)
    }
}

pub trait PageRenderer: Send + Sync {
    fn page_count(&self, pdf: &[u8]) -> Result<usize, RenderError>;

    /// Renders the requested zero-based pages. Out-of-range indices and
    /// pages that are not full-page scans are skipped.
    fn render_pages(&self, pdf: &[u8], pages: &[usize]) -> Result<Vec<RenderedPage>, RenderError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfPageRenderer;

impl PageRenderer for LopdfPageRenderer {
    fn page_count(&self, pdf: &[u8]) -> Result<usize, RenderError> {
        let doc = Document::load_mem(pdf).map_err(|err| RenderError::Parse(err.to_string()))?;
        Ok(doc.get_pages().len())
    }

    fn render_pages(&self, pdf: &[u8], pages: &[usize]) -> Result<Vec<RenderedPage>, RenderError> {
        let doc = Document::load_mem(pdf).map_err(|err| RenderError::Parse(err.to_string()))?;
        let page_ids: Vec<ObjectId> = doc.page_iter().collect();

        let mut rendered = Vec::new();
        for &page_index in pages {
            let Some(&page_id) = page_ids.get(page_index) else {
                continue;
            };
            let Some(stream) = full_page_scan(&doc, page_id) else {
                tracing::debug!(page = page_index, "Page is not a full-page scan, skipping");
                continue;
            };
            let (mime, bytes) = encode_image(stream)?;
            rendered.push(RenderedPage { page_index, mime, bytes });
        }

        Ok(rendered)
    }
}

/// Share of the MediaBox a single image must cover to count as a scan.
const MIN_PAGE_COVERAGE: f32 = 0.9;

/// Affine transform `[a b c d e f]` as used by the `cm` operator.
type Matrix = [f32; 6];

const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

fn full_page_scan(doc: &Document, page_id: ObjectId) -> Option<&Stream> {
    let page = doc.get_object(page_id).ok()?.as_dict().ok()?;
    let media_box = media_box(doc, page)?;
    let xobjects = inherited(doc, page, b"Resources")
        .and_then(|resources| resources.as_dict().ok())
        .and_then(|resources| resolve_dict(doc, resources, b"XObject"))?;
    let content = doc.get_and_decode_page_content(page_id).ok()?;

    let mut ctm = IDENTITY;
    let mut saved = Vec::new();
    let mut scan = None;
    for op in &content.operations {
        match op.operator.as_str() {
            "q" => saved.push(ctm),
            "Q" => ctm = saved.pop().unwrap_or(IDENTITY),
            "cm" => {
                if let Some(matrix) = matrix_operands(&op.operands) {
                    ctm = concat(matrix, ctm);
                }
            }
            // Any text layer means the text pass already has this page.
            "Tj" | "TJ" | "'" | "\"" => return None,
            "Do" => {
                let name = op.operands.first()?.as_name().ok()?;
                let Object::Stream(stream) = resolve(doc, xobjects.get(name).ok()?) else {
                    continue;
                };
                if !is_image(&stream.dict) {
                    // Form XObjects may carry their own text.
                    return None;
                }
                if coverage(ctm, media_box) < MIN_PAGE_COVERAGE {
                    continue;
                }
                if scan.replace(stream).is_some() {
                    return None;
                }
            }
            _ => {}
        }
    }
    scan
}

/// `[llx lly urx ury]`, normalized so the lower-left corner comes first.
fn media_box(doc: &Document, page: &Dictionary) -> Option<[f32; 4]> {
    let values = inherited(doc, page, b"MediaBox")?.as_array().ok()?;
    let [x0, y0, x1, y1]: [f32; 4] = values
        .iter()
        .map(|value| resolve(doc, value).as_float().ok())
        .collect::<Option<Vec<f32>>>()?
        .try_into()
        .ok()?;
    let rect = [x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)];
    (rect[2] > rect[0] && rect[3] > rect[1]).then_some(rect)
}

fn matrix_operands(operands: &[Object]) -> Option<Matrix> {
    operands
        .iter()
        .map(|value| value.as_float().ok())
        .collect::<Option<Vec<f32>>>()?
        .try_into()
        .ok()
}

/// `m` applied first, then `ctm`.
fn concat(m: Matrix, ctm: Matrix) -> Matrix {
    [
        m[0] * ctm[0] + m[1] * ctm[2],
        m[0] * ctm[1] + m[1] * ctm[3],
        m[2] * ctm[0] + m[3] * ctm[2],
        m[2] * ctm[1] + m[3] * ctm[3],
        m[4] * ctm[0] + m[5] * ctm[2] + ctm[4],
        m[4] * ctm[1] + m[5] * ctm[3] + ctm[5],
    ]
}

/// Fraction of the page covered by the unit square mapped through `ctm`.
fn coverage(ctm: Matrix, page: [f32; 4]) -> f32 {
    let corners = [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)]
        .map(|(x, y)| (ctm[0] * x + ctm[2] * y + ctm[4], ctm[1] * x + ctm[3] * y + ctm[5]));
    let min_x = corners.iter().map(|c| c.0).fold(f32::INFINITY, f32::min);
    let max_x = corners.iter().map(|c| c.0).fold(f32::NEG_INFINITY, f32::max);
    let min_y = corners.iter().map(|c| c.1).fold(f32::INFINITY, f32::min);
    let max_y = corners.iter().map(|c| c.1).fold(f32::NEG_INFINITY, f32::max);

    let width = (max_x.min(page[2]) - min_x.max(page[0])).max(0.0);
    let height = (max_y.min(page[3]) - min_y.max(page[1])).max(0.0);
    (width * height) / ((page[2] - page[0]) * (page[3] - page[1]))
}

fn encode_image(stream: &Stream) -> Result<(&'static str, Vec<u8>), RenderError> {
    if has_filter(&stream.dict, b"DCTDecode") {
        return Ok(("image/jpeg", stream.content.clone()));
    }

    let content = stream.decompressed_content().unwrap_or_else(|_| stream.content.clone());
    let image = match image::load_from_memory(&content) {
        Ok(image) => image,
        Err(_) => raw_pixels(&stream.dict, content)?,
    };

    let mut png = Cursor::new(Vec::new());
    image
        .write_to(&mut png, ImageFormat::Png)
        .map_err(|err| RenderError::Image(format!("PNG encode failed: {err}")))?;
    Ok(("image/png", png.into_inner()))
}

/// Uncompressed 8-bit gray or RGB samples described by the stream dictionary.
fn raw_pixels(dict: &Dictionary, pixels: Vec<u8>) -> Result<DynamicImage, RenderError> {
    let width = int_entry(dict, b"Width")?;
    let height = int_entry(dict, b"Height")?;
    let gray = matches!(dict.get(b"ColorSpace"), Ok(Object::Name(name)) if name == b"DeviceGray");

    let image = if gray {
        image::GrayImage::from_raw(width, height, pixels).map(DynamicImage::ImageLuma8)
    } else {
        image::RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8)
    };
    image.ok_or_else(|| {
        RenderError::Image(format!("pixel buffer does not match {width}x{height} image"))
    })
}

fn int_entry(dict: &Dictionary, key: &[u8]) -> Result<u32, RenderError> {
    dict.get(key)
        .and_then(Object::as_i64)
        .ok()
        .and_then(|value| u32::try_from(value).ok())
        .ok_or_else(|| {
            RenderError::Image(format!("missing /{}", String::from_utf8_lossy(key)))
        })
}

fn is_image(dict: &Dictionary) -> bool {
    matches!(dict.get(b"Subtype"), Ok(Object::Name(name)) if name == b"Image")
}

fn has_filter(dict: &Dictionary, filter: &[u8]) -> bool {
    match dict.get(b"Filter") {
        Ok(Object::Name(name)) => name == filter,
        Ok(Object::Array(filters)) => {
            filters.iter().any(|obj| matches!(obj, Object::Name(name) if name == filter))
        }
        _ => false,
    }
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

/// Looks up a page attribute, following `/Parent` for inheritable keys.
fn inherited<'a>(doc: &'a Document, page: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    let mut node = page;
    for _ in 0..32 {
        if let Ok(value) = node.get(key) {
            return Some(resolve(doc, value));
        }
        node = resolve(doc, node.get(b"Parent").ok()?).as_dict().ok()?;
    }
    None
}

fn resolve_dict<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Dictionary> {
    resolve(doc, dict.get(key).ok()?).as_dict().ok()
}
