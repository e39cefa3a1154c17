//! Field overlay rendering: original PDF bytes plus ordered field placements
//! in, new PDF bytes out. No I/O beyond the byte buffers.

use crate::{models, schema, Error};
use std::collections::BTreeMap;
use std::io::Write;

/// Signature images are drawn into a fixed box; aspect ratio is not
/// preserved.
pub const SIGNATURE_BOX_WIDTH: f64 = 150.0;
pub const SIGNATURE_BOX_HEIGHT: f64 = 50.0;
pub const TEXT_FONT_SIZE: i64 = 12;

const FONT_RES_NAME: &str = "F_quillsign_Helvetica";

/// One field to draw: position in PDF user-space units, origin bottom-left,
/// 1-indexed page.
#[derive(Debug, Clone)]
pub struct FieldPlacement {
    pub field_type: schema::FieldType,
    pub value: Option<String>,
    pub page: i64,
    pub x: f64,
    pub y: f64,
}

impl From<&models::Field> for FieldPlacement {
    fn from(field: &models::Field) -> Self {
        Self {
            field_type: field.field_type,
            value: field.value.clone(),
            page: field.page,
            x: field.pos_x,
            y: field.pos_y,
        }
    }
}

/// Render `fields` onto `original`, in input order. Fields referencing a page
/// the document does not have are skipped; a signature value that cannot be
/// decoded aborts the whole render.
pub fn render(original: &[u8], fields: &[FieldPlacement]) -> Result<Vec<u8>, Error> {
    let doc = lopdf::Document::load_mem(original)?;
    let mut overlay = Overlay::new(doc);

    for field in fields {
        let page = match u32::try_from(field.page) {
            Ok(p) if overlay.has_page(p) => p,
            _ => {
                warn!(
                    "field at ({}, {}) references page {} of a {}-page document, skipping",
                    field.x,
                    field.y,
                    field.page,
                    overlay.page_count()
                );
                continue;
            }
        };

        match field.field_type {
            schema::FieldType::Signature => {
                let img = decode_signature_value(field.value.as_deref().unwrap_or(""))?;
                overlay.draw_png(
                    page,
                    &img,
                    field.x,
                    field.y,
                    SIGNATURE_BOX_WIDTH,
                    SIGNATURE_BOX_HEIGHT,
                )?;
            }
            _ => overlay.draw_text(page, field.value.as_deref().unwrap_or(""), field.x, field.y)?,
        }
    }

    overlay.into_bytes()
}

/// Pull the base64 payload out of a `data:` URI (everything after the first
/// comma) and decode it.
pub fn decode_signature_value(value: &str) -> Result<Vec<u8>, Error> {
    let (_, payload) = value
        .split_once(',')
        .ok_or_else(|| Error::Decode("signature value is not a data URI".to_string()))?;
    base64::decode(payload).map_err(|err| Error::Decode(format!("invalid base64 payload: {}", err)))
}

/// An open document plus buffered overlay operators. Operators are appended
/// to each page's content stream when the document is serialised, so draw
/// order within a page follows call order.
pub struct Overlay {
    doc: lopdf::Document,
    pages: BTreeMap<u32, lopdf::ObjectId>,
    font_id: Option<lopdf::ObjectId>,
    patches: BTreeMap<lopdf::ObjectId, PagePatch>,
}

#[derive(Default)]
struct PagePatch {
    ops: Vec<lopdf::content::Operation>,
    images: Vec<(String, lopdf::ObjectId)>,
    uses_text: bool,
}

impl Overlay {
    pub fn new(doc: lopdf::Document) -> Self {
        Self {
            pages: doc.get_pages(),
            doc,
            font_id: None,
            patches: BTreeMap::new(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn has_page(&self, page: u32) -> bool {
        self.pages.contains_key(&page)
    }

    fn page_id(&self, page: u32) -> Result<lopdf::ObjectId, Error> {
        self.pages
            .get(&page)
            .copied()
            .ok_or(Error::PagePlacement(page as i64))
    }

    fn ensure_font(&mut self) -> lopdf::ObjectId {
        match self.font_id {
            Some(id) => id,
            None => {
                let id = self.doc.add_object(dictionary! {
                    "Type" => "Font",
                    "Subtype" => "Type1",
                    "BaseFont" => "Helvetica",
                });
                self.font_id = Some(id);
                id
            }
        }
    }

    pub fn draw_text(&mut self, page: u32, text: &str, x: f64, y: f64) -> Result<(), Error> {
        let page_id = self.page_id(page)?;
        self.ensure_font();

        let patch = self.patches.entry(page_id).or_default();
        patch.uses_text = true;
        patch.ops.extend(vec![
            lopdf::content::Operation::new("BT", vec![]),
            lopdf::content::Operation::new("rg", vec![0.into(), 0.into(), 0.into()]),
            lopdf::content::Operation::new("Tf", vec![FONT_RES_NAME.into(), TEXT_FONT_SIZE.into()]),
            lopdf::content::Operation::new("Td", vec![x.into(), y.into()]),
            lopdf::content::Operation::new("Tj", vec![lopdf::Object::string_literal(text)]),
            lopdf::content::Operation::new("ET", vec![]),
        ]);
        Ok(())
    }

    pub fn draw_png(
        &mut self,
        page: u32,
        data: &[u8],
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    ) -> Result<(), Error> {
        let page_id = self.page_id(page)?;
        let img_id = self.png_to_xobj(data)?;
        let img_name = format!("X{}", uuid::Uuid::new_v4().to_simple());

        let patch = self.patches.entry(page_id).or_default();
        patch.images.push((img_name.clone(), img_id));
        patch.ops.extend(vec![
            lopdf::content::Operation::new("q", vec![]),
            lopdf::content::Operation::new(
                "cm",
                vec![
                    width.into(),
                    0.into(),
                    0.into(),
                    height.into(),
                    x.into(),
                    y.into(),
                ],
            ),
            lopdf::content::Operation::new("Do", vec![img_name.into()]),
            lopdf::content::Operation::new("Q", vec![]),
        ]);
        Ok(())
    }

    /// Decode a PNG and store it as an image XObject, splitting any alpha
    /// channel into an SMask.
    fn png_to_xobj(&mut self, data: &[u8]) -> Result<lopdf::ObjectId, Error> {
        let decoder = png::Decoder::new(data);
        let mut reader = decoder.read_info().map_err(png_decode_error)?;
        let mut buf = vec![0; reader.output_buffer_size()];
        let info = reader.next_frame(&mut buf).map_err(png_decode_error)?;
        let pixels = &buf[..info.buffer_size()];

        let (samples, color_space, alpha) = match (info.bit_depth, info.color_type) {
            (_, png::ColorType::Grayscale) if (info.bit_depth as u8) <= 8 => {
                (pixels.to_vec(), "DeviceGray", None)
            }
            (_, png::ColorType::Rgb) if (info.bit_depth as u8) <= 8 => {
                (pixels.to_vec(), "DeviceRGB", None)
            }
            (png::BitDepth::Eight, png::ColorType::GrayscaleAlpha) => {
                let (gray, alpha) = split_alpha(pixels, 2);
                (gray, "DeviceGray", Some(alpha))
            }
            (png::BitDepth::Eight, png::ColorType::Rgba) => {
                let (rgb, alpha) = split_alpha(pixels, 4);
                (rgb, "DeviceRGB", Some(alpha))
            }
            _ => {
                return Err(Error::Decode(
                    "unsupported PNG bit depth or colour type".to_string(),
                ))
            }
        };
        let bits_per_component = info.bit_depth as u8 as i64;

        let smask_id = match alpha {
            Some(alpha) => {
                let mask_obj = lopdf::Stream::new(
                    dictionary! {
                        "Type" => "XObject",
                        "Subtype" => "Image",
                        "ColorSpace" => "DeviceGray",
                        "Width" => lopdf::Object::Integer(info.width.into()),
                        "Height" => lopdf::Object::Integer(info.height.into()),
                        "BitsPerComponent" => lopdf::Object::Integer(8),
                        "Filter" => lopdf::Object::Array(vec!["ASCIIHexDecode".into(), "FlateDecode".into()])
                    },
                    zlib_hex(&alpha)?,
                )
                .with_compression(false);
                Some(self.doc.add_object(mask_obj))
            }
            None => None,
        };

        let mut img_dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "ColorSpace" => color_space,
            "Width" => lopdf::Object::Integer(info.width.into()),
            "Height" => lopdf::Object::Integer(info.height.into()),
            "BitsPerComponent" => lopdf::Object::Integer(bits_per_component),
            "Filter" => lopdf::Object::Array(vec!["ASCIIHexDecode".into(), "FlateDecode".into()])
        };
        if let Some(smask_id) = smask_id {
            img_dict.set("SMask", lopdf::Object::Reference(smask_id));
        }
        let img_obj = lopdf::Stream::new(img_dict, zlib_hex(&samples)?).with_compression(false);

        Ok(self.doc.add_object(img_obj))
    }

    /// Flush every buffered page patch and serialise the document.
    pub fn into_bytes(mut self) -> Result<Vec<u8>, Error> {
        let patches = std::mem::take(&mut self.patches);
        for (page_id, patch) in patches {
            let existing = self.doc.get_page_content(page_id).unwrap_or_default();
            let mut content = lopdf::content::Content::decode(&existing)
                .unwrap_or_else(|_| lopdf::content::Content { operations: vec![] });
            content.operations.extend(patch.ops);
            let encoded = content.encode()?;

            let stream_id = self
                .doc
                .add_object(lopdf::Object::Stream(lopdf::Stream::new(dictionary! {}, encoded)));
            self.doc
                .get_object_mut(page_id)?
                .as_dict_mut()?
                .set("Contents", lopdf::Object::Reference(stream_id));

            if patch.uses_text {
                if let Some(font_id) = self.font_id {
                    let fonts = resource_category_mut(&mut self.doc, page_id, "Font")?;
                    if !fonts.has(FONT_RES_NAME.as_bytes()) {
                        fonts.set(FONT_RES_NAME, lopdf::Object::Reference(font_id));
                    }
                }
            }
            if !patch.images.is_empty() {
                let xobjects = resource_category_mut(&mut self.doc, page_id, "XObject")?;
                for (name, id) in patch.images {
                    xobjects.set(name, lopdf::Object::Reference(id));
                }
            }
        }

        let mut out = Vec::new();
        self.doc.save_to(&mut out)?;
        Ok(out)
    }
}

fn split_alpha(pixels: &[u8], stride: usize) -> (Vec<u8>, Vec<u8>) {
    let mut color = Vec::with_capacity(pixels.len() / stride * (stride - 1));
    let mut alpha = Vec::with_capacity(pixels.len() / stride);
    for px in pixels.chunks_exact(stride) {
        color.extend_from_slice(&px[..stride - 1]);
        alpha.push(px[stride - 1]);
    }
    (color, alpha)
}

fn zlib_hex(data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut encoder = deflate::write::ZlibEncoder::new(Vec::new(), deflate::Compression::Default);
    encoder.write_all(data)?;
    let compressed = encoder.finish()?;
    let mut hexed = hex::encode(&compressed);
    hexed.push('>');
    Ok(hexed.into_bytes())
}

fn png_decode_error(err: png::DecodingError) -> Error {
    Error::Decode(err.to_string())
}

/// Mutable access to one category dictionary ("Font", "XObject") of a page's
/// resources, creating missing levels and chasing indirect references.
fn resource_category_mut<'a>(
    doc: &'a mut lopdf::Document,
    page_id: lopdf::ObjectId,
    category: &str,
) -> Result<&'a mut lopdf::Dictionary, Error> {
    let category_slot = {
        let resources = resource_dict_mut(doc, page_id)?;
        match resources.get(category.as_bytes()) {
            Ok(lopdf::Object::Reference(r)) => Some(*r),
            Ok(_) => None,
            Err(_) => {
                resources.set(category, lopdf::Dictionary::new());
                None
            }
        }
    };
    let dict = match category_slot {
        Some(oid) => doc.get_object_mut(oid)?.as_dict_mut()?,
        None => resource_dict_mut(doc, page_id)?
            .get_mut(category.as_bytes())?
            .as_dict_mut()?,
    };
    Ok(dict)
}

fn resource_dict_mut(
    doc: &mut lopdf::Document,
    page_id: lopdf::ObjectId,
) -> Result<&mut lopdf::Dictionary, Error> {
    let indirect = {
        let page = doc.get_object(page_id)?.as_dict()?;
        match page.get(b"Resources") {
            Ok(lopdf::Object::Reference(r)) => Some(*r),
            _ => None,
        }
    };
    let dict = match indirect {
        Some(oid) => doc.get_object_mut(oid)?.as_dict_mut()?,
        None => {
            let page = doc.get_object_mut(page_id)?.as_dict_mut()?;
            if page.get(b"Resources").is_err() {
                page.set("Resources", lopdf::Dictionary::new());
            }
            page.get_mut(b"Resources")?.as_dict_mut()?
        }
    };
    Ok(dict)
}
