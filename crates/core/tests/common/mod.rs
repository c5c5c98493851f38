//! In-memory fixture documents for integration tests.
//!
//! Builds small but structurally complete PDFs (page tree, AcroForm,
//! content streams) with lopdf so tests run without asset files.

// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use lopdf::{Dictionary, Document, Object, StringFormat, dictionary};

/// One fixture page: raw content-stream operators plus the widget/field
/// dictionaries that should land in its `/Annots`.
pub struct PageSpec {
    pub content: String,
    pub fields: Vec<Dictionary>,
    /// When false the field's `/P` entry is omitted, forcing page
    /// resolution through the `/Annots` scan.
    pub link_pages: bool,
}

impl Default for PageSpec {
    fn default() -> Self {
        Self {
            content: String::new(),
            fields: Vec::new(),
            link_pages: true,
        }
    }
}

/// `/Rect` array for an (x, y, width, height) box.
pub fn rect_array(x: f64, y: f64, w: f64, h: f64) -> Vec<Object> {
    vec![
        Object::Real(x as f32),
        Object::Real(y as f32),
        Object::Real((x + w) as f32),
        Object::Real((y + h) as f32),
    ]
}

/// A merged text field + widget dictionary.
pub fn text_field(name: &str, x: f64, y: f64, w: f64, h: f64) -> Dictionary {
    dictionary! {
        "Type" => "Annot",
        "Subtype" => "Widget",
        "FT" => "Tx",
        "T" => Object::String(name.as_bytes().to_vec(), StringFormat::Literal),
        "Rect" => rect_array(x, y, w, h),
    }
}

/// A text field carrying an initial `/V` value.
pub fn text_field_with_value(name: &str, x: f64, y: f64, w: f64, h: f64, value: &str) -> Dictionary {
    let mut dict = text_field(name, x, y, w, h);
    dict.set(
        "V",
        Object::String(value.as_bytes().to_vec(), StringFormat::Literal),
    );
    dict
}

/// A checkbox field with a Yes/Off appearance dictionary.
pub fn checkbox_field(name: &str, x: f64, y: f64, w: f64, h: f64, checked: bool) -> Dictionary {
    let mut dict = dictionary! {
        "Type" => "Annot",
        "Subtype" => "Widget",
        "FT" => "Btn",
        "T" => Object::String(name.as_bytes().to_vec(), StringFormat::Literal),
        "Rect" => rect_array(x, y, w, h),
        "AP" => dictionary! {
            "N" => dictionary! {
                "Yes" => Object::Null,
                "Off" => Object::Null,
            },
        },
    };
    dict.set(
        "V",
        Object::Name(if checked { b"Yes".to_vec() } else { b"Off".to_vec() }),
    );
    dict
}

/// A field dictionary with no `/Rect`: extraction must drop it without
/// aborting the batch.
pub fn rectless_field(name: &str) -> Dictionary {
    dictionary! {
        "Type" => "Annot",
        "Subtype" => "Widget",
        "FT" => "Tx",
        "T" => Object::String(name.as_bytes().to_vec(), StringFormat::Literal),
    }
}

/// Serializes a document with the given pages (US Letter, 612x792).
///
/// When `with_acroform` is false the fields still appear in each page's
/// `/Annots`, exercising the widget-scan fallback.
pub fn build_pdf_with(pages: Vec<PageSpec>, with_acroform: bool) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut kids: Vec<Object> = Vec::new();
    let mut all_field_ids = Vec::new();

    for spec in pages {
        let content_id = doc.add_object(lopdf::Stream::new(
            dictionary! {},
            spec.content.into_bytes(),
        ));
        let page_id = doc.new_object_id();

        let mut annots: Vec<Object> = Vec::new();
        for mut field in spec.fields {
            if spec.link_pages {
                field.set("P", page_id);
            }
            let field_id = doc.add_object(Object::Dictionary(field));
            annots.push(Object::Reference(field_id));
            all_field_ids.push(field_id);
        }

        let page_dict = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(612),
                Object::Integer(792),
            ],
            "Contents" => content_id,
            "Annots" => annots,
        };
        doc.objects.insert(page_id, Object::Dictionary(page_dict));
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );

    let mut catalog = dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    };
    if with_acroform {
        let fields: Vec<Object> = all_field_ids
            .iter()
            .map(|&id| Object::Reference(id))
            .collect();
        let acroform_id = doc.add_object(Object::Dictionary(dictionary! {
            "Fields" => fields,
        }));
        catalog.set("AcroForm", acroform_id);
    }
    let catalog_id = doc.add_object(Object::Dictionary(catalog));
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("fixture serialization");
    bytes
}

/// Single-page fixture with an AcroForm.
pub fn build_pdf(fields: Vec<Dictionary>, content: &str) -> Vec<u8> {
    build_pdf_with(
        vec![PageSpec {
            content: content.to_string(),
            fields,
            link_pages: true,
        }],
        true,
    )
}

/// Looks up a terminal field dictionary by `/T` in a serialized PDF.
pub fn find_field<'a>(doc: &'a Document, name: &str) -> Option<&'a Dictionary> {
    for (_, obj) in doc.objects.iter() {
        if let Object::Dictionary(dict) = obj {
            if let Ok(Object::String(bytes, _)) = dict.get(b"T") {
                if bytes == name.as_bytes() {
                    return Some(dict);
                }
            }
        }
    }
    None
}
