use crate::error::{GatewayError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

pub const OPTIONS_VERSION: u32 = 1;

const IMAGE_RESOLUTIONS: [u32; 5] = [75, 150, 300, 600, 1200];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PdfA {
    #[serde(rename = "PDF/A-1b")]
    A1b,
    #[serde(rename = "PDF/A-2b")]
    A2b,
    #[serde(rename = "PDF/A-3b")]
    A3b,
}

impl PdfA {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PDF/A-1B" => Ok(Self::A1b),
            "PDF/A-2B" => Ok(Self::A2b),
            "PDF/A-3B" => Ok(Self::A3b),
            other => Err(GatewayError::InvalidOptions(format!(
                "unknown PDF/A profile: {other}"
            ))),
        }
    }

    /// Value of the `SelectPdfVersion` export filter property.
    fn filter_version(self) -> u8 {
        match self {
            Self::A1b => 1,
            Self::A2b => 2,
            Self::A3b => 3,
        }
    }
}

/// Caller-supplied description of a PDF conversion.
///
/// Fields are optional; `None` leaves the engine default in place. The value
/// is never mutated by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionOptions {
    pub version: u32,
    pub page_ranges: Option<String>,
    pub password: Option<String>,
    pub landscape: bool,
    pub pdfa: Option<PdfA>,
    pub pdfua: bool,
    pub lossless_image_compression: bool,
    pub quality: Option<u8>,
    pub reduce_image_resolution: bool,
    pub max_image_resolution: Option<u32>,
    pub export_form_fields: Option<bool>,
    pub export_bookmarks: Option<bool>,
    pub export_notes: Option<bool>,
    pub single_page_sheets: bool,
    pub update_indexes: bool,
    /// Consumed by the request layer that merges several outputs; the engine
    /// never sees it.
    pub merge: bool,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            version: OPTIONS_VERSION,
            page_ranges: None,
            password: None,
            landscape: false,
            pdfa: None,
            pdfua: false,
            lossless_image_compression: false,
            quality: None,
            reduce_image_resolution: false,
            max_image_resolution: None,
            export_form_fields: None,
            export_bookmarks: None,
            export_notes: None,
            single_page_sheets: false,
            update_indexes: false,
            merge: false,
        }
    }
}

fn page_ranges_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*\d+(\s*-\s*\d+)?(\s*[,;]\s*\d+(\s*-\s*\d+)?)*\s*$")
            .expect("page range regex is valid")
    })
}

impl ConversionOptions {
    /// Structural checks only; whether page 40 exists is for the engine to say.
    pub fn validate(&self) -> Result<()> {
        if self.version == 0 || self.version > OPTIONS_VERSION {
            return Err(GatewayError::InvalidOptions(format!(
                "unsupported options version {} (max {OPTIONS_VERSION})",
                self.version
            )));
        }

        if let Some(ranges) = self.page_ranges.as_deref() {
            if !ranges.trim().is_empty() {
                validate_page_ranges(ranges)?;
            }
        }

        if let Some(q) = self.quality {
            if !(1..=100).contains(&q) {
                return Err(GatewayError::InvalidOptions(format!(
                    "quality must be within 1..=100, got {q}"
                )));
            }
        }

        if let Some(res) = self.max_image_resolution {
            if !IMAGE_RESOLUTIONS.contains(&res) {
                return Err(GatewayError::InvalidOptions(format!(
                    "max_image_resolution must be one of {IMAGE_RESOLUTIONS:?}, got {res}"
                )));
            }
        }

        Ok(())
    }

    /// LibreOffice `writer_pdf_Export` filter data as `Key=Value` pairs.
    pub fn export_filter_data(&self) -> Vec<String> {
        let mut out = Vec::new();

        if let Some(ranges) = self.page_ranges.as_deref().map(str::trim) {
            if !ranges.is_empty() {
                out.push(format!("PageRange={}", ranges.replace(' ', "")));
            }
        }
        if let Some(pdfa) = self.pdfa {
            out.push(format!("SelectPdfVersion={}", pdfa.filter_version()));
        }
        if self.pdfua {
            out.push("PDFUACompliance=true".to_string());
        }
        if self.lossless_image_compression {
            out.push("UseLosslessCompression=true".to_string());
        }
        if let Some(q) = self.quality {
            out.push(format!("Quality={q}"));
        }
        if self.reduce_image_resolution {
            out.push("ReduceImageResolution=true".to_string());
        }
        if let Some(res) = self.max_image_resolution {
            out.push(format!("MaxImageResolution={res}"));
        }
        if let Some(v) = self.export_form_fields {
            out.push(format!("ExportFormFields={v}"));
        }
        if let Some(v) = self.export_bookmarks {
            out.push(format!("ExportBookmarks={v}"));
        }
        if let Some(v) = self.export_notes {
            out.push(format!("ExportNotes={v}"));
        }
        if self.single_page_sheets {
            out.push("SinglePageSheets=true".to_string());
        }

        out
    }
}

fn validate_page_ranges(raw: &str) -> Result<()> {
    if !page_ranges_re().is_match(raw) {
        return Err(GatewayError::InvalidOptions(format!(
            "malformed page ranges: {raw:?}"
        )));
    }
    for part in raw.split([',', ';']) {
        let bounds: Vec<u32> = part
            .split('-')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        if bounds.contains(&0) {
            return Err(GatewayError::InvalidOptions(format!(
                "page numbers are 1-based: {raw:?}"
            )));
        }
        if let [start, end] = bounds[..] {
            if start > end {
                return Err(GatewayError::InvalidOptions(format!(
                    "descending page range {start}-{end}"
                )));
            }
        }
    }
    Ok(())
}
