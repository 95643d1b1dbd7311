//! This module provides [date_taken], which finds the capture timestamp embedded in an image file.
//!
//! Extraction is best-effort: each file type has an ordered list of [Strategy] implementations, and the first one
//! to produce a timestamp wins.  Failures are logged and never surface to the caller.

#![deny(warnings)]

use {
    anyhow::Result,
    exif::{In, Reader as ExifReader, Tag, Value},
    rexiv2::Metadata as Exiv2Metadata,
    std::io::Cursor,
    tracing::{debug, info},
};

/// Exiv2 keys consulted by [Exiv2Tags], in order of preference
const EXIV2_DATE_TAGS: &[&str] = &[
    "Exif.Photo.DateTimeOriginal",
    "Exif.Image.DateTimeOriginal",
    "Exif.Image.DateTime",
];

/// EXIF tags consulted by [EmbeddedExif], in order of preference (36867 and 306, respectively)
const EXIF_DATE_TAGS: &[Tag] = &[Tag::DateTimeOriginal, Tag::DateTime];

/// A way of finding the capture timestamp of an image
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Look for a capture timestamp in `data`, the raw contents of `filename`.
    ///
    /// `Ok(None)` means the metadata was readable but had no timestamp.
    fn date_taken(&self, filename: &str, data: &[u8]) -> Result<Option<String>>;
}

/// Scans the raw container for EXIF fields using exiv2, which understands more container formats than the image
/// decoder does.
pub struct Exiv2Tags;

impl Strategy for Exiv2Tags {
    fn name(&self) -> &'static str {
        "exiv2"
    }

    fn date_taken(&self, filename: &str, data: &[u8]) -> Result<Option<String>> {
        let metadata = Exiv2Metadata::new_from_buffer(data)?;

        if let Some(datetime) = EXIV2_DATE_TAGS
            .iter()
            .find_map(|tag| metadata.get_tag_string(tag).ok().and_then(clean))
        {
            return Ok(Some(datetime));
        }

        info!(
            "no capture date among exiv2 tags for {}: {:?}",
            filename,
            metadata.get_exif_tags().unwrap_or_default()
        );

        Ok(None)
    }
}

/// Parses the EXIF block embedded in the image container (JPEG APP1, TIFF IFDs, HEIF `Exif` item, etc.).
pub struct EmbeddedExif;

impl Strategy for EmbeddedExif {
    fn name(&self) -> &'static str {
        "exif"
    }

    fn date_taken(&self, filename: &str, data: &[u8]) -> Result<Option<String>> {
        let exif = match ExifReader::new().read_from_container(&mut Cursor::new(data)) {
            Ok(exif) => exif,
            Err(exif::Error::NotFound(_)) => {
                debug!("no EXIF block in {}", filename);

                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(datetime) = EXIF_DATE_TAGS.iter().find_map(|&tag| {
            exif.get_field(tag, In::PRIMARY)
                .and_then(|field| clean(field_text(field)))
        }) {
            return Ok(Some(datetime));
        }

        info!(
            "no capture date among EXIF tags for {}: {:?}",
            filename,
            exif.fields()
                .map(|field| field.tag.to_string())
                .collect::<Vec<_>>()
        );

        Ok(None)
    }
}

/// Render a field as text, decoding byte strings as UTF-8 and dropping any invalid bytes.
fn field_text(field: &exif::Field) -> String {
    match &field.value {
        Value::Ascii(strings) => strings
            .first()
            .map(|bytes| {
                String::from_utf8_lossy(bytes)
                    .chars()
                    .filter(|&c| c != char::REPLACEMENT_CHARACTER)
                    .collect()
            })
            .unwrap_or_default(),

        _ => field.display_value().to_string(),
    }
}

fn clean(value: String) -> Option<String> {
    let trimmed = value.trim_matches(|c: char| c == '\0' || c.is_whitespace());

    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

static HEIF_STRATEGIES: &[&dyn Strategy] = &[&Exiv2Tags, &EmbeddedExif];

static DEFAULT_STRATEGIES: &[&dyn Strategy] = &[&EmbeddedExif];

/// Whether `filename` names a HEIF/HEIC image, judging by its extension
pub fn is_heif(filename: &str) -> bool {
    let lowercase = filename.to_lowercase();

    lowercase.ends_with(".heic") || lowercase.ends_with(".heif")
}

/// The strategies to try, in order, for a file named `filename`
pub fn strategies(filename: &str) -> &'static [&'static dyn Strategy] {
    if is_heif(filename) {
        HEIF_STRATEGIES
    } else {
        DEFAULT_STRATEGIES
    }
}

/// Find the capture timestamp of `data`, the contents of an image file named `filename`.
///
/// Returns whatever the first successful strategy found, or `None` if every strategy failed or came up empty.
pub fn date_taken(filename: &str, data: &[u8]) -> Option<String> {
    for strategy in strategies(filename) {
        match strategy.date_taken(filename, data) {
            Ok(Some(datetime)) => {
                debug!("{} found {} in {}", strategy.name(), datetime, filename);

                return Some(datetime);
            }
            Ok(None) => (),
            Err(e) => debug!("{} unable to read {}: {:?}", strategy.name(), filename, e),
        }
    }

    info!("no capture date found for {}", filename);

    None
}
