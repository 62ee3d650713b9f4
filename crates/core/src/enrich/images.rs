//! Image asset extraction: embedded metadata tags, GPS coordinates, content
//! checksums and the per-prompt photo columns.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use chrono::NaiveDateTime;
use exif::{In, Rational, Tag, Value as ExifValue};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::config::ImagePromptConfig;
use crate::error::{ReportError, Result};
use crate::row::{Layer, SessionRow};
use crate::store::{CollectStore, FileRecord, Session};

/// The fixed tag set exported into the EXIF blob, in output order.
pub const EXIF_TAGS: &[(&str, Tag)] = &[
    ("Make", Tag::Make),
    ("Model", Tag::Model),
    ("Orientation", Tag::Orientation),
    ("Software", Tag::Software),
    ("DateTime", Tag::DateTime),
    ("YCbCrPositioning", Tag::YCbCrPositioning),
    ("Compression", Tag::Compression),
    ("XResolution", Tag::XResolution),
    ("YResolution", Tag::YResolution),
    ("ResolutionUnit", Tag::ResolutionUnit),
    ("ExposureTime", Tag::ExposureTime),
    ("FNumber", Tag::FNumber),
    ("ExposureProgram", Tag::ExposureProgram),
    ("ExifVersion", Tag::ExifVersion),
    ("DateTimeOriginal", Tag::DateTimeOriginal),
    ("DateTimeDigitized", Tag::DateTimeDigitized),
    ("ComponentsConfiguration", Tag::ComponentsConfiguration),
    ("CompressedBitsPerPixel", Tag::CompressedBitsPerPixel),
    ("ExposureBiasValue", Tag::ExposureBiasValue),
    ("MaxApertureValue", Tag::MaxApertureValue),
    ("MeteringMode", Tag::MeteringMode),
    ("Flash", Tag::Flash),
    ("FocalLength", Tag::FocalLength),
    ("FlashpixVersion", Tag::FlashpixVersion),
    ("ColorSpace", Tag::ColorSpace),
    ("PixelXDimension", Tag::PixelXDimension),
    ("PixelYDimension", Tag::PixelYDimension),
    ("FileSource", Tag::FileSource),
    ("InteroperabilityIndex", Tag::InteroperabilityIndex),
    ("InteroperabilityVersion", Tag::InteroperabilityVersion),
    ("GPSLatitude", Tag::GPSLatitude),
    ("GPSLongitude", Tag::GPSLongitude),
];

const DATETIME_TAGS: &[Tag] = &[Tag::DateTime, Tag::DateTimeOriginal, Tag::DateTimeDigitized];

/// Runs on every session, cache hit or not. Image files are walked in
/// creation order so repeated prompts assign columns deterministically.
pub fn merge(
    row: &mut SessionRow,
    store: &dyn CollectStore,
    session: &Session,
    config: Option<&ImagePromptConfig>,
) -> Result<()> {
    let Some(config) = config else {
        return Ok(());
    };
    let mut images: Vec<&FileRecord> = store
        .files_for(session.id)
        .iter()
        .filter(|file| file.prompt_type == "image")
        .collect();
    images.sort_by(|a, b| a.created.cmp(&b.created));

    for file in images {
        let Some(prompt) = file.corpus_code.as_deref().and_then(|code| config.prompt_for(code))
        else {
            tracing::warn!(
                path = %file.path,
                corpus_code = ?file.corpus_code,
                "image file matches no configured prompt, skipping"
            );
            continue;
        };
        let path = Path::new(&file.path);
        let metadata = read_metadata(path)?;

        let mut latitude = metadata.latitude;
        let mut longitude = metadata.longitude;
        if latitude.is_none() || longitude.is_none() {
            if let Some((device_lat, device_lng)) = device_location(&file.attributes) {
                latitude = Some(device_lat);
                longitude = Some(device_lng);
            }
        }

        let checksum = file_sha256(path)?;
        row.set(
            Layer::Images,
            &format!("{prompt}_photo_EXIF"),
            Value::String(Value::Object(metadata.tags).to_string()),
        );
        row.set(Layer::Images, &format!("{prompt}_photo_URL"), Value::String(checksum));
        if let Some(number) = latitude.and_then(serde_json::Number::from_f64) {
            row.set(Layer::Images, &format!("{prompt}_photo_Lat"), Value::Number(number));
        }
        if let Some(number) = longitude.and_then(serde_json::Number::from_f64) {
            row.set(Layer::Images, &format!("{prompt}_photo_Lng"), Value::Number(number));
        }
        if config.has_status(prompt) {
            if let Some(status) = file.attributes.get("transcription").and_then(Value::as_str) {
                if !status.is_empty() {
                    row.set(
                        Layer::Images,
                        &format!("{prompt}_status"),
                        Value::String(status.to_string()),
                    );
                }
            }
        }
        if config.has_category(prompt) {
            if let Some(category) = file.attributes.get("category").and_then(Value::as_str) {
                if !category.is_empty() {
                    row.set(
                        Layer::Images,
                        &format!("{prompt}_category"),
                        Value::String(category.to_string()),
                    );
                }
            }
        }
    }
    Ok(())
}

struct ImageMetadata {
    tags: Map<String, Value>,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

/// Primary EXIF container read, with the generic image decoder as a probe
/// for containers that carry no metadata block. A container neither reader
/// recognizes is a hard error for the session.
fn read_metadata(path: &Path) -> Result<ImageMetadata> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    match exif::Reader::new().read_from_container(&mut reader) {
        Ok(parsed) => Ok(extract(&parsed)),
        Err(_) => {
            let recognized = image::ImageReader::open(path)
                .and_then(|probe| probe.with_guessed_format())
                .map(|probe| probe.format().is_some())
                .unwrap_or(false);
            if recognized {
                Ok(ImageMetadata { tags: Map::new(), latitude: None, longitude: None })
            } else {
                Err(ReportError::UnreadableImage(path.to_path_buf()))
            }
        }
    }
}

fn extract(parsed: &exif::Exif) -> ImageMetadata {
    let mut tags = Map::new();
    for (name, tag) in EXIF_TAGS {
        let value = parsed
            .get_field(*tag, In::PRIMARY)
            .map(|field| field_value(*tag, field))
            .unwrap_or(Value::Null);
        tags.insert((*name).to_string(), value);
    }
    ImageMetadata {
        tags,
        latitude: coordinate(parsed, Tag::GPSLatitude, Tag::GPSLatitudeRef, "S"),
        longitude: coordinate(parsed, Tag::GPSLongitude, Tag::GPSLongitudeRef, "W"),
    }
}

/// Converts one field for the blob. A tag that fails its conversion falls
/// back to its display rendering rather than aborting the extraction.
fn field_value(tag: Tag, field: &exif::Field) -> Value {
    if DATETIME_TAGS.contains(&tag) {
        let rendered = ascii_text(&field.value)
            .unwrap_or_else(|| field.display_value().to_string());
        if let Some(nanos) = datetime_nanos(&rendered) {
            return Value::from(nanos);
        }
        return Value::String(rendered);
    }
    if matches!(tag, Tag::GPSLatitude | Tag::GPSLongitude) {
        if let ExifValue::Rational(parts) = &field.value {
            if let Some(decimal) = dms_to_decimal(parts) {
                return serde_json::Number::from_f64(decimal)
                    .map(Value::Number)
                    .unwrap_or(Value::Null);
            }
        }
        return Value::Null;
    }
    if let Some(text) = ascii_text(&field.value) {
        return Value::String(text);
    }
    match &field.value {
        ExifValue::Short(values) if values.len() == 1 => Value::from(values[0]),
        ExifValue::Long(values) if values.len() == 1 => Value::from(values[0]),
        _ => Value::String(field.display_value().to_string()),
    }
}

fn ascii_text(value: &ExifValue) -> Option<String> {
    match value {
        ExifValue::Ascii(blocks) => blocks
            .first()
            .map(|block| String::from_utf8_lossy(block).trim().to_string()),
        _ => None,
    }
}

/// EXIF datetime (`YYYY:MM:DD HH:MM:SS`) to a nanosecond epoch integer.
fn datetime_nanos(raw: &str) -> Option<i64> {
    let parsed = NaiveDateTime::parse_from_str(raw.trim(), "%Y:%m:%d %H:%M:%S").ok()?;
    parsed.and_utc().timestamp_nanos_opt()
}

/// Degree/minute/second rationals to decimal degrees.
pub fn dms_to_decimal(parts: &[Rational]) -> Option<f64> {
    if parts.len() != 3 {
        return None;
    }
    let degrees = parts[0].to_f64();
    let minutes = parts[1].to_f64();
    let seconds = parts[2].to_f64();
    let decimal = degrees + minutes / 60.0 + seconds / 3600.0;
    decimal.is_finite().then_some(decimal)
}

fn coordinate(parsed: &exif::Exif, tag: Tag, ref_tag: Tag, negative_ref: &str) -> Option<f64> {
    let field = parsed.get_field(tag, In::PRIMARY)?;
    let ExifValue::Rational(parts) = &field.value else {
        return None;
    };
    let decimal = dms_to_decimal(parts)?;
    let negative = parsed
        .get_field(ref_tag, In::PRIMARY)
        .and_then(|field| ascii_text(&field.value))
        .map(|reference| reference.eq_ignore_ascii_case(negative_ref))
        .unwrap_or(false);
    Some(if negative { -decimal } else { decimal })
}

fn device_location(attributes: &Value) -> Option<(f64, f64)> {
    let location = attributes.get("deviceinfo")?.get("location")?;
    let latitude = location.get("latitude")?.as_f64()?;
    let longitude = location.get("longitude")?.as_f64()?;
    Some((latitude, longitude))
}

fn file_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}
