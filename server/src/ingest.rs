//! This module provides [ingest], which stores a batch of uploaded images, normalizing HEIF/HEIC images to JPEG
//! and recording each file's capture timestamp in the photo store.

#![deny(warnings)]

use {
    crate::{extract, uploads, Error, State},
    anyhow::{anyhow, Result},
    burst_shared::Ranking,
    image::{io::Reader as ImageReader, DynamicImage, ImageOutputFormat, RgbImage},
    std::{
        io::Cursor,
        path::{Path, PathBuf},
    },
    tokio::{fs, task},
    tracing::{info, warn},
};

/// Extension given to normalized HEIF/HEIC images
pub const NORMALIZED_EXTENSION: &str = "jpeg";

const JPEG_QUALITY: u8 = 90;

/// An uploaded file ready to be written to the upload directory
#[derive(Debug)]
struct Prepared {
    filename: String,
    data: Vec<u8>,
    date_taken: Option<String>,
}

/// Replace the extension of `filename` with [NORMALIZED_EXTENSION], keeping any directory components.
pub fn normalized_filename(filename: &str) -> Result<String> {
    Path::new(filename)
        .with_extension(NORMALIZED_EXTENSION)
        .to_str()
        .map(str::to_owned)
        .ok_or_else(|| anyhow!("invalid UTF-8"))
}

#[cfg(feature = "heif")]
fn decode_heif(data: &[u8]) -> Result<RgbImage> {
    use libheif_rs::{ColorSpace, HeifContext, LibHeif, RgbChroma};

    let lib_heif = LibHeif::new();
    let context = HeifContext::read_from_bytes(data)?;
    let handle = context.primary_image_handle()?;
    let image = lib_heif.decode(&handle, ColorSpace::Rgb(RgbChroma::Rgb), None)?;

    let plane = image
        .planes()
        .interleaved
        .ok_or_else(|| anyhow!("decoded HEIF image has no interleaved RGB plane"))?;

    let row_length = usize::try_from(plane.width)? * 3;
    let mut pixels = Vec::with_capacity(row_length * usize::try_from(plane.height)?);

    // Rows may be padded out to `stride` bytes.
    for row in 0..usize::try_from(plane.height)? {
        let start = row * plane.stride;

        pixels.extend_from_slice(
            plane
                .data
                .get(start..start + row_length)
                .ok_or_else(|| anyhow!("truncated HEIF plane"))?,
        );
    }

    RgbImage::from_raw(plane.width, plane.height, pixels)
        .ok_or_else(|| anyhow!("HEIF plane does not match its dimensions"))
}

#[cfg(not(feature = "heif"))]
fn decode_heif(_data: &[u8]) -> Result<RgbImage> {
    Err(anyhow!(
        "HEIF decoding is not supported by this build (enable the `heif` feature)"
    ))
}

/// Convert a HEIF/HEIC image to a three-channel JPEG.
fn normalize(data: &[u8]) -> Result<Vec<u8>> {
    let image = decode_heif(data)?;

    let mut buffer = Vec::new();

    DynamicImage::ImageRgb8(image).write_to(
        &mut Cursor::new(&mut buffer),
        ImageOutputFormat::Jpeg(JPEG_QUALITY),
    )?;

    Ok(buffer)
}

/// Make sure `data` looks like an image we know how to decode.
fn check_image(data: &[u8]) -> Result<()> {
    let reader = ImageReader::new(Cursor::new(data)).with_guessed_format()?;

    if reader.format().is_none() {
        return Err(anyhow!("unrecognized image format"));
    }

    reader.into_dimensions()?;

    Ok(())
}

fn prepare(filename: String, data: Vec<u8>) -> Result<Prepared> {
    if extract::is_heif(&filename) {
        let normalized = normalize(&data)?;

        Ok(Prepared {
            date_taken: extract::date_taken(&filename, &data),
            filename: normalized_filename(&filename)?,
            data: normalized,
        })
    } else {
        check_image(&data)?;

        Ok(Prepared {
            date_taken: extract::date_taken(&filename, &data),
            filename,
            data,
        })
    }
}

async fn write(state: &State, filename: &str, data: &[u8]) -> Result<PathBuf> {
    let path = state.upload_directory.join(uploads::relative_path(filename)?);

    if state.is_store_file(&path) {
        return Err(Error::Validation(
            format!("{} is reserved for the server's own use", filename).into(),
        )
        .into());
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    fs::write(&path, data).await?;

    Ok(path)
}

/// Store each of `files` (filename and contents) under the upload directory in order, recording its capture
/// timestamp in the photo store with the default ranking.
///
/// Returns the stored filenames, which differ from the uploaded ones for normalized HEIF/HEIC images.  A file
/// which cannot be decoded or written, or which would land on one of the store files, is logged and left out of
/// the result without affecting the rest of the batch.  A file with the same name as an existing one replaces it,
/// along with its record.  Failure to update the photo store aborts the batch.
pub async fn ingest(state: &State, files: Vec<(String, Vec<u8>)>) -> Result<Vec<String>> {
    let count = files.len();

    let mut stored = Vec::with_capacity(count);

    for (index, (filename, data)) in files.into_iter().enumerate() {
        let prepared = match uploads::relative_path(&filename) {
            Ok(_) => task::block_in_place(|| prepare(filename.clone(), data)),
            Err(e) => Err(e),
        };

        let prepared = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!("({} of {}) skipping {}: {:?}", index + 1, count, filename, e);

                continue;
            }
        };

        if let Err(e) = write(state, &prepared.filename, &prepared.data).await {
            warn!(
                "({} of {}) unable to write {}: {:?}",
                index + 1,
                count,
                prepared.filename,
                e
            );

            continue;
        }

        info!(
            "({} of {}) stored {} as {} (date taken {:?})",
            index + 1,
            count,
            filename,
            prepared.filename,
            prepared.date_taken
        );

        state
            .photos
            .upsert(&prepared.filename, prepared.date_taken, Ranking::default())
            .await?;

        stored.push(prepared.filename);
    }

    Ok(stored)
}
