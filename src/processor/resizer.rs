use std::io::Cursor;

use bytes::Bytes;
use image::imageops::FilterType;
use image::{load_from_memory_with_format, GenericImageView};

use crate::config::DimensionLimits;
use crate::models::ImageKind;

/// Downscales the image to fit within the limits, keeping its aspect ratio.
///
/// Images already within the limits, or of a kind which cannot be
/// re-encoded safely, are returned untouched.
pub fn fit_within(limits: DimensionLimits, kind: ImageKind, data: Bytes) -> anyhow::Result<Bytes> {
    if !kind.is_resizable() {
        return Ok(data);
    }

    let img = load_from_memory_with_format(data.as_ref(), kind.into())?;
    let (width, height) = img.dimensions();
    if width <= limits.width && height <= limits.height {
        return Ok(data);
    }

    let resized = img.resize(limits.width, limits.height, FilterType::Lanczos3);

    let mut buff = Cursor::new(Vec::new());
    resized.write_to(&mut buff, image::ImageFormat::from(kind))?;
    Ok(Bytes::from(buff.into_inner()))
}

/// Runs `fit_within` on the rayon pool.
pub async fn fit_within_async(
    limits: DimensionLimits,
    kind: ImageKind,
    data: Bytes,
) -> anyhow::Result<Bytes> {
    let (tx, rx) = tokio::sync::oneshot::channel();

    rayon::spawn(move || {
        let _ = tx.send(fit_within(limits, kind, data));
    });

    rx.await?
}
