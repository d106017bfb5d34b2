use crate::{
    config::{Output, OutputFormat},
    scan::RawImage,
};
use anyhow::{bail, Context};
use image::{ExtendedColorType, ImageFormat};
use libsnapscan::FrameFormat;
use std::{fs, path::PathBuf};

/// Writes page `index` into the output directory and returns its path.
pub fn save(output: &Output, index: usize, image: &RawImage) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(&output.directory)
        .with_context(|| format!("creating directory '{}'", output.directory.display()))?;

    let path = output
        .directory
        .join(format!("page-{index:03}.{}", output.format));

    match output.format {
        OutputFormat::Pnm => {
            let pnm = encode_pnm(image)?;
            fs::write(&path, pnm).with_context(|| format!("writing '{}'", path.display()))?;
        }
        OutputFormat::Png => {
            let (pixels, color) = png_pixels(image)?;
            image::save_buffer_with_format(
                &path,
                &pixels,
                image.width as u32,
                image.height as u32,
                color,
                ImageFormat::Png,
            )
            .with_context(|| format!("encoding '{}'", path.display()))?;
        }
    }

    log::info!(
        "Saved {}x{} page to '{}'",
        image.width,
        image.height,
        path.display()
    );

    Ok(path)
}

/// Bytes of one packed row, without line padding.
fn row_len(image: &RawImage) -> usize {
    if image.depth == 1 {
        image.width.div_ceil(8)
    } else {
        image.width * image.format.channels() * image.depth.div_ceil(8)
    }
}

fn rows(image: &RawImage) -> impl Iterator<Item = &[u8]> {
    let len = row_len(image);
    image
        .bytes
        .chunks_exact(image.bytes_per_line.max(1))
        .take(image.height)
        .map(move |row| &row[..len.min(row.len())])
}

pub fn encode_pnm(image: &RawImage) -> anyhow::Result<Vec<u8>> {
    let (magic, maxval) = match (image.format, image.depth) {
        (FrameFormat::Gray, 1) => ("P4", None),
        (FrameFormat::Gray, 8) => ("P5", Some(255)),
        (FrameFormat::Gray, 16) => ("P5", Some(65535)),
        (FrameFormat::RGB, 8) => ("P6", Some(255)),
        (FrameFormat::RGB, 16) => ("P6", Some(65535)),
        (format, depth) => bail!("no PNM encoding for {format:?} at {depth} bits"),
    };

    let mut out = format!("{magic}\n# snapscan\n{} {}\n", image.width, image.height).into_bytes();
    if let Some(maxval) = maxval {
        out.extend_from_slice(format!("{maxval}\n").as_bytes());
    }

    for row in rows(image) {
        if image.depth == 16 {
            for sample in row.chunks_exact(2) {
                out.extend_from_slice(&[sample[1], sample[0]]);
            }
        } else {
            out.extend_from_slice(row);
        }
    }

    Ok(out)
}

fn png_pixels(image: &RawImage) -> anyhow::Result<(Vec<u8>, ExtendedColorType)> {
    let color = match (image.format, image.depth) {
        (FrameFormat::Gray, 1 | 8) => ExtendedColorType::L8,
        (FrameFormat::Gray, 16) => ExtendedColorType::L16,
        (FrameFormat::RGB, 8) => ExtendedColorType::Rgb8,
        (FrameFormat::RGB, 16) => ExtendedColorType::Rgb16,
        (format, depth) => bail!("no PNG encoding for {format:?} at {depth} bits"),
    };

    let pixels = if image.depth == 1 {
        // Lineart: a set bit is black.
        rows(image)
            .flat_map(|row| {
                (0..image.width).map(move |x| {
                    if row[x / 8] & (0x80 >> (x % 8)) != 0 {
                        0
                    } else {
                        255
                    }
                })
            })
            .collect()
    } else {
        rows(image).flatten().copied().collect()
    };

    Ok((pixels, color))
}
