use super::{
    heatmap_entry, project_path, HeatmapInfo, HeatmapRow, ProjectInfo, CAMERA_OVERVIEW_ENTRY,
    CAMERA_RAW_ENTRY, INFO_ENTRY, SPECTRA_ENTRY,
};
use crate::error::AppResult;
use crate::result::ScanResult;
use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Writes `result` to `path`, replacing its extension with `.raman2dscan`.
///
/// Returns the path actually written.
pub fn write(path: impl AsRef<Path>, result: &ScanResult) -> AppResult<PathBuf> {
    let path = project_path(path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = BufWriter::new(File::create(&path)?);
    write_to(file, result)?;
    info!(
        path = %path.display(),
        points = result.scan_meta.point_count,
        band = %result.heatmap_bounds,
        "Project written"
    );
    Ok(path)
}

/// Writes the archive to any seekable sink.
pub fn write_to<W: Write + Seek>(sink: W, result: &ScanResult) -> AppResult<W> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(sink);
    let band = result.heatmap_bounds;

    let info = ProjectInfo {
        created_at: result.created_at,
        scan: result.scan_meta.clone(),
        spectrometer: result.spectrometer_meta.clone(),
        heatmap: HeatmapInfo {
            left_bound_cm1: band.min(),
            right_bound_cm1: band.max(),
        },
    };
    zip.start_file(INFO_ENTRY, options)?;
    zip.write_all(&serde_json::to_vec_pretty(&info)?)?;

    zip.start_file(SPECTRA_ENTRY, options)?;
    let mut spectra = table_writer();
    spectra.write_record(["x", "y", "raman_shift", "intensity"])?;
    for row in &result.spectra_table {
        spectra.serialize(row)?;
    }
    zip.write_all(&into_bytes(spectra)?)?;

    zip.start_file(heatmap_entry(band.min(), band.max(), "csv"), options)?;
    let mut heatmap = table_writer();
    heatmap.write_record(["x_index", "y_index", "integrated_intensity"])?;
    for (x_index, y_index, value) in result.heatmap_grid.iter() {
        heatmap.serialize(HeatmapRow {
            x_index,
            y_index,
            integrated_intensity: value.filter(|v| v.is_finite()),
        })?;
    }
    zip.write_all(&into_bytes(heatmap)?)?;

    let images = [
        (
            heatmap_entry(band.min(), band.max(), "png"),
            &result.images.heatmap_png,
        ),
        (CAMERA_OVERVIEW_ENTRY.to_string(), &result.images.camera_overview_png),
        (CAMERA_RAW_ENTRY.to_string(), &result.images.camera_raw_png),
    ];
    for (name, bytes) in images {
        if let Some(bytes) = bytes {
            zip.start_file(name, options)?;
            zip.write_all(bytes)?;
        }
    }

    Ok(zip.finish()?)
}

/// Headers are written explicitly so empty tables still carry one.
fn table_writer() -> csv::Writer<Vec<u8>> {
    csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new())
}

fn into_bytes(writer: csv::Writer<Vec<u8>>) -> AppResult<Vec<u8>> {
    writer.into_inner().map_err(|err| err.into_error().into())
}
