use super::{
    heatmap_entry, HeatmapRow, ProjectInfo, CAMERA_OVERVIEW_ENTRY, CAMERA_RAW_ENTRY,
    INFO_ENTRY, LEGACY_CAMERA_ENTRY, SPECTRA_ENTRY,
};
use crate::error::{AppResult, ScanError};
use crate::heatmap::{Band, HeatmapGrid};
use crate::result::{ScanImages, ScanResult, SpectraRow};
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use tracing::{debug, info};
use zip::result::ZipError;
use zip::ZipArchive;

/// Upper bound on reconstructed grid cells, to reject absurd indices.
const MAX_GRID_CELLS: usize = 16 * 1024 * 1024;

/// Reads a project container. No partial result is returned on error.
pub fn read(path: impl AsRef<Path>) -> AppResult<ScanResult> {
    let path = path.as_ref();
    let file = BufReader::new(File::open(path)?);
    let result = read_from(file)?;
    info!(
        path = %path.display(),
        points = result.scan_meta.point_count,
        width = result.heatmap_grid.width(),
        height = result.heatmap_grid.height(),
        "Project loaded"
    );
    Ok(result)
}

/// Reads a project container from any seekable source.
pub fn read_from<R: Read + Seek>(source: R) -> AppResult<ScanResult> {
    let mut archive = ZipArchive::new(source)?;

    let info: ProjectInfo = serde_json::from_slice(&required(&mut archive, INFO_ENTRY)?)
        .map_err(|err| ScanError::Format(format!("Malformed {INFO_ENTRY}: {err}")))?;
    let band = Band::new(info.heatmap.left_bound_cm1, info.heatmap.right_bound_cm1)
        .map_err(|err| ScanError::Format(format!("Invalid heatmap band: {err}")))?;

    let spectra_table: Vec<SpectraRow> =
        parse_table(&required(&mut archive, SPECTRA_ENTRY)?, SPECTRA_ENTRY)?;

    let heatmap_name = heatmap_table_name(&mut archive, band)?;
    let heatmap_rows: Vec<HeatmapRow> =
        parse_table(&required(&mut archive, &heatmap_name)?, &heatmap_name)?;
    if heatmap_rows.is_empty() && !spectra_table.is_empty() {
        return Err(ScanError::Format(format!(
            "{heatmap_name} is empty but {SPECTRA_ENTRY} holds {} rows",
            spectra_table.len()
        )));
    }
    let heatmap_grid = build_grid(&heatmap_rows, &heatmap_name)?;

    let images = ScanImages {
        heatmap_png: optional(&mut archive, &heatmap_entry(band.min(), band.max(), "png"))?,
        camera_overview_png: match optional(&mut archive, CAMERA_OVERVIEW_ENTRY)? {
            Some(bytes) => Some(bytes),
            None => optional(&mut archive, LEGACY_CAMERA_ENTRY)?,
        },
        camera_raw_png: optional(&mut archive, CAMERA_RAW_ENTRY)?,
    };

    Ok(ScanResult {
        scan_meta: info.scan,
        spectrometer_meta: info.spectrometer,
        heatmap_bounds: band,
        spectra_table,
        heatmap_grid,
        images,
        created_at: info.created_at,
    })
}

fn optional<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> AppResult<Option<Vec<u8>>> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes)?;
    Ok(Some(bytes))
}

fn required<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> AppResult<Vec<u8>> {
    optional(archive, name)?
        .ok_or_else(|| ScanError::Format(format!("Missing required entry {name}")))
}

/// The table named after `band`, else the first `heatmap_*.csv` in the archive.
fn heatmap_table_name<R: Read + Seek>(archive: &mut ZipArchive<R>, band: Band) -> AppResult<String> {
    let expected = heatmap_entry(band.min(), band.max(), "csv");
    let mut fallback = None;
    for index in 0..archive.len() {
        let name = archive.by_index(index)?.name().to_string();
        if name == expected {
            return Ok(name);
        }
        if fallback.is_none() && name.starts_with("heatmap_") && name.ends_with(".csv") {
            fallback = Some(name);
        }
    }
    if let Some(name) = &fallback {
        debug!(expected = %expected, found = %name, "Heatmap table name does not match band");
    }
    fallback.ok_or_else(|| ScanError::Format("Missing heatmap table".to_string()))
}

fn parse_table<T: serde::de::DeserializeOwned>(bytes: &[u8], name: &str) -> AppResult<Vec<T>> {
    csv::Reader::from_reader(bytes)
        .deserialize()
        .collect::<Result<Vec<T>, csv::Error>>()
        .map_err(|err| ScanError::Format(format!("Malformed {name}: {err}")))
}

/// Dense grid sized by the largest indices; unseen cells stay missing.
fn build_grid(rows: &[HeatmapRow], name: &str) -> AppResult<HeatmapGrid> {
    let Some(width) = rows.iter().map(|r| r.x_index.saturating_add(1)).max() else {
        return Ok(HeatmapGrid::default());
    };
    let height = rows.iter().map(|r| r.y_index.saturating_add(1)).max().unwrap_or(0);
    if width.checked_mul(height).map_or(true, |cells| cells > MAX_GRID_CELLS) {
        return Err(ScanError::Format(format!(
            "{name} declares a {width}x{height} grid"
        )));
    }

    let mut grid = HeatmapGrid::empty(width, height);
    let mut seen = vec![false; width * height];
    for row in rows {
        let slot = row.y_index * width + row.x_index;
        if std::mem::replace(&mut seen[slot], true) {
            return Err(ScanError::Format(format!(
                "{name} lists cell ({}, {}) twice",
                row.x_index, row.y_index
            )));
        }
        let value = row.integrated_intensity.filter(|v| v.is_finite());
        grid.set(row.x_index, row.y_index, value);
    }
    Ok(grid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::write_to;
    use crate::result::{ScanMeta, SpectrometerMeta};
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn result() -> ScanResult {
        ScanResult {
            scan_meta: ScanMeta {
                point_count: 1,
                step_x: 1.0,
                step_y: 1.0,
                ..ScanMeta::default()
            },
            spectrometer_meta: SpectrometerMeta::default(),
            heatmap_bounds: Band::new(400.0, 1000.0).unwrap(),
            spectra_table: vec![SpectraRow {
                x: 0.0,
                y: 0.0,
                raman_shift: 500.0,
                intensity: 2.0,
            }],
            heatmap_grid: HeatmapGrid::from_rows(&[
                vec![Some(2.0), None],
                vec![None, None],
            ])
            .unwrap(),
            images: ScanImages::default(),
            created_at: None,
        }
    }

    /// Builds an archive from raw `(name, content)` entries.
    fn archive(entries: &[(&str, &str)]) -> Cursor<Vec<u8>> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        let mut cursor = zip.finish().unwrap();
        cursor.set_position(0);
        cursor
    }

    const INFO: &str = r#"{
        "created_at": "2024-05-01T10:11:12",
        "scan": {"point_count": 1, "step_size_x": 2.0, "step_size_y": 0.5, "raman_min": 400},
        "spectrometer": {"integration_time_ms": 100.0},
        "heatmap": {"left_bound_cm1": 400.0, "right_bound_cm1": 1000.0}
    }"#;
    const SPECTRA: &str = "x,y,raman_shift,intensity\n0.0,0.0,500.0,2.0\n";

    #[test]
    fn test_trailing_missing_cells_survive() {
        let original = result();
        let mut cursor = write_to(Cursor::new(Vec::new()), &original).unwrap();
        cursor.set_position(0);
        let loaded = read_from(cursor).unwrap();
        assert_eq!(loaded.heatmap_grid, original.heatmap_grid);
        assert_eq!(loaded.heatmap_grid.height(), 2);
    }

    #[test]
    fn test_legacy_archive_with_camera_view() {
        let heatmap = "x_index,y_index,integrated_intensity\n0,0,2.0\n1,0,\n0,1,nan\n1,1,3.5\n";
        let source = archive(&[
            ("info.json", INFO),
            ("spectra.csv", SPECTRA),
            ("heatmap_400.0_1000.0.csv", heatmap),
            ("camera_view.png", "legacy"),
        ]);
        let loaded = read_from(source).unwrap();
        assert_eq!(loaded.heatmap_grid.width(), 2);
        assert_eq!(loaded.heatmap_grid.get(0, 0), Some(2.0));
        assert_eq!(loaded.heatmap_grid.get(1, 0), None);
        assert_eq!(loaded.heatmap_grid.get(0, 1), None);
        assert_eq!(loaded.heatmap_grid.get(1, 1), Some(3.5));
        assert_eq!(loaded.images.camera_overview_png, Some(b"legacy".to_vec()));
        assert_eq!(loaded.images.heatmap_png, None);
        assert_eq!(loaded.spectrometer_meta.integration_time_ms, Some(100.0));
        assert_eq!((loaded.scan_meta.step_x, loaded.scan_meta.step_y), (2.0, 0.5));
        assert_eq!(loaded.scan_meta.extra["raman_min"], 400);
        assert!(loaded.created_at.is_some());
    }

    #[test]
    fn test_heatmap_table_name_fallback() {
        let source = archive(&[
            ("info.json", INFO),
            ("spectra.csv", SPECTRA),
            ("heatmap_400_1000.csv", "x_index,y_index,integrated_intensity\n0,0,2.0\n"),
        ]);
        assert_eq!(read_from(source).unwrap().heatmap_grid.get(0, 0), Some(2.0));
    }

    #[test]
    fn test_missing_entries_are_format_errors() {
        let no_info = archive(&[("spectra.csv", SPECTRA)]);
        assert!(matches!(read_from(no_info), Err(ScanError::Format(_))));

        let no_heatmap = archive(&[("info.json", INFO), ("spectra.csv", SPECTRA)]);
        assert!(matches!(read_from(no_heatmap), Err(ScanError::Format(_))));
    }

    #[test]
    fn test_malformed_content_is_format_error() {
        let bad_json = archive(&[("info.json", "{not json"), ("spectra.csv", SPECTRA)]);
        assert!(matches!(read_from(bad_json), Err(ScanError::Format(_))));

        let bad_csv = archive(&[
            ("info.json", INFO),
            ("spectra.csv", "x,y,raman_shift,intensity\n0.0,zero,1,1\n"),
            ("heatmap_400.0_1000.0.csv", "x_index,y_index,integrated_intensity\n0,0,1\n"),
        ]);
        assert!(matches!(read_from(bad_csv), Err(ScanError::Format(_))));
    }

    #[test]
    fn test_inconsistent_heatmap_tables() {
        let duplicated = archive(&[
            ("info.json", INFO),
            ("spectra.csv", SPECTRA),
            ("heatmap_400.0_1000.0.csv", "x_index,y_index,integrated_intensity\n0,0,1\n0,0,2\n"),
        ]);
        assert!(matches!(read_from(duplicated), Err(ScanError::Format(_))));

        let empty = archive(&[
            ("info.json", INFO),
            ("spectra.csv", SPECTRA),
            ("heatmap_400.0_1000.0.csv", "x_index,y_index,integrated_intensity\n"),
        ]);
        assert!(matches!(read_from(empty), Err(ScanError::Format(_))));

        let huge = archive(&[
            ("info.json", INFO),
            ("spectra.csv", SPECTRA),
            (
                "heatmap_400.0_1000.0.csv",
                "x_index,y_index,integrated_intensity\n0,0,1\n100000,100000,2\n",
            ),
        ]);
        assert!(matches!(read_from(huge), Err(ScanError::Format(_))));
    }
}
