// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright © 2022 Adrian <adrian.eddy at gmail>

use std::path::{ Path, PathBuf };

use chrono::Duration;

use crate::error::{ Error, Result };
use crate::gpx::{ parse_gpx_file, save_gpx_file, Track };

#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    NotEnoughFiles(usize),
    Merged { files: usize, points: usize, output: PathBuf },
}

fn shift(track: &mut Track, offset: Duration) {
    for p in &mut track.points {
        if let Some(t) = p.time.as_mut() {
            *t += offset;
        }
    }
}

/// Appends every track after the first so that its first point lands on the previous
/// track's last point. Spacing within a track is kept as is. Metadata comes from the
/// first track.
pub fn stitch_tracks(tracks: Vec<Track>) -> Result<Track> {
    let mut tracks = tracks.into_iter();
    let Some(mut merged) = tracks.next() else {
        return Ok(Track::default());
    };
    let Some(mut end) = merged.last_time() else {
        let label = merged.description.clone().unwrap_or_else(|| "first track".into());
        return Err(Error::NoTimestamps(label));
    };
    log::info!("First track ends at: {end}");

    for (i, mut track) in tracks.enumerate() {
        let label = track.description.clone().unwrap_or_else(|| format!("track {}", i + 2));
        let Some(start) = track.first_time() else {
            log::warn!("Skipping {label}: no timestamps found");
            continue;
        };
        let offset = end - start;
        shift(&mut track, offset);
        log::info!("{label}: original start {start}, time offset {offset}");

        if let Some(t) = track.last_time() {
            end = t;
        }
        merged.points.append(&mut track.points);
        log::debug!("{label}: new end time {end}");
    }

    Ok(merged)
}

/// Stitches every `.gpx` file of `dir` in file name order into `output`.
pub fn merge_directory(dir: &Path, output: &Path) -> Result<MergeOutcome> {
    let files: Vec<PathBuf> = crate::files_with_extensions(dir, &["gpx"])?
        .into_iter()
        .filter(|p| p != output)
        .collect();
    if files.len() < 2 {
        log::info!("Found {} GPX file(s). Need at least 2 to merge.", files.len());
        return Ok(MergeOutcome::NotEnoughFiles(files.len()));
    }
    log::info!("Found {} GPX files to merge", files.len());

    let tracks = files.iter().map(|f| {
        log::debug!("Reading {}", f.display());
        let mut track = parse_gpx_file(f)?;
        if track.description.is_none() {
            track.description = f.file_name().map(|x| x.to_string_lossy().into_owned());
        }
        Ok(track)
    }).collect::<Result<Vec<_>>>()?;

    let merged = stitch_tracks(tracks)?;
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    save_gpx_file(output, &merged)?;

    log::info!("Merged GPX saved to: {}", output.display());
    log::info!("Total track points: {}", merged.points.len());
    Ok(MergeOutcome::Merged { files: files.len(), points: merged.points.len(), output: output.to_path_buf() })
}
