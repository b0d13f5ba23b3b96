// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright © 2022 Adrian <adrian.eddy at gmail>

use std::io::{ Read, Seek, Result };
use std::path::{ Path, PathBuf };
use byteorder::{ BigEndian, ReadBytesExt };

pub mod creation_time;
pub mod desc_reader;
pub mod error;
pub mod extract;
pub mod gpmf;
pub mod gpx;
pub mod resample;
pub mod source;
pub mod stitch;
pub mod timestamps;

#[cfg(test)]
pub(crate) mod fixtures;

pub use error::Error;
pub use extract::{ extract_directory, extract_file, extract_samples, ExtractOptions, FileReport };
pub use gpmf::{ GpmfStream, SampleRecord };
pub use gpx::{ build_track, parse_gpx_file, parse_gpx_from_str, save_gpx_file, write_gpx, Track, TrackPoint };
pub use resample::{ normalize_to_1hz, NormalizedPoint };
pub use source::{ Mp4Source, OpenSource, PayloadSource, SourceError };
pub use stitch::{ merge_directory, stitch_tracks, MergeOutcome };
pub use creation_time::{ copy_file_times, lookup_or_now };
pub use timestamps::{ payload_timestamps, TimestampedSample };

// Boxes we need to look at:
// - moov/mvhd                       movie timescale and creation time
// - moov/trak/mdia/mdhd             track timescale
// - moov/trak/mdia/hdlr             handler type ("meta" for GPMF) and name
// - moov/trak/mdia/minf/stbl/stsd   sample entry format ("gpmd")
// - moov/trak/mdia/minf/stbl/stts   sample durations -> payload times
// - moov/trak/mdia/minf/stbl/stsz   sample sizes
// - moov/trak/mdia/minf/stbl/stsc   samples per chunk
// - moov/trak/mdia/minf/stbl/stco and co64   chunk offsets

pub const fn fourcc(s: &str) -> u32 {
    let s = s.as_bytes();
    (s[3] as u32) | ((s[2] as u32) << 8) | ((s[1] as u32) << 16) | ((s[0] as u32) << 24)
}
const fn has_children(typ: u32) -> bool {
    typ == fourcc("moov") || typ == fourcc("trak") || typ == fourcc("edts") ||
    typ == fourcc("mdia") || typ == fourcc("minf") || typ == fourcc("stbl")
}
pub fn typ_to_str(typ: u32) -> String {
    match String::from_utf8(vec![(typ >> 24) as u8, (typ >> 16) as u8, (typ >> 8) as u8, typ as u8 ]) {
        Ok(x) => x,
        Err(_) => format!("{:08X}", typ)
    }
}

pub fn read_box<R: Read + Seek>(reader: &mut R) -> Result<(u32, u64, u64, i64)> {
    let pos = reader.stream_position()?;
    let size = reader.read_u32::<BigEndian>()?;
    let typ = reader.read_u32::<BigEndian>()?;
    if size == 1 {
        let largesize = reader.read_u64::<BigEndian>()?;
        Ok((typ, pos, largesize, 16))
    } else {
        Ok((typ, pos, size as u64, 8))
    }
}

/// Files of `dir` whose extension matches one of `extensions` (case-insensitive), sorted by name.
pub fn files_with_extensions(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() { continue; }
        let matches = path.extension()
            .and_then(|x| x.to_str())
            .map(|x| extensions.iter().any(|e| e.eq_ignore_ascii_case(x)))
            .unwrap_or(false);
        if matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Installs the `env_logger` backend. `RUST_LOG` still overrides `level`.
pub fn init_logging(level: log::LevelFilter) {
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .try_init();
}
