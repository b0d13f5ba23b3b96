// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright © 2022 Adrian <adrian.eddy at gmail>

use std::path::Path;

use chrono::{ DateTime, Utc };
use filetime_creation::FileTime;

fn from_file_time(ft: FileTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ft.unix_seconds(), ft.nanoseconds())
}

pub fn file_system_creation_time(path: &Path) -> std::io::Result<Option<DateTime<Utc>>> {
    let md = std::fs::metadata(path)?;
    Ok(FileTime::from_creation_time(&md).and_then(from_file_time))
}

/// Best known recording start: the container's `mvhd` time if set, else the file system's.
pub fn lookup(path: &Path, container_time: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    if let Some(t) = container_time {
        log::debug!("Creation time of {} from mvhd: {t}", path.display());
        return Some(t);
    }
    match file_system_creation_time(path) {
        Ok(Some(t)) => {
            log::debug!("Creation time of {} from file system: {t}", path.display());
            Some(t)
        },
        Ok(None) => None,
        Err(e) => {
            log::debug!("Failed to read metadata of {}: {e:?}", path.display());
            None
        }
    }
}

pub fn lookup_or_now(path: &Path, container_time: Option<DateTime<Utc>>) -> DateTime<Utc> {
    lookup(path, container_time).unwrap_or_else(|| {
        log::warn!("No creation time for {}, using the current time", path.display());
        Utc::now()
    })
}

/// Gives `output` the creation time of `input` (modification time outside Windows).
pub fn copy_file_times(input: &Path, output: &Path) {
    if let Err(e) = || -> std::io::Result<()> {
        let org_time = FileTime::from_creation_time(&std::fs::metadata(input)?).ok_or(std::io::ErrorKind::Unsupported)?;
        if cfg!(target_os = "windows") {
            log::debug!("Updating creation time of {} to {org_time}", output.display());
            filetime_creation::set_file_ctime(output, org_time)?;
        } else {
            log::debug!("Updating modification time of {} to {org_time}", output.display());
            filetime_creation::set_file_mtime(output, org_time)?;
        }
        Ok(())
    }() {
        log::debug!("Failed to update file times of {}: {e:?}", output.display());
    }
}
