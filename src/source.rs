// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright © 2022 Adrian <adrian.eddy at gmail>

use std::fs::File;
use std::io::{ BufReader, Read, Seek, SeekFrom };
use std::ops::{ Deref, DerefMut };
use std::path::{ Path, PathBuf };

use chrono::{ DateTime, Utc };
use thiserror::Error;

use crate::desc_reader::{ read_desc, Desc };

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("source is already open")]
    AlreadyOpen,
    #[error("source is not open")]
    NotOpen,
    #[error("payload {index} out of range, file has {count}")]
    PayloadOutOfRange { index: usize, count: usize },
}

/// Ordered GPMF payloads with their `[t_in, t_out)` times in seconds.
pub trait PayloadSource {
    fn payload_count(&self) -> crate::error::Result<usize>;
    fn payload_time(&self, index: usize) -> crate::error::Result<(f64, f64)>;
    fn payload(&mut self, index: usize) -> crate::error::Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PayloadEntry {
    offset: u64,
    size: u32,
    t_in: f64,
    t_out: f64,
}

#[derive(Debug)]
struct OpenState {
    reader: BufReader<File>,
    desc: Desc,
    payloads: Vec<PayloadEntry>,
}

#[derive(Debug)]
enum State {
    Closed,
    Open(OpenState),
}

/// GPMF payloads of one MP4 file. Must be opened before it can be queried.
#[derive(Debug)]
pub struct Mp4Source {
    path: PathBuf,
    state: State,
}

impl Mp4Source {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self { path: path.as_ref().to_path_buf(), state: State::Closed }
    }

    pub fn path(&self) -> &Path { &self.path }
    pub fn is_open(&self) -> bool { matches!(self.state, State::Open(_)) }

    pub fn open(&mut self) -> crate::error::Result<()> {
        if self.is_open() {
            return Err(SourceError::AlreadyOpen.into());
        }
        let mut reader = BufReader::with_capacity(16*1024, File::open(&self.path)?);
        let file_size = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let mut desc = Desc::default();
        read_desc(&mut reader, &mut desc, file_size)?;
        desc.clamp_sample_counts(file_size);

        let payloads = match desc.gpmf_track() {
            Some(track) => track.sample_offsets().into_iter()
                .zip(track.sample_times())
                .map(|((offset, size), (t_in, t_out))| PayloadEntry { offset, size, t_in, t_out })
                .filter(|p| p.offset.checked_add(p.size as u64).is_some_and(|end| end <= file_size))
                .collect(),
            None => {
                log::debug!("{} has no GPMF track", self.path.display());
                Vec::new()
            }
        };
        log::debug!("Opened {}: {} tracks, {} GPMF payloads", self.path.display(), desc.tracks.len(), payloads.len());

        self.state = State::Open(OpenState { reader, desc, payloads });
        Ok(())
    }

    pub fn close(&mut self) -> crate::error::Result<()> {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Open(_) => Ok(()),
            State::Closed => Err(SourceError::NotOpen.into()),
        }
    }

    /// Opens the source and closes it again when the guard goes out of scope.
    pub fn scoped(&mut self) -> crate::error::Result<OpenSource<'_>> {
        self.open()?;
        Ok(OpenSource { source: self })
    }

    fn state(&self) -> Result<&OpenState, SourceError> {
        match &self.state {
            State::Open(x) => Ok(x),
            State::Closed => Err(SourceError::NotOpen),
        }
    }

    fn entry(&self, index: usize) -> Result<PayloadEntry, SourceError> {
        let state = self.state()?;
        state.payloads.get(index).copied()
            .ok_or(SourceError::PayloadOutOfRange { index, count: state.payloads.len() })
    }

    pub fn payload_size(&self, index: usize) -> crate::error::Result<u32> {
        Ok(self.entry(index)?.size)
    }

    /// Frame count and frame rate as `numerator / denominator`.
    pub fn video_frame_rate_and_count(&self) -> crate::error::Result<Option<(usize, u32, u32)>> {
        let state = self.state()?;
        Ok(state.desc.video_track().and_then(|track| {
            let delta = track.stts.first()?.1;
            if delta == 0 || track.mdhd_timescale == 0 {
                return None;
            }
            Some((track.sample_count(), track.mdhd_timescale, delta))
        }))
    }

    pub fn video_frame_timestamps(&self) -> crate::error::Result<Vec<f64>> {
        let state = self.state()?;
        Ok(state.desc.video_track()
            .map(|track| track.sample_times().into_iter().map(|x| x.0).collect())
            .unwrap_or_default())
    }

    pub fn creation_time(&self) -> crate::error::Result<Option<DateTime<Utc>>> {
        Ok(self.state()?.desc.creation_time())
    }
}

impl PayloadSource for Mp4Source {
    fn payload_count(&self) -> crate::error::Result<usize> {
        Ok(self.state()?.payloads.len())
    }

    fn payload_time(&self, index: usize) -> crate::error::Result<(f64, f64)> {
        let entry = self.entry(index)?;
        Ok((entry.t_in, entry.t_out))
    }

    fn payload(&mut self, index: usize) -> crate::error::Result<Vec<u8>> {
        let entry = self.entry(index)?;
        let State::Open(state) = &mut self.state else {
            return Err(SourceError::NotOpen.into());
        };
        state.reader.seek(SeekFrom::Start(entry.offset))?;
        let mut buf = vec![0u8; entry.size as usize];
        state.reader.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// An open `Mp4Source` that is closed when dropped.
pub struct OpenSource<'a> {
    source: &'a mut Mp4Source,
}

impl Deref for OpenSource<'_> {
    type Target = Mp4Source;
    fn deref(&self) -> &Mp4Source { self.source }
}
impl DerefMut for OpenSource<'_> {
    fn deref_mut(&mut self) -> &mut Mp4Source { self.source }
}

impl Drop for OpenSource<'_> {
    fn drop(&mut self) {
        if self.source.is_open() {
            let _ = self.source.close();
            log::debug!("Closed {}", self.source.path.display());
        }
    }
}
