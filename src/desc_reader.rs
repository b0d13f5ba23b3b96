// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright © 2022 Adrian <adrian.eddy at gmail>

use std::io::{ Read, Seek, Result, SeekFrom };
use byteorder::{ ReadBytesExt, BigEndian };
use chrono::{ DateTime, Utc };
use crate::{ fourcc, read_box, typ_to_str };

/// Seconds between 1904-01-01 (MP4 epoch) and 1970-01-01.
const MP4_EPOCH_OFFSET: u64 = 2_082_844_800;

#[derive(Default, Clone, Debug)]
pub struct TrackDesc {
    pub handler_type: String, // "vide", "soun", "meta", ...
    pub handler_name: String,
    pub sample_format: String, // first stsd entry, "gpmd" for GPMF
    pub mdhd_timescale: u32,
    pub mdhd_duration: u64,
    pub stts: Vec<(u32, u32)>,
    pub stsz: Vec<u32>,
    pub stsz_sample_size: u32,
    pub stsz_count: u32,
    pub stsc: Vec<(u32, u32, u32)>, // first_chunk, samples_per_chunk, sample_description_index
    pub stco: Vec<u64>,
}

#[derive(Default, Clone, Debug)]
pub struct Desc {
    pub mvhd_timescale: u32,
    pub mvhd_duration: u64,
    pub mvhd_creation_time: u64, // seconds since 1904-01-01
    pub tracks: Vec<TrackDesc>,
}

impl TrackDesc {
    pub fn sample_count(&self) -> usize { self.stsz_count as usize }

    pub fn sample_size(&self, index: usize) -> u32 {
        if self.stsz_sample_size != 0 {
            self.stsz_sample_size
        } else {
            self.stsz.get(index).copied().unwrap_or(0)
        }
    }

    /// Fixed-size samples can't outnumber what fits in `file_size` bytes.
    pub fn clamp_sample_count(&mut self, file_size: u64) {
        if self.stsz_sample_size != 0 {
            let fits = file_size / self.stsz_sample_size as u64;
            if (self.stsz_count as u64) > fits {
                log::warn!("stsz claims {} samples of {} bytes in a {file_size} byte file", self.stsz_count, self.stsz_sample_size);
                self.stsz_count = fits as u32;
            }
        }
    }

    pub fn is_gpmf(&self) -> bool {
        self.handler_type == "meta" && self.sample_format == "gpmd"
    }

    /// Absolute file offset and size of every sample, from stsc + stco + stsz.
    pub fn sample_offsets(&self) -> Vec<(u64, u32)> {
        let total = self.sample_count();
        let mut out = Vec::new();
        for (chunk_index, chunk_offset) in self.stco.iter().enumerate() {
            let chunk_no = chunk_index as u32 + 1;
            let per_chunk = self.stsc.iter()
                .take_while(|x| x.0 <= chunk_no)
                .last()
                .map(|x| x.1)
                .unwrap_or(1);
            let mut offset = *chunk_offset;
            for _ in 0..per_chunk {
                if out.len() >= total {
                    return out;
                }
                let size = self.sample_size(out.len());
                out.push((offset, size));
                offset = offset.saturating_add(size as u64);
            }
        }
        out
    }

    /// `[t_in, t_out)` of every sample in seconds, from stts and the media timescale.
    pub fn sample_times(&self) -> Vec<(f64, f64)> {
        if self.mdhd_timescale == 0 {
            return Vec::new();
        }
        let timescale = self.mdhd_timescale as f64;
        let total = self.sample_count();
        let mut out = Vec::new();
        let mut t = 0u64;
        for &(count, delta) in &self.stts {
            for _ in 0..count {
                if out.len() >= total {
                    return out;
                }
                out.push((t as f64 / timescale, (t + delta as u64) as f64 / timescale));
                t += delta as u64;
            }
        }
        out
    }
}

impl Desc {
    pub fn gpmf_track(&self) -> Option<&TrackDesc> {
        self.tracks.iter().find(|t| t.is_gpmf())
            .or_else(|| self.tracks.iter().find(|t| t.handler_type == "meta" && t.handler_name.contains("GoPro MET")))
    }

    pub fn clamp_sample_counts(&mut self, file_size: u64) {
        for track in &mut self.tracks {
            track.clamp_sample_count(file_size);
        }
    }

    pub fn video_track(&self) -> Option<&TrackDesc> {
        self.tracks.iter().find(|t| t.handler_type == "vide")
    }

    pub fn creation_time(&self) -> Option<DateTime<Utc>> {
        if self.mvhd_creation_time <= MP4_EPOCH_OFFSET {
            return None;
        }
        DateTime::from_timestamp((self.mvhd_creation_time - MP4_EPOCH_OFFSET) as i64, 0)
    }
}

/// Clamps a table entry count to what fits in the remaining box body.
fn bounded(count: u32, body_size: u64, used: u64, entry_size: u64) -> u32 {
    let fits = body_size.saturating_sub(used) / entry_size;
    (count as u64).min(fits) as u32
}

pub fn read_desc<R: Read + Seek>(d: &mut R, desc: &mut Desc, max_read: u64) -> Result<()> {
    let start_offs = d.stream_position()?;
    while let Ok((typ, offs, size, header_size)) = read_box(d) {
        if typ == 0 || size < header_size as u64 { break; }
        let org_pos = d.stream_position()?;
        let body_size = size - header_size as u64;
        if crate::has_children(typ) {
            if typ == fourcc("trak") {
                desc.tracks.push(TrackDesc::default());
            }
            if body_size > 0 {
                read_desc(d, desc, body_size)?;
            }
        } else {
            log::debug!("Reading {}, offset: {}, size: {size}, header_size: {header_size}", typ_to_str(typ), offs);
            if typ == fourcc("mvhd") || typ == fourcc("mdhd") {
                let (v, _flags) = (d.read_u8()?, d.read_u24::<BigEndian>()?);
                let creation = if v == 1 { let c = d.read_u64::<BigEndian>()?; d.seek(SeekFrom::Current(8))?; c }
                               else      { let c = d.read_u32::<BigEndian>()? as u64; d.seek(SeekFrom::Current(4))?; c };
                let timescale = d.read_u32::<BigEndian>()?;
                let duration = if v == 1 { d.read_u64::<BigEndian>()? }
                               else      { d.read_u32::<BigEndian>()? as u64 };
                if typ == fourcc("mvhd") {
                    desc.mvhd_timescale = timescale;
                    desc.mvhd_duration = duration;
                    desc.mvhd_creation_time = creation;
                } else if let Some(track_desc) = desc.tracks.last_mut() {
                    track_desc.mdhd_timescale = timescale;
                    track_desc.mdhd_duration = duration;
                }
            }
            let track_index = desc.tracks.len().saturating_sub(1);
            if let Some(track_desc) = desc.tracks.last_mut() {
                if typ == fourcc("hdlr") {
                    let (_v, _flags) = (d.read_u8()?, d.read_u24::<BigEndian>()?);
                    d.seek(SeekFrom::Current(4))?; // Skip pre_defined
                    let handler_type = d.read_u32::<BigEndian>()?;
                    track_desc.handler_type = typ_to_str(handler_type);
                    let name_len = body_size.saturating_sub(24);
                    if name_len > 0 {
                        d.seek(SeekFrom::Current(12))?; // Skip reserved
                        let mut name = vec![0u8; name_len.min(256) as usize];
                        d.read_exact(&mut name)?;
                        track_desc.handler_name = String::from_utf8_lossy(&name)
                            .trim_matches(|c: char| c.is_control())
                            .to_string();
                    }
                    log::debug!("Track {track_index} handler type: {} ({})", track_desc.handler_type, track_desc.handler_name);
                }
                if typ == fourcc("stsd") {
                    let (_v, _flags) = (d.read_u8()?, d.read_u24::<BigEndian>()?);
                    let entry_count = d.read_u32::<BigEndian>()?;
                    if entry_count > 0 {
                        let _entry_size = d.read_u32::<BigEndian>()?;
                        track_desc.sample_format = typ_to_str(d.read_u32::<BigEndian>()?);
                    }
                }
                if typ == fourcc("stts") || typ == fourcc("stsz") || typ == fourcc("stsc") ||
                   typ == fourcc("stco") || typ == fourcc("co64") {
                    let (_v, _flags) = (d.read_u8()?, d.read_u24::<BigEndian>()?);

                    if typ == fourcc("stsz") {
                        track_desc.stsz_sample_size = d.read_u32::<BigEndian>()?;
                        let count = d.read_u32::<BigEndian>()?;
                        if track_desc.stsz_sample_size == 0 {
                            let count = bounded(count, body_size, 12, 4);
                            for _ in 0..count { track_desc.stsz.push(d.read_u32::<BigEndian>()?); }
                            track_desc.stsz_count = count;
                        } else {
                            track_desc.stsz_count = count;
                        }
                    } else {
                        let count = d.read_u32::<BigEndian>()?;
                        let entry_size = if typ == fourcc("stts") || typ == fourcc("co64") { 8 }
                                         else if typ == fourcc("stsc") { 12 }
                                         else { 4 };
                        let count = bounded(count, body_size, 8, entry_size);
                        for _ in 0..count {
                            if typ == fourcc("stco") { track_desc.stco.push(d.read_u32::<BigEndian>()? as u64); }
                            if typ == fourcc("co64") { track_desc.stco.push(d.read_u64::<BigEndian>()?); }
                            if typ == fourcc("stts") { track_desc.stts.push((d.read_u32::<BigEndian>()?, d.read_u32::<BigEndian>()?)); }
                            if typ == fourcc("stsc") { track_desc.stsc.push((
                                d.read_u32::<BigEndian>()?,
                                d.read_u32::<BigEndian>()?,
                                d.read_u32::<BigEndian>()?
                            )); }
                        }
                    }
                }
            }
        }
        d.seek(SeekFrom::Start(org_pos + body_size))?;
        if d.stream_position()? - start_offs >= max_read {
            break;
        }
    }
    Ok(())
}
