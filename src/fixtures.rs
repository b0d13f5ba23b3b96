// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright © 2022 Adrian <adrian.eddy at gmail>

//! Byte-level builders for MP4 boxes and GPMF records used by the unit tests.

use std::path::{ Path, PathBuf };

pub fn mp4_box(typ: &str, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 8);
    out.extend_from_slice(&(body.len() as u32 + 8).to_be_bytes());
    out.extend_from_slice(typ.as_bytes());
    out.extend_from_slice(body);
    out
}

pub fn container(typ: &str, children: &[Vec<u8>]) -> Vec<u8> {
    mp4_box(typ, &children.concat())
}

/// A full box: version 0, zero flags, then `body`.
pub fn full_box(typ: &str, body: &[u8]) -> Vec<u8> {
    let mut b = vec![0u8; 4];
    b.extend_from_slice(body);
    mp4_box(typ, &b)
}

fn be32(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_be_bytes()).collect()
}

pub fn mvhd(creation: u32, timescale: u32, duration: u32) -> Vec<u8> {
    full_box("mvhd", &be32(&[creation, creation, timescale, duration]))
}

pub fn mdhd(timescale: u32, duration: u32) -> Vec<u8> {
    full_box("mdhd", &be32(&[0, 0, timescale, duration]))
}

pub fn hdlr(handler: &str, name: &str) -> Vec<u8> {
    let mut b = vec![0u8; 4];
    b.extend_from_slice(handler.as_bytes());
    b.extend_from_slice(&[0u8; 12]);
    b.extend_from_slice(name.as_bytes());
    b.push(0);
    full_box("hdlr", &b)
}

pub fn stsd(format: &str) -> Vec<u8> {
    let mut entry = Vec::new();
    entry.extend_from_slice(&16u32.to_be_bytes());
    entry.extend_from_slice(format.as_bytes());
    entry.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 1]);
    let mut b = 1u32.to_be_bytes().to_vec();
    b.extend_from_slice(&entry);
    full_box("stsd", &b)
}

pub fn stts(entries: &[(u32, u32)]) -> Vec<u8> {
    let mut b = (entries.len() as u32).to_be_bytes().to_vec();
    for (count, delta) in entries { b.extend_from_slice(&be32(&[*count, *delta])); }
    full_box("stts", &b)
}

pub fn stsz(sizes: &[u32]) -> Vec<u8> {
    let mut b = be32(&[0, sizes.len() as u32]);
    b.extend_from_slice(&be32(sizes));
    full_box("stsz", &b)
}

pub fn stsz_fixed(size: u32, count: u32) -> Vec<u8> {
    full_box("stsz", &be32(&[size, count]))
}

pub fn stsc(entries: &[(u32, u32, u32)]) -> Vec<u8> {
    let mut b = (entries.len() as u32).to_be_bytes().to_vec();
    for (first, per_chunk, index) in entries { b.extend_from_slice(&be32(&[*first, *per_chunk, *index])); }
    full_box("stsc", &b)
}

pub fn stco(offsets: &[u32]) -> Vec<u8> {
    let mut b = (offsets.len() as u32).to_be_bytes().to_vec();
    b.extend_from_slice(&be32(offsets));
    full_box("stco", &b)
}

/// Movie with a 30000/1001 video track of `frames` frames and a GPMF track holding
/// `payloads`, each lasting `payload_ms` milliseconds.
pub fn gpmf_mp4(payloads: &[Vec<u8>], payload_ms: u32, frames: u32, creation_1904: u32) -> Vec<u8> {
    let ftyp = mp4_box("ftyp", b"mp41\0\0\0\0");
    let mdat_body = payloads.concat();
    let mdat = mp4_box("mdat", &mdat_body);

    let mut offsets = Vec::with_capacity(payloads.len());
    let mut pos = ftyp.len() as u32 + 8;
    for p in payloads {
        offsets.push(pos);
        pos += p.len() as u32;
    }
    let sizes: Vec<u32> = payloads.iter().map(|p| p.len() as u32).collect();
    let duration = payload_ms * payloads.len() as u32;

    let video = container("trak", &[
        container("mdia", &[
            mdhd(30000, frames * 1001),
            hdlr("vide", "GoPro AVC"),
            container("minf", &[
                container("stbl", &[
                    stsd("avc1"),
                    stts(&[(frames, 1001)]),
                    stsz_fixed(1, frames),
                    stsc(&[(1, frames.max(1), 1)]),
                    stco(&[ftyp.len() as u32 + 8]),
                ]),
            ]),
        ]),
    ]);
    let meta = container("trak", &[
        container("mdia", &[
            mdhd(1000, duration),
            hdlr("meta", "GoPro MET"),
            container("minf", &[
                container("stbl", &[
                    stsd("gpmd"),
                    stts(&[(payloads.len() as u32, payload_ms)]),
                    stsz(&sizes),
                    stsc(&[(1, 1, 1)]),
                    stco(&offsets),
                ]),
            ]),
        ]),
    ]);
    let moov = container("moov", &[mvhd(creation_1904, 1000, duration), video, meta]);

    [ftyp, mdat, moov].concat()
}

/// One GPMF key-length-value record, padded to a 32-bit boundary.
pub fn klv(key: &str, typ: u8, struct_size: u8, repeat: u16, data: &[u8]) -> Vec<u8> {
    assert_eq!(data.len(), struct_size as usize * repeat as usize);
    let mut out = Vec::with_capacity(data.len() + 12);
    out.extend_from_slice(key.as_bytes());
    out.push(typ);
    out.push(struct_size);
    out.extend_from_slice(&repeat.to_be_bytes());
    out.extend_from_slice(data);
    while out.len() % 4 != 0 { out.push(0); }
    out
}

pub fn nest(key: &str, children: &[Vec<u8>]) -> Vec<u8> {
    let body = children.concat();
    klv(key, 0, 4, (body.len() / 4) as u16, &body)
}

pub const GPS9_SCALES: [i32; 9] = [10_000_000, 10_000_000, 1000, 1000, 100, 1, 1000, 100, 1];
pub const GPS5_SCALES: [i32; 5] = [10_000_000, 10_000_000, 1000, 1000, 100];

fn scal(scales: &[i32]) -> Vec<u8> {
    let data: Vec<u8> = scales.iter().flat_map(|s| s.to_be_bytes()).collect();
    klv("SCAL", b'l', 4, scales.len() as u16, &data)
}

/// `DEVC { STRM { STNM, SCAL, TYPE, GPS9 } }` with rows of
/// lat, lon, alt, speed2d, speed3d, days, secs, dop, fix.
pub fn gps9_payload(rows: &[[f64; 9]]) -> Vec<u8> {
    let mut data = Vec::with_capacity(rows.len() * 32);
    for row in rows {
        for (i, v) in row.iter().enumerate().take(7) {
            data.extend_from_slice(&((v * GPS9_SCALES[i] as f64).round() as i32).to_be_bytes());
        }
        for (i, v) in row.iter().enumerate().skip(7) {
            data.extend_from_slice(&((v * GPS9_SCALES[i] as f64).round() as u16).to_be_bytes());
        }
    }
    nest("DEVC", &[
        klv("DVID", b'L', 4, 1, &1u32.to_be_bytes()),
        nest("STRM", &[
            klv("STNM", b'c', 3, 1, b"GPS"),
            scal(&GPS9_SCALES),
            klv("TYPE", b'c', 9, 1, b"lllllllSS"),
            klv("GPS9", b'?', 32, rows.len() as u16, &data),
        ]),
    ])
}

pub fn gps5_payload(rows: &[[f64; 5]]) -> Vec<u8> {
    let mut data = Vec::with_capacity(rows.len() * 20);
    for row in rows {
        for (i, v) in row.iter().enumerate() {
            data.extend_from_slice(&((v * GPS5_SCALES[i] as f64).round() as i32).to_be_bytes());
        }
    }
    nest("DEVC", &[
        nest("STRM", &[
            scal(&GPS5_SCALES),
            klv("GPS5", b'l', 20, rows.len() as u16, &data),
        ]),
    ])
}

pub fn gps9_row(lat: f64, lon: f64, fix: f64) -> [f64; 9] {
    [lat, lon, 100.0, 5.0, 5.1, 8000.0, 3600.0, 1.5, fix]
}

/// Scratch directory under the system temp dir, removed on drop.
pub struct ScratchDir(PathBuf);

impl std::ops::Deref for ScratchDir {
    type Target = Path;
    fn deref(&self) -> &Path { &self.0 }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

pub fn scratch_dir(name: &str) -> ScratchDir {
    let dir = std::env::temp_dir().join(format!("gpmf-gpx-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    ScratchDir(dir)
}
