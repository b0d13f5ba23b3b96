// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright © 2022 Adrian <adrian.eddy at gmail>

//! GoPro GPMF (General Purpose Metadata Format) decoding.
//!
//! A payload is a list of key-length-value records. Each record has an 8 byte header:
//! FourCC key, type char, struct size and big-endian repeat count, followed by
//! `struct_size * repeat` bytes of data padded to 32 bits. Type 0 marks a nested
//! record list (`DEVC`, `STRM`).

use byteorder::{ BigEndian, ByteOrder };
use thiserror::Error;
use crate::{ fourcc, typ_to_str };

pub const GPMF_STREAM_ID: u32 = fourcc("STRM"); // STRM = one sensor stream inside a device
const GPMF_SCALE_ID: u32 = fourcc("SCAL"); // SCAL = divisor(s) applied to the stream data
const GPMF_TYPE_ID: u32 = fourcc("TYPE"); // TYPE = element types of a complex ('?') structure

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GpmfError {
    #[error("empty payload")]
    Empty,
    #[error("truncated record at offset {0}")]
    Truncated(usize),
    #[error("invalid key {key:08X} at offset {offset}")]
    InvalidKey { key: u32, offset: usize },
}

#[derive(Debug, Clone)]
pub enum KlvValue<'a> {
    Nested(Vec<Klv<'a>>),
    /// Nested record whose body doesn't parse. Kept so searches can skip over it.
    Opaque(&'a [u8]),
    Data(&'a [u8]),
}

#[derive(Debug, Clone)]
pub struct Klv<'a> {
    pub key: u32,
    pub type_char: u8,
    pub struct_size: u8,
    pub repeat: u16,
    pub value: KlvValue<'a>,
}

impl<'a> Klv<'a> {
    pub fn fourcc_str(&self) -> String { typ_to_str(self.key) }

    pub fn data(&self) -> Option<&'a [u8]> {
        match self.value {
            KlvValue::Data(d) => Some(d),
            _ => None,
        }
    }

    pub fn children(&self) -> Option<&[Klv<'a>]> {
        match &self.value {
            KlvValue::Nested(c) => Some(c),
            _ => None,
        }
    }
}

/// Scaled samples of one sensor record.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord {
    pub tag: u32,
    /// Numeric fields per sample.
    pub width: usize,
    pub count: usize,
    /// `count * width` values, row-major.
    pub values: Vec<f64>,
}

impl SampleRecord {
    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.values.chunks_exact(self.width.max(1))
    }
}

/// Decoding context for a single payload. Owns the parsed record tree and is dropped
/// once the payload is done, so nothing carries over to the next one.
#[derive(Debug)]
pub struct GpmfStream<'a> {
    records: Vec<Klv<'a>>,
}

const fn valid_key_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b' '
}

fn valid_key(key: u32) -> bool {
    key.to_be_bytes().iter().all(|c| valid_key_char(*c))
}

fn parse_klvs(buf: &[u8], base: usize) -> Result<Vec<Klv<'_>>, GpmfError> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < buf.len() {
        if buf.len() - pos < 8 {
            if buf[pos..].iter().all(|b| *b == 0) { break; }
            return Err(GpmfError::Truncated(base + pos));
        }
        let key = BigEndian::read_u32(&buf[pos..]);
        if key == 0 { break; } // Padding
        if !valid_key(key) {
            return Err(GpmfError::InvalidKey { key, offset: base + pos });
        }
        let type_char = buf[pos + 4];
        let struct_size = buf[pos + 5];
        let repeat = BigEndian::read_u16(&buf[pos + 6..]);
        let len = struct_size as usize * repeat as usize;
        let start = pos + 8;
        if start + len > buf.len() {
            return Err(GpmfError::Truncated(base + pos));
        }
        let body = &buf[start..start + len];
        let value = if type_char == 0 {
            match parse_klvs(body, base + start) {
                Ok(children) => KlvValue::Nested(children),
                Err(e) => {
                    log::debug!("Unparseable {} container: {e}", typ_to_str(key));
                    KlvValue::Opaque(body)
                }
            }
        } else {
            KlvValue::Data(body)
        };
        out.push(Klv { key, type_char, struct_size, repeat, value });
        pos = start + ((len + 3) & !3);
    }
    Ok(out)
}

fn type_size(t: u8) -> Option<usize> {
    match t {
        b'b' | b'B' | b'c' => Some(1),
        b's' | b'S' => Some(2),
        b'l' | b'L' | b'f' | b'F' | b'q' => Some(4),
        b'd' | b'j' | b'J' | b'Q' => Some(8),
        b'G' | b'U' => Some(16),
        _ => None,
    }
}

fn is_numeric(t: u8) -> bool {
    matches!(t, b'b' | b'B' | b's' | b'S' | b'l' | b'L' | b'f' | b'd' | b'j' | b'J' | b'q' | b'Q')
}

fn read_numeric(t: u8, b: &[u8]) -> Option<f64> {
    let size = type_size(t)?;
    if b.len() < size { return None; }
    Some(match t {
        b'b' => b[0] as i8 as f64,
        b'B' => b[0] as f64,
        b's' => BigEndian::read_i16(b) as f64,
        b'S' => BigEndian::read_u16(b) as f64,
        b'l' => BigEndian::read_i32(b) as f64,
        b'L' => BigEndian::read_u32(b) as f64,
        b'j' => BigEndian::read_i64(b) as f64,
        b'J' => BigEndian::read_u64(b) as f64,
        b'f' => BigEndian::read_f32(b) as f64,
        b'd' => BigEndian::read_f64(b),
        b'q' => BigEndian::read_i32(b) as f64 / 65536.0,
        b'Q' => BigEndian::read_i64(b) as f64 / 4294967296.0,
        _ => return None,
    })
}

/// Expands a `TYPE` string such as `lllllllSS` or `f[3]L` into one type per element.
fn expand_type(types: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < types.len() && types[i] != 0 {
        if types[i] == b'[' {
            let end = i + types[i..].iter().position(|c| *c == b']')?;
            let n: usize = std::str::from_utf8(&types[i + 1..end]).ok()?.parse().ok()?;
            let prev = *out.last()?;
            for _ in 1..n { out.push(prev); }
            i = end + 1;
        } else {
            out.push(types[i]);
            i += 1;
        }
    }
    Some(out)
}

/// Every numeric value of a record, in order.
fn numeric_values(klv: &Klv) -> Option<Vec<f64>> {
    let data = klv.data()?;
    let size = type_size(klv.type_char).filter(|_| is_numeric(klv.type_char))?;
    Some(data.chunks_exact(size).filter_map(|c| read_numeric(klv.type_char, c)).collect())
}

/// Nearest preceding sibling with `key` in the same record list.
fn find_prev<'b, 'a>(siblings: &'b [Klv<'a>], index: usize, key: u32) -> Option<&'b Klv<'a>> {
    siblings[..index].iter().rev().find(|k| k.key == key)
}

/// Depth-first search for the first data record with `tag`. Returns the list holding
/// it and its index there.
fn find_first<'b, 'a>(records: &'b [Klv<'a>], tag: u32) -> Option<(&'b [Klv<'a>], usize)> {
    for (i, klv) in records.iter().enumerate() {
        match &klv.value {
            KlvValue::Data(_) if klv.key == tag => return Some((records, i)),
            KlvValue::Nested(children) => {
                if let Some(found) = find_first(children, tag) {
                    return Some(found);
                }
            }
            _ => {}
        }
    }
    None
}

fn collect_streams<'b, 'a>(records: &'b [Klv<'a>], out: &mut Vec<&'b [Klv<'a>]>) {
    for klv in records {
        if let KlvValue::Nested(children) = &klv.value {
            if klv.key == GPMF_STREAM_ID {
                out.push(children);
            } else {
                collect_streams(children, out);
            }
        }
    }
}

fn decode_record(siblings: &[Klv], index: usize) -> Option<SampleRecord> {
    let klv = &siblings[index];
    let data = klv.data()?;
    let struct_size = klv.struct_size as usize;

    let types = if klv.type_char == b'?' {
        let t = find_prev(siblings, index, GPMF_TYPE_ID)?;
        expand_type(t.data()?)?
    } else {
        let size = type_size(klv.type_char)?;
        if struct_size % size != 0 { return None; }
        vec![klv.type_char; struct_size / size]
    };
    if types.is_empty() || !types.iter().all(|t| is_numeric(*t)) {
        log::debug!("{} is not numeric", klv.fourcc_str());
        return None;
    }
    let sizes: Vec<usize> = types.iter().filter_map(|t| type_size(*t)).collect();
    if sizes.iter().sum::<usize>() != struct_size {
        log::debug!("{} structure size {} doesn't match its types", klv.fourcc_str(), struct_size);
        return None;
    }

    let scales = find_prev(siblings, index, GPMF_SCALE_ID)
        .and_then(numeric_values)
        .unwrap_or_default();
    let scale_for = |element: usize| {
        let s = match scales.len() {
            0 => 1.0,
            1 => scales[0],
            _ => scales.get(element).copied().unwrap_or(1.0),
        };
        if s == 0.0 { 1.0 } else { s }
    };

    let count = klv.repeat as usize;
    let width = types.len();
    let mut values = Vec::with_capacity(count * width);
    for sample in data.chunks_exact(struct_size).take(count) {
        let mut offs = 0;
        for (element, (t, size)) in types.iter().zip(&sizes).enumerate() {
            values.push(read_numeric(*t, &sample[offs..])? / scale_for(element));
            offs += size;
        }
    }

    Some(SampleRecord { tag: klv.key, width, count, values })
}

impl<'a> GpmfStream<'a> {
    pub fn new(payload: &'a [u8]) -> Result<Self, GpmfError> {
        if payload.is_empty() {
            return Err(GpmfError::Empty);
        }
        let records = parse_klvs(payload, 0)?;
        if records.is_empty() {
            return Err(GpmfError::Empty);
        }
        Ok(Self { records })
    }

    pub fn records(&self) -> &[Klv<'a>] { &self.records }

    /// For every stream container, the first record tagged `tag` below it, decoded and
    /// scaled. Streams without the tag or with zero samples contribute nothing.
    pub fn find_samples(&self, tag: u32) -> Vec<SampleRecord> {
        let mut streams = Vec::new();
        collect_streams(&self.records, &mut streams);

        let mut out = Vec::new();
        for stream in streams {
            let Some((siblings, index)) = find_first(stream, tag) else { continue; };
            if siblings[index].repeat == 0 {
                continue;
            }
            match decode_record(siblings, index) {
                Some(record) => out.push(record),
                None => log::debug!("Could not decode {} samples", typ_to_str(tag)),
            }
        }
        out
    }

    /// Distinct data record keys in document order.
    pub fn tags(&self) -> Vec<String> {
        fn walk(records: &[Klv], out: &mut Vec<String>) {
            for klv in records {
                match &klv.value {
                    KlvValue::Nested(children) => walk(children, out),
                    KlvValue::Data(_) => {
                        let s = klv.fourcc_str();
                        if !out.contains(&s) { out.push(s); }
                    }
                    KlvValue::Opaque(_) => {}
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.records, &mut out);
        out
    }
}
