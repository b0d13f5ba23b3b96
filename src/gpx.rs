// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright © 2022 Adrian <adrian.eddy at gmail>

use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{ DateTime, Duration, NaiveDateTime, SecondsFormat, Utc };
use quick_xml::events::{ BytesDecl, BytesEnd, BytesStart, BytesText, Event };
use quick_xml::{ Reader, Writer };

use crate::error::Result;
use crate::resample::NormalizedPoint;

pub const GPX_NAMESPACE: &str = "http://www.topografix.com/GPX/1/1";
pub const DEFAULT_CREATOR: &str = "gpmf-gpx";
pub const DEFAULT_ACTIVITY: &str = "running";

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const NAME_TIME_FORMAT: &str = "%Y%m%d-%H%M%S";

#[derive(Debug, Clone, PartialEq)]
pub struct TrackPoint {
    pub lat: f64,
    pub lon: f64,
    pub elevation: Option<f64>,
    pub time: Option<DateTime<Utc>>,
    pub speed_2d: Option<f64>,
    pub speed_3d: Option<f64>,
    pub dop: Option<f64>,
    pub fix: Option<i32>,
    pub satellites: Option<u32>,
}

impl TrackPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon, elevation: None, time: None, speed_2d: None, speed_3d: None, dop: None, fix: None, satellites: None }
    }

    pub fn has_valid_position(&self) -> bool {
        self.lat.abs() <= 90.0 && self.lon.abs() <= 180.0
    }

    /// Builds a point from a GPS9 row: lat, lon, alt, speed 2D, speed 3D, days,
    /// seconds, DOP, fix. Short rows and out-of-range coordinates give `None`.
    pub fn from_gps_fields(fields: &[f64], time: DateTime<Utc>) -> Option<Self> {
        if fields.len() < 9 {
            return None;
        }
        let fix = fields[8] as i32;
        let point = Self {
            lat: fields[0],
            lon: fields[1],
            elevation: Some(fields[2]),
            time: Some(time),
            speed_2d: Some(fields[3]),
            speed_3d: Some(fields[4]),
            dop: Some(fields[7]),
            fix: Some(fix),
            satellites: Some(if fix == 3 { 8 } else { 4 }),
        };
        point.has_valid_position().then_some(point)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub creator: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub time: Option<DateTime<Utc>>,
    pub track_name: Option<String>,
    pub track_type: Option<String>,
    pub points: Vec<TrackPoint>,
}

impl Default for Track {
    fn default() -> Self {
        Self {
            creator: DEFAULT_CREATOR.to_string(),
            name: None,
            description: None,
            time: None,
            track_name: None,
            track_type: None,
            points: Vec::new(),
        }
    }
}

impl Track {
    pub fn first_time(&self) -> Option<DateTime<Utc>> {
        self.points.iter().find_map(|p| p.time)
    }

    pub fn last_time(&self) -> Option<DateTime<Utc>> {
        self.points.iter().rev().find_map(|p| p.time)
    }
}

/// Turns 1 Hz points into a track anchored at `creation_time`.
pub fn build_track(points: &[NormalizedPoint], name: &str, creation_time: DateTime<Utc>) -> Track {
    let stamp = creation_time.format(NAME_TIME_FORMAT);
    let mut dropped = 0;
    let track_points = points.iter().filter_map(|p| {
        let time = creation_time + Duration::seconds(p.offset_s as i64);
        let point = TrackPoint::from_gps_fields(&p.fields, time);
        if point.is_none() { dropped += 1; }
        point
    }).collect::<Vec<_>>();
    if dropped > 0 {
        log::debug!("Dropped {dropped} points without a valid position");
    }

    Track {
        creator: DEFAULT_CREATOR.to_string(),
        name: Some(format!("GPS Logger {stamp}")),
        description: Some(name.to_string()),
        time: Some(creation_time),
        track_name: Some(format!("Track {stamp}")),
        track_type: Some(DEFAULT_ACTIVITY.to_string()),
        points: track_points,
    }
}

fn text_element<W: Write>(w: &mut Writer<W>, name: &str, text: &str) -> Result<()> {
    w.write_event(Event::Start(BytesStart::new(name)))?;
    w.write_event(Event::Text(BytesText::new(text)))?;
    w.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn format_point_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub fn write_gpx<W: Write>(track: &Track, writer: W) -> Result<()> {
    let mut w = Writer::new_with_indent(writer, b' ', 2);
    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    let mut gpx = BytesStart::new("gpx");
    gpx.push_attribute(("version", "1.1"));
    gpx.push_attribute(("creator", track.creator.as_str()));
    gpx.push_attribute(("xmlns", GPX_NAMESPACE));
    w.write_event(Event::Start(gpx))?;

    if track.name.is_some() || track.description.is_some() || track.time.is_some() {
        w.write_event(Event::Start(BytesStart::new("metadata")))?;
        if let Some(name) = &track.name { text_element(&mut w, "name", name)?; }
        if let Some(desc) = &track.description { text_element(&mut w, "desc", desc)?; }
        if let Some(time) = &track.time { text_element(&mut w, "time", &time.format(TIME_FORMAT).to_string())?; }
        w.write_event(Event::End(BytesEnd::new("metadata")))?;
    }

    w.write_event(Event::Start(BytesStart::new("trk")))?;
    if let Some(name) = &track.track_name { text_element(&mut w, "name", name)?; }
    if let Some(typ) = &track.track_type { text_element(&mut w, "type", typ)?; }
    w.write_event(Event::Start(BytesStart::new("trkseg")))?;

    for p in &track.points {
        let mut trkpt = BytesStart::new("trkpt");
        trkpt.push_attribute(("lat", format!("{:.7}", p.lat).as_str()));
        trkpt.push_attribute(("lon", format!("{:.7}", p.lon).as_str()));
        w.write_event(Event::Start(trkpt))?;
        if let Some(ele) = p.elevation { text_element(&mut w, "ele", &format!("{ele:.3}"))?; }
        if let Some(time) = &p.time { text_element(&mut w, "time", &format_point_time(time))?; }
        if let Some(speed) = p.speed_2d { text_element(&mut w, "speed", &format!("{speed:.3}"))?; }
        if let Some(sat) = p.satellites { text_element(&mut w, "sat", &sat.to_string())?; }
        w.write_event(Event::End(BytesEnd::new("trkpt")))?;
    }

    w.write_event(Event::End(BytesEnd::new("trkseg")))?;
    w.write_event(Event::End(BytesEnd::new("trk")))?;
    w.write_event(Event::End(BytesEnd::new("gpx")))?;
    w.into_inner().write_all(b"\n")?;
    Ok(())
}

pub fn save_gpx_file<P: AsRef<Path>>(path: P, track: &Track) -> Result<()> {
    let mut data = Vec::new();
    write_gpx(track, &mut data)?;
    fs::write(path, data)?;
    Ok(())
}

pub fn parse_time(txt: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(txt) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(txt.trim_end_matches('Z'), "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|dt| dt.and_utc())
}

fn parse_number<T: std::str::FromStr>(value: &[u8]) -> Option<T> {
    std::str::from_utf8(value).ok().and_then(|x| x.trim().parse::<T>().ok())
}

fn point_from_attributes(e: &BytesStart) -> Option<TrackPoint> {
    let mut lat = None;
    let mut lon = None;
    for a in e.attributes().flatten() {
        match a.key.local_name().as_ref() {
            b"lat" => lat = parse_number::<f64>(&a.value),
            b"lon" => lon = parse_number::<f64>(&a.value),
            _ => {}
        }
    }
    Some(TrackPoint::new(lat?, lon?))
}

/// Reads every `trkpt` of every segment and track, in document order, plus the
/// metadata block and the first track's name and type.
pub fn parse_gpx_from_str(s: &str) -> Result<Track> {
    let mut reader = Reader::from_str(s);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut track = Track::default();
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut point: Option<TrackPoint> = None;
    let mut skipped = 0;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(e) => {
                let name = e.local_name().as_ref().to_vec();
                if name == b"gpx" {
                    for a in e.attributes().flatten() {
                        if a.key.local_name().as_ref() == b"creator" {
                            track.creator = String::from_utf8_lossy(&a.value).into_owned();
                        }
                    }
                } else if name == b"trkpt" {
                    point = point_from_attributes(&e);
                    if point.is_none() { skipped += 1; }
                }
                path.push(name);
            }
            Event::Empty(e) => {
                if e.local_name().as_ref() == b"trkpt" {
                    match point_from_attributes(&e) {
                        Some(p) => track.points.push(p),
                        None => skipped += 1,
                    }
                }
            }
            Event::Text(t) => {
                let text = t.unescape().map(|x| x.into_owned()).unwrap_or_default();
                let n = path.len();
                let current = path.last().map(|x| x.as_slice()).unwrap_or_default();
                let parent = if n >= 2 { path[n - 2].as_slice() } else { &[] };
                match (parent, current) {
                    (b"trkpt", b"ele") => if let Some(p) = point.as_mut() { p.elevation = parse_number(text.as_bytes()); },
                    (b"trkpt", b"time") => if let Some(p) = point.as_mut() { p.time = parse_time(&text); },
                    (b"trkpt", b"speed") => if let Some(p) = point.as_mut() { p.speed_2d = parse_number(text.as_bytes()); },
                    (b"trkpt", b"sat") => if let Some(p) = point.as_mut() { p.satellites = parse_number(text.as_bytes()); },
                    (b"trkpt", b"pdop") => if let Some(p) = point.as_mut() { p.dop = parse_number(text.as_bytes()); },
                    (b"metadata", b"name") | (b"gpx", b"name") => track.name = Some(text),
                    (b"metadata", b"desc") | (b"gpx", b"desc") => track.description = Some(text),
                    (b"metadata", b"time") | (b"gpx", b"time") => track.time = parse_time(&text),
                    (b"trk", b"name") if track.track_name.is_none() => track.track_name = Some(text),
                    (b"trk", b"type") if track.track_type.is_none() => track.track_type = Some(text),
                    _ => {}
                }
            }
            Event::End(e) => {
                if e.local_name().as_ref() == b"trkpt" {
                    if let Some(p) = point.take() {
                        track.points.push(p);
                    }
                }
                path.pop();
            }
            _ => {}
        }
        buf.clear();
    }
    if skipped > 0 {
        log::warn!("Skipped {skipped} track points without a position");
    }

    Ok(track)
}

pub fn parse_gpx_file<P: AsRef<Path>>(path: P) -> Result<Track> {
    let s = fs::read_to_string(path)?;
    parse_gpx_from_str(&s)
}
