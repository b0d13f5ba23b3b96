// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright © 2022 Adrian <adrian.eddy at gmail>

use std::path::{ Path, PathBuf };

use chrono::{ DateTime, Utc };

use crate::creation_time::{ copy_file_times, lookup_or_now };
use crate::error::{ Error, Result };
use crate::gpmf::GpmfStream;
use crate::gpx::{ build_track, save_gpx_file, TrackPoint };
use crate::resample::normalize_to_1hz;
use crate::source::{ Mp4Source, PayloadSource };
use crate::timestamps::{ TimestampReconstructor, TimestampedSample };

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractOptions {
    pub primary_tag: String,
    pub fallback_tag: String,
    pub extensions: Vec<String>,
    pub activity_type: String,
    pub creator: String,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            primary_tag: "GPS9".into(),
            fallback_tag: "GPS5".into(),
            extensions: vec!["mp4".into(), "360".into()],
            activity_type: crate::gpx::DEFAULT_ACTIVITY.into(),
            creator: crate::gpx::DEFAULT_CREATOR.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FileReport {
    Written {
        output: PathBuf,
        tag: String,
        raw_points: usize,
        normalized_points: usize,
        track_points: usize,
        first: Option<TrackPoint>,
        last: Option<TrackPoint>,
    },
    NoTelemetry,
}

/// What `info` prints about one file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub payloads: usize,
    pub duration: f64,
    pub video: Option<(usize, u32, u32)>,
    pub creation_time: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
}

fn parse_tag(tag: &str) -> Result<u32> {
    if tag.len() != 4 || !tag.is_ascii() {
        return Err(Error::InvalidTag(tag.to_string()));
    }
    Ok(crate::fourcc(tag))
}

/// Decodes `tag` from every payload and timestamps the rows. Payloads that fail to
/// parse are skipped.
pub fn extract_samples<S: PayloadSource + ?Sized>(source: &mut S, tag: &str) -> Result<Vec<TimestampedSample>> {
    let key = parse_tag(tag)?;
    let mut reconstructor = TimestampReconstructor::new();
    for i in 0..source.payload_count()? {
        let (t_in, t_out) = source.payload_time(i)?;
        let data = source.payload(i)?;
        match GpmfStream::new(&data) {
            Ok(stream) => reconstructor.push_payload(t_in, t_out, &stream.find_samples(key)),
            Err(e) => log::warn!("Skipping payload {i} ({t_in:.3}s): {e}"),
        }
    }
    log::debug!("{} {tag} samples, {} payloads out of order", reconstructor.len(), reconstructor.out_of_order_payloads());
    Ok(reconstructor.finish())
}

fn log_sample(label: &str, s: &TimestampedSample) {
    if let [lat, lon, alt, speed, ..] = s.fields[..] {
        log::info!("    {label} lat={lat:.6}, lon={lon:.6}, alt={alt:.1}m, speed={speed:.2}m/s");
    }
}

/// Writes `<stem>.gpx` beside `path` from its GPS stream.
pub fn extract_file(path: &Path, options: &ExtractOptions) -> Result<FileReport> {
    let mut source = Mp4Source::new(path);
    let mut open = source.scoped()?;

    let mut tag = options.primary_tag.as_str();
    let mut samples = extract_samples(&mut *open, tag)?;
    if samples.is_empty() && !options.fallback_tag.is_empty() && options.fallback_tag != options.primary_tag {
        log::info!("  No {tag}, trying {}...", options.fallback_tag);
        tag = options.fallback_tag.as_str();
        samples = extract_samples(&mut *open, tag)?;
    }
    if samples.is_empty() {
        log::info!("  No GPS data found (no {} or {} streams)", options.primary_tag, options.fallback_tag);
        return Ok(FileReport::NoTelemetry);
    }

    let creation_time = lookup_or_now(path, open.creation_time()?);
    drop(open);
    log::info!("  Creation time: {}", creation_time.format("%Y-%m-%d %H:%M:%S"));

    let normalized = normalize_to_1hz(&samples);
    let name = path.file_stem().map(|x| x.to_string_lossy().into_owned()).unwrap_or_default();
    let mut track = build_track(&normalized, &name, creation_time);
    track.track_type = Some(options.activity_type.clone());
    track.creator = options.creator.clone();

    let output = path.with_extension("gpx");
    save_gpx_file(&output, &track)?;
    copy_file_times(path, &output);

    log::info!("    {} ({} raw points → {} normalized @ 1Hz)", output.display(), samples.len(), normalized.len());
    if let (Some(first), Some(last)) = (samples.first(), samples.last()) {
        log_sample("First:", first);
        log_sample("Last: ", last);
    }
    if track.points.is_empty() {
        log::warn!("  {tag} rows carry no usable positions, {} has no points", output.display());
    }

    Ok(FileReport::Written {
        output,
        tag: tag.to_string(),
        raw_points: samples.len(),
        normalized_points: normalized.len(),
        track_points: track.points.len(),
        first: track.points.first().cloned(),
        last: track.points.last().cloned(),
    })
}

/// Extracts every matching file of `dir` in name order. One file failing does not
/// stop the others.
pub fn extract_directory(dir: &Path, options: &ExtractOptions) -> Result<Vec<(PathBuf, Result<FileReport>)>> {
    let extensions: Vec<&str> = options.extensions.iter().map(String::as_str).collect();
    let files = crate::files_with_extensions(dir, &extensions)?;
    if files.is_empty() {
        log::info!("No .{} files found in {}", extensions.join(" or ."), dir.display());
    }

    Ok(files.into_iter().map(|path| {
        log::info!("Processing {}", path.display());
        let result = extract_file(&path, options);
        if let Err(e) = &result {
            log::error!("    Error: {e}");
        }
        (path, result)
    }).collect())
}

pub fn file_info(path: &Path) -> Result<FileInfo> {
    let mut source = Mp4Source::new(path);
    let mut open = source.scoped()?;
    let payloads = open.payload_count()?;
    let duration = if payloads > 0 { open.payload_time(payloads - 1)?.1 } else { 0.0 };

    let mut tags = Vec::new();
    for i in 0..payloads {
        let data = open.payload(i)?;
        if let Ok(stream) = GpmfStream::new(&data) {
            for t in stream.tags() {
                if !tags.contains(&t) { tags.push(t); }
            }
        }
    }

    Ok(FileInfo {
        payloads,
        duration,
        video: open.video_frame_rate_and_count()?,
        creation_time: open.creation_time()?,
        tags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::*;
    use crate::gpx::parse_gpx_file;
    use chrono::{ Duration, TimeZone };

    const JAN_2024: u32 = 3_786_912_000;

    fn rows(payload: usize, n: usize) -> Vec<[f64; 9]> {
        (0..n).map(|i| {
            let k = (payload * n + i) as f64;
            gps9_row(47.0 + k * 0.0001, 8.5 + k * 0.0001, 3.0)
        }).collect()
    }

    fn gps9_clip(dir: &Path, name: &str, payloads: usize) -> PathBuf {
        let data: Vec<Vec<u8>> = (0..payloads).map(|p| gps9_payload(&rows(p, 10))).collect();
        let path = dir.join(name);
        std::fs::write(&path, gpmf_mp4(&data, 1001, 90, JAN_2024)).unwrap();
        path
    }

    fn accl_payload() -> Vec<u8> {
        nest("DEVC", &[nest("STRM", &[
            klv("ACCL", b's', 6, 1, &[0, 1, 0, 2, 0, 3]),
        ])])
    }

    struct VecSource(Vec<(f64, f64, Vec<u8>)>);

    impl PayloadSource for VecSource {
        fn payload_count(&self) -> Result<usize> { Ok(self.0.len()) }
        fn payload_time(&self, index: usize) -> Result<(f64, f64)> { Ok((self.0[index].0, self.0[index].1)) }
        fn payload(&mut self, index: usize) -> Result<Vec<u8>> { Ok(self.0[index].2.clone()) }
    }

    #[test]
    fn test_extract_file_gps9() {
        let dir = scratch_dir("extract-gps9");
        let path = gps9_clip(&dir, "GX010001.MP4", 3);

        let report = extract_file(&path, &ExtractOptions::default()).unwrap();
        let FileReport::Written { output, tag, raw_points, normalized_points, track_points, first, last } = report else {
            panic!("expected a written track");
        };
        assert_eq!(output, dir.join("GX010001.gpx"));
        assert_eq!(tag, "GPS9");
        assert_eq!(raw_points, 30);
        assert_eq!(normalized_points, 4);
        assert_eq!(track_points, 4);

        let first = first.unwrap();
        assert!((first.lat - 47.0).abs() < 1e-7);
        assert!((first.lon - 8.5).abs() < 1e-7);
        assert_eq!(first.satellites, Some(8));
        assert_eq!(first.time, Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        assert_eq!(last.unwrap().time, Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 3).unwrap()));

        let track = parse_gpx_file(&output).unwrap();
        assert_eq!(track.points.len(), 4);
        assert_eq!(track.description.as_deref(), Some("GX010001"));
        assert_eq!(track.name.as_deref(), Some("GPS Logger 20240101-000000"));
        assert_eq!(track.track_type.as_deref(), Some("running"));
        for (i, p) in track.points.iter().enumerate() {
            assert_eq!(p.time, Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(i as i64)));
        }
    }

    #[test]
    fn test_options_flow_into_track() {
        let dir = scratch_dir("extract-options");
        let path = gps9_clip(&dir, "clip.mp4", 1);
        let options = ExtractOptions { activity_type: "cycling".into(), creator: "test".into(), ..Default::default() };
        extract_file(&path, &options).unwrap();

        let track = parse_gpx_file(dir.join("clip.gpx")).unwrap();
        assert_eq!(track.track_type.as_deref(), Some("cycling"));
        assert_eq!(track.creator, "test");
    }

    #[test]
    fn test_gps5_fallback_has_short_rows() {
        let dir = scratch_dir("extract-gps5");
        let path = dir.join("old.mp4");
        let payload = gps5_payload(&[[47.0, 8.5, 400.0, 1.0, 1.1], [47.1, 8.6, 401.0, 1.0, 1.1]]);
        std::fs::write(&path, gpmf_mp4(&[payload], 1001, 30, JAN_2024)).unwrap();

        match extract_file(&path, &ExtractOptions::default()).unwrap() {
            FileReport::Written { tag, raw_points, track_points, .. } => {
                assert_eq!(tag, "GPS5");
                assert_eq!(raw_points, 2);
                assert_eq!(track_points, 0);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(parse_gpx_file(dir.join("old.gpx")).unwrap().points.is_empty());
    }

    #[test]
    fn test_no_telemetry_writes_nothing() {
        let dir = scratch_dir("extract-none");
        let path = dir.join("accl.mp4");
        std::fs::write(&path, gpmf_mp4(&[accl_payload(), accl_payload()], 1001, 60, JAN_2024)).unwrap();

        assert_eq!(extract_file(&path, &ExtractOptions::default()).unwrap(), FileReport::NoTelemetry);
        assert!(!dir.join("accl.gpx").exists());
    }

    #[test]
    fn test_extract_samples_skips_bad_payloads() {
        let mut source = VecSource(vec![
            (0.0, 1.0, gps9_payload(&rows(0, 4))),
            (1.0, 2.0, vec![0xFF; 16]),
            (2.0, 3.0, Vec::new()),
            (3.0, 4.0, gps9_payload(&rows(1, 4))),
        ]);
        let samples = extract_samples(&mut source, "GPS9").unwrap();
        assert_eq!(samples.len(), 8);
        assert!((samples[1].time - samples[0].time - 0.25).abs() < 1e-9);
        assert!((samples[4].time - samples[0].time - 3.0).abs() < 1e-9);
        assert_eq!(samples[4].fields.len(), 9);

        assert!(extract_samples(&mut source, "GPS5").unwrap().is_empty());
    }

    #[test]
    fn test_invalid_tag() {
        let mut source = VecSource(Vec::new());
        assert!(matches!(extract_samples(&mut source, "GPS"), Err(Error::InvalidTag(_))));
        assert!(matches!(extract_samples(&mut source, "GPSÄ"), Err(Error::InvalidTag(_))));
        assert!(extract_samples(&mut source, "GPS9").unwrap().is_empty());
    }

    #[test]
    fn test_extract_directory() {
        let dir = scratch_dir("extract-dir");
        gps9_clip(&dir, "a.mp4", 2);
        std::fs::write(dir.join("b.360"), gpmf_mp4(&[accl_payload()], 1001, 30, JAN_2024)).unwrap();
        std::fs::write(dir.join("c.txt"), "ignored").unwrap();

        let results = extract_directory(&dir, &ExtractOptions::default()).unwrap();
        assert_eq!(results.len(), 2);
        assert!(matches!(results[0].1, Ok(FileReport::Written { raw_points: 20, .. })));
        assert!(matches!(results[1].1, Ok(FileReport::NoTelemetry)));
        assert!(dir.join("a.gpx").exists());
        assert!(!dir.join("b.gpx").exists());

        let merged = dir.join("out").join("merged.gpx");
        std::fs::copy(dir.join("a.gpx"), dir.join("z.gpx")).unwrap();
        match crate::stitch::merge_directory(&dir, &merged).unwrap() {
            crate::stitch::MergeOutcome::Merged { files, points, .. } => {
                assert_eq!(files, 2);
                assert_eq!(points, 6);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    /// Metadata track whose fixed-size `stsz` claims `u32::MAX` samples.
    fn oversized_sample_count_clip() -> Vec<u8> {
        let meta = container("trak", &[
            container("mdia", &[
                mdhd(1000, 1000),
                hdlr("meta", "GoPro MET"),
                container("minf", &[
                    container("stbl", &[
                        stsd("gpmd"),
                        stts(&[(u32::MAX, 1000)]),
                        stsz_fixed(4, u32::MAX),
                        stsc(&[(1, u32::MAX, 1)]),
                        stco(&[24]),
                    ]),
                ]),
            ]),
        ]);
        let moov = container("moov", &[mvhd(JAN_2024, 1000, 1000), meta]);
        [mp4_box("ftyp", b"mp41\0\0\0\0"), mp4_box("mdat", &[0u8; 64]), moov].concat()
    }

    #[test]
    fn test_broken_file_does_not_stop_batch() {
        let dir = scratch_dir("extract-oversized");
        std::fs::write(dir.join("a_bad.mp4"), oversized_sample_count_clip()).unwrap();
        gps9_clip(&dir, "b_good.mp4", 2);

        let results = extract_directory(&dir, &ExtractOptions::default()).unwrap();
        assert_eq!(results.len(), 2);
        assert!(!matches!(results[0].1, Ok(FileReport::Written { .. })));
        assert!(matches!(results[1].1, Ok(FileReport::Written { raw_points: 20, .. })));
        assert!(dir.join("b_good.gpx").exists());
        assert!(!dir.join("a_bad.gpx").exists());
    }

    #[test]
    fn test_file_info() {
        let dir = scratch_dir("extract-info");
        let path = dir.join("info.mp4");
        std::fs::write(&path, gpmf_mp4(&[gps9_payload(&rows(0, 2)), accl_payload()], 1001, 60, JAN_2024)).unwrap();

        let info = file_info(&path).unwrap();
        assert_eq!(info.payloads, 2);
        assert_eq!(info.duration, 2.002);
        assert_eq!(info.video, Some((60, 30000, 1001)));
        assert_eq!(info.creation_time, Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        assert!(info.tags.contains(&"GPS9".to_string()));
        assert!(info.tags.contains(&"ACCL".to_string()));
    }
}
