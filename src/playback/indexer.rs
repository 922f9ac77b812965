//! Enumeration of recorded footage straight off the on-disk layout.
//!
//! The directory tree is the only index: dates are partition directory
//! names, segment starts come from filenames. Consumers must tolerate a
//! partition disappearing mid-walk (retention deletes whole directories).

use chrono::NaiveDate;
use std::io;
use std::path::Path;

use crate::playback::timeline::SegmentEntry;
use crate::storage::layout;

/// Dates with at least a partition directory for the camera, ascending.
/// `NotFound` means the camera has no recordings tree at all.
pub fn list_dates(base: &Path, camera: &str) -> io::Result<Vec<String>> {
  let dir = layout::recordings_dir(base, camera);
  let entries = std::fs::read_dir(dir)?;

  let mut dates: Vec<String> = entries
    .flatten()
    .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
    .filter_map(|e| {
      let name = e.file_name().to_string_lossy().into_owned();
      layout::parse_partition_date(&name).map(|_| name)
    })
    .collect();

  dates.sort();
  Ok(dates)
}

/// All segments of one camera-day, sorted by start time. A missing
/// partition is an empty day, not an error.
pub fn read_day_segments(
  base: &Path,
  camera: &str,
  date: NaiveDate,
) -> io::Result<Vec<SegmentEntry>> {
  let dir = layout::partition_dir(base, camera, date);
  let entries = match std::fs::read_dir(dir) {
    Ok(entries) => entries,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
    Err(e) => return Err(e),
  };

  let mut segments = Vec::new();
  for entry in entries.flatten() {
    let filename = entry.file_name().to_string_lossy().into_owned();
    let Some(start) = layout::parse_segment_start(&filename) else {
      continue;
    };
    let Ok(meta) = entry.metadata() else {
      continue;
    };
    if !meta.is_file() {
      continue;
    }

    segments.push(SegmentEntry {
      filename,
      start,
      size_bytes: meta.len(),
    });
  }

  segments.sort_by_key(|s| s.start);
  Ok(segments)
}

pub fn camera_has_recordings(base: &Path, camera: &str) -> bool {
  layout::recordings_dir(base, camera).is_dir()
}

/// Static HLS manifest wrapping one archive segment, target duration equal
/// to the archive segment length.
pub fn single_segment_playlist(
  camera: &str,
  date: &str,
  filename: &str,
  archive_duration_secs: u32,
) -> String {
  format!(
    "#EXTM3U\n\
     #EXT-X-VERSION:3\n\
     #EXT-X-TARGETDURATION:{duration}\n\
     #EXT-X-MEDIA-SEQUENCE:0\n\
     #EXTINF:{duration}.0,\n\
     /recordings/{camera}/{date}/{filename}\n\
     #EXT-X-ENDLIST\n",
    duration = archive_duration_secs,
    camera = camera,
    date = date,
    filename = filename,
  )
}
