//! On-disk layout of recordings.
//!
//! Archive segments live at `<base>/<camera>/recordings/<YYYY-MM-DD>/<HH-MM-SS>.ts`
//! and the live HLS workspace at `<base>/<camera>/live/`. The date directory
//! a segment lands in always equals the date component of its start time;
//! everything else in the system (retention, recovery, playback) derives its
//! view of the world from this layout alone.

use chrono::{NaiveDate, NaiveTime};
use std::path::{Path, PathBuf};

pub const SEGMENT_EXT: &str = "ts";
pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H-%M-%S";

/// `<base>/<camera>/recordings`
pub fn recordings_dir(base: &Path, camera: &str) -> PathBuf {
  base.join(camera).join("recordings")
}

/// `<base>/<camera>/recordings/<YYYY-MM-DD>`
pub fn partition_dir(base: &Path, camera: &str, date: NaiveDate) -> PathBuf {
  recordings_dir(base, camera).join(date.format(DATE_FORMAT).to_string())
}

/// strftime template handed to the transcoder. The supervisor must create
/// the date directory up front; ffmpeg expands the placeholders but will
/// not create missing directories.
pub fn archive_output_template(base: &Path, camera: &str) -> PathBuf {
  recordings_dir(base, camera).join("%Y-%m-%d").join("%H-%M-%S.ts")
}

/// `<base>/<camera>/live`
pub fn live_dir(base: &Path, camera: &str) -> PathBuf {
  base.join(camera).join("live")
}

pub fn live_playlist_path(base: &Path, camera: &str) -> PathBuf {
  live_dir(base, camera).join("stream.m3u8")
}

/// Rolling short-segment filenames, `segment000.ts` onward.
pub fn live_segment_template(base: &Path, camera: &str) -> PathBuf {
  live_dir(base, camera).join("segment%03d.ts")
}

/// Parse a directory name as a date partition (`YYYY-MM-DD`).
pub fn parse_partition_date(name: &str) -> Option<NaiveDate> {
  if name.len() != 10 {
    return None;
  }
  NaiveDate::parse_from_str(name, DATE_FORMAT).ok()
}

/// Parse the wall-clock start out of a segment filename (`HH-MM-SS.ts`).
pub fn parse_segment_start(filename: &str) -> Option<NaiveTime> {
  let stem = filename.strip_suffix(".ts")?;
  NaiveTime::parse_from_str(stem, TIME_FORMAT).ok()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn archive_paths_are_date_partitioned() {
    let base = Path::new("/rec");
    let date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();

    assert_eq!(
      partition_dir(base, "cam1", date),
      PathBuf::from("/rec/cam1/recordings/2025-01-01")
    );
    assert_eq!(
      archive_output_template(base, "cam1"),
      PathBuf::from("/rec/cam1/recordings/%Y-%m-%d/%H-%M-%S.ts")
    );
  }

  #[test]
  fn live_paths_share_the_camera_namespace() {
    let base = Path::new("/rec");
    assert_eq!(
      live_playlist_path(base, "cam1"),
      PathBuf::from("/rec/cam1/live/stream.m3u8")
    );
    assert_eq!(
      live_segment_template(base, "cam1"),
      PathBuf::from("/rec/cam1/live/segment%03d.ts")
    );
  }

  #[test]
  fn partition_names_round_trip() {
    let date = parse_partition_date("2025-02-28").unwrap();
    assert_eq!(date, NaiveDate::from_ymd_opt(2025, 2, 28).unwrap());

    assert!(parse_partition_date("2025-2-28").is_none());
    assert!(parse_partition_date("notadate12").is_none());
    assert!(parse_partition_date("2025-13-01").is_none());
  }

  #[test]
  fn segment_filenames_carry_their_start_time() {
    let start = parse_segment_start("10-30-00.ts").unwrap();
    assert_eq!(start, NaiveTime::from_hms_opt(10, 30, 0).unwrap());

    assert!(parse_segment_start("10-30-00.mp4").is_none());
    assert!(parse_segment_start("25-00-00.ts").is_none());
    assert!(parse_segment_start("stream.m3u8").is_none());
  }
}
