//! Timeline and gap analysis for one camera-day.
//!
//! Pure computation over the parsed segment listing: output depends only on
//! the segment starts, their sizes and the configured archive duration.

use chrono::NaiveTime;

/// Minutes in a day; the denominator for coverage.
pub const DAY_MINUTES: i64 = 1440;
/// Gaps at or under this many seconds are boundary jitter, not gaps.
const GAP_THRESHOLD_SECS: i64 = 120;

/// One `.ts` file found in a date partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentEntry {
  pub filename: String,
  pub start: NaiveTime,
  pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineSegment {
  pub filename: String,
  pub start: NaiveTime,
  /// Start plus archive duration, clamped to 23:59:59 at the day boundary.
  pub end: NaiveTime,
  pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineGap {
  pub start: NaiveTime,
  pub end: NaiveTime,
  pub duration_mins: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
  pub segments: Vec<TimelineSegment>,
  pub gaps: Vec<TimelineGap>,
  pub recorded_minutes: i64,
  pub coverage_percent: f64,
  pub recorded_hours: f64,
}

fn day_start() -> NaiveTime {
  NaiveTime::from_hms_opt(0, 0, 0).expect("valid time")
}

fn day_end() -> NaiveTime {
  NaiveTime::from_hms_opt(23, 59, 59).expect("valid time")
}

fn clamp_end(start: NaiveTime, archive_duration_secs: u32) -> NaiveTime {
  let (end, wrapped_days) =
    start.overflowing_add_signed(chrono::Duration::seconds(archive_duration_secs as i64));
  if wrapped_days != 0 {
    day_end()
  } else {
    end
  }
}

fn gap_between(start: NaiveTime, end: NaiveTime) -> Option<TimelineGap> {
  let seconds = (end - start).num_seconds();
  if seconds <= GAP_THRESHOLD_SECS {
    return None;
  }
  Some(TimelineGap {
    start,
    end,
    duration_mins: (seconds as f64 / 60.0).round() as i64,
  })
}

/// Order segments by start, derive each end, and report every gap longer
/// than two minutes: before the first segment, between consecutive
/// segments, and after the last one. A day without segments is one
/// 1440-minute gap.
pub fn build_timeline(mut entries: Vec<SegmentEntry>, archive_duration_secs: u32) -> Timeline {
  entries.sort_by_key(|e| e.start);

  let segments: Vec<TimelineSegment> = entries
    .into_iter()
    .map(|e| TimelineSegment {
      end: clamp_end(e.start, archive_duration_secs),
      filename: e.filename,
      start: e.start,
      size_bytes: e.size_bytes,
    })
    .collect();

  let mut gaps = Vec::new();
  if segments.is_empty() {
    gaps.push(TimelineGap {
      start: day_start(),
      end: day_end(),
      duration_mins: DAY_MINUTES,
    });
  } else {
    if let Some(gap) = gap_between(day_start(), segments[0].start) {
      gaps.push(gap);
    }

    for pair in segments.windows(2) {
      if let Some(gap) = gap_between(pair[0].end, pair[1].start) {
        gaps.push(gap);
      }
    }

    if let Some(gap) = gap_between(segments[segments.len() - 1].end, day_end()) {
      gaps.push(gap);
    }
  }

  let total_gap_minutes: i64 = gaps.iter().map(|g| g.duration_mins).sum();
  let recorded_minutes = (DAY_MINUTES - total_gap_minutes).max(0);

  Timeline {
    segments,
    gaps,
    recorded_minutes,
    coverage_percent: recorded_minutes as f64 / DAY_MINUTES as f64 * 100.0,
    recorded_hours: recorded_minutes as f64 / 60.0,
  }
}
