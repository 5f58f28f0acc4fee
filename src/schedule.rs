// SPDX-License-Identifier: MIT OR Apache-2.0

//! Eclipse timeline and the capture plan derived from it.
//!
//! Contact times are stored as the historical instants they were predicted
//! for. Only their time of day matters when waiting; every offset into the
//! recording is computed relative to first contact, so the calendar date
//! never leaks into a cut position.

use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};

/// Number of tiles in the 5x5 snapshot montage.
pub const MONTAGE_CAPACITY: usize = 25;

/// Playback length of each partial-phase timelapse, in seconds.
pub const TIMELAPSE_SECS: f64 = 60.0;

/// The 2024-04-08 timeline compiled into the binary.
const BUILTIN: &str = include_str!("../schedules/2024-04-08.json");

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("unable to read schedule {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed schedule")]
    Parse(#[from] serde_json::Error),
    #[error("contacts out of order: {0}")]
    ContactOrder(&'static str),
    #[error("trailing margin of {trailing}s leaves under a second of {phase} partial phase")]
    TrailingTooLong { trailing: u32, phase: &'static str },
    #[error("schedule has no snapshot moments")]
    NoSnapshots,
    #[error("{count} snapshot moments do not fit a {}-tile montage", MONTAGE_CAPACITY)]
    TooManySnapshots { count: usize },
    #[error("snapshot {label:?} is not after the previous one")]
    SnapshotOrder { label: String },
    #[error("snapshot {label:?} lies outside first to fourth contact")]
    SnapshotOutside { label: String },
}

/// The four contact instants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contacts {
    pub c1: NaiveDateTime,
    pub c2: NaiveDateTime,
    pub c3: NaiveDateTime,
    pub c4: NaiveDateTime,
}

/// A named instant at which a still frame is pulled for the montage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMoment {
    pub label: String,
    pub at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(default)]
    pub name: String,
    pub contacts: Contacts,

    /// Pre-roll recorded before first contact (and after fourth contact).
    pub margin_secs: u32,

    /// Trimmed from each partial phase next to totality; totality gains it
    /// on both sides.
    pub trailing_secs: u32,

    pub snapshots: Vec<SnapshotMoment>,
}

impl Schedule {
    /// The embedded 2024-04-08 timeline.
    pub fn builtin() -> Result<Self, ScheduleError> {
        Self::parse(BUILTIN)
    }

    pub fn load(path: &Path) -> Result<Self, ScheduleError> {
        let json = std::fs::read_to_string(path).map_err(|source| ScheduleError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::parse(&json)
    }

    pub fn parse(json: &str) -> Result<Self, ScheduleError> {
        let schedule: Schedule = serde_json::from_str(json)?;
        schedule.validate()?;
        Ok(schedule)
    }

    pub fn margin(&self) -> TimeDelta {
        TimeDelta::seconds(i64::from(self.margin_secs))
    }

    pub fn trailing(&self) -> TimeDelta {
        TimeDelta::seconds(i64::from(self.trailing_secs))
    }

    pub fn validate(&self) -> Result<(), ScheduleError> {
        let c = &self.contacts;
        if c.c2 <= c.c1 {
            return Err(ScheduleError::ContactOrder("second contact must follow first"));
        }
        if c.c3 <= c.c2 {
            return Err(ScheduleError::ContactOrder("third contact must follow second"));
        }
        if c.c4 <= c.c3 {
            return Err(ScheduleError::ContactOrder("fourth contact must follow third"));
        }
        let trailing = self.trailing();
        let shortest = TimeDelta::seconds(1);
        if c.c2 - c.c1 - trailing < shortest {
            return Err(ScheduleError::TrailingTooLong {
                trailing: self.trailing_secs,
                phase: "pre-totality",
            });
        }
        if c.c4 - c.c3 - trailing < shortest {
            return Err(ScheduleError::TrailingTooLong {
                trailing: self.trailing_secs,
                phase: "post-totality",
            });
        }

        if self.snapshots.is_empty() {
            return Err(ScheduleError::NoSnapshots);
        }
        if self.snapshots.len() > MONTAGE_CAPACITY {
            return Err(ScheduleError::TooManySnapshots {
                count: self.snapshots.len(),
            });
        }
        let mut prev: Option<NaiveDateTime> = None;
        for s in &self.snapshots {
            if s.at < c.c1 || s.at > c.c4 {
                return Err(ScheduleError::SnapshotOutside {
                    label: s.label.clone(),
                });
            }
            if prev.is_some_and(|p| s.at <= p) {
                return Err(ScheduleError::SnapshotOrder {
                    label: s.label.clone(),
                });
            }
            prev = Some(s.at);
        }
        Ok(())
    }

    /// Instant recording should begin on `today`: first contact's time of
    /// day, minus the pre-roll margin.
    pub fn go_time(&self, today: NaiveDate) -> NaiveDateTime {
        today.and_time(self.contacts.c1.time()) - self.margin()
    }

    /// Offset of each snapshot moment from the start of the recording.
    pub fn snapshot_offsets(&self) -> Vec<(&SnapshotMoment, TimeDelta)> {
        self.snapshots
            .iter()
            .map(|s| (s, s.at - self.contacts.c1 + self.margin()))
            .collect()
    }
}

/// One of the three pieces the recording is cut into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Segment {
    PreTotality,
    Totality,
    PostTotality,
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Segment::PreTotality => "pre-totality",
            Segment::Totality => "totality",
            Segment::PostTotality => "post-totality",
        })
    }
}

/// Durations derived once from a [Schedule].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub margin: TimeDelta,
    pub trailing: TimeDelta,
    /// First to fourth contact.
    pub total: TimeDelta,
    pub pre: TimeDelta,
    pub totality: TimeDelta,
    pub post: TimeDelta,
}

/// Where a segment sits within the (possibly modified) recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipCut {
    pub segment: Segment,
    pub start: TimeDelta,
    pub duration: TimeDelta,
}

impl Timing {
    pub fn new(schedule: &Schedule) -> Self {
        let c = &schedule.contacts;
        let trailing = schedule.trailing();
        Timing {
            margin: schedule.margin(),
            trailing,
            total: c.c4 - c.c1,
            pre: c.c2 - c.c1 - trailing,
            totality: c.c3 - c.c2 + trailing * 2,
            post: c.c4 - c.c3 - trailing,
        }
    }

    /// Length to record: pre-roll, the whole eclipse, and the same again.
    pub fn capture_length(&self) -> TimeDelta {
        self.margin + self.total + self.margin
    }

    pub fn duration(&self, segment: Segment) -> TimeDelta {
        match segment {
            Segment::PreTotality => self.pre,
            Segment::Totality => self.totality,
            Segment::PostTotality => self.post,
        }
    }

    /// The three cuts, contiguous and in recording order.
    pub fn clips(&self) -> [ClipCut; 3] {
        let pre_start = self.margin;
        let totality_start = pre_start + self.pre;
        let post_start = totality_start + self.totality;
        [
            ClipCut {
                segment: Segment::PreTotality,
                start: pre_start,
                duration: self.pre,
            },
            ClipCut {
                segment: Segment::Totality,
                start: totality_start,
                duration: self.totality,
            },
            ClipCut {
                segment: Segment::PostTotality,
                start: post_start,
                duration: self.post,
            },
        ]
    }
}

/// Which duration a timelapse's playback rate is computed from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RatePolicy {
    /// Both timelapses use the pre-totality duration.
    #[default]
    Shared,
    /// Each timelapse uses the duration of its own clip.
    PerClip,
}

/// Everything about a run that follows from the schedule and the run date.
#[derive(Debug, Clone)]
pub struct Plan {
    pub schedule: Schedule,
    pub timing: Timing,
    pub go_time: NaiveDateTime,
    pub rate_policy: RatePolicy,
}

impl Plan {
    /// `today` is read once by the caller; the go-time is never rebased again.
    pub fn new(schedule: Schedule, today: NaiveDate, rate_policy: RatePolicy) -> Self {
        let timing = Timing::new(&schedule);
        let go_time = schedule.go_time(today);
        Plan {
            schedule,
            timing,
            go_time,
            rate_policy,
        }
    }

    /// Multiplier applied to presentation timestamps so `segment` plays back
    /// in [TIMELAPSE_SECS].
    pub fn timelapse_rate(&self, segment: Segment) -> f64 {
        let basis = match self.rate_policy {
            RatePolicy::Shared => self.timing.pre,
            RatePolicy::PerClip => self.timing.duration(segment),
        };
        TIMELAPSE_SECS / (basis.num_milliseconds() as f64 / 1000.0)
    }

    pub fn report(&self) -> serde_json::Value {
        let clips: Vec<_> = self
            .timing
            .clips()
            .iter()
            .map(|c| {
                serde_json::json!({
                    "segment": c.segment,
                    "start": format_duration(c.start),
                    "duration": format_duration(c.duration),
                })
            })
            .collect();
        let snapshots: Vec<_> = self
            .schedule
            .snapshot_offsets()
            .into_iter()
            .map(|(s, offset)| {
                serde_json::json!({
                    "label": s.label,
                    "offset": format_duration(offset),
                })
            })
            .collect();
        serde_json::json!({
            "schedule": self.schedule.name,
            "go_time": self.go_time,
            "margin": format_duration(self.timing.margin),
            "trailing_margin": format_duration(self.timing.trailing),
            "capture_length": format_duration(self.timing.capture_length()),
            "clips": clips,
            "rate_policy": self.rate_policy,
            "timelapse_rates": {
                "pre-totality": self.timelapse_rate(Segment::PreTotality),
                "post-totality": self.timelapse_rate(Segment::PostTotality),
            },
            "snapshots": snapshots,
        })
    }
}

/// Formats a duration the way ffmpeg's `-ss`/`-t` accept it.
pub fn format_duration(d: TimeDelta) -> String {
    let sign = if d < TimeDelta::zero() { "-" } else { "" };
    let d = d.abs();
    let secs = d.num_seconds();
    let millis = d.subsec_nanos() / 1_000_000;
    let hms = format!(
        "{sign}{:02}:{:02}:{:02}",
        secs / 3600,
        secs / 60 % 60,
        secs % 60
    );
    if millis == 0 {
        hms
    } else {
        format!("{hms}.{millis:03}")
    }
}
