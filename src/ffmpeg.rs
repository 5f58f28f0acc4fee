// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command builders for the external media tools.
//!
//! Each builder returns an [Invocation] and has no side effects.

use std::path::{Path, PathBuf};

use chrono::{NaiveDateTime, TimeDelta, TimeZone};

use crate::schedule::{format_duration, ClipCut, Segment};
use crate::tool::{Invocation, Stage};

/// Square crop applied to the camera's portrait frame.
pub const CROP_FILTER: &str = "crop=1080:1080";

/// RTSP lower transport requested from ffmpeg.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Transport {
    /// ffmpeg's own default; no flag is passed.
    #[default]
    Udp,
    Tcp,
}

/// Overlay clock drawn in the bottom centre of each frame, ticking from
/// `basetime` (microseconds since the Unix epoch).
pub fn timestamp_filter(basetime: i64) -> String {
    format!(
        "drawtext=expansion=strftime:basetime={basetime}:\
         text='%Y/%m/%d %H\\:%M\\:%S':r=12:x=(w-tw)/2:y=h-(2*lh):\
         fontcolor=white:fontsize=42"
    )
}

/// The `-vf` expression for the modify stage: crop first, then timestamp.
/// `None` if there's nothing to do.
pub fn modify_filter(crop: bool, basetime: Option<i64>) -> Option<String> {
    let parts: Vec<String> = [
        crop.then(|| CROP_FILTER.to_owned()),
        basetime.map(timestamp_filter),
    ]
    .into_iter()
    .flatten()
    .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

/// Wall-clock go-time in `tz` as microseconds since the Unix epoch. `None`
/// if that local time doesn't exist (skipped by a DST change).
pub fn overlay_basetime<Tz: TimeZone>(go_time: NaiveDateTime, tz: &Tz) -> Option<i64> {
    tz.from_local_datetime(&go_time)
        .earliest()
        .map(|t| t.timestamp_micros())
}

/// Locations and verbosity of the external tools.
#[derive(Clone, Debug)]
pub struct Tools {
    pub ffmpeg: PathBuf,
    pub montage: PathBuf,
    pub ping: PathBuf,
    /// Passed to ffmpeg's `-loglevel`.
    pub loglevel: String,
}

impl Default for Tools {
    fn default() -> Self {
        Tools {
            ffmpeg: "ffmpeg".into(),
            montage: "montage".into(),
            ping: "ping".into(),
            loglevel: "quiet".to_owned(),
        }
    }
}

impl Tools {
    fn ffmpeg(&self, stage: Stage, stats: bool) -> Invocation {
        let inv = Invocation::new(stage, &self.ffmpeg)
            .args(["-y", "-loglevel", self.loglevel.as_str()]);
        if stats {
            inv.arg("-stats")
        } else {
            inv
        }
    }

    /// One liveness check.
    pub fn ping(&self, host: &str) -> Invocation {
        Invocation::new(Stage::Reachability, &self.ping)
            .args(["-c", "1", host])
            .quiet()
    }

    /// Records `url` for `length` into `out` without re-encoding.
    pub fn capture(
        &self,
        url: &url::Url,
        transport: Transport,
        length: TimeDelta,
        out: &Path,
    ) -> Invocation {
        let mut inv = self.ffmpeg(Stage::Capture, true);
        if transport == Transport::Tcp {
            inv = inv.args(["-rtsp_transport", "tcp"]);
        }
        inv.args(["-i", url.as_str(), "-t", format_duration(length).as_str()])
            .args(["-c:v", "copy", "-c:a", "copy"])
            .arg(out)
            .nominal(length.to_std().unwrap_or_default())
    }

    /// Re-encodes `input` through the video filter `filter`.
    pub fn filter(&self, filter: &str, input: &Path, out: &Path) -> Invocation {
        self.ffmpeg(Stage::Modify, true)
            .arg("-i")
            .arg(input)
            .args(["-vf", filter])
            .arg(out)
    }

    /// Cuts `cut` out of `input`, copying codecs.
    pub fn trim(&self, cut: &ClipCut, input: &Path, out: &Path) -> Invocation {
        self.ffmpeg(Stage::Clip(cut.segment), true)
            .args(["-ss", format_duration(cut.start).as_str()])
            .arg("-i")
            .arg(input)
            .args(["-t", format_duration(cut.duration).as_str()])
            .args(["-c:v", "copy", "-c:a", "copy"])
            .arg(out)
    }

    /// Scales presentation timestamps by `rate` and drops audio.
    pub fn retime(&self, segment: Segment, rate: f64, input: &Path, out: &Path) -> Invocation {
        self.ffmpeg(Stage::Timelapse(segment), true)
            .arg("-i")
            .arg(input)
            .args(["-vf", format!("setpts={rate}*PTS").as_str(), "-an"])
            .arg(out)
    }

    /// Joins the video streams of `inputs`, in order.
    pub fn concatenate(&self, inputs: &[&Path], out: &Path) -> Invocation {
        let mut inv = self.ffmpeg(Stage::Assembly, true);
        let mut graph = String::new();
        for (i, input) in inputs.iter().enumerate() {
            inv = inv.arg("-i").arg(*input);
            graph.push_str(&format!("[{i}:v] "));
        }
        graph.push_str(&format!("concat=n={}:v=1:a=0 [vv]", inputs.len()));
        inv.args(["-filter_complex", graph.as_str(), "-map", "[vv]"])
            .arg(out)
    }

    /// Writes the single frame at `offset` as a high-quality JPEG.
    pub fn extract_frame(
        &self,
        number: usize,
        offset: TimeDelta,
        input: &Path,
        out: &Path,
    ) -> Invocation {
        self.ffmpeg(Stage::Snapshot(number), false)
            .args(["-ss", format_duration(offset).as_str()])
            .arg("-i")
            .arg(input)
            .args(["-frames:v", "1", "-q:v", "2"])
            .arg(out)
    }

    /// Lays `images` out on a 5x5 grid without borders.
    pub fn tile(&self, images: &[PathBuf], out: &Path) -> Invocation {
        Invocation::new(Stage::Montage, &self.montage)
            .args(images)
            .args(["-tile", "5x5", "-geometry", "+0+0"])
            .arg(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    fn secs(s: i64) -> TimeDelta {
        TimeDelta::seconds(s)
    }

    #[test]
    fn capture_command() {
        let tools = Tools::default();
        let url: url::Url = "rtsp://seestar.local:4554/stream".parse().unwrap();
        let inv = tools.capture(&url, Transport::Udp, secs(10214), Path::new("full.mp4"));
        assert_eq!(
            inv.command_line(),
            "ffmpeg -y -loglevel quiet -stats -i rtsp://seestar.local:4554/stream \
             -t 02:50:14 -c:v copy -c:a copy full.mp4"
        );
        assert_eq!(inv.nominal, Some(std::time::Duration::from_secs(10214)));

        let inv = tools.capture(&url, Transport::Tcp, secs(60), Path::new("full.mp4"));
        assert_eq!(
            inv.command_line(),
            "ffmpeg -y -loglevel quiet -stats -rtsp_transport tcp \
             -i rtsp://seestar.local:4554/stream -t 00:01:00 -c:v copy -c:a copy full.mp4"
        );
    }

    #[test]
    fn trim_command() {
        let cut = ClipCut {
            segment: Segment::Totality,
            start: secs(4943),
            duration: secs(240),
        };
        let inv = Tools::default().trim(&cut, Path::new("full.mp4"), Path::new("totality.mp4"));
        assert_eq!(inv.stage, Stage::Clip(Segment::Totality));
        assert_eq!(
            inv.command_line(),
            "ffmpeg -y -loglevel quiet -stats -ss 01:22:23 -i full.mp4 -t 00:04:00 \
             -c:v copy -c:a copy totality.mp4"
        );
    }

    #[test]
    fn retime_and_concatenate() {
        let tools = Tools {
            loglevel: "error".to_owned(),
            ..Default::default()
        };
        let inv = tools.retime(Segment::PreTotality, 0.5, Path::new("p1.mp4"), Path::new("tl1.mp4"));
        assert_eq!(
            inv.command_line(),
            "ffmpeg -y -loglevel error -stats -i p1.mp4 -vf setpts=0.5*PTS -an tl1.mp4"
        );

        let inv = tools.concatenate(
            &[Path::new("tl1.mp4"), Path::new("totality.mp4"), Path::new("tl2.mp4")],
            Path::new("eclipse.mp4"),
        );
        let args: Vec<_> = inv.args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        let graph = args.iter().position(|a| a == "-filter_complex").unwrap() + 1;
        assert_eq!(args[graph], "[0:v] [1:v] [2:v] concat=n=3:v=1:a=0 [vv]");
        assert_eq!(args.last().unwrap(), "eclipse.mp4");
    }

    #[test]
    fn frame_and_tile() {
        let tools = Tools::default();
        let inv = tools.extract_frame(3, secs(1509), Path::new("full.mp4"), Path::new("s/snapshot-03.jpg"));
        assert_eq!(inv.stage, Stage::Snapshot(3));
        assert_eq!(
            inv.command_line(),
            "ffmpeg -y -loglevel quiet -ss 00:25:09 -i full.mp4 -frames:v 1 -q:v 2 s/snapshot-03.jpg"
        );

        let images = vec![PathBuf::from("a.jpg"), PathBuf::from("b.jpg")];
        let inv = tools.tile(&images, Path::new("eclipse.jpg"));
        assert_eq!(
            inv.command_line(),
            "montage a.jpg b.jpg -tile 5x5 -geometry +0+0 eclipse.jpg"
        );
    }

    #[test]
    fn filters() {
        assert_eq!(modify_filter(false, None), None);
        assert_eq!(modify_filter(true, None).as_deref(), Some("crop=1080:1080"));
        let both = modify_filter(true, Some(1_712_596_310_000_000)).unwrap();
        assert_eq!(
            both,
            "crop=1080:1080, drawtext=expansion=strftime:basetime=1712596310000000:\
             text='%Y/%m/%d %H\\:%M\\:%S':r=12:x=(w-tw)/2:y=h-(2*lh):fontcolor=white:fontsize=42"
        );
    }

    #[test]
    fn basetime_follows_time_zone() {
        let go: NaiveDateTime = "2024-04-08T12:11:50".parse().unwrap();
        assert_eq!(overlay_basetime(go, &Utc), Some(1_712_578_310_000_000));
        let cdt = FixedOffset::west_opt(5 * 3600).unwrap();
        assert_eq!(overlay_basetime(go, &cdt), Some(1_712_596_310_000_000));
    }
}
