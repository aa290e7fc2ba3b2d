//! MPD parsing.
//!
//! # Responsibilities
//! - Read the presentation type and timing attributes of an MPD
//! - Flatten one period into profiles (one per `Representation`)
//! - Expand each profile's segment addressing into absolute segment URLs
//!
//! # Design Decisions
//! - A static MPD uses its first period, a dynamic one its last
//! - `BaseURL` elements resolve hierarchically against the MPD's own URL
//! - Segment addressing supported: `SegmentTemplate` (with or without a
//!   `SegmentTimeline`), `SegmentList`, and a bare `BaseURL` as one segment
//! - A live template without a timeline exposes the segments available
//!   inside the time shift window at `now`

use chrono::{DateTime, Utc};
use roxmltree::{Document, Node};
use url::Url;

use crate::dash::template::{self, TemplateVars};

/// Upper bound on segments per profile, whatever the MPD claims.
pub const MAX_SEGMENTS: usize = 100_000;

/// Live window used when the MPD has no `timeShiftBufferDepth`.
const DEFAULT_TIME_SHIFT_SECS: f64 = 60.0;

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("malformed XML: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("root element is <{0}>, expected <MPD>")]
    NotMpd(String),

    #[error("MPD has no <Period>")]
    NoPeriod,

    #[error("invalid {attribute} {value:?}")]
    Attribute { attribute: &'static str, value: String },

    #[error("representation {0}: segment count needs a period duration or availabilityStartTime")]
    UnknownDuration(String),

    #[error("representation {0}: more segments than the proxy serves")]
    TooManySegments(String),
}

/// A parsed presentation.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    /// `type="dynamic"`.
    pub is_live: bool,
    pub profiles: Vec<Profile>,
}

impl Manifest {
    pub fn profile(&self, id: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.id == id)
    }
}

/// One `Representation`, with inherited `AdaptationSet` attributes applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub id: String,
    pub mime_type: String,
    pub codecs: Option<String>,
    pub bandwidth: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<f64>,
    pub lang: Option<String>,
    pub init_url: Option<String>,
    /// `startNumber` of the segment template, when declared.
    pub start_number: Option<u64>,
    pub segments: Vec<Segment>,
}

impl Profile {
    pub fn is_video(&self) -> bool {
        self.mime_type.contains("video")
    }

    pub fn is_audio(&self) -> bool {
        self.mime_type.contains("audio")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub media: String,
    /// Seconds.
    pub duration: f64,
    pub number: Option<u64>,
    /// Presentation time, in timescale units.
    pub time: Option<u64>,
    /// Duration in timescale units.
    pub scaled_duration: Option<u64>,
}

/// Parse `xml`, fetched from `mpd_url`, as seen at `now`.
pub fn parse(xml: &str, mpd_url: &Url, now: DateTime<Utc>) -> Result<Manifest, ManifestError> {
    let doc = Document::parse(xml)?;
    let root = doc.root_element();
    if root.tag_name().name() != "MPD" {
        return Err(ManifestError::NotMpd(root.tag_name().name().to_string()));
    }

    let is_live = root.attribute("type") == Some("dynamic");
    let presentation = duration_attr(root, "mediaPresentationDuration")?;
    let time_shift = duration_attr(root, "timeShiftBufferDepth")?.unwrap_or(DEFAULT_TIME_SHIFT_SECS);
    let availability_start = match root.attribute("availabilityStartTime") {
        Some(raw) => Some(
            DateTime::parse_from_rfc3339(raw.trim())
                .map(|t| t.with_timezone(&Utc))
                .map_err(|_| invalid("availabilityStartTime", raw))?,
        ),
        None => None,
    };

    let mut periods = elements(root, "Period");
    let period = if is_live { periods.last() } else { periods.next() }.ok_or(ManifestError::NoPeriod)?;
    let period_start = duration_attr(period, "start")?.unwrap_or(0.0);

    // Seconds of media available from the period start.
    let available = if is_live {
        availability_start.map(|ast| {
            let elapsed = (now - ast).num_milliseconds() as f64 / 1000.0;
            elapsed - period_start
        })
    } else {
        match duration_attr(period, "duration")? {
            Some(duration) => Some(duration),
            None => presentation.map(|total| total - period_start),
        }
    };
    let timing = Timing {
        is_live,
        available,
        time_shift,
    };

    let base = base_url(mpd_url, root)?;
    let base = base_url(&base, period)?;
    let period_template = element(period, "SegmentTemplate").map(TemplateSpec::from_node).transpose()?;

    let mut profiles = Vec::new();
    for (set_index, set) in elements(period, "AdaptationSet").enumerate() {
        let set_base = base_url(&base, set)?;
        let set_template = element(set, "SegmentTemplate").map(TemplateSpec::from_node).transpose()?;
        let set_template = TemplateSpec::merge(period_template.clone(), set_template);

        for (rep_index, rep) in elements(set, "Representation").enumerate() {
            let id = rep
                .attribute("id")
                .map(str::to_string)
                .unwrap_or_else(|| format!("{set_index}-{rep_index}"));
            let rep_base = base_url(&set_base, rep)?;
            let rep_template = element(rep, "SegmentTemplate").map(TemplateSpec::from_node).transpose()?;
            let template = TemplateSpec::merge(set_template.clone(), rep_template);

            let mut profile = Profile {
                mime_type: inherited(rep, set, "mimeType")
                    .map(str::to_string)
                    .or_else(|| content_type_mime(set))
                    .unwrap_or_default(),
                codecs: inherited(rep, set, "codecs").map(str::to_string),
                bandwidth: u64_attr(rep, "bandwidth")?.unwrap_or(0),
                width: inherited_u32(rep, set, "width")?,
                height: inherited_u32(rep, set, "height")?,
                frame_rate: inherited(rep, set, "frameRate").map(parse_frame_rate).transpose()?,
                lang: set.attribute("lang").map(str::to_string),
                init_url: None,
                start_number: None,
                segments: Vec::new(),
                id,
            };

            if let Some(template) = template {
                template.apply(&mut profile, &rep_base, &timing)?;
            } else if let Some(list) = element(rep, "SegmentList").or_else(|| element(set, "SegmentList")) {
                segment_list(&mut profile, list, &rep_base)?;
            } else {
                profile.segments.push(Segment {
                    media: rep_base.to_string(),
                    duration: timing.available.unwrap_or(0.0).max(0.0),
                    number: None,
                    time: None,
                    scaled_duration: None,
                });
            }
            profiles.push(profile);
        }
    }

    Ok(Manifest { is_live, profiles })
}

struct Timing {
    is_live: bool,
    available: Option<f64>,
    time_shift: f64,
}

#[derive(Debug, Clone, Copy)]
struct TimelineEntry {
    t: Option<u64>,
    d: u64,
    r: i64,
}

/// `SegmentTemplate` attributes; inner levels override outer ones.
#[derive(Debug, Clone, Default)]
struct TemplateSpec {
    media: Option<String>,
    initialization: Option<String>,
    timescale: Option<u64>,
    start_number: Option<u64>,
    duration: Option<u64>,
    presentation_time_offset: Option<u64>,
    timeline: Option<Vec<TimelineEntry>>,
}

impl TemplateSpec {
    fn from_node(node: Node<'_, '_>) -> Result<Self, ManifestError> {
        let timeline = match element(node, "SegmentTimeline") {
            Some(timeline) => Some(
                elements(timeline, "S")
                    .map(|s| {
                        let d = u64_attr(s, "d")?.filter(|d| *d > 0).ok_or_else(|| {
                            invalid("S@d", s.attribute("d").unwrap_or(""))
                        })?;
                        let r = match s.attribute("r") {
                            Some(raw) => raw.trim().parse::<i64>().map_err(|_| invalid("S@r", raw))?,
                            None => 0,
                        };
                        Ok::<_, ManifestError>(TimelineEntry { t: u64_attr(s, "t")?, d, r })
                    })
                    .collect::<Result<Vec<_>, ManifestError>>()?,
            ),
            None => None,
        };
        Ok(Self {
            media: node.attribute("media").map(str::to_string),
            initialization: node.attribute("initialization").map(str::to_string),
            timescale: u64_attr(node, "timescale")?,
            start_number: u64_attr(node, "startNumber")?,
            duration: u64_attr(node, "duration")?,
            presentation_time_offset: u64_attr(node, "presentationTimeOffset")?,
            timeline,
        })
    }

    fn merge(outer: Option<Self>, inner: Option<Self>) -> Option<Self> {
        match (outer, inner) {
            (None, inner) => inner,
            (outer, None) => outer,
            (Some(outer), Some(inner)) => Some(Self {
                media: inner.media.or(outer.media),
                initialization: inner.initialization.or(outer.initialization),
                timescale: inner.timescale.or(outer.timescale),
                start_number: inner.start_number.or(outer.start_number),
                duration: inner.duration.or(outer.duration),
                presentation_time_offset: inner.presentation_time_offset.or(outer.presentation_time_offset),
                timeline: inner.timeline.or(outer.timeline),
            }),
        }
    }

    fn apply(&self, profile: &mut Profile, base: &Url, timing: &Timing) -> Result<(), ManifestError> {
        let timescale = self.timescale.unwrap_or(1).max(1);
        let start = self.start_number.unwrap_or(1);
        let offset = self.presentation_time_offset.unwrap_or(0);
        let Some(media) = self.media.as_deref() else {
            return Err(invalid("SegmentTemplate@media", ""));
        };

        let vars = |number: Option<u64>, time: Option<u64>| TemplateVars {
            representation_id: &profile.id,
            bandwidth: profile.bandwidth,
            number,
            time,
        };
        let init_url = self
            .initialization
            .as_deref()
            .map(|init| resolve(base, &template::expand(init, &vars(None, None))))
            .transpose()?;

        let mut segments = Vec::new();
        let mut push = |number: u64, time: u64, scaled: u64, duration: f64| -> Result<(), ManifestError> {
            if segments.len() >= MAX_SEGMENTS {
                return Err(ManifestError::TooManySegments(profile.id.clone()));
            }
            let url = template::expand(media, &vars(Some(number), Some(time)));
            segments.push(Segment {
                media: resolve(base, &url)?,
                duration,
                number: Some(number),
                time: Some(time),
                scaled_duration: Some(scaled),
            });
            Ok(())
        };

        if let Some(timeline) = &self.timeline {
            let period_end = timing
                .available
                .map(|secs| (secs.max(0.0) * timescale as f64) as u64 + offset);
            let mut time = 0u64;
            let mut number = start;
            for (i, entry) in timeline.iter().enumerate() {
                if let Some(t) = entry.t {
                    time = t;
                }
                let repeats = if entry.r >= 0 {
                    entry.r as u64
                } else {
                    // Negative repeat: up to the next entry, or the end of the period.
                    let end = timeline.get(i + 1).and_then(|next| next.t).or(period_end);
                    match end {
                        Some(end) if end > time => (end - time).div_ceil(entry.d) - 1,
                        _ => 0,
                    }
                };
                for _ in 0..=repeats {
                    push(number, time, entry.d, entry.d as f64 / timescale as f64)?;
                    time += entry.d;
                    number += 1;
                }
            }
        } else if let Some(scaled) = self.duration.filter(|d| *d > 0) {
            let seconds = scaled as f64 / timescale as f64;
            let available = timing
                .available
                .ok_or_else(|| ManifestError::UnknownDuration(profile.id.clone()))?
                .max(0.0);
            let (first, count) = if timing.is_live {
                // Only complete segments, newest last.
                let complete = (available / seconds).floor() as u64;
                let window = ((timing.time_shift / seconds).ceil() as u64).max(1);
                let first = complete.saturating_sub(window);
                (first, complete - first)
            } else {
                (0, (available / seconds).ceil() as u64)
            };
            if count > MAX_SEGMENTS as u64 {
                return Err(ManifestError::TooManySegments(profile.id.clone()));
            }
            for index in first..first + count {
                let duration = if timing.is_live {
                    seconds
                } else {
                    // The last segment of a static period may be short.
                    seconds.min(available - index as f64 * seconds)
                };
                push(start + index, offset + index * scaled, scaled, duration)?;
            }
        } else {
            return Err(invalid("SegmentTemplate@duration", ""));
        }

        profile.segments = segments;
        profile.init_url = init_url;
        profile.start_number = self.start_number;
        Ok(())
    }
}

fn segment_list(profile: &mut Profile, list: Node<'_, '_>, base: &Url) -> Result<(), ManifestError> {
    let timescale = u64_attr(list, "timescale")?.unwrap_or(1).max(1);
    let scaled = u64_attr(list, "duration")?.unwrap_or(0);
    let start = u64_attr(list, "startNumber")?.unwrap_or(1);

    profile.init_url = element(list, "Initialization")
        .and_then(|init| init.attribute("sourceURL"))
        .map(|source| resolve(base, source))
        .transpose()?;
    for (index, entry) in elements(list, "SegmentURL").enumerate() {
        if index >= MAX_SEGMENTS {
            return Err(ManifestError::TooManySegments(profile.id.clone()));
        }
        let media = match entry.attribute("media") {
            Some(media) => resolve(base, media)?,
            None => base.to_string(),
        };
        profile.segments.push(Segment {
            media,
            duration: scaled as f64 / timescale as f64,
            number: Some(start + index as u64),
            time: Some(index as u64 * scaled),
            scaled_duration: Some(scaled),
        });
    }
    profile.start_number = u64_attr(list, "startNumber")?;
    Ok(())
}

fn elements<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    name: &'static str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children()
        .filter(move |child| child.is_element() && child.tag_name().name() == name)
}

fn element<'a, 'input: 'a>(node: Node<'a, 'input>, name: &'static str) -> Option<Node<'a, 'input>> {
    elements(node, name).next()
}

/// Apply the first `BaseURL` child of `node`, if any, to `parent`.
fn base_url(parent: &Url, node: Node<'_, '_>) -> Result<Url, ManifestError> {
    match element(node, "BaseURL").and_then(|b| b.text()).map(str::trim) {
        Some(text) if !text.is_empty() => parent.join(text).map_err(|_| invalid("BaseURL", text)),
        _ => Ok(parent.clone()),
    }
}

fn resolve(base: &Url, reference: &str) -> Result<String, ManifestError> {
    base.join(reference)
        .map(String::from)
        .map_err(|_| invalid("segment URL", reference))
}

fn inherited<'a>(rep: Node<'a, '_>, set: Node<'a, '_>, name: &str) -> Option<&'a str> {
    rep.attribute(name).or_else(|| set.attribute(name))
}

fn content_type_mime(set: Node<'_, '_>) -> Option<String> {
    match set.attribute("contentType")? {
        "video" => Some("video/mp4".to_string()),
        "audio" => Some("audio/mp4".to_string()),
        _ => None,
    }
}

fn u64_attr(node: Node<'_, '_>, name: &'static str) -> Result<Option<u64>, ManifestError> {
    node.attribute(name)
        .map(|raw| raw.trim().parse::<u64>().map_err(|_| invalid(name, raw)))
        .transpose()
}

fn inherited_u32(rep: Node<'_, '_>, set: Node<'_, '_>, name: &'static str) -> Result<Option<u32>, ManifestError> {
    inherited(rep, set, name)
        .map(|raw| raw.trim().parse::<u32>().map_err(|_| invalid(name, raw)))
        .transpose()
}

fn duration_attr(node: Node<'_, '_>, name: &'static str) -> Result<Option<f64>, ManifestError> {
    node.attribute(name)
        .map(|raw| template::parse_duration(raw).ok_or_else(|| invalid(name, raw)))
        .transpose()
}

/// `25`, `29.97` or `30000/1001`.
fn parse_frame_rate(raw: &str) -> Result<f64, ManifestError> {
    let rate = match raw.split_once('/') {
        Some((num, den)) => {
            let num = num.trim().parse::<f64>().ok();
            let den = den.trim().parse::<f64>().ok().filter(|d| *d > 0.0);
            num.zip(den).map(|(n, d)| n / d)
        }
        None => raw.trim().parse::<f64>().ok(),
    };
    rate.ok_or_else(|| invalid("frameRate", raw))
}

fn invalid(attribute: &'static str, value: &str) -> ManifestError {
    ManifestError::Attribute {
        attribute,
        value: value.to_string(),
    }
}
