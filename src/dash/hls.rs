//! HLS rendering of a parsed MPD.
//!
//! # Responsibilities
//! - Master playlist: one `#EXT-X-MEDIA` per audio profile (group `audio`),
//!   one `#EXT-X-STREAM-INF` per video profile
//! - Media playlist for a single profile, with target duration, media
//!   sequence and playlist type
//!
//! Link targets are supplied by the caller, so this module knows nothing
//! about the proxy's routes.

use crate::dash::mpd::{Manifest, Profile, Segment};

/// Content type of every playlist this module renders.
pub const MPEGURL: &str = "application/vnd.apple.mpegurl";

/// Target duration when a profile has no segments to measure.
const DEFAULT_TARGET_DURATION: u64 = 3;

/// Live sequences above this wrap, to stay readable to players.
const LIVE_SEQUENCE_WRAP: u64 = 100_000;

/// `startNumber` from which segment numbers are used as the sequence as-is.
const NUMBERED_SEQUENCE_FLOOR: u64 = 1000;

pub fn master_playlist(manifest: &Manifest, playlist_url: impl Fn(&Profile) -> String) -> String {
    let mut lines = vec!["#EXTM3U".to_string(), "#EXT-X-VERSION:6".to_string()];

    let video: Vec<&Profile> = manifest.profiles.iter().filter(|p| p.is_video()).collect();
    let audio: Vec<&Profile> = manifest
        .profiles
        .iter()
        .filter(|p| !p.is_video() && p.is_audio())
        .collect();

    for (index, profile) in audio.iter().enumerate() {
        let default = if index == 0 { "YES" } else { "NO" };
        lines.push(format!(
            "#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"audio\",NAME=\"{}\",DEFAULT={default},AUTOSELECT={default},LANGUAGE=\"{}\",URI=\"{}\"",
            profile.id,
            profile.lang.as_deref().unwrap_or("und"),
            playlist_url(profile)
        ));
    }

    for profile in video {
        let mut inf = format!("#EXT-X-STREAM-INF:BANDWIDTH={}", profile.bandwidth);
        if let (Some(width), Some(height)) = (profile.width, profile.height) {
            inf.push_str(&format!(",RESOLUTION={width}x{height}"));
        }
        if let Some(codecs) = &profile.codecs {
            inf.push_str(&format!(",CODECS=\"{codecs}\""));
        }
        if let Some(rate) = profile.frame_rate {
            inf.push_str(&format!(",FRAME-RATE={rate:.3}"));
        }
        if !audio.is_empty() {
            inf.push_str(",AUDIO=\"audio\"");
        }
        lines.push(inf);
        lines.push(playlist_url(profile));
    }

    lines.join("\n")
}

pub fn media_playlist(
    manifest: &Manifest,
    profile: &Profile,
    segment_url: impl Fn(&Profile, &Segment) -> String,
) -> String {
    let mut lines = vec!["#EXTM3U".to_string(), "#EXT-X-VERSION:6".to_string()];

    if profile.segments.is_empty() {
        tracing::warn!(profile = %profile.id, "No segments found for profile");
    } else {
        let longest = profile.segments.iter().map(|s| s.duration).fold(0.0_f64, f64::max);
        let target = if longest > 0.0 {
            longest.ceil() as u64
        } else {
            DEFAULT_TARGET_DURATION
        };
        lines.push(format!("#EXT-X-TARGETDURATION:{target}"));
        lines.push(format!("#EXT-X-MEDIA-SEQUENCE:{}", media_sequence(manifest, profile)));
        let kind = if manifest.is_live { "LIVE" } else { "VOD" };
        lines.push(format!("#EXT-X-PLAYLIST-TYPE:{kind}"));
        for segment in &profile.segments {
            lines.push(format!("#EXTINF:{:.3},", segment.duration));
            lines.push(segment_url(profile, segment));
        }
    }

    if !manifest.is_live {
        lines.push("#EXT-X-ENDLIST".to_string());
    }
    tracing::debug!(profile = %profile.id, segments = profile.segments.len(), "Built media playlist");
    lines.join("\n")
}

/// Sequence number of the first listed segment.
fn media_sequence(manifest: &Manifest, profile: &Profile) -> u64 {
    let Some(first) = profile.segments.first() else {
        return 1;
    };
    match profile.start_number {
        Some(start) if start >= NUMBERED_SEQUENCE_FLOOR => first.number.unwrap_or(start),
        _ => match (first.time, first.scaled_duration) {
            (Some(time), Some(duration)) if duration > 0 => {
                let sequence = time / duration;
                if manifest.is_live && sequence > LIVE_SEQUENCE_WRAP {
                    sequence % LIVE_SEQUENCE_WRAP
                } else {
                    sequence
                }
            }
            _ => first.number.unwrap_or(1),
        },
    }
}
