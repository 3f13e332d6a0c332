use lockstep_store::{VideoKind, VideoRef};
use url::Url;

/// Classify a user-supplied media URL into the room's video reference.
/// Empty input clears the selection; recognized embed hosts get the
/// embed player; everything else is treated as a directly-addressable
/// stream.
pub fn classify(raw: &str) -> VideoRef {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return VideoRef::none();
    }
    let kind = if embedded_video_id(trimmed).is_some() {
        VideoKind::Embedded
    } else {
        VideoKind::Direct
    };
    VideoRef {
        url: trimmed.to_string(),
        kind,
    }
}

/// Extract the embed video id from a watch-page URL.
///
/// Handles `youtu.be/ID`, `youtube.com/watch?v=ID`, and the
/// `/shorts/ID`, `/live/ID`, `/embed/ID` path forms.
pub fn embedded_video_id(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw).ok()?;
    let host = parsed.host_str()?.trim_start_matches("www.");

    if host == "youtu.be" {
        let id = parsed.path_segments()?.next()?;
        return non_empty(id);
    }

    if host != "youtube.com" && host != "m.youtube.com" {
        return None;
    }

    let mut segments = parsed.path_segments()?;
    match segments.next()? {
        "watch" => parsed
            .query_pairs()
            .find(|(key, _)| key == "v")
            .and_then(|(_, value)| non_empty(&value)),
        "shorts" | "live" | "embed" => segments.next().and_then(non_empty),
        _ => None,
    }
}

fn non_empty(id: &str) -> Option<String> {
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}
