//! Maps the heterogeneous JSON returned by search/download providers onto the
//! stable shapes the front-end relies on.
//!
//! Providers disagree on key names (English vs Portuguese), on whether results
//! come as a list or a single object, and on where a download descriptor hides
//! its media link. Each field is looked up through an ordered chain of
//! candidate keys that ends in a fixed default.

use serde_json::Value;
use url::Url;

use crate::models::{SearchResult, ViewCount};

pub const DEFAULT_TITLE: &str = "Sem Título";
pub const DEFAULT_CHANNEL: &str = "Desconhecido";
pub const DEFAULT_DURATION: &str = "N/A";

const COLLECTION_KEYS: [&str; 5] = ["formattedVideos", "results", "videos", "resultados", "data"];
const SINGLE_RESULT_KEYS: [&str; 3] = ["resultado", "result", "video"];

const TITLE_KEYS: [&str; 3] = ["title", "título", "titulo"];
const URL_KEYS: [&str; 2] = ["link", "url"];
const VIDEO_ID_KEYS: [&str; 2] = ["videoId", "id"];
const THUMBNAIL_KEYS: [&str; 3] = ["thumbnail", "miniatura", "image"];
const CHANNEL_KEYS: [&str; 3] = ["channel", "canal", "author"];
const VIEWS_KEYS: [&str; 3] = ["views", "visualizações", "visualizacoes"];
const DURATION_KEYS: [&str; 3] = ["duration", "duração", "duracao"];

const MEDIA_LINK_PATHS: [&[&str]; 4] = [
    &["downloadLink"],
    &["resultado", "downloadLink"],
    &["download", "downloadLink"],
    &["download", "url"],
];

const WATCH_URL_PREFIX: &str = "https://www.youtube.com/watch?v=";

/// Normalizes a whole search payload. Unknown shapes yield an empty list.
pub fn normalize_search_payload(payload: &Value) -> Vec<SearchResult> {
    result_candidates(payload)
        .into_iter()
        .filter(|candidate| candidate.is_object())
        .map(normalize_video)
        .collect()
}

fn result_candidates(payload: &Value) -> Vec<&Value> {
    if let Some(items) = payload.as_array() {
        return items.iter().collect();
    }

    for key in COLLECTION_KEYS {
        if let Some(items) = payload.get(key).and_then(Value::as_array)
            && !items.is_empty()
        {
            return items.iter().collect();
        }
    }

    SINGLE_RESULT_KEYS
        .iter()
        .filter_map(|key| payload.get(*key))
        .find(|value| value.is_object())
        .map(|value| vec![value])
        .unwrap_or_default()
}

pub fn normalize_video(video: &Value) -> SearchResult {
    let url = pick(video, &URL_KEYS, as_text)
        .or_else(|| {
            pick(video, &VIDEO_ID_KEYS, as_text)
                .filter(|id| is_video_id(id))
                .map(|id| watch_url(&id))
        })
        .unwrap_or_default();

    SearchResult {
        title: pick(video, &TITLE_KEYS, as_text).unwrap_or_else(|| DEFAULT_TITLE.to_string()),
        url,
        thumbnail: pick(video, &THUMBNAIL_KEYS, as_text).unwrap_or_default(),
        channel: pick(video, &CHANNEL_KEYS, as_channel)
            .unwrap_or_else(|| DEFAULT_CHANNEL.to_string()),
        views: pick(video, &VIEWS_KEYS, as_views).unwrap_or_default(),
        duration: pick(video, &DURATION_KEYS, as_duration)
            .unwrap_or_else(|| DEFAULT_DURATION.to_string()),
    }
}

/// Finds the direct media URL inside a download descriptor.
pub fn resolve_media_link(descriptor: &Value) -> Option<String> {
    MEDIA_LINK_PATHS
        .iter()
        .filter_map(|path| lookup_path(descriptor, path))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|link| is_http_url(link))
        .map(ToString::to_string)
}

pub fn watch_url(video_id: &str) -> String {
    format!("{WATCH_URL_PREFIX}{video_id}")
}

/// Pulls the 11-character video ID out of the common YouTube URL forms.
pub fn extract_video_id(input: &str) -> Option<String> {
    let parsed = Url::parse(input.trim()).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();

    let candidate = if host == "youtu.be" {
        parsed.path_segments()?.next().map(ToString::to_string)
    } else if host == "youtube.com" || host.ends_with(".youtube.com") {
        let mut segments = parsed.path_segments()?;
        match segments.next() {
            Some("watch") => parsed
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.into_owned()),
            Some("shorts" | "embed" | "live") => segments.next().map(ToString::to_string),
            _ => None,
        }
    } else {
        None
    };

    candidate.filter(|id| is_video_id(id))
}

pub fn is_video_id(value: &str) -> bool {
    value.len() == 11
        && value
            .chars()
            .all(|character| character.is_ascii_alphanumeric() || matches!(character, '-' | '_'))
}

fn pick<T>(video: &Value, keys: &[&str], convert: impl Fn(&Value) -> Option<T>) -> Option<T> {
    keys.iter()
        .filter_map(|key| video.get(*key))
        .filter(|value| is_truthy(value))
        .find_map(convert)
}

// Same notion of "missing" the providers' own clients use: null, false, "" and 0.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::String(text) => !text.is_empty(),
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn as_channel(value: &Value) -> Option<String> {
    match value {
        Value::Object(_) => value
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map(ToString::to_string),
        other => as_text(other),
    }
}

fn as_views(value: &Value) -> Option<ViewCount> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().filter(|n| *n > 0.0).map(|n| n.round() as u64))
            .map(ViewCount::Count),
        Value::String(text) => Some(ViewCount::Label(text.clone())),
        _ => None,
    }
}

fn as_duration(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().filter(|n| *n > 0.0).map(|n| n.round() as u64))
            .map(format_seconds),
        Value::Object(_) => value
            .get("timestamp")
            .and_then(Value::as_str)
            .filter(|timestamp| !timestamp.is_empty())
            .map(ToString::to_string),
        _ => None,
    }
}

fn format_seconds(total: u64) -> String {
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

fn lookup_path<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, key| current.get(*key))
}

fn is_http_url(value: &str) -> bool {
    Url::parse(value).is_ok_and(|parsed| matches!(parsed.scheme(), "http" | "https"))
}
