//! Entry model: one recorded mark or measure plus its visualization detail.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Process / thread identity
// =============================================================================

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

/// Small process-local id of the calling thread, allocated on first use.
pub fn current_thread_id() -> u64 {
    THREAD_ID.with(|id| *id)
}

/// OS id of the current process.
pub fn current_process_id() -> u32 {
    std::process::id()
}

// =============================================================================
// Color
// =============================================================================

/// Lane color understood by trace viewers.
///
/// Values outside the palette are kept verbatim in [`Color::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Color {
    Primary,
    PrimaryLight,
    PrimaryDark,
    Secondary,
    SecondaryLight,
    SecondaryDark,
    Tertiary,
    TertiaryLight,
    TertiaryDark,
    Error,
    Other(String),
}

impl Color {
    pub fn as_str(&self) -> &str {
        match self {
            Color::Primary => "primary",
            Color::PrimaryLight => "primary-light",
            Color::PrimaryDark => "primary-dark",
            Color::Secondary => "secondary",
            Color::SecondaryLight => "secondary-light",
            Color::SecondaryDark => "secondary-dark",
            Color::Tertiary => "tertiary",
            Color::TertiaryLight => "tertiary-light",
            Color::TertiaryDark => "tertiary-dark",
            Color::Error => "error",
            Color::Other(other) => other,
        }
    }
}

impl From<String> for Color {
    fn from(value: String) -> Self {
        match value.as_str() {
            "primary" => Color::Primary,
            "primary-light" => Color::PrimaryLight,
            "primary-dark" => Color::PrimaryDark,
            "secondary" => Color::Secondary,
            "secondary-light" => Color::SecondaryLight,
            "secondary-dark" => Color::SecondaryDark,
            "tertiary" => Color::Tertiary,
            "tertiary-light" => Color::TertiaryLight,
            "tertiary-dark" => Color::TertiaryDark,
            "error" => Color::Error,
            _ => Color::Other(value),
        }
    }
}

impl From<&str> for Color {
    fn from(value: &str) -> Self {
        Color::from(value.to_string())
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        match color {
            Color::Other(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Detail
// =============================================================================

/// Keys owned by the typed fields of [`Detail`] or by the trace converter.
///
/// They never appear in [`Detail::extra`], so serialized objects have no
/// duplicate keys.
pub const RESERVED_DETAIL_KEYS: &[&str] =
    &["track", "trackGroup", "color", "properties", "tooltipText", "dataType"];

fn is_reserved_key(key: &str) -> bool {
    RESERVED_DETAIL_KEYS.contains(&key)
}

/// Visualization metadata attached to an entry.
///
/// The known fields are typed; anything else survives in `extra` and is
/// written back out next to them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detail {
    /// Lane name in the viewer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<String>,
    /// Group the lane belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
    /// Ordered key/value pairs; duplicates are kept
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<(String, String)>,
    /// Hover text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooltip_text: Option<String>,
    /// Unknown keys, kept for forward compatibility
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Detail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Detail placing an entry on `track`.
    pub fn on_track(track: impl Into<String>) -> Self {
        Self::new().with_track(track)
    }

    pub fn with_track(mut self, track: impl Into<String>) -> Self {
        self.track = Some(track.into());
        self
    }

    pub fn with_track_group(mut self, group: impl Into<String>) -> Self {
        self.track_group = Some(group.into());
        self
    }

    pub fn with_color(mut self, color: impl Into<Color>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push((key.into(), value.into()));
        self
    }

    pub fn with_tooltip(mut self, text: impl Into<String>) -> Self {
        self.tooltip_text = Some(text.into());
        self
    }

    /// Attach an extension key. Reserved keys are ignored; use the typed
    /// builders for those.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if is_reserved_key(&key) {
            tracing::debug!(key = %key, "ignoring reserved detail key passed as extra");
            return self;
        }
        self.extra.insert(key, value.into());
        self
    }

    /// Error-colored detail describing `err`.
    ///
    /// Carries an `Error Type` property with the short type name and a
    /// `<Type>: <message>` tooltip.
    pub fn for_error<E: fmt::Display + ?Sized>(err: &E) -> Self {
        let type_name = short_type_name(std::any::type_name::<E>());
        Self::new()
            .with_color(Color::Error)
            .with_property("Error Type", type_name)
            .with_tooltip(format!("{type_name}: {err}"))
    }

    /// Whether no field is set.
    pub fn is_empty(&self) -> bool {
        self.track.is_none()
            && self.track_group.is_none()
            && self.color.is_none()
            && self.properties.is_empty()
            && self.tooltip_text.is_none()
            && self.extra.is_empty()
    }

    /// Lift a loosely typed payload into a `Detail`.
    ///
    /// A `{"devtools": {...}}` wrapper is unwrapped. Typed keys with an
    /// unexpected shape are dropped; unknown keys are kept in `extra`.
    pub fn from_value(value: Value) -> Self {
        let mut map = match value {
            Value::Null => return Self::default(),
            Value::Object(map) => map,
            other => return Self::new().with_extra("value", other),
        };

        match map.remove("devtools") {
            Some(Value::Object(devtools)) => {
                let mut detail = Self::from_map(devtools);
                for (key, value) in map {
                    if !is_reserved_key(&key) {
                        detail.extra.entry(key).or_insert(value);
                    }
                }
                detail
            }
            Some(other) => {
                map.insert("devtools".to_string(), other);
                Self::from_map(map)
            }
            None => Self::from_map(map),
        }
    }

    fn from_map(mut map: Map<String, Value>) -> Self {
        // Written by the trace converter, not part of the detail itself
        map.remove("dataType");
        Self {
            track: take_typed(&mut map, "track"),
            track_group: take_typed(&mut map, "trackGroup"),
            color: take_typed(&mut map, "color"),
            properties: take_typed(&mut map, "properties").unwrap_or_default(),
            tooltip_text: take_typed(&mut map, "tooltipText"),
            extra: map,
        }
    }

    /// Drop reserved keys that slipped into `extra`, e.g. through direct
    /// field access.
    pub(crate) fn strip_reserved_extra(&mut self) {
        self.extra.retain(|key, _| !is_reserved_key(key));
    }
}

/// Remove `key` and type it; a value of the wrong shape is dropped.
fn take_typed<T: DeserializeOwned>(map: &mut Map<String, Value>, key: &str) -> Option<T> {
    let value = map.remove(key)?;
    match serde_json::from_value(value) {
        Ok(typed) => Some(typed),
        Err(e) => {
            tracing::debug!(key, "dropping detail field of unexpected shape: {}", e);
            None
        }
    }
}

fn short_type_name(full: &str) -> &str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

// =============================================================================
// Entry
// =============================================================================

/// Mark or measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Mark,
    Measure,
}

/// One recorded observation, as written to a WAL line.
///
/// `timestamp` and `duration` are milliseconds; `timestamp` is relative to the
/// recording profiler's epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    #[serde(rename = "entryType")]
    pub kind: EntryKind,
    pub name: String,
    pub timestamp: f64,
    /// Present only on measures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Detail>,
    pub process_id: u32,
    pub thread_id: u64,
    /// Zero-length measure drawn as an instant on its track
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub instant: bool,
}

impl Entry {
    /// Instant entry stamped with the calling process and thread.
    pub(crate) fn mark(name: impl Into<String>, timestamp: f64, detail: Option<Detail>) -> Self {
        Self {
            kind: EntryKind::Mark,
            name: name.into(),
            timestamp,
            duration: None,
            detail,
            process_id: current_process_id(),
            thread_id: current_thread_id(),
            instant: false,
        }
    }

    /// Interval entry stamped with the calling process and thread.
    ///
    /// Negative or NaN durations are clamped to zero.
    pub(crate) fn measure(
        name: impl Into<String>,
        timestamp: f64,
        duration: f64,
        detail: Option<Detail>,
    ) -> Self {
        Self {
            kind: EntryKind::Measure,
            duration: Some(clamp_duration(duration)),
            ..Self::mark(name, timestamp, detail)
        }
    }

    /// Zero-length measure that the converter draws as an instant on the
    /// detail's track.
    pub(crate) fn track_entry(name: impl Into<String>, timestamp: f64, detail: Option<Detail>) -> Self {
        Self {
            instant: true,
            ..Self::measure(name, timestamp, 0.0, detail)
        }
    }

    #[cfg(test)]
    pub(crate) fn with_origin(mut self, process_id: u32, thread_id: u64) -> Self {
        self.process_id = process_id;
        self.thread_id = thread_id;
        self
    }

    pub fn is_mark(&self) -> bool {
        self.kind == EntryKind::Mark
    }

    /// Whether the entry is drawn as an instant event.
    pub fn is_instant(&self) -> bool {
        self.kind == EntryKind::Mark || self.instant
    }

    /// Duration in milliseconds; zero for marks.
    pub fn duration_ms(&self) -> f64 {
        match self.kind {
            EntryKind::Mark => 0.0,
            EntryKind::Measure => clamp_duration(self.duration.unwrap_or(0.0)),
        }
    }

    /// Timestamp at which the entry ends.
    pub fn end_timestamp(&self) -> f64 {
        self.timestamp + self.duration_ms()
    }
}

fn clamp_duration(duration: f64) -> f64 {
    if duration.is_nan() || duration < 0.0 {
        0.0
    } else {
        duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[derive(Debug)]
    struct ValidationError;

    impl fmt::Display for ValidationError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("Invalid input data provided")
        }
    }

    #[test]
    fn test_thread_ids_differ_across_threads() {
        let here = current_thread_id();
        assert_eq!(here, current_thread_id());

        let there = std::thread::spawn(current_thread_id).join().unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn test_color_known_and_unknown() {
        assert_eq!(Color::from("tertiary-dark"), Color::TertiaryDark);
        assert_eq!(Color::from("error").as_str(), "error");

        let custom = Color::from("hot-pink");
        assert_eq!(custom, Color::Other("hot-pink".to_string()));

        let json = serde_json::to_string(&custom).unwrap();
        assert_eq!(json, "\"hot-pink\"");
        let back: Color = serde_json::from_str(&json).unwrap();
        assert_eq!(back, custom);
    }

    #[test]
    fn test_detail_serialization_shape() {
        let detail = Detail::on_track("Workers")
            .with_track_group("CLI")
            .with_color(Color::Error)
            .with_property("Error Type", "ValidationError")
            .with_property("Error Type", "Duplicate")
            .with_tooltip("boom")
            .with_extra("custom", 3);

        let value = serde_json::to_value(&detail).unwrap();
        assert_eq!(
            value,
            json!({
                "track": "Workers",
                "trackGroup": "CLI",
                "color": "error",
                "properties": [["Error Type", "ValidationError"], ["Error Type", "Duplicate"]],
                "tooltipText": "boom",
                "custom": 3
            })
        );

        let back: Detail = serde_json::from_value(value).unwrap();
        assert_eq!(back, detail);
    }

    #[test]
    fn test_detail_from_devtools_wrapper() {
        let detail = Detail::from_value(json!({
            "devtools": {
                "dataType": "track-entry",
                "track": "Plugins",
                "color": "secondary"
            },
            "runId": 7
        }));

        assert_eq!(detail.track.as_deref(), Some("Plugins"));
        assert_eq!(detail.color, Some(Color::Secondary));
        assert_eq!(detail.extra.get("runId"), Some(&json!(7)));
        assert!(!detail.extra.contains_key("dataType"));
    }

    #[test]
    fn test_detail_from_unexpected_shapes() {
        assert!(Detail::from_value(Value::Null).is_empty());

        let scalar = Detail::from_value(json!("just text"));
        assert_eq!(scalar.extra.get("value"), Some(&json!("just text")));

        // A numeric track cannot be typed; it is dropped, the rest survives
        let odd = Detail::from_value(json!({"track": 5, "color": "primary", "runId": 2}));
        assert!(odd.track.is_none());
        assert!(!odd.extra.contains_key("track"));
        assert_eq!(odd.color, Some(Color::Primary));
        assert_eq!(odd.extra.get("runId"), Some(&json!(2)));
    }

    #[test]
    fn test_reserved_keys_never_land_in_extra() {
        let detail = Detail::on_track("Real")
            .with_extra("track", "Shadow")
            .with_extra("dataType", "marker")
            .with_extra("custom", 1);
        assert_eq!(detail.track.as_deref(), Some("Real"));
        assert_eq!(detail.extra.len(), 1);

        let line = serde_json::to_string(&detail).unwrap();
        assert_eq!(line.matches("\"track\"").count(), 1);

        let wrapped = Detail::from_value(json!({
            "devtools": {"track": "Inner"},
            "track": "Outer",
            "color": "error"
        }));
        assert_eq!(wrapped.track.as_deref(), Some("Inner"));
        assert!(wrapped.extra.is_empty());
    }

    #[test]
    fn test_track_entry_is_instant_measure() {
        let entry = Entry::track_entry("milestone", 3.0, Some(Detail::on_track("Lane")));
        assert_eq!(entry.kind, EntryKind::Measure);
        assert_eq!(entry.duration, Some(0.0));
        assert!(entry.is_instant());
        assert!(!Entry::measure("span", 3.0, 0.0, None).is_instant());

        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["instant"], json!(true));
        let back: Entry = serde_json::from_value(value).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_detail_for_error() {
        let detail = Detail::for_error(&ValidationError);
        assert_eq!(detail.color, Some(Color::Error));
        assert_eq!(
            detail.properties,
            vec![("Error Type".to_string(), "ValidationError".to_string())]
        );
        assert_eq!(
            detail.tooltip_text.as_deref(),
            Some("ValidationError: Invalid input data provided")
        );
    }

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name("std::io::Error"), "Error");
        assert_eq!(short_type_name("Plain"), "Plain");
        assert_eq!(short_type_name("my::Wrapper<other::Inner>"), "Wrapper");
    }

    #[test]
    fn test_measure_clamps_duration() {
        assert_eq!(Entry::measure("m", 1.0, -3.0, None).duration, Some(0.0));
        assert_eq!(Entry::measure("m", 1.0, f64::NAN, None).duration, Some(0.0));
        assert_eq!(Entry::measure("m", 1.0, 0.0, None).duration, Some(0.0));
    }

    #[test]
    fn test_entry_wire_shape() {
        let entry = Entry::mark("ready", 12.5, None).with_origin(42, 3);
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            value,
            json!({
                "entryType": "mark",
                "name": "ready",
                "timestamp": 12.5,
                "processId": 42,
                "threadId": 3
            })
        );
    }

    fn arb_detail() -> impl Strategy<Value = Option<Detail>> {
        proptest::option::of(
            (
                proptest::option::of("[a-zA-Z ]{0,12}"),
                proptest::option::of("[a-z-]{1,14}"),
                proptest::collection::vec(("[a-zA-Z ]{0,8}", ".{0,8}"), 0..4),
                proptest::option::of(".{0,20}"),
            )
                .prop_map(|(track, color, properties, tooltip_text)| Detail {
                    track,
                    color: color.map(Color::from),
                    properties,
                    tooltip_text,
                    ..Detail::default()
                }),
        )
    }

    proptest! {
        #[test]
        fn prop_entry_json_round_trip(
            name in ".{0,24}",
            timestamp in 0.0f64..1.0e9,
            duration in proptest::option::of(0.0f64..1.0e6),
            detail in arb_detail(),
            process_id in any::<u32>(),
            thread_id in 1u64..1_000,
        ) {
            let mut entry = match duration {
                Some(d) => Entry::measure(name, timestamp, d, detail),
                None => Entry::mark(name, timestamp, detail),
            };
            entry = entry.with_origin(process_id, thread_id);

            let line = serde_json::to_string(&entry).unwrap();
            prop_assert!(!line.contains('\n'));
            let parsed: Entry = serde_json::from_str(&line).unwrap();
            prop_assert_eq!(parsed, entry);
        }
    }
}
