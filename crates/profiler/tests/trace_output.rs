use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use profiler::{
    merge_into, read_trace, Detail, Entry, EntryKind, MeasureOptions, Phase, Profiler,
    ProfilerConfig, TraceConverter, WalWriter,
};
use serde_json::json;
use tempfile::TempDir;

fn entry(name: &str, timestamp: f64, process_id: u32) -> Entry {
    Entry {
        kind: EntryKind::Mark,
        name: name.to_string(),
        timestamp,
        duration: None,
        detail: None,
        process_id,
        thread_id: 1,
        instant: false,
    }
}

fn profiler_in(dir: &Path, name: &str) -> Profiler {
    Profiler::new(ProfilerConfig::new(dir).with_file_name(name)).unwrap()
}

#[test]
fn test_marker_example_end_to_end() {
    let temp_dir = TempDir::new().unwrap();
    let profiler = profiler_in(temp_dir.path(), "cli");

    profiler.marker("instant", None);
    profiler.marker(
        "instant-details-devtools-error",
        Some(
            Detail::new()
                .with_color("error")
                .with_property("Error Type", "ValidationError")
                .with_tooltip("ValidationError: Invalid input data provided"),
        ),
    );
    profiler.close();

    let trace = read_trace(profiler.trace_path()).unwrap();
    let events: Vec<_> = trace.timed_events().collect();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.ph == Phase::Instant));
    assert_eq!(events[0].name, "instant");
    assert_eq!(events[1].name, "instant-details-devtools-error");
    assert!(events[0].ts <= events[1].ts);

    let devtools = events[1].devtools().unwrap();
    assert_eq!(devtools["color"], "error");
    assert_eq!(devtools["properties"], json!([["Error Type", "ValidationError"]]));
    assert_eq!(
        devtools["tooltipText"],
        "ValidationError: Invalid input data provided"
    );
    assert_eq!(devtools["dataType"], "marker");
    assert_eq!(events[0].devtools().unwrap()["track"], "");
}

#[test]
fn test_truncated_wal_tail_is_skipped() {
    let temp_dir = TempDir::new().unwrap();
    let wal_path = temp_dir.path().join("crashed.jsonl");

    let mut wal = WalWriter::open(&wal_path).unwrap();
    wal.append(&[entry("one", 1.0, 7), entry("two", 2.0, 7)]).unwrap();
    drop(wal);

    // Simulate a process killed mid-write
    let mut file = std::fs::OpenOptions::new().append(true).open(&wal_path).unwrap();
    file.write_all(b"{\"entryType\":\"mark\",\"name\":\"thr").unwrap();

    let report = TraceConverter::default().convert_file(&wal_path).unwrap();
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.document.timed_events().count(), 2);
    assert_eq!(report.document.metadata["skippedLines"], json!(1));
}

#[test]
fn test_merge_two_processes() {
    let temp_dir = TempDir::new().unwrap();
    let first = temp_dir.path().join("trace.1.1.jsonl");
    let second = temp_dir.path().join("trace.2.1.jsonl");

    WalWriter::open(&first)
        .unwrap()
        .append(&[entry("p1-start", 0.0, 1), entry("p1-end", 10.0, 1)])
        .unwrap();
    WalWriter::open(&second)
        .unwrap()
        .append(&[entry("p2-mid", 5.0, 2)])
        .unwrap();

    let out = temp_dir.path().join("merged.json");
    let report = merge_into(&[&first, &second], &out, BTreeMap::new()).unwrap();
    assert!(report.skipped_inputs.is_empty());

    let merged = read_trace(&out).unwrap();
    let order: Vec<(u32, f64)> = merged.timed_events().map(|e| (e.pid, e.ts)).collect();
    assert_eq!(order, vec![(1, 0.0), (2, 5000.0), (1, 10000.0)]);
}

#[test]
fn test_measures_with_tracks() {
    let temp_dir = TempDir::new().unwrap();
    let profiler = profiler_in(temp_dir.path(), "tracks");

    profiler.measure(
        "plugin:eslint",
        MeasureOptions::new().with_detail(
            Detail::on_track("Plugins")
                .with_track_group("Collect")
                .with_color("tertiary-dark")
                .with_tooltip("eslint run"),
        ),
        || std::thread::sleep(Duration::from_millis(5)),
    );
    profiler.instant_track_entry("checkpoint", Some(Detail::on_track("Plugins")));
    profiler.close();

    let trace = read_trace(profiler.trace_path()).unwrap();
    let complete: Vec<_> = trace.complete_events().collect();
    assert_eq!(complete.len(), 1);

    let plugin = complete.iter().find(|e| e.name == "plugin:eslint").unwrap();
    assert!(plugin.dur.unwrap() >= 5000.0);
    let devtools = plugin.devtools().unwrap();
    assert_eq!(devtools["dataType"], "track-entry");
    assert_eq!(devtools["track"], "Plugins");
    assert_eq!(devtools["trackGroup"], "Collect");
    assert_eq!(devtools["tooltipText"], "eslint run");

    let checkpoint = trace.timed_events().find(|e| e.name == "checkpoint").unwrap();
    assert_eq!(checkpoint.ph, Phase::Instant);
    assert_eq!(checkpoint.s.as_deref(), Some("t"));
    assert_eq!(checkpoint.dur, None);
    let devtools = checkpoint.devtools().unwrap();
    assert_eq!(devtools["dataType"], "track-entry");
    assert_eq!(devtools["track"], "Plugins");
}

#[tokio::test]
async fn test_measure_async_covers_await() {
    let temp_dir = TempDir::new().unwrap();
    let profiler = profiler_in(temp_dir.path(), "async");

    let value = profiler
        .measure_async("sleep", MeasureOptions::new(), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            "slept"
        })
        .await;
    assert_eq!(value, "slept");
    profiler.close();

    let trace = read_trace(profiler.trace_path()).unwrap();
    let sleep = trace.complete_events().next().unwrap();
    assert!(sleep.dur.unwrap() >= 100_000.0, "dur={:?}", sleep.dur);
}

#[test]
fn test_close_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let profiler = profiler_in(temp_dir.path(), "twice");

    profiler.marker("only", None);
    profiler.close();
    let first = read_trace(profiler.trace_path()).unwrap();

    profiler.close();
    profiler.flush();
    let second = read_trace(profiler.trace_path()).unwrap();

    assert_eq!(first, second);
    assert_eq!(second.timed_events().count(), 1);
}
