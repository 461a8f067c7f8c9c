//! Integration tests for CSV export and replay
//!
//! A capture written by the CSV sink must replay into the same dataset
//! values, and replay sessions must honour pacing and playback commands.

mod common;

use common::builders::ProjectBuilder;
use common::{collect_until_stopped, frame_values, next_frame, write_csv};
use framevis_rs::export::CsvExport;
use framevis_rs::replay::{CsvPlayer, ReplayConfig, TIMESTAMP_HEADER};
use framevis_rs::session::{Session, SessionConfig, SessionMessage, Source};
use framevis_rs::transport::LoopbackDriver;
use std::time::{Duration, Instant};

#[test]
fn test_export_then_replay() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("capture.csv");
    let project = ProjectBuilder::new("Station")
        .group("Env", 0, &["Temp", "Hum"])
        .shared();

    // Capture three frames to CSV
    let (driver, device) = LoopbackDriver::pair();
    let session = Session::start(
        SessionConfig::new(project.clone()),
        Source::Driver(Box::new(driver)),
        vec![Box::new(CsvExport::create(&csv_path).unwrap())],
    )
    .unwrap();
    device.send(b"$21.5,40;$22,41;$22.5,42;".to_vec());
    drop(device);
    let captured = collect_until_stopped(&session);
    drop(session);

    let mut reader = csv::Reader::from_path(&csv_path).unwrap();
    let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
    assert_eq!(headers, vec![TIMESTAMP_HEADER, "Env/Temp", "Env/Hum"]);
    assert_eq!(reader.records().count(), 3);

    // Replay it through the same project
    let player = CsvPlayer::open(
        &csv_path,
        ReplayConfig::fixed_interval(Duration::from_millis(5)),
    )
    .unwrap();
    assert_eq!(player.row_count(), 3);

    let replay = Session::start(SessionConfig::new(project), Source::Replay(player), Vec::new())
        .unwrap();
    let replayed = collect_until_stopped(&replay);

    assert_eq!(
        frame_values(&replayed, "Env", "Temp"),
        frame_values(&captured, "Env", "Temp")
    );
    assert_eq!(frame_values(&replayed, "Env", "Hum"), vec!["40", "41", "42"]);
}

/// Capture `input` to CSV through `project`, then replay the file through it
fn capture_and_replay(
    project: std::sync::Arc<framevis_rs::project::Project>,
    input: &[u8],
) -> (Vec<SessionMessage>, Vec<SessionMessage>) {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("capture.csv");

    let (driver, device) = LoopbackDriver::pair();
    let session = Session::start(
        SessionConfig::new(project.clone()),
        Source::Driver(Box::new(driver)),
        vec![Box::new(CsvExport::create(&csv_path).unwrap())],
    )
    .unwrap();
    device.send(input.to_vec());
    drop(device);
    let captured = collect_until_stopped(&session);
    drop(session);

    let player = CsvPlayer::open(
        &csv_path,
        ReplayConfig::fixed_interval(Duration::from_millis(5)),
    )
    .unwrap();
    let replay = Session::start(SessionConfig::new(project), Source::Replay(player), Vec::new())
        .unwrap();
    let replayed = collect_until_stopped(&replay);
    (captured, replayed)
}

#[test]
fn test_replay_with_sparse_indices() {
    // Frame index 1 carries a field no dataset reads
    let project = ProjectBuilder::new("Sparse")
        .group("Env", 0, &["Temp"])
        .group("Power", 2, &["Volts"])
        .shared();

    let (captured, replayed) = capture_and_replay(project, b"$21,x,5;$22,y,6;$23,z,7;");
    assert_eq!(frame_values(&captured, "Power", "Volts"), vec!["5", "6", "7"]);

    assert_eq!(frame_values(&replayed, "Env", "Temp"), vec!["21", "22", "23"]);
    assert_eq!(frame_values(&replayed, "Power", "Volts"), vec!["5", "6", "7"]);
    let stats = replayed
        .iter()
        .rev()
        .find_map(|msg| match msg {
            SessionMessage::Stats(stats) => Some(stats.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(stats.mapping_errors, 0);
    assert_eq!(stats.dropped_frames, 0);
}

#[test]
fn test_replay_with_unordered_indices() {
    // Declaration order differs from frame order
    let project = ProjectBuilder::new("Unordered")
        .group("B", 1, &["Second"])
        .group("A", 0, &["First"])
        .shared();

    let (captured, replayed) = capture_and_replay(project, b"$1,2;$3,4;");
    assert_eq!(frame_values(&captured, "A", "First"), vec!["1", "3"]);

    assert_eq!(frame_values(&replayed, "A", "First"), vec!["1", "3"]);
    assert_eq!(frame_values(&replayed, "B", "Second"), vec!["2", "4"]);
}

#[test]
fn test_timestamp_paced_replay() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_csv(
        dir.path(),
        "paced.csv",
        "RX Date/Time,Temp\n\
         2024/01/01 00:00:00::000,1\n\
         2024/01/01 00:00:00::150,2\n\
         2024/01/01 00:00:00::300,3\n",
    );

    let player = CsvPlayer::open(&path, ReplayConfig::timestamp_column(TIMESTAMP_HEADER)).unwrap();
    let project = ProjectBuilder::new("Paced").group("Env", 0, &["Temp"]).shared();

    let started = Instant::now();
    let session =
        Session::start(SessionConfig::new(project), Source::Replay(player), Vec::new()).unwrap();
    let messages = collect_until_stopped(&session);
    let elapsed = started.elapsed();

    assert_eq!(frame_values(&messages, "Env", "Temp"), vec!["1", "2", "3"]);
    assert!(
        elapsed >= Duration::from_millis(280),
        "replay finished too early: {:?}",
        elapsed
    );
}

#[test]
fn test_pause_and_step() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_csv(dir.path(), "steps.csv", "Temp\n1\n2\n3\n4\n");

    let player = CsvPlayer::open(
        &path,
        ReplayConfig::fixed_interval(Duration::from_millis(300)),
    )
    .unwrap();
    let project = ProjectBuilder::new("Steps").group("Env", 0, &["Temp"]).shared();
    let mut session =
        Session::start(SessionConfig::new(project), Source::Replay(player), Vec::new()).unwrap();

    // The first row is due immediately
    let first = next_frame(&session).unwrap();
    assert_eq!(first.get("Env", "Temp").unwrap().text, "1");

    assert!(session.pause());
    assert!(session.step_forward());
    let stepped = next_frame(&session).unwrap();
    assert_eq!(stepped.get("Env", "Temp").unwrap().text, "2");

    assert!(session.step_backward());
    let back = next_frame(&session).unwrap();
    assert_eq!(back.get("Env", "Temp").unwrap().text, "1");

    // Nothing plays while paused
    std::thread::sleep(Duration::from_millis(400));
    let idle: Vec<_> = session
        .drain()
        .into_iter()
        .filter(|msg| matches!(msg, SessionMessage::Frame(_)))
        .collect();
    assert!(idle.is_empty());

    assert!(session.seek(3));
    assert!(session.resume());
    let resumed = next_frame(&session).unwrap();
    assert_eq!(resumed.get("Env", "Temp").unwrap().text, "4");

    session.stop();
}

#[test]
fn test_invalid_captures_are_rejected() {
    let dir = tempfile::tempdir().unwrap();

    let single = write_csv(dir.path(), "single.csv", "Temp\n1\n");
    assert!(CsvPlayer::open(&single, ReplayConfig::default()).is_err());

    let no_column = write_csv(dir.path(), "plain.csv", "Temp\n1\n2\n");
    assert!(CsvPlayer::open(&no_column, ReplayConfig::timestamp_column("Time")).is_err());

    let bad_time = write_csv(dir.path(), "bad.csv", "Time,Temp\nnoon,1\nlater,2\n");
    assert!(CsvPlayer::open(&bad_time, ReplayConfig::timestamp_column("Time")).is_err());

    assert!(CsvPlayer::open(dir.path().join("missing.csv"), ReplayConfig::default()).is_err());
}
