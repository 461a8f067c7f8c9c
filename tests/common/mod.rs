//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use framevis_rs::builder::DataFrame;
use framevis_rs::session::{Session, SessionMessage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Longest a test waits for a single session message
pub fn test_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}

/// Collect messages until `Stopped` arrives or the session goes quiet
pub fn collect_until_stopped(session: &Session) -> Vec<SessionMessage> {
    let mut messages = Vec::new();
    while let Some(msg) = session.recv_timeout(test_timeout()) {
        let stopped = matches!(msg, SessionMessage::Stopped);
        messages.push(msg);
        if stopped {
            break;
        }
    }
    messages
}

/// Wait for the next frame, skipping statistics and other messages
pub fn next_frame(session: &Session) -> Option<Arc<DataFrame>> {
    while let Some(msg) = session.recv_timeout(test_timeout()) {
        match msg {
            SessionMessage::Frame(frame) => return Some(frame),
            SessionMessage::Stopped => return None,
            _ => {}
        }
    }
    None
}

/// Text of one dataset across all frame messages
pub fn frame_values(messages: &[SessionMessage], group: &str, title: &str) -> Vec<String> {
    messages
        .iter()
        .filter_map(|msg| match msg {
            SessionMessage::Frame(frame) => frame.get(group, title).map(|v| v.text.clone()),
            _ => None,
        })
        .collect()
}

/// Write a CSV fixture and return its path
pub fn write_csv(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}
