#![allow(dead_code)]

use indexmap::IndexMap;
use tokio::sync::mpsc::UnboundedReceiver;

use sandpit_bundler::{CompileRequest, OutboundMessage, Status};

pub fn request(files: &[(&str, &str)], template: &str) -> CompileRequest {
    CompileRequest {
        files: files
            .iter()
            .map(|(path, code)| (path.to_string(), code.to_string()))
            .collect::<IndexMap<String, String>>(),
        template: template.to_string(),
        ..Default::default()
    }
}

pub fn drain(rx: &mut UnboundedReceiver<OutboundMessage>) -> Vec<OutboundMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    messages
}

/// `(method, joined args)` pairs of every console log in the stream.
pub fn console_logs(messages: &[OutboundMessage]) -> Vec<(String, String)> {
    messages
        .iter()
        .filter_map(|message| match message {
            OutboundMessage::Console { log: Some(log), .. } => {
                Some((log.method.clone(), log.args.join(" ")))
            }
            _ => None,
        })
        .collect()
}

pub fn log_lines(messages: &[OutboundMessage]) -> Vec<String> {
    console_logs(messages)
        .into_iter()
        .map(|(_, line)| line)
        .collect()
}

pub fn statuses(messages: &[OutboundMessage]) -> Vec<Status> {
    messages
        .iter()
        .filter_map(|message| match message {
            OutboundMessage::Status { status } => Some(*status),
            _ => None,
        })
        .collect()
}

fn status_rank(status: Status) -> u8 {
    match status {
        Status::Initializing => 0,
        Status::InstallingDependencies => 1,
        Status::Transpiling => 2,
        Status::Evaluating => 3,
        Status::Done => 4,
        Status::Error => 5,
    }
}

/// Status events are monotonic across a single compile request.
pub fn assert_statuses_monotonic(messages: &[OutboundMessage]) {
    let observed = statuses(messages);
    let mut last = 0u8;
    for status in observed {
        let rank = status_rank(status);
        assert!(
            rank >= last,
            "status went backwards: {status:?} after rank {last}"
        );
        last = rank;
    }
}

pub fn has_refresh(messages: &[OutboundMessage]) -> bool {
    messages
        .iter()
        .any(|message| matches!(message, OutboundMessage::Refresh))
}

pub fn done_flags(messages: &[OutboundMessage]) -> Vec<bool> {
    messages
        .iter()
        .filter_map(|message| match message {
            OutboundMessage::Done { compilaton_error } => Some(*compilaton_error),
            _ => None,
        })
        .collect()
}
