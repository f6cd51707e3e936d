//! Tests for the command table and handlers

use flowcast_protocol::{WireFormat, WireVersion};

use super::*;
use crate::manager::{OutputConfig, OutputManager};
use crate::session::{SessionLimits, SessionState};
use crate::test_support::MockSink;

fn session(channel: Channel) -> ClientSession {
    let sink = MockSink::new();
    let mut session = ClientSession::new(
        3,
        sink.boxed(),
        WireFormat::Native(WireVersion::V5),
        SessionLimits::default(),
    );
    if channel == Channel::Control {
        session = session.without_start();
    }
    session.activate();
    session
}

fn stats() -> OutputStats {
    OutputManager::new(Channel::Data, OutputConfig::default()).stats()
}

// ============================================================================
// Parsing
// ============================================================================

#[test]
fn test_parse_bare_keywords() {
    assert_eq!(Command::parse("START:"), Command::Start);
    assert_eq!(Command::parse("DONE:"), Command::Done);
    assert_eq!(Command::parse("MAR"), Command::Mar);
    assert_eq!(Command::parse("STATUS:"), Command::Status);
}

#[test]
fn test_parse_is_case_insensitive() {
    assert_eq!(Command::parse("start:"), Command::Start);
    assert_eq!(Command::parse("Status"), Command::Status);
}

#[test]
fn test_parse_arguments() {
    assert_eq!(
        Command::parse("FILTER: tcp and port 80"),
        Command::Filter("tcp and port 80".into())
    );
    assert_eq!(Command::parse("DISPLAY flows"), Command::Display("flows".into()));
    assert_eq!(Command::parse("highlight:10.0.0.1"), Command::Highlight("10.0.0.1".into()));
    assert_eq!(Command::parse("SEARCH:"), Command::Search(String::new()));
    assert_eq!(Command::parse("  TREE: proto  "), Command::Tree("proto".into()));
}

#[test]
fn test_parse_requires_word_boundary() {
    assert_eq!(Command::parse("STARTX"), Command::Unknown("STARTX".into()));
    assert_eq!(Command::parse("MARS:"), Command::Unknown("MARS:".into()));
}

#[test]
fn test_parse_unknown() {
    assert_eq!(Command::parse("HELLO: world"), Command::Unknown("HELLO: world".into()));
    assert_eq!(Command::parse(""), Command::Unknown(String::new()));
    assert_eq!(Command::parse("ST"), Command::Unknown("ST".into()));
}

#[test]
fn test_command_names() {
    assert_eq!(Command::Filter(String::new()).name(), "FILTER");
    assert_eq!(Command::Unknown("x".into()).name(), "UNKNOWN");
}

// ============================================================================
// Replies
// ============================================================================

#[test]
fn test_reply_encode_ok() {
    assert_eq!(Reply::ok().encode().as_ref(), b"OK\n");

    let reply = Reply::ok().with_lines(vec!["a 1".into(), "b 2".into()]);
    assert_eq!(reply.encode().as_ref(), b"a 1\nb 2\nOK\n");
}

#[test]
fn test_reply_encode_for_data_is_bare() {
    let reply = Reply::ok().with_lines(vec!["ignored".into()]);
    assert_eq!(reply.encode_for(Channel::Data).as_ref(), b"OK");
    assert_eq!(reply.encode_for(Channel::Control).as_ref(), b"ignored\nOK\n");
}

#[test]
fn test_reply_encode_ko() {
    let reply = Reply::ko("unknown command");
    assert_eq!(reply.ack(), &Ack::Ko("unknown command".into()));
    assert_eq!(reply.encode().as_ref(), b"KO unknown command\n");
}

// ============================================================================
// Data channel
// ============================================================================

#[test]
fn test_data_start_and_done_are_silent() {
    let mut session = session(Channel::Data);
    let stats = stats();

    assert!(!session.accepts_records());
    assert_eq!(execute(Command::Start, Channel::Data, &mut session, &stats), None);
    assert!(session.accepts_records());

    assert_eq!(execute(Command::Done, Channel::Data, &mut session, &stats), None);
    assert_eq!(session.state(), SessionState::Closing);
    assert_eq!(session.close_reason(), Some(CloseReason::PeerDone));
}

#[test]
fn test_data_filter_acks() {
    let mut session = session(Channel::Data);
    let stats = stats();

    let reply = execute(Command::Filter("udp".into()), Channel::Data, &mut session, &stats);
    assert_eq!(reply, Some(Reply::ok()));
    assert_eq!(session.filter().map(|f| f.expression()), Some("udp"));

    execute(Command::Filter(String::new()), Channel::Data, &mut session, &stats);
    assert!(session.filter().is_none());
}

#[test]
fn test_data_bad_filter_closes_session() {
    let mut session = session(Channel::Data);
    let stats = stats();

    let reply = execute(Command::Filter("bogus ((".into()), Channel::Data, &mut session, &stats);
    assert_eq!(reply, None);
    assert_eq!(session.state(), SessionState::Closing);
    assert_eq!(session.close_reason(), Some(CloseReason::BadFilter));
}

#[test]
fn test_control_bad_filter_is_ko() {
    let mut session = session(Channel::Control);
    let stats = stats();

    let reply = execute(Command::Filter("udp".into()), Channel::Control, &mut session, &stats);
    assert_eq!(reply, Some(Reply::ok()));

    let reply = execute(Command::Filter("bogus".into()), Channel::Control, &mut session, &stats);
    assert!(matches!(reply.unwrap().ack(), Ack::Ko(_)));
    // previous filter kept
    assert!(session.filter().is_some());
    assert_eq!(session.state(), SessionState::Streaming);
}

#[test]
fn test_data_ignores_control_commands() {
    let mut session = session(Channel::Data);
    let stats = stats();

    assert_eq!(execute(Command::Status, Channel::Data, &mut session, &stats), None);
    assert_eq!(execute(Command::Display("x".into()), Channel::Data, &mut session, &stats), None);
    assert_eq!(session.control().display, None);
}

// ============================================================================
// Control channel
// ============================================================================

#[test]
fn test_control_settings_echo_and_clear() {
    let mut session = session(Channel::Control);
    let stats = stats();

    let reply = execute(Command::Display("flows".into()), Channel::Control, &mut session, &stats)
        .unwrap();
    assert_eq!(reply.lines(), ["DISPLAY: flows".to_string()]);
    assert_eq!(reply.ack(), &Ack::Ok);
    assert_eq!(session.control().display.as_deref(), Some("flows"));

    execute(Command::Highlight("10.0.0.1".into()), Channel::Control, &mut session, &stats);
    execute(Command::Search("port 80".into()), Channel::Control, &mut session, &stats);
    execute(Command::Tree("proto".into()), Channel::Control, &mut session, &stats);
    assert_eq!(session.control().highlight.as_deref(), Some("10.0.0.1"));
    assert_eq!(session.control().search.as_deref(), Some("port 80"));
    assert_eq!(session.control().tree.as_deref(), Some("proto"));

    let reply = execute(Command::Display(String::new()), Channel::Control, &mut session, &stats)
        .unwrap();
    assert!(reply.lines().is_empty());
    assert_eq!(session.control().display, None);
}

#[test]
fn test_control_start_done_ack() {
    let mut session = session(Channel::Control);
    let stats = stats();

    assert_eq!(
        execute(Command::Start, Channel::Control, &mut session, &stats),
        Some(Reply::ok())
    );
    assert_eq!(
        execute(Command::Done, Channel::Control, &mut session, &stats),
        Some(Reply::ok())
    );
    assert_eq!(session.state(), SessionState::Closing);
}

#[test]
fn test_control_mar_and_status_report_stats() {
    let mut session = session(Channel::Control);
    let stats = stats();

    let mar = execute(Command::Mar, Channel::Control, &mut session, &stats).unwrap();
    assert_eq!(mar.lines().len(), 1);
    assert!(mar.lines()[0].starts_with("MAR seq 0"));

    let status = execute(Command::Status, Channel::Control, &mut session, &stats).unwrap();
    assert_eq!(status.lines()[0], "channel data");
    assert!(status.lines().iter().any(|l| l == "clients 0"));
    assert_eq!(status.ack(), &Ack::Ok);
}

#[test]
fn test_control_unknown_is_ko() {
    let mut session = session(Channel::Control);
    let stats = stats();

    let reply = execute(Command::Unknown("HELLO".into()), Channel::Control, &mut session, &stats)
        .unwrap();
    assert_eq!(reply.encode().as_ref(), b"KO unknown command\n");
    assert!(session.state().is_open());
}
