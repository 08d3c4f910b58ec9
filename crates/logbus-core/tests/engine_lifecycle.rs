//! Engine lifecycle integration tests
//!
//! These tests drive a real engine through init/start/stop/pause/resume with
//! recording writers that keep every call they receive.

use std::sync::{Arc, Mutex};

use logbus_core::{
    Engine, EngineConfig, EngineEvent, EngineState, LogEntry, LogError, LogHandle, LogResult,
    LogWriter, WriterContext, WriterSpec,
};
use serde_json::{json, Value};
use tokio::sync::broadcast;

// ============================================================================
// Recorder writer
// ============================================================================

#[derive(Clone, Default)]
struct Recorder {
    calls: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    fn push(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn writes(&self, writer: &str) -> Vec<String> {
        let prefix = format!("{}:write:", writer);
        self.calls()
            .into_iter()
            .filter_map(|c| c.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }
}

struct RecordingWriter {
    name: String,
    recorder: Recorder,
    fail: bool,
    /// Fails only the write of this message
    fail_on: Option<String>,
    /// Logs "pong" back through the handle whenever it writes "ping"
    echo: Option<LogHandle>,
}

impl LogWriter for RecordingWriter {
    fn write(&mut self, message: &Value, entry: &LogEntry) -> LogResult<()> {
        if self.fail || self.fail_on.as_deref() == Some(entry.message.as_str()) {
            return Err(LogError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "recorder write failed",
            )));
        }
        let text = message.as_str().unwrap_or(&entry.message).to_string();
        if let Some(handle) = &self.echo {
            if entry.message == "ping" {
                handle.log("info", "pong");
            }
        }
        self.recorder.push(format!("{}:write:{}", self.name, text));
        Ok(())
    }

    fn flush(&mut self) -> LogResult<()> {
        self.recorder.push(format!("{}:flush", self.name));
        Ok(())
    }

    fn close(&mut self) -> LogResult<()> {
        self.recorder.push(format!("{}:close", self.name));
        Ok(())
    }
}

fn engine_with_recorder(recorder: &Recorder) -> Engine {
    let mut engine = Engine::new();
    let recorder = recorder.clone();
    engine
        .define_writer("recorder", move |ctx: &WriterContext| {
            if ctx.option("refuse").is_some() {
                return Err(LogError::Configuration(format!("{} refused", ctx.name)));
            }
            Ok(Box::new(RecordingWriter {
                name: ctx.name.clone(),
                recorder: recorder.clone(),
                fail: ctx.option("fail").is_some(),
                fail_on: ctx.option_str("fail_on").map(str::to_string),
                echo: ctx.option("echo").map(|_| ctx.handle.clone()),
            }) as Box<dyn LogWriter>)
        })
        .unwrap();
    engine
        .define_formatter("message", |entry: &LogEntry| json!(entry.message))
        .unwrap();
    engine
}

fn recorder_spec(name: &str) -> WriterSpec {
    WriterSpec::new(name, "recorder").formatter("message")
}

fn quiet() -> EngineConfig {
    EngineConfig::default().without_notices()
}

fn drain_kinds(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<&'static str> {
    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(event.kind());
    }
    kinds
}

fn history_messages(engine: &Engine) -> Vec<String> {
    engine
        .history()
        .iter()
        .map(|r| r["message"].as_str().unwrap_or_default().to_string())
        .collect()
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_single_info_entry_lands_in_history() {
    let mut engine = Engine::new();
    engine
        .init(
            quiet()
                .with_levels("info,error")
                .with_writer(WriterSpec::new("null", "null")),
        )
        .unwrap();
    engine.start().unwrap();

    engine.log("info", None, "Hello", vec![]).unwrap();

    let history = engine.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["level"], "INFO");
    assert_eq!(history[0]["message"], "Hello");
    assert_eq!(history[0]["args"], json!([]));
    assert_eq!(history[0]["system"], "engine_lifecycle");
}

#[test]
fn test_backlog_overflow_while_stopped() {
    let mut engine = Engine::new();
    engine
        .init(
            quiet()
                .with_backlog_limit(10)
                .with_writer(WriterSpec::new("null", "null")),
        )
        .unwrap();

    for n in 0..15 {
        engine.log("info", None, format!("message {}", n), vec![]).unwrap();
        assert!(engine.backlog_len().unwrap() <= 10);
    }
    assert_eq!(engine.backlog_len(), Some(10));

    engine.start().unwrap();
    let expected: Vec<String> = (5..15).map(|n| format!("message {}", n)).collect();
    assert_eq!(history_messages(&engine), expected);
}

#[test]
fn test_duplicate_writer_definition_keeps_first() {
    let recorder = Recorder::default();
    let mut engine = engine_with_recorder(&recorder);
    let err = engine
        .define_writer("Recorder", |_ctx: &WriterContext| {
            Err::<Box<dyn LogWriter>, _>(LogError::Configuration("never built".into()))
        })
        .unwrap_err();
    assert!(err.is_configuration());

    engine.init(quiet().with_writer(recorder_spec("p"))).unwrap();
    engine.start().unwrap();
    engine.log("warn", None, "still the first", vec![]).unwrap();
    assert_eq!(recorder.writes("p"), vec!["still the first"]);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_start_and_stop_are_idempotent() {
    let recorder = Recorder::default();
    let mut engine = engine_with_recorder(&recorder);
    engine.init(quiet().with_writer(recorder_spec("p"))).unwrap();
    let mut events = engine.subscribe_events();

    engine.stop().unwrap();
    assert!(drain_kinds(&mut events).is_empty());
    assert_eq!(engine.state(), EngineState::Configured);

    engine.start().unwrap();
    assert_eq!(drain_kinds(&mut events), vec!["started"]);
    engine.start().unwrap();
    assert!(drain_kinds(&mut events).is_empty());

    engine.stop().unwrap();
    engine.stop().unwrap();
    assert_eq!(drain_kinds(&mut events), vec!["stopped"]);
    assert_eq!(recorder.calls(), vec!["p:flush", "p:close"]);
}

#[test]
fn test_start_initializes_with_defaults() {
    let mut engine = Engine::new();
    let mut events = engine.subscribe_events();
    engine.start().unwrap();

    assert!(engine.is_initialized());
    let config = engine.config().unwrap();
    assert_eq!(config.writers.len(), 1);
    assert_eq!(config.writers[0].kind, "console");
    assert_eq!(config.writers[0].formatter, "text");

    // init notice, initialized, start notice, started
    let kinds = drain_kinds(&mut events);
    assert_eq!(kinds, vec!["log", "initialized", "log", "started"]);
    engine.stop().unwrap();
}

#[test]
fn test_pause_resume_round_trip() {
    let recorder = Recorder::default();
    let mut engine = engine_with_recorder(&recorder);
    engine.init(quiet().with_writer(recorder_spec("p"))).unwrap();
    engine.start().unwrap();

    engine.log("info", None, "before", vec![]).unwrap();
    engine.pause().unwrap();
    assert!(engine.is_paused());
    assert!(engine.is_running());
    for n in 0..3 {
        engine.log("info", None, format!("held {}", n), vec![]).unwrap();
    }
    assert_eq!(recorder.writes("p"), vec!["before"]);
    assert_eq!(engine.backlog_len(), Some(3));

    engine.resume().unwrap();
    assert_eq!(engine.backlog_len(), None);
    assert_eq!(
        recorder.writes("p"),
        vec!["before", "held 0", "held 1", "held 2"]
    );

    // resume without pause does nothing
    let mut events = engine.subscribe_events();
    engine.resume().unwrap();
    assert!(drain_kinds(&mut events).is_empty());
}

#[test]
fn test_pause_is_noop_when_stopped() {
    let mut engine = Engine::new();
    engine.init(quiet()).unwrap();
    let mut events = engine.subscribe_events();
    engine.pause().unwrap();
    assert_eq!(engine.state(), EngineState::Configured);
    assert!(drain_kinds(&mut events).is_empty());
}

#[test]
fn test_stop_flushes_then_closes_in_order() {
    let recorder = Recorder::default();
    let mut engine = engine_with_recorder(&recorder);
    engine
        .init(quiet().with_writer(recorder_spec("a")).with_writer(recorder_spec("b")))
        .unwrap();
    engine.start().unwrap();
    assert_eq!(engine.active_writers(), vec!["a", "b"]);
    engine.stop().unwrap();

    assert_eq!(
        recorder.calls(),
        vec!["a:flush", "a:close", "b:flush", "b:close"]
    );
    assert!(engine.active_writers().is_empty());

    // logging after stop buffers again
    engine.log("info", None, "buffered", vec![]).unwrap();
    assert_eq!(engine.backlog_len(), Some(1));
}

#[test]
fn test_notices_follow_lifecycle() {
    let mut engine = Engine::new();
    engine
        .init(
            EngineConfig::default()
                .with_notices_level("debug")
                .with_writer(WriterSpec::new("null", "null")),
        )
        .unwrap();
    engine.start().unwrap();
    engine.pause().unwrap();
    engine.resume().unwrap();

    assert_eq!(
        history_messages(&engine),
        vec![
            "Logbus initialized.",
            "Logbus started.",
            "Logbus paused.",
            "Logbus resumed."
        ]
    );
    assert!(engine.history().iter().all(|r| r["level"] == "DEBUG"));

    engine.stop().unwrap();
    assert_eq!(engine.backlog_len(), Some(1));
}

// ============================================================================
// Writers and dispatch
// ============================================================================

#[test]
fn test_unknown_writer_type_fails_start() {
    let mut engine = Engine::new();
    engine
        .init(quiet().with_writer(WriterSpec::new("x", "carrier-pigeon")))
        .unwrap();
    engine.log("info", None, "waiting", vec![]).unwrap();

    let err = engine.start().unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(engine.state(), EngineState::Configured);
    assert_eq!(engine.backlog_len(), Some(1));

    let mut engine = Engine::new();
    engine
        .init(quiet().with_writer(WriterSpec::new("x", "null").formatter("yaml")))
        .unwrap();
    assert!(engine.start().unwrap_err().is_configuration());
}

#[test]
fn test_failed_writer_construction_closes_built_writers() {
    let recorder = Recorder::default();
    let mut engine = engine_with_recorder(&recorder);
    engine
        .init(
            quiet()
                .with_writer(recorder_spec("first"))
                .with_writer(recorder_spec("second").option("refuse", true)),
        )
        .unwrap();

    let err = engine.start().unwrap_err();
    assert!(err.to_string().contains("second refused"));
    assert_eq!(recorder.calls(), vec!["first:close"]);
    assert!(!engine.is_running());
}

#[test]
fn test_level_filter_and_per_writer_formatter() {
    let recorder = Recorder::default();
    let mut engine = engine_with_recorder(&recorder);
    engine
        .define_formatter("shout", |entry: &LogEntry| {
            json!(entry.message.to_uppercase())
        })
        .unwrap();
    engine
        .init(
            quiet()
                .with_writer(recorder_spec("all"))
                .with_writer(WriterSpec::new("errors", "recorder").levels("error").formatter("shout")),
        )
        .unwrap();
    engine.start().unwrap();

    engine.log("info", None, "fine", vec![]).unwrap();
    engine.log("error", None, "broken", vec![]).unwrap();

    assert_eq!(recorder.writes("all"), vec!["fine", "broken"]);
    assert_eq!(recorder.writes("errors"), vec!["BROKEN"]);
    // history keeps the structured default record
    assert_eq!(engine.history()[1]["message"], "broken");
}

#[test]
fn test_failing_writer_aborts_rest_of_pass() {
    let recorder = Recorder::default();
    let mut engine = engine_with_recorder(&recorder);
    engine
        .init(
            quiet()
                .with_writer(recorder_spec("bad").option("fail", true))
                .with_writer(recorder_spec("good")),
        )
        .unwrap();
    engine.start().unwrap();

    let err = engine.log("info", None, "lost", vec![]).unwrap_err();
    assert!(matches!(err, LogError::Io(_)));
    assert!(recorder.writes("good").is_empty());
    assert!(engine.is_running());
}

#[test]
fn test_resume_delivers_whole_backlog_past_a_failing_entry() {
    let recorder = Recorder::default();
    let mut engine = engine_with_recorder(&recorder);
    engine
        .init(quiet().with_writer(recorder_spec("p").option("fail_on", "boom")))
        .unwrap();
    engine.start().unwrap();
    engine.pause().unwrap();
    for message in ["a", "boom", "c", "d"] {
        engine.log("info", None, message, vec![]).unwrap();
    }

    let err = engine.resume().unwrap_err();
    assert!(matches!(err, LogError::Io(_)));
    assert_eq!(engine.state(), EngineState::Running);
    assert_eq!(engine.backlog_len(), None);
    assert_eq!(recorder.writes("p"), vec!["a", "c", "d"]);
    assert_eq!(history_messages(&engine), vec!["a", "boom", "c", "d"]);
}

#[test]
fn test_start_delivers_whole_backlog_past_a_failing_entry() {
    let recorder = Recorder::default();
    let mut engine = engine_with_recorder(&recorder);
    engine
        .init(quiet().with_writer(recorder_spec("p").option("fail_on", "boom")))
        .unwrap();
    for message in ["a", "boom", "c"] {
        engine.log("info", None, message, vec![]).unwrap();
    }

    let err = engine.start().unwrap_err();
    assert!(matches!(err, LogError::Io(_)));
    assert!(engine.is_running());
    assert_eq!(recorder.writes("p"), vec!["a", "c"]);
    assert_eq!(history_messages(&engine), vec!["a", "boom", "c"]);

    // later calls are unaffected
    engine.log("info", None, "after", vec![]).unwrap();
    assert_eq!(recorder.writes("p"), vec!["a", "c", "after"]);
}

#[test]
fn test_writer_can_log_through_its_handle() {
    let recorder = Recorder::default();
    let mut engine = engine_with_recorder(&recorder);
    engine
        .init(quiet().with_writer(recorder_spec("p").option("echo", true)))
        .unwrap();
    engine.start().unwrap();

    engine.log("info", None, "ping", vec![]).unwrap();
    assert_eq!(recorder.writes("p"), vec!["ping", "pong"]);
    assert_eq!(history_messages(&engine), vec!["ping", "pong"]);
}

#[test]
fn test_history_limit_and_disable() {
    let mut engine = Engine::new();
    engine
        .init(
            quiet()
                .with_history(true, 3)
                .with_writer(WriterSpec::new("null", "null")),
        )
        .unwrap();
    engine.start().unwrap();
    for n in 0..5 {
        engine.log("debug", None, format!("m{}", n), vec![]).unwrap();
    }
    assert_eq!(engine.history_size_limit(), 3);
    assert_eq!(history_messages(&engine), vec!["m2", "m3", "m4"]);

    engine.clear_history();
    assert!(engine.history().is_empty());

    engine.stop().unwrap();
    engine
        .init(
            quiet()
                .with_history(false, 3)
                .with_writer(WriterSpec::new("null", "null")),
        )
        .unwrap();
    engine.start().unwrap();
    engine.log("debug", None, "unrecorded", vec![]).unwrap();
    assert!(engine.history().is_empty());
}

#[test]
fn test_reconfigure_levels_after_stop() {
    let mut engine = Engine::new();
    engine
        .init(quiet().with_writer(WriterSpec::new("null", "null")))
        .unwrap();
    engine.start().unwrap();
    assert!(engine.shortcut("access").is_some());
    engine.stop().unwrap();

    engine
        .init(
            quiet()
                .with_levels(vec!["audit", "alert"])
                .with_writer(WriterSpec::new("null", "null")),
        )
        .unwrap();
    assert!(engine.shortcut("access").is_none());
    assert_eq!(engine.level_names(), vec!["AUDIT", "ALERT"]);
    assert!(engine.get_level("Audit").is_some());

    let err = engine
        .init(quiet().with_levels("info,log"))
        .unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(engine.level_names(), vec!["AUDIT", "ALERT"]);
}

#[test]
fn test_log_event_carries_entry() {
    let mut engine = Engine::new();
    engine
        .init(quiet().with_writer(WriterSpec::new("null", "null")))
        .unwrap();
    engine.start().unwrap();
    let mut events = engine.subscribe_events();

    engine
        .log("warn", Some("db pool"), "slow", vec![json!(812)])
        .unwrap();
    let event = events.try_recv().unwrap();
    let entry = event.entry().unwrap();
    assert_eq!(entry.level.name(), "WARN");
    assert_eq!(entry.system, "dbpool");
    assert_eq!(entry.args, vec![json!(812)]);
}

#[test]
fn test_define_emits_events() {
    let mut engine = Engine::empty();
    let mut events = engine.subscribe_events();
    engine
        .define_formatter("Plain", |entry: &LogEntry| json!(entry.message))
        .unwrap();
    match events.try_recv().unwrap() {
        EngineEvent::FormatterAdded(name) => assert_eq!(name, "plain"),
        other => panic!("unexpected event {}", other),
    }
    assert_eq!(engine.defined_formatters(), vec!["plain"]);
}
