// End-to-end tests for dispatch, chaining and scheduling
use crate::{
    config::EngineConfig,
    document::{DocumentTree, InMemoryDocument, NodeId},
    engine::{
        CommandContext, CommandEngine, CommandEvent, CommandEventKind, CommandMiddleware,
        DispatchOutcome, InvokeEvent,
    },
    models::{CommandState, ExecutionError, ExecutionResult},
    InvokerError,
};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_test::{assert_err, assert_ok};

// Test helpers
fn setup() -> (Arc<InMemoryDocument>, CommandEngine) {
    setup_with(EngineConfig::default())
}

fn setup_with(config: EngineConfig) -> (Arc<InMemoryDocument>, CommandEngine) {
    let document = Arc::new(InMemoryDocument::new());
    let engine = CommandEngine::with_config(document.clone(), config);
    engine.register_fn("--noop", |_| Ok(()));
    engine.register_fn("--fail", |_| anyhow::bail!("failed on purpose"));
    (document, engine)
}

fn element(document: &InMemoryDocument, parent: NodeId, tag: &str, attributes: &[(&str, &str)]) -> NodeId {
    document.append_element(parent, tag, attributes).unwrap()
}

fn counter(engine: &CommandEngine, name: &str) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let handle = count.clone();
    engine.register_fn(name, move |_| {
        handle.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    count
}

fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

fn drain(events: &mut broadcast::Receiver<CommandEvent>) -> Vec<CommandEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

fn rejections(events: &[CommandEvent], reason: &str) -> usize {
    events
        .iter()
        .filter(|event| {
            matches!(&event.kind, CommandEventKind::Rejected { reason: r } if r == reason)
        })
        .count()
}

#[tokio::test]
async fn test_set_text_then_add_class_on_success() {
    let (document, engine) = setup();
    engine.register_fn("--set-text", |ctx| {
        ctx.document()
            .set_text_content(ctx.target(), &ctx.params().join(":"))?;
        Ok(())
    });
    engine.register_fn("--add-class", |ctx| {
        let class = ctx.param(0).unwrap_or("active");
        ctx.document().add_class(ctx.target(), class)?;
        Ok(())
    });

    let root = document.root();
    let button = element(
        &document,
        root,
        "button",
        &[
            ("command", "--set-text:hello"),
            ("commandfor", "out"),
            ("data-after-success", "--add-class:done"),
        ],
    );
    let out = element(&document, root, "output", &[("id", "out")]);
    let mut events = engine.subscribe();

    let event = InvokeEvent::new("--set-text:hello").with_source(button);
    let result = engine.dispatch(&event).await.unwrap();
    engine.wait_for_idle().await;

    assert!(result.success);
    assert!(event.default_prevented());
    assert_eq!(document.text_content(out).as_deref(), Some("hello"));
    assert!(document.has_class(out, "done"));

    let first = events.recv().await.unwrap();
    assert_eq!(first.command, "--set-text:hello");
    assert!(!first.chained);
    let second = events.recv().await.unwrap();
    assert_eq!(second.command, "--add-class:done");
    assert!(second.chained);
    assert_eq!(
        second.kind,
        CommandEventKind::Executed {
            success: true,
            error: None
        }
    );
}

#[tokio::test]
async fn test_longest_registered_prefix_wins() {
    let (document, engine) = setup();
    let log = Arc::new(Mutex::new(Vec::new()));

    for name in ["--dom", "--dom:remove"] {
        let sink = log.clone();
        engine.register_fn(name, move |ctx| {
            sink.lock()
                .unwrap()
                .push(format!("{} {:?}", ctx.name(), ctx.params()));
            Ok(())
        });
    }
    element(&document, document.root(), "div", &[("id", "box")]);

    engine.execute_command("--dom:remove:extra", "box", None).await.unwrap();
    engine.execute_command("--dom:other", "box", None).await.unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "--dom:remove [\"extra\"]".to_string(),
            "--dom [\"other\"]".to_string()
        ]
    );
}

#[tokio::test]
async fn test_empty_and_unknown_commands_are_rejected() {
    let (document, engine) = setup();
    counter(&engine, "--toggle");
    let button = element(&document, document.root(), "button", &[("commandfor", "box")]);
    element(&document, document.root(), "div", &[("id", "box")]);

    assert!(matches!(
        engine.execute_command("   ", "box", None).await,
        Err(InvokerError::EmptyCommand)
    ));

    match engine.execute_command("--tggle", "box", None).await {
        Err(InvokerError::UnknownCommand { suggestions, .. }) => {
            assert_eq!(suggestions, vec!["--toggle".to_string()]);
        }
        other => panic!("expected unknown command, got {other:?}"),
    }

    let event = InvokeEvent::new("--tggle").with_source(button);
    assert!(engine.dispatch(&event).await.is_none());
    assert!(!event.default_prevented());
}

#[tokio::test]
async fn test_missing_target_fails_without_running() {
    let (document, engine) = setup();
    let ran = counter(&engine, "--count");
    let button = element(&document, document.root(), "button", &[("commandfor", "missing")]);

    let result = engine
        .dispatch(&InvokeEvent::new("--count").with_source(button))
        .await
        .unwrap();

    assert!(!result.success);
    assert!(matches!(result.error, Some(ExecutionError::Invalid(_))));
    assert_eq!(count(&ran), 0);

    let err = assert_err!(engine.execute_command("--count", "missing", None).await);
    assert!(matches!(err, InvokerError::TargetNotFound(_)));
}

#[tokio::test]
async fn test_once_invoker_runs_exactly_once() {
    let (document, engine) = setup();
    let ran = counter(&engine, "--count");
    let root = document.root();
    let button = element(
        &document,
        root,
        "button",
        &[("commandfor", "box"), ("data-state", "once")],
    );
    element(&document, root, "div", &[("id", "box")]);

    let first = engine
        .dispatch(&InvokeEvent::new("--count").with_source(button))
        .await;
    let second = engine
        .dispatch(&InvokeEvent::new("--count").with_source(button))
        .await;

    assert!(first.unwrap().success);
    assert!(second.is_none());
    assert_eq!(count(&ran), 1);
    assert_eq!(engine.command_state("--count", "box"), CommandState::Completed);

    // completed outranks a later override on the invoker
    document.set_attribute(button, "data-state", "active").unwrap();
    assert!(engine
        .dispatch(&InvokeEvent::new("--count").with_source(button))
        .await
        .is_none());
    assert!(!engine.set_command_state("--count", "box", CommandState::Active));

    engine.clear_command_state("--count", "box");
    assert!(engine
        .dispatch(&InvokeEvent::new("--count").with_source(button))
        .await
        .is_some());
    assert_eq!(count(&ran), 2);
}

#[tokio::test]
async fn test_failed_once_stays_eligible() {
    let (document, engine) = setup();
    element(&document, document.root(), "div", &[("id", "box")]);

    engine.set_command_state("--fail", "box", CommandState::Once);
    let outcome = engine.execute_command("--fail", "box", None).await.unwrap();

    assert!(!outcome.result().unwrap().success);
    assert_eq!(engine.command_state("--fail", "box"), CommandState::Once);
}

#[tokio::test]
async fn test_disabled_blocks_direct_and_scheduled() {
    let (document, engine) = setup();
    let ran = counter(&engine, "--count");
    let root = document.root();
    let button = element(
        &document,
        root,
        "button",
        &[("commandfor", "box"), ("data-and-then", "--count")],
    );
    element(&document, root, "div", &[("id", "box")]);

    assert!(engine.set_command_state("--count", "box", CommandState::Disabled));

    let outcome = engine.execute_command("--count", "box", None).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Skipped(CommandState::Disabled));

    engine
        .dispatch(&InvokeEvent::new("--noop").with_source(button))
        .await
        .unwrap();
    engine.wait_for_idle().await;
    assert_eq!(count(&ran), 0);

    engine.clear_command_state("--count", "box");
    engine.execute_command("--count", "box", None).await.unwrap();
    assert_eq!(count(&ran), 1);
}

#[tokio::test]
async fn test_invoker_state_override() {
    let (document, engine) = setup();
    let ran = counter(&engine, "--count");
    let root = document.root();
    let button = element(
        &document,
        root,
        "button",
        &[("commandfor", "box"), ("data-state", "disabled")],
    );
    element(&document, root, "div", &[("id", "box")]);

    let result = engine
        .dispatch(&InvokeEvent::new("--count").with_source(button))
        .await;
    assert!(result.is_none());
    assert_eq!(count(&ran), 0);
    // the override is not persisted
    assert_eq!(engine.command_state("--count", "box"), CommandState::Active);
}

#[tokio::test]
async fn test_attribute_chain_follows_outcome() {
    let (document, engine) = setup();
    let then = counter(&engine, "--then");
    let ok = counter(&engine, "--ok");
    let bad = counter(&engine, "--bad");
    let done = counter(&engine, "--done");
    let root = document.root();
    element(&document, root, "div", &[("id", "box")]);

    let chain = [
        ("commandfor", "box"),
        ("data-and-then", "--then"),
        ("data-after-success", "--ok"),
        ("data-after-error", "--bad"),
        ("data-after-complete", "--done"),
    ];
    let passing = element(&document, root, "button", &chain);
    let failing = element(&document, root, "button", &chain);

    engine
        .dispatch(&InvokeEvent::new("--noop").with_source(passing))
        .await;
    engine.wait_for_idle().await;
    assert_eq!((count(&then), count(&ok), count(&bad), count(&done)), (1, 1, 0, 1));

    engine
        .dispatch(&InvokeEvent::new("--fail").with_source(failing))
        .await;
    engine.wait_for_idle().await;
    assert_eq!((count(&then), count(&ok), count(&bad), count(&done)), (2, 1, 1, 2));
}

#[tokio::test]
async fn test_follow_up_target_and_once_state() {
    let (document, engine) = setup();
    let root = document.root();
    let other = element(&document, root, "div", &[("id", "other")]);
    element(&document, root, "div", &[("id", "box")]);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    engine.register_fn("--mark", move |ctx| {
        sink.lock().unwrap().push(ctx.target());
        Ok(())
    });

    let button = element(
        &document,
        root,
        "button",
        &[
            ("commandfor", "box"),
            ("data-and-then", "--mark"),
            ("data-then-target", "other"),
            ("data-then-state", "once"),
        ],
    );

    for _ in 0..3 {
        engine
            .dispatch(&InvokeEvent::new("--noop").with_source(button))
            .await;
    }
    engine.wait_for_idle().await;

    assert_eq!(*seen.lock().unwrap(), vec![other]);
    assert_eq!(engine.command_state("--mark", "other"), CommandState::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_follow_ups_run_serially_in_order() {
    let (document, engine) = setup();
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    engine.register("--slow", move |ctx| {
        let sink = sink.clone();
        async move {
            let label = ctx.param(0).unwrap_or_default().to_string();
            sink.lock().unwrap().push(format!("{label}:start"));
            tokio::time::sleep(Duration::from_millis(10)).await;
            sink.lock().unwrap().push(format!("{label}:end"));
            Ok::<(), anyhow::Error>(())
        }
    });

    let root = document.root();
    element(&document, root, "div", &[("id", "box")]);
    let first = element(
        &document,
        root,
        "button",
        &[("commandfor", "box"), ("data-and-then", "--slow:a1, --slow:a2")],
    );
    let second = element(
        &document,
        root,
        "button",
        &[("commandfor", "box"), ("data-and-then", "--slow:b1, --slow:b2")],
    );

    engine
        .dispatch(&InvokeEvent::new("--noop").with_source(first))
        .await;
    engine
        .dispatch(&InvokeEvent::new("--noop").with_source(second))
        .await;
    engine.wait_for_idle().await;

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "a1:start", "a1:end", "a2:start", "a2:end", "b1:start", "b1:end", "b2:start", "b2:end"
        ]
    );
}

#[tokio::test]
async fn test_declarative_chain_conditions() {
    let (document, engine) = setup();
    let on_error = counter(&engine, "--on-error");
    let on_success = counter(&engine, "--on-success");
    let always = counter(&engine, "--always");
    let unknown = counter(&engine, "--unknown");
    let root = document.root();
    element(&document, root, "div", &[("id", "box")]);
    let button = element(&document, root, "button", &[("commandfor", "box")]);

    element(&document, button, "and-then", &[("command", "--on-error"), ("data-condition", "error")]);
    element(&document, button, "and-then", &[("command", "--on-success"), ("data-condition", "success")]);
    element(&document, button, "and-then", &[("command", "--always")]);
    element(&document, button, "and-then", &[("command", "--unknown"), ("data-condition", "sometimes")]);

    engine
        .dispatch(&InvokeEvent::new("--fail").with_source(button))
        .await;

    assert_eq!(count(&on_error), 1);
    assert_eq!(count(&on_success), 0);
    assert_eq!(count(&always), 1);
    assert_eq!(count(&unknown), 0);
}

#[tokio::test]
async fn test_nested_chain_uses_own_result() {
    let (document, engine) = setup();
    let recovered = counter(&engine, "--recovered");
    let root = document.root();
    element(&document, root, "div", &[("id", "box")]);
    let button = element(&document, root, "button", &[("commandfor", "box")]);

    let failing = element(&document, button, "and-then", &[("command", "--fail")]);
    element(&document, failing, "and-then", &[("command", "--recovered"), ("data-condition", "error")]);

    engine
        .dispatch(&InvokeEvent::new("--noop").with_source(button))
        .await;

    assert_eq!(count(&recovered), 1);
}

#[tokio::test]
async fn test_chain_depth_is_bounded() {
    let (document, engine) = setup();
    let ran = counter(&engine, "--count");
    let root = document.root();
    element(&document, root, "div", &[("id", "box")]);
    let button = element(&document, root, "button", &[("commandfor", "box")]);

    let mut parent = button;
    for _ in 0..30 {
        parent = element(&document, parent, "and-then", &[("command", "--count")]);
    }
    let mut events = engine.subscribe();

    engine
        .dispatch(&InvokeEvent::new("--noop").with_source(button))
        .await;

    assert_eq!(count(&ran), 25);
    let events = drain(&mut events);
    assert_eq!(rejections(&events, "chain depth exceeded"), 1);
    let rejected = events.last().unwrap();
    assert_eq!(rejected.command, "--count");
    assert!(rejected.chained);
}

#[tokio::test]
async fn test_chain_node_lifecycle() {
    let (document, engine) = setup();
    let ran = counter(&engine, "--count");
    let root = document.root();
    element(&document, root, "div", &[("id", "box")]);
    let button = element(&document, root, "button", &[("commandfor", "box")]);
    let single = element(&document, button, "and-then", &[("command", "--count"), ("data-once", "true")]);
    let repeat = element(&document, button, "and-then", &[("command", "--count")]);

    engine
        .dispatch(&InvokeEvent::new("--noop").with_source(button))
        .await;
    assert_eq!(count(&ran), 2);
    assert!(!document.is_connected(single));
    assert_eq!(document.attribute(repeat, "data-state").as_deref(), Some("completed"));

    engine
        .dispatch(&InvokeEvent::new("--noop").with_source(button))
        .await;
    assert_eq!(count(&ran), 2);
}

#[tokio::test(start_paused = true)]
async fn test_delayed_chain_node_does_not_block_siblings() {
    let (document, engine) = setup();
    let delayed = counter(&engine, "--delayed");
    let immediate = counter(&engine, "--immediate");
    let root = document.root();
    element(&document, root, "div", &[("id", "box")]);
    let button = element(&document, root, "button", &[("commandfor", "box")]);
    element(&document, button, "and-then", &[("command", "--delayed"), ("data-delay", "500ms")]);
    element(&document, button, "and-then", &[("command", "--immediate")]);

    engine
        .dispatch(&InvokeEvent::new("--noop").with_source(button))
        .await;
    assert_eq!(count(&immediate), 1);
    assert_eq!(count(&delayed), 0);

    engine.wait_for_idle().await;
    assert_eq!(count(&delayed), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_trips_at_ceiling() {
    let (document, engine) = setup();
    let ran = counter(&engine, "--count");
    element(&document, document.root(), "div", &[("id", "box")]);
    let mut events = engine.subscribe();

    let mut limited = 0;
    for _ in 0..150 {
        match engine.execute_command("--count", "box", None).await {
            Ok(_) => {}
            Err(InvokerError::RateLimited { .. }) => limited += 1,
            Err(err) => panic!("unexpected error: {err}"),
        }
    }

    assert_eq!(count(&ran), 100);
    assert_eq!(limited, 50);
    assert_eq!(engine.stats().executions, 100);
    assert_eq!(rejections(&drain(&mut events), "rate limit exceeded"), 50);

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_ok!(engine.execute_command("--count", "box", None).await);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_becomes_failure_and_chains() {
    let config = EngineConfig::default().with_command_timeout(Duration::from_millis(50));
    let (document, engine) = setup_with(config);
    let handled = counter(&engine, "--handled");
    engine.register("--hang", |_ctx| async {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok::<(), anyhow::Error>(())
    });
    let root = document.root();
    element(&document, root, "div", &[("id", "box")]);
    let button = element(
        &document,
        root,
        "button",
        &[("commandfor", "box"), ("data-after-error", "--handled")],
    );

    let result = engine
        .dispatch(&InvokeEvent::new("--hang").with_source(button))
        .await
        .unwrap();
    engine.wait_for_idle().await;

    assert_eq!(result.error, Some(ExecutionError::TimedOut(Duration::from_millis(50))));
    assert_eq!(count(&handled), 1);
}

#[tokio::test]
async fn test_panicking_action_is_captured() {
    let (document, engine) = setup();
    engine.register_fn("--boom", |_| -> anyhow::Result<()> { panic!("kaboom") });
    element(&document, document.root(), "div", &[("id", "box")]);

    let outcome = engine.execute_command("--boom", "box", None).await.unwrap();
    match outcome.result().and_then(|result| result.error.clone()) {
        Some(ExecutionError::Panicked(message)) => assert!(message.contains("kaboom")),
        other => panic!("expected captured panic, got {other:?}"),
    }

    // the engine keeps working afterwards
    assert!(engine
        .execute_command("--noop", "box", None)
        .await
        .unwrap()
        .result()
        .unwrap()
        .success);
}

#[tokio::test(start_paused = true)]
async fn test_failure_degrades_invoker() {
    let (document, engine) = setup();
    let root = document.root();
    element(&document, root, "div", &[("id", "box")]);
    let button = element(
        &document,
        root,
        "button",
        &[
            ("commandfor", "box"),
            ("aria-pressed", "maybe"),
            ("aria-expanded", "true"),
            ("disabled", ""),
        ],
    );

    engine
        .dispatch(&InvokeEvent::new("--fail").with_source(button))
        .await;

    assert_eq!(document.attribute(button, "aria-pressed").as_deref(), Some("false"));
    assert_eq!(document.attribute(button, "aria-expanded").as_deref(), Some("true"));
    assert!(document.has_attribute(button, "disabled"));

    engine.wait_for_idle().await;
    assert!(!document.has_attribute(button, "disabled"));
}

#[tokio::test]
async fn test_actions_can_manage_group_state() {
    let (document, engine) = setup();
    engine.register_fn("--expand", |ctx| {
        ctx.manage_group_state()?;
        Ok(())
    });
    let root = document.root();
    element(&document, root, "section", &[("id", "panel")]);
    let tabs: Vec<NodeId> = (0..3)
        .map(|_| {
            element(
                &document,
                root,
                "button",
                &[("commandfor", "panel"), ("data-group", "tabs"), ("aria-expanded", "true")],
            )
        })
        .collect();

    engine
        .dispatch(&InvokeEvent::new("--expand").with_source(tabs[1]))
        .await;

    let expanded: Vec<Option<String>> = tabs
        .iter()
        .map(|tab| document.attribute(*tab, "aria-expanded"))
        .collect();
    assert_eq!(
        expanded,
        vec![
            Some("false".to_string()),
            Some("true".to_string()),
            Some("false".to_string())
        ]
    );
}

#[test]
fn test_native_keywords_cannot_be_registered() {
    let document = Arc::new(InMemoryDocument::new());
    let engine = CommandEngine::new(document);

    assert!(!engine.register_fn("show-modal", |_| Ok(())));
    assert!(!engine.register_fn("  ", |_| Ok(())));
    assert!(engine.register_fn("toggle", |_| Ok(())));
    assert_eq!(engine.registered_commands(), vec!["--toggle".to_string()]);

    engine.reset();
    assert!(engine.registered_commands().is_empty());
}

struct Guard {
    blocked: &'static str,
    seen: Mutex<Vec<(String, bool)>>,
}

#[async_trait::async_trait]
impl CommandMiddleware for Guard {
    async fn before(&self, context: &CommandContext) -> anyhow::Result<()> {
        if context.name().as_str() == self.blocked {
            anyhow::bail!("{} is blocked", self.blocked);
        }
        Ok(())
    }

    async fn after(&self, context: &CommandContext, result: &ExecutionResult) {
        self.seen
            .lock()
            .unwrap()
            .push((context.command().to_string(), result.success));
    }
}

#[tokio::test]
async fn test_middleware_wraps_actions() {
    let (document, engine) = setup();
    let blocked = counter(&engine, "--blocked");
    let fallback = counter(&engine, "--fallback");
    let guard = Arc::new(Guard {
        blocked: "--blocked",
        seen: Mutex::new(Vec::new()),
    });
    engine.add_middleware(guard.clone());

    let root = document.root();
    element(&document, root, "div", &[("id", "box")]);
    let button = element(
        &document,
        root,
        "button",
        &[("commandfor", "box"), ("data-after-error", "--fallback")],
    );

    let result = engine
        .dispatch(&InvokeEvent::new("--blocked").with_source(button))
        .await
        .unwrap();
    engine.wait_for_idle().await;

    assert!(!result.success);
    assert_eq!(count(&blocked), 0);
    assert_eq!(count(&fallback), 1);
    assert_eq!(
        *guard.seen.lock().unwrap(),
        vec![("--blocked".to_string(), false), ("--fallback".to_string(), true)]
    );
}

#[tokio::test]
async fn test_chain_node_target_precedence() {
    let (document, engine) = setup();
    let root = document.root();
    let boxed = element(&document, root, "div", &[("id", "box")]);
    let other = element(&document, root, "div", &[("id", "other")]);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    engine.register_fn("--mark", move |ctx| {
        sink.lock().unwrap().push(ctx.target());
        Ok(())
    });

    // own target first, then the invoker's target at any depth
    let button = element(&document, root, "button", &[("commandfor", "box")]);
    let own = element(&document, button, "and-then", &[("command", "--mark"), ("commandfor", "other")]);
    element(&document, own, "and-then", &[("command", "--mark")]);

    engine
        .dispatch(&InvokeEvent::new("--noop").with_source(button))
        .await;
    assert_eq!(*seen.lock().unwrap(), vec![other, boxed]);

    // an invoker without a target falls back to the primary target
    seen.lock().unwrap().clear();
    let bare = element(&document, root, "button", &[]);
    element(&document, bare, "and-then", &[("command", "--mark")]);

    engine.execute_command("--noop", "box", Some(bare)).await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![boxed]);
}

#[tokio::test]
async fn test_failing_chain_node_does_not_stop_siblings() {
    let (document, engine) = setup();
    let ran = counter(&engine, "--count");
    let root = document.root();
    element(&document, root, "div", &[("id", "box")]);
    let button = element(&document, root, "button", &[("commandfor", "box")]);
    element(&document, button, "and-then", &[("command", "--nope")]);
    element(&document, button, "and-then", &[("command", "--fail")]);
    let last = element(&document, button, "and-then", &[("command", "--count")]);
    element(&document, last, "and-then", &[("command", "--count")]);

    engine
        .dispatch(&InvokeEvent::new("--noop").with_source(button))
        .await;

    assert_eq!(count(&ran), 2);
}

struct Unruly;

#[async_trait::async_trait]
impl CommandMiddleware for Unruly {
    async fn before(&self, context: &CommandContext) -> anyhow::Result<()> {
        match context.name().as_str() {
            "--explode" => panic!("before hook exploded"),
            "--stall" => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn after(&self, _context: &CommandContext, _result: &ExecutionResult) {
        panic!("after hook exploded");
    }
}

#[tokio::test]
async fn test_panicking_middleware_is_contained() {
    let (document, engine) = setup();
    let exploded = counter(&engine, "--explode");
    let fallback = counter(&engine, "--fallback");
    engine.add_middleware(Arc::new(Unruly));
    let root = document.root();
    element(&document, root, "div", &[("id", "box")]);
    let button = element(
        &document,
        root,
        "button",
        &[("commandfor", "box"), ("data-after-error", "--fallback")],
    );

    let result = engine
        .dispatch(&InvokeEvent::new("--explode").with_source(button))
        .await
        .unwrap();
    engine.wait_for_idle().await;

    match result.error {
        Some(ExecutionError::Panicked(message)) => assert!(message.contains("before hook exploded")),
        other => panic!("expected captured panic, got {other:?}"),
    }
    assert_eq!(count(&exploded), 0);
    // the follow-up ran even though every after hook panics
    assert_eq!(count(&fallback), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_middleware_times_out() {
    let config = EngineConfig::default().with_command_timeout(Duration::from_millis(50));
    let (document, engine) = setup_with(config);
    let stalled = counter(&engine, "--stall");
    let next = counter(&engine, "--next");
    engine.add_middleware(Arc::new(Unruly));
    let root = document.root();
    element(&document, root, "div", &[("id", "box")]);
    let button = element(
        &document,
        root,
        "button",
        &[("commandfor", "box"), ("data-and-then", "--stall, --next")],
    );

    engine
        .dispatch(&InvokeEvent::new("--noop").with_source(button))
        .await;
    engine.wait_for_idle().await;

    // the queue moves on past the stalled step
    assert_eq!(count(&stalled), 0);
    assert_eq!(count(&next), 1);
}

#[tokio::test]
async fn test_failed_toggle_defines_pressed_state() {
    let (document, engine) = setup();
    engine.register_fn("--toggle", |_| anyhow::bail!("cannot toggle"));
    let root = document.root();
    element(&document, root, "div", &[("id", "box")]);
    let toggle = element(&document, root, "button", &[("commandfor", "box")]);
    let plain = element(&document, root, "button", &[("commandfor", "box")]);

    engine
        .dispatch(&InvokeEvent::new("--toggle").with_source(toggle))
        .await;
    engine
        .dispatch(&InvokeEvent::new("--fail").with_source(plain))
        .await;

    assert_eq!(document.attribute(toggle, "aria-pressed").as_deref(), Some("false"));
    assert_eq!(document.attribute(toggle, "aria-expanded"), None);
    assert_eq!(document.attribute(plain, "aria-pressed"), None);
}

#[tokio::test(start_paused = true)]
async fn test_missing_targets_count_toward_rate_limit() {
    let (_document, engine) = setup();

    let mut missing = 0;
    let mut limited = 0;
    for _ in 0..150 {
        match engine.execute_command("--noop", "nowhere", None).await {
            Err(InvokerError::TargetNotFound(_)) => missing += 1,
            Err(InvokerError::RateLimited { .. }) => limited += 1,
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    assert_eq!((missing, limited), (100, 50));
}

#[tokio::test]
async fn test_reset_stats_clears_rate_window() {
    let (document, engine) = setup();
    element(&document, document.root(), "div", &[("id", "box")]);

    for _ in 0..3 {
        assert_ok!(engine.execute_command("--noop", "box", None).await);
    }
    assert_eq!(engine.stats().executions, 3);

    engine.reset_stats();
    assert_eq!(engine.stats().executions, 0);
}
