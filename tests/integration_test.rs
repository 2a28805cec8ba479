use async_trait::async_trait;
use ayatori::prelude::*;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio_test::{assert_ok, assert_pending, assert_ready};

type Log = Arc<Mutex<Vec<(String, Value)>>>;

fn recorder() -> (Log, impl Fn(&Context<Value>) + Send + Sync + 'static) {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let observer = move |ctx: &Context<Value>| {
        sink.lock()
            .expect("log lock")
            .push((ctx.current_state().to_string(), ctx.data().clone()));
    };
    (log, observer)
}

fn entries(log: &Log) -> Vec<(String, Value)> {
    log.lock().expect("log lock").clone()
}

fn states(log: &Log) -> Vec<String> {
    entries(log).into_iter().map(|(state, _)| state).collect()
}

fn builder() -> ayatori::MachineBuilder<Value> {
    Machine::builder()
        .default_token("Idle")
        .default_state(|| json!({ "count": 0 }))
}

define_action!(Counter);

/// Commits `count: 1`, then either hangs or finishes with `count: 2`.
#[async_trait]
impl Action<Value> for Counter {
    async fn execute(
        &self,
        _ctx: &SharedContext<Value>,
        _cancel: &CancellationToken,
        args: &[Value],
    ) -> Result<Step<Value>, MachineError> {
        let hang = args.first().and_then(Value::as_bool).unwrap_or(false);
        let first = stream::iter(vec![Step::from(TransitionPoint::payload(
            json!({ "count": 1 }),
        ))]);
        let rest: BoxStream<'static, Step<Value>> = if hang {
            stream::pending().boxed()
        } else {
            stream::iter(vec![Step::from(
                TransitionPoint::to("Counted").with_payload(json!({ "count": 2 })),
            )])
            .boxed()
        };
        Ok(Step::stream(first.chain(rest)))
    }
}

define_action!(Deferred);

/// Resolves its point only after an await; never resolves when asked to hang.
#[async_trait]
impl Action<Value> for Deferred {
    async fn execute(
        &self,
        _ctx: &SharedContext<Value>,
        _cancel: &CancellationToken,
        args: &[Value],
    ) -> Result<Step<Value>, MachineError> {
        if args.first().and_then(Value::as_bool).unwrap_or(false) {
            std::future::pending::<()>().await;
        }
        tokio::task::yield_now().await;
        Ok(TransitionPoint::to("Resolved").into())
    }
}

struct Gated {
    gate: Arc<Notify>,
}

#[async_trait]
impl Action<Value> for Gated {
    async fn execute(
        &self,
        _ctx: &SharedContext<Value>,
        _cancel: &CancellationToken,
        _args: &[Value],
    ) -> Result<Step<Value>, MachineError> {
        self.gate.notified().await;
        Ok(TransitionPoint::to("Opened")
            .with_payload(json!({ "gated": true }))
            .into())
    }
}

#[tokio::test]
async fn test_simple_action_moves_state() {
    let machine = builder()
        .action_fn("A", |_, _, _| Ok(TransitionPoint::to("B").into()))
        .build()
        .expect("valid machine");

    assert_ok!(machine.call("A", Vec::new()).await);
    assert_eq!(machine.context().current_state(), "B");
}

#[tokio::test]
async fn test_empty_action_changes_nothing() {
    let (log, observer) = recorder();
    let machine = builder()
        .action_fn("Noop", |_, _, _| Ok(Step::Empty))
        .observer(observer)
        .build()
        .expect("valid machine");

    assert_ok!(machine.call("Noop", Vec::new()).await);

    let ctx = machine.context().snapshot();
    assert_eq!(ctx.current_state(), "Idle");
    assert_eq!(ctx.data(), &json!({ "count": 0 }));
    assert!(entries(&log).is_empty());
}

#[tokio::test]
async fn test_producer_payloads_overwrite_same_key() {
    let (log, observer) = recorder();
    let machine = builder()
        .action_fn("A", |_, _, _| {
            Ok(Step::sequence(vec![
                TransitionPoint::payload(json!({ "count": 1 })).into(),
                TransitionPoint::payload(json!({ "count": 2 })).into(),
            ]))
        })
        .observer(observer)
        .build()
        .expect("valid machine");

    assert_ok!(machine.call("A", Vec::new()).await);

    assert_eq!(machine.context().snapshot().data()["count"], 2);
    assert_eq!(
        entries(&log),
        vec![
            ("Idle".to_string(), json!({ "count": 1 })),
            ("Idle".to_string(), json!({ "count": 2 })),
        ]
    );
}

#[tokio::test]
async fn test_chained_actions_commit_in_order() {
    let (log, observer) = recorder();
    let mut builder = builder()
        .action_fn("Run", |_, _, _| {
            Ok(Step::sequence(
                (1..=3).map(|i| TransitionPoint::to(format!("Step{}", i)).into()),
            ))
        })
        .observer(observer);
    for i in 1..=3 {
        builder = builder.action_fn(format!("Step{}", i), move |_, _, _| {
            Ok(TransitionPoint::to(format!("Done{}", i))
                .with_payload(json!({ "count": i }))
                .into())
        });
    }
    let machine = builder.build().expect("valid machine");

    assert_ok!(machine.call("Run", Vec::new()).await);

    assert_eq!(states(&log), vec!["Done1", "Done2", "Done3"]);
    assert_eq!(machine.context().current_state(), "Done3");
}

#[tokio::test]
async fn test_tail_chain_commits_once() {
    let (log, observer) = recorder();
    let machine = builder()
        .action_fn("A", |_, _, _| Ok(TransitionPoint::to("B").into()))
        .action_fn("B", |_, _, _| Ok(TransitionPoint::to("C").into()))
        .action_fn("C", |_, _, args| {
            Ok(TransitionPoint::to("End")
                .with_payload(json!({ "args": args }))
                .into())
        })
        .observer(observer)
        .build()
        .expect("valid machine");

    assert_ok!(machine.call("A", vec![json!("ignored")]).await);

    assert_eq!(states(&log), vec!["End"]);
    assert_eq!(machine.context().snapshot().data()["args"], json!([]));
}

#[tokio::test]
async fn test_nested_producer_drains_before_siblings() {
    let (log, observer) = recorder();
    let machine = builder()
        .action_fn("Outer", |_, _, _| {
            Ok(Step::sequence(vec![
                TransitionPoint::to("o1").into(),
                TransitionPoint::to("Inner").into(),
                TransitionPoint::to("o2").into(),
            ]))
        })
        .action_fn("Inner", |_, _, _| {
            Ok(Step::stream(stream::iter(vec![
                TransitionPoint::to("i1").into(),
                TransitionPoint::to("i2").into(),
            ])))
        })
        .observer(observer)
        .build()
        .expect("valid machine");

    assert_ok!(machine.call("Outer", Vec::new()).await);
    assert_eq!(states(&log), vec!["o1", "i1", "i2", "o2"]);
}

#[tokio::test]
async fn test_merge_replaces_arrays() {
    let machine = Machine::builder()
        .default_token("Idle")
        .default_state(|| json!({ "a": 1, "b": [1, 2], "nested": { "x": 1 } }))
        .action_fn("Patch", |_, _, _| {
            Ok(TransitionPoint::payload(json!({ "b": [3], "nested": { "y": 2 } })).into())
        })
        .build()
        .expect("valid machine");

    assert_ok!(machine.call("Patch", Vec::new()).await);
    assert_eq!(
        machine.context().snapshot().data(),
        &json!({ "a": 1, "b": [3], "nested": { "x": 1, "y": 2 } })
    );
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Order {
    items: Vec<String>,
    total: u32,
}

#[tokio::test]
async fn test_typed_state_with_transform() {
    let machine = Machine::builder()
        .default_token("Empty")
        .default_state(|| Order {
            items: Vec::new(),
            total: 0,
        })
        .action_fn("Add", |ctx: &SharedContext<Order>, _, args| {
            let price = ctx.read(|c| c.data().total) + 10;
            let item = args.first().cloned().unwrap_or(Value::Null);
            Ok(TransitionPoint::to("Filled")
                .with_payload(json!({ "item": item, "total": price }))
                .with_transform(|order: &Order, payload: &Value| {
                    let mut next = order.clone();
                    if let Some(item) = payload["item"].as_str() {
                        next.items.push(item.to_string());
                    }
                    next.total = payload["total"].as_u64().unwrap_or(0) as u32;
                    next
                })
                .into())
        })
        .build()
        .expect("valid machine");

    assert_ok!(machine.call("Add", vec![json!("tea")]).await);
    assert_ok!(machine.call("Add", vec![json!("cake")]).await);

    let ctx = machine.context().snapshot();
    assert_eq!(ctx.current_state(), "Filled");
    assert_eq!(
        ctx.data(),
        &Order {
            items: vec!["tea".to_string(), "cake".to_string()],
            total: 20,
        }
    );
}

#[tokio::test]
async fn test_preempted_run_stops_and_recovers() {
    let (log, observer) = recorder();
    let machine = builder()
        .action(Counter::TOKEN, Counter)
        .rollback(Counter::TOKEN, |_| {
            TransitionPoint::to("RolledBack").with_payload(json!({ "count": 0 }))
        })
        .observer(observer)
        .build()
        .expect("valid machine");
    let entry = machine.entry(Counter::TOKEN).expect("registered").clone();

    let mut first = tokio_test::task::spawn(entry.call(vec![json!(true)]));
    assert_pending!(first.poll());
    assert_eq!(states(&log), vec!["Idle"]);

    assert_ok!(entry.call(vec![json!(false)]).await);
    assert_eq!(states(&log), vec!["Idle", "Idle", "Counted"]);

    assert_ok!(assert_ready!(first.poll()));
    assert_eq!(
        entries(&log),
        vec![
            ("Idle".to_string(), json!({ "count": 1 })),
            ("Idle".to_string(), json!({ "count": 1 })),
            ("Counted".to_string(), json!({ "count": 2 })),
            ("RolledBack".to_string(), json!({ "count": 0 })),
        ]
    );
}

#[tokio::test]
async fn test_preempted_deferred_action_without_rollback() {
    let (log, observer) = recorder();
    let machine = builder()
        .action(Deferred::TOKEN, Deferred)
        .observer(observer)
        .build()
        .expect("valid machine");
    let entry = machine.entry(Deferred::TOKEN).expect("registered").clone();

    let mut first = tokio_test::task::spawn(entry.call(vec![json!(true)]));
    assert_pending!(first.poll());

    assert_ok!(entry.call(vec![json!(false)]).await);
    assert_eq!(states(&log), vec!["Resolved"]);

    assert_ok!(assert_ready!(first.poll()));
    assert_eq!(states(&log), vec!["Resolved"]);
}

#[tokio::test]
async fn test_preempted_deferred_action_with_rollback() {
    let (log, observer) = recorder();
    let machine = builder()
        .action(Deferred::TOKEN, Deferred)
        .rollback(Deferred::TOKEN, |ctx| {
            TransitionPoint::to("Recovered").with_payload(json!({ "from": ctx.current_state() }))
        })
        .observer(observer)
        .build()
        .expect("valid machine");
    let entry = machine.entry(Deferred::TOKEN).expect("registered").clone();

    let mut first = tokio_test::task::spawn(entry.call(vec![json!(true)]));
    assert_pending!(first.poll());
    assert_ok!(entry.call(vec![json!(false)]).await);

    assert_ok!(assert_ready!(first.poll()));
    assert_eq!(states(&log), vec!["Resolved", "Recovered"]);
    assert_eq!(
        machine.context().snapshot().data(),
        &json!({ "count": 0, "from": "Resolved" })
    );
}

#[tokio::test]
async fn test_explicit_cancel_triggers_recovery() {
    let (log, observer) = recorder();
    let machine = builder()
        .action(Counter::TOKEN, Counter)
        .rollback(Counter::TOKEN, |_| TransitionPoint::to("Aborted"))
        .observer(observer)
        .build()
        .expect("valid machine");
    let entry = machine.entry(Counter::TOKEN).expect("registered");

    let mut run = tokio_test::task::spawn(entry.call(vec![json!(true)]));
    assert_pending!(run.poll());

    entry.cancel();
    assert_ok!(assert_ready!(run.poll()));
    assert_eq!(states(&log), vec!["Idle", "Aborted"]);
}

#[tokio::test]
async fn test_different_actions_do_not_preempt_each_other() {
    let gate = Arc::new(Notify::new());
    let (log, observer) = recorder();
    let machine = builder()
        .action(
            "Slow",
            Gated {
                gate: Arc::clone(&gate),
            },
        )
        .action_fn("Fast", |_, _, _| Ok(TransitionPoint::to("Quick").into()))
        .rollback("Slow", |_| TransitionPoint::to("SlowRolledBack"))
        .observer(observer)
        .build()
        .expect("valid machine");

    let slow = machine.entry("Slow").expect("registered").clone();
    let handle = tokio::spawn(async move { slow.call(Vec::new()).await });
    tokio::task::yield_now().await;

    assert_ok!(machine.call("Fast", Vec::new()).await);
    gate.notify_one();
    assert_ok!(handle.await.expect("task joined"));

    assert_eq!(states(&log), vec!["Quick", "Opened"]);
    assert_eq!(machine.context().snapshot().data()["gated"], true);
}

#[tokio::test]
async fn test_action_failure_skips_recovery() {
    let (log, observer) = recorder();
    let machine = builder()
        .action_fn("Flaky", |_, _, _| {
            Ok(Step::try_sequence(vec![
                Ok(TransitionPoint::payload(json!({ "count": 1 })).into()),
                Err(MachineError::action("Flaky", "upstream unavailable")),
                Ok(TransitionPoint::payload(json!({ "count": 2 })).into()),
            ]))
        })
        .rollback("Flaky", |_| TransitionPoint::to("RolledBack"))
        .observer(observer)
        .build()
        .expect("valid machine");

    let result = machine.call("Flaky", Vec::new()).await;
    match result {
        Err(MachineError::ActionFailed { token, details }) => {
            assert_eq!(token, "Flaky");
            assert_eq!(details, "upstream unavailable");
        }
        other => panic!("Unexpected result: {:?}", other),
    }

    assert_eq!(states(&log), vec!["Idle"]);
    assert_eq!(machine.context().snapshot().data()["count"], 1);
}

#[tokio::test]
async fn test_unrecognized_element_aborts_run() {
    let (log, observer) = recorder();
    let machine = builder()
        .action_fn("Script", |_, _, _| {
            Ok(Step::sequence(vec![
                Step::Json(json!({ "token": "Parsed", "payload": { "count": 5 } })),
                Step::Json(json!(["not", "a", "point"])),
                TransitionPoint::to("Unreached").into(),
            ]))
        })
        .observer(observer)
        .build()
        .expect("valid machine");

    let result = machine.call("Script", Vec::new()).await;
    assert!(matches!(
        result,
        Err(MachineError::UnrecognizedStackElement { .. })
    ));
    assert_eq!(states(&log), vec!["Parsed"]);
    assert_eq!(machine.context().current_state(), "Parsed");
}

#[tokio::test]
async fn test_json_point_dispatches_action() {
    let machine = builder()
        .action_fn("Start", |_, _, _| {
            Ok(Step::Json(json!({ "token": "Echo", "args": [41] })))
        })
        .action_fn("Echo", |_, _, args| {
            let n = args.first().and_then(Value::as_u64).unwrap_or(0);
            Ok(TransitionPoint::to("Echoed")
                .with_payload(json!({ "count": n + 1 }))
                .into())
        })
        .build()
        .expect("valid machine");

    assert_ok!(machine.call("Start", Vec::new()).await);
    let ctx = machine.context().snapshot();
    assert_eq!(ctx.current_state(), "Echoed");
    assert_eq!(ctx.data()["count"], 42);
}
