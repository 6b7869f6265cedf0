//! End-to-end scenarios for managed processes
//!
//! Each test spawns real processes on a node and drives them through the
//! public client API.

use selkie_core::exit::{Down, ExitReason};
use selkie_core::node::Node;
use selkie_core::telemetry::init_test_telemetry;
use selkie_process::{
    control_channel, reply_to, spawn, spawn_prioritised, spawn_with_control, Client, InitResult,
    PrioritisedProcessDefinition, ProcessAction, ProcessDefinition, ProcessReply,
    RecvTimeoutPolicy, UnhandledPolicy,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const CALL_TIMEOUT: Duration =
    Duration::from_millis(selkie_core::constants::CALL_TIMEOUT_MS_DEFAULT);

#[derive(Debug, PartialEq)]
struct Get;

#[derive(Debug, PartialEq)]
struct Inc;

#[tokio::test]
async fn test_echo_call() {
    init_test_telemetry();
    let node = Node::new();
    let definition =
        ProcessDefinition::<()>::new().handle_call(|state, n: i64| ProcessReply::Reply(n, state));
    let server = spawn(&node, definition, || InitResult::Ok((), None)).unwrap();

    let mut client = Client::new(&node).unwrap();
    let echoed: i64 = client
        .call_timeout(server.pid(), 41_i64, CALL_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(echoed, 41);
}

#[tokio::test]
async fn test_casts_interleaved_with_call() {
    init_test_telemetry();
    let node = Node::new();
    let definition = ProcessDefinition::<u64>::new()
        .handle_cast(|count, _: Inc| ProcessAction::Continue(count + 1))
        .handle_call(|count, _: Get| ProcessReply::Reply(count, count));
    let server = spawn(&node, definition, || InitResult::Ok(0, None)).unwrap();

    let mut client = Client::new(&node).unwrap();
    for _ in 0..3 {
        client.cast(server.pid(), Inc).unwrap();
    }
    // Same-origin ordering: the three casts precede the call.
    let count: u64 = client
        .call_timeout(server.pid(), Get, CALL_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(count, 3);
}

#[tokio::test]
async fn test_init_timeout_stops_process() {
    init_test_telemetry();
    let node = Node::new();
    let definition = ProcessDefinition::<()>::new()
        .on_timeout(|state, _elapsed| ProcessAction::stop_normal(state));
    let server = spawn(&node, definition, || {
        InitResult::Ok((), Some(Duration::from_millis(50)))
    })
    .unwrap();

    let started = std::time::Instant::now();
    let reason = server.join().await.unwrap();
    assert_eq!(reason, ExitReason::Normal);
    assert!(started.elapsed() >= Duration::from_millis(50));
}

#[tokio::test]
async fn test_priority_dispatch_order() {
    init_test_telemetry();
    let node = Node::new();
    let order: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = order.clone();

    let definition = ProcessDefinition::<u32>::new().handle_cast(
        move |remaining: u32, msg: String| {
            seen.lock().unwrap().push(msg);
            if remaining == 1 {
                ProcessAction::stop_normal(remaining)
            } else {
                ProcessAction::Continue(remaining - 1)
            }
        },
    );
    let prioritised = PrioritisedProcessDefinition::new(definition)
        .prioritise_when::<String, _>(10, |s| s == "urgent")
        .recv_timeout_policy(RecvTimeoutPolicy::Counter(16));

    let server = spawn_prioritised(&node, prioritised, || InitResult::Ok(3, None)).unwrap();

    let client = Client::new(&node).unwrap();
    client.cast(server.pid(), "low-1".to_string()).unwrap();
    client.cast(server.pid(), "low-2".to_string()).unwrap();
    client.cast(server.pid(), "urgent".to_string()).unwrap();

    let reason = server.join().await.unwrap();
    assert_eq!(reason, ExitReason::Normal);

    // All three sends were queued before the loop first ran (current-thread
    // runtime), so the drain step saw every message: "urgent" outranks the
    // low bucket, which stays FIFO.
    let seen = order.lock().unwrap();
    assert_eq!(*seen, vec!["urgent", "low-1", "low-2"]);
}

#[tokio::test]
async fn test_unhandled_terminate_policy() {
    init_test_telemetry();
    let node = Node::new();
    let definition = ProcessDefinition::<()>::new()
        .handle_cast(|state, _: i64| ProcessAction::Continue(state));
    let server = spawn(&node, definition, || InitResult::Ok((), None)).unwrap();

    let client = Client::new(&node).unwrap();
    client.cast(server.pid(), "surprise".to_string()).unwrap();

    let reason = server.join().await.unwrap();
    assert_eq!(reason, ExitReason::other("unhandled"));
}

#[tokio::test]
async fn test_unhandled_drop_policy() {
    init_test_telemetry();
    let node = Node::new();
    let definition = ProcessDefinition::<u64>::new()
        .unhandled(UnhandledPolicy::Drop)
        .handle_cast(|count, _: Inc| ProcessAction::Continue(count + 1))
        .handle_call(|count, _: Get| ProcessReply::Reply(count, count));
    let server = spawn(&node, definition, || InitResult::Ok(0, None)).unwrap();

    let mut client = Client::new(&node).unwrap();
    client.cast(server.pid(), "ignored".to_string()).unwrap();
    client.cast(server.pid(), Inc).unwrap();

    let count: u64 = client
        .call_timeout(server.pid(), Get, CALL_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(count, 1);
    assert!(server.is_alive());
}

#[tokio::test]
async fn test_unhandled_dead_letter_policy() {
    init_test_telemetry();
    let node = Node::new();

    // Dead letters keep their original tag, so a forwarded stray cast is
    // dispatched as a cast at the sink.
    let forwarded: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink_log = forwarded.clone();
    let sink = spawn(
        &node,
        ProcessDefinition::<()>::new().handle_cast(move |state, msg: String| {
            sink_log.lock().unwrap().push(msg);
            ProcessAction::stop_normal(state)
        }),
        || InitResult::Ok((), None),
    )
    .unwrap();

    let definition = ProcessDefinition::<()>::new()
        .unhandled(UnhandledPolicy::DeadLetter(sink.pid()))
        .handle_cast(|state, _: Inc| ProcessAction::Continue(state));
    let server = spawn(&node, definition, || InitResult::Ok((), None)).unwrap();

    let client = Client::new(&node).unwrap();
    client.cast(server.pid(), "stray".to_string()).unwrap();

    assert_eq!(sink.join().await.unwrap(), ExitReason::Normal);
    assert_eq!(*forwarded.lock().unwrap(), vec!["stray"]);
    assert!(server.is_alive());
}

#[tokio::test]
async fn test_exit_handler_recovers() {
    init_test_telemetry();
    #[derive(Debug)]
    struct Restart;

    let node = Node::new();
    let recoveries = Arc::new(AtomicU32::new(0));
    let counter = recoveries.clone();

    let definition = ProcessDefinition::<u64>::new()
        .handle_call(|count, _: Get| ProcessReply::Reply(count, count))
        .handle_exit(move |count, _from, _: Restart| {
            counter.fetch_add(1, Ordering::SeqCst);
            ProcessAction::Continue(count)
        });
    let server = spawn(&node, definition, || InitResult::Ok(7, None)).unwrap();

    let mut client = Client::new(&node).unwrap();
    node.exit(client.pid(), server.pid(), Restart).unwrap();

    // Still alive and serving after the exit signal.
    let count: u64 = client
        .call_timeout(server.pid(), Get, CALL_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(count, 7);
    assert_eq!(recoveries.load(Ordering::SeqCst), 1);
    assert!(server.is_alive());
}

#[tokio::test]
async fn test_structured_exit_runs_shutdown_exactly_once() {
    init_test_telemetry();
    let node = Node::new();
    let shutdowns = Arc::new(AtomicU32::new(0));
    let observed: Arc<Mutex<Option<ExitReason>>> = Arc::new(Mutex::new(None));
    let counter = shutdowns.clone();
    let reason_slot = observed.clone();

    let definition = ProcessDefinition::<()>::new().on_shutdown(move |_state, reason| {
        counter.fetch_add(1, Ordering::SeqCst);
        *reason_slot.lock().unwrap() = Some(reason);
    });
    let server = spawn(&node, definition, || InitResult::Ok((), None)).unwrap();

    server.stop().unwrap();
    let reason = server.join().await.unwrap();
    assert_eq!(reason, ExitReason::Shutdown);
    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    assert_eq!(*observed.lock().unwrap(), Some(ExitReason::Shutdown));
}

#[tokio::test]
async fn test_stop_reply_shuts_down_after_replying() {
    init_test_telemetry();
    let node = Node::new();
    let definition = ProcessDefinition::<u64>::new().handle_call(|count, _: Get| {
        ProcessReply::StopReply(count, count, ExitReason::Normal)
    });
    let server = spawn(&node, definition, || InitResult::Ok(12, None)).unwrap();

    let mut client = Client::new(&node).unwrap();
    let count: u64 = client
        .call_timeout(server.pid(), Get, CALL_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(count, 12);
    assert_eq!(server.join().await.unwrap(), ExitReason::Normal);
}

#[tokio::test]
async fn test_deferred_reply_via_reply_to() {
    init_test_telemetry();
    #[derive(Debug)]
    struct Flush;

    let node = Node::new();
    // State holds the parked call refs; a Flush cast answers them all.
    let definition = ProcessDefinition::<Vec<selkie_process::CallRef>>::new()
        .handle_call_from(|mut pending, call, _: Get| {
            pending.push(call);
            ProcessAction::Continue(pending)
        })
        .handle_cast(|pending, _: Flush| {
            for call in pending {
                let _ = reply_to(call, 99_u64);
            }
            ProcessAction::Continue(Vec::new())
        });
    let server = spawn(&node, definition, || InitResult::Ok(Vec::new(), None)).unwrap();

    let mut client = Client::new(&node).unwrap();
    let flusher = Client::new(&node).unwrap();
    let server_pid = server.pid();

    let flush_task = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        flusher.cast(server_pid, Flush).unwrap();
    });

    let answer: u64 = client
        .call_timeout(server_pid, Get, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(answer, 99);
    flush_task.await.unwrap();
}

#[tokio::test]
async fn test_no_reply_times_out_caller() {
    init_test_telemetry();
    let node = Node::new();
    let definition = ProcessDefinition::<()>::new()
        .handle_call(|state, _: Get| ProcessReply::<(), u64>::NoReply(state));
    let server = spawn(&node, definition, || InitResult::Ok((), None)).unwrap();

    let mut client = Client::new(&node).unwrap();
    let err = client
        .call_timeout::<Get, u64>(server.pid(), Get, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(server.is_alive());
}

#[tokio::test]
async fn test_call_chan_round_trip() {
    init_test_telemetry();
    let node = Node::new();
    let definition = ProcessDefinition::<()>::new()
        .handle_call(|state, n: i64| ProcessReply::Reply(n * 2, state));
    let server = spawn(&node, definition, || InitResult::Ok((), None)).unwrap();

    let mut client = Client::new(&node).unwrap();
    let doubled: i64 = client
        .call_chan_timeout(server.pid(), 21_i64, CALL_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(doubled, 42);
}

#[tokio::test]
async fn test_guard_skips_to_next_handler() {
    init_test_telemetry();
    let node = Node::new();
    // Two handlers over the same type; the guard routes by value and
    // insertion order breaks ties.
    let definition = ProcessDefinition::<()>::new()
        .handle_call_when(
            |_state, n: &i64, _caller| *n < 0,
            |state, n: i64| ProcessReply::Reply(format!("negative {n}"), state),
        )
        .handle_call(|state, n: i64| ProcessReply::Reply(format!("plain {n}"), state));
    let server = spawn(&node, definition, || InitResult::Ok((), None)).unwrap();

    let mut client = Client::new(&node).unwrap();
    let answer: String = client
        .call_timeout(server.pid(), -5_i64, CALL_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(answer, "negative -5");

    let answer: String = client
        .call_timeout(server.pid(), 5_i64, CALL_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(answer, "plain 5");
}

#[tokio::test]
async fn test_info_handler_sees_plain_messages() {
    init_test_telemetry();
    #[derive(Debug)]
    struct Ping;

    let node = Node::new();
    let pings = Arc::new(AtomicU32::new(0));
    let counter = pings.clone();
    let definition = ProcessDefinition::<()>::new()
        .handle_call(|state, _: Get| ProcessReply::Reply(0_u64, state))
        .handle_info(move |state, _: Ping| {
            counter.fetch_add(1, Ordering::SeqCst);
            ProcessAction::Continue(state)
        });
    let server = spawn(&node, definition, || InitResult::Ok((), None)).unwrap();

    node.send_info(server.pid(), Ping).unwrap();

    let mut client = Client::new(&node).unwrap();
    let _: u64 = client
        .call_timeout(server.pid(), Get, CALL_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(pings.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_monitor_observes_normal_exit() {
    init_test_telemetry();
    let node = Node::new();
    let definition = ProcessDefinition::<()>::new()
        .handle_cast(|state, _: Inc| ProcessAction::stop_normal(state));
    let server = spawn(&node, definition, || InitResult::Ok((), None)).unwrap();

    let mut watcher = Client::new(&node).unwrap();
    node.monitor(watcher.pid(), server.pid()).unwrap();

    let client = Client::new(&node).unwrap();
    client.cast(server.pid(), Inc).unwrap();

    let down: Down = watcher.recv_info(Duration::from_secs(2)).await.unwrap();
    assert_eq!(down.process, server.pid());
    assert_eq!(down.reason, ExitReason::Normal);
}

#[tokio::test]
async fn test_link_propagates_unhandled_termination() {
    init_test_telemetry();
    let node = Node::new();

    // Victim dies on an unhandled cast (policy Terminate).
    let victim = spawn(
        &node,
        ProcessDefinition::<()>::new().handle_cast(|state, _: Inc| ProcessAction::Continue(state)),
        || InitResult::Ok((), None),
    )
    .unwrap();

    // Peer linked to the victim; with no exit handler, the propagated
    // non-Normal exit takes its shutdown path.
    let peer = spawn(&node, ProcessDefinition::<()>::new(), || {
        InitResult::Ok((), None)
    })
    .unwrap();
    node.link(victim.pid(), peer.pid()).unwrap();

    let client = Client::new(&node).unwrap();
    client.cast(victim.pid(), "boom".to_string()).unwrap();

    assert_eq!(victim.join().await.unwrap(), ExitReason::other("unhandled"));
    assert_eq!(peer.join().await.unwrap(), ExitReason::other("unhandled"));
}

#[tokio::test]
async fn test_control_channel_precedence() {
    init_test_telemetry();
    #[derive(Debug)]
    struct Tune(u32);

    let node = Node::new();
    let order: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let mailbox_order = order.clone();
    let control_order = order.clone();

    let definition = ProcessDefinition::<()>::new().handle_cast(move |state, msg: String| {
        mailbox_order.lock().unwrap().push(msg);
        ProcessAction::Continue(state)
    });
    let (control_tx, control_rx) = control_channel::<Tune>();
    let server = spawn_with_control(
        &node,
        definition,
        control_rx,
        move |state, Tune(n)| {
            control_order.lock().unwrap().push(format!("tune-{n}"));
            ProcessAction::Continue(state)
        },
        || InitResult::Ok((), None),
    )
    .unwrap();

    // Queue mailbox traffic and a control message before the loop runs
    // them; the control lane must win the race for the first dispatch.
    let client = Client::new(&node).unwrap();
    client.cast(server.pid(), "ordinary".to_string()).unwrap();
    control_tx.try_send(Tune(1)).unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let seen = order.lock().unwrap().clone();
    assert_eq!(seen.len(), 2, "both messages dispatched: {seen:?}");
    assert_eq!(seen[0], "tune-1", "control lane outranked mailbox: {seen:?}");

    server.stop().unwrap();
    assert_eq!(server.join().await.unwrap(), ExitReason::Shutdown);
}

#[tokio::test]
async fn test_control_channel_closed_keeps_serving() {
    init_test_telemetry();
    #[derive(Debug)]
    struct Tune;

    let node = Node::new();
    let definition = ProcessDefinition::<u64>::new()
        .handle_call(|count, _: Get| ProcessReply::Reply(count, count));
    let (control_tx, control_rx) = control_channel::<Tune>();
    let server = spawn_with_control(
        &node,
        definition,
        control_rx,
        |state, _: Tune| ProcessAction::Continue(state),
        || InitResult::Ok(3, None),
    )
    .unwrap();

    drop(control_tx);

    let mut client = Client::new(&node).unwrap();
    let count: u64 = client
        .call_timeout(server.pid(), Get, CALL_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(count, 3);
    assert!(server.is_alive());
}

#[tokio::test]
async fn test_hibernate_resumes_on_next_message() {
    init_test_telemetry();
    #[derive(Debug)]
    struct Nap;

    let node = Node::new();
    let definition = ProcessDefinition::<u64>::new()
        .handle_cast(|count, _: Nap| {
            ProcessAction::Hibernate(count + 1, Duration::from_millis(20))
        })
        .handle_call(|count, _: Get| ProcessReply::Reply(count, count));
    let server = spawn(&node, definition, || InitResult::Ok(0, None)).unwrap();

    let mut client = Client::new(&node).unwrap();
    client.cast(server.pid(), Nap).unwrap();
    let count: u64 = client
        .call_timeout(server.pid(), Get, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_init_stop_reports_reason() {
    init_test_telemetry();
    let node = Node::new();
    let server = spawn(&node, ProcessDefinition::<()>::new(), || {
        InitResult::Stop("bad arguments".to_string())
    })
    .unwrap();
    assert_eq!(
        server.join().await.unwrap(),
        ExitReason::other("bad arguments")
    );
}

#[tokio::test]
async fn test_init_ignore_terminates_silently() {
    init_test_telemetry();
    let node = Node::new();
    let server = spawn(&node, ProcessDefinition::<()>::new(), || {
        InitResult::<()>::Ignore
    })
    .unwrap();
    let pid = server.pid();
    assert_eq!(server.join().await.unwrap(), ExitReason::Normal);
    assert!(!node.is_registered(pid));
}

#[tokio::test]
async fn test_zero_timeout_checks_mailbox_first() {
    init_test_telemetry();
    #[derive(Debug)]
    struct ArmZero;

    let node = Node::new();
    // Both casts are queued before the loop first runs (current-thread
    // runtime): ArmZero installs a zero deadline, and the zero-duration
    // poll must still see the queued Inc before the timeout handler fires.
    let definition = ProcessDefinition::<()>::new()
        .handle_cast(|state, _: ArmZero| ProcessAction::TimeoutAfter(state, Duration::ZERO))
        .handle_cast(|state, _: Inc| ProcessAction::stop_normal(state))
        .on_timeout(|state, _| ProcessAction::Stop(state, ExitReason::other("starved")));
    let server = spawn(&node, definition, || InitResult::Ok((), None)).unwrap();

    let client = Client::new(&node).unwrap();
    client.cast(server.pid(), ArmZero).unwrap();
    client.cast(server.pid(), Inc).unwrap();

    assert_eq!(server.join().await.unwrap(), ExitReason::Normal);
}

#[tokio::test]
async fn test_unhandled_exit_payload_is_fatal_without_shutdown() {
    init_test_telemetry();
    #[derive(Debug)]
    struct Unknown;

    let node = Node::new();
    let shutdowns = Arc::new(AtomicU32::new(0));
    let counter = shutdowns.clone();
    let definition = ProcessDefinition::<()>::new().on_shutdown(move |_s, _r| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let server = spawn(&node, definition, || InitResult::Ok((), None)).unwrap();

    let client = Client::new(&node).unwrap();
    node.exit(client.pid(), server.pid(), Unknown).unwrap();

    let reason = server.join().await.unwrap();
    assert!(matches!(reason, ExitReason::Other(ref r) if r.contains("unhandled exit")));
    // Fatal re-raise bypasses the shutdown handler.
    assert_eq!(shutdowns.load(Ordering::SeqCst), 0);
}
