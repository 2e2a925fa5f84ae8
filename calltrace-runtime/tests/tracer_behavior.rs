//! End-to-end behavior of the tracer over realistic call shapes.

use std::sync::Arc;

use calltrace_runtime::clock::ManualClock;
use calltrace_runtime::{ArgValue, CompletionResult, Tracer};

fn quiet_tracer() -> (Arc<ManualClock>, Tracer) {
    let clock = Arc::new(ManualClock::new());
    let tracer = Tracer::with_clock(clock.clone());
    tracer.set_colorize(false);
    (clock, tracer)
}

fn traced_fib(tracer: &Tracer, clock: &ManualClock, n: u64) -> u64 {
    let span = tracer.span("fib", vec![ArgValue::Int(i64::try_from(n).unwrap())]);
    clock.advance(10);
    let result = if n < 2 {
        n
    } else {
        traced_fib(tracer, clock, n - 1) + traced_fib(tracer, clock, n - 2)
    };
    span.complete(CompletionResult::Normal(vec![ArgValue::Int(
        i64::try_from(result).unwrap(),
    )]));
    result
}

#[test]
fn recursive_fib_records_every_invocation() {
    let (clock, tracer) = quiet_tracer();
    let result = traced_fib(&tracer, &clock, 10);
    assert_eq!(result, 55);

    let traces = tracer.get_traces();
    assert_eq!(traces.len(), 177);
    assert!(traces.iter().all(|e| e.name == "fib"));
    // The root call completes last and sits at depth 1.
    let root = traces.last().unwrap();
    assert_eq!(root.depth, 1);
    assert_eq!(root.args, vec![ArgValue::Int(10)]);
    assert_eq!(root.returns, vec![ArgValue::Int(55)]);
}

#[test]
fn parent_completes_after_children() {
    let (clock, tracer) = quiet_tracer();
    traced_fib(&tracer, &clock, 4);
    let traces = tracer.get_traces();
    // Completion order: a parent's entry always appears after both of its
    // children's entries, so depth of the final entry is minimal.
    assert_eq!(traces.last().unwrap().depth, 1);
    let max_depth = traces.iter().map(|e| e.depth).max().unwrap();
    assert!(max_depth >= 3);
    for entry in &traces {
        assert!(entry.end_ns >= entry.start_ns);
    }
}

#[test]
fn reset_gives_a_fresh_window() {
    let (clock, tracer) = quiet_tracer();
    traced_fib(&tracer, &clock, 5);
    assert!(!tracer.get_traces().is_empty());
    tracer.reset();
    assert!(tracer.get_traces().is_empty());
    traced_fib(&tracer, &clock, 4);
    assert_eq!(tracer.get_traces().len(), 9);
}

#[test]
fn hot_paths_respect_configured_threshold() {
    let (clock, tracer) = quiet_tracer();
    tracer.set_thresholds(50, 100);

    for duration in [20_u64, 150, 300, 90] {
        let span = tracer.span("step", Vec::new());
        clock.advance(duration);
        span.complete(CompletionResult::Normal(Vec::new()));
    }

    let hot = tracer.get_hot_paths();
    let durations: Vec<u64> = hot.iter().map(|e| e.duration_ns).collect();
    assert_eq!(durations, vec![300, 150]);
}

#[test]
fn explicit_unwinding_keeps_the_payload() {
    let (clock, tracer) = quiet_tracer();
    let span = tracer.span("fragile", vec![ArgValue::from("input")]);
    clock.advance(25);
    span.complete(CompletionResult::Unwinding("bad input".to_string()));

    let traces = tracer.get_traces();
    assert_eq!(traces.len(), 1);
    assert!(traces[0].panicked);
    assert_eq!(traces[0].panic_payload.as_deref(), Some("bad input"));
    assert!(traces[0].returns.is_empty());
}

#[test]
fn panic_buffered_mode_dumps_exactly_once_across_threads() {
    let tracer = Tracer::new();
    tracer.set_colorize(false);

    let previous_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(|_| {}));

    std::thread::scope(|scope| {
        for worker in 0..4 {
            let tracer = &tracer;
            scope.spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    let _outer = tracer.span_on_panic("handler", vec![ArgValue::Int(worker)]);
                    let _inner = tracer.span_on_panic("parse", Vec::new());
                    panic!("worker {worker} failed");
                }));
                assert!(result.is_err());
            });
        }
    });

    std::panic::set_hook(previous_hook);

    assert_eq!(tracer.panic_dump_count(), 1);
    let traces = tracer.get_traces();
    assert_eq!(traces.len(), 8);
    assert!(traces.iter().all(|e| e.panicked));
}

#[test]
fn quiet_mode_stays_quiet_on_success() {
    let (clock, tracer) = quiet_tracer();
    let span = tracer.span_on_panic("careful", Vec::new());
    clock.advance(40);
    span.complete(CompletionResult::Normal(vec![ArgValue::Bool(true)]));

    assert_eq!(tracer.panic_dump_count(), 0);
    let traces = tracer.get_traces();
    assert_eq!(traces.len(), 1);
    assert!(!traces[0].panicked);
}

#[test]
fn per_thread_identity_is_stable_and_distinct() {
    let tracer = Tracer::new();
    tracer.set_colorize(false);

    std::thread::scope(|scope| {
        for _ in 0..3 {
            let tracer = &tracer;
            scope.spawn(move || {
                for _ in 0..2 {
                    let span = tracer.span("tick", Vec::new());
                    span.complete(CompletionResult::Normal(Vec::new()));
                }
            });
        }
    });

    let traces = tracer.get_traces();
    assert_eq!(traces.len(), 6);
    let mut threads: Vec<u64> = traces.iter().map(|e| e.thread).collect();
    threads.sort_unstable();
    threads.dedup();
    assert_eq!(threads.len(), 3);
}
