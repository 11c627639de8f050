//! End-to-end pipeline tests over an in-memory transport.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use traceport::export::in_memory::InMemorySender;
use traceport::export::ForwardClient;
use traceport::{Config, Tracer};

fn tracer_over(sink: &InMemorySender) -> Tracer {
    let client = Arc::new(ForwardClient::new(Box::new(sink.clone())));
    let config = Config::builder()
        .with_access_token("integration-token")
        .with_service_name("pipeline-test")
        .build();
    Tracer::with_client(config, client)
}

#[test]
fn a_finished_span_reaches_the_collector_as_one_frame() {
    let sink = InMemorySender::new();
    let tracer = tracer_over(&sink);

    let span = tracer.build_span("checkout").start();
    span.set_tag("http.status", 200i64);
    span.set_baggage_item("tenant", "blue");
    span.finish();
    tracer.force_flush().unwrap();

    let frames = sink.records();
    assert_eq!(frames.len(), 1);

    let frame = &frames[0];
    assert_eq!(frame[0], "ot");
    let record = &frame[2];
    assert_eq!(record["_type"], "trace");
    assert_eq!(record["ot.operation_name"], "checkout");
    assert_eq!(record["ot.http.status"], 200);
    assert_eq!(record["ot.tenant"], "blue");
    assert_eq!(record["tp_access_token"], "integration-token");
    assert!(record["ot.trace_id"].is_i64());
    assert!(record["ot.span_id"].is_i64());
    assert!(record["ot.duration_us"].as_i64().unwrap() >= 0);
}

#[test]
fn a_disabled_tracer_delivers_nothing() {
    let sink = InMemorySender::new();
    let client = Arc::new(ForwardClient::new(Box::new(sink.clone())));
    let tracer = Tracer::with_client(Config::builder().build(), client);

    let span = tracer.build_span("invisible").start();
    span.set_tag("k", "v");
    span.finish();
    tracer.force_flush().unwrap();

    assert!(!tracer.is_enabled());
    assert_eq!(sink.attempts(), 0);
    assert!(sink.records().is_empty());
}

#[test]
fn context_survives_an_inject_extract_hop() {
    let sink = InMemorySender::new();
    let tracer = tracer_over(&sink);

    let upstream = tracer.build_span("upstream").start();
    upstream.set_baggage_item("request-id", "r-42");
    let mut headers: HashMap<String, String> = HashMap::new();
    tracer.inject(&upstream.context().unwrap(), &mut headers);
    upstream.finish();

    // The downstream side only sees the carrier.
    let remote = tracer.extract(&headers).unwrap();
    let downstream = tracer.build_span("downstream").child_of(&remote).start();
    assert_eq!(
        downstream.baggage_item("request-id").as_deref(),
        Some("r-42")
    );
    downstream.finish();
    tracer.force_flush().unwrap();

    let frames = sink.records();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0][2]["ot.trace_id"], frames[1][2]["ot.trace_id"]);
    assert_eq!(
        frames[1][2]["ot.parent_span_id"],
        frames[0][2]["ot.span_id"]
    );
}

#[test]
fn finishing_twice_delivers_two_records() {
    let sink = InMemorySender::new();
    let tracer = tracer_over(&sink);

    let span = tracer.build_span("twice").start();
    span.finish();
    span.finish();
    tracer.force_flush().unwrap();

    let frames = sink.records();
    assert_eq!(frames.len(), 2);
    assert_eq!(
        frames[0][2]["ot.span_id"],
        frames[1][2]["ot.span_id"]
    );
}

#[test]
fn spans_finished_on_many_threads_all_arrive_exactly_once() {
    let sink = InMemorySender::new();
    let tracer = tracer_over(&sink);

    let threads = 8;
    let per_thread = 25;
    let mut handles = Vec::new();
    for t in 0..threads {
        let tracer = tracer.clone();
        handles.push(thread::spawn(move || {
            for i in 0..per_thread {
                let span = tracer.build_span(format!("op-{t}-{i}")).start();
                span.finish();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    tracer.force_flush().unwrap();

    let names: Vec<String> = sink
        .records()
        .iter()
        .map(|frame| frame[2]["ot.operation_name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names.len(), threads * per_thread);
    let unique: std::collections::HashSet<&String> = names.iter().collect();
    assert_eq!(unique.len(), names.len());
}

#[test]
fn explicit_timestamps_pin_the_duration() {
    let sink = InMemorySender::new();
    let tracer = tracer_over(&sink);

    let span = tracer
        .build_span("timed")
        .with_start_time_micros(1_000_000)
        .start();
    span.finish_at(1_000_750);
    tracer.force_flush().unwrap();

    let frames = sink.records();
    assert_eq!(frames[0][2]["ot.duration_us"], 750);
    assert_eq!(frames[0][1][0], 1); // event time from the start timestamp
}

#[test]
fn shutdown_drops_later_spans_quietly() {
    let sink = InMemorySender::new();
    let tracer = tracer_over(&sink);

    tracer.build_span("before").start().finish();
    tracer.force_flush().unwrap();
    tracer.shutdown();

    tracer.build_span("after").start().finish();

    assert!(sink.is_closed());
    assert_eq!(sink.records().len(), 1);
}
