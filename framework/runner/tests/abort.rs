mod common;

use std::time::{Duration, Instant};

use common::{builder, dispatcher, MockDispatcher};
use gale_runner::prelude::{AbortCause, Run, ScenarioSpec, ThresholdRule, EXIT_ABORTED};
use pretty_assertions::assert_eq;

#[test]
fn operator_abort_cancels_in_flight_requests() {
    let (mock, dispatcher) =
        dispatcher(MockDispatcher::new().with_latency(Duration::from_secs(30)));

    let definition = builder("operator_abort")
        .add_scenario(ScenarioSpec::constant_concurrency(
            "steady_vus",
            4,
            Duration::from_secs(600),
        ))
        .add_scenario(
            ScenarioSpec::fixed_iterations("late", 10, 1).with_start_time(Duration::from_secs(600)),
        )
        .add_threshold(ThresholdRule::parse("scenario=steady_vus", "p(95) < 15000").unwrap());

    let run = Run::new(definition, dispatcher).unwrap();
    let abort = run.abort_handle();
    let aggregator = run.aggregator();

    let started = Instant::now();
    let handle = std::thread::spawn(move || run.execute());

    // Give every virtual user time to get a request in flight
    while mock.calls() < 4 {
        std::thread::sleep(Duration::from_millis(5));
    }
    abort.shutdown();

    let report = handle.join().unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));

    assert_eq!(Some(AbortCause::Operator), report.aborted);
    assert_eq!(EXIT_ABORTED, report.exit_code());

    // Nothing completed, so nothing was measured
    assert_eq!(0, aggregator.sample_count());
    assert_eq!(0, report.iterations());

    let steady = report.scenario("steady_vus").unwrap();
    assert!(steady.interrupted);
    assert_eq!(4, steady.vus_spawned);

    let late = report.scenario("late").unwrap();
    assert!(late.interrupted);
    assert_eq!(0, late.vus_spawned);

    let summary = report.to_summary();
    assert_eq!("aborted", summary.verdict);
}
