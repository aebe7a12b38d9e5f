mod common;

use std::time::Duration;

use common::{builder, dispatcher, MockDispatcher};
use gale_runner::prelude::{Run, ScenarioSpec};
use pretty_assertions::assert_eq;

#[test]
fn active_vus_stay_at_concurrency_for_the_duration() {
    let (_, dispatcher) = dispatcher(MockDispatcher::new().with_latency(Duration::from_millis(2)));

    let definition = builder("constant_concurrency").add_scenario(
        ScenarioSpec::constant_concurrency("steady_vus", 5, Duration::from_millis(600))
            .with_pacing(Duration::from_millis(5), Duration::from_millis(10))
            .with_tag("test_type", "steady_vus"),
    );

    let run = Run::new(definition, dispatcher).unwrap();
    let gauge = run.gauge("steady_vus").unwrap();
    let handle = std::thread::spawn(move || run.execute());

    std::thread::sleep(Duration::from_millis(150));
    for _ in 0..5 {
        assert_eq!(5, gauge.active());
        std::thread::sleep(Duration::from_millis(50));
    }

    let report = handle.join().unwrap().unwrap();
    let scenario = report.scenario("steady_vus").unwrap();

    assert_eq!(5, scenario.vus_spawned);
    assert_eq!(5, scenario.peak_vus);
    assert!(scenario.iterations > 0);
    assert!(!scenario.interrupted);
    assert!(scenario.elapsed >= Duration::from_millis(600));

    assert_eq!(0, gauge.active());
    assert_eq!(0, gauge.running());
}

#[test]
fn start_time_delays_a_scenario() {
    let (_, dispatcher) = dispatcher(MockDispatcher::new());

    let definition = builder("delayed_start")
        .add_scenario(ScenarioSpec::fixed_iterations("first", 5, 1))
        .add_scenario(
            ScenarioSpec::fixed_iterations("second", 5, 1).with_start_time(Duration::from_millis(300)),
        );

    let started = std::time::Instant::now();
    let report = gale_runner::prelude::run(definition, dispatcher).unwrap();

    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(5, report.scenario("first").unwrap().iterations);
    assert_eq!(5, report.scenario("second").unwrap().iterations);
    assert_eq!(10, report.iterations());
}
