mod common;

use std::sync::Arc;

use common::{builder, dispatcher, MockDispatcher, REQUESTS_PER_ITERATION};
use gale_runner::prelude::{run, ManualClock, ScenarioSpec, TagFilter, EXIT_PASSED};
use pretty_assertions::assert_eq;

fn run_fixed(total_iterations: u64, concurrency: usize) {
    let (mock, dispatcher) = dispatcher(MockDispatcher::new());
    let name = format!("fixed_{total_iterations}_x_{concurrency}");

    let definition = builder(&name)
        .with_clock(Arc::new(ManualClock::new()))
        .add_scenario(
            ScenarioSpec::fixed_iterations("steady_iters", total_iterations, concurrency)
                .with_tag("test_type", "steady_iters"),
        );

    let report = run(definition, dispatcher).unwrap();

    let scenario = report.scenario("steady_iters").unwrap();
    assert_eq!(total_iterations, scenario.iterations, "{name}");
    assert_eq!(total_iterations, report.iterations());
    assert!(!scenario.interrupted);
    assert!(scenario.vus_spawned as u64 <= total_iterations.min(concurrency as u64));

    assert_eq!(total_iterations * REQUESTS_PER_ITERATION, mock.calls());
    assert_eq!(total_iterations * REQUESTS_PER_ITERATION, report.total.count);
    assert_eq!(0, report.total.failures);
    assert_eq!(EXIT_PASSED, report.exit_code());
}

#[test]
fn zero_iterations_single_vu() {
    run_fixed(0, 1);
}

#[test]
fn zero_iterations_many_vus() {
    run_fixed(0, 50);
}

#[test]
fn one_iteration_single_vu() {
    run_fixed(1, 1);
}

#[test]
fn one_iteration_many_vus() {
    run_fixed(1, 50);
}

#[test]
fn thousand_iterations_single_vu() {
    run_fixed(1000, 1);
}

#[test]
fn thousand_iterations_many_vus() {
    run_fixed(1000, 50);
}

#[test]
fn samples_carry_scenario_group_and_endpoint_tags() {
    let (_, dispatcher) = dispatcher(MockDispatcher::new());

    let definition = builder("tagged_samples").add_scenario(
        ScenarioSpec::fixed_iterations("steady_iters", 10, 2).with_tag("test_type", "steady_iters"),
    );
    let run = gale_runner::prelude::Run::new(definition, dispatcher).unwrap();
    let aggregator = run.aggregator();
    let report = run.execute().unwrap();

    let filter = |f: &str| f.parse::<TagFilter>().unwrap();
    assert_eq!(30, aggregator.select(&filter("test_type=steady_iters,group=search")).count());
    assert_eq!(20, aggregator.select(&filter("scenario=steady_iters,endpoint=summary")).count());

    let by_tag = report
        .stats_by_tag
        .iter()
        .map(|(tag, stats)| (tag.to_string(), stats.count))
        .collect::<Vec<_>>();
    assert!(by_tag.contains(&("endpoint=search".to_string(), 30)));
    assert!(by_tag.contains(&("group=summary".to_string(), 20)));
    assert!(by_tag.contains(&("scenario=steady_iters".to_string(), 50)));
}

#[test]
fn ordered_group_is_replayed_in_declared_order() {
    let (mock, dispatcher) = dispatcher(MockDispatcher::new());

    let definition = builder("ordered_group")
        .add_scenario(ScenarioSpec::fixed_iterations("summary_only", 3, 1).with_groups(["summary"]));
    run(definition, dispatcher).unwrap();

    assert_eq!(
        ["/api/v1/summary", "/api/v1/categories"].repeat(3),
        mock.paths()
    );
}
