use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sha3::Digest;
use std::collections::BTreeMap;
use std::io::{BufRead, Read, Write};
use std::path::Path;

/// Summary of a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    /// The unique run id
    ///
    /// Chosen by the runner. Unique for each run.
    pub run_id: String,
    /// The name of the run definition
    pub run_name: String,
    /// The time the run started
    ///
    /// This is a Unix timestamp in seconds.
    pub started_at: i64,
    /// The base URL requests were sent to
    pub target: String,
    /// One entry per scenario, in the order they were defined
    pub scenarios: Vec<ScenarioSummary>,
    /// Statistics for every individual `key=value` tag seen during the run
    pub tags: BTreeMap<String, TagSummary>,
    /// Statistics over every sample
    pub total: TagSummary,
    /// One entry per threshold rule, in the order they were defined
    pub thresholds: Vec<ThresholdSummary>,
    /// Overall outcome: `passed`, `failed`, `inconclusive` or `aborted`
    pub verdict: String,
    /// The version of Gale that produced this summary
    pub gale_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenarioSummary {
    pub name: String,
    /// The executor as written in configuration, e.g. `fixed-iterations(1000 x 50)`
    pub executor: String,
    /// Iterations completed across every virtual user
    pub iterations: u64,
    /// The highest number of concurrently running virtual users
    pub peak_vus: usize,
    /// Whether the scenario was cut short by an abort
    pub interrupted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TagSummary {
    pub count: u64,
    pub failures: u64,
    pub avg_ms: Option<f64>,
    pub p50_ms: Option<f64>,
    pub p90_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    pub max_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThresholdSummary {
    /// The rule as written, e.g. `{test_type=steady_iters} p(95) < 4000`
    pub rule: String,
    pub observed: Option<f64>,
    /// `pass`, `fail` or `inconclusive`
    pub status: String,
}

impl RunSummary {
    /// Compute a fingerprint for this run summary
    ///
    /// The fingerprint is intended to identify the configuration used for the run, so that runs
    /// with the same configuration can be compared. It uses the
    ///     - Run name
    ///     - Target
    ///     - Scenario names and executors
    ///     - Threshold rules
    ///     - Gale version
    ///
    /// The fingerprint is computed using [sha3::Sha3_256].
    pub fn fingerprint(&self) -> String {
        let mut hasher = sha3::Sha3_256::new();
        Digest::update(&mut hasher, self.run_name.as_bytes());
        Digest::update(&mut hasher, self.target.as_bytes());
        self.scenarios
            .iter()
            .sorted_by_key(|s| s.name.clone())
            .for_each(|s| {
                Digest::update(&mut hasher, s.name.as_bytes());
                Digest::update(&mut hasher, s.executor.as_bytes());
            });
        self.thresholds.iter().for_each(|t| {
            Digest::update(&mut hasher, t.rule.as_bytes());
        });
        Digest::update(&mut hasher, self.gale_version.as_bytes());

        format!("{:x}", hasher.finalize())
    }
}

/// Append the run summary to a file
///
/// The summary will be serialized to JSON and output as a single line followed by a newline. The
/// recommended file extension is `.jsonl`.
pub fn append_run_summary(run_summary: &RunSummary, path: &Path) -> anyhow::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)?;
    store_run_summary(run_summary, &mut file)?;
    file.write_all(b"\n")?;
    Ok(())
}

/// Serialize the run summary to a writer
pub fn store_run_summary<W: Write>(run_summary: &RunSummary, writer: &mut W) -> anyhow::Result<()> {
    serde_json::to_writer(writer, run_summary)?;
    Ok(())
}

/// Load a run summary from a reader
pub fn load_run_summary<R: Read>(reader: R) -> anyhow::Result<RunSummary> {
    let reader = std::io::BufReader::new(reader);
    let run_summary: RunSummary = serde_json::from_reader(reader)?;
    Ok(run_summary)
}

/// Load run summaries from a file
///
/// The file should contain one JSON object per line. This is the format produced by
/// [append_run_summary].
pub fn load_summary_runs(path: &Path) -> anyhow::Result<Vec<RunSummary>> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let mut runs = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let run: RunSummary = serde_json::from_str(&line)?;
        runs.push(run);
    }
    Ok(runs)
}
