use tabled::Tabled;

#[derive(Tabled)]
pub struct StatsRow {
    pub tag: String,
    pub count: u64,
    pub failures: u64,
    #[tabled(display = "opt_float2")]
    pub avg_ms: Option<f64>,
    #[tabled(display = "opt_float2")]
    pub min_ms: Option<f64>,
    #[tabled(display = "opt_float2")]
    pub p50_ms: Option<f64>,
    #[tabled(display = "opt_float2")]
    pub p95_ms: Option<f64>,
    #[tabled(display = "opt_float2")]
    pub p99_ms: Option<f64>,
    #[tabled(display = "opt_float2")]
    pub max_ms: Option<f64>,
}

#[derive(Tabled)]
pub struct VerdictRow {
    pub rule: String,
    #[tabled(display = "opt_float2")]
    pub observed: Option<f64>,
    pub samples: u64,
    pub status: String,
}

fn opt_float2(n: &Option<f64>) -> String {
    match n {
        Some(n) => format!("{:.2}", n),
        None => "-".to_string(),
    }
}
