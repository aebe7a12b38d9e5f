/// Recommended error type for the `main` function of a load test and any code that drives a run.
/// Every fallible runner operation is compatible with it so you can use `?` to propagate errors.
pub type GaleResult<T> = anyhow::Result<T>;
