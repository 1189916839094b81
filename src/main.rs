#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rubric_grader::run_worker().await {
        eprintln!("rubric-grader-worker fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
