#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = proctoring_core::run_worker().await {
        eprintln!("proctoring-worker fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
