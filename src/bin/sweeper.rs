#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = proctor_rust::run_sweeper().await {
        eprintln!("proctor-sweeper fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
