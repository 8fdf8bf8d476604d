pub fn run() -> anyhow::Result<()> {
    println!("pepr-report {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
