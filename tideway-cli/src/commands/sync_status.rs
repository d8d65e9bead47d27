use anyhow::Result;
use colored::Colorize;
use tideway_sdk::{ClientService, TidewayClient};

pub fn run(client: &TidewayClient, reference: &str) -> Result<()> {
    let pending = client.sync_status(reference)?;

    if pending.is_empty() {
        println!("{} {}", reference.yellow(), "is applied".green());
        return Ok(());
    }

    println!(
        "{} {}",
        "Revisions not yet applied:".bold(),
        format!("({})", pending.len()).yellow()
    );
    for revision in pending {
        println!("  {}", revision);
    }
    Ok(())
}
