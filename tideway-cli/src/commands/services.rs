use anyhow::Result;
use colored::Colorize;
use tideway_sdk::TidewayClient;

pub fn run(client: &TidewayClient, namespace: Option<&str>) -> Result<()> {
    let services = client.list_services(namespace)?;

    if services.is_empty() {
        println!("{}", "No services found".dimmed());
        return Ok(());
    }

    println!(
        "{:<40} {:<12} {}",
        "SERVICE".bold(),
        "STATUS".bold(),
        "IMAGES".bold()
    );
    for service in services {
        let status = if service.status == "ready" {
            service.status.green()
        } else {
            service.status.yellow()
        };
        println!(
            "{:<40} {:<12} {}",
            service.id,
            status,
            service.images.join(", ")
        );
    }
    Ok(())
}
