use anyhow::Result;
use colored::Colorize;
use tideway_sdk::TidewayClient;

pub fn run(client: &TidewayClient, service: Option<&str>) -> Result<()> {
    let images = client.list_images(service)?;

    if images.is_empty() {
        println!("{}", "No images found".dimmed());
        return Ok(());
    }

    println!(
        "{:<40} {:<20} {}",
        "SERVICE".bold(),
        "CONTAINER".bold(),
        "IMAGE".bold()
    );
    for status in images {
        for container in status.containers {
            println!(
                "{:<40} {:<20} {}",
                status.id, container.name, container.current
            );
            for image in container.available {
                if image == container.current {
                    continue;
                }
                println!("{:<40} {:<20} {}", "", "", image.dimmed());
            }
        }
    }
    Ok(())
}
