use anyhow::{bail, Result};
use colored::Colorize;
use tideway_core::{Cause, PolicyUpdate, PolicyUpdates};
use tideway_sdk::TidewayClient;

use super::AwaitArgs;

pub fn updates(
    services: &[String],
    add: &[(String, String)],
    remove: &[String],
) -> Result<PolicyUpdates> {
    if add.is_empty() && remove.is_empty() {
        bail!("nothing to change: pass --add or --remove");
    }

    let update = PolicyUpdate {
        add: add.iter().cloned().collect(),
        remove: remove.iter().cloned().collect(),
    };
    Ok(services
        .iter()
        .map(|service| (service.clone(), update.clone()))
        .collect())
}

pub fn run(
    client: &TidewayClient,
    services: &[String],
    add: &[(String, String)],
    remove: &[String],
    cause: Cause,
    wait: &AwaitArgs,
) -> Result<()> {
    let updates = updates(services, add, remove)?;

    println!(
        "{} {}",
        "Updating policies for".bold(),
        services.join(", ").cyan()
    );
    for (name, value) in add {
        println!("   {} {}={}", "+".green(), name, value);
    }
    for name in remove {
        println!("   {} {}", "-".red(), name);
    }

    let job = client.update_policies(&updates, &cause)?;
    super::follow(client, &job, wait)
}
