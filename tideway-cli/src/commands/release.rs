use anyhow::Result;
use colored::Colorize;
use tideway_core::update::{ALL_LATEST, ALL_SERVICES};
use tideway_core::{Cause, ReleaseKind, ReleaseSpec};
use tideway_sdk::TidewayClient;

use super::AwaitArgs;

pub struct Request<'a> {
    pub services: &'a [String],
    pub all: bool,
    pub image: Option<&'a str>,
    pub excludes: &'a [String],
    pub dry_run: bool,
}

impl Request<'_> {
    pub fn spec(&self) -> ReleaseSpec {
        let services = if self.all {
            vec![ALL_SERVICES.to_string()]
        } else {
            self.services.to_vec()
        };
        ReleaseSpec {
            services,
            image: self.image.unwrap_or(ALL_LATEST).to_string(),
            kind: if self.dry_run {
                ReleaseKind::Plan
            } else {
                ReleaseKind::Execute
            },
            excludes: self.excludes.to_vec(),
        }
    }
}

pub fn run(client: &TidewayClient, request: Request, cause: Cause, wait: &AwaitArgs) -> Result<()> {
    let spec = request.spec();

    println!(
        "{} {} to {}",
        if request.dry_run { "Planning" } else { "Releasing" }.bold(),
        spec.image.cyan(),
        spec.services.join(", ").cyan()
    );
    if !spec.excludes.is_empty() {
        println!("   {}: {}", "Excluding".bold(), spec.excludes.join(", "));
    }

    let job = client.update_images(&spec, &cause)?;
    super::follow(client, &job, wait)
}
