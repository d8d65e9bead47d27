use anyhow::Result;
use tideway_core::JobId;
use tideway_sdk::TidewayClient;

use super::AwaitArgs;

pub fn run(client: &TidewayClient, id: &str, wait: &AwaitArgs) -> Result<()> {
    super::follow(client, &JobId::from(id), wait)
}
