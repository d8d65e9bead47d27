use anyhow::Result;
use tideway_sdk::TidewayClient;

pub fn run(client: &TidewayClient) -> Result<()> {
    print!("{}", client.export()?);
    Ok(())
}
