//! Emit the built-in legacy discovery configuration as YAML on stdout, so it
//! can be checked in and customized.

use prom_adapter_rules::AdapterConfig;

fn main() -> anyhow::Result<()> {
    let config = AdapterConfig::default_rules();
    print!("{}", config.to_yaml()?);
    Ok(())
}
