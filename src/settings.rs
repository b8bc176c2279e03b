//! Configuration loading for the escrow engine
//!
//! Layers an optional TOML file under `ESCROW_`-prefixed environment
//! variables and deserializes the result into [`EscrowConfig`].

use config::{Config, Environment, File};

use crate::models::EscrowConfig;
use crate::EscrowResult;

/// Load engine configuration from a file and the environment
///
/// `path` names a config file (extension resolved by the loader); pass
/// `None` to configure from the environment alone. Environment variables
/// override file values: `ESCROW_OWNER`, `ESCROW_PAYMENT_TOKEN`,
/// `ESCROW_PAYMENT_RECEIVER`, `ESCROW_FEE_ADDRESS`, `ESCROW_FEE_PER_MILLE`,
/// `ESCROW_FEE_ROUTING` (`split` or `retain`).
pub fn load(path: Option<&str>) -> EscrowResult<EscrowConfig> {
    let mut builder = Config::builder()
        .set_default("fee_per_mille", 0i64)?
        .set_default("fee_routing", "split")?;

    if let Some(path) = path {
        builder = builder.add_source(File::with_name(path));
    }

    let settings = builder
        .add_source(Environment::with_prefix("ESCROW"))
        .build()?;

    Ok(settings.try_deserialize()?)
}
