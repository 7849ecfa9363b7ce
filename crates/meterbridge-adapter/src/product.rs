//! One-time product configuration push (agent role)

use tracing::{debug, info};

use meterbridge_common::{ProductConfig, Result, SessionClient};

use crate::store::ConfigPushedMarker;

/// Push `config` unless the marker says it was pushed already
///
/// The marker is written only after the controller accepted the push.
/// Returns whether a push happened.
pub async fn push_once(
    session: &dyn SessionClient,
    marker: &ConfigPushedMarker,
    config: &ProductConfig,
) -> Result<bool> {
    if marker.is_set().await? {
        debug!("Product configuration already pushed");
        return Ok(false);
    }

    session.set_product_config(config).await?;
    marker.set().await?;
    info!(keys = config.len(), "Product configuration pushed");
    Ok(true)
}
