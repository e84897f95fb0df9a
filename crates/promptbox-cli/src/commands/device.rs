use std::path::Path;

use promptbox_core::models::DeviceType;
use promptbox_core::sync::DEFAULT_DEVICE_NAME;

use crate::commands::common::{format_timestamp, open_engine, open_store};
use crate::error::CliError;

pub async fn run_device_register(
    name: Option<&str>,
    device_type: DeviceType,
    db_path: &Path,
    config_path: Option<&Path>,
) -> Result<(), CliError> {
    let engine = open_engine(db_path, config_path)?;
    let name = match name {
        Some(name) => name.to_string(),
        None => engine
            .store()
            .device_identity()
            .await?
            .map_or_else(|| DEFAULT_DEVICE_NAME.to_string(), |identity| identity.name),
    };

    let identity = engine.register_device(&name, device_type).await?;
    println!("{}", identity.device_id);
    Ok(())
}

pub async fn run_device_show(db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let Some(identity) = store.device_identity().await? else {
        println!("No device identity yet. It is created on the first sync.");
        return Ok(());
    };

    println!("id:         {}", identity.device_id);
    println!("name:       {}", identity.name);
    println!("type:       {}", identity.device_type.as_str());
    println!("registered: {}", if identity.registered { "yes" } else { "no" });
    println!("last sync:  {}", format_timestamp(identity.last_sync_at));
    Ok(())
}
