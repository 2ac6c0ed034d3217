use crate::{
    log_internal,
    tool::{str_arg, ToolArgs},
};
use anyhow::Result;
use std::sync::Arc;

pub async fn suggest_feature(args: ToolArgs) -> Result<String> {
    let feature = str_arg(&args, "feature")?;
    let category = str_arg(&args, "category")?;
    let implementation = str_arg(&args, "implementation")?;

    log_internal!(
        "Feature suggested ({}): {} / implementation: {}",
        category,
        feature,
        implementation
    );
    Ok(format!("Feature suggestion received: {} ({}).", feature, category))
}

/// Names and descriptions of the registered assistants, as a JSON object.
pub async fn get_assistants(directory: Arc<Vec<(String, String)>>) -> Result<String> {
    let listing: serde_json::Map<String, serde_json::Value> = directory
        .iter()
        .map(|(name, description)| (name.clone(), description.clone().into()))
        .collect();
    Ok(serde_json::Value::Object(listing).to_string())
}
