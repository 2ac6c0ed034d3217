//! Tools the built-in assistants can call.

use crate::tool::{Tool, ToolRegistry};
use std::sync::Arc;

mod fun;
mod info;
mod util;

/// Every built-in tool.  `directory` lists the registered assistants as (name, description).
pub fn toolkit(cfg: &crate::config::Tools, directory: Vec<(String, String)>) -> ToolRegistry {
    let weather_key = cfg.openweathermap_api_key.clone();
    let directory = Arc::new(directory);

    ToolRegistry::new()
        .with(
            Tool::new(
                "get_horoscope",
                "Get the horoscope for a given star sign.",
                fun::get_horoscope,
            )
            .param("star_sign", "The user's star sign. Lowercase."),
        )
        .with(
            Tool::new(
                "get_weather",
                "Get the weather for a given location in the USA.",
                move |args| info::get_weather(weather_key.clone(), args),
            )
            .param("zipcode", "The user's zipcode."),
        )
        .with(
            Tool::new(
                "suggest_feature",
                "Suggest a feature to expand Mila's capabilities.",
                util::suggest_feature,
            )
            .param("feature", "The suggested feature, in plain English.")
            .param("category", "A one-word category for the feature.")
            .param("implementation", "The proposed feature implementation."),
        )
        .with(Tool::new(
            "get_assistants",
            "Retrieve a JSON object of the available assistants and their descriptions.",
            move |_| util::get_assistants(directory.clone()),
        ))
}
