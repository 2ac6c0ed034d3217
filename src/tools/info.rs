use crate::{
    log_internal,
    tool::{str_arg, ToolArgs},
};
use anyhow::Result;
use std::time::Duration;

const FORECAST_URL: &str = "https://api.openweathermap.org/data/2.5/forecast";

/// Five day forecast for a US zipcode, as the raw OpenWeatherMap JSON.
pub async fn get_weather(api_key: Option<String>, args: ToolArgs) -> Result<String> {
    let zipcode = str_arg(&args, "zipcode")?;
    let Some(api_key) = api_key else {
        return Ok(missing_key());
    };

    log_internal!("Function called: get_weather(zipcode='{}')", zipcode);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;
    let response = client
        .get(FORECAST_URL)
        .query(&[
            ("zip", format!("{},us", zipcode)),
            ("appid", api_key),
            ("units", "imperial".to_owned()),
        ])
        .send()
        .await?
        .text()
        .await?;

    Ok(response)
}

/// Handed back to the model rather than failing the run, so it can explain the problem.
fn missing_key() -> String {
    serde_json::json!({
        "error": "No OpenWeatherMap API key found. An API key can be obtained from https://openweathermap.org/."
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_key_is_reported_to_the_model() {
        let mut args = ToolArgs::new();
        args.insert("zipcode".into(), "90210".into());

        let out = get_weather(None, args).await.unwrap();
        let out: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert!(out["error"].as_str().unwrap().contains("OpenWeatherMap"));
    }

    #[tokio::test]
    async fn zipcode_is_required() {
        assert!(get_weather(None, ToolArgs::new()).await.is_err());
    }
}
