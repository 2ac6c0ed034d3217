use crate::{
    log_internal,
    tool::{str_arg, ToolArgs},
};
use anyhow::Result;

pub async fn get_horoscope(args: ToolArgs) -> Result<String> {
    let star_sign = str_arg(&args, "star_sign")?;
    log_internal!("Function called: get_horoscope(star_sign='{}')", star_sign);
    Ok(format!("Your horoscope for {} is: Memento mori.", star_sign))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ToolRegistry;

    #[tokio::test]
    async fn horoscope_is_always_the_same() {
        let tools = ToolRegistry::new().with(
            crate::tool::Tool::new("get_horoscope", "", get_horoscope).param("star_sign", ""),
        );
        let out = tools
            .invoke("get_horoscope", r#"{"star_sign": "capricorn"}"#)
            .await
            .unwrap();
        assert_eq!(out, "Your horoscope for capricorn is: Memento mori.");
    }
}
