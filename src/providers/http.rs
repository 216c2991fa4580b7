use reqwest::header::RETRY_AFTER;
use reqwest::RequestBuilder;

use crate::error::ProviderError;

/// Send a request and decode its body as JSON.
///
/// Non-2xx statuses become typed [`ProviderError`]s (reading `Retry-After` on
/// 429). The body is read as text first so a truncated payload maps to a
/// transient schema error rather than a transport error.
pub async fn get_json(req: RequestBuilder) -> Result<serde_json::Value, ProviderError> {
    let resp = req.send().await?;
    let status = resp.status();
    if !status.is_success() {
        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok());
        return Err(ProviderError::from_status(status.as_u16(), retry_after));
    }
    let body = resp.text().await?;
    Ok(serde_json::from_str(&body)?)
}

/// Lenient numeric read: upstreams send numbers both as JSON numbers and strings.
pub fn as_f64(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().trim_start_matches('+').parse().ok(),
        _ => None,
    }
    .filter(|x: &f64| x.is_finite())
}
