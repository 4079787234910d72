use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

use super::OutgoingEmail;

const ENDPOINT: &str = "https://api.resend.com/emails";

/// Plain-text campaign mail through the Resend HTTP API.
pub fn send(settings: &HashMap<String, String>, msg: &OutgoingEmail) -> Result<(), String> {
    let api_key = settings
        .get("email_resend_api_key")
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .ok_or("Resend API key not configured")?;

    let sender = match msg.from_name.trim() {
        "" => msg.from.clone(),
        name => format!("{} <{}>", name, msg.from),
    };

    let resp = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| format!("Resend client setup failed: {}", e))?
        .post(ENDPOINT)
        .bearer_auth(api_key)
        .json(&json!({
            "from": sender,
            "to": [msg.to],
            "subject": msg.subject,
            "text": msg.body,
        }))
        .send()
        .map_err(|e| format!("Resend unreachable: {}", e))?;

    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let detail = resp.text().unwrap_or_default();
    Err(format!("Resend rejected {} ({}): {}", msg.to, status, detail.trim()))
}
