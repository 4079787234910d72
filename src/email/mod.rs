pub mod console;
pub mod gmail;
pub mod resend;
pub mod smtp;

use std::collections::HashMap;

use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

/// A fully rendered message ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub from: String,
    pub from_name: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Anything that can deliver an `OutgoingEmail`. The campaign processor only
/// sees this trait.
pub trait EmailSender: Send + Sync {
    fn send(&self, msg: &OutgoingEmail) -> Result<(), String>;
}

/// Delivers through the providers enabled in settings, in
/// `email_failover_chain` order.
pub struct ProviderChain {
    settings: HashMap<String, String>,
}

impl ProviderChain {
    pub fn from_settings(settings: HashMap<String, String>) -> Self {
        Self { settings }
    }

    pub fn enabled_providers(&self) -> Vec<String> {
        chain(&self.settings)
            .into_iter()
            .filter(|p| is_enabled(&self.settings, p))
            .collect()
    }
}

impl EmailSender for ProviderChain {
    fn send(&self, msg: &OutgoingEmail) -> Result<(), String> {
        send_via_configured_provider(&self.settings, msg)
    }
}

const DEFAULT_CHAIN: &str = "smtp,gmail,resend,console";

fn chain(settings: &HashMap<String, String>) -> Vec<String> {
    settings
        .get("email_failover_chain")
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.as_str())
        .unwrap_or(DEFAULT_CHAIN)
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn is_enabled(settings: &HashMap<String, String>, provider: &str) -> bool {
    settings
        .get(&format!("email_{}_enabled", provider))
        .map(|v| v == "true")
        .unwrap_or(false)
}

/// Default sender address: the explicit setting, else the configured
/// provider's account, else `admin_email`.
pub fn default_from_address(settings: &HashMap<String, String>) -> Option<String> {
    let explicit = settings.get("email_from_address").cloned().unwrap_or_default();
    if !explicit.trim().is_empty() {
        return Some(explicit.trim().to_string());
    }
    if is_enabled(settings, "gmail") {
        if let Some(addr) = settings.get("email_gmail_address").filter(|s| !s.is_empty()) {
            return Some(addr.clone());
        }
    }
    if is_enabled(settings, "smtp") {
        if let Some(user) = settings
            .get("email_smtp_username")
            .filter(|s| s.contains('@'))
        {
            return Some(user.clone());
        }
    }
    settings.get("admin_email").cloned().filter(|s| !s.is_empty())
}

/// Send email via the first configured provider in the failover chain.
fn send_via_configured_provider(
    settings: &HashMap<String, String>,
    msg: &OutgoingEmail,
) -> Result<(), String> {
    let failover_enabled = settings.get("email_failover_enabled").map(|v| v.as_str()) == Some("true");

    let mut last_error = String::new();

    for provider_name in chain(settings) {
        if !is_enabled(settings, &provider_name) {
            continue;
        }

        let result = match provider_name.as_str() {
            "smtp" => smtp::send(settings, msg),
            "gmail" => gmail::send(settings, msg),
            "resend" => resend::send(settings, msg),
            "console" => console::send(msg),
            _ => {
                log::warn!("[email] Unknown email provider: {}", provider_name);
                continue;
            }
        };

        match result {
            Ok(()) => return Ok(()),
            Err(e) => {
                log::warn!("[email] Provider {} failed: {}", provider_name, e);
                last_error = e;
                if !failover_enabled {
                    return Err(last_error);
                }
            }
        }
    }

    if last_error.is_empty() {
        Err("No email provider configured or enabled".into())
    } else {
        Err(format!("All email providers failed. Last error: {}", last_error))
    }
}

/// Send a one-off message to check the provider configuration.
pub fn send_test_email(settings: HashMap<String, String>, to: &str) -> Result<(), String> {
    let from = default_from_address(&settings).ok_or("No sender address configured")?;
    let app_name = settings
        .get("app_name")
        .cloned()
        .unwrap_or_else(|| "Outreach".to_string());
    let msg = OutgoingEmail {
        from,
        from_name: app_name.clone(),
        to: to.to_string(),
        subject: format!("{} test email", app_name),
        body: "Email delivery is configured correctly.\n".to_string(),
    };
    ProviderChain::from_settings(settings).send(&msg)
}

pub fn build_message(msg: &OutgoingEmail) -> Result<Message, String> {
    let from_addr = msg
        .from
        .parse()
        .map_err(|e| format!("Invalid from address: {}", e))?;
    let from_name = Some(msg.from_name.clone()).filter(|n| !n.trim().is_empty());
    Message::builder()
        .from(Mailbox::new(from_name, from_addr))
        .to(msg.to.parse().map_err(|e| format!("Invalid to address: {}", e))?)
        .subject(msg.subject.as_str())
        .header(ContentType::TEXT_PLAIN)
        .body(msg.body.clone())
        .map_err(|e| format!("Failed to build email: {}", e))
}

/// Shared SMTP send used by smtp.rs and gmail.rs
pub fn send_smtp(
    host: &str,
    port: u16,
    username: &str,
    password: &str,
    msg: &OutgoingEmail,
) -> Result<(), String> {
    let email = build_message(msg)?;
    let creds = Credentials::new(username.to_string(), password.to_string());

    let mailer = SmtpTransport::starttls_relay(host)
        .map_err(|e| format!("SMTP relay error: {}", e))?
        .port(port)
        .credentials(creds)
        .timeout(Some(std::time::Duration::from_secs(30)))
        .build();

    mailer.send(&email).map_err(|e| format!("SMTP send error: {}", e))?;
    Ok(())
}
