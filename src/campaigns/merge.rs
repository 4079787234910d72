use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::models::contact::Contact;

/// Public unsubscribe link for a contact, rooted at `app_url`.
pub fn unsubscribe_url(app_url: &str, token: &str) -> String {
    let base = app_url.trim().trim_end_matches('/');
    if let Ok(mut u) = url::Url::parse(base) {
        if let Ok(mut segments) = u.path_segments_mut() {
            segments.pop_if_empty().push("unsubscribe").push(token);
        }
        if u.path().ends_with(token) {
            return u.to_string();
        }
    }
    format!("{}/unsubscribe/{}", base, token)
}

/// Substitute the contact merge tags in `template` in a single pass, so tag
/// text inside contact fields is never expanded. Unknown tags stay as-is.
pub fn render(template: &str, contact: &Contact, unsubscribe_url: &str) -> String {
    static TAG: OnceLock<Regex> = OnceLock::new();
    let tag = TAG.get_or_init(|| Regex::new(r"\{\{(\w+)\}\}").expect("merge tag regex"));
    tag.replace_all(template, |caps: &Captures| match &caps[1] {
        "first_name" => contact.first_name.clone(),
        "last_name" => contact.last_name.clone(),
        "full_name" => contact.full_name(),
        "email" => contact.email.clone(),
        "company" => contact.company.clone(),
        "unsubscribe_url" => unsubscribe_url.to_string(),
        _ => caps[0].to_string(),
    })
    .into_owned()
}

/// Rendered subject and body for one recipient. Bodies that do not place
/// the unsubscribe link themselves get it appended as a footer.
pub fn personalize(subject: &str, body: &str, contact: &Contact, app_url: &str) -> (String, String) {
    let link = unsubscribe_url(app_url, &contact.unsubscribe_token);
    let subject = render(subject, contact, &link).replace(['\r', '\n'], " ");
    let mut rendered = render(body, contact, &link);
    if !body.contains("{{unsubscribe_url}}") {
        rendered.push_str(&footer(&link));
    }
    (subject, rendered)
}

pub fn footer(link: &str) -> String {
    format!("\n\n--\nTo stop receiving these emails, unsubscribe here: {}\n", link)
}
