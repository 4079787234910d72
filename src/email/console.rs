use super::OutgoingEmail;

/// Development provider: logs the message instead of delivering it.
pub fn send(msg: &OutgoingEmail) -> Result<(), String> {
    log::info!(
        "[email] console delivery from={} to={} subject={:?} ({} bytes)",
        msg.from,
        msg.to,
        msg.subject,
        msg.body.len()
    );
    log::debug!("[email] body:\n{}", msg.body);
    Ok(())
}
