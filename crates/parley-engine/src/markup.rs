//! Telephony response markup.
//!
//! The telephony provider expects an XML document in response to every
//! webhook: instructions to speak, to gather further caller speech, or to
//! terminate the call. Only the verbs the turn protocol needs are rendered
//! here; the adapter decides which one applies.

/// Escapes the five XML-significant characters in spoken text.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

/// Speaks `text`, then re-enters gather mode posting speech to `action_url`.
pub(crate) fn say_and_gather(text: &str, action_url: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <Response><Say>{}</Say>\
         <Gather input=\"speech\" action=\"{}\" method=\"POST\"/></Response>",
        escape(text),
        escape(action_url),
    )
}

/// Speaks `text`, then hangs up.
pub(crate) fn say_and_hangup(text: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <Response><Say>{}</Say><Hangup/></Response>",
        escape(text),
    )
}

/// Hangs up without speaking.
pub(crate) fn hangup() -> String {
    "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response><Hangup/></Response>".to_string()
}

/// Acknowledges without instructing anything (dropped/stale events).
pub(crate) fn empty() -> String {
    "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response/>".to_string()
}
