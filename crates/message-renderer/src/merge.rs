//! Merge-field substitution.
//!
//! `{{token}}` placeholders (inner whitespace allowed) resolve against the
//! contact: `contact_id`, `email`, then any key of the metadata blob. String
//! values are inserted verbatim; other JSON values via their JSON rendering.
//! Unknown tokens are left in place untouched.

use maildrop_core::Contact;

pub(crate) fn substitute(text: &str, contact: &Contact) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        match after_open.find("}}") {
            Some(end) => {
                let token = after_open[..end].trim();
                match resolve(token, contact) {
                    Some(value) => out.push_str(&value),
                    // Unknown token: keep the original placeholder verbatim
                    None => out.push_str(&rest[start..start + 2 + end + 2]),
                }
                rest = &after_open[end + 2..];
            }
            None => {
                // Unterminated placeholder, keep the tail as-is
                out.push_str(&rest[start..]);
                return out;
            }
        }
    }

    out.push_str(rest);
    out
}

fn resolve(token: &str, contact: &Contact) -> Option<String> {
    match token {
        "contact_id" => Some(contact.id.clone()),
        "email" => Some(contact.email.clone()),
        _ => contact.fields.get(token).map(field_value),
    }
}

fn field_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
