//! Canonical form for user-supplied domain names.
//!
//! Tracked names are stored lowercase without scheme, `www.` prefix, path,
//! or trailing dot so that `https://WWW.Example.com/` and `example.com`
//! resolve to the same row.

const WWW_PREFIX: &str = "www.";
const MAX_DOMAIN_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// Normalizes a raw domain input into its canonical hostname.
///
/// The transformation is applied until it reaches a fixed point, so
/// `normalize_domain_name(&normalize_domain_name(x)) == normalize_domain_name(x)`
/// holds for every input.
pub fn normalize_domain_name(raw: &str) -> String {
    let mut current = raw.to_string();
    loop {
        let next = normalize_step(&current);
        if next == current {
            return next;
        }
        current = next;
    }
}

fn normalize_step(raw: &str) -> String {
    let mut value = raw.trim().to_lowercase();

    if let Some(rest) = strip_scheme(&value) {
        value = rest.to_string();
    }

    if let Some(end) = value.find(['/', '?', '#']) {
        value.truncate(end);
    }

    let mut host = value.trim().trim_end_matches('.');
    if let Some(rest) = host.strip_prefix(WWW_PREFIX) {
        host = rest;
    }
    host.trim().to_string()
}

fn strip_scheme(value: &str) -> Option<&str> {
    let (scheme, rest) = value.split_once("://")?;
    let is_scheme = !scheme.is_empty()
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    is_scheme.then_some(rest)
}

/// Returns `true` when the (already normalized) name looks like a registrable hostname.
pub fn is_valid_domain_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_DOMAIN_LEN || !name.contains('.') {
        return false;
    }

    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= MAX_LABEL_LEN
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    })
}
