//! `%(name)s` substitution, used for config values and for the environment handed to duplicity.

use std::collections::BTreeMap;

use crate::{
    config::ConfigSection,
    error::{BackupsResult, ConfigErrorKind},
};

/// Expand every `%(name)s` reference in `value` using `lookup`; `%%` yields a literal `%`.
///
/// # Errors
///
/// * [`ConfigErrorKind::BadInterpolation`] - If a `%` is neither escaped nor starts a reference.
/// * Any error returned by `lookup`.
pub fn interpolate<F>(value: &str, mut lookup: F) -> BackupsResult<String>
where
    F: FnMut(&str) -> BackupsResult<String>,
{
    let bad = || ConfigErrorKind::BadInterpolation(value.to_string());
    let mut result = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(pos) = rest.find('%') {
        result.push_str(&rest[..pos]);
        rest = &rest[pos + 1..];
        if let Some(after) = rest.strip_prefix('%') {
            result.push('%');
            rest = after;
        } else if let Some(after) = rest.strip_prefix('(') {
            let end = after.find(')').ok_or_else(bad)?;
            let name = &after[..end];
            rest = after[end + 1..].strip_prefix('s').ok_or_else(bad)?;
            result.push_str(&lookup(name)?);
        } else {
            return Err(bad().into());
        }
    }
    result.push_str(rest);
    Ok(result)
}

/// Render the environment injections of `section` against the environment given by `env`.
///
/// Only the uppercase keys are taken; each value is substituted so that e.g.
/// `PATH=/usr/local/bin:%(PATH)s` extends the inherited `PATH`.
///
/// # Errors
///
/// * [`ConfigErrorKind::UnsetVariable`] - If a value references a variable missing from `env`.
/// * [`ConfigErrorKind::BadInterpolation`] - If a value contains a malformed reference.
pub fn render_environment<F>(section: &ConfigSection, env: F) -> BackupsResult<BTreeMap<String, String>>
where
    F: Fn(&str) -> Option<String>,
{
    section
        .env_entries()
        .map(|(key, value)| -> BackupsResult<(String, String)> {
            let rendered = interpolate(value, |name| {
                env(name).ok_or_else(|| ConfigErrorKind::UnsetVariable(name.to_string()).into())
            })?;
            Ok((key.to_string(), rendered))
        })
        .collect()
}
