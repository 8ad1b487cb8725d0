//! INI configuration file
//!
//! The file is made of `[section]`s holding `key = value` options. Options of
//! the `[DEFAULT]` section apply to every other section. Values may span
//! several lines (continuation lines are indented) and may reference other
//! options of the same section using `%(key)s`; `%%` is a literal `%`.
//!
//! Keys that are entirely uppercase are environment variables for duplicity,
//! all other keys are directives (duplicity options, `cmd`, `target_url`, ...).

use std::{fs, io, path::Path, str::FromStr};

use log::trace;

use crate::{
    error::{BackupsResult, ConfigErrorKind},
    interpolate::interpolate,
};

pub(super) mod constants {
    /// Name of the section whose options are inherited by all sections.
    pub(super) const DEFAULT_SECTION: &str = "DEFAULT";
    /// Maximum nesting of `%(key)s` references.
    pub(super) const MAX_INTERPOLATION_DEPTH: usize = 10;
}

/// Returns `true` if `key` names an environment variable, i.e. it equals its uppercase form.
#[must_use]
pub fn is_env_key(key: &str) -> bool {
    key == key.to_uppercase()
}

#[derive(Debug, Clone, Default)]
struct RawSection {
    name: String,
    entries: Vec<(String, String)>,
}

impl RawSection {
    fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A parsed configuration file.
#[derive(Debug, Clone, Default)]
pub struct Config {
    defaults: RawSection,
    sections: Vec<RawSection>,
}

impl Config {
    /// Read and parse the configuration file at `path`.
    ///
    /// # Errors
    ///
    /// * [`ConfigErrorKind::NoConfigFile`] - If the file does not exist.
    /// * [`ConfigErrorKind::ReadingConfigFailed`] - If the file cannot be read.
    /// * Any error of [`Config::from_str`].
    pub fn from_path(path: &Path) -> BackupsResult<Self> {
        let text = fs::read_to_string(path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => ConfigErrorKind::NoConfigFile(path.to_path_buf()),
            _ => ConfigErrorKind::ReadingConfigFailed {
                path: path.to_path_buf(),
                source: err,
            },
        })?;
        trace!("read config file {path:?}");
        text.parse()
    }

    /// Names of all sections in file order, `[DEFAULT]` excluded.
    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|section| section.name.as_str())
    }

    #[must_use]
    pub fn has_section(&self, name: &str) -> bool {
        self.sections.iter().any(|section| section.name == name)
    }

    /// Resolve the section `name`: defaults merged in and all values interpolated.
    ///
    /// # Errors
    ///
    /// * [`ConfigErrorKind::NoSuchConfig`] - If there is no such section.
    /// * [`ConfigErrorKind::UnknownReference`] - If a value references an unknown option.
    /// * [`ConfigErrorKind::InterpolationDepthExceeded`] - If references nest too deeply.
    /// * [`ConfigErrorKind::BadInterpolation`] - If a value contains a malformed reference.
    pub fn section(&self, name: &str) -> BackupsResult<ConfigSection> {
        let section = self
            .sections
            .iter()
            .find(|section| section.name == name)
            .ok_or_else(|| ConfigErrorKind::NoSuchConfig(name.to_string()))?;

        let mut merged = self.defaults.entries.clone();
        for (key, value) in &section.entries {
            match merged.iter_mut().find(|(k, _)| k == key) {
                Some(entry) => entry.1 = value.clone(),
                None => merged.push((key.clone(), value.clone())),
            }
        }
        let raw = RawSection {
            name: name.to_string(),
            entries: merged,
        };

        let entries = raw
            .entries
            .iter()
            .map(|(key, _)| -> BackupsResult<(String, String)> {
                Ok((key.clone(), resolve(&raw, key, 0)?))
            })
            .collect::<BackupsResult<_>>()?;

        Ok(ConfigSection {
            name: name.to_string(),
            entries,
        })
    }
}

fn resolve(raw: &RawSection, key: &str, depth: usize) -> BackupsResult<String> {
    if depth > constants::MAX_INTERPOLATION_DEPTH {
        return Err(ConfigErrorKind::InterpolationDepthExceeded(key.to_string()).into());
    }
    let value = raw
        .get(key)
        .ok_or_else(|| ConfigErrorKind::UnknownReference(key.to_string()))?;
    interpolate(value, |name| resolve(raw, name, depth + 1))
}

impl FromStr for Config {
    type Err = crate::error::BackupsError;

    fn from_str(text: &str) -> BackupsResult<Self> {
        let mut config = Self {
            defaults: RawSection {
                name: constants::DEFAULT_SECTION.to_string(),
                entries: Vec::new(),
            },
            sections: Vec::new(),
        };
        // index into `config.sections`, `None` while in [DEFAULT]
        let mut current: Option<Option<usize>> = None;
        let mut last_key: Option<String> = None;

        for (idx, line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }

            let section = match current {
                Some(None) => Some(&mut config.defaults),
                Some(Some(idx)) => config.sections.get_mut(idx),
                None => None,
            };

            if line.starts_with(char::is_whitespace) {
                if let (Some(section), Some(key)) = (section, &last_key) {
                    if let Some(entry) = section.entries.iter_mut().find(|(k, _)| k == key) {
                        entry.1.push('\n');
                        entry.1.push_str(trimmed);
                        continue;
                    }
                }
                return Err(ConfigErrorKind::InvalidLine {
                    line: line_no,
                    text: trimmed.to_string(),
                }
                .into());
            }

            if let Some(name) = trimmed
                .strip_prefix('[')
                .and_then(|rest| rest.strip_suffix(']'))
            {
                let name = name.trim();
                last_key = None;
                if name == constants::DEFAULT_SECTION {
                    current = Some(None);
                } else if config.has_section(name) {
                    return Err(ConfigErrorKind::DuplicateSection {
                        line: line_no,
                        section: name.to_string(),
                    }
                    .into());
                } else {
                    config.sections.push(RawSection {
                        name: name.to_string(),
                        entries: Vec::new(),
                    });
                    current = Some(Some(config.sections.len() - 1));
                }
                continue;
            }

            let Some(section) = section else {
                return Err(ConfigErrorKind::MissingSectionHeader {
                    line: line_no,
                    text: trimmed.to_string(),
                }
                .into());
            };

            let (key, value) = split_option(trimmed).ok_or_else(|| ConfigErrorKind::InvalidLine {
                line: line_no,
                text: trimmed.to_string(),
            })?;
            if section.get(key).is_some() {
                return Err(ConfigErrorKind::DuplicateOption {
                    line: line_no,
                    section: section.name.clone(),
                    key: key.to_string(),
                }
                .into());
            }
            section.entries.push((key.to_string(), value.to_string()));
            last_key = Some(key.to_string());
        }

        for section in std::iter::once(&mut config.defaults).chain(config.sections.iter_mut()) {
            for entry in &mut section.entries {
                entry.1 = entry.1.trim_end().to_string();
            }
        }
        Ok(config)
    }
}

/// Split `key = value` or `key: value` at the first delimiter.
fn split_option(line: &str) -> Option<(&str, &str)> {
    let pos = line.find(['=', ':'])?;
    let key = line[..pos].trim();
    if key.is_empty() {
        return None;
    }
    Some((key, line[pos + 1..].trim()))
}

/// One resolved `[section]` of the configuration: an ordered list of options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSection {
    name: String,
    entries: Vec<(String, String)>,
}

impl ConfigSection {
    /// Build a section from already resolved entries.
    pub fn from_entries<K, V>(name: &str, entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            name: name.to_string(),
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Get a mandatory option.
    ///
    /// # Errors
    ///
    /// * [`ConfigErrorKind::MissingOption`] - If the option is not set.
    pub fn require(&self, key: &str) -> BackupsResult<&str> {
        self.get(key).ok_or_else(|| {
            ConfigErrorKind::MissingOption {
                section: self.name.clone(),
                key: key.to_string(),
            }
            .into()
        })
    }

    /// Get an optional option and parse it.
    ///
    /// # Errors
    ///
    /// * [`ConfigErrorKind::InvalidValue`] - If the value cannot be parsed.
    pub fn parse<T: FromStr>(&self, key: &str) -> BackupsResult<Option<T>> {
        self.get(key)
            .map(|value| {
                value.parse().map_err(|_| {
                    ConfigErrorKind::InvalidValue {
                        key: key.to_string(),
                        value: value.to_string(),
                    }
                    .into()
                })
            })
            .transpose()
    }

    /// All options in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Environment injections: the options with an uppercase key.
    pub fn env_entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter().filter(|(key, _)| is_env_key(key))
    }

    /// Directives: the options with a key that is not uppercase.
    pub fn directives(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter().filter(|(key, _)| !is_env_key(key))
    }

    /// Return a copy with `key` set to `value`, keeping its position if it already exists.
    #[must_use]
    pub fn with_option(&self, key: &str, value: &str) -> Self {
        let mut section = self.clone();
        match section.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.to_string(),
            None => section.entries.push((key.to_string(), value.to_string())),
        }
        section
    }
}
