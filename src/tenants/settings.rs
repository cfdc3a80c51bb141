// ABOUTME: Typed access to the per-tenant JSON settings document
// ABOUTME: Encrypted secret fields, explicit dirty tracking, typed groups and SQL settings filters
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Application instance settings
//!
//! Settings are a two-level JSON object (`group -> key -> value`). Secret
//! values are stored as base64 AES-CFB ciphertext under `key` with the base64
//! IV under `{key}_aes_iv`. Setters mark the document dirty; callers that
//! mutate a group in place through [`ApplicationSettings::group_mut`] must call
//! [`ApplicationSettings::mark_dirty`] themselves or the change is not saved.

use std::fmt::Write;

use serde_json::{Map, Value};

use crate::constants::settings_groups;
use crate::crypto::AesCipher;
use crate::errors::{AppError, AppResult};

const IV_SUFFIX: &str = "_aes_iv";

/// Mutable view of a settings document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplicationSettings {
    data: Map<String, Value>,
    dirty: bool,
}

impl ApplicationSettings {
    /// Wrap a stored document; anything but an object starts empty
    #[must_use]
    pub fn new(value: Value) -> Self {
        let data = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self { data, dirty: false }
    }

    /// Value at `group.key`
    #[must_use]
    pub fn get(&self, group: &str, key: &str) -> Option<&Value> {
        self.data.get(group)?.get(key)
    }

    /// Value at `group.key`, or `default`
    #[must_use]
    pub fn get_or<'a>(&'a self, group: &str, key: &str, default: &'a Value) -> &'a Value {
        self.get(group, key).unwrap_or(default)
    }

    /// String at `group.key`
    #[must_use]
    pub fn get_str(&self, group: &str, key: &str) -> Option<&str> {
        self.get(group, key).and_then(Value::as_str)
    }

    /// Boolean at `group.key`, false when absent
    #[must_use]
    pub fn get_bool(&self, group: &str, key: &str) -> bool {
        self.get(group, key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Set `group.key`
    pub fn set(&mut self, group: &str, key: &str, value: impl Into<Value>) {
        self.group_entry(group).insert(key.to_owned(), value.into());
        self.dirty = true;
    }

    /// Encrypt `plaintext` and store it at `group.key` with its IV
    ///
    /// # Errors
    ///
    /// Propagates encryption failures.
    pub fn set_secret(
        &mut self,
        cipher: &AesCipher,
        group: &str,
        key: &str,
        plaintext: &str,
    ) -> AppResult<()> {
        let (ciphertext, iv) = cipher.encrypt_to_base64(plaintext)?;
        let entry = self.group_entry(group);
        entry.insert(key.to_owned(), Value::String(ciphertext));
        entry.insert(format!("{key}{IV_SUFFIX}"), Value::String(iv));
        self.dirty = true;
        Ok(())
    }

    /// Decrypt the secret at `group.key`
    ///
    /// # Errors
    ///
    /// Returns a `Crypto` error if the value or IV is malformed, or the IV
    /// is missing while the value is present.
    pub fn get_secret(
        &self,
        cipher: &AesCipher,
        group: &str,
        key: &str,
    ) -> AppResult<Option<String>> {
        let Some(ciphertext) = self.get_str(group, key) else {
            return Ok(None);
        };
        let iv = self
            .get_str(group, &format!("{key}{IV_SUFFIX}"))
            .ok_or_else(|| AppError::crypto(format!("Secret {group}.{key} has no IV")))?;
        cipher.decrypt_from_base64(ciphertext, iv).map(Some)
    }

    /// Direct access to a group for in-place edits (does not mark dirty)
    pub fn group_mut(&mut self, group: &str) -> &mut Map<String, Value> {
        self.group_entry(group)
    }

    /// Flag in-place edits for persistence
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Whether unsaved changes exist
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Forget pending changes after a save
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Document to persist
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.data.clone())
    }

    /// Decode a typed group
    ///
    /// # Errors
    ///
    /// Propagates secret decryption failures.
    pub fn group<G: SettingsGroup>(&self, cipher: &AesCipher) -> AppResult<G> {
        G::from_settings(self, cipher)
    }

    fn group_entry(&mut self, group: &str) -> &mut Map<String, Value> {
        let slot = self
            .data
            .entry(group.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        match slot {
            Value::Object(map) => map,
            _ => unreachable!("slot was just made an object"),
        }
    }
}

/// A settings group with explicit fields
pub trait SettingsGroup: Sized {
    /// Group name in the settings document
    const NAME: &'static str;

    /// Read the group, decrypting secret fields
    ///
    /// # Errors
    ///
    /// Propagates secret decryption failures.
    fn from_settings(settings: &ApplicationSettings, cipher: &AesCipher) -> AppResult<Self>;
}

fn owned(settings: &ApplicationSettings, group: &str, key: &str) -> Option<String> {
    settings
        .get_str(group, key)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

/// Canvas developer key and feature flags
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanvasSettings {
    /// Canvas developer key id
    pub developer_key: Option<String>,
    /// Canvas developer key secret
    pub developer_secret: Option<String>,
    /// Sections feature switch
    pub sections_enabled: bool,
    /// Groups feature switch
    pub groups_enabled: bool,
}

impl SettingsGroup for CanvasSettings {
    const NAME: &'static str = settings_groups::CANVAS;

    fn from_settings(settings: &ApplicationSettings, cipher: &AesCipher) -> AppResult<Self> {
        Ok(Self {
            developer_key: owned(settings, Self::NAME, "developer_key"),
            developer_secret: settings.get_secret(cipher, Self::NAME, "developer_secret")?,
            sections_enabled: settings.get_bool(Self::NAME, "sections_enabled"),
            groups_enabled: settings.get_bool(Self::NAME, "groups_enabled"),
        })
    }
}

/// Canvas Studio API client
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanvasStudioSettings {
    /// Canvas Studio domain
    pub domain: Option<String>,
    /// OAuth2 client id
    pub client_id: Option<String>,
    /// OAuth2 client secret
    pub client_secret: Option<String>,
    /// Admin contact for Canvas Studio
    pub admin_email: Option<String>,
}

impl SettingsGroup for CanvasStudioSettings {
    const NAME: &'static str = settings_groups::CANVAS_STUDIO;

    fn from_settings(settings: &ApplicationSettings, cipher: &AesCipher) -> AppResult<Self> {
        Ok(Self {
            domain: owned(settings, Self::NAME, "domain"),
            client_id: owned(settings, Self::NAME, "client_id"),
            client_secret: settings.get_secret(cipher, Self::NAME, "client_secret")?,
            admin_email: owned(settings, Self::NAME, "admin_email"),
        })
    }
}

/// Blackboard REST API client
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlackboardSettings {
    /// OAuth2 client id
    pub client_id: Option<String>,
    /// OAuth2 client secret
    pub client_secret: Option<String>,
    /// Files feature switch
    pub files_enabled: bool,
    /// Groups feature switch
    pub groups_enabled: bool,
}

impl SettingsGroup for BlackboardSettings {
    const NAME: &'static str = settings_groups::BLACKBOARD;

    fn from_settings(settings: &ApplicationSettings, cipher: &AesCipher) -> AppResult<Self> {
        Ok(Self {
            client_id: owned(settings, Self::NAME, "client_id"),
            client_secret: settings.get_secret(cipher, Self::NAME, "client_secret")?,
            files_enabled: settings.get_bool(Self::NAME, "files_enabled"),
            groups_enabled: settings.get_bool(Self::NAME, "groups_enabled"),
        })
    }
}

/// D2L Brightspace API client
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct D2lSettings {
    /// OAuth2 client id
    pub client_id: Option<String>,
    /// OAuth2 client secret
    pub client_secret: Option<String>,
    /// Files feature switch
    pub files_enabled: bool,
    /// Groups feature switch
    pub groups_enabled: bool,
}

impl SettingsGroup for D2lSettings {
    const NAME: &'static str = settings_groups::D2L;

    fn from_settings(settings: &ApplicationSettings, cipher: &AesCipher) -> AppResult<Self> {
        Ok(Self {
            client_id: owned(settings, Self::NAME, "client_id"),
            client_secret: settings.get_secret(cipher, Self::NAME, "client_secret")?,
            files_enabled: settings.get_bool(Self::NAME, "files_enabled"),
            groups_enabled: settings.get_bool(Self::NAME, "groups_enabled"),
        })
    }
}

/// Condition on one settings key
#[derive(Debug, Clone, PartialEq)]
pub enum SettingMatch {
    /// Key must exist (any value, including null)
    Any,
    /// Key must hold exactly this value
    Equals(Value),
}

/// One compiled `WHERE` fragment plus its text binds, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledFilter {
    /// SQL fragment
    pub sql: String,
    /// Values bound to the fragment in order
    pub binds: Vec<String>,
}

/// AND of `group.key` conditions over the settings column
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsFilter {
    conditions: Vec<(String, String, SettingMatch)>,
}

impl SettingsFilter {
    /// Filter from `("group.key", condition)` pairs
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a key without a `.` separator or containing
    /// a double quote.
    pub fn from_spec<'a, I>(spec: I) -> AppResult<Self>
    where
        I: IntoIterator<Item = (&'a str, SettingMatch)>,
    {
        let mut filter = Self::default();
        for (dotted, condition) in spec {
            let (group, key) = dotted
                .split_once('.')
                .filter(|(group, key)| !group.is_empty() && !key.is_empty())
                .ok_or_else(|| {
                    AppError::invalid_input(format!(
                        "Settings filter key must be group.key: {dotted}"
                    ))
                })?;
            if dotted.contains('"') {
                return Err(AppError::invalid_input(format!(
                    "Settings filter key may not contain quotes: {dotted}"
                )));
            }
            filter
                .conditions
                .push((group.to_owned(), key.to_owned(), condition));
        }
        Ok(filter)
    }

    /// Whether a document satisfies every condition
    #[must_use]
    pub fn matches(&self, settings: &Value) -> bool {
        self.conditions.iter().all(|(group, key, condition)| {
            let value = settings.get(group).and_then(|g| g.get(key));
            match condition {
                SettingMatch::Any => value.is_some(),
                SettingMatch::Equals(expected) => value == Some(expected),
            }
        })
    }

    /// SQLite fragment over a TEXT JSON column
    #[must_use]
    pub fn to_sqlite(&self, column: &str) -> CompiledFilter {
        let mut sql = String::from("1 = 1");
        let mut binds = Vec::new();
        for (group, key, condition) in &self.conditions {
            let path = format!("$.\"{group}\".\"{key}\"");
            match condition {
                SettingMatch::Any => {
                    let _ = write!(sql, " AND json_type({column}, ?) IS NOT NULL");
                    binds.push(path);
                }
                SettingMatch::Equals(value) => {
                    let _ = write!(
                        sql,
                        " AND json_type({column}, ?) = json_type(?, '$') \
                         AND json_extract({column}, ?) IS json_extract(?, '$')"
                    );
                    let literal = value.to_string();
                    binds.extend([path.clone(), literal.clone(), path, literal]);
                }
            }
        }
        CompiledFilter { sql, binds }
    }

    /// PostgreSQL fragment over a JSONB column, numbering placeholders from `first`
    #[must_use]
    pub fn to_postgres(&self, column: &str, first: usize) -> CompiledFilter {
        let mut sql = String::from("TRUE");
        let mut binds = Vec::new();
        let mut next = first;
        for (group, key, condition) in &self.conditions {
            match condition {
                SettingMatch::Any => {
                    let _ = write!(sql, " AND ({column} -> ${next}) ? ${}", next + 1);
                    binds.extend([group.clone(), key.clone()]);
                    next += 2;
                }
                SettingMatch::Equals(value) => {
                    let _ = write!(
                        sql,
                        " AND {column} -> ${next} -> ${} = ${}::jsonb",
                        next + 1,
                        next + 2
                    );
                    binds.extend([group.clone(), key.clone(), value.to_string()]);
                    next += 3;
                }
            }
        }
        CompiledFilter { sql, binds }
    }
}
