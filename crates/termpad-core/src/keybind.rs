use crate::error::{HostError, HostResult};
use crate::store::KeyValueStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub const OVERRIDES_STORE_KEY: &str = "termpad.keybinding-overrides";

const MODIFIER_TOKENS: [&str; 4] = ["alt", "ctrl", "meta", "shift"];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyContext {
    #[default]
    Editor,
    Find,
    Always,
}

impl KeyContext {
    pub const fn as_tag(self) -> &'static str {
        match self {
            Self::Editor => "editor",
            Self::Find => "find",
            Self::Always => "always",
        }
    }

    pub fn from_tag(input: &str) -> Option<Self> {
        match input.trim() {
            "editor" => Some(Self::Editor),
            "find" => Some(Self::Find),
            "always" => Some(Self::Always),
            _ => None,
        }
    }

    fn matches(self, requested: KeyContext) -> bool {
        self == KeyContext::Always || self == requested
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBinding {
    pub id: String,
    pub keys: String,
    #[serde(default)]
    pub context: KeyContext,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl KeyBinding {
    pub fn new(id: impl Into<String>, keys: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            keys: keys.into(),
            context: KeyContext::Editor,
            command: command.into(),
            description: None,
        }
    }

    pub fn in_context(mut self, context: KeyContext) -> Self {
        self.context = context;
        self
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KeyModifiers {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub meta: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: String,
    pub mods: KeyModifiers,
}

impl KeyEvent {
    pub fn new(key: impl Into<String>, mods: KeyModifiers) -> Self {
        Self {
            key: key.into(),
            mods,
        }
    }

    pub fn from_combo(combo: &str) -> Option<Self> {
        let mut mods = KeyModifiers::default();
        let mut key = None;
        for token in combo_tokens(combo) {
            match token.as_str() {
                "ctrl" => mods.ctrl = true,
                "alt" => mods.alt = true,
                "shift" => mods.shift = true,
                "meta" => mods.meta = true,
                "" => return None,
                _ => key = Some(token),
            }
        }
        Some(Self { key: key?, mods })
    }

    pub fn normalized(&self) -> Option<String> {
        let main = event_key_token(&self.key)?;
        let mut tokens = Vec::with_capacity(5);
        if self.mods.ctrl {
            tokens.push("ctrl".to_string());
        }
        if self.mods.alt {
            tokens.push("alt".to_string());
        }
        if self.mods.shift {
            tokens.push("shift".to_string());
        }
        if self.mods.meta {
            tokens.push("meta".to_string());
        }
        tokens.push(main);
        Some(join_tokens(tokens))
    }
}

/// Canonical, order-independent form of a key combo: tokens lower-cased,
/// aliases folded, sorted, title-cased and joined with `+`.
/// `"shift+ctrl+s"` and `"Ctrl+Shift+S"` both become `"Ctrl+S+Shift"`.
///
/// Returns `None` unless the combo has exactly one non-modifier key.
pub fn normalize_keys(input: &str) -> Option<String> {
    let tokens = combo_tokens(input);
    if tokens.iter().any(String::is_empty) {
        return None;
    }
    let main_keys = tokens
        .iter()
        .filter(|t| !MODIFIER_TOKENS.contains(&t.as_str()))
        .count();
    if main_keys != 1 {
        return None;
    }
    Some(join_tokens(tokens))
}

fn combo_tokens(input: &str) -> Vec<String> {
    let input = input.trim();
    if input == "+" {
        return vec!["plus".to_string()];
    }
    match input.strip_suffix("++") {
        Some(head) => {
            let mut tokens: Vec<String> = head.split('+').map(canonical_token).collect();
            tokens.push("plus".to_string());
            tokens
        }
        None => input.split('+').map(canonical_token).collect(),
    }
}

fn join_tokens(mut tokens: Vec<String>) -> String {
    tokens.sort();
    tokens.dedup();
    tokens
        .iter()
        .map(|t| title_case(t))
        .collect::<Vec<_>>()
        .join("+")
}

fn title_case(token: &str) -> String {
    let mut chars = token.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn canonical_token(raw: &str) -> String {
    let token = raw.trim().to_lowercase();
    let canonical = match token.as_str() {
        "control" | "ctl" => "ctrl",
        "option" | "opt" => "alt",
        "cmd" | "command" | "super" | "win" => "meta",
        "esc" => "escape",
        "spacebar" => "space",
        "arrowup" => "up",
        "arrowdown" => "down",
        "arrowleft" => "left",
        "arrowright" => "right",
        "return" => "enter",
        "del" => "delete",
        _ => return token,
    };
    canonical.to_string()
}

fn event_key_token(key: &str) -> Option<String> {
    let token = match key {
        "Control" | "Shift" | "Alt" | "Meta" | "OS" | "AltGraph" => return None,
        " " | "Space" | "Spacebar" => "space".to_string(),
        "Escape" | "Esc" => "escape".to_string(),
        "ArrowUp" | "Up" => "up".to_string(),
        "ArrowDown" | "Down" => "down".to_string(),
        "ArrowLeft" | "Left" => "left".to_string(),
        "ArrowRight" | "Right" => "right".to_string(),
        "Enter" | "Return" => "enter".to_string(),
        "Backspace" => "backspace".to_string(),
        "Delete" | "Del" => "delete".to_string(),
        "Tab" => "tab".to_string(),
        "+" | "Plus" => "plus".to_string(),
        "" => return None,
        other => other.to_lowercase(),
    };
    Some(token)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeybindingEntry {
    pub plugin_id: String,
    pub binding: KeyBinding,
    pub effective_keys: Option<String>,
    pub has_conflict: bool,
    pub is_user_override: bool,
    pub active: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct KeyConflict {
    pub keys: String,
    pub context: KeyContext,
    pub entries: Vec<KeybindingEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindingHandler {
    pub plugin_id: String,
    pub binding_id: String,
    pub command: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredOverride {
    binding_id: String,
    new_keys: Option<String>,
}

#[derive(Clone, Debug)]
struct Registration {
    plugin_id: String,
    binding: KeyBinding,
}

/// Registry of plugin-contributed key bindings plus the user's overrides.
///
/// Conflicts are resolved on every query from the current registrations, so
/// nothing here is cached. Within a `(keys, context)` group the binding whose
/// keys come from a user override wins; otherwise the last registered wins.
#[derive(Default)]
pub struct KeybindingManager {
    registrations: Vec<Registration>,
    overrides: BTreeMap<String, Option<String>>,
    store: Option<Box<dyn KeyValueStore>>,
}

impl std::fmt::Debug for KeybindingManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeybindingManager")
            .field("registrations", &self.registrations)
            .field("overrides", &self.overrides)
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

impl KeybindingManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(store: Box<dyn KeyValueStore>) -> Self {
        let mut manager = Self {
            store: Some(store),
            ..Self::default()
        };
        manager.reload_overrides();
        manager
    }

    pub fn reload_overrides(&mut self) {
        let Some(store) = &self.store else {
            return;
        };
        self.overrides = match store.get(OVERRIDES_STORE_KEY) {
            None => BTreeMap::new(),
            Some(raw) => match serde_json::from_str::<Vec<StoredOverride>>(&raw) {
                Ok(items) => items
                    .into_iter()
                    .map(|item| (item.binding_id, item.new_keys))
                    .collect(),
                Err(err) => {
                    tracing::warn!("discarding malformed keybinding overrides: {err}");
                    BTreeMap::new()
                }
            },
        };
    }

    pub fn register_plugin_bindings<I>(&mut self, plugin_id: &str, bindings: I) -> usize
    where
        I: IntoIterator<Item = KeyBinding>,
    {
        let mut added = 0;
        for binding in bindings {
            if normalize_keys(&binding.keys).is_none() {
                tracing::warn!(
                    plugin_id,
                    binding_id = %binding.id,
                    "skipping binding with invalid keys `{}`",
                    binding.keys
                );
                continue;
            }
            self.registrations.push(Registration {
                plugin_id: plugin_id.to_string(),
                binding,
            });
            added += 1;
        }
        added
    }

    pub fn unregister_plugin_bindings(&mut self, plugin_id: &str) -> usize {
        let before = self.registrations.len();
        self.registrations.retain(|r| r.plugin_id != plugin_id);
        before - self.registrations.len()
    }

    pub fn set_user_override(&mut self, binding_id: &str, new_keys: Option<&str>) -> HostResult<()> {
        if let Some(keys) = new_keys {
            if normalize_keys(keys).is_none() {
                return Err(HostError::InvalidKeys(keys.to_string()));
            }
        }
        self.overrides
            .insert(binding_id.to_string(), new_keys.map(str::to_string));
        self.persist_overrides();
        Ok(())
    }

    pub fn remove_user_override(&mut self, binding_id: &str) -> bool {
        let removed = self.overrides.remove(binding_id).is_some();
        if removed {
            self.persist_overrides();
        }
        removed
    }

    pub fn user_overrides(&self) -> &BTreeMap<String, Option<String>> {
        &self.overrides
    }

    pub fn clear(&mut self) {
        self.registrations.clear();
        self.overrides.clear();
        if let Some(store) = self.store.as_mut() {
            if let Err(err) = store.remove(OVERRIDES_STORE_KEY) {
                tracing::warn!("failed to clear stored keybinding overrides: {err:#}");
            }
        }
    }

    pub fn get_all_entries(&self) -> Vec<KeybindingEntry> {
        self.resolve()
    }

    pub fn get_conflicts(&self) -> Vec<KeyConflict> {
        let entries = self.resolve();
        let mut conflicts: Vec<KeyConflict> = Vec::new();
        let mut index_by_group: HashMap<(String, KeyContext), usize> = HashMap::new();
        for entry in entries.into_iter().filter(|e| e.has_conflict) {
            let Some(keys) = entry.effective_keys.clone() else {
                continue;
            };
            let group = (keys.clone(), entry.binding.context);
            match index_by_group.get(&group) {
                Some(&index) => conflicts[index].entries.push(entry),
                None => {
                    index_by_group.insert(group, conflicts.len());
                    conflicts.push(KeyConflict {
                        keys,
                        context: entry.binding.context,
                        entries: vec![entry],
                    });
                }
            }
        }
        conflicts
    }

    pub fn get_handler(&self, event: &KeyEvent, context: KeyContext) -> Option<BindingHandler> {
        let combo = event.normalized()?;
        self.resolve()
            .into_iter()
            .rev()
            .filter(|entry| entry.active)
            .filter(|entry| entry.binding.context.matches(context))
            .find(|entry| entry.effective_keys.as_deref() == Some(combo.as_str()))
            .map(|entry| BindingHandler {
                plugin_id: entry.plugin_id,
                binding_id: entry.binding.id,
                command: entry.binding.command,
            })
    }

    fn resolve(&self) -> Vec<KeybindingEntry> {
        let mut entries: Vec<KeybindingEntry> = self
            .registrations
            .iter()
            .map(|registration| {
                let user_override = self.overrides.get(&registration.binding.id);
                let effective_keys = match user_override {
                    Some(Some(keys)) => normalize_keys(keys),
                    Some(None) => None,
                    None => normalize_keys(&registration.binding.keys),
                };
                KeybindingEntry {
                    plugin_id: registration.plugin_id.clone(),
                    binding: registration.binding.clone(),
                    active: effective_keys.is_some(),
                    effective_keys,
                    has_conflict: false,
                    is_user_override: user_override.is_some(),
                }
            })
            .collect();

        let mut groups: HashMap<(String, KeyContext), Vec<usize>> = HashMap::new();
        for (index, entry) in entries.iter().enumerate() {
            if let Some(keys) = &entry.effective_keys {
                groups
                    .entry((keys.clone(), entry.binding.context))
                    .or_default()
                    .push(index);
            }
        }

        for members in groups.values().filter(|members| members.len() > 1) {
            let winner = members
                .iter()
                .copied()
                .max_by_key(|&index| (entries[index].is_user_override, index));
            for &index in members {
                entries[index].has_conflict = true;
                entries[index].active = Some(index) == winner;
            }
        }

        entries
    }

    fn persist_overrides(&mut self) {
        let Some(store) = self.store.as_mut() else {
            return;
        };
        let items: Vec<StoredOverride> = self
            .overrides
            .iter()
            .map(|(binding_id, new_keys)| StoredOverride {
                binding_id: binding_id.clone(),
                new_keys: new_keys.clone(),
            })
            .collect();
        let result = serde_json::to_string(&items)
            .map_err(anyhow::Error::from)
            .and_then(|json| store.set(OVERRIDES_STORE_KEY, &json));
        if let Err(err) = result {
            tracing::warn!("failed to persist keybinding overrides: {err:#}");
        }
    }
}
