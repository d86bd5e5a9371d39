use crate::api::PluginApi;
use crate::contribution::{CompletionItem, ContextMenuItem, PanelDescriptor, PanelPosition};
use crate::editor::Selection;
use crate::keybind::KeyBinding;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginCategory {
    Editor,
    Language,
    Ai,
    Ui,
    Validation,
    #[default]
    Tools,
}

impl PluginCategory {
    pub const ALL: [PluginCategory; 6] = [
        Self::Editor,
        Self::Language,
        Self::Ai,
        Self::Ui,
        Self::Validation,
        Self::Tools,
    ];

    pub const fn as_tag(self) -> &'static str {
        match self {
            Self::Editor => "editor",
            Self::Language => "language",
            Self::Ai => "ai",
            Self::Ui => "ui",
            Self::Validation => "validation",
            Self::Tools => "tools",
        }
    }

    pub fn from_tag(input: &str) -> Option<Self> {
        let tag = input.trim();
        Self::ALL.into_iter().find(|c| c.as_tag() == tag)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    Registered,
    Active,
    Disabled,
    Failed,
}

impl PluginStatus {
    pub const fn as_tag(self) -> &'static str {
        match self {
            Self::Registered => "registered",
            Self::Active => "active",
            Self::Disabled => "disabled",
            Self::Failed => "failed",
        }
    }
}

pub const LIFECYCLE_HOOKS: [(&str, EntryKind); 5] = [
    ("onActivate", EntryKind::Lifecycle),
    ("onDeactivate", EntryKind::Lifecycle),
    ("onContentChange", EntryKind::Content),
    ("onSelectionChange", EntryKind::Selection),
    ("onSave", EntryKind::Save),
];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompletionContext {
    pub line: u32,
    pub column: u32,
    pub line_text: String,
    pub prefix: String,
    pub language: String,
    pub trigger_character: Option<char>,
}

pub type LifecycleFn = Box<dyn FnMut(&PluginApi) -> anyhow::Result<()>>;
pub type ContentFn = Box<dyn FnMut(&PluginApi, &str) -> anyhow::Result<()>>;
pub type SelectionFn = Box<dyn FnMut(&PluginApi, Selection) -> anyhow::Result<()>>;
pub type CompletionFn =
    Box<dyn FnMut(&PluginApi, &CompletionContext) -> anyhow::Result<Vec<CompletionItem>>>;
pub type PanelFn = Box<dyn FnMut(&PluginApi) -> anyhow::Result<String>>;
pub type FormatFn = Box<dyn FnMut(&str) -> anyhow::Result<String>>;

pub enum Entry {
    Lifecycle(LifecycleFn),
    Content(ContentFn),
    Selection(SelectionFn),
    Save(LifecycleFn),
    Command(LifecycleFn),
    Completion(CompletionFn),
    Panel(PanelFn),
    Format(FormatFn),
}

impl Entry {
    pub fn kind(&self) -> EntryKind {
        match self {
            Self::Lifecycle(_) => EntryKind::Lifecycle,
            Self::Content(_) => EntryKind::Content,
            Self::Selection(_) => EntryKind::Selection,
            Self::Save(_) => EntryKind::Save,
            Self::Command(_) => EntryKind::Command,
            Self::Completion(_) => EntryKind::Completion,
            Self::Panel(_) => EntryKind::Panel,
            Self::Format(_) => EntryKind::Format,
        }
    }
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Entry::{:?}", self.kind())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Lifecycle,
    Content,
    Selection,
    Save,
    Command,
    Completion,
    Panel,
    Format,
}

impl EntryKind {
    pub const fn as_tag(self) -> &'static str {
        match self {
            Self::Lifecycle => "lifecycle",
            Self::Content => "content",
            Self::Selection => "selection",
            Self::Save => "save",
            Self::Command => "command",
            Self::Completion => "completion",
            Self::Panel => "panel",
            Self::Format => "format",
        }
    }
}

/// Entry points keyed by the names a manifest refers to.
///
/// While the host runs an entry it is taken out of the table, so an entry that
/// (indirectly) calls itself sees an empty slot instead of a double borrow.
#[derive(Debug, Default)]
pub struct EntryTable {
    entries: HashMap<String, Entry>,
    lent: HashSet<String>,
}

impl EntryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: Entry) {
        self.entries.insert(name.into(), entry);
    }

    pub fn with(mut self, name: impl Into<String>, entry: Entry) -> Self {
        self.insert(name, entry);
        self
    }

    pub fn lifecycle(
        self,
        name: impl Into<String>,
        f: impl FnMut(&PluginApi) -> anyhow::Result<()> + 'static,
    ) -> Self {
        self.with(name, Entry::Lifecycle(Box::new(f)))
    }

    pub fn content(
        self,
        name: impl Into<String>,
        f: impl FnMut(&PluginApi, &str) -> anyhow::Result<()> + 'static,
    ) -> Self {
        self.with(name, Entry::Content(Box::new(f)))
    }

    pub fn selection(
        self,
        name: impl Into<String>,
        f: impl FnMut(&PluginApi, Selection) -> anyhow::Result<()> + 'static,
    ) -> Self {
        self.with(name, Entry::Selection(Box::new(f)))
    }

    pub fn save(
        self,
        name: impl Into<String>,
        f: impl FnMut(&PluginApi) -> anyhow::Result<()> + 'static,
    ) -> Self {
        self.with(name, Entry::Save(Box::new(f)))
    }

    pub fn command(
        self,
        name: impl Into<String>,
        f: impl FnMut(&PluginApi) -> anyhow::Result<()> + 'static,
    ) -> Self {
        self.with(name, Entry::Command(Box::new(f)))
    }

    pub fn completion(
        self,
        name: impl Into<String>,
        f: impl FnMut(&PluginApi, &CompletionContext) -> anyhow::Result<Vec<CompletionItem>> + 'static,
    ) -> Self {
        self.with(name, Entry::Completion(Box::new(f)))
    }

    pub fn panel(
        self,
        name: impl Into<String>,
        f: impl FnMut(&PluginApi) -> anyhow::Result<String> + 'static,
    ) -> Self {
        self.with(name, Entry::Panel(Box::new(f)))
    }

    pub fn formatter(
        self,
        name: impl Into<String>,
        f: impl FnMut(&str) -> anyhow::Result<String> + 'static,
    ) -> Self {
        self.with(name, Entry::Format(Box::new(f)))
    }

    pub fn kind_of(&self, name: &str) -> Option<EntryKind> {
        self.entries.get(name).map(Entry::kind)
    }

    pub fn names_of(&self, kind: EntryKind) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(move |(_, entry)| entry.kind() == kind)
            .map(|(name, _)| name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Entry> {
        self.entries.remove(name)
    }

    pub(crate) fn take(&mut self, name: &str) -> Option<Entry> {
        let entry = self.entries.remove(name)?;
        self.lent.insert(name.to_string());
        Some(entry)
    }

    pub(crate) fn restore(&mut self, name: &str, entry: Entry) {
        self.lent.remove(name);
        self.entries.entry(name.to_string()).or_insert(entry);
    }

    pub(crate) fn holds(&self, name: &str) -> bool {
        self.entries.contains_key(name) || self.lent.contains(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug)]
pub struct PluginCandidate {
    pub manifest: Value,
    pub entries: EntryTable,
}

impl PluginCandidate {
    pub fn new(manifest: Value, entries: EntryTable) -> Self {
        Self { manifest, entries }
    }

    pub fn declared_id(&self) -> Option<&str> {
        self.manifest.get("id").and_then(Value::as_str)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LifecycleHooks {
    pub on_activate: Option<String>,
    pub on_deactivate: Option<String>,
    pub on_content_change: Option<String>,
    pub on_selection_change: Option<String>,
    pub on_save: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelSpec {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub position: PanelPosition,
    pub render: String,
}

impl PanelSpec {
    pub fn descriptor(&self) -> PanelDescriptor {
        PanelDescriptor {
            id: self.id.clone(),
            title: if self.title.trim().is_empty() {
                self.id.clone()
            } else {
                self.title.clone()
            },
            position: self.position,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionProviderSpec {
    pub id: String,
    pub provide: String,
    #[serde(default)]
    pub trigger_characters: Vec<char>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PluginManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    pub category: PluginCategory,
    pub default_enabled: bool,
    pub dependencies: Vec<String>,
    pub hooks: LifecycleHooks,
    pub keybindings: Vec<KeyBinding>,
    pub panels: Vec<PanelSpec>,
    pub completion_providers: Vec<CompletionProviderSpec>,
    pub context_menu: Vec<ContextMenuItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    id: String,
    name: String,
    version: String,
    #[serde(default)]
    category: Option<Value>,
    #[serde(default)]
    default_enabled: Option<Value>,
    #[serde(default)]
    dependencies: Option<Value>,
    #[serde(default)]
    on_activate: Option<String>,
    #[serde(default)]
    on_deactivate: Option<String>,
    #[serde(default)]
    on_content_change: Option<String>,
    #[serde(default)]
    on_selection_change: Option<String>,
    #[serde(default)]
    on_save: Option<String>,
    #[serde(default)]
    keybindings: Vec<KeyBinding>,
    #[serde(default)]
    panels: Vec<PanelSpec>,
    #[serde(default)]
    completion_providers: Vec<CompletionProviderSpec>,
    #[serde(default)]
    context_menu: Vec<ContextMenuItem>,
}

impl PluginManifest {
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        let raw = RawManifest::deserialize(value)?;
        let category = raw
            .category
            .as_ref()
            .and_then(Value::as_str)
            .and_then(PluginCategory::from_tag)
            .unwrap_or_default();
        let default_enabled = raw
            .default_enabled
            .as_ref()
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let dependencies = raw
            .dependencies
            .as_ref()
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            id: raw.id,
            name: raw.name,
            version: raw.version,
            category,
            default_enabled,
            dependencies,
            hooks: LifecycleHooks {
                on_activate: raw.on_activate,
                on_deactivate: raw.on_deactivate,
                on_content_change: raw.on_content_change,
                on_selection_change: raw.on_selection_change,
                on_save: raw.on_save,
            },
            keybindings: raw.keybindings,
            panels: raw.panels,
            completion_providers: raw.completion_providers,
            context_menu: raw.context_menu,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keybind::KeyContext;
    use serde_json::json;

    #[test]
    fn category_tags_roundtrip() {
        for category in PluginCategory::ALL {
            assert_eq!(PluginCategory::from_tag(category.as_tag()), Some(category));
        }
        assert_eq!(PluginCategory::from_tag("games"), None);
    }

    #[test]
    fn manifest_parses_with_lenient_fields() {
        let manifest = PluginManifest::from_value(&json!({
            "id": "word-count",
            "name": "Word Count",
            "version": "1.0.0",
            "category": "unknown",
            "defaultEnabled": "yes",
            "dependencies": ["core", 7],
            "onActivate": "activate",
            "keybindings": [{ "id": "wc.show", "keys": "Ctrl+Shift+W", "command": "show" }],
            "panels": [{ "id": "wc.panel", "render": "render_panel" }],
            "completionProviders": [{ "id": "wc.words", "provide": "words", "triggerCharacters": ["."] }]
        }))
        .expect("manifest parses");

        assert_eq!(manifest.category, PluginCategory::Tools);
        assert!(!manifest.default_enabled);
        assert_eq!(manifest.dependencies, vec!["core".to_string()]);
        assert_eq!(manifest.hooks.on_activate.as_deref(), Some("activate"));
        assert_eq!(manifest.keybindings[0].context, KeyContext::Editor);
        assert_eq!(manifest.panels[0].descriptor().title, "wc.panel");
        assert_eq!(manifest.completion_providers[0].trigger_characters, vec!['.']);
    }

    #[test]
    fn entry_table_take_and_restore() {
        let mut table = EntryTable::new().command("run", |_| Ok(()));
        assert_eq!(table.kind_of("run"), Some(EntryKind::Command));

        let entry = table.take("run").expect("entry present");
        assert!(!table.contains("run"));
        table.restore("run", entry);
        assert!(table.contains("run"));
    }
}
