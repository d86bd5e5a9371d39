use crate::contribution::{
    CompletionItem, Contribution, ContributionKind, ContextMenuItem, Diagnostic, PanelDescriptor,
};
use crate::editor::{BufferStore, Selection};
use crate::error::{HostError, HostResult};
use crate::host::{self, HostCore, PanelSlot};
use crate::keybind::{normalize_keys, KeyBinding, KeybindingManager};
use crate::plugin::{CompletionContext, CompletionProviderSpec, Entry};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Theme {
    pub name: String,
    pub dark: bool,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            name: "default-dark".to_string(),
            dark: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastLevel {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Toast {
    pub plugin_id: String,
    pub level: ToastLevel,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub path: String,
    pub language: String,
}

impl FileInfo {
    pub fn new(path: impl Into<String>, language: impl Into<String>) -> Self {
        let path = path.into();
        let name = path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default()
            .to_string();
        Self {
            name,
            path,
            language: language.into(),
        }
    }
}

#[derive(Clone)]
pub struct PluginApi {
    plugin_id: Rc<str>,
    core: Weak<RefCell<HostCore>>,
    alive: Rc<Cell<bool>>,
}

impl fmt::Debug for PluginApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginApi")
            .field("plugin_id", &self.plugin_id)
            .field("alive", &self.is_valid())
            .finish()
    }
}

impl PluginApi {
    pub(crate) fn new(plugin_id: &str, core: Weak<RefCell<HostCore>>) -> Self {
        Self {
            plugin_id: Rc::from(plugin_id),
            core,
            alive: Rc::new(Cell::new(true)),
        }
    }

    pub(crate) fn revoke(&self) {
        self.alive.set(false);
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn is_valid(&self) -> bool {
        self.alive.get() && self.core.strong_count() > 0
    }

    fn core(&self) -> HostResult<Rc<RefCell<HostCore>>> {
        if !self.alive.get() {
            return Err(self.revoked());
        }
        self.core.upgrade().ok_or_else(|| self.revoked())
    }

    fn revoked(&self) -> HostError {
        HostError::HandleRevoked(self.plugin_id.to_string())
    }

    fn with_core<R>(&self, f: impl FnOnce(&mut HostCore) -> R) -> HostResult<R> {
        let core = self.core()?;
        let mut core = core.try_borrow_mut().map_err(|_| {
            tracing::warn!(plugin_id = %self.plugin_id, "host busy, capability call dropped");
            self.revoked()
        })?;
        Ok(f(&mut core))
    }

    fn with_record<R>(&self, f: impl FnOnce(&mut host::PluginRecord) -> R) -> HostResult<R> {
        self.with_core(|core| {
            let record = core.record_mut(&self.plugin_id)?;
            let out = f(record);
            core.publish();
            Some(out)
        })?
        .ok_or_else(|| self.revoked())
    }

    fn buffer(&self) -> Option<Rc<RefCell<dyn BufferStore>>> {
        self.with_core(|core| core.buffer.clone()).ok()
    }

    fn keybindings(&self) -> HostResult<Rc<RefCell<KeybindingManager>>> {
        self.with_core(|core| core.keybindings.clone())
    }

    // buffer

    pub fn content(&self) -> String {
        self.buffer()
            .map(|buffer| buffer.borrow().content())
            .unwrap_or_default()
    }

    pub fn set_content(&self, text: &str) {
        if let Some(buffer) = self.buffer() {
            buffer.borrow_mut().set_content(text);
        }
    }

    pub fn selection(&self) -> Selection {
        self.buffer()
            .map(|buffer| buffer.borrow().selection())
            .unwrap_or_default()
    }

    pub fn set_selection(&self, selection: Selection) {
        if let Some(buffer) = self.buffer() {
            buffer.borrow_mut().set_selection(selection);
        }
    }

    pub fn insert_text(&self, text: &str, position: Option<usize>) {
        if let Some(buffer) = self.buffer() {
            buffer.borrow_mut().insert_text(text, position);
        }
    }

    pub fn file_info(&self) -> FileInfo {
        self.with_core(|core| core.file.clone()).unwrap_or_default()
    }

    // ui

    pub fn theme(&self) -> Theme {
        self.with_core(|core| core.theme.clone()).unwrap_or_default()
    }

    pub fn apply_theme(&self, theme: Theme) {
        let _ = self.with_core(|core| core.theme = theme);
    }

    pub fn show_toast(&self, message: impl Into<String>, level: ToastLevel) {
        let plugin_id = self.plugin_id.to_string();
        let message = message.into();
        let _ = self.with_core(|core| {
            core.toasts.push(Toast {
                plugin_id,
                level,
                message,
            })
        });
    }

    pub fn register_context_menu_item(&self, item: ContextMenuItem) -> HostResult<()> {
        self.with_record(|record| {
            let items = &mut record.live.context_menu;
            match items.iter_mut().find(|existing| existing.id == item.id) {
                Some(existing) => *existing = item,
                None => items.push(item),
            }
        })
    }

    pub fn register_panel(
        &self,
        descriptor: PanelDescriptor,
        render: impl FnMut(&PluginApi) -> anyhow::Result<String> + 'static,
    ) -> HostResult<()> {
        let entry_name = format!("panel:{}", descriptor.id);
        self.with_record(|record| {
            add_dynamic_entry(record, &entry_name, Entry::Panel(Box::new(render)))?;
            record.live.panels.retain(|slot| slot.descriptor.id != descriptor.id);
            record.live.panels.push(PanelSlot {
                descriptor,
                render: entry_name.clone(),
            });
            Ok(())
        })?
    }

    pub fn toggle_panel(&self, panel_id: &str) -> HostResult<bool> {
        self.with_core(|core| core.toggle_panel(panel_id))?
    }

    // commands and keys

    pub fn register_command(
        &self,
        command: &str,
        run: impl FnMut(&PluginApi) -> anyhow::Result<()> + 'static,
    ) -> HostResult<()> {
        let command = command.to_string();
        self.with_record(|record| {
            add_dynamic_entry(record, &command, Entry::Command(Box::new(run)))?;
            record.live.commands.insert(command.clone());
            Ok(())
        })?
    }

    pub fn register_keybinding(
        &self,
        binding: KeyBinding,
        run: impl FnMut(&PluginApi) -> anyhow::Result<()> + 'static,
    ) -> HostResult<()> {
        if normalize_keys(&binding.keys).is_none() {
            return Err(HostError::InvalidKeys(binding.keys));
        }
        self.register_command(&binding.command, run)?;
        self.keybindings()?
            .borrow_mut()
            .register_plugin_bindings(&self.plugin_id, [binding]);
        Ok(())
    }

    pub fn execute_command(&self, command: &str) -> HostResult<()> {
        let core = self.core()?;
        host::run_command(&core, command)
    }

    pub fn register_formatter(
        &self,
        language: &str,
        format: impl FnMut(&str) -> anyhow::Result<String> + 'static,
    ) -> HostResult<()> {
        let entry_name = format!("format:{language}");
        let language = language.to_string();
        self.with_record(|record| {
            add_dynamic_entry(record, &entry_name, Entry::Format(Box::new(format)))?;
            record.live.formatters.insert(language, entry_name.clone());
            Ok(())
        })?
    }

    pub fn register_completion_provider(
        &self,
        id: &str,
        trigger_characters: Vec<char>,
        provide: impl FnMut(&PluginApi, &CompletionContext) -> anyhow::Result<Vec<CompletionItem>>
            + 'static,
    ) -> HostResult<()> {
        let entry_name = format!("completion:{id}");
        let spec = CompletionProviderSpec {
            id: id.to_string(),
            provide: entry_name.clone(),
            trigger_characters,
        };
        self.with_record(|record| {
            add_dynamic_entry(record, &entry_name, Entry::Completion(Box::new(provide)))?;
            record.live.providers.retain(|p| p.id != spec.id);
            record.live.providers.push(spec);
            Ok(())
        })?
    }

    // contributions

    pub fn contribute(&self, contribution: Contribution) -> HostResult<()> {
        self.with_record(|record| record.live.contributions.push(contribution))
    }

    pub fn set_diagnostics(&self, diagnostics: Vec<Diagnostic>) -> HostResult<()> {
        self.with_record(|record| {
            let set = &mut record.live.contributions;
            set.clear(ContributionKind::Diagnostic);
            for diagnostic in diagnostics {
                set.push(Contribution::Diagnostic(diagnostic));
            }
        })
    }

    pub fn remove_contribution(&self, kind: ContributionKind, id: &str) -> HostResult<bool> {
        self.with_record(|record| record.live.contributions.remove(kind, id))
    }

    pub fn clear_contributions(&self, kind: ContributionKind) -> HostResult<()> {
        self.with_record(|record| record.live.contributions.clear(kind))
    }
}

/// Entries the manifest exports are never replaced, so they survive a
/// disable/enable cycle intact.
fn add_dynamic_entry(record: &mut host::PluginRecord, name: &str, entry: Entry) -> HostResult<()> {
    let dynamic = record.live.dynamic_entries.iter().any(|n| n == name);
    if !dynamic && record.entries.holds(name) {
        return Err(HostError::EntryConflict(name.to_string()));
    }
    record.entries.insert(name, entry);
    if !dynamic {
        record.live.dynamic_entries.push(name.to_string());
    }
    Ok(())
}
