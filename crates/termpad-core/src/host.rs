use crate::api::{FileInfo, PluginApi, Theme, Toast};
use crate::contribution::{
    CodeLensItem, CompletionItem, ContextMenuItem, ContributionSet, Diagnostic, FoldingRange,
    InlineAnnotation, Owned, PanelDescriptor,
};
use crate::editor::{BufferStore, Selection};
use crate::error::{HostError, HostResult};
use crate::keybind::{KeyContext, KeyEvent, KeybindingManager};
use crate::plugin::{
    CompletionContext, CompletionProviderSpec, Entry, EntryKind, EntryTable, LifecycleHooks,
    PluginCandidate, PluginCategory, PluginManifest, PluginStatus,
};
use crate::settings::HostSettings;
use crate::validator::{self, ValidationIssue, ValidationReport};
use anyhow::anyhow;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PluginSummary {
    pub id: String,
    pub name: String,
    pub version: String,
    pub category: PluginCategory,
    pub status: PluginStatus,
    pub dependencies: Vec<String>,
    pub last_error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CompletionProviderInfo {
    pub id: String,
    pub plugin_id: String,
    pub trigger_characters: Vec<char>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PluginHostState {
    pub generation: u64,
    pub plugins: BTreeMap<String, PluginSummary>,
    pub enabled_plugins: BTreeSet<String>,
    pub diagnostics: Vec<Owned<Diagnostic>>,
    pub code_lenses: Vec<Owned<CodeLensItem>>,
    pub annotations: Vec<Owned<InlineAnnotation>>,
    pub folding_ranges: Vec<Owned<FoldingRange>>,
    pub panels: BTreeMap<String, Owned<PanelDescriptor>>,
    pub open_panels: BTreeSet<String>,
    pub completion_providers: BTreeMap<String, CompletionProviderInfo>,
    pub context_menu: Vec<Owned<ContextMenuItem>>,
}

impl PluginHostState {
    fn build(records: &[PluginRecord], open_panels: &BTreeSet<String>, generation: u64) -> Self {
        let mut state = Self {
            generation,
            ..Self::default()
        };

        for record in records {
            state.plugins.insert(record.id.clone(), record.summary());
            if record.status != PluginStatus::Active {
                continue;
            }
            let owner = &record.id;
            state.enabled_plugins.insert(owner.clone());

            let live = &record.live;
            state
                .diagnostics
                .extend(owned(owner, &live.contributions.diagnostics));
            state
                .code_lenses
                .extend(owned(owner, &live.contributions.code_lenses));
            state
                .annotations
                .extend(owned(owner, &live.contributions.annotations));
            state
                .folding_ranges
                .extend(owned(owner, &live.contributions.folding_ranges));
            state.context_menu.extend(owned(owner, &live.context_menu));

            for panel in &live.panels {
                state.panels.insert(
                    panel.descriptor.id.clone(),
                    Owned {
                        plugin_id: owner.clone(),
                        item: panel.descriptor.clone(),
                    },
                );
            }
            for provider in &live.providers {
                state.completion_providers.insert(
                    provider.id.clone(),
                    CompletionProviderInfo {
                        id: provider.id.clone(),
                        plugin_id: owner.clone(),
                        trigger_characters: provider.trigger_characters.clone(),
                    },
                );
            }
        }

        state.open_panels = open_panels
            .iter()
            .filter(|id| state.panels.contains_key(*id))
            .cloned()
            .collect();
        state
    }
}

fn owned<'a, T: Clone>(owner: &'a str, items: &'a [T]) -> impl Iterator<Item = Owned<T>> + 'a {
    items.iter().map(move |item| Owned {
        plugin_id: owner.to_string(),
        item: item.clone(),
    })
}

#[derive(Debug)]
pub(crate) struct PanelSlot {
    pub(crate) descriptor: PanelDescriptor,
    pub(crate) render: String,
}

#[derive(Debug, Default)]
pub(crate) struct LiveContributions {
    pub(crate) contributions: ContributionSet,
    pub(crate) panels: Vec<PanelSlot>,
    pub(crate) providers: Vec<CompletionProviderSpec>,
    pub(crate) commands: BTreeSet<String>,
    pub(crate) formatters: BTreeMap<String, String>,
    pub(crate) context_menu: Vec<ContextMenuItem>,
    pub(crate) dynamic_entries: Vec<String>,
}

impl LiveContributions {
    fn from_manifest(manifest: &PluginManifest, entries: &EntryTable) -> Self {
        Self {
            panels: manifest
                .panels
                .iter()
                .map(|spec| PanelSlot {
                    descriptor: spec.descriptor(),
                    render: spec.render.clone(),
                })
                .collect(),
            providers: manifest.completion_providers.clone(),
            commands: entries.names_of(EntryKind::Command).map(str::to_string).collect(),
            context_menu: manifest.context_menu.clone(),
            ..Self::default()
        }
    }
}

#[derive(Debug)]
pub(crate) struct PluginRecord {
    pub(crate) id: String,
    pub(crate) manifest: Option<PluginManifest>,
    pub(crate) status: PluginStatus,
    pub(crate) report: ValidationReport,
    pub(crate) entries: EntryTable,
    pub(crate) api: Option<PluginApi>,
    pub(crate) live: LiveContributions,
    pub(crate) last_error: Option<String>,
}

impl PluginRecord {
    fn summary(&self) -> PluginSummary {
        match &self.manifest {
            Some(manifest) => PluginSummary {
                id: self.id.clone(),
                name: manifest.name.clone(),
                version: manifest.version.clone(),
                category: manifest.category,
                status: self.status,
                dependencies: manifest.dependencies.clone(),
                last_error: self.last_error.clone(),
            },
            None => PluginSummary {
                id: self.id.clone(),
                name: self.id.clone(),
                version: String::new(),
                category: PluginCategory::default(),
                status: self.status,
                dependencies: Vec::new(),
                last_error: self.last_error.clone(),
            },
        }
    }

    fn hooks(&self) -> Option<&LifecycleHooks> {
        self.manifest.as_ref().map(|m| &m.hooks)
    }

    fn revoke_handle(&mut self) {
        if let Some(api) = self.api.take() {
            api.revoke();
        }
        for name in self.live.dynamic_entries.drain(..) {
            self.entries.remove(&name);
        }
        self.live = LiveContributions::default();
    }
}

pub(crate) struct HostCore {
    pub(crate) records: Vec<PluginRecord>,
    pub(crate) buffer: Rc<RefCell<dyn BufferStore>>,
    pub(crate) keybindings: Rc<RefCell<KeybindingManager>>,
    pub(crate) file: FileInfo,
    pub(crate) theme: Theme,
    pub(crate) toasts: Vec<Toast>,
    pub(crate) open_panels: BTreeSet<String>,
    pub(crate) enabled_overrides: HashMap<String, bool>,
    snapshot: Arc<PluginHostState>,
}

impl HostCore {
    pub(crate) fn record(&self, id: &str) -> Option<&PluginRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub(crate) fn record_mut(&mut self, id: &str) -> Option<&mut PluginRecord> {
        self.records.iter_mut().find(|r| r.id == id)
    }

    pub(crate) fn active_records(&self) -> impl DoubleEndedIterator<Item = &PluginRecord> {
        self.records
            .iter()
            .filter(|r| r.status == PluginStatus::Active)
    }

    pub(crate) fn publish(&mut self) {
        let generation = self.snapshot.generation + 1;
        self.snapshot = Arc::new(PluginHostState::build(
            &self.records,
            &self.open_panels,
            generation,
        ));
    }

    pub(crate) fn panel_owner(&self, panel_id: &str) -> Option<(String, String)> {
        self.active_records().rev().find_map(|record| {
            record
                .live
                .panels
                .iter()
                .find(|slot| slot.descriptor.id == panel_id)
                .map(|slot| (record.id.clone(), slot.render.clone()))
        })
    }

    fn close_orphan_panels(&mut self) {
        let orphans: Vec<String> = self
            .open_panels
            .iter()
            .filter(|id| self.panel_owner(id).is_none())
            .cloned()
            .collect();
        for panel_id in orphans {
            self.open_panels.remove(&panel_id);
        }
    }

    pub(crate) fn toggle_panel(&mut self, panel_id: &str) -> HostResult<bool> {
        if self.panel_owner(panel_id).is_none() {
            return Err(HostError::PanelNotFound(panel_id.to_string()));
        }
        let open = if self.open_panels.remove(panel_id) {
            false
        } else {
            self.open_panels.insert(panel_id.to_string());
            true
        };
        self.publish();
        Ok(open)
    }
}

pub(crate) enum CallError {
    Unavailable,
    Failed(anyhow::Error),
}

/// Runs one plugin entry point with the core unborrowed, so the plugin can
/// call back into its capability handle. Errors and panics both come back as
/// `CallError::Failed`.
pub(crate) fn call_entry<R>(
    core: &Rc<RefCell<HostCore>>,
    plugin_id: &str,
    name: &str,
    call: impl FnOnce(&mut Entry, &PluginApi) -> anyhow::Result<R>,
) -> Result<R, CallError> {
    let (mut entry, api) = {
        let mut core = core.borrow_mut();
        let record = core.record_mut(plugin_id).ok_or(CallError::Unavailable)?;
        let api = record.api.clone().ok_or(CallError::Unavailable)?;
        let entry = record.entries.take(name).ok_or(CallError::Unavailable)?;
        (entry, api)
    };

    let result = panic::catch_unwind(AssertUnwindSafe(|| call(&mut entry, &api)))
        .unwrap_or_else(|payload| Err(anyhow!("panicked: {}", panic_message(payload.as_ref()))));

    if let Some(record) = core.borrow_mut().record_mut(plugin_id) {
        record.entries.restore(name, entry);
    }
    result.map_err(CallError::Failed)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn wrong_kind(name: &str, expected: EntryKind) -> anyhow::Error {
    anyhow!("entry `{name}` is not a {} entry", expected.as_tag())
}

fn note_failure(core: &Rc<RefCell<HostCore>>, plugin_id: &str, what: &str, err: &anyhow::Error) {
    tracing::warn!(plugin_id, "{what} failed: {err:#}");
    let mut core = core.borrow_mut();
    if let Some(record) = core.record_mut(plugin_id) {
        record.last_error = Some(format!("{what}: {err:#}"));
    }
    core.publish();
}

pub(crate) fn run_command(core: &Rc<RefCell<HostCore>>, command: &str) -> HostResult<()> {
    let owner = core
        .borrow()
        .active_records()
        .rev()
        .find(|record| record.live.commands.contains(command))
        .map(|record| record.id.clone())
        .ok_or_else(|| HostError::CommandNotFound(command.to_string()))?;
    run_command_of(core, &owner, command)
}

fn run_command_of(core: &Rc<RefCell<HostCore>>, plugin_id: &str, command: &str) -> HostResult<()> {
    let outcome = call_entry(core, plugin_id, command, |entry, api| match entry {
        Entry::Command(f) => f(api),
        _ => Err(wrong_kind(command, EntryKind::Command)),
    });
    match outcome {
        Ok(()) => Ok(()),
        Err(CallError::Unavailable) => Err(HostError::CommandBusy(command.to_string())),
        Err(CallError::Failed(err)) => {
            note_failure(core, plugin_id, &format!("command `{command}`"), &err);
            Ok(())
        }
    }
}

pub struct PluginHost {
    core: Rc<RefCell<HostCore>>,
}

impl PluginHost {
    pub fn new(buffer: Rc<RefCell<dyn BufferStore>>) -> Self {
        Self::with_keybindings(buffer, Rc::new(RefCell::new(KeybindingManager::new())))
    }

    pub fn with_keybindings(
        buffer: Rc<RefCell<dyn BufferStore>>,
        keybindings: Rc<RefCell<KeybindingManager>>,
    ) -> Self {
        Self {
            core: Rc::new(RefCell::new(HostCore {
                records: Vec::new(),
                buffer,
                keybindings,
                file: FileInfo::default(),
                theme: Theme::default(),
                toasts: Vec::new(),
                open_panels: BTreeSet::new(),
                enabled_overrides: HashMap::new(),
                snapshot: Arc::new(PluginHostState::default()),
            })),
        }
    }

    pub fn apply_settings(&mut self, settings: &HostSettings) {
        self.core.borrow_mut().enabled_overrides = settings.plugins.enabled.clone();
    }

    pub fn keybindings(&self) -> Rc<RefCell<KeybindingManager>> {
        self.core.borrow().keybindings.clone()
    }

    pub fn snapshot(&self) -> Arc<PluginHostState> {
        self.core.borrow().snapshot.clone()
    }

    pub fn status(&self, plugin_id: &str) -> Option<PluginStatus> {
        self.core.borrow().record(plugin_id).map(|r| r.status)
    }

    pub fn report(&self, plugin_id: &str) -> Option<ValidationReport> {
        self.core.borrow().record(plugin_id).map(|r| r.report.clone())
    }

    pub fn plugin_ids(&self) -> Vec<String> {
        self.core.borrow().records.iter().map(|r| r.id.clone()).collect()
    }

    pub fn set_file(&mut self, file: FileInfo) {
        self.core.borrow_mut().file = file;
    }

    pub fn theme(&self) -> Theme {
        self.core.borrow().theme.clone()
    }

    pub fn set_theme(&mut self, theme: Theme) {
        self.core.borrow_mut().theme = theme;
    }

    pub fn drain_toasts(&mut self) -> Vec<Toast> {
        std::mem::take(&mut self.core.borrow_mut().toasts)
    }

    pub fn register(&mut self, candidate: PluginCandidate) -> ValidationReport {
        let report = validator::validate(&candidate);
        self.register_checked(candidate, report)
    }

    pub fn register_all(&mut self, candidates: Vec<PluginCandidate>) -> Vec<ValidationReport> {
        let reports = validator::validate_batch(
            candidates
                .iter()
                .map(|c| (&c.manifest, Some(&c.entries))),
        );
        candidates
            .into_iter()
            .zip(reports)
            .map(|(candidate, report)| self.register_checked(candidate, report))
            .collect()
    }

    fn register_checked(
        &mut self,
        candidate: PluginCandidate,
        mut report: ValidationReport,
    ) -> ValidationReport {
        let PluginCandidate { manifest, entries } = candidate;

        if let Some(id) = report.plugin_id.clone() {
            if self.core.borrow().record(&id).is_some() {
                tracing::warn!(plugin_id = %id, "plugin id already registered, ignoring");
                report.push(ValidationIssue::error(
                    "id",
                    format!("plugin `{id}` is already registered"),
                ));
                return report;
            }
        }

        let typed = if report.valid {
            match PluginManifest::from_value(&manifest) {
                Ok(typed) => Some(typed),
                Err(err) => {
                    report.push(ValidationIssue::error("", format!("malformed manifest: {err}")));
                    None
                }
            }
        } else {
            None
        };

        let Some(typed) = typed else {
            let mut core = self.core.borrow_mut();
            let id = report
                .plugin_id
                .clone()
                .unwrap_or_else(|| format!("<invalid #{}>", core.records.len()));
            tracing::warn!(
                plugin_id = %id,
                errors = report.errors().count(),
                "plugin rejected by validation"
            );
            core.records.push(PluginRecord {
                id,
                manifest: None,
                status: PluginStatus::Failed,
                report: report.clone(),
                entries: EntryTable::new(),
                api: None,
                live: LiveContributions::default(),
                last_error: report.errors().next().map(ToString::to_string),
            });
            core.publish();
            return report;
        };

        let id = typed.id.clone();
        let should_enable = {
            let mut core = self.core.borrow_mut();
            for dependency in &typed.dependencies {
                let already_noted = report.warnings().any(|issue| {
                    issue.field == "dependencies" && issue.message.contains(&format!("`{dependency}`"))
                });
                if core.record(dependency).is_none() && !already_noted {
                    tracing::warn!(plugin_id = %id, dependency = %dependency, "dependency is not registered");
                    report.push(ValidationIssue::warning(
                        "dependencies",
                        format!("dependency `{dependency}` is not registered"),
                    ));
                }
            }
            let should_enable = core
                .enabled_overrides
                .get(&id)
                .copied()
                .unwrap_or(typed.default_enabled);
            tracing::info!(plugin_id = %id, version = %typed.version, "registered plugin");
            core.records.push(PluginRecord {
                id: id.clone(),
                manifest: Some(typed),
                status: PluginStatus::Registered,
                report: report.clone(),
                entries,
                api: None,
                live: LiveContributions::default(),
                last_error: None,
            });
            core.publish();
            should_enable
        };

        if should_enable {
            if let Err(err) = self.enable(&id) {
                tracing::warn!(plugin_id = %id, "enable after register failed: {err}");
            }
        }
        report
    }

    /// Activates a plugin. A plugin whose `onActivate` fails ends up `Failed`
    /// with nothing contributed; calling `enable` again retries.
    pub fn enable(&mut self, plugin_id: &str) -> HostResult<()> {
        let (on_activate, keybindings) = {
            let mut core = self.core.borrow_mut();
            let weak = Rc::downgrade(&self.core);
            let record = core
                .record_mut(plugin_id)
                .ok_or_else(|| HostError::PluginNotFound(plugin_id.to_string()))?;
            if record.status == PluginStatus::Active {
                return Ok(());
            }
            let Some(manifest) = record.manifest.as_ref() else {
                return Err(HostError::PluginRejected(plugin_id.to_string()));
            };
            let on_activate = manifest.hooks.on_activate.clone();
            let keybindings = manifest.keybindings.clone();
            record.live = LiveContributions::from_manifest(manifest, &record.entries);
            record.api = Some(PluginApi::new(plugin_id, weak));
            // Active before onActivate so the hook can reach its own panels and commands.
            record.status = PluginStatus::Active;
            (on_activate, keybindings)
        };

        if let Some(hook) = on_activate {
            let outcome = call_entry(&self.core, plugin_id, &hook, |entry, api| match entry {
                Entry::Lifecycle(f) => f(api),
                _ => Err(wrong_kind(&hook, EntryKind::Lifecycle)),
            });
            let err = match outcome {
                Ok(()) => None,
                Err(CallError::Failed(err)) => Some(err),
                Err(CallError::Unavailable) => Some(anyhow!("entry `{hook}` is unavailable")),
            };
            if let Some(err) = err {
                tracing::warn!(plugin_id, "activation failed: {err:#}");
                self.keybindings().borrow_mut().unregister_plugin_bindings(plugin_id);
                let mut core = self.core.borrow_mut();
                if let Some(record) = core.record_mut(plugin_id) {
                    record.revoke_handle();
                    record.status = PluginStatus::Failed;
                    record.last_error = Some(format!("onActivate: {err:#}"));
                }
                core.close_orphan_panels();
                core.publish();
                return Ok(());
            }
        }

        self.keybindings()
            .borrow_mut()
            .register_plugin_bindings(plugin_id, keybindings);

        let mut core = self.core.borrow_mut();
        if let Some(record) = core.record_mut(plugin_id) {
            record.last_error = None;
        }
        core.publish();
        tracing::info!(plugin_id, "plugin enabled");
        Ok(())
    }

    pub fn disable(&mut self, plugin_id: &str) -> HostResult<()> {
        let on_deactivate = {
            let core = self.core.borrow();
            let record = core
                .record(plugin_id)
                .ok_or_else(|| HostError::PluginNotFound(plugin_id.to_string()))?;
            if record.status != PluginStatus::Active {
                return Ok(());
            }
            record.hooks().and_then(|h| h.on_deactivate.clone())
        };

        if let Some(hook) = on_deactivate {
            let outcome = call_entry(&self.core, plugin_id, &hook, |entry, api| match entry {
                Entry::Lifecycle(f) => f(api),
                _ => Err(wrong_kind(&hook, EntryKind::Lifecycle)),
            });
            if let Err(CallError::Failed(err)) = outcome {
                tracing::warn!(plugin_id, "onDeactivate failed: {err:#}");
            }
        }

        self.keybindings().borrow_mut().unregister_plugin_bindings(plugin_id);

        let mut core = self.core.borrow_mut();
        if let Some(record) = core.record_mut(plugin_id) {
            record.revoke_handle();
            record.status = PluginStatus::Disabled;
        }
        core.close_orphan_panels();
        core.publish();
        tracing::info!(plugin_id, "plugin disabled");
        Ok(())
    }

    pub fn dispatch_content_change(&mut self, content: &str) {
        self.dispatch(
            "onContentChange",
            |hooks| hooks.on_content_change.as_deref(),
            |entry, api, name| match entry {
                Entry::Content(f) => f(api, content),
                _ => Err(wrong_kind(name, EntryKind::Content)),
            },
        );
    }

    pub fn dispatch_selection_change(&mut self, selection: Selection) {
        self.dispatch(
            "onSelectionChange",
            |hooks| hooks.on_selection_change.as_deref(),
            |entry, api, name| match entry {
                Entry::Selection(f) => f(api, selection),
                _ => Err(wrong_kind(name, EntryKind::Selection)),
            },
        );
    }

    pub fn dispatch_save(&mut self) {
        self.dispatch(
            "onSave",
            |hooks| hooks.on_save.as_deref(),
            |entry, api, name| match entry {
                Entry::Save(f) => f(api),
                _ => Err(wrong_kind(name, EntryKind::Save)),
            },
        );
    }

    fn dispatch<H, C>(&mut self, hook: &str, select: H, mut call: C)
    where
        H: Fn(&LifecycleHooks) -> Option<&str>,
        C: FnMut(&mut Entry, &PluginApi, &str) -> anyhow::Result<()>,
    {
        let targets: Vec<(String, String)> = self
            .core
            .borrow()
            .active_records()
            .filter_map(|record| {
                let name = record.hooks().and_then(&select)?;
                Some((record.id.clone(), name.to_string()))
            })
            .collect();

        for (plugin_id, name) in targets {
            if self.status(&plugin_id) != Some(PluginStatus::Active) {
                continue;
            }
            let outcome = call_entry(&self.core, &plugin_id, &name, |entry, api| {
                call(entry, api, &name)
            });
            match outcome {
                Ok(()) => {}
                Err(CallError::Failed(err)) => note_failure(&self.core, &plugin_id, hook, &err),
                Err(CallError::Unavailable) => {
                    tracing::debug!(plugin_id = %plugin_id, hook, "hook entry unavailable, skipped")
                }
            }
        }
    }

    pub fn handle_key_event(&mut self, event: &KeyEvent, context: KeyContext) -> bool {
        let handler = self.keybindings().borrow().get_handler(event, context);
        let Some(handler) = handler else {
            return false;
        };
        if let Err(err) = run_command_of(&self.core, &handler.plugin_id, &handler.command) {
            tracing::warn!(
                plugin_id = %handler.plugin_id,
                binding_id = %handler.binding_id,
                "key binding could not run: {err}"
            );
        }
        true
    }

    pub fn execute_command(&mut self, command: &str) -> HostResult<()> {
        run_command(&self.core, command)
    }

    pub fn request_completions(&mut self, context: &CompletionContext) -> Vec<CompletionItem> {
        let providers: Vec<(String, CompletionProviderSpec)> = self
            .core
            .borrow()
            .active_records()
            .flat_map(|record| {
                record
                    .live
                    .providers
                    .iter()
                    .filter(|p| match context.trigger_character {
                        Some(c) => p.trigger_characters.contains(&c),
                        None => true,
                    })
                    .map(|p| (record.id.clone(), p.clone()))
            })
            .collect();

        let mut items = Vec::new();
        for (plugin_id, provider) in providers {
            let outcome = call_entry(&self.core, &plugin_id, &provider.provide, |entry, api| {
                match entry {
                    Entry::Completion(f) => f(api, context),
                    _ => Err(wrong_kind(&provider.provide, EntryKind::Completion)),
                }
            });
            match outcome {
                Ok(found) => items.extend(found.into_iter().map(|mut item| {
                    item.provider_id = provider.id.clone();
                    item
                })),
                Err(CallError::Failed(err)) => note_failure(
                    &self.core,
                    &plugin_id,
                    &format!("completion provider `{}`", provider.id),
                    &err,
                ),
                Err(CallError::Unavailable) => {}
            }
        }
        items
    }

    pub fn render_panel(&mut self, panel_id: &str) -> HostResult<Option<String>> {
        let (plugin_id, render) = self
            .core
            .borrow()
            .panel_owner(panel_id)
            .ok_or_else(|| HostError::PanelNotFound(panel_id.to_string()))?;
        let outcome = call_entry(&self.core, &plugin_id, &render, |entry, api| match entry {
            Entry::Panel(f) => f(api),
            _ => Err(wrong_kind(&render, EntryKind::Panel)),
        });
        match outcome {
            Ok(body) => Ok(Some(body)),
            Err(CallError::Failed(err)) => {
                note_failure(&self.core, &plugin_id, &format!("panel `{panel_id}`"), &err);
                Ok(None)
            }
            Err(CallError::Unavailable) => Ok(None),
        }
    }

    pub fn toggle_panel(&mut self, panel_id: &str) -> HostResult<bool> {
        self.core.borrow_mut().toggle_panel(panel_id)
    }

    pub fn format_document(&mut self, language: &str) -> HostResult<bool> {
        let target = self.core.borrow().active_records().rev().find_map(|record| {
            record
                .live
                .formatters
                .get(language)
                .map(|entry| (record.id.clone(), entry.clone()))
        });
        let Some((plugin_id, name)) = target else {
            return Ok(false);
        };

        let buffer = self.core.borrow().buffer.clone();
        let original = buffer.borrow().content();
        let outcome = call_entry(&self.core, &plugin_id, &name, |entry, _| match entry {
            Entry::Format(f) => f(&original),
            _ => Err(wrong_kind(&name, EntryKind::Format)),
        });
        match outcome {
            Ok(formatted) => {
                if formatted != original {
                    buffer.borrow_mut().set_content(&formatted);
                }
                Ok(true)
            }
            Err(CallError::Failed(err)) => {
                note_failure(&self.core, &plugin_id, &format!("formatter for {language}"), &err);
                Ok(false)
            }
            Err(CallError::Unavailable) => Ok(false),
        }
    }

    pub fn teardown(&mut self) {
        let active: Vec<String> = self
            .core
            .borrow()
            .active_records()
            .map(|r| r.id.clone())
            .collect();
        for plugin_id in active {
            if let Err(err) = self.disable(&plugin_id) {
                tracing::warn!(plugin_id = %plugin_id, "disable during teardown failed: {err}");
            }
        }
        let mut core = self.core.borrow_mut();
        if core.records.is_empty() {
            return;
        }
        core.records.clear();
        core.open_panels.clear();
        core.publish();
        tracing::info!("plugin host torn down");
    }
}

impl Drop for PluginHost {
    fn drop(&mut self) {
        self.teardown();
    }
}
