use crate::keybind::{normalize_keys, KeyContext};
use crate::plugin::{EntryKind, EntryTable, PluginCandidate, PluginCategory, LIFECYCLE_HOOKS};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueLevel {
    Error,
    Warning,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub level: IssueLevel,
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    pub(crate) fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    pub(crate) fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.level {
            IssueLevel::Error => "error",
            IssueLevel::Warning => "warning",
        };
        if self.field.is_empty() {
            write!(f, "{level}: {}", self.message)
        } else {
            write!(f, "{level}: {}: {}", self.field, self.message)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub valid: bool,
    pub plugin_id: Option<String>,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    fn from_issues(plugin_id: Option<String>, issues: Vec<ValidationIssue>) -> Self {
        let valid = !issues.iter().any(|i| i.level == IssueLevel::Error);
        Self {
            valid,
            plugin_id,
            issues,
        }
    }

    pub(crate) fn push(&mut self, issue: ValidationIssue) {
        if issue.level == IssueLevel::Error {
            self.valid = false;
        }
        self.issues.push(issue);
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.level == IssueLevel::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.level == IssueLevel::Warning)
    }

    pub fn has_error_on(&self, field: &str) -> bool {
        self.errors().any(|i| i.field == field)
    }

    pub(crate) fn reject(plugin_id: Option<String>, field: &str, message: String) -> Self {
        Self::from_issues(plugin_id, vec![ValidationIssue::error(field, message)])
    }
}

pub fn validate(candidate: &PluginCandidate) -> ValidationReport {
    validate_manifest(&candidate.manifest, Some(&candidate.entries))
}

pub fn validate_manifest(manifest: &Value, entries: Option<&EntryTable>) -> ValidationReport {
    let Some(object) = manifest.as_object() else {
        return ValidationReport::reject(
            None,
            "",
            "plugin descriptor must be a JSON object".to_string(),
        );
    };

    let mut issues = Vec::new();
    let plugin_id = check_id(object, &mut issues);
    check_required_string(object, "name", &mut issues);
    if let Some(version) = check_required_string(object, "version", &mut issues) {
        if !is_semver_like(&version) {
            issues.push(ValidationIssue::warning(
                "version",
                format!("`{version}` does not look like a semantic version (x.y.z)"),
            ));
        }
    }
    check_category(object, &mut issues);
    check_flags(object, &mut issues);

    for (hook, kind) in LIFECYCLE_HOOKS {
        if let Some(value) = object.get(hook) {
            check_entry_ref(value, hook, kind, entries, &mut issues);
        }
    }

    check_list(object, "panels", &mut issues, |item, field, issues| {
        check_item_id(item, field, issues);
        check_item_entry(item, field, "render", EntryKind::Panel, entries, issues);
    });
    check_list(object, "completionProviders", &mut issues, |item, field, issues| {
        check_item_id(item, field, issues);
        check_item_entry(item, field, "provide", EntryKind::Completion, entries, issues);
        if let Some(triggers) = item.get("triggerCharacters") {
            let ok = triggers.as_array().is_some_and(|chars| {
                chars
                    .iter()
                    .all(|c| c.as_str().is_some_and(|s| s.chars().count() == 1))
            });
            if !ok {
                issues.push(ValidationIssue::error(
                    format!("{field}.triggerCharacters"),
                    "must be a list of single characters",
                ));
            }
        }
    });
    check_list(object, "keybindings", &mut issues, |item, field, issues| {
        check_item_id(item, field, issues);
        check_item_entry(item, field, "command", EntryKind::Command, entries, issues);
        match item.get("keys").and_then(Value::as_str) {
            Some(keys) if normalize_keys(keys).is_some() => {}
            Some(keys) => issues.push(ValidationIssue::error(
                format!("{field}.keys"),
                format!("invalid key combination `{keys}`"),
            )),
            None => issues.push(ValidationIssue::error(
                format!("{field}.keys"),
                "key combination is required",
            )),
        }
        if let Some(context) = item.get("context") {
            let known = context.as_str().and_then(KeyContext::from_tag).is_some();
            if !known {
                issues.push(ValidationIssue::error(
                    format!("{field}.context"),
                    "context must be one of editor, find, always",
                ));
            }
        }
    });
    check_list(object, "contextMenu", &mut issues, |item, field, issues| {
        check_item_id(item, field, issues);
        for key in ["label", "command"] {
            if !item
                .get(key)
                .and_then(Value::as_str)
                .is_some_and(|s| !s.trim().is_empty())
            {
                issues.push(ValidationIssue::error(
                    format!("{field}.{key}"),
                    format!("{key} is required"),
                ));
            }
        }
    });

    ValidationReport::from_issues(plugin_id, issues)
}

pub fn validate_batch<'a, I>(candidates: I) -> Vec<ValidationReport>
where
    I: IntoIterator<Item = (&'a Value, Option<&'a EntryTable>)>,
{
    let candidates: Vec<_> = candidates.into_iter().collect();
    let mut reports: Vec<ValidationReport> = candidates
        .iter()
        .map(|(manifest, entries)| validate_manifest(manifest, *entries))
        .collect();

    let mut seen: HashMap<String, usize> = HashMap::new();
    for (index, report) in reports.iter_mut().enumerate() {
        let Some(id) = report.plugin_id.clone() else {
            continue;
        };
        if let Some(first) = seen.get(&id) {
            report.push(ValidationIssue::error(
                "id",
                format!("duplicate plugin id `{id}` (first declared by candidate #{first})"),
            ));
        } else {
            seen.insert(id, index);
        }
    }

    let known: HashSet<String> = seen.into_keys().collect();
    for ((manifest, _), report) in candidates.iter().zip(reports.iter_mut()) {
        for dependency in declared_dependencies(manifest) {
            if !known.contains(dependency) {
                report.push(ValidationIssue::warning(
                    "dependencies",
                    format!("dependency `{dependency}` is not part of the plugin set"),
                ));
            }
        }
    }

    reports
}

pub(crate) fn declared_dependencies(manifest: &Value) -> impl Iterator<Item = &str> {
    manifest
        .get("dependencies")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
}

/// `^[a-z0-9][a-z0-9._-]*$`
pub fn is_well_formed_id(id: &str) -> bool {
    let mut chars = id.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_lowercase() || first.is_ascii_digit())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
}

pub fn is_semver_like(version: &str) -> bool {
    let core = version
        .split_once(['-', '+'])
        .map(|(core, rest)| if rest.is_empty() { "" } else { core })
        .unwrap_or(version);
    let parts: Vec<&str> = core.split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

fn check_id(object: &Map<String, Value>, issues: &mut Vec<ValidationIssue>) -> Option<String> {
    let id = check_required_string(object, "id", issues)?;
    if !is_well_formed_id(&id) {
        issues.push(ValidationIssue::warning(
            "id",
            format!("`{id}` should be lowercase letters, digits, `.`, `_` or `-`"),
        ));
    }
    Some(id)
}

fn check_required_string(
    object: &Map<String, Value>,
    field: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Option<String> {
    match object.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        Some(Value::String(_)) => {
            issues.push(ValidationIssue::error(field, format!("{field} must not be empty")));
            None
        }
        Some(_) => {
            issues.push(ValidationIssue::error(field, format!("{field} must be a string")));
            None
        }
        None => {
            issues.push(ValidationIssue::error(field, format!("{field} is required")));
            None
        }
    }
}

fn check_category(object: &Map<String, Value>, issues: &mut Vec<ValidationIssue>) {
    let Some(value) = object.get("category") else {
        return;
    };
    if value.as_str().and_then(PluginCategory::from_tag).is_none() {
        issues.push(ValidationIssue::warning(
            "category",
            format!("unknown category {value}, defaulting to `tools`"),
        ));
    }
}

fn check_flags(object: &Map<String, Value>, issues: &mut Vec<ValidationIssue>) {
    if object.get("defaultEnabled").is_some_and(|v| !v.is_boolean()) {
        issues.push(ValidationIssue::warning(
            "defaultEnabled",
            "must be a boolean, treating as false",
        ));
    }
    if let Some(deps) = object.get("dependencies") {
        let ok = deps
            .as_array()
            .is_some_and(|items| items.iter().all(Value::is_string));
        if !ok {
            issues.push(ValidationIssue::warning(
                "dependencies",
                "must be a list of plugin ids, non-string entries are ignored",
            ));
        }
    }
}

fn check_entry_ref(
    value: &Value,
    field: &str,
    kind: EntryKind,
    entries: Option<&EntryTable>,
    issues: &mut Vec<ValidationIssue>,
) {
    let Some(name) = value.as_str().filter(|s| !s.trim().is_empty()) else {
        issues.push(ValidationIssue::error(
            field,
            "must name an entry point the host can call",
        ));
        return;
    };
    let Some(entries) = entries else {
        return;
    };
    match entries.kind_of(name) {
        Some(found) if found == kind => {}
        Some(found) => issues.push(ValidationIssue::error(
            field,
            format!(
                "entry `{name}` is a {} entry, expected {}",
                found.as_tag(),
                kind.as_tag()
            ),
        )),
        None => issues.push(ValidationIssue::error(
            field,
            format!("entry `{name}` is not exported by the plugin"),
        )),
    }
}

fn check_list<F>(
    object: &Map<String, Value>,
    field: &str,
    issues: &mut Vec<ValidationIssue>,
    mut check_item: F,
) where
    F: FnMut(&Map<String, Value>, &str, &mut Vec<ValidationIssue>),
{
    let Some(value) = object.get(field) else {
        return;
    };
    let Some(items) = value.as_array() else {
        issues.push(ValidationIssue::error(field, format!("{field} must be a list")));
        return;
    };
    for (index, item) in items.iter().enumerate() {
        let item_field = format!("{field}[{index}]");
        match item.as_object() {
            Some(item) => check_item(item, &item_field, issues),
            None => issues.push(ValidationIssue::error(item_field, "must be an object")),
        }
    }
}

fn check_item_id(item: &Map<String, Value>, field: &str, issues: &mut Vec<ValidationIssue>) {
    if !item
        .get("id")
        .and_then(Value::as_str)
        .is_some_and(|s| !s.trim().is_empty())
    {
        issues.push(ValidationIssue::error(format!("{field}.id"), "id is required"));
    }
}

fn check_item_entry(
    item: &Map<String, Value>,
    field: &str,
    key: &str,
    kind: EntryKind,
    entries: Option<&EntryTable>,
    issues: &mut Vec<ValidationIssue>,
) {
    let item_field = format!("{field}.{key}");
    match item.get(key) {
        Some(value) => check_entry_ref(value, &item_field, kind, entries, issues),
        None => issues.push(ValidationIssue::error(item_field, format!("{key} is required"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entries() -> EntryTable {
        EntryTable::new()
            .lifecycle("activate", |_| Ok(()))
            .command("save_all", |_| Ok(()))
            .panel("render", |_| Ok(String::new()))
            .completion("words", |_, _| Ok(Vec::new()))
    }

    #[test]
    fn accepts_complete_manifest() {
        let report = validate_manifest(
            &json!({
                "id": "outline",
                "name": "Outline",
                "version": "0.3.1",
                "category": "ui",
                "onActivate": "activate",
                "keybindings": [{ "id": "outline.save", "keys": "Ctrl+S", "command": "save_all" }],
                "panels": [{ "id": "outline.panel", "title": "Outline", "render": "render" }],
                "completionProviders": [{ "id": "outline.words", "provide": "words" }]
            }),
            Some(&entries()),
        );
        assert!(report.valid, "{:?}", report.issues);
        assert!(report.issues.is_empty());
        assert_eq!(report.plugin_id.as_deref(), Some("outline"));
    }

    #[test]
    fn non_object_is_rejected() {
        let report = validate_manifest(&Value::Null, None);
        assert!(!report.valid);
        assert_eq!(report.plugin_id, None);
    }

    #[test]
    fn missing_required_fields_are_errors() {
        for field in ["id", "name", "version"] {
            let mut manifest = json!({ "id": "a", "name": "A", "version": "1.0.0" });
            manifest.as_object_mut().expect("object").remove(field);
            let report = validate_manifest(&manifest, None);
            assert!(!report.valid);
            assert!(report.has_error_on(field), "missing {field}: {:?}", report.issues);
        }
    }

    #[test]
    fn style_problems_are_warnings_only() {
        let report = validate_manifest(
            &json!({ "id": "My Plugin", "name": "Mine", "version": "v2", "category": "games" }),
            None,
        );
        assert!(report.valid);
        let fields: Vec<&str> = report.warnings().map(|i| i.field.as_str()).collect();
        assert_eq!(fields, vec!["id", "version", "category"]);
    }

    #[test]
    fn hook_must_resolve_to_entry_of_right_kind() {
        let manifest = json!({
            "id": "a", "name": "A", "version": "1.0.0",
            "onActivate": "save_all",
            "onSave": "missing",
            "onDeactivate": 42
        });
        let report = validate_manifest(&manifest, Some(&entries()));
        assert!(!report.valid);
        assert!(report.has_error_on("onActivate"));
        assert!(report.has_error_on("onSave"));
        assert!(report.has_error_on("onDeactivate"));

        // Offline tooling only checks the reference shape.
        let offline = validate_manifest(&manifest, None);
        assert!(offline.has_error_on("onDeactivate"));
        assert!(!offline.has_error_on("onSave"));
    }

    #[test]
    fn malformed_list_items_are_reported_per_item() {
        let report = validate_manifest(
            &json!({
                "id": "a", "name": "A", "version": "1.0.0",
                "panels": [
                    { "id": "ok", "render": "render" },
                    { "render": "render" },
                    "nope"
                ],
                "keybindings": [{ "id": "k", "keys": "Ctrl+", "command": "save_all", "context": "terminal" }]
            }),
            Some(&entries()),
        );
        assert!(!report.valid);
        assert!(report.has_error_on("panels[1].id"));
        assert!(report.has_error_on("panels[2]"));
        assert!(!report.errors().any(|i| i.field.starts_with("panels[0]")));
        assert!(report.has_error_on("keybindings[0].keys"));
        assert!(report.has_error_on("keybindings[0].context"));
    }

    #[test]
    fn batch_flags_duplicates_and_unknown_dependencies() {
        let a = json!({ "id": "a", "name": "A", "version": "1.0.0", "dependencies": ["b", "zzz"] });
        let b = json!({ "id": "b", "name": "B", "version": "1.0.0" });
        let dup = json!({ "id": "a", "name": "A again", "version": "1.0.1" });

        let reports = validate_batch([(&a, None), (&b, None), (&dup, None)]);
        assert!(reports[0].valid);
        assert_eq!(reports[0].warnings().count(), 1);
        assert!(reports[1].valid);
        assert!(!reports[2].valid);
        assert!(reports[2].has_error_on("id"));
    }

    #[test]
    fn semver_and_id_patterns() {
        assert!(is_semver_like("1.2.3"));
        assert!(is_semver_like("1.2.3-beta.1"));
        assert!(is_semver_like("10.0.0+build5"));
        assert!(!is_semver_like("1.2"));
        assert!(!is_semver_like("1.2.x"));
        assert!(!is_semver_like("1.2.3-"));

        assert!(is_well_formed_id("ai.ghost-text_2"));
        assert!(!is_well_formed_id("-lead"));
        assert!(!is_well_formed_id("Upper"));
    }
}
