use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
    Hint,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionKind {
    #[default]
    Text,
    Keyword,
    Snippet,
    Function,
    Variable,
    Ai,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionItem {
    pub label: String,
    #[serde(default)]
    pub insert_text: Option<String>,
    #[serde(default)]
    pub kind: CompletionKind,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub provider_id: String,
}

impl CompletionItem {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            insert_text: None,
            kind: CompletionKind::Text,
            detail: None,
            provider_id: String::new(),
        }
    }

    pub fn with_insert_text(mut self, text: impl Into<String>) -> Self {
        self.insert_text = Some(text.into());
        self
    }

    pub fn with_kind(mut self, kind: CompletionKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn text_to_insert(&self) -> &str {
        self.insert_text.as_deref().unwrap_or(&self.label)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextSpan {
    pub line: u32,
    pub column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl TextSpan {
    pub fn new(line: u32, column: u32, end_line: u32, end_column: u32) -> Self {
        Self {
            line,
            column,
            end_line,
            end_column,
        }
    }

    pub fn line(line: u32) -> Self {
        Self::new(line, 0, line, u32::MAX)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub id: String,
    pub span: TextSpan,
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub source: Option<String>,
}

impl Diagnostic {
    pub fn new(
        id: impl Into<String>,
        span: TextSpan,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            span,
            severity,
            message: message.into(),
            source: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeLensItem {
    pub id: String,
    pub line: u32,
    pub title: String,
    #[serde(default)]
    pub command: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnnotationKind {
    #[default]
    Hint,
    GhostText,
    Blame,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineAnnotation {
    pub id: String,
    pub line: u32,
    pub column: u32,
    pub text: String,
    #[serde(default)]
    pub kind: AnnotationKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoldingRange {
    pub id: String,
    pub start_line: u32,
    pub end_line: u32,
    #[serde(default)]
    pub kind: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanelPosition {
    Left,
    #[default]
    Right,
    Bottom,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelDescriptor {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub position: PanelPosition,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMenuItem {
    pub id: String,
    pub label: String,
    pub command: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Contribution {
    Diagnostic(Diagnostic),
    CodeLens(CodeLensItem),
    Annotation(InlineAnnotation),
    Folding(FoldingRange),
}

impl Contribution {
    pub fn kind(&self) -> ContributionKind {
        match self {
            Self::Diagnostic(_) => ContributionKind::Diagnostic,
            Self::CodeLens(_) => ContributionKind::CodeLens,
            Self::Annotation(_) => ContributionKind::Annotation,
            Self::Folding(_) => ContributionKind::Folding,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContributionKind {
    Diagnostic,
    CodeLens,
    Annotation,
    Folding,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Owned<T> {
    pub plugin_id: String,
    pub item: T,
}

/// Everything one plugin has contributed so far. Items are keyed by their `id`:
/// pushing an item whose id already exists replaces it in place.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContributionSet {
    pub diagnostics: Vec<Diagnostic>,
    pub code_lenses: Vec<CodeLensItem>,
    pub annotations: Vec<InlineAnnotation>,
    pub folding_ranges: Vec<FoldingRange>,
}

impl ContributionSet {
    pub fn push(&mut self, contribution: Contribution) {
        match contribution {
            Contribution::Diagnostic(item) => upsert(&mut self.diagnostics, item, |d| &d.id),
            Contribution::CodeLens(item) => upsert(&mut self.code_lenses, item, |c| &c.id),
            Contribution::Annotation(item) => upsert(&mut self.annotations, item, |a| &a.id),
            Contribution::Folding(item) => upsert(&mut self.folding_ranges, item, |f| &f.id),
        }
    }

    pub fn clear(&mut self, kind: ContributionKind) {
        match kind {
            ContributionKind::Diagnostic => self.diagnostics.clear(),
            ContributionKind::CodeLens => self.code_lenses.clear(),
            ContributionKind::Annotation => self.annotations.clear(),
            ContributionKind::Folding => self.folding_ranges.clear(),
        }
    }

    pub fn remove(&mut self, kind: ContributionKind, id: &str) -> bool {
        match kind {
            ContributionKind::Diagnostic => remove_by_id(&mut self.diagnostics, id, |d| &d.id),
            ContributionKind::CodeLens => remove_by_id(&mut self.code_lenses, id, |c| &c.id),
            ContributionKind::Annotation => remove_by_id(&mut self.annotations, id, |a| &a.id),
            ContributionKind::Folding => remove_by_id(&mut self.folding_ranges, id, |f| &f.id),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
            && self.code_lenses.is_empty()
            && self.annotations.is_empty()
            && self.folding_ranges.is_empty()
    }
}

fn upsert<T>(items: &mut Vec<T>, item: T, id_of: impl Fn(&T) -> &String) {
    if let Some(existing) = items.iter_mut().find(|e| id_of(e) == id_of(&item)) {
        *existing = item;
    } else {
        items.push(item);
    }
}

fn remove_by_id<T>(items: &mut Vec<T>, id: &str, id_of: impl Fn(&T) -> &String) -> bool {
    let before = items.len();
    items.retain(|item| id_of(item) != id);
    items.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_replaces_items_with_same_id() {
        let mut set = ContributionSet::default();
        set.push(Contribution::Diagnostic(Diagnostic::new(
            "d1",
            TextSpan::line(0),
            Severity::Warning,
            "first",
        )));
        set.push(Contribution::Diagnostic(Diagnostic::new(
            "d1",
            TextSpan::line(3),
            Severity::Error,
            "second",
        )));

        assert_eq!(set.diagnostics.len(), 1);
        assert_eq!(set.diagnostics[0].message, "second");
        assert_eq!(set.diagnostics[0].span.line, 3);
    }

    #[test]
    fn remove_and_clear_by_kind() {
        let mut set = ContributionSet::default();
        set.push(Contribution::CodeLens(CodeLensItem {
            id: "lens".to_string(),
            line: 1,
            title: "Run".to_string(),
            command: None,
        }));
        set.push(Contribution::Folding(FoldingRange {
            id: "fold".to_string(),
            start_line: 1,
            end_line: 4,
            kind: None,
        }));

        assert!(set.remove(ContributionKind::CodeLens, "lens"));
        assert!(!set.remove(ContributionKind::CodeLens, "lens"));
        assert!(!set.is_empty());

        set.clear(ContributionKind::Folding);
        assert!(set.is_empty());
    }

    #[test]
    fn completion_item_falls_back_to_label() {
        let item = CompletionItem::new("println!");
        assert_eq!(item.text_to_insert(), "println!");
        let item = item.with_insert_text("println!(\"{}\")");
        assert_eq!(item.text_to_insert(), "println!(\"{}\")");
    }
}
