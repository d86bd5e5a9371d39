use ropey::Rope;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Selection in char offsets; `start == end` is a caret.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub start: usize,
    pub end: usize,
}

impl Selection {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn caret(offset: usize) -> Self {
        Self::new(offset, offset)
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    fn ordered(self) -> Range<usize> {
        self.start.min(self.end)..self.start.max(self.end)
    }
}

pub trait BufferStore {
    fn content(&self) -> String;
    fn set_content(&mut self, text: &str);
    fn selection(&self) -> Selection;
    fn set_selection(&mut self, selection: Selection);
    fn insert_text(&mut self, text: &str, position: Option<usize>);
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EditTransaction {
    pub range: Range<usize>,
    pub replacement: String,
}

impl EditTransaction {
    pub fn insert(offset: usize, text: impl Into<String>) -> Self {
        Self {
            range: offset..offset,
            replacement: text.into(),
        }
    }

    pub fn delete(range: Range<usize>) -> Self {
        Self {
            range,
            replacement: String::new(),
        }
    }

    pub fn replace(range: Range<usize>, replacement: impl Into<String>) -> Self {
        Self {
            range,
            replacement: replacement.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EditRecord {
    pub before: EditTransaction,
    pub after: EditTransaction,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub chars: usize,
    pub lines: usize,
}

#[derive(Clone, Debug)]
pub struct TextBuffer {
    rope: Rope,
    selection: Selection,
    version: u64,
    undo_stack: Vec<EditRecord>,
    redo_stack: Vec<EditRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorError {
    OutOfBounds,
}

impl Default for TextBuffer {
    fn default() -> Self {
        Self::new("")
    }
}

impl TextBuffer {
    pub fn new(text: &str) -> Self {
        Self {
            rope: Rope::from_str(text),
            selection: Selection::default(),
            version: 0,
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len_chars(&self) -> usize {
        self.rope.len_chars()
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            chars: self.rope.len_chars(),
            lines: self.rope.len_lines().max(1),
        }
    }

    pub fn line_text(&self, line: usize) -> Option<String> {
        (line < self.rope.len_lines()).then(|| {
            self.rope
                .line(line)
                .to_string()
                .trim_end_matches(['\n', '\r'])
                .to_string()
        })
    }

    pub fn position_of(&self, offset: usize) -> (usize, usize) {
        let offset = offset.min(self.rope.len_chars());
        let line = self.rope.char_to_line(offset);
        (line, offset - self.rope.line_to_char(line))
    }

    pub fn apply(&mut self, tx: EditTransaction) -> Result<EditRecord, EditorError> {
        let range = self.validate_range(tx.range.clone())?;
        let removed = self.rope.slice(range.clone()).to_string();

        self.rope.remove(range.clone());
        self.rope.insert(range.start, &tx.replacement);

        let after_end = range.start + tx.replacement.chars().count();
        let record = EditRecord {
            before: EditTransaction::replace(range.start..after_end, removed),
            after: EditTransaction::replace(range, tx.replacement),
        };

        self.undo_stack.push(record.clone());
        self.redo_stack.clear();
        self.version = self.version.wrapping_add(1);
        self.clamp_selection();
        Ok(record)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo(&mut self) -> Result<Option<EditRecord>, EditorError> {
        let Some(record) = self.undo_stack.pop() else {
            return Ok(None);
        };

        self.apply_without_history(record.before.clone())?;
        self.redo_stack.push(record.clone());
        self.version = self.version.wrapping_add(1);
        Ok(Some(record))
    }

    pub fn redo(&mut self) -> Result<Option<EditRecord>, EditorError> {
        let Some(record) = self.redo_stack.pop() else {
            return Ok(None);
        };

        self.apply_without_history(record.after.clone())?;
        self.undo_stack.push(record.clone());
        self.version = self.version.wrapping_add(1);
        Ok(Some(record))
    }

    fn apply_without_history(&mut self, tx: EditTransaction) -> Result<(), EditorError> {
        let range = self.validate_range(tx.range)?;
        self.rope.remove(range.clone());
        self.rope.insert(range.start, &tx.replacement);
        self.clamp_selection();
        Ok(())
    }

    fn validate_range(&self, range: Range<usize>) -> Result<Range<usize>, EditorError> {
        if range.start > range.end || range.end > self.rope.len_chars() {
            return Err(EditorError::OutOfBounds);
        }
        Ok(range)
    }

    fn clamp_selection(&mut self) {
        let len = self.rope.len_chars();
        self.selection.start = self.selection.start.min(len);
        self.selection.end = self.selection.end.min(len);
    }
}

impl BufferStore for TextBuffer {
    fn content(&self) -> String {
        self.rope.to_string()
    }

    fn set_content(&mut self, text: &str) {
        if self.rope == text {
            return;
        }
        let full = 0..self.rope.len_chars();
        if let Err(err) = self.apply(EditTransaction::replace(full, text)) {
            tracing::error!("replacing buffer content failed: {err:?}");
        }
    }

    fn selection(&self) -> Selection {
        self.selection
    }

    fn set_selection(&mut self, selection: Selection) {
        self.selection = selection;
        self.clamp_selection();
    }

    fn insert_text(&mut self, text: &str, position: Option<usize>) {
        let range = match position {
            Some(offset) => {
                let offset = offset.min(self.rope.len_chars());
                offset..offset
            }
            None => self.selection.ordered(),
        };
        let start = range.start;
        match self.apply(EditTransaction::replace(range, text)) {
            Ok(_) => self.selection = Selection::caret(start + text.chars().count()),
            Err(err) => tracing::error!("inserting text failed: {err:?}"),
        }
    }
}

impl std::fmt::Display for TextBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.rope.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_insert_delete_replace_updates_buffer_and_version() {
        let mut buffer = TextBuffer::new("abc");
        assert_eq!(buffer.version(), 0);

        buffer
            .apply(EditTransaction::insert(3, "d"))
            .expect("insert succeeds");
        assert_eq!(buffer.to_string(), "abcd");
        assert_eq!(buffer.version(), 1);

        buffer
            .apply(EditTransaction::delete(1..3))
            .expect("delete succeeds");
        assert_eq!(buffer.to_string(), "ad");

        buffer
            .apply(EditTransaction::replace(0..2, "xyz"))
            .expect("replace succeeds");
        assert_eq!(buffer.to_string(), "xyz");
        assert_eq!(buffer.version(), 3);
    }

    #[test]
    fn set_content_is_undoable() {
        let mut buffer = TextBuffer::new("hello");
        buffer.set_content("world");
        assert_eq!(buffer.content(), "world");

        buffer.undo().expect("undo works");
        assert_eq!(buffer.content(), "hello");

        buffer.redo().expect("redo works");
        assert_eq!(buffer.content(), "world");
    }

    #[test]
    fn insert_replaces_selection_or_uses_position() {
        let mut buffer = TextBuffer::new("fn main() {}");
        buffer.set_selection(Selection::new(3, 7));
        buffer.insert_text("start", None);
        assert_eq!(buffer.content(), "fn start() {}");
        assert_eq!(buffer.selection(), Selection::caret(8));

        buffer.insert_text("pub ", Some(0));
        assert_eq!(buffer.content(), "pub fn start() {}");

        buffer.insert_text("!", Some(1_000));
        assert_eq!(buffer.content(), "pub fn start() {}!");
    }

    #[test]
    fn offsets_are_chars_not_bytes() {
        let mut buffer = TextBuffer::new("你好");
        buffer
            .apply(EditTransaction::replace(1..2, "们"))
            .expect("char range edit");
        assert_eq!(buffer.content(), "你们");

        let err = buffer
            .apply(EditTransaction::replace(1..5, "x"))
            .expect_err("out of range");
        assert_eq!(err, EditorError::OutOfBounds);
    }

    #[test]
    fn positions_and_lines() {
        let buffer = TextBuffer::new("one\ntwo\r\nthree");
        assert_eq!(buffer.position_of(5), (1, 1));
        assert_eq!(buffer.line_text(1).as_deref(), Some("two"));
        assert_eq!(buffer.line_text(9), None);
        assert_eq!(buffer.stats().lines, 3);
    }

    #[test]
    fn selection_is_clamped_after_shrinking_edit() {
        let mut buffer = TextBuffer::new("abcdef");
        buffer.set_selection(Selection::new(2, 6));
        buffer.set_content("ab");
        assert_eq!(buffer.selection(), Selection::new(2, 2));
    }
}
