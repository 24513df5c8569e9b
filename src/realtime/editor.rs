use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CollabError;
use crate::models::CollaboratorPresence;

/// Character-offset selection; `start == end` is a plain caret
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub start: usize,
    pub end: usize,
}

impl Selection {
    pub fn caret(offset: usize) -> Self {
        Self { start: offset, end: offset }
    }

    pub fn clamp(self, len: usize) -> Self {
        Self {
            start: self.start.min(len),
            end: self.end.min(len),
        }
    }
}

/// Where an offset renders on screen
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenPos {
    pub line: usize,
    pub column: usize,
}

/// A collaborator's caret, ready to draw
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RemoteCursor {
    pub user_id: String,
    pub user_name: String,
    pub color: String,
    pub position: ScreenPos,
    pub selection: Option<Selection>,
}

/// The editing surface that owns the authoritative document buffer
pub trait EditorSurface: Send {
    fn content(&self) -> &str;

    /// Length in characters
    fn len(&self) -> usize {
        self.content().chars().count()
    }

    fn is_empty(&self) -> bool {
        self.content().is_empty()
    }

    fn read_only(&self) -> bool;

    fn set_read_only(&mut self, read_only: bool);

    /// A user edit. Rejected while read-only.
    fn edit(&mut self, content: &str) -> Result<(), CollabError>;

    /// Swap the whole document without firing change handlers
    fn replace_silently(&mut self, content: &str);

    fn selection(&self) -> Option<Selection>;

    fn set_selection(&mut self, selection: Selection) -> Result<(), CollabError>;

    /// Translate a character offset into screen coordinates
    fn coords_at(&self, offset: usize) -> Option<ScreenPos>;
}

/// Plain-text editor buffer
#[derive(Debug, Clone, Default)]
pub struct TextBuffer {
    text: String,
    selection: Option<Selection>,
    read_only: bool,
}

impl TextBuffer {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            selection: None,
            read_only: false,
        }
    }
}

impl EditorSurface for TextBuffer {
    fn content(&self) -> &str {
        &self.text
    }

    fn read_only(&self) -> bool {
        self.read_only
    }

    fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    fn edit(&mut self, content: &str) -> Result<(), CollabError> {
        if self.read_only {
            return Err(CollabError::ReadOnly);
        }
        self.text = content.to_string();
        let len = self.len();
        if let Some(sel) = self.selection {
            self.selection = Some(sel.clamp(len));
        }
        Ok(())
    }

    fn replace_silently(&mut self, content: &str) {
        self.text = content.to_string();
    }

    fn selection(&self) -> Option<Selection> {
        self.selection
    }

    fn set_selection(&mut self, selection: Selection) -> Result<(), CollabError> {
        let len = self.len();
        if selection.start > selection.end {
            return Err(CollabError::InvalidSelection { start: selection.start, end: selection.end });
        }
        if selection.end > len {
            return Err(CollabError::CursorOutOfRange { offset: selection.end, len });
        }
        self.selection = Some(selection);
        Ok(())
    }

    fn coords_at(&self, offset: usize) -> Option<ScreenPos> {
        let mut pos = ScreenPos { line: 0, column: 0 };
        let mut chars = self.text.chars();
        for _ in 0..offset {
            match chars.next()? {
                '\n' => {
                    pos.line += 1;
                    pos.column = 0;
                }
                _ => pos.column += 1,
            }
        }
        Some(pos)
    }
}

/// Patch the document with a remote snapshot, keeping the local caret where it was
/// as far as the new content allows. The editor's own read-only flag is restored afterwards.
pub fn apply_remote(editor: &mut dyn EditorSurface, content: &str) {
    let prior = editor.selection();
    let was_read_only = editor.read_only();

    editor.set_read_only(true);
    editor.replace_silently(content);

    if let Some(sel) = prior {
        let len = editor.len();
        if let Err(e) = editor.set_selection(sel.clamp(len)) {
            warn!("Failed to restore cursor after remote change: {}", e);
            let _ = editor.set_selection(Selection::caret(len));
        }
    }

    editor.set_read_only(was_read_only);
}

/// One drawable caret per collaborator whose position is known and on screen
pub fn remote_cursors(editor: &dyn EditorSurface, collaborators: &[CollaboratorPresence]) -> Vec<RemoteCursor> {
    collaborators
        .iter()
        .filter_map(|c| {
            let offset = c.cursor_position?;
            let position = editor.coords_at(offset)?;
            let selection = match (c.selection_start, c.selection_end) {
                (Some(start), Some(end)) if start != end => Some(Selection { start, end }),
                _ => None,
            };
            Some(RemoteCursor {
                user_id: c.user_id.clone(),
                user_name: c.user_name.clone(),
                color: c.color.clone(),
                position,
                selection,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn collaborator(user_id: &str, cursor: Option<usize>) -> CollaboratorPresence {
        CollaboratorPresence {
            user_id: user_id.to_string(),
            user_name: user_id.to_string(),
            user_email: format!("{user_id}@ideavault.test"),
            color: "#3B82F6".to_string(),
            cursor_position: cursor,
            selection_start: cursor,
            selection_end: cursor,
            is_typing: false,
            last_seen: Utc::now(),
        }
    }

    #[test]
    fn remote_apply_keeps_cursor_when_it_fits() {
        let mut buffer = TextBuffer::new("Hello world");
        buffer.set_selection(Selection::caret(5)).unwrap();

        apply_remote(&mut buffer, "Hello there, world");
        assert_eq!(buffer.content(), "Hello there, world");
        assert_eq!(buffer.selection(), Some(Selection::caret(5)));
        assert!(!buffer.read_only());
    }

    #[test]
    fn remote_apply_clamps_cursor_to_shorter_document() {
        let mut buffer = TextBuffer::new("Hello world");
        buffer.set_selection(Selection { start: 6, end: 11 }).unwrap();

        apply_remote(&mut buffer, "Hi");
        assert_eq!(buffer.selection(), Some(Selection { start: 2, end: 2 }));
    }

    #[test]
    fn remote_apply_leaves_a_read_only_editor_read_only() {
        let mut buffer = TextBuffer::new("viewer copy");
        buffer.set_read_only(true);

        apply_remote(&mut buffer, "remote");
        assert_eq!(buffer.content(), "remote");
        assert!(buffer.read_only());
        assert!(matches!(buffer.edit("local"), Err(CollabError::ReadOnly)));
    }

    #[test]
    fn offsets_count_characters_not_bytes() {
        let mut buffer = TextBuffer::new("héllo");
        assert_eq!(buffer.len(), 5);
        assert!(buffer.set_selection(Selection::caret(5)).is_ok());
        assert!(buffer.set_selection(Selection::caret(6)).is_err());
    }

    #[test]
    fn read_only_buffer_rejects_edits() {
        let mut buffer = TextBuffer::new("draft");
        buffer.set_read_only(true);
        assert!(matches!(buffer.edit("changed"), Err(CollabError::ReadOnly)));
        assert_eq!(buffer.content(), "draft");
    }

    #[test]
    fn coords_follow_newlines() {
        let buffer = TextBuffer::new("ab\ncd\n");
        assert_eq!(buffer.coords_at(0), Some(ScreenPos { line: 0, column: 0 }));
        assert_eq!(buffer.coords_at(4), Some(ScreenPos { line: 1, column: 1 }));
        assert_eq!(buffer.coords_at(6), Some(ScreenPos { line: 2, column: 0 }));
        assert_eq!(buffer.coords_at(7), None);
    }

    #[test]
    fn collaborators_without_position_are_not_drawn() {
        let buffer = TextBuffer::new("some text");
        let cursors = remote_cursors(
            &buffer,
            &[
                collaborator("bob", Some(4)),
                collaborator("eve", None),
                collaborator("zed", Some(99)),
            ],
        );
        assert_eq!(cursors.len(), 1);
        assert_eq!(cursors[0].user_id, "bob");
        assert_eq!(cursors[0].position, ScreenPos { line: 0, column: 4 });
        assert_eq!(cursors[0].selection, None);
    }
}
