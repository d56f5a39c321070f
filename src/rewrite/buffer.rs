//! Non-destructive edit buffers over the original document.
//!
//! Edits are recorded against original byte offsets and only applied when the
//! buffer is materialized, so the order in which the driver issues them does
//! not matter except for insertions at the same point.

use crate::error::EditError;
use crate::source::SourceDocument;
use crate::span::{SourceRange, Span};

use super::range::expand_to_terminator;

#[derive(Clone, Debug, PartialEq, Eq)]
enum EditKind {
    Remove,
    Replace(String),
    Insert(String),
}

#[derive(Clone, Debug)]
struct Edit {
    span: Span,
    kind: EditKind,
    seq: usize,
}

impl Edit {
    fn is_insert(&self) -> bool {
        matches!(self.kind, EditKind::Insert(_))
    }
}

/// One output's pending edits.
///
/// Overlap policy for removals and replacements:
/// - a new edit inside an existing one is dropped,
/// - a new edit covering existing ones replaces them,
/// - any other overlap is an `EditError::Overlap`.
///
/// Insertions strictly inside a removed or replaced range are dropped;
/// insertions at the same point keep the order they were made in.
#[derive(Debug)]
pub struct EditBuffer<'doc> {
    doc: &'doc SourceDocument,
    edits: Vec<Edit>,
    next_seq: usize,
}

impl<'doc> EditBuffer<'doc> {
    pub fn new(doc: &'doc SourceDocument) -> Self {
        Self {
            doc,
            edits: Vec::new(),
            next_seq: 0,
        }
    }

    pub fn remove(&mut self, span: Span) -> Result<(), EditError> {
        self.push_range(span, EditKind::Remove)
    }

    pub fn replace(&mut self, span: Span, text: String) -> Result<(), EditError> {
        self.push_range(span, EditKind::Replace(text))
    }

    /// Insert `text` at byte offset `point`, after anything already inserted
    /// there.
    pub fn insert_after(&mut self, point: u32, text: String) -> Result<(), EditError> {
        let span = Span::point(point);
        self.check_bounds(span)?;
        if self.inside_range_edit(point) {
            log::trace!("insertion at {} falls in a removed range, dropped", point);
            return Ok(());
        }
        self.push(span, EditKind::Insert(text));
        Ok(())
    }

    /// True if every byte of `span` is removed or replaced.
    pub fn is_removed(&self, span: Span) -> bool {
        self.edits
            .iter()
            .any(|e| !e.is_insert() && e.span.covers(span))
    }

    pub fn edit_count(&self) -> usize {
        self.edits.len()
    }

    fn check_bounds(&self, span: Span) -> Result<(), EditError> {
        if span.end > self.doc.len() {
            return Err(EditError::OutOfBounds {
                span,
                len: self.doc.len(),
            });
        }
        Ok(())
    }

    fn inside_range_edit(&self, point: u32) -> bool {
        self.edits
            .iter()
            .any(|e| !e.is_insert() && e.span.start < point && point < e.span.end)
    }

    fn push(&mut self, span: Span, kind: EditKind) {
        self.edits.push(Edit {
            span,
            kind,
            seq: self.next_seq,
        });
        self.next_seq += 1;
    }

    fn push_range(&mut self, span: Span, kind: EditKind) -> Result<(), EditError> {
        self.check_bounds(span)?;
        if span.is_empty() && kind == EditKind::Remove {
            return Ok(());
        }

        let mut subsumed = Vec::new();
        for (i, existing) in self.edits.iter().enumerate() {
            if existing.is_insert() {
                if span.start < existing.span.start && existing.span.start < span.end {
                    subsumed.push(i);
                }
                continue;
            }
            if existing.span.covers(span) {
                // Also covers the idempotent case of removing the same range twice.
                return Ok(());
            }
            if span.covers(existing.span) {
                subsumed.push(i);
            } else if span.overlaps(existing.span) {
                return Err(EditError::Overlap {
                    existing: existing.span,
                    new: span,
                });
            }
        }

        for i in subsumed.into_iter().rev() {
            self.edits.remove(i);
        }
        self.push(span, kind);
        Ok(())
    }

    /// Apply every edit to the original text.
    pub fn materialize(&self) -> String {
        let text = self.doc.text();
        let mut ranges: Vec<&Edit> = self.edits.iter().filter(|e| !e.is_insert()).collect();
        ranges.sort_by_key(|e| e.span.start);
        let mut inserts: Vec<&Edit> = self.edits.iter().filter(|e| e.is_insert()).collect();
        inserts.sort_by_key(|e| (e.span.start, e.seq));

        let mut out = String::with_capacity(text.len());
        let mut cursor = 0usize;
        let mut pending = inserts.into_iter().peekable();

        for edit in ranges {
            let start = edit.span.start as usize;
            while let Some(ins) = pending.next_if(|i| i.span.start as usize <= start) {
                let point = ins.span.start as usize;
                out.push_str(&text[cursor..point]);
                cursor = point;
                if let EditKind::Insert(s) = &ins.kind {
                    out.push_str(s);
                }
            }
            out.push_str(&text[cursor..start]);
            if let EditKind::Replace(s) = &edit.kind {
                out.push_str(s);
            }
            cursor = edit.span.end as usize;
        }
        for ins in pending {
            let point = ins.span.start as usize;
            out.push_str(&text[cursor..point]);
            cursor = point;
            if let EditKind::Insert(s) = &ins.kind {
                out.push_str(s);
            }
        }
        out.push_str(&text[cursor..]);
        out
    }
}

/// Which of the two outputs an edit applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    Cpu,
    Gpu,
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Cpu => write!(f, "cpu"),
            Target::Gpu => write!(f, "gpu"),
        }
    }
}

/// Two independent edit buffers over the same document. Removals and
/// replacements go through the range expander.
#[derive(Debug)]
pub struct DualRewriter<'doc> {
    doc: &'doc SourceDocument,
    cpu: EditBuffer<'doc>,
    gpu: EditBuffer<'doc>,
}

impl<'doc> DualRewriter<'doc> {
    pub fn new(doc: &'doc SourceDocument) -> Self {
        Self {
            doc,
            cpu: EditBuffer::new(doc),
            gpu: EditBuffer::new(doc),
        }
    }

    pub fn document(&self) -> &'doc SourceDocument {
        self.doc
    }

    pub fn buffer(&self, target: Target) -> &EditBuffer<'doc> {
        match target {
            Target::Cpu => &self.cpu,
            Target::Gpu => &self.gpu,
        }
    }

    fn buffer_mut(&mut self, target: Target) -> &mut EditBuffer<'doc> {
        match target {
            Target::Cpu => &mut self.cpu,
            Target::Gpu => &mut self.gpu,
        }
    }

    /// Remove `range` (and a directly following `;`) from one output.
    /// Returns the span actually removed.
    pub fn remove(&mut self, target: Target, range: SourceRange) -> Result<Span, EditError> {
        let span = expand_to_terminator(self.doc, range);
        log::trace!("{}: remove {:?}", target, span);
        self.buffer_mut(target).remove(span)?;
        Ok(span)
    }

    pub fn replace(
        &mut self,
        target: Target,
        range: SourceRange,
        text: String,
    ) -> Result<Span, EditError> {
        let span = expand_to_terminator(self.doc, range);
        log::trace!("{}: replace {:?}", target, span);
        self.buffer_mut(target).replace(span, text)?;
        Ok(span)
    }

    pub fn insert_after(&mut self, target: Target, point: u32, text: String) -> Result<(), EditError> {
        self.buffer_mut(target).insert_after(point, text)
    }

    pub fn insert_at_end(&mut self, target: Target, text: String) -> Result<(), EditError> {
        let eof = self.doc.end_of_file();
        self.insert_after(target, eof, text)
    }

    /// Final `(cpu, gpu)` texts.
    pub fn materialize(&self) -> (String, String) {
        (self.cpu.materialize(), self.gpu.materialize())
    }
}
