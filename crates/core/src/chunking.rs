use crate::error::IngestError;
use crate::models::{Chunk, DocumentFingerprint};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;

pub const DEFAULT_SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, IngestError> {
        let config = Self {
            chunk_size,
            overlap,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 || self.overlap == 0 {
            return Err(IngestError::InvalidChunkConfig(format!(
                "chunk_size ({}) and overlap ({}) must be positive",
                self.chunk_size, self.overlap
            )));
        }
        if self.overlap >= self.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            overlap: 200,
        }
    }
}

/// Recursive character splitter. Lengths are measured in chars.
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    config: ChunkingConfig,
    separators: Vec<&'static str>,
}

impl RecursiveChunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, IngestError> {
        config.validate()?;
        Ok(Self {
            config,
            separators: DEFAULT_SEPARATORS.to_vec(),
        })
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    /// Lazily splits `text`. Every call starts a fresh pass over the text.
    pub fn split<'a>(&'a self, text: &'a str) -> Chunks<'a> {
        let mut frames = Vec::new();
        if !text.is_empty() {
            let whole = Span::new(text, 0, text.len());
            frames.push(Frame {
                pieces: VecDeque::from([whole]),
                next_level: 0,
            });
        }

        Chunks {
            text,
            config: self.config,
            separators: &self.separators,
            frames,
            window: VecDeque::new(),
            window_chars: 0,
            ready: VecDeque::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextWindow<'a> {
    pub text: &'a str,
    pub char_start: usize,
    pub char_end: usize,
}

#[derive(Debug, Clone, Copy)]
struct Span {
    start: usize,
    end: usize,
    chars: usize,
}

impl Span {
    fn new(text: &str, start: usize, end: usize) -> Self {
        Self {
            start,
            end,
            chars: text[start..end].chars().count(),
        }
    }
}

#[derive(Debug, Clone)]
struct Frame {
    pieces: VecDeque<Span>,
    next_level: usize,
}

#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    text: &'a str,
    config: ChunkingConfig,
    separators: &'a [&'static str],
    frames: Vec<Frame>,
    window: VecDeque<Span>,
    window_chars: usize,
    ready: VecDeque<(usize, usize)>,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = TextWindow<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((start, end)) = self.ready.pop_front() {
                match self.window_at(start, end) {
                    Some(window) => return Some(window),
                    None => continue,
                }
            }

            let frame = self.frames.last_mut()?;
            let next_level = frame.next_level;

            match frame.pieces.pop_front() {
                None => {
                    self.frames.pop();
                    self.flush();
                }
                Some(piece) if piece.chars <= self.config.chunk_size => self.push_piece(piece),
                Some(piece) => {
                    self.flush();
                    match split_span(self.text, piece, self.separators, next_level) {
                        Some(frame) => self.frames.push(frame),
                        // Nothing left to split on; emit the piece oversized.
                        None => self.ready.push_back((piece.start, piece.end)),
                    }
                }
            }
        }
    }
}

impl<'a> Chunks<'a> {
    fn push_piece(&mut self, piece: Span) {
        let limit = self.config.chunk_size;
        if self.window_chars + piece.chars > limit && !self.window.is_empty() {
            self.emit_window();
            while self.window_chars > self.config.overlap
                || (self.window_chars > 0 && self.window_chars + piece.chars > limit)
            {
                match self.window.pop_front() {
                    Some(dropped) => self.window_chars -= dropped.chars,
                    None => break,
                }
            }
        }

        self.window.push_back(piece);
        self.window_chars += piece.chars;
    }

    fn emit_window(&mut self) {
        if let (Some(first), Some(last)) = (self.window.front(), self.window.back()) {
            self.ready.push_back((first.start, last.end));
        }
    }

    fn flush(&mut self) {
        self.emit_window();
        self.window.clear();
        self.window_chars = 0;
    }

    fn window_at(&self, start: usize, end: usize) -> Option<TextWindow<'a>> {
        let raw = &self.text[start..end];
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        let leading = raw.len() - raw.trim_start().len();
        let char_start = self.text[..start + leading].chars().count();
        Some(TextWindow {
            text: trimmed,
            char_start,
            char_end: char_start + trimmed.chars().count(),
        })
    }
}

fn split_span(text: &str, span: Span, separators: &[&str], from_level: usize) -> Option<Frame> {
    let slice = &text[span.start..span.end];
    let level = (from_level..separators.len())
        .find(|&level| separators[level].is_empty() || slice.contains(separators[level]))?;
    let separator = separators[level];

    let mut pieces = VecDeque::new();
    if separator.is_empty() {
        for (offset, ch) in slice.char_indices() {
            let start = span.start + offset;
            pieces.push_back(Span {
                start,
                end: start + ch.len_utf8(),
                chars: 1,
            });
        }
    } else {
        // Separators stay attached to the piece they terminate, so pieces
        // tile the input text without gaps.
        let mut cursor = 0;
        for (offset, matched) in slice.match_indices(separator) {
            let end = offset + matched.len();
            pieces.push_back(Span::new(text, span.start + cursor, span.start + end));
            cursor = end;
        }
        if cursor < slice.len() {
            pieces.push_back(Span::new(text, span.start + cursor, span.end));
        }
    }

    Some(Frame {
        pieces,
        next_level: level + 1,
    })
}

pub fn build_chunks(
    document: &DocumentFingerprint,
    page: u32,
    page_text: &str,
    chunker: &RecursiveChunker,
    global_index: u64,
) -> (Vec<Chunk>, u64) {
    let mut chunks = Vec::new();
    let mut cursor = global_index;

    for window in chunker.split(page_text) {
        chunks.push(Chunk {
            chunk_id: make_chunk_id(&document.document_id, page, cursor, window.text),
            document_id: document.document_id.clone(),
            source_path: document.source_path.clone(),
            title: document.document_title.clone(),
            page_start: page,
            page_end: page,
            char_start: window.char_start,
            char_end: window.char_end,
            chunk_index: cursor,
            text: window.text.to_string(),
        });
        cursor = cursor.saturating_add(1);
    }

    (chunks, cursor)
}

fn make_chunk_id(document_id: &str, page: u32, index: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(page.to_le_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
