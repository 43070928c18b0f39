//! Structure-aware segmentation of a node's raw text.
//!
//! Text is scanned into structural blocks (paragraphs, list runs, table
//! runs, fenced code, horizontal rules) and greedily packed into segments
//! under a token budget. Blocks are only split when one alone exceeds the
//! budget, and then only at line boundaries. Concatenating the segments
//! always reproduces the input exactly.

use std::sync::OnceLock;

use regex::Regex;

use crate::types::config::SegmentConfig;
use crate::types::segment::{Block, BlockKind, Segment, SegmentKind};

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^ {0,3}(`{3,}|~{3,})").expect("fence pattern"))
}

fn rule_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^ {0,3}(?:(?:\*[ \t]*){3,}|(?:-[ \t]*){3,}|(?:_[ \t]*){3,})$")
            .expect("rule pattern")
    })
}

fn list_item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^ {0,3}(?:[-*+]|\d{1,9}[.)])(?:[ \t]|$)").expect("list pattern"))
}

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^ {0,3}#{1,6}(?:[ \t]|$)").expect("heading pattern"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    Blank,
    Fence(char, usize),
    Rule,
    Table,
    ListItem,
    Heading,
    /// Non-blank line starting with whitespace
    Indented,
    Text,
}

impl LineKind {
    /// Lines that end a running paragraph.
    fn interrupts_paragraph(self) -> bool {
        matches!(
            self,
            Self::Blank | Self::Fence(..) | Self::Rule | Self::Table | Self::ListItem | Self::Heading
        )
    }
}

fn strip_terminator(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}

fn classify(line: &str) -> LineKind {
    let content = strip_terminator(line);
    if content.trim().is_empty() {
        return LineKind::Blank;
    }
    if let Some(caps) = fence_re().captures(content) {
        let marker = &caps[1];
        let ch = marker.chars().next().unwrap_or('`');
        return LineKind::Fence(ch, marker.len());
    }
    if rule_re().is_match(content) {
        return LineKind::Rule;
    }
    if content.trim_start().starts_with('|') {
        return LineKind::Table;
    }
    if list_item_re().is_match(content) {
        return LineKind::ListItem;
    }
    if heading_re().is_match(content) {
        return LineKind::Heading;
    }
    if content.starts_with([' ', '\t']) {
        return LineKind::Indented;
    }
    LineKind::Text
}

fn closes_fence(line: &str, ch: char, len: usize) -> bool {
    let content = strip_terminator(line).trim_start();
    let run = content.chars().take_while(|c| *c == ch).count();
    run >= len && content[run * ch.len_utf8()..].trim().is_empty()
}

/// Scan text into structural blocks.
///
/// Blank lines are attached to the preceding block; blank lines before the
/// first block are attached to it. Concatenating the block texts yields the
/// input exactly.
pub fn scan_blocks(text: &str) -> Vec<Block> {
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let mut blocks: Vec<Block> = Vec::new();
    let mut leading = String::new();
    let mut i = 0;

    while i < lines.len() {
        let kind = classify(lines[i]);

        if kind == LineKind::Blank {
            match blocks.last_mut() {
                Some(last) => last.text.push_str(lines[i]),
                None => leading.push_str(lines[i]),
            }
            i += 1;
            continue;
        }

        let start = i;
        let block_kind = match kind {
            LineKind::Fence(ch, len) => {
                i += 1;
                while i < lines.len() {
                    let closing = closes_fence(lines[i], ch, len);
                    i += 1;
                    if closing {
                        break;
                    }
                }
                BlockKind::CodeBlock
            }
            LineKind::Rule => {
                i += 1;
                BlockKind::Rule
            }
            LineKind::Table => {
                while i < lines.len() && classify(lines[i]) == LineKind::Table {
                    i += 1;
                }
                BlockKind::Table
            }
            LineKind::ListItem => {
                i += 1;
                while i < lines.len()
                    && matches!(classify(lines[i]), LineKind::ListItem | LineKind::Indented)
                {
                    i += 1;
                }
                BlockKind::List
            }
            LineKind::Heading => {
                i += 1;
                BlockKind::Paragraph
            }
            LineKind::Text | LineKind::Indented | LineKind::Blank => {
                i += 1;
                while i < lines.len() && !classify(lines[i]).interrupts_paragraph() {
                    i += 1;
                }
                BlockKind::Paragraph
            }
        };

        let mut block_text = String::new();
        let mut start_line = start + 1;
        if blocks.is_empty() && !leading.is_empty() {
            block_text.push_str(&leading);
            leading.clear();
            start_line = 1;
        }
        block_text.push_str(&lines[start..i].concat());

        blocks.push(Block {
            kind: block_kind,
            text: block_text,
            start_line,
        });
    }

    if blocks.is_empty() && !leading.is_empty() {
        blocks.push(Block {
            kind: BlockKind::Paragraph,
            text: leading,
            start_line: 1,
        });
    }

    blocks
}

/// Accumulates blocks into segments.
struct Packer<'a> {
    config: &'a SegmentConfig,
    segments: Vec<Segment>,
    text: String,
    tokens: usize,
    kind: Option<SegmentKind>,
    start_line: usize,
}

impl<'a> Packer<'a> {
    fn new(config: &'a SegmentConfig) -> Self {
        Self {
            config,
            segments: Vec::new(),
            text: String::new(),
            tokens: 0,
            kind: None,
            start_line: 1,
        }
    }

    fn append(&mut self, block: &Block, tokens: usize) {
        if self.text.is_empty() {
            self.start_line = block.start_line;
        }
        self.text.push_str(&block.text);
        self.tokens += tokens;

        if block.kind != BlockKind::Rule || self.kind.is_none() {
            let kind = SegmentKind::from(block.kind);
            self.kind = match self.kind {
                None => Some(kind),
                Some(existing) if existing == kind => Some(existing),
                Some(_) => Some(SegmentKind::Mixed),
            };
        }
    }

    fn fits(&self, tokens: usize) -> bool {
        self.text.is_empty() || self.tokens + tokens <= self.config.max_tokens
    }

    fn flush(&mut self) {
        if self.text.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.text);
        self.push(text, self.kind.unwrap_or(SegmentKind::Paragraph), self.start_line, false);
        self.tokens = 0;
        self.kind = None;
    }

    fn push(&mut self, text: String, kind: SegmentKind, start_line: usize, forced_split: bool) {
        let tokens = self.config.estimate_tokens(&text);
        self.segments.push(Segment {
            index: self.segments.len(),
            text,
            tokens,
            kind,
            start_line,
            forced_split,
        });
    }

    /// Split one oversized block at line boundaries.
    fn force_split(&mut self, block: &Block) {
        let kind = SegmentKind::from(block.kind);
        let mut pieces: Vec<(String, usize)> = Vec::new();
        let mut piece = String::new();
        let mut piece_tokens = 0;
        let mut piece_start = block.start_line;

        for (offset, line) in block.text.split_inclusive('\n').enumerate() {
            let line_tokens = self.config.estimate_tokens(line);
            if !piece.is_empty() && piece_tokens + line_tokens > self.config.max_tokens {
                pieces.push((std::mem::take(&mut piece), piece_start));
                piece_tokens = 0;
            }
            if piece.is_empty() {
                piece_start = block.start_line + offset;
            }
            piece.push_str(line);
            piece_tokens += line_tokens;
        }
        if !piece.is_empty() {
            pieces.push((piece, piece_start));
        }

        let forced = pieces.len() > 1;
        for (text, start_line) in pieces {
            self.push(text, kind, start_line, forced);
        }
    }
}

/// Split text into ordered, budget-bounded segments.
///
/// - No segment exceeds `config.max_tokens` unless it holds a single line
///   that alone exceeds it.
/// - No block is split unless it alone exceeds the budget.
/// - Horizontal rules close the segment they end.
/// - `segments.concat() == text`.
pub fn segment(text: &str, config: &SegmentConfig) -> Vec<Segment> {
    let mut packer = Packer::new(config);

    for block in scan_blocks(text) {
        let tokens = config.estimate_tokens(&block.text);

        if tokens > config.max_tokens {
            packer.flush();
            packer.force_split(&block);
            continue;
        }

        if !packer.fits(tokens) {
            packer.flush();
        }
        packer.append(&block, tokens);

        if block.kind == BlockKind::Rule {
            packer.flush();
        }
    }
    packer.flush();

    packer.segments
}
