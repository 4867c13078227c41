pub const DEFAULT_CHUNK_CHARS: usize = 1000;
pub const DEFAULT_OVERLAP_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct TextChunk {
    pub text: String,
    /// 1-based line of the first character of the chunk.
    pub start_line: usize,
    /// 1-based line of the last character of the chunk.
    pub end_line: usize,
}

/// Recursive character splitter: prefers paragraph boundaries, then line
/// breaks, then sentence ends, then words, hard-cutting only when a single
/// token exceeds the target size. Consecutive chunks overlap by roughly
/// `overlap_chars`, re-cut at a whitespace boundary.
pub fn chunk_text(text: &str, chunk_chars: usize, overlap_chars: usize) -> Vec<TextChunk> {
    if text.trim().is_empty() {
        return vec![];
    }
    let chunk_chars = chunk_chars.max(64);
    let overlap_chars = overlap_chars.min(chunk_chars / 2);

    let mut atoms = Vec::new();
    atomize(text, 0, chunk_chars, 0, &mut atoms);

    let mut chunks = Vec::new();
    let mut start = match atoms.first() {
        Some(&(s, _)) => s,
        None => return vec![],
    };
    let mut end = start;

    for &(atom_start, atom_end) in &atoms {
        if atom_end - start > chunk_chars && end > start {
            push_chunk(text, start, end, &mut chunks);
            let overlap_from = back_up(text, end, overlap_chars);
            // The next window must advance past the previous start.
            start = overlap_from.max(start + 1).min(atom_start);
        }
        end = atom_end;
    }
    if end > start {
        push_chunk(text, start, end, &mut chunks);
    }

    chunks
}

const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " "];

/// Split `text[..]` (offset by `base`) into byte ranges no longer than
/// `max`, trying separators in order of coarseness.
fn atomize(text: &str, base: usize, max: usize, sep_idx: usize, out: &mut Vec<(usize, usize)>) {
    if text.is_empty() {
        return;
    }
    if text.len() <= max {
        out.push((base, base + text.len()));
        return;
    }
    if sep_idx >= SEPARATORS.len() {
        // No separator left: hard cut at char boundaries.
        let mut cut_start = 0;
        let mut count = 0;
        for (idx, _) in text.char_indices() {
            if idx - cut_start >= max && count > 0 {
                out.push((base + cut_start, base + idx));
                cut_start = idx;
            }
            count += 1;
        }
        if cut_start < text.len() {
            out.push((base + cut_start, base + text.len()));
        }
        return;
    }

    let sep = SEPARATORS[sep_idx];
    let mut piece_start = 0;
    let mut found = false;
    let mut search_from = 0;
    while let Some(pos) = text[search_from..].find(sep) {
        let split_at = search_from + pos + sep.len();
        found = true;
        let piece = &text[piece_start..split_at];
        if piece.len() <= max {
            out.push((base + piece_start, base + split_at));
        } else {
            atomize(piece, base + piece_start, max, sep_idx + 1, out);
        }
        piece_start = split_at;
        search_from = split_at;
        if search_from >= text.len() {
            break;
        }
    }

    let rest = &text[piece_start..];
    if !found {
        atomize(rest, base + piece_start, max, sep_idx + 1, out);
    } else if !rest.is_empty() {
        if rest.len() <= max {
            out.push((base + piece_start, base + text.len()));
        } else {
            atomize(rest, base + piece_start, max, sep_idx + 1, out);
        }
    }
}

/// Walk back from `end` by up to `overlap` bytes, stopping at the nearest
/// whitespace so the overlap window starts on a token boundary.
fn back_up(text: &str, end: usize, overlap: usize) -> usize {
    if overlap == 0 || end == 0 {
        return end;
    }
    let target = end.saturating_sub(overlap);
    let mut pos = target;
    while pos < end && !text.is_char_boundary(pos) {
        pos += 1;
    }
    match text[pos..end].find(char::is_whitespace) {
        Some(ws) => {
            let mut from = pos + ws + 1;
            while from < end && !text.is_char_boundary(from) {
                from += 1;
            }
            from
        }
        None => pos,
    }
}

fn push_chunk(text: &str, start: usize, end: usize, out: &mut Vec<TextChunk>) {
    let slice = &text[start..end];
    if slice.trim().is_empty() {
        return;
    }
    let start_line = bytecount_lines(&text[..start]) + 1;
    let trimmed_len = slice.trim_end().len();
    let end_line = start_line + bytecount_lines(&slice[..trimmed_len]);
    out.push(TextChunk {
        text: slice.to_string(),
        start_line,
        end_line,
    });
}

fn bytecount_lines(s: &str) -> usize {
    s.bytes().filter(|&b| b == b'\n').count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_yields_nothing() {
        assert!(chunk_text("", 1000, 200).is_empty());
        assert!(chunk_text("   \n\n  ", 1000, 200).is_empty());
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = chunk_text("hello world\nsecond line", 1000, 200);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 2);
    }

    #[test]
    fn long_text_splits_at_paragraphs() {
        let para = "word ".repeat(60).trim_end().to_string();
        let text = format!("{para}\n\n{para}\n\n{para}");
        let chunks = chunk_text(&text, 400, 80);
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.text.len() <= 400 + 80 + 8, "chunk too large: {}", chunk.text.len());
        }
    }

    #[test]
    fn overlap_repeats_tail_content() {
        let text = "alpha beta gamma delta ".repeat(100);
        let chunks = chunk_text(&text, 300, 100);
        assert!(chunks.len() >= 2);
        let first_tail: String = chunks[0].text.chars().rev().take(40).collect();
        let second_head: String = chunks[1].text.chars().take(120).collect();
        let tail_word: String = first_tail.chars().rev().collect();
        let last_word = tail_word.split_whitespace().last().unwrap();
        assert!(second_head.contains(last_word));
    }

    #[test]
    fn line_numbers_track_position() {
        let lines: Vec<String> = (1..=100).map(|i| format!("line number {i}")).collect();
        let text = lines.join("\n");
        let chunks = chunk_text(&text, 300, 50);
        assert!(chunks.len() >= 2);
        assert_eq!(chunks[0].start_line, 1);
        let last = chunks.last().unwrap();
        assert!(last.end_line <= 100);
        assert!(last.end_line > chunks[0].end_line);
        for window in chunks.windows(2) {
            assert!(window[1].start_line >= window[0].start_line);
        }
    }

    #[test]
    fn giant_unbroken_token_is_hard_cut() {
        let text = "x".repeat(5000);
        let chunks = chunk_text(&text, 1000, 200);
        assert!(chunks.len() >= 5);
        // A window may extend past the target by at most the overlap.
        for chunk in &chunks {
            assert!(chunk.text.len() <= 1200);
        }
    }
}
