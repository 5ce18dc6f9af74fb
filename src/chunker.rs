//! Boundary-aware text chunker.
//!
//! Splits file content into [`ChunkSpan`]s that respect the configured
//! character budget (`max_tokens * chars_per_token`). Strategy is dispatched
//! on file type inferred from the extension:
//!
//! - **code** — split at declaration boundaries detected via per-language
//!   regex signatures ([`crate::languages`]), with a minimum line gap to
//!   suppress over-segmentation from nested declarations; oversized spans
//!   fall back to fixed-size windowing.
//! - **markdown** — split at level 1–3 headings; an oversized section is
//!   split once at its line-count midpoint (no further recursion).
//! - **config** — one chunk when within budget, otherwise windowed.
//! - **text** — always windowed.
//!
//! Windowing carries the last `overlap_lines` lines of each window into the
//! next so semantic continuity crosses chunk boundaries.
//!
//! Invariants: every span satisfies `start_line <= end_line` (1-based,
//! inclusive) and its content equals exactly the file lines it claims to
//! span, joined with `\n`. Spans are emitted in non-decreasing start-line
//! order and cover the file. Whitespace-only spans are discarded. The
//! function is pure and total: no input panics or errors.

use regex::Regex;
use std::sync::OnceLock;

use crate::config::ChunkingConfig;
use crate::languages;
use crate::models::{ChunkSpan, ChunkType};

/// Classify a file path by extension. Unrecognized extensions are `text`.
pub fn classify_path(path: &str) -> ChunkType {
    let ext = match extension(path) {
        Some(e) => e,
        None => return ChunkType::Text,
    };
    match ext.as_str() {
        "md" | "markdown" => ChunkType::Markdown,
        "json" | "yaml" | "yml" | "toml" | "ini" | "cfg" | "conf" | "env" | "properties" => {
            ChunkType::Config
        }
        _ if languages::boundary_patterns(&ext).is_some() => ChunkType::Code,
        "cs" | "swift" | "kt" | "scala" | "php" | "sh" | "sql" => ChunkType::Code,
        _ => ChunkType::Text,
    }
}

/// Split file content into ordered chunk spans.
pub fn chunk(content: &str, file_path: &str, config: &ChunkingConfig) -> Vec<ChunkSpan> {
    let lines: Vec<&str> = content.lines().collect();
    let mut spans = Vec::new();
    if lines.is_empty() {
        return spans;
    }

    let kind = classify_path(file_path);
    match kind {
        ChunkType::Code => chunk_code(&lines, file_path, config, &mut spans),
        ChunkType::Markdown => chunk_markdown(&lines, config, &mut spans),
        ChunkType::Config => chunk_config(&lines, config, &mut spans),
        ChunkType::Text => window(&lines, 0, ChunkType::Text, config, &mut spans),
    }

    spans
}

fn extension(path: &str) -> Option<String> {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Joined character length of a line range, counting one char per newline.
fn joined_len(lines: &[&str]) -> usize {
    lines.iter().map(|l| l.len() + 1).sum()
}

/// Emit a span for `lines[start..=end]` relative to `base` (0-based index of
/// `lines[0]` within the file). Whitespace-only spans are dropped.
fn push_span(
    lines: &[&str],
    base: usize,
    start: usize,
    end: usize,
    kind: ChunkType,
    out: &mut Vec<ChunkSpan>,
) {
    let content = lines[start..=end].join("\n");
    if content.trim().is_empty() {
        return;
    }
    out.push(ChunkSpan {
        content,
        start_line: base + start + 1,
        end_line: base + end + 1,
        chunk_type: kind,
    });
}

/// Fixed-size windowing: accumulate lines until the joined length reaches
/// the budget, emit, then begin the next window carrying the previous
/// window's trailing `overlap_lines` lines.
fn window(
    lines: &[&str],
    base: usize,
    kind: ChunkType,
    config: &ChunkingConfig,
    out: &mut Vec<ChunkSpan>,
) {
    if lines.is_empty() {
        return;
    }
    let max_chars = config.max_chars();
    let mut start = 0usize;

    loop {
        let mut len = 0usize;
        let mut end = start;
        for (i, line) in lines.iter().enumerate().skip(start) {
            len += line.len() + 1;
            end = i;
            if len >= max_chars {
                break;
            }
        }

        push_span(lines, base, start, end, kind, out);

        if end + 1 >= lines.len() {
            break;
        }
        let carried = (end + 1).saturating_sub(config.overlap_lines);
        // Windows shorter than the overlap advance without carry, so the
        // loop always makes progress.
        start = if carried > start { carried } else { end + 1 };
    }
}

fn chunk_code(
    lines: &[&str],
    file_path: &str,
    config: &ChunkingConfig,
    out: &mut Vec<ChunkSpan>,
) {
    let patterns = extension(file_path)
        .as_deref()
        .and_then(languages::boundary_patterns);

    let boundaries = match patterns {
        Some(patterns) => detect_boundaries(lines, patterns, config.min_boundary_gap),
        None => Vec::new(),
    };

    if boundaries.is_empty() {
        window(lines, 0, ChunkType::Code, config, out);
        return;
    }

    let mut starts = Vec::with_capacity(boundaries.len() + 1);
    if boundaries[0] > 0 {
        starts.push(0);
    }
    starts.extend_from_slice(&boundaries);

    for (i, &start) in starts.iter().enumerate() {
        let end = if i + 1 < starts.len() {
            starts[i + 1] - 1
        } else {
            lines.len() - 1
        };
        if joined_len(&lines[start..=end]) > config.max_chars() {
            window(&lines[start..=end], start, ChunkType::Code, config, out);
        } else {
            push_span(lines, 0, start, end, ChunkType::Code, out);
        }
    }
}

/// Candidate boundary line indices, suppressing candidates closer than
/// `min_gap` lines to the previously accepted one.
fn detect_boundaries(lines: &[&str], patterns: &[Regex], min_gap: usize) -> Vec<usize> {
    let mut accepted = Vec::new();
    let mut last: Option<usize> = None;

    for (i, line) in lines.iter().enumerate() {
        if !patterns.iter().any(|re| re.is_match(line)) {
            continue;
        }
        if last.map_or(true, |prev| i - prev >= min_gap) {
            accepted.push(i);
            last = Some(i);
        }
    }
    accepted
}

fn heading_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^#{1,3}\s").expect("heading pattern must compile"))
}

fn chunk_markdown(lines: &[&str], config: &ChunkingConfig, out: &mut Vec<ChunkSpan>) {
    let heading = heading_pattern();
    let mut starts: Vec<usize> = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if heading.is_match(line) {
            starts.push(i);
        }
    }
    if starts.first() != Some(&0) {
        starts.insert(0, 0);
    }

    for (i, &start) in starts.iter().enumerate() {
        let end = if i + 1 < starts.len() {
            starts[i + 1] - 1
        } else {
            lines.len() - 1
        };

        if joined_len(&lines[start..=end]) > config.max_chars() && end > start {
            // Oversized section: split once at the line-count midpoint.
            let mid = start + (end - start + 1) / 2;
            push_span(lines, 0, start, mid - 1, ChunkType::Markdown, out);
            push_span(lines, 0, mid, end, ChunkType::Markdown, out);
        } else {
            push_span(lines, 0, start, end, ChunkType::Markdown, out);
        }
    }
}

fn chunk_config(lines: &[&str], config: &ChunkingConfig, out: &mut Vec<ChunkSpan>) {
    if joined_len(lines) <= config.max_chars() {
        push_span(lines, 0, 0, lines.len() - 1, ChunkType::Config, out);
    } else {
        window(lines, 0, ChunkType::Config, config, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_config() -> ChunkingConfig {
        ChunkingConfig::default()
    }

    fn tiny_config() -> ChunkingConfig {
        ChunkingConfig {
            max_tokens: 10,
            chars_per_token: 4,
            overlap_lines: 3,
            min_boundary_gap: 5,
        }
    }

    /// Content/line-range correspondence: re-splitting each chunk must
    /// reproduce exactly the claimed file lines.
    fn assert_spans_valid(content: &str, spans: &[ChunkSpan]) {
        let lines: Vec<&str> = content.lines().collect();
        let mut prev_start = 0usize;
        for span in spans {
            assert!(span.start_line <= span.end_line);
            assert!(span.start_line >= prev_start, "start lines must not decrease");
            prev_start = span.start_line;
            let expected = lines[span.start_line - 1..span.end_line].join("\n");
            assert_eq!(span.content, expected);
        }
    }

    #[test]
    fn empty_content_yields_no_chunks() {
        assert!(chunk("", "src/lib.rs", &default_config()).is_empty());
        assert!(chunk("", "notes.txt", &default_config()).is_empty());
    }

    #[test]
    fn whitespace_only_content_is_discarded() {
        assert!(chunk("\n   \n\t\n", "notes.txt", &default_config()).is_empty());
    }

    #[test]
    fn classification_by_extension() {
        assert_eq!(classify_path("src/main.rs"), ChunkType::Code);
        assert_eq!(classify_path("app/handler.py"), ChunkType::Code);
        assert_eq!(classify_path("README.md"), ChunkType::Markdown);
        assert_eq!(classify_path("config/settings.yaml"), ChunkType::Config);
        assert_eq!(classify_path("Cargo.toml"), ChunkType::Config);
        assert_eq!(classify_path("notes.txt"), ChunkType::Text);
        assert_eq!(classify_path("LICENSE"), ChunkType::Text);
        assert_eq!(classify_path(".env"), ChunkType::Text);
    }

    #[test]
    fn deterministic() {
        let content = "fn a() {\n    1\n}\n\nfn b() {\n    2\n}\n";
        let first = chunk(content, "src/lib.rs", &default_config());
        let second = chunk(content, "src/lib.rs", &default_config());
        assert_eq!(first, second);
    }

    #[test]
    fn code_splits_at_function_boundaries() {
        let mut content = String::new();
        for name in ["alpha", "beta", "gamma"] {
            content.push_str(&format!("fn {name}() {{\n"));
            for i in 0..6 {
                content.push_str(&format!("    let v{i} = {i};\n"));
            }
            content.push_str("}\n");
        }
        let spans = chunk(&content, "src/lib.rs", &default_config());
        assert_eq!(spans.len(), 3);
        assert!(spans[0].content.starts_with("fn alpha"));
        assert!(spans[1].content.starts_with("fn beta"));
        assert!(spans[2].content.starts_with("fn gamma"));
        assert!(spans.iter().all(|s| s.chunk_type == ChunkType::Code));
        assert_spans_valid(&content, &spans);
    }

    #[test]
    fn close_boundaries_are_suppressed() {
        // Three one-line functions within 5 lines of each other: only the
        // first is accepted, so the whole file stays one chunk.
        let content = "fn a() { 1 }\nfn b() { 2 }\nfn c() { 3 }\n";
        let spans = chunk(content, "src/lib.rs", &default_config());
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].start_line, 1);
        assert_eq!(spans[0].end_line, 3);
    }

    #[test]
    fn leading_lines_before_first_boundary_are_covered() {
        let content = "use std::io;\nuse std::fmt;\n\nfn main() {\n    run();\n}\n";
        let spans = chunk(content, "src/main.rs", &default_config());
        assert_eq!(spans[0].start_line, 1);
        assert_spans_valid(content, &spans);
        let last = spans.last().unwrap();
        assert_eq!(last.end_line, content.lines().count());
    }

    #[test]
    fn boundary_free_code_windows_with_three_line_overlap() {
        // No recognized declarations: degrade to windowing. Consecutive
        // windows must overlap by exactly overlap_lines.
        let content = (0..40)
            .map(|i| format!("v{i} += 1;"))
            .collect::<Vec<_>>()
            .join("\n");
        let config = tiny_config();
        let spans = chunk(&content, "src/lib.rs", &config);
        assert!(spans.len() > 1);
        assert_spans_valid(&content, &spans);
        for pair in spans.windows(2) {
            let overlap = pair[0].end_line as i64 - pair[1].start_line as i64 + 1;
            assert_eq!(overlap, config.overlap_lines as i64);
        }
    }

    #[test]
    fn unrecognized_code_extension_windows_whole_file() {
        let content = "some code\nmore code\n";
        let spans = chunk(content, "build.gradle.kts2", &default_config());
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].chunk_type, ChunkType::Text);
    }

    #[test]
    fn oversized_code_span_is_windowed() {
        let mut content = String::from("fn big() {\n");
        for i in 0..80 {
            content.push_str(&format!("    let padding_variable_{i} = \"some long filler text\";\n"));
        }
        content.push_str("}\n");
        let spans = chunk(&content, "src/big.rs", &default_config());
        assert!(spans.len() > 1, "expected split, got {}", spans.len());
        assert_spans_valid(&content, &spans);
    }

    #[test]
    fn markdown_sections_become_chunks() {
        let mut content = String::new();
        for section in 1..=3 {
            content.push_str(&format!("## Section {section}\n"));
            for line in 1..10 {
                content.push_str(&format!("Content line {line} of section {section}.\n"));
            }
        }
        let spans = chunk(&content, "docs/guide.md", &default_config());
        assert_eq!(spans.len(), 3);
        assert!(spans.iter().all(|s| s.chunk_type == ChunkType::Markdown));
        // Disjoint, covering ranges
        assert_eq!(spans[0].start_line, 1);
        assert_eq!(spans[1].start_line, spans[0].end_line + 1);
        assert_eq!(spans[2].start_line, spans[1].end_line + 1);
        assert_eq!(spans[2].end_line, content.lines().count());
        assert_spans_valid(&content, &spans);
    }

    #[test]
    fn markdown_preamble_before_first_heading_is_kept() {
        let content = "Intro paragraph.\n\n# First\nBody.\n";
        let spans = chunk(content, "README.md", &default_config());
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].start_line, 1);
        assert!(spans[0].content.starts_with("Intro"));
    }

    #[test]
    fn deep_headings_do_not_split() {
        let content = "# Top\n#### Not a boundary\nBody.\n";
        let spans = chunk(content, "README.md", &default_config());
        assert_eq!(spans.len(), 1);
    }

    #[test]
    fn oversized_markdown_section_splits_once_at_midpoint() {
        let mut content = String::from("# Big\n");
        for i in 0..9 {
            content.push_str(&format!("Line {i} with a little padding text.\n"));
        }
        let spans = chunk(&content, "doc.md", &tiny_config());
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].start_line, 1);
        assert_eq!(spans[0].end_line, 5);
        assert_eq!(spans[1].start_line, 6);
        assert_eq!(spans[1].end_line, 10);
        assert_spans_valid(&content, &spans);
    }

    #[test]
    fn config_within_budget_is_single_chunk() {
        let content = "[package]\nname = \"demo\"\nversion = \"0.1.0\"\n";
        let spans = chunk(content, "Cargo.toml", &default_config());
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].chunk_type, ChunkType::Config);
        assert_eq!(spans[0].start_line, 1);
        assert_eq!(spans[0].end_line, 3);
    }

    #[test]
    fn oversized_config_is_windowed() {
        let content = (0..50)
            .map(|i| format!("key_{i} = \"a reasonably long configuration value\""))
            .collect::<Vec<_>>()
            .join("\n");
        let spans = chunk(&content, "settings.toml", &tiny_config());
        assert!(spans.len() > 1);
        assert_spans_valid(&content, &spans);
    }

    #[test]
    fn text_is_always_windowed() {
        let content = (0..30)
            .map(|i| format!("Plain text line number {i} with filler."))
            .collect::<Vec<_>>()
            .join("\n");
        let spans = chunk(&content, "notes.txt", &tiny_config());
        assert!(spans.len() > 1);
        assert!(spans.iter().all(|s| s.chunk_type == ChunkType::Text));
        assert_spans_valid(&content, &spans);
    }

    #[test]
    fn single_oversized_line_does_not_loop() {
        let content = "x".repeat(10_000);
        let spans = chunk(&content, "notes.txt", &default_config());
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].start_line, 1);
        assert_eq!(spans[0].end_line, 1);
    }
}
