//! Post-processing: deterministic cleanup of converted Markdown.
//!
//! VLM output occasionally carries artefacts the prompt asked it to avoid:
//! an outer ` ```markdown ` fence, `![figure](image.png)` links to files that
//! do not exist, CRLF line endings, a table body with a stray separator row.
//! Text uploads need a smaller subset (line endings, whitespace, invisible
//! characters). Each rule is a pure `&str → String` pass; the two rule sets
//! below fix the order.
//!
//! These quirks survive even explicit prompt instructions, and every extra
//! formatting instruction costs tokens on every page. The prompt therefore
//! says what to extract and this module repairs the shape afterwards. None
//! of the rules change the words on the page, and each one is tested on its
//! own.
//!
//! Order matters: fences are stripped before line endings are normalised so
//! the fence regex sees the raw model output, heading spacing runs after
//! blank-line collapsing so it cannot reintroduce long gaps, and the final
//! newline pass is always last.

use once_cell::sync::Lazy;
use regex::Regex;

type Rule = fn(&str) -> String;

/// Rules applied to VLM page output, in order.
const VLM_RULES: &[Rule] = &[
    strip_outer_fence,
    normalise_line_endings,
    trim_trailing_whitespace,
    collapse_blank_lines,
    space_headings,
    insert_missing_table_separator,
    drop_mid_table_separators,
    replace_placeholder_images,
    remove_invisible_chars,
    ensure_final_newline,
];

/// Rules applied to Markdown and plain-text uploads, in order.
const TEXT_RULES: &[Rule] = &[
    normalise_line_endings,
    remove_invisible_chars,
    trim_trailing_whitespace,
    collapse_blank_lines,
    ensure_final_newline,
];

/// Clean raw VLM output for one page.
pub fn clean_markdown(input: &str) -> String {
    apply(VLM_RULES, input)
}

/// Normalise an uploaded text or Markdown document without touching its structure.
pub fn normalise_text(input: &str) -> String {
    apply(TEXT_RULES, input)
}

fn apply(rules: &[Rule], input: &str) -> String {
    rules
        .iter()
        .fold(input.to_string(), |text, rule| rule(&text))
}

// ── Line-level helpers ───────────────────────────────────────────────────────

fn is_fence(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("```") || t.starts_with("~~~")
}

static RE_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6}\s+\S").unwrap());

fn is_heading(line: &str) -> bool {
    RE_HEADING.is_match(line)
}

fn is_table_row(line: &str) -> bool {
    let t = line.trim();
    t.len() > 2 && t.starts_with('|') && t.ends_with('|')
}

fn is_separator_row(line: &str) -> bool {
    let t = line.trim();
    t.starts_with('|')
        && t.contains('-')
        && t.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

fn separator_for(header: &str) -> String {
    let cols = header.trim().matches('|').count().saturating_sub(1).max(1);
    let mut sep = String::from("|");
    for _ in 0..cols {
        sep.push_str(" --- |");
    }
    sep
}

// ── Rules ────────────────────────────────────────────────────────────────────

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?\r?\n(.*?)\r?\n```$").unwrap());

/// Unwrap output the model wrapped in a single ```` ```markdown ```` fence.
fn strip_outer_fence(input: &str) -> String {
    match RE_OUTER_FENCE.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// Some providers return CRLF; every rule after this one assumes `\n`.
fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn trim_trailing_whitespace(input: &str) -> String {
    input.lines().map(str::trim_end).collect::<Vec<_>>().join("\n")
}

static RE_BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

/// At most two consecutive blank lines.
fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_RUN.replace_all(input, "\n\n\n").into_owned()
}

/// Exactly one blank line before each heading outside code blocks.
fn space_headings(input: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut in_code = false;

    for line in input.lines() {
        if is_fence(line) {
            in_code = !in_code;
        } else if !in_code && is_heading(line) && !out.is_empty() {
            while out.last().is_some_and(|l| l.is_empty()) {
                out.pop();
            }
            out.push("");
        }
        out.push(line);
    }

    out.join("\n")
}

/// A table whose header is followed directly by a body row gets a separator.
fn insert_missing_table_separator(input: &str) -> String {
    let lines: Vec<&str> = input.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len() + 4);
    let mut in_code = false;

    for (i, line) in lines.iter().enumerate() {
        out.push(line.to_string());
        if is_fence(line) {
            in_code = !in_code;
            continue;
        }
        if in_code || !is_table_row(line) || is_separator_row(line) {
            continue;
        }
        let starts_table = i == 0 || !is_table_row(lines[i - 1]);
        let next = lines.get(i + 1).copied().unwrap_or("");
        if starts_table && is_table_row(next) && !is_separator_row(next) {
            out.push(separator_for(line));
        }
    }

    out.join("\n")
}

/// GFM allows a separator only as the second row of a table.
fn drop_mid_table_separators(input: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut row_in_table = 0usize;

    for line in input.lines() {
        if !is_table_row(line) {
            row_in_table = 0;
            out.push(line);
            continue;
        }
        row_in_table += 1;
        if is_separator_row(line) && row_in_table != 2 {
            continue;
        }
        out.push(line);
    }

    out.join("\n")
}

static RE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]*)\)").unwrap());

const PLACEHOLDER_HOSTS: &[&str] = &[
    "example.com",
    "placeholder.com",
    "dummyimage.com",
    "lorempixel.com",
    "picsum.photos",
    "placehold.it",
    "placehold.co",
];

/// A page image cannot reference local files, so any non-HTTP target is
/// invented; so are the well-known placeholder hosts.
fn is_placeholder_url(url: &str) -> bool {
    let u = url.trim();
    let Some(rest) = u
        .strip_prefix("https://")
        .or_else(|| u.strip_prefix("http://"))
    else {
        return true;
    };
    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    PLACEHOLDER_HOSTS
        .iter()
        .any(|p| host == *p || host.ends_with(&format!(".{p}")))
}

/// Turn invented image links into an italic caption so the alt text survives.
fn replace_placeholder_images(input: &str) -> String {
    RE_IMAGE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            if !is_placeholder_url(&caps[2]) {
                return caps[0].to_string();
            }
            match caps[1].trim() {
                "" => String::new(),
                alt => format!("*{alt}*"),
            }
        })
        .into_owned()
}

/// Zero-width spaces, BOMs and soft hyphens copied from the page survive
/// into the output and break search and diffing downstream.
fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'],
        "",
    )
}

fn ensure_final_newline(input: &str) -> String {
    let mut out = input.trim_end().to_string();
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_outer_fence_with_and_without_language() {
        assert_eq!(strip_outer_fence("```markdown\n# Hello\nWorld\n```"), "# Hello\nWorld");
        assert_eq!(strip_outer_fence("```\n# Hello\n```\n"), "# Hello");
    }

    #[test]
    fn inner_code_block_is_not_an_outer_fence() {
        let input = "Intro\n```rust\nfn main() {}\n```";
        assert_eq!(strip_outer_fence(input), input);
    }

    #[test]
    fn line_endings_and_blank_runs() {
        assert_eq!(normalise_line_endings("a\r\nb\rc"), "a\nb\nc");
        assert_eq!(collapse_blank_lines("a\n\n\n\n\n\nb"), "a\n\n\nb");
    }

    #[test]
    fn headings_get_one_blank_line_before() {
        assert_eq!(space_headings("text\n# Heading\nmore"), "text\n\n# Heading\nmore");
        assert_eq!(space_headings("text\n\n\n## H"), "text\n\n## H");
        assert_eq!(space_headings("# First\nbody"), "# First\nbody");
    }

    #[test]
    fn comments_inside_code_blocks_are_not_headings() {
        let input = "```bash\necho hi\n# not a heading\n```";
        assert_eq!(space_headings(input), input);
        assert_eq!(space_headings("#hashtag"), "#hashtag");
    }

    #[test]
    fn missing_separator_inserted_once() {
        let fixed = insert_missing_table_separator("| A | B |\n| 1 | 2 |\n| 3 | 4 |");
        assert_eq!(fixed, "| A | B |\n| --- | --- |\n| 1 | 2 |\n| 3 | 4 |");
    }

    #[test]
    fn table_with_separator_unchanged() {
        let input = "| A | B |\n| :--- | ---: |\n| 1 | 2 |";
        assert_eq!(insert_missing_table_separator(input), input);
    }

    #[test]
    fn mid_table_separator_removed() {
        let input = "| A | B |\n| --- | --- |\n| 1 | 2 |\n| --- | --- |\n| 3 | 4 |";
        assert_eq!(
            drop_mid_table_separators(input),
            "| A | B |\n| --- | --- |\n| 1 | 2 |\n| 3 | 4 |"
        );
    }

    #[test]
    fn placeholder_images_become_captions() {
        assert_eq!(replace_placeholder_images("![Chart](chart.png)"), "*Chart*");
        assert_eq!(replace_placeholder_images("![](image-url)"), "");
        assert_eq!(
            replace_placeholder_images("![x](https://via.placeholder.com/150)"),
            "*x*"
        );
        let real = "![Figure](https://arxiv.org/figures/fig1.png)";
        assert_eq!(replace_placeholder_images(real), real);
    }

    #[test]
    fn invisible_chars_removed() {
        assert_eq!(
            remove_invisible_chars("hello\u{200B}world\u{FEFF}foo\u{00AD}bar"),
            "helloworldfoobar"
        );
    }

    #[test]
    fn final_newline_is_single() {
        assert_eq!(ensure_final_newline("hello"), "hello\n");
        assert_eq!(ensure_final_newline("hello\n\n\n"), "hello\n");
        assert_eq!(ensure_final_newline(""), "\n");
    }

    #[test]
    fn clean_markdown_full_pipeline() {
        let input = "```markdown\n# Title\r\n\r\nSome text   \n\n\n\n\n\n## Section\n\n| A | B |\n| 1 | 2 |\n```";
        let result = clean_markdown(input);
        assert!(result.starts_with("# Title\n"));
        assert!(result.contains("| A | B |\n| --- | --- |\n| 1 | 2 |"));
        assert!(result.ends_with("|\n"));
        assert!(!result.contains("\n\n\n\n"));
    }

    #[test]
    fn normalise_text_keeps_structure() {
        let input = "\u{FEFF}Title\r\n![logo](logo.png)   \r\n\r\n\r\n\r\n\r\nBody";
        assert_eq!(normalise_text(input), "Title\n![logo](logo.png)\n\n\nBody\n");
    }
}
