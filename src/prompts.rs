//! System prompts for VLM-based page transcription.
//!
//! The prompt is assembled from a shared preamble, tier-specific rules and a
//! shared output contract, so raising the fidelity tier only adds rules.
//! [`crate::config::ConversionConfig::system_prompt`] replaces all of it.

use crate::config::FidelityTier;

const PREAMBLE: &str = "You are an expert document converter. Your task is to convert a document page image to clean, well-structured Markdown.

Follow these rules precisely:

1. TEXT PRESERVATION
   - Preserve ALL text content completely and accurately
   - Maintain the reading order as a human would read the page
   - Correct obvious OCR-like errors only if you are completely certain

2. STRUCTURE
   - Use # for the main page title (at most one per page)
   - Use ## for major sections, ### for subsections, #### for minor headings
   - Use - for unordered lists and 1. 2. 3. for ordered lists
   - Preserve list nesting with indentation";

const TIER2_RULES: &str = "
   - Use **bold** and *italic* to match the visual emphasis

3. TABLES
   - Convert tables to GFM pipe format
   - Add alignment markers (:---, :---:, ---:) matching visual alignment

4. CODE
   - Wrap code blocks in triple backticks with language identifier
   - Wrap inline code in single backticks";

const TIER3_RULES: &str = "
   - If a table is too complex for pipe format, use HTML table markup

5. FORMULAS
   - Render mathematical expressions using LaTeX: $inline$ and $$display$$

6. FIGURES
   - Describe each figure or chart in one italic caption line: *Figure: ...*
   - Never invent image links";

const OUTPUT_RULES: &str = "

WHAT TO IGNORE
   - Page numbers (bottom/top of page)
   - Repeated headers/footers that appear on every page
   - Decorative borders and lines that carry no content meaning

OUTPUT FORMAT
   - Output ONLY the Markdown content
   - Do NOT wrap in ```markdown fences
   - Do NOT add commentary or explanations
   - Do NOT add \"Page X of Y\" markers
   - Start directly with the page content";

/// Build the built-in system prompt for the given fidelity tier.
pub fn system_prompt(tier: FidelityTier) -> String {
    let mut prompt = String::from(PREAMBLE);
    if matches!(tier, FidelityTier::Tier2 | FidelityTier::Tier3) {
        prompt.push_str(TIER2_RULES);
    }
    if tier == FidelityTier::Tier3 {
        prompt.push_str(TIER3_RULES);
    }
    prompt.push_str(OUTPUT_RULES);
    prompt
}

/// Build the context message for maintain_format mode.
///
/// Sent as a separate system message containing the prior page's Markdown.
pub fn maintain_format_context(prior_page: &str) -> String {
    format!(
        "The previous page's content is provided below. Keep your output stylistically \
consistent with it and continue any numbered lists, subsections, or running text \
that began there.\n\n\"\"\"{}\"\"\"",
        prior_page
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_add_rules_monotonically() {
        let t1 = system_prompt(FidelityTier::Tier1);
        let t2 = system_prompt(FidelityTier::Tier2);
        let t3 = system_prompt(FidelityTier::Tier3);

        assert!(!t1.contains("TABLES"));
        assert!(t2.contains("TABLES"));
        assert!(!t2.contains("LaTeX"));
        assert!(t3.contains("LaTeX"));
        assert!(t1.len() < t2.len() && t2.len() < t3.len());
    }

    #[test]
    fn every_tier_forbids_fences() {
        for tier in [FidelityTier::Tier1, FidelityTier::Tier2, FidelityTier::Tier3] {
            assert!(system_prompt(tier).contains("Do NOT wrap in ```markdown fences"));
        }
    }

    #[test]
    fn format_context_quotes_prior_page() {
        let ctx = maintain_format_context("1. first item");
        assert!(ctx.ends_with("\"\"\"1. first item\"\"\""));
    }
}
