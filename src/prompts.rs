//! Instruction texts sent alongside each page image.
//!
//! The instruction is free text chosen by the caller. This module only holds
//! the default instruction, a small catalog of named presets the CLI exposes
//! via `--preset`, and the context sentences prepended to every request.

/// Used when the caller supplies no instruction.
pub const DEFAULT_INSTRUCTION: &str = "Extract all text on this page in reading order. \
Preserve headings, lists and tables (use Markdown tables). \
Output only the extracted content, without commentary.";

/// A named instruction template.
#[derive(Debug, Clone, Copy)]
pub struct Preset {
    pub name: &'static str,
    pub description: &'static str,
    pub instruction: &'static str,
}

/// Built-in presets, in display order.
pub const PRESETS: &[Preset] = &[
    Preset {
        name: "design-review",
        description: "Landscape/architecture design decks as one-line JSON per page",
        instruction: r#"You are a vision and document-understanding model. Every image comes from a landscape architecture design project document. Extract the text of this single page, interpret it, and return ONLY one line of UTF-8 JSON with exactly these keys in this order, and no other text or line breaks:

{"page_type": "<one of: cover, contents, chapter, content>", "page_name": "<main title of the page; if none, summarise the design theme in one sentence>", "tag": ["<3-8 keywords strongly related to the page>"], "page_content": "<summary of everything on the page in at most 200 words, highlighting design points>", "project_name": "<name of the project or document; empty if not stated>"}

Rules:
1. Output a single line of JSON with no line breaks, comments or extra characters.
2. `tag` must be an array of strings.
3. If a field cannot be determined use "" but keep the key.
4. Do not escape non-ASCII text.
5. Do not add, remove, rename or reorder keys."#,
    },
    Preset {
        name: "invoice",
        description: "Invoice fields as JSON",
        instruction: "Identify the following information on this invoice image:\n\
1. Invoice type and number\n\
2. Issue date\n\
3. Buyer and seller details\n\
4. Line items for goods or services\n\
5. Amounts (including tax, excluding tax, tax)\n\
6. Remarks\n\n\
Return the result as JSON.",
    },
    Preset {
        name: "contract",
        description: "Contract clauses, parties, amounts and terms",
        instruction: "Analyse this contract page, focusing on:\n\
1. Contracting parties\n\
2. Key clauses\n\
3. Rights and obligations\n\
4. Amounts and deadlines\n\
5. Special agreements\n\n\
Organise the output as a list of items.",
    },
    Preset {
        name: "table",
        description: "Tables as Markdown",
        instruction: "Extract the table data in this image:\n\
1. Recognise the table structure\n\
2. Extract every cell\n\
3. Keep the original row and column relationships\n\
4. Mark the header row\n\n\
Output Markdown tables.",
    },
    Preset {
        name: "financial-statement",
        description: "Financial statement figures and ratios",
        instruction: "Analyse this financial statement image:\n\
1. Identify the statement type (balance sheet, income statement, cash flow, ...)\n\
2. Extract the main figures\n\
3. Compute key financial ratios\n\
4. Flag unusual or important items\n\n\
Output a structured analysis.",
    },
    Preset {
        name: "id-document",
        description: "Identity document fields as JSON",
        instruction: "Identify the information on this identity document image:\n\
1. Document type\n\
2. Name\n\
3. Document number\n\
4. Validity period\n\
5. Issuing authority\n\
6. Other key information\n\n\
Return the result as JSON.",
    },
];

/// Look a preset up by name (case-insensitive).
pub fn preset(name: &str) -> Option<&'static Preset> {
    PRESETS.iter().find(|p| p.name.eq_ignore_ascii_case(name.trim()))
}

/// The text part of a page request: page context followed by the instruction.
///
/// The page number gives the model context only; results are addressed by
/// the caller, never by anything the model says.
pub fn page_instruction(page_num: u32, instruction: &str) -> String {
    format!("This is page {page_num} of the document. {instruction}")
}

/// The text part of a request for a standalone image, numbered by its
/// position in the upload.
pub fn image_instruction(image_num: u32, instruction: &str) -> String {
    format!("This is image {image_num}. {instruction}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_lookup_is_case_insensitive() {
        assert_eq!(preset("Invoice").map(|p| p.name), Some("invoice"));
        assert!(preset(" table ").is_some());
        assert!(preset("nope").is_none());
    }

    #[test]
    fn preset_names_are_unique() {
        let mut names: Vec<_> = PRESETS.iter().map(|p| p.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), PRESETS.len());
    }

    #[test]
    fn page_instruction_prefixes_page_number() {
        let text = page_instruction(7, "Summarise.");
        assert!(text.starts_with("This is page 7 "));
        assert!(text.ends_with("Summarise."));
    }

    #[test]
    fn image_instruction_prefixes_image_number() {
        assert_eq!(image_instruction(2, "Read it."), "This is image 2. Read it.");
    }
}
