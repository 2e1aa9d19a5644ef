//! Prompt construction from field specs

use crate::schema::{DefaultSource, DocumentSchema, FieldSpec, SectionSpec, ValueType};

/// System prompt carrying the binary confidence rules
pub fn system_prompt(schema: &DocumentSchema) -> String {
    format!(
        "You extract fields for a {title} from the source documents provided.\n\
         \n\
         For every requested field:\n\
         1. Find the value. Deal-specific documents take precedence; policy documents only supply defaults.\n\
         2. Cite the source: the document's file name and a precise location (cell reference such as B5, section number, or line).\n\
         3. Set confidence to exactly 1.0 or 0.0. Never use any other number.\n\
            - 1.0 only when the value is stated explicitly and unambiguously in exactly one deal-specific document, \
         with no inference, calculation, unit conversion or aggregation.\n\
            - 0.0 in every other case: inferred, computed, taken from a policy default, ambiguous, \
         or found with different values in different documents.\n\
         4. List every other value you saw for the field in \"conflicts\", each with its own source.\n\
         5. Documents marked REFERENCE ONLY show formatting. Never take deal values from them.\n\
         \n\
         If a field is not found, set value to null and confidence to 0.0.\n\
         Respond with a single valid JSON object and nothing else.",
        title = schema.title().to_lowercase()
    )
}

fn type_description(spec: &FieldSpec) -> String {
    match &spec.value_type {
        ValueType::String => "string".to_string(),
        ValueType::Number => "number (plain, no currency symbols or separators)".to_string(),
        ValueType::Date => "date (YYYY-MM-DD)".to_string(),
        ValueType::Enum(options) => format!("one of: {}", options.join(" | ")),
        ValueType::List => "array of strings".to_string(),
    }
}

/// Per-section prompt listing each field and the expected response shape
pub fn section_prompt(section: &SectionSpec) -> String {
    let mut prompt = format!("Extract the {} section fields.\n\nFields:\n", section.title);

    for spec in &section.fields {
        let origin = match spec.default_source {
            DefaultSource::DealModel => "usually in the deal model",
            DefaultSource::FirmPolicy => "often a firm policy default",
            DefaultSource::None => "source varies",
        };
        prompt.push_str(&format!(
            "- {}: {}{}; {}",
            spec.name,
            type_description(spec),
            if spec.required { ", required" } else { "" },
            origin
        ));
        if !spec.hint.is_empty() {
            prompt.push_str(&format!(". {}", spec.hint));
        }
        prompt.push('\n');
    }

    prompt.push_str(
        "\nRespond with one JSON object keyed by field name. Each entry:\n\
         {\n\
         \x20 \"value\": <value or null>,\n\
         \x20 \"source\": {\"file\": \"<file name>\", \"location\": \"<cell / section / line>\"},\n\
         \x20 \"confidence\": 1.0 or 0.0,\n\
         \x20 \"conflicts\": [{\"value\": <value>, \"source\": {\"file\": \"...\", \"location\": \"...\"}, \"confidence\": 1.0 or 0.0}],\n\
         \x20 \"reasoning\": \"<one sentence>\"\n\
         }\n",
    );
    prompt
}
