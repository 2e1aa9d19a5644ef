//! Document type schemas
//!
//! A schema is an ordered list of sections, each an ordered list of field
//! specs. Schemas are validated on construction and immutable afterwards;
//! sessions hold them behind an `Arc`.

pub mod term_sheet;

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

/// Declared type of a field value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "options", rename_all = "snake_case")]
pub enum ValueType {
    String,
    Number,
    Date,
    /// One of the listed options (matched case-insensitively)
    Enum(Vec<String>),
    List,
}

impl ValueType {
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Number => "number",
            ValueType::Date => "date",
            ValueType::Enum(_) => "enum",
            ValueType::List => "list",
        }
    }

    /// Enum helper taking string slices
    pub fn one_of(options: &[&str]) -> Self {
        ValueType::Enum(options.iter().map(|o| o.to_string()).collect())
    }
}

/// Where a field's value is normally expected to come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultSource {
    DealModel,
    FirmPolicy,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub value_type: ValueType,
    pub required: bool,
    pub default_source: DefaultSource,
    /// Expected format and policy reference, used only in prompts
    pub hint: String,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            required: false,
            default_source: DefaultSource::None,
            hint: String::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn from_deal(mut self) -> Self {
        self.default_source = DefaultSource::DealModel;
        self
    }

    pub fn from_policy(mut self) -> Self {
        self.default_source = DefaultSource::FirmPolicy;
        self
    }

    pub fn hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = hint.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionSpec {
    pub name: String,
    /// Heading used in prompts
    pub title: String,
    pub fields: Vec<FieldSpec>,
}

impl SectionSpec {
    pub fn new(name: impl Into<String>, title: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Schema construction and registration errors
#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("schema '{0}' has no sections")]
    Empty(String),

    #[error("duplicate section '{0}'")]
    DuplicateSection(String),

    #[error("section '{0}' has no fields")]
    EmptySection(String),

    #[error("duplicate field '{section}.{field}'")]
    DuplicateField { section: String, field: String },

    #[error("enum field '{section}.{field}' has no options")]
    EmptyEnum { section: String, field: String },

    #[error("document type '{0}' is already registered")]
    DuplicateKind(String),
}

/// Immutable, validated document schema
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSchema {
    kind: String,
    title: String,
    sections: Vec<SectionSpec>,
    /// Source keys in tie-break order (earlier wins)
    source_priority: Vec<String>,
}

impl DocumentSchema {
    pub fn new(
        kind: impl Into<String>,
        title: impl Into<String>,
        sections: Vec<SectionSpec>,
        source_priority: Vec<String>,
    ) -> Result<Self, SchemaError> {
        let kind = kind.into();
        if sections.is_empty() {
            return Err(SchemaError::Empty(kind));
        }

        let mut section_names = HashSet::new();
        for section in &sections {
            if !section_names.insert(section.name.as_str()) {
                return Err(SchemaError::DuplicateSection(section.name.clone()));
            }
            if section.fields.is_empty() {
                return Err(SchemaError::EmptySection(section.name.clone()));
            }

            let mut field_names = HashSet::new();
            for field in &section.fields {
                if !field_names.insert(field.name.as_str()) {
                    return Err(SchemaError::DuplicateField {
                        section: section.name.clone(),
                        field: field.name.clone(),
                    });
                }
                if matches!(&field.value_type, ValueType::Enum(options) if options.is_empty()) {
                    return Err(SchemaError::EmptyEnum {
                        section: section.name.clone(),
                        field: field.name.clone(),
                    });
                }
            }
        }

        Ok(Self {
            kind,
            title: title.into(),
            sections,
            source_priority,
        })
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn sections(&self) -> &[SectionSpec] {
        &self.sections
    }

    pub fn section(&self, name: &str) -> Option<&SectionSpec> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn field(&self, section: &str, field: &str) -> Option<&FieldSpec> {
        self.section(section).and_then(|s| s.field(field))
    }

    pub fn source_priority(&self) -> &[String] {
        &self.source_priority
    }

    /// Tie-break rank of a source key; unlisted keys rank after every listed one
    ///
    /// Keys of the form `base/file` rank as `base`.
    pub fn priority_rank(&self, source_key: &str) -> usize {
        let base = source_key.split('/').next().unwrap_or(source_key);
        self.source_priority
            .iter()
            .position(|k| k == base)
            .unwrap_or(self.source_priority.len())
    }

    pub fn field_count(&self) -> usize {
        self.sections.iter().map(|s| s.fields.len()).sum()
    }

    /// All `(section, field)` pairs in schema order
    pub fn fields(&self) -> impl Iterator<Item = (&SectionSpec, &FieldSpec)> {
        self.sections
            .iter()
            .flat_map(|s| s.fields.iter().map(move |f| (s, f)))
    }
}

/// Registered document types, keyed by kind
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Arc<DocumentSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in term sheet schema
    pub fn with_builtin() -> Result<Self, SchemaError> {
        let mut registry = Self::new();
        registry.register(term_sheet::term_sheet_schema()?)?;
        Ok(registry)
    }

    pub fn register(&mut self, schema: DocumentSchema) -> Result<(), SchemaError> {
        if self.schemas.contains_key(schema.kind()) {
            return Err(SchemaError::DuplicateKind(schema.kind().to_string()));
        }
        self.schemas
            .insert(schema.kind().to_string(), Arc::new(schema));
        Ok(())
    }

    pub fn get(&self, kind: &str) -> Option<Arc<DocumentSchema>> {
        self.schemas.get(kind).cloned()
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.schemas.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}
