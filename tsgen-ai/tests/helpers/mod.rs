//! Shared test doubles: scripted model, in-memory sources, counting renderer

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tsgen_ai::extraction::model_client::{ModelClient, ModelError, ModelRequest, ModelResponse};
use tsgen_ai::extraction::ExtractionEngine;
use tsgen_ai::render::{MarkdownRenderer, RenderError, RenderMode, Renderer};
use tsgen_ai::schema::term_sheet::term_sheet_schema;
use tsgen_ai::schema::{DocumentSchema, SchemaRegistry};
use tokio::sync::Notify;
use tsgen_ai::outputs::OutputWriter;
use tsgen_ai::session::{FieldStore, SessionManager};
use tsgen_ai::sources::{
    SourceContext, SourceContextBuilder, SourceDocument, SourceError, SourceRole,
};
use tsgen_common::events::EventBus;
use uuid::Uuid;

pub const DEAL_FILE: &str = "Model.csv";
pub const POLICY_FILE: &str = "firm_policy.md";
pub const REFERENCE_FILE: &str = "sample_term_sheet.md";

enum Reply {
    Json(Value),
    Raw(String),
    Fail,
    Timeout,
}

/// Model client answering each section from a script
///
/// Sections without a scripted reply get `{}` (every field omitted).
pub struct ScriptedModelClient {
    replies: HashMap<String, Reply>,
    calls: Mutex<Vec<String>>,
}

fn section_title(section: &str) -> String {
    term_sheet_schema()
        .unwrap()
        .section(section)
        .unwrap_or_else(|| panic!("no section {}", section))
        .title
        .clone()
}

impl ScriptedModelClient {
    pub fn new() -> Self {
        Self {
            replies: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn reply(mut self, section: &str, body: Value) -> Self {
        self.replies.insert(section_title(section), Reply::Json(body));
        self
    }

    pub fn raw(mut self, section: &str, text: &str) -> Self {
        self.replies.insert(section_title(section), Reply::Raw(text.to_string()));
        self
    }

    pub fn fail(mut self, section: &str) -> Self {
        self.replies.insert(section_title(section), Reply::Fail);
        self
    }

    pub fn timeout(mut self, section: &str) -> Self {
        self.replies.insert(section_title(section), Reply::Timeout);
        self
    }

    /// Section titles in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    async fn call(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        let title = request
            .section_prompt
            .strip_prefix("Extract the ")
            .and_then(|rest| rest.split_once(" section fields"))
            .map(|(title, _)| title.to_string())
            .unwrap_or_default();
        self.calls.lock().unwrap().push(title.clone());

        let content = match self.replies.get(&title) {
            Some(Reply::Json(body)) => body.to_string(),
            Some(Reply::Raw(text)) => text.clone(),
            Some(Reply::Fail) => {
                return Err(ModelError::Status {
                    status: 500,
                    body: "upstream failure".to_string(),
                })
            }
            Some(Reply::Timeout) => return Err(ModelError::Timeout(Duration::from_secs(120))),
            None => "{}".to_string(),
        };

        Ok(ModelResponse {
            content,
            input_tokens: 1000,
            output_tokens: 200,
        })
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Model client whose first call waits until `release`
///
/// `entered` is notified when that call begins. Later calls return `{}`.
pub struct GatedModelClient {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
    first: AtomicBool,
}

impl GatedModelClient {
    pub fn new() -> Self {
        Self {
            entered: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
            first: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl ModelClient for GatedModelClient {
    async fn call(&self, _request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        if self.first.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        Ok(ModelResponse {
            content: "{}".to_string(),
            input_tokens: 10,
            output_tokens: 2,
        })
    }

    fn model_name(&self) -> &str {
        "gated"
    }
}

/// Fixed in-memory source documents
pub struct StaticSourceBuilder {
    documents: Option<Vec<SourceDocument>>,
}

impl StaticSourceBuilder {
    /// Deal model, firm policy and one reference term sheet
    pub fn standard() -> Self {
        Self {
            documents: Some(vec![
                SourceDocument {
                    key: "deal_model".to_string(),
                    file_name: DEAL_FILE.to_string(),
                    role: SourceRole::DealSpecific,
                    text: "=== Sheet: Model ===\nA1: Company | B1: Acme Robotics, Inc.\n\
                           A5: Investment | B5: 5000000\n"
                        .to_string(),
                },
                SourceDocument {
                    key: "firm_policy".to_string(),
                    file_name: POLICY_FILE.to_string(),
                    role: SourceRole::Policy,
                    text: "## 5.1 Exclusivity\n45 days.\n".to_string(),
                },
                SourceDocument {
                    key: "reference/sample_term_sheet".to_string(),
                    file_name: REFERENCE_FILE.to_string(),
                    role: SourceRole::Reference,
                    text: "Governing law: Delaware\n".to_string(),
                },
            ]),
        }
    }

    /// Builder that always fails
    pub fn unavailable() -> Self {
        Self { documents: None }
    }
}

#[async_trait]
impl SourceContextBuilder for StaticSourceBuilder {
    async fn build(&self) -> Result<SourceContext, SourceError> {
        match &self.documents {
            Some(documents) => Ok(SourceContext::new(documents.clone())),
            None => Err(SourceError::NoDocuments("memory".into())),
        }
    }
}

/// Markdown renderer that counts calls per mode and can fail or stall
/// final renders
#[derive(Default)]
pub struct CountingRenderer {
    pub previews: AtomicUsize,
    pub finals: AtomicUsize,
    pub fail_final: bool,
    /// Blocks the calling thread inside each final render
    pub final_delay: Option<Duration>,
    /// Set once a final render has begun
    pub final_started: AtomicBool,
}

impl CountingRenderer {
    pub fn failing() -> Self {
        Self {
            fail_final: true,
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            final_delay: Some(delay),
            ..Self::default()
        }
    }

    /// Wait until a final render has begun
    pub async fn wait_for_final(&self) {
        for _ in 0..500 {
            if self.final_started.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("final render never started");
    }

    pub fn final_count(&self) -> usize {
        self.finals.load(Ordering::SeqCst)
    }
}

impl Renderer for CountingRenderer {
    fn render(
        &self,
        schema: &DocumentSchema,
        fields: &FieldStore,
        mode: RenderMode,
    ) -> Result<String, RenderError> {
        match mode {
            RenderMode::Preview => self.previews.fetch_add(1, Ordering::SeqCst),
            RenderMode::Final => self.finals.fetch_add(1, Ordering::SeqCst),
        };
        if mode == RenderMode::Final {
            self.final_started.store(true, Ordering::SeqCst);
            if let Some(delay) = self.final_delay {
                std::thread::sleep(delay);
            }
        }
        if mode == RenderMode::Final && self.fail_final {
            return Err(RenderError::MissingField("template.broken".to_string()));
        }
        MarkdownRenderer.render(schema, fields, mode)
    }
}

pub fn manager_with(
    client: ScriptedModelClient,
    sources: StaticSourceBuilder,
    renderer: Arc<CountingRenderer>,
) -> Arc<SessionManager> {
    manager_from(Arc::new(client), sources, renderer, None)
}

/// Manager over any model client, optionally writing artifacts
pub fn manager_from(
    client: Arc<dyn ModelClient>,
    sources: StaticSourceBuilder,
    renderer: Arc<CountingRenderer>,
    output: Option<OutputWriter>,
) -> Arc<SessionManager> {
    let engine = ExtractionEngine::new(client, Arc::new(sources));
    let manager = SessionManager::new(
        Arc::new(SchemaRegistry::with_builtin().unwrap()),
        Arc::new(engine),
        renderer,
        EventBus::new(256),
    );
    Arc::new(match output {
        Some(writer) => manager.with_output(writer),
        None => manager,
    })
}

/// Model claim citing `file!location`
pub fn claim(value: Value, file: &str, location: &str, confidence: f64) -> Value {
    json!({
        "value": value,
        "source": {"file": file, "location": location},
        "confidence": confidence,
    })
}

/// Resolve every remaining field: confirm values, fill required blanks,
/// confirm optional blanks
pub async fn resolve_everything(manager: &SessionManager, id: Uuid) {
    let required: HashMap<&str, Value> = HashMap::from([
        ("company_name", json!("Acme Robotics, Inc.")),
        ("investment_amount", json!(5_000_000)),
        ("pre_money_valuation", json!(20_000_000)),
        ("security_type", json!("Series A Preferred Stock")),
        ("liquidation_preference_multiple", json!(1)),
    ]);

    let session = manager.get(id).await.unwrap();
    let pending: Vec<(String, String, bool)> = session
        .fields()
        .iter()
        .filter(|(_, _, f)| !f.is_resolved())
        .map(|(s, n, f)| (s.to_string(), n.to_string(), f.value.is_some()))
        .collect();

    for (section, field, has_value) in pending {
        match required.get(field.as_str()) {
            Some(value) if !has_value => {
                manager
                    .update_field(id, &section, &field, value.clone(), None)
                    .await
                    .unwrap();
            }
            _ => {
                manager.confirm_field(id, &section, &field, None).await.unwrap();
            }
        }
    }
}
