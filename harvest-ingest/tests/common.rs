#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, OnceLock};

use anyhow::{anyhow, bail, Result};
use harvest_common::observability::{LogConfig, LogFormat};
use harvest_ingest::{Category, Cursor, Page, Source, SourceItem, SubjectHandle};
use serde_json::{json, Map};

static INIT_PATH: OnceLock<std::path::PathBuf> = OnceLock::new();

pub fn init_test_tracing() {
    let _ = INIT_PATH.get_or_init(|| {
        let config = LogConfig {
            app_name: "harvest-tests",
            log_dir: Some(std::env::temp_dir().join("harvest-tests")),
            emit_stderr: true,
            format: if std::env::var("HARVEST_LOG_FORMAT")
                .map(|raw| raw.trim().eq_ignore_ascii_case("json"))
                .unwrap_or(false)
            {
                LogFormat::Json
            } else {
                LogFormat::Text
            },
            default_filter: "debug".to_string(),
        };

        harvest_common::observability::init_logging(config).unwrap_or_default()
    });
}

/// One recorded `fetch_page` call.
#[derive(Clone, Debug, PartialEq)]
pub struct Call {
    pub subject: String,
    pub category: String,
    pub page_size: usize,
    pub cursor: Option<String>,
}

pub enum Script {
    /// Full pages forever; the cursor is the running offset.
    Endless,
    /// These pages in order, then empty pages.
    Pages(Vec<Page>),
    Fail(String),
    /// These pages in order, then this error.
    PagesThenFail(Vec<Page>, String),
}

/// Source double driven by per-(subject, category) scripts.
#[derive(Default)]
pub struct ScriptedSource {
    scripts: HashMap<(String, String), Script>,
    unresolvable: HashSet<String>,
    /// Return this many items per page regardless of the requested size.
    oversize: Option<usize>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, subject: &str, category: &str, script: Script) -> Self {
        self.scripts
            .insert((subject.to_string(), category.to_string()), script);
        self
    }

    pub fn unresolvable(mut self, subject: &str) -> Self {
        self.unresolvable.insert(subject.to_string());
        self
    }

    pub fn oversize(mut self, n: usize) -> Self {
        self.oversize = Some(n);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, subject: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.subject == subject)
            .collect()
    }
}

pub fn item(id: &str, text: &str) -> SourceItem {
    let mut fields = Map::new();
    fields.insert("text".into(), json!(text));
    SourceItem {
        id: id.to_string(),
        fields,
    }
}

pub fn page(ids: &[&str], next: Option<&str>) -> Page {
    Page {
        items: ids.iter().map(|id| item(id, "scripted")).collect(),
        next_cursor: next.map(|c| Cursor(c.to_string())),
    }
}

pub fn categories(labels: &[&str]) -> Vec<Category> {
    labels.iter().map(|l| Category::from(*l)).collect()
}

#[async_trait::async_trait]
impl Source for ScriptedSource {
    async fn resolve_subject(&self, name: &str) -> Result<SubjectHandle> {
        if self.unresolvable.contains(name) {
            bail!("user {name} does not exist");
        }
        Ok(SubjectHandle {
            name: name.to_string(),
            id: format!("id-{name}"),
        })
    }

    async fn fetch_page(
        &self,
        subject: &SubjectHandle,
        category: &Category,
        page_size: usize,
        cursor: Option<&Cursor>,
    ) -> Result<Page> {
        let call = Call {
            subject: subject.name.clone(),
            category: category.0.clone(),
            page_size,
            cursor: cursor.map(|c| c.0.clone()),
        };
        let prior = {
            let mut calls = self.calls.lock().unwrap();
            let prior = calls
                .iter()
                .filter(|c| c.subject == call.subject && c.category == call.category)
                .count();
            calls.push(call);
            prior
        };

        let key = (subject.name.clone(), category.0.clone());
        match self.scripts.get(&key).unwrap_or(&Script::Endless) {
            Script::Endless => {
                let offset: usize = match cursor {
                    Some(c) => c.0.parse().map_err(|_| anyhow!("bad cursor {}", c.0))?,
                    None => 0,
                };
                let n = self.oversize.unwrap_or(page_size);
                let items = (offset..offset + n)
                    .map(|i| item(&format!("{}:{}:{i}", subject.name, category), "endless"))
                    .collect();
                Ok(Page {
                    items,
                    next_cursor: Some(Cursor((offset + n).to_string())),
                })
            }
            Script::Pages(pages) => Ok(pages.get(prior).cloned().unwrap_or_default()),
            Script::Fail(msg) => Err(anyhow!("{msg}")),
            Script::PagesThenFail(pages, msg) => match pages.get(prior) {
                Some(page) => Ok(page.clone()),
                None => Err(anyhow!("{msg}")),
            },
        }
    }
}
