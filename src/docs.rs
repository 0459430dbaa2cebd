//! Documentation store: hierarchical pages keyed by path.
//!
//! Writes overwrite and create intermediate segments. Each page is addressed
//! independently, so there is no cross-document locking.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::capability::{names, Capability, CapabilityOutcome, CapabilitySpec};
use crate::error::{ConclaveError, Result};
use crate::types::WorkerRole;

/// A stored page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub title: String,
    pub content: String,
}

/// Page contents to write; a missing title keeps the existing one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageWrite {
    pub title: Option<String>,
    pub content: String,
}

impl PageWrite {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            title: None,
            content: content.into(),
        }
    }

    pub fn titled(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn write_page(&self, path: &str, page: PageWrite) -> Result<()>;

    /// `None` when the page does not exist
    async fn read_page(&self, path: &str) -> Result<Option<Page>>;

    /// Page paths under `prefix`, sorted
    async fn list_pages(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Validate and normalize a page path into `a/b/c` form
pub fn normalize_path(path: &str) -> Result<String> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Err(ConclaveError::Document("empty page path".into()));
    }
    for segment in &segments {
        if *segment == "." || *segment == ".." || segment.contains('\\') {
            return Err(ConclaveError::Document(format!("invalid path segment '{segment}'")));
        }
    }
    Ok(segments.join("/"))
}

fn default_title(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).replace(['-', '_'], " ")
}

/// Turn free text into a path segment
pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
        if slug.len() >= 48 {
            break;
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    pages: RwLock<BTreeMap<String, Page>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.read().is_empty()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn write_page(&self, path: &str, page: PageWrite) -> Result<()> {
        let path = normalize_path(path)?;
        let mut pages = self.pages.write();
        let title = page
            .title
            .or_else(|| pages.get(&path).map(|p| p.title.clone()))
            .unwrap_or_else(|| default_title(&path));
        pages.insert(
            path,
            Page {
                title,
                content: page.content,
            },
        );
        Ok(())
    }

    async fn read_page(&self, path: &str) -> Result<Option<Page>> {
        let path = normalize_path(path)?;
        Ok(self.pages.read().get(&path).cloned())
    }

    async fn list_pages(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.trim_matches('/');
        Ok(self
            .pages
            .read()
            .keys()
            .filter(|k| prefix.is_empty() || *k == prefix || k.starts_with(&format!("{prefix}/")))
            .cloned()
            .collect())
    }
}

/// Store backed by JSON files under a root directory
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_for(&self, normalized: &str) -> PathBuf {
        let mut file = self.root.clone();
        for segment in normalized.split('/') {
            file.push(segment);
        }
        file.set_extension("json");
        file
    }

    async fn collect(&self, dir: PathBuf, out: &mut Vec<String>) -> Result<()> {
        let mut pending = vec![dir];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if path.extension().is_some_and(|ext| ext == "json") {
                    if let Ok(rel) = path.with_extension("").strip_prefix(&self.root) {
                        let key: Vec<String> = rel
                            .components()
                            .map(|c| c.as_os_str().to_string_lossy().into_owned())
                            .collect();
                        out.push(key.join("/"));
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn write_page(&self, path: &str, page: PageWrite) -> Result<()> {
        let normalized = normalize_path(path)?;
        let file = self.file_for(&normalized);
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let title = match page.title {
            Some(title) => title,
            None => self
                .read_page(&normalized)
                .await?
                .map(|p| p.title)
                .unwrap_or_else(|| default_title(&normalized)),
        };
        let body = serde_json::to_vec_pretty(&Page {
            title,
            content: page.content,
        })?;
        tokio::fs::write(&file, body).await?;
        debug!(path = %normalized, "Wrote page");
        Ok(())
    }

    async fn read_page(&self, path: &str) -> Result<Option<Page>> {
        let normalized = normalize_path(path)?;
        match tokio::fs::read(self.file_for(&normalized)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_pages(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.trim_matches('/');
        let mut out = Vec::new();
        self.collect(self.root.clone(), &mut out).await?;
        out.retain(|k| prefix.is_empty() || k == prefix || k.starts_with(&format!("{prefix}/")));
        out.sort();
        Ok(out)
    }
}

/// `write_doc` capability over a store
pub struct WriteDocCapability {
    spec: CapabilitySpec,
    store: Arc<dyn DocumentStore>,
}

impl WriteDocCapability {
    pub fn new(store: Arc<dyn DocumentStore>, roles: &[WorkerRole]) -> Self {
        let mut spec = CapabilitySpec::new(names::WRITE_DOC, "Write or overwrite a documentation page")
            .with_parameters(serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "title": { "type": "string" },
                    "content": { "type": "string" }
                },
                "required": ["path", "content"]
            }));
        for role in roles {
            spec = spec.allow(*role);
        }
        Self { spec, store }
    }
}

#[async_trait]
impl Capability for WriteDocCapability {
    fn spec(&self) -> &CapabilitySpec {
        &self.spec
    }

    async fn execute(&self, params: Value) -> anyhow::Result<CapabilityOutcome> {
        let Some(path) = params["path"].as_str() else {
            return Ok(CapabilityOutcome::err("missing 'path'"));
        };
        let Some(content) = params["content"].as_str() else {
            return Ok(CapabilityOutcome::err("missing 'content'"));
        };
        let mut page = PageWrite::new(content);
        if let Some(title) = params["title"].as_str() {
            page = page.titled(title);
        }
        self.store.write_page(path, page).await?;
        Ok(CapabilityOutcome::ok(format!("wrote page {path}")))
    }
}

/// `read_doc` capability over a store
pub struct ReadDocCapability {
    spec: CapabilitySpec,
    store: Arc<dyn DocumentStore>,
}

impl ReadDocCapability {
    pub fn new(store: Arc<dyn DocumentStore>, roles: &[WorkerRole]) -> Self {
        let mut spec = CapabilitySpec::new(names::READ_DOC, "Read a documentation page")
            .with_parameters(serde_json::json!({
                "type": "object",
                "properties": { "path": { "type": "string" } },
                "required": ["path"]
            }));
        for role in roles {
            spec = spec.allow(*role);
        }
        Self { spec, store }
    }
}

#[async_trait]
impl Capability for ReadDocCapability {
    fn spec(&self) -> &CapabilitySpec {
        &self.spec
    }

    async fn execute(&self, params: Value) -> anyhow::Result<CapabilityOutcome> {
        let Some(path) = params["path"].as_str() else {
            return Ok(CapabilityOutcome::err("missing 'path'"));
        };
        Ok(match self.store.read_page(path).await? {
            Some(page) => CapabilityOutcome::ok(format!("# {}\n\n{}", page.title, page.content)),
            None => CapabilityOutcome::err(format!("page not found: {path}")),
        })
    }
}
