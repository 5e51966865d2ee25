//! Storage backend abstraction.
//!
//! The pipeline talks to an external multi-model graph/document store
//! through four primitives: [`Store::upsert`] (replace-or-create),
//! [`Store::merge`] (partial update), [`Store::relate`] (idempotent directed
//! edge), and [`Store::query`] (ad-hoc declarative rows). All identifiers
//! crossing this boundary are the content-addressed strings from
//! [`crate::ident`], which is what makes repeated pipeline runs convergent.
//!
//! Two implementations:
//! - **[`HttpStore`]** — targets a SurrealDB-compatible `/sql` endpoint with
//!   basic auth, namespace/database preface, and statement batching.
//! - **[`MemoryStore`]** — in-process tables and edges for tests and fake
//!   wiring; `query` returns no rows (no query engine).

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

/// Statement batching caps for one `/sql` POST. Many servers limit request
/// bodies around 1 MB; stay well below.
const MAX_STATEMENTS_PER_CALL: usize = 500;
const MAX_BYTES_PER_CALL: usize = 512 * 1024;

/// The four storage primitives the pipeline needs.
#[async_trait]
pub trait Store: Send + Sync {
    /// Replace-or-create the row `table:id` with exactly `fields`.
    async fn upsert(&self, table: &str, id: &str, fields: Value) -> Result<()>;

    /// Partially update `table:id`, preserving fields not mentioned.
    async fn merge(&self, table: &str, id: &str, fields: Value) -> Result<()>;

    /// Create (idempotently) a directed edge `from -[edge]-> to`.
    async fn relate(
        &self,
        from: (&str, &str),
        edge: &str,
        to: (&str, &str),
        data: Option<Value>,
    ) -> Result<()>;

    /// Run an ad-hoc statement with named parameters, returning result rows.
    async fn query(&self, statement: &str, params: &[(&str, Value)]) -> Result<Vec<Value>>;
}

// ============ HTTP store ============

/// Client for a SurrealQL `/sql` endpoint.
#[derive(Debug)]
pub struct HttpStore {
    base_url: String,
    user: String,
    pass: String,
    ns: String,
    db: String,
    http: reqwest::Client,
}

impl HttpStore {
    /// Build a client. `url` must carry an http(s) scheme and host.
    pub fn new(
        url: &str,
        user: &str,
        pass: &str,
        ns: &str,
        db: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            bail!("store url is required");
        }
        let parsed = reqwest::Url::parse(url).with_context(|| format!("invalid store url {url}"))?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => bail!("unsupported store scheme {other:?}"),
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build store http client")?;
        Ok(Self {
            base_url: url.trim_end_matches('/').to_string(),
            user: user.to_string(),
            pass: pass.to_string(),
            ns: ns.to_string(),
            db: db.to_string(),
            http,
        })
    }

    /// Run statements in order, batching by count and byte size.
    async fn exec(&self, statements: &[String]) -> Result<Vec<SqlResult>> {
        let mut results = Vec::new();
        let base = "USE NS `` DB ``;\n".len() + self.ns.len() + self.db.len();

        let mut group: Vec<&str> = Vec::new();
        let mut size = base;
        for stmt in statements {
            let stmt = stmt.trim();
            if stmt.is_empty() {
                continue;
            }
            let add = stmt.len() + 2;
            if !group.is_empty() && size + add > MAX_BYTES_PER_CALL {
                results.extend(self.exec_chunk(&group).await?);
                group.clear();
                size = base;
            }
            group.push(stmt);
            size += add;
            if group.len() >= MAX_STATEMENTS_PER_CALL {
                results.extend(self.exec_chunk(&group).await?);
                group.clear();
                size = base;
            }
        }
        if !group.is_empty() {
            results.extend(self.exec_chunk(&group).await?);
        }
        Ok(results)
    }

    async fn exec_chunk(&self, stmts: &[&str]) -> Result<Vec<SqlResult>> {
        let mut body = format!(
            "USE NS {} DB {};\n",
            quote_ident(&self.ns),
            quote_ident(&self.db)
        );
        for stmt in stmts {
            body.push_str(stmt);
            if !stmt.ends_with(';') {
                body.push(';');
            }
            body.push('\n');
        }
        debug!(statements = stmts.len(), bytes = body.len(), "store sql batch");

        let mut request = self
            .http
            .post(format!("{}/sql", self.base_url))
            .header("Content-Type", "text/plain; charset=utf-8")
            .header("Accept", "application/json")
            .body(body);
        if !self.user.is_empty() || !self.pass.is_empty() {
            request = request.basic_auth(&self.user, Some(&self.pass));
        }

        let response = request.send().await.context("store request failed")?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            bail!(
                "store http {}: {} (first statement: {})",
                status.as_u16(),
                detail.trim(),
                truncate_statement(stmts.first().unwrap_or(&""))
            );
        }

        let decoded: Vec<SqlResult> = response
            .json()
            .await
            .context("decode store response")?;
        for res in &decoded {
            if !res.status.eq_ignore_ascii_case("OK") {
                bail!(
                    "store error: {} {} (first statement: {})",
                    res.code.as_deref().unwrap_or(""),
                    res.detail.as_deref().unwrap_or(""),
                    truncate_statement(stmts.first().unwrap_or(&""))
                );
            }
        }
        Ok(decoded)
    }
}

#[async_trait]
impl Store for HttpStore {
    async fn upsert(&self, table: &str, id: &str, fields: Value) -> Result<()> {
        let stmt = format!(
            "UPSERT {} CONTENT {}",
            thing(table, id),
            render_value(&fields)
        );
        self.exec(&[stmt]).await?;
        Ok(())
    }

    async fn merge(&self, table: &str, id: &str, fields: Value) -> Result<()> {
        let stmt = format!(
            "UPSERT {} MERGE {}",
            thing(table, id),
            render_value(&fields)
        );
        self.exec(&[stmt]).await?;
        Ok(())
    }

    async fn relate(
        &self,
        from: (&str, &str),
        edge: &str,
        to: (&str, &str),
        data: Option<Value>,
    ) -> Result<()> {
        let mut stmt = format!(
            "RELATE ({})->{}->({})",
            thing(from.0, from.1),
            edge,
            thing(to.0, to.1)
        );
        if let Some(data) = data {
            stmt.push_str(" CONTENT ");
            stmt.push_str(&render_value(&data));
        }
        self.exec(&[stmt]).await?;
        Ok(())
    }

    async fn query(&self, statement: &str, params: &[(&str, Value)]) -> Result<Vec<Value>> {
        let mut stmts: Vec<String> = params
            .iter()
            .map(|(name, value)| format!("LET ${} = {}", name, render_value(value)))
            .collect();
        stmts.push(statement.to_string());

        let results = self.exec(&stmts).await?;
        let last = match results.last() {
            Some(last) => last,
            None => return Ok(Vec::new()),
        };
        Ok(match &last.result {
            Some(Value::Array(rows)) => rows.clone(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![other.clone()],
        })
    }
}

#[derive(Debug, serde::Deserialize)]
struct SqlResult {
    status: String,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// `type::thing('table', 'id')` with escaped literals.
fn thing(table: &str, id: &str) -> String {
    format!(
        "type::thing({}, {})",
        string_literal(table.trim()),
        string_literal(id.trim())
    )
}

/// Single-quoted SurrealQL string literal.
fn string_literal(val: &str) -> String {
    let escaped = val.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}

/// Render a JSON value as a SurrealQL literal. JSON object/array/scalar
/// syntax is accepted verbatim by the `/sql` endpoint; timestamps travel as
/// RFC3339 strings.
fn render_value(value: &Value) -> String {
    value.to_string()
}

fn quote_ident(id: &str) -> String {
    if id.starts_with('`') && id.ends_with('`') && id.len() >= 2 {
        return id.to_string();
    }
    format!("`{}`", id.replace('`', "``"))
}

fn truncate_statement(stmt: &str) -> String {
    let stmt = stmt.trim();
    if stmt.len() <= 160 {
        stmt.to_string()
    } else {
        let cut = stmt
            .char_indices()
            .take_while(|(i, _)| *i <= 157)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!("{}...", &stmt[..cut])
    }
}

// ============ In-memory store ============

/// One directed edge held by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeRow {
    pub from: (String, String),
    pub edge: String,
    pub to: (String, String),
    pub data: Option<Value>,
}

/// In-memory store for tests and substitute wiring.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, BTreeMap<String, Value>>>,
    edges: RwLock<Vec<EdgeRow>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Row for `table:id`, if present.
    pub fn get(&self, table: &str, id: &str) -> Option<Value> {
        let tables = self.tables.read().unwrap();
        tables.get(table).and_then(|rows| rows.get(id)).cloned()
    }

    /// All rows of a table as `(id, fields)` pairs, ordered by id.
    pub fn rows(&self, table: &str) -> Vec<(String, Value)> {
        let tables = self.tables.read().unwrap();
        tables
            .get(table)
            .map(|rows| rows.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    /// All edges recorded so far.
    pub fn edges(&self) -> Vec<EdgeRow> {
        self.edges.read().unwrap().clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert(&self, table: &str, id: &str, fields: Value) -> Result<()> {
        let mut tables = self.tables.write().unwrap();
        tables
            .entry(table.to_string())
            .or_default()
            .insert(id.to_string(), fields);
        Ok(())
    }

    async fn merge(&self, table: &str, id: &str, fields: Value) -> Result<()> {
        let mut tables = self.tables.write().unwrap();
        let rows = tables.entry(table.to_string()).or_default();
        let entry = rows.entry(id.to_string()).or_insert(Value::Null);
        match (entry.as_object_mut(), fields.as_object()) {
            (Some(existing), Some(incoming)) => {
                for (k, v) in incoming {
                    existing.insert(k.clone(), v.clone());
                }
            }
            _ => *entry = fields,
        }
        Ok(())
    }

    async fn relate(
        &self,
        from: (&str, &str),
        edge: &str,
        to: (&str, &str),
        data: Option<Value>,
    ) -> Result<()> {
        let row = EdgeRow {
            from: (from.0.to_string(), from.1.to_string()),
            edge: edge.to_string(),
            to: (to.0.to_string(), to.1.to_string()),
            data,
        };
        let mut edges = self.edges.write().unwrap();
        if let Some(existing) = edges
            .iter_mut()
            .find(|e| e.from == row.from && e.edge == row.edge && e.to == row.to)
        {
            existing.data = row.data;
        } else {
            edges.push(row);
        }
        Ok(())
    }

    async fn query(&self, _statement: &str, _params: &[(&str, Value)]) -> Result<Vec<Value>> {
        // No query engine; callers needing reads in tests use the accessors.
        Ok(Vec::new())
    }
}
