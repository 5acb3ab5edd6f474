//! One-shot HTTP helpers behind the data explorer and plotting views.
//!
//! These never touch the live session; a failure here is reported in the
//! panel that asked for it and nothing else.

use crate::render;
use kdbzph_protocol::{
    ApiReply, BatchAction, BatchRequest, ColumnData, PlotTrace, ResponseEnvelope, ServerError,
    TableInfo, TableMeta,
};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_ROW_LIMIT: usize = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("request failed: status={status} body={body}")]
    BadStatus { status: StatusCode, body: String },
    #[error("{0}")]
    Server(String),
    #[error("bad url: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    #[default]
    Line,
    Bar,
    Scatter,
}

impl fmt::Display for ChartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChartType::Line => "line",
            ChartType::Bar => "bar",
            ChartType::Scatter => "scatter",
        })
    }
}

impl FromStr for ChartType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "line" => Ok(ChartType::Line),
            "bar" => Ok(ChartType::Bar),
            "scatter" => Ok(ChartType::Scatter),
            other => Err(format!("unknown chart type {other:?}")),
        }
    }
}

/// A plot trace tagged with how it should be drawn.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Trace {
    pub x: Vec<Value>,
    pub y: Vec<Value>,
    pub name: String,
    #[serde(rename = "type")]
    pub chart_type: ChartType,
}

#[derive(Clone)]
pub struct BatchClient {
    http: reqwest::Client,
    base: Url,
}

impl BatchClient {
    pub fn new(base: Url) -> Result<Self, BatchError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { http, base })
    }

    pub async fn list_tables(&self) -> Result<Vec<TableInfo>, BatchError> {
        let url = self.base.join("api/tables")?;
        self.get_json::<ApiReply<Vec<TableInfo>>>(url)
            .await?
            .into_result()
            .map_err(BatchError::Server)
    }

    pub async fn table_meta(&self, table: &str) -> Result<TableMeta, BatchError> {
        let mut url = self.base.join("api/meta")?;
        url.query_pairs_mut().append_pair("table", table);
        self.get_json::<ApiReply<TableMeta>>(url)
            .await?
            .into_result()
            .map_err(BatchError::Server)
    }

    pub async fn table_data(&self, table: &str, rows: usize) -> Result<ColumnData, BatchError> {
        let mut url = self.base.join("api/data")?;
        url.query_pairs_mut()
            .append_pair("table", table)
            .append_pair("n", &rows.to_string());
        self.get_json::<ApiReply<ColumnData>>(url)
            .await?
            .into_result()
            .map_err(BatchError::Server)
    }

    /// Non-session evaluation. Blank input is answered locally.
    ///
    /// A bare `{error}` body, whatever the status, renders like a failed
    /// envelope.
    pub async fn eval(&self, expr: &str) -> Result<String, BatchError> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Ok(render::EMPTY_EXPRESSION.to_string());
        }
        let env = match self
            .post_json::<ApiReply<ResponseEnvelope>>(BatchAction::Eval, expr)
            .await
        {
            Ok(ApiReply::Ok(env)) => env,
            Ok(ApiReply::Error(ServerError { error })) | Err(BatchError::Server(error)) => {
                ResponseEnvelope::failure(None, Some(error))
            }
            Err(e) => return Err(e),
        };
        Ok(render::render_envelope(&env))
    }

    pub async fn plot(&self, expr: &str, chart_type: ChartType) -> Result<Vec<Trace>, BatchError> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Ok(Vec::new());
        }
        let traces = self
            .post_json::<ApiReply<Vec<PlotTrace>>>(BatchAction::Plot, expr)
            .await?
            .into_result()
            .map_err(BatchError::Server)?;
        Ok(tag_traces(traces, chart_type))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, BatchError> {
        tracing::debug!(%url, "batch get");
        let res = self.http.get(url).send().await?;
        decode(res).await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        action: BatchAction,
        expr: &str,
    ) -> Result<T, BatchError> {
        tracing::debug!(?action, "batch post");
        let body = BatchRequest {
            action,
            expr: expr.to_string(),
        };
        let res = self.http.post(self.base.clone()).json(&body).send().await?;
        decode(res).await
    }
}

async fn decode<T: DeserializeOwned>(res: reqwest::Response) -> Result<T, BatchError> {
    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        // Error bodies are usually `{error}`; prefer the server's message.
        if let Ok(ServerError { error }) = serde_json::from_str(&body) {
            return Err(BatchError::Server(error));
        }
        return Err(BatchError::BadStatus { status, body });
    }
    Ok(res.json::<T>().await?)
}

pub fn tag_traces(traces: Vec<PlotTrace>, chart_type: ChartType) -> Vec<Trace> {
    traces
        .into_iter()
        .map(|t| Trace {
            x: t.x,
            y: t.y,
            name: t.name,
            chart_type,
        })
        .collect()
}

pub fn render_tables(tables: &[TableInfo]) -> String {
    if tables.is_empty() {
        return "(no tables)".to_string();
    }
    tables
        .iter()
        .map(|t| format!("{} ({} rows, {} cols)", t.name, t.rows, t.cols))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_schema(table: &str, meta: &TableMeta) -> String {
    let rows: Vec<Vec<String>> = meta
        .c
        .iter()
        .enumerate()
        .map(|(i, c)| vec![c.clone(), meta.t.get(i).cloned().unwrap_or_default()])
        .collect();
    format!(
        "Schema: {table}\n{}",
        render_grid(&["Column".to_string(), "Type".to_string()], &rows)
    )
}

/// Column-oriented data as a text grid. Row count comes from the first column.
pub fn render_data(table: &str, data: &ColumnData) -> String {
    let columns: Vec<String> = data.keys().cloned().collect();
    let Some(first) = columns.first() else {
        return "(empty table)".to_string();
    };
    let row_count = data
        .get(first)
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0);

    let rows: Vec<Vec<String>> = (0..row_count)
        .map(|r| {
            columns
                .iter()
                .map(|c| {
                    let cell = data.get(c).and_then(|col| col.get(r));
                    match cell {
                        None | Some(Value::Null) => "null".to_string(),
                        Some(Value::String(s)) => s.clone(),
                        Some(v) => v.to_string(),
                    }
                })
                .collect()
        })
        .collect();

    format!(
        "Data: {table} (first {row_count} rows)\n{}",
        render_grid(&columns, &rows)
    )
}

pub fn render_traces(traces: &[Trace]) -> String {
    if traces.is_empty() {
        return "(no series)".to_string();
    }
    traces
        .iter()
        .map(|t| {
            let name = if t.name.is_empty() { "(unnamed)" } else { &t.name };
            let (lo, hi) = min_max(&t.y);
            format!(
                "{name} [{}]: {} points, x {}..{}, y {lo}..{hi}",
                t.chart_type,
                t.y.len(),
                endpoint(t.x.first()),
                endpoint(t.x.last()),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn endpoint(v: Option<&Value>) -> String {
    match v {
        None => "-".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
    }
}

fn min_max(values: &[Value]) -> (String, String) {
    let nums: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
    if nums.is_empty() {
        return ("-".to_string(), "-".to_string());
    }
    let lo = nums.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = nums.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    (lo.to_string(), hi.to_string())
}

fn render_grid(header: &[String], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }

    let line = |cells: &[String]| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{c:<width$}", width = *w))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut out = vec![line(header)];
    out.push(
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    out.extend(rows.iter().map(|r| line(r)));
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tables_list() {
        let tables = vec![
            TableInfo {
                name: "trade".into(),
                rows: 1000,
                cols: 4,
            },
            TableInfo {
                name: "quote".into(),
                rows: 0,
                cols: 5,
            },
        ];
        assert_eq!(
            render_tables(&tables),
            "trade (1000 rows, 4 cols)\nquote (0 rows, 5 cols)"
        );
        assert_eq!(render_tables(&[]), "(no tables)");
    }

    #[test]
    fn schema_pads_missing_types() {
        let meta = TableMeta {
            c: vec!["sym".into(), "price".into()],
            t: vec!["s".into()],
        };
        assert_eq!(
            render_schema("trade", &meta),
            "Schema: trade\nColumn | Type\n-------+-----\nsym    | s\nprice  |"
        );
    }

    #[test]
    fn data_grid_keeps_server_column_order_and_nulls() {
        let data: ColumnData = serde_json::from_value(json!({
            "time": ["09:30", "09:31"],
            "sym": ["AAPL", null],
            "px": [1.5, 2],
        }))
        .unwrap();
        let out = render_data("trade", &data);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "Data: trade (first 2 rows)");
        assert_eq!(lines[1], "time  | sym  | px");
        assert_eq!(lines[3], "09:30 | AAPL | 1.5");
        assert_eq!(lines[4], "09:31 | null | 2");
    }

    #[test]
    fn empty_data_map() {
        assert_eq!(render_data("t", &ColumnData::new()), "(empty table)");
    }

    #[test]
    fn traces_are_tagged_and_summarised() {
        let traces = tag_traces(
            vec![PlotTrace {
                x: vec![json!(1), json!(2), json!(3)],
                y: vec![json!(10.0), json!(-2.5), json!(4)],
                name: "px".into(),
            }],
            "bar".parse().unwrap(),
        );
        assert_eq!(traces[0].chart_type, ChartType::Bar);
        assert_eq!(serde_json::to_value(&traces[0]).unwrap()["type"], "bar");
        assert_eq!(render_traces(&traces), "px [bar]: 3 points, x 1..3, y -2.5..10");
        assert!("pie".parse::<ChartType>().is_err());
    }

    /// One-shot HTTP server: answers a single request with `status` and
    /// `body`, and hands back the raw request text.
    async fn stub(
        status: &'static str,
        body: &'static str,
    ) -> (BatchClient, tokio::task::JoinHandle<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let served = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            let head_end = loop {
                let n = sock.read(&mut chunk).await.unwrap();
                assert!(n > 0, "client hung up before sending headers");
                buf.extend_from_slice(&chunk[..n]);
                if let Some(i) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break i + 4;
                }
            };
            let head = String::from_utf8_lossy(&buf[..head_end]).to_ascii_lowercase();
            let content_length = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            while buf.len() < head_end + content_length {
                let n = sock.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let reply = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            sock.write_all(reply.as_bytes()).await.unwrap();
            sock.shutdown().await.unwrap();
            String::from_utf8_lossy(&buf).into_owned()
        });
        let base = Url::parse(&format!("http://{addr}/")).unwrap();
        (BatchClient::new(base).unwrap(), served)
    }

    #[tokio::test]
    async fn meta_error_body_is_a_server_error() {
        let (client, served) = stub("200 OK", r#"{"error":"no such table"}"#).await;
        let err = client.table_meta("nope").await.unwrap_err();
        assert!(matches!(&err, BatchError::Server(m) if m == "no such table"), "{err:?}");
        let request = served.await.unwrap();
        assert!(request.starts_with("GET /api/meta?table=nope "), "{request}");
    }

    #[tokio::test]
    async fn failing_status_prefers_the_error_body() {
        let (client, _served) = stub("500 Internal Server Error", r#"{"error":"boom"}"#).await;
        let err = client.list_tables().await.unwrap_err();
        assert!(matches!(&err, BatchError::Server(m) if m == "boom"), "{err:?}");
    }

    #[tokio::test]
    async fn failing_status_without_error_body_keeps_status_and_text() {
        let (client, _served) = stub("502 Bad Gateway", "oops").await;
        match client.list_tables().await.unwrap_err() {
            BatchError::BadStatus { status, body } => {
                assert_eq!(status, StatusCode::BAD_GATEWAY);
                assert_eq!(body, "oops");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn data_request_carries_row_limit() {
        let (client, served) = stub("200 OK", r#"{"sym":["a","b"]}"#).await;
        let data = client.table_data("trade", 5).await.unwrap();
        assert_eq!(data["sym"], json!(["a", "b"]));
        let request = served.await.unwrap();
        assert!(request.starts_with("GET /api/data?table=trade&n=5 "), "{request}");
    }

    #[tokio::test]
    async fn plot_traces_come_back_tagged() {
        let (client, served) = stub(
            "200 OK",
            r#"[{"x":[1,2],"y":[3,4],"name":"px"},{"x":[],"y":[],"name":""}]"#,
        )
        .await;
        let traces = client.plot("select from t", ChartType::Scatter).await.unwrap();
        assert_eq!(traces.len(), 2);
        assert!(traces.iter().all(|t| t.chart_type == ChartType::Scatter));
        assert_eq!(traces[0].name, "px");

        let request = served.await.unwrap();
        assert!(request.starts_with("POST / "), "{request}");
        assert!(request.contains(r#""action":"plot""#), "{request}");
        assert!(request.contains(r#""expr":"select from t""#), "{request}");
    }

    #[tokio::test]
    async fn eval_error_body_renders_as_error_text() {
        let (client, _served) = stub("200 OK", r#"{"error":"type"}"#).await;
        assert_eq!(client.eval("1+`a").await.unwrap(), "ERROR: type");
    }

    #[tokio::test]
    async fn eval_error_body_on_failing_status_renders_too() {
        let (client, _served) = stub("400 Bad Request", r#"{"error":"parse"}"#).await;
        assert_eq!(client.eval("(").await.unwrap(), "ERROR: parse");
    }

    #[tokio::test]
    async fn eval_success_renders_the_result() {
        let (client, served) = stub("200 OK", r#"{"ok":true,"result":"hello"}"#).await;
        assert_eq!(client.eval("  \"hello\"  ").await.unwrap(), "hello");
        let request = served.await.unwrap();
        assert!(request.contains(r#""action":"eval""#), "{request}");
    }
}
