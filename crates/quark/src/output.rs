use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use quark_schema::ArityInfo;
use quark_session::MethodStub;
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MethodRow {
    pub path: String,
    pub arities: Vec<usize>,
    pub async_arities: Vec<usize>,
    pub encrypted_arities: Vec<usize>,
}

impl MethodRow {
    pub fn from_stub(stub: &MethodStub) -> Self {
        let signature = stub.signature();
        let filter = |pick: fn(&ArityInfo) -> bool| -> Vec<usize> {
            signature
                .arities
                .iter()
                .filter(|(_, info)| pick(*info))
                .map(|(arity, _)| *arity)
                .collect()
        };
        Self {
            path: stub.path(),
            arities: stub.arities(),
            async_arities: filter(|info| info.is_async),
            encrypted_arities: filter(|info| info.encrypt),
        }
    }
}

#[derive(Serialize)]
struct DescribeOutput<'a> {
    session_id: &'a str,
    security: String,
    methods: &'a [MethodRow],
}

pub fn print_methods(session_id: &str, security: &str, rows: &[MethodRow], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = DescribeOutput {
                session_id,
                security: security.to_string(),
                methods: rows,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["METHOD", "ARITY", "ASYNC", "ENCRYPT"]);
            for row in rows {
                table.add_row(vec![
                    row.path.clone(),
                    join(&row.arities),
                    join(&row.async_arities),
                    join(&row.encrypted_arities),
                ]);
            }
            println!("{table}");
            println!("session {session_id}, security {security}");
        }
        OutputFormat::Pretty => {
            println!("Session:  {session_id}");
            println!("Security: {security}");
            for row in rows {
                println!("  {}({})", row.path, join(&row.arities));
            }
        }
    }
}

pub fn print_result(path: &str, result: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{result}"),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["METHOD", "RESULT"])
                .add_row(vec![path.to_string(), preview(result)]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{}",
                serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string())
            );
        }
    }
}

/// `result.data` when the server wrapped its payload, else the whole result.
fn preview(result: &Value) -> String {
    match result.get("data") {
        Some(Value::String(text)) => text.clone(),
        Some(data) => data.to_string(),
        None => result.to_string(),
    }
}

fn join(values: &[usize]) -> String {
    if values.is_empty() {
        return "-".to_string();
    }
    values
        .iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
