//! CLI smoke entry point.
//!
//! # Responsibility
//! - Run a short CRUD scenario against an in-memory store.
//! - Keep output deterministic apart from generated ids.
//!
//! Usage: `relstore_cli [absolute-log-dir]`

use log::{error, info};
use relstore_core::{
    default_log_level, init_logging, FilterQuery, Identifiable, OperationContext,
    PagingParams, PersistenceBuilder, PersistenceConfig, PersistenceResult, SchemaManager,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use std::process::ExitCode;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct Entry {
    id: String,
    key: String,
    content: String,
}

impl Identifiable for Entry {
    fn id(&self) -> Option<&str> {
        Some(&self.id)
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

fn entry_schema(schema: &mut SchemaManager) {
    schema.ensure_schema(format!(
        "CREATE TABLE {} (id TEXT PRIMARY KEY, key TEXT NOT NULL, content TEXT)",
        schema.qualified_table()
    ));
}

fn run_scenario() -> PersistenceResult<()> {
    let ctx = OperationContext::with_trace_id("cli");
    let persistence = PersistenceBuilder::<Entry>::flat(PersistenceConfig::new("entries"))
        .schema(entry_schema)
        .build()?;
    persistence.open(&ctx)?;

    for (key, content) in [("A", "x"), ("B", "y")] {
        let entry = persistence.create(
            &ctx,
            Entry {
                key: key.to_string(),
                content: content.to_string(),
                ..Entry::default()
            },
        )?;
        println!("created id={} key={}", entry.id, entry.key);
    }

    let page = persistence.get_page_by_filter(
        &ctx,
        &FilterQuery::all().sorted_by("key ASC"),
        &PagingParams::new(0, 5, true),
    )?;
    println!(
        "page items={} total={}",
        page.items.len(),
        page.total.unwrap_or_default()
    );

    if let Some(first) = page.items.first() {
        let mut patch = Map::new();
        patch.insert("content".to_string(), json!("z"));
        if let Some(patched) = persistence.update_partial(&ctx, &first.id, &patch)? {
            println!("patched key={} content={}", patched.key, patched.content);
        }
        let removed = persistence.delete_by_id(&ctx, &first.id)?;
        println!("deleted={}", removed.is_some());
    }

    println!(
        "remaining={}",
        persistence.get_count_by_filter(&ctx, None)?
    );
    persistence.close(&ctx)
}

fn main() -> ExitCode {
    if let Some(log_dir) = std::env::args().nth(1) {
        if let Err(err) = init_logging(default_log_level(), &log_dir) {
            eprintln!("logging disabled: {err}");
        }
    }
    println!("relstore_core version={}", relstore_core::core_version());

    match run_scenario() {
        Ok(()) => {
            info!("event=cli_scenario module=cli status=ok");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(
                "event=cli_scenario module=cli status=error error_code={} error={}",
                err.code(),
                err
            );
            eprintln!("scenario failed: {err}");
            ExitCode::FAILURE
        }
    }
}
