//! Work-list provider: loads fetch items from a JSON file or falls back to
//! the built-in development set, ordered by ascending priority.

use std::path::Path;

use anyhow::{Context, Result};
use hoard_core::{FetchItem, ItemKind};
use serde::Deserialize;

#[derive(Deserialize)]
#[serde(untagged)]
enum WorkListFile {
    Bare(Vec<FetchItem>),
    Wrapped { items: Vec<FetchItem> },
}

/// Parse a work list from JSON: either an array of items or `{"items": [...]}`.
pub fn parse(json: &str) -> Result<Vec<FetchItem>> {
    let file: WorkListFile = serde_json::from_str(json).context("Invalid work list JSON")?;
    let items = match file {
        WorkListFile::Bare(items) | WorkListFile::Wrapped { items } => items,
    };
    Ok(ordered(items))
}

pub fn load(path: &Path) -> Result<Vec<FetchItem>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read work list: {}", path.display()))?;
    parse(&raw).with_context(|| format!("Failed to parse work list: {}", path.display()))
}

/// Stable sort by priority, so equal priorities keep their input order.
pub fn ordered(mut items: Vec<FetchItem>) -> Vec<FetchItem> {
    items.sort_by_key(|item| item.priority);
    items
}

/// The set fetched when no work list is given.
pub fn default_items() -> Vec<FetchItem> {
    ordered(vec![
        FetchItem::new("alpine", ItemKind::Image, "docker.io/library/alpine:3.20")
            .with_category("base_os")
            .with_description("Minimal base image")
            .with_estimated_size(8 * 1024 * 1024),
        FetchItem::new("debian", ItemKind::Image, "docker.io/library/debian:bookworm-slim")
            .with_category("base_os")
            .with_description("Debian slim base image")
            .with_estimated_size(75 * 1024 * 1024),
        FetchItem::new("postgres", ItemKind::Image, "docker.io/library/postgres:16")
            .with_category("databases")
            .with_description("PostgreSQL server")
            .with_estimated_size(430 * 1024 * 1024)
            .with_priority(1),
        FetchItem::new("redis", ItemKind::Image, "docker.io/library/redis:7")
            .with_category("databases")
            .with_description("Redis server")
            .with_estimated_size(130 * 1024 * 1024)
            .with_priority(1),
        FetchItem::new("rust", ItemKind::Image, "docker.io/library/rust:1-slim")
            .with_category("toolchains")
            .with_description("Rust toolchain image")
            .with_estimated_size(800 * 1024 * 1024)
            .with_priority(2),
        FetchItem::new("smollm2", ItemKind::Model, "ai/smollm2")
            .with_display_name("SmolLM2")
            .with_category("models")
            .with_description("Small local language model")
            .with_estimated_size(270 * 1024 * 1024)
            .with_priority(3),
    ])
}
