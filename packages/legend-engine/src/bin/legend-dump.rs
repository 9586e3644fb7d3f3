//! Legend dump CLI
//!
//! Loads a YAML map fixture, builds its legend and prints the projection.
//!
//! # Usage
//!
//! ```bash
//! # Flat legend of a map fixture
//! cargo run --bin legend-dump -- --map demos/city.yaml
//!
//! # Tree mode, every layer, as JSON
//! cargo run --bin legend-dump -- --map demos/city.yaml --mode tree --all-layers --json
//!
//! # Design-time placeholder legend
//! cargo run --bin legend-dump
//! ```

use anyhow::Context;
use clap::Parser;
use legend_engine::{
    design_time_fixture, telemetry, LayerItemsMode, LayerNode, LegendConfig, LegendTree,
    MapFixture, MapSource, ViewItem,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "legend-dump")]
#[command(about = "Print the legend of a map fixture", long_about = None)]
struct Cli {
    /// Map fixture (YAML); the design-time placeholder map when omitted
    #[arg(short, long)]
    map: Option<PathBuf>,

    /// Legend configuration (YAML, `version: 1`)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Projection mode: flat or tree
    #[arg(long)]
    mode: Option<LayerItemsMode>,

    /// Include layers that are not visible
    #[arg(long)]
    all_layers: bool,

    /// Reverse the top-level layer order
    #[arg(long)]
    reverse: bool,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct ItemView {
    kind: &'static str,
    label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    layer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    entries: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    children: Vec<ItemView>,
}

impl ItemView {
    fn from_node(node: &Arc<LayerNode>, template: Option<String>, recursive: bool) -> Self {
        let children = if recursive {
            node.children()
                .iter()
                .map(|child| Self::from_node(child, None, true))
                .collect()
        } else {
            Vec::new()
        };

        Self {
            kind: node.kind().as_str(),
            label: node.label(),
            layer: Some(node.id().to_string()),
            template,
            state: Some(node.load_state().to_string()),
            error: node.last_error().map(|e| e.to_string()),
            entries: node.entries().iter().map(|e| e.label().to_string()).collect(),
            children,
        }
    }

    fn from_item(item: &ViewItem, mode: LayerItemsMode) -> Self {
        let template = item.template().map(str::to_string);
        match item {
            ViewItem::Layer { node, .. } => {
                Self::from_node(node, template, mode == LayerItemsMode::Tree)
            }
            ViewItem::Entry { entry, .. } => Self {
                kind: "entry",
                label: entry.label().to_string(),
                layer: Some(entry.owner_id().to_string()),
                template,
                state: None,
                error: None,
                entries: Vec::new(),
                children: Vec::new(),
            },
        }
    }

    fn print(&self, depth: usize) {
        let indent = "  ".repeat(depth);
        match self.kind {
            "entry" => println!("{}- {}", indent, self.label),
            _ => {
                let state = self.state.as_deref().unwrap_or("-");
                match &self.error {
                    Some(err) => println!("{}[{}] {} ({}: {})", indent, self.kind, self.label, state, err),
                    None => println!("{}[{}] {} ({})", indent, self.kind, self.label, state),
                }
                for entry in &self.entries {
                    println!("{}  - {}", indent, entry);
                }
            }
        }
        for child in &self.children {
            child.print(depth + 1);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing(if cli.verbose {
        "legend_engine=debug"
    } else {
        "legend_engine=warn"
    });

    let mut config = match &cli.config {
        Some(path) => LegendConfig::from_yaml(path)
            .with_context(|| format!("Failed to load legend config {}", path.display()))?,
        None => LegendConfig::default(),
    };
    if let Some(mode) = cli.mode {
        config.mode = mode;
    }
    if cli.all_layers {
        config.show_only_visible_layers = false;
    }
    if cli.reverse {
        config.reverse_layers_order = true;
    }
    let mode = config.mode;

    let map: Arc<dyn MapSource> = match &cli.map {
        Some(path) => Arc::new(
            MapFixture::from_yaml(path)
                .with_context(|| format!("Failed to load map fixture {}", path.display()))?
                .into_map(),
        ),
        None => Arc::new(design_time_fixture()),
    };

    let tree = LegendTree::with_config(config);
    let mut events = tree.subscribe();
    tree.set_map(Some(map)).await;
    tree.wait_idle().await;

    let mut failures = 0;
    while let Ok(event) = events.try_recv() {
        if let Some(err) = event.error {
            failures += 1;
            eprintln!("warning: {}", err);
        }
    }

    let items: Vec<_> = tree
        .layer_items_source()
        .iter()
        .map(|item| ItemView::from_item(item, mode))
        .collect();

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        for item in &items {
            item.print(0);
        }
        if failures > 0 {
            eprintln!("{} layer(s) failed to resolve", failures);
        }
    }

    Ok(())
}
