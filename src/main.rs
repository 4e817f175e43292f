use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

use xdynamic_guard::config::Config;
use xdynamic_guard::dom::{ImageElement, MemoryDom, NodeSpec, PageDom, REASON_ATTR};
use xdynamic_guard::engine::{MutationBatch, PageSurfaces, ScanOutcome};
use xdynamic_guard::init::{init_orchestrator, setup_logging};
use xdynamic_guard::runtime::ChannelRuntime;
use xdynamic_guard::stats::StatsCollector;
use xdynamic_guard::storage::{MemoryStorage, StorageArea};

/// Page captured for an offline scan.
#[derive(Debug, Deserialize)]
struct PageSnapshot {
    url: String,
    #[serde(default = "default_runtime_id")]
    runtime_id: String,
    #[serde(default = "default_history_length")]
    history_length: usize,
    /// Area name -> key -> value.
    #[serde(default)]
    storage: BTreeMap<String, BTreeMap<String, Value>>,
    #[serde(default)]
    body: Vec<SnapshotNode>,
    /// Inserted after load and delivered through the mutation observer.
    #[serde(default)]
    inserted: Vec<SnapshotNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum SnapshotNode {
    Img {
        #[serde(default)]
        src: Option<String>,
        #[serde(default, rename = "dataSrc", alias = "data_src")]
        data_src: Option<String>,
        #[serde(default)]
        width: u32,
        #[serde(default)]
        height: u32,
    },
    Element {
        tag: String,
        #[serde(default)]
        children: Vec<SnapshotNode>,
    },
}

impl From<SnapshotNode> for NodeSpec {
    fn from(node: SnapshotNode) -> Self {
        match node {
            SnapshotNode::Img {
                src,
                data_src,
                width,
                height,
            } => NodeSpec::Image(ImageElement {
                src,
                data_src,
                natural_width: width,
                natural_height: height,
                ..ImageElement::default()
            }),
            SnapshotNode::Element { tag, children } => {
                NodeSpec::container(tag, children.into_iter().map(NodeSpec::from).collect())
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ImageReport {
    url: Option<String>,
    verdict: &'static str,
    reason: Option<String>,
}

fn default_runtime_id() -> String {
    "xdynamic-cli".to_string()
}

fn default_history_length() -> usize {
    1
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load Config
    let config_path = std::env::args().nth(1).unwrap_or("config.toml".to_string());
    let config = if Path::new(&config_path).exists() {
        Config::load(&config_path).await?
    } else {
        Config::default()
    };

    // 2. Setup Logging
    setup_logging(&config);
    info!("Starting xdynamic-guard...");

    if !Path::new(&config_path).exists() {
        info!("Config file not found, using defaults.");
    }

    // 3. Load Page Snapshot
    let snapshot_path = std::env::args()
        .nth(2)
        .context("Usage: xdynamic-guard <config.toml> <page.json>")?;
    let raw = tokio::fs::read_to_string(&snapshot_path)
        .await
        .with_context(|| format!("Failed to read page snapshot {}", snapshot_path))?;
    let snapshot: PageSnapshot =
        serde_json::from_str(&raw).context("Failed to parse page snapshot")?;

    // 4. Build Page Surfaces
    let dom = Arc::new(MemoryDom::new(&snapshot.url)?);
    dom.set_history_length(snapshot.history_length);
    for node in snapshot.body {
        dom.append_to_body(node.into());
    }

    let storage = Arc::new(MemoryStorage::new());
    for (area_name, entries) in snapshot.storage {
        let area = StorageArea::from_area_name(&area_name)
            .with_context(|| format!("Unknown storage area `{}`", area_name))?;
        for (key, value) in entries {
            storage.set(area, &key, value);
        }
    }

    let (runtime, mut outbound) = ChannelRuntime::new(snapshot.runtime_id, 64);
    let runtime = Arc::new(runtime);
    let reporter = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            match serde_json::to_string(&message) {
                Ok(json) => info!("-> background: {}", json),
                Err(e) => error!("Failed to encode outbound message: {}", e),
            }
        }
    });

    // 5. Init Stats & Orchestrator
    let stats = StatsCollector::new();
    let orchestrator = init_orchestrator(
        &config,
        PageSurfaces {
            dom: dom.clone(),
            storage,
            runtime: runtime.clone(),
        },
        stats.clone(),
    )?;

    // 6. Initial Scan
    let page = orchestrator.initialize();
    let outcome = page
        .initial_scan
        .await
        .context("Initial scan task failed")??;
    info!("Initial scan finished: {:?}", outcome);

    // 7. Replay Mutations
    if !matches!(outcome, ScanOutcome::Blocked { .. }) {
        for node in snapshot.inserted {
            let id = dom.append_to_body(node.into());
            if let Err(e) = page.observer.observe(MutationBatch::new(vec![id])).await {
                error!("Dropping mutation: {:#}", e);
                break;
            }
        }
    }
    page.observer.disconnect().await;

    // 8. Report
    drop(orchestrator);
    drop(runtime);
    if let Err(e) = reporter.await {
        error!("Reporter task failed: {}", e);
    }

    let report: Vec<ImageReport> = dom
        .document_images()
        .into_iter()
        .filter_map(|node| dom.image(node))
        .map(|image| ImageReport {
            url: image.source_url().map(str::to_string),
            verdict: if image.is_blocked() {
                "blocked"
            } else if image.is_warned() {
                "warned"
            } else {
                "unmarked"
            },
            reason: image.attribute(REASON_ATTR).map(str::to_string),
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&report)?);

    stats.dump_stats();
    Ok(())
}
