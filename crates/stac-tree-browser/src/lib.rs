//! STAC Tree Browser
//!
//! Command-line host for [`stac_tree_lib`]: loads a catalog tree, optionally expands Collections
//! and applies a query, then prints the visible tree as an outline.

pub mod logging;
pub mod outline;
pub mod settings;
pub mod state;

pub use outline::OutlineOptions;
pub use settings::Settings;
pub use state::{BrowserState, Stats};

use stac_tree_lib::{HttpFetcher, TreeError};
use std::sync::Arc;
use std::time::Duration;

/// Error types for the browser
#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Failed to write output: {0}")]
    Output(#[from] std::io::Error),

    #[error("Failed to encode output: {0}")]
    Json(#[from] serde_json::Error),
}

/// Run one browsing session with the given settings
pub async fn run(settings: Settings) -> Result<(), BrowserError> {
    let fetcher = HttpFetcher::new(Duration::from_secs(settings.timeout_secs))
        .map_err(|e| BrowserError::Client(e.to_string()))?;
    let options = OutlineOptions {
        show_hidden: settings.show_hidden,
        details: settings.details,
    };
    let json = settings.json;

    let mut state = BrowserState::new(settings, Arc::new(fetcher));
    let event_log = state::spawn_event_log(&state.tree);

    let outcome = async {
        state.load().await?;
        state.expand_requested().await;
        let visibility = state.apply_query();
        if visibility.is_filtered() && visibility.is_empty() {
            tracing::info!(query = visibility.query(), "Nothing matches the query");
        }

        let mut out = std::io::stdout().lock();
        if json {
            outline::write_json(&state.tree, options, &mut out)?;
        } else {
            outline::write_text(&state.tree, options, &mut out)?;
        }

        let stats = state.stats();
        tracing::info!(
            catalogs = stats.catalogs,
            collections = stats.collections,
            items = stats.items,
            failures = stats.failures,
            visible = stats.visible,
            "Done"
        );
        Ok::<(), BrowserError>(())
    }
    .await;

    event_log.abort();
    outcome
}
