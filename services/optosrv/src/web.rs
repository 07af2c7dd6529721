//! Local toggle page.
//!
//! One GET route serving an on/off radio form. Selecting a radio re-submits
//! the form with `?state=on` or `?state=off`; the server records the state
//! and renders the page with the matching radio checked. That is the whole
//! surface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::Html,
    routing::get,
    Router,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use opto_model::WebConfig;

use crate::error::{OptoSrvError, Result};

/// Shared on/off state behind the toggle page.
#[derive(Clone, Default)]
pub struct ToggleState {
    on: Arc<AtomicBool>,
}

impl ToggleState {
    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::Relaxed)
    }

    fn set(&self, on: bool) {
        self.on.store(on, Ordering::Relaxed);
    }
}

/// Serve the toggle page until the token is cancelled.
pub async fn serve(config: WebConfig, state: ToggleState, cancel: CancellationToken) -> Result<()> {
    let app = Router::new()
        .route("/", get(toggle_page))
        .route("/toggle.html", get(toggle_page))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port))
        .await
        .map_err(|e| {
            OptoSrvError::connection(format!(
                "failed to bind toggle page to {}:{}: {e}",
                config.host, config.port
            ))
        })?;
    let addr = listener
        .local_addr()
        .map_err(|e| OptoSrvError::io(e.to_string()))?;
    info!("toggle page listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| OptoSrvError::io(format!("toggle page server failed: {e}")))
}

async fn toggle_page(
    State(state): State<ToggleState>,
    Query(params): Query<HashMap<String, String>>,
) -> Html<String> {
    match params.get("state").map(String::as_str) {
        Some("on") => {
            state.set(true);
            info!("toggle switched on");
        }
        Some("off") => {
            state.set(false);
            info!("toggle switched off");
        }
        _ => {}
    }
    Html(render(state.is_on()))
}

fn render(on: bool) -> String {
    let (on_checked, off_checked) = if on { (" checked", "") } else { ("", " checked") };
    format!(
        concat!(
            "<html><head><title>Heizung</title></head><body>",
            "<form action=\"toggle.html\" method=\"GET\">",
            "<input type=\"radio\" name=\"state\" value=\"on\"{} onclick=\"this.form.submit()\"> On<br>",
            "<input type=\"radio\" name=\"state\" value=\"off\"{} onclick=\"this.form.submit()\"> Off",
            "</form></body></html>"
        ),
        on_checked, off_checked
    )
}
