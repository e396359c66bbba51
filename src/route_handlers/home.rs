use axum::extract::State;

use crate::dashboard::{DashboardView, AUTO_REFRESH_INTERVAL_MS};
use crate::error::STORAGE_UNAVAILABLE;
use crate::AppState;

pub async fn handler(State(state): State<AppState>) -> impl axum::response::IntoResponse {
    let (view, load_error) = match state.store.read_all().await {
        Ok(records) => (DashboardView::from_records(&records), None),
        Err(err) => {
            tracing::error!("Failed to load records for the dashboard: {}", err);
            (DashboardView::default(), Some(STORAGE_UNAVAILABLE))
        }
    };

    let template = HomeTemplate {
        view,
        load_error,
        refresh_interval_ms: AUTO_REFRESH_INTERVAL_MS,
    };
    super::html_template::HtmlTemplate(template)
}

#[derive(askama::Template)]
#[template(path = "pages/home.html")]
struct HomeTemplate {
    view: DashboardView,
    load_error: Option<&'static str>,
    refresh_interval_ms: u64,
}
