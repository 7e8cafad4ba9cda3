//! Shared, read-only request state.

use crate::{auth::TokenValidator, services::file_service::FileService};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub files: FileService,
    /// `None` when bearer auth is switched off.
    pub tokens: Option<Arc<TokenValidator>>,
    pub max_upload_bytes: usize,
}
