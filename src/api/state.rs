use crate::archiver::ReportsArchiver;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub archiver: Arc<ReportsArchiver>,
}
