use serde::Deserialize;
use std::collections::BTreeMap;

use crate::models::{ConsentCategory, DataType, VisibilityLevel};

#[derive(Debug, Deserialize)]
pub struct ConsentUpdateRequest {
    pub categories: BTreeMap<ConsentCategory, bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct VisibilityUpdateRequest {
    pub visibility: BTreeMap<DataType, VisibilityLevel>,
}
