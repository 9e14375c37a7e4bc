use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::models::{Order, OrderStatus, OutputFormat, SubtitleFile};

#[derive(Debug, Serialize)]
pub struct DashboardOverview {
    pub total_orders: i64,
    pub processing_orders: i64,
    pub completed_orders: i64,
    pub orders_by_status: BTreeMap<String, i64>,
    /// Sum of the caller's orders whose payment is currently `paid`.
    pub total_spent_cents: i64,
}

#[derive(Debug, Deserialize)]
pub struct RecentOrdersQuery {
    #[serde(default = "default_recent_limit")]
    pub limit: i64,
}

fn default_recent_limit() -> i64 {
    5
}

#[derive(Debug, Serialize)]
pub struct RecentOrder {
    pub id: Uuid,
    /// Filename of the first video in the order.
    pub video_title: String,
    pub status: OrderStatus,
    pub total_amount_cents: i64,
    pub currency: String,
    pub total_duration_seconds: i64,
    pub created_at: DateTime<Utc>,
}

impl From<Order> for RecentOrder {
    fn from(order: Order) -> Self {
        let video_title = order
            .videos
            .first()
            .map(|v| v.original_filename.clone())
            .unwrap_or_default();
        Self {
            id: order.id,
            video_title,
            status: order.status,
            total_amount_cents: order.total_amount_cents,
            currency: order.currency,
            total_duration_seconds: order.total_duration_seconds,
            created_at: order.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Download {
    pub id: Uuid,
    pub order_id: Uuid,
    pub video_name: Option<String>,
    pub file_name: String,
    pub format: OutputFormat,
    pub download_location: String,
    pub created_at: DateTime<Utc>,
}

impl Download {
    /// Pairs a file with the video it was generated for, when the order names it.
    pub fn new(file: SubtitleFile, order: &Order) -> Self {
        let video_name = file.video_id.and_then(|video_id| {
            order
                .videos
                .iter()
                .find(|v| v.id == video_id)
                .map(|v| v.original_filename.clone())
        });
        let file_name = file
            .download_location
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        Self {
            id: file.id,
            order_id: file.order_id,
            video_name,
            file_name,
            format: file.format,
            download_location: file.download_location,
            created_at: file.created_at,
        }
    }
}
