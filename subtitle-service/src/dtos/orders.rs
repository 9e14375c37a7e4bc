use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{Order, OrderStatus, SubtitleConfig, SubtitleFile, VideoRef};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, message = "At least one video is required"), nested)]
    pub videos: Vec<VideoRef>,

    #[validate(nested)]
    pub subtitle_config: SubtitleConfig,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateConfigRequest {
    #[validate(nested)]
    pub subtitle_config: SubtitleConfig,
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub status: Option<OrderStatus>,
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    pub subtitles: Vec<SubtitleFile>,
}
