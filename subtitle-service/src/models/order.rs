//! Order model and its lifecycle.
//!
//! `OrderStatus::apply` is the only place that decides whether an
//! `OrderEvent` may move an order from one status to another. Stores persist
//! the result with a compare-and-set on the prior status.

use super::{SubtitleFile, UnknownVariant};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Paid,
    Processing,
    Completed,
    Failed,
    Refunded,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Created,
        OrderStatus::Paid,
        OrderStatus::Processing,
        OrderStatus::Completed,
        OrderStatus::Failed,
        OrderStatus::Refunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::Paid => "paid",
            OrderStatus::Processing => "processing",
            OrderStatus::Completed => "completed",
            OrderStatus::Failed => "failed",
            OrderStatus::Refunded => "refunded",
        }
    }

    /// Resolves the status `event` leads to from `self`.
    ///
    /// Only these edges exist:
    ///
    /// | from       | event            | to         |
    /// |------------|------------------|------------|
    /// | created    | PaymentConfirmed | paid       |
    /// | paid       | JobStarted       | processing |
    /// | processing | JobSucceeded     | completed  |
    /// | processing | JobFailed        | failed     |
    /// | failed     | Reprocess        | processing |
    /// | completed  | Refund           | refunded   |
    pub fn apply(self, event: OrderEvent) -> Result<OrderStatus, TransitionError> {
        use OrderEvent::*;
        use OrderStatus::*;

        match (self, event) {
            (Created, PaymentConfirmed) => Ok(Paid),
            (Paid, JobStarted) => Ok(Processing),
            (Processing, JobSucceeded) => Ok(Completed),
            (Processing, JobFailed) => Ok(Failed),
            (Failed, Reprocess) => Ok(Processing),
            (Completed, Refund) => Ok(Refunded),
            (from, event) => Err(TransitionError::NotAllowed { from, event }),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(OrderStatus::Created),
            "paid" => Ok(OrderStatus::Paid),
            "processing" => Ok(OrderStatus::Processing),
            "completed" => Ok(OrderStatus::Completed),
            "failed" => Ok(OrderStatus::Failed),
            "refunded" => Ok(OrderStatus::Refunded),
            other => Err(UnknownVariant::new("order status", other)),
        }
    }
}

impl TryFrom<String> for OrderStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Something that happened to an order, as reported by a webhook, a worker or an admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderEvent {
    PaymentConfirmed,
    JobStarted,
    JobSucceeded,
    JobFailed,
    Reprocess,
    Refund,
}

impl OrderEvent {
    pub const ALL: [OrderEvent; 6] = [
        OrderEvent::PaymentConfirmed,
        OrderEvent::JobStarted,
        OrderEvent::JobSucceeded,
        OrderEvent::JobFailed,
        OrderEvent::Reprocess,
        OrderEvent::Refund,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderEvent::PaymentConfirmed => "payment_confirmed",
            OrderEvent::JobStarted => "job_started",
            OrderEvent::JobSucceeded => "job_succeeded",
            OrderEvent::JobFailed => "job_failed",
            OrderEvent::Reprocess => "reprocess",
            OrderEvent::Refund => "refund",
        }
    }
}

impl fmt::Display for OrderEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("cannot apply '{event}' to an order in status '{from}'")]
    NotAllowed { from: OrderStatus, event: OrderEvent },

    /// The stored status moved on between read and write.
    #[error("order is '{actual}', expected '{expected}' when applying '{event}'")]
    Stale {
        expected: OrderStatus,
        actual: OrderStatus,
        event: OrderEvent,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unpaid" => Ok(PaymentStatus::Unpaid),
            "paid" => Ok(PaymentStatus::Paid),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(UnknownVariant::new("payment status", other)),
        }
    }
}

impl TryFrom<String> for PaymentStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Srt,
    Vtt,
    Ass,
    Txt,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Srt => "srt",
            OutputFormat::Vtt => "vtt",
            OutputFormat::Ass => "ass",
            OutputFormat::Txt => "txt",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "srt" => Ok(OutputFormat::Srt),
            "vtt" => Ok(OutputFormat::Vtt),
            "ass" => Ok(OutputFormat::Ass),
            "txt" => Ok(OutputFormat::Txt),
            other => Err(UnknownVariant::new("output format", other)),
        }
    }
}

impl TryFrom<String> for OutputFormat {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Genre {
    #[default]
    General,
    Horror,
    Comedy,
    Romance,
    Action,
    Documentary,
}

/// How subtitles for an order should be produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct SubtitleConfig {
    #[validate(length(min = 2, max = 10))]
    pub source_language: String,
    #[validate(length(min = 2, max = 10))]
    pub target_language: Option<String>,
    #[serde(default = "default_max_chars_per_line")]
    #[validate(range(min = 10, max = 120))]
    pub max_chars_per_line: u32,
    #[serde(default = "default_lines_per_subtitle")]
    #[validate(range(min = 1, max = 4))]
    pub lines_per_subtitle: u32,
    #[serde(default)]
    pub accessibility_mode: bool,
    #[serde(default)]
    pub non_verbal_only_mode: bool,
    #[serde(default)]
    pub non_verbal: bool,
    #[serde(default)]
    pub genre: Genre,
    #[serde(default)]
    pub output_format: OutputFormat,
}

fn default_max_chars_per_line() -> u32 {
    42
}

fn default_lines_per_subtitle() -> u32 {
    2
}

impl Default for SubtitleConfig {
    fn default() -> Self {
        Self {
            source_language: "en".to_string(),
            target_language: None,
            max_chars_per_line: default_max_chars_per_line(),
            lines_per_subtitle: default_lines_per_subtitle(),
            accessibility_mode: false,
            non_verbal_only_mode: false,
            non_verbal: false,
            genre: Genre::General,
            output_format: OutputFormat::Srt,
        }
    }
}

/// An uploaded video attached to an order. Upload itself happens elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct VideoRef {
    pub id: Uuid,
    #[validate(length(min = 1, max = 255))]
    pub original_filename: String,
    #[validate(length(min = 1, max = 1024))]
    pub storage_key: String,
    /// At most one day per video.
    #[validate(range(min = 1, max = 86_400))]
    pub duration_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    #[sqlx(json)]
    pub videos: Vec<VideoRef>,
    #[sqlx(json)]
    pub subtitle_config: SubtitleConfig,
    #[sqlx(try_from = "String")]
    pub status: OrderStatus,
    #[sqlx(try_from = "String")]
    pub payment_status: PaymentStatus,
    pub total_duration_seconds: i64,
    pub total_amount_cents: i64,
    pub currency: String,
    pub payment_reference: Option<String>,
    pub checkout_session_id: Option<String>,
    pub admin_notes: Option<String>,
    pub processed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(
        user_id: Uuid,
        videos: Vec<VideoRef>,
        subtitle_config: SubtitleConfig,
        price_per_minute_cents: i64,
        currency: String,
    ) -> Result<Self, PricingError> {
        let total_duration_seconds = videos
            .iter()
            .try_fold(0i64, |total, v| total.checked_add(v.duration_seconds.max(0)))
            .ok_or(PricingError::Overflow)?;
        let total_amount_cents = price_cents(total_duration_seconds, price_per_minute_cents)?;
        let now = Utc::now();

        Ok(Self {
            id: Uuid::new_v4(),
            user_id,
            videos,
            subtitle_config,
            status: OrderStatus::Created,
            payment_status: PaymentStatus::Unpaid,
            total_duration_seconds,
            total_amount_cents,
            currency,
            payment_reference: None,
            checkout_session_id: None,
            admin_notes: None,
            processed_by: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.user_id == user_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PricingError {
    #[error("order total is too large to price")]
    Overflow,
}

/// Price for `seconds` of video, rounded up to the next cent.
pub fn price_cents(seconds: i64, price_per_minute_cents: i64) -> Result<i64, PricingError> {
    seconds
        .max(0)
        .checked_mul(price_per_minute_cents.max(0))
        .and_then(|n| n.checked_add(59))
        .map(|n| n / 60)
        .ok_or(PricingError::Overflow)
}

/// Writes committed atomically with a status transition: column updates on
/// the order plus any subtitle files it produced.
#[derive(Debug, Clone, Default)]
pub struct OrderChanges {
    pub payment_status: Option<PaymentStatus>,
    pub payment_reference: Option<String>,
    pub processed_by: Option<Uuid>,
    pub admin_notes: Option<String>,
    pub subtitle_files: Vec<SubtitleFile>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderFilter {
    pub user_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expected_edge(from: OrderStatus, event: OrderEvent) -> Option<OrderStatus> {
        match (from, event) {
            (OrderStatus::Created, OrderEvent::PaymentConfirmed) => Some(OrderStatus::Paid),
            (OrderStatus::Paid, OrderEvent::JobStarted) => Some(OrderStatus::Processing),
            (OrderStatus::Processing, OrderEvent::JobSucceeded) => Some(OrderStatus::Completed),
            (OrderStatus::Processing, OrderEvent::JobFailed) => Some(OrderStatus::Failed),
            (OrderStatus::Failed, OrderEvent::Reprocess) => Some(OrderStatus::Processing),
            (OrderStatus::Completed, OrderEvent::Refund) => Some(OrderStatus::Refunded),
            _ => None,
        }
    }

    #[test]
    fn test_every_status_event_pair() {
        let mut allowed = 0;
        for from in OrderStatus::ALL {
            for event in OrderEvent::ALL {
                match (from.apply(event), expected_edge(from, event)) {
                    (Ok(to), Some(expected)) => {
                        assert_eq!(to, expected, "{from} + {event}");
                        allowed += 1;
                    }
                    (Err(TransitionError::NotAllowed { from: f, event: e }), None) => {
                        assert_eq!((f, e), (from, event));
                    }
                    (result, expected) => {
                        panic!("{from} + {event}: got {result:?}, expected {expected:?}")
                    }
                }
            }
        }
        assert_eq!(allowed, 6);
    }

    #[test]
    fn test_refunded_is_terminal() {
        for event in OrderEvent::ALL {
            assert!(OrderStatus::Refunded.apply(event).is_err());
        }
    }

    #[test]
    fn test_refund_only_from_completed() {
        for from in OrderStatus::ALL {
            let result = from.apply(OrderEvent::Refund);
            assert_eq!(result.is_ok(), from == OrderStatus::Completed);
        }
    }

    #[test]
    fn test_price_rounds_up_to_cent() {
        assert_eq!(price_cents(60, 100), Ok(100));
        assert_eq!(price_cents(90, 100), Ok(150));
        assert_eq!(price_cents(1, 100), Ok(2));
        assert_eq!(price_cents(0, 100), Ok(0));
    }

    #[test]
    fn test_price_overflow_is_an_error() {
        assert_eq!(price_cents(i64::MAX / 2, 100), Err(PricingError::Overflow));
        assert_eq!(price_cents(i64::MAX - 10, 1), Err(PricingError::Overflow));
        assert_eq!(price_cents(86_400 * 10, i64::MAX), Err(PricingError::Overflow));

        let video = |seconds| VideoRef {
            id: Uuid::new_v4(),
            original_filename: "long.mp4".into(),
            storage_key: "videos/long.mp4".into(),
            duration_seconds: seconds,
        };
        let result = Order::new(
            Uuid::new_v4(),
            vec![video(i64::MAX), video(i64::MAX)],
            SubtitleConfig::default(),
            100,
            "usd".into(),
        );
        assert!(matches!(result, Err(PricingError::Overflow)));
    }

    #[test]
    fn test_video_duration_is_bounded() {
        let mut video = VideoRef {
            id: Uuid::new_v4(),
            original_filename: "day.mp4".into(),
            storage_key: "videos/day.mp4".into(),
            duration_seconds: 86_400,
        };
        assert!(video.validate().is_ok());

        video.duration_seconds = 100_000_000_000_000_000;
        assert!(video.validate().is_err());
    }

    #[test]
    fn test_new_order_totals() {
        let videos = vec![
            VideoRef {
                id: Uuid::new_v4(),
                original_filename: "a.mp4".into(),
                storage_key: "videos/a.mp4".into(),
                duration_seconds: 120,
            },
            VideoRef {
                id: Uuid::new_v4(),
                original_filename: "b.mp4".into(),
                storage_key: "videos/b.mp4".into(),
                duration_seconds: 30,
            },
        ];
        let order = Order::new(
            Uuid::new_v4(),
            videos,
            SubtitleConfig::default(),
            100,
            "usd".into(),
        )
        .unwrap();

        assert_eq!(order.status, OrderStatus::Created);
        assert_eq!(order.payment_status, PaymentStatus::Unpaid);
        assert_eq!(order.total_duration_seconds, 150);
        assert_eq!(order.total_amount_cents, 250);
    }

    #[test]
    fn test_subtitle_config_defaults_and_bounds() {
        let config: SubtitleConfig =
            serde_json::from_str(r#"{"source_language":"en"}"#).unwrap();
        assert_eq!(config.max_chars_per_line, 42);
        assert_eq!(config.lines_per_subtitle, 2);
        assert_eq!(config.output_format, OutputFormat::Srt);
        assert!(config.validate().is_ok());

        let too_wide = SubtitleConfig {
            max_chars_per_line: 500,
            ..SubtitleConfig::default()
        };
        assert!(too_wide.validate().is_err());
    }
}
