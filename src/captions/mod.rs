//! Structured caption analysis results.
//!
//! A parse always yields a complete [`AnalyzedContent`]: sub-extractions that
//! fail degrade into absent fields plus a recorded [`FallbackReason`], never
//! into an error. The synchronizer attaches [`SyncMetadata`] when it
//! propagates one message's analysis to its group siblings.

mod parser;

pub use parser::CaptionParser;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::messages::MessageId;

/// How a caption was analyzed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseMethod {
    /// Staged regex extraction (the only method implemented here).
    #[default]
    Manual,
}

/// Tag recorded when a parsing sub-stage could not extract its target field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// No hash-prefixed product code matched the strict format.
    NoProductCode,
    /// No quantity token was found.
    NoQuantity,
    /// The code's digit run did not form a real, non-future calendar date.
    InvalidDate,
    /// No marker separated a product name from the rest of the caption.
    NoProductNameMarker,
}

impl FallbackReason {
    /// Critical fallbacks draw a single flat confidence penalty; the rest
    /// are penalized per occurrence.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::NoProductCode | Self::NoQuantity)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoProductCode => "no_product_code",
            Self::NoQuantity => "no_quantity",
            Self::InvalidDate => "invalid_date",
            Self::NoProductNameMarker => "no_product_name_marker",
        }
    }
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Quality signals attached to every parse result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsingMetadata {
    /// Extraction method that produced the result.
    pub method: ParseMethod,
    /// Structural trustworthiness of the result, in `[0.1, 1.0]`.
    pub confidence: f64,
    /// Sub-stages that could not extract their field.
    pub fallbacks_used: Vec<FallbackReason>,
    /// When the parse ran.
    pub timestamp: DateTime<Utc>,
    /// Set when the derived product name exceeds 23 characters, a proxy for
    /// structure the staged extraction likely missed. Downstream may route
    /// such results to a higher-fidelity parser.
    pub needs_escalation: bool,
}

/// Provenance stamped onto content propagated across a media group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMetadata {
    /// Number of messages in the group at sync time.
    pub group_message_count: usize,
    /// The canonical source message whose analysis was copied.
    pub source_message_id: MessageId,
    /// When the propagation ran.
    pub sync_timestamp: DateTime<Utc>,
    /// Whether the receiving message physically carried the caption.
    pub is_original_caption: bool,
}

/// Structured extraction result for one caption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedContent {
    /// Text preceding the first structural marker; the whole caption when no
    /// marker exists.
    pub product_name: String,
    /// Strict-format code (`1-4 letters + 5-6 digits`), without the `#`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_code: Option<String>,
    /// Uppercased leading letter run of the product code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_uid: Option<String>,
    /// Calendar date derived from the code's trailing digits (MMDDYY).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchase_date: Option<NaiveDate>,
    /// Positive unit count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    /// Parenthesized remark or leftover caption text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Parse-quality signals.
    pub parsing_metadata: ParsingMetadata,
    /// Present only on content written by group synchronization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_metadata: Option<SyncMetadata>,
}

impl AnalyzedContent {
    /// Whether two results carry the same extraction, ignoring parse
    /// timestamps and sync provenance. This is the equivalence the
    /// synchronizer uses to decide a sibling is already converged.
    pub fn same_extraction(&self, other: &AnalyzedContent) -> bool {
        self.product_name == other.product_name
            && self.product_code == other.product_code
            && self.vendor_uid == other.vendor_uid
            && self.purchase_date == other.purchase_date
            && self.quantity == other.quantity
            && self.notes == other.notes
    }

    /// A result with no extracted fields at all.
    pub fn is_empty(&self) -> bool {
        self.product_name.is_empty()
            && self.product_code.is_none()
            && self.quantity.is_none()
            && self.notes.is_none()
    }
}
