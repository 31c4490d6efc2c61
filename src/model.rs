//! Persisted entities and the campaign draft builder

use crate::error::{ValidationError, WorkflowError};
use crate::status::{self, Status};
use crate::utils;
use chrono::{DateTime, TimeZone, Utc};

#[derive(Debug, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl<T: TimeZone> PartialEq for TimeStamp<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T: TimeZone> Eq for TimeStamp<T> {}

impl<T: TimeZone> PartialOrd for TimeStamp<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: TimeZone> Ord for TimeStamp<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .unwrap()
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// A campaign owned by one business. Only an `active` campaign accepts
/// applications.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Campaign {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub owner_id: String,
    #[n(2)]
    pub title: String,
    #[n(3)]
    pub brief: Option<String>,
    #[n(4)]
    pub budget: u64, // minor currency units, also the default payout per application
    #[n(5)]
    pub status: Status,
    #[n(6)]
    pub created_at: TimeStamp<Utc>,
    #[n(7)]
    pub updated_at: TimeStamp<Utc>,
    #[n(8)]
    pub version: u64,
}

// Campaigns are constructed through a draft so a half-filled record can never
// reach the store.
#[derive(Debug, Default)]
pub struct CampaignDraft {
    title: Option<String>,
    brief: Option<String>,
    budget: u64,
}

impl CampaignDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
    pub fn brief(mut self, brief: impl Into<String>) -> Self {
        self.brief = Some(brief.into());
        self
    }
    pub fn budget(mut self, amount: u64) -> Self {
        self.budget = amount;
        self
    }

    // Checks fields, mints an id and returns the finished campaign
    pub fn build(self, owner_id: &str) -> Result<Campaign, WorkflowError> {
        let title = self
            .title
            .ok_or(ValidationError::MissingField("title"))?;
        if self.budget == 0 {
            return Err(ValidationError::ZeroBudget.into());
        }

        let now = TimeStamp::new();
        Ok(Campaign {
            id: utils::new_campaign_id()?,
            owner_id: owner_id.to_string(),
            title,
            brief: self.brief,
            budget: self.budget,
            status: Status::from(status::DRAFT),
            created_at: now.clone(),
            updated_at: now,
            version: 0,
        })
    }
}

/// Links one influencer to one campaign. At most one exists per
/// (campaign, influencer) pair.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Application {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub campaign_id: String,
    #[n(2)]
    pub influencer_id: String,
    #[n(3)]
    pub status: Status,
    #[n(4)]
    pub cover_note: Option<String>,
    #[n(5)]
    pub agreed_amount: u64, // payout basis, defaults to the campaign budget
    #[n(6)]
    pub notes: Option<String>,
    #[n(7)]
    pub submitted_at: TimeStamp<Utc>,
    #[n(8)]
    pub reviewed_at: Option<TimeStamp<Utc>>,
    #[n(9)]
    pub version: u64,
}

impl Application {
    pub fn new(
        campaign: &Campaign,
        influencer_id: &str,
        cover_note: Option<String>,
    ) -> Result<Self, WorkflowError> {
        Ok(Self {
            id: utils::new_application_id()?,
            campaign_id: campaign.id.clone(),
            influencer_id: influencer_id.to_string(),
            status: Status::from(status::PENDING),
            cover_note,
            agreed_amount: campaign.budget,
            notes: None,
            submitted_at: TimeStamp::new(),
            reviewed_at: None,
            version: 0,
        })
    }
}

/// Content delivered against an approved application. Visible only to the
/// submitting influencer and the owning business.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Submission {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub application_id: String,
    #[n(2)]
    pub content: Vec<String>, // document/link/media references
    #[n(3)]
    pub status: Status,
    #[n(4)]
    pub review_notes: Option<String>,
    #[n(5)]
    pub auto_approve_date: Option<TimeStamp<Utc>>,
    #[n(6)]
    pub submitted_at: TimeStamp<Utc>,
    #[n(7)]
    pub reviewed_at: Option<TimeStamp<Utc>>,
    #[n(8)]
    pub version: u64,
}

impl Submission {
    pub fn new(
        application_id: &str,
        content: Vec<String>,
        auto_approve_date: Option<TimeStamp<Utc>>,
    ) -> Result<Self, WorkflowError> {
        if content.is_empty() {
            return Err(ValidationError::EmptyContent.into());
        }

        Ok(Self {
            id: utils::new_submission_id()?,
            application_id: application_id.to_string(),
            content,
            status: Status::from(status::SUBMITTED),
            review_notes: None,
            auto_approve_date,
            submitted_at: TimeStamp::new(),
            reviewed_at: None,
            version: 0,
        })
    }
}

/// Per-influencer ledger totals. Mutated only by the side-effect dispatcher
/// and the admin adjustment verbs. Invariant held everywhere:
/// `total_earnings == available + pending`.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Balance {
    #[n(0)]
    pub influencer_id: String,
    #[n(1)]
    pub available: u64,
    #[n(2)]
    pub pending: u64,
    #[n(3)]
    pub total_earnings: u64,
}

impl Balance {
    pub fn empty(influencer_id: &str) -> Self {
        Self {
            influencer_id: influencer_id.to_string(),
            available: 0,
            pending: 0,
            total_earnings: 0,
        }
    }
}

/// One conversation per application, created lazily the first time the two
/// parties need to talk.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Conversation {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub application_id: String,
    #[n(2)]
    pub business_id: String,
    #[n(3)]
    pub influencer_id: String,
    #[n(4)]
    pub created_at: TimeStamp<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Message {
    #[n(0)]
    pub id: String, // uuid7, time-ordered
    #[n(1)]
    pub conversation_id: String,
    #[n(2)]
    pub sender_id: String,
    #[n(3)]
    pub body: String,
    #[n(4)]
    pub created_at: TimeStamp<Utc>,
}

/// Ledger row proving a financial effect ran for (entity, target status).
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct EffectRecord {
    #[n(0)]
    pub entity_id: String,
    #[n(1)]
    pub status: Status,
    #[n(2)]
    pub applied_at: TimeStamp<Utc>,
}
