//! Service layer API for campaign workflow operations
//!
//! These are the only verbs the surrounding application layer calls. Every
//! verb resolves authorization through the guard, routes status changes
//! through the engine, and touches storage through the one handle passed in
//! at construction. No state is retained between requests.

use crate::actor::Actor;
use crate::config::WorkflowConfig;
use crate::effects;
use crate::engine::Engine;
use crate::error::{Deny, WorkflowError};
use crate::guard::{self, Action};
use crate::model::{
    Application, Balance, Campaign, CampaignDraft, Conversation, Message, Submission, TimeStamp,
};
use crate::status::{self, Status};
use crate::store::{self, Store};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid7::uuid7;

pub struct WorkflowService {
    store: Store,
    engine: Engine,
}

impl WorkflowService {
    /// One persistence handle per service, passed in at the request boundary.
    pub fn new(db: Arc<sled::Db>, config: WorkflowConfig) -> Self {
        Self {
            store: Store::new(db),
            engine: Engine::new(config.transitions, config.effects),
        }
    }

    /// Create a campaign in `draft` for the calling business
    pub fn create_campaign(
        &self,
        actor: &Actor,
        draft: CampaignDraft,
    ) -> Result<Campaign, WorkflowError> {
        guard::authorize(Some(actor), &Action::CreateCampaign)?;

        let campaign = draft.build(&actor.id)?;
        self.store
            .db
            .insert(campaign.id.as_bytes(), store::enc(&campaign)?)?;
        Ok(campaign)
    }

    /// Campaigns are browsable marketplace records; no actor required.
    pub fn campaign(&self, campaign_id: &str) -> Result<Campaign, WorkflowError> {
        self.store
            .campaign(campaign_id)?
            .ok_or_else(|| WorkflowError::not_found("campaign", campaign_id))
    }

    pub fn transition_campaign(
        &self,
        actor: &Actor,
        campaign_id: &str,
        to: &Status,
    ) -> Result<Campaign, WorkflowError> {
        self.engine
            .transition_campaign(&self.store, Some(actor), campaign_id, to)
    }

    /// Apply to an active campaign. One application per
    /// (campaign, influencer) pair; the pair index insert and the uniqueness
    /// re-check share one transaction with the row itself.
    pub fn apply(
        &self,
        actor: &Actor,
        campaign_id: &str,
        cover_note: Option<String>,
    ) -> Result<Application, WorkflowError> {
        let campaign = self.campaign(campaign_id)?;
        let already_applied = self
            .store
            .application_id_for_pair(campaign_id, &actor.id)?
            .is_some();
        guard::authorize(
            Some(actor),
            &Action::Apply {
                campaign: &campaign,
                already_applied,
            },
        )?;

        let application = Application::new(&campaign, &actor.id, cover_note)?;
        let pair = store::pair_key(campaign_id, &actor.id);

        self.store.transaction(|tx| {
            // the guard's pre-checks re-run here, inside the serialized write
            let bytes = tx
                .get(campaign_id.as_bytes())?
                .ok_or_else(|| store::abort(WorkflowError::not_found("campaign", campaign_id)))?;
            let current: Campaign = store::dec(&bytes).map_err(store::abort)?;
            if current.status != Status::from(status::ACTIVE) {
                return Err(store::abort(Deny::InvalidState.into()));
            }
            if tx.get(pair.as_bytes())?.is_some() {
                return Err(store::abort(Deny::AlreadyExists.into()));
            }

            tx.insert(pair.as_bytes(), application.id.as_bytes())?;
            tx.insert(
                application.id.as_bytes(),
                store::enc(&application).map_err(store::abort)?,
            )?;
            Ok(())
        })?;

        Ok(application)
    }

    pub fn transition_application(
        &self,
        actor: &Actor,
        application_id: &str,
        to: &Status,
        notes: Option<String>,
    ) -> Result<Application, WorkflowError> {
        self.engine
            .transition_application(&self.store, Some(actor), application_id, to, notes)
    }

    /// Deliver content against an approved application
    pub fn submit_content(
        &self,
        actor: &Actor,
        application_id: &str,
        content: Vec<String>,
        auto_approve_date: Option<TimeStamp<Utc>>,
    ) -> Result<Submission, WorkflowError> {
        let application = self
            .store
            .application(application_id)?
            .ok_or_else(|| WorkflowError::not_found("application", application_id))?;
        guard::authorize(
            Some(actor),
            &Action::SubmitContent {
                application: &application,
            },
        )?;

        let submission = Submission::new(&application.id, content, auto_approve_date)?;
        self.store
            .db
            .insert(submission.id.as_bytes(), store::enc(&submission)?)?;
        Ok(submission)
    }

    pub fn transition_submission(
        &self,
        actor: &Actor,
        submission_id: &str,
        to: &Status,
        notes: Option<String>,
    ) -> Result<Submission, WorkflowError> {
        self.engine
            .transition_submission(&self.store, Some(actor), submission_id, to, notes, None)
    }

    /// Resubmit after a revision request, replacing the content in the same
    /// transaction as the status move.
    pub fn resubmit(
        &self,
        actor: &Actor,
        submission_id: &str,
        content: Vec<String>,
    ) -> Result<Submission, WorkflowError> {
        self.engine.transition_submission(
            &self.store,
            Some(actor),
            submission_id,
            &Status::from(status::SUBMITTED),
            None,
            Some(content),
        )
    }

    pub fn get_application(
        &self,
        actor: &Actor,
        application_id: &str,
    ) -> Result<Application, WorkflowError> {
        let application = self
            .store
            .application(application_id)?
            .ok_or_else(|| WorkflowError::not_found("application", application_id))?;
        let campaign = self.campaign(&application.campaign_id)?;
        guard::authorize(
            Some(actor),
            &Action::ViewApplication {
                application: &application,
                campaign: &campaign,
            },
        )?;
        Ok(application)
    }

    pub fn get_submission(
        &self,
        actor: &Actor,
        submission_id: &str,
    ) -> Result<Submission, WorkflowError> {
        let submission = self
            .store
            .submission(submission_id)?
            .ok_or_else(|| WorkflowError::not_found("submission", submission_id))?;
        let application = self
            .store
            .application(&submission.application_id)?
            .ok_or_else(|| WorkflowError::not_found("application", &submission.application_id))?;
        let campaign = self.campaign(&application.campaign_id)?;
        guard::authorize(
            Some(actor),
            &Action::ViewApplication {
                application: &application,
                campaign: &campaign,
            },
        )?;
        Ok(submission)
    }

    /// Applications the caller is allowed to see, optionally narrowed by
    /// campaign and status. Authorization filters; it never errors a list.
    pub fn list_applications(
        &self,
        actor: &Actor,
        campaign_id: Option<&str>,
        status_filter: Option<&Status>,
    ) -> Result<Vec<Application>, WorkflowError> {
        let mut campaigns: HashMap<String, Campaign> = HashMap::new();
        let mut visible = Vec::new();

        for application in self.store.applications()? {
            if campaign_id.is_some_and(|id| id != application.campaign_id) {
                continue;
            }
            if status_filter.is_some_and(|s| *s != application.status) {
                continue;
            }

            if !campaigns.contains_key(&application.campaign_id) {
                let Some(campaign) = self.store.campaign(&application.campaign_id)? else {
                    continue;
                };
                campaigns.insert(application.campaign_id.clone(), campaign);
            }
            let campaign = &campaigns[&application.campaign_id];

            if guard::authorize(
                Some(actor),
                &Action::ViewApplication {
                    application: &application,
                    campaign,
                },
            )
            .is_ok()
            {
                visible.push(application);
            }
        }

        Ok(visible)
    }

    /// Send a message between the two parties of an application. The
    /// conversation is created lazily on first contact.
    pub fn send_message(
        &self,
        actor: &Actor,
        application_id: &str,
        body: String,
    ) -> Result<Message, WorkflowError> {
        let application = self
            .store
            .application(application_id)?
            .ok_or_else(|| WorkflowError::not_found("application", application_id))?;
        let campaign = self.campaign(&application.campaign_id)?;
        guard::authorize(
            Some(actor),
            &Action::ViewApplication {
                application: &application,
                campaign: &campaign,
            },
        )?;

        let now = TimeStamp::new();
        let sender = actor.id.clone();

        self.store.transaction(|tx| {
            let conversation_id = effects::ensure_conversation(tx, &application, &campaign, &now)?;
            let message = Message {
                id: uuid7().to_string(),
                conversation_id: conversation_id.clone(),
                sender_id: sender.clone(),
                body: body.clone(),
                created_at: now.clone(),
            };
            tx.insert(
                store::message_key(&conversation_id, &message.id).as_bytes(),
                store::enc(&message).map_err(store::abort)?,
            )?;
            Ok(message)
        })
    }

    /// The application's conversation, if anyone has opened one yet.
    pub fn conversation(
        &self,
        actor: &Actor,
        application_id: &str,
    ) -> Result<Option<Conversation>, WorkflowError> {
        let application = self
            .store
            .application(application_id)?
            .ok_or_else(|| WorkflowError::not_found("application", application_id))?;
        let campaign = self.campaign(&application.campaign_id)?;
        guard::authorize(
            Some(actor),
            &Action::ViewApplication {
                application: &application,
                campaign: &campaign,
            },
        )?;

        self.store.conversation(application_id)
    }

    pub fn list_messages(
        &self,
        actor: &Actor,
        application_id: &str,
    ) -> Result<Vec<Message>, WorkflowError> {
        let application = self
            .store
            .application(application_id)?
            .ok_or_else(|| WorkflowError::not_found("application", application_id))?;
        let campaign = self.campaign(&application.campaign_id)?;
        guard::authorize(
            Some(actor),
            &Action::ViewApplication {
                application: &application,
                campaign: &campaign,
            },
        )?;

        self.store
            .messages(&store::conversation_key(application_id))
    }

    pub fn balance_of(
        &self,
        actor: &Actor,
        influencer_id: &str,
    ) -> Result<Balance, WorkflowError> {
        guard::authorize(Some(actor), &Action::ViewBalance { influencer_id })?;
        self.store.balance(influencer_id)
    }

    /// Administrative grant. Keeps `total_earnings == available + pending`.
    pub fn admin_credit(
        &self,
        actor: &Actor,
        influencer_id: &str,
        amount: u64,
    ) -> Result<Balance, WorkflowError> {
        guard::authorize(Some(actor), &Action::AdjustBalance)?;

        self.store.transaction(|tx| {
            effects::update_balance(tx, influencer_id, |mut balance| {
                balance.available = balance.available.checked_add(amount).ok_or_else(|| {
                    WorkflowError::SideEffect(format!("available overflow for {influencer_id}"))
                })?;
                balance.total_earnings =
                    balance.total_earnings.checked_add(amount).ok_or_else(|| {
                        WorkflowError::SideEffect(format!("total overflow for {influencer_id}"))
                    })?;
                Ok(balance)
            })
        })
    }

    /// Administrative deduction, e.g. recording a payout.
    pub fn admin_debit(
        &self,
        actor: &Actor,
        influencer_id: &str,
        amount: u64,
    ) -> Result<Balance, WorkflowError> {
        guard::authorize(Some(actor), &Action::AdjustBalance)?;

        self.store.transaction(|tx| {
            effects::update_balance(tx, influencer_id, |mut balance| {
                balance.available = balance.available.checked_sub(amount).ok_or_else(|| {
                    WorkflowError::SideEffect(format!(
                        "debit exceeds available balance for {influencer_id}"
                    ))
                })?;
                balance.total_earnings =
                    balance.total_earnings.checked_sub(amount).ok_or_else(|| {
                        WorkflowError::SideEffect(format!(
                            "debit exceeds total earnings for {influencer_id}"
                        ))
                    })?;
                Ok(balance)
            })
        })
    }

    /// Atomic increment at the storage layer, safe under concurrent requests
    pub fn record_view(&self, campaign_id: &str) -> Result<u64, WorkflowError> {
        self.campaign(campaign_id)?;
        self.store.increment(&store::views_key(campaign_id))
    }

    pub fn views(&self, campaign_id: &str) -> Result<u64, WorkflowError> {
        self.store.counter(&store::views_key(campaign_id))
    }

    pub fn favorite(&self, campaign_id: &str) -> Result<u64, WorkflowError> {
        self.campaign(campaign_id)?;
        self.store.increment(&store::favs_key(campaign_id))
    }

    pub fn unfavorite(&self, campaign_id: &str) -> Result<u64, WorkflowError> {
        self.campaign(campaign_id)?;
        self.store.decrement(&store::favs_key(campaign_id))
    }

    pub fn favorites(&self, campaign_id: &str) -> Result<u64, WorkflowError> {
        self.store.counter(&store::favs_key(campaign_id))
    }

    /// Scheduled sweep: auto-approve `submitted` submissions whose deadline
    /// has passed, through the ordinary transition entry point under the
    /// system actor. Per-item failures are logged and left for the next run.
    pub fn auto_approve_due(
        &self,
        now: &TimeStamp<Utc>,
    ) -> Result<Vec<Submission>, WorkflowError> {
        let system = Actor::system();
        let target = Status::from(status::AUTO_APPROVED);
        let mut approved = Vec::new();

        for submission in self.store.submissions()? {
            if submission.status != Status::from(status::SUBMITTED) {
                continue;
            }
            let Some(due) = &submission.auto_approve_date else {
                continue;
            };
            if due > now {
                continue;
            }

            match self.engine.transition_submission(
                &self.store,
                Some(&system),
                &submission.id,
                &target,
                None,
                None,
            ) {
                Ok(updated) => {
                    info!(submission = %updated.id, "auto-approved past-deadline submission");
                    approved.push(updated);
                }
                Err(e) => {
                    warn!(submission = %submission.id, error = %e, "auto-approve sweep skipped submission");
                }
            }
        }

        Ok(approved)
    }
}
