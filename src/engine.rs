//! Status transition engine
//!
//! The one path every status change takes: load the entity (the caller's
//! fresh read), consult the guard, look the move up in the transition table,
//! then re-read and swap inside a serialized transaction together with every
//! side effect the move carries. A row whose version moved under us aborts
//! with `Conflict`; callers retry from a fresh read, never blindly.

use crate::actor::Actor;
use crate::effects::{self, EffectCtx, EffectTable};
use crate::error::WorkflowError;
use crate::guard::{self, Action};
use crate::model::{Application, Campaign, Submission, TimeStamp};
use crate::status::{self, EntityKind, Status, TransitionRule, TransitionTable};
use crate::store::{self, Store};

pub struct Engine {
    table: TransitionTable,
    effects: EffectTable,
}

impl Engine {
    pub fn new(table: TransitionTable, effects: EffectTable) -> Self {
        Self { table, effects }
    }

    pub fn table(&self) -> &TransitionTable {
        &self.table
    }

    /// Validate a requested move against the table. Unknown and terminal
    /// source statuses fail before any rule lookup.
    fn plan(
        &self,
        kind: EntityKind,
        from: &Status,
        to: &Status,
    ) -> Result<&TransitionRule, WorkflowError> {
        let invalid = || WorkflowError::InvalidState {
            kind,
            from: from.clone(),
            to: to.clone(),
        };

        if !self.table.is_known(kind, from) || self.table.is_terminal(kind, from) {
            return Err(invalid());
        }
        self.table.rule(kind, from, to).ok_or_else(invalid)
    }

    pub fn transition_campaign(
        &self,
        store: &Store,
        actor: Option<&Actor>,
        campaign_id: &str,
        to: &Status,
    ) -> Result<Campaign, WorkflowError> {
        let campaign = store
            .campaign(campaign_id)?
            .ok_or_else(|| WorkflowError::not_found("campaign", campaign_id))?;

        // transitioning to the current status is an authorized no-op
        if campaign.status == *to {
            guard::authorize(actor, &Action::ViewCampaign { campaign: &campaign })?;
            return Ok(campaign);
        }

        let rule = self.plan(EntityKind::Campaign, &campaign.status, to)?;
        guard::authorize(
            actor,
            &Action::TransitionCampaign {
                campaign: &campaign,
                roles: &rule.roles,
            },
        )?;

        let mut updated = campaign.clone();
        updated.status = to.clone();
        updated.updated_at = TimeStamp::new();
        updated.version += 1;

        store.transaction(|tx| {
            let bytes = tx
                .get(campaign_id.as_bytes())?
                .ok_or_else(|| store::abort(WorkflowError::not_found("campaign", campaign_id)))?;
            let current: Campaign = store::dec(&bytes).map_err(store::abort)?;
            if current.version != campaign.version {
                return Err(store::abort(WorkflowError::Conflict));
            }

            tx.insert(
                campaign_id.as_bytes(),
                store::enc(&updated).map_err(store::abort)?,
            )?;
            Ok(())
        })?;

        Ok(updated)
    }

    pub fn transition_application(
        &self,
        store: &Store,
        actor: Option<&Actor>,
        application_id: &str,
        to: &Status,
        notes: Option<String>,
    ) -> Result<Application, WorkflowError> {
        let application = store
            .application(application_id)?
            .ok_or_else(|| WorkflowError::not_found("application", application_id))?;
        let campaign = store
            .campaign(&application.campaign_id)?
            .ok_or_else(|| WorkflowError::not_found("campaign", &application.campaign_id))?;

        if application.status == *to {
            guard::authorize(
                actor,
                &Action::ViewApplication {
                    application: &application,
                    campaign: &campaign,
                },
            )?;
            return Ok(application);
        }

        let rule = self.plan(EntityKind::Application, &application.status, to)?;
        guard::authorize(
            actor,
            &Action::TransitionApplication {
                application: &application,
                campaign: &campaign,
                roles: &rule.roles,
            },
        )?;

        let effects = self
            .effects
            .matching(EntityKind::Application, &application.status, to);
        let now = TimeStamp::new();

        let mut updated = application.clone();
        updated.status = to.clone();
        updated.reviewed_at = Some(now.clone());
        if notes.is_some() {
            updated.notes = notes.clone();
        }
        updated.version += 1;

        store.transaction(|tx| {
            let bytes = tx.get(application_id.as_bytes())?.ok_or_else(|| {
                store::abort(WorkflowError::not_found("application", application_id))
            })?;
            let current: Application = store::dec(&bytes).map_err(store::abort)?;
            if current.version != application.version {
                return Err(store::abort(WorkflowError::Conflict));
            }

            tx.insert(
                application_id.as_bytes(),
                store::enc(&updated).map_err(store::abort)?,
            )?;
            effects::apply(
                tx,
                &effects,
                &EffectCtx {
                    application: &updated,
                    campaign: &campaign,
                    submission: None,
                    to,
                    notes: notes.as_deref(),
                    now: &now,
                },
            )?;
            Ok(())
        })?;

        Ok(updated)
    }

    pub fn transition_submission(
        &self,
        store: &Store,
        actor: Option<&Actor>,
        submission_id: &str,
        to: &Status,
        notes: Option<String>,
        new_content: Option<Vec<String>>,
    ) -> Result<Submission, WorkflowError> {
        let submission = store
            .submission(submission_id)?
            .ok_or_else(|| WorkflowError::not_found("submission", submission_id))?;
        let application = store
            .application(&submission.application_id)?
            .ok_or_else(|| WorkflowError::not_found("application", &submission.application_id))?;
        let campaign = store
            .campaign(&application.campaign_id)?
            .ok_or_else(|| WorkflowError::not_found("campaign", &application.campaign_id))?;

        if submission.status == *to {
            guard::authorize(
                actor,
                &Action::ViewApplication {
                    application: &application,
                    campaign: &campaign,
                },
            )?;
            return Ok(submission);
        }

        let rule = self.plan(EntityKind::Submission, &submission.status, to)?;
        guard::authorize(
            actor,
            &Action::TransitionSubmission {
                application: &application,
                campaign: &campaign,
                roles: &rule.roles,
            },
        )?;

        let effects = self
            .effects
            .matching(EntityKind::Submission, &submission.status, to);
        let now = TimeStamp::new();

        let mut updated = submission.clone();
        updated.status = to.clone();
        if notes.is_some() {
            updated.review_notes = notes.clone();
        }
        if let Some(content) = new_content {
            updated.content = content;
        }
        if *to == Status::from(status::SUBMITTED) {
            // resubmission starts a fresh review round
            updated.submitted_at = now.clone();
            updated.reviewed_at = None;
        } else {
            updated.reviewed_at = Some(now.clone());
        }
        updated.version += 1;

        store.transaction(|tx| {
            let bytes = tx.get(submission_id.as_bytes())?.ok_or_else(|| {
                store::abort(WorkflowError::not_found("submission", submission_id))
            })?;
            let current: Submission = store::dec(&bytes).map_err(store::abort)?;
            if current.version != submission.version {
                return Err(store::abort(WorkflowError::Conflict));
            }

            tx.insert(
                submission_id.as_bytes(),
                store::enc(&updated).map_err(store::abort)?,
            )?;
            effects::apply(
                tx,
                &effects,
                &EffectCtx {
                    application: &application,
                    campaign: &campaign,
                    submission: Some(&updated),
                    to,
                    notes: notes.as_deref(),
                    now: &now,
                },
            )?;
            Ok(())
        })?;

        Ok(updated)
    }
}
