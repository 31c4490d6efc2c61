//! Side-effect dispatcher
//!
//! Each accepted transition may carry secondary writes: escrow and release on
//! the influencer balance, lazy conversation creation, system notices. The
//! mapping is table data, and every effect runs inside the same transaction
//! as the status write, so a crash can never leave a committed transition
//! with half its effects. Financial effects are additionally guarded by the
//! effect ledger, keyed on (entity id, target status), so a replayed rule
//! credits at most once.

use crate::error::WorkflowError;
use crate::model::{
    Application, Balance, Campaign, Conversation, EffectRecord, Message, Submission, TimeStamp,
};
use crate::status::{self, EntityKind, Status};
use crate::store;
use chrono::Utc;
use sled::transaction::{ConflictableTransactionResult, TransactionalTree};
use std::fmt;
use std::str::FromStr;
use tracing::warn;
use uuid7::uuid7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectKind {
    /// Create the application's conversation if it does not exist yet.
    EnsureConversation,
    /// Move the agreed amount into pending + total earnings.
    EscrowBudget,
    /// Reverse a previous escrow (e.g. withdrawal after approval).
    VoidEscrow,
    /// Release the agreed amount from pending into available.
    CreditBalance,
    /// Drop a system message into the conversation.
    PostNotice,
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EffectKind::EnsureConversation => "ensure_conversation",
            EffectKind::EscrowBudget => "escrow_budget",
            EffectKind::VoidEscrow => "void_escrow",
            EffectKind::CreditBalance => "credit_balance",
            EffectKind::PostNotice => "post_notice",
        };
        f.write_str(name)
    }
}

impl FromStr for EffectKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ensure_conversation" => Ok(EffectKind::EnsureConversation),
            "escrow_budget" => Ok(EffectKind::EscrowBudget),
            "void_escrow" => Ok(EffectKind::VoidEscrow),
            "credit_balance" => Ok(EffectKind::CreditBalance),
            "post_notice" => Ok(EffectKind::PostNotice),
            other => anyhow::bail!("unknown effect '{other}'"),
        }
    }
}

/// One row of the effect mapping. `from: None` matches any source status.
#[derive(Debug, Clone)]
pub struct EffectRule {
    pub kind: EntityKind,
    pub from: Option<Status>,
    pub to: Status,
    pub effects: Vec<EffectKind>,
}

#[derive(Debug, Clone)]
pub struct EffectTable {
    rules: Vec<EffectRule>,
}

impl EffectTable {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add(
        &mut self,
        kind: EntityKind,
        from: Option<&str>,
        to: &str,
        effects: &[EffectKind],
    ) {
        self.rules.push(EffectRule {
            kind,
            from: from.map(Status::from),
            to: Status::from(to),
            effects: effects.to_vec(),
        });
    }

    pub fn matching(&self, kind: EntityKind, from: &Status, to: &Status) -> Vec<EffectKind> {
        self.rules
            .iter()
            .filter(|rule| {
                rule.kind == kind
                    && rule.to == *to
                    && rule.from.as_ref().is_none_or(|f| f == from)
            })
            .flat_map(|rule| rule.effects.iter().copied())
            .collect()
    }
}

impl Default for EffectTable {
    fn default() -> Self {
        use EffectKind::*;

        let mut table = Self::new();

        table.add(
            EntityKind::Application,
            None,
            status::APPROVED,
            &[EnsureConversation, EscrowBudget],
        );
        table.add(
            EntityKind::Application,
            Some(status::APPROVED),
            status::WITHDRAWN,
            &[VoidEscrow],
        );

        table.add(
            EntityKind::Submission,
            None,
            status::APPROVED,
            &[CreditBalance, PostNotice],
        );
        table.add(
            EntityKind::Submission,
            None,
            status::AUTO_APPROVED,
            &[CreditBalance, PostNotice],
        );
        table.add(
            EntityKind::Submission,
            None,
            status::REVISION_REQUESTED,
            &[PostNotice],
        );
        table.add(
            EntityKind::Submission,
            None,
            status::REJECTED,
            &[PostNotice],
        );

        table
    }
}

/// Everything an effect may need; the submission is present only for
/// submission transitions.
pub struct EffectCtx<'a> {
    pub application: &'a Application,
    pub campaign: &'a Campaign,
    pub submission: Option<&'a Submission>,
    pub to: &'a Status,
    pub notes: Option<&'a str>,
    pub now: &'a TimeStamp<Utc>,
}

pub(crate) fn apply(
    tx: &TransactionalTree,
    effects: &[EffectKind],
    ctx: &EffectCtx<'_>,
) -> ConflictableTransactionResult<(), WorkflowError> {
    for effect in effects {
        match effect {
            EffectKind::EnsureConversation => {
                ensure_conversation(tx, ctx.application, ctx.campaign, ctx.now)?;
            }
            EffectKind::EscrowBudget => escrow_budget(tx, ctx)?,
            EffectKind::VoidEscrow => void_escrow(tx, ctx)?,
            EffectKind::CreditBalance => credit_balance(tx, ctx)?,
            EffectKind::PostNotice => post_notice(tx, ctx)?,
        }
    }
    Ok(())
}

/// Idempotent: the conversation key derives from the application id. Also
/// reached from the messaging verbs, which create the conversation lazily.
pub(crate) fn ensure_conversation(
    tx: &TransactionalTree,
    application: &Application,
    campaign: &Campaign,
    now: &TimeStamp<Utc>,
) -> ConflictableTransactionResult<String, WorkflowError> {
    let key = store::conversation_key(&application.id);
    if tx.get(key.as_bytes())?.is_none() {
        let conversation = Conversation {
            id: key.clone(),
            application_id: application.id.clone(),
            business_id: campaign.owner_id.clone(),
            influencer_id: application.influencer_id.clone(),
            created_at: now.clone(),
        };
        tx.insert(
            key.as_bytes(),
            store::enc(&conversation).map_err(store::abort)?,
        )?;
    }
    Ok(key)
}

fn escrow_budget(
    tx: &TransactionalTree,
    ctx: &EffectCtx<'_>,
) -> ConflictableTransactionResult<(), WorkflowError> {
    if !ledger_first(tx, &ctx.application.id, ctx.to, ctx.now)? {
        return Ok(());
    }

    let amount = ctx.application.agreed_amount;
    let application_id = ctx.application.id.clone();
    update_balance(tx, &ctx.application.influencer_id, move |mut balance| {
        balance.pending = balance.pending.checked_add(amount).ok_or_else(|| {
            WorkflowError::SideEffect(format!("pending overflow escrowing {application_id}"))
        })?;
        balance.total_earnings = balance.total_earnings.checked_add(amount).ok_or_else(|| {
            WorkflowError::SideEffect(format!("total overflow escrowing {application_id}"))
        })?;
        Ok(balance)
    })?;
    Ok(())
}

fn void_escrow(
    tx: &TransactionalTree,
    ctx: &EffectCtx<'_>,
) -> ConflictableTransactionResult<(), WorkflowError> {
    if !ledger_first(tx, &ctx.application.id, ctx.to, ctx.now)? {
        return Ok(());
    }

    let amount = ctx.application.agreed_amount;
    let application_id = ctx.application.id.clone();
    update_balance(tx, &ctx.application.influencer_id, move |mut balance| {
        let fail = || {
            warn!(application = %application_id, amount, "escrow to void exceeds pending balance");
            WorkflowError::SideEffect(format!(
                "escrow to void for {application_id} exceeds pending balance"
            ))
        };
        balance.pending = balance.pending.checked_sub(amount).ok_or_else(fail)?;
        balance.total_earnings = balance.total_earnings.checked_sub(amount).ok_or_else(fail)?;
        Ok(balance)
    })?;
    Ok(())
}

/// The mandatory at-most-one financial credit per submission lives here: the
/// ledger row is written in the same transaction as the credit itself.
fn credit_balance(
    tx: &TransactionalTree,
    ctx: &EffectCtx<'_>,
) -> ConflictableTransactionResult<(), WorkflowError> {
    let Some(submission) = ctx.submission else {
        return Err(store::abort(WorkflowError::SideEffect(
            "credit effect outside a submission transition".to_string(),
        )));
    };

    if !ledger_first(tx, &submission.id, ctx.to, ctx.now)? {
        return Ok(());
    }

    let amount = ctx.application.agreed_amount;
    let submission_id = submission.id.clone();
    update_balance(tx, &ctx.application.influencer_id, move |mut balance| {
        balance.pending = balance.pending.checked_sub(amount).ok_or_else(|| {
            warn!(submission = %submission_id, amount, "release exceeds pending balance");
            WorkflowError::SideEffect(format!(
                "release for {submission_id} exceeds pending balance"
            ))
        })?;
        balance.available = balance.available.checked_add(amount).ok_or_else(|| {
            WorkflowError::SideEffect(format!("available overflow releasing {submission_id}"))
        })?;
        Ok(balance)
    })?;
    Ok(())
}

fn post_notice(
    tx: &TransactionalTree,
    ctx: &EffectCtx<'_>,
) -> ConflictableTransactionResult<(), WorkflowError> {
    let conversation_id = ensure_conversation(tx, ctx.application, ctx.campaign, ctx.now)?;

    let body = match ctx.notes {
        Some(notes) => notes.to_string(),
        None => match ctx.submission {
            Some(submission) => format!("submission {} moved to {}", submission.id, ctx.to),
            None => format!("application {} moved to {}", ctx.application.id, ctx.to),
        },
    };

    let message = Message {
        id: uuid7().to_string(),
        conversation_id: conversation_id.clone(),
        sender_id: "system".to_string(),
        body,
        created_at: ctx.now.clone(),
    };
    tx.insert(
        store::message_key(&conversation_id, &message.id).as_bytes(),
        store::enc(&message).map_err(store::abort)?,
    )?;
    Ok(())
}

/// Returns true exactly once per (entity, target status); later invocations
/// see the ledger row and skip.
fn ledger_first(
    tx: &TransactionalTree,
    entity_id: &str,
    to: &Status,
    now: &TimeStamp<Utc>,
) -> ConflictableTransactionResult<bool, WorkflowError> {
    let key = store::effect_key(entity_id, to);
    if tx.get(key.as_bytes())?.is_some() {
        return Ok(false);
    }

    let record = EffectRecord {
        entity_id: entity_id.to_string(),
        status: to.clone(),
        applied_at: now.clone(),
    };
    tx.insert(key.as_bytes(), store::enc(&record).map_err(store::abort)?)?;
    Ok(true)
}

pub(crate) fn update_balance<F>(
    tx: &TransactionalTree,
    influencer_id: &str,
    f: F,
) -> ConflictableTransactionResult<Balance, WorkflowError>
where
    F: FnOnce(Balance) -> Result<Balance, WorkflowError>,
{
    let key = store::balance_key(influencer_id);
    let balance = match tx.get(key.as_bytes())? {
        Some(bytes) => store::dec(&bytes).map_err(store::abort)?,
        None => Balance::empty(influencer_id),
    };

    let updated = f(balance).map_err(store::abort)?;
    tx.insert(key.as_bytes(), store::enc(&updated).map_err(store::abort)?)?;
    Ok(updated)
}
