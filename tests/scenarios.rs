//! End-to-end workflow scenarios driven through the service verbs only.

use anyhow::Context;
use campaign_workflow::actor::{Actor, Role};
use campaign_workflow::config::WorkflowConfig;
use campaign_workflow::error::{Deny, WorkflowError};
use campaign_workflow::model::{Campaign, CampaignDraft, TimeStamp};
use campaign_workflow::service::WorkflowService;
use campaign_workflow::status::{self, Status};
use campaign_workflow::utils;
use sled::open;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::{tempdir, TempDir};

// Sled uses file-based locking to prevent concurrent access, so every test
// gets its own database in a temp dir for simplified cleanup.
fn new_service(db_name: &str) -> anyhow::Result<(TempDir, WorkflowService)> {
    let temp_dir = tempdir()?;
    let db = open(temp_dir.path().join(db_name))?;
    let db = Arc::new(db);

    // reset the db for each test run
    db.clear()?;

    let service = WorkflowService::new(db, WorkflowConfig::default());
    Ok((temp_dir, service))
}

fn business_actor() -> anyhow::Result<Actor> {
    Ok(Actor::new(utils::new_uuid_to_bech32("user_")?, Role::Business))
}

fn influencer_actor() -> anyhow::Result<Actor> {
    Ok(Actor::new(
        utils::new_uuid_to_bech32("user_")?,
        Role::Influencer,
    ))
}

fn launch_campaign(
    service: &WorkflowService,
    business: &Actor,
    budget: u64,
) -> anyhow::Result<Campaign> {
    let campaign = service.create_campaign(
        business,
        CampaignDraft::new()
            .title("spring launch")
            .brief("two short-form videos")
            .budget(budget),
    )?;
    let campaign =
        service.transition_campaign(business, &campaign.id, &Status::from(status::ACTIVE))?;
    Ok(campaign)
}

#[test]
fn apply_then_approve_creates_conversation_and_escrow() -> anyhow::Result<()> {
    let (_tmp, service) = new_service("apply_then_approve.db")?;
    let business = business_actor()?;
    let influencer = influencer_actor()?;
    let campaign = launch_campaign(&service, &business, 25_000)?;

    let application = service
        .apply(&influencer, &campaign.id, Some("pick me".to_string()))
        .context("Application failed on apply: ")?;
    assert_eq!(application.status, Status::from(status::PENDING));
    assert_eq!(application.agreed_amount, 25_000);

    // no conversation yet, nobody has talked
    assert!(service.conversation(&business, &application.id)?.is_none());

    let application = service
        .transition_application(
            &business,
            &application.id,
            &Status::from(status::APPROVED),
            None,
        )
        .context("Application failed on approval: ")?;
    assert_eq!(application.status, Status::from(status::APPROVED));

    // approval opened the conversation and escrowed the agreed amount
    let conversation = service
        .conversation(&business, &application.id)?
        .expect("approval should create the conversation");
    assert_eq!(conversation.business_id, business.id);
    assert_eq!(conversation.influencer_id, influencer.id);

    let balance = service.balance_of(&influencer, &influencer.id)?;
    assert_eq!(balance.pending, 25_000);
    assert_eq!(balance.available, 0);
    assert_eq!(balance.total_earnings, balance.available + balance.pending);

    Ok(())
}

#[test]
fn second_apply_for_same_pair_is_rejected() -> anyhow::Result<()> {
    let (_tmp, service) = new_service("second_apply.db")?;
    let business = business_actor()?;
    let influencer = influencer_actor()?;
    let campaign = launch_campaign(&service, &business, 10_000)?;

    service.apply(&influencer, &campaign.id, None)?;
    let second = service.apply(&influencer, &campaign.id, None);

    assert!(matches!(
        second,
        Err(WorkflowError::Forbidden(Deny::AlreadyExists))
    ));
    assert_eq!(
        service
            .list_applications(&business, Some(&campaign.id), None)?
            .len(),
        1
    );

    Ok(())
}

#[test]
fn apply_requires_an_active_campaign() -> anyhow::Result<()> {
    let (_tmp, service) = new_service("apply_inactive.db")?;
    let business = business_actor()?;
    let influencer = influencer_actor()?;

    // still a draft
    let campaign = service.create_campaign(
        &business,
        CampaignDraft::new().title("not yet live").budget(5_000),
    )?;

    let result = service.apply(&influencer, &campaign.id, None);
    assert!(matches!(
        result,
        Err(WorkflowError::Forbidden(Deny::InvalidState))
    ));

    Ok(())
}

#[test]
fn influencer_cannot_approve_own_application() -> anyhow::Result<()> {
    let (_tmp, service) = new_service("wrong_role.db")?;
    let business = business_actor()?;
    let influencer = influencer_actor()?;
    let campaign = launch_campaign(&service, &business, 10_000)?;

    let application = service.apply(&influencer, &campaign.id, None)?;
    let result = service.transition_application(
        &influencer,
        &application.id,
        &Status::from(status::APPROVED),
        None,
    );

    assert!(matches!(
        result,
        Err(WorkflowError::Forbidden(Deny::WrongRole))
    ));

    Ok(())
}

#[test]
fn invalid_transition_leaves_entity_unchanged() -> anyhow::Result<()> {
    let (_tmp, service) = new_service("invalid_transition.db")?;
    let business = business_actor()?;
    let influencer = influencer_actor()?;
    let campaign = launch_campaign(&service, &business, 10_000)?;

    let application = service.apply(&influencer, &campaign.id, None)?;

    // pending -> completed is not in the table
    let result = service.transition_application(
        &business,
        &application.id,
        &Status::from(status::COMPLETED),
        None,
    );
    assert!(matches!(result, Err(WorkflowError::InvalidState { .. })));

    let unchanged = service.get_application(&business, &application.id)?;
    assert_eq!(unchanged.status, Status::from(status::PENDING));
    assert_eq!(unchanged.version, application.version);

    Ok(())
}

#[test]
fn terminal_status_rejects_every_transition() -> anyhow::Result<()> {
    let (_tmp, service) = new_service("terminal_status.db")?;
    let business = business_actor()?;
    let influencer = influencer_actor()?;
    let campaign = launch_campaign(&service, &business, 10_000)?;

    let application = service.apply(&influencer, &campaign.id, None)?;
    service.transition_application(
        &business,
        &application.id,
        &Status::from(status::REJECTED),
        Some("not a fit".to_string()),
    )?;

    let result = service.transition_application(
        &business,
        &application.id,
        &Status::from(status::APPROVED),
        None,
    );
    assert!(matches!(result, Err(WorkflowError::InvalidState { .. })));

    Ok(())
}

#[test]
fn repeating_a_transition_is_an_idempotent_no_op() -> anyhow::Result<()> {
    let (_tmp, service) = new_service("idempotent_noop.db")?;
    let business = business_actor()?;
    let influencer = influencer_actor()?;
    let campaign = launch_campaign(&service, &business, 25_000)?;

    let application = service.apply(&influencer, &campaign.id, None)?;
    let approved = service.transition_application(
        &business,
        &application.id,
        &Status::from(status::APPROVED),
        None,
    )?;

    // same request again: success, nothing moves, no second escrow
    let again = service.transition_application(
        &business,
        &application.id,
        &Status::from(status::APPROVED),
        None,
    )?;
    assert_eq!(again.version, approved.version);
    assert_eq!(again.reviewed_at, approved.reviewed_at);

    let balance = service.balance_of(&influencer, &influencer.id)?;
    assert_eq!(balance.pending, 25_000);
    assert_eq!(balance.total_earnings, 25_000);

    Ok(())
}

#[test]
fn submission_approval_releases_payment_exactly_once() -> anyhow::Result<()> {
    let (_tmp, service) = new_service("submission_approval.db")?;
    let business = business_actor()?;
    let influencer = influencer_actor()?;
    let campaign = launch_campaign(&service, &business, 40_000)?;

    let application = service.apply(&influencer, &campaign.id, None)?;
    service.transition_application(
        &business,
        &application.id,
        &Status::from(status::APPROVED),
        None,
    )?;

    let submission = service.submit_content(
        &influencer,
        &application.id,
        vec!["https://example.com/post/1".to_string()],
        None,
    )?;
    assert_eq!(submission.status, Status::from(status::SUBMITTED));

    let submission = service.transition_submission(
        &business,
        &submission.id,
        &Status::from(status::APPROVED),
        None,
    )?;
    assert_eq!(submission.status, Status::from(status::APPROVED));

    let balance = service.balance_of(&influencer, &influencer.id)?;
    assert_eq!(balance.available, 40_000);
    assert_eq!(balance.pending, 0);
    assert_eq!(balance.total_earnings, 40_000);

    // retried approval is a no-op and must not credit twice
    service.transition_submission(
        &business,
        &submission.id,
        &Status::from(status::APPROVED),
        None,
    )?;
    let balance = service.balance_of(&influencer, &influencer.id)?;
    assert_eq!(balance.available, 40_000);
    assert_eq!(balance.total_earnings, 40_000);

    Ok(())
}

#[test]
fn revision_request_posts_notice_and_resubmit_replaces_content() -> anyhow::Result<()> {
    let (_tmp, service) = new_service("revision_flow.db")?;
    let business = business_actor()?;
    let influencer = influencer_actor()?;
    let campaign = launch_campaign(&service, &business, 15_000)?;

    let application = service.apply(&influencer, &campaign.id, None)?;
    service.transition_application(
        &business,
        &application.id,
        &Status::from(status::APPROVED),
        None,
    )?;

    let submission = service.submit_content(
        &influencer,
        &application.id,
        vec!["https://example.com/draft".to_string()],
        None,
    )?;

    let submission = service.transition_submission(
        &business,
        &submission.id,
        &Status::from(status::REVISION_REQUESTED),
        Some("please trim the intro".to_string()),
    )?;
    assert_eq!(
        submission.review_notes.as_deref(),
        Some("please trim the intro")
    );

    // the revision note landed in the conversation, no balance movement
    let messages = service.list_messages(&influencer, &application.id)?;
    assert!(messages.iter().any(|m| m.body == "please trim the intro"));
    let balance = service.balance_of(&influencer, &influencer.id)?;
    assert_eq!(balance.available, 0);

    let resubmitted = service.resubmit(
        &influencer,
        &submission.id,
        vec!["https://example.com/final".to_string()],
    )?;
    assert_eq!(resubmitted.status, Status::from(status::SUBMITTED));
    assert_eq!(resubmitted.content, vec!["https://example.com/final"]);
    assert!(resubmitted.reviewed_at.is_none());

    service.transition_submission(
        &business,
        &resubmitted.id,
        &Status::from(status::APPROVED),
        None,
    )?;
    let balance = service.balance_of(&influencer, &influencer.id)?;
    assert_eq!(balance.available, 15_000);
    assert_eq!(balance.total_earnings, 15_000);

    Ok(())
}

#[test]
fn withdrawal_after_approval_voids_the_escrow() -> anyhow::Result<()> {
    let (_tmp, service) = new_service("withdraw_voids_escrow.db")?;
    let business = business_actor()?;
    let influencer = influencer_actor()?;
    let campaign = launch_campaign(&service, &business, 30_000)?;

    let application = service.apply(&influencer, &campaign.id, None)?;
    service.transition_application(
        &business,
        &application.id,
        &Status::from(status::APPROVED),
        None,
    )?;
    assert_eq!(
        service.balance_of(&influencer, &influencer.id)?.pending,
        30_000
    );

    service.transition_application(
        &influencer,
        &application.id,
        &Status::from(status::WITHDRAWN),
        None,
    )?;

    let balance = service.balance_of(&influencer, &influencer.id)?;
    assert_eq!(balance.pending, 0);
    assert_eq!(balance.total_earnings, 0);

    Ok(())
}

#[test]
fn racing_transitions_produce_exactly_one_winner() -> anyhow::Result<()> {
    let (_tmp, service) = new_service("racing_transitions.db")?;
    let business = business_actor()?;
    let influencer = influencer_actor()?;
    let campaign = launch_campaign(&service, &business, 10_000)?;

    let application = service.apply(&influencer, &campaign.id, None)?;

    let service = Arc::new(service);
    let barrier = Arc::new(Barrier::new(2));
    let mut handles = Vec::new();
    for target in [status::APPROVED, status::REJECTED] {
        let service = Arc::clone(&service);
        let barrier = Arc::clone(&barrier);
        let business = business.clone();
        let application_id = application.id.clone();
        handles.push(thread::spawn(move || {
            barrier.wait();
            service.transition_application(
                &business,
                &application_id,
                &Status::from(target),
                None,
            )
        }));
    }

    let results: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("transition thread panicked"))
        .collect();

    let winners = results.iter().filter(|result| result.is_ok()).count();
    assert_eq!(winners, 1, "exactly one concurrent transition must commit");

    for result in results {
        if let Err(e) = result {
            // the loser either lost the version race or read the winner's
            // committed state first
            assert!(
                matches!(
                    e,
                    WorkflowError::Conflict | WorkflowError::InvalidState { .. }
                ),
                "unexpected race failure: {e}"
            );
        }
    }

    Ok(())
}

#[test]
fn auto_approve_sweep_credits_exactly_once() -> anyhow::Result<()> {
    let (_tmp, service) = new_service("auto_approve_sweep.db")?;
    let business = business_actor()?;
    let influencer = influencer_actor()?;
    let campaign = launch_campaign(&service, &business, 20_000)?;

    let application = service.apply(&influencer, &campaign.id, None)?;
    service.transition_application(
        &business,
        &application.id,
        &Status::from(status::APPROVED),
        None,
    )?;

    let overdue = TimeStamp::new_with(2020, 1, 1, 0, 0, 0);
    service.submit_content(
        &influencer,
        &application.id,
        vec!["https://example.com/post".to_string()],
        Some(overdue),
    )?;

    let now = TimeStamp::new();
    let swept = service.auto_approve_due(&now)?;
    assert_eq!(swept.len(), 1);
    assert_eq!(swept[0].status, Status::from(status::AUTO_APPROVED));

    let balance = service.balance_of(&influencer, &influencer.id)?;
    assert_eq!(balance.available, 20_000);
    assert_eq!(balance.pending, 0);

    // the second sweep finds nothing left to do
    let swept = service.auto_approve_due(&now)?;
    assert!(swept.is_empty());
    let balance = service.balance_of(&influencer, &influencer.id)?;
    assert_eq!(balance.available, 20_000);

    Ok(())
}

#[test]
fn list_and_view_are_authorization_filtered() -> anyhow::Result<()> {
    let (_tmp, service) = new_service("view_filtering.db")?;
    let business = business_actor()?;
    let influencer = influencer_actor()?;
    let rival = influencer_actor()?;
    let campaign = launch_campaign(&service, &business, 10_000)?;

    let application = service.apply(&influencer, &campaign.id, None)?;

    assert_eq!(service.list_applications(&business, None, None)?.len(), 1);
    assert_eq!(service.list_applications(&influencer, None, None)?.len(), 1);
    assert!(service.list_applications(&rival, None, None)?.is_empty());

    let result = service.get_application(&rival, &application.id);
    assert!(matches!(
        result,
        Err(WorkflowError::Forbidden(Deny::NotOwner))
    ));

    Ok(())
}

#[test]
fn balance_adjustments_require_admin() -> anyhow::Result<()> {
    let (_tmp, service) = new_service("admin_balance.db")?;
    let business = business_actor()?;
    let influencer = influencer_actor()?;
    let admin = Actor::new(utils::new_uuid_to_bech32("user_")?, Role::Admin);

    let result = service.admin_credit(&business, &influencer.id, 5_000);
    assert!(matches!(
        result,
        Err(WorkflowError::Forbidden(Deny::WrongRole))
    ));

    let balance = service.admin_credit(&admin, &influencer.id, 10_000)?;
    assert_eq!(balance.available, 10_000);
    assert_eq!(balance.total_earnings, 10_000);

    let balance = service.admin_debit(&admin, &influencer.id, 4_000)?;
    assert_eq!(balance.available, 6_000);
    assert_eq!(balance.total_earnings, 6_000);

    // draining past zero is refused, not wrapped
    let result = service.admin_debit(&admin, &influencer.id, 10_000);
    assert!(matches!(result, Err(WorkflowError::SideEffect(_))));

    Ok(())
}

#[test]
fn messages_are_ordered_and_conversation_is_lazy() -> anyhow::Result<()> {
    let (_tmp, service) = new_service("messages.db")?;
    let business = business_actor()?;
    let influencer = influencer_actor()?;
    let campaign = launch_campaign(&service, &business, 10_000)?;

    let application = service.apply(&influencer, &campaign.id, None)?;
    assert!(service.conversation(&business, &application.id)?.is_none());

    service.send_message(&business, &application.id, "hi, love the pitch".to_string())?;
    service.send_message(&influencer, &application.id, "thanks!".to_string())?;
    service.send_message(&business, &application.id, "let's talk rates".to_string())?;

    let messages = service.list_messages(&influencer, &application.id)?;
    let bodies: Vec<_> = messages.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(
        bodies,
        vec!["hi, love the pitch", "thanks!", "let's talk rates"]
    );

    let result = service.send_message(&business_actor()?, &application.id, "me too".to_string());
    assert!(matches!(
        result,
        Err(WorkflowError::Forbidden(Deny::NotOwner))
    ));

    Ok(())
}

#[test]
fn view_counter_survives_concurrent_bumps() -> anyhow::Result<()> {
    let (_tmp, service) = new_service("view_counter.db")?;
    let business = business_actor()?;
    let campaign = launch_campaign(&service, &business, 10_000)?;

    let service = Arc::new(service);
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let service = Arc::clone(&service);
            let campaign_id = campaign.id.clone();
            thread::spawn(move || {
                for _ in 0..25 {
                    service.record_view(&campaign_id).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("view thread panicked");
    }

    assert_eq!(service.views(&campaign.id)?, 100);

    service.favorite(&campaign.id)?;
    service.favorite(&campaign.id)?;
    service.unfavorite(&campaign.id)?;
    assert_eq!(service.favorites(&campaign.id)?, 1);

    Ok(())
}

#[test]
fn effect_ledger_blocks_double_credit_under_custom_rules() -> anyhow::Result<()> {
    // A rule set that (unwisely) lets an approved submission re-enter review.
    // Even then, the effect ledger must keep the credit at exactly once.
    let rules = r#"{
        "transitions": [
            {"entity": "campaign", "from": "draft", "to": "active", "roles": ["business", "admin"]},
            {"entity": "application", "from": "pending", "to": "approved", "roles": ["business", "admin"]},
            {"entity": "submission", "from": "submitted", "to": "approved", "roles": ["business", "admin"]},
            {"entity": "submission", "from": "approved", "to": "revision_requested", "roles": ["business", "admin"]},
            {"entity": "submission", "from": "revision_requested", "to": "submitted", "roles": ["influencer", "admin"]}
        ],
        "effects": [
            {"entity": "application", "to": "approved", "effects": ["ensure_conversation", "escrow_budget"]},
            {"entity": "submission", "to": "approved", "effects": ["credit_balance"]}
        ]
    }"#;

    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("ledger_once.db"))?);
    db.clear()?;
    let service = WorkflowService::new(db, WorkflowConfig::from_json(rules)?);

    let business = business_actor()?;
    let influencer = influencer_actor()?;
    let campaign = launch_campaign(&service, &business, 12_000)?;

    let application = service.apply(&influencer, &campaign.id, None)?;
    service.transition_application(
        &business,
        &application.id,
        &Status::from(status::APPROVED),
        None,
    )?;

    let submission = service.submit_content(
        &influencer,
        &application.id,
        vec!["https://example.com/v1".to_string()],
        None,
    )?;
    service.transition_submission(
        &business,
        &submission.id,
        &Status::from(status::APPROVED),
        None,
    )?;
    assert_eq!(
        service.balance_of(&influencer, &influencer.id)?.available,
        12_000
    );

    // loop the submission back around and approve it a second time
    service.transition_submission(
        &business,
        &submission.id,
        &Status::from(status::REVISION_REQUESTED),
        None,
    )?;
    service.resubmit(
        &influencer,
        &submission.id,
        vec!["https://example.com/v2".to_string()],
    )?;
    service.transition_submission(
        &business,
        &submission.id,
        &Status::from(status::APPROVED),
        None,
    )?;

    let balance = service.balance_of(&influencer, &influencer.id)?;
    assert_eq!(balance.available, 12_000, "credit must apply exactly once");
    assert_eq!(balance.total_earnings, 12_000);

    Ok(())
}
