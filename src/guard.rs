//! Authorization guard
//!
//! One pure decision point for every verb. Handlers never check roles or
//! ownership themselves; they describe the action and ask. Failure is always
//! a [`Deny`] with a machine-readable reason, never a silent pass.

use crate::actor::{Actor, Role};
use crate::error::Deny;
use crate::model::{Application, Campaign};
use crate::status::{self, Status};

#[derive(Debug)]
pub enum Action<'a> {
    CreateCampaign,
    /// Influencer asks to apply to a campaign.
    Apply {
        campaign: &'a Campaign,
        already_applied: bool,
    },
    TransitionCampaign {
        campaign: &'a Campaign,
        roles: &'a [Role],
    },
    TransitionApplication {
        application: &'a Application,
        campaign: &'a Campaign,
        roles: &'a [Role],
    },
    TransitionSubmission {
        application: &'a Application,
        campaign: &'a Campaign,
        roles: &'a [Role],
    },
    /// Influencer creates a submission against their approved application.
    SubmitContent {
        application: &'a Application,
    },
    ViewCampaign {
        campaign: &'a Campaign,
    },
    ViewApplication {
        application: &'a Application,
        campaign: &'a Campaign,
    },
    ViewBalance {
        influencer_id: &'a str,
    },
    AdjustBalance,
}

/// Resolve an action against the caller's role and ownership relations.
pub fn authorize(actor: Option<&Actor>, action: &Action) -> Result<(), Deny> {
    let Some(actor) = actor else {
        return Err(Deny::Unauthenticated);
    };

    match action {
        Action::CreateCampaign => match actor.role {
            Role::Business | Role::Admin => Ok(()),
            _ => Err(Deny::WrongRole),
        },

        Action::Apply {
            campaign,
            already_applied,
        } => {
            if actor.role != Role::Influencer {
                return Err(Deny::WrongRole);
            }
            if campaign.status != Status::from(status::ACTIVE) {
                return Err(Deny::InvalidState);
            }
            if *already_applied {
                return Err(Deny::AlreadyExists);
            }
            Ok(())
        }

        Action::TransitionCampaign { campaign, roles } => {
            require_role(actor, roles)?;
            if actor.role == Role::Business && campaign.owner_id != actor.id {
                return Err(Deny::NotOwner);
            }
            Ok(())
        }

        Action::TransitionApplication {
            application,
            campaign,
            roles,
        }
        | Action::TransitionSubmission {
            application,
            campaign,
            roles,
        } => {
            require_role(actor, roles)?;
            match actor.role {
                Role::Business if campaign.owner_id != actor.id => Err(Deny::NotOwner),
                Role::Influencer if application.influencer_id != actor.id => Err(Deny::NotOwner),
                _ => Ok(()),
            }
        }

        Action::SubmitContent { application } => {
            if actor.role != Role::Influencer {
                return Err(Deny::WrongRole);
            }
            if application.influencer_id != actor.id {
                return Err(Deny::NotOwner);
            }
            if application.status != Status::from(status::APPROVED) {
                return Err(Deny::InvalidState);
            }
            Ok(())
        }

        Action::ViewCampaign { campaign } => {
            if actor.is_admin() || campaign.owner_id == actor.id {
                Ok(())
            } else {
                Err(Deny::NotOwner)
            }
        }

        Action::ViewApplication {
            application,
            campaign,
        } => {
            if actor.is_admin()
                || campaign.owner_id == actor.id
                || application.influencer_id == actor.id
            {
                Ok(())
            } else {
                Err(Deny::NotOwner)
            }
        }

        Action::ViewBalance { influencer_id } => {
            if actor.is_admin() || actor.id == *influencer_id {
                Ok(())
            } else {
                Err(Deny::NotOwner)
            }
        }

        Action::AdjustBalance => {
            if actor.is_admin() {
                Ok(())
            } else {
                Err(Deny::WrongRole)
            }
        }
    }
}

fn require_role(actor: &Actor, roles: &[Role]) -> Result<(), Deny> {
    if roles.contains(&actor.role) {
        Ok(())
    } else {
        Err(Deny::WrongRole)
    }
}
