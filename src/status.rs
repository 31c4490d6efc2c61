//! Status vocabulary and the transition table
//!
//! Statuses are open strings, not a compiled enum: the set has grown over the
//! life of the product and must keep growing through configuration alone. The
//! well-known names below are constants; the table is the single source of
//! truth for which moves are legal and which roles may request them.

use crate::actor::Role;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

// campaign lifecycle
pub const DRAFT: &str = "draft";
pub const ACTIVE: &str = "active";
pub const CLOSED: &str = "closed";

// application lifecycle
pub const PENDING: &str = "pending";
pub const IN_REVIEW: &str = "in_review";
pub const APPROVED: &str = "approved";
pub const REJECTED: &str = "rejected";
pub const REVISION_REQUESTED: &str = "revision_requested";
pub const COMPLETED: &str = "completed";
pub const WITHDRAWN: &str = "withdrawn";

// submission lifecycle
pub const SUBMITTED: &str = "submitted";
pub const AUTO_APPROVED: &str = "auto_approved";

/// A workflow status. Plain string under the hood so that new statuses are a
/// configuration change, not a redeploy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Status(String);

impl Status {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Status {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<C> minicbor::Encode<C> for Status {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.str(&self.0)?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for Status {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        Ok(Status(d.str()?.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Campaign,
    Application,
    Submission,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Campaign => "campaign",
            EntityKind::Application => "application",
            EntityKind::Submission => "submission",
        };
        f.write_str(name)
    }
}

impl FromStr for EntityKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "campaign" => Ok(EntityKind::Campaign),
            "application" => Ok(EntityKind::Application),
            "submission" => Ok(EntityKind::Submission),
            other => anyhow::bail!("unknown entity kind '{other}'"),
        }
    }
}

/// One legal move out of a status, with the roles allowed to request it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRule {
    pub to: Status,
    pub roles: Vec<Role>,
}

/// The authoritative mapping of legal next-statuses per current status, per
/// entity kind. A status with no outgoing rules is terminal.
#[derive(Debug, Clone)]
pub struct TransitionTable {
    rules: HashMap<EntityKind, HashMap<Status, Vec<TransitionRule>>>,
}

impl TransitionTable {
    pub fn new() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    pub fn allow(&mut self, kind: EntityKind, from: &str, to: &str, roles: &[Role]) {
        self.rules
            .entry(kind)
            .or_default()
            .entry(Status::from(from))
            .or_default()
            .push(TransitionRule {
                to: Status::from(to),
                roles: roles.to_vec(),
            });
    }

    pub fn rules(&self, kind: EntityKind, from: &Status) -> &[TransitionRule] {
        self.rules
            .get(&kind)
            .and_then(|per_status| per_status.get(from))
            .map(|rules| rules.as_slice())
            .unwrap_or(&[])
    }

    pub fn rule(&self, kind: EntityKind, from: &Status, to: &Status) -> Option<&TransitionRule> {
        self.rules(kind, from).iter().find(|rule| rule.to == *to)
    }

    /// A status is known if any rule names it as a source or a target.
    pub fn is_known(&self, kind: EntityKind, status: &Status) -> bool {
        let Some(per_status) = self.rules.get(&kind) else {
            return false;
        };
        per_status.contains_key(status)
            || per_status
                .values()
                .flatten()
                .any(|rule| rule.to == *status)
    }

    /// Terminal means the status exists in the table but nothing leads out.
    pub fn is_terminal(&self, kind: EntityKind, status: &Status) -> bool {
        self.is_known(kind, status) && self.rules(kind, status).is_empty()
    }
}

impl Default for TransitionTable {
    fn default() -> Self {
        use Role::{Admin, Business, Influencer, System};

        let mut table = Self::new();

        table.allow(EntityKind::Campaign, DRAFT, ACTIVE, &[Business, Admin]);
        table.allow(EntityKind::Campaign, DRAFT, CLOSED, &[Business, Admin]);
        table.allow(EntityKind::Campaign, ACTIVE, CLOSED, &[Business, Admin]);

        table.allow(
            EntityKind::Application,
            PENDING,
            IN_REVIEW,
            &[Business, Admin],
        );
        table.allow(
            EntityKind::Application,
            PENDING,
            APPROVED,
            &[Business, Admin],
        );
        table.allow(
            EntityKind::Application,
            PENDING,
            REJECTED,
            &[Business, Admin],
        );
        table.allow(
            EntityKind::Application,
            PENDING,
            WITHDRAWN,
            &[Influencer, Admin],
        );
        table.allow(
            EntityKind::Application,
            IN_REVIEW,
            APPROVED,
            &[Business, Admin],
        );
        table.allow(
            EntityKind::Application,
            IN_REVIEW,
            REJECTED,
            &[Business, Admin],
        );
        table.allow(
            EntityKind::Application,
            IN_REVIEW,
            REVISION_REQUESTED,
            &[Business, Admin],
        );
        table.allow(
            EntityKind::Application,
            REVISION_REQUESTED,
            IN_REVIEW,
            &[Business, Admin],
        );
        table.allow(
            EntityKind::Application,
            REVISION_REQUESTED,
            WITHDRAWN,
            &[Influencer, Admin],
        );
        table.allow(
            EntityKind::Application,
            APPROVED,
            COMPLETED,
            &[Business, Admin],
        );
        table.allow(
            EntityKind::Application,
            APPROVED,
            WITHDRAWN,
            &[Influencer, Admin],
        );

        table.allow(
            EntityKind::Submission,
            SUBMITTED,
            APPROVED,
            &[Business, Admin, System],
        );
        table.allow(
            EntityKind::Submission,
            SUBMITTED,
            AUTO_APPROVED,
            &[System, Admin],
        );
        table.allow(
            EntityKind::Submission,
            SUBMITTED,
            REJECTED,
            &[Business, Admin],
        );
        table.allow(
            EntityKind::Submission,
            SUBMITTED,
            REVISION_REQUESTED,
            &[Business, Admin],
        );
        table.allow(
            EntityKind::Submission,
            REVISION_REQUESTED,
            SUBMITTED,
            &[Influencer, Admin],
        );

        table
    }
}
