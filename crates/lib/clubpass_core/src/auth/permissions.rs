//! Permission compilation: identity + memberships → bus subject patterns.
//!
//! Patterns are generated from two small tables. Event families describe
//! what a member may subscribe to; request subjects describe what a member
//! may publish. Event subjects in the catalogue are not nested uniformly
//! (`round.started.v1.<club>` next to `round.participant.joined.v1.<club>`),
//! so each family lists the range of action depths it is published at and a
//! pattern is emitted per depth.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ClubRole, Identity, PermissionTier, Role};

/// Prefix of the private request/reply inbox namespace.
pub const INBOX_PREFIX: &str = "_INBOX";

/// Event subjects `<family>.<action…>.v<version>.<scope>`, where the action
/// part is between `min_depth` and `max_depth` tokens long.
#[derive(Debug, Clone, Copy)]
pub struct EventFamily {
    pub family: &'static str,
    pub version: u8,
    pub min_depth: usize,
    pub max_depth: usize,
}

/// A request subject `<subject>.v<version>.<scope>`.
#[derive(Debug, Clone, Copy)]
pub struct RequestSubject {
    pub subject: &'static str,
    pub version: u8,
}

/// Club-scoped events every member may read.
pub const CLUB_EVENTS: &[EventFamily] = &[
    EventFamily { family: "round", version: 1, min_depth: 1, max_depth: 2 },
    EventFamily { family: "leaderboard", version: 1, min_depth: 1, max_depth: 2 },
    EventFamily { family: "club", version: 1, min_depth: 1, max_depth: 2 },
];

/// User-scoped events, keyed by the member's own UUID.
pub const USER_EVENTS: &[EventFamily] = &[
    EventFamily { family: "user", version: 1, min_depth: 1, max_depth: 2 },
];

/// Participant actions and read requests.
pub const PLAYER_REQUESTS: &[RequestSubject] = &[
    RequestSubject { subject: "round.participant.join.request", version: 1 },
    RequestSubject { subject: "round.participant.leave.request", version: 1 },
    RequestSubject { subject: "round.list.request", version: 1 },
    RequestSubject { subject: "leaderboard.snapshot.request", version: 1 },
];

/// Administrative actions and score submission.
pub const EDITOR_REQUESTS: &[RequestSubject] = &[
    RequestSubject { subject: "round.create.request", version: 1 },
    RequestSubject { subject: "round.update.request", version: 1 },
    RequestSubject { subject: "round.delete.request", version: 1 },
    RequestSubject { subject: "round.score.submit.request", version: 1 },
    RequestSubject { subject: "leaderboard.update.request", version: 1 },
];

impl EventFamily {
    /// One pattern per action depth, e.g. `round.*.v1.<scope>` and
    /// `round.*.*.v1.<scope>`.
    pub fn patterns<'a>(&'a self, scope: &'a str) -> impl Iterator<Item = String> + 'a {
        (self.min_depth..=self.max_depth).map(move |depth| {
            let action = vec!["*"; depth].join(".");
            format!("{}.{}.v{}.{}", self.family, action, self.version, scope)
        })
    }
}

impl RequestSubject {
    pub fn pattern(&self, scope: &str) -> String {
        format!("{}.v{}.{}", self.subject, self.version, scope)
    }
}

/// Allow/deny pattern sets for one direction (publish or subscribe).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSet {
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub allow: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub deny: BTreeSet<String>,
}

/// Publish and subscribe permissions, in bus user-claims shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    #[serde(rename = "pub", default)]
    pub publish: PatternSet,
    #[serde(rename = "sub", default)]
    pub subscribe: PatternSet,
}

impl PermissionSet {
    pub fn can_publish(&self, pattern: &str) -> bool {
        self.publish.allow.contains(pattern)
    }

    pub fn can_subscribe(&self, pattern: &str) -> bool {
        self.subscribe.allow.contains(pattern)
    }
}

/// Pattern lists accumulated by concatenation before de-duplication.
#[derive(Debug, Default)]
struct PatternLists {
    publish_allow: Vec<String>,
    publish_deny: Vec<String>,
    subscribe_allow: Vec<String>,
    subscribe_deny: Vec<String>,
}

impl PatternLists {
    fn append(&mut self, mut other: PatternLists) {
        self.publish_allow.append(&mut other.publish_allow);
        self.publish_deny.append(&mut other.publish_deny);
        self.subscribe_allow.append(&mut other.subscribe_allow);
        self.subscribe_deny.append(&mut other.subscribe_deny);
    }

    fn into_set(self) -> PermissionSet {
        PermissionSet {
            publish: PatternSet {
                allow: self.publish_allow.into_iter().collect(),
                deny: self.publish_deny.into_iter().collect(),
            },
            subscribe: PatternSet {
                allow: self.subscribe_allow.into_iter().collect(),
                deny: self.subscribe_deny.into_iter().collect(),
            },
        }
    }
}

/// Compile the full permission set for `identity`.
///
/// Output is independent of membership order.
pub fn compile(identity: &Identity) -> PermissionSet {
    let mut lists = PatternLists::default();
    for membership in &identity.memberships {
        let scopes = membership_scopes(identity, membership);
        lists.append(template(&membership.role, identity.user_uuid, &scopes));
    }
    lists.subscribe_allow.push(inbox_pattern(identity.user_uuid));
    lists.into_set()
}

/// Permission set for a single role over `scopes`, plus the private inbox.
pub fn for_role(role: &Role, user_uuid: Uuid, scopes: &[String]) -> PermissionSet {
    let mut lists = template(role, user_uuid, scopes);
    lists.subscribe_allow.push(inbox_pattern(user_uuid));
    lists.into_set()
}

/// Subscribe pattern for the identity's private reply inbox.
pub fn inbox_pattern(user_uuid: Uuid) -> String {
    format!("{INBOX_PREFIX}.{user_uuid}.>")
}

/// Scopes a membership grants: the club UUID, plus the legacy guild ID when
/// the membership is the active one.
fn membership_scopes(identity: &Identity, membership: &ClubRole) -> Vec<String> {
    let mut scopes = vec![membership.club_uuid.to_string()];
    if identity.is_active(&membership.club_uuid)
        && let Some(guild_id) = identity.guild_id.as_deref().filter(|g| !g.is_empty())
    {
        scopes.push(guild_id.to_string());
    }
    scopes
}

fn template(role: &Role, user_uuid: Uuid, scopes: &[String]) -> PatternLists {
    let tier = role.tier();
    let mut lists = PatternLists::default();

    let user_scope = user_uuid.to_string();
    for family in USER_EVENTS {
        lists.subscribe_allow.extend(family.patterns(&user_scope));
    }

    for scope in scopes {
        for family in CLUB_EVENTS {
            lists.subscribe_allow.extend(family.patterns(scope));
        }
        if tier >= PermissionTier::Player {
            lists
                .publish_allow
                .extend(PLAYER_REQUESTS.iter().map(|r| r.pattern(scope)));
        }
        if tier >= PermissionTier::Editor {
            lists
                .publish_allow
                .extend(EDITOR_REQUESTS.iter().map(|r| r.pattern(scope)));
        }
    }
    lists
}
