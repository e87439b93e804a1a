//! Penalty execution
//!
//! Maps a failed check, failed handshake or timeout to an action against
//! the account store. A ban does not disconnect by itself; the host drops
//! sessions of banned accounts.

use std::time::Duration;

use tracing::{info, warn};

use crate::catalog::{CheckDefinition, PenaltyAction};
use crate::host::{AccountStore, SessionId};

/// Name recorded as the issuer of automatic bans.
pub const BANNED_BY: &str = "Server";

/// Applies penalties for one engine configuration.
#[derive(Debug, Clone, Copy)]
pub struct PenaltyExecutor {
    ban_duration: Duration,
}

impl PenaltyExecutor {
    pub fn new(ban_duration: Duration) -> Self {
        Self { ban_duration }
    }

    /// Apply `action` to `session`. Returns the action actually enforced;
    /// [`PenaltyAction::describe`] gives its log description.
    pub fn apply<A: AccountStore + ?Sized>(
        &self,
        accounts: &mut A,
        session: SessionId,
        action: PenaltyAction,
        check: Option<&CheckDefinition>,
    ) -> PenaltyAction {
        match action {
            PenaltyAction::Log => {
                info!(
                    session,
                    check_id = check.map(|c| c.id),
                    "verification failure logged"
                );
                PenaltyAction::Log
            }
            PenaltyAction::Kick => {
                accounts.kick(session, "Anticheat: verification failed");
                warn!(session, check_id = check.map(|c| c.id), "session kicked");
                PenaltyAction::Kick
            }
            PenaltyAction::Ban => {
                let Some(account) = accounts.account_name(session) else {
                    warn!(session, "ban requested for unknown account, kicking instead");
                    accounts.kick(session, "Anticheat: verification failed");
                    return PenaltyAction::Kick;
                };

                let reason = ban_reason(check);
                accounts.ban(&account, self.ban_duration, &reason, BANNED_BY);
                warn!(
                    session,
                    account = %account,
                    duration_secs = self.ban_duration.as_secs(),
                    reason = %reason,
                    "account banned"
                );
                PenaltyAction::Ban
            }
        }
    }
}

fn ban_reason(check: Option<&CheckDefinition>) -> String {
    let mut reason = String::from("Anticheat violation");
    if let Some(check) = check {
        reason.push_str(&format!(": {} (CheckId: {})", check.comment, check.id));
    }
    reason
}
