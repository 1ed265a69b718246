//! Team and vault authorization decisions.
//!
//! Pure functions over affiliation rows: the store loads the rows inside its
//! transaction, asks here, and only then mutates. `None` means "not a member".

use crate::error::{Result, StoreError};
use crate::models::{Team, TeamUser};

/// Whether an allowed membership change has anything to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Apply,
    NoOp,
}

pub fn require_member(aff: Option<&TeamUser>) -> Result<&TeamUser> {
    aff.ok_or(StoreError::NotInTeam)
}

pub fn require_admin(aff: Option<&TeamUser>) -> Result<&TeamUser> {
    let aff = require_member(aff)?;
    if !aff.is_admin {
        return Err(StoreError::Unauthorized);
    }
    Ok(aff)
}

/// Adding a registered user to a team.
pub fn addition(admin: Option<&TeamUser>, newcomer: Option<&TeamUser>) -> Result<()> {
    require_admin(admin)?;
    if newcomer.is_some() {
        return Err(StoreError::AlreadyInTeam);
    }
    Ok(())
}

pub fn promotion(promoter: Option<&TeamUser>, promotee: Option<&TeamUser>) -> Result<Change> {
    require_admin(promoter)?;
    let promotee = require_member(promotee)?;
    Ok(if promotee.is_admin { Change::NoOp } else { Change::Apply })
}

/// The owner can never be demoted, whoever asks.
pub fn demotion(
    team: &Team,
    demoter: Option<&TeamUser>,
    demotee_id: &str,
    demotee: Option<&TeamUser>,
) -> Result<Change> {
    if team.owner_id == demotee_id {
        return Err(StoreError::Unauthorized);
    }
    require_admin(demoter)?;
    let demotee = require_member(demotee)?;
    Ok(if demotee.is_admin { Change::Apply } else { Change::NoOp })
}

/// Leaving the team entirely. The owner cannot be removed.
pub fn removal_from_team(
    team: &Team,
    admin: Option<&TeamUser>,
    target_id: &str,
    target: Option<&TeamUser>,
) -> Result<()> {
    if team.owner_id == target_id {
        return Err(StoreError::Unauthorized);
    }
    require_admin(admin)?;
    require_member(target)?;
    Ok(())
}

/// Admins' vault access follows their admin flag, never ad-hoc removal.
pub fn removal_from_vault(admin: Option<&TeamUser>, target: Option<&TeamUser>) -> Result<()> {
    require_admin(admin)?;
    if require_member(target)?.is_admin {
        return Err(StoreError::Unauthorized);
    }
    Ok(())
}
