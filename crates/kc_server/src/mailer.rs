//! Outbound mail seam.
//!
//! Delivery lives outside this workspace. The daemon either logs what it
//! would send or drops it.

use async_trait::async_trait;
use kc_store::{Invite, Team, Token, User};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
#[error("mail delivery failed: {0}")]
pub struct MailError(pub String);

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_confirmation_mail(&self, user: &User, token: &Token, locale: &str) -> Result<(), MailError>;

    async fn send_invitation_mail(
        &self,
        team: &Team,
        admin: &User,
        invite: &Invite,
        locale: &str,
    ) -> Result<(), MailError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_confirmation_mail(&self, user: &User, token: &Token, locale: &str) -> Result<(), MailError> {
        let to = if user.unconfirmed_email.is_empty() {
            &user.email
        } else {
            &user.unconfirmed_email
        };
        // the token is a one-time credential and stays out of the log
        info!(user = %user.id, to = %to, token_created = %token.created_at, locale, "confirmation mail");
        Ok(())
    }

    async fn send_invitation_mail(
        &self,
        team: &Team,
        admin: &User,
        invite: &Invite,
        locale: &str,
    ) -> Result<(), MailError> {
        info!(team = %team.id, admin = %admin.id, to = %invite.email, locale, "invitation mail");
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullMailer;

#[async_trait]
impl Mailer for NullMailer {
    async fn send_confirmation_mail(&self, _: &User, _: &Token, _: &str) -> Result<(), MailError> {
        Ok(())
    }

    async fn send_invitation_mail(&self, _: &Team, _: &User, _: &Invite, _: &str) -> Result<(), MailError> {
        Ok(())
    }
}
