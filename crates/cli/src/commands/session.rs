//! Session commands.
//!
//! The CLI keeps no session of its own between runs: `login` performs the
//! sign-in transition once (merging the guest cart), and later commands pick
//! the session up from `VARKETPLACE_USER_ID` / `VARKETPLACE_AUTH_TOKEN`.

use secrecy::SecretString;
use serde::Serialize;
use varketplace_cart::{AuthSession, AuthTransition, MergeReport};
use varketplace_core::UserId;

use super::{CommandError, Context, emit};

#[derive(Serialize)]
#[serde(tag = "transition", rename_all = "snake_case")]
enum TransitionOutput<'a> {
    SignedIn { merge: &'a MergeReport },
    SignedOut,
    SwitchedUser,
    Unchanged,
}

impl<'a> From<&'a AuthTransition> for TransitionOutput<'a> {
    fn from(transition: &'a AuthTransition) -> Self {
        match transition {
            AuthTransition::SignedIn(merge) => Self::SignedIn { merge },
            AuthTransition::SignedOut => Self::SignedOut,
            AuthTransition::SwitchedUser => Self::SwitchedUser,
            AuthTransition::Unchanged => Self::Unchanged,
        }
    }
}

pub async fn login(ctx: &Context, user_id: UserId, token: String) -> Result<(), CommandError> {
    let previous = ctx.auth.current();
    let next = AuthSession::new(user_id, SecretString::from(token));

    ctx.sync.load_cart().await;
    ctx.auth.login(next.clone());
    let transition = ctx
        .sync
        .on_auth_change(previous.as_ref(), Some(&next))
        .await;

    if let AuthTransition::SignedIn(report) = &transition {
        for failure in &report.failed {
            tracing::warn!(
                product_id = %failure.product_id,
                kind = %failure.kind,
                "Guest line was not merged: {}",
                failure.message
            );
        }
    }
    emit(&TransitionOutput::from(&transition))
}

pub async fn logout(ctx: &Context) -> Result<(), CommandError> {
    let Some(previous) = ctx.auth.current() else {
        tracing::info!("No session configured");
        return emit(&TransitionOutput::Unchanged);
    };

    ctx.auth.logout();
    let transition = ctx.sync.on_auth_change(Some(&previous), None).await;
    emit(&TransitionOutput::from(&transition))
}
