//! Local consent operations: initiating, revoking and reconciling consents with the aggregator.
//!
//! The database lock is only taken between provider calls, never across them.

use time::OffsetDateTime;

use crate::{
    Error,
    app_state::PipelineState,
    bank_link::{
        BankLink, LinkStatus, NewBankLink, TransitionOutcome, create_bank_link, get_bank_link,
        get_bank_link_by_consent_id, transition_link,
    },
    database_id::{BankLinkId, UserId},
    db::lock_connection,
    provider::{ConsentHandle, ConsentRequest, ProviderError},
};

/// Ask the aggregator for a new consent and record it as a `PENDING` bank link.
///
/// If the aggregator reports the consent as already past `PENDING`, that status is applied
/// straight away.
///
/// # Errors
/// This function will return a:
/// - [Error::MalformedRequest] if the date range is inverted or a URL is missing,
/// - [Error::ProviderUnavailable] or [Error::InvalidProviderRequest] if the aggregator call fails,
/// - or [Error::SqlError] if the link could not be stored.
pub async fn initiate_consent(
    request: &ConsentRequest,
    state: &PipelineState,
) -> Result<(BankLink, ConsentHandle), Error> {
    validate_consent_request(request)?;

    let handle = state.provider.create_consent(request).await?;
    tracing::info!(
        "created consent {} for user {} at {}",
        handle.consent_id,
        request.user_id,
        state.provider.name()
    );

    let connection = lock_connection(&state.db_connection)?;
    let link = create_bank_link(
        NewBankLink {
            user_id: request.user_id,
            aa_consent_id: handle.consent_id.clone(),
            fi_type: request.fi_type.clone(),
            valid_till: handle.valid_till,
        },
        &connection,
    )?;

    if handle.status != LinkStatus::Pending {
        match transition_link(link.id, handle.status, handle.valid_till, &connection) {
            Ok(_) | Err(Error::InvalidTransition { .. }) => {}
            Err(error) => return Err(error),
        }
    }

    let link = get_bank_link(link.id, &connection)?;

    Ok((link, handle))
}

fn validate_consent_request(request: &ConsentRequest) -> Result<(), Error> {
    if request.from_date > request.to_date {
        return Err(Error::MalformedRequest(format!(
            "consent range ends ({}) before it starts ({})",
            request.to_date, request.from_date
        )));
    }

    if request.fi_type.trim().is_empty() {
        return Err(Error::MalformedRequest("fi_type cannot be empty".to_owned()));
    }

    if request.redirect_url.trim().is_empty() || request.webhook_url.trim().is_empty() {
        return Err(Error::MalformedRequest(
            "redirect_url and webhook_url are required".to_owned(),
        ));
    }

    Ok(())
}

/// Revoke the consent behind `link_id` at the aggregator and mark the link `REVOKED`.
///
/// Revoking an already revoked link succeeds without calling the aggregator.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if the link does not exist or belongs to another user,
/// - [Error::InvalidTransition] if the link has already expired,
/// - [Error::ProviderUnavailable] if the aggregator could not be reached,
/// - or [Error::SqlError] if there is an SQL error.
pub async fn revoke_link(
    user_id: UserId,
    link_id: BankLinkId,
    state: &PipelineState,
) -> Result<BankLink, Error> {
    let link = {
        let connection = lock_connection(&state.db_connection)?;
        get_bank_link(link_id, &connection)?
    };

    if link.user_id != user_id {
        return Err(Error::NotFound);
    }

    match link.status {
        LinkStatus::Revoked => return Ok(link),
        LinkStatus::Expired => {
            return Err(Error::InvalidTransition {
                from: LinkStatus::Expired,
                to: LinkStatus::Revoked,
            });
        }
        LinkStatus::Pending | LinkStatus::Active => {}
    }

    match state.provider.revoke_consent(&link.aa_consent_id).await {
        Ok(()) => {}
        Err(ProviderError::AlreadyRevoked) => {
            tracing::debug!(
                "consent {} was already revoked at the aggregator",
                link.aa_consent_id
            );
        }
        Err(error) => return Err(error.into()),
    }

    let connection = lock_connection(&state.db_connection)?;
    transition_link(link_id, LinkStatus::Revoked, None, &connection)?;

    get_bank_link(link_id, &connection)
}

/// Ask the aggregator for the current status of the consent behind `link_id` and apply it.
///
/// This is the fallback for links whose status webhook was lost, e.g. ones stuck in `PENDING`.
/// A reported `ACTIVE` for a link whose validity has already elapsed is recorded as `EXPIRED`.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if the link does not exist or the aggregator does not know the consent,
/// - [Error::InvalidTransition] if the reported status cannot follow the local one,
/// - [Error::ProviderUnavailable] if the aggregator could not be reached,
/// - or [Error::SqlError] if there is an SQL error.
pub async fn reconcile_link(
    link_id: BankLinkId,
    state: &PipelineState,
) -> Result<TransitionOutcome, Error> {
    let link = {
        let connection = lock_connection(&state.db_connection)?;
        get_bank_link(link_id, &connection)?
    };

    let reported = state
        .provider
        .get_consent_status(&link.aa_consent_id)
        .await?;
    tracing::debug!(
        "aggregator reports consent {} as {reported}, local status is {}",
        link.aa_consent_id,
        link.status
    );

    let connection = lock_connection(&state.db_connection)?;
    let target = status_after_validity(reported, link.valid_till, OffsetDateTime::now_utc());
    transition_link(link_id, target, None, &connection)
}

/// Apply a status the aggregator reported for `aa_consent_id`, e.g. from a webhook.
///
/// A reported `ACTIVE` for a link whose validity has already elapsed is recorded as `EXPIRED`.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if no bank link tracks the consent,
/// - [Error::InvalidTransition] if the reported status cannot follow the local one,
/// - or [Error::SqlError] if there is an SQL error.
pub fn apply_reported_status(
    aa_consent_id: &str,
    reported: LinkStatus,
    valid_till: Option<OffsetDateTime>,
    connection: &rusqlite::Connection,
) -> Result<(BankLink, TransitionOutcome), Error> {
    let link = get_bank_link_by_consent_id(aa_consent_id, connection)?;

    let target = status_after_validity(
        reported,
        valid_till.or(link.valid_till),
        OffsetDateTime::now_utc(),
    );

    let outcome = transition_link(link.id, target, valid_till, connection)?;

    Ok((link, outcome))
}

/// The status to record for a consent the aggregator reports as `reported`.
fn status_after_validity(
    reported: LinkStatus,
    valid_till: Option<OffsetDateTime>,
    now: OffsetDateTime,
) -> LinkStatus {
    match reported {
        LinkStatus::Active if valid_till.is_some_and(|valid_till| valid_till <= now) => {
            LinkStatus::Expired
        }
        status => status,
    }
}

#[cfg(test)]
mod tests {
    use time::{Duration, OffsetDateTime};

    use crate::{
        Error,
        bank_link::{
            LinkStatus, TransitionOutcome, get_bank_link, initiate_consent, reconcile_link,
            revoke_link,
        },
        db::lock_connection,
        test_utils::{consent_request, test_pipeline},
    };

    use super::apply_reported_status;

    #[tokio::test]
    async fn initiate_persists_pending_link() {
        let (state, _) = test_pipeline();

        let (link, handle) = initiate_consent(&consent_request(7), &state).await.unwrap();

        assert_eq!(link.user_id, 7);
        assert_eq!(link.aa_consent_id, handle.consent_id);
        assert_eq!(link.status, LinkStatus::Pending);
        assert_eq!(handle.status, LinkStatus::Pending);
        assert!(!handle.redirect_url.is_empty());
    }

    #[tokio::test]
    async fn initiate_rejects_inverted_range() {
        let (state, _) = test_pipeline();
        let mut request = consent_request(7);
        std::mem::swap(&mut request.from_date, &mut request.to_date);

        let result = initiate_consent(&request, &state).await;

        assert!(matches!(result, Err(Error::MalformedRequest(_))), "got {result:?}");
    }

    #[tokio::test]
    async fn initiate_surfaces_provider_outage() {
        let (state, mock) = test_pipeline();
        mock.fail_next_calls(10);

        let result = initiate_consent(&consent_request(7), &state).await;

        assert!(matches!(result, Err(Error::ProviderUnavailable(_))), "got {result:?}");
    }

    #[tokio::test]
    async fn revoke_active_link() {
        let (state, mock) = test_pipeline();
        let (link, handle) = initiate_consent(&consent_request(7), &state).await.unwrap();
        mock.set_consent_status(&handle.consent_id, LinkStatus::Active);
        reconcile_link(link.id, &state).await.unwrap();

        let revoked = revoke_link(7, link.id, &state).await.unwrap();

        assert_eq!(revoked.status, LinkStatus::Revoked);
        let again = revoke_link(7, link.id, &state).await.unwrap();
        assert_eq!(again.status, LinkStatus::Revoked);
    }

    #[tokio::test]
    async fn revoke_treats_already_revoked_as_success() {
        let (state, mock) = test_pipeline();
        let (link, handle) = initiate_consent(&consent_request(7), &state).await.unwrap();
        mock.set_consent_status(&handle.consent_id, LinkStatus::Revoked);

        let revoked = revoke_link(7, link.id, &state).await.unwrap();

        assert_eq!(revoked.status, LinkStatus::Revoked);
    }

    #[tokio::test]
    async fn revoke_is_scoped_to_owner() {
        let (state, _) = test_pipeline();
        let (link, _) = initiate_consent(&consent_request(7), &state).await.unwrap();

        let result = revoke_link(8, link.id, &state).await;

        assert_eq!(result, Err(Error::NotFound));
    }

    #[tokio::test]
    async fn reconcile_activates_pending_link() {
        let (state, mock) = test_pipeline();
        let (link, handle) = initiate_consent(&consent_request(7), &state).await.unwrap();
        mock.set_consent_status(&handle.consent_id, LinkStatus::Active);

        let outcome = reconcile_link(link.id, &state).await.unwrap();

        assert_eq!(
            outcome,
            TransitionOutcome::Applied {
                from: LinkStatus::Pending,
                to: LinkStatus::Active
            }
        );
        let again = reconcile_link(link.id, &state).await.unwrap();
        assert_eq!(again, TransitionOutcome::Unchanged(LinkStatus::Active));
    }

    #[tokio::test]
    async fn reported_active_after_validity_expires_the_link() {
        let (state, _) = test_pipeline();
        let (link, handle) = initiate_consent(&consent_request(7), &state).await.unwrap();
        let connection = lock_connection(&state.db_connection).unwrap();

        let (_, outcome) = apply_reported_status(
            &handle.consent_id,
            LinkStatus::Active,
            Some(OffsetDateTime::now_utc() - Duration::minutes(5)),
            &connection,
        )
        .unwrap();

        assert_eq!(
            outcome,
            TransitionOutcome::Applied {
                from: LinkStatus::Pending,
                to: LinkStatus::Expired
            }
        );
        assert_eq!(
            get_bank_link(link.id, &connection).unwrap().status,
            LinkStatus::Expired
        );
    }

    #[tokio::test]
    async fn reconcile_expires_lapsed_link_reported_active() {
        let (state, mock) = test_pipeline();
        let (link, handle) = initiate_consent(&consent_request(7), &state).await.unwrap();
        mock.set_consent_status(&handle.consent_id, LinkStatus::Active);
        reconcile_link(link.id, &state).await.unwrap();
        {
            let connection = lock_connection(&state.db_connection).unwrap();
            connection
                .execute(
                    "UPDATE bank_link SET valid_till = ?1 WHERE id = ?2",
                    (OffsetDateTime::now_utc() - Duration::days(1), link.id),
                )
                .unwrap();
        }

        let outcome = reconcile_link(link.id, &state).await.unwrap();

        assert_eq!(
            outcome,
            TransitionOutcome::Applied {
                from: LinkStatus::Active,
                to: LinkStatus::Expired
            }
        );
        let connection = lock_connection(&state.db_connection).unwrap();
        assert_eq!(
            get_bank_link(link.id, &connection).unwrap().status,
            LinkStatus::Expired
        );
    }

    #[tokio::test]
    async fn reported_status_for_unknown_consent_is_not_found() {
        let (state, _) = test_pipeline();
        let connection = lock_connection(&state.db_connection).unwrap();

        let result = apply_reported_status("nope", LinkStatus::Active, None, &connection);

        assert_eq!(result, Err(Error::NotFound));
    }
}
