//! The API endpoint URIs.
//!
//! For endpoints that take parameters, e.g., '/users/{user_id}/transactions', use
//! [format_endpoint] once per parameter.

/// The route the aggregator delivers signed webhook events to.
pub const AA_WEBHOOK: &str = "/webhooks/aa";
/// The route to initiate a consent.
pub const CONSENTS: &str = "/consents";
/// The route to revoke the consent behind a bank link.
pub const REVOKE_BANK_LINK: &str = "/bank_links/{link_id}/revoke";
/// The route to re-read a bank link's consent status from the aggregator.
pub const RECONCILE_BANK_LINK: &str = "/bank_links/{link_id}/reconcile";
/// The route to open a data session for a bank link on demand.
pub const FETCH_BANK_LINK: &str = "/bank_links/{link_id}/fetch";
/// The route to list a user's bank links.
pub const USER_BANK_LINKS: &str = "/users/{user_id}/bank_links";
/// The route to list a user's transactions.
pub const USER_TRANSACTIONS: &str = "/users/{user_id}/transactions";
/// The route to set the category of one of a user's transactions.
pub const TRANSACTION_CATEGORY: &str = "/users/{user_id}/transactions/{transaction_id}/category";
/// The route to list and create a user's category overrides.
pub const CATEGORY_OVERRIDES: &str = "/users/{user_id}/categories";
/// The route to delete a category override.
pub const CATEGORY_OVERRIDE: &str = "/users/{user_id}/categories/{override_id}";
/// The route to re-apply a user's category overrides to stored transactions.
pub const RECATEGORIZE: &str = "/users/{user_id}/recategorize";

/// Replace the first parameter in `endpoint_path` with `id`.
///
/// A parameter is a string that starts with a left brace, followed by
/// lowercase letters or underscores, and ends with a right brace.
/// For example, in the endpoint path '/users/{user_id}', '{user_id}' is the parameter.
///
/// Paths with several parameters are filled in by calling this function repeatedly,
/// left to right.
///
/// If no parameter is found in `endpoint_path`, the function returns the
/// the original `endpoint_path`.
pub fn format_endpoint(endpoint_path: &str, id: i64) -> String {
    let Some(param_start) = endpoint_path.find('{') else {
        return endpoint_path.to_string();
    };

    let param_end = endpoint_path[param_start..]
        .find('}')
        .map(|end| param_start + end + 1)
        .unwrap_or(endpoint_path.len());

    format!(
        "{}{}{}",
        &endpoint_path[..param_start],
        id,
        &endpoint_path[param_end..]
    )
}

// These tests are here so that we know when we call `Uri::from_shared` it will not panic.
#[cfg(test)]
mod endpoints_tests {
    use axum::http::Uri;

    use crate::endpoints;

    use super::format_endpoint;

    fn assert_endpoint_is_valid_uri(uri: &str) {
        assert!(uri.parse::<Uri>().is_ok());
    }

    #[test]
    fn endpoints_are_valid_uris() {
        assert_endpoint_is_valid_uri(endpoints::AA_WEBHOOK);
        assert_endpoint_is_valid_uri(endpoints::CONSENTS);
        assert_endpoint_is_valid_uri(endpoints::REVOKE_BANK_LINK);
        assert_endpoint_is_valid_uri(endpoints::RECONCILE_BANK_LINK);
        assert_endpoint_is_valid_uri(endpoints::FETCH_BANK_LINK);
        assert_endpoint_is_valid_uri(endpoints::USER_BANK_LINKS);
        assert_endpoint_is_valid_uri(endpoints::USER_TRANSACTIONS);
        assert_endpoint_is_valid_uri(endpoints::TRANSACTION_CATEGORY);
        assert_endpoint_is_valid_uri(endpoints::CATEGORY_OVERRIDES);
        assert_endpoint_is_valid_uri(endpoints::CATEGORY_OVERRIDE);
        assert_endpoint_is_valid_uri(endpoints::RECATEGORIZE);
    }

    #[test]
    fn produces_valid_uri() {
        let formatted_path = format_endpoint("/hello/{world_id}", 1);

        assert_eq!(formatted_path, "/hello/1");
        assert!(formatted_path.parse::<Uri>().is_ok());

        // Parameter with single word should also work.
        let formatted_path = format_endpoint("/hello/{world}", 1);

        assert_eq!(formatted_path, "/hello/1");
        assert!(formatted_path.parse::<Uri>().is_ok());
    }

    #[test]
    fn returns_original_path_with_no_parameter() {
        let formatted_path = format_endpoint("/hello/world", 1);

        assert_eq!(formatted_path, "/hello/world");
        assert!(formatted_path.parse::<Uri>().is_ok());
    }

    #[test]
    fn parameter_in_middle() {
        let formatted_path = format_endpoint("/hello/{world}/bye", 1);

        assert_eq!(formatted_path, "/hello/1/bye");
        assert!(formatted_path.parse::<Uri>().is_ok());
    }

    #[test]
    fn fills_parameters_left_to_right() {
        let formatted_path = format_endpoint(
            &format_endpoint(endpoints::CATEGORY_OVERRIDE, 7),
            12,
        );

        assert_eq!(formatted_path, "/users/7/categories/12");
        assert!(formatted_path.parse::<Uri>().is_ok());
    }
}
