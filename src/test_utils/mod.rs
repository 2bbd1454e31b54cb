pub(crate) mod fixtures;
pub(crate) mod http;

pub(crate) use fixtures::{
    TEST_WEBHOOK_SECRET, active_link, consent_request, raw_record, ready_session, test_app_state,
    test_pipeline,
};
pub(crate) use http::{assert_status, parse_json_body};
