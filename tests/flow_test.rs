mod common;

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use common::*;
use pseudoidc_oauth::oauth_core::http_client::HttpResponse;
use pseudoidc_oauth::oauth_core::crypto::pkce_code_challenge;
use pseudoidc_oauth::{
    AuthError, CallbackParams, CallbackStage, Check, InMemoryHttpClient, InMemorySessionSink, InvalidTokenReason,
    TokenEndpointAuth, UserinfoPolicy,
};
use serde_json::json;

#[tokio::test]
async fn test_successful_login_establishes_pseudonym_session() {
    let harness = Harness::new(descriptor_builder());
    let (redirect, state, nonce) = harness.start().await;
    assert!(redirect.url.as_str().starts_with("https://auth.local/authorize?"));
    assert_eq!(query_param(&redirect.url, "prompt").as_deref(), Some("create"));

    let id_token = sign(&claims("U1", nonce.as_deref()));
    harness.http.insert_response(TOKEN_URL, token_response("A1", &id_token));
    harness.http.insert_response(
        USERINFO_URL,
        HttpResponse::json(200, &json!({"sub": "U1", "email": "u1@example.com", "name": "Ada"})),
    );

    let sink = InMemorySessionSink::new();
    let session = harness
        .controller
        .handle_and_persist(&redirect.session_key, callback("C1", &state), &sink)
        .await
        .unwrap();

    assert_eq!(session.pseudonym, "U1");
    assert_eq!(session.display_name.as_deref(), Some("Ada"));
    assert_eq!(session.issuer, ISSUER);
    assert_eq!(sink.sessions(), vec![session]);

    let token_calls = harness.requests_to(TOKEN_URL);
    assert_eq!(token_calls.len(), 1);
    assert_eq!(form_param(&token_calls[0], "grant_type").as_deref(), Some("authorization_code"));
    assert_eq!(form_param(&token_calls[0], "code").as_deref(), Some("C1"));
    assert_eq!(form_param(&token_calls[0], "redirect_uri").as_deref(), Some(REDIRECT_URI));
    assert_eq!(form_param(&token_calls[0], "client_secret").as_deref(), Some(CLIENT_SECRET));

    let userinfo_calls = harness.requests_to(USERINFO_URL);
    assert_eq!(userinfo_calls.len(), 1);
    assert_eq!(userinfo_calls[0].header_value("authorization"), Some("Bearer A1"));
    assert!(harness.store.is_empty());
}

#[tokio::test]
async fn test_replayed_callback_fails_at_state_validation() {
    let harness = Harness::new(descriptor_builder());
    let (redirect, state, nonce) = harness.start().await;
    harness
        .http
        .insert_response(TOKEN_URL, token_response("A1", &sign(&claims("U1", nonce.as_deref()))));

    harness.controller.handle(&redirect.session_key, callback("C1", &state)).await.unwrap();
    let failure = harness
        .controller
        .handle(&redirect.session_key, callback("C1", &state))
        .await
        .unwrap_err();

    assert_eq!(failure.stage, CallbackStage::StateValidated);
    assert!(matches!(failure.cause, AuthError::StateMismatch));
    assert_eq!(harness.http.request_count(TOKEN_URL), 1);
}

#[tokio::test]
async fn test_forged_state_consumes_attempt_and_answers_generically() {
    let harness = Harness::new(descriptor_builder());
    let (redirect, state, _) = harness.start().await;

    let failure = harness
        .controller
        .handle(&redirect.session_key, callback("C1", "S2"))
        .await
        .unwrap_err();
    assert_eq!(failure.stage, CallbackStage::StateValidated);
    assert!(matches!(failure.cause, AuthError::StateMismatch));
    assert_eq!(harness.http.request_count(TOKEN_URL), 0);

    // The genuine state no longer works either.
    let retry = harness
        .controller
        .handle(&redirect.session_key, callback("C1", &state))
        .await
        .unwrap_err();
    assert_eq!(retry.stage, CallbackStage::StateValidated);

    let response = failure.to_response();
    assert_eq!(response.status, 400);
    assert_eq!(response.body["error"], "authentication_failed");
    assert_eq!(response.body["error_description"], "Authentication failed");
    let body = String::from_utf8(response.body_bytes()).unwrap();
    assert!(!body.contains("state"));
}

#[tokio::test]
async fn test_unknown_session_key_is_a_state_mismatch() {
    let harness = Harness::new(descriptor_builder());
    let failure = harness.controller.handle("no-such-attempt", callback("C1", "S1")).await.unwrap_err();
    assert_eq!(failure.stage, CallbackStage::StateValidated);
    assert!(matches!(failure.cause, AuthError::StateMismatch));
}

#[tokio::test]
async fn test_rejected_code_fails_at_token_exchange() {
    let harness = Harness::new(descriptor_builder());
    let (redirect, state, _) = harness.start().await;
    harness.http.insert_response(
        TOKEN_URL,
        HttpResponse::json(400, &json!({"error": "invalid_grant", "error_description": "code already used"})),
    );

    let failure = harness
        .controller
        .handle(&redirect.session_key, callback("C1", &state))
        .await
        .unwrap_err();

    assert_eq!(failure.stage, CallbackStage::TokenExchanged);
    match &failure.cause {
        AuthError::TokenExchange { status, body } => {
            assert_eq!(*status, 400);
            assert!(body.contains("invalid_grant"));
        }
        other => panic!("unexpected cause {other:?}"),
    }
    assert_eq!(harness.http.request_count(USERINFO_URL), 0);
    assert_eq!(harness.http.request_count(JWKS_URL), 0);

    let response = failure.to_response();
    assert_eq!(response.status, 502);
    assert!(!String::from_utf8(response.body_bytes()).unwrap().contains("invalid_grant"));
}

#[tokio::test]
async fn test_nonce_mismatch_fails_claim_validation() {
    let harness = Harness::new(descriptor_builder());
    let (redirect, state, nonce) = harness.start().await;
    assert!(nonce.is_some());
    harness
        .http
        .insert_response(TOKEN_URL, token_response("A1", &sign(&claims("U1", Some("someone-elses-nonce")))));

    let failure = harness
        .controller
        .handle(&redirect.session_key, callback("C1", &state))
        .await
        .unwrap_err();

    assert_eq!(failure.stage, CallbackStage::ClaimsValidated);
    assert!(matches!(
        failure.cause,
        AuthError::InvalidToken { reason: InvalidTokenReason::NonceMismatch }
    ));
    assert_eq!(failure.to_response().status, 502);
}

#[tokio::test]
async fn test_forged_identity_token_is_rejected() {
    let harness = Harness::new(descriptor_builder());
    let (redirect, state, nonce) = harness.start().await;
    harness
        .http
        .insert_response(TOKEN_URL, token_response("A1", &sign_rogue(&claims("U1", nonce.as_deref()))));

    let failure = harness
        .controller
        .handle(&redirect.session_key, callback("C1", &state))
        .await
        .unwrap_err();
    assert_eq!(failure.stage, CallbackStage::ClaimsValidated);
    assert!(matches!(
        failure.cause,
        AuthError::InvalidToken { reason: InvalidTokenReason::BadSignature }
    ));
    assert_eq!(harness.http.request_count(USERINFO_URL), 0);
}

#[tokio::test]
async fn test_pseudonym_does_not_depend_on_userinfo() {
    let scenarios = [
        (UserinfoPolicy::Always, Some(HttpResponse::json(200, &json!({"sub": "U1", "name": "Ada"})))),
        (UserinfoPolicy::Always, Some(HttpResponse::new(500, "upstream down"))),
        (UserinfoPolicy::Always, Some(HttpResponse::json(200, &json!({"sub": "U2", "name": "Mallory"})))),
        (UserinfoPolicy::Always, None),
        (UserinfoPolicy::Never, None),
    ];

    for (policy, userinfo) in scenarios {
        let harness = Harness::new(descriptor_builder().userinfo_policy(policy));
        let (redirect, state, nonce) = harness.start().await;
        harness
            .http
            .insert_response(TOKEN_URL, token_response("A1", &sign(&claims("U1", nonce.as_deref()))));
        if let Some(response) = userinfo {
            harness.http.insert_response(USERINFO_URL, response);
        }

        let session = harness
            .controller
            .handle(&redirect.session_key, callback("C1", &state))
            .await
            .unwrap();
        assert_eq!(session.pseudonym, "U1");
        assert_ne!(session.display_name.as_deref(), Some("Mallory"));
    }
}

#[tokio::test]
async fn test_userinfo_skipped_when_claims_are_complete() {
    let harness = Harness::new(descriptor_builder());
    let (redirect, state, nonce) = harness.start().await;
    let mut token_claims = claims("U1", nonce.as_deref());
    token_claims["email"] = json!("u1@example.com");
    token_claims["name"] = json!("From Token");
    harness.http.insert_response(TOKEN_URL, token_response("A1", &sign(&token_claims)));

    let session = harness
        .controller
        .handle(&redirect.session_key, callback("C1", &state))
        .await
        .unwrap();
    assert_eq!(session.display_name.as_deref(), Some("From Token"));
    assert_eq!(harness.http.request_count(USERINFO_URL), 0);
}

#[tokio::test]
async fn test_token_response_without_access_token() {
    let harness = Harness::new(descriptor_builder());
    let (redirect, state, nonce) = harness.start().await;
    let id_token = sign(&claims("U1", nonce.as_deref()));
    harness
        .http
        .insert_response(TOKEN_URL, HttpResponse::json(200, &json!({"id_token": id_token})));

    let failure = harness
        .controller
        .handle(&redirect.session_key, callback("C1", &state))
        .await
        .unwrap_err();
    assert_eq!(failure.stage, CallbackStage::TokenExchanged);
    assert!(matches!(failure.cause, AuthError::TokenParse(_)));
}

#[tokio::test]
async fn test_token_response_without_id_token() {
    let harness = Harness::new(descriptor_builder());
    let (redirect, state, _) = harness.start().await;
    harness
        .http
        .insert_response(TOKEN_URL, HttpResponse::json(200, &json!({"access_token": "A1"})));

    let failure = harness
        .controller
        .handle(&redirect.session_key, callback("C1", &state))
        .await
        .unwrap_err();
    assert_eq!(failure.stage, CallbackStage::ClaimsValidated);
    assert!(matches!(
        failure.cause,
        AuthError::InvalidToken { reason: InvalidTokenReason::Malformed(_) }
    ));
}

#[tokio::test]
async fn test_subject_hint_must_match_identity_token() {
    let harness = Harness::new(descriptor_builder());
    let (redirect, state, nonce) = harness.start().await;
    let id_token = sign(&claims("U1", nonce.as_deref()));
    harness.http.insert_response(
        TOKEN_URL,
        HttpResponse::json(200, &json!({"access_token": "A1", "id_token": id_token, "pseudonym": "U2"})),
    );

    let failure = harness
        .controller
        .handle(&redirect.session_key, callback("C1", &state))
        .await
        .unwrap_err();
    assert_eq!(failure.stage, CallbackStage::ClaimsValidated);
    assert!(matches!(
        failure.cause,
        AuthError::InvalidToken { reason: InvalidTokenReason::SubjectMismatch }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_slow_token_endpoint_times_out() {
    let http = InMemoryHttpClient::new().with_latency(Duration::from_secs(15));
    http.insert_response(JWKS_URL, jwks_for(&[KID]));
    let harness = Harness::with_http(descriptor_builder(), http);
    let (redirect, state, nonce) = harness.start().await;
    harness
        .http
        .insert_response(TOKEN_URL, token_response("A1", &sign(&claims("U1", nonce.as_deref()))));

    let failure = harness
        .controller
        .handle(&redirect.session_key, callback("C1", &state))
        .await
        .unwrap_err();
    assert_eq!(failure.stage, CallbackStage::TokenExchanged);
    assert!(matches!(failure.cause, AuthError::Timeout(limit) if limit == Duration::from_secs(10)));
    assert_eq!(failure.to_response().status, 502);
}

#[tokio::test(start_paused = true)]
async fn test_slow_userinfo_does_not_block_login() {
    // Fast enough for the token and JWKS calls, too slow for userinfo.
    let http = InMemoryHttpClient::new().with_latency(Duration::from_secs(7));
    http.insert_response(JWKS_URL, jwks_for(&[KID]));
    http.insert_response(USERINFO_URL, HttpResponse::json(200, &json!({"sub": "U1", "name": "Ada"})));
    let harness = Harness::with_http(descriptor_builder(), http);
    let (redirect, state, nonce) = harness.start().await;
    harness
        .http
        .insert_response(TOKEN_URL, token_response("A1", &sign(&claims("U1", nonce.as_deref()))));

    let session = harness
        .controller
        .handle(&redirect.session_key, callback("C1", &state))
        .await
        .unwrap();
    assert_eq!(session.pseudonym, "U1");
    assert_eq!(session.display_name, None);
    assert_eq!(harness.http.request_count(USERINFO_URL), 1);
}

#[tokio::test]
async fn test_missing_code_leaves_attempt_untouched() {
    let harness = Harness::new(descriptor_builder());
    let (redirect, state, _) = harness.start().await;

    let params = CallbackParams { state: Some(state), ..CallbackParams::default() };
    let failure = harness.controller.handle(&redirect.session_key, params).await.unwrap_err();
    assert_eq!(failure.stage, CallbackStage::CodeReceived);
    assert!(matches!(failure.cause, AuthError::MissingCode));
    assert_eq!(harness.store.len(), 1);

    let params = CallbackParams { code: Some("C1".into()), ..CallbackParams::default() };
    let failure = harness.controller.handle(&redirect.session_key, params).await.unwrap_err();
    assert!(matches!(failure.cause, AuthError::MissingState));
    assert_eq!(failure.to_response().body["error"], "invalid_request");
}

#[tokio::test]
async fn test_provider_error_redirect() {
    let harness = Harness::new(descriptor_builder());
    let (redirect, _, _) = harness.start().await;

    let params = CallbackParams::from_query("?error=access_denied&error_description=User%20cancelled&state=x");
    let failure = harness.controller.handle(&redirect.session_key, params).await.unwrap_err();
    assert_eq!(failure.stage, CallbackStage::CodeReceived);
    match &failure.cause {
        AuthError::ProviderDenied { error, description } => {
            assert_eq!(error, "access_denied");
            assert_eq!(description.as_deref(), Some("User cancelled"));
        }
        other => panic!("unexpected cause {other:?}"),
    }
    assert_eq!(failure.to_response().status, 400);
    assert!(harness.http.requests().is_empty());
}

#[tokio::test]
async fn test_pkce_verifier_reaches_token_endpoint() {
    let harness = Harness::new(descriptor_builder().check(Check::Pkce));
    let (redirect, state, nonce) = harness.start().await;
    let challenge = query_param(&redirect.url, "code_challenge").unwrap();
    assert_eq!(query_param(&redirect.url, "code_challenge_method").as_deref(), Some("S256"));
    harness
        .http
        .insert_response(TOKEN_URL, token_response("A1", &sign(&claims("U1", nonce.as_deref()))));

    harness.controller.handle(&redirect.session_key, callback("C1", &state)).await.unwrap();

    let token_call = &harness.requests_to(TOKEN_URL)[0];
    let verifier = form_param(token_call, "code_verifier").unwrap();
    assert_eq!(pkce_code_challenge(&verifier), challenge);
}

#[tokio::test]
async fn test_client_secret_basic_authentication() {
    let harness = Harness::new(descriptor_builder().token_endpoint_auth(TokenEndpointAuth::ClientSecretBasic));
    let (redirect, state, nonce) = harness.start().await;
    harness
        .http
        .insert_response(TOKEN_URL, token_response("A1", &sign(&claims("U1", nonce.as_deref()))));

    harness.controller.handle(&redirect.session_key, callback("C1", &state)).await.unwrap();

    let token_call = &harness.requests_to(TOKEN_URL)[0];
    let expected = format!("Basic {}", STANDARD.encode(format!("{CLIENT_ID}:{CLIENT_SECRET}")));
    assert_eq!(token_call.header_value("Authorization"), Some(expected.as_str()));
    assert_eq!(form_param(token_call, "client_secret"), None);
    assert_eq!(form_param(token_call, "client_id").as_deref(), Some(CLIENT_ID));
}
