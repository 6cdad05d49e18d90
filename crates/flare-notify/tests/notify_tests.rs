use flare_core::ids::{AccountId, AppId};
use flare_core::ports::NotificationSender;
use flare_notify::*;
use std::collections::HashMap;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn placeholders() -> HashMap<String, String> {
    [
        ("TRIGGER_NAME", "on-latest"),
        ("APP_NAME", "Shop"),
        ("WORKFLOW_NAME", "rolling-deploy"),
        ("TRIGGER_URL", "https://app.flare.dev/#/account/a/app/b/triggers"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

#[tokio::test]
async fn test_webhook_channel_receives_rendered_notice() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/freeze"))
        .and(header("authorization", "Bearer s3cret"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let config = NotifyConfig::default().with_channel(ChannelConfig::Webhook(WebhookConfig {
        url: format!("{}/freeze", server.uri()),
        auth: Some(WebhookAuth {
            auth_type: AuthType::Bearer,
            token: "s3cret".into(),
        }),
        ..Default::default()
    }));
    let notifier = FreezeNotifier::new(&config);

    notifier
        .notify_freeze_rejection(
            AccountId::new(),
            AppId::new(),
            &["w1".to_string(), "w2".to_string()],
            &placeholders(),
        )
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let notice: FreezeNotice = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(notice.window_ids, vec!["w1", "w2"]);
    assert_eq!(
        notice.message,
        "Trigger on-latest could not deploy rolling-deploy in application Shop \
         because a deployment freeze window is active. \
         https://app.flare.dev/#/account/a/app/b/triggers"
    );
    assert_eq!(
        notice.trigger_url.as_deref(),
        Some("https://app.flare.dev/#/account/a/app/b/triggers")
    );
}

#[tokio::test]
async fn test_failing_channel_does_not_stop_others() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/slack"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let config = NotifyConfig::default()
        .with_channel(ChannelConfig::Webhook(WebhookConfig {
            url: format!("{}/broken", server.uri()),
            ..Default::default()
        }))
        .with_channel(ChannelConfig::Slack(SlackConfig {
            webhook_url: format!("{}/slack", server.uri()),
            ..Default::default()
        }));
    let notifier = FreezeNotifier::new(&config);

    let err = notifier
        .notify_freeze_rejection(AccountId::new(), AppId::new(), &["w1".to_string()], &placeholders())
        .await
        .unwrap_err();

    assert!(matches!(err, flare_core::Error::Notification(_)));
    assert!(err.to_string().contains("Webhook returned 500"));
}

#[tokio::test]
async fn test_custom_templates() {
    let config = NotifyConfig {
        title_template: "Frozen: ${APP_NAME}".into(),
        message_template: "${TRIGGER_NAME} blocked by ${UNKNOWN}".into(),
        ..Default::default()
    };
    let notice = FreezeNotifier::new(&config).render(
        AccountId::new(),
        AppId::new(),
        &[],
        &placeholders(),
    );
    assert_eq!(notice.title, "Frozen: Shop");
    assert_eq!(notice.message, "on-latest blocked by ${UNKNOWN}");
}
