mod common;

use common::{create_vault, harness, register, Sent};
use kc_crypto::testkit::{signed_blob, ClientKeys};
use kc_store::{Invitation, StoreError};

#[tokio::test]
async fn registration_mails_the_confirmation_token() {
    let h = harness().await;
    let (alice, _) = register(&h.service, "alice").await;
    assert_eq!(
        h.mail.sent.lock().clone(),
        vec![Sent::Confirmation {
            user: "alice".into(),
            token: alice.token.id.clone(),
            locale: "en".into(),
        }]
    );

    let (_, token) = h
        .service
        .request_email_change(&alice.user, "alice@elsewhere.org", Some("de"))
        .await
        .unwrap();
    assert_eq!(
        h.mail.sent.lock().last().cloned(),
        Some(Sent::Confirmation {
            user: "alice".into(),
            token: token.id,
            locale: "de".into(),
        })
    );
}

#[tokio::test]
async fn only_invites_are_mailed() {
    let h = harness().await;
    let (alice, _) = register(&h.service, "alice").await;
    let (bob, _) = register(&h.service, "bob").await;
    h.mail.sent.lock().clear();

    let added = h
        .service
        .add_or_invite_user_by_email(&alice.primary, &alice.user, &bob.user.email, None)
        .await
        .unwrap();
    assert!(matches!(added, Invitation::Added(_)));
    assert!(h.mail.sent.lock().is_empty());

    let invited = h
        .service
        .add_or_invite_user_by_email(&alice.primary, &alice.user, "carol@example.com", Some("fr"))
        .await
        .unwrap();
    assert!(matches!(invited, Invitation::Invited(_)));
    assert_eq!(
        h.mail.sent.lock().clone(),
        vec![Sent::Invitation {
            team: alice.primary.id.clone(),
            email: "carol@example.com".into(),
            locale: "fr".into(),
        }]
    );

    // a refused invite sends nothing
    assert!(h
        .service
        .add_or_invite_user_by_email(&alice.primary, &bob.user, "dan@example.com", None)
        .await
        .is_err());
    assert_eq!(h.mail.sent.lock().len(), 1);
}

#[tokio::test]
async fn each_committed_change_is_announced() {
    let h = harness().await;
    let (alice, generic) = register(&h.service, "alice").await;
    let mut sub = h.service.broadcaster().subscribe("watcher").await.unwrap();

    // rejected before commit, so never announced
    let forged = signed_blob(&ClientKeys::generate(), 48);
    assert!(matches!(
        h.service.add_secret(&generic.vault, &alice.user, forged).await,
        Err(StoreError::InvalidSignature)
    ));

    let s = h.service.add_secret(&generic.vault, &alice.user, generic.blob()).await.unwrap();
    h.service
        .update_secret(&generic.vault, &alice.user, &s.id, generic.blob())
        .await
        .unwrap();
    h.service.delete_secret(&generic.vault, &alice.user, &s.id).await.unwrap();

    let mut seen = Vec::new();
    for _ in 0..3 {
        let b = sub.recv().await.unwrap();
        assert_eq!(b.team, alice.primary.id);
        assert_eq!(b.vault, "Generic");
        let v: serde_json::Value = serde_json::from_slice(&b.message).unwrap();
        assert_eq!(v["secret"]["id"], s.id.as_str());
        seen.push((v["action"].as_str().unwrap().to_owned(), v["secret"]["version"].as_i64()));
    }
    assert_eq!(
        seen,
        vec![
            ("secret:new".to_owned(), Some(1)),
            ("secret:change".to_owned(), Some(2)),
            ("secret:remove".to_owned(), None),
        ]
    );
}

#[tokio::test]
async fn batch_add_announces_every_item() {
    let h = harness().await;
    let (alice, generic) = register(&h.service, "alice").await;
    let mut sub = h.service.broadcaster().subscribe("watcher").await.unwrap();

    let added = h
        .service
        .add_secret_list(&generic.vault, &alice.user, vec![generic.blob(), generic.blob()])
        .await
        .unwrap();
    for s in &added {
        let v: serde_json::Value = serde_json::from_slice(&sub.recv().await.unwrap().message).unwrap();
        assert_eq!(v["action"], "secret:new");
        assert_eq!(v["secret"]["id"], s.id.as_str());
        assert_eq!(v["secret"]["vault_version"], s.vault_version);
    }
}

#[tokio::test]
async fn move_announces_removal_then_arrival() {
    let h = harness().await;
    let (alice, generic) = register(&h.service, "alice").await;
    let ops = create_vault(&h.service, &alice, "Ops").await;
    let s = h.service.add_secret(&generic.vault, &alice.user, generic.blob()).await.unwrap();
    let mut sub = h.service.broadcaster().subscribe("watcher").await.unwrap();

    let moved = h
        .service
        .move_to_team_vault(&alice.user, &generic.vault, &s.id, &ops.vault)
        .await
        .unwrap();

    let gone = sub.recv().await.unwrap();
    assert_eq!(gone.vault, "Generic");
    let v: serde_json::Value = serde_json::from_slice(&gone.message).unwrap();
    assert_eq!(v["action"], "secret:remove");
    assert_eq!(v["secret"]["id"], s.id.as_str());

    let arrived = sub.recv().await.unwrap();
    assert_eq!(arrived.vault, "Ops");
    let v: serde_json::Value = serde_json::from_slice(&arrived.message).unwrap();
    assert_eq!(v["action"], "secret:new");
    assert_eq!(v["secret"]["vault"], "Ops");
    assert_eq!(v["secret"]["vault_version"], moved.vault_version);
}

#[tokio::test]
async fn sessions_resolve_to_their_user() {
    let h = harness().await;
    let (alice, _) = register(&h.service, "alice").await;
    let session = h.service.sessions().create("alice", "cli", false).await.unwrap();

    let (refreshed, user) = h.service.authenticate(&session.id, "cli/2").await.unwrap();
    assert_eq!(user.id, alice.user.id);
    assert_eq!(refreshed.agent, "cli/2");
    assert!(matches!(
        h.service.authenticate("unknown", "cli").await,
        Err(StoreError::DoesntExist)
    ));
}
