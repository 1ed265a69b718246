mod common;

use common::{new_user, register, store, PASSWORD};
use kc_crypto::testkit::{vault_key_pair, ClientKeys};
use kc_store::{Invitation, StoreError, DEFAULT_VAULT_NAME};

#[tokio::test]
async fn register_then_confirm_once() {
    let store = store().await;
    let (new, _, _) = new_user("alice", "alice@example.com");
    let (user, token) = store.register_user(new).await.expect("register");
    assert!(user.confirmed_at.is_none());
    assert_eq!(user.unconfirmed_email, "alice@example.com");

    let teams = store.get_teams(&user).await.unwrap();
    assert_eq!(teams.len(), 1);
    assert!(teams[0].is_primary);
    assert_eq!(teams[0].owner_id, "alice");
    assert_eq!(teams[0].size, 1);
    let vault = store
        .get_vault_for_user(&teams[0], DEFAULT_VAULT_NAME, &user)
        .await
        .unwrap();
    assert_eq!(vault.version, 1);

    let confirmed = store.confirm_email(&token.id).await.expect("confirm");
    assert!(confirmed.confirmed_at.is_some());
    assert!(confirmed.unconfirmed_email.is_empty());
    assert_eq!(confirmed.email, "alice@example.com");

    assert!(matches!(
        store.confirm_email(&token.id).await,
        Err(StoreError::DoesntExist)
    ));
}

#[tokio::test]
async fn duplicate_id_or_email_already_exists() {
    let store = store().await;
    register(&store, "alice").await;

    let (dup_id, _, _) = new_user("alice", "other@example.com");
    assert!(matches!(store.register_user(dup_id).await, Err(StoreError::AlreadyExists)));

    let (dup_email, _, _) = new_user("alice2", "alice@example.com");
    assert!(matches!(store.register_user(dup_email).await, Err(StoreError::AlreadyExists)));
}

#[tokio::test]
async fn vault_keys_must_address_exactly_the_new_user() {
    let store = store().await;
    let keys = ClientKeys::generate();
    let vault = ClientKeys::generate();
    let (mut new, _, _) = new_user("carol", "carol@example.com");
    new.key_pack = keys.registration_pack();

    new.vault_keys = vault_key_pair(&keys, &vault, ["carol", "dave"]);
    assert!(matches!(store.register_user(new.clone()).await, Err(StoreError::InvalidKeys)));

    new.vault_keys = vault_key_pair(&keys, &vault, ["dave"]);
    assert!(matches!(store.register_user(new.clone()).await, Err(StoreError::InvalidKeys)));

    // nothing was left behind by the failed attempts
    assert!(matches!(store.find_user("carol").await, Err(StoreError::DoesntExist)));

    new.vault_keys = vault_key_pair(&keys, &vault, ["carol"]);
    store.register_user(new).await.expect("exact keys register");
}

#[tokio::test]
async fn foreign_vault_signature_is_rejected() {
    let store = store().await;
    let (mut new, _, vault) = new_user("erin", "erin@example.com");
    new.vault_keys = vault_key_pair(&ClientKeys::generate(), &vault, ["erin"]);
    assert!(matches!(store.register_user(new).await, Err(StoreError::InvalidSignature)));
}

#[tokio::test]
async fn bad_attributes_are_reported_by_field() {
    let store = store().await;
    let (mut new, _, _) = new_user("al", "not-an-email");
    new.full_name.clear();
    new.password = "123".into();
    let err = store.register_user(new).await.unwrap_err();
    let fields = err.fields().expect("field errors");
    for f in ["user_id", "user_email", "user_fullname", "user_password"] {
        assert_eq!(fields[f], if f == "user_password" { "too short" } else { "invalid" }, "{f}");
    }
}

#[tokio::test]
async fn invite_is_consumed_by_registration() {
    let store = store().await;
    let (alice, _) = register(&store, "alice").await;

    let outcome = store
        .add_or_invite_user_by_email(&alice.primary, &alice.user, "bob@x.com")
        .await
        .unwrap();
    assert!(matches!(outcome, Invitation::Invited(ref i) if i.email == "bob@x.com"));
    assert_eq!(store.get_invites(&alice.primary).await.unwrap().len(), 1);
    assert!(matches!(
        store
            .add_or_invite_user_by_email(&alice.primary, &alice.user, "bob@x.com")
            .await,
        Err(StoreError::AlreadyInvited)
    ));

    let (new, _, _) = new_user("bob", "bob@x.com");
    let (bob, _) = store.register_user(new).await.unwrap();
    let teams = store.get_teams(&bob).await.unwrap();
    assert!(teams.iter().any(|t| t.id == alice.primary.id));
    assert!(!store.check_admin(&alice.primary, &bob).await.unwrap());
    assert!(store.get_invites(&alice.primary).await.unwrap().is_empty());
}

#[tokio::test]
async fn inviting_a_malformed_address_fails() {
    let store = store().await;
    let (alice, _) = register(&store, "alice").await;
    assert!(matches!(
        store
            .add_or_invite_user_by_email(&alice.primary, &alice.user, "nope")
            .await,
        Err(StoreError::InvalidEmail)
    ));
}

#[tokio::test]
async fn password_check() {
    let store = store().await;
    let (alice, _) = register(&store, "alice").await;
    let user = store.find_user("alice").await.unwrap();
    assert!(user.check_password(PASSWORD).is_ok());
    assert!(matches!(alice.user.check_password("wrong"), Err(StoreError::Unauthorized)));
}

#[tokio::test]
async fn email_change_goes_through_confirmation() {
    let store = store().await;
    let (alice, _) = register(&store, "alice").await;
    let (bob, _) = register(&store, "bob").await;
    store.confirm_email(&alice.token.id).await.unwrap();

    assert!(matches!(
        store.request_email_change(&alice.user, &bob.user.email).await,
        Err(StoreError::AlreadyExists)
    ));
    assert!(matches!(
        store.request_email_change(&alice.user, "bad").await,
        Err(StoreError::InvalidEmail)
    ));

    let (pending, token) = store
        .request_email_change(&alice.user, "alice@new.example.com")
        .await
        .unwrap();
    assert_eq!(pending.email, "alice@example.com");
    assert_eq!(pending.unconfirmed_email, "alice@new.example.com");
    let first_confirmation = store.find_user("alice").await.unwrap().confirmed_at;

    let confirmed = store.confirm_email(&token.id).await.unwrap();
    assert_eq!(confirmed.email, "alice@new.example.com");
    assert!(confirmed.unconfirmed_email.is_empty());
    assert_eq!(confirmed.confirmed_at, first_confirmation);
    assert_eq!(
        store.find_user_by_email("alice@new.example.com").await.unwrap().id,
        "alice"
    );
}

#[tokio::test]
async fn get_team_hides_foreign_teams() {
    let store = store().await;
    let (alice, _) = register(&store, "alice").await;
    let (bob, _) = register(&store, "bob").await;
    assert_eq!(
        store.get_team(&alice.user, &alice.primary.id).await.unwrap().id,
        alice.primary.id
    );
    assert!(matches!(
        store.get_team(&bob.user, &alice.primary.id).await,
        Err(StoreError::DoesntExist)
    ));
}
