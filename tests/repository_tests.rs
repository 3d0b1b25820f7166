mod test_utils;

use test_utils::TestContext;
use triggers::repositories::{ActivityRepository, NewTrigger, UserRepository};

#[tokio::test]
async fn disabled_triggers_are_found_by_name_and_stay_inactive() {
    let ctx = TestContext::new().await.unwrap();
    let repo = ctx.triggers();
    let created = repo.create(NewTrigger::disabled("quiet")).await.unwrap();
    repo.add_action(
        created.id,
        "send_message",
        serde_json::json!({ "text": "hi" }),
    )
    .await
    .unwrap();

    let found = repo
        .find_by_name("quiet")
        .await
        .unwrap()
        .expect("trigger stored under its name");
    assert_eq!(found.id, created.id);
    assert!(!found.is_enabled);
    assert!(repo.find_by_name("loud").await.unwrap().is_none());

    let loaded = ctx.engine.load(created.id).await.unwrap();
    assert_eq!(loaded.actions.len(), 1);
    assert!(!loaded.is_active());
}

#[tokio::test]
async fn users_are_found_by_username() {
    let ctx = TestContext::new().await.unwrap();
    let created = ctx.user("grace").await.unwrap();
    let users = UserRepository::new(&ctx.db);

    let found = users
        .find_by_username("grace")
        .await
        .unwrap()
        .expect("user stored under its username");
    assert_eq!(found.id, created.id);
    assert_eq!(found.email.as_deref(), Some("grace@example.com"));
    assert!(users.find_by_username("ada").await.unwrap().is_none());
}

#[tokio::test]
async fn with_ids_selects_only_the_given_users() {
    let ctx = TestContext::new().await.unwrap();
    let ada = ctx.user("ada").await.unwrap();
    ctx.user("grace").await.unwrap();
    let linus = ctx.user("linus").await.unwrap();

    let mut selected: Vec<i32> = UserRepository::new(&ctx.db)
        .with_ids([linus.id, ada.id])
        .all(&ctx.db)
        .await
        .unwrap()
        .into_iter()
        .map(|user| user.id)
        .collect();
    selected.sort_unstable();

    assert_eq!(selected, vec![ada.id, linus.id]);
}

#[tokio::test]
async fn activities_are_listed_per_trigger_by_user() {
    let ctx = TestContext::new().await.unwrap();
    let ada = ctx.user("ada").await.unwrap();
    let grace = ctx.user("grace").await.unwrap();
    let (welcome, _) = ctx.welcome_trigger("welcome", 5).await.unwrap();
    let (other, _) = ctx.welcome_trigger("other", 5).await.unwrap();
    let ledger = ctx.engine.ledger();

    let pairs = [(welcome.id, grace.id), (welcome.id, ada.id), (other.id, ada.id)];
    for (trigger_id, user_id) in pairs {
        ledger
            .lock(trigger_id, user_id, |_txn, _activity| Box::pin(async { Ok(()) }))
            .await
            .unwrap();
    }

    let listed = ActivityRepository::new(&ctx.db)
        .list_for_trigger(welcome.id)
        .await
        .unwrap();
    let users: Vec<i32> = listed.iter().map(|activity| activity.user_id).collect();
    assert_eq!(users, vec![ada.id, grace.id]);
    assert!(listed.iter().all(|activity| activity.action_count == 1));
    assert!(
        listed
            .iter()
            .all(|activity| activity.last_action_datetime.is_some())
    );
}
