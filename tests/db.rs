//! Query-level tests for the local mirror

mod common;

use common::*;
use serde_json::json;

// ============ Users ============

#[test]
fn test_get_or_create_user_is_idempotent() {
    let pool = setup_test_pool();
    let conn = pool.get().unwrap();

    let first = create_test_user(&conn, "user_1", "One@Example.com");
    let second = create_test_user(&conn, "user_1", "changed@example.com");

    assert_eq!(first.id, second.id);
    assert_eq!(first.email, "one@example.com");
    assert_eq!(second.email, "one@example.com", "Real emails are never overwritten");
    assert_eq!(queries::count_users(&conn).unwrap(), 1);
}

#[test]
fn test_placeholder_user_upgraded_by_real_email() {
    let pool = setup_test_pool();
    let conn = pool.get().unwrap();

    let placeholder = queries::get_or_create_user_by_external_id(&conn, "user_hook").unwrap();
    assert_eq!(placeholder.email, placeholder_email("user_hook"));
    assert_eq!(placeholder.name.as_deref(), Some("User user_hook"));

    let upgraded = create_test_user(&conn, "user_hook", "hook@example.com");
    assert_eq!(upgraded.id, placeholder.id);
    assert_eq!(upgraded.email, "hook@example.com");
    assert_eq!(upgraded.name.as_deref(), Some("User user_hook"));
}

#[test]
fn test_update_user_profile_partial() {
    let pool = setup_test_pool();
    let conn = pool.get().unwrap();
    let user = create_test_user(&conn, "user_1", "one@example.com");

    let updated = queries::update_user_profile(
        &conn,
        &user.id,
        &UpdateUser {
            name: Some("New Name".into()),
            email: None,
        },
    )
    .unwrap();
    assert!(updated);

    let user = queries::get_user_by_id(&conn, &user.id).unwrap().unwrap();
    assert_eq!(user.name.as_deref(), Some("New Name"));
    assert_eq!(user.email, "one@example.com");

    conn.execute("UPDATE users SET updated_at = 0 WHERE id = ?1", [&user.id]).unwrap();
    let touched = queries::update_user_profile(&conn, &user.id, &UpdateUser { name: None, email: None }).unwrap();
    assert!(touched, "An empty update still touches updated_at");
    let user = queries::get_user_by_id(&conn, &user.id).unwrap().unwrap();
    assert!(user.updated_at > 0);
    assert_eq!(user.name.as_deref(), Some("New Name"));

    let missing = queries::update_user_profile(&conn, "missing", &UpdateUser { name: None, email: None }).unwrap();
    assert!(!missing);
}

#[test]
fn test_notification_preferences_persist() {
    let pool = setup_test_pool();
    let conn = pool.get().unwrap();
    let user = create_test_user(&conn, "user_1", "one@example.com");

    let prefs = NotificationPreferences::from_value(json!({"weekly": true})).unwrap();
    assert!(queries::update_notification_preferences(&conn, &user.id, &prefs).unwrap());
    assert!(!queries::update_notification_preferences(&conn, "missing", &prefs).unwrap());

    let user = queries::get_user_by_id(&conn, &user.id).unwrap().unwrap();
    assert_eq!(user.notification_preferences, prefs);
}

// ============ Catalog ============

#[test]
fn test_list_active_plans_skips_inactive() {
    let pool = setup_test_pool();
    let conn = pool.get().unwrap();
    create_test_price(&conn, "price_team", "prod_team", 4900);
    create_test_price(&conn, "price_pro", "prod_pro", 1500);
    let old = create_test_price(&conn, "price_old", "prod_old", 100);

    queries::upsert_price(
        &conn,
        &UpsertPrice {
            id: old.id.clone(),
            product_id: old.product_id.clone(),
            active: false,
            description: old.description.clone(),
            unit_amount: old.unit_amount,
            currency: old.currency.clone(),
            price_type: old.price_type.clone(),
            interval: old.interval.clone(),
            interval_count: old.interval_count,
            trial_period_days: None,
            metadata: None,
        },
    )
    .unwrap();

    let plans = queries::list_active_plans(&conn).unwrap();
    let ids: Vec<&str> = plans.iter().map(|p| p.price_id.as_str()).collect();
    assert_eq!(ids, vec!["price_pro", "price_team"]);
    assert_eq!(plans[0].name, "Product prod_pro");
}

#[test]
fn test_upsert_product_refreshes_fields() {
    let pool = setup_test_pool();
    let conn = pool.get().unwrap();
    create_test_price(&conn, "price_pro", "prod_pro", 1500);

    let product = queries::upsert_product(
        &conn,
        &UpsertProduct {
            id: "prod_pro".into(),
            active: true,
            name: "Pro (renamed)".into(),
            description: Some("Now with more".into()),
            image: None,
            metadata: Some(json!({"tier": "2"})),
        },
    )
    .unwrap();
    assert_eq!(product.name, "Pro (renamed)");
    assert_eq!(product.metadata, Some(json!({"tier": "2"})));
}

// ============ Subscriptions ============

#[test]
fn test_upsert_subscription_skips_stale_writes() {
    let pool = setup_test_pool();
    let conn = pool.get().unwrap();
    let user = create_test_user(&conn, "user_1", "one@example.com");

    let mut sub = test_subscription("sub_1", &user.id, "active", None);
    sub.event_at = 200;
    assert!(queries::upsert_subscription(&conn, &sub).unwrap());

    let mut stale = sub.clone();
    stale.status = "incomplete".into();
    stale.event_at = 100;
    assert!(!queries::upsert_subscription(&conn, &stale).unwrap());

    let mut newer = sub.clone();
    newer.status = "past_due".into();
    newer.event_at = 300;
    assert!(queries::upsert_subscription(&conn, &newer).unwrap());

    let stored = queries::get_subscription(&conn, "sub_1").unwrap().unwrap();
    assert_eq!(stored.status, "past_due");
    assert_eq!(stored.last_event_at, 300);
}

#[test]
fn test_upsert_subscription_never_changes_owner() {
    let pool = setup_test_pool();
    let conn = pool.get().unwrap();
    let owner = create_test_user(&conn, "user_1", "one@example.com");
    let other = create_test_user(&conn, "user_2", "two@example.com");

    create_test_subscription(&conn, "sub_1", &owner.id, "active", None);
    let mut hijack = test_subscription("sub_1", &other.id, "active", None);
    hijack.event_at = 10;
    queries::upsert_subscription(&conn, &hijack).unwrap();

    let stored = queries::get_subscription(&conn, "sub_1").unwrap().unwrap();
    assert_eq!(stored.user_id, owner.id);
}

#[test]
fn test_upsert_subscription_keeps_known_price() {
    let pool = setup_test_pool();
    let conn = pool.get().unwrap();
    let user = create_test_user(&conn, "user_1", "one@example.com");
    create_test_price(&conn, "price_pro", "prod_pro", 1500);
    create_test_subscription(&conn, "sub_1", &user.id, "active", Some("price_pro"));

    let mut update = test_subscription("sub_1", &user.id, "active", None);
    update.event_at = 5;
    queries::upsert_subscription(&conn, &update).unwrap();

    let stored = queries::get_subscription(&conn, "sub_1").unwrap().unwrap();
    assert_eq!(stored.price_id.as_deref(), Some("price_pro"));
}

#[test]
fn test_active_subscription_prefers_latest_period_end() {
    let pool = setup_test_pool();
    let conn = pool.get().unwrap();
    let user = create_test_user(&conn, "user_1", "one@example.com");

    let mut early = test_subscription("sub_early", &user.id, "active", None);
    early.current_period_end = Some(1_000);
    queries::upsert_subscription(&conn, &early).unwrap();
    let mut late = test_subscription("sub_late", &user.id, "trialing", None);
    late.current_period_end = Some(2_000);
    queries::upsert_subscription(&conn, &late).unwrap();
    create_test_subscription(&conn, "sub_dead", &user.id, "canceled", None);

    let active = queries::get_active_subscription_for_user(&conn, &user.id)
        .unwrap()
        .unwrap();
    assert_eq!(active.id, "sub_late");
    assert_eq!(queries::list_subscriptions_for_user(&conn, &user.id).unwrap().len(), 3);
}

#[test]
fn test_has_active_subscription_for_price() {
    let pool = setup_test_pool();
    let conn = pool.get().unwrap();
    let user = create_test_user(&conn, "user_1", "one@example.com");
    create_test_price(&conn, "price_pro", "prod_pro", 1500);
    create_test_price(&conn, "price_team", "prod_team", 4900);
    create_test_subscription(&conn, "sub_1", &user.id, "active", Some("price_pro"));
    create_test_subscription(&conn, "sub_2", &user.id, "canceled", Some("price_team"));

    assert!(queries::has_active_subscription_for_price(&conn, &user.id, "price_pro").unwrap());
    assert!(!queries::has_active_subscription_for_price(&conn, &user.id, "price_team").unwrap());
}

#[test]
fn test_mark_subscription_deleted() {
    let pool = setup_test_pool();
    let conn = pool.get().unwrap();
    let user = create_test_user(&conn, "user_1", "one@example.com");
    create_test_subscription(&conn, "sub_1", &user.id, "active", None);

    assert!(queries::mark_subscription_deleted(&conn, "sub_1", 500, 400, 50).unwrap());
    // Older than what was just applied
    assert!(!queries::mark_subscription_deleted(&conn, "sub_1", 600, 600, 10).unwrap());
    assert!(!queries::mark_subscription_deleted(&conn, "sub_missing", 1, 1, 1).unwrap());

    let stored = queries::get_subscription(&conn, "sub_1").unwrap().unwrap();
    assert_eq!(stored.status, "canceled");
    assert_eq!(stored.ended_at, Some(500));
    assert_eq!(stored.canceled_at, Some(400));
    assert!(!stored.is_active());
}

#[test]
fn test_subscription_requires_known_price() {
    let pool = setup_test_pool();
    let conn = pool.get().unwrap();
    let user = create_test_user(&conn, "user_1", "one@example.com");

    let sub = test_subscription("sub_1", &user.id, "active", Some("price_unmirrored"));
    assert!(queries::upsert_subscription(&conn, &sub).is_err());
}

// ============ Webhook events ============

#[test]
fn test_webhook_event_claim_once() {
    let pool = setup_test_pool();
    let conn = pool.get().unwrap();

    assert!(queries::try_claim_webhook_event(&conn, "evt_1", "checkout.session.completed").unwrap());
    assert!(!queries::try_claim_webhook_event(&conn, "evt_1", "checkout.session.completed").unwrap());

    let record = queries::get_webhook_event(&conn, "evt_1").unwrap().unwrap();
    assert_eq!(record.event_type, "checkout.session.completed");
}

#[test]
fn test_claim_rolls_back_with_transaction() {
    let pool = setup_test_pool();
    let mut conn = pool.get().unwrap();

    {
        let tx = conn.transaction().unwrap();
        assert!(queries::try_claim_webhook_event(&tx, "evt_1", "x").unwrap());
        // dropped without commit
    }

    assert!(queries::get_webhook_event(&conn, "evt_1").unwrap().is_none());
}

#[test]
fn test_prune_webhook_events() {
    let pool = setup_test_pool();
    let conn = pool.get().unwrap();
    queries::try_claim_webhook_event(&conn, "evt_recent", "x").unwrap();
    conn.execute(
        "INSERT INTO webhook_events (id, event_type, received_at) VALUES ('evt_old', 'x', 0)",
        [],
    )
    .unwrap();

    assert_eq!(queries::prune_webhook_events(&conn, 30).unwrap(), 1);
    assert!(queries::get_webhook_event(&conn, "evt_old").unwrap().is_none());
    assert!(queries::get_webhook_event(&conn, "evt_recent").unwrap().is_some());
}
