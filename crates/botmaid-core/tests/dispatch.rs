mod common;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use chrono::Duration;

use botmaid_core::{
    command::{handler_fn, CommandDescriptor, Outcome},
    config::Config,
    dispatcher::{dispatch, Disposition, DropReason},
    words::Words,
    Error,
};
use common::*;

#[tokio::test]
async fn master_bans_a_quoted_name_with_exactly_one_reply() {
    let adapter = FakeAdapter::new();
    let (bm, conn) = bot(adapter.clone()).await;

    let d = dispatch(bm.clone(), conn, from_master(r#"/ban "John Doe""#)).await;

    assert_eq!(d, Disposition::Handled { by: "ban".into() });
    assert_eq!(adapter.pushed_texts(), vec![Words::default().banned.pick().to_string()]);
    assert!(bm
        .auth()
        .store()
        .set_is_member("ban_tg", "John Doe")
        .await
        .unwrap());
}

#[tokio::test]
async fn chatter_without_prefix_is_dropped_silently() {
    let adapter = FakeAdapter::new();
    let (bm, conn) = bot(adapter.clone()).await;

    let d = dispatch(bm, conn, from_guest("hello bot")).await;

    assert_eq!(d, Disposition::Dropped(DropReason::Unmatched));
    assert!(adapter.pushes().is_empty());
}

#[tokio::test]
async fn guests_get_one_no_permission_reply_for_master_commands() {
    let adapter = FakeAdapter::new();
    let (bm, conn) = bot(adapter.clone()).await;

    let d = dispatch(bm, conn, from_guest("/ban 5")).await;

    assert_eq!(
        d,
        Disposition::Handled {
            by: "help-responder".into()
        }
    );
    let texts = adapter.pushed_texts();
    assert_eq!(texts.len(), 1);
    assert_eq!(texts[0], "@guest you are not allowed to use ban.");
}

#[tokio::test]
async fn unknown_commands_get_one_reply() {
    let adapter = FakeAdapter::new();
    let (bm, conn) = bot(adapter.clone()).await;

    dispatch(bm, conn, from_guest("/frobnicate now")).await;

    assert_eq!(
        adapter.pushed_texts(),
        vec!["@guest unknown command: frobnicate. Try help.".to_string()]
    );
}

#[tokio::test]
async fn wrong_arity_shows_the_command_details() {
    let adapter = FakeAdapter::new();
    let (bm, conn) = bot(adapter.clone()).await;

    dispatch(bm, conn, from_master("/ban")).await;

    let texts = adapter.pushed_texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].starts_with("ban - "), "{texts:?}");
    assert!(texts[0].contains("ban <user>"));
}

#[tokio::test]
async fn malformed_commands_are_reported_once_and_chatter_is_ignored() {
    let adapter = FakeAdapter::new();
    let (bm, conn) = bot(adapter.clone()).await;

    let d = dispatch(bm.clone(), conn.clone(), from_master(r#"/ban "John"#)).await;
    assert!(matches!(d, Disposition::Errored(_)), "{d:?}");
    assert_eq!(adapter.pushes().len(), 1);
    assert!(adapter.pushed_texts()[0].starts_with("@boss could not read that command"));

    let d = dispatch(bm, conn, from_guest("it's fine")).await;
    assert_eq!(d, Disposition::Dropped(DropReason::Unparseable));
    assert_eq!(adapter.pushes().len(), 1);
}

#[tokio::test]
async fn updates_older_than_startup_are_dropped() {
    let adapter = FakeAdapter::new();
    let (bm, conn) = bot(adapter.clone()).await;

    let mut update = from_master("/status");
    update.time = bm.started_at() - Duration::minutes(1);

    assert_eq!(
        dispatch(bm, conn, update).await,
        Disposition::Dropped(DropReason::Stale)
    );
    assert!(adapter.pushes().is_empty());
}

#[tokio::test]
async fn banned_users_are_ignored() {
    let adapter = FakeAdapter::new();
    let (bm, conn) = bot(adapter.clone()).await;

    dispatch(bm.clone(), conn.clone(), from_master("/ban 2")).await;
    let d = dispatch(bm, conn, from_guest("/status")).await;

    assert_eq!(d, Disposition::Dropped(DropReason::Banned));
    assert_eq!(adapter.pushes().len(), 1);
}

#[tokio::test]
async fn self_mention_suffix_is_stripped_from_the_command() {
    let adapter = FakeAdapter::new();
    let (bm, conn) = bot(adapter.clone()).await;

    let d = dispatch(bm, conn, from_guest("/status@maid")).await;

    assert_eq!(d, Disposition::Handled { by: "status".into() });
    assert_eq!(adapter.pushed_texts(), vec!["√".to_string()]);
}

#[tokio::test]
async fn reply_flood_bans_the_conversation() {
    let adapter = FakeAdapter::new();
    let (bm, conn) = bot(adapter.clone()).await;

    for _ in 0..5 {
        let d = dispatch(bm.clone(), conn.clone(), from_guest("/status")).await;
        assert_eq!(d, Disposition::Handled { by: "status".into() });
    }
    assert!(bm.auth().is_conversation_banned(CONN, GROUP).await.unwrap());

    let d = dispatch(bm, conn, from_master("/status")).await;
    assert_eq!(d, Disposition::Dropped(DropReason::Banned));
    assert_eq!(adapter.pushes().len(), 5);
}

#[tokio::test]
async fn validation_errors_become_a_single_reply() {
    let adapter = FakeAdapter::new();
    let (bm, conn) = bot(adapter.clone()).await;

    let d = dispatch(bm, conn, from_master("/send hi group abc")).await;

    assert!(matches!(d, Disposition::Errored(_)));
    assert_eq!(
        adapter.pushed_texts(),
        vec!["abc is not a valid chat id.".to_string()]
    );
}

#[tokio::test]
async fn send_pushes_to_another_conversation() {
    let adapter = FakeAdapter::new();
    let (bm, conn) = bot(adapter.clone()).await;

    dispatch(bm, conn, from_master(r#"/send "good morning" private 42"#)).await;

    let pushes = adapter.pushes();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].chat.as_ref().unwrap().id, 42);
    assert_eq!(pushes[0].message.as_ref().unwrap().text, "good morning");
}

#[tokio::test]
async fn subscribe_toggles_and_lists_topics() {
    let adapter = FakeAdapter::new();
    let config = Config {
        subscription_topics: vec!["news".into(), "weather".into()],
        ..Config::default()
    };
    let bm = builder(config, adapter.clone()).await.build();
    let conn = bm.connection(CONN).unwrap().clone();

    dispatch(bm.clone(), conn.clone(), from_master("/subscribe")).await;
    dispatch(bm.clone(), conn.clone(), from_master("/subscribe news")).await;
    assert_eq!(
        bm.broadcast("news", botmaid_core::domain::Message::text("extra"))
            .await
            .unwrap(),
        1
    );
    dispatch(bm.clone(), conn.clone(), from_master("/subscribe news")).await;

    assert_eq!(
        adapter.pushed_texts(),
        vec![
            "Available topics: news and weather.".to_string(),
            "Subscribed to news.".to_string(),
            "extra".to_string(),
            "Unsubscribed from news.".to_string(),
        ]
    );
}

#[tokio::test]
async fn help_lists_only_what_the_caller_may_run() {
    let adapter = FakeAdapter::new();
    let (bm, conn) = bot(adapter.clone()).await;

    dispatch(bm.clone(), conn.clone(), from_guest("/help")).await;
    dispatch(bm, conn, from_master("/help")).await;

    let texts = adapter.pushed_texts();
    assert!(texts[0].starts_with("I am Maid."));
    assert!(texts[0].contains("\nstatus - "));
    assert!(!texts[0].contains("\nban - "));
    assert!(texts[1].contains("\nban - "));
}

#[tokio::test]
async fn first_handled_descriptor_short_circuits() {
    let adapter = FakeAdapter::new();
    let mut b = builder(Config::default(), adapter.clone()).await;
    let late = Arc::new(AtomicUsize::new(0));
    let seen = late.clone();

    b.register(
        CommandDescriptor::new("passthrough", handler_fn(|_ctx| async { Ok(Outcome::NotHandled) }))
            .names(["ping"])
            .priority(20),
    );
    b.register(
        CommandDescriptor::new(
            "pong",
            handler_fn(|ctx| async move {
                ctx.reply_text("pong").await?;
                Ok::<_, Error>(Outcome::Handled)
            }),
        )
        .names(["ping"])
        .priority(10),
    );
    b.register(
        CommandDescriptor::new(
            "never",
            handler_fn(move |_ctx| {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(Outcome::Handled)
                }
            }),
        )
        .names(["ping"])
        .priority(5),
    );
    let bm = b.build();
    let conn = bm.connection(CONN).unwrap().clone();

    let d = dispatch(bm, conn, from_guest("/ping")).await;

    assert_eq!(d, Disposition::Handled { by: "pong".into() });
    assert_eq!(late.load(Ordering::SeqCst), 0);
    assert_eq!(adapter.pushed_texts(), vec!["pong".to_string()]);
}

#[tokio::test]
async fn internal_handler_errors_are_logged_not_replied() {
    let adapter = FakeAdapter::new();
    let mut b = builder(Config::default(), adapter.clone()).await;
    b.register(
        CommandDescriptor::new(
            "broken",
            handler_fn(|_ctx| async { Err(Error::External("backend down".into())) }),
        )
        .names(["broken"]),
    );
    let bm = b.build();
    let conn = bm.connection(CONN).unwrap().clone();

    let d = dispatch(bm, conn, from_guest("/broken")).await;

    assert_eq!(
        d,
        Disposition::Errored("external error: backend down".into())
    );
    assert!(adapter.pushes().is_empty());
}

#[tokio::test]
async fn version_commands_maintain_and_show_the_change_log() {
    let adapter = FakeAdapter::new();
    let config = Config {
        flood_threshold: 100,
        subscription_topics: vec!["log".into()],
        ..Config::default()
    };
    let bm = builder(config, adapter.clone()).await.build();
    let conn = bm.connection(CONN).unwrap().clone();

    let steps = [
        from_guest("/version"),
        from_master("/version set 1.2"),
        from_master(r#"/version log "faster replies""#),
        from_master("/version logbm 'atomic store'"),
        from_guest("/version"),
        from_guest("/version log"),
    ];
    for update in steps {
        let d = dispatch(bm.clone(), conn.clone(), update).await;
        assert!(matches!(d, Disposition::Handled { .. }), "{d:?}");
    }

    let log = "Changes in 1.2:\n1. faster replies\nFramework:\n1. atomic store";
    assert_eq!(
        adapter.pushed_texts(),
        vec![
            "No version has been set yet.".to_string(),
            "Version set to 1.2.".to_string(),
            "Change log entry added.".to_string(),
            "Framework change log entry added.".to_string(),
            "Current version: 1.2.".to_string(),
            log.to_string(),
        ]
    );

    dispatch(bm.clone(), conn.clone(), from_master("/subscribe log")).await;
    let d = dispatch(bm, conn, from_master("/version broadcast")).await;
    assert_eq!(
        d,
        Disposition::Handled {
            by: "version-master".into()
        }
    );
    let texts = adapter.pushed_texts();
    assert_eq!(
        &texts[texts.len() - 3..],
        &[
            "Subscribed to log.".to_string(),
            log.to_string(),
            "Change log sent to 1 chats.".to_string(),
        ]
    );
}

#[tokio::test]
async fn guests_cannot_change_the_version() {
    let adapter = FakeAdapter::new();
    let (bm, conn) = bot(adapter.clone()).await;

    let d = dispatch(bm.clone(), conn.clone(), from_guest("/version set 9")).await;
    assert_eq!(
        d,
        Disposition::Handled {
            by: "help-responder".into()
        }
    );
    assert_eq!(
        botmaid_core::version::current_version(&**bm.auth().store())
            .await
            .unwrap(),
        None
    );

    let d = dispatch(bm, conn, from_master("/version log entry")).await;
    assert!(matches!(d, Disposition::Errored(_)), "{d:?}");
    assert_eq!(
        adapter.pushed_texts().last().map(String::as_str),
        Some("No version has been set yet.")
    );
}
