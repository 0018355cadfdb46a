use agora_api::{CollectionKey, EntityId, Error, Store, StorePath, UserId};
use agora_client::{CollectionState, ForumClient, SessionContext};
use agora_mock_server::MockStore;
use futures::FutureExt;
use serde_json::{json, Value};

use crate::{init_logging, seed_comment, seed_post, signed_in, superuser};

fn post1() -> EntityId {
    EntityId::from("post1")
}

async fn forum_with_post() -> (MockStore, ForumClient<MockStore>) {
    init_logging();
    let store = MockStore::new();
    seed_post(&store, "news", "post1", "author", 1_000, &[]).await;
    let client = ForumClient::new(store.clone());
    client.subscribe(CollectionKey::all_posts()).unwrap();
    client.subscribe(CollectionKey::comments_of(post1())).unwrap();
    client.pump();
    (store, client)
}

#[tokio::test]
async fn failed_like_is_reverted() {
    let (store, client) = forum_with_post().await;
    let u1 = UserId::from("u1");
    store.fail_writes_under(StorePath::post(&post1()).child("likes"), "offline");
    let (session, post) = (signed_in("u1"), post1());
    let gate = store.hold_writes();

    let (res, ()) = futures::join!(client.toggle_like(&session, &post), async {
        assert!(client.is_liked_by(&post1(), &u1));
        assert_eq!(client.like_count_for(&post1()), Some(1));
        assert!(client.is_pending(&post1()));
        gate.open();
    });

    assert_eq!(res, Err(Error::unavailable("offline")));
    assert!(!client.is_liked_by(&post1(), &u1));
    assert_eq!(client.like_count_for(&post1()), Some(0));
    assert!(!client.is_pending(&post1()));
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn partial_comment_stays_visible_and_can_be_completed() {
    let (store, client) = forum_with_post().await;
    store.fail_writes_under(StorePath::parse("posts/post1/commentIds"), "index down");

    let err = client
        .create_comment(&signed_in("u1"), post1(), String::from("hi"))
        .await
        .unwrap_err();
    let (committed, failed, remaining) = match err {
        Error::PartialCommit {
            committed,
            failed,
            remaining,
            ..
        } => (committed, failed, remaining),
        e => panic!("expected a partial commit, got {e:?}"),
    };
    assert_eq!(committed.len(), 1);
    let comment = EntityId::from(committed[0].last().unwrap());
    assert_eq!(committed[0], StorePath::comment(&post1(), &comment));
    assert_eq!(failed, StorePath::comment_entry(&post1(), &comment));
    assert_eq!(remaining.len(), 1);

    // No rollback: a full read of the primary collection sees the comment
    let primary = store.read(&StorePath::comments(&post1())).await.unwrap().unwrap();
    assert!(primary.get(comment.as_str()).is_some());
    client.pump();
    let comments = client.comments_for(&post1());
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].id, comment);
    assert!(!client.is_pending(&comment));

    store.heal();
    assert_eq!(
        client.retry_writes(remaining).await.unwrap(),
        vec![StorePath::comment_entry(&post1(), &comment)]
    );
    assert_eq!(
        store.test_get(&StorePath::comment_entry(&post1(), &comment)),
        Some(Value::Bool(true))
    );
}

#[tokio::test]
async fn comment_is_written_before_its_index() {
    let (store, client) = forum_with_post().await;
    let before = store.write_log().len();
    let c = client
        .create_comment(&signed_in("u1"), post1(), String::from("hi"))
        .await
        .unwrap();
    assert_eq!(
        store.write_log()[before..],
        [
            StorePath::comment(&post1(), &c.id),
            StorePath::comment_entry(&post1(), &c.id)
        ]
    );
    let record = store.test_get(&StorePath::comment(&post1(), &c.id)).unwrap();
    assert_eq!(record["author"]["uid"], json!("u1"));
    assert_eq!(record["content"], json!("hi"));
}

#[tokio::test]
async fn echoed_comment_appears_once() {
    let (store, client) = forum_with_post().await;
    let session = signed_in("u1");
    let gate = store.hold_writes();

    let (res, ()) = futures::join!(
        client.create_comment(&session, post1(), String::from("hi")),
        async {
            let view = client.comments_for(&post1());
            assert_eq!(view.len(), 1);
            assert!(client.is_pending(&view[0].id));
            gate.open();
        }
    );
    let c = res.unwrap();
    assert_eq!(client.pump(), 2);
    let view = client.comments_for(&post1());
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].id, c.id);
    assert!(!client.is_pending(&c.id));
}

#[tokio::test]
async fn echo_arriving_before_settlement_resolves_the_insert() {
    let (store, client) = forum_with_post().await;
    let handle = client.subscribe(CollectionKey::comments_of(post1())).unwrap();
    client.pump();
    let session = signed_in("u1");
    let gate = store.hold_writes();

    let (res, ()) = futures::join!(
        client.create_comment(&session, post1(), String::from("hi")),
        async {
            let provisional = client.comments_for(&post1())[0].id.clone();
            let report = client.deliver(
                &handle,
                Some(json!({ provisional.as_str(): { "content": "hi", "createdAt": 5 } })),
            );
            assert_eq!(report.resolved.len(), 1);
            assert_eq!(client.comments_for(&post1()).len(), 1);
            assert!(!client.is_pending(&provisional));
            gate.open();
        }
    );
    let c = res.unwrap();
    client.pump();
    let view = client.comments_for(&post1());
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].id, c.id);
}

#[tokio::test]
async fn stale_snapshot_after_release_is_ignored() {
    let (store, client) = forum_with_post().await;
    seed_comment(&store, "post1", "c1", "author", 2_000).await;
    let key = CollectionKey::comments_of(post1());
    let handle = client.subscribe(key.clone()).unwrap();
    client.pump();
    let before = client.comments_for(&post1());
    assert_eq!(before.len(), 1);

    assert!(client.release(&handle));
    let stale = Some(json!({ "c2": { "content": "late", "createdAt": 3_000 } }));
    assert!(client.deliver(&handle, stale.clone()).ignored);
    assert_eq!(client.comments_for(&post1()), before);

    // Released twice is fine, and clearing does not resurrect anything
    assert!(!client.release(&handle));
    assert!(client.release_and_clear(&handle));
    assert_eq!(client.state_of(&key), CollectionState::Empty);
    assert!(client.deliver(&handle, stale).ignored);
    assert_eq!(client.state_of(&key), CollectionState::Empty);
    assert!(client.comments_for(&post1()).is_empty());
}

#[tokio::test]
async fn resubscribing_keeps_a_single_feed() {
    init_logging();
    let store = MockStore::new();
    let client = ForumClient::new(store.clone());
    let key = CollectionKey::comments_of(post1());

    let first = client.subscribe(key.clone()).unwrap();
    assert_eq!(client.state_of(&key), CollectionState::Loading);
    let second = client.subscribe(key.clone()).unwrap();
    assert_ne!(first, second);
    assert_eq!(client.live_subscriptions(), 1);
    assert_eq!(store.live_feed_count(), 1);

    assert!(client.deliver(&first, Some(json!({ "c1": {} }))).ignored);
    assert_eq!(client.pump(), 1);
    assert_eq!(client.state_of(&key), CollectionState::Live);

    drop(client);
    assert_eq!(store.live_feed_count(), 0);
}

#[tokio::test]
async fn snapshot_merged_while_write_is_in_flight() {
    let (store, client) = forum_with_post().await;
    seed_comment(&store, "post1", "c-other", "u2", 1_500).await;
    let session = signed_in("u1");
    let gate = store.hold_writes();

    let (res, ()) = futures::join!(
        client.create_comment(&session, post1(), String::from("mine")),
        async {
            client.pump();
            let view = client.comments_for(&post1());
            assert_eq!(view.len(), 2);
            assert_eq!(view[0].id, EntityId::from("c-other"));
            assert!(client.is_pending(&view[1].id));
            gate.open();
        }
    );
    let mine = res.unwrap();
    client.pump();
    let view = client.comments_for(&post1());
    assert_eq!(
        view.iter().map(|c| c.id.clone()).collect::<Vec<_>>(),
        vec![EntityId::from("c-other"), mine.id.clone()]
    );
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn rapid_toggles_land_in_order() {
    let (store, client) = forum_with_post().await;
    let (u1, post) = (signed_in("u1"), post1());
    let gate = store.hold_writes();

    let (first, second, ()) = futures::join!(
        client.toggle_like(&u1, &post),
        client.toggle_like(&u1, &post),
        async {
            assert_eq!(client.like_count_for(&post1()), Some(0));
            assert!(client.is_pending(&post1()));
            gate.open();
        }
    );
    assert_eq!(first, Ok(true));
    assert_eq!(second, Ok(false));
    assert_eq!(
        store.test_get(&StorePath::like(&StorePath::post(&post1()), &UserId::from("u1"))),
        None
    );
    client.pump();
    assert_eq!(client.like_count_for(&post1()), Some(0));
    assert!(!client.is_pending(&post1()));
}

#[tokio::test]
async fn dropped_like_call_is_reverted_and_frees_its_turn() {
    let (store, client) = forum_with_post().await;
    let (session, post, u1) = (signed_in("u1"), post1(), UserId::from("u1"));
    let gate = store.hold_writes();

    // Polled once, stuck on the held write, then dropped
    assert!(client.toggle_like(&session, &post).now_or_never().is_none());
    assert_eq!(client.pending_count(), 0);
    assert!(!client.is_liked_by(&post, &u1));

    gate.open();
    assert_eq!(client.toggle_like(&session, &post).await, Ok(true));
    assert_eq!(client.pending_count(), 0);
    assert_eq!(
        store.test_get(&StorePath::like(&StorePath::post(&post), &u1)),
        Some(Value::Bool(true))
    );
    client.pump();
    assert!(client.is_liked_by(&post, &u1));
}

#[tokio::test]
async fn dropped_like_call_waiting_its_turn_lets_the_next_one_through() {
    let (store, client) = forum_with_post().await;
    let (session, post, u1) = (signed_in("u1"), post1(), UserId::from("u1"));
    let gate = store.hold_writes();

    let (first, third, ()) = futures::join!(
        client.toggle_like(&session, &post),
        async {
            // Queued behind the first call, then dropped
            assert!(client.toggle_like(&session, &post).now_or_never().is_none());
            assert!(client.is_liked_by(&post, &u1));
            client.toggle_like(&session, &post).await
        },
        async {
            assert_eq!(client.pending_count(), 2);
            gate.open();
        }
    );
    assert_eq!(first, Ok(true));
    assert_eq!(third, Ok(false));
    assert_eq!(client.pending_count(), 0);
    assert_eq!(
        store.test_get(&StorePath::like(&StorePath::post(&post), &u1)),
        None
    );
}

#[tokio::test]
async fn dropped_create_call_leaves_nothing_pending() {
    let (store, client) = forum_with_post().await;
    let session = signed_in("u1");
    let _gate = store.hold_writes();

    assert!(client
        .create_comment(&session, post1(), String::from("gone"))
        .now_or_never()
        .is_none());
    assert_eq!(client.pending_count(), 0);
    assert!(client.comments_for(&post1()).is_empty());
}

#[tokio::test]
async fn signed_out_intents_touch_nothing() {
    let (store, client) = forum_with_post().await;
    let before = store.write_log().len();
    let nobody = SessionContext::new();
    assert_eq!(
        client
            .create_comment(&nobody, post1(), String::from("hi"))
            .await
            .unwrap_err(),
        Error::Unauthenticated
    );
    assert_eq!(
        client.toggle_like(&nobody, &post1()).await.unwrap_err(),
        Error::Unauthenticated
    );
    assert!(client.comments_for(&post1()).is_empty());
    assert_eq!(client.pending_count(), 0);
    assert_eq!(store.write_log().len(), before);
}

#[tokio::test]
async fn reply_is_indexed_under_its_comment() {
    let (store, client) = forum_with_post().await;
    let u1 = signed_in("u1");
    let c = client
        .create_comment(&u1, post1(), String::from("hi"))
        .await
        .unwrap();
    client.subscribe(CollectionKey::replies_of(c.id.clone())).unwrap();
    let r = client
        .create_reply(&u1, c.id.clone(), String::from("yo"))
        .await
        .unwrap();
    assert_eq!(
        store.test_get(&StorePath::reply_entry(&post1(), &c.id, &r.id)),
        Some(Value::Bool(true))
    );
    client.pump();
    let replies = client.replies_for(&c.id);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].post_id, Some(post1()));

    assert!(client.toggle_like(&u1, &r.id).await.unwrap());
    client.pump();
    assert_eq!(client.like_count_for(&r.id), Some(1));
}

#[tokio::test]
async fn posts_by_category_through_the_index() {
    init_logging();
    let store = MockStore::new();
    seed_post(&store, "news", "post1", "a", 1_000, &["u1"]).await;
    seed_post(&store, "news", "post2", "a", 2_000, &[]).await;
    seed_post(&store, "misc", "post3", "a", 3_000, &[]).await;
    store
        .write(&StorePath::parse("categories/news/posts/ghost"), Value::Bool(true))
        .await
        .unwrap();
    let client = ForumClient::new(store.clone());

    let posts = client
        .fetch_posts_by_category(&EntityId::from("news"))
        .await
        .unwrap();
    assert_eq!(
        posts.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
        vec!["post2", "post1"]
    );
    assert_eq!(posts[1].like_count(), 1);
    assert!(client
        .fetch_posts_by_category(&EntityId::from("empty"))
        .await
        .unwrap()
        .is_empty());

    // The live view of a category filters the global feed
    client.subscribe(CollectionKey::posts_in(EntityId::from("misc"))).unwrap();
    client.pump();
    let misc = client.posts_in(&EntityId::from("misc"));
    assert_eq!(misc.len(), 1);
    assert_eq!(misc[0].id, EntityId::from("post3"));
}

#[tokio::test]
async fn only_author_or_superuser_may_delete() {
    let (store, client) = forum_with_post().await;
    seed_comment(&store, "post1", "c1", "author", 2_000).await;
    let c1 = EntityId::from("c1");

    assert_eq!(
        client.delete_comment(&signed_in("u1"), &post1(), &c1).await,
        Err(Error::PermissionDenied)
    );
    assert!(store.test_get(&StorePath::comment(&post1(), &c1)).is_some());

    client
        .delete_comment(&superuser("admin"), &post1(), &c1)
        .await
        .unwrap();
    let log = store.write_log();
    assert_eq!(
        log[log.len() - 2..],
        [
            StorePath::comment_entry(&post1(), &c1),
            StorePath::comment(&post1(), &c1)
        ]
    );
    assert_eq!(store.test_get(&StorePath::comment(&post1(), &c1)), None);
    assert_eq!(
        client.delete_comment(&superuser("admin"), &post1(), &c1).await,
        Err(Error::NotFound(c1))
    );

    assert_eq!(
        client.delete_post(&signed_in("u1"), &post1()).await,
        Err(Error::PermissionDenied)
    );
    client.delete_post(&signed_in("author"), &post1()).await.unwrap();
    assert_eq!(store.test_get(&StorePath::post(&post1())), None);
    assert_eq!(store.test_get(&StorePath::category_index(&EntityId::from("news"))), None);
    client.pump();
    assert!(client.all_posts().is_empty());
}

#[tokio::test]
async fn uncategorized_post_is_listed_globally_and_can_be_deleted() {
    let (store, client) = forum_with_post().await;
    let legacy = EntityId::from("legacy");
    store
        .write(
            &StorePath::post(&legacy),
            json!({ "title": "Old", "content": "x", "author": { "uid": "author" } }),
        )
        .await
        .unwrap();
    client.subscribe(CollectionKey::posts_in(EntityId::from("news"))).unwrap();
    client.pump();
    assert_eq!(client.all_posts().len(), 2);
    let news = client.posts_in(&EntityId::from("news"));
    assert_eq!(
        news.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
        vec!["post1"]
    );

    let before = store.write_log().len();
    client.delete_post(&signed_in("author"), &legacy).await.unwrap();
    assert_eq!(store.write_log()[before..], [StorePath::post(&legacy)]);
    client.pump();
    assert_eq!(client.all_posts().len(), 1);
}

#[tokio::test]
async fn post_update_arrives_through_the_feed() {
    let (_store, client) = forum_with_post().await;
    assert_eq!(
        client
            .update_post(&signed_in("u1"), &post1(), Some(String::from("hijack")), None)
            .await,
        Err(Error::PermissionDenied)
    );
    client
        .update_post(
            &signed_in("author"),
            &post1(),
            Some(String::from("New title")),
            None,
        )
        .await
        .unwrap();
    assert_eq!(client.entity(&post1()).unwrap().updated_at, None);
    client.pump();
    let p = client.entity(&post1()).unwrap();
    assert_eq!(p.title.as_deref(), Some("New title"));
    assert!(p.updated_at.is_some());
}

#[tokio::test]
async fn sign_in_loads_the_stored_profile() {
    init_logging();
    let store = MockStore::new();
    store
        .write(
            &StorePath::profile(&UserId::from("u1")),
            json!({ "username": "alice", "role": "superuser" }),
        )
        .await
        .unwrap();

    let mut ctx = SessionContext::new();
    let session = ctx.sign_in(&store, UserId::from("u1")).await;
    assert_eq!(session.profile.username, "alice");
    assert!(ctx.is_superuser());

    ctx.sign_in(&store, UserId::from("u2")).await;
    let session = ctx.session().unwrap();
    assert_eq!(session.user, UserId::from("u2"));
    assert_eq!(session.profile.username, agora_api::GUEST_NAME);
    assert!(!ctx.is_superuser());

    store.go_offline();
    ctx.sign_in(&store, UserId::from("u1")).await;
    assert!(!ctx.is_superuser());
}
